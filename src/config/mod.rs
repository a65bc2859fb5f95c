use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::net::SocketAddr;
use std::str::FromStr;

const MIN_SECRET_BYTES: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MailTransport {
    Smtp,
    Log,
}

impl FromStr for MailTransport {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "smtp" => Ok(Self::Smtp),
            "log" => Ok(Self::Log),
            other => Err(format!("unknown mail transport `{}`", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MailConfig {
    pub transport: MailTransport,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub from: String,
    pub timeout_seconds: u64,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_connect_timeout_seconds: u64,
    pub db_idle_timeout_seconds: u64,
    pub db_max_lifetime_seconds: u64,
    pub db_apply_schema: bool,
    pub jwt_secret: Vec<u8>,
    pub access_ttl_minutes: u64,
    pub refresh_ttl_days: u64,
    pub request_timeout_seconds: u64,
    pub cookie_secure: bool,
    pub mail: MailConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_or("HTTP_ADDR", "0.0.0.0:8080");
        let _parsed_http_addr = SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;

        let transport: MailTransport = env_or_parse("MAIL_TRANSPORT", "smtp")?;
        let smtp_host = match transport {
            MailTransport::Smtp => env_or_err("SMTP_HOST")?,
            MailTransport::Log => env_or("SMTP_HOST", "localhost"),
        };

        Ok(Self {
            http_addr,
            database_url: env_or_err("DATABASE_URL")?,
            db_max_connections: env_or_parse("DB_MAX_CONNECTIONS", "25")?,
            db_connect_timeout_seconds: env_or_parse("DB_CONNECT_TIMEOUT_SECONDS", "5")?,
            db_idle_timeout_seconds: env_or_parse("DB_IDLE_TIMEOUT_SECONDS", "300")?,
            db_max_lifetime_seconds: env_or_parse("DB_MAX_LIFETIME_SECONDS", "1800")?,
            db_apply_schema: env_or_parse("DB_APPLY_SCHEMA", "true")?,
            jwt_secret: decode_secret("JWT_SECRET", &env_or_err("JWT_SECRET")?)?,
            access_ttl_minutes: env_or_parse("ACCESS_TTL_MINUTES", "15")?,
            refresh_ttl_days: env_or_parse("REFRESH_TTL_DAYS", "7")?,
            request_timeout_seconds: env_or_parse("REQUEST_TIMEOUT_SECONDS", "15")?,
            cookie_secure: env_or_parse("COOKIE_SECURE", "true")?,
            mail: MailConfig {
                transport,
                smtp_host,
                smtp_port: env_or_parse("SMTP_PORT", "587")?,
                smtp_username: std::env::var("SMTP_USERNAME").ok(),
                smtp_password: std::env::var("SMTP_PASSWORD").ok(),
                from: env_or("MAIL_FROM", "no-reply@poster.local"),
                timeout_seconds: env_or_parse("MAIL_TIMEOUT_SECONDS", "10")?,
            },
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_err(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing required env var: {}", key))
}

fn env_or_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {}: {}", key, err))
}

fn decode_secret(key: &str, value: &str) -> Result<Vec<u8>> {
    let decoded = STANDARD
        .decode(value.trim().as_bytes())
        .map_err(|err| anyhow!("invalid {}: {}", key, err))?;
    if decoded.len() < MIN_SECRET_BYTES {
        return Err(anyhow!(
            "invalid {}: expected at least {} bytes",
            key,
            MIN_SECRET_BYTES
        ));
    }
    Ok(decoded)
}
