pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;

use std::sync::Arc;
use std::time::Duration;

use crate::app::tokens::TokenService;
use crate::config::AppConfig;
use crate::infra::{db::Db, mailer::Mailer};

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub tokens: TokenService,
    pub mailer: Arc<dyn Mailer>,
    pub mail_timeout: Duration,
    pub cookie_secure: bool,
}

impl AppState {
    pub fn new(config: &AppConfig, db: Db, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            db,
            tokens: TokenService::new(
                &config.jwt_secret,
                config.access_ttl_minutes,
                config.refresh_ttl_days,
            ),
            mailer,
            mail_timeout: Duration::from_secs(config.mail.timeout_seconds),
            cookie_secure: config.cookie_secure,
        }
    }
}
