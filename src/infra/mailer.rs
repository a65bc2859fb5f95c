use anyhow::{anyhow, Result};
use lettre::message::{header, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::MailConfig;

/// A rendered message ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

#[axum::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutboundEmail) -> Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|err| anyhow!("failed to configure SMTP relay: {}", err))?
            .port(config.smtp_port);

        if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: config.from.clone(),
        })
    }
}

#[axum::async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutboundEmail) -> Result<()> {
        let message = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|err| anyhow!("invalid from address: {}", err))?,
            )
            .to(email
                .to
                .parse()
                .map_err(|err| anyhow!("invalid recipient address: {}", err))?)
            .subject(email.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(email.text_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(email.html_body),
                    ),
            )
            .map_err(|err| anyhow!("failed to build email message: {}", err))?;

        self.transport.send(message).await?;
        Ok(())
    }
}

/// Writes messages to the log instead of delivering them. Local development only.
pub struct LogMailer;

#[axum::async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutboundEmail) -> Result<()> {
        tracing::info!(to = %email.to, subject = %email.subject, body = %email.text_body, "outbound email");
        Ok(())
    }
}

pub fn verification_email(code: &str, to: &str) -> OutboundEmail {
    let html_body = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Confirm your registration</title>
    <style>
        body {{ font-family: Arial, sans-serif; background-color: #f4f4f4; padding: 20px; text-align: center; }}
        .container {{ background: white; padding: 20px; border-radius: 8px; display: inline-block; }}
        .code {{ font-size: 24px; font-weight: bold; color: #007bff; background: #e7f3ff; padding: 10px 20px; border-radius: 5px; display: inline-block; letter-spacing: 4px; }}
    </style>
</head>
<body>
    <div class="container">
        <h2>Confirm your registration</h2>
        <p>Thanks for signing up! Your verification code is:</p>
        <p class="code">{code}</p>
        <p>Enter this code in the app to finish creating your account.</p>
        <p>If you did not sign up, you can ignore this email.</p>
    </div>
</body>
</html>"#
    );

    let text_body = format!(
        "Confirm your registration\n\n\
         Thanks for signing up! Your verification code is: {code}\n\n\
         Enter this code in the app to finish creating your account.\n\
         If you did not sign up, you can ignore this email.\n"
    );

    OutboundEmail {
        to: to.to_string(),
        subject: "Confirm your registration".to_string(),
        html_body,
        text_body,
    }
}
