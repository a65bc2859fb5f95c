use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use poster::config::{AppConfig, MailTransport};
use poster::infra::db::Db;
use poster::infra::mailer::{LogMailer, Mailer, SmtpMailer};
use poster::{http, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; real deployments set the environment directly.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let db = Db::connect(&config).await?;
    if config.db_apply_schema {
        db.apply_schema().await?;
    }

    let mailer: Arc<dyn Mailer> = match config.mail.transport {
        MailTransport::Smtp => Arc::new(SmtpMailer::new(&config.mail)?),
        MailTransport::Log => {
            tracing::warn!("MAIL_TRANSPORT=log, verification emails are only logged");
            Arc::new(LogMailer)
        }
    };

    let state = AppState::new(&config, db, mailer);
    let app = http::with_middleware(
        http::router(state),
        Duration::from_secs(config.request_timeout_seconds),
    );

    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    tracing::info!("listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
