use anyhow::anyhow;
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::app::credentials::{
    generate_verification_code, hash_password, hash_token, verify_password,
};
use crate::app::tokens::{TokenError, TokenKind, TokenPair, TokenService};
use crate::domain::user::User;
use crate::infra::db::Db;
use crate::infra::mailer::{verification_email, Mailer};

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("user is already registered")]
    AlreadyRegistered,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("user is not verified")]
    NotVerified,
    #[error("invalid verification code")]
    InvalidVerificationCode,
    #[error("user not found")]
    UserNotFound,
    #[error("refresh token has been revoked")]
    RefreshRevoked,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("failed to send verification email: {0:#}")]
    Mail(anyhow::Error),
    #[error(transparent)]
    Store(#[from] sqlx::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AccountResult<T> = Result<T, AccountError>;

#[derive(Clone)]
pub struct AuthService {
    db: Db,
    tokens: TokenService,
    mailer: Arc<dyn Mailer>,
    mail_timeout: Duration,
}

impl AuthService {
    pub fn new(
        db: Db,
        tokens: TokenService,
        mailer: Arc<dyn Mailer>,
        mail_timeout: Duration,
    ) -> Self {
        Self {
            db,
            tokens,
            mailer,
            mail_timeout,
        }
    }

    /// Creates an unverified account once the verification email is out.
    ///
    /// A previous unverified row for the same email is purged first, so abandoned
    /// registrations never block a retry. Nothing is inserted if the email cannot be sent.
    pub async fn register(
        &self,
        username: String,
        email: &str,
        password: &str,
    ) -> AccountResult<User> {
        let email = normalize_email(email);

        let existing = sqlx::query("SELECT id, is_verified FROM users WHERE email = $1")
            .bind(&email)
            .fetch_optional(self.db.pool())
            .await?;

        if let Some(row) = existing {
            let is_verified: bool = row.get("is_verified");
            if is_verified {
                return Err(AccountError::AlreadyRegistered);
            }

            let stale_id: Uuid = row.get("id");
            sqlx::query("DELETE FROM users WHERE id = $1 AND is_verified = false")
                .bind(stale_id)
                .execute(self.db.pool())
                .await?;
            tracing::info!(user_id = %stale_id, "purged unverified registration");
        }

        let password_hash = hash_password(password)?;
        let code = generate_verification_code();

        match tokio::time::timeout(
            self.mail_timeout,
            self.mailer.send(verification_email(&code, &email)),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(AccountError::Mail(err)),
            Err(_) => {
                return Err(AccountError::Mail(anyhow!(
                    "mail delivery timed out after {:?}",
                    self.mail_timeout
                )))
            }
        }

        let row = sqlx::query(
            "INSERT INTO users (username, email, password_hash, verify_code) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, username, email, password_hash, is_verified, created_at, updated_at",
        )
        .bind(username)
        .bind(&email)
        .bind(password_hash)
        .bind(code)
        .fetch_one(self.db.pool())
        .await?;

        Ok(user_from_row(&row))
    }

    pub async fn verify_email(&self, email: &str, code: &str) -> AccountResult<()> {
        let result = sqlx::query(
            "UPDATE users \
             SET is_verified = true, verify_code = NULL, updated_at = now() \
             WHERE email = $1 AND verify_code = $2 AND is_verified = false",
        )
        .bind(normalize_email(email))
        .bind(code)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AccountError::InvalidVerificationCode);
        }
        Ok(())
    }

    pub async fn login(&self, email: &str, password: &str) -> AccountResult<TokenPair> {
        let row = sqlx::query(
            "SELECT id, username, email, password_hash, is_verified, created_at, updated_at \
             FROM users WHERE email = $1",
        )
        .bind(normalize_email(email))
        .fetch_optional(self.db.pool())
        .await?;

        let user = match row {
            Some(row) => user_from_row(&row),
            None => return Err(AccountError::InvalidCredentials),
        };

        if !user.is_verified {
            return Err(AccountError::NotVerified);
        }

        if !verify_password(password, &user.password_hash)? {
            return Err(AccountError::InvalidCredentials);
        }

        let tokens = self.tokens.issue_pair(user.id)?;
        sqlx::query(
            "UPDATE users SET refresh_token_hash = $2, updated_at = now() WHERE id = $1",
        )
        .bind(user.id)
        .bind(hash_token(&tokens.refresh.token))
        .execute(self.db.pool())
        .await?;

        Ok(tokens)
    }

    /// Exchanges a refresh token for a new pair. The stored token is swapped atomically,
    /// so a token that was already rotated or cleared by logout cannot be replayed.
    pub async fn refresh(&self, refresh_token: &str) -> AccountResult<TokenPair> {
        let claims = self.tokens.verify_kind(refresh_token, TokenKind::Refresh)?;

        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1")
            .bind(claims.user_id)
            .fetch_optional(self.db.pool())
            .await?;
        let user_id = exists.ok_or(AccountError::UserNotFound)?;

        let tokens = self.tokens.issue_pair(user_id)?;
        let result = sqlx::query(
            "UPDATE users \
             SET refresh_token_hash = $3, updated_at = now() \
             WHERE id = $1 AND refresh_token_hash = $2",
        )
        .bind(user_id)
        .bind(hash_token(refresh_token))
        .bind(hash_token(&tokens.refresh.token))
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AccountError::RefreshRevoked);
        }

        Ok(tokens)
    }

    pub async fn logout(&self, user_id: Uuid) -> AccountResult<()> {
        sqlx::query(
            "UPDATE users SET refresh_token_hash = NULL, updated_at = now() WHERE id = $1",
        )
        .bind(user_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn get_current_user(&self, user_id: Uuid) -> AccountResult<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, email, password_hash, is_verified, created_at, updated_at \
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(user_from_row))
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        is_verified: row.get("is_verified"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
