use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    /// Name of the cookie carrying this kind of token.
    pub fn cookie_name(&self) -> &'static str {
        match self {
            Self::Access => "access_token",
            Self::Refresh => "refresh_token",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub typ: TokenKind,
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: SignedToken,
    pub refresh: SignedToken,
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

/// Mints and verifies HS256 tokens. Cheap to clone.
#[derive(Clone)]
pub struct TokenService {
    keys: Arc<Keys>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &[u8], access_ttl_minutes: u64, refresh_ttl_days: u64) -> Self {
        Self {
            keys: Arc::new(Keys {
                encoding: EncodingKey::from_secret(secret),
                decoding: DecodingKey::from_secret(secret),
            }),
            access_ttl: Duration::minutes(access_ttl_minutes as i64),
            refresh_ttl: Duration::days(refresh_ttl_days as i64),
        }
    }

    pub fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        }
    }

    pub fn issue_access_token(&self, user_id: Uuid) -> Result<SignedToken, TokenError> {
        self.issue_at(user_id, TokenKind::Access, OffsetDateTime::now_utc())
    }

    pub fn issue_refresh_token(&self, user_id: Uuid) -> Result<SignedToken, TokenError> {
        self.issue_at(user_id, TokenKind::Refresh, OffsetDateTime::now_utc())
    }

    pub fn issue_pair(&self, user_id: Uuid) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access: self.issue_access_token(user_id)?,
            refresh: self.issue_refresh_token(user_id)?,
        })
    }

    /// Mints a token as if the clock read `issued_at`.
    pub fn issue_at(
        &self,
        user_id: Uuid,
        kind: TokenKind,
        issued_at: OffsetDateTime,
    ) -> Result<SignedToken, TokenError> {
        let expires_at = issued_at + self.ttl(kind);
        let claims = Claims {
            user_id,
            typ: kind,
            jti: Uuid::new_v4(),
            iat: issued_at.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.keys.encoding)
            .map_err(TokenError::Signing)?;
        Ok(SignedToken { token, expires_at })
    }

    /// Checks signature and expiry. Expiry is reported separately so callers can ask for a
    /// refresh instead of a new login.
    pub fn verify_token(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        decode::<Claims>(token, &self.keys.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }

    pub fn verify_kind(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        let claims = self.verify_token(token)?;
        if claims.typ != expected {
            return Err(TokenError::Invalid);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn service() -> TokenService {
        TokenService::new(SECRET, 15, 7)
    }

    #[test]
    fn access_and_refresh_carry_same_user() {
        let tokens = service();
        let user_id = Uuid::new_v4();
        let pair = tokens.issue_pair(user_id).unwrap();

        let access = tokens.verify_kind(&pair.access.token, TokenKind::Access).unwrap();
        let refresh = tokens.verify_kind(&pair.refresh.token, TokenKind::Refresh).unwrap();

        assert_eq!(access.user_id, user_id);
        assert_eq!(refresh.user_id, user_id);
        assert_ne!(access.jti, refresh.jti);
    }

    #[test]
    fn ttls_match_token_kind() {
        let tokens = service();
        let now = OffsetDateTime::now_utc();
        let access = tokens.issue_at(Uuid::new_v4(), TokenKind::Access, now).unwrap();
        let refresh = tokens.issue_at(Uuid::new_v4(), TokenKind::Refresh, now).unwrap();

        assert_eq!(access.expires_at - now, Duration::minutes(15));
        assert_eq!(refresh.expires_at - now, Duration::days(7));

        let claims = tokens.verify_token(&access.token).unwrap();
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn access_token_from_sixteen_minutes_ago_is_expired() {
        let tokens = service();
        let minted = OffsetDateTime::now_utc() - Duration::minutes(16);
        let stale = tokens.issue_at(Uuid::new_v4(), TokenKind::Access, minted).unwrap();

        assert!(matches!(
            tokens.verify_token(&stale.token),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn tampered_token_is_invalid_not_expired() {
        let tokens = service();
        let signed = tokens.issue_access_token(Uuid::new_v4()).unwrap();
        let mut tampered = signed.token.clone();
        tampered.push('x');

        assert!(matches!(
            tokens.verify_token(&tampered),
            Err(TokenError::Invalid)
        ));
        assert!(matches!(
            tokens.verify_token("not.a.jwt"),
            Err(TokenError::Invalid)
        ));
    }

    #[test]
    fn token_signed_with_other_secret_is_invalid() {
        let other = TokenService::new(b"ffffffffffffffffffffffffffffffff", 15, 7);
        let signed = other.issue_access_token(Uuid::new_v4()).unwrap();

        assert!(matches!(
            service().verify_token(&signed.token),
            Err(TokenError::Invalid)
        ));
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let tokens = service();
        let refresh = tokens.issue_refresh_token(Uuid::new_v4()).unwrap();

        assert!(matches!(
            tokens.verify_kind(&refresh.token, TokenKind::Access),
            Err(TokenError::Invalid)
        ));
    }
}
