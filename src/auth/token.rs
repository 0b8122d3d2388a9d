use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::store::{Role, User};
use crate::{Error, Result};

/// Default access token lifetime.
pub const DEFAULT_TOKEN_DURATION: Duration = Duration::from_secs(15 * 60);

/// Identity carried by an access token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Username of the holder.
    pub sub: String,
    /// Role of the holder.
    pub role: Role,
    /// Unix timestamp the token was issued at.
    pub iat: u64,
    /// Unix timestamp the token expires at.
    pub exp: u64,
}

impl Claims {
    /// Builds claims for `username` valid from `issued_at` for `duration`.
    pub fn new(username: impl Into<String>, role: Role, issued_at: u64, duration: Duration) -> Self {
        Self {
            sub: username.into(),
            role,
            iat: issued_at,
            exp: issued_at.saturating_add(duration.as_secs()),
        }
    }
}

/// Issues and validates HS256-signed access tokens.
///
/// Stateless: a token stays valid until it expires.
#[derive(Clone)]
pub struct TokenManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    duration: Duration,
}

impl TokenManager {
    /// Creates a manager signing with `secret` and issuing tokens valid for `duration`.
    pub fn new(secret: &str, duration: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            duration,
        }
    }

    /// Lifetime of issued tokens.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Issues a token for `user` expiring one lifetime from now.
    pub fn issue(&self, user: &User) -> Result<String> {
        let claims = Claims::new(user.username.clone(), user.role, now(), self.duration);
        self.sign(&claims)
    }

    /// Signs arbitrary claims.
    pub fn sign(&self, claims: &Claims) -> Result<String> {
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &self.encoding,
        )?)
    }

    /// Verifies the signature and expiry of `token` and returns its claims.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => Error::TokenExpired,
                _ => Error::Token(e),
            })
    }
}

pub(crate) fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| unreachable!("System time is after UNIX_EPOCH"))
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TokenManager {
        TokenManager::new("test-secret", DEFAULT_TOKEN_DURATION)
    }

    #[test]
    fn issued_token_verifies() {
        let manager = manager();
        let user = User::new("admin1", "secret", Role::Admin).unwrap();

        let token = manager.issue(&user).unwrap();
        let claims = manager.verify(&token).unwrap();

        assert_eq!(claims.sub, "admin1");
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn expired_token_is_rejected() {
        let manager = manager();
        let claims = Claims::new("user1", Role::User, now() - 3600, Duration::from_secs(60));

        let token = manager.sign(&claims).unwrap();
        assert!(matches!(manager.verify(&token), Err(Error::TokenExpired)));
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let other = TokenManager::new("other-secret", DEFAULT_TOKEN_DURATION);
        let claims = Claims::new("user1", Role::User, now(), DEFAULT_TOKEN_DURATION);

        let token = other.sign(&claims).unwrap();
        assert!(matches!(manager().verify(&token), Err(Error::Token(_))));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            manager().verify("not.a.token"),
            Err(Error::Token(_))
        ));
    }
}
