use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::UserStore;
use crate::{Error, Result};

/// Role carried in access tokens and checked against the access policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// May create laptops and upload images.
    Admin,
    /// Regular account.
    User,
}

impl Role {
    /// Lowercase name used in tokens and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(Error::InvalidArgument(format!("unknown role '{other}'"))),
        }
    }
}

/// A user account with an argon2 password hash.
#[derive(Clone, Debug)]
pub struct User {
    /// Unique login name.
    pub username: String,
    /// PHC-formatted argon2 hash of the password.
    pub password_hash: String,
    /// Account role.
    pub role: Role,
}

impl User {
    /// Creates a user, hashing `password` with a fresh random salt.
    pub fn new(username: impl Into<String>, password: &str, role: Role) -> Result<Self> {
        let mut salt_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt_bytes);

        let salt =
            SaltString::encode_b64(&salt_bytes).map_err(|e| Error::PasswordHash(e.to_string()))?;
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| Error::PasswordHash(e.to_string()))?
            .to_string();

        Ok(Self {
            username: username.into(),
            password_hash,
            role,
        })
    }

    /// Returns true when `password` matches the stored hash.
    pub fn verify_password(&self, password: &str) -> bool {
        let Ok(hash) = PasswordHash::new(&self.password_hash) else {
            return false;
        };

        Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok()
    }
}

/// User accounts held in process memory.
#[derive(Clone, Default)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<HashMap<String, User>>>,
}

impl InMemoryUserStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn save(&self, user: User) -> Result<()> {
        let mut users = self.users.write().await;

        if users.contains_key(&user.username) {
            return Err(Error::AlreadyExists(format!("user '{}'", user.username)));
        }

        users.insert(user.username.clone(), user);
        Ok(())
    }

    async fn find(&self, username: &str) -> Option<User> {
        self.users.read().await.get(username).cloned()
    }

    async fn count(&self) -> usize {
        self.users.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip() {
        let user = User::new("admin1", "secret", Role::Admin).unwrap();

        assert_ne!(user.password_hash, "secret");
        assert!(user.verify_password("secret"));
        assert!(!user.verify_password("Secret"));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let a = User::new("a", "secret", Role::User).unwrap();
        let b = User::new("b", "secret", Role::User).unwrap();
        assert_ne!(a.password_hash, b.password_hash);
    }

    #[test]
    fn role_parsing() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert!("root".parse::<Role>().is_err());
        assert_eq!(Role::Admin.to_string(), "admin");
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let store = InMemoryUserStore::new();
        store
            .save(User::new("user1", "secret", Role::User).unwrap())
            .await
            .unwrap();

        let err = store
            .save(User::new("user1", "other", Role::Admin).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));

        let stored = store.find("user1").await.unwrap();
        assert_eq!(stored.role, Role::User);
        assert_eq!(store.count().await, 1);
    }
}
