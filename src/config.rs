use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::{AccessPolicy, TokenManager};
use crate::store::{Role, User};

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname or IP address to bind to.
    pub host: String,
    /// Port number to listen on.
    pub port: u16,
    /// Folder uploaded images are written to.
    pub image_dir: PathBuf,
    /// Access token settings.
    pub token: TokenSettings,
    /// Access control settings.
    pub access: AccessSettings,
    /// Metrics exporter configuration.
    pub metrics: MetricsSettings,
    /// Accounts created at startup.
    pub seed_users: Vec<SeedUser>,
}

impl ServerConfig {
    /// Converts host and port into a socket address.
    ///
    /// # Errors
    /// Returns an error if the host and port do not form a valid socket address.
    pub fn addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                format!(
                    "Invalid server address configuration (host: {}, port: {}): {}",
                    self.host, self.port, e
                )
            })
    }

    /// Builds the token manager described by [`TokenSettings`].
    pub fn token_manager(&self) -> TokenManager {
        TokenManager::new(&self.token.secret, self.token.duration())
    }

    /// Builds the access policy described by [`AccessSettings`].
    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy::catalog(self.access.public_search)
    }
}

/// Access token settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenSettings {
    /// HMAC secret tokens are signed with.
    pub secret: String,
    /// Token lifetime in seconds.
    pub duration_secs: u64,
}

impl TokenSettings {
    /// Token lifetime.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

/// Access control settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessSettings {
    /// Whether `SearchLaptop` may be called without logging in.
    pub public_search: bool,
}

/// Metrics exporter settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Whether metrics export is enabled.
    pub enabled: bool,
    /// Hostname or IP address for metrics server.
    pub host: String,
    /// Port number for metrics server.
    pub port: u16,
}

impl MetricsSettings {
    /// Converts host and port into a socket address for metrics server.
    ///
    /// # Errors
    /// Returns an error if the host and port do not form a valid socket address.
    pub fn addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                format!(
                    "Invalid metrics address configuration (host: {}, port: {}): {}",
                    self.host, self.port, e
                )
            })
    }
}

/// An account created when the server starts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeedUser {
    /// Login name.
    pub username: String,
    /// Plain-text password, hashed before storage.
    pub password: String,
    /// Account role.
    pub role: Role,
}

impl SeedUser {
    /// Hashes the password into a storable [`User`].
    pub fn to_user(&self) -> crate::Result<User> {
        User::new(self.username.clone(), &self.password, self.role)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            image_dir: PathBuf::from("img"),
            token: TokenSettings {
                secret: "secret".to_string(),
                duration_secs: 15 * 60,
            },
            access: AccessSettings {
                public_search: true,
            },
            metrics: MetricsSettings {
                enabled: false,
                host: "127.0.0.1".to_string(),
                port: 9090,
            },
            seed_users: vec![
                SeedUser {
                    username: "admin1".to_string(),
                    password: "secret".to_string(),
                    role: Role::Admin,
                },
                SeedUser {
                    username: "user1".to_string(),
                    password: "secret".to_string(),
                    role: Role::User,
                },
            ],
        }
    }
}

impl ServerConfig {
    /// Loads configuration from `.env` file, TOML file, and environment variables.
    ///
    /// Configuration priority (highest to lowest):
    /// 1. Environment variables with `SERVER_` prefix (e.g., `SERVER_PORT=8080`)
    /// 2. TOML configuration file (if exists)
    /// 3. `.env` file (if exists)
    /// 4. Built-in defaults
    ///
    /// The TOML file path can be set via `SERVER_CONFIG_PATH` environment variable.
    /// If not set, defaults to `./config/server.toml`. A missing file is skipped.
    ///
    /// # Environment Variable Examples
    /// ```bash
    /// SERVER_HOST=0.0.0.0
    /// SERVER_PORT=8080
    /// SERVER_IMAGE_DIR=/var/lib/catalog/img
    /// SERVER_TOKEN_SECRET=change-me
    /// SERVER_TOKEN_DURATION_SECS=900
    /// SERVER_ACCESS_PUBLIC_SEARCH=false
    /// SERVER_METRICS_ENABLED=true
    /// ```
    ///
    /// # Errors
    /// Returns an error if the configuration is malformed or contains invalid values.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> figment::error::Result<Self> {
        use figment::providers::{Env, Format, Serialized, Toml};
        use figment::Figment;

        let _ = dotenvy::dotenv();

        let config_path = std::env::var("SERVER_CONFIG_PATH")
            .unwrap_or_else(|_| "config/server.toml".to_string());

        Figment::from(Serialized::defaults(ServerConfig::default()))
            .merge(Toml::file(&config_path))
            .merge(
                Env::prefixed("SERVER_")
                    .ignore(&["CONFIG_PATH"])
                    .map(|key| {
                        key.as_str()
                            .replacen("token_", "token.", 1)
                            .replacen("access_", "access.", 1)
                            .replacen("metrics_", "metrics.", 1)
                            .into()
                    }),
            )
            .extract()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error message if the configuration is unusable.
    pub fn validate(&self) -> Result<(), String> {
        self.addr()?;

        if self.token.secret.is_empty() {
            return Err("Token secret cannot be empty".to_string());
        }

        if self.token.duration_secs == 0 {
            return Err("Token duration_secs cannot be zero".to_string());
        }

        if self.image_dir.as_os_str().is_empty() {
            return Err("Image directory cannot be empty".to_string());
        }

        if self.metrics.enabled {
            self.metrics.addr()?;
        }

        Ok(())
    }
}
