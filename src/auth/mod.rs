//! Authentication and authorization.
//!
//! [`AuthServiceImpl`] exchanges a username and password for a signed access token
//! issued by [`TokenManager`]. [`AuthLayer`] sits in front of every service and
//! admits a call only when its token is valid and its role is allowed by the
//! [`AccessPolicy`].

/// Access policy and the server-side interceptor layer.
pub mod interceptor;

/// Login service.
pub mod service;

/// Access token issuing and validation.
pub mod token;

pub use interceptor::{methods, AccessPolicy, AuthLayer, AuthMiddleware};
pub use service::AuthServiceImpl;
pub use token::{Claims, TokenManager, DEFAULT_TOKEN_DURATION};
