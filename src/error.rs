//! Error types for the laptop catalog

/// Main error types for the library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A record with the same key is already stored.
    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    /// The referenced laptop or user does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A request field is malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An uploaded image grew past the size cap.
    #[error("Image is too large: {size} > {limit}")]
    ImageTooLarge {
        /// Bytes accumulated so far.
        size: usize,
        /// Maximum accepted size.
        limit: usize,
    },

    /// No usable credentials were presented.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// The access token is past its expiry.
    #[error("Access token expired")]
    TokenExpired,

    /// The caller's role may not invoke the method.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The caller went away before the call completed.
    #[error("Request cancelled")]
    Cancelled,

    /// The caller's deadline passed before the call completed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Writing image bytes failed.
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// The access token could not be signed or verified.
    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    /// Password hashing failed.
    #[error("Password hashing failed: {0}")]
    PasswordHash(String),
}
