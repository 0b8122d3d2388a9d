//! Remote laptop catalog served over gRPC.
//!
//! Clients log in for a signed access token, then create, search, rate, and attach
//! images to laptop records held in memory by the server. Every call passes through
//! [`auth::AuthLayer`], which checks the caller's role against an [`auth::AccessPolicy`]
//! before the request reaches [`service::LaptopServiceImpl`].

/// Error types.
pub mod error;

/// Generated protobuf messages and gRPC stubs.
pub mod proto {
    tonic::include_proto!("catalog");
}

/// Authentication: users, tokens, the login service, and the access interceptor.
pub mod auth;

/// Client-side helpers for calling the catalog.
pub mod client;

/// Server configuration.
pub mod config;

/// Per-call deadline tracking.
pub mod context;

/// Search predicate evaluation.
pub mod filter;

/// JSON and binary fixture files for generated messages.
pub mod serializer;

/// Laptop catalog gRPC service.
pub mod service;

/// In-memory entity stores.
pub mod store;

pub use error::Error;

/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;
