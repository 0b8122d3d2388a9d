//! Entity stores backing the catalog.
//!
//! Each store owns one `tokio::sync::RwLock` over its map. Records cross the store
//! boundary by value, so a caller never holds a reference into shared state and no
//! operation needs two stores' locks at once.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::proto::{Filter, Laptop};
use crate::{Error, Result};

/// Laptop records keyed by id.
pub mod laptop;

/// Uploaded image files and their metadata.
pub mod image;

/// Running rating aggregates per laptop.
pub mod rating;

/// User credentials and roles.
pub mod user;

pub use image::{validate_image_type, DiskImageStore, ImageInfo};
pub use laptop::InMemoryLaptopStore;
pub use rating::{InMemoryRatingStore, Rating};
pub use user::{InMemoryUserStore, Role, User};

/// Receives qualifying laptops from [`LaptopStore::search`].
///
/// Returning an error stops the search and is propagated to the caller.
#[async_trait]
pub trait LaptopVisitor: Send {
    /// Handles one qualifying laptop.
    async fn visit(&mut self, laptop: Laptop) -> Result<()>;
}

#[async_trait]
impl LaptopVisitor for mpsc::Sender<Laptop> {
    async fn visit(&mut self, laptop: Laptop) -> Result<()> {
        self.send(laptop).await.map_err(|_| Error::Cancelled)
    }
}

/// Storage for laptop records.
#[async_trait]
pub trait LaptopStore: Send + Sync {
    /// Stores a copy of `laptop`, failing with [`Error::AlreadyExists`] on a duplicate id.
    async fn save(&self, laptop: &Laptop) -> Result<()>;

    /// Returns a copy of the laptop with `id`, if stored.
    async fn find(&self, id: &str) -> Option<Laptop>;

    /// Visits a copy of every stored laptop that satisfies `filter`.
    ///
    /// Order is unspecified. Stops at the first visitor error.
    async fn search(&self, filter: &Filter, visitor: &mut dyn LaptopVisitor) -> Result<()>;

    /// Returns the number of stored laptops.
    async fn count(&self) -> usize;
}

/// Storage for laptop images.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Persists `data` for an existing laptop and returns the generated image id.
    async fn save(&self, laptop_id: &str, image_type: &str, data: Vec<u8>) -> Result<String>;

    /// Returns metadata for a stored image.
    async fn find(&self, image_id: &str) -> Option<ImageInfo>;

    /// Returns the number of stored images.
    async fn count(&self) -> usize;
}

/// Storage for rating aggregates.
#[async_trait]
pub trait RatingStore: Send + Sync {
    /// Adds `score` to the aggregate of an existing laptop and returns the new aggregate.
    async fn add(&self, laptop_id: &str, score: f64) -> Result<Rating>;
}

/// Storage for user accounts.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Stores `user`, failing with [`Error::AlreadyExists`] on a duplicate username.
    async fn save(&self, user: User) -> Result<()>;

    /// Returns a copy of the user with `username`, if stored.
    async fn find(&self, username: &str) -> Option<User>;

    /// Returns the number of stored users.
    async fn count(&self) -> usize;
}
