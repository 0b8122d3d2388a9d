use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{LaptopStore, RatingStore};
use crate::{Error, Result};

/// Running rating aggregate of one laptop.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rating {
    /// Number of scores received.
    pub count: u32,
    /// Sum of all scores received.
    pub sum: f64,
}

impl Rating {
    /// Mean score, or zero before the first rating.
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / f64::from(self.count)
    }
}

/// Rating aggregates held in process memory.
#[derive(Clone)]
pub struct InMemoryRatingStore {
    laptops: Arc<dyn LaptopStore>,
    ratings: Arc<RwLock<HashMap<String, Rating>>>,
}

impl InMemoryRatingStore {
    /// Creates an empty store; ratings are checked against `laptops`.
    pub fn new(laptops: Arc<dyn LaptopStore>) -> Self {
        Self {
            laptops,
            ratings: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl RatingStore for InMemoryRatingStore {
    async fn add(&self, laptop_id: &str, score: f64) -> Result<Rating> {
        if self.laptops.find(laptop_id).await.is_none() {
            return Err(Error::NotFound(format!("laptop '{laptop_id}'")));
        }

        let mut ratings = self.ratings.write().await;
        let rating = ratings.entry(laptop_id.to_string()).or_default();
        rating.count = rating.count.checked_add(1).ok_or_else(|| {
            Error::InvalidArgument(format!("laptop '{laptop_id}' cannot take more ratings"))
        })?;
        rating.sum += score;

        Ok(*rating)
    }
}
