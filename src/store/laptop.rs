use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{LaptopStore, LaptopVisitor};
use crate::filter::qualifies;
use crate::proto::{Filter, Laptop};
use crate::{Error, Result};

/// Laptop store held in process memory.
#[derive(Clone, Default)]
pub struct InMemoryLaptopStore {
    laptops: Arc<RwLock<HashMap<String, Laptop>>>,
}

impl InMemoryLaptopStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LaptopStore for InMemoryLaptopStore {
    async fn save(&self, laptop: &Laptop) -> Result<()> {
        let mut laptops = self.laptops.write().await;

        if laptops.contains_key(&laptop.id) {
            return Err(Error::AlreadyExists(format!("laptop '{}'", laptop.id)));
        }

        laptops.insert(laptop.id.clone(), laptop.clone());
        Ok(())
    }

    async fn find(&self, id: &str) -> Option<Laptop> {
        let laptops = self.laptops.read().await;
        laptops.get(id).cloned()
    }

    async fn search(&self, filter: &Filter, visitor: &mut dyn LaptopVisitor) -> Result<()> {
        // Visiting may wait on a slow consumer, so matches are copied out and
        // the lock is released before the first visit.
        let matches = {
            let laptops = self.laptops.read().await;
            laptops
                .values()
                .filter(|laptop| qualifies(filter, laptop))
                .cloned()
                .collect::<Vec<_>>()
        };

        for laptop in matches {
            debug!(laptop_id = %laptop.id, "laptop matches filter");
            visitor.visit(laptop).await?;
        }

        Ok(())
    }

    async fn count(&self) -> usize {
        self.laptops.read().await.len()
    }
}
