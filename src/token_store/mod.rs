//! Token store
//!
//! ## Responsibilities
//!
//! - Persist the session token across process restarts
//! - Expose only get/set/clear; token validity is the session gate's job
//!
//! The engine never reads or writes the storage directly; everything goes
//! through the `TokenStore` seam.

mod repository;

pub use repository::SqliteTokenStore;

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Storage key for the session token (the web client used the same name)
pub const TOKEN_KEY: &str = "circular_token";

/// Key-value persistence seam for the session token
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persisted token, if any
    async fn load(&self) -> Result<Option<String>>;

    /// Persist a token, replacing any previous one
    async fn save(&self, token: &str) -> Result<()>;

    /// Remove the persisted token. Idempotent.
    async fn clear(&self) -> Result<()>;
}

/// In-memory store for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.token.read().await.clone())
    }

    async fn save(&self, token: &str) -> Result<()> {
        *self.token.write().await = Some(token.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.token.write().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryTokenStore::new();
        assert!(store.load().await.unwrap().is_none());
        store.save("tok").await.unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some("tok"));
        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }
}
