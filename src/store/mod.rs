mod memory;
mod redis_store;
mod sqlite;

use async_trait::async_trait;

use crate::error::{Result, ScrapeError};

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;
pub use self::sqlite::SqliteStore;

/// String key-value backend behind the change-detection cache.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Every key, in whatever order the backend enumerates them.
    async fn keys(&self) -> Result<Vec<String>>;
    /// Drop every entry.
    async fn flush(&self) -> Result<()>;
}

/// Open a backend from a connection string:
/// `redis://host:port/db`, `rediss://...`, `sqlite://path` or `memory`.
pub async fn open_store(url: &str) -> Result<Box<dyn Store>> {
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        Ok(Box::new(RedisStore::connect(url).await?))
    } else if let Some(path) = url.strip_prefix("sqlite://") {
        Ok(Box::new(SqliteStore::open(path)?))
    } else if url == "memory" || url == "memory://" {
        Ok(Box::new(MemoryStore::new()))
    } else {
        Err(ScrapeError::Validation(format!(
            "unsupported store url: {url} (expected redis://, sqlite:// or memory)"
        )))
    }
}
