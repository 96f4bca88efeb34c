use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::error::{Result, ScrapeError};
use crate::product::Product;
use crate::store::Store;

/// Change-detection cache: title → last seen product, as JSON.
pub struct Cache {
    store: Box<dyn Store>,
    // One async lock per title so a compare and its write are never
    // interleaved with another upsert of the same product.
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Cache {
    pub fn new(store: Box<dyn Store>) -> Self {
        Self {
            store,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .key_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Store `product` unless the cached entry has the same price.
    ///
    /// Returns `(true, product)` when the entry was inserted or replaced and
    /// `(false, stored)` when the cache already held that price.
    pub async fn upsert(&self, product: &Product) -> Result<(bool, Product)> {
        let lock = self.key_lock(&product.title);
        let _guard = lock.lock().await;

        if let Some(raw) = self.store.get(&product.title).await? {
            let stored: Product = serde_json::from_str(&raw)?;
            if stored.price == product.price {
                debug!(title = %product.title, "unchanged");
                return Ok((false, stored));
            }
            debug!(title = %product.title, old = %stored.price, new = %product.price, "price changed");
        }

        let value = serde_json::to_string(product)?;
        self.store.set(&product.title, &value).await?;
        Ok((true, product.clone()))
    }

    #[cfg(test)]
    pub async fn get(&self, title: &str) -> Result<Option<Product>> {
        match self.store.get(title).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.store.keys().await?.len())
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.flush().await?;
        // A lock still shared with an upsert in flight must stay in the map,
        // or the next upsert of that title would get a different one.
        self.key_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        info!("Cache cleared");
        Ok(())
    }

    /// Write every entry to `path` as `", "`-separated rows under a header of
    /// `fields`. Returns the number of rows written.
    pub async fn export_all(&self, path: &Path, fields: &[String]) -> Result<usize> {
        let keys = self.store.keys().await?;
        info!("Total keys in the cache: {}", keys.len());

        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            // A key can vanish between the scan and the read.
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            let entry: serde_json::Value = serde_json::from_str(&raw)?;
            let mut row = Vec::with_capacity(fields.len());
            for field in fields {
                let value = entry.get(field).ok_or_else(|| {
                    ScrapeError::Export(format!("entry {key:?} has no field {field:?}"))
                })?;
                row.push(match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
            }
            rows.push(row.join(", "));
        }

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "{}", fields.join(", "))?;
        for row in &rows {
            writeln!(out, "{row}")?;
        }
        out.flush()?;

        info!("Exported {} rows to {}", rows.len(), path.display());
        Ok(rows.len())
    }
}
