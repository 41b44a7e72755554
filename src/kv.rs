use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Opaque string key-value capability the prediction history is written to.
#[async_trait]
pub trait KvStore {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local store. An optional quota bounds the size of any single value,
/// failing writes the way a browser's storage quota does.
#[derive(Debug, Default, Clone)]
pub struct MemoryKv {
    entries: Arc<Mutex<HashMap<String, String>>>,
    quota: Option<usize>,
}
impl MemoryKv {
    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: Default::default(),
            quota: Some(quota),
        }
    }
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("memory store poisoned"))?;
        Ok(entries.get(key).cloned())
    }
    async fn set(&self, key: &str, value: String) -> Result<()> {
        if let Some(quota) = self.quota {
            if value.len() > quota {
                bail!(
                    "quota exceeded: {} bytes for {} (limit {})",
                    value.len(),
                    key,
                    quota
                );
            }
        }
        self.entries
            .lock()
            .map_err(|_| anyhow!("memory store poisoned"))?
            .insert(key.to_string(), value);
        Ok(())
    }
    async fn remove(&self, key: &str) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("memory store poisoned"))?
            .remove(key);
        Ok(())
    }
}
