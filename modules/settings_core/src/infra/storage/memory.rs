//! In-memory storage backend

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::SettingsStorage;

static PROCESS_STORAGE: Lazy<Arc<InMemoryStorage>> = Lazy::new(|| Arc::new(InMemoryStorage::new()));

/// Process-wide persistence namespace
pub fn process_storage() -> Arc<InMemoryStorage> {
    PROCESS_STORAGE.clone()
}

/// Map-backed storage with an optional byte quota
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    data: Arc<RwLock<HashMap<String, String>>>,
    /// Total bytes (keys + values) allowed; `None` is unlimited
    quota: Option<usize>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that rejects writes once `quota` bytes would be exceeded
    pub fn with_quota(quota: usize) -> Self {
        Self {
            quota: Some(quota),
            ..Self::default()
        }
    }

    /// Number of successful `set_item` calls
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    pub fn clear(&self) {
        self.data.write().clear();
    }

    fn used_bytes(data: &HashMap<String, String>) -> usize {
        data.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl SettingsStorage for InMemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self.data.write();
        if let Some(quota) = self.quota {
            let current = data.get(key).map_or(0, |v| key.len() + v.len());
            let needed = Self::used_bytes(&data) - current + key.len() + value.len();
            if needed > quota {
                bail!("quota exceeded: {} of {} bytes", needed, quota);
            }
        }
        data.insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.data.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.data.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let storage = InMemoryStorage::new();
        storage.set_item("language", "fr").unwrap();
        assert_eq!(storage.get_item("language").unwrap().as_deref(), Some("fr"));
        assert_eq!(storage.write_count(), 1);

        storage.remove_item("language").unwrap();
        assert!(storage.get_item("language").unwrap().is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_quota() {
        let storage = InMemoryStorage::with_quota(20);
        storage.set_item("a", "0123456789").unwrap();
        assert!(storage.set_item("b", "0123456789").is_err());
        // Overwriting an existing key only counts the difference
        storage.set_item("a", "01234567890123").unwrap();
        assert_eq!(storage.write_count(), 2);
    }

    #[test]
    fn test_clones_share_data() {
        let storage = InMemoryStorage::new();
        let clone = storage.clone();
        clone.set_item("k", "v").unwrap();
        assert!(storage.contains("k"));
        assert_eq!(storage.keys().unwrap(), vec!["k".to_string()]);
    }
}
