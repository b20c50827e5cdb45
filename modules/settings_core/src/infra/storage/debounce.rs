//! Debounced, coalescing persistence writer
//!
//! Each key has at most one pending value. A newer `schedule` for the same
//! key aborts the older timer, so only the final value of a burst is written.
//! Values identical to the last successfully written form are skipped.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::SettingsStorage;
use crate::contract::SettingsError;

struct Pending {
    value: String,
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct WriterState {
    pending: HashMap<String, Pending>,
    last_written: HashMap<String, String>,
    generation: u64,
}

pub struct DebouncedWriter {
    storage: Arc<dyn SettingsStorage>,
    delay: Duration,
    scratch_key: String,
    state: Mutex<WriterState>,
}

impl DebouncedWriter {
    pub fn new(
        storage: Arc<dyn SettingsStorage>,
        delay: Duration,
        scratch_key: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            storage,
            delay,
            scratch_key: scratch_key.into(),
            state: Mutex::new(WriterState::default()),
        })
    }

    pub fn storage(&self) -> &Arc<dyn SettingsStorage> {
        &self.storage
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Queue `value` for `key`. Outside a tokio runtime the write happens now.
    pub fn schedule(self: &Arc<Self>, key: &str, value: String) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.write_now(key, &value);
            return;
        };

        let mut state = self.state.lock();
        state.generation += 1;
        let generation = state.generation;

        if let Some(previous) = state.pending.remove(key) {
            if let Some(handle) = previous.handle {
                handle.abort();
            }
        }

        let writer: Weak<Self> = Arc::downgrade(self);
        let task_key = key.to_string();
        let delay = self.delay;
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(writer) = writer.upgrade() {
                writer.fire(&task_key, generation);
            }
        });

        state.pending.insert(
            key.to_string(),
            Pending {
                value,
                generation,
                handle: Some(handle),
            },
        );
        tracing::trace!(key, generation, "persistence scheduled");
    }

    fn fire(&self, key: &str, generation: u64) {
        let value = {
            let mut state = self.state.lock();
            match state.pending.get(key) {
                Some(pending) if pending.generation == generation => {
                    state.pending.remove(key).map(|p| p.value)
                }
                _ => None,
            }
        };
        if let Some(value) = value {
            self.write_now(key, &value);
        }
    }

    /// Write immediately. Returns whether the value is now persisted.
    ///
    /// On failure the scratch key is removed and the write retried once;
    /// a second failure is logged and the value stays only in memory.
    pub fn write_now(&self, key: &str, value: &str) -> bool {
        if self.state.lock().last_written.get(key).map(String::as_str) == Some(value) {
            tracing::trace!(key, "persistence skipped, value unchanged");
            return true;
        }

        let result = self.storage.set_item(key, value).or_else(|first| {
            tracing::warn!(key, error = %first, "persistence failed, retrying after cleanup");
            if let Err(e) = self.storage.remove_item(&self.scratch_key) {
                tracing::debug!(scratch_key = %self.scratch_key, error = %e, "scratch cleanup failed");
            }
            self.storage.set_item(key, value)
        });

        match result {
            Ok(()) => {
                self.state
                    .lock()
                    .last_written
                    .insert(key.to_string(), value.to_string());
                tracing::debug!(key, bytes = value.len(), "settings persisted");
                true
            }
            Err(e) => {
                let err = SettingsError::Persistence {
                    key: key.to_string(),
                    cause: e.to_string(),
                };
                tracing::error!(error = %err, "value kept in memory only");
                false
            }
        }
    }

    /// Write every pending value now and cancel their timers
    pub fn flush(&self) {
        self.flush_where(|_| true);
    }

    /// Write the pending values of exactly `keys`
    pub fn flush_keys(&self, keys: &[String]) {
        self.flush_where(|key| keys.iter().any(|k| k == key));
    }

    /// Write pending values whose key satisfies `selected`, oldest first
    fn flush_where(&self, selected: impl Fn(&str) -> bool) {
        let mut drained: Vec<(String, Pending)> = {
            let mut state = self.state.lock();
            let keys: Vec<String> = state
                .pending
                .keys()
                .filter(|k| selected(k.as_str()))
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|k| state.pending.remove(&k).map(|p| (k, p)))
                .collect()
        };
        drained.sort_by_key(|(_, pending)| pending.generation);
        for (key, pending) in drained {
            if let Some(handle) = pending.handle {
                handle.abort();
            }
            self.write_now(&key, &pending.value);
        }
    }

    /// Drop the pending value for `key` without writing it
    pub fn cancel(&self, key: &str) -> bool {
        let removed = self.state.lock().pending.remove(key);
        match removed {
            Some(pending) => {
                if let Some(handle) = pending.handle {
                    handle.abort();
                }
                true
            }
            None => false,
        }
    }

    pub fn cancel_prefix(&self, prefix: &str) {
        let mut state = self.state.lock();
        state.pending.retain(|key, pending| {
            if !key.starts_with(prefix) {
                return true;
            }
            if let Some(handle) = pending.handle.take() {
                handle.abort();
            }
            false
        });
    }

    /// Cancel any pending write and delete the persisted key
    pub fn remove(&self, key: &str) {
        self.cancel(key);
        self.state.lock().last_written.remove(key);
        if let Err(e) = self.storage.remove_item(key) {
            tracing::warn!(key, error = %e, "failed to remove persisted key");
        }
    }

    /// Record `value` as the stored form of `key`, e.g. after loading it
    pub fn mark_written(&self, key: &str, value: &str) {
        self.state
            .lock()
            .last_written
            .insert(key.to_string(), value.to_string());
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.state.lock().pending.contains_key(key)
    }
}

impl Drop for DebouncedWriter {
    fn drop(&mut self) {
        for (_, pending) in self.state.get_mut().pending.drain() {
            if let Some(handle) = pending.handle {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::storage::InMemoryStorage;

    fn writer(storage: &InMemoryStorage) -> Arc<DebouncedWriter> {
        DebouncedWriter::new(
            Arc::new(storage.clone()),
            Duration::from_millis(300),
            "scratch",
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_coalesced() {
        let storage = InMemoryStorage::new();
        let writer = writer(&storage);

        writer.schedule("k", "1".to_string());
        tokio::time::sleep(Duration::from_millis(50)).await;
        writer.schedule("k", "2".to_string());
        tokio::time::sleep(Duration::from_millis(50)).await;
        writer.schedule("k", "3".to_string());
        assert_eq!(storage.write_count(), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(storage.write_count(), 1);
        assert_eq!(storage.get_item("k").unwrap().as_deref(), Some("3"));
        assert_eq!(writer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_value_is_skipped() {
        let storage = InMemoryStorage::new();
        let writer = writer(&storage);

        writer.schedule("k", "same".to_string());
        tokio::time::sleep(Duration::from_millis(400)).await;
        writer.schedule("k", "same".to_string());
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(storage.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_and_cancel() {
        let storage = InMemoryStorage::new();
        let writer = writer(&storage);

        writer.schedule("a", "1".to_string());
        writer.schedule("b", "2".to_string());
        assert!(writer.cancel("b"));
        writer.flush();
        assert_eq!(storage.get_item("a").unwrap().as_deref(), Some("1"));
        assert!(storage.get_item("b").unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(storage.write_count(), 1);
    }

    #[test]
    fn test_without_runtime_writes_synchronously() {
        let storage = InMemoryStorage::new();
        let writer = writer(&storage);
        writer.schedule("k", "v".to_string());
        assert_eq!(storage.get_item("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_scratch_key_removed_before_retry() {
        let storage = InMemoryStorage::with_quota(24);
        storage.set_item("scratch", "0123456789").unwrap();
        let writer = writer(&storage);

        assert!(writer.write_now("key", "0123456789"));
        assert!(!storage.contains("scratch"));
        assert_eq!(storage.get_item("key").unwrap().as_deref(), Some("0123456789"));
    }

    #[test]
    fn test_failure_after_retry_is_swallowed() {
        let storage = InMemoryStorage::with_quota(4);
        let writer = writer(&storage);
        assert!(!writer.write_now("key", "too large"));
        assert!(storage.is_empty());
    }
}
