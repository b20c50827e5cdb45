//! Persistence namespace - a mapping from string keys to string blobs

pub mod debounce;
pub mod file;
pub mod keys;
pub mod memory;

pub use debounce::DebouncedWriter;
pub use file::FileStorage;
pub use memory::{process_storage, InMemoryStorage};

use anyhow::Result;

/// Key/value backend for persisted settings
///
/// Implementations tolerate concurrent mutation by other processes only to
/// the extent of "last reader wins"; no cross-process locking is performed.
pub trait SettingsStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    fn remove_item(&self, key: &str) -> Result<()>;

    fn keys(&self) -> Result<Vec<String>>;
}
