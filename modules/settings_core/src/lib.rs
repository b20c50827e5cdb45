//! Settings Core
//!
//! Hierarchical settings for the Techno ETL console: a per-user profile,
//! per-page overrides that inherit from it, and per-grid state, with
//! validation, permission gates, change notification and debounced
//! persistence.

// Public exports
pub mod contract;
pub use contract::{
    client::SettingsApi, error::SettingsError, BulkScope, ChangeEvent, GridState,
    ImportOptions, PermissionAction, Scope, SetOptions, WriteOptions,
};

pub mod config;
pub use config::Config;

pub mod domain;
pub use domain::{
    GridStateManager, HostSurface, ObservableSettings, PageSettings, SettingsManager,
    UserSettings,
};

pub mod infra;
pub use infra::storage::{FileStorage, InMemoryStorage, SettingsStorage};

pub mod api;
pub use api::native::NativeClient;

use std::sync::Arc;

/// Storage backend selected by `config`: a `FileStorage` under
/// `storage_dir` when set, otherwise the process-wide in-memory namespace
pub fn open_storage(config: &Config) -> anyhow::Result<Arc<dyn SettingsStorage>> {
    let storage: Arc<dyn SettingsStorage> = match &config.storage_dir {
        Some(dir) => Arc::new(FileStorage::open(dir)?),
        None => infra::storage::process_storage(),
    };
    Ok(storage)
}
