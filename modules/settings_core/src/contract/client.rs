//! Native client trait for UI collaborators
//!
//! A thin read/write/subscribe surface over the settings manager. Callbacks
//! receive plain `ChangeEvent` data, never references into internal state.

use serde_json::Value;

use super::error::SettingsError;
use super::model::{ChangeListener, ListenerId, WriteOptions};

/// Settings API consumed by UI collaborators
pub trait SettingsApi: Send + Sync {
    /// Effective value at `path`, resolved against `page_id` or the current page
    fn get(&self, path: &str, page_id: Option<&str>) -> Result<Value, SettingsError>;

    /// Routed write
    fn set(&self, path: &str, value: Value, options: WriteOptions) -> Result<(), SettingsError>;

    /// Observe `event`: a dot-path, `pageChanged`, or `*` for everything.
    /// `pageChanged` is delivered as a `ChangeEvent` whose path is
    /// `pageChanged` and whose `new_value` is the page id (or `null`).
    fn subscribe(&self, event: &str, listener: ChangeListener) -> ListenerId;

    fn unsubscribe(&self, event: &str, id: ListenerId) -> bool;

    fn current_page(&self) -> Option<String>;

    fn set_current_page(&self, page_id: Option<&str>) -> Result<(), SettingsError>;
}
