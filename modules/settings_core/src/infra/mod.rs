//! Infrastructure layer - persistence backends and remote sync

pub mod remote;
pub mod storage;

pub use remote::{NoOpRemoteSync, RemoteSettingsSync};
pub use storage::{DebouncedWriter, FileStorage, InMemoryStorage, SettingsStorage};
