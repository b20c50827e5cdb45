//! Domain layer - settings trees, inheritance, grid state and the manager

pub mod defaults;
pub mod events;
pub mod grid;
pub mod manager;
pub mod migration;
pub mod page;
pub mod path;
pub mod store;
pub mod user;
pub mod validation;

pub use events::{HostEvent, HostSurface, ManagerEvent, NoOpHostSurface, RecordingHostSurface};
pub use grid::{GridChangeCallback, GridStateManager};
pub use manager::SettingsManager;
pub use page::PageSettings;
pub use store::{ObservableSettings, SettingsStore};
pub use user::UserSettings;
