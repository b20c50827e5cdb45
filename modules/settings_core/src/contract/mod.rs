//! Contract layer - public API for UI collaborators and adapters
//!
//! Transport-agnostic models, the grid state shapes that double as storage
//! format, errors and the native client trait.

pub mod client;
pub mod error;
pub mod grid;
pub mod model;

pub use client::SettingsApi;
pub use error::SettingsError;
pub use grid::{
    Density, FilterItem, FilterModel, GridChange, GridField, GridState, PaginationModel,
    PinnedColumns, SortDirection, SortItem, ViewMode,
};
pub use model::{
    BulkScope, ChangeEvent, ChangeListener, DiffEntry, ImportOptions, ListenerId,
    PermissionAction, PermissionChecker, PageType, Scope, SetOptions, ThemeMode, ValidationRule,
    WriteOptions,
};
