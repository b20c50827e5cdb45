//! Contract models for the settings core
//!
//! These models are transport-agnostic and shared by the domain layer, the
//! native client and UI collaborators.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Action guarded by a permission gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionAction {
    Read,
    Write,
}

impl fmt::Display for PermissionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Routing policy used by the manager to pick the instance owning a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// Classify by path prefix
    #[default]
    Auto,
    /// Global per-user profile
    User,
    /// Per-page overrides
    Page,
}

/// Scope selector for bulk reset/export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkScope {
    User,
    Page,
    All,
}

impl BulkScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Page => "page",
            Self::All => "all",
        }
    }
}

/// Options for a single or batch write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    /// Run the registered validator for the path
    pub validate: bool,
    /// Consult the permission gate for the path
    pub check_permissions: bool,
    /// Dispatch change events after the write
    pub notify: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            validate: true,
            check_permissions: true,
            notify: true,
        }
    }
}

impl SetOptions {
    /// Validate and check permissions but dispatch no events
    pub fn silent() -> Self {
        Self {
            notify: false,
            ..Self::default()
        }
    }

    pub fn without_validation() -> Self {
        Self {
            validate: false,
            ..Self::default()
        }
    }
}

/// Options of a routed write on the manager
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Target page; the current page when `None`
    pub page_id: Option<String>,
    pub scope: Scope,
    pub options: SetOptions,
}

impl WriteOptions {
    pub fn user() -> Self {
        Self {
            scope: Scope::User,
            ..Self::default()
        }
    }

    pub fn page(page_id: impl Into<String>) -> Self {
        Self {
            page_id: Some(page_id.into()),
            scope: Scope::Page,
            ..Self::default()
        }
    }
}

/// Options of a bulk import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    /// Merge into the current trees instead of replacing them
    pub merge: bool,
    pub validate: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            merge: true,
            validate: true,
        }
    }
}

/// A change observed by a listener
///
/// Path listeners receive the leaf values. Wildcard (`*`) listeners receive the
/// full tree in `new_value` and `{path: old}` in `old_value`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub path: String,
    pub new_value: Value,
    pub old_value: Value,
    /// Raised by a page because the user value it inherits changed
    pub inherited: bool,
}

/// Callback registered on a settings instance
pub type ChangeListener = Arc<dyn Fn(&ChangeEvent) -> anyhow::Result<()> + Send + Sync>;

/// Validator associated with a path: `(value, full_tree) -> bool`
pub type ValidationRule = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// Injected permission predicate consulted by the manager
pub type PermissionChecker = Arc<dyn Fn(&str, PermissionAction) -> bool + Send + Sync>;

/// Handle returned by `add_listener`, used to remove the listener again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// One differing leaf reported by `diff`
#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    pub current: Option<Value>,
    pub other: Option<Value>,
}

/// Page family selecting the page default tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageType {
    Dashboard,
    Products,
    Orders,
    Customers,
    Reports,
    Settings,
    Common,
}

impl PageType {
    /// Classify a page identifier such as `products` or `orderDetails`
    pub fn from_page_id(page_id: &str) -> Self {
        let id = page_id.to_ascii_lowercase();
        if id.contains("dashboard") {
            Self::Dashboard
        } else if id.contains("product") {
            Self::Products
        } else if id.contains("order") {
            Self::Orders
        } else if id.contains("customer") {
            Self::Customers
        } else if id.contains("report") {
            Self::Reports
        } else if id.contains("setting") {
            Self::Settings
        } else {
            Self::Common
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dashboard => "dashboard",
            Self::Products => "products",
            Self::Orders => "orders",
            Self::Customers => "customers",
            Self::Reports => "reports",
            Self::Settings => "settings",
            Self::Common => "common",
        }
    }
}

/// Resolved theme mode after honoring `system`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThemeMode {
    Light,
    Dark,
}

impl ThemeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }
}
