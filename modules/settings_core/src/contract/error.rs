//! Contract error types for the settings core
//!
//! Validation and permission errors are surfaced synchronously to the caller
//! of a write. Persistence and migration errors are normally only logged; the
//! variants exist so that adapters and tests can name them.

use super::model::PermissionAction;

/// Settings core errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    /// A registered validator rejected the value written at `path`
    #[error("Validation failed for '{path}': {value}")]
    Validation {
        /// Dot-path that was written
        path: String,
        /// Rejected value
        value: serde_json::Value,
    },

    /// The permission gate denied `action` on `path`
    #[error("Permission denied: {action} on '{path}'")]
    Permission {
        /// Dot-path that was accessed
        path: String,
        /// Denied action
        action: PermissionAction,
    },

    /// A serialized payload could not be parsed or has the wrong shape
    #[error("Serialization error: {reason}")]
    Serialization {
        /// Parser or schema message
        reason: String,
    },

    /// Writing to the persistence namespace failed
    #[error("Persistence failed for key '{key}': {cause}")]
    Persistence {
        /// Storage key
        key: String,
        /// Backend error message
        cause: String,
    },

    /// A legacy persisted key could not be migrated
    #[error("Migration of legacy key '{legacy_key}' failed: {cause}")]
    Migration {
        /// Legacy storage key
        legacy_key: String,
        /// Parse or merge error message
        cause: String,
    },

    /// A grid state setter received a value violating a grid invariant
    #[error("Invalid grid state for '{field}': {reason}")]
    InvalidGridState {
        /// Grid field name
        field: String,
        /// Violated invariant
        reason: String,
    },

    /// The manager was used before `initialize`
    #[error("Settings manager is not initialized")]
    NotInitialized,
}

impl SettingsError {
    pub fn validation(path: impl Into<String>, value: &serde_json::Value) -> Self {
        Self::Validation {
            path: path.into(),
            value: value.clone(),
        }
    }

    pub fn serialization(reason: impl std::fmt::Display) -> Self {
        Self::Serialization {
            reason: reason.to_string(),
        }
    }

    pub fn invalid_grid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidGridState {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_messages() {
        let err = SettingsError::validation("preferences.theme", &json!("holographic"));
        assert_eq!(
            err.to_string(),
            "Validation failed for 'preferences.theme': \"holographic\""
        );

        let err = SettingsError::Permission {
            path: "apiSettings.magento".to_string(),
            action: PermissionAction::Write,
        };
        assert_eq!(err.to_string(), "Permission denied: write on 'apiSettings.magento'");
    }

    #[test]
    fn test_from_serde_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: SettingsError = parse_err.into();
        assert!(matches!(err, SettingsError::Serialization { .. }));
    }
}
