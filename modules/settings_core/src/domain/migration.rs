//! Loading of persisted user trees and migration of legacy keys
//!
//! Every source is turned into a partial user tree and applied leaf by leaf
//! through the user validators. Application order decides conflicts:
//! 1. legacy keys without a `lastModified` stamp, in `LEGACY_KEYS` order
//! 2. the per-user tree when unstamped, or the unified tree when the user
//!    has none
//! 3. every stamped source, oldest first
//!
//! Legacy keys are deleted once parsed; unparseable ones are kept.

use serde_json::{Map, Value};

use super::path;
use super::store::ObservableSettings;
use super::user::UserSettings;
use crate::contract::{SetOptions, SettingsError};
use crate::infra::storage::{keys, SettingsStorage};

/// Top-level sections of the user tree
const SECTIONS: [&str; 6] = [
    "personalInfo",
    "preferences",
    "apiSettings",
    "gridSettings",
    "dashboardSettings",
    "securitySettings",
];

/// Flat keys of old `userSettings` blobs and the preference they map to
const FLAT_PREFERENCES: [(&str, &str); 8] = [
    ("language", "language"),
    ("theme", "theme"),
    ("themeMode", "theme"),
    ("fontSize", "fontSize"),
    ("density", "density"),
    ("animations", "animations"),
    ("highContrast", "highContrast"),
    ("colorPreset", "colorPreset"),
];

/// Outcome of one migration pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Legacy keys merged and deleted
    pub migrated: Vec<String>,
    /// Legacy keys left in place because they could not be parsed
    pub failed: Vec<String>,
    /// Leaves written into the user tree
    pub applied: usize,
    /// Leaves refused by a validator
    pub rejected: usize,
}

#[derive(Debug)]
struct Source {
    key: String,
    patch: Value,
    last_modified: Option<i64>,
    legacy: bool,
}

impl Source {
    fn rank(&self) -> (u8, i64) {
        match (self.last_modified, self.legacy) {
            (None, true) => (0, 0),
            (None, false) => (1, 0),
            (Some(ts), _) => (2, ts),
        }
    }
}

/// Merge persisted and legacy state for `user_id` into `user`
pub fn migrate(storage: &dyn SettingsStorage, user: &UserSettings, user_id: &str) -> MigrationReport {
    let mut report = MigrationReport::default();
    let mut sources = Vec::new();

    for legacy_key in keys::LEGACY_KEYS {
        let raw = match storage.get_item(legacy_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(legacy_key, error = %e, "failed to read legacy key");
                continue;
            }
        };
        match parse_legacy(legacy_key, &raw) {
            Ok(source) => sources.push(source),
            Err(cause) => {
                let err = SettingsError::Migration {
                    legacy_key: legacy_key.to_string(),
                    cause,
                };
                tracing::warn!(error = %err, "legacy key left in place");
                report.failed.push(legacy_key.to_string());
            }
        }
    }

    // The unified key mirrors whoever saved last, so it only seeds users
    // without a tree of their own.
    let user_key = keys::user_settings(user_id);
    let user_tree = storage.get_item(&user_key);
    let seed_from_unified = matches!(user_tree, Ok(None));
    if let Some(mut source) = persisted_source(&user_key, user_tree) {
        if source.last_modified.is_none() {
            source.last_modified = read_timestamp(storage, &keys::user_last_modified(user_id));
        }
        sources.push(source);
    }
    if seed_from_unified {
        let unified = storage.get_item(keys::UNIFIED_SETTINGS);
        if let Some(source) = persisted_source(keys::UNIFIED_SETTINGS, unified) {
            sources.push(source);
        }
    }

    sources.sort_by_key(Source::rank);

    let defaults = user.defaults();
    for source in &sources {
        for (leaf, value) in path::leaves(&source.patch) {
            let section = path::segments(&leaf).first().copied().unwrap_or_default();
            if path::get_at(&defaults, section).is_none() {
                continue;
            }
            match user.store().set(&leaf, value, SetOptions::silent()) {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    tracing::warn!(source = %source.key, path = %leaf, error = %e, "migrated value rejected");
                    report.rejected += 1;
                }
            }
        }
    }

    for source in sources.iter().filter(|s| s.legacy) {
        if let Err(e) = storage.remove_item(&source.key) {
            tracing::warn!(legacy_key = %source.key, error = %e, "failed to delete migrated legacy key");
            continue;
        }
        report.migrated.push(source.key.clone());
    }

    if !report.migrated.is_empty() || !report.failed.is_empty() {
        tracing::debug!(
            user_id,
            migrated = ?report.migrated,
            failed = ?report.failed,
            applied = report.applied,
            rejected = report.rejected,
            "legacy settings migrated"
        );
    }
    report
}

fn parse_legacy(legacy_key: &str, raw: &str) -> Result<Source, String> {
    let patch_for = |preference: &str, value: Value| {
        let mut patch = Value::Object(Map::new());
        path::set_at(&mut patch, &path::join("preferences", preference), value);
        patch
    };

    let (patch, last_modified) = match legacy_key {
        "language" => (patch_for("language", scalar(raw)?), None),
        "themeMode" => (patch_for("theme", scalar(raw)?), None),
        "fontSize" => (patch_for("fontSize", scalar(raw)?), None),
        "dashboardSettings" => {
            let mut object = object(raw)?;
            let stamp = take_timestamp(&mut object);
            let mut patch = Map::new();
            patch.insert("dashboardSettings".to_string(), Value::Object(object));
            (Value::Object(patch), stamp)
        }
        _ => {
            let mut object = object(raw)?;
            let stamp = take_timestamp(&mut object);
            (map_profile(object), stamp)
        }
    };

    Ok(Source {
        key: legacy_key.to_string(),
        patch,
        last_modified,
        legacy: true,
    })
}

fn persisted_source(key: &str, read: anyhow::Result<Option<String>>) -> Option<Source> {
    match read {
        Ok(Some(raw)) => match parse_tree(&raw) {
            Ok(mut source) => {
                source.key = key.to_string();
                Some(source)
            }
            Err(cause) => {
                tracing::warn!(key, cause = %cause, "ignoring unreadable persisted settings");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(key, error = %e, "failed to read persisted settings");
            None
        }
    }
}

fn parse_tree(raw: &str) -> Result<Source, String> {
    let mut object = object(raw)?;
    let last_modified = take_timestamp(&mut object);
    object.remove("version");
    Ok(Source {
        key: String::new(),
        patch: Value::Object(object),
        last_modified,
        legacy: false,
    })
}

/// Raw text, or a JSON-encoded string
fn scalar(raw: &str) -> Result<Value, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::String(s)) => Ok(Value::String(s)),
        Ok(other) => Err(format!("expected a string, found {}", other)),
        Err(_) => Ok(Value::String(raw.trim().to_string())),
    }
}

fn object(raw: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, found {}", other)),
        Err(e) => Err(e.to_string()),
    }
}

fn take_timestamp(object: &mut Map<String, Value>) -> Option<i64> {
    object.remove("lastModified").as_ref().and_then(as_timestamp)
}

fn as_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn read_timestamp(storage: &dyn SettingsStorage, key: &str) -> Option<i64> {
    storage
        .get_item(key)
        .ok()
        .flatten()
        .and_then(|raw| raw.trim().parse().ok())
}

/// Known sections are kept as-is; flat preference keys move under `preferences`
fn map_profile(object: Map<String, Value>) -> Value {
    let mut patch = Value::Object(Map::new());
    for (key, value) in object {
        if SECTIONS.contains(&key.as_str()) {
            path::merge_into(&mut patch, &Value::Object(Map::from_iter([(key, value)])), true);
        } else if let Some((_, preference)) = FLAT_PREFERENCES.iter().find(|(flat, _)| *flat == key) {
            path::set_at(&mut patch, &path::join("preferences", preference), value);
        } else {
            tracing::trace!(key = %key, "unmapped legacy setting dropped");
        }
    }
    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::NoOpHostSurface;
    use crate::infra::storage::InMemoryStorage;
    use serde_json::json;
    use std::sync::Arc;

    fn user() -> Arc<UserSettings> {
        UserSettings::new(Arc::new(NoOpHostSurface))
    }

    #[test]
    fn test_scalar_keys_migrate_and_are_deleted() {
        let storage = InMemoryStorage::new();
        storage.set_item("language", "fr").unwrap();
        storage.set_item("themeMode", "\"dark\"").unwrap();
        storage.set_item("fontSize", "large").unwrap();
        let user = user();

        let report = migrate(&storage, &user, "u1");
        assert_eq!(report.migrated.len(), 3);
        assert_eq!(user.get("preferences.language", Value::Null), json!("fr"));
        assert_eq!(user.get("preferences.theme", Value::Null), json!("dark"));
        assert_eq!(user.get("preferences.fontSize", Value::Null), json!("large"));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_unparseable_key_is_kept() {
        let storage = InMemoryStorage::new();
        storage.set_item("userSettings", "{not json").unwrap();
        storage.set_item("language", "es").unwrap();
        let user = user();

        let report = migrate(&storage, &user, "u1");
        assert_eq!(report.failed, vec!["userSettings".to_string()]);
        assert!(storage.contains("userSettings"));
        assert!(!storage.contains("language"));
        assert_eq!(user.get("preferences.language", Value::Null), json!("es"));
    }

    #[test]
    fn test_most_recent_stamp_wins() {
        let storage = InMemoryStorage::new();
        storage
            .set_item(
                "userSettings",
                &json!({"theme": "light", "lastModified": 2000}).to_string(),
            )
            .unwrap();
        storage
            .set_item(
                "techno-etl-settings",
                &json!({"preferences": {"theme": "dark"}, "lastModified": 1000}).to_string(),
            )
            .unwrap();
        storage.set_item("themeMode", "system").unwrap();
        let user = user();

        migrate(&storage, &user, "u1");
        assert_eq!(user.get("preferences.theme", Value::Null), json!("light"));
    }

    #[test]
    fn test_unified_key_beats_unstamped_legacy() {
        let storage = InMemoryStorage::new();
        storage.set_item("language", "de").unwrap();
        storage
            .set_item(
                keys::UNIFIED_SETTINGS,
                &json!({"preferences": {"language": "ar"}, "version": "2.0.0"}).to_string(),
            )
            .unwrap();
        let user = user();

        let report = migrate(&storage, &user, "u1");
        assert_eq!(user.get("preferences.language", Value::Null), json!("ar"));
        assert!(storage.contains(keys::UNIFIED_SETTINGS));
        assert_eq!(report.migrated, vec!["language".to_string()]);
    }

    #[test]
    fn test_per_user_tree_uses_its_timestamp_key() {
        let storage = InMemoryStorage::new();
        storage
            .set_item(
                "techno-etl-user-u1",
                &json!({"preferences": {"density": "compact"}}).to_string(),
            )
            .unwrap();
        storage.set_item("userSettings_u1_lastModified", "5000").unwrap();
        storage
            .set_item(
                "userSettings",
                &json!({"density": "comfortable", "lastModified": 4000}).to_string(),
            )
            .unwrap();
        let user = user();

        migrate(&storage, &user, "u1");
        assert_eq!(user.get("preferences.density", Value::Null), json!("compact"));
    }

    #[test]
    fn test_unified_key_ignored_when_user_has_own_tree() {
        let storage = InMemoryStorage::new();
        storage
            .set_item(
                "techno-etl-user-u2",
                &json!({"personalInfo": {"firstName": "Bob"}}).to_string(),
            )
            .unwrap();
        storage.set_item("userSettings_u2_lastModified", "1000").unwrap();
        storage
            .set_item(
                keys::UNIFIED_SETTINGS,
                &json!({
                    "personalInfo": {"firstName": "Alice"},
                    "preferences": {"theme": "dark"},
                    "lastModified": 9000
                })
                .to_string(),
            )
            .unwrap();
        let user = user();

        migrate(&storage, &user, "u2");
        assert_eq!(user.get("personalInfo.firstName", Value::Null), json!("Bob"));
        assert_eq!(user.get("preferences.theme", Value::Null), json!("system"));
    }

    #[test]
    fn test_dashboard_and_invalid_leaves() {
        let storage = InMemoryStorage::new();
        storage
            .set_item(
                "dashboardSettings",
                &json!({"defaultView": "sales", "showWelcome": false}).to_string(),
            )
            .unwrap();
        storage
            .set_item(
                "userSettings",
                &json!({"fontSize": "gigantic", "unknownFlag": 1}).to_string(),
            )
            .unwrap();
        let user = user();

        let report = migrate(&storage, &user, "u1");
        assert_eq!(user.get("dashboardSettings.defaultView", Value::Null), json!("sales"));
        assert_eq!(user.get("preferences.fontSize", Value::Null), json!("medium"));
        assert_eq!(report.rejected, 1);
        assert!(user.store().get_opt("unknownFlag").is_none());
        assert!(user.store().get_opt("preferences.unknownFlag").is_none());
    }
}
