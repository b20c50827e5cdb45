//! Observable settings tree
//!
//! `SettingsStore` is the shared building block behind user and page settings:
//! a nested JSON tree with dot-path access, per-path validators, permission
//! gates, change listeners, JSON round-trip, clone, merge and diff.
//!
//! Locks are never held while listeners run, so a listener calling `get`
//! observes the committed tree.

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use super::path::{self, WILDCARD};
use crate::contract::{
    ChangeEvent, ChangeListener, DiffEntry, ListenerId, PermissionAction, SetOptions,
    SettingsError, ValidationRule,
};

/// A committed write waiting to be dispatched: `(path, new, old)`
type Change = (String, Value, Value);

#[derive(Clone, Default)]
struct StoreState {
    tree: Value,
    rules: HashMap<String, ValidationRule>,
    permissions: HashMap<String, HashMap<PermissionAction, bool>>,
}

pub struct SettingsStore {
    name: String,
    defaults: Value,
    state: RwLock<StoreState>,
    listeners: Mutex<Vec<(String, ListenerId, ChangeListener)>>,
    next_listener_id: AtomicU64,
}

impl std::fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsStore")
            .field("name", &self.name)
            .field("tree", &self.state.read().tree)
            .finish_non_exhaustive()
    }
}

impl SettingsStore {
    /// Create a store whose tree starts as a copy of `defaults`
    pub fn new(name: impl Into<String>, defaults: Value) -> Self {
        let state = StoreState {
            tree: defaults.clone(),
            ..StoreState::default()
        };
        Self {
            name: name.into(),
            defaults,
            state: RwLock::new(state),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fresh copy of the default tree
    pub fn defaults(&self) -> Value {
        self.defaults.clone()
    }

    /// Fresh copy of the current tree
    pub fn snapshot(&self) -> Value {
        self.state.read().tree.clone()
    }

    /// Value at `path`, or `default` when any segment is missing
    pub fn get(&self, path: &str, default: Value) -> Value {
        self.get_opt(path).unwrap_or(default)
    }

    pub fn get_opt(&self, path: &str) -> Option<Value> {
        path::get_at(&self.state.read().tree, path).cloned()
    }

    /// Like `get`, but enforces the `read` permission gate
    pub fn get_checked(&self, path: &str) -> Result<Value, SettingsError> {
        if !self.has_permission(path, PermissionAction::Read) {
            return Err(SettingsError::Permission {
                path: path.to_string(),
                action: PermissionAction::Read,
            });
        }
        Ok(self.get(path, Value::Null))
    }

    // ===== Validation & permissions =====

    /// Associate a validator with `path`, replacing any previous one.
    /// Segments may be `*` to match any single key.
    pub fn add_validation_rule(&self, path: &str, rule: ValidationRule) {
        self.state.write().rules.insert(path.to_string(), rule);
    }

    pub fn remove_validation_rule(&self, path: &str) -> bool {
        self.state.write().rules.remove(path).is_some()
    }

    /// Record a gate for `action` on `path`. A denial also covers descendants.
    pub fn set_permission(&self, path: &str, action: PermissionAction, allowed: bool) {
        self.state
            .write()
            .permissions
            .entry(path.to_string())
            .or_default()
            .insert(action, allowed);
    }

    pub fn has_permission(&self, path: &str, action: PermissionAction) -> bool {
        permitted(&self.state.read(), path, action)
    }

    /// Run validators and permission gates for a prospective write
    pub fn check(&self, path: &str, value: &Value, options: SetOptions) -> Result<(), SettingsError> {
        check_write(&self.state.read(), path, value, options)
    }

    // ===== Writes =====

    pub fn set(&self, path: &str, value: Value, options: SetOptions) -> Result<(), SettingsError> {
        let change = {
            let mut state = self.state.write();
            check_write(&state, path, &value, options)?;
            let old = path::set_at(&mut state.tree, path, value.clone());
            (path.to_string(), value, old)
        };
        tracing::trace!(store = %self.name, path = %change.0, "setting written");

        if options.notify {
            self.dispatch(vec![change], false);
        }
        Ok(())
    }

    /// Batch write. Every check runs before any write; on failure nothing changes.
    pub fn update(
        &self,
        changes: &IndexMap<String, Value>,
        options: SetOptions,
    ) -> Result<(), SettingsError> {
        let committed = {
            let mut state = self.state.write();
            for (path, value) in changes {
                check_write(&state, path, value, options)?;
            }
            changes
                .iter()
                .map(|(path, value)| {
                    let old = path::set_at(&mut state.tree, path, value.clone());
                    (path.clone(), value.clone(), old)
                })
                .collect::<Vec<_>>()
        };

        if options.notify {
            self.dispatch(committed, false);
        }
        Ok(())
    }

    /// Restore defaults for `paths`, or the whole tree when `paths` is empty
    pub fn reset(&self, paths: &[&str]) {
        let changes = {
            let mut state = self.state.write();
            if paths.is_empty() {
                let old_tree = std::mem::replace(&mut state.tree, self.defaults.clone());
                path::diff(&old_tree, &self.defaults)
                    .into_iter()
                    .map(|(p, entry)| {
                        (
                            p,
                            entry.other.unwrap_or(Value::Null),
                            entry.current.unwrap_or(Value::Null),
                        )
                    })
                    .collect::<Vec<_>>()
            } else {
                paths
                    .iter()
                    .map(|p| {
                        let default = path::get_at(&self.defaults, p).cloned();
                        let old = match &default {
                            Some(value) => path::set_at(&mut state.tree, p, value.clone()),
                            None => path::remove_at(&mut state.tree, p).unwrap_or(Value::Null),
                        };
                        (p.to_string(), default.unwrap_or(Value::Null), old)
                    })
                    .collect::<Vec<_>>()
            }
        };
        tracing::debug!(store = %self.name, changed = changes.len(), "settings reset");
        self.dispatch(changes, false);
    }

    /// Merge `other` into the tree and dispatch an event per changed leaf
    pub fn merge(&self, other: &Value, overwrite: bool) {
        let changes = {
            let mut state = self.state.write();
            let before = state.tree.clone();
            path::merge_into(&mut state.tree, other, overwrite);
            changes_between(&before, &state.tree)
        };
        self.dispatch(changes, false);
    }

    /// Replace the whole tree without running validators, dispatching a
    /// single wildcard event
    pub fn replace_tree(&self, tree: Value) {
        let old = {
            let mut state = self.state.write();
            std::mem::replace(&mut state.tree, tree)
        };
        self.dispatch_wildcard_only(old);
    }

    // ===== Serialization =====

    pub fn to_json(&self) -> String {
        self.state.read().tree.to_string()
    }

    /// Replace the tree with `merge(defaults, parsed)`
    pub fn from_json(&self, serialized: &str) -> Result<(), SettingsError> {
        let parsed: Value = serde_json::from_str(serialized)?;
        if !parsed.is_object() {
            return Err(SettingsError::serialization("settings payload must be a JSON object"));
        }
        self.replace_tree(path::merged_with_defaults(&self.defaults, &parsed));
        Ok(())
    }

    /// Deep copy of tree, validators and permissions. Listeners are not copied.
    pub fn clone_store(&self) -> SettingsStore {
        let state = self.state.read().clone();
        SettingsStore {
            name: self.name.clone(),
            defaults: self.defaults.clone(),
            state: RwLock::new(state),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    pub fn diff(&self, other: &Value) -> BTreeMap<String, DiffEntry> {
        path::diff(&self.state.read().tree, other)
    }

    // ===== Listeners =====

    pub fn add_listener(&self, path: &str, listener: ChangeListener) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((path.to_string(), id, listener));
        id
    }

    pub fn remove_listener(&self, path: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(p, lid, _)| !(p == path && *lid == id));
        listeners.len() != before
    }

    pub fn clear_listeners(&self) {
        self.listeners.lock().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Deliver committed changes: path listeners first, then wildcard listeners
    pub(crate) fn dispatch(&self, changes: Vec<Change>, inherited: bool) {
        if changes.is_empty() {
            return;
        }
        let listeners = self.listeners.lock().clone();
        if listeners.is_empty() {
            return;
        }

        for (changed_path, new_value, old_value) in changes {
            for (listen_path, _, listener) in &listeners {
                if listen_path == WILDCARD {
                    continue;
                }
                if let Some(event) =
                    path_event(listen_path, &changed_path, &new_value, &old_value, inherited)
                {
                    self.invoke(listener, &event);
                }
            }

            let wildcards: Vec<_> = listeners
                .iter()
                .filter(|(p, _, _)| p == WILDCARD)
                .collect();
            if wildcards.is_empty() {
                continue;
            }
            let mut old_map = Map::new();
            old_map.insert(changed_path.clone(), old_value);
            let event = ChangeEvent {
                path: changed_path,
                new_value: self.snapshot(),
                old_value: Value::Object(old_map),
                inherited,
            };
            for (_, _, listener) in wildcards {
                self.invoke(listener, &event);
            }
        }
    }

    fn dispatch_wildcard_only(&self, old_tree: Value) {
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .iter()
            .filter(|(p, _, _)| p == WILDCARD)
            .cloned()
            .collect();
        let mut old_map = Map::new();
        old_map.insert(WILDCARD.to_string(), old_tree);
        let event = ChangeEvent {
            path: WILDCARD.to_string(),
            new_value: self.snapshot(),
            old_value: Value::Object(old_map),
            inherited: false,
        };
        for (_, _, listener) in &listeners {
            self.invoke(listener, &event);
        }
    }

    fn invoke(&self, listener: &ChangeListener, event: &ChangeEvent) {
        if let Err(e) = listener(event) {
            tracing::warn!(
                store = %self.name,
                path = %event.path,
                error = %e,
                "settings listener failed"
            );
        }
    }
}

/// Shared surface of user and page settings
pub trait ObservableSettings {
    fn store(&self) -> &SettingsStore;

    fn defaults(&self) -> Value {
        self.store().defaults()
    }

    fn get(&self, path: &str, default: Value) -> Value {
        self.store().get(path, default)
    }

    fn set(&self, path: &str, value: Value) -> Result<(), SettingsError> {
        self.store().set(path, value, SetOptions::default())
    }

    fn set_with(&self, path: &str, value: Value, options: SetOptions) -> Result<(), SettingsError> {
        self.store().set(path, value, options)
    }

    fn update(&self, changes: &IndexMap<String, Value>) -> Result<(), SettingsError> {
        self.store().update(changes, SetOptions::default())
    }

    fn reset(&self, paths: &[&str]) {
        self.store().reset(paths)
    }

    fn add_listener(&self, path: &str, listener: ChangeListener) -> ListenerId {
        self.store().add_listener(path, listener)
    }

    fn remove_listener(&self, path: &str, id: ListenerId) -> bool {
        self.store().remove_listener(path, id)
    }

    fn to_json(&self) -> String {
        self.store().to_json()
    }

    fn from_json(&self, serialized: &str) -> Result<(), SettingsError> {
        self.store().from_json(serialized)
    }

    fn diff(&self, other: &Value) -> BTreeMap<String, DiffEntry> {
        self.store().diff(other)
    }

    fn snapshot(&self) -> Value {
        self.store().snapshot()
    }
}

impl ObservableSettings for SettingsStore {
    fn store(&self) -> &SettingsStore {
        self
    }
}

fn permitted(state: &StoreState, path: &str, action: PermissionAction) -> bool {
    !state.permissions.iter().any(|(gate_path, actions)| {
        path::is_within(path, gate_path) && actions.get(&action) == Some(&false)
    })
}

fn check_write(
    state: &StoreState,
    path: &str,
    value: &Value,
    options: SetOptions,
) -> Result<(), SettingsError> {
    if options.validate {
        validate(state, path, value)?;
    }
    if options.check_permissions && !permitted(state, path, PermissionAction::Write) {
        return Err(SettingsError::Permission {
            path: path.to_string(),
            action: PermissionAction::Write,
        });
    }
    Ok(())
}

/// Apply every rule at `path`, above it (on the value the ancestor would
/// hold after the write) or, for subtree writes, below it
fn validate(state: &StoreState, path: &str, value: &Value) -> Result<(), SettingsError> {
    for (rule_path, rule) in &state.rules {
        if path::matches_pattern(rule_path, path) {
            if !rule(value, &state.tree) {
                return Err(SettingsError::validation(path, value));
            }
            continue;
        }
        if path::is_within(path, rule_path) {
            let segs = path::segments(path);
            let depth = path::segments(rule_path).len();
            let ancestor = segs[..depth].join(".");
            let mut prospective = path::get_at(&state.tree, &ancestor)
                .cloned()
                .unwrap_or(Value::Null);
            path::set_at(&mut prospective, &segs[depth..].join("."), value.clone());
            if !rule(&prospective, &state.tree) {
                return Err(SettingsError::validation(path, value));
            }
            continue;
        }
        if !value.is_object() || !path::is_within(rule_path, path) {
            continue;
        }
        for (relative, leaf) in path::leaves(value) {
            let full = path::join(path, &relative);
            if path::matches_pattern(rule_path, &full) && !rule(&leaf, &state.tree) {
                return Err(SettingsError::validation(full, &leaf));
            }
        }
    }
    Ok(())
}

/// Event for a listener on `listen_path` caused by a write at `changed_path`.
/// A write to an ancestor notifies descendants whose value actually changed.
fn path_event(
    listen_path: &str,
    changed_path: &str,
    new_value: &Value,
    old_value: &Value,
    inherited: bool,
) -> Option<ChangeEvent> {
    if listen_path == changed_path {
        return Some(ChangeEvent {
            path: changed_path.to_string(),
            new_value: new_value.clone(),
            old_value: old_value.clone(),
            inherited,
        });
    }
    if !path::is_within(listen_path, changed_path) {
        return None;
    }
    let relative = path::segments(listen_path)[path::segments(changed_path).len()..].join(".");
    let new_sub = path::get_at(new_value, &relative).cloned().unwrap_or(Value::Null);
    let old_sub = path::get_at(old_value, &relative).cloned().unwrap_or(Value::Null);
    (new_sub != old_sub).then(|| ChangeEvent {
        path: listen_path.to_string(),
        new_value: new_sub,
        old_value: old_sub,
        inherited,
    })
}

fn changes_between(before: &Value, after: &Value) -> Vec<Change> {
    path::diff(before, after)
        .into_iter()
        .map(|(p, entry)| {
            (
                p,
                entry.other.unwrap_or(Value::Null),
                entry.current.unwrap_or(Value::Null),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> SettingsStore {
        SettingsStore::new(
            "test",
            json!({"preferences": {"theme": "light", "fontSize": "medium"}, "grid": {"pageSize": 25}}),
        )
    }

    fn recorder(store: &SettingsStore, path: &str) -> Arc<Mutex<Vec<ChangeEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store.add_listener(
            path,
            Arc::new(move |event: &ChangeEvent| {
                sink.lock().push(event.clone());
                Ok(())
            }),
        );
        seen
    }

    #[test]
    fn test_set_then_get() {
        let s = store();
        s.set("preferences.theme", json!("dark"), SetOptions::default()).unwrap();
        assert_eq!(s.get("preferences.theme", Value::Null), json!("dark"));
        assert_eq!(s.get("missing.path", json!("fallback")), json!("fallback"));
    }

    #[test]
    fn test_validation_failure_leaves_state_and_listeners_untouched() {
        let s = store();
        s.add_validation_rule(
            "preferences.theme",
            Arc::new(|v: &Value, _: &Value| matches!(v.as_str(), Some("light" | "dark"))),
        );
        let seen = recorder(&s, "preferences.theme");

        let err = s
            .set("preferences.theme", json!("holographic"), SetOptions::default())
            .unwrap_err();
        assert!(matches!(err, SettingsError::Validation { .. }));
        assert_eq!(s.get("preferences.theme", Value::Null), json!("light"));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_subtree_write_runs_nested_rules() {
        let s = store();
        s.add_validation_rule(
            "preferences.fontSize",
            Arc::new(|v: &Value, _: &Value| v.as_str() != Some("gigantic")),
        );
        let err = s
            .set("preferences", json!({"fontSize": "gigantic"}), SetOptions::default())
            .unwrap_err();
        assert_eq!(
            err,
            SettingsError::Validation {
                path: "preferences.fontSize".to_string(),
                value: json!("gigantic"),
            }
        );
    }

    #[test]
    fn test_write_below_validated_leaf_runs_its_rule() {
        let s = store();
        s.add_validation_rule(
            "preferences.theme",
            Arc::new(|v: &Value, _: &Value| matches!(v.as_str(), Some("light" | "dark"))),
        );
        s.add_validation_rule("grid.*", Arc::new(|v: &Value, _: &Value| v.is_number()));

        let err = s
            .set("preferences.theme.x", json!("holographic"), SetOptions::default())
            .unwrap_err();
        assert_eq!(
            err,
            SettingsError::Validation {
                path: "preferences.theme.x".to_string(),
                value: json!("holographic"),
            }
        );
        assert!(s.set("grid.pageSize.n", json!(50), SetOptions::default()).is_err());
        assert_eq!(s.get("preferences.theme", Value::Null), json!("light"));
        assert_eq!(s.get("grid.pageSize", Value::Null), json!(25));
    }

    #[test]
    fn test_batch_update_is_atomic() {
        let s = store();
        s.add_validation_rule(
            "preferences.fontSize",
            Arc::new(|v: &Value, _: &Value| v.as_str() == Some("medium") || v.as_str() == Some("large")),
        );
        let seen = recorder(&s, WILDCARD);

        let mut batch = IndexMap::new();
        batch.insert("preferences.theme".to_string(), json!("dark"));
        batch.insert("preferences.fontSize".to_string(), json!("gigantic"));
        assert!(s.update(&batch, SetOptions::default()).is_err());
        assert_eq!(s.get("preferences.theme", Value::Null), json!("light"));
        assert!(seen.lock().is_empty());

        batch.insert("preferences.fontSize".to_string(), json!("large"));
        s.update(&batch, SetOptions::default()).unwrap();
        let paths: Vec<_> = seen.lock().iter().map(|e| e.path.clone()).collect();
        assert_eq!(paths, vec!["preferences.theme", "preferences.fontSize"]);
    }

    #[test]
    fn test_permission_denial_covers_descendants() {
        let s = store();
        s.set_permission("preferences", PermissionAction::Write, false);
        let err = s
            .set("preferences.theme", json!("dark"), SetOptions::default())
            .unwrap_err();
        assert_eq!(
            err,
            SettingsError::Permission {
                path: "preferences.theme".to_string(),
                action: PermissionAction::Write,
            }
        );
        assert!(s.has_permission("preferences.theme", PermissionAction::Read));
        assert!(s.set("grid.pageSize", json!(50), SetOptions::default()).is_ok());

        s.set_permission("grid", PermissionAction::Read, false);
        assert!(s.get_checked("grid.pageSize").is_err());
    }

    #[test]
    fn test_wildcard_receives_full_tree_and_old_map() {
        let s = store();
        let seen = recorder(&s, WILDCARD);
        s.set("grid.pageSize", json!(50), SetOptions::default()).unwrap();

        let events = seen.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].path, "grid.pageSize");
        assert_eq!(events[0].new_value["grid"]["pageSize"], json!(50));
        assert_eq!(events[0].old_value, json!({"grid.pageSize": 25}));
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let s = store();
        s.add_listener(
            "preferences.theme",
            Arc::new(|_: &ChangeEvent| Err(anyhow::anyhow!("boom"))),
        );
        let seen = recorder(&s, "preferences.theme");
        s.set("preferences.theme", json!("dark"), SetOptions::default()).unwrap();
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_listener_sees_committed_value() {
        let s = Arc::new(store());
        let observed = Arc::new(Mutex::new(Value::Null));
        let (inner, sink) = (s.clone(), observed.clone());
        s.add_listener(
            "preferences.theme",
            Arc::new(move |_: &ChangeEvent| {
                *sink.lock() = inner.get("preferences.theme", Value::Null);
                Ok(())
            }),
        );
        s.set("preferences.theme", json!("dark"), SetOptions::default()).unwrap();
        assert_eq!(*observed.lock(), json!("dark"));
    }

    #[test]
    fn test_remove_listener() {
        let s = store();
        let seen = Arc::new(Mutex::new(0));
        let sink = seen.clone();
        let id = s.add_listener(
            "grid.pageSize",
            Arc::new(move |_: &ChangeEvent| {
                *sink.lock() += 1;
                Ok(())
            }),
        );
        assert!(s.remove_listener("grid.pageSize", id));
        assert!(!s.remove_listener("grid.pageSize", id));
        s.set("grid.pageSize", json!(100), SetOptions::default()).unwrap();
        assert_eq!(*seen.lock(), 0);
    }

    #[test]
    fn test_reset_single_path_and_all() {
        let s = store();
        s.set("preferences.theme", json!("dark"), SetOptions::default()).unwrap();
        s.set("grid.pageSize", json!(100), SetOptions::default()).unwrap();

        s.reset(&["preferences.theme"]);
        assert_eq!(s.get("preferences.theme", Value::Null), json!("light"));
        assert_eq!(s.get("grid.pageSize", Value::Null), json!(100));

        let seen = recorder(&s, "grid.pageSize");
        s.reset(&[]);
        assert_eq!(s.snapshot(), s.defaults());
        assert_eq!(seen.lock()[0].new_value, json!(25));
    }

    #[test]
    fn test_json_round_trip() {
        let s = store();
        s.set("extra.list", json!([1, 2, 3]), SetOptions::default()).unwrap();
        let serialized = s.to_json();

        let other = store();
        let seen = recorder(&other, WILDCARD);
        other.from_json(&serialized).unwrap();
        assert_eq!(other.snapshot(), s.snapshot());
        assert_eq!(seen.lock().len(), 1);

        assert!(other.from_json("[1, 2]").is_err());
        assert!(other.from_json("{broken").is_err());
        assert_eq!(other.snapshot(), s.snapshot());
    }

    #[test]
    fn test_clone_is_independent() {
        let s = store();
        let copy = s.clone_store();
        copy.set("preferences.theme", json!("dark"), SetOptions::default()).unwrap();
        assert_eq!(s.get("preferences.theme", Value::Null), json!("light"));
    }

    #[test]
    fn test_merge_and_diff() {
        let s = store();
        s.merge(&json!({"preferences": {"theme": "dark", "language": "fr"}}), false);
        assert_eq!(s.get("preferences.theme", Value::Null), json!("light"));
        assert_eq!(s.get("preferences.language", Value::Null), json!("fr"));

        s.merge(&json!({"preferences": {"theme": "dark"}}), true);
        assert_eq!(s.get("preferences.theme", Value::Null), json!("dark"));

        assert!(s.diff(&s.snapshot()).is_empty());
        let d = s.diff(&s.defaults());
        assert_eq!(d.len(), 2);
        assert_eq!(d["preferences.theme"].current, Some(json!("dark")));
    }

    #[test]
    fn test_parent_write_notifies_changed_children_only() {
        let s = store();
        let theme = recorder(&s, "preferences.theme");
        let font = recorder(&s, "preferences.fontSize");
        s.set(
            "preferences",
            json!({"theme": "dark", "fontSize": "medium"}),
            SetOptions::default(),
        )
        .unwrap();
        assert_eq!(theme.lock().len(), 1);
        assert!(font.lock().is_empty());
    }
}
