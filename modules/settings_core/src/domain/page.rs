//! Per-page settings overrides inheriting from the user profile
//!
//! A `null` leaf means "inherit". For the paths listed in `INHERITANCE_MAP`
//! the effective value is then read from the user instance, and user changes
//! are re-dispatched as page-level events while the page still inherits.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use super::defaults;
use super::path::{self, WILDCARD};
use super::store::{ObservableSettings, SettingsStore};
use super::user::UserSettings;
use super::validation;
use crate::contract::{ChangeEvent, ListenerId, PageType, SettingsError};

/// `(page path, user path)` pairs
pub const INHERITANCE_MAP: [(&str, &str); 4] = [
    ("display.theme", "preferences.theme"),
    ("display.animations", "preferences.animations"),
    ("grid.density", "preferences.density"),
    ("grid.pageSize", "gridSettings.defaultPageSize"),
];

/// User path inherited by `page_path`, if any
pub fn inherited_from(page_path: &str) -> Option<&'static str> {
    INHERITANCE_MAP
        .iter()
        .find(|(local, _)| *local == page_path)
        .map(|(_, user_path)| *user_path)
}

pub struct PageSettings {
    page_id: String,
    page_type: PageType,
    store: SettingsStore,
    /// Lookup only; a page never writes user-level state
    user: Weak<UserSettings>,
    user_listener: Mutex<Option<ListenerId>>,
}

impl PageSettings {
    pub fn new(page_id: &str, user: &Arc<UserSettings>) -> Arc<Self> {
        let page_type = PageType::from_page_id(page_id);
        let store = SettingsStore::new(format!("page:{}", page_id), defaults::page_defaults(page_type));

        let user_defaults = user.defaults();
        for (local, user_path) in INHERITANCE_MAP {
            let reference = path::get_at(&user_defaults, user_path)
                .cloned()
                .unwrap_or(Value::Null);
            store.add_validation_rule(
                local,
                Arc::new(move |value: &Value, _tree: &Value| {
                    validation::is_null_or_same_type(value, &reference)
                }),
            );
        }

        let page = Arc::new(Self {
            page_id: page_id.to_string(),
            page_type,
            store,
            user: Arc::downgrade(user),
            user_listener: Mutex::new(None),
        });

        let weak_page = Arc::downgrade(&page);
        let id = user.add_listener(
            WILDCARD,
            Arc::new(move |event: &ChangeEvent| {
                if let Some(page) = weak_page.upgrade() {
                    page.on_user_change(event);
                }
                Ok(())
            }),
        );
        *page.user_listener.lock() = Some(id);

        tracing::debug!(page_id, page_type = page_type.as_str(), "page settings created");
        page
    }

    pub fn page_id(&self) -> &str {
        &self.page_id
    }

    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    /// Page-local value when non-null; else the inherited user value; else `default`
    pub fn get_effective(&self, path: &str, default: Value) -> Value {
        self.get_effective_opt(path).unwrap_or(default)
    }

    pub fn get_effective_opt(&self, path: &str) -> Option<Value> {
        match self.store.get_opt(path) {
            Some(value) if !value.is_null() => Some(value),
            _ => {
                let user_path = inherited_from(path)?;
                self.user.upgrade()?.store().get_opt(user_path)
            }
        }
    }

    /// Write a concrete value, breaking inheritance
    pub fn override_value(&self, path: &str, value: Value) -> Result<(), SettingsError> {
        self.set(path, value)
    }

    /// Write `null`, restoring inheritance
    pub fn inherit(&self, path: &str) -> Result<(), SettingsError> {
        self.set(path, Value::Null)
    }

    /// Every leaf path currently set to `null`
    pub fn inherited_settings(&self) -> Vec<String> {
        path::leaves(&self.store.snapshot())
            .into_iter()
            .filter(|(_, value)| value.is_null())
            .map(|(p, _)| p)
            .collect()
    }

    /// Every leaf whose value differs from the page default
    pub fn overridden_settings(&self) -> BTreeMap<String, Value> {
        self.store
            .diff(&self.store.defaults())
            .into_iter()
            .filter_map(|(p, entry)| entry.current.map(|value| (p, value)))
            .collect()
    }

    /// Stop observing the user instance
    pub fn detach(&self) {
        let Some(id) = self.user_listener.lock().take() else {
            return;
        };
        if let Some(user) = self.user.upgrade() {
            user.remove_listener(WILDCARD, id);
        }
    }

    fn on_user_change(&self, event: &ChangeEvent) {
        let mut changes = Vec::new();
        for (local, user_path) in INHERITANCE_MAP {
            if !self.store.get_opt(local).map_or(true, |v| v.is_null()) {
                continue;
            }
            let Some(old) = old_user_value(event, user_path) else {
                continue;
            };
            let new = path::get_at(&event.new_value, user_path)
                .cloned()
                .unwrap_or(Value::Null);
            if new != old {
                changes.push((local.to_string(), new, old));
            }
        }
        if !changes.is_empty() {
            tracing::trace!(page_id = %self.page_id, count = changes.len(), "propagating inherited changes");
            self.store.dispatch(changes, true);
        }
    }
}

/// Previous value of `user_path` carried by a user wildcard event, or `None`
/// when the event did not touch it
fn old_user_value(event: &ChangeEvent, user_path: &str) -> Option<Value> {
    let (root, old_root) = if event.path == WILDCARD {
        ("", event.old_value.get(WILDCARD)?)
    } else if path::is_within(user_path, &event.path) {
        (event.path.as_str(), event.old_value.get(&event.path)?)
    } else {
        return None;
    };
    let relative = path::segments(user_path)[path::segments(root).len()..].join(".");
    Some(
        path::get_at(old_root, &relative)
            .cloned()
            .unwrap_or(Value::Null),
    )
}

impl ObservableSettings for PageSettings {
    fn store(&self) -> &SettingsStore {
        &self.store
    }
}

impl Drop for PageSettings {
    fn drop(&mut self) {
        self.detach();
    }
}
