//! Settings manager facade
//!
//! Owns the user instance, the page instances and the grid managers of one
//! session, routes reads and writes by scope, persists through debounced
//! writers and multiplexes every instance event onto its own listeners.

use chrono::Utc;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use super::events::{HostEvent, HostSurface, ManagerEvent, ManagerListener, PageChangedEvent};
use super::grid::GridStateManager;
use super::migration;
use super::page::PageSettings;
use super::path::{self, WILDCARD};
use super::store::{ObservableSettings, SettingsStore};
use super::user::{self, UserSettings};
use crate::config::Config;
use crate::contract::{
    BulkScope, ChangeEvent, ImportOptions, ListenerId, PermissionAction, PermissionChecker,
    Scope, SetOptions, SettingsError, WriteOptions,
};
use crate::infra::remote::{NoOpRemoteSync, RemoteSettingsSync};
use crate::infra::storage::{keys, DebouncedWriter, SettingsStorage};

/// Prefixes owned by page instances under `Scope::Auto`
const PAGE_SCOPED: [&str; 7] = [
    "grid.columns",
    "grid.filters",
    "grid.sorting",
    "layout.",
    "filters.defaultFilters",
    "display.showStats",
    "display.showToolbar",
];

/// Prefixes owned by the user instance under `Scope::Auto`
const USER_SCOPED: [&str; 4] = [
    "preferences.",
    "personalInfo.",
    "apiSettings.",
    "securitySettings.",
];

/// Event name of current-page changes
pub const PAGE_CHANGED: &str = "pageChanged";

static EXPORT_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "required": ["version", "scope"],
        "properties": {
            "version": {"type": "string"},
            "exportedAt": {"type": "string"},
            "userId": {"type": ["string", "null"]},
            "scope": {"enum": ["user", "page", "all"]},
            "user": {"type": "object"},
            "pages": {
                "type": "object",
                "additionalProperties": {"type": "object"}
            }
        }
    })
});

/// Classify `path` for `Scope::Auto`
pub fn classify(path: &str) -> Scope {
    if USER_SCOPED.iter().any(|prefix| path.starts_with(prefix)) {
        return Scope::User;
    }
    if PAGE_SCOPED.iter().any(|prefix| path.starts_with(prefix)) {
        Scope::Page
    } else {
        Scope::User
    }
}

/// Millisecond wall clock that never goes backwards within the process
#[derive(Debug, Default)]
struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    fn now_ms(&self) -> i64 {
        let wall = Utc::now().timestamp_millis();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

/// Manager-level listeners, shared with the instance sinks
#[derive(Default)]
struct ListenerRegistry {
    listeners: Mutex<Vec<(String, ListenerId, ManagerListener)>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    fn add(&self, event: &str, listener: ManagerListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.listeners.lock().push((event.to_string(), id, listener));
        id
    }

    fn remove(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(e, lid, _)| !(e == event && *lid == id));
        listeners.len() != before
    }

    fn clear(&self) {
        self.listeners.lock().clear();
    }

    fn emit(&self, event: &ManagerEvent) {
        let listeners = self.listeners.lock().clone();
        for (name, _, listener) in listeners {
            if name != WILDCARD && name != event.name() {
                continue;
            }
            if let Err(e) = listener(event) {
                tracing::warn!(event = event.name(), error = %e, "manager listener failed");
            }
        }
    }
}

/// Writes user and page trees through the settings writer
#[derive(Clone)]
struct PersistenceSink {
    writer: Arc<DebouncedWriter>,
    clock: Arc<MonotonicClock>,
    persist_unified: bool,
    version: String,
}

impl PersistenceSink {
    fn persist_user(&self, user_id: &str, tree: &Value) {
        let now = self.clock.now_ms();
        self.writer.schedule(&keys::user_settings(user_id), tree.to_string());
        self.writer
            .schedule(&keys::user_last_modified(user_id), now.to_string());
        if self.persist_unified {
            let mut unified = tree.clone();
            user::strip_private(&mut unified);
            if let Value::Object(map) = &mut unified {
                map.insert("lastModified".to_string(), json!(now));
                map.insert("version".to_string(), json!(self.version));
            }
            self.writer.schedule(keys::UNIFIED_SETTINGS, unified.to_string());
        }
    }

    fn persist_page(&self, page_id: &str, tree: &Value) {
        let now = self.clock.now_ms();
        self.writer.schedule(&keys::page_settings(page_id), tree.to_string());
        self.writer
            .schedule(&keys::page_last_modified(page_id), now.to_string());
    }
}

/// Narrow a wildcard event down to the leaf it reports
fn leaf_event(event: &ChangeEvent) -> ChangeEvent {
    let old_value = event.old_value.get(&event.path).cloned().unwrap_or(Value::Null);
    let new_value = if event.path == WILDCARD {
        event.new_value.clone()
    } else {
        path::get_at(&event.new_value, &event.path)
            .cloned()
            .unwrap_or(Value::Null)
    };
    ChangeEvent {
        path: event.path.clone(),
        new_value,
        old_value,
        inherited: event.inherited,
    }
}

#[derive(Default)]
struct Session {
    user_id: Option<String>,
    user: Option<Arc<UserSettings>>,
    user_sink: Option<ListenerId>,
    pages: HashMap<String, Arc<PageSettings>>,
    current_page: Option<String>,
}

pub struct SettingsManager {
    storage: Arc<dyn SettingsStorage>,
    host: Arc<dyn HostSurface>,
    config: Config,
    sink: PersistenceSink,
    grid_writer: Arc<DebouncedWriter>,
    permission_checker: Option<PermissionChecker>,
    remote: Arc<dyn RemoteSettingsSync>,
    session: RwLock<Session>,
    grids: RwLock<HashMap<String, Arc<GridStateManager>>>,
    listeners: Arc<ListenerRegistry>,
}

impl SettingsManager {
    pub fn new(storage: Arc<dyn SettingsStorage>, host: Arc<dyn HostSurface>, config: Config) -> Self {
        let settings_writer = DebouncedWriter::new(
            storage.clone(),
            config.settings_debounce,
            config.scratch_key.clone(),
        );
        let grid_writer = DebouncedWriter::new(
            storage.clone(),
            config.grid_debounce,
            config.scratch_key.clone(),
        );
        let sink = PersistenceSink {
            writer: settings_writer,
            clock: Arc::new(MonotonicClock::default()),
            persist_unified: config.persist_unified,
            version: config.settings_version.clone(),
        };
        Self {
            storage,
            host,
            config,
            sink,
            grid_writer,
            permission_checker: None,
            remote: Arc::new(NoOpRemoteSync),
            session: RwLock::new(Session::default()),
            grids: RwLock::new(HashMap::new()),
            listeners: Arc::new(ListenerRegistry::default()),
        }
    }

    pub fn with_permission_checker(mut self, checker: PermissionChecker) -> Self {
        self.permission_checker = Some(checker);
        self
    }

    pub fn with_remote_sync(mut self, remote: Arc<dyn RemoteSettingsSync>) -> Self {
        self.remote = remote;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ===== Lifecycle =====

    /// Create the user instance for `user_id`, migrate legacy keys, project
    /// theme and language once, and start persisting user changes.
    ///
    /// Re-initializing with the same user is a no-op; another user replaces
    /// the current session.
    pub fn initialize(&self, user_id: &str) -> Arc<UserSettings> {
        {
            let session = self.session.read();
            if let (Some(current), Some(user)) = (&session.user_id, &session.user) {
                if current == user_id {
                    return user.clone();
                }
            }
        }
        if self.session.read().user.is_some() {
            self.flush();
            self.end_session();
        }

        let user = UserSettings::new(self.host.clone());
        let report = migration::migrate(self.storage.as_ref(), &user, user_id);

        user.apply_theme();
        user.apply_language();

        let sink = self.sink.clone();
        let registry = self.listeners.clone();
        let sink_user_id = user_id.to_string();
        let sink_id = user.add_listener(
            WILDCARD,
            Arc::new(move |event: &ChangeEvent| {
                sink.persist_user(&sink_user_id, &event.new_value);
                registry.emit(&ManagerEvent::SettingChanged {
                    scope: Scope::User,
                    page_id: None,
                    change: leaf_event(event),
                });
                Ok(())
            }),
        );

        if !report.migrated.is_empty() {
            self.sink.persist_user(user_id, &user.snapshot());
        }

        let mut session = self.session.write();
        session.user_id = Some(user_id.to_string());
        session.user = Some(user.clone());
        session.user_sink = Some(sink_id);
        tracing::info!(user_id, migrated = report.migrated.len(), "settings initialized");
        user
    }

    pub fn is_initialized(&self) -> bool {
        self.session.read().user.is_some()
    }

    pub fn user_id(&self) -> Option<String> {
        self.session.read().user_id.clone()
    }

    pub fn user_settings(&self) -> Result<Arc<UserSettings>, SettingsError> {
        self.session
            .read()
            .user
            .clone()
            .ok_or(SettingsError::NotInitialized)
    }

    /// Existing page instance, or a new one loaded from storage and wired
    /// to persistence
    pub fn page_settings(&self, page_id: &str) -> Result<Arc<PageSettings>, SettingsError> {
        if let Some(page) = self.session.read().pages.get(page_id) {
            return Ok(page.clone());
        }

        let mut session = self.session.write();
        if let Some(page) = session.pages.get(page_id) {
            return Ok(page.clone());
        }
        let user = session.user.clone().ok_or(SettingsError::NotInitialized)?;
        let page = self.load_page(page_id, &user);

        let sink = self.sink.clone();
        let registry = self.listeners.clone();
        let sink_page_id = page_id.to_string();
        page.add_listener(
            WILDCARD,
            Arc::new(move |event: &ChangeEvent| {
                if !event.inherited {
                    sink.persist_page(&sink_page_id, &event.new_value);
                }
                registry.emit(&ManagerEvent::SettingChanged {
                    scope: Scope::Page,
                    page_id: Some(sink_page_id.clone()),
                    change: leaf_event(event),
                });
                Ok(())
            }),
        );

        session.pages.insert(page_id.to_string(), page.clone());
        tracing::debug!(page_id, "page settings loaded");
        Ok(page)
    }

    /// Page instance holding the persisted tree of `page_id`, not yet
    /// registered in the session
    fn load_page(&self, page_id: &str, user: &Arc<UserSettings>) -> Arc<PageSettings> {
        let page = PageSettings::new(page_id, user);
        let key = keys::page_settings(page_id);
        match self.storage.get_item(&key) {
            Ok(Some(raw)) => match page.from_json(&raw) {
                Ok(()) => self.sink.writer.mark_written(&key, &page.to_json()),
                Err(e) => tracing::warn!(page_id, error = %e, "ignoring unreadable page settings"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(page_id, error = %e, "failed to read page settings"),
        }
        page
    }

    /// Grid manager for `grid_name`, created and loaded on first use
    pub fn grid_state(&self, grid_name: &str) -> Arc<GridStateManager> {
        if let Some(grid) = self.grids.read().get(grid_name) {
            return grid.clone();
        }
        self.grids
            .write()
            .entry(grid_name.to_string())
            .or_insert_with(|| {
                Arc::new(GridStateManager::new(
                    grid_name,
                    self.grid_writer.clone(),
                    &self.config,
                ))
            })
            .clone()
    }

    /// Move the current-page pointer and emit `pageChanged`
    pub fn set_current_page(&self, page_id: Option<&str>) -> Result<(), SettingsError> {
        if let Some(id) = page_id {
            self.page_settings(id)?;
        }
        let changed = {
            let mut session = self.session.write();
            let next = page_id.map(str::to_string);
            let changed = session.current_page != next;
            session.current_page = next;
            changed
        };
        if changed {
            let page_id = page_id.map(str::to_string);
            self.host.emit(&HostEvent::PageChanged(PageChangedEvent {
                page_id: page_id.clone(),
            }));
            self.listeners.emit(&ManagerEvent::PageChanged { page_id });
        }
        Ok(())
    }

    pub fn current_page(&self) -> Option<String> {
        self.session.read().current_page.clone()
    }

    // ===== Reads and writes =====

    pub fn has_permission(&self, path: &str, action: PermissionAction) -> bool {
        self.permission_checker
            .as_ref()
            .map_or(true, |checker| checker(path, action))
    }

    fn require(&self, path: &str, action: PermissionAction) -> Result<(), SettingsError> {
        if self.has_permission(path, action) {
            Ok(())
        } else {
            Err(SettingsError::Permission {
                path: path.to_string(),
                action,
            })
        }
    }

    fn target_page(&self, page_id: Option<&str>) -> Option<String> {
        page_id
            .map(str::to_string)
            .or_else(|| self.session.read().current_page.clone())
    }

    /// Effective value at `path`. A targeted page answers first (including
    /// inherited paths); anything it does not hold is read from the user.
    pub fn get(&self, path: &str, page_id: Option<&str>) -> Result<Value, SettingsError> {
        self.require(path, PermissionAction::Read)?;
        let user = self.user_settings()?;
        if let Some(page_id) = self.target_page(page_id) {
            let page = self.page_settings(&page_id)?;
            if let Some(value) = page.get_effective_opt(path) {
                return Ok(value);
            }
        }
        Ok(user.get(path, Value::Null))
    }

    /// Store owning a write at `path`
    fn route(&self, path: &str, options: &WriteOptions) -> Result<Route, SettingsError> {
        let scope = match options.scope {
            Scope::Auto => classify(path),
            explicit => explicit,
        };
        if scope == Scope::Page {
            if let Some(page_id) = self.target_page(options.page_id.as_deref()) {
                return Ok(Route::Page(self.page_settings(&page_id)?));
            }
            tracing::debug!(path, "no target page, writing to user scope");
        }
        Ok(Route::User(self.user_settings()?))
    }

    pub fn set(&self, path: &str, value: Value, options: WriteOptions) -> Result<(), SettingsError> {
        if options.options.check_permissions {
            self.require(path, PermissionAction::Write)?;
        }
        let route = self.route(path, &options)?;
        tracing::debug!(path, target = %route.name(), "routing write");
        route.store().set(path, value, options.options)
    }

    /// Batch write. Every path is routed and checked before anything is
    /// written; then consecutive entries bound for the same target are
    /// applied together, in mapping order.
    pub fn update(
        &self,
        changes: &IndexMap<String, Value>,
        options: WriteOptions,
    ) -> Result<(), SettingsError> {
        let mut runs: Vec<(Route, IndexMap<String, Value>)> = Vec::new();
        for (path, value) in changes {
            if options.options.check_permissions {
                self.require(path, PermissionAction::Write)?;
            }
            let route = self.route(path, &options)?;
            route.store().check(path, value, options.options)?;
            if let Some((last, run)) = runs.last_mut() {
                if last.same_target(&route) {
                    run.insert(path.clone(), value.clone());
                    continue;
                }
            }
            runs.push((route, IndexMap::from([(path.clone(), value.clone())])));
        }

        for (route, run) in runs {
            route.store().update(&run, options.options)?;
        }
        Ok(())
    }

    /// Restore defaults for the user, one page (`page_id` or current), or
    /// the user and every loaded page
    pub fn reset(&self, scope: BulkScope, page_id: Option<&str>) -> Result<(), SettingsError> {
        match scope {
            BulkScope::User => self.user_settings()?.reset(&[]),
            BulkScope::Page => match self.target_page(page_id) {
                Some(page_id) => self.page_settings(&page_id)?.reset(&[]),
                None => tracing::debug!("no target page, nothing to reset"),
            },
            BulkScope::All => {
                self.user_settings()?.reset(&[]);
                let pages: Vec<_> = self.session.read().pages.values().cloned().collect();
                for page in pages {
                    page.reset(&[]);
                }
            }
        }
        tracing::debug!(scope = scope.as_str(), "settings reset");
        Ok(())
    }

    // ===== Bulk import/export =====

    /// Export envelope `{version, exportedAt, userId, scope, user?, pages?}`
    pub fn export(&self, scope: BulkScope, include_private: bool) -> Result<Value, SettingsError> {
        let user = self.user_settings()?;
        let mut envelope = Map::new();
        envelope.insert("version".to_string(), json!(self.config.settings_version));
        envelope.insert("exportedAt".to_string(), json!(Utc::now().to_rfc3339()));
        envelope.insert("userId".to_string(), json!(self.user_id()));
        envelope.insert("scope".to_string(), json!(scope.as_str()));

        if matches!(scope, BulkScope::User | BulkScope::All) {
            envelope.insert("user".to_string(), user.export(include_private));
        }
        if matches!(scope, BulkScope::Page | BulkScope::All) {
            let pages: BTreeMap<String, Value> = self
                .session
                .read()
                .pages
                .iter()
                .map(|(id, page)| (id.clone(), page.snapshot()))
                .collect();
            envelope.insert("pages".to_string(), json!(pages));
        }
        Ok(Value::Object(envelope))
    }

    /// Import an export envelope. All trees are checked before any is
    /// replaced; a failure leaves every instance untouched.
    pub fn import(&self, payload: &Value, options: ImportOptions) -> Result<(), SettingsError> {
        let validator = jsonschema::Validator::new(&EXPORT_SCHEMA)
            .map_err(|e| SettingsError::serialization(format!("invalid export schema: {}", e)))?;
        if let Err(error) = validator.validate(payload) {
            return Err(SettingsError::serialization(format!(
                "invalid settings payload: {}",
                error
            )));
        }

        let user = self.user_settings()?;
        let mut user_plan = None;
        if let Some(tree) = payload.get("user") {
            self.require_import(tree)?;
            user_plan = Some(import_target(user.store(), tree, options)?);
        }
        let mut page_plan: Vec<(String, Value)> = Vec::new();
        if let Some(Value::Object(pages)) = payload.get("pages") {
            for (page_id, tree) in pages {
                self.require_import(tree)?;
                let existing = self.session.read().pages.get(page_id).cloned();
                let page = existing.unwrap_or_else(|| self.load_page(page_id, &user));
                page_plan.push((page_id.clone(), import_target(page.store(), tree, options)?));
            }
        }

        if let Some(tree) = user_plan {
            user.store().replace_tree(tree);
        }
        for (page_id, tree) in page_plan {
            self.page_settings(&page_id)?.store().replace_tree(tree);
        }
        tracing::info!(merge = options.merge, "settings imported");
        Ok(())
    }

    fn require_import(&self, tree: &Value) -> Result<(), SettingsError> {
        for (leaf, _) in path::leaves(tree) {
            self.require(&leaf, PermissionAction::Write)?;
        }
        Ok(())
    }

    // ===== Listeners =====

    /// Listen to `pageChanged`, a dot-path reported by any instance, or `*`
    pub fn add_listener(&self, event: &str, listener: ManagerListener) -> ListenerId {
        self.listeners.add(event, listener)
    }

    pub fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        self.listeners.remove(event, id)
    }

    // ===== Persistence and teardown =====

    /// Write every pending user, page and grid value now
    pub fn flush(&self) {
        self.sink.writer.flush();
        self.grid_writer.flush();
    }

    /// Flush, drop listeners and instances, and clear the current page
    pub fn cleanup(&self) {
        self.flush();
        self.listeners.clear();
        self.end_session();
    }

    fn end_session(&self) {
        let session = std::mem::take(&mut *self.session.write());
        if let (Some(user), Some(id)) = (&session.user, session.user_sink) {
            user.remove_listener(WILDCARD, id);
        }
        for page in session.pages.values() {
            page.detach();
            page.store().clear_listeners();
        }
        for grid in self.grids.write().drain().map(|(_, grid)| grid) {
            grid.clear_change_callback();
        }
        tracing::debug!(user_id = ?session.user_id, "settings session cleaned up");
    }

    /// Purge every persisted key of the session, then clean up
    pub fn logout(&self) {
        let user_id = self.user_id();
        self.sink.writer.cancel_prefix("");
        for grid in self.grids.read().values() {
            grid.cancel_pending();
        }

        let stored = match self.storage.keys() {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list persisted keys");
                Vec::new()
            }
        };
        let user_prefixes = user_id
            .as_deref()
            .map(|id| vec![keys::user_settings(id), format!("userSettings_{}_", id)])
            .unwrap_or_default();
        for key in stored {
            let owned = key == keys::UNIFIED_SETTINGS
                || key == keys::LAST_SETTINGS_SYNC
                || key.starts_with("pageSettings_")
                || key.starts_with("grid_")
                || user_prefixes.iter().any(|prefix| key.starts_with(prefix.as_str()));
            if !owned {
                continue;
            }
            if key.starts_with("grid_") {
                self.grid_writer.remove(&key);
            } else {
                self.sink.writer.remove(&key);
            }
        }

        self.cleanup();
        tracing::info!(user_id = ?user_id, "settings purged on logout");
    }

    // ===== Remote sync =====

    /// Push the full export (without secrets) and record `lastSettingsSync`
    pub async fn sync_to_remote(&self) -> Result<(), SettingsError> {
        let user_id = self.user_id().ok_or(SettingsError::NotInitialized)?;
        let payload = self.export(BulkScope::All, false)?;
        self.remote
            .push(&user_id, payload)
            .await
            .map_err(|e| SettingsError::Persistence {
                key: format!("remote:{}", user_id),
                cause: e.to_string(),
            })?;
        let now = self.sink.clock.now_ms();
        self.sink
            .writer
            .write_now(keys::LAST_SETTINGS_SYNC, &now.to_string());
        tracing::info!(user_id = %user_id, "settings pushed to remote");
        Ok(())
    }

    /// Merge the remote payload, if any. Returns whether one was applied.
    pub async fn pull_from_remote(&self) -> Result<bool, SettingsError> {
        let user_id = self.user_id().ok_or(SettingsError::NotInitialized)?;
        let payload = self
            .remote
            .pull(&user_id)
            .await
            .map_err(|e| SettingsError::Persistence {
                key: format!("remote:{}", user_id),
                cause: e.to_string(),
            })?;
        let Some(mut payload) = payload else {
            return Ok(false);
        };
        if let Some(tree) = payload.get_mut("user") {
            user::strip_private(tree);
        }
        self.import(&payload, ImportOptions::default())?;
        tracing::info!(user_id = %user_id, "settings pulled from remote");
        Ok(true)
    }
}

/// Instance selected for a write
enum Route {
    User(Arc<UserSettings>),
    Page(Arc<PageSettings>),
}

impl Route {
    fn store(&self) -> &SettingsStore {
        match self {
            Self::User(user) => user.store(),
            Self::Page(page) => page.store(),
        }
    }

    fn name(&self) -> &str {
        self.store().name()
    }

    fn same_target(&self, other: &Route) -> bool {
        match (self, other) {
            (Self::User(_), Self::User(_)) => true,
            (Self::Page(a), Self::Page(b)) => a.page_id() == b.page_id(),
            _ => false,
        }
    }
}

/// Tree an import would install on `store`, after validating the payload leaves
fn import_target(store: &SettingsStore, tree: &Value, options: ImportOptions) -> Result<Value, SettingsError> {
    if !tree.is_object() {
        return Err(SettingsError::serialization("settings tree must be a JSON object"));
    }
    if options.validate {
        for (leaf, value) in path::leaves(tree) {
            store.check(&leaf, &value, SetOptions::default())?;
        }
    }
    let base = if options.merge {
        store.snapshot()
    } else {
        store.defaults()
    };
    Ok(path::merged_with_defaults(&base, tree))
}
