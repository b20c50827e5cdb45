//! Grid state manager
//!
//! Owns the runtime state of one named grid. Durable fields are persisted one
//! key per field (`grid_<name>_<field>`) through a shared `DebouncedWriter`;
//! `selection` and `searchValue` live only in memory.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::Config;
use crate::contract::{
    Density, FilterModel, GridChange, GridField, GridState, PaginationModel, PinnedColumns,
    SettingsError, SortItem, ViewMode,
};
use crate::infra::storage::{keys, DebouncedWriter};

/// Single change callback of a grid
pub type GridChangeCallback = Arc<dyn Fn(&GridChange) + Send + Sync>;

/// One typed field write
#[derive(Debug, Clone)]
enum GridUpdate {
    Pagination(PaginationModel),
    Sort(Vec<SortItem>),
    Filter(FilterModel),
    ColumnVisibility(BTreeMap<String, bool>),
    ColumnOrder(Vec<String>),
    ColumnWidths(BTreeMap<String, u32>),
    PinnedColumns(PinnedColumns),
    Density(Density),
    ViewMode(ViewMode),
    FiltersVisible(bool),
    Selection(BTreeSet<String>),
    SearchValue(String),
}

impl GridUpdate {
    fn parse(field: GridField, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match field {
            GridField::Pagination => Self::Pagination(serde_json::from_value(value)?),
            GridField::Sort => Self::Sort(serde_json::from_value(value)?),
            GridField::Filter => Self::Filter(serde_json::from_value(value)?),
            GridField::ColumnVisibility => Self::ColumnVisibility(serde_json::from_value(value)?),
            GridField::ColumnOrder => Self::ColumnOrder(serde_json::from_value(value)?),
            GridField::ColumnWidths => Self::ColumnWidths(serde_json::from_value(value)?),
            GridField::PinnedColumns => Self::PinnedColumns(serde_json::from_value(value)?),
            GridField::Density => Self::Density(serde_json::from_value(value)?),
            GridField::ViewMode => Self::ViewMode(serde_json::from_value(value)?),
            GridField::FiltersVisible => Self::FiltersVisible(serde_json::from_value(value)?),
            GridField::Selection => Self::Selection(serde_json::from_value(value)?),
            GridField::SearchValue => Self::SearchValue(serde_json::from_value(value)?),
        })
    }

    fn field(&self) -> GridField {
        match self {
            Self::Pagination(_) => GridField::Pagination,
            Self::Sort(_) => GridField::Sort,
            Self::Filter(_) => GridField::Filter,
            Self::ColumnVisibility(_) => GridField::ColumnVisibility,
            Self::ColumnOrder(_) => GridField::ColumnOrder,
            Self::ColumnWidths(_) => GridField::ColumnWidths,
            Self::PinnedColumns(_) => GridField::PinnedColumns,
            Self::Density(_) => GridField::Density,
            Self::ViewMode(_) => GridField::ViewMode,
            Self::FiltersVisible(_) => GridField::FiltersVisible,
            Self::Selection(_) => GridField::Selection,
            Self::SearchValue(_) => GridField::SearchValue,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Pagination(v) => json(v),
            Self::Sort(v) => json(v),
            Self::Filter(v) => json(v),
            Self::ColumnVisibility(v) => json(v),
            Self::ColumnOrder(v) => json(v),
            Self::ColumnWidths(v) => json(v),
            Self::PinnedColumns(v) => json(v),
            Self::Density(v) => json(v),
            Self::ViewMode(v) => json(v),
            Self::FiltersVisible(v) => json(v),
            Self::Selection(v) => json(v),
            Self::SearchValue(v) => json(v),
        }
    }

    fn apply(self, state: &mut GridState) {
        match self {
            Self::Pagination(v) => state.pagination_model = v,
            Self::Sort(v) => state.sort_model = v,
            Self::Filter(v) => state.filter_model = v,
            Self::ColumnVisibility(v) => state.column_visibility = v,
            Self::ColumnOrder(v) => state.column_order = v,
            Self::ColumnWidths(v) => state.column_widths = v,
            Self::PinnedColumns(v) => state.pinned_columns = v,
            Self::Density(v) => state.density = v,
            Self::ViewMode(v) => state.view_mode = v,
            Self::FiltersVisible(v) => state.filters_visible = v,
            Self::Selection(v) => state.selection = v,
            Self::SearchValue(v) => state.search_value = v,
        }
    }
}

fn json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Column entry of a legacy `grid_<name>_settings` blob
#[derive(Debug, Deserialize)]
struct LegacyColumn {
    #[serde(default)]
    visible: Option<bool>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    index: Option<i64>,
}

pub struct GridStateManager {
    name: String,
    writer: Arc<DebouncedWriter>,
    page_size_options: Vec<u32>,
    default_page_size: u32,
    state: Mutex<GridState>,
    known_columns: RwLock<Option<Vec<String>>>,
    callback: RwLock<Option<GridChangeCallback>>,
}

impl GridStateManager {
    /// Create the manager and load whatever is persisted for `name`
    pub fn new(name: impl Into<String>, writer: Arc<DebouncedWriter>, config: &Config) -> Self {
        let manager = Self {
            name: name.into(),
            writer,
            page_size_options: config.page_size_options.clone(),
            default_page_size: config.default_grid_page_size,
            state: Mutex::new(GridState::default()),
            known_columns: RwLock::new(None),
            callback: RwLock::new(None),
        };
        let initial = manager.load();
        *manager.state.lock() = initial;
        manager
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn key(&self, field: GridField) -> String {
        keys::grid_field(&self.name, field.key_suffix())
    }

    fn default_state(&self) -> GridState {
        GridState {
            pagination_model: PaginationModel {
                page: 0,
                page_size: self.default_page_size,
            },
            ..GridState::default()
        }
    }

    fn load(&self) -> GridState {
        let mut state = self.default_state();
        let mut column_state_found = false;

        for field in GridField::DURABLE {
            let key = self.key(field);
            let raw = match self.writer.storage().get_item(&key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(grid = %self.name, key = %key, error = %e, "failed to read grid state");
                    continue;
                }
            };
            let update = serde_json::from_str(&raw)
                .and_then(|value| GridUpdate::parse(field, value))
                .map_err(SettingsError::from)
                .and_then(|update| self.validate(&update).map(|()| update));
            match update {
                Ok(update) => {
                    self.writer.mark_written(&key, &update.to_value().to_string());
                    if matches!(
                        field,
                        GridField::ColumnVisibility | GridField::ColumnOrder | GridField::ColumnWidths
                    ) {
                        column_state_found = true;
                    }
                    update.apply(&mut state);
                }
                Err(e) => {
                    tracing::warn!(grid = %self.name, key = %key, error = %e, "ignoring unreadable grid state");
                }
            }
        }

        if !column_state_found {
            self.seed_from_legacy(&mut state);
        }
        state
    }

    fn seed_from_legacy(&self, state: &mut GridState) {
        let key = keys::grid_legacy_settings(&self.name);
        let Ok(Some(raw)) = self.writer.storage().get_item(&key) else {
            return;
        };
        let columns: BTreeMap<String, LegacyColumn> = match serde_json::from_str(&raw) {
            Ok(columns) => columns,
            Err(e) => {
                tracing::warn!(grid = %self.name, key = %key, error = %e, "ignoring unreadable legacy grid settings");
                return;
            }
        };

        let mut indexed = Vec::new();
        for (field, column) in columns {
            if let Some(visible) = column.visible {
                state.column_visibility.insert(field.clone(), visible);
            }
            if let Some(width) = column.width.filter(|w| *w > 0) {
                state.column_widths.insert(field.clone(), width);
            }
            if let Some(index) = column.index {
                indexed.push((index, field));
            }
        }
        indexed.sort();
        state.column_order = indexed.into_iter().map(|(_, field)| field).collect();
        tracing::debug!(grid = %self.name, "column state seeded from legacy settings");
    }

    fn validate(&self, update: &GridUpdate) -> Result<(), SettingsError> {
        match update {
            GridUpdate::Pagination(model) => {
                if model.page_size == 0 || !self.page_size_options.contains(&model.page_size) {
                    return Err(SettingsError::invalid_grid(
                        GridField::Pagination.key_suffix(),
                        format!("page size {} is not one of {:?}", model.page_size, self.page_size_options),
                    ));
                }
            }
            GridUpdate::ColumnWidths(widths) => {
                if let Some((column, _)) = widths.iter().find(|(_, w)| **w == 0) {
                    return Err(SettingsError::invalid_grid(
                        GridField::ColumnWidths.key_suffix(),
                        format!("width of '{}' must be positive", column),
                    ));
                }
            }
            GridUpdate::PinnedColumns(pinned) => {
                if let Some(column) = pinned.left.iter().find(|c| pinned.right.contains(c)) {
                    return Err(SettingsError::invalid_grid(
                        GridField::PinnedColumns.key_suffix(),
                        format!("'{}' is pinned on both sides", column),
                    ));
                }
            }
            GridUpdate::ColumnOrder(order) => {
                let unique: BTreeSet<&String> = order.iter().collect();
                if unique.len() != order.len() {
                    return Err(SettingsError::invalid_grid(
                        GridField::ColumnOrder.key_suffix(),
                        "duplicate column in order",
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn commit(&self, update: GridUpdate) -> Result<(), SettingsError> {
        self.validate(&update)?;
        let field = update.field();
        let value = update.to_value();
        let snapshot = {
            let mut state = self.state.lock();
            update.apply(&mut state);
            state.clone()
        };

        if field.is_durable() {
            self.writer.schedule(&self.key(field), value.to_string());
        }
        self.notify(GridChange {
            field,
            value,
            snapshot,
        });
        Ok(())
    }

    fn notify(&self, change: GridChange) {
        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(&change);
        }
    }

    // ===== Subscription =====

    /// Replace the change callback
    pub fn set_change_callback(&self, callback: GridChangeCallback) {
        *self.callback.write() = Some(callback);
    }

    pub fn clear_change_callback(&self) {
        *self.callback.write() = None;
    }

    /// Columns currently defined by the grid; `column_order` is projected
    /// onto them. When the set changes, unknown entries are pruned from the
    /// stored order.
    pub fn set_known_columns(&self, columns: Vec<String>) {
        let changed = {
            let mut known = self.known_columns.write();
            let changed = known.as_ref().map_or(true, |previous| {
                previous.iter().collect::<BTreeSet<_>>() != columns.iter().collect::<BTreeSet<_>>()
            });
            *known = Some(columns.clone());
            changed
        };
        if !changed {
            return;
        }

        let stored = self.state.lock().column_order.clone();
        let pruned: Vec<String> = stored.iter().filter(|c| columns.contains(c)).cloned().collect();
        if pruned.len() == stored.len() {
            return;
        }
        tracing::debug!(grid = %self.name, dropped = stored.len() - pruned.len(), "pruning unknown columns");
        if let Err(e) = self.commit(GridUpdate::ColumnOrder(pruned)) {
            tracing::warn!(grid = %self.name, error = %e, "failed to prune column order");
        }
    }

    // ===== Accessors =====

    pub fn state(&self) -> GridState {
        self.state.lock().clone()
    }

    pub fn pagination_model(&self) -> PaginationModel {
        self.state.lock().pagination_model
    }

    pub fn sort_model(&self) -> Vec<SortItem> {
        self.state.lock().sort_model.clone()
    }

    pub fn filter_model(&self) -> FilterModel {
        self.state.lock().filter_model.clone()
    }

    pub fn column_visibility(&self) -> BTreeMap<String, bool> {
        self.state.lock().column_visibility.clone()
    }

    /// Stored order restricted to known columns, followed by known columns
    /// missing from it
    pub fn column_order(&self) -> Vec<String> {
        let stored = self.state.lock().column_order.clone();
        let Some(known) = self.known_columns.read().clone() else {
            return stored;
        };
        let mut order: Vec<String> = stored.into_iter().filter(|c| known.contains(c)).collect();
        for column in known {
            if !order.contains(&column) {
                order.push(column);
            }
        }
        order
    }

    pub fn column_widths(&self) -> BTreeMap<String, u32> {
        self.state.lock().column_widths.clone()
    }

    pub fn pinned_columns(&self) -> PinnedColumns {
        self.state.lock().pinned_columns.clone()
    }

    pub fn density(&self) -> Density {
        self.state.lock().density
    }

    pub fn view_mode(&self) -> ViewMode {
        self.state.lock().view_mode
    }

    pub fn filters_visible(&self) -> bool {
        self.state.lock().filters_visible
    }

    pub fn selection(&self) -> BTreeSet<String> {
        self.state.lock().selection.clone()
    }

    pub fn search_value(&self) -> String {
        self.state.lock().search_value.clone()
    }

    // ===== Setters =====

    pub fn set_pagination_model(&self, model: PaginationModel) -> Result<(), SettingsError> {
        self.commit(GridUpdate::Pagination(model))
    }

    pub fn set_sort_model(&self, model: Vec<SortItem>) -> Result<(), SettingsError> {
        self.commit(GridUpdate::Sort(model))
    }

    pub fn set_filter_model(&self, model: FilterModel) -> Result<(), SettingsError> {
        self.commit(GridUpdate::Filter(model))
    }

    pub fn set_column_visibility(&self, visibility: BTreeMap<String, bool>) -> Result<(), SettingsError> {
        self.commit(GridUpdate::ColumnVisibility(visibility))
    }

    pub fn set_column_order(&self, order: Vec<String>) -> Result<(), SettingsError> {
        self.commit(GridUpdate::ColumnOrder(order))
    }

    pub fn set_column_widths(&self, widths: BTreeMap<String, u32>) -> Result<(), SettingsError> {
        self.commit(GridUpdate::ColumnWidths(widths))
    }

    /// Resize a single column
    pub fn set_column_width(&self, column: &str, width: u32) -> Result<(), SettingsError> {
        let mut widths = self.column_widths();
        widths.insert(column.to_string(), width);
        self.set_column_widths(widths)
    }

    pub fn set_pinned_columns(&self, pinned: PinnedColumns) -> Result<(), SettingsError> {
        self.commit(GridUpdate::PinnedColumns(pinned))
    }

    pub fn set_density(&self, density: Density) -> Result<(), SettingsError> {
        self.commit(GridUpdate::Density(density))
    }

    pub fn set_view_mode(&self, view_mode: ViewMode) -> Result<(), SettingsError> {
        self.commit(GridUpdate::ViewMode(view_mode))
    }

    pub fn set_filters_visible(&self, visible: bool) -> Result<(), SettingsError> {
        self.commit(GridUpdate::FiltersVisible(visible))
    }

    pub fn set_selection(&self, selection: BTreeSet<String>) -> Result<(), SettingsError> {
        self.commit(GridUpdate::Selection(selection))
    }

    pub fn set_search_value(&self, search: impl Into<String>) -> Result<(), SettingsError> {
        self.commit(GridUpdate::SearchValue(search.into()))
    }

    // ===== Bulk =====

    /// Restore defaults and purge every persisted key of this grid
    pub fn reset(&self) {
        let (before, after) = {
            let mut state = self.state.lock();
            let before = std::mem::replace(&mut *state, self.default_state());
            (before, state.clone())
        };

        for field in GridField::DURABLE {
            self.writer.remove(&self.key(field));
        }
        self.writer.remove(&keys::grid_legacy_settings(&self.name));
        tracing::debug!(grid = %self.name, "grid state reset");

        let fields = GridField::DURABLE
            .into_iter()
            .chain([GridField::Selection, GridField::SearchValue]);
        for field in fields {
            let old = field_value(&before, field);
            let new = field_value(&after, field);
            if old != new {
                self.notify(GridChange {
                    field,
                    value: new,
                    snapshot: after.clone(),
                });
            }
        }
    }

    /// Durable subset as a camelCase object
    pub fn export(&self) -> Value {
        json(&*self.state.lock())
    }

    /// Apply the fields present in `state` through the regular setters.
    /// Every field is parsed and validated before the first one is applied.
    pub fn import(&self, state: &Value) -> Result<(), SettingsError> {
        let Value::Object(fields) = state else {
            return Err(SettingsError::serialization("grid state must be a JSON object"));
        };

        let mut updates = Vec::new();
        for field in GridField::DURABLE {
            let Some(value) = fields.get(field.export_name()) else {
                continue;
            };
            let update = GridUpdate::parse(field, value.clone()).map_err(|e| {
                SettingsError::serialization(format!("{}: {}", field.export_name(), e))
            })?;
            self.validate(&update)?;
            updates.push(update);
        }

        for update in updates {
            self.commit(update)?;
        }
        Ok(())
    }

    fn durable_keys(&self) -> Vec<String> {
        GridField::DURABLE.into_iter().map(|field| self.key(field)).collect()
    }

    /// Write this grid's pending values now
    pub fn flush(&self) {
        self.writer.flush_keys(&self.durable_keys());
    }

    /// Drop this grid's pending writes
    pub(crate) fn cancel_pending(&self) {
        for key in self.durable_keys() {
            self.writer.cancel(&key);
        }
    }
}

fn field_value(state: &GridState, field: GridField) -> Value {
    match field {
        GridField::Pagination => json(&state.pagination_model),
        GridField::Sort => json(&state.sort_model),
        GridField::Filter => json(&state.filter_model),
        GridField::ColumnVisibility => json(&state.column_visibility),
        GridField::ColumnOrder => json(&state.column_order),
        GridField::ColumnWidths => json(&state.column_widths),
        GridField::PinnedColumns => json(&state.pinned_columns),
        GridField::Density => json(&state.density),
        GridField::ViewMode => json(&state.view_mode),
        GridField::FiltersVisible => json(&state.filters_visible),
        GridField::Selection => json(&state.selection),
        GridField::SearchValue => json(&state.search_value),
    }
}
