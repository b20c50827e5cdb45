//! Grid state models
//!
//! These types are persisted field by field under `grid_<gridName>_<field>`,
//! so their serialized shapes are part of the storage contract.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationModel {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PaginationModel {
    fn default() -> Self {
        Self {
            page: 0,
            page_size: 25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortItem {
    pub field: String,
    #[serde(alias = "sort")]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterItem {
    pub field: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterModel {
    #[serde(default)]
    pub items: Vec<FilterItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic_operator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PinnedColumns {
    #[serde(default)]
    pub left: Vec<String>,
    #[serde(default)]
    pub right: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Density {
    Compact,
    #[default]
    Standard,
    Comfortable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Grid,
    Card,
    List,
}

/// Complete runtime state of one grid
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GridState {
    pub pagination_model: PaginationModel,
    pub sort_model: Vec<SortItem>,
    pub filter_model: FilterModel,
    pub column_visibility: BTreeMap<String, bool>,
    pub column_order: Vec<String>,
    pub column_widths: BTreeMap<String, u32>,
    pub pinned_columns: PinnedColumns,
    pub density: Density,
    pub view_mode: ViewMode,
    pub filters_visible: bool,
    /// Transient
    #[serde(skip)]
    pub selection: BTreeSet<String>,
    /// Transient
    #[serde(skip)]
    pub search_value: String,
}

/// Grid field names; the durable ones double as storage key suffixes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridField {
    Pagination,
    Sort,
    Filter,
    ColumnVisibility,
    ColumnOrder,
    ColumnWidths,
    PinnedColumns,
    Density,
    ViewMode,
    FiltersVisible,
    Selection,
    SearchValue,
}

impl GridField {
    pub const DURABLE: [GridField; 10] = [
        GridField::Pagination,
        GridField::Sort,
        GridField::Filter,
        GridField::ColumnVisibility,
        GridField::ColumnOrder,
        GridField::ColumnWidths,
        GridField::PinnedColumns,
        GridField::Density,
        GridField::ViewMode,
        GridField::FiltersVisible,
    ];

    pub fn key_suffix(&self) -> &'static str {
        match self {
            Self::Pagination => "pagination",
            Self::Sort => "sortModel",
            Self::Filter => "filterModel",
            Self::ColumnVisibility => "columnVisibility",
            Self::ColumnOrder => "columnOrder",
            Self::ColumnWidths => "columnWidths",
            Self::PinnedColumns => "pinnedColumns",
            Self::Density => "density",
            Self::ViewMode => "viewMode",
            Self::FiltersVisible => "filtersVisible",
            Self::Selection => "selection",
            Self::SearchValue => "searchValue",
        }
    }

    /// Field name inside an exported grid state object
    pub fn export_name(&self) -> &'static str {
        match self {
            Self::Pagination => "paginationModel",
            other => other.key_suffix(),
        }
    }

    pub fn is_durable(&self) -> bool {
        !matches!(self, Self::Selection | Self::SearchValue)
    }
}

/// Notification delivered to a grid's change callback
#[derive(Debug, Clone, PartialEq)]
pub struct GridChange {
    pub field: GridField,
    pub value: Value,
    pub snapshot: GridState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sort_item_accepts_legacy_sort_key() {
        let item: SortItem = serde_json::from_value(json!({"field": "sku", "sort": "desc"})).unwrap();
        assert_eq!(item.direction, SortDirection::Desc);
        assert_eq!(
            serde_json::to_value(&item).unwrap(),
            json!({"field": "sku", "direction": "desc"})
        );
    }

    #[test]
    fn test_transient_fields_are_not_serialized() {
        let mut state = GridState::default();
        state.selection.insert("row-1".to_string());
        state.search_value = "shoes".to_string();
        let value = serde_json::to_value(&state).unwrap();
        assert!(value.get("selection").is_none());
        assert!(value.get("searchValue").is_none());
        assert_eq!(value["paginationModel"], json!({"page": 0, "pageSize": 25}));
    }

    #[test]
    fn test_durable_set() {
        assert!(GridField::DURABLE.iter().all(GridField::is_durable));
        assert!(!GridField::Selection.is_durable());
        assert!(!GridField::SearchValue.is_durable());
    }
}
