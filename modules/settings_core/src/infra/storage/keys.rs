//! Storage key templates
//!
//! These names are shared with previously stored blobs and must not change.

/// Full user tree plus `{lastModified, version}` for the anonymous profile
pub const UNIFIED_SETTINGS: &str = "techno-etl-unified-settings";

pub const LAST_SETTINGS_SYNC: &str = "lastSettingsSync";

/// Keys written by earlier releases, merged into the user tree on startup
pub const LEGACY_KEYS: [&str; 6] = [
    "language",
    "themeMode",
    "fontSize",
    "userSettings",
    "techno-etl-settings",
    "dashboardSettings",
];

pub fn user_settings(user_id: &str) -> String {
    format!("techno-etl-user-{}", user_id)
}

pub fn user_last_modified(user_id: &str) -> String {
    format!("userSettings_{}_lastModified", user_id)
}

pub fn page_settings(page_id: &str) -> String {
    format!("pageSettings_{}", page_id)
}

pub fn page_last_modified(page_id: &str) -> String {
    format!("pageSettings_{}_lastModified", page_id)
}

pub fn grid_field(grid_name: &str, field: &str) -> String {
    format!("grid_{}_{}", grid_name, field)
}

/// Legacy per-grid column settings: `field -> {visible, width, index}`
pub fn grid_legacy_settings(grid_name: &str) -> String {
    format!("grid_{}_settings", grid_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates() {
        assert_eq!(user_settings("u1"), "techno-etl-user-u1");
        assert_eq!(user_last_modified("u1"), "userSettings_u1_lastModified");
        assert_eq!(page_settings("products"), "pageSettings_products");
        assert_eq!(page_last_modified("products"), "pageSettings_products_lastModified");
        assert_eq!(grid_field("G", "pagination"), "grid_G_pagination");
        assert_eq!(grid_legacy_settings("G"), "grid_G_settings");
    }
}
