//! Static default trees for user and page settings

use serde_json::{json, Value};

use crate::contract::PageType;

pub const SUPPORTED_LANGUAGES: [&str; 5] = ["en", "fr", "ar", "es", "de"];
pub const RTL_LANGUAGES: [&str; 3] = ["ar", "he", "fa"];
pub const THEMES: [&str; 3] = ["light", "dark", "system"];
pub const FONT_SIZES: [&str; 4] = ["small", "medium", "large", "extra-large"];
pub const DENSITIES: [&str; 3] = ["compact", "standard", "comfortable"];

/// Remote services configured under `apiSettings`
pub const API_SERVICES: [&str; 4] = ["general", "magento", "cegid", "mdm"];

/// Secret leaves stripped from `apiSettings.*` on a public export
pub const PRIVATE_API_FIELDS: [&str; 3] = ["password", "apiKey", "token"];

/// Font size in px for a `preferences.fontSize` value
pub fn font_size_px(size: &str) -> u32 {
    match size {
        "small" => 14,
        "large" => 18,
        "extra-large" => 20,
        _ => 16,
    }
}

/// Scale factor for a `preferences.density` value
pub fn density_scale(density: &str) -> f64 {
    match density {
        "compact" => 0.8,
        "comfortable" => 1.2,
        _ => 1.0,
    }
}

fn api_service(base_url: &str) -> Value {
    json!({
        "baseUrl": base_url,
        "username": "",
        "password": "",
        "apiKey": "",
        "token": "",
        "timeout": 30000,
        "retryAttempts": 3,
        "enableCache": true
    })
}

/// Global per-user profile defaults
pub fn user_defaults() -> Value {
    json!({
        "personalInfo": {
            "firstName": "",
            "lastName": "",
            "email": "",
            "phone": "",
            "avatar": "",
            "jobTitle": "",
            "department": "",
            "timezone": "UTC"
        },
        "preferences": {
            "theme": "system",
            "colorPreset": "blue",
            "language": "en",
            "fontSize": "medium",
            "density": "standard",
            "animations": true,
            "highContrast": false,
            "dateFormat": "DD/MM/YYYY",
            "timeFormat": "24h",
            "currency": "EUR",
            "notifications": {
                "email": true,
                "browser": true,
                "sound": false
            }
        },
        "apiSettings": {
            "general": {
                "requestTimeout": 30000,
                "retryAttempts": 3,
                "enableCache": true,
                "enableLogging": false
            },
            "magento": api_service(""),
            "cegid": api_service(""),
            "mdm": api_service("")
        },
        "gridSettings": {
            "defaultPageSize": 25,
            "refreshInterval": 30000,
            "autoRefresh": false,
            "showFilters": true,
            "stickyHeader": true,
            "exportFormat": "csv"
        },
        "dashboardSettings": {
            "defaultView": "overview",
            "refreshInterval": 60000,
            "showWelcome": true,
            "widgets": ["sales", "orders", "stock", "sync"]
        },
        "securitySettings": {
            "sessionTimeout": 30,
            "requirePasswordConfirmation": true,
            "enableTwoFactor": false,
            "loginNotifications": true
        }
    })
}

fn common_page_defaults() -> Value {
    json!({
        "layout": {
            "sidebarCollapsed": false,
            "fullWidth": false,
            "panelSizes": {}
        },
        "grid": {
            "density": null,
            "pageSize": null,
            "columns": {},
            "filters": {},
            "sorting": []
        },
        "filters": {
            "defaultFilters": {},
            "showFilterPanel": false,
            "savedFilters": []
        },
        "display": {
            "theme": null,
            "animations": null,
            "showStats": true,
            "showToolbar": true
        }
    })
}

fn page_specific_defaults(page_type: PageType) -> Option<Value> {
    let tree = match page_type {
        PageType::Dashboard => json!({
            "dashboard": {
                "layout": "grid",
                "widgets": [],
                "refreshInterval": 60000,
                "dateRange": "last7days"
            }
        }),
        PageType::Products => json!({
            "products": {
                "defaultView": "grid",
                "showImages": true,
                "showStock": true,
                "syncOnLoad": false
            }
        }),
        PageType::Orders => json!({
            "orders": {
                "defaultStatus": "all",
                "dateRange": "last30days",
                "showTotals": true
            }
        }),
        PageType::Customers => json!({
            "customers": {
                "defaultSegment": "all",
                "showLifetimeValue": true
            }
        }),
        PageType::Reports => json!({
            "reports": {
                "defaultFormat": "pdf",
                "chartType": "bar",
                "dateRange": "thisMonth"
            }
        }),
        PageType::Settings => json!({
            "settings": {
                "activeTab": "preferences",
                "showAdvanced": false
            }
        }),
        PageType::Common => return None,
    };
    Some(tree)
}

/// Page default tree: the common skeleton plus the page-type sub-tree
pub fn page_defaults(page_type: PageType) -> Value {
    let mut tree = common_page_defaults();
    if let (Some(Value::Object(extra)), Value::Object(base)) =
        (page_specific_defaults(page_type), &mut tree)
    {
        base.extend(extra);
    }
    tree
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::path;

    #[test]
    fn test_page_defaults_mark_inheritable_fields_null() {
        let tree = page_defaults(PageType::Products);
        assert_eq!(path::get_at(&tree, "display.theme"), Some(&Value::Null));
        assert_eq!(path::get_at(&tree, "grid.pageSize"), Some(&Value::Null));
        assert_eq!(path::get_at(&tree, "products.showImages"), Some(&json!(true)));
        assert!(path::get_at(&page_defaults(PageType::Common), "products").is_none());
    }

    #[test]
    fn test_user_defaults_cover_every_api_service() {
        let tree = user_defaults();
        for service in API_SERVICES {
            assert!(path::get_at(&tree, &format!("apiSettings.{}", service)).is_some());
        }
    }

    #[test]
    fn test_scales() {
        assert_eq!(font_size_px("extra-large"), 20);
        assert_eq!(font_size_px("medium"), 16);
        assert!((density_scale("compact") - 0.8).abs() < f64::EPSILON);
    }
}
