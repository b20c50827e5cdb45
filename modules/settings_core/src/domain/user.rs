//! Global per-user settings profile

use serde_json::Value;
use std::sync::Arc;

use super::defaults::{self, PRIVATE_API_FIELDS, RTL_LANGUAGES};
use super::events::{HostEvent, HostSurface, LanguageChangedEvent, ThemeChangedEvent};
use super::path::{self, WILDCARD};
use super::store::{ObservableSettings, SettingsStore};
use super::validation;
use crate::contract::{ChangeEvent, ThemeMode};

/// Leaves whose change re-projects the theme
const THEME_PATHS: [&str; 6] = [
    "preferences.theme",
    "preferences.colorPreset",
    "preferences.fontSize",
    "preferences.density",
    "preferences.animations",
    "preferences.highContrast",
];

const LANGUAGE_PATH: &str = "preferences.language";

/// Personal info, preferences, API service configs, grid/dashboard defaults
/// and security settings of one user, plus their projection onto the host.
pub struct UserSettings {
    store: SettingsStore,
    host: Arc<dyn HostSurface>,
}

impl UserSettings {
    pub fn new(host: Arc<dyn HostSurface>) -> Arc<Self> {
        let store = SettingsStore::new("user", defaults::user_defaults());
        for (rule_path, rule) in validation::user_rules() {
            store.add_validation_rule(rule_path, rule);
        }

        let projection_host = host.clone();
        store.add_listener(
            WILDCARD,
            Arc::new(move |event: &ChangeEvent| {
                project_change(projection_host.as_ref(), event);
                Ok(())
            }),
        );

        Arc::new(Self { store, host })
    }

    /// Project theme attributes, CSS variables and emit `themeChanged`
    pub fn apply_theme(&self) {
        project_theme(self.host.as_ref(), &self.store.snapshot());
    }

    /// Project `lang`/`dir` and emit `languageChanged`
    pub fn apply_language(&self) {
        project_language(self.host.as_ref(), &self.store.snapshot());
    }

    pub fn resolved_theme(&self) -> ThemeMode {
        resolve_theme(self.host.as_ref(), &self.store.snapshot())
    }

    pub fn is_rtl(&self) -> bool {
        let language = self.store.get(LANGUAGE_PATH, Value::Null);
        language
            .as_str()
            .is_some_and(|lang| RTL_LANGUAGES.contains(&lang))
    }

    /// The full tree; unless `include_private`, secret leaves are removed from
    /// every `apiSettings.*` service
    pub fn export(&self, include_private: bool) -> Value {
        let mut tree = self.store.snapshot();
        if !include_private {
            strip_private(&mut tree);
        }
        tree
    }
}

impl ObservableSettings for UserSettings {
    fn store(&self) -> &SettingsStore {
        &self.store
    }
}

pub(crate) fn strip_private(tree: &mut Value) {
    if let Some(Value::Object(services)) = tree.get_mut("apiSettings") {
        for service in services.values_mut() {
            if let Value::Object(fields) = service {
                for field in PRIVATE_API_FIELDS {
                    fields.remove(field);
                }
            }
        }
    }
}

fn project_change(host: &dyn HostSurface, event: &ChangeEvent) {
    let tree = &event.new_value;
    let touches = |leaf: &str| event.path == WILDCARD || path::is_within(leaf, &event.path);

    if THEME_PATHS.iter().any(|p| touches(*p)) {
        project_theme(host, tree);
    }
    if touches(LANGUAGE_PATH) {
        project_language(host, tree);
    }
}

fn pref<'a>(tree: &'a Value, key: &str) -> Option<&'a Value> {
    tree.get("preferences").and_then(|p| p.get(key))
}

fn pref_str<'a>(tree: &'a Value, key: &str, default: &'a str) -> &'a str {
    pref(tree, key).and_then(Value::as_str).unwrap_or(default)
}

fn pref_bool(tree: &Value, key: &str, default: bool) -> bool {
    pref(tree, key).and_then(Value::as_bool).unwrap_or(default)
}

fn resolve_theme(host: &dyn HostSurface, tree: &Value) -> ThemeMode {
    match pref_str(tree, "theme", "system") {
        "dark" => ThemeMode::Dark,
        "light" => ThemeMode::Light,
        _ if host.prefers_dark_mode() => ThemeMode::Dark,
        _ => ThemeMode::Light,
    }
}

fn project_theme(host: &dyn HostSurface, tree: &Value) {
    let theme = resolve_theme(host, tree);
    let font_size = pref_str(tree, "fontSize", "medium");
    let density = pref_str(tree, "density", "standard");
    let animations = pref_bool(tree, "animations", true);
    let high_contrast = pref_bool(tree, "highContrast", false);

    host.set_attribute("data-theme", theme.as_str());
    host.set_css_variable(
        "--font-size-base",
        &format!("{}px", defaults::font_size_px(font_size)),
    );
    host.set_css_variable(
        "--density-scale",
        &defaults::density_scale(density).to_string(),
    );
    host.set_css_variable(
        "--animation-duration",
        if animations { "0.3s" } else { "0s" },
    );
    host.set_attribute(
        "data-high-contrast",
        if high_contrast { "true" } else { "false" },
    );

    tracing::debug!(theme = theme.as_str(), font_size, density, "theme applied");
    host.emit(&HostEvent::ThemeChanged(ThemeChangedEvent {
        theme: theme.as_str().to_string(),
        color_preset: pref_str(tree, "colorPreset", "blue").to_string(),
        font_size: font_size.to_string(),
        density: density.to_string(),
        animations,
        high_contrast,
    }));
}

fn project_language(host: &dyn HostSurface, tree: &Value) {
    let language = pref_str(tree, "language", "en");
    let is_rtl = RTL_LANGUAGES.contains(&language);

    host.set_attribute("lang", language);
    host.set_attribute("dir", if is_rtl { "rtl" } else { "ltr" });

    tracing::debug!(language, is_rtl, "language applied");
    host.emit(&HostEvent::LanguageChanged(LanguageChangedEvent {
        language: language.to_string(),
        is_rtl,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::SettingsError;
    use crate::domain::events::RecordingHostSurface;
    use serde_json::json;

    fn user() -> (Arc<UserSettings>, RecordingHostSurface) {
        let host = RecordingHostSurface::new();
        (UserSettings::new(Arc::new(host.clone())), host)
    }

    #[test]
    fn test_rejects_invalid_enumerations() {
        let (user, _) = user();
        for (p, v) in [
            ("preferences.theme", json!("holographic")),
            ("preferences.language", json!("xx")),
            ("preferences.fontSize", json!("gigantic")),
            ("preferences.density", json!("cozy")),
            ("gridSettings.defaultPageSize", json!(5)),
            ("gridSettings.refreshInterval", json!(500)),
            ("apiSettings.general.requestTimeout", json!(0)),
            ("apiSettings.magento.baseUrl", json!("not a url")),
            ("personalInfo.email", json!("nobody")),
            ("preferences.theme.x", json!("holographic")),
            ("gridSettings.defaultPageSize.n", json!(50)),
        ] {
            let err = user.set(p, v).unwrap_err();
            assert!(matches!(err, SettingsError::Validation { .. }), "{}", p);
        }
        assert_eq!(user.snapshot(), user.defaults());
    }

    #[test]
    fn test_accepts_valid_values() {
        let (user, _) = user();
        user.set("apiSettings.cegid.baseUrl", json!("https://cegid.example.com"))
            .unwrap();
        user.set("apiSettings.general.requestTimeout", json!(300_000)).unwrap();
        user.set("personalInfo.phone", json!("+33 1 23 45 67 89")).unwrap();
        user.set("gridSettings.defaultPageSize", json!(1000)).unwrap();
    }

    #[test]
    fn test_theme_projection_on_write() {
        let (user, host) = user();
        user.set("preferences.theme", json!("dark")).unwrap();
        assert_eq!(host.attribute("data-theme").as_deref(), Some("dark"));

        user.set("preferences.animations", json!(false)).unwrap();
        assert_eq!(host.css_variable("--animation-duration").as_deref(), Some("0s"));

        user.set("preferences.fontSize", json!("large")).unwrap();
        assert_eq!(host.css_variable("--font-size-base").as_deref(), Some("18px"));

        match host.events_named("themeChanged").last() {
            Some(HostEvent::ThemeChanged(e)) => {
                assert_eq!(e.theme, "dark");
                assert_eq!(e.font_size, "large");
                assert!(!e.animations);
            }
            other => panic!("Expected themeChanged, got {:?}", other),
        }
    }

    #[test]
    fn test_system_theme_follows_host() {
        let (user, host) = user();
        host.set_prefers_dark_mode(true);
        user.apply_theme();
        assert_eq!(host.attribute("data-theme").as_deref(), Some("dark"));
        assert_eq!(user.resolved_theme(), ThemeMode::Dark);
    }

    #[test]
    fn test_language_projection() {
        let (user, host) = user();
        user.set("preferences.language", json!("ar")).unwrap();
        assert_eq!(host.attribute("dir").as_deref(), Some("rtl"));
        assert_eq!(host.attribute("lang").as_deref(), Some("ar"));
        assert!(user.is_rtl());

        user.set("preferences.language", json!("fr")).unwrap();
        assert_eq!(host.attribute("dir").as_deref(), Some("ltr"));
        assert_eq!(host.events_named("languageChanged").len(), 2);
    }

    #[test]
    fn test_unrelated_write_does_not_project() {
        let (user, host) = user();
        user.set("personalInfo.firstName", json!("Amira")).unwrap();
        assert!(host.events().is_empty());
    }

    #[test]
    fn test_export_strips_secrets() {
        let (user, _) = user();
        user.set("apiSettings.magento.password", json!("s3cret")).unwrap();
        user.set("apiSettings.magento.apiKey", json!("key")).unwrap();

        let public = user.export(false);
        let magento = &public["apiSettings"]["magento"];
        assert!(magento.get("password").is_none());
        assert!(magento.get("apiKey").is_none());
        assert!(magento.get("token").is_none());
        assert!(magento.get("baseUrl").is_some());

        let private = user.export(true);
        assert_eq!(private["apiSettings"]["magento"]["password"], json!("s3cret"));
    }
}
