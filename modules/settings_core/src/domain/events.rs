/// Host surface and events emitted by the settings core
///
/// The core never touches a document directly. Theme and language
/// projections go through `HostSurface`:
/// - attributes (`data-theme`, `lang`, `dir`, `data-high-contrast`)
/// - CSS variables (font size, density scale, animation duration)
/// - the host dark-mode signal used to resolve `system`
/// - named events (`themeChanged`, `languageChanged`, `pageChanged`)

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::contract::{ChangeEvent, Scope};

/// Events emitted on the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "camelCase")]
pub enum HostEvent {
    ThemeChanged(ThemeChangedEvent),
    LanguageChanged(LanguageChangedEvent),
    PageChanged(PageChangedEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeChangedEvent {
    /// Resolved mode, never `system`
    pub theme: String,
    pub color_preset: String,
    pub font_size: String,
    pub density: String,
    pub animations: bool,
    pub high_contrast: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageChangedEvent {
    pub language: String,
    #[serde(rename = "isRTL")]
    pub is_rtl: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageChangedEvent {
    pub page_id: Option<String>,
}

impl HostEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ThemeChanged(_) => "themeChanged",
            Self::LanguageChanged(_) => "languageChanged",
            Self::PageChanged(_) => "pageChanged",
        }
    }
}

/// Boundary between the core and the host environment
pub trait HostSurface: Send + Sync {
    fn set_attribute(&self, name: &str, value: &str);

    fn set_css_variable(&self, name: &str, value: &str);

    /// Host dark-mode preference, consulted when the theme is `system`
    fn prefers_dark_mode(&self) -> bool;

    fn emit(&self, event: &HostEvent);
}

/// Host without a document; projections are dropped
#[derive(Clone, Default)]
pub struct NoOpHostSurface;

impl HostSurface for NoOpHostSurface {
    fn set_attribute(&self, _name: &str, _value: &str) {}

    fn set_css_variable(&self, _name: &str, _value: &str) {}

    fn prefers_dark_mode(&self) -> bool {
        false
    }

    fn emit(&self, _event: &HostEvent) {}
}

/// In-memory host that records every projection
#[derive(Clone, Default)]
pub struct RecordingHostSurface {
    attributes: Arc<RwLock<HashMap<String, String>>>,
    css_variables: Arc<RwLock<HashMap<String, String>>>,
    events: Arc<RwLock<Vec<HostEvent>>>,
    dark_mode: Arc<AtomicBool>,
}

impl RecordingHostSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the host dark-mode media query
    pub fn set_prefers_dark_mode(&self, dark: bool) {
        self.dark_mode.store(dark, Ordering::Relaxed);
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        self.attributes.read().get(name).cloned()
    }

    pub fn css_variable(&self, name: &str) -> Option<String> {
        self.css_variables.read().get(name).cloned()
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.events.read().clone()
    }

    pub fn events_named(&self, name: &str) -> Vec<HostEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.name() == name)
            .cloned()
            .collect()
    }

    pub fn clear_events(&self) {
        self.events.write().clear();
    }
}

impl HostSurface for RecordingHostSurface {
    fn set_attribute(&self, name: &str, value: &str) {
        self.attributes
            .write()
            .insert(name.to_string(), value.to_string());
    }

    fn set_css_variable(&self, name: &str, value: &str) {
        self.css_variables
            .write()
            .insert(name.to_string(), value.to_string());
    }

    fn prefers_dark_mode(&self) -> bool {
        self.dark_mode.load(Ordering::Relaxed)
    }

    fn emit(&self, event: &HostEvent) {
        self.events.write().push(event.clone());
    }
}

/// Events observable through `SettingsManager::add_listener`
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    /// The current page pointer moved
    PageChanged { page_id: Option<String> },
    /// A path changed on the user instance or on a page
    SettingChanged {
        scope: Scope,
        page_id: Option<String>,
        change: ChangeEvent,
    },
}

impl ManagerEvent {
    /// Key listeners subscribe with: `pageChanged` or the changed path
    pub fn name(&self) -> &str {
        match self {
            Self::PageChanged { .. } => "pageChanged",
            Self::SettingChanged { change, .. } => &change.path,
        }
    }
}

/// Callback registered on the manager
pub type ManagerListener = Arc<dyn Fn(&ManagerEvent) -> anyhow::Result<()> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_host_event_serialization() {
        let event = HostEvent::LanguageChanged(LanguageChangedEvent {
            language: "ar".to_string(),
            is_rtl: true,
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event_type": "languageChanged", "language": "ar", "isRTL": true})
        );
        assert_eq!(event.name(), "languageChanged");
    }

    #[test]
    fn test_recording_host() {
        let host = RecordingHostSurface::new();
        assert!(!host.prefers_dark_mode());
        host.set_prefers_dark_mode(true);
        assert!(host.prefers_dark_mode());

        host.set_attribute("dir", "rtl");
        assert_eq!(host.attribute("dir").as_deref(), Some("rtl"));

        host.emit(&HostEvent::PageChanged(PageChangedEvent { page_id: None }));
        assert_eq!(host.events_named("pageChanged").len(), 1);
        host.clear_events();
        assert!(host.events().is_empty());
    }

    #[test]
    fn test_manager_event_name() {
        let event = ManagerEvent::SettingChanged {
            scope: Scope::User,
            page_id: None,
            change: ChangeEvent {
                path: "preferences.theme".to_string(),
                new_value: json!("dark"),
                old_value: json!("light"),
                inherited: false,
            },
        };
        assert_eq!(event.name(), "preferences.theme");
        assert_eq!(ManagerEvent::PageChanged { page_id: None }.name(), "pageChanged");
    }
}
