//! Native client implementation - wraps the settings manager for in-process calls

use serde_json::Value;
use std::sync::Arc;

use crate::contract::{
    ChangeEvent, ChangeListener, ListenerId, SettingsApi, SettingsError, WriteOptions,
};
use crate::domain::events::ManagerEvent;
use crate::domain::manager::PAGE_CHANGED;
use crate::domain::SettingsManager;

/// Native client that calls the manager directly
#[derive(Clone)]
pub struct NativeClient {
    manager: Arc<SettingsManager>,
}

impl NativeClient {
    pub fn new(manager: Arc<SettingsManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<SettingsManager> {
        &self.manager
    }
}

/// Flatten a manager event into the plain change shape UI collaborators see
fn to_change_event(event: &ManagerEvent) -> ChangeEvent {
    match event {
        ManagerEvent::PageChanged { page_id } => ChangeEvent {
            path: PAGE_CHANGED.to_string(),
            new_value: page_id.clone().map_or(Value::Null, Value::String),
            old_value: Value::Null,
            inherited: false,
        },
        ManagerEvent::SettingChanged { change, .. } => change.clone(),
    }
}

impl SettingsApi for NativeClient {
    fn get(&self, path: &str, page_id: Option<&str>) -> Result<Value, SettingsError> {
        self.manager.get(path, page_id)
    }

    fn set(&self, path: &str, value: Value, options: WriteOptions) -> Result<(), SettingsError> {
        self.manager.set(path, value, options)
    }

    fn subscribe(&self, event: &str, listener: ChangeListener) -> ListenerId {
        self.manager.add_listener(
            event,
            Arc::new(move |event: &ManagerEvent| listener(&to_change_event(event))),
        )
    }

    fn unsubscribe(&self, event: &str, id: ListenerId) -> bool {
        self.manager.remove_listener(event, id)
    }

    fn current_page(&self) -> Option<String> {
        self.manager.current_page()
    }

    fn set_current_page(&self, page_id: Option<&str>) -> Result<(), SettingsError> {
        self.manager.set_current_page(page_id)
    }
}
