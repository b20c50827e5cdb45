//! Common test utilities: a session fixture over in-memory storage and a
//! recording host, plus event recorders

#![allow(dead_code)]

use parking_lot::Mutex;
use settings_core::contract::ChangeEvent;
use settings_core::domain::events::{ManagerEvent, RecordingHostSurface};
use settings_core::{Config, InMemoryStorage, ObservableSettings, SettingsManager};
use std::sync::{Arc, Once};

static TRACING: Once = Once::new();

/// Install a test-writer subscriber once per binary (`RUST_LOG` filters it)
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn print_test_header(test_name: &str, purpose: &[&str]) {
    init_tracing();
    println!("\n🧪 TEST: {}", test_name);
    if let Some(first) = purpose.first() {
        println!("📋 PURPOSE: {}", first);
    }
    for line in purpose.iter().skip(1) {
        println!("   {}", line);
    }
}

pub fn print_json(label: &str, value: &serde_json::Value) {
    println!("   {}: {}", label, serde_json::to_string_pretty(value).unwrap());
}

/// Manager over fresh in-memory storage and a recording host
pub struct TestSession {
    pub storage: InMemoryStorage,
    pub host: RecordingHostSurface,
    pub manager: Arc<SettingsManager>,
}

impl TestSession {
    pub fn new() -> Self {
        Self::with_storage(InMemoryStorage::new())
    }

    pub fn with_storage(storage: InMemoryStorage) -> Self {
        Self::with_config(storage, Config::default())
    }

    pub fn with_config(storage: InMemoryStorage, config: Config) -> Self {
        let host = RecordingHostSurface::new();
        let manager = SettingsManager::new(
            Arc::new(storage.clone()),
            Arc::new(host.clone()),
            config,
        );
        Self {
            storage,
            host,
            manager: Arc::new(manager),
        }
    }

    /// Session already initialized for `user_id`
    pub fn initialized(user_id: &str) -> Self {
        let session = Self::new();
        session.manager.initialize(user_id);
        session
    }

    pub fn stored(&self, key: &str) -> Option<String> {
        use settings_core::SettingsStorage;
        self.storage.get_item(key).unwrap()
    }

    pub fn stored_json(&self, key: &str) -> Option<serde_json::Value> {
        self.stored(key).map(|raw| serde_json::from_str(&raw).unwrap())
    }
}

impl Default for TestSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Record every event an instance dispatches for `path`
pub fn record_changes(
    settings: &dyn ObservableSettings,
    path: &str,
) -> Arc<Mutex<Vec<ChangeEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    settings.add_listener(
        path,
        Arc::new(move |event: &ChangeEvent| {
            sink.lock().push(event.clone());
            Ok(())
        }),
    );
    seen
}

/// Record every manager event named `event`
pub fn record_manager_events(
    manager: &SettingsManager,
    event: &str,
) -> Arc<Mutex<Vec<ManagerEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    manager.add_listener(
        event,
        Arc::new(move |event: &ManagerEvent| {
            sink.lock().push(event.clone());
            Ok(())
        }),
    );
    seen
}
