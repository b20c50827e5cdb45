//! Configuration for the settings core

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix, e.g. `TECHNO_ETL_SETTINGS_GRID_DEBOUNCE=500ms`
pub const ENV_PREFIX: &str = "TECHNO_ETL_SETTINGS_";

const MIN_SETTINGS_DEBOUNCE: Duration = Duration::from_millis(100);

/// Settings core configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Quiet period before a grid field is persisted
    #[serde(default = "default_grid_debounce", with = "humantime_serde")]
    pub grid_debounce: Duration,

    /// Quiet period before user and page trees are persisted
    #[serde(default = "default_settings_debounce", with = "humantime_serde")]
    pub settings_debounce: Duration,

    /// Page sizes a grid accepts
    #[serde(default = "default_page_size_options")]
    pub page_size_options: Vec<u32>,

    #[serde(default = "default_grid_page_size")]
    pub default_grid_page_size: u32,

    /// Key removed before retrying a failed persistence write
    #[serde(default = "default_scratch_key")]
    pub scratch_key: String,

    /// Mirror the user tree to the unified anonymous key
    #[serde(default = "default_true")]
    pub persist_unified: bool,

    /// Version stamped into the unified key and export envelopes
    #[serde(default = "default_settings_version")]
    pub settings_version: String,

    /// Directory of the file-backed store; in-memory when unset
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grid_debounce: default_grid_debounce(),
            settings_debounce: default_settings_debounce(),
            page_size_options: default_page_size_options(),
            default_grid_page_size: default_grid_page_size(),
            scratch_key: default_scratch_key(),
            persist_unified: true,
            settings_version: default_settings_version(),
            storage_dir: None,
        }
    }
}

impl Config {
    /// Defaults, overlaid by the YAML file at `path` (if it exists), overlaid
    /// by `TECHNO_ETL_SETTINGS_*` environment variables
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Config = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        config.validate()?;
        tracing::debug!(?config, "settings configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.settings_debounce < MIN_SETTINGS_DEBOUNCE {
            anyhow::bail!(
                "settings_debounce must be at least {:?}, got {:?}",
                MIN_SETTINGS_DEBOUNCE,
                self.settings_debounce
            );
        }
        if self.page_size_options.is_empty() {
            anyhow::bail!("page_size_options must not be empty");
        }
        if self.page_size_options.contains(&0) {
            anyhow::bail!("page_size_options must not contain 0");
        }
        if !self.page_size_options.contains(&self.default_grid_page_size) {
            anyhow::bail!(
                "default_grid_page_size {} is not one of page_size_options",
                self.default_grid_page_size
            );
        }
        Ok(())
    }
}

fn default_grid_debounce() -> Duration {
    Duration::from_millis(300)
}

fn default_settings_debounce() -> Duration {
    Duration::from_millis(500)
}

fn default_page_size_options() -> Vec<u32> {
    vec![10, 25, 50, 100, 250, 500, 1000]
}

fn default_grid_page_size() -> u32 {
    25
}

fn default_scratch_key() -> String {
    "techno-etl-scratch".to_string()
}

fn default_true() -> bool {
    true
}

fn default_settings_version() -> String {
    "2.0.0".to_string()
}
