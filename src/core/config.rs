use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::error::ConfigError;

const CONFIG_FILE: &str = "config.json";
const APP_DIR: &str = "mcli";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LauncherConfig {
    #[serde(default, alias = "java_runtimes")]
    pub java_runtimes: Vec<String>,
    pub auto_search_java: Option<bool>,
    pub log_filter: Option<String>,
}

/// `$MCLI_HOME/config.json`, else the platform config dir.
pub fn default_config_path() -> PathBuf {
    if let Some(home) = std::env::var_os("MCLI_HOME").filter(|home| !home.is_empty()) {
        return PathBuf::from(home).join(CONFIG_FILE);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join(CONFIG_FILE)
}

pub fn read_config(path: &Path) -> LauncherConfig {
    let Ok(raw) = fs::read_to_string(path) else {
        return LauncherConfig::default();
    };
    serde_json::from_str(&raw).unwrap_or_else(|error| {
        warn!(path = %path.display(), %error, "ignoring unreadable launcher config");
        LauncherConfig::default()
    })
}

pub fn write_config(path: &Path, config: &LauncherConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, serde_json::to_string_pretty(config)?).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Where the list of known-good Java executables lives between runs.
pub trait RuntimeListStore {
    fn load_runtime_paths(&self) -> Vec<String>;
    fn save_runtime_paths(&self, paths: &[String]) -> Result<(), ConfigError>;
}

/// Keeps the runtime list inside the launcher config file.
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> LauncherConfig {
        read_config(&self.path)
    }
}

impl RuntimeListStore for JsonConfigStore {
    fn load_runtime_paths(&self) -> Vec<String> {
        self.config().java_runtimes
    }

    fn save_runtime_paths(&self, paths: &[String]) -> Result<(), ConfigError> {
        let mut config = self.config();
        config.java_runtimes = paths.to_vec();
        write_config(&self.path, &config)
    }
}
