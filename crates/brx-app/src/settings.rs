//! Settings parser for .brx/config.toml

use std::path::Path;
use std::time::Duration;

use brx_core::prelude::*;
use serde::{Deserialize, Serialize};

const CONFIG_FILENAME: &str = "config.toml";
const BRX_DIR: &str = ".brx";

/// Project-local settings (.brx/config.toml)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub device: DeviceSettings,

    #[serde(default)]
    pub build: BuildSettings,

    #[serde(default)]
    pub watcher: WatcherSettings,
}

/// Target device settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceSettings {
    /// Device resolved when none is given on the command line
    #[serde(default = "default_device_name")]
    pub default_name: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            default_name: default_device_name(),
        }
    }
}

/// Build tool settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BuildSettings {
    #[serde(default = "default_configuration")]
    pub configuration: String,

    /// Upper bound for one build tool invocation
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Open Xcode and wait for the operator when no signing identity exists
    #[serde(default = "default_true")]
    pub interactive_signing: bool,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            configuration: default_configuration(),
            timeout_secs: default_timeout_secs(),
            interactive_signing: true,
        }
    }
}

impl BuildSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// File watcher settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WatcherSettings {
    /// Paths to watch (relative to project root)
    #[serde(default = "default_watch_paths")]
    pub paths: Vec<String>,

    /// Minimum time between two dispatched reloads
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,

    /// Extensions whose change requires a rebuild
    #[serde(default = "default_code_extensions")]
    pub code_extensions: Vec<String>,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            paths: default_watch_paths(),
            throttle_ms: default_throttle_ms(),
            code_extensions: default_code_extensions(),
        }
    }
}

fn default_device_name() -> String {
    "iPhone 17 Pro Max".to_string()
}

fn default_configuration() -> String {
    "Debug".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_watch_paths() -> Vec<String> {
    vec!["Sources".to_string(), "Resources".to_string()]
}

fn default_throttle_ms() -> u64 {
    500
}

fn default_code_extensions() -> Vec<String> {
    ["swift", "m", "mm", "h"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

/// Load settings from .brx/config.toml
///
/// Returns default settings if file doesn't exist or can't be parsed.
pub fn load_settings(project_path: &Path) -> Settings {
    let config_path = project_path.join(BRX_DIR).join(CONFIG_FILENAME);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_settings_defaults() {
        let temp = tempdir().unwrap();
        let settings = load_settings(temp.path());

        assert_eq!(settings.device.default_name, "iPhone 17 Pro Max");
        assert_eq!(settings.build.configuration, "Debug");
        assert_eq!(settings.build.timeout(), Duration::from_secs(300));
        assert!(settings.build.interactive_signing);
        assert_eq!(settings.watcher.paths, vec!["Sources", "Resources"]);
        assert_eq!(settings.watcher.throttle_ms, 500);
        assert_eq!(
            settings.watcher.code_extensions,
            vec!["swift", "m", "mm", "h"]
        );
    }

    #[test]
    fn test_load_settings_custom() {
        let temp = tempdir().unwrap();
        let brx_dir = temp.path().join(".brx");
        std::fs::create_dir_all(&brx_dir).unwrap();

        let config = r#"
[device]
default_name = "iPhone 15"

[build]
configuration = "Release"
interactive_signing = false

[watcher]
throttle_ms = 1000
"#;
        std::fs::write(brx_dir.join("config.toml"), config).unwrap();

        let settings = load_settings(temp.path());

        assert_eq!(settings.device.default_name, "iPhone 15");
        assert_eq!(settings.build.configuration, "Release");
        assert_eq!(settings.build.timeout_secs, 300);
        assert!(!settings.build.interactive_signing);
        assert_eq!(settings.watcher.throttle_ms, 1000);
        assert_eq!(settings.watcher.paths, vec!["Sources", "Resources"]);
    }

    #[test]
    fn test_load_settings_invalid_toml() {
        let temp = tempdir().unwrap();
        let brx_dir = temp.path().join(".brx");
        std::fs::create_dir_all(&brx_dir).unwrap();
        std::fs::write(brx_dir.join("config.toml"), "this is not [valid toml").unwrap();

        assert_eq!(load_settings(temp.path()), Settings::default());
    }
}
