//! Typed configuration.
//!
//! JSON5 on disk under the user config dir, camelCase keys, defaults for
//! everything so a missing file is a working setup. The CLI reads and
//! writes individual values by dot-notation key.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::captcha::CaptchaSettings;
use crate::classifier::ClassifierConfig;
use crate::driver::webdriver::WebDriverSettings;
use crate::flow::FlowConfig;
use crate::logging::LoggingConfig;
use crate::monitor::MonitorSettings;
use crate::server::ServerConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(String),
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),
}

/// Event-log persistence settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventsConfig {
    /// When set, each run appends its event log to a JSONL file in this
    /// directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub classifier: ClassifierConfig,
    pub monitor: MonitorSettings,
    pub webdriver: WebDriverSettings,
    pub captcha: CaptchaSettings,
    pub flow: FlowConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub events: EventsConfig,
}

/// Default config file path: `<user config dir>/paywatch/config.json5`.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("paywatch")
        .join("config.json5")
}

/// Load configuration from `path`; a missing file yields the defaults.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    json5::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Write configuration to `path` as pretty-printed JSON (valid JSON5).
pub fn save(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }
    let raw =
        serde_json::to_string_pretty(config).map_err(|e| ConfigError::Parse(e.to_string()))?;
    fs::write(path, raw).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a value by dot-notation key (e.g. `monitor.timeoutSeconds`).
pub fn get_value(config: &Config, key: &str) -> Result<Value, ConfigError> {
    let root = serde_json::to_value(config).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let mut node = &root;
    for part in key.split('.') {
        node = node
            .get(part)
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
    }
    Ok(node.clone())
}

/// Set a value by dot-notation key. `value` is parsed as JSON; bare
/// strings are allowed. The key must already exist in the schema.
pub fn set_value(config: &mut Config, key: &str, value: &str) -> Result<(), ConfigError> {
    let parsed: Value =
        serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    let mut root = serde_json::to_value(&config).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let parts: Vec<&str> = key.split('.').collect();
    let (last, path) = parts
        .split_last()
        .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
    let mut node = &mut root;
    for part in path {
        node = node
            .get_mut(*part)
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
    }
    match node {
        Value::Object(map) if map.contains_key(*last) => {
            map.insert((*last).to_string(), parsed);
        }
        _ => return Err(ConfigError::UnknownKey(key.to_string())),
    }

    *config = serde_json::from_value(root).map_err(|e| ConfigError::Parse(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_complete() {
        let config = Config::default();
        assert_eq!(config.monitor.timeout_seconds, 300);
        assert_eq!(config.monitor.poll_interval_ms, 1000);
        assert!(config.classifier.assume_success_on_portal_params);
        assert!(config.events.log_dir.is_none());
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = load(&tmp.path().join("nope.json5")).unwrap();
        assert_eq!(config.monitor.timeout_seconds, 300);
    }

    #[test]
    fn test_json5_partial_override() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json5");
        fs::write(
            &path,
            r#"{
                // local overrides
                monitor: { timeoutSeconds: 120 },
                classifier: { portalDomains: ["portal.example"] },
            }"#,
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.monitor.timeout_seconds, 120);
        assert_eq!(config.classifier.portal_domains, vec!["portal.example"]);
        // Untouched sections keep their defaults.
        assert_eq!(config.monitor.poll_interval_ms, 1000);
    }

    #[test]
    fn test_save_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.json5");

        let mut config = Config::default();
        config.monitor.timeout_seconds = 42;
        save(&config, &path).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.monitor.timeout_seconds, 42);
    }

    #[test]
    fn test_get_value_by_dot_path() {
        let config = Config::default();
        let value = get_value(&config, "monitor.timeoutSeconds").unwrap();
        assert_eq!(value, serde_json::json!(300));
        assert!(get_value(&config, "monitor.nope").is_err());
    }

    #[test]
    fn test_set_value_by_dot_path() {
        let mut config = Config::default();
        set_value(&mut config, "monitor.timeoutSeconds", "90").unwrap();
        assert_eq!(config.monitor.timeout_seconds, 90);

        // Bare strings are accepted without quoting.
        set_value(&mut config, "webdriver.browser", "firefox").unwrap();
        assert_eq!(config.webdriver.browser, "firefox");

        assert!(set_value(&mut config, "monitor.nope", "1").is_err());
        assert!(set_value(&mut config, "nope.deep", "1").is_err());
    }

    #[test]
    fn test_set_value_rejects_wrong_type() {
        let mut config = Config::default();
        let err = set_value(&mut config, "monitor.timeoutSeconds", "\"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
