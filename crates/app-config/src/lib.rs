//! Application configuration backed by a JSON file.
//!
//! A single JSON object holds every setting. Values read from disk are
//! merged over in-code defaults, so a missing or corrupt file degrades to
//! the defaults instead of failing startup. Typed accessors cover the
//! settings the application cares about; the generic `get`/`set` surface
//! stays available for everything else.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{json, Map, Value};

/// Settings document persisted as pretty-printed JSON.
pub struct AppConfig {
    path: PathBuf,
    values: Map<String, Value>,
}

fn default_values() -> Map<String, Value> {
    let defaults = json!({
        "app_name": "DeskBase",
        "version": "1.0.0",
        "update_server": "",
        "auto_check_updates": true,
        "update_check_timeout": 10,
        "download_timeout": 300,
        "temp_dir_name": "app_update",
        "skip_duration_days": 30,
    });
    match defaults {
        Value::Object(map) => map,
        _ => unreachable!("defaults literal is an object"),
    }
}

impl AppConfig {
    /// Load the config at `path`, merging persisted values over defaults.
    /// A missing file is normal on first run; a corrupt one is logged and
    /// replaced by defaults in memory.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut values = default_values();

        match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Object(stored)) => {
                    for (key, value) in stored {
                        values.insert(key, value);
                    }
                }
                Ok(_) => {
                    tracing::warn!(path = %path.display(), "config is not a JSON object, using defaults");
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), "unreadable config, using defaults: {err}");
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file yet, using defaults");
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), "failed to read config, using defaults: {err}");
            }
        }

        Self { path, values }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the current document as pretty JSON, creating parent
    /// directories as needed.
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating config directory {}", parent.display()))?;
            }
        }
        let body = serde_json::to_string_pretty(&Value::Object(self.values.clone()))?;
        fs::write(&self.path, body)
            .with_context(|| format!("writing config file {}", self.path.display()))?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.values.get(key).cloned().unwrap_or(default)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    fn str_value(&self, key: &str) -> String {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    fn u64_value(&self, key: &str, default: u64) -> u64 {
        self.values.get(key).and_then(Value::as_u64).unwrap_or(default)
    }

    pub fn app_name(&self) -> String {
        let name = self.str_value("app_name");
        if name.is_empty() {
            "DeskBase".to_string()
        } else {
            name
        }
    }

    pub fn current_version(&self) -> String {
        let version = self.str_value("version");
        if version.is_empty() {
            "1.0.0".to_string()
        } else {
            version
        }
    }

    pub fn set_current_version(&mut self, version: &str) {
        self.set("version", Value::from(version));
    }

    /// Base URL of the update server, without a trailing slash.
    pub fn update_server(&self) -> String {
        self.str_value("update_server")
            .trim_end_matches('/')
            .to_string()
    }

    /// Point at a different update server, dropping any explicit check URL
    /// so it is rebuilt against the new server.
    pub fn set_update_server(&mut self, server: &str) {
        self.set("update_server", Value::from(server));
        self.values.remove("update_check_url");
    }

    /// Endpoint of the version metadata document: an explicitly configured
    /// URL wins, otherwise `<server>/update.json`.
    pub fn update_check_url(&self) -> String {
        let explicit = self.str_value("update_check_url");
        if !explicit.is_empty() {
            return explicit;
        }
        self.update_url("update.json")
    }

    /// Resolve a path against the update server base.
    pub fn update_url(&self, path: &str) -> String {
        let server = self.update_server();
        if server.is_empty() {
            return String::new();
        }
        format!("{server}/{}", path.trim_start_matches('/'))
    }

    pub fn auto_check_updates(&self) -> bool {
        self.values
            .get("auto_check_updates")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    pub fn set_auto_check_updates(&mut self, enabled: bool) {
        self.set("auto_check_updates", Value::from(enabled));
    }

    /// Metadata-fetch timeout in seconds.
    pub fn update_check_timeout(&self) -> u64 {
        self.u64_value("update_check_timeout", 10)
    }

    /// Download connect/read timeout in seconds.
    pub fn download_timeout(&self) -> u64 {
        self.u64_value("download_timeout", 300)
    }

    /// Staging directory name under the system temp dir.
    pub fn temp_dir_name(&self) -> String {
        let name = self.str_value("temp_dir_name");
        if name.is_empty() {
            "app_update".to_string()
        } else {
            name
        }
    }

    /// How long a skipped version stays suppressed.
    pub fn skip_duration_days(&self) -> u32 {
        self.u64_value("skip_duration_days", 30).min(u32::MAX as u64) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = AppConfig::load(dir.path().join("config.json"));
        assert_eq!(config.app_name(), "DeskBase");
        assert_eq!(config.current_version(), "1.0.0");
        assert!(config.auto_check_updates());
        assert_eq!(config.update_check_timeout(), 10);
        assert_eq!(config.download_timeout(), 300);
        assert_eq!(config.temp_dir_name(), "app_update");
        assert_eq!(config.skip_duration_days(), 30);
        assert!(config.update_check_url().is_empty());
    }

    #[test]
    fn stored_values_override_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"app_name": "MyApp", "version": "2.3.4", "auto_check_updates": false}"#,
        )
        .expect("write");

        let config = AppConfig::load(&path);
        assert_eq!(config.app_name(), "MyApp");
        assert_eq!(config.current_version(), "2.3.4");
        assert!(!config.auto_check_updates());
        // Untouched keys keep their defaults.
        assert_eq!(config.skip_duration_days(), 30);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").expect("write");
        let config = AppConfig::load(&path);
        assert_eq!(config.app_name(), "DeskBase");
    }

    #[test]
    fn check_url_defaults_to_update_json_on_the_server() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig::load(dir.path().join("config.json"));
        config.set_update_server("https://updates.example.com/");
        assert_eq!(
            config.update_check_url(),
            "https://updates.example.com/update.json"
        );
        assert_eq!(
            config.update_url("/files/pkg.zip"),
            "https://updates.example.com/files/pkg.zip"
        );
    }

    #[test]
    fn explicit_check_url_wins_until_the_server_changes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig::load(dir.path().join("config.json"));
        config.set_update_server("https://a.example.com");
        config.set("update_check_url", Value::from("https://a.example.com/custom.json"));
        assert_eq!(config.update_check_url(), "https://a.example.com/custom.json");

        config.set_update_server("https://b.example.com");
        assert_eq!(config.update_check_url(), "https://b.example.com/update.json");
    }

    #[test]
    fn save_then_reload_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/config.json");
        let mut config = AppConfig::load(&path);
        config.set_current_version("3.0.0");
        config.set("skipped_versions", serde_json::json!({"2.9.0": 1_700_000_000u64}));
        config.save().expect("save");

        let reloaded = AppConfig::load(&path);
        assert_eq!(reloaded.current_version(), "3.0.0");
        assert_eq!(
            reloaded.get("skipped_versions"),
            Some(serde_json::json!({"2.9.0": 1_700_000_000u64}))
        );
    }
}
