use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// HTTP base of a running browser's DevTools endpoint.
    #[serde(default = "default_devtools_url")]
    pub devtools_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// How long to wait for the DevTools endpoint to answer before giving up.
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    /// Per-command CDP response timeout.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_devtools_url() -> String {
    "http://127.0.0.1:9222".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36".to_string()
}

fn default_ready_timeout_secs() -> u64 {
    15
}

fn default_command_timeout_secs() -> u64 {
    30
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            devtools_url: default_devtools_url(),
            user_agent: default_user_agent(),
            ready_timeout_secs: default_ready_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RulesConfig {
    /// Explicit rule document path. When unset the executable directory and then
    /// the data directory are searched for `rules.json`.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Settle time after navigation when a request omits `wait_time`.
    #[serde(default = "default_wait_time_ms")]
    pub default_wait_time_ms: u64,
    /// Upper bound for one whole page session (navigation, consent, extraction).
    #[serde(default = "default_page_timeout_secs")]
    pub page_timeout_secs: u64,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

fn default_wait_time_ms() -> u64 {
    1000
}

fn default_page_timeout_secs() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            default_wait_time_ms: default_wait_time_ms(),
            page_timeout_secs: default_page_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Where the consent rule document is read from.
    pub fn rules_path(&self, paths: &Paths) -> PathBuf {
        if let Some(path) = self.rules.path.as_ref() {
            let path = path.trim();
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }
        if let Some(beside_exe) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("rules.json")))
        {
            if beside_exe.exists() {
                return beside_exe;
            }
        }
        paths.rules_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_sections_missing() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.browser.devtools_url, "http://127.0.0.1:9222");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.default_wait_time_ms, 1000);
        assert!(cfg.rules.path.is_none());
    }

    #[test]
    fn test_camel_case_fields() {
        let raw = r#"{
  "browser": { "devtoolsUrl": "http://10.0.0.2:9333", "commandTimeoutSecs": 5 },
  "server": { "port": 9090, "pageTimeoutSecs": 20 }
}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.browser.devtools_url, "http://10.0.0.2:9333");
        assert_eq!(cfg.browser.command_timeout_secs, 5);
        assert_eq!(cfg.browser.ready_timeout_secs, 15);
        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.server.page_timeout_secs, 20);
        assert_eq!(cfg.server.host, "127.0.0.1");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut cfg = Config::default();
        cfg.rules.path = Some("/etc/pagescout/rules.json".to_string());
        cfg.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.rules.path.as_deref(), Some("/etc/pagescout/rules.json"));
    }

    #[test]
    fn test_rules_path_prefers_explicit_setting() {
        let paths = Paths::with_base(PathBuf::from("/tmp/pagescout-test"));
        let mut cfg = Config::default();
        cfg.rules.path = Some("  /srv/rules.json ".to_string());
        assert_eq!(cfg.rules_path(&paths), PathBuf::from("/srv/rules.json"));
    }
}
