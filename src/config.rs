use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "POSTS_TUI";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub ui: UIConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    /// Origin of the backend; requests go to `<base_url>/api/...`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout: default_timeout(),
            page_size: default_page_size(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_page_size() -> u32 {
    20
}

fn default_user_agent() -> String {
    format!("posts-tui/{}", crate::VERSION)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    /// `archive` or `carousel`.
    #[serde(default = "default_layout")]
    pub layout: String,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            layout: default_layout(),
        }
    }
}

fn default_layout() -> String {
    "archive".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

fn default_log_level() -> String {
    "posts_tui=info".into()
}

fn default_log_file() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("posts-tui").join("posts-tui.log"))
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = apply_env(cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.api.base_url.is_empty() {
        base.api.base_url = other.api.base_url;
    }
    if !other.api.timeout.is_zero() {
        base.api.timeout = other.api.timeout;
    }
    if other.api.page_size != 0 {
        base.api.page_size = other.api.page_size;
    }
    if !other.api.user_agent.is_empty() {
        base.api.user_agent = other.api.user_agent;
    }

    if !other.ui.layout.is_empty() {
        base.ui.layout = other.ui.layout;
    }

    if !other.log.level.is_empty() {
        base.log.level = other.log.level;
    }
    if other.log.file.is_some() {
        base.log.file = other.log.file;
    }

    base
}

fn apply_env(mut cfg: Config, prefix: &str) -> Config {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }
    cfg
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "api.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.api.timeout = duration;
            }
        }
        "api.page_size" => {
            if let Ok(parsed) = value.parse::<u32>() {
                if parsed > 0 {
                    cfg.api.page_size = parsed;
                }
            }
        }
        "ui.layout" => cfg.ui.layout = value,
        "log.level" => cfg.log.level = value,
        "log.file" => cfg.log.file = Some(PathBuf::from(value)),
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("posts-tui").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_without_files() {
        let dir = tempdir().unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(dir.path().join("missing.yaml")),
            env_prefix: Some("POSTS_TUI_TEST_DEFAULTS".into()),
        })
        .unwrap();
        assert_eq!(cfg.ui.layout, "archive");
        assert_eq!(cfg.api.page_size, 20);
        assert_eq!(cfg.api.base_url, default_base_url());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "api:\n  base_url: https://posts.example.com\n  timeout: 5s\n  page_size: 10\nui:\n  layout: carousel\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("POSTS_TUI_TEST_FILE".into()),
        })
        .unwrap();
        assert_eq!(cfg.api.base_url, "https://posts.example.com");
        assert_eq!(cfg.api.timeout, Duration::from_secs(5));
        assert_eq!(cfg.api.page_size, 10);
        assert_eq!(cfg.ui.layout, "carousel");
    }

    #[test]
    fn env_overrides() {
        env::set_var("POSTS_TUI_TEST_ENV_API__BASE_URL", "http://10.0.0.2:9000");
        env::set_var("POSTS_TUI_TEST_ENV_API__PAGE_SIZE", "0");
        let dir = tempdir().unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(dir.path().join("none.yaml")),
            env_prefix: Some("POSTS_TUI_TEST_ENV".into()),
        })
        .unwrap();
        assert_eq!(cfg.api.base_url, "http://10.0.0.2:9000");
        assert_eq!(cfg.api.page_size, 20);
        env::remove_var("POSTS_TUI_TEST_ENV_API__BASE_URL");
        env::remove_var("POSTS_TUI_TEST_ENV_API__PAGE_SIZE");
    }

    #[test]
    fn unknown_ui_keys_are_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "ui:\n  theme: dark\n  layout: carousel\n").unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("POSTS_TUI_TEST_UNKNOWN".into()),
        })
        .unwrap();
        assert_eq!(cfg.ui, UIConfig { layout: "carousel".into() });
    }
}
