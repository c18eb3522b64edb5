//! Configuration management for seqacquire.
//!
//! Settings are resolved in layers: built-in defaults, then a config file
//! (TOML or JSON), then environment variables (a `.env` file is loaded by
//! `main` before anything else).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::RetryPolicy;

/// Default Graph API base URL.
pub const DEFAULT_API_URL: &str = "https://graph.mapillary.com";

/// Config file name looked up in the working directory and the user config dir.
pub const CONFIG_FILENAME: &str = "seqacquire.toml";

/// Environment variable holding the API access token.
pub const ACCESS_TOKEN_ENV: &str = "MAPILLARY_ACCESS_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("No access token configured (set MAPILLARY_ACCESS_TOKEN or `access_token`)")]
    MissingAccessToken,
    #[error("Invalid setting '{key}': {message}")]
    Invalid { key: &'static str, message: String },
}

/// Resolved application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Graph API base URL.
    pub api_url: String,
    /// API access token (sent as `Authorization: OAuth <token>`).
    pub access_token: String,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    /// Listing page size (`limit` query parameter).
    pub page_size: u32,
    /// Delay between listing pages in milliseconds.
    pub page_delay_ms: u64,
    /// Delay between images of a sequence in milliseconds.
    pub image_delay_ms: u64,
    /// Delay between sequences of a batch in milliseconds.
    pub sequence_delay_ms: u64,
    /// Download attempts per image payload.
    pub max_retries: u32,
    /// Base backoff delay in milliseconds (doubles per attempt).
    pub retry_base_delay_ms: u64,
    /// Root directory for downloaded sequences.
    pub download_dir: PathBuf,
    /// Directory for per-run log files.
    pub log_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            access_token: String::new(),
            request_timeout: 30,
            page_size: 100,
            page_delay_ms: 500,
            image_delay_ms: 500,
            sequence_delay_ms: 1000,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            download_dir: PathBuf::from("downloads"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl Settings {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn image_delay(&self) -> Duration {
        Duration::from_millis(self.image_delay_ms)
    }

    pub fn sequence_delay(&self) -> Duration {
        Duration::from_millis(self.sequence_delay_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    /// Fail before any network activity if credentials are missing.
    pub fn require_access_token(&self) -> Result<&str, ConfigError> {
        let token = self.access_token.trim();
        if token.is_empty() {
            Err(ConfigError::MissingAccessToken)
        } else {
            Ok(token)
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "page_size",
                message: "must be at least 1".to_string(),
            });
        }
        if self.request_timeout == 0 {
            return Err(ConfigError::Invalid {
                key: "request_timeout",
                message: "must be at least 1 second".to_string(),
            });
        }
        url::Url::parse(&self.api_url).map_err(|e| ConfigError::Invalid {
            key: "api_url",
            message: e.to_string(),
        })?;
        Ok(())
    }
}

/// On-disk configuration. Every field is optional; unset fields keep defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_base_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Path the config was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a specific file path.
    /// `.json` files are parsed as JSON, everything else as TOML.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

        let mut config: Config = match ext {
            "json" => serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?,
            _ => toml::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref url) = self.api_url {
            settings.api_url = url.clone();
        }
        if let Some(ref token) = self.access_token {
            settings.access_token = token.clone();
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(size) = self.page_size {
            settings.page_size = size;
        }
        if let Some(delay) = self.page_delay_ms {
            settings.page_delay_ms = delay;
        }
        if let Some(delay) = self.image_delay_ms {
            settings.image_delay_ms = delay;
        }
        if let Some(delay) = self.sequence_delay_ms {
            settings.sequence_delay_ms = delay;
        }
        if let Some(retries) = self.max_retries {
            settings.max_retries = retries;
        }
        if let Some(delay) = self.retry_base_delay_ms {
            settings.retry_base_delay_ms = delay;
        }
        if let Some(ref dir) = self.download_dir {
            settings.download_dir = self.resolve_path(dir, base_dir);
        }
        if let Some(ref dir) = self.log_dir {
            settings.log_dir = self.resolve_path(dir, base_dir);
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
}

/// Find a config file: working directory first, then the user config dir.
fn discover_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILENAME);
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|d| d.join("seqacquire").join(CONFIG_FILENAME))
        .filter(|p| p.is_file())
}

/// Environment overrides, highest precedence.
fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

    if let Some(token) = get(ACCESS_TOKEN_ENV) {
        tracing::debug!("Using access token from {}", ACCESS_TOKEN_ENV);
        settings.access_token = token;
    }
    if let Some(url) = get("SEQACQUIRE_API_URL") {
        tracing::debug!("Using SEQACQUIRE_API_URL from environment: {}", url);
        settings.api_url = url;
    }
    if let Some(dir) = get("SEQACQUIRE_DOWNLOAD_DIR") {
        settings.download_dir = PathBuf::from(shellexpand::tilde(&dir).as_ref());
    }
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub fn load_settings_with_options(options: LoadOptions) -> Result<(Settings, Config), ConfigError> {
    let config_path = options.config_path.or_else(discover_config_path);

    let config = match config_path {
        Some(ref path) => {
            tracing::debug!("Loading config from {}", path.display());
            Config::load_from_path(path)?
        }
        None => Config::default(),
    };

    let mut settings = Settings::default();
    let base_dir = config
        .base_dir()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    config.apply_to_settings(&mut settings, &base_dir);
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.validate()?;

    Ok((settings, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.api_url, DEFAULT_API_URL);
        assert_eq!(settings.page_size, 100);
        assert_eq!(settings.page_delay(), Duration::from_millis(500));
        assert_eq!(settings.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn test_missing_token_is_error() {
        let settings = Settings::default();
        assert!(matches!(
            settings.require_access_token(),
            Err(ConfigError::MissingAccessToken)
        ));
    }

    #[test]
    fn test_load_toml_and_resolve_relative_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seqacquire.toml");
        std::fs::write(
            &path,
            "access_token = \"abc\"\npage_size = 50\ndownload_dir = \"out\"\n",
        )
        .unwrap();

        let (settings, config) = load_settings_with_options(LoadOptions {
            config_path: Some(path.clone()),
        })
        .unwrap();

        assert_eq!(config.source_path.as_deref(), Some(path.as_path()));
        assert_eq!(settings.page_size, 50);
        assert_eq!(settings.download_dir, dir.path().join("out"));
        // Env may override the token on developer machines; the file value
        // must at least have been parsed.
        assert_eq!(config.access_token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_load_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"api_url": "http://localhost:9000", "max_retries": 5}"#)
            .unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.api_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.max_retries, Some(5));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seqacquire.toml");
        std::fs::write(&path, "acess_token = \"typo\"\n").unwrap();

        assert!(matches!(
            Config::load_from_path(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides_win() {
        let mut settings = Settings::default();
        let env: HashMap<&str, &str> = [
            (ACCESS_TOKEN_ENV, "from-env"),
            ("SEQACQUIRE_API_URL", "http://127.0.0.1:1234"),
            ("SEQACQUIRE_DOWNLOAD_DIR", "   "),
        ]
        .into_iter()
        .collect();

        apply_env_overrides(&mut settings, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(settings.access_token, "from-env");
        assert_eq!(settings.api_url, "http://127.0.0.1:1234");
        assert_eq!(settings.download_dir, PathBuf::from("downloads"));
    }

    #[test]
    fn test_validate_rejects_zero_page_size() {
        let settings = Settings {
            page_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { key: "page_size", .. })
        ));
    }
}
