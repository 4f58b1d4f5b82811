//! Application configuration management.
//!
//! Two layers feed the runtime [`Config`]:
//! - `Settings`: optional user preferences stored at
//!   `~/.config/unipass/config.json` (API URL, timeout, credential backend,
//!   last used registration number)
//! - Process environment: `URL_API` supplies the base URL and overrides the
//!   settings file, as do `UNIPASS_TIMEOUT_SECS` and
//!   `UNIPASS_CREDENTIAL_BACKEND`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "unipass";

/// Settings file name
const CONFIG_FILE: &str = "config.json";

/// File name of the file-backed credential store in the cache directory
const CREDENTIALS_FILE: &str = "credentials.json";

/// Keychain service name the token is stored under
pub const DEFAULT_KEYRING_SERVICE: &str = "unipass";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const ENV_API_URL: &str = "URL_API";
pub const ENV_TIMEOUT_SECS: &str = "UNIPASS_TIMEOUT_SECS";
pub const ENV_CREDENTIAL_BACKEND: &str = "UNIPASS_CREDENTIAL_BACKEND";
pub const ENV_STORE_PASSPHRASE: &str = "UNIPASS_STORE_PASSPHRASE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No API base URL configured - set URL_API or api_url in config.json")]
    MissingApiUrl,

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Could not find {0} directory")]
    NoDirectory(&'static str),

    #[error("Failed to access settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Where the session token is persisted between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    /// OS keychain
    #[default]
    Keyring,
    /// JSON file in the cache directory, sealed when a passphrase is set
    File,
    /// Process memory only; nothing survives a restart
    Memory,
}

impl FromStr for CredentialBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" => Ok(Self::Keyring),
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            _ => Err(ConfigError::InvalidValue {
                key: ENV_CREDENTIAL_BACKEND,
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for CredentialBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Keyring => "keyring",
            Self::File => "file",
            Self::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// User preferences persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_backend: Option<CredentialBackend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_identifier: Option<String>,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::settings_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::settings_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn settings_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoDirectory("config"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }
}

/// Resolved runtime configuration.
#[derive(Clone)]
pub struct Config {
    /// Base URL of the remote auth service, without a trailing slash
    pub api_url: String,
    pub request_timeout: Duration,
    pub credential_backend: CredentialBackend,
    pub keyring_service: String,
    /// Location of the file-backed credential store
    pub credentials_path: PathBuf,
    /// Passphrase sealing entries of the file-backed store
    pub store_passphrase: Option<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_url", &self.api_url)
            .field("request_timeout", &self.request_timeout)
            .field("credential_backend", &self.credential_backend)
            .field("keyring_service", &self.keyring_service)
            .field("credentials_path", &self.credentials_path)
            .field("store_passphrase", &self.store_passphrase.as_ref().map(|_| "<set>"))
            .finish()
    }
}

impl Config {
    /// Resolve configuration from the settings file and the process environment.
    pub fn from_env(settings: &Settings) -> Result<Self, ConfigError> {
        let cache_dir = dirs::cache_dir().ok_or(ConfigError::NoDirectory("cache"))?;
        Self::from_sources(settings, &cache_dir.join(APP_NAME), |key| {
            std::env::var(key).ok()
        })
    }

    /// Resolve configuration with an explicit environment lookup.
    ///
    /// Environment values win over settings; empty values count as unset.
    pub fn from_sources<F>(settings: &Settings, cache_dir: &Path, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let api_url = env(ENV_API_URL)
            .or_else(|| settings.api_url.clone())
            .map(|url| normalize_base_url(&url))
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::MissingApiUrl)?;

        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key: ENV_API_URL,
                value: api_url,
            });
        }

        let timeout_secs = match env(ENV_TIMEOUT_SECS) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: ENV_TIMEOUT_SECS,
                        value: raw,
                    })
                }
            },
            None => settings
                .request_timeout_secs
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        };

        let credential_backend = match env(ENV_CREDENTIAL_BACKEND) {
            Some(raw) => raw.parse()?,
            None => settings.credential_backend.unwrap_or_default(),
        };

        Ok(Self {
            api_url,
            request_timeout: Duration::from_secs(timeout_secs),
            credential_backend,
            keyring_service: DEFAULT_KEYRING_SERVICE.to_string(),
            credentials_path: cache_dir.join(CREDENTIALS_FILE),
            store_passphrase: env(ENV_STORE_PASSPHRASE),
        })
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_api_url_from_env_is_normalized() {
        let config = Config::from_sources(
            &Settings::default(),
            Path::new("/tmp/unipass"),
            env_of(&[(ENV_API_URL, " https://api.example.edu/v1/ ")]),
        )
        .unwrap();

        assert_eq!(config.api_url, "https://api.example.edu/v1");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.credential_backend, CredentialBackend::Keyring);
        assert_eq!(config.credentials_path, Path::new("/tmp/unipass/credentials.json"));
        assert!(config.store_passphrase.is_none());
    }

    #[test]
    fn test_missing_api_url_is_an_error() {
        let result = Config::from_sources(&Settings::default(), Path::new("/tmp"), env_of(&[]));
        assert!(matches!(result, Err(ConfigError::MissingApiUrl)));

        // Empty env value counts as unset
        let result = Config::from_sources(
            &Settings::default(),
            Path::new("/tmp"),
            env_of(&[(ENV_API_URL, "  ")]),
        );
        assert!(matches!(result, Err(ConfigError::MissingApiUrl)));
    }

    #[test]
    fn test_env_overrides_settings() {
        let settings = Settings {
            api_url: Some("https://from-file.example".to_string()),
            request_timeout_secs: Some(5),
            credential_backend: Some(CredentialBackend::File),
            last_identifier: None,
        };

        let from_file =
            Config::from_sources(&settings, Path::new("/tmp"), env_of(&[])).unwrap();
        assert_eq!(from_file.api_url, "https://from-file.example");
        assert_eq!(from_file.request_timeout, Duration::from_secs(5));
        assert_eq!(from_file.credential_backend, CredentialBackend::File);

        let overridden = Config::from_sources(
            &settings,
            Path::new("/tmp"),
            env_of(&[
                (ENV_API_URL, "http://localhost:3000"),
                (ENV_TIMEOUT_SECS, "12"),
                (ENV_CREDENTIAL_BACKEND, "Memory"),
                (ENV_STORE_PASSPHRASE, "hunter2"),
            ]),
        )
        .unwrap();
        assert_eq!(overridden.api_url, "http://localhost:3000");
        assert_eq!(overridden.request_timeout, Duration::from_secs(12));
        assert_eq!(overridden.credential_backend, CredentialBackend::Memory);
        assert_eq!(overridden.store_passphrase.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let bad_timeout = Config::from_sources(
            &Settings::default(),
            Path::new("/tmp"),
            env_of(&[(ENV_API_URL, "https://x.example"), (ENV_TIMEOUT_SECS, "0")]),
        );
        assert!(matches!(
            bad_timeout,
            Err(ConfigError::InvalidValue { key: ENV_TIMEOUT_SECS, .. })
        ));

        let bad_backend = Config::from_sources(
            &Settings::default(),
            Path::new("/tmp"),
            env_of(&[(ENV_API_URL, "https://x.example"), (ENV_CREDENTIAL_BACKEND, "vault")]),
        );
        assert!(bad_backend.is_err());

        let bad_scheme = Config::from_sources(
            &Settings::default(),
            Path::new("/tmp"),
            env_of(&[(ENV_API_URL, "undefined")]),
        );
        assert!(matches!(bad_scheme, Err(ConfigError::InvalidValue { key: ENV_API_URL, .. })));
    }

    #[test]
    fn test_settings_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        // Missing file loads defaults
        assert_eq!(Settings::load_from(&path).unwrap(), Settings::default());

        let settings = Settings {
            last_identifier: Some("A000123".to_string()),
            ..Settings::default()
        };
        settings.save_to(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("last_identifier"));
        assert!(!contents.contains("api_url"));
        assert_eq!(Settings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn test_debug_hides_passphrase() {
        let config = Config::from_sources(
            &Settings::default(),
            Path::new("/tmp"),
            env_of(&[(ENV_API_URL, "https://x.example"), (ENV_STORE_PASSPHRASE, "s3cret")]),
        )
        .unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<set>"));
    }
}
