//! E2EE configuration.
//!
//! Configuration can be loaded from:
//! - A TOML file (`$CHATAPP_CONFIG`, else `~/.config/chatapp/e2ee.toml`)
//! - Environment variables (`CHATAPP_*` prefixed)
//!
//! # Example
//!
//! ```rust,no_run
//! use chatapp_e2ee::config::E2eeConfig;
//!
//! // Load from the config file or fall back to env vars
//! let config = E2eeConfig::load().expect("Failed to load config");
//!
//! // Or explicitly from a file
//! let config = E2eeConfig::from_file(std::path::Path::new("e2ee.toml")).expect("Failed to load");
//!
//! // Or from environment variables
//! let config = E2eeConfig::from_env();
//! ```
//!
//! ```toml
//! [directory]
//! base_url = "https://chat.example.com"
//! api_prefix = "/api"
//! auth_token = "${CHATAPP_TOKEN}"
//!
//! [kdf]
//! pbkdf2_iterations = 200000
//!
//! [store]
//! dir = "/var/lib/chatapp/keys"
//! persist_identity = true
//!
//! [key_wait]
//! attempts = 5
//! delay_ms = 200
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use chatapp_crypto::DEFAULT_PBKDF2_ITERATIONS;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "CHATAPP_CONFIG";

/// Lowest PBKDF2 iteration count accepted from configuration.
pub const MIN_PBKDF2_ITERATIONS: u32 = 1_000;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Key directory (REST API) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Server base URL.
    pub base_url: String,
    /// Path prefix in front of every `/keys/...` route.
    pub api_prefix: String,
    /// Bearer token sent with every request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_prefix: "/api".to_string(),
            auth_token: None,
            timeout_secs: 30,
        }
    }
}

impl DirectoryConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.base_url.is_empty() {
            return Err(ConfigError::Validation(
                "directory base_url cannot be empty".to_string(),
            ));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "directory base_url must start with http:// or https://, got: {}",
                self.base_url
            )));
        }

        if !self.api_prefix.is_empty() && !self.api_prefix.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "directory api_prefix must be empty or start with '/', got: {}",
                self.api_prefix
            )));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "directory timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Password key-derivation settings for newly created identities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// PBKDF2-HMAC-SHA256 iteration count.
    pub pbkdf2_iterations: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
        }
    }
}

/// Durable key store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory for per-user key files. `None` uses the platform data dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Whether the unlocked identity key is mirrored (encrypted) to disk at login.
    pub persist_identity: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: None,
            persist_identity: true,
        }
    }
}

impl StoreConfig {
    /// Resolve the store root: the configured dir or `<data_dir>/chatapp/keys`.
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from(".local/share"));
            path.push("chatapp");
            path.push("keys");
            path
        })
    }
}

/// How long consumers wait for the identity key to be unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyWaitConfig {
    /// Number of polling intervals.
    pub attempts: u32,
    /// Length of each interval in milliseconds.
    pub delay_ms: u64,
}

impl Default for KeyWaitConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay_ms: 200,
        }
    }
}

impl KeyWaitConfig {
    /// Total wait bound: `attempts * delay_ms`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.delay_ms.saturating_mul(u64::from(self.attempts)))
    }
}

/// Main E2EE configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct E2eeConfig {
    /// Key directory client settings.
    pub directory: DirectoryConfig,
    /// Password KDF settings.
    pub kdf: KdfConfig,
    /// Durable store settings.
    pub store: StoreConfig,
    /// Identity-key wait bound.
    pub key_wait: KeyWaitConfig,
}

impl E2eeConfig {
    /// Get the default config file path.
    ///
    /// Returns: ~/.config/chatapp/e2ee.toml
    pub fn default_config_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        path.push("chatapp");
        path.push("e2ee.toml");
        path
    }

    /// Load configuration from `$CHATAPP_CONFIG` or the default path, falling
    /// back to environment variables when no file exists.
    pub fn load() -> ConfigResult<Self> {
        let path = env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_config_path);

        if path.exists() {
            info!("Loading e2ee config from: {}", path.display());
            Self::from_file(&path)
        } else {
            debug!(
                "Config file not found at {}, using environment variables",
                path.display()
            );
            let config = Self::from_env();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text, substituting `${VAR}` references.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let content = Self::substitute_env_vars(content);
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            directory: DirectoryConfig {
                base_url: lookup("CHATAPP_DIRECTORY_URL").unwrap_or(defaults.directory.base_url),
                api_prefix: lookup("CHATAPP_API_PREFIX").unwrap_or(defaults.directory.api_prefix),
                auth_token: lookup("CHATAPP_AUTH_TOKEN").filter(|t| !t.is_empty()),
                timeout_secs: parse_var(&lookup, "CHATAPP_DIRECTORY_TIMEOUT")
                    .unwrap_or(defaults.directory.timeout_secs),
            },
            kdf: KdfConfig {
                pbkdf2_iterations: parse_var(&lookup, "CHATAPP_PBKDF2_ITERATIONS")
                    .unwrap_or(defaults.kdf.pbkdf2_iterations),
            },
            store: StoreConfig {
                dir: lookup("CHATAPP_KEY_STORE_DIR").map(PathBuf::from),
                persist_identity: lookup("CHATAPP_PERSIST_IDENTITY")
                    .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                    .unwrap_or(defaults.store.persist_identity),
            },
            key_wait: KeyWaitConfig {
                attempts: parse_var(&lookup, "CHATAPP_KEY_WAIT_ATTEMPTS").unwrap_or(defaults.key_wait.attempts),
                delay_ms: parse_var(&lookup, "CHATAPP_KEY_WAIT_DELAY_MS").unwrap_or(defaults.key_wait.delay_ms),
            },
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.directory.validate()?;

        if self.kdf.pbkdf2_iterations < MIN_PBKDF2_ITERATIONS {
            return Err(ConfigError::Validation(format!(
                "kdf pbkdf2_iterations must be at least {}, got {}",
                MIN_PBKDF2_ITERATIONS, self.kdf.pbkdf2_iterations
            )));
        }

        if self.key_wait.attempts == 0 {
            return Err(ConfigError::Validation(
                "key_wait attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Substitute environment variables in the format ${VAR_NAME}.
    fn substitute_env_vars(content: &str) -> String {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let re = PATTERN.get_or_init(|| {
            Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static pattern compiles")
        });
        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .to_string()
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name).and_then(|v| v.trim().parse().ok())
}
