//! Configuration management for kserve.
//!
//! Parses `kserve.toml` configuration files with serde and provides
//! auto-discovery of config files in parent directories.
//!
//! CLI settings can be applied during load via [`CliSettings`].
//!
//! ## Environment Variable Expansion
//!
//! `server.host` supports environment variable expansion:
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//!
//! ## Example
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 1234
//!
//! [reload]
//! cooldown_ms = 250
//! watch = ["index.html", "build/app.wasm"]
//! ```

mod expand;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI settings that override configuration file values.
///
/// Scalar fields override only when set. Watch paths are appended to those
/// from the file and should already be absolute.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override server host.
    pub host: Option<String>,
    /// Override server port.
    pub port: Option<u16>,
    /// Override reload cool-down in milliseconds.
    pub cooldown_ms: Option<u64>,
    /// Additional files to watch.
    pub watch: Vec<PathBuf>,
}

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "kserve.toml";

/// Default reload cool-down in milliseconds.
const DEFAULT_COOLDOWN_MS: u64 = 250;

/// Upper bound for the reload cool-down.
const MAX_COOLDOWN_MS: u64 = 10_000;

/// Application configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Reload configuration (watch paths are relative strings from TOML).
    reload: ReloadConfigRaw,

    /// Resolved reload configuration (set after loading).
    #[serde(skip)]
    pub reload_resolved: ReloadConfig,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

/// Server configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 1234,
        }
    }
}

/// Raw reload configuration as parsed from TOML (paths as strings).
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ReloadConfigRaw {
    cooldown_ms: Option<u64>,
    watch: Option<Vec<String>>,
}

/// Resolved reload configuration with absolute paths.
#[derive(Debug)]
pub struct ReloadConfig {
    /// Quiet period in milliseconds before a reload is broadcast.
    pub cooldown_ms: u64,
    /// Files to watch.
    pub watch: Vec<PathBuf>,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            watch: Vec::new(),
        }
    }
}

impl ReloadConfig {
    /// Cool-down as a [`Duration`].
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`server.host`").
        field: String,
        /// Error message (e.g., "${`KSERVE_HOST`} not set").
        message: String,
    },
}

/// Require a string field to be non-empty.
fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file.
    /// Otherwise, searches for `kserve.toml` in current directory and parents.
    ///
    /// CLI settings are applied after loading and path resolution, allowing CLI
    /// arguments to take precedence over config file values. Validation runs
    /// once, on the merged result.
    ///
    /// # Errors
    ///
    /// Returns error if explicit `config_path` doesn't exist, parsing fails, or
    /// the result does not validate.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)?
        } else {
            Self::default()
        };

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
        }
        config.validate()?;

        Ok(config)
    }

    /// Apply CLI settings to the configuration.
    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(host) = &settings.host {
            self.server.host.clone_from(host);
        }
        if let Some(port) = settings.port {
            self.server.port = port;
        }
        if let Some(cooldown_ms) = settings.cooldown_ms {
            self.reload_resolved.cooldown_ms = cooldown_ms;
        }
        self.reload_resolved
            .watch
            .extend(settings.watch.iter().cloned());
    }

    /// Search for config file in current directory and parents.
    fn discover_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        // Expand environment variables before validation
        config.server.host = expand::expand_env(&config.server.host, "server.host")?;

        let config_dir = path.parent().unwrap_or(Path::new("."));
        config.resolve_paths(config_dir);
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty(&self.server.host, "server.host")?;

        // Port 0 is technically valid (OS assigns a random port), but the
        // browser client needs a known port to connect to
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server.port cannot be 0".to_owned(),
            ));
        }

        let cooldown_ms = self.reload_resolved.cooldown_ms;
        if cooldown_ms == 0 {
            return Err(ConfigError::Validation(
                "reload.cooldown_ms must be greater than 0".to_owned(),
            ));
        }
        if cooldown_ms > MAX_COOLDOWN_MS {
            return Err(ConfigError::Validation(format!(
                "reload.cooldown_ms cannot exceed {MAX_COOLDOWN_MS}"
            )));
        }

        Ok(())
    }

    /// Resolve relative watch paths against the config directory.
    fn resolve_paths(&mut self, config_dir: &Path) {
        self.reload_resolved = ReloadConfig {
            cooldown_ms: self.reload.cooldown_ms.unwrap_or(DEFAULT_COOLDOWN_MS),
            watch: self
                .reload
                .watch
                .iter()
                .flatten()
                .map(|p| config_dir.join(p))
                .collect(),
        };
    }
}
