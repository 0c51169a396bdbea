//! Connection settings for an STM-100 session, loaded with Figment.
//!
//! Sources, lowest to highest precedence:
//! 1. Built-in defaults (`9600` baud, `200` ms timeout)
//! 2. The `[stm100]` table of a TOML file (default `config/stm100.toml`)
//! 3. Environment variables prefixed with `STM100_`
//!
//! ```text
//! STM100_PORT=/dev/ttyUSB1
//! STM100_BAUD_RATE=19200
//! STM100_TIMEOUT_MS=500
//! ```
//!
//! ```toml
//! [stm100]
//! port = "ASRL/dev/ttyUSB0::INSTR"
//! baud_rate = 9600
//! timeout_ms = 200
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use daq_core::limits::{DEFAULT_IO_TIMEOUT, MAX_IO_TIMEOUT};
use daq_core::DaqError;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/stm100.toml";

/// Table name in the TOML file and key prefix in the merged configuration.
const PROFILE_KEY: &str = "stm100";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "STM100_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A provider failed or a value had the wrong type.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// An explicitly requested file does not exist.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// Values loaded but are not usable.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for DaqError {
    fn from(err: ConfigError) -> Self {
        DaqError::Config(err.to_string())
    }
}

/// Serial connection settings for one controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stm100Config {
    /// Device path or VISA serial resource (`ASRL/dev/ttyUSB0::INSTR`).
    #[serde(default = "default_port")]
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-call read/write timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_timeout_ms() -> u64 {
    DEFAULT_IO_TIMEOUT.as_millis() as u64
}

impl Default for Stm100Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Stm100Config {
    /// Load from [`DEFAULT_CONFIG_PATH`] if present, then the environment.
    ///
    /// A missing default file is not an error; defaults and environment
    /// variables still apply.
    pub fn load() -> Result<Self, ConfigError> {
        Self::extract(Self::figment(Some(Path::new(DEFAULT_CONFIG_PATH))))
    }

    /// Load from a specific file, then the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if `path` does not exist, and the
    /// load or validation error otherwise.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::extract(Self::figment(Some(path)))
    }

    /// Defaults plus environment only.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::extract(Self::figment(None))
    }

    /// The layered provider chain, exposed so callers can merge further
    /// sources (e.g. command-line overrides) before extraction.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment =
            Figment::new().merge(Serialized::default(PROFILE_KEY, Stm100Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(
            Env::prefixed(ENV_PREFIX).map(|key| format!("{}.{}", PROFILE_KEY, key.as_str()).into()),
        )
    }

    /// Extract the `[stm100]` table from `figment` and validate it.
    pub fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract_inner(PROFILE_KEY)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Port is not empty
    /// - Baud rate is not zero
    /// - Timeout is between 1 ms and 60 s
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "'port' cannot be empty".to_string(),
            ));
        }

        if self.baud_rate == 0 {
            return Err(ConfigError::ValidationError(
                "'baud_rate' must be greater than 0".to_string(),
            ));
        }

        let max_ms = MAX_IO_TIMEOUT.as_millis() as u64;
        if !(1..=max_ms).contains(&self.timeout_ms) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid timeout_ms {}. Must be 1-{}",
                self.timeout_ms, max_ms
            )));
        }

        Ok(())
    }

    /// Per-call timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const ENV_KEYS: [&str; 3] = ["STM100_PORT", "STM100_BAUD_RATE", "STM100_TIMEOUT_MS"];

    fn clear_env() {
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Stm100Config::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.timeout(), Duration::from_millis(200));
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        clear_env();
        let file = write_config(
            r#"
[stm100]
port = "ASRL/dev/ttyUSB3::INSTR"
baud_rate = 19200
"#,
        );

        let config = Stm100Config::load_from(file.path()).unwrap();
        assert_eq!(config.port, "ASRL/dev/ttyUSB3::INSTR");
        assert_eq!(config.baud_rate, 19200);
        assert_eq!(config.timeout_ms, 200);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        clear_env();
        let file = write_config(
            r#"
[stm100]
port = "/dev/ttyUSB0"
timeout_ms = 300
"#,
        );

        std::env::set_var("STM100_PORT", "/dev/ttyS4");
        std::env::set_var("STM100_TIMEOUT_MS", "500");
        let result = Stm100Config::load_from(file.path());
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.port, "/dev/ttyS4");
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.baud_rate, 9600);
    }

    #[test]
    #[serial]
    fn test_zero_timeout_rejected() {
        clear_env();
        let file = write_config(
            r#"
[stm100]
port = "/dev/ttyUSB0"
timeout_ms = 0
"#,
        );

        let err = Stm100Config::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("timeout_ms"));
    }

    #[test]
    #[serial]
    fn test_bad_type_is_load_error() {
        clear_env();
        let file = write_config(
            r#"
[stm100]
baud_rate = "fast"
"#,
        );

        assert!(matches!(
            Stm100Config::load_from(file.path()),
            Err(ConfigError::LoadError(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = Stm100Config::load_from("/nonexistent/stm100.toml").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));

        let daq: DaqError = err.into();
        assert!(matches!(daq, DaqError::Config(_)));
    }

    #[test]
    fn test_validation_rules() {
        let mut config = Stm100Config {
            port: "  ".to_string(),
            ..Stm100Config::default()
        };
        assert!(config.validate().is_err());

        config.port = "/dev/ttyUSB0".to_string();
        config.baud_rate = 0;
        assert!(config.validate().is_err());

        config.baud_rate = 9600;
        config.timeout_ms = 60_001;
        assert!(config.validate().is_err());

        config.timeout_ms = 60_000;
        assert!(config.validate().is_ok());
    }
}
