//! Daemon configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use wishring_core::uuids::DEVICE_NAME_PREFIXES;
use wishring_core::{
    DeviceFilter, EngineConfig, LinkConfig, ReconnectOptions, ResetPolicy,
    reconnect::{INITIAL_RECONNECT_DELAY, MAX_RECONNECT_DELAY, RETRY_ATTEMPTS},
};
use wishring_types::{DEFAULT_TARGET_COUNT, DEFAULT_WISH_TEXT, MAX_DAILY_COUNT, MAX_WISH_TEXT_LEN};

/// Daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which ring to connect to.
    pub device: DeviceConfig,
    /// Link timeouts and retry policy.
    pub link: LinkSettings,
    /// Counter defaults.
    pub counter: CounterConfig,
    /// Storage settings.
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from the default path, or defaults if it is absent.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate every section, collecting all problems.
    ///
    /// ```
    /// use wishring_service::Config;
    ///
    /// Config::default().validate().expect("defaults are valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.device.validate());
        errors.extend(self.link.validate());
        errors.extend(self.counter.validate());
        errors.extend(self.storage.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Link settings for the core crate.
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig::default()
            .filter(self.device.filter())
            .scan_timeout(Duration::from_secs(self.link.scan_timeout_secs))
            .connection_timeout(Duration::from_secs(self.link.connection_timeout_secs))
            .discovery_timeout(Duration::from_secs(self.link.discovery_timeout_secs))
            .reconnect(self.link.reconnect_options())
    }

    /// Engine settings for the core crate.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            default_wish_text: self.counter.default_wish_text.clone(),
            default_target: self.counter.default_target_count,
            max_daily_count: self.counter.max_daily_count,
            reset_policy: self.counter.reset_policy,
            reset_retention: time::Duration::days(i64::from(self.storage.reset_retention_days)),
        }
    }
}

/// Ring selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Address (or CoreBluetooth UUID on macOS) of a specific ring.
    pub address: Option<String>,
    /// Advertising name prefixes that identify a ring.
    pub name_prefixes: Vec<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: None,
            name_prefixes: DEVICE_NAME_PREFIXES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl DeviceConfig {
    pub fn filter(&self) -> DeviceFilter {
        let filter = DeviceFilter::default().name_prefixes(self.name_prefixes.iter().cloned());
        match &self.address {
            Some(address) => filter.address(address.clone()),
            None => filter,
        }
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(address) = &self.address
            && address.trim().is_empty()
        {
            errors.push(ValidationError::new(
                "device.address",
                "address cannot be empty string (omit it to accept any ring)",
            ));
        }
        if self.name_prefixes.is_empty() {
            errors.push(ValidationError::new(
                "device.name_prefixes",
                "at least one name prefix is required",
            ));
        }
        for (i, prefix) in self.name_prefixes.iter().enumerate() {
            if prefix.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("device.name_prefixes[{}]", i),
                    "prefix cannot be empty",
                ));
            }
        }

        errors
    }
}

/// Maximum number of retries accepted in configuration.
pub const MAX_RETRY_ATTEMPTS: u32 = 20;

/// Link timeouts and retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    pub scan_timeout_secs: u64,
    pub connection_timeout_secs: u64,
    pub discovery_timeout_secs: u64,
    /// Retries after the first failed attempt.
    pub retry_attempts: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Add up to 25% random jitter to retry delays.
    pub jitter: bool,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            scan_timeout_secs: wishring_core::SCAN_TIMEOUT.as_secs(),
            connection_timeout_secs: wishring_core::CONNECTION_TIMEOUT.as_secs(),
            discovery_timeout_secs: wishring_core::DISCOVERY_TIMEOUT.as_secs(),
            retry_attempts: RETRY_ATTEMPTS,
            initial_retry_delay_ms: INITIAL_RECONNECT_DELAY.as_millis() as u64,
            max_retry_delay_ms: MAX_RECONNECT_DELAY.as_millis() as u64,
            jitter: false,
        }
    }
}

impl LinkSettings {
    pub fn reconnect_options(&self) -> ReconnectOptions {
        ReconnectOptions::default()
            .max_attempts(self.retry_attempts)
            .initial_delay(Duration::from_millis(self.initial_retry_delay_ms))
            .max_delay(Duration::from_millis(self.max_retry_delay_ms))
            .jitter(self.jitter)
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for (field, value) in [
            ("link.scan_timeout_secs", self.scan_timeout_secs),
            ("link.connection_timeout_secs", self.connection_timeout_secs),
            ("link.discovery_timeout_secs", self.discovery_timeout_secs),
            ("link.initial_retry_delay_ms", self.initial_retry_delay_ms),
        ] {
            if value == 0 {
                errors.push(ValidationError::new(field, "must be greater than 0"));
            }
        }
        if self.max_retry_delay_ms < self.initial_retry_delay_ms {
            errors.push(ValidationError::new(
                "link.max_retry_delay_ms",
                format!(
                    "max delay {}ms is shorter than initial delay {}ms",
                    self.max_retry_delay_ms, self.initial_retry_delay_ms
                ),
            ));
        }
        if self.retry_attempts > MAX_RETRY_ATTEMPTS {
            errors.push(ValidationError::new(
                "link.retry_attempts",
                format!(
                    "{} retries is too many (maximum {})",
                    self.retry_attempts, MAX_RETRY_ATTEMPTS
                ),
            ));
        }

        errors
    }
}

/// Counter defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    /// Wish used for the first day on a fresh database.
    pub default_wish_text: String,
    pub default_target_count: u32,
    pub max_daily_count: u32,
    /// `log_only` or `log_and_zero`.
    pub reset_policy: ResetPolicy,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            default_wish_text: DEFAULT_WISH_TEXT.to_string(),
            default_target_count: DEFAULT_TARGET_COUNT,
            max_daily_count: MAX_DAILY_COUNT,
            reset_policy: ResetPolicy::default(),
        }
    }
}

impl CounterConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let text = self.default_wish_text.trim();
        if text.is_empty() {
            errors.push(ValidationError::new(
                "counter.default_wish_text",
                "wish text cannot be empty",
            ));
        } else if text.chars().count() > MAX_WISH_TEXT_LEN {
            errors.push(ValidationError::new(
                "counter.default_wish_text",
                format!("wish text is longer than {} characters", MAX_WISH_TEXT_LEN),
            ));
        }

        if self.max_daily_count == 0 || self.max_daily_count > MAX_DAILY_COUNT {
            errors.push(ValidationError::new(
                "counter.max_daily_count",
                format!("must be between 1 and {}", MAX_DAILY_COUNT),
            ));
        }
        if self.default_target_count == 0 {
            errors.push(ValidationError::new(
                "counter.default_target_count",
                "target must be greater than 0",
            ));
        } else if self.default_target_count > self.max_daily_count {
            errors.push(ValidationError::new(
                "counter.default_target_count",
                format!(
                    "target {} can never be reached with max_daily_count {}",
                    self.default_target_count, self.max_daily_count
                ),
            ));
        }

        errors
    }
}

/// Storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
    /// Reset events older than this are pruned.
    pub reset_retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: wishring_store::default_db_path(),
            reset_retention_days: wishring_core::DEFAULT_RESET_RETENTION.whole_days() as u32,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }
        if self.reset_retention_days == 0 {
            errors.push(ValidationError::new(
                "storage.reset_retention_days",
                "retention must be at least 1 day",
            ));
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `link.retry_attempts` or `device.name_prefixes[0]`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wishring")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.device.address, None);
        assert_eq!(config.device.name_prefixes, vec!["WISH_RING", "WishRing", "MRD"]);
        assert_eq!(config.link.retry_attempts, 3);
        assert_eq!(config.counter.default_target_count, 1000);
        assert_eq!(config.counter.reset_policy, ResetPolicy::LogOnly);
        assert_eq!(config.storage.path, wishring_store::default_db_path());
        assert_eq!(config.storage.reset_retention_days, 30);
    }

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        assert!(default_config_path().ends_with("wishring/config.toml"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml = r#"
            [device]
            address = "AA:BB:CC:DD:EE:FF"

            [counter]
            reset_policy = "log_and_zero"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.device.address.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(config.device.name_prefixes.len(), 3);
        assert_eq!(config.counter.reset_policy, ResetPolicy::LogAndZero);
        assert_eq!(config.link, LinkSettings::default());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.device.address = Some("11:22:33:44:55:66".to_string());
        config.link.retry_attempts = 5;
        config.counter.default_wish_text = "Breathe".to_string();
        config.storage.path = PathBuf::from("/tmp/wishring-test.db");

        config.save(&config_path).unwrap();
        let loaded = Config::load(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_validated_rejects_bad_values() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("bad.toml");
        std::fs::write(&config_path, "[storage]\nreset_retention_days = 0\n").unwrap();

        match Config::load_validated(&config_path) {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, "storage.reset_retention_days");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_device_validation() {
        let config = DeviceConfig {
            address: Some("  ".to_string()),
            name_prefixes: vec!["WishRing".to_string(), String::new()],
        };
        let fields: Vec<_> = config.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["device.address", "device.name_prefixes[1]"]);

        let no_prefixes = DeviceConfig {
            address: None,
            name_prefixes: Vec::new(),
        };
        assert_eq!(no_prefixes.validate().len(), 1);
    }

    #[test]
    fn test_link_validation() {
        let settings = LinkSettings {
            scan_timeout_secs: 0,
            initial_retry_delay_ms: 5_000,
            max_retry_delay_ms: 1_000,
            retry_attempts: 50,
            ..Default::default()
        };
        let fields: Vec<_> = settings.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "link.scan_timeout_secs",
                "link.max_retry_delay_ms",
                "link.retry_attempts"
            ]
        );
    }

    #[test]
    fn test_counter_validation() {
        let unreachable = CounterConfig {
            default_target_count: 500,
            max_daily_count: 100,
            ..Default::default()
        };
        let errors = unreachable.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("never be reached"));

        let long_text = CounterConfig {
            default_wish_text: "x".repeat(MAX_WISH_TEXT_LEN + 1),
            ..Default::default()
        };
        assert_eq!(long_text.validate()[0].field, "counter.default_wish_text");

        let blank = CounterConfig {
            default_wish_text: "   ".to_string(),
            ..Default::default()
        };
        assert!(blank.validate()[0].message.contains("cannot be empty"));
    }

    #[test]
    fn test_validation_error_display() {
        let mut config = Config::default();
        config.counter.max_daily_count = 0;
        config.storage.path = PathBuf::new();

        let err = config.validate().unwrap_err();
        let display = err.to_string();
        assert!(display.contains("counter.max_daily_count"));
        assert!(display.contains("storage.path"));
    }

    #[test]
    fn test_core_config_conversion() {
        let mut config = Config::default();
        config.device.address = Some("AA:BB".to_string());
        config.link.connection_timeout_secs = 20;
        config.link.retry_attempts = 1;
        config.storage.reset_retention_days = 7;

        let link = config.link_config();
        assert_eq!(link.connection_timeout, Duration::from_secs(20));
        assert_eq!(link.reconnect.max_attempts, 1);
        assert_eq!(link.filter.address.as_deref(), Some("AA:BB"));
        assert!(link.validate().is_ok());

        let engine = config.engine_config();
        assert_eq!(engine.reset_retention, time::Duration::days(7));
        assert!(engine.validate().is_ok());
    }
}
