// Pipeline Configuration
//
// Tunables for detection, risk, insights and the background jobs, loaded
// from TOML with an environment overlay.

use crate::jobs::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to load config: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for crate::error::PipelineError {
    fn from(err: ConfigError) -> Self {
        crate::error::PipelineError::Config(err.to_string())
    }
}

/// Main pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub detection: DetectionConfig,
    pub risk: RiskConfig,
    pub insight: InsightConfig,
    pub llm: LlmSettings,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub jobs: JobsConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Trailing window of events considered by a detection run
    pub window_days: u32,

    /// Below this many events the cold-start path is used
    pub cold_start_threshold: usize,

    /// Event-triggered detection fires on every Nth logged event
    pub trigger_every: u64,

    /// Patterns below this confidence are dropped
    pub min_confidence: f64,

    /// Maximum patterns kept per run
    pub max_patterns: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            cold_start_threshold: 10,
            trigger_every: 10,
            min_confidence: 0.5,
            max_patterns: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// How far ahead an approaching trigger window still counts
    pub look_ahead_hours: u8,

    /// A single meal at or above this many calories dampens the score
    pub high_calorie_threshold: u32,

    /// Cached scores older than this are logged as stale
    #[serde(with = "serde_duration")]
    pub cache_refresh: Duration,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            look_ahead_hours: 2,
            high_calorie_threshold: 800,
            cache_refresh: Duration::from_secs(6 * 3600),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightConfig {
    /// Insights a free user receives unlocked
    pub free_tier_limit: u32,

    /// Characters of the body kept in a locked teaser
    pub teaser_chars: usize,

    #[serde(with = "serde_duration")]
    pub cache_refresh: Duration,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            free_tier_limit: 3,
            teaser_chars: 100,
            cache_refresh: Duration::from_secs(24 * 3600),
        }
    }
}

/// Settings for the optional text-generation call used to phrase insights
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub enabled: bool,

    /// Read from ANTHROPIC_API_KEY, never written to disk
    #[serde(skip, default = "api_key_from_env")]
    pub api_key: String,

    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,

    #[serde(with = "serde_duration")]
    pub timeout: Duration,
}

fn api_key_from_env() -> String {
    env::var("ANTHROPIC_API_KEY").unwrap_or_default()
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: api_key_from_env(),
            model: "claude-3-5-haiku-20241022".to_string(),
            max_tokens: 400,
            temperature: 0.7,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file; falls back to the platform data directory
    pub db_path: Option<String>,
}

impl StorageConfig {
    pub fn resolved_db_path(&self) -> String {
        self.db_path
            .clone()
            .unwrap_or_else(|| default_db_path().to_string_lossy().to_string())
    }
}

/// Default database path under the XDG data directory
pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nutrimind")
        .join("nutrimind.db")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: ([127, 0, 0, 1], 3000).into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub detection: JobConfig,
    pub insights: JobConfig,
    pub risk: JobConfig,

    /// How often the scheduler wakes up to check for due jobs
    #[serde(with = "serde_duration")]
    pub tick: Duration,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            detection: JobConfig {
                enabled: true,
                interval: Duration::from_secs(86400), // 24 hours
                batch_size: 1000,
                max_duration: Duration::from_secs(900), // 15 minutes
            },
            insights: JobConfig {
                enabled: true,
                interval: Duration::from_secs(86400),
                batch_size: 1000,
                max_duration: Duration::from_secs(900),
            },
            risk: JobConfig {
                enabled: true,
                interval: Duration::from_secs(86400),
                batch_size: 1000,
                max_duration: Duration::from_secs(300),
            },
            tick: Duration::from_secs(300),
        }
    }
}

/// Configuration for individual background jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Enable/disable this specific job
    pub enabled: bool,

    /// Interval between job runs (in seconds)
    #[serde(with = "serde_duration")]
    pub interval: Duration,

    /// Maximum number of users to process per run
    pub batch_size: usize,

    /// Maximum duration for job execution (in seconds)
    #[serde(with = "serde_duration")]
    pub max_duration: Duration,
}

// Custom serde module for Duration (serialize/deserialize as seconds)
pub(crate) mod serde_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl PipelineConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Layer defaults, an optional TOML file and `NUTRIMIND__*` environment
    /// variables (e.g. `NUTRIMIND__DETECTION__WINDOW_DAYS=14`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&PipelineConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("NUTRIMIND")
                .prefix_separator("__")
                .separator("__"),
        );

        let config: PipelineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let detection = &self.detection;
        if detection.window_days < 3 {
            return Err(ConfigError::ValidationError(
                "detection: window_days must be at least 3".to_string(),
            ));
        }
        if detection.cold_start_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "detection: cold_start_threshold must be at least 1".to_string(),
            ));
        }
        if detection.trigger_every == 0 {
            return Err(ConfigError::ValidationError(
                "detection: trigger_every must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&detection.min_confidence) {
            return Err(ConfigError::ValidationError(
                "detection: min_confidence must be between 0 and 1".to_string(),
            ));
        }
        if detection.max_patterns == 0 {
            return Err(ConfigError::ValidationError(
                "detection: max_patterns must be at least 1".to_string(),
            ));
        }

        if self.risk.look_ahead_hours > 12 {
            return Err(ConfigError::ValidationError(
                "risk: look_ahead_hours must be at most 12".to_string(),
            ));
        }

        if self.insight.teaser_chars == 0 {
            return Err(ConfigError::ValidationError(
                "insight: teaser_chars must be at least 1".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.llm.temperature) {
            return Err(ConfigError::ValidationError(
                "llm: temperature must be between 0 and 1".to_string(),
            ));
        }
        if self.llm.timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "llm: timeout must be greater than zero".to_string(),
            ));
        }

        self.validate_job_config("detection", &self.jobs.detection)?;
        self.validate_job_config("insights", &self.jobs.insights)?;
        self.validate_job_config("risk", &self.jobs.risk)?;

        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry: backoff_multiplier must be at least 1.0".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_job_config(&self, name: &str, config: &JobConfig) -> Result<(), ConfigError> {
        // Interval must be at least 1 hour
        if config.interval < Duration::from_secs(3600) {
            return Err(ConfigError::ValidationError(format!(
                "{}: interval must be at least 1 hour",
                name
            )));
        }

        if config.batch_size == 0 || config.batch_size > 10000 {
            return Err(ConfigError::ValidationError(format!(
                "{}: batch_size must be between 1 and 10000",
                name
            )));
        }

        if config.max_duration < Duration::from_secs(60)
            || config.max_duration > Duration::from_secs(1800)
        {
            return Err(ConfigError::ValidationError(format!(
                "{}: max_duration must be between 1 and 30 minutes",
                name
            )));
        }

        Ok(())
    }

    /// Look up a job's settings by its scheduler name
    pub fn job(&self, name: &str) -> Option<&JobConfig> {
        match name {
            "daily_detection" => Some(&self.jobs.detection),
            "daily_insights" => Some(&self.jobs.insights),
            "daily_risk" => Some(&self.jobs.risk),
            _ => None,
        }
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detection.window_days, 30);
        assert_eq!(config.insight.free_tier_limit, 3);
    }

    #[test]
    fn test_validate_window_too_short() {
        let mut config = PipelineConfig::default();
        config.detection.window_days = 2;

        let result = config.validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("window_days must be at least 3"));
    }

    #[test]
    fn test_validate_job_interval_too_short() {
        let mut config = PipelineConfig::default();
        config.jobs.insights.interval = Duration::from_secs(60);

        let result = config.validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("insights: interval must be at least 1 hour"));
    }

    #[test]
    fn test_validate_max_duration_too_long() {
        let mut config = PipelineConfig::default();
        config.jobs.risk.max_duration = Duration::from_secs(3600);

        let result = config.validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("max_duration must be between"));
    }

    #[test]
    fn test_from_toml_partial_overrides() {
        let toml_str = r#"
            [detection]
            window_days = 14

            [insight]
            free_tier_limit = 5

            [jobs.detection]
            enabled = false
            interval = 43200
            batch_size = 200
            max_duration = 600
        "#;

        let config = PipelineConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.detection.window_days, 14);
        assert_eq!(config.detection.cold_start_threshold, 10);
        assert_eq!(config.insight.free_tier_limit, 5);
        assert!(!config.jobs.detection.enabled);
        assert_eq!(config.jobs.detection.interval, Duration::from_secs(43200));
        assert!(config.jobs.insights.enabled);
    }

    #[test]
    fn test_from_toml_rejects_invalid() {
        let result = PipelineConfig::from_toml("[detection]\nmin_confidence = 1.5\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nutrimind.toml");

        let mut config = PipelineConfig::default();
        config.risk.look_ahead_hours = 3;
        config.to_file(&path).unwrap();

        let loaded = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(loaded.risk.look_ahead_hours, 3);
        assert_eq!(loaded.server.addr, config.server.addr);
    }

    #[test]
    fn test_job_lookup_by_name() {
        let config = PipelineConfig::default();
        assert!(config.job("daily_detection").is_some());
        assert!(config.job("daily_risk").is_some());
        assert!(config.job("unknown").is_none());
    }
}
