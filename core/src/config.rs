use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryLimit;

/// Retry budget value that disables the limit.
pub const UNLIMITED_RETRIES: i64 = -1;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub harvest: HarvestConfig,
    pub origin: OriginConfig,
    pub output: OutputConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HarvestConfig {
    pub symbol: String,
    /// Paging stops once a page reaches messages created before this day (UTC midnight).
    pub boundary_date: NaiveDate,
    /// Resume from this message id instead of the newest page. Zero means unset.
    pub resume_id: Option<u64>,
    pub delay_ms: u64,
    /// Consecutive transport failures tolerated; `-1` for unlimited.
    pub retries: i64,
    pub retry_pause_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OriginConfig {
    pub base_url: String,
    pub user_agent: String,
    pub parallelism: usize,
    pub min_interval_ms: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub delimiter: Delimiter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Delimiter {
    Tab,
    Comma,
}

impl Delimiter {
    pub fn as_char(self) -> char {
        match self {
            Delimiter::Tab => '\t',
            Delimiter::Comma => ',',
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Config {
    /// Defaults, then `harvester.toml` if present, then `HARVESTER__*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&Config::default())?);

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path));
            }
            None if Path::new("harvester.toml").exists() => {
                builder = builder.add_source(File::with_name("harvester"));
            }
            None => {}
        }

        builder = builder.add_source(
            Environment::with_prefix("HARVESTER")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let mut settings: Config = config.try_deserialize()?;

        if settings.harvest.resume_id == Some(0) {
            settings.harvest.resume_id = None;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.harvest.symbol.trim().is_empty() {
            return Err(ConfigError::Message("harvest.symbol is required".into()));
        }

        if self.harvest.retries < UNLIMITED_RETRIES {
            return Err(ConfigError::Message(format!(
                "harvest.retries must be >= 0 or {} for unlimited, got {}",
                UNLIMITED_RETRIES, self.harvest.retries
            )));
        }

        if self.harvest.retries > i64::from(u32::MAX) {
            return Err(ConfigError::Message(
                "harvest.retries is out of range".into(),
            ));
        }

        if self.origin.base_url.trim().is_empty() {
            return Err(ConfigError::Message("origin.base_url is required".into()));
        }

        if self.origin.parallelism == 0 {
            return Err(ConfigError::Message(
                "origin.parallelism must be greater than 0".into(),
            ));
        }

        if self.origin.timeout_secs == 0 {
            return Err(ConfigError::Message(
                "origin.timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

impl HarvestConfig {
    pub fn boundary(&self) -> DateTime<Utc> {
        self.boundary_date.and_time(NaiveTime::default()).and_utc()
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn retry_pause(&self) -> Duration {
        Duration::from_millis(self.retry_pause_ms)
    }

    pub fn retry_limit(&self) -> RetryLimit {
        RetryLimit::from_setting(self.retries)
    }
}

impl OutputConfig {
    pub fn file_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", symbol))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            harvest: HarvestConfig {
                symbol: "AAPL".to_string(),
                boundary_date: NaiveDate::from_ymd_opt(2014, 11, 11).unwrap_or_default(),
                resume_id: None,
                delay_ms: 500,
                retries: 5,
                retry_pause_ms: 0,
            },
            origin: OriginConfig {
                base_url: "https://stocktwits.com".to_string(),
                user_agent: "Mozilla/5.0 (Windows NT 6.1) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/41.0.2228.0 Safari/537.36".to_string(),
                parallelism: 2,
                min_interval_ms: 2000,
                timeout_secs: 30,
            },
            output: OutputConfig {
                dir: PathBuf::from("."),
                delimiter: Delimiter::Tab,
            },
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
                log_format: LogFormat::Pretty,
                metrics_enabled: false,
                metrics_port: 9090,
            },
        }
    }
}
