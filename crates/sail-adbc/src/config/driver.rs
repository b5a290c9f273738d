use std::fmt;
use std::str::FromStr;

use chrono_tz::Tz;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{DriverError, DriverResult};

const DEFAULT_CONFIG: &str = include_str!("default.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    pub batch_size: usize,
    pub session_time_zone: String,
    pub ingest: IngestConfig,
}

impl DriverConfig {
    /// Loads the configuration from the built-in defaults, overridden by
    /// `SAIL_ADBC__*` environment variables (`__` separates nested keys).
    pub fn load() -> DriverResult<Self> {
        let config: Self = Figment::from(Toml::string(DEFAULT_CONFIG))
            .admerge(Env::prefixed("SAIL_ADBC__").map(|p| p.as_str().replace("__", ".").into()))
            .extract()
            .map_err(|e| DriverError::connection(format!("invalid driver configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DriverResult<()> {
        if self.batch_size == 0 {
            return Err(DriverError::connection("batch size must be positive"));
        }
        self.session_time_zone.parse::<Tz>().map_err(|e| {
            DriverError::connection(format!(
                "invalid session time zone {}: {e}",
                self.session_time_zone
            ))
        })?;
        Ok(())
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_ingest_mode(mut self, mode: IngestMode) -> Self {
        self.ingest.mode = mode;
        self
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            batch_size: 1024,
            session_time_zone: "UTC".to_string(),
            ingest: IngestConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    pub mode: IngestMode,
}

/// How bulk ingestion treats the target table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// Always issue `CREATE TABLE`; an existing table is an error.
    #[default]
    Create,
    /// Insert into an existing table without creating it.
    Append,
    /// Create the table if it does not exist, then insert.
    CreateAppend,
}

impl FromStr for IngestMode {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(IngestMode::Create),
            "append" => Ok(IngestMode::Append),
            "create_append" => Ok(IngestMode::CreateAppend),
            _ => Err(DriverError::invalid_state(format!(
                "invalid ingest mode: {s}"
            ))),
        }
    }
}

impl fmt::Display for IngestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestMode::Create => "create",
            IngestMode::Append => "append",
            IngestMode::CreateAppend => "create_append",
        };
        write!(f, "{name}")
    }
}
