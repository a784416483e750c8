use crate::error::{AppError, Result};
use serde::Deserialize;
use std::path::Path;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Settings {
    #[validate]
    pub storage: StorageSettings,
    #[validate]
    pub cleanup: CleanupSettings,
    pub logging: LoggingSettings,
}

/// Location and pool sizing of the durable SQLite store.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StorageSettings {
    #[validate(length(min = 1))]
    pub url: String,
    #[validate(range(min = 1, max = 64))]
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl StorageSettings {
    /// Settings for a database file at `path`, created on first open.
    pub fn for_path(path: impl AsRef<Path>) -> Self {
        Self {
            url: format!("sqlite://{}", path.as_ref().display()),
            max_connections: 4,
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CleanupSettings {
    /// Age after which a saved response is swept.
    #[validate(range(min = 1))]
    pub response_threshold_ms: u64,
    #[validate(range(min = 1))]
    pub interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
}

impl Settings {
    pub fn new() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.check()?;
        Ok(settings)
    }

    /// Runs the declarative validation rules.
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| AppError::Validation(e.to_string()))
    }
}
