use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A count or duration that would stall the operations using it.
    #[error("{setting} must be non-zero")]
    Zero { setting: &'static str },
    #[error("unknown export format '{0}'")]
    UnknownExportFormat(String),
}

/// Serialization used for the `export` bulk operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    /// `MessagePack` with named fields.
    Msgpack,
}

impl std::str::FromStr for ExportFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "msgpack" => Ok(Self::Msgpack),
            _ => Err(ConfigError::UnknownExportFormat(s.to_string())),
        }
    }
}

/// Logging setup consumed by [`init_tracing`](crate::telemetry::init_tracing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Collection admin configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Upper bound on concurrent gateway calls per bulk operation.
    pub bulk_concurrency: usize,
    /// Bound applied to every gateway call.
    pub gateway_timeout: Duration,
    /// Records fetched per page during a migration scan.
    pub migration_page_size: u32,
    pub export_format: ExportFormat,
    /// Recently deleted `(slug, id)` pairs remembered for idempotent deletes.
    pub tombstone_capacity: usize,
    /// Field the category filter slot matches against.
    pub category_field: String,
    /// Records per page for filter-driven views.
    pub view_page_size: u32,
    pub log: LogConfig,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            bulk_concurrency: 8,
            gateway_timeout: Duration::from_secs(30),
            migration_page_size: 100,
            export_format: ExportFormat::Json,
            tombstone_capacity: 10_000,
            category_field: "category".to_string(),
            view_page_size: 20,
            log: LogConfig::default(),
        }
    }
}

impl AdminConfig {
    /// Rejects settings that would stall or disable core operations.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Zero`] naming the first zero setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = [
            ("bulk_concurrency", self.bulk_concurrency == 0),
            ("migration_page_size", self.migration_page_size == 0),
            ("gateway_timeout", self.gateway_timeout.is_zero()),
            ("view_page_size", self.view_page_size == 0),
            ("tombstone_capacity", self.tombstone_capacity == 0),
        ];
        match zero.into_iter().find(|(_, is_zero)| *is_zero) {
            Some((setting, _)) => Err(ConfigError::Zero { setting }),
            None => Ok(()),
        }
    }
}
