//! Configuration for the driftwood pipeline.
//!
//! YAML with environment-variable interpolation, parsed once at startup
//! into a typed struct and passed by value from there on.

mod vars;

pub use vars::{InterpolationResult, interpolate};

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::analysis::Thresholds;
use crate::error::ConfigError;

fn default_relational_port() -> u16 {
    3306
}

fn default_document_port() -> u16 {
    27017
}

fn default_database() -> String {
    "driftwood".to_owned()
}

fn default_host() -> String {
    "localhost".to_owned()
}

fn default_backend_timeout() -> u64 {
    30
}

/// Relational backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationalConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_relational_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    #[serde(default = "default_database")]
    pub database: String,
    /// Deadline for each backend operation (DDL and batch upsert alike).
    #[serde(default = "default_backend_timeout")]
    pub timeout_seconds: u64,
}

impl RelationalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Document backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_document_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_backend_timeout")]
    pub timeout_seconds: u64,
}

impl DocumentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_buffer_size() -> usize {
    50
}

fn default_buffer_timeout() -> u64 {
    30
}

/// Buffering thresholds: a flush triggers on whichever is hit first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_buffer_size")]
    pub size: usize,
    #[serde(default = "default_buffer_timeout")]
    pub timeout_seconds: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            size: default_buffer_size(),
            timeout_seconds: default_buffer_timeout(),
        }
    }
}

impl BufferConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_min_presence() -> f64 {
    0.70
}

fn default_min_type_stability() -> f64 {
    0.90
}

fn default_min_records() -> u64 {
    50
}

/// Placement thresholds. Documented contract values; tune with care.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfig {
    #[serde(default = "default_min_presence")]
    pub min_presence: f64,
    #[serde(default = "default_min_type_stability")]
    pub min_type_stability: f64,
    /// Record count below which the presence floor is waived.
    #[serde(default = "default_min_records")]
    pub min_records: u64,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            min_presence: default_min_presence(),
            min_type_stability: default_min_type_stability(),
            min_records: default_min_records(),
        }
    }
}

fn default_pk_min_unique() -> f64 {
    0.70
}

/// Primary-key election thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryKeyConfig {
    #[serde(default = "default_pk_min_unique")]
    pub min_unique: f64,
}

impl Default for PrimaryKeyConfig {
    fn default() -> Self {
        Self {
            min_unique: default_pk_min_unique(),
        }
    }
}

/// Upstream source settings. The library never dials the source itself;
/// the CLI reads records from stdin and this is informational.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub url: Option<String>,
}

fn default_metadata_dir() -> PathBuf {
    PathBuf::from("metadata")
}

fn default_table_name() -> String {
    "records".to_owned()
}

/// Main configuration.
///
/// # Example
///
/// ```yaml
/// relational:
///   host: ${MYSQL_HOST:-localhost}
///   user: root
///   password: ${MYSQL_PASSWORD}
///   database: adaptive
///
/// document:
///   host: ${MONGO_HOST:-localhost}
///   database: adaptive
///
/// buffer:
///   size: 50
///   timeout_seconds: 30
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub relational: RelationalConfig,
    pub document: DocumentConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub placement: PlacementConfig,
    #[serde(default)]
    pub pk: PrimaryKeyConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: PathBuf,
    /// Single destination per backend; the document collection shares the
    /// name.
    #[serde(default = "default_table_name")]
    pub table_name: String,
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::ReadFile { source })?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let result = interpolate(contents);
        if !result.is_ok() {
            return Err(ConfigError::EnvInterpolation {
                message: result.errors.join("\n"),
            });
        }

        let config: Config = serde_yaml::from_str(&result.text)
            .map_err(|source| ConfigError::YamlParse { source })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate thresholds and names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn ratio_in_range(name: &str, value: f64) -> Result<(), ConfigError> {
            if value > 0.0 && value <= 1.0 {
                Ok(())
            } else {
                Err(ConfigError::InvalidConfig {
                    message: format!("{name} must be in (0, 1], got {value}"),
                })
            }
        }

        ratio_in_range("placement.min_presence", self.placement.min_presence)?;
        ratio_in_range(
            "placement.min_type_stability",
            self.placement.min_type_stability,
        )?;
        ratio_in_range("pk.min_unique", self.pk.min_unique)?;

        if self.buffer.size == 0 {
            return Err(ConfigError::InvalidConfig {
                message: "buffer.size must be at least 1".to_owned(),
            });
        }
        if self.table_name.is_empty() {
            return Err(ConfigError::InvalidConfig {
                message: "table_name cannot be empty".to_owned(),
            });
        }
        if self.metadata_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidConfig {
                message: "metadata_dir cannot be empty".to_owned(),
            });
        }
        if self.relational.database.is_empty() || self.document.database.is_empty() {
            return Err(ConfigError::InvalidConfig {
                message: "backend database names cannot be empty".to_owned(),
            });
        }
        Ok(())
    }

    /// Classification thresholds assembled from the config sections.
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            min_presence: self.placement.min_presence,
            min_type_stability: self.placement.min_type_stability,
            pk_min_unique: self.pk.min_unique,
            min_records: self.placement.min_records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
relational:
  user: root
  password: root
document: {}
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.relational.host, "localhost");
        assert_eq!(config.relational.port, 3306);
        assert_eq!(config.document.port, 27017);
        assert_eq!(config.buffer.size, 50);
        assert_eq!(config.buffer.timeout_seconds, 30);
        assert_eq!(config.placement.min_presence, 0.70);
        assert_eq!(config.placement.min_type_stability, 0.90);
        assert_eq!(config.pk.min_unique, 0.70);
        assert_eq!(config.table_name, "records");
        assert_eq!(config.metadata_dir, PathBuf::from("metadata"));
        assert_eq!(config.relational.timeout_seconds, 30);
    }

    #[test]
    fn test_full_config_parse() {
        let yaml = r#"
relational:
  host: mysql.internal
  port: 3307
  user: ingest
  password: secret
  database: adaptive
  timeout_seconds: 10

document:
  host: mongo.internal
  database: adaptive

buffer:
  size: 200
  timeout_seconds: 5

placement:
  min_presence: 0.8

pk:
  min_unique: 0.95

table_name: events
metadata_dir: /var/lib/driftwood
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.relational.host, "mysql.internal");
        assert_eq!(config.relational.port, 3307);
        assert_eq!(config.buffer.size, 200);
        assert_eq!(config.placement.min_presence, 0.8);
        assert_eq!(config.placement.min_type_stability, 0.90);
        assert_eq!(config.pk.min_unique, 0.95);
        assert_eq!(config.table_name, "events");
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let yaml = format!("{MINIMAL}placement:\n  min_presence: 1.5\n");
        assert!(Config::parse(&yaml).is_err());
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let yaml = format!("{MINIMAL}buffer:\n  size: 0\n");
        assert!(Config::parse(&yaml).is_err());
    }

    #[test]
    fn test_empty_table_name_rejected() {
        let yaml = format!("{MINIMAL}table_name: \"\"\n");
        assert!(Config::parse(&yaml).is_err());
    }

    #[test]
    fn test_interpolation_failure_surfaces() {
        let yaml = r#"
relational:
  user: root
  password: ${DRIFTWOOD_SURELY_UNSET_VAR}
document: {}
"#;
        let err = Config::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("DRIFTWOOD_SURELY_UNSET_VAR"));
    }
}
