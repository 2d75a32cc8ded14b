//! Error types for the driftwood pipeline using snafu.
//!
//! One enum per subsystem, with context selectors; everything converges on
//! `PipelineError` at the orchestrator boundary.

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors raised while loading or validating configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read the config file.
    #[snafu(display("Failed to read config file: {source}"))]
    ReadFile { source: std::io::Error },

    /// Failed to parse the config YAML.
    #[snafu(display("Failed to parse config YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// The configuration is structurally valid but semantically wrong.
    #[snafu(display("Invalid configuration: {message}"))]
    InvalidConfig { message: String },
}

// ============ Durability Errors ============

/// Errors raised by the write-ahead log.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WalError {
    #[snafu(display("Failed to open WAL at {path}: {source}"))]
    WalOpen {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Failed to append to WAL: {source}"))]
    WalAppend { source: std::io::Error },

    #[snafu(display("Failed to encode WAL record: {source}"))]
    WalEncode { source: serde_json::Error },

    #[snafu(display("Failed to sync WAL: {source}"))]
    WalSync { source: std::io::Error },

    #[snafu(display("Failed to truncate WAL: {source}"))]
    WalTruncate { source: std::io::Error },

    #[snafu(display("Failed to read WAL for replay: {source}"))]
    WalRead { source: std::io::Error },
}

/// Errors raised by the metadata store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetadataError {
    #[snafu(display("Failed to create metadata directory {path}: {source}"))]
    MetaDir {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Failed to write metadata file {path}: {source}"))]
    MetaWrite {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Failed to rename metadata file into place at {path}: {source}"))]
    MetaRename {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Failed to encode metadata: {source}"))]
    MetaEncode { source: serde_json::Error },

    #[snafu(display("Failed to read metadata file {path}: {source}"))]
    MetaRead {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Failed to decode metadata file {path}: {source}"))]
    MetaDecode {
        path: String,
        source: serde_json::Error,
    },
}

// ============ Backend Errors ============

/// Errors raised by the relational backend client.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RelationalError {
    #[snafu(display("Failed to connect to relational backend: {source}"))]
    SqlConnect { source: sqlx::Error },

    #[snafu(display("DDL statement failed ({statement}): {source}"))]
    Ddl {
        statement: String,
        source: sqlx::Error,
    },

    #[snafu(display("Relational query failed: {source}"))]
    SqlQuery { source: sqlx::Error },

    #[snafu(display("Relational batch upsert failed: {source}"))]
    SqlUpsert { source: sqlx::Error },

    #[snafu(display("Failed to decode relational column {column}: {source}"))]
    SqlDecode {
        column: String,
        source: sqlx::Error,
    },

    #[snafu(display("Relational {operation} timed out"))]
    SqlTimeout { operation: String },
}

/// Errors raised by the document backend client.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DocumentError {
    #[snafu(display("Failed to connect to document backend: {source}"))]
    DocConnect { source: mongodb::error::Error },

    #[snafu(display("Failed to ensure index on {collection}: {source}"))]
    DocIndex {
        collection: String,
        source: mongodb::error::Error,
    },

    #[snafu(display("Document batch upsert failed: {source}"))]
    DocUpsert { source: mongodb::error::Error },

    #[snafu(display("Document find failed: {source}"))]
    DocFind { source: mongodb::error::Error },

    #[snafu(display("Document update failed: {source}"))]
    DocUpdate { source: mongodb::error::Error },

    #[snafu(display("Document {operation} timed out"))]
    DocTimeout { operation: String },
}

/// Errors raised while moving field data between backends.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MigrateError {
    #[snafu(display("Migration failed on the relational side: {source}"))]
    MigrateRelational { source: RelationalError },

    #[snafu(display("Migration failed on the document side: {source}"))]
    MigrateDocument { source: DocumentError },
}

// ============ Top-level Errors ============

/// Top-level pipeline errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Write-ahead log error.
    #[snafu(display("WAL error: {source}"))]
    Wal { source: WalError },

    /// Metadata persistence error.
    #[snafu(display("Metadata error: {source}"))]
    Metadata { source: MetadataError },

    /// Relational backend error.
    #[snafu(display("Relational backend error: {source}"))]
    Relational { source: RelationalError },

    /// Document backend error.
    #[snafu(display("Document backend error: {source}"))]
    Document { source: DocumentError },

    /// Migration error.
    #[snafu(display("Migration error: {source}"))]
    Migrate { source: MigrateError },

    /// The ingested value was not a JSON object at the top level.
    #[snafu(display("Record rejected: top-level value is not an object"))]
    NotAnObject,
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

impl From<WalError> for PipelineError {
    fn from(source: WalError) -> Self {
        PipelineError::Wal { source }
    }
}

impl From<MetadataError> for PipelineError {
    fn from(source: MetadataError) -> Self {
        PipelineError::Metadata { source }
    }
}

impl From<RelationalError> for PipelineError {
    fn from(source: RelationalError) -> Self {
        PipelineError::Relational { source }
    }
}

impl From<DocumentError> for PipelineError {
    fn from(source: DocumentError) -> Self {
        PipelineError::Document { source }
    }
}

impl From<MigrateError> for PipelineError {
    fn from(source: MigrateError) -> Self {
        PipelineError::Migrate { source }
    }
}
