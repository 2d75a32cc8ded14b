//! Driftwood: adaptive dual-backend ingestion pipeline.
//!
//! Ingests a stream of heterogeneous semi-structured records and persists
//! them across a relational store and a document store with no predefined
//! schema. Field types, placement and keys are inferred from observed data
//! and continuously refined:
//!
//! - records are normalized (canonical keys, semantic type coercion) and
//!   made durable in a write-ahead log before anything else happens;
//! - per-field statistics drive heuristic placement decisions and a
//!   primary-key election;
//! - the relational schema is created and widened at runtime, with data
//!   migrated between backends when a decision flips;
//! - each batch is split per decision and upserted to both backends on an
//!   inferred key, making retries idempotent.

pub mod analysis;
pub mod config;
pub mod error;
pub mod metadata;
pub mod metrics;
pub mod pipeline;
pub mod record;
pub mod storage;
pub mod wal;

// Re-export commonly used items
pub use analysis::{Backend, FieldStats, PlacementDecision, SqlType};
pub use config::Config;
pub use error::PipelineError;
pub use pipeline::{FlushSummary, Pipeline, PipelineStatus};
pub use record::{Record, Value};
