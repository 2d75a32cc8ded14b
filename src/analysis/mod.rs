//! Field analysis and classification.
//!
//! The analyzer accumulates evidence (`FieldStats`) about every canonical
//! field; the classifier turns that evidence into placement decisions and a
//! primary-key election.

mod analyzer;
mod classifier;
mod decision;
mod stats;

pub use analyzer::FieldAnalyzer;
pub use classifier::{BackendDistribution, Classifier, LINKING_FIELDS, Thresholds};
pub use decision::{Backend, PlacementDecision, SqlType, is_timestamp_field};
pub use stats::{FieldStats, MAX_SAMPLE_VALUES, MAX_UNIQUE_TRACKED};
