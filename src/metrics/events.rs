//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the pipeline.
//! Events implement the `InternalEvent` trait which emits the
//! corresponding metric; whether anything listens is up to the embedding
//! process.

use std::time::Duration;

use metrics::{counter, gauge, histogram};
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when records are accepted into the buffer.
pub struct RecordsIngested {
    pub count: u64,
}

impl InternalEvent for RecordsIngested {
    fn emit(self) {
        trace!(count = self.count, "Records ingested");
        counter!("driftwood_records_ingested_total").increment(self.count);
    }
}

/// Event emitted to track the current buffer depth.
pub struct BufferDepth {
    pub depth: usize,
}

impl InternalEvent for BufferDepth {
    fn emit(self) {
        gauge!("driftwood_buffer_depth").set(self.depth as f64);
    }
}

/// Event emitted when a flush completes successfully.
pub struct FlushCompleted {
    pub duration: Duration,
    pub records: usize,
}

impl InternalEvent for FlushCompleted {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            records = self.records,
            "Flush completed"
        );
        histogram!("driftwood_flush_duration_seconds").record(self.duration.as_secs_f64());
        counter!("driftwood_records_flushed_total").increment(self.records as u64);
    }
}

/// Event emitted when a flush fails and the batch is retained.
pub struct FlushFailed;

impl InternalEvent for FlushFailed {
    fn emit(self) {
        counter!("driftwood_flush_failures_total").increment(1);
    }
}

/// Event emitted to track how many fields have been discovered.
pub struct FieldsDiscovered {
    pub count: usize,
}

impl InternalEvent for FieldsDiscovered {
    fn emit(self) {
        gauge!("driftwood_fields_discovered").set(self.count as f64);
    }
}

/// Event emitted when rows land in a backend.
pub struct RowsUpserted {
    /// `"sql"` or `"doc"`.
    pub backend: &'static str,
    pub count: u64,
}

impl InternalEvent for RowsUpserted {
    fn emit(self) {
        trace!(backend = self.backend, count = self.count, "Rows upserted");
        counter!("driftwood_rows_upserted_total", "backend" => self.backend)
            .increment(self.count);
    }
}

/// Event emitted when schema reconciliation changes the relational table.
pub struct SchemaChanged {
    /// `"create"`, `"add"`, `"widen"`, or `"migrate"`.
    pub action: &'static str,
    pub count: u64,
}

impl InternalEvent for SchemaChanged {
    fn emit(self) {
        trace!(action = self.action, count = self.count, "Schema changed");
        counter!("driftwood_schema_changes_total", "action" => self.action)
            .increment(self.count);
    }
}

/// Event emitted to track the number of records waiting in the WAL.
pub struct WalPending {
    pub records: usize,
}

impl InternalEvent for WalPending {
    fn emit(self) {
        gauge!("driftwood_wal_pending_records").set(self.records as f64);
    }
}
