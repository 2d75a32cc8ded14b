//! The ingest orchestrator.
//!
//! Owns the buffer, the write-ahead log, the metadata store, the analyzer
//! and classifier, and both backend clients, all behind one consolidated
//! lock: producers serialize on it, at most one flush runs at a time, and
//! no `ingest` ever observes a partially flushed buffer.
//!
//! Lifecycle is explicit: `connect` (or `with_stores`) → `ingest`* →
//! `flush`* → `close`. There are no process-wide singletons.

use std::collections::VecDeque;
use std::time::Instant;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::analysis::{
    BackendDistribution, Classifier, FieldAnalyzer, FieldStats, PlacementDecision,
};
use crate::config::Config;
use crate::emit;
use crate::error::PipelineError;
use crate::metadata::{MetadataStore, PipelineState};
use crate::metrics::events::{
    BufferDepth, FieldsDiscovered, FlushCompleted, FlushFailed, RecordsIngested, RowsUpserted,
    SchemaChanged, WalPending,
};
use crate::record::{Record, Value, normalize};
use crate::storage::{
    DeadlineDocument, DeadlineRelational, DocumentStore, MongoStore, MySqlStore, RelationalStore,
    RouteOutcome, ensure_table, route_batch, select_doc_key,
};
use crate::wal::WriteAheadLog;

/// Result of one flush.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FlushSummary {
    pub records_processed: usize,
    /// Fields with a relational placement (SQL or BOTH).
    pub decisions_sql: usize,
    /// Fields with a document placement (DOC or BOTH).
    pub decisions_doc: usize,
}

/// Snapshot of the pipeline for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub buffer_size: usize,
    pub total_records_processed: u64,
    pub last_flush_time: Option<DateTime<Utc>>,
    pub fields_discovered: usize,
    pub backend_distribution: BackendDistribution,
}

struct PipelineInner {
    buffer: VecDeque<Record>,
    wal: WriteAheadLog,
    analyzer: FieldAnalyzer,
    classifier: Classifier,
    decisions: IndexMap<String, PlacementDecision>,
    /// The established primary key; never silently replaced once set.
    primary_key: Option<String>,
    relational: Box<dyn RelationalStore>,
    document: Box<dyn DocumentStore>,
    metadata: MetadataStore,
    state: PipelineState,
    last_flush: Instant,
}

pub struct Pipeline {
    inner: Mutex<PipelineInner>,
    buffer_size: usize,
    buffer_timeout: std::time::Duration,
    table_name: String,
}

impl Pipeline {
    /// Connect to both backends and recover any persisted state.
    pub async fn connect(config: Config) -> Result<Self, PipelineError> {
        let relational = MySqlStore::connect(&config.relational).await?;
        let document = MongoStore::connect(&config.document).await?;
        Self::with_stores(config, Box::new(relational), Box::new(document)).await
    }

    /// Build the pipeline over caller-provided backend stores.
    ///
    /// Runs the same startup recovery as `connect`: metadata is loaded
    /// (unreadable metadata degrades to a cold start), and a non-empty WAL
    /// is replayed onto the buffer and flushed immediately.
    pub async fn with_stores(
        config: Config,
        relational: Box<dyn RelationalStore>,
        document: Box<dyn DocumentStore>,
    ) -> Result<Self, PipelineError> {
        let relational: Box<dyn RelationalStore> = Box::new(DeadlineRelational::new(
            relational,
            config.relational.timeout(),
        ));
        let document: Box<dyn DocumentStore> =
            Box::new(DeadlineDocument::new(document, config.document.timeout()));

        let metadata = MetadataStore::open(&config.metadata_dir).await?;
        let (decisions, stats, state) = metadata.load_all().await;
        let analyzer = FieldAnalyzer::restore(stats, state.total_records_processed);
        let primary_key = decisions
            .iter()
            .find(|(_, d)| d.is_primary_key)
            .map(|(name, _)| name.clone());

        let mut wal = WriteAheadLog::open(&config.metadata_dir).await?;
        let replayed = wal.replay().await?;
        let recovered = replayed.len();

        let inner = PipelineInner {
            buffer: replayed.into(),
            wal,
            analyzer,
            classifier: Classifier::new(config.thresholds()),
            decisions,
            primary_key,
            relational,
            document,
            metadata,
            state,
            last_flush: Instant::now(),
        };

        let mut pipeline = Self {
            inner: Mutex::new(inner),
            buffer_size: config.buffer.size,
            buffer_timeout: config.buffer.timeout(),
            table_name: config.table_name.clone(),
        };

        if recovered > 0 {
            info!(records = recovered, "Recovered records from WAL; flushing");
            let table = pipeline.table_name.clone();
            Self::run_flush(pipeline.inner.get_mut(), &table).await?;
        }

        Ok(pipeline)
    }

    /// Ingest one raw record.
    ///
    /// The record is normalized, appended to the WAL (fsynced before this
    /// returns) and buffered. A full or stale buffer triggers a flush; a
    /// failed auto-flush is logged but does not fail the ingest, since the
    /// record is already durable and will be retried.
    pub async fn ingest(&self, raw: serde_json::Value) -> Result<(), PipelineError> {
        let Value::Object(map) = Value::from_json(raw) else {
            return Err(PipelineError::NotAnObject);
        };
        let record = normalize(map);

        let mut inner = self.inner.lock().await;
        inner.wal.append(&record).await?;
        inner.buffer.push_back(record);
        emit!(RecordsIngested { count: 1 });
        emit!(BufferDepth {
            depth: inner.buffer.len()
        });

        let should_flush = inner.buffer.len() >= self.buffer_size
            || inner.last_flush.elapsed() >= self.buffer_timeout;
        if should_flush {
            if let Err(e) = Self::run_flush(&mut inner, &self.table_name).await {
                error!(error = %e, "Auto-flush failed; batch retained for retry");
            }
        }
        Ok(())
    }

    /// Ingest a batch of raw records in order.
    pub async fn ingest_batch(
        &self,
        raws: Vec<serde_json::Value>,
    ) -> Result<(), PipelineError> {
        for raw in raws {
            self.ingest(raw).await?;
        }
        Ok(())
    }

    /// Flush the buffer through the full pipeline.
    pub async fn flush(&self) -> Result<FlushSummary, PipelineError> {
        let mut inner = self.inner.lock().await;
        Self::run_flush(&mut inner, &self.table_name).await
    }

    /// Current placement decisions.
    pub async fn decisions(&self) -> IndexMap<String, PlacementDecision> {
        self.inner.lock().await.decisions.clone()
    }

    /// Current per-field statistics.
    pub async fn field_stats(&self) -> IndexMap<String, FieldStats> {
        self.inner.lock().await.analyzer.stats().clone()
    }

    /// Pipeline status snapshot.
    pub async fn status(&self) -> PipelineStatus {
        let inner = self.inner.lock().await;
        PipelineStatus {
            buffer_size: inner.buffer.len(),
            total_records_processed: inner.state.total_records_processed,
            last_flush_time: inner.state.last_flush_time,
            fields_discovered: inner.analyzer.field_count(),
            backend_distribution: Classifier::backend_distribution(&inner.decisions),
        }
    }

    /// Drain the buffer with a final flush and release both backends.
    pub async fn close(self) -> Result<(), PipelineError> {
        let mut inner = self.inner.into_inner();
        if !inner.buffer.is_empty() {
            Self::run_flush(&mut inner, &self.table_name).await?;
        }
        inner.relational.close().await?;
        inner.document.close().await?;
        info!("Pipeline closed");
        Ok(())
    }

    fn summary(inner: &PipelineInner, records_processed: usize) -> FlushSummary {
        let mut decisions_sql = 0;
        let mut decisions_doc = 0;
        for decision in inner.decisions.values() {
            if decision.backend.includes_sql() {
                decisions_sql += 1;
            }
            if decision.backend.includes_doc() {
                decisions_doc += 1;
            }
        }
        FlushSummary {
            records_processed,
            decisions_sql,
            decisions_doc,
        }
    }

    /// The flush pipeline: analyze → classify → reconcile schema → route →
    /// persist metadata → truncate WAL.
    ///
    /// A backend failure rolls the statistics and decisions back, puts the
    /// snapshot at the head of the buffer and keeps the WAL, so a retry
    /// (or a crash and replay) observes exactly one copy of the batch.
    async fn run_flush(
        inner: &mut PipelineInner,
        table: &str,
    ) -> Result<FlushSummary, PipelineError> {
        if inner.buffer.is_empty() {
            return Ok(Self::summary(inner, 0));
        }

        let started = Instant::now();
        let snapshot: Vec<Record> = inner.buffer.drain(..).collect();
        let records = snapshot.len();

        let analyzer_backup = inner.analyzer.clone();
        let decisions_backup = inner.decisions.clone();

        inner.analyzer.analyze_batch(&snapshot);
        let fresh = inner.classifier.classify_all(
            inner.analyzer.stats(),
            inner.analyzer.total_records(),
            inner.primary_key.as_deref(),
        );
        let previous = std::mem::replace(&mut inner.decisions, fresh);

        match Self::reconcile_and_route(inner, table, &snapshot, &previous).await {
            Ok(outcome) => {
                emit!(RowsUpserted {
                    backend: "sql",
                    count: outcome.sql_rows
                });
                emit!(RowsUpserted {
                    backend: "doc",
                    count: outcome.doc_rows
                });
            }
            Err(e) => {
                inner.analyzer = analyzer_backup;
                inner.decisions = decisions_backup;
                for record in snapshot.into_iter().rev() {
                    inner.buffer.push_front(record);
                }
                emit!(FlushFailed);
                return Err(e);
            }
        }

        inner.primary_key = inner
            .decisions
            .iter()
            .find(|(_, d)| d.is_primary_key)
            .map(|(name, _)| name.clone());

        inner.state.total_records_processed = inner.analyzer.total_records();
        inner.state.last_flush_time = Some(Utc::now());
        inner
            .metadata
            .save_all(&inner.decisions, inner.analyzer.stats(), &inner.state)
            .await?;
        inner.wal.truncate().await?;
        inner.last_flush = Instant::now();

        emit!(FlushCompleted {
            duration: started.elapsed(),
            records,
        });
        emit!(FieldsDiscovered {
            count: inner.analyzer.field_count()
        });
        emit!(WalPending { records: 0 });
        emit!(BufferDepth { depth: 0 });

        info!(
            records,
            total = inner.state.total_records_processed,
            "Flush completed"
        );
        Ok(Self::summary(inner, records))
    }

    async fn reconcile_and_route(
        inner: &mut PipelineInner,
        table: &str,
        snapshot: &[Record],
        previous: &IndexMap<String, PlacementDecision>,
    ) -> Result<RouteOutcome, PipelineError> {
        let PipelineInner {
            relational,
            document,
            decisions,
            ..
        } = inner;

        let report = ensure_table(
            relational.as_mut(),
            document.as_mut(),
            table,
            table,
            decisions,
            previous,
        )
        .await?;
        if report.created {
            emit!(SchemaChanged {
                action: "create",
                count: 1
            });
        }
        if !report.added.is_empty() {
            emit!(SchemaChanged {
                action: "add",
                count: report.added.len() as u64
            });
        }
        if !report.widened.is_empty() {
            emit!(SchemaChanged {
                action: "widen",
                count: report.widened.len() as u64
            });
        }
        let migrations = report.moved_to_doc.len() + report.moved_to_sql.len();
        if migrations > 0 {
            emit!(SchemaChanged {
                action: "migrate",
                count: migrations as u64
            });
        }
        if !report.skipped.is_empty() {
            warn!(
                columns = ?report.skipped,
                "Schema alterations skipped as unsafe"
            );
        }

        let primary_key = decisions
            .iter()
            .find(|(_, d)| d.is_primary_key)
            .map(|(name, _)| name.clone());
        let doc_key = select_doc_key(decisions, primary_key.as_deref());

        route_batch(
            relational.as_mut(),
            document.as_mut(),
            table,
            table,
            snapshot,
            decisions,
            primary_key.as_deref(),
            doc_key.as_deref(),
        )
        .await
    }
}
