//! End-to-end pipeline tests against in-memory backends.
//!
//! These exercise the full flush loop — normalize, analyze, classify,
//! reconcile schema, route, persist, truncate — including crash recovery
//! from the write-ahead log and data migration between backends.
//!
//! Run with: cargo test --test pipeline_tests

mod support;

use serde_json::json;
use tempfile::TempDir;

use driftwood::analysis::{Backend, SqlType};
use driftwood::record::Value;
use driftwood::{Config, Pipeline};
use support::{MemoryDocument, MemoryRelational};

fn test_config(dir: &TempDir, buffer_size: usize) -> Config {
    Config::parse(&format!(
        r#"
relational:
  user: root
  password: root
document: {{}}
buffer:
  size: {buffer_size}
  timeout_seconds: 3600
metadata_dir: {}
"#,
        dir.path().display()
    ))
    .unwrap()
}

async fn pipeline_with(
    dir: &TempDir,
    buffer_size: usize,
    rel: &MemoryRelational,
    doc: &MemoryDocument,
) -> Pipeline {
    Pipeline::with_stores(
        test_config(dir, buffer_size),
        Box::new(rel.clone()),
        Box::new(doc.clone()),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_first_batch_mixed_shape() {
    let dir = TempDir::new().unwrap();
    let rel = MemoryRelational::new();
    let doc = MemoryDocument::new();
    let pipeline = pipeline_with(&dir, 100, &rel, &doc).await;

    pipeline
        .ingest_batch(vec![
            json!({"username": "alice", "age": 30, "city": "NYC"}),
            json!({"username": "bob", "score": 95.5, "metadata": {"level": 5}}),
        ])
        .await
        .unwrap();
    let summary = pipeline.flush().await.unwrap();
    assert_eq!(summary.records_processed, 2);

    let decisions = pipeline.decisions().await;
    assert_eq!(decisions["username"].backend, Backend::Both);
    assert!(decisions["username"].is_primary_key);
    assert_eq!(decisions["age"].backend, Backend::Sql);
    assert_eq!(decisions["age"].sql_type, Some(SqlType::BigInt));
    assert_eq!(decisions["city"].backend, Backend::Sql);
    assert_eq!(decisions["city"].sql_type, Some(SqlType::VarChar(255)));
    assert_eq!(decisions["score"].backend, Backend::Sql);
    assert_eq!(decisions["score"].sql_type, Some(SqlType::Double));
    assert_eq!(decisions["metadata"].backend, Backend::Doc);
    assert_eq!(decisions["sys_ingested_at"].backend, Backend::Both);

    // The nested path was probed for statistics but is not a stored field.
    let stats = pipeline.field_stats().await;
    assert!(stats.contains_key("metadata_level"));

    let rel_state = rel.state.lock().unwrap();
    assert!(rel_state.table_exists());
    assert_eq!(rel_state.primary_key(), Some("username"));
    assert!(rel_state.column("age").is_some());
    assert!(rel_state.column("score").is_some());
    // The nested value itself never becomes a column.
    assert!(rel_state.column("metadata").is_none());
    assert_eq!(rel_state.rows.len(), 2);

    let doc_state = doc.state.lock().unwrap();
    assert_eq!(doc_state.docs.len(), 2);
    let bob = doc_state
        .docs
        .iter()
        .find(|d| d["username"] == Value::Str("bob".to_owned()))
        .unwrap();
    assert!(matches!(bob["metadata"], Value::Object(_)));
}

#[tokio::test]
async fn test_linking_fields_stored_in_both_backends() {
    let dir = TempDir::new().unwrap();
    let rel = MemoryRelational::new();
    let doc = MemoryDocument::new();
    let pipeline = pipeline_with(&dir, 100, &rel, &doc).await;

    pipeline
        .ingest_batch(vec![
            json!({"username": "alice", "age": 30}),
            json!({"username": "bob", "age": 31}),
        ])
        .await
        .unwrap();
    pipeline.flush().await.unwrap();

    let rel_state = rel.state.lock().unwrap();
    let doc_state = doc.state.lock().unwrap();
    for row in &rel_state.rows {
        assert!(row.contains_key("username"));
        assert!(row.contains_key("sys_ingested_at"));
    }
    for document in &doc_state.docs {
        assert!(document.contains_key("username"));
        assert!(document.contains_key("sys_ingested_at"));
    }
}

#[tokio::test]
async fn test_upsert_on_primary_key_never_duplicates() {
    let dir = TempDir::new().unwrap();
    let rel = MemoryRelational::new();
    let doc = MemoryDocument::new();
    let pipeline = pipeline_with(&dir, 100, &rel, &doc).await;

    pipeline
        .ingest(json!({"username": "alice", "age": 30}))
        .await
        .unwrap();
    pipeline.flush().await.unwrap();

    pipeline
        .ingest(json!({"username": "alice", "age": 31}))
        .await
        .unwrap();
    pipeline.flush().await.unwrap();

    let rel_state = rel.state.lock().unwrap();
    assert_eq!(rel_state.rows.len(), 1);
    assert_eq!(rel_state.rows[0]["age"], Value::Int(31));

    let doc_state = doc.state.lock().unwrap();
    assert_eq!(doc_state.docs.len(), 1);
}

#[tokio::test]
async fn test_wal_empty_after_successful_flush() {
    let dir = TempDir::new().unwrap();
    let rel = MemoryRelational::new();
    let doc = MemoryDocument::new();
    let pipeline = pipeline_with(&dir, 100, &rel, &doc).await;

    pipeline
        .ingest(json!({"username": "alice", "age": 30}))
        .await
        .unwrap();
    let wal_path = dir.path().join("pending.jsonl");
    assert!(std::fs::metadata(&wal_path).unwrap().len() > 0);

    pipeline.flush().await.unwrap();
    assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), 0);
}

#[tokio::test]
async fn test_crash_recovery_replays_wal_without_duplicates() {
    let dir = TempDir::new().unwrap();
    let rel = MemoryRelational::new();
    let doc = MemoryDocument::new();

    // Phase 1: ingest 20 records, then "crash" before any flush.
    {
        let pipeline = pipeline_with(&dir, 100, &rel, &doc).await;
        for i in 0..20 {
            pipeline
                .ingest(json!({"username": format!("user{i}"), "age": 20 + i}))
                .await
                .unwrap();
        }
        drop(pipeline); // no close(), no flush
    }

    let wal_path = dir.path().join("pending.jsonl");
    let lines = std::fs::read_to_string(&wal_path).unwrap();
    assert_eq!(lines.lines().count(), 20);
    assert!(rel.state.lock().unwrap().rows.is_empty());

    // Phase 2: restart. Init replays the WAL and flushes immediately.
    {
        let pipeline = pipeline_with(&dir, 100, &rel, &doc).await;
        assert_eq!(rel.state.lock().unwrap().rows.len(), 20);
        assert_eq!(doc.state.lock().unwrap().docs.len(), 20);
        assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), 0);
        let status = pipeline.status().await;
        assert_eq!(status.total_records_processed, 20);
        assert_eq!(status.buffer_size, 0);
    }

    // Phase 3: restart again. Nothing to replay, nothing duplicated.
    {
        let _pipeline = pipeline_with(&dir, 100, &rel, &doc).await;
        assert_eq!(rel.state.lock().unwrap().rows.len(), 20);
        assert_eq!(doc.state.lock().unwrap().docs.len(), 20);
    }
}

#[tokio::test]
async fn test_backend_failure_retains_batch_and_wal() {
    let dir = TempDir::new().unwrap();
    let rel = MemoryRelational::new();
    let doc = MemoryDocument::new();
    let pipeline = pipeline_with(&dir, 100, &rel, &doc).await;

    pipeline
        .ingest_batch(vec![
            json!({"username": "alice", "age": 30}),
            json!({"username": "bob", "age": 31}),
        ])
        .await
        .unwrap();

    rel.state.lock().unwrap().fail_next_upsert = true;
    assert!(pipeline.flush().await.is_err());

    // Batch re-enqueued, WAL retained, statistics rolled back.
    let status = pipeline.status().await;
    assert_eq!(status.buffer_size, 2);
    assert_eq!(status.total_records_processed, 0);
    let wal_path = dir.path().join("pending.jsonl");
    assert!(std::fs::metadata(&wal_path).unwrap().len() > 0);
    assert!(pipeline.field_stats().await.is_empty());

    // The retry sees exactly one copy of the batch.
    let summary = pipeline.flush().await.unwrap();
    assert_eq!(summary.records_processed, 2);
    assert_eq!(rel.state.lock().unwrap().rows.len(), 2);
    let stats = pipeline.field_stats().await;
    assert_eq!(stats["username"].presence_count, 2);
}

#[tokio::test]
async fn test_type_widening_modifies_column() {
    let dir = TempDir::new().unwrap();
    let rel = MemoryRelational::new();
    let doc = MemoryDocument::new();
    let pipeline = pipeline_with(&dir, 1000, &rel, &doc).await;

    // First batch: integers, column lands as BIGINT.
    pipeline
        .ingest_batch(vec![
            json!({"username": "u0", "reading": 1}),
            json!({"username": "u1", "reading": 2}),
        ])
        .await
        .unwrap();
    pipeline.flush().await.unwrap();
    assert_eq!(
        rel.state.lock().unwrap().column("reading").unwrap().sql_type,
        Some(SqlType::BigInt)
    );

    // Second batch: floats dominate; the column widens to DOUBLE.
    let batch: Vec<_> = (0..40)
        .map(|i| json!({"username": format!("f{i}"), "reading": 0.5 + i as f64}))
        .collect();
    pipeline.ingest_batch(batch).await.unwrap();
    pipeline.flush().await.unwrap();

    let rel_state = rel.state.lock().unwrap();
    assert_eq!(
        rel_state.column("reading").unwrap().sql_type,
        Some(SqlType::Double)
    );
    assert!(
        rel_state
            .ddl_log
            .iter()
            .any(|stmt| stmt.contains("MODIFY reading DOUBLE"))
    );
}

#[tokio::test]
async fn test_type_drift_migrates_column_to_documents() {
    let dir = TempDir::new().unwrap();
    let rel = MemoryRelational::new();
    let doc = MemoryDocument::new();
    let pipeline = pipeline_with(&dir, 1000, &rel, &doc).await;

    // Stable integers first: `level` becomes a relational column.
    pipeline
        .ingest_batch(
            (0..4)
                .map(|i| json!({"username": format!("u{i}"), "level": i}))
                .collect(),
        )
        .await
        .unwrap();
    pipeline.flush().await.unwrap();
    assert!(rel.state.lock().unwrap().column("level").is_some());

    // Then strings arrive; stability collapses and the field flips to the
    // document side. Existing column values follow it.
    pipeline
        .ingest_batch(
            (0..4)
                .map(|i| json!({"username": format!("s{i}"), "level": format!("tier-{i}")}))
                .collect(),
        )
        .await
        .unwrap();
    pipeline.flush().await.unwrap();

    let decisions = pipeline.decisions().await;
    assert_eq!(decisions["level"].backend, Backend::Doc);

    let rel_state = rel.state.lock().unwrap();
    assert!(rel_state.column("level").is_none());

    let doc_state = doc.state.lock().unwrap();
    // The four migrated values plus the four new string values.
    let levels: Vec<_> = doc_state
        .docs
        .iter()
        .filter(|d| d.contains_key("level"))
        .collect();
    assert_eq!(levels.len(), 8);
    assert!(
        levels
            .iter()
            .any(|d| d["level"] == Value::Int(0) || d["level"] == Value::Int(1))
    );
}

#[tokio::test]
async fn test_sparse_field_becoming_dense_migrates_to_sql() {
    let dir = TempDir::new().unwrap();
    let rel = MemoryRelational::new();
    let doc = MemoryDocument::new();
    let pipeline = pipeline_with(&dir, 1000, &rel, &doc).await;

    // 60 records, `plan` present in half: below the presence floor at
    // strict sample sizes, so it stays on the document side.
    pipeline
        .ingest_batch(
            (0..60)
                .map(|i| {
                    if i % 2 == 0 {
                        json!({"username": format!("u{i}"), "plan": format!("p{i}")})
                    } else {
                        json!({"username": format!("u{i}")})
                    }
                })
                .collect(),
        )
        .await
        .unwrap();
    pipeline.flush().await.unwrap();
    assert_eq!(
        pipeline.decisions().await["plan"].backend,
        Backend::Doc
    );
    assert!(rel.state.lock().unwrap().column("plan").is_none());

    // 140 more records all carrying `plan`: presence crosses the floor and
    // the field earns a column; document-side values are migrated in.
    pipeline
        .ingest_batch(
            (60..200)
                .map(|i| json!({"username": format!("u{i}"), "plan": format!("p{i}")}))
                .collect(),
        )
        .await
        .unwrap();
    pipeline.flush().await.unwrap();

    assert_eq!(pipeline.decisions().await["plan"].backend, Backend::Sql);

    let rel_state = rel.state.lock().unwrap();
    assert!(rel_state.column("plan").is_some());
    let migrated = rel_state
        .rows
        .iter()
        .filter(|r| r.get("plan").map(|v| !v.is_null()).unwrap_or(false))
        .count();
    // 30 migrated from documents + 140 routed directly.
    assert_eq!(migrated, 170);

    let doc_state = doc.state.lock().unwrap();
    assert!(doc_state.docs.iter().all(|d| !d.contains_key("plan")));
}

#[tokio::test]
async fn test_record_missing_primary_key_skips_relational_side() {
    let dir = TempDir::new().unwrap();
    let rel = MemoryRelational::new();
    let doc = MemoryDocument::new();
    let pipeline = pipeline_with(&dir, 100, &rel, &doc).await;

    pipeline
        .ingest_batch(vec![
            json!({"username": "alice", "age": 30}),
            json!({"username": "bob", "age": 31}),
        ])
        .await
        .unwrap();
    pipeline.flush().await.unwrap();
    assert_eq!(rel.state.lock().unwrap().rows.len(), 2);

    // No username: cannot upsert safely on the relational side.
    pipeline.ingest(json!({"age": 99})).await.unwrap();
    pipeline.flush().await.unwrap();

    assert_eq!(rel.state.lock().unwrap().rows.len(), 2);
    assert_eq!(doc.state.lock().unwrap().docs.len(), 3);
}

#[tokio::test]
async fn test_buffer_size_triggers_auto_flush() {
    let dir = TempDir::new().unwrap();
    let rel = MemoryRelational::new();
    let doc = MemoryDocument::new();
    let pipeline = pipeline_with(&dir, 3, &rel, &doc).await;

    for i in 0..3 {
        pipeline
            .ingest(json!({"username": format!("user{i}"), "age": i}))
            .await
            .unwrap();
    }

    // The third ingest crossed the buffer threshold.
    let status = pipeline.status().await;
    assert_eq!(status.buffer_size, 0);
    assert_eq!(status.total_records_processed, 3);
    assert_eq!(rel.state.lock().unwrap().rows.len(), 3);
}

#[tokio::test]
async fn test_non_object_record_rejected_before_wal() {
    let dir = TempDir::new().unwrap();
    let rel = MemoryRelational::new();
    let doc = MemoryDocument::new();
    let pipeline = pipeline_with(&dir, 100, &rel, &doc).await;

    assert!(pipeline.ingest(json!([1, 2, 3])).await.is_err());
    assert!(pipeline.ingest(json!("scalar")).await.is_err());

    let wal_path = dir.path().join("pending.jsonl");
    assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), 0);
    assert_eq!(pipeline.status().await.buffer_size, 0);
}

#[tokio::test]
async fn test_corrupt_wal_line_skipped_on_recovery() {
    let dir = TempDir::new().unwrap();
    let rel = MemoryRelational::new();
    let doc = MemoryDocument::new();

    {
        let pipeline = pipeline_with(&dir, 100, &rel, &doc).await;
        pipeline
            .ingest(json!({"username": "alice", "age": 30}))
            .await
            .unwrap();
        drop(pipeline);
    }

    // Tear the log: append garbage as a torn final write.
    let wal_path = dir.path().join("pending.jsonl");
    let mut raw = std::fs::read_to_string(&wal_path).unwrap();
    raw.push_str("{\"username\": \"bob\", \"age\"");
    std::fs::write(&wal_path, raw).unwrap();

    {
        let _pipeline = pipeline_with(&dir, 100, &rel, &doc).await;
        // The intact record recovered; the torn one was skipped.
        assert_eq!(rel.state.lock().unwrap().rows.len(), 1);
    }
}

#[tokio::test]
async fn test_metadata_survives_restart() {
    let dir = TempDir::new().unwrap();
    let rel = MemoryRelational::new();
    let doc = MemoryDocument::new();

    {
        let pipeline = pipeline_with(&dir, 100, &rel, &doc).await;
        pipeline
            .ingest_batch(vec![
                json!({"username": "alice", "age": 30}),
                json!({"username": "bob", "age": 31}),
            ])
            .await
            .unwrap();
        pipeline.flush().await.unwrap();
        pipeline.close().await.unwrap();
    }

    {
        let pipeline = pipeline_with(&dir, 100, &rel, &doc).await;
        let decisions = pipeline.decisions().await;
        assert_eq!(decisions["age"].backend, Backend::Sql);
        assert!(decisions["username"].is_primary_key);

        let stats = pipeline.field_stats().await;
        assert_eq!(stats["username"].presence_count, 2);

        let status = pipeline.status().await;
        assert_eq!(status.total_records_processed, 2);

        // New records keep counting from the restored statistics.
        pipeline
            .ingest(json!({"username": "carol", "age": 32}))
            .await
            .unwrap();
        pipeline.flush().await.unwrap();
        assert_eq!(
            pipeline.field_stats().await["username"].presence_count,
            3
        );
    }
}

#[tokio::test]
async fn test_close_drains_buffer() {
    let dir = TempDir::new().unwrap();
    let rel = MemoryRelational::new();
    let doc = MemoryDocument::new();
    let pipeline = pipeline_with(&dir, 100, &rel, &doc).await;

    pipeline
        .ingest(json!({"username": "alice", "age": 30}))
        .await
        .unwrap();
    pipeline.close().await.unwrap();

    assert_eq!(rel.state.lock().unwrap().rows.len(), 1);
    let wal_path = dir.path().join("pending.jsonl");
    assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), 0);
}

#[tokio::test]
async fn test_flush_on_empty_buffer_is_a_noop() {
    let dir = TempDir::new().unwrap();
    let rel = MemoryRelational::new();
    let doc = MemoryDocument::new();
    let pipeline = pipeline_with(&dir, 100, &rel, &doc).await;

    let summary = pipeline.flush().await.unwrap();
    assert_eq!(summary.records_processed, 0);
    assert!(!rel.state.lock().unwrap().table_exists());
}

#[tokio::test]
async fn test_arrays_always_route_to_documents() {
    let dir = TempDir::new().unwrap();
    let rel = MemoryRelational::new();
    let doc = MemoryDocument::new();
    let pipeline = pipeline_with(&dir, 100, &rel, &doc).await;

    pipeline
        .ingest_batch(
            (0..10)
                .map(|i| json!({"username": format!("u{i}"), "tags": ["a", "b"]}))
                .collect(),
        )
        .await
        .unwrap();
    pipeline.flush().await.unwrap();

    assert_eq!(pipeline.decisions().await["tags"].backend, Backend::Doc);
    assert!(rel.state.lock().unwrap().column("tags").is_none());
    let doc_state = doc.state.lock().unwrap();
    assert!(doc_state.docs.iter().all(|d| d.contains_key("tags")));
}
