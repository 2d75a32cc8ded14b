//! Write-ahead log.
//!
//! One normalized record per line, appended and fsynced before `ingest`
//! acknowledges. After a fully successful flush the file is truncated to
//! length zero in place (never deleted and recreated), so a reader holding
//! the path always sees a consistent file. On startup a non-empty WAL is
//! replayed; corrupt lines are skipped with a log entry rather than
//! aborting recovery.

use std::path::{Path, PathBuf};

use snafu::ResultExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::{
    WalAppendSnafu, WalEncodeSnafu, WalError, WalOpenSnafu, WalReadSnafu, WalSyncSnafu,
    WalTruncateSnafu,
};
use crate::record::{Record, coerce_record};

pub const WAL_FILE: &str = "pending.jsonl";

pub struct WriteAheadLog {
    path: PathBuf,
    file: File,
    /// Lines currently in the file; kept so status checks need no I/O.
    pending: usize,
}

impl WriteAheadLog {
    /// Open (or create) the WAL inside the metadata directory.
    pub async fn open(metadata_dir: &Path) -> Result<Self, WalError> {
        let path = metadata_dir.join(WAL_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .context(WalOpenSnafu {
                path: path.display().to_string(),
            })?;
        Ok(Self {
            path,
            file,
            pending: 0,
        })
    }

    /// Append one record and fsync. The record is durable once this
    /// returns.
    pub async fn append(&mut self, record: &Record) -> Result<(), WalError> {
        let mut line = serde_json::to_string(record).context(WalEncodeSnafu)?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .await
            .context(WalAppendSnafu)?;
        self.file.sync_data().await.context(WalSyncSnafu)?;
        self.pending += 1;
        Ok(())
    }

    /// Read back every record in the log, in append order.
    ///
    /// Replayed records were already normalized before they were appended;
    /// parsing re-applies leaf coercion (idempotent) to restore the typed
    /// variants. Corrupt lines are counted, logged and skipped.
    pub async fn replay(&mut self) -> Result<Vec<Record>, WalError> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .context(WalReadSnafu)?;

        let mut records = Vec::new();
        let mut corrupt = 0usize;
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Record>(line) {
                Ok(record) => records.push(coerce_record(record)),
                Err(e) => {
                    corrupt += 1;
                    warn!(error = %e, "Skipping corrupt WAL line during replay");
                }
            }
        }

        if !records.is_empty() || corrupt > 0 {
            info!(
                records = records.len(),
                corrupt,
                "Replayed write-ahead log"
            );
        }
        self.pending = records.len();
        Ok(records)
    }

    /// Truncate the log to length zero after a successful flush.
    pub async fn truncate(&mut self) -> Result<(), WalError> {
        self.file.set_len(0).await.context(WalTruncateSnafu)?;
        self.file.sync_data().await.context(WalSyncSnafu)?;
        self.pending = 0;
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
