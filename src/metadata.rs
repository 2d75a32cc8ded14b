//! Metadata persistence.
//!
//! Decisions, field statistics and pipeline state are written as JSON under
//! the metadata directory, each via write-to-temp + rename so a crash
//! mid-write can never leave a half-written file. Unreadable metadata on
//! startup degrades to a cold start; it never aborts recovery.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::analysis::{FieldStats, PlacementDecision};
use crate::error::{
    MetaDirSnafu, MetaEncodeSnafu, MetaReadSnafu, MetaRenameSnafu, MetaWriteSnafu, MetadataError,
};

pub const DECISIONS_FILE: &str = "decisions.json";
pub const FIELD_STATS_FILE: &str = "field_stats.json";
pub const STATE_FILE: &str = "state.json";

fn default_state_version() -> u32 {
    1
}

/// Pipeline state persisted across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub total_records_processed: u64,
    pub last_flush_time: Option<DateTime<Utc>>,
    /// Format version for forward compatibility.
    #[serde(default = "default_state_version")]
    pub version: u32,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            total_records_processed: 0,
            last_flush_time: None,
            version: default_state_version(),
        }
    }
}

pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    /// Open the store, creating the directory if needed.
    pub async fn open(dir: &Path) -> Result<Self, MetadataError> {
        tokio::fs::create_dir_all(dir).await.context(MetaDirSnafu {
            path: dir.display().to_string(),
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Persist decisions, stats and state together, each atomically.
    pub async fn save_all(
        &self,
        decisions: &IndexMap<String, PlacementDecision>,
        stats: &IndexMap<String, FieldStats>,
        state: &PipelineState,
    ) -> Result<(), MetadataError> {
        self.write_atomic(DECISIONS_FILE, decisions).await?;
        self.write_atomic(FIELD_STATS_FILE, stats).await?;
        self.write_atomic(STATE_FILE, state).await?;
        Ok(())
    }

    async fn write_atomic<T: Serialize>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<(), MetadataError> {
        let json = serde_json::to_string_pretty(value).context(MetaEncodeSnafu)?;
        let target = self.dir.join(name);
        let temp = self.dir.join(format!(".{name}.tmp"));

        let mut file = tokio::fs::File::create(&temp)
            .await
            .context(MetaWriteSnafu {
                path: temp.display().to_string(),
            })?;
        file.write_all(json.as_bytes())
            .await
            .context(MetaWriteSnafu {
                path: temp.display().to_string(),
            })?;
        file.sync_data().await.context(MetaWriteSnafu {
            path: temp.display().to_string(),
        })?;
        drop(file);

        tokio::fs::rename(&temp, &target)
            .await
            .context(MetaRenameSnafu {
                path: target.display().to_string(),
            })?;
        Ok(())
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(
        &self,
        name: &str,
    ) -> Result<Option<T>, MetadataError> {
        let path = self.dir.join(name);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).context(MetaReadSnafu {
                    path: path.display().to_string(),
                });
            }
        };
        let value = serde_json::from_str(&contents).context(crate::error::MetaDecodeSnafu {
            path: path.display().to_string(),
        })?;
        Ok(Some(value))
    }

    pub async fn load_decisions(
        &self,
    ) -> Result<IndexMap<String, PlacementDecision>, MetadataError> {
        Ok(self.read_json(DECISIONS_FILE).await?.unwrap_or_default())
    }

    pub async fn load_field_stats(
        &self,
    ) -> Result<IndexMap<String, FieldStats>, MetadataError> {
        Ok(self.read_json(FIELD_STATS_FILE).await?.unwrap_or_default())
    }

    pub async fn load_state(&self) -> Result<PipelineState, MetadataError> {
        Ok(self.read_json(STATE_FILE).await?.unwrap_or_default())
    }

    /// Load everything for startup. Any read failure is logged and treated
    /// as a cold start; a present WAL is still replayed by the caller.
    pub async fn load_all(
        &self,
    ) -> (
        IndexMap<String, PlacementDecision>,
        IndexMap<String, FieldStats>,
        PipelineState,
    ) {
        let decisions = self.load_decisions().await.unwrap_or_else(|e| {
            warn!(error = %e, "Unreadable decisions metadata; cold start");
            IndexMap::new()
        });
        let stats = self.load_field_stats().await.unwrap_or_else(|e| {
            warn!(error = %e, "Unreadable field-stats metadata; cold start");
            IndexMap::new()
        });
        let state = self.load_state().await.unwrap_or_else(|e| {
            warn!(error = %e, "Unreadable state metadata; cold start");
            PipelineState::default()
        });

        if !decisions.is_empty() {
            info!(
                fields = decisions.len(),
                total_records = state.total_records_processed,
                "Restored pipeline metadata"
            );
        }
        (decisions, stats, state)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
