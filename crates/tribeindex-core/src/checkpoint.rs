//! Checkpoint management — persists each processor's position for crash
//! recovery.
//!
//! One checkpoint row per stream source (primary chain, sidechain). On
//! restart a processor resumes from the last committed height + 1. The
//! durable store writes the checkpoint inside the same transaction as the
//! block's mutations; this trait covers loading and the in-memory test
//! double.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// The two independent ingestion pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamSource {
    Primary,
    Sidechain,
}

impl StreamSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Sidechain => "sidechain",
        }
    }
}

impl std::fmt::Display for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted ingestion checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub source: StreamSource,
    /// Last fully committed block height.
    pub last_height: u64,
    /// Timestamp of that block, used for the cross-source watermark gate.
    pub last_timestamp: Option<DateTime<Utc>>,
}

/// Trait for storing and loading checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, source: StreamSource) -> Result<Option<Checkpoint>, IndexError>;

    /// Save (upsert) a checkpoint.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexError>;

    /// Delete a checkpoint (e.g. when resetting a pipeline).
    async fn delete(&self, source: StreamSource) -> Result<(), IndexError>;
}

// ─── In-memory store (for testing) ───────────────────────────────────────────

use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory checkpoint store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<StreamSource, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, source: StreamSource) -> Result<Option<Checkpoint>, IndexError> {
        Ok(self.data.lock().unwrap().get(&source).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexError> {
        self.data.lock().unwrap().insert(checkpoint.source, checkpoint);
        Ok(())
    }

    async fn delete(&self, source: StreamSource) -> Result<(), IndexError> {
        self.data.lock().unwrap().remove(&source);
        Ok(())
    }
}
