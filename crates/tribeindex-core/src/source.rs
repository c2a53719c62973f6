//! Abstract block sources for the two ingestion pipelines.

use async_trait::async_trait;

use crate::error::IndexError;
use crate::types::{OpBlock, SidechainBlock};

/// The primary chain's operation stream, consumable as explicit range
/// fetches. Continuous streaming is a range of one.
#[async_trait]
pub trait PrimaryBlockSource: Send + Sync {
    /// Current head block number of the chain.
    async fn latest_block_num(&self) -> Result<u64, IndexError>;

    /// Fetch up to `count` blocks starting at `start`, in height order, with
    /// only the streamed operation types included.
    async fn fetch_blocks(&self, start: u64, count: u64) -> Result<Vec<OpBlock>, IndexError>;
}

/// The token-layer sidechain block API.
#[async_trait]
pub trait SidechainSource: Send + Sync {
    async fn latest_height(&self) -> Result<u64, IndexError>;

    async fn block(&self, height: u64) -> Result<Option<SidechainBlock>, IndexError>;

    /// Fetch up to `count` blocks starting at `start`, in height order.
    async fn block_range(&self, start: u64, count: u64)
        -> Result<Vec<SidechainBlock>, IndexError>;
}
