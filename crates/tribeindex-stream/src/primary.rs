//! The primary stream processor.
//!
//! Pulls operation blocks from the chain source, classifies each operation,
//! and applies the resulting mutations inside one transaction per block; the
//! checkpoint row commits with the block. Two gates defer processing without
//! error: the block must be older than the confirmation delay, and the
//! sidechain watermark must have passed the block's timestamp. A deferred
//! block is redelivered in full after the wait — every handler is
//! idempotent, so redelivery is safe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use tribeindex_core::checkpoint::{Checkpoint, CheckpointStore, StreamSource};
use tribeindex_core::classify::{classify, ClassifiedOp};
use tribeindex_core::config::IndexerConfig;
use tribeindex_core::error::IndexError;
use tribeindex_core::node::NodeClient;
use tribeindex_core::patcher::EditReconciler;
use tribeindex_core::retry::RetryPolicy;
use tribeindex_core::source::PrimaryBlockSource;
use tribeindex_core::types::{OpBlock, OperationEnvelope, TokenRegistry};
use tribeindex_storage::GraphStore;

use crate::{comment, follow, reblog, tribe};

/// Why a block was deferred rather than applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// The block is younger than the confirmation delay.
    TooFresh,
    /// The sidechain watermark has not caught up to the block's timestamp.
    SidechainLag,
}

/// Outcome of offering one block to the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Applied,
    Waiting(WaitReason),
}

/// Drives the primary ingestion loop.
pub struct StreamProcessor<'a> {
    store: &'a GraphStore,
    source: &'a dyn PrimaryBlockSource,
    node: Option<&'a dyn NodeClient>,
    tokens: Arc<TokenRegistry>,
    config: IndexerConfig,
    shutdown: Arc<AtomicBool>,
}

impl<'a> StreamProcessor<'a> {
    pub fn new(
        store: &'a GraphStore,
        source: &'a dyn PrimaryBlockSource,
        node: Option<&'a dyn NodeClient>,
        tokens: Arc<TokenRegistry>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            store,
            source,
            node,
            tokens,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked at block boundaries; an in-flight block transaction is
    /// discarded, never half-committed.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    fn reconciler(&self) -> EditReconciler<'_> {
        EditReconciler::new(self.node, RetryPolicy::new(self.config.fetch_retries))
    }

    /// Run until interrupted.
    pub async fn run(&self) -> Result<(), IndexError> {
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let mut next = self.starting_height().await?;
        info!(start = next, "primary stream starting");

        while !self.shutdown.load(Ordering::Relaxed) {
            let head = match self.source.latest_block_num().await {
                Ok(head) => head,
                Err(err) => {
                    warn!(%err, "head lookup failed");
                    tokio::time::sleep(poll).await;
                    continue;
                }
            };
            if next > head {
                debug!(next, head, "caught up, waiting for new blocks");
                tokio::time::sleep(poll).await;
                continue;
            }

            let count = if self.config.bulk_blocks {
                self.config.batch_size.min(head - next + 1)
            } else {
                1
            };
            let blocks = match self.source.fetch_blocks(next, count).await {
                Ok(blocks) => blocks,
                Err(err) => {
                    // A failed range fetch degrades to an empty result.
                    warn!(start = next, count, %err, "block fetch failed");
                    vec![]
                }
            };
            if blocks.is_empty() {
                tokio::time::sleep(poll).await;
                continue;
            }

            for block in &blocks {
                if self.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                match self.process_block(block).await? {
                    BlockOutcome::Applied => next = block.num + 1,
                    BlockOutcome::Waiting(reason) => {
                        debug!(block = block.num, ?reason, "deferring block");
                        tokio::time::sleep(poll).await;
                        break;
                    }
                }
            }
        }
        info!("primary stream stopped");
        Ok(())
    }

    /// Resume from the committed checkpoint, or start at the current head on
    /// a fresh database.
    async fn starting_height(&self) -> Result<u64, IndexError> {
        if let Some(cp) = self.store.load(StreamSource::Primary).await? {
            if cp.last_height > 0 {
                info!(height = cp.last_height, "resuming from checkpoint");
                return Ok(cp.last_height + 1);
            }
        }
        let head = self.source.latest_block_num().await?;
        self.store
            .save(Checkpoint {
                source: StreamSource::Primary,
                last_height: head.saturating_sub(1),
                last_timestamp: None,
            })
            .await?;
        Ok(head)
    }

    /// Offer one block: check the gates, then apply all of its operations
    /// and the checkpoint in a single transaction.
    pub async fn process_block(&self, block: &OpBlock) -> Result<BlockOutcome, IndexError> {
        let age = Utc::now().signed_duration_since(block.timestamp);
        if age.num_seconds() < self.config.confirmation_delay_secs {
            return Ok(BlockOutcome::Waiting(WaitReason::TooFresh));
        }
        let sidechain_ts = self
            .store
            .load(StreamSource::Sidechain)
            .await?
            .and_then(|cp| cp.last_timestamp);
        match sidechain_ts {
            Some(watermark) if block.timestamp < watermark => {}
            _ => return Ok(BlockOutcome::Waiting(WaitReason::SidechainLag)),
        }

        let reconciler = self.reconciler();
        let mut writer = self.store.begin_block().await?;
        for op in &block.operations {
            if let Err(err) = self.apply_op(&mut writer, &reconciler, op).await {
                // Skip-and-log: the block still commits and the gap is
                // visible in the log.
                error!(block = block.num, %err, "operation failed, skipping");
            }
        }
        writer
            .save_checkpoint(&Checkpoint {
                source: StreamSource::Primary,
                last_height: block.num,
                last_timestamp: Some(block.timestamp),
            })
            .await?;
        writer.commit().await?;
        debug!(block = block.num, ops = block.operations.len(), "block committed");
        Ok(BlockOutcome::Applied)
    }

    async fn apply_op(
        &self,
        writer: &mut tribeindex_storage::BlockWriter,
        reconciler: &EditReconciler<'_>,
        envelope: &OperationEnvelope,
    ) -> Result<(), IndexError> {
        match classify(envelope) {
            ClassifiedOp::Comment(op) => {
                comment::process(writer, reconciler, &self.tokens, &op).await
            }
            ClassifiedOp::DeleteComment { author, permlink } => {
                comment::process_delete(writer, &author, &permlink).await
            }
            ClassifiedOp::Follow(op) => follow::process(writer, &op).await,
            ClassifiedOp::Reblog(op) => reblog::process(writer, &op).await,
            ClassifiedOp::TribeSettings(op) => {
                tribe::process(writer, &self.tokens, &op).await
            }
            ClassifiedOp::NoOp(reason) => {
                debug!(block = envelope.block_num, reason, "operation ignored");
                Ok(())
            }
        }
    }
}
