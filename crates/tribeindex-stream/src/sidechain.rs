//! The sidechain stream processor.
//!
//! Symmetric to the primary loop but keyed by sidechain block height:
//! iterates the transactions of each block, dispatches the matching contract
//! handler, and commits the block's mutations together with the sidechain
//! checkpoint. Per-transaction failures are logged and skipped; the block
//! still commits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use tribeindex_core::checkpoint::{Checkpoint, CheckpointStore, StreamSource};
use tribeindex_core::classify::{classify_transaction, SidechainAction};
use tribeindex_core::config::IndexerConfig;
use tribeindex_core::error::IndexError;
use tribeindex_core::source::SidechainSource;
use tribeindex_core::types::{SidechainBlock, TokenRegistry};
use tribeindex_storage::GraphStore;

use crate::contracts;

/// Drives the sidechain ingestion loop.
pub struct SidechainProcessor<'a> {
    store: &'a GraphStore,
    source: &'a dyn SidechainSource,
    tokens: Arc<TokenRegistry>,
    config: IndexerConfig,
    shutdown: Arc<AtomicBool>,
}

impl<'a> SidechainProcessor<'a> {
    pub fn new(
        store: &'a GraphStore,
        source: &'a dyn SidechainSource,
        tokens: Arc<TokenRegistry>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            store,
            source,
            tokens,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run until interrupted.
    pub async fn run(&self) -> Result<(), IndexError> {
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let mut next = self.starting_height().await?;
        info!(start = next, "sidechain stream starting");

        while !self.shutdown.load(Ordering::Relaxed) {
            let head = match self.source.latest_height().await {
                Ok(head) => head,
                Err(err) => {
                    warn!(%err, "sidechain head lookup failed");
                    tokio::time::sleep(poll).await;
                    continue;
                }
            };
            if next > head {
                debug!(next, head, "sidechain caught up");
                tokio::time::sleep(poll).await;
                continue;
            }

            let blocks = self.fetch(next, head).await;
            if blocks.is_empty() {
                tokio::time::sleep(poll).await;
                continue;
            }
            for block in &blocks {
                if self.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                self.process_block(block).await?;
                next = block.height + 1;
            }
        }
        info!("sidechain stream stopped");
        Ok(())
    }

    async fn fetch(&self, start: u64, head: u64) -> Vec<SidechainBlock> {
        if self.config.sidechain_bulk_blocks {
            let count = self.config.sidechain_chunk_size.min(head - start + 1);
            match self.source.block_range(start, count).await {
                Ok(blocks) => blocks,
                Err(err) => {
                    // Fall back to a single-block fetch on range errors.
                    warn!(start, count, %err, "range fetch failed, trying single block");
                    self.fetch_single(start).await
                }
            }
        } else {
            self.fetch_single(start).await
        }
    }

    async fn fetch_single(&self, height: u64) -> Vec<SidechainBlock> {
        match self.source.block(height).await {
            Ok(Some(block)) => vec![block],
            Ok(None) => vec![],
            Err(err) => {
                warn!(height, %err, "sidechain block fetch failed");
                vec![]
            }
        }
    }

    async fn starting_height(&self) -> Result<u64, IndexError> {
        if let Some(cp) = self.store.load(StreamSource::Sidechain).await? {
            if cp.last_height > 0 {
                info!(height = cp.last_height, "resuming sidechain from checkpoint");
                return Ok(cp.last_height + 1);
            }
        }
        let head = self.source.latest_height().await?;
        self.store
            .save(Checkpoint {
                source: StreamSource::Sidechain,
                last_height: head.saturating_sub(1),
                last_timestamp: None,
            })
            .await?;
        Ok(head)
    }

    /// Apply one sidechain block in a single transaction.
    pub async fn process_block(&self, block: &SidechainBlock) -> Result<(), IndexError> {
        let mut writer = self.store.begin_block().await?;
        if block.transactions.is_empty() {
            debug!(height = block.height, "no transactions in block");
        }
        for tx in &block.transactions {
            let result = match classify_transaction(tx) {
                SidechainAction::CommentsContract { action, payload } => {
                    contracts::process_comments_contract(
                        &mut writer,
                        &self.tokens,
                        &action,
                        &payload,
                        block.timestamp,
                    )
                    .await
                }
                SidechainAction::TokenTransfer(transfer) => {
                    contracts::process_promotion(&mut writer, &self.tokens, &transfer).await
                }
                SidechainAction::Ignored(reason) => {
                    debug!(height = block.height, reason, "transaction ignored");
                    Ok(())
                }
            };
            if let Err(err) = result {
                error!(height = block.height, %err, "transaction failed, skipping");
            }
        }
        writer
            .save_checkpoint(&Checkpoint {
                source: StreamSource::Sidechain,
                last_height: block.height,
                last_timestamp: Some(block.timestamp),
            })
            .await?;
        writer.commit().await?;
        debug!(height = block.height, "sidechain block committed");
        Ok(())
    }
}
