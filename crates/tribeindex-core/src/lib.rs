//! tribeindex-core — foundation for the token-aware content graph indexer.
//!
//! # Architecture
//!
//! ```text
//! StreamProcessor / SidechainProcessor
//!         ├── classify          (envelope → typed operation)
//!         ├── EditReconciler    (patch scripts → full bodies)
//!         ├── CheckpointStore   (crash recovery, per source)
//!         ├── TokenRegistry     (shared token lookup table)
//!         └── GraphStore        (tribeindex-storage)
//! QueryEngine (tribeindex-query) reads the same store.
//! ```

pub mod checkpoint;
pub mod classify;
pub mod config;
pub mod error;
pub mod node;
pub mod patcher;
pub mod retry;
pub mod scoring;
pub mod source;
pub mod types;

pub use checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore, StreamSource};
pub use classify::{classify, classify_transaction, ClassifiedOp, SidechainAction};
pub use config::IndexerConfig;
pub use error::IndexError;
pub use node::{NodeClient, NodeContent};
pub use patcher::{BodyPatcher, EditReconciler, PREVIEW_LEN};
pub use retry::RetryPolicy;
pub use source::{PrimaryBlockSource, SidechainSource};
pub use types::{
    construct_authorperm, resolve_authorperm, OpBlock, OperationEnvelope, SidechainBlock,
    SidechainTransaction, TokenConfig, TokenRegistry,
};
