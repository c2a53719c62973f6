//! tribeindex-stream — the two ingestion pipelines.
//!
//! ```text
//! StreamProcessor     (primary chain: comments, follows, reblogs, settings)
//! SidechainProcessor  (token layer: comment economics, votes, promotions)
//! ```
//!
//! Both loops are sequential, commit one transaction per block with the
//! checkpoint riding along, and are idempotent under redelivery.

pub mod comment;
pub mod contracts;
pub mod follow;
pub mod primary;
pub mod reblog;
pub mod sidechain;
pub mod tribe;

pub use primary::{BlockOutcome, StreamProcessor, WaitReason};
pub use sidechain::SidechainProcessor;
