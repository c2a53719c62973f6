//! Reblog handler.
//!
//! A reblog is only accepted for a post that is itself a root post; an
//! explicit un-reblog removes the row again.

use tracing::debug;

use tribeindex_core::classify::ReblogOp;
use tribeindex_core::error::IndexError;
use tribeindex_core::types::construct_authorperm;
use tribeindex_storage::BlockWriter;

pub async fn process(writer: &mut BlockWriter, op: &ReblogOp) -> Result<(), IndexError> {
    let authorperm = construct_authorperm(&op.author, &op.permlink);
    let posts = writer.post_rows(&authorperm).await?;
    let Some(first) = posts.first() else {
        debug!(authorperm, "reblog of unindexed post ignored");
        return Ok(());
    };
    if !first.parent_author.as_deref().unwrap_or_default().is_empty() {
        debug!(authorperm, "reblog of a reply ignored");
        return Ok(());
    }

    if op.delete {
        writer.delete_reblog(&op.account, &authorperm).await
    } else {
        writer
            .upsert_reblog(&op.account, &authorperm, op.timestamp)
            .await
    }
}
