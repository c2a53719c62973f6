//! Block-scoped write transactions.
//!
//! All operations belonging to one block height are applied inside one
//! [`BlockWriter`]; the checkpoint row for that height is written through the
//! same transaction. A crash mid-block therefore loses none or all of the
//! block's effects. Dropping a writer without committing discards it.

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};

use tribeindex_core::checkpoint::Checkpoint;
use tribeindex_core::error::IndexError;

use crate::entities::{
    AccountPatch, Post, PostMetadata, PostMetadataUpsert, PostUpsert, ReblogRow, VoteRow,
};
use crate::queries;

/// One block's worth of content-graph mutations.
pub struct BlockWriter {
    tx: Transaction<'static, Sqlite>,
}

impl BlockWriter {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx }
    }

    /// Commit the block's mutations and its checkpoint atomically.
    pub async fn commit(self) -> Result<(), IndexError> {
        self.tx.commit().await.map_err(queries::err)
    }

    // ─── In-transaction reads ───────────────────────────────────────────────
    //
    // Handlers must see rows written earlier in the same block (idempotence
    // checks, parent lookups), so these run on the transaction.

    pub async fn post_rows(&mut self, authorperm: &str) -> Result<Vec<Post>, IndexError> {
        queries::get_post_rows(&mut *self.tx, authorperm).await
    }

    pub async fn token_post(
        &mut self,
        token: &str,
        authorperm: &str,
    ) -> Result<Option<Post>, IndexError> {
        queries::get_token_post(&mut *self.tx, token, authorperm).await
    }

    pub async fn post_metadata(
        &mut self,
        authorperm: &str,
    ) -> Result<Option<PostMetadata>, IndexError> {
        queries::get_post_metadata(&mut *self.tx, authorperm).await
    }

    pub async fn vote(
        &mut self,
        authorperm: &str,
        voter: &str,
        token: &str,
    ) -> Result<Option<VoteRow>, IndexError> {
        queries::get_vote(&mut *self.tx, authorperm, voter, token).await
    }

    pub async fn reblog(
        &mut self,
        account: &str,
        authorperm: &str,
    ) -> Result<Option<ReblogRow>, IndexError> {
        queries::get_reblog(&mut *self.tx, account, authorperm).await
    }

    // ─── Mutations ──────────────────────────────────────────────────────────

    pub async fn upsert_post(&mut self, post: &PostUpsert) -> Result<(), IndexError> {
        queries::upsert_post(&mut *self.tx, post).await
    }

    pub async fn delete_posts(&mut self, authorperm: &str) -> Result<u64, IndexError> {
        queries::delete_posts(&mut *self.tx, authorperm).await
    }

    pub async fn adjust_post_children(
        &mut self,
        authorperm: &str,
        delta: i64,
    ) -> Result<(), IndexError> {
        queries::adjust_post_children(&mut *self.tx, authorperm, delta).await
    }

    pub async fn update_post_economics(
        &mut self,
        authorperm: &str,
        token: &str,
        vote_rshares: i64,
        score_trend: f64,
        score_hot: f64,
    ) -> Result<(), IndexError> {
        queries::update_post_economics(
            &mut *self.tx,
            authorperm,
            token,
            vote_rshares,
            score_trend,
            score_hot,
        )
        .await
    }

    pub async fn add_promoted(
        &mut self,
        authorperm: &str,
        token: &str,
        amount: f64,
    ) -> Result<(), IndexError> {
        queries::add_promoted(&mut *self.tx, authorperm, token, amount).await
    }

    pub async fn upsert_post_metadata(
        &mut self,
        meta: &PostMetadataUpsert,
    ) -> Result<(), IndexError> {
        queries::upsert_post_metadata(&mut *self.tx, meta).await
    }

    pub async fn increment_metadata_children(
        &mut self,
        authorperm: &str,
    ) -> Result<(), IndexError> {
        queries::increment_metadata_children(&mut *self.tx, authorperm).await
    }

    pub async fn decrement_metadata_children(
        &mut self,
        authorperm: &str,
    ) -> Result<(), IndexError> {
        queries::decrement_metadata_children(&mut *self.tx, authorperm).await
    }

    pub async fn merge_account(&mut self, patch: &AccountPatch) -> Result<(), IndexError> {
        queries::merge_account(&mut *self.tx, patch).await
    }

    pub async fn upsert_follow(
        &mut self,
        follower: &str,
        following: &str,
        state: i64,
    ) -> Result<(), IndexError> {
        queries::upsert_follow(&mut *self.tx, follower, following, state).await
    }

    pub async fn upsert_reblog(
        &mut self,
        account: &str,
        authorperm: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), IndexError> {
        queries::upsert_reblog(&mut *self.tx, account, authorperm, timestamp).await
    }

    pub async fn delete_reblog(
        &mut self,
        account: &str,
        authorperm: &str,
    ) -> Result<(), IndexError> {
        queries::delete_reblog(&mut *self.tx, account, authorperm).await
    }

    pub async fn upsert_vote(&mut self, vote: &VoteRow) -> Result<(), IndexError> {
        queries::upsert_vote(&mut *self.tx, vote).await
    }

    pub async fn upsert_token_config(
        &mut self,
        config: &crate::entities::TokenConfigRow,
    ) -> Result<(), IndexError> {
        queries::upsert_token_config(&mut *self.tx, config).await
    }

    /// Write the block's checkpoint; committed together with the mutations.
    pub async fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), IndexError> {
        queries::save_checkpoint(&mut *self.tx, checkpoint).await
    }
}
