//! Denormalized entities of the content graph and their partial-update
//! patch types.
//!
//! Upserts apply patches with `COALESCE(excluded.col, …)`: a field left
//! `None` never destroys the stored value. This replaces the untyped
//! dict-merge upsert the data model grew up with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ─── Post ────────────────────────────────────────────────────────────────────

/// One post under one token's reward layer. A post indexed by several tokens
/// has one row per `(authorperm, token)` pair.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Post {
    pub authorperm: String,
    pub token: String,
    pub author: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub parent_author: Option<String>,
    pub parent_permlink: Option<String>,
    pub main_post: Option<bool>,
    /// Denormalized reply count, maintained incrementally.
    pub children: Option<i64>,
    pub decline_payout: Option<bool>,
    pub app: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub cashout_time: Option<DateTime<Utc>>,
    pub last_payout: Option<DateTime<Utc>>,
    pub vote_rshares: i64,
    pub score_trend: f64,
    pub score_hot: f64,
    pub promoted: f64,
}

impl Post {
    pub fn is_main_post(&self) -> bool {
        self.main_post.unwrap_or(false)
    }
}

/// Partial upsert of a Post row. `None` fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct PostUpsert {
    pub authorperm: String,
    pub token: String,
    pub author: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub parent_author: Option<String>,
    pub parent_permlink: Option<String>,
    pub main_post: Option<bool>,
    pub children: Option<i64>,
    pub decline_payout: Option<bool>,
    pub app: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub cashout_time: Option<DateTime<Utc>>,
    pub last_payout: Option<DateTime<Utc>>,
}

/// A post as returned by feed queries: the row plus the reblog attribution
/// and the timestamp that ordered it into the feed.
#[derive(Debug, Clone, FromRow)]
pub struct FeedPost {
    #[sqlx(flatten)]
    pub post: Post,
    /// Account whose reblog put this post in the feed, when applicable.
    pub reblogged_by: Option<String>,
    pub feed_timestamp: Option<DateTime<Utc>>,
}

// ─── PostMetadata ────────────────────────────────────────────────────────────

/// Token-independent metadata for a piece of content (full body, reply-tree
/// position, canonical url).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PostMetadata {
    pub authorperm: String,
    pub body: Option<String>,
    pub json_metadata: Option<String>,
    pub parent_authorperm: Option<String>,
    pub title: Option<String>,
    pub tags: Option<String>,
    /// Depth in the reply tree; root = 0. Unset until the parent is known.
    pub depth: Option<i64>,
    /// Canonical url `/{category}/{root_authorperm}`, copied down from the
    /// parent at creation time.
    pub url: Option<String>,
    pub children: Option<i64>,
}

/// Partial upsert of a PostMetadata row.
#[derive(Debug, Clone, Default)]
pub struct PostMetadataUpsert {
    pub authorperm: String,
    pub body: Option<String>,
    pub json_metadata: Option<String>,
    pub parent_authorperm: Option<String>,
    pub title: Option<String>,
    pub tags: Option<String>,
    pub depth: Option<i64>,
    pub url: Option<String>,
    pub children: Option<i64>,
}

// ─── Account ─────────────────────────────────────────────────────────────────

/// Per-token account statistics.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AccountRow {
    pub name: String,
    pub token: String,
    pub last_root_post: Option<DateTime<Utc>>,
    pub last_post: Option<DateTime<Utc>>,
    pub last_follow_refresh_time: Option<DateTime<Utc>>,
}

/// Partial upsert of an account row.
#[derive(Debug, Clone, Default)]
pub struct AccountPatch {
    pub name: String,
    pub token: String,
    pub last_root_post: Option<DateTime<Utc>>,
    pub last_post: Option<DateTime<Utc>>,
    pub last_follow_refresh_time: Option<DateTime<Utc>>,
}

// ─── Follow / Reblog / Vote ──────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FollowRow {
    pub follower: String,
    pub following: String,
    /// 0 = none, 1 = blog follow, 2 = mute.
    pub state: i64,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ReblogRow {
    pub account: String,
    pub authorperm: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct VoteRow {
    pub authorperm: String,
    pub voter: String,
    pub token: String,
    pub percent: Option<i64>,
    pub rshares: i64,
    pub timestamp: Option<DateTime<Utc>>,
}

// ─── Token configuration row ─────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TokenConfigRow {
    pub token: String,
    pub reward_pool_id: i64,
    pub issuer: String,
    pub promoted_post_account: Option<String>,
}

impl From<TokenConfigRow> for tribeindex_core::TokenConfig {
    fn from(row: TokenConfigRow) -> Self {
        Self {
            token: row.token,
            reward_pool_id: row.reward_pool_id,
            issuer: row.issuer,
            promoted_post_account: row.promoted_post_account,
        }
    }
}

impl From<tribeindex_core::TokenConfig> for TokenConfigRow {
    fn from(cfg: tribeindex_core::TokenConfig) -> Self {
        Self {
            token: cfg.token,
            reward_pool_id: cfg.reward_pool_id,
            issuer: cfg.issuer,
            promoted_post_account: cfg.promoted_post_account,
        }
    }
}
