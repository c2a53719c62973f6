//! SQLite-backed content graph store.
//!
//! One database holds posts, metadata, accounts, follows, reblogs, votes,
//! token configuration, and the two ingestion checkpoints. Uses `sqlx` with
//! WAL mode for concurrent read performance; both processors write through
//! [`BlockWriter`] transactions while the query engine reads from the pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use tribeindex_core::checkpoint::{Checkpoint, CheckpointStore, StreamSource};
use tribeindex_core::error::IndexError;

use crate::entities::{
    AccountPatch, AccountRow, FollowRow, Post, PostMetadata, PostMetadataUpsert, ReblogRow,
    TokenConfigRow, VoteRow,
};
use crate::queries;
use crate::writer::BlockWriter;

/// The shared content graph store.
pub struct GraphStore {
    pool: SqlitePool,
}

impl GraphStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./tribeindex.db"`) or a full
    /// SQLite URL (`"sqlite:./tribeindex.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let pool = SqlitePool::connect(&url).await.map_err(queries::err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory database. All data is lost when the pool is
    /// dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, IndexError> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(queries::err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(queries::err)?;

        let statements = [
            "CREATE TABLE IF NOT EXISTS checkpoints (
                source         TEXT PRIMARY KEY,
                last_height    INTEGER NOT NULL,
                last_timestamp TEXT
            );",
            "CREATE TABLE IF NOT EXISTS posts (
                authorperm      TEXT NOT NULL,
                token           TEXT NOT NULL,
                author          TEXT NOT NULL,
                title           TEXT,
                description     TEXT,
                tags            TEXT,
                parent_author   TEXT,
                parent_permlink TEXT,
                main_post       INTEGER,
                children        INTEGER,
                decline_payout  INTEGER,
                app             TEXT,
                created         TEXT,
                cashout_time    TEXT,
                last_payout     TEXT,
                vote_rshares    INTEGER NOT NULL DEFAULT 0,
                score_trend     REAL NOT NULL DEFAULT 0,
                score_hot       REAL NOT NULL DEFAULT 0,
                promoted        REAL NOT NULL DEFAULT 0,
                PRIMARY KEY (authorperm, token)
            );",
            "CREATE INDEX IF NOT EXISTS idx_posts_token_created
                 ON posts (token, main_post, created);",
            "CREATE INDEX IF NOT EXISTS idx_posts_token_trend
                 ON posts (token, main_post, score_trend);",
            "CREATE INDEX IF NOT EXISTS idx_posts_token_hot
                 ON posts (token, main_post, score_hot);",
            "CREATE INDEX IF NOT EXISTS idx_posts_author ON posts (author, token);",
            "CREATE INDEX IF NOT EXISTS idx_posts_parent_author
                 ON posts (parent_author, token);",
            "CREATE TABLE IF NOT EXISTS post_metadata (
                authorperm        TEXT PRIMARY KEY,
                body              TEXT,
                json_metadata     TEXT,
                parent_authorperm TEXT,
                title             TEXT,
                tags              TEXT,
                depth             INTEGER,
                url               TEXT,
                children          INTEGER
            );",
            "CREATE INDEX IF NOT EXISTS idx_post_metadata_url ON post_metadata (url);",
            "CREATE TABLE IF NOT EXISTS accounts (
                name                     TEXT NOT NULL,
                token                    TEXT NOT NULL,
                last_root_post           TEXT,
                last_post                TEXT,
                last_follow_refresh_time TEXT,
                PRIMARY KEY (name, token)
            );",
            "CREATE TABLE IF NOT EXISTS follows (
                follower  TEXT NOT NULL,
                following TEXT NOT NULL,
                state     INTEGER NOT NULL,
                PRIMARY KEY (follower, following)
            );",
            "CREATE TABLE IF NOT EXISTS reblogs (
                account    TEXT NOT NULL,
                authorperm TEXT NOT NULL,
                timestamp  TEXT NOT NULL,
                PRIMARY KEY (account, authorperm)
            );",
            "CREATE INDEX IF NOT EXISTS idx_reblogs_authorperm ON reblogs (authorperm);",
            "CREATE TABLE IF NOT EXISTS votes (
                authorperm TEXT NOT NULL,
                voter      TEXT NOT NULL,
                token      TEXT NOT NULL,
                percent    INTEGER,
                rshares    INTEGER NOT NULL DEFAULT 0,
                timestamp  TEXT,
                PRIMARY KEY (authorperm, voter, token)
            );",
            "CREATE TABLE IF NOT EXISTS token_config (
                token                 TEXT PRIMARY KEY,
                reward_pool_id        INTEGER NOT NULL,
                issuer                TEXT NOT NULL,
                promoted_post_account TEXT
            );",
            "CREATE INDEX IF NOT EXISTS idx_token_config_pool
                 ON token_config (reward_pool_id);",
        ];
        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await.map_err(queries::err)?;
        }
        Ok(())
    }

    /// Begin a block-scoped write transaction.
    pub async fn begin_block(&self) -> Result<BlockWriter, IndexError> {
        let tx = self.pool.begin().await.map_err(queries::err)?;
        Ok(BlockWriter::new(tx))
    }

    // ─── Reads ──────────────────────────────────────────────────────────────

    pub async fn post_rows(&self, authorperm: &str) -> Result<Vec<Post>, IndexError> {
        queries::get_post_rows(&self.pool, authorperm).await
    }

    pub async fn token_post(
        &self,
        token: &str,
        authorperm: &str,
    ) -> Result<Option<Post>, IndexError> {
        queries::get_token_post(&self.pool, token, authorperm).await
    }

    pub async fn post_metadata(
        &self,
        authorperm: &str,
    ) -> Result<Option<PostMetadata>, IndexError> {
        queries::get_post_metadata(&self.pool, authorperm).await
    }

    pub async fn account(&self, name: &str, token: &str) -> Result<Option<AccountRow>, IndexError> {
        queries::get_account(&self.pool, name, token).await
    }

    pub async fn accounts(&self, name: &str) -> Result<Vec<AccountRow>, IndexError> {
        queries::get_accounts(&self.pool, name).await
    }

    pub async fn follow_refresh_time(
        &self,
        name: &str,
    ) -> Result<Option<DateTime<Utc>>, IndexError> {
        queries::follow_refresh_time(&self.pool, name).await
    }

    pub async fn following(
        &self,
        follower: Option<&str>,
        following: Option<&str>,
        state: Option<i64>,
        start: Option<&str>,
        limit: i64,
    ) -> Result<Vec<FollowRow>, IndexError> {
        queries::get_following(&self.pool, follower, following, state, start, limit).await
    }

    pub async fn follow_counts(&self, account: &str) -> Result<(i64, i64), IndexError> {
        queries::follow_counts(&self.pool, account).await
    }

    pub async fn reblog(
        &self,
        account: &str,
        authorperm: &str,
    ) -> Result<Option<ReblogRow>, IndexError> {
        queries::get_reblog(&self.pool, account, authorperm).await
    }

    pub async fn earliest_reblog_ts(
        &self,
        account: &str,
        authorperm: &str,
    ) -> Result<Option<DateTime<Utc>>, IndexError> {
        queries::earliest_reblog_ts(&self.pool, account, authorperm).await
    }

    pub async fn earliest_followee_reblog_ts(
        &self,
        account: &str,
        authorperm: &str,
    ) -> Result<Option<DateTime<Utc>>, IndexError> {
        queries::earliest_followee_reblog_ts(&self.pool, account, authorperm).await
    }

    pub async fn vote(
        &self,
        authorperm: &str,
        voter: &str,
        token: &str,
    ) -> Result<Option<VoteRow>, IndexError> {
        queries::get_vote(&self.pool, authorperm, voter, token).await
    }

    pub async fn token_votes(
        &self,
        authorperm: &str,
        token: &str,
    ) -> Result<Vec<VoteRow>, IndexError> {
        queries::get_token_votes(&self.pool, authorperm, token).await
    }

    pub async fn token_configs(&self) -> Result<Vec<TokenConfigRow>, IndexError> {
        queries::all_token_configs(&self.pool).await
    }

    pub async fn token_config(&self, symbol: &str) -> Result<Option<TokenConfigRow>, IndexError> {
        queries::get_token_config(&self.pool, symbol).await
    }

    // ─── Non-block writes ───────────────────────────────────────────────────
    //
    // Used by the query engine's lazy follow refresh and thread repair, and
    // by the token-config updater. Block mutations go through BlockWriter.

    pub async fn merge_account(&self, patch: &AccountPatch) -> Result<(), IndexError> {
        queries::merge_account(&self.pool, patch).await
    }

    pub async fn upsert_post_metadata(
        &self,
        meta: &PostMetadataUpsert,
    ) -> Result<(), IndexError> {
        queries::upsert_post_metadata(&self.pool, meta).await
    }

    /// Replace an account's materialized follow list with a fresh one.
    pub async fn replace_follows(
        &self,
        follower: &str,
        following: &[String],
    ) -> Result<(), IndexError> {
        let mut tx = self.pool.begin().await.map_err(queries::err)?;
        queries::delete_follows_for(&mut *tx, follower).await?;
        for followee in following {
            queries::upsert_follow(&mut *tx, follower, followee, 1).await?;
        }
        tx.commit().await.map_err(queries::err)
    }

    pub async fn upsert_token_config(&self, config: &TokenConfigRow) -> Result<(), IndexError> {
        queries::upsert_token_config(&self.pool, config).await
    }
}

#[async_trait]
impl CheckpointStore for GraphStore {
    async fn load(&self, source: StreamSource) -> Result<Option<Checkpoint>, IndexError> {
        queries::load_checkpoint(&self.pool, source).await
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexError> {
        queries::save_checkpoint(&self.pool, &checkpoint).await
    }

    async fn delete(&self, source: StreamSource) -> Result<(), IndexError> {
        queries::delete_checkpoint(&self.pool, source).await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::PostUpsert;
    use chrono::TimeZone;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn checkpoint_roundtrip_and_isolation() {
        let store = GraphStore::in_memory().await.unwrap();

        store
            .save(Checkpoint {
                source: StreamSource::Primary,
                last_height: 1_000,
                last_timestamp: Some(ts(1, 0)),
            })
            .await
            .unwrap();

        let cp = store.load(StreamSource::Primary).await.unwrap().unwrap();
        assert_eq!(cp.last_height, 1_000);
        assert!(store.load(StreamSource::Sidechain).await.unwrap().is_none());

        store.delete(StreamSource::Primary).await.unwrap();
        assert!(store.load(StreamSource::Primary).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn post_upsert_merges_partial_fields() {
        let store = GraphStore::in_memory().await.unwrap();
        let mut writer = store.begin_block().await.unwrap();

        writer
            .upsert_post(&PostUpsert {
                authorperm: "@alice/hello".into(),
                token: "LEO".into(),
                author: "alice".into(),
                title: Some("Hello".into()),
                main_post: Some(true),
                children: Some(0),
                created: Some(ts(1, 12)),
                ..Default::default()
            })
            .await
            .unwrap();
        // Second patch only touches the description; the title survives.
        writer
            .upsert_post(&PostUpsert {
                authorperm: "@alice/hello".into(),
                token: "LEO".into(),
                author: "alice".into(),
                description: Some("preview".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        writer.commit().await.unwrap();

        let post = store.token_post("LEO", "@alice/hello").await.unwrap().unwrap();
        assert_eq!(post.title.as_deref(), Some("Hello"));
        assert_eq!(post.description.as_deref(), Some("preview"));
        assert!(post.is_main_post());
        assert_eq!(post.created, Some(ts(1, 12)));
    }

    #[tokio::test]
    async fn delete_posts_spans_all_tokens() {
        let store = GraphStore::in_memory().await.unwrap();
        let mut writer = store.begin_block().await.unwrap();
        for token in ["LEO", "PAL"] {
            writer
                .upsert_post(&PostUpsert {
                    authorperm: "@alice/hello".into(),
                    token: token.into(),
                    author: "alice".into(),
                    main_post: Some(true),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        writer.commit().await.unwrap();
        assert_eq!(store.post_rows("@alice/hello").await.unwrap().len(), 2);

        let mut writer = store.begin_block().await.unwrap();
        let removed = writer.delete_posts("@alice/hello").await.unwrap();
        writer.commit().await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.post_rows("@alice/hello").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn account_merge_keeps_unspecified_fields() {
        let store = GraphStore::in_memory().await.unwrap();
        store
            .merge_account(&AccountPatch {
                name: "alice".into(),
                token: "LEO".into(),
                last_root_post: Some(ts(1, 0)),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .merge_account(&AccountPatch {
                name: "alice".into(),
                token: "LEO".into(),
                last_post: Some(ts(2, 0)),
                ..Default::default()
            })
            .await
            .unwrap();

        let account = store.account("alice", "LEO").await.unwrap().unwrap();
        assert_eq!(account.last_root_post, Some(ts(1, 0)));
        assert_eq!(account.last_post, Some(ts(2, 0)));
    }

    #[tokio::test]
    async fn metadata_stub_starts_counter_at_one() {
        let store = GraphStore::in_memory().await.unwrap();
        let mut writer = store.begin_block().await.unwrap();
        writer.increment_metadata_children("@bob/root").await.unwrap();
        writer.commit().await.unwrap();

        let stub = store.post_metadata("@bob/root").await.unwrap().unwrap();
        assert_eq!(stub.children, Some(1));
        assert!(stub.body.is_none());

        // Later creation merges the rest of the row without resetting it.
        store
            .upsert_post_metadata(&PostMetadataUpsert {
                authorperm: "@bob/root".into(),
                body: Some("root body".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let merged = store.post_metadata("@bob/root").await.unwrap().unwrap();
        assert_eq!(merged.children, Some(1));
        assert_eq!(merged.body.as_deref(), Some("root body"));
    }

    #[tokio::test]
    async fn replace_follows_resets_list() {
        let store = GraphStore::in_memory().await.unwrap();
        store
            .replace_follows("alice", &["bob".into(), "carol".into()])
            .await
            .unwrap();
        store.replace_follows("alice", &["dave".into()]).await.unwrap();

        let rows = store.following(Some("alice"), None, Some(1), None, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].following, "dave");
    }

    #[tokio::test]
    async fn uncommitted_writer_discards_on_drop() {
        let store = GraphStore::in_memory().await.unwrap();
        {
            let mut writer = store.begin_block().await.unwrap();
            writer
                .upsert_post(&PostUpsert {
                    authorperm: "@alice/dropped".into(),
                    token: "LEO".into(),
                    author: "alice".into(),
                    ..Default::default()
                })
                .await
                .unwrap();
            // dropped without commit
        }
        assert!(store.post_rows("@alice/dropped").await.unwrap().is_empty());
    }
}
