//! Feed and discussion queries over the content graph.
//!
//! All orderings are keyset-paginated: the caller passes the boundary sort
//! key plus the boundary authorperm, and every query orders by
//! `(sort key DESC, authorperm ASC)` so pagination stays stable under
//! concurrent inserts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use tribeindex_core::error::IndexError;

use crate::entities::FeedPost;
use crate::queries::err;
use crate::store::GraphStore;

/// Score column used by the ranked discussion queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreOrder {
    Trending,
    Hot,
    Payout,
    Promoted,
}

impl ScoreOrder {
    fn column(self) -> &'static str {
        match self {
            Self::Trending => "score_trend",
            Self::Hot => "score_hot",
            Self::Payout => "vote_rshares",
            Self::Promoted => "promoted",
        }
    }
}

/// A tag with its usage count over recent root posts.
#[derive(Debug, Clone, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: i64,
}

const TAG_MATCH: &str = "(',' || COALESCE(p.tags, '') || ',') LIKE ('%,' || ?2 || ',%')";

impl GraphStore {
    /// Root posts of a token ordered by creation time, optionally filtered
    /// by tag.
    pub async fn discussions_by_created(
        &self,
        token: &str,
        tag: Option<&str>,
        boundary: Option<(DateTime<Utc>, &str)>,
        limit: i64,
    ) -> Result<Vec<FeedPost>, IndexError> {
        let sql = format!(
            "SELECT p.*, NULL AS reblogged_by, p.created AS feed_timestamp
             FROM posts p
             WHERE p.token = ?1
               AND p.main_post = 1
               AND (?2 IS NULL OR {TAG_MATCH})
               AND (?3 IS NULL OR p.created < ?3
                    OR (p.created = ?3 AND p.authorperm > ?4))
             ORDER BY p.created DESC, p.authorperm ASC
             LIMIT ?5"
        );
        sqlx::query_as::<_, FeedPost>(&sql)
            .bind(token)
            .bind(tag)
            .bind(boundary.map(|(ts, _)| ts))
            .bind(boundary.map(|(_, ap)| ap))
            .bind(limit)
            .fetch_all(self.pool())
            .await
            .map_err(err)
    }

    /// Posts of a token ordered by a ranking score. `main_post = false`
    /// serves the comment-level payout ranking.
    pub async fn discussions_by_score(
        &self,
        order: ScoreOrder,
        token: &str,
        tag: Option<&str>,
        boundary: Option<(f64, &str)>,
        main_post: bool,
        limit: i64,
    ) -> Result<Vec<FeedPost>, IndexError> {
        let col = order.column();
        let sql = format!(
            "SELECT p.*, NULL AS reblogged_by, p.created AS feed_timestamp
             FROM posts p
             WHERE p.token = ?1
               AND p.main_post = ?6
               AND (?2 IS NULL OR {TAG_MATCH})
               AND (?3 IS NULL OR p.{col} < ?3
                    OR (p.{col} = ?3 AND p.authorperm > ?4))
             ORDER BY p.{col} DESC, p.authorperm ASC
             LIMIT ?5"
        );
        sqlx::query_as::<_, FeedPost>(&sql)
            .bind(token)
            .bind(tag)
            .bind(boundary.map(|(score, _)| score))
            .bind(boundary.map(|(_, ap)| ap))
            .bind(limit)
            .bind(main_post)
            .fetch_all(self.pool())
            .await
            .map_err(err)
    }

    /// An account's blog: their own root posts plus, optionally, the posts
    /// they reblogged (ordered by reblog time, attributed in
    /// `reblogged_by`). A self-reblog bumps the post by the later of the two
    /// timestamps.
    pub async fn discussions_by_blog(
        &self,
        token: &str,
        account: &str,
        include_reblogs: bool,
        boundary: Option<(DateTime<Utc>, &str)>,
        limit: i64,
    ) -> Result<Vec<FeedPost>, IndexError> {
        let sql = "WITH my_reblogs AS (
                 SELECT authorperm, MIN(timestamp) AS reblog_ts
                 FROM reblogs WHERE account = ?1 GROUP BY authorperm
             )
             SELECT * FROM (
                 SELECT p.*,
                        CASE WHEN p.author = ?1 THEN NULL ELSE ?1 END AS reblogged_by,
                        CASE
                            WHEN ?3 = 0 THEN p.created
                            WHEN p.author = ?1
                                THEN MAX(p.created, COALESCE(mr.reblog_ts, p.created))
                            ELSE mr.reblog_ts
                        END AS feed_timestamp
                 FROM posts p
                 LEFT JOIN my_reblogs mr ON mr.authorperm = p.authorperm
                 WHERE p.token = ?2
                   AND p.main_post = 1
                   AND (p.author = ?1 OR (?3 = 1 AND mr.authorperm IS NOT NULL))
             )
             WHERE (?4 IS NULL OR feed_timestamp < ?4
                    OR (feed_timestamp = ?4 AND authorperm > ?5))
             ORDER BY feed_timestamp DESC, authorperm ASC
             LIMIT ?6";
        sqlx::query_as::<_, FeedPost>(sql)
            .bind(account)
            .bind(token)
            .bind(include_reblogs as i64)
            .bind(boundary.map(|(ts, _)| ts))
            .bind(boundary.map(|(_, ap)| ap))
            .bind(limit)
            .fetch_all(self.pool())
            .await
            .map_err(err)
    }

    /// An account's feed: root posts authored or reblogged by the accounts
    /// they follow, each post ordered by the latest qualifying timestamp
    /// among creation and followee reblog time.
    pub async fn feed_discussions(
        &self,
        token: &str,
        account: &str,
        include_reblogs: bool,
        boundary: Option<(DateTime<Utc>, &str)>,
        limit: i64,
    ) -> Result<Vec<FeedPost>, IndexError> {
        let sql = "WITH following_table AS (
                 SELECT following FROM follows WHERE follower = ?1 AND state = 1
             ),
             followee_reblogs AS (
                 SELECT r.authorperm,
                        MIN(r.timestamp) AS reblog_ts,
                        MIN(r.account)   AS reblog_account
                 FROM reblogs r
                 WHERE r.account IN (SELECT following FROM following_table)
                 GROUP BY r.authorperm
             )
             SELECT * FROM (
                 SELECT p.*,
                        CASE WHEN ?3 = 1 THEN fr.reblog_account ELSE NULL END AS reblogged_by,
                        CASE
                            WHEN ?3 = 1
                                THEN MAX(COALESCE(p.created, fr.reblog_ts),
                                         COALESCE(fr.reblog_ts, p.created))
                            ELSE p.created
                        END AS feed_timestamp
                 FROM posts p
                 LEFT JOIN followee_reblogs fr ON fr.authorperm = p.authorperm
                 WHERE p.token = ?2
                   AND p.main_post = 1
                   AND (p.author IN (SELECT following FROM following_table)
                        OR (?3 = 1 AND fr.authorperm IS NOT NULL))
             )
             WHERE (?4 IS NULL OR feed_timestamp < ?4
                    OR (feed_timestamp = ?4 AND authorperm > ?5))
             ORDER BY feed_timestamp DESC, authorperm ASC
             LIMIT ?6";
        sqlx::query_as::<_, FeedPost>(sql)
            .bind(account)
            .bind(token)
            .bind(include_reblogs as i64)
            .bind(boundary.map(|(ts, _)| ts))
            .bind(boundary.map(|(_, ap)| ap))
            .bind(limit)
            .fetch_all(self.pool())
            .await
            .map_err(err)
    }

    /// Comments authored by an account, newest first.
    pub async fn discussions_by_comments(
        &self,
        token: &str,
        account: &str,
        boundary: Option<(DateTime<Utc>, &str)>,
        limit: i64,
    ) -> Result<Vec<FeedPost>, IndexError> {
        sqlx::query_as::<_, FeedPost>(
            "SELECT p.*, NULL AS reblogged_by, p.created AS feed_timestamp
             FROM posts p
             WHERE p.token = ?1
               AND p.main_post = 0
               AND p.author = ?2
               AND (?3 IS NULL OR p.created < ?3
                    OR (p.created = ?3 AND p.authorperm > ?4))
             ORDER BY p.created DESC, p.authorperm ASC
             LIMIT ?5",
        )
        .bind(token)
        .bind(account)
        .bind(boundary.map(|(ts, _)| ts))
        .bind(boundary.map(|(_, ap)| ap))
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(err)
    }

    /// Replies to an account's content, newest first.
    pub async fn discussions_by_replies(
        &self,
        token: &str,
        account: &str,
        boundary: Option<(DateTime<Utc>, &str)>,
        limit: i64,
    ) -> Result<Vec<FeedPost>, IndexError> {
        sqlx::query_as::<_, FeedPost>(
            "SELECT p.*, NULL AS reblogged_by, p.created AS feed_timestamp
             FROM posts p
             WHERE p.token = ?1
               AND p.main_post = 0
               AND p.parent_author = ?2
               AND (?3 IS NULL OR p.created < ?3
                    OR (p.created = ?3 AND p.authorperm > ?4))
             ORDER BY p.created DESC, p.authorperm ASC
             LIMIT ?5",
        )
        .bind(token)
        .bind(account)
        .bind(boundary.map(|(ts, _)| ts))
        .bind(boundary.map(|(_, ap)| ap))
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(err)
    }

    /// A whole discussion thread: the root post plus every stored descendant
    /// (rows sharing the root's canonical url), parents before children.
    pub async fn thread_discussions(
        &self,
        token: &str,
        root_authorperm: &str,
        root_url: Option<&str>,
    ) -> Result<Vec<FeedPost>, IndexError> {
        sqlx::query_as::<_, FeedPost>(
            "SELECT p.*, NULL AS reblogged_by, p.created AS feed_timestamp
             FROM posts p
             LEFT JOIN post_metadata m ON m.authorperm = p.authorperm
             WHERE p.token = ?1
               AND (p.authorperm = ?2 OR (?3 IS NOT NULL AND m.url = ?3))
             ORDER BY COALESCE(m.depth, 0) ASC, p.created ASC, p.authorperm ASC",
        )
        .bind(token)
        .bind(root_authorperm)
        .bind(root_url)
        .fetch_all(self.pool())
        .await
        .map_err(err)
    }

    /// Tag frequency over the most recent root posts of a token.
    pub async fn trending_tags(&self, token: &str, limit: usize) -> Result<Vec<TagCount>, IndexError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT tags FROM posts
             WHERE token = ? AND main_post = 1 AND tags IS NOT NULL AND tags != ''
             ORDER BY created DESC
             LIMIT 1000",
        )
        .bind(token)
        .fetch_all(self.pool())
        .await
        .map_err(err)?;

        let mut counts: HashMap<String, i64> = HashMap::new();
        for (tags,) in rows {
            for tag in tags.split(',').filter(|t| !t.is_empty()) {
                *counts.entry(tag.to_string()).or_default() += 1;
            }
        }
        let mut tags: Vec<TagCount> = counts
            .into_iter()
            .map(|(tag, count)| TagCount { tag, count })
            .collect();
        tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
        tags.truncate(limit);
        Ok(tags)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
