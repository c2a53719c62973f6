//! Single-statement SQL helpers shared by the pooled store and the
//! block-scoped writer.
//!
//! Every function takes any SQLite executor, so the same statement runs
//! against the pool (query engine reads) or inside a block transaction
//! (processor mutations, which must see their own uncommitted writes).

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

use tribeindex_core::checkpoint::{Checkpoint, StreamSource};
use tribeindex_core::error::IndexError;

use crate::entities::{
    AccountPatch, AccountRow, FollowRow, Post, PostMetadata, PostMetadataUpsert, PostUpsert,
    ReblogRow, TokenConfigRow, VoteRow,
};

pub(crate) fn err(e: sqlx::Error) -> IndexError {
    IndexError::Storage(e.to_string())
}

// ─── Posts ───────────────────────────────────────────────────────────────────

/// All token rows for one authorperm.
pub(crate) async fn get_post_rows<'e, E>(ex: E, authorperm: &str) -> Result<Vec<Post>, IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE authorperm = ? ORDER BY token")
        .bind(authorperm)
        .fetch_all(ex)
        .await
        .map_err(err)
}

pub(crate) async fn get_token_post<'e, E>(
    ex: E,
    token: &str,
    authorperm: &str,
) -> Result<Option<Post>, IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE token = ? AND authorperm = ?")
        .bind(token)
        .bind(authorperm)
        .fetch_optional(ex)
        .await
        .map_err(err)
}

pub(crate) async fn upsert_post<'e, E>(ex: E, post: &PostUpsert) -> Result<(), IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO posts (authorperm, token, author, title, description, tags,
                            parent_author, parent_permlink, main_post, children,
                            decline_payout, app, created, cashout_time, last_payout)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (authorperm, token) DO UPDATE SET
             author          = excluded.author,
             title           = COALESCE(excluded.title, posts.title),
             description     = COALESCE(excluded.description, posts.description),
             tags            = COALESCE(excluded.tags, posts.tags),
             parent_author   = COALESCE(excluded.parent_author, posts.parent_author),
             parent_permlink = COALESCE(excluded.parent_permlink, posts.parent_permlink),
             main_post       = COALESCE(excluded.main_post, posts.main_post),
             children        = COALESCE(excluded.children, posts.children),
             decline_payout  = COALESCE(excluded.decline_payout, posts.decline_payout),
             app             = COALESCE(excluded.app, posts.app),
             created         = COALESCE(excluded.created, posts.created),
             cashout_time    = COALESCE(excluded.cashout_time, posts.cashout_time),
             last_payout     = COALESCE(excluded.last_payout, posts.last_payout)",
    )
    .bind(&post.authorperm)
    .bind(&post.token)
    .bind(&post.author)
    .bind(&post.title)
    .bind(&post.description)
    .bind(&post.tags)
    .bind(&post.parent_author)
    .bind(&post.parent_permlink)
    .bind(post.main_post)
    .bind(post.children)
    .bind(post.decline_payout)
    .bind(&post.app)
    .bind(post.created)
    .bind(post.cashout_time)
    .bind(post.last_payout)
    .execute(ex)
    .await
    .map_err(err)?;
    Ok(())
}

/// Remove an authorperm from every token it was indexed under. Returns the
/// number of rows removed.
pub(crate) async fn delete_posts<'e, E>(ex: E, authorperm: &str) -> Result<u64, IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM posts WHERE authorperm = ?")
        .bind(authorperm)
        .execute(ex)
        .await
        .map_err(err)?;
    Ok(result.rows_affected())
}

/// Adjust the denormalized reply counter on every token row of a parent.
/// Update-only: rows that do not exist yet pick the count up at creation.
pub(crate) async fn adjust_post_children<'e, E>(
    ex: E,
    authorperm: &str,
    delta: i64,
) -> Result<(), IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE posts SET children = MAX(COALESCE(children, 0) + ?, 0) WHERE authorperm = ?",
    )
    .bind(delta)
    .bind(authorperm)
    .execute(ex)
    .await
    .map_err(err)?;
    Ok(())
}

pub(crate) async fn update_post_economics<'e, E>(
    ex: E,
    authorperm: &str,
    token: &str,
    vote_rshares: i64,
    score_trend: f64,
    score_hot: f64,
) -> Result<(), IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE posts SET vote_rshares = ?, score_trend = ?, score_hot = ?
         WHERE authorperm = ? AND token = ?",
    )
    .bind(vote_rshares)
    .bind(score_trend)
    .bind(score_hot)
    .bind(authorperm)
    .bind(token)
    .execute(ex)
    .await
    .map_err(err)?;
    Ok(())
}

pub(crate) async fn add_promoted<'e, E>(
    ex: E,
    authorperm: &str,
    token: &str,
    amount: f64,
) -> Result<(), IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE posts SET promoted = promoted + ? WHERE authorperm = ? AND token = ?")
        .bind(amount)
        .bind(authorperm)
        .bind(token)
        .execute(ex)
        .await
        .map_err(err)?;
    Ok(())
}

// ─── Post metadata ───────────────────────────────────────────────────────────

pub(crate) async fn get_post_metadata<'e, E>(
    ex: E,
    authorperm: &str,
) -> Result<Option<PostMetadata>, IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, PostMetadata>("SELECT * FROM post_metadata WHERE authorperm = ?")
        .bind(authorperm)
        .fetch_optional(ex)
        .await
        .map_err(err)
}

pub(crate) async fn upsert_post_metadata<'e, E>(
    ex: E,
    meta: &PostMetadataUpsert,
) -> Result<(), IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO post_metadata (authorperm, body, json_metadata, parent_authorperm,
                                    title, tags, depth, url, children)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (authorperm) DO UPDATE SET
             body              = COALESCE(excluded.body, post_metadata.body),
             json_metadata     = COALESCE(excluded.json_metadata, post_metadata.json_metadata),
             parent_authorperm = COALESCE(excluded.parent_authorperm, post_metadata.parent_authorperm),
             title             = COALESCE(excluded.title, post_metadata.title),
             tags              = COALESCE(excluded.tags, post_metadata.tags),
             depth             = COALESCE(excluded.depth, post_metadata.depth),
             url               = COALESCE(excluded.url, post_metadata.url),
             children          = COALESCE(excluded.children, post_metadata.children)",
    )
    .bind(&meta.authorperm)
    .bind(&meta.body)
    .bind(&meta.json_metadata)
    .bind(&meta.parent_authorperm)
    .bind(&meta.title)
    .bind(&meta.tags)
    .bind(meta.depth)
    .bind(&meta.url)
    .bind(meta.children)
    .execute(ex)
    .await
    .map_err(err)?;
    Ok(())
}

/// Increment the token-agnostic reply counter, creating a stub row when the
/// parent has not been indexed yet (the counter starts at 1 and the rest of
/// the row merges in later).
pub(crate) async fn increment_metadata_children<'e, E>(
    ex: E,
    authorperm: &str,
) -> Result<(), IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO post_metadata (authorperm, children) VALUES (?, 1)
         ON CONFLICT (authorperm) DO UPDATE SET
             children = COALESCE(post_metadata.children, 0) + 1",
    )
    .bind(authorperm)
    .execute(ex)
    .await
    .map_err(err)?;
    Ok(())
}

/// Decrement the token-agnostic reply counter. Update-only; never drops
/// below zero.
pub(crate) async fn decrement_metadata_children<'e, E>(
    ex: E,
    authorperm: &str,
) -> Result<(), IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE post_metadata SET children = MAX(COALESCE(children, 0) - 1, 0)
         WHERE authorperm = ?",
    )
    .bind(authorperm)
    .execute(ex)
    .await
    .map_err(err)?;
    Ok(())
}

// ─── Accounts ────────────────────────────────────────────────────────────────

pub(crate) async fn get_account<'e, E>(
    ex: E,
    name: &str,
    token: &str,
) -> Result<Option<AccountRow>, IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE name = ? AND token = ?")
        .bind(name)
        .bind(token)
        .fetch_optional(ex)
        .await
        .map_err(err)
}

pub(crate) async fn get_accounts<'e, E>(ex: E, name: &str) -> Result<Vec<AccountRow>, IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE name = ? ORDER BY token")
        .bind(name)
        .fetch_all(ex)
        .await
        .map_err(err)
}

pub(crate) async fn merge_account<'e, E>(ex: E, patch: &AccountPatch) -> Result<(), IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO accounts (name, token, last_root_post, last_post, last_follow_refresh_time)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (name, token) DO UPDATE SET
             last_root_post           = COALESCE(excluded.last_root_post, accounts.last_root_post),
             last_post                = COALESCE(excluded.last_post, accounts.last_post),
             last_follow_refresh_time = COALESCE(excluded.last_follow_refresh_time, accounts.last_follow_refresh_time)",
    )
    .bind(&patch.name)
    .bind(&patch.token)
    .bind(patch.last_root_post)
    .bind(patch.last_post)
    .bind(patch.last_follow_refresh_time)
    .execute(ex)
    .await
    .map_err(err)?;
    Ok(())
}

/// Most recent follow refresh stamp across an account's token rows.
pub(crate) async fn follow_refresh_time<'e, E>(
    ex: E,
    name: &str,
) -> Result<Option<DateTime<Utc>>, IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<SqliteRow> = sqlx::query(
        "SELECT MAX(last_follow_refresh_time) AS t FROM accounts WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(ex)
    .await
    .map_err(err)?;
    match row {
        Some(row) => row.try_get::<Option<DateTime<Utc>>, _>("t").map_err(err),
        None => Ok(None),
    }
}

// ─── Follows ─────────────────────────────────────────────────────────────────

pub(crate) async fn upsert_follow<'e, E>(
    ex: E,
    follower: &str,
    following: &str,
    state: i64,
) -> Result<(), IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO follows (follower, following, state) VALUES (?, ?, ?)
         ON CONFLICT (follower, following) DO UPDATE SET state = excluded.state",
    )
    .bind(follower)
    .bind(following)
    .bind(state)
    .execute(ex)
    .await
    .map_err(err)?;
    Ok(())
}

pub(crate) async fn delete_follows_for<'e, E>(ex: E, follower: &str) -> Result<(), IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM follows WHERE follower = ?")
        .bind(follower)
        .execute(ex)
        .await
        .map_err(err)?;
    Ok(())
}

pub(crate) async fn get_following<'e, E>(
    ex: E,
    follower: Option<&str>,
    following: Option<&str>,
    state: Option<i64>,
    start: Option<&str>,
    limit: i64,
) -> Result<Vec<FollowRow>, IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, FollowRow>(
        "SELECT * FROM follows
         WHERE (?1 IS NULL OR follower = ?1)
           AND (?2 IS NULL OR following = ?2)
           AND (?3 IS NULL OR state = ?3)
           AND (?4 IS NULL OR following > ?4)
         ORDER BY follower, following
         LIMIT ?5",
    )
    .bind(follower)
    .bind(following)
    .bind(state)
    .bind(start)
    .bind(limit)
    .fetch_all(ex)
    .await
    .map_err(err)
}

/// `(follower_count, following_count)` of blog follows.
pub(crate) async fn follow_counts<'e, E>(ex: E, account: &str) -> Result<(i64, i64), IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT
            (SELECT COUNT(*) FROM follows WHERE following = ?1 AND state = 1) AS follower_count,
            (SELECT COUNT(*) FROM follows WHERE follower = ?1 AND state = 1) AS following_count",
    )
    .bind(account)
    .fetch_one(ex)
    .await
    .map_err(err)?;
    Ok((row.get("follower_count"), row.get("following_count")))
}

// ─── Reblogs ─────────────────────────────────────────────────────────────────

pub(crate) async fn upsert_reblog<'e, E>(
    ex: E,
    account: &str,
    authorperm: &str,
    timestamp: DateTime<Utc>,
) -> Result<(), IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO reblogs (account, authorperm, timestamp) VALUES (?, ?, ?)
         ON CONFLICT (account, authorperm) DO UPDATE SET timestamp = excluded.timestamp",
    )
    .bind(account)
    .bind(authorperm)
    .bind(timestamp)
    .execute(ex)
    .await
    .map_err(err)?;
    Ok(())
}

pub(crate) async fn delete_reblog<'e, E>(
    ex: E,
    account: &str,
    authorperm: &str,
) -> Result<(), IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM reblogs WHERE account = ? AND authorperm = ?")
        .bind(account)
        .bind(authorperm)
        .execute(ex)
        .await
        .map_err(err)?;
    Ok(())
}

pub(crate) async fn get_reblog<'e, E>(
    ex: E,
    account: &str,
    authorperm: &str,
) -> Result<Option<ReblogRow>, IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, ReblogRow>(
        "SELECT * FROM reblogs WHERE account = ? AND authorperm = ?",
    )
    .bind(account)
    .bind(authorperm)
    .fetch_optional(ex)
    .await
    .map_err(err)
}

/// Earliest reblog of `authorperm` by `account` itself.
pub(crate) async fn earliest_reblog_ts<'e, E>(
    ex: E,
    account: &str,
    authorperm: &str,
) -> Result<Option<DateTime<Utc>>, IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<SqliteRow> = sqlx::query(
        "SELECT MIN(timestamp) AS t FROM reblogs WHERE account = ? AND authorperm = ?",
    )
    .bind(account)
    .bind(authorperm)
    .fetch_optional(ex)
    .await
    .map_err(err)?;
    match row {
        Some(row) => row.try_get::<Option<DateTime<Utc>>, _>("t").map_err(err),
        None => Ok(None),
    }
}

/// Earliest reblog of `authorperm` among the accounts `account` follows.
pub(crate) async fn earliest_followee_reblog_ts<'e, E>(
    ex: E,
    account: &str,
    authorperm: &str,
) -> Result<Option<DateTime<Utc>>, IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<SqliteRow> = sqlx::query(
        "WITH following_table AS (
             SELECT following FROM follows WHERE follower = ? AND state = 1
         )
         SELECT MIN(timestamp) AS t FROM reblogs
         WHERE account IN (SELECT following FROM following_table) AND authorperm = ?",
    )
    .bind(account)
    .bind(authorperm)
    .fetch_optional(ex)
    .await
    .map_err(err)?;
    match row {
        Some(row) => row.try_get::<Option<DateTime<Utc>>, _>("t").map_err(err),
        None => Ok(None),
    }
}

// ─── Votes ───────────────────────────────────────────────────────────────────

pub(crate) async fn get_vote<'e, E>(
    ex: E,
    authorperm: &str,
    voter: &str,
    token: &str,
) -> Result<Option<VoteRow>, IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, VoteRow>(
        "SELECT * FROM votes WHERE authorperm = ? AND voter = ? AND token = ?",
    )
    .bind(authorperm)
    .bind(voter)
    .bind(token)
    .fetch_optional(ex)
    .await
    .map_err(err)
}

pub(crate) async fn get_token_votes<'e, E>(
    ex: E,
    authorperm: &str,
    token: &str,
) -> Result<Vec<VoteRow>, IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, VoteRow>(
        "SELECT * FROM votes WHERE authorperm = ? AND token = ? ORDER BY timestamp",
    )
    .bind(authorperm)
    .bind(token)
    .fetch_all(ex)
    .await
    .map_err(err)
}

/// Re-votes replace in place, keyed by the `(authorperm, voter, token)`
/// triple.
pub(crate) async fn upsert_vote<'e, E>(ex: E, vote: &VoteRow) -> Result<(), IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO votes (authorperm, voter, token, percent, rshares, timestamp)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT (authorperm, voter, token) DO UPDATE SET
             percent   = excluded.percent,
             rshares   = excluded.rshares,
             timestamp = excluded.timestamp",
    )
    .bind(&vote.authorperm)
    .bind(&vote.voter)
    .bind(&vote.token)
    .bind(vote.percent)
    .bind(vote.rshares)
    .bind(vote.timestamp)
    .execute(ex)
    .await
    .map_err(err)?;
    Ok(())
}

// ─── Checkpoints ─────────────────────────────────────────────────────────────

pub(crate) async fn load_checkpoint<'e, E>(
    ex: E,
    source: StreamSource,
) -> Result<Option<Checkpoint>, IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<SqliteRow> =
        sqlx::query("SELECT last_height, last_timestamp FROM checkpoints WHERE source = ?")
            .bind(source.as_str())
            .fetch_optional(ex)
            .await
            .map_err(err)?;
    Ok(row.map(|row| Checkpoint {
        source,
        last_height: row.get::<i64, _>("last_height") as u64,
        last_timestamp: row.get("last_timestamp"),
    }))
}

pub(crate) async fn save_checkpoint<'e, E>(ex: E, checkpoint: &Checkpoint) -> Result<(), IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT OR REPLACE INTO checkpoints (source, last_height, last_timestamp)
         VALUES (?, ?, ?)",
    )
    .bind(checkpoint.source.as_str())
    .bind(checkpoint.last_height as i64)
    .bind(checkpoint.last_timestamp)
    .execute(ex)
    .await
    .map_err(err)?;
    Ok(())
}

pub(crate) async fn delete_checkpoint<'e, E>(ex: E, source: StreamSource) -> Result<(), IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM checkpoints WHERE source = ?")
        .bind(source.as_str())
        .execute(ex)
        .await
        .map_err(err)?;
    Ok(())
}

// ─── Token configuration ─────────────────────────────────────────────────────

pub(crate) async fn all_token_configs<'e, E>(ex: E) -> Result<Vec<TokenConfigRow>, IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, TokenConfigRow>("SELECT * FROM token_config ORDER BY token")
        .fetch_all(ex)
        .await
        .map_err(err)
}

pub(crate) async fn get_token_config<'e, E>(
    ex: E,
    symbol: &str,
) -> Result<Option<TokenConfigRow>, IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, TokenConfigRow>("SELECT * FROM token_config WHERE token = ?")
        .bind(symbol)
        .fetch_optional(ex)
        .await
        .map_err(err)
}

pub(crate) async fn upsert_token_config<'e, E>(
    ex: E,
    config: &TokenConfigRow,
) -> Result<(), IndexError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO token_config (token, reward_pool_id, issuer, promoted_post_account)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (token) DO UPDATE SET
             reward_pool_id        = excluded.reward_pool_id,
             issuer                = excluded.issuer,
             promoted_post_account = COALESCE(excluded.promoted_post_account, token_config.promoted_post_account)",
    )
    .bind(&config.token)
    .bind(config.reward_pool_id)
    .bind(&config.issuer)
    .bind(&config.promoted_post_account)
    .execute(ex)
    .await
    .map_err(err)?;
    Ok(())
}
