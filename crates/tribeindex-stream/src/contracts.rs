//! Sidechain contract handlers — comment economics and post promotion.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::debug;

use tribeindex_core::classify::TransferPayload;
use tribeindex_core::error::IndexError;
use tribeindex_core::patcher::truncate_preview;
use tribeindex_core::scoring::{hot_score, trending_score};
use tribeindex_core::types::{resolve_authorperm, TokenRegistry};
use tribeindex_storage::{BlockWriter, PostUpsert, VoteRow};

use crate::comment::CASHOUT_DAYS;

/// rshares arrive as strings or numbers depending on the contract version.
fn value_as_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse::<i64>().ok().or_else(|| {
            s.parse::<f64>().ok().map(|f| f as i64)
        }),
        _ => None,
    }
}

/// Dispatch a `comments` contract action.
pub async fn process_comments_contract(
    writer: &mut BlockWriter,
    tokens: &TokenRegistry,
    action: &str,
    payload: &Value,
    timestamp: DateTime<Utc>,
) -> Result<(), IndexError> {
    match action {
        "comment" => process_comment_action(writer, tokens, payload, timestamp).await,
        "vote" => process_vote_action(writer, tokens, payload, timestamp).await,
        _ => Ok(()),
    }
}

fn resolve_token(tokens: &TokenRegistry, payload: &Value) -> Option<String> {
    let pool = value_as_i64(payload.get("rewardPoolId"))?;
    tokens.by_reward_pool(pool).map(|cfg| cfg.token)
}

/// The contract mirrored a comment into a reward pool: make sure the
/// `(authorperm, token)` row exists, copying denormalized fields from the
/// token-agnostic metadata when the primary stream got there first.
async fn process_comment_action(
    writer: &mut BlockWriter,
    tokens: &TokenRegistry,
    payload: &Value,
    timestamp: DateTime<Utc>,
) -> Result<(), IndexError> {
    let Some(authorperm) = payload.get("authorperm").and_then(Value::as_str) else {
        debug!("comments contract payload without authorperm");
        return Ok(());
    };
    let Some(token) = resolve_token(tokens, payload) else {
        debug!(authorperm, "comment for unconfigured reward pool ignored");
        return Ok(());
    };
    let Some((author, _)) = resolve_authorperm(authorperm) else {
        debug!(authorperm, "unparsable authorperm in comments contract");
        return Ok(());
    };
    let author = author.to_string();

    if writer.token_post(&token, authorperm).await?.is_some() {
        return Ok(());
    }

    let meta = writer.post_metadata(authorperm).await?;
    let (title, tags, description, children, main_post, parent_author, parent_permlink) =
        match &meta {
            Some(m) => {
                let parent = m
                    .parent_authorperm
                    .as_deref()
                    .and_then(resolve_authorperm);
                (
                    m.title.clone(),
                    m.tags.clone(),
                    m.body.as_deref().map(|b| truncate_preview(b).to_string()),
                    m.children,
                    Some(m.parent_authorperm.is_none()),
                    Some(parent.map(|(a, _)| a.to_string()).unwrap_or_default()),
                    Some(parent.map(|(_, p)| p.to_string()).unwrap_or_default()),
                )
            }
            None => (None, None, None, None, None, None, None),
        };

    writer
        .upsert_post(&PostUpsert {
            authorperm: authorperm.to_string(),
            token,
            author,
            title,
            description,
            tags,
            parent_author,
            parent_permlink,
            main_post,
            children: Some(children.unwrap_or(0)),
            created: Some(timestamp),
            cashout_time: Some(timestamp + Duration::days(CASHOUT_DAYS)),
            ..Default::default()
        })
        .await
}

/// Apply a vote: upsert the vote row keyed by `(authorperm, voter, token)`
/// and move the post's cumulative rshares by the delta, then refresh the
/// ranking scores.
async fn process_vote_action(
    writer: &mut BlockWriter,
    tokens: &TokenRegistry,
    payload: &Value,
    timestamp: DateTime<Utc>,
) -> Result<(), IndexError> {
    let (Some(authorperm), Some(voter)) = (
        payload.get("authorperm").and_then(Value::as_str),
        payload.get("voter").and_then(Value::as_str),
    ) else {
        debug!("vote payload missing authorperm/voter");
        return Ok(());
    };
    let Some(token) = resolve_token(tokens, payload) else {
        debug!(authorperm, "vote for unconfigured reward pool ignored");
        return Ok(());
    };
    let Some(rshares) = value_as_i64(payload.get("rshares")) else {
        debug!(authorperm, voter, "vote without rshares ignored");
        return Ok(());
    };
    let Some(post) = writer.token_post(&token, authorperm).await? else {
        debug!(authorperm, token, "vote for unindexed post ignored");
        return Ok(());
    };

    // Re-votes replace in place; only the delta moves the tally.
    let previous = writer
        .vote(authorperm, voter, &token)
        .await?
        .map(|v| v.rshares)
        .unwrap_or(0);
    let total = post.vote_rshares + rshares - previous;

    writer
        .upsert_vote(&VoteRow {
            authorperm: authorperm.to_string(),
            voter: voter.to_string(),
            token: token.clone(),
            percent: value_as_i64(payload.get("weight")),
            rshares,
            timestamp: Some(timestamp),
        })
        .await?;

    let created = post.created.unwrap_or(timestamp);
    writer
        .update_post_economics(
            authorperm,
            &token,
            total,
            trending_score(total, created),
            hot_score(total, created),
        )
        .await
}

/// Record a promoted-post transfer: a token transfer to the configured
/// promotion account whose memo names an `@author/permlink`.
pub async fn process_promotion(
    writer: &mut BlockWriter,
    tokens: &TokenRegistry,
    transfer: &TransferPayload,
) -> Result<(), IndexError> {
    let Some(config) = tokens.get(&transfer.symbol) else {
        return Ok(());
    };
    if config.promoted_post_account.as_deref() != Some(transfer.to.as_str()) {
        return Ok(());
    }
    let Some(authorperm) = authorperm_from_memo(&transfer.memo) else {
        debug!(memo = %transfer.memo, "promotion memo without authorperm");
        return Ok(());
    };
    let Ok(amount) = transfer.quantity.parse::<f64>() else {
        debug!(quantity = %transfer.quantity, "unparsable promotion quantity");
        return Ok(());
    };
    if writer.token_post(&config.token, &authorperm).await?.is_none() {
        debug!(%authorperm, "promotion for unindexed post ignored");
        return Ok(());
    }
    writer.add_promoted(&authorperm, &config.token, amount).await
}

/// Extract the first `@author/permlink` token from a transfer memo.
fn authorperm_from_memo(memo: &str) -> Option<String> {
    let start = memo.find('@')?;
    let rest = &memo[start..];
    let end = rest
        .find(|c: char| c.is_whitespace())
        .unwrap_or(rest.len());
    let candidate = &rest[..end];
    resolve_authorperm(candidate).map(|(author, permlink)| format!("@{author}/{permlink}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memo_parsing() {
        assert_eq!(
            authorperm_from_memo("@alice/my-post").as_deref(),
            Some("@alice/my-post")
        );
        assert_eq!(
            authorperm_from_memo("promote @alice/my-post please").as_deref(),
            Some("@alice/my-post")
        );
        assert!(authorperm_from_memo("no reference here").is_none());
        assert!(authorperm_from_memo("@broken").is_none());
    }

    #[test]
    fn rshares_decoding() {
        assert_eq!(value_as_i64(Some(&serde_json::json!(42))), Some(42));
        assert_eq!(value_as_i64(Some(&serde_json::json!("1234"))), Some(1234));
        assert_eq!(value_as_i64(Some(&serde_json::json!("12.7"))), Some(12));
        assert_eq!(value_as_i64(Some(&serde_json::json!(null))), None);
        assert_eq!(value_as_i64(None), None);
    }
}
