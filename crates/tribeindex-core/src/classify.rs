//! Operation classifier — pure mapping from raw envelopes to typed variants.
//!
//! No side effects here: malformed payloads classify as [`ClassifiedOp::NoOp`]
//! with a reason, and the caller decides whether to log. Whether a `comment`
//! is a new post or an edit is resolved downstream by a store existence
//! check; the classifier only separates the streamed operation types.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::types::{OperationEnvelope, SidechainTransaction};

// ─── Primary chain ───────────────────────────────────────────────────────────

/// Follow relation state as carried in the follows table.
///
/// `0` resets the relation, `1` is a blog follow, `2` mutes the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowState {
    None = 0,
    Blog = 1,
    Ignore = 2,
}

impl FollowState {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Clone)]
pub struct CommentOp {
    pub author: String,
    pub permlink: String,
    pub parent_author: String,
    pub parent_permlink: String,
    pub title: Option<String>,
    pub body: String,
    pub json_metadata: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CommentOp {
    /// A main (root) post has no parent author or no parent permlink.
    pub fn is_main_post(&self) -> bool {
        self.parent_author.is_empty() || self.parent_permlink.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct FollowOp {
    pub follower: String,
    pub following: String,
    pub state: FollowState,
}

#[derive(Debug, Clone)]
pub struct ReblogOp {
    pub account: String,
    pub author: String,
    pub permlink: String,
    /// `true` for an explicit un-reblog.
    pub delete: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TribeSettingsOp {
    pub user: String,
    pub settings: Value,
}

/// A primary-chain operation after classification.
#[derive(Debug, Clone)]
pub enum ClassifiedOp {
    Comment(CommentOp),
    DeleteComment { author: String, permlink: String },
    Follow(FollowOp),
    Reblog(ReblogOp),
    TribeSettings(TribeSettingsOp),
    /// Ignored without error; the reason is surfaced in debug logs only.
    NoOp(&'static str),
}

/// Decode the JSON payload of a `custom_json` envelope.
///
/// Payloads are sometimes double-encoded by older clients; one extra decode
/// pass is tolerated.
pub fn extract_json_payload(envelope: &OperationEnvelope) -> Option<Value> {
    let raw = envelope.json.as_deref()?;
    let mut value: Value = serde_json::from_str(raw).ok()?;
    if let Value::String(inner) = &value {
        value = serde_json::from_str(inner).ok()?;
    }
    Some(value)
}

/// The acting account of a `custom_json` operation: the first posting
/// authority, falling back to the first active authority.
pub fn extract_user(envelope: &OperationEnvelope) -> Option<&str> {
    envelope
        .required_posting_auths
        .first()
        .or_else(|| envelope.required_auths.first())
        .map(String::as_str)
}

/// Classify one primary-chain operation envelope.
pub fn classify(envelope: &OperationEnvelope) -> ClassifiedOp {
    match envelope.op_type.as_str() {
        "comment" => classify_comment(envelope),
        "delete_comment" => match (&envelope.author, &envelope.permlink) {
            (Some(author), Some(permlink)) => ClassifiedOp::DeleteComment {
                author: author.clone(),
                permlink: permlink.clone(),
            },
            _ => ClassifiedOp::NoOp("delete_comment missing author/permlink"),
        },
        "custom_json" => classify_custom_json(envelope),
        _ => ClassifiedOp::NoOp("unhandled operation type"),
    }
}

fn classify_comment(envelope: &OperationEnvelope) -> ClassifiedOp {
    let (Some(author), Some(permlink)) = (&envelope.author, &envelope.permlink) else {
        return ClassifiedOp::NoOp("comment missing author/permlink");
    };
    ClassifiedOp::Comment(CommentOp {
        author: author.clone(),
        permlink: permlink.clone(),
        parent_author: envelope.parent_author.clone().unwrap_or_default(),
        parent_permlink: envelope.parent_permlink.clone().unwrap_or_default(),
        title: envelope.title.clone(),
        body: envelope.body.clone().unwrap_or_default(),
        json_metadata: envelope.json_metadata.clone(),
        timestamp: envelope.timestamp,
    })
}

fn classify_custom_json(envelope: &OperationEnvelope) -> ClassifiedOp {
    let Some(id) = envelope.id.as_deref() else {
        return ClassifiedOp::NoOp("custom_json without id");
    };
    let Some(payload) = extract_json_payload(envelope) else {
        return ClassifiedOp::NoOp("malformed custom_json payload");
    };
    let Some(user) = extract_user(envelope) else {
        return ClassifiedOp::NoOp("custom_json without acting authority");
    };

    match id {
        // Reblogs arrive both under their own id and, from older clients,
        // under the follow id.
        "follow" | "reblog" => match as_action_pair(&payload) {
            Some(("reblog", body)) => classify_reblog(user, body, envelope.timestamp),
            Some(("follow", body)) if id == "follow" => classify_follow(user, body),
            _ => ClassifiedOp::NoOp("unhandled follow payload"),
        },
        "scot_set_tribe_settings" => {
            if payload.is_object() {
                ClassifiedOp::TribeSettings(TribeSettingsOp {
                    user: user.to_string(),
                    settings: payload,
                })
            } else {
                ClassifiedOp::NoOp("tribe settings payload not an object")
            }
        }
        _ => ClassifiedOp::NoOp("unrouted custom_json id"),
    }
}

/// Interpret a payload as the `[action_name, body]` pair used by the follow
/// plugin protocol.
fn as_action_pair(payload: &Value) -> Option<(&str, &Value)> {
    let arr = payload.as_array()?;
    if arr.len() != 2 {
        return None;
    }
    let action = arr[0].as_str()?;
    if !arr[1].is_object() {
        return None;
    }
    Some((action, &arr[1]))
}

fn classify_reblog(user: &str, body: &Value, timestamp: DateTime<Utc>) -> ClassifiedOp {
    let Some(account) = body.get("account").and_then(Value::as_str) else {
        return ClassifiedOp::NoOp("reblog without account");
    };
    if account != user {
        return ClassifiedOp::NoOp("reblog account does not match authority");
    }
    let (Some(author), Some(permlink)) = (
        body.get("author").and_then(Value::as_str),
        body.get("permlink").and_then(Value::as_str),
    ) else {
        return ClassifiedOp::NoOp("reblog without author/permlink");
    };
    let delete = body.get("delete").and_then(Value::as_str) == Some("delete");
    ClassifiedOp::Reblog(ReblogOp {
        account: account.to_string(),
        author: author.to_string(),
        permlink: permlink.to_string(),
        delete,
        timestamp,
    })
}

fn classify_follow(user: &str, body: &Value) -> ClassifiedOp {
    let (Some(follower), Some(following)) = (
        body.get("follower").and_then(Value::as_str),
        body.get("following").and_then(Value::as_str),
    ) else {
        return ClassifiedOp::NoOp("follow without follower/following");
    };
    if follower != user {
        return ClassifiedOp::NoOp("follow follower does not match authority");
    }
    // Account names are capped on chain; anything longer is junk.
    if follower.len() > 20 || following.len() > 20 {
        return ClassifiedOp::NoOp("follow name too long");
    }
    let what: Vec<&str> = body
        .get("what")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let state = match what.as_slice() {
        ["ignore"] => FollowState::Ignore,
        ["blog"] => FollowState::Blog,
        _ => FollowState::None,
    };
    ClassifiedOp::Follow(FollowOp {
        follower: follower.to_string(),
        following: following.to_string(),
        state,
    })
}

// ─── Sidechain ───────────────────────────────────────────────────────────────

/// A token transfer on the sidechain, pre-validated for the promotion path.
#[derive(Debug, Clone)]
pub struct TransferPayload {
    pub symbol: String,
    pub to: String,
    pub memo: String,
    /// Token amount as published by the contract (decimal string).
    pub quantity: String,
}

/// A sidechain transaction after classification.
#[derive(Debug, Clone)]
pub enum SidechainAction {
    /// A `comments` contract action; the payload is handed to the comments
    /// handler as-is.
    CommentsContract { action: String, payload: Value },
    TokenTransfer(TransferPayload),
    Ignored(&'static str),
}

/// Classify one sidechain transaction by `(contract, action)`.
pub fn classify_transaction(tx: &SidechainTransaction) -> SidechainAction {
    match (tx.contract.as_str(), tx.action.as_str()) {
        ("comments", action) => {
            let Ok(payload) = serde_json::from_str::<Value>(&tx.payload) else {
                return SidechainAction::Ignored("malformed comments payload");
            };
            SidechainAction::CommentsContract {
                action: action.to_string(),
                payload,
            }
        }
        ("tokens", "transfer") => classify_transfer(&tx.payload),
        _ => SidechainAction::Ignored("unhandled contract/action"),
    }
}

fn classify_transfer(raw: &str) -> SidechainAction {
    let Ok(payload) = serde_json::from_str::<Value>(raw) else {
        return SidechainAction::Ignored("malformed transfer payload");
    };
    let Some(memo) = payload.get("memo").and_then(Value::as_str) else {
        return SidechainAction::Ignored("transfer without memo");
    };
    if memo.len() < 3 {
        return SidechainAction::Ignored("transfer memo too short");
    }
    let (Some(symbol), Some(to)) = (
        payload.get("symbol").and_then(Value::as_str),
        payload.get("to").and_then(Value::as_str),
    ) else {
        return SidechainAction::Ignored("transfer missing symbol/to");
    };
    let quantity = payload
        .get("quantity")
        .and_then(Value::as_str)
        .unwrap_or("0")
        .to_string();
    SidechainAction::TokenTransfer(TransferPayload {
        symbol: symbol.to_string(),
        to: to.to_string(),
        memo: memo.to_string(),
        quantity,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
