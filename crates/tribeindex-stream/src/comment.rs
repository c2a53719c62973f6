//! Comment mutation handler — new posts, edits, and deletions.
//!
//! A `comment` operation either creates content or edits it, decided by a
//! store existence check. Creation indexes root posts under every configured
//! token whose lowercased symbol appears in the tags; replies inherit their
//! parent's token set. The sidechain comments contract remains authoritative
//! and creates any row it finds missing, so the two pipelines converge
//! through partial upserts regardless of arrival order.

use std::collections::BTreeSet;

use chrono::Duration;
use serde_json::Value;
use tracing::{debug, warn};

use tribeindex_core::classify::CommentOp;
use tribeindex_core::error::IndexError;
use tribeindex_core::patcher::{truncate_preview, EditReconciler};
use tribeindex_core::types::{construct_authorperm, TokenRegistry};
use tribeindex_storage::{AccountPatch, BlockWriter, PostMetadataUpsert, PostUpsert};

/// Payout window: votes after this are no longer economically meaningful.
pub const CASHOUT_DAYS: i64 = 7;

const TITLE_LEN: usize = 256;
const TAGS_LEN: usize = 256;

fn clamp(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Parse the operation's json_metadata, tolerating double encoding and
/// returning an empty object for anything that is not a JSON object.
fn parse_json_metadata(raw: Option<&str>, authorperm: &str) -> Value {
    let Some(raw) = raw else {
        return Value::Object(Default::default());
    };
    let mut value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => {
            debug!(authorperm, "metadata parse error");
            return Value::Object(Default::default());
        }
    };
    if let Value::String(inner) = &value {
        value = match serde_json::from_str(inner) {
            Ok(v) => v,
            Err(_) => return Value::Object(Default::default()),
        };
    }
    if !value.is_object() {
        debug!(authorperm, "non-object json_metadata");
        return Value::Object(Default::default());
    }
    value
}

/// Assemble the ordered, de-duplicated tag list.
///
/// For root posts the parent_permlink doubles as the category and leads the
/// list; metadata tags follow in their published order.
fn assemble_tags(op: &CommentOp, metadata: &Value) -> (String, BTreeSet<String>) {
    let mut seen = BTreeSet::new();
    let mut tags = String::new();
    let mut push = |tag: &str, seen: &mut BTreeSet<String>, tags: &mut String| {
        if tag.is_empty() || seen.contains(tag) {
            return;
        }
        seen.insert(tag.to_string());
        if !tags.is_empty() {
            tags.push(',');
        }
        tags.push_str(tag);
    };

    if op.is_main_post() && !op.parent_permlink.is_empty() && !op.parent_permlink.contains(',') {
        push(&op.parent_permlink, &mut seen, &mut tags);
    }
    if let Some(list) = metadata.get("tags").and_then(Value::as_array) {
        for tag in list.iter().filter_map(Value::as_str) {
            push(tag, &mut seen, &mut tags);
        }
    }
    (clamp(&tags, TAGS_LEN).to_string(), seen)
}

/// Tokens whose symbol appears (lowercased) in the post's tag set.
fn matching_tokens(tokens: &TokenRegistry, tags: &BTreeSet<String>) -> Vec<String> {
    let mut matched: Vec<String> = tokens
        .symbols()
        .into_iter()
        .filter(|symbol| tags.contains(&symbol.to_lowercase()))
        .collect();
    matched.sort();
    matched
}

/// Process one comment operation inside the current block transaction.
pub async fn process(
    writer: &mut BlockWriter,
    reconciler: &EditReconciler<'_>,
    tokens: &TokenRegistry,
    op: &CommentOp,
) -> Result<(), IndexError> {
    let authorperm = construct_authorperm(&op.author, &op.permlink);
    let main_post = op.is_main_post();
    let metadata = parse_json_metadata(op.json_metadata.as_deref(), &authorperm);
    let (tags, tag_set) = assemble_tags(op, &metadata);
    let app = metadata
        .get("app")
        .and_then(Value::as_str)
        .map(|s| s.to_string());

    let parent_authorperm = (!main_post)
        .then(|| construct_authorperm(&op.parent_author, &op.parent_permlink));

    let existing = writer.post_rows(&authorperm).await?;
    let old_metadata = writer.post_metadata(&authorperm).await?;
    // A stub row holding only a reply counter does not make this an edit.
    let known_content = old_metadata.as_ref().is_some_and(|m| m.body.is_some());

    let reconciled = reconciler
        .reconcile(
            &op.author,
            &op.permlink,
            &op.body,
            old_metadata.as_ref().and_then(|m| m.body.as_deref()),
        )
        .await;
    let description = truncate_preview(&reconciled.body).to_string();

    // ── Post rows per token ─────────────────────────────────────────────────

    let mut target_tokens: Vec<String> = existing.iter().map(|p| p.token.clone()).collect();
    let newly_created = existing.is_empty();
    if newly_created {
        target_tokens = if main_post {
            matching_tokens(tokens, &tag_set)
        } else {
            // Replies live under the same tokens as their parent.
            let parent_rows = match &parent_authorperm {
                Some(parent) => writer.post_rows(parent).await?,
                None => vec![],
            };
            if parent_rows.is_empty() {
                matching_tokens(tokens, &tag_set)
            } else {
                parent_rows.into_iter().map(|p| p.token).collect()
            }
        };
    }

    let title = op
        .title
        .clone()
        .or_else(|| existing.first().and_then(|p| p.title.clone()));

    for token in &target_tokens {
        writer
            .upsert_post(&PostUpsert {
                authorperm: authorperm.clone(),
                token: token.clone(),
                author: op.author.clone(),
                title: title.as_deref().map(|t| clamp(t, TITLE_LEN).to_string()),
                description: Some(description.clone()),
                tags: Some(tags.clone()),
                parent_author: Some(op.parent_author.clone()),
                parent_permlink: Some(op.parent_permlink.clone()),
                main_post: Some(main_post),
                children: newly_created.then_some(0),
                app: app.clone(),
                created: newly_created.then_some(op.timestamp),
                cashout_time: newly_created.then(|| op.timestamp + Duration::days(CASHOUT_DAYS)),
                ..Default::default()
            })
            .await?;

        let stamp = if main_post {
            AccountPatch {
                name: op.author.clone(),
                token: token.clone(),
                last_root_post: Some(op.timestamp),
                ..Default::default()
            }
        } else {
            AccountPatch {
                name: op.author.clone(),
                token: token.clone(),
                last_post: Some(op.timestamp),
                ..Default::default()
            }
        };
        writer.merge_account(&stamp).await?;
    }

    // ── Reply counters ──────────────────────────────────────────────────────
    //
    // Incremented exactly once, when the comment is first seen. Redelivered
    // operations find the metadata row and skip the bump.

    if let Some(parent) = &parent_authorperm {
        if !known_content {
            writer.adjust_post_children(parent, 1).await?;
            writer.increment_metadata_children(parent).await?;
        }
    }

    // ── Token-agnostic metadata ─────────────────────────────────────────────

    let mut meta = PostMetadataUpsert {
        authorperm: authorperm.clone(),
        body: Some(reconciled.body),
        json_metadata: Some(metadata.to_string()),
        parent_authorperm: parent_authorperm.clone(),
        title: title.clone(),
        tags: Some(tags),
        ..Default::default()
    };
    if main_post {
        meta.depth = Some(0);
        meta.url = Some(format!("/{}/{}", op.parent_permlink, authorperm));
    } else if !known_content {
        // Depth and url are copied down from the parent at creation time and
        // never recomputed; a missing parent leaves them unset until a later
        // fetch repairs them.
        if let Some(parent_meta) = writer
            .post_metadata(parent_authorperm.as_deref().unwrap_or_default())
            .await?
        {
            meta.depth = parent_meta.depth.map(|d| d + 1);
            meta.url = parent_meta.url;
        } else {
            warn!(authorperm, "parent metadata missing, depth/url deferred");
        }
    }
    writer.upsert_post_metadata(&meta).await?;

    Ok(())
}

/// Process a `delete_comment`: drop the authorperm from every token it was
/// indexed under and roll the parent's reply counters back by one.
pub async fn process_delete(
    writer: &mut BlockWriter,
    author: &str,
    permlink: &str,
) -> Result<(), IndexError> {
    let authorperm = construct_authorperm(author, permlink);
    let rows = writer.post_rows(&authorperm).await?;

    let parent = rows.first().and_then(|post| {
        match (post.parent_author.as_deref(), post.parent_permlink.as_deref()) {
            (Some(a), Some(p)) if !a.is_empty() && !p.is_empty() => {
                Some(construct_authorperm(a, p))
            }
            _ => None,
        }
    });

    let removed = writer.delete_posts(&authorperm).await?;
    if removed > 0 {
        if let Some(parent) = parent {
            writer.adjust_post_children(&parent, -1).await?;
            writer.decrement_metadata_children(&parent).await?;
        }
        debug!(authorperm, removed, "post deleted across tokens");
    }
    Ok(())
}
