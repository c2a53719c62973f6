//! Edit reconciliation — derives the current full body from incremental
//! diffs.
//!
//! Clients publish edits either as a full replacement body or as a
//! diff-match-patch patch script against the previous body. The reconciler
//! never fails: any parse or apply problem falls back to treating the
//! incoming text as the new body.

use diff_match_patch_rs::{DiffMatchPatch, Efficient, PatchInput};
use tracing::{debug, warn};

use crate::error::IndexError;
use crate::node::NodeClient;
use crate::retry::RetryPolicy;

/// Length of the denormalized body preview stored on Post rows.
pub const PREVIEW_LEN: usize = 300;

/// Truncate a body to the preview length without splitting a character.
pub fn truncate_preview(body: &str) -> &str {
    if body.len() <= PREVIEW_LEN {
        return body;
    }
    let mut end = PREVIEW_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

/// Thin wrapper over diff-match-patch with the fallback rules baked in.
pub struct BodyPatcher {
    dmp: DiffMatchPatch,
}

impl Default for BodyPatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl BodyPatcher {
    pub fn new() -> Self {
        Self {
            dmp: DiffMatchPatch::new(),
        }
    }

    /// Returns `true` if `incoming` parses as a non-empty patch script.
    pub fn is_patch(&self, incoming: &str) -> bool {
        match self.dmp.patch_from_text::<Efficient>(incoming) {
            Ok(patches) => !patches.is_empty(),
            Err(_) => false,
        }
    }

    /// Apply `incoming` as a patch to `prior`; if it is not a usable patch
    /// script (or application fails), `incoming` itself is the new body.
    pub fn apply(&self, incoming: &str, prior: &str) -> String {
        let patches = match self.dmp.patch_from_text::<Efficient>(incoming) {
            Ok(patches) if !patches.is_empty() => patches,
            // Zero patches: clients that send whole bodies instead of diffs.
            _ => return incoming.to_string(),
        };
        match self.dmp.patch_apply(&patches, prior) {
            Ok((body, _applied)) => body,
            Err(err) => {
                warn!(?err, "patch application failed, keeping raw body");
                incoming.to_string()
            }
        }
    }

    /// Produce a patch script turning `old` into `new` (test helper and
    /// round-trip check).
    pub fn make_patch(&self, old: &str, new: &str) -> Result<String, IndexError> {
        let diffs = self
            .dmp
            .diff_main::<Efficient>(old, new)
            .map_err(|e| IndexError::Payload(format!("diff failed: {e:?}")))?;
        let patches = self
            .dmp
            .patch_make(PatchInput::new_diffs(&diffs))
            .map_err(|e| IndexError::Payload(format!("patch_make failed: {e:?}")))?;
        Ok(self.dmp.patch_to_text(&patches))
    }
}

/// Outcome of reconciling one edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledBody {
    pub body: String,
    /// Set when the canonical fetch failed and the raw incoming text was
    /// used as a best effort.
    pub degraded: bool,
}

/// Reconciles edit operations into full bodies, fetching the canonical body
/// from the node when a patch arrives for a post we never stored.
pub struct EditReconciler<'a> {
    patcher: BodyPatcher,
    node: Option<&'a dyn NodeClient>,
    retry: RetryPolicy,
}

impl<'a> EditReconciler<'a> {
    pub fn new(node: Option<&'a dyn NodeClient>, retry: RetryPolicy) -> Self {
        Self {
            patcher: BodyPatcher::new(),
            node,
            retry,
        }
    }

    /// Derive the new full body for `authorperm` from the incoming operation
    /// body and the stored prior body, if any.
    pub async fn reconcile(
        &self,
        author: &str,
        permlink: &str,
        incoming: &str,
        prior: Option<&str>,
    ) -> ReconciledBody {
        if let Some(prior) = prior {
            return ReconciledBody {
                body: self.patcher.apply(incoming, prior),
                degraded: false,
            };
        }
        if !self.patcher.is_patch(incoming) {
            // Plain body for a post we have not indexed yet.
            return ReconciledBody {
                body: incoming.to_string(),
                degraded: false,
            };
        }

        debug!(author, permlink, "edit on post not in store, fetching canonical body");
        match self.fetch_canonical(author, permlink).await {
            Some(canonical) => ReconciledBody {
                body: self.patcher.apply(incoming, &canonical),
                degraded: false,
            },
            None => {
                warn!(author, permlink, "canonical fetch failed, using raw body");
                ReconciledBody {
                    body: incoming.to_string(),
                    degraded: true,
                }
            }
        }
    }

    async fn fetch_canonical(&self, author: &str, permlink: &str) -> Option<String> {
        let node = self.node?;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match node.get_content(author, permlink).await {
                Ok(Some(content)) => return Some(content.body),
                Ok(None) => return None,
                Err(err) => {
                    debug!(attempt, %err, "content fetch attempt failed");
                    match self.retry.next_delay(attempt) {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => return None,
                    }
                }
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn plain_body_passes_through() {
        let patcher = BodyPatcher::new();
        assert_eq!(patcher.apply("Just a new body", "old"), "Just a new body");
        assert!(!patcher.is_patch("Just a new body"));
    }

    #[test]
    fn patch_appends_text() {
        let patcher = BodyPatcher::new();
        let script = patcher.make_patch("Hello", "Hello World").unwrap();
        assert!(patcher.is_patch(&script));
        assert_eq!(patcher.apply(&script, "Hello"), "Hello World");
    }

    #[test]
    fn preview_truncation() {
        let short = "abc";
        assert_eq!(truncate_preview(short), "abc");
        let long = "x".repeat(400);
        assert_eq!(truncate_preview(&long).len(), PREVIEW_LEN);
        // Multi-byte characters are not split
        let wide = "é".repeat(200);
        let preview = truncate_preview(&wide);
        assert!(preview.len() <= PREVIEW_LEN);
        assert!(wide.starts_with(preview));
    }

    struct FailingNode {
        calls: AtomicU32,
    }

    #[async_trait]
    impl crate::node::NodeClient for FailingNode {
        async fn get_content(
            &self,
            _author: &str,
            _permlink: &str,
        ) -> Result<Option<crate::node::NodeContent>, IndexError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(IndexError::Source("down".into()))
        }

        async fn get_content_replies(
            &self,
            _author: &str,
            _permlink: &str,
        ) -> Result<Vec<crate::node::NodeContent>, IndexError> {
            Ok(vec![])
        }

        async fn get_following(&self, _account: &str) -> Result<Vec<String>, IndexError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn patch_against_missing_post_falls_back_to_raw() {
        let node = FailingNode {
            calls: AtomicU32::new(0),
        };
        let mut retry = RetryPolicy::new(5);
        retry.initial_backoff = std::time::Duration::from_millis(1);
        let reconciler = EditReconciler::new(Some(&node), retry);

        let patcher = BodyPatcher::new();
        let script = patcher.make_patch("Hello", "Hello World").unwrap();

        let result = reconciler.reconcile("alice", "post", &script, None).await;
        assert_eq!(result.body, script, "fallback body equals the raw incoming text");
        assert!(result.degraded);
        assert_eq!(node.calls.load(Ordering::Relaxed), 5, "bounded to five attempts");
    }

    #[tokio::test]
    async fn prior_body_patched_without_fetch() {
        let reconciler = EditReconciler::new(None, RetryPolicy::default());
        let patcher = BodyPatcher::new();
        let script = patcher.make_patch("Hello", "Hello World").unwrap();

        let result = reconciler.reconcile("alice", "post", &script, Some("Hello")).await;
        assert_eq!(result.body, "Hello World");
        assert!(!result.degraded);
    }

    #[tokio::test]
    async fn full_body_edit_replaces() {
        let reconciler = EditReconciler::new(None, RetryPolicy::default());
        let result = reconciler
            .reconcile("alice", "post", "Rewritten from scratch", Some("Hello"))
            .await;
        assert_eq!(result.body, "Rewritten from scratch");
    }
}
