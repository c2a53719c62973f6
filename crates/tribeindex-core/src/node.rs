//! Abstract client for the primary-chain node's content API.
//!
//! The ingestion core never talks HTTP itself; the CLI wires in a
//! `reqwest`-backed implementation and tests use in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::types::construct_authorperm;

/// A piece of content as returned by the node's content lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeContent {
    pub author: String,
    pub permlink: String,
    pub body: String,
    #[serde(default)]
    pub json_metadata: Option<String>,
    #[serde(default)]
    pub parent_author: Option<String>,
    #[serde(default)]
    pub parent_permlink: Option<String>,
    /// Depth in the reply tree (root = 0), when the node reports it.
    #[serde(default)]
    pub depth: Option<u32>,
    /// Root category, used to rebuild canonical urls.
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

impl NodeContent {
    pub fn authorperm(&self) -> String {
        construct_authorperm(&self.author, &self.permlink)
    }

    pub fn parent_authorperm(&self) -> Option<String> {
        match (&self.parent_author, &self.parent_permlink) {
            (Some(a), Some(p)) if !a.is_empty() && !p.is_empty() => {
                Some(construct_authorperm(a, p))
            }
            _ => None,
        }
    }
}

/// Trait for fetching canonical content and follow lists from the node.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Fetch the current canonical content, `None` if the node does not know
    /// the authorperm.
    async fn get_content(
        &self,
        author: &str,
        permlink: &str,
    ) -> Result<Option<NodeContent>, IndexError>;

    /// Fetch the direct replies of a piece of content.
    async fn get_content_replies(
        &self,
        author: &str,
        permlink: &str,
    ) -> Result<Vec<NodeContent>, IndexError>;

    /// Fetch the list of accounts `account` follows (blog follows only).
    async fn get_following(&self, account: &str) -> Result<Vec<String>, IndexError>;
}
