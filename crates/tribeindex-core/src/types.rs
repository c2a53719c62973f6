//! Shared types for the ingestion pipeline.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Authorperm ──────────────────────────────────────────────────────────────

/// Build the composite `@author/permlink` identifier.
pub fn construct_authorperm(author: &str, permlink: &str) -> String {
    format!("@{author}/{permlink}")
}

/// Split an `@author/permlink` identifier back into its parts.
///
/// Returns `None` if the string does not contain a `/` separator.
pub fn resolve_authorperm(authorperm: &str) -> Option<(&str, &str)> {
    let trimmed = authorperm.strip_prefix('@').unwrap_or(authorperm);
    let (author, permlink) = trimmed.split_once('/')?;
    if author.is_empty() || permlink.is_empty() {
        return None;
    }
    Some((author, permlink))
}

// ─── Primary-chain operations ────────────────────────────────────────────────

/// A decoded operation envelope from the primary chain stream.
///
/// Only the three streamed operation types carry data here; fields that do
/// not apply to a given `op_type` are left `None`/empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationEnvelope {
    /// Operation type: `"comment"`, `"delete_comment"`, or `"custom_json"`.
    #[serde(rename = "type")]
    pub op_type: String,
    pub block_num: u64,
    pub timestamp: DateTime<Utc>,

    // comment / delete_comment
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub permlink: Option<String>,
    #[serde(default)]
    pub parent_author: Option<String>,
    #[serde(default)]
    pub parent_permlink: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub json_metadata: Option<String>,

    // custom_json
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub json: Option<String>,
    #[serde(default)]
    pub required_auths: Vec<String>,
    #[serde(default)]
    pub required_posting_auths: Vec<String>,
}

/// One primary-chain block's worth of streamed operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpBlock {
    pub num: u64,
    pub timestamp: DateTime<Utc>,
    pub operations: Vec<OperationEnvelope>,
}

// ─── Sidechain blocks ────────────────────────────────────────────────────────

/// One transaction inside a sidechain block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidechainTransaction {
    pub contract: String,
    pub action: String,
    /// JSON-encoded contract payload, decoded lazily per handler.
    pub payload: String,
}

/// A block from the token-layer sidechain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidechainBlock {
    pub height: u64,
    pub timestamp: DateTime<Utc>,
    pub transactions: Vec<SidechainTransaction>,
}

// ─── Token configuration ─────────────────────────────────────────────────────

/// Configuration for one token's reward layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Token symbol (upper case, e.g. `"LEO"`).
    pub token: String,
    /// Sidechain reward pool backing this token.
    pub reward_pool_id: i64,
    /// Account allowed to change tribe settings.
    pub issuer: String,
    /// Transfers to this account with an `@author/permlink` memo promote the
    /// referenced post.
    #[serde(default)]
    pub promoted_post_account: Option<String>,
}

#[derive(Default)]
struct RegistryInner {
    by_symbol: HashMap<String, TokenConfig>,
    by_pool: HashMap<i64, String>,
}

/// In-memory token lookup table shared by both processors.
///
/// Loaded once at startup from the token_config table and updated only by the
/// tribe-settings handler; external refreshes rewrite the backing table and
/// restart the process.
pub struct TokenRegistry {
    inner: RwLock<RegistryInner>,
}

impl TokenRegistry {
    pub fn new(configs: Vec<TokenConfig>) -> Self {
        let mut inner = RegistryInner::default();
        for cfg in configs {
            inner.by_pool.insert(cfg.reward_pool_id, cfg.token.clone());
            inner.by_symbol.insert(cfg.token.clone(), cfg);
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<TokenConfig> {
        self.inner.read().unwrap().by_symbol.get(symbol).cloned()
    }

    pub fn by_reward_pool(&self, reward_pool_id: i64) -> Option<TokenConfig> {
        let inner = self.inner.read().unwrap();
        let symbol = inner.by_pool.get(&reward_pool_id)?;
        inner.by_symbol.get(symbol).cloned()
    }

    /// Replace (or insert) a token's configuration.
    pub fn update(&self, config: TokenConfig) {
        let mut inner = self.inner.write().unwrap();
        inner.by_pool.insert(config.reward_pool_id, config.token.clone());
        inner.by_symbol.insert(config.token.clone(), config);
    }

    pub fn symbols(&self) -> Vec<String> {
        self.inner.read().unwrap().by_symbol.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().by_symbol.is_empty()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
