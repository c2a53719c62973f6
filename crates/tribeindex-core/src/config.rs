//! Indexer configuration, loaded from a JSON file.

use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Configuration shared by the processors, query engine, and CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// SQLite database path or URL.
    pub database_url: String,
    /// Primary-chain RPC endpoints, tried in order.
    pub node_urls: Vec<String>,
    /// Sidechain (token layer) HTTP API endpoint.
    pub sidechain_api_url: String,
    /// Externally published token configuration feed.
    pub token_config_url: String,
    /// Minimum age of a block before it is processed (seconds).
    pub confirmation_delay_secs: i64,
    /// Sleep between head polls when caught up or waiting (milliseconds).
    pub poll_interval_ms: u64,
    /// Bulk range fetch for the primary stream.
    pub bulk_blocks: bool,
    /// Blocks per bulk fetch batch.
    pub batch_size: u64,
    /// Bulk range fetch for the sidechain stream.
    pub sidechain_bulk_blocks: bool,
    /// Sidechain blocks per range fetch.
    pub sidechain_chunk_size: u64,
    /// How long a materialized follow list stays fresh (seconds).
    pub follow_refresh_window_secs: i64,
    /// Attempt budget for canonical-content fetches.
    pub fetch_retries: u32,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            database_url: "tribeindex.db".into(),
            node_urls: vec![
                "https://api.syncad.com".into(),
                "https://api.hive.blog".into(),
            ],
            sidechain_api_url: "https://api.hive-engine.com/rpc".into(),
            token_config_url: "https://smt-api.enginerpc.com/config".into(),
            confirmation_delay_secs: 15,
            poll_interval_ms: 3000,
            bulk_blocks: false,
            batch_size: 1000,
            sidechain_bulk_blocks: false,
            sidechain_chunk_size: 1000,
            follow_refresh_window_secs: 86_400,
            fetch_retries: 5,
        }
    }
}

impl IndexerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &str) -> Result<Self, IndexError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| IndexError::Config(format!("cannot read {path}: {e}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| IndexError::Config(format!("cannot parse {path}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = IndexerConfig::default();
        assert_eq!(cfg.confirmation_delay_secs, 15);
        assert_eq!(cfg.batch_size, 1000);
        assert_eq!(cfg.fetch_retries, 5);
    }

    #[test]
    fn partial_json_merges_with_defaults() {
        let cfg: IndexerConfig =
            serde_json::from_str(r#"{"database_url":"custom.db","bulk_blocks":true}"#).unwrap();
        assert_eq!(cfg.database_url, "custom.db");
        assert!(cfg.bulk_blocks);
        assert_eq!(cfg.sidechain_chunk_size, 1000);
    }
}
