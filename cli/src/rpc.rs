//! HTTP clients for the chain node, the sidechain API, and the token
//! configuration feed.
//!
//! The node client keeps a list of RPC endpoints and advances to the next
//! one whenever a call fails, so retries from the processors automatically
//! land on a different node.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, warn};

use tribeindex_core::error::IndexError;
use tribeindex_core::node::{NodeClient, NodeContent};
use tribeindex_core::source::{PrimaryBlockSource, SidechainSource};
use tribeindex_core::types::{
    OpBlock, OperationEnvelope, SidechainBlock, SidechainTransaction,
};
use tribeindex_storage::TokenConfigRow;

/// Block timestamps arrive as naive UTC (`2024-05-01T12:00:00`); some APIs
/// add a suffix.
fn parse_chain_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn http_err(e: reqwest::Error) -> IndexError {
    IndexError::Source(e.to_string())
}

// ─── Primary chain node ──────────────────────────────────────────────────────

/// JSON-RPC client for the primary chain, rotating through the configured
/// node list on failure.
pub struct NodeRpc {
    client: reqwest::Client,
    urls: Vec<String>,
    cursor: AtomicUsize,
}

impl NodeRpc {
    pub fn new(urls: Vec<String>) -> Result<Self, IndexError> {
        if urls.is_empty() {
            return Err(IndexError::Config("no node urls configured".into()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            urls,
            cursor: AtomicUsize::new(0),
        })
    }

    fn current_url(&self) -> &str {
        &self.urls[self.cursor.load(Ordering::Relaxed) % self.urls.len()]
    }

    /// Move to the next node; the caller's retry goes through it.
    fn rotate(&self) {
        if self.urls.len() > 1 {
            let next = self.cursor.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(url = %self.urls[next % self.urls.len()], "rotating to next node");
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, IndexError> {
        let url = self.current_url();
        let request = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });
        let result = async {
            let response = self
                .client
                .post(url)
                .json(&request)
                .send()
                .await
                .map_err(http_err)?
                .error_for_status()
                .map_err(http_err)?;
            let body: Value = response.json().await.map_err(http_err)?;
            if let Some(error) = body.get("error") {
                return Err(IndexError::Source(format!("{method}: {error}")));
            }
            Ok(body.get("result").cloned().unwrap_or(Value::Null))
        }
        .await;
        if result.is_err() {
            self.rotate();
        }
        result
    }
}

fn node_content_from_value(value: &Value) -> Option<NodeContent> {
    let author = value.get("author")?.as_str()?;
    if author.is_empty() {
        return None;
    }
    Some(NodeContent {
        author: author.to_string(),
        permlink: value.get("permlink")?.as_str()?.to_string(),
        body: value.get("body").and_then(Value::as_str).unwrap_or_default().to_string(),
        json_metadata: value
            .get("json_metadata")
            .and_then(Value::as_str)
            .map(str::to_string),
        parent_author: value
            .get("parent_author")
            .and_then(Value::as_str)
            .map(str::to_string),
        parent_permlink: value
            .get("parent_permlink")
            .and_then(Value::as_str)
            .map(str::to_string),
        depth: value.get("depth").and_then(Value::as_u64).map(|d| d as u32),
        category: value.get("category").and_then(Value::as_str).map(str::to_string),
        created: value
            .get("created")
            .and_then(Value::as_str)
            .and_then(parse_chain_time),
    })
}

#[async_trait]
impl NodeClient for NodeRpc {
    async fn get_content(
        &self,
        author: &str,
        permlink: &str,
    ) -> Result<Option<NodeContent>, IndexError> {
        let result = self
            .call("condenser_api.get_content", json!([author, permlink]))
            .await?;
        Ok(node_content_from_value(&result))
    }

    async fn get_content_replies(
        &self,
        author: &str,
        permlink: &str,
    ) -> Result<Vec<NodeContent>, IndexError> {
        let result = self
            .call("condenser_api.get_content_replies", json!([author, permlink]))
            .await?;
        Ok(result
            .as_array()
            .map(|list| list.iter().filter_map(node_content_from_value).collect())
            .unwrap_or_default())
    }

    async fn get_following(&self, account: &str) -> Result<Vec<String>, IndexError> {
        let result = self
            .call(
                "condenser_api.get_following",
                json!([account, "", "blog", 1000]),
            )
            .await?;
        Ok(result
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|row| row.get("following").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// The streamed operation types; everything else never leaves the node.
const STREAMED_OPS: [&str; 3] = ["comment", "delete_comment", "custom_json"];

fn decode_operation(
    name: &str,
    body: &Value,
    block_num: u64,
    timestamp: DateTime<Utc>,
) -> Option<OperationEnvelope> {
    if !STREAMED_OPS.contains(&name) {
        return None;
    }
    let text = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);
    let names = |key: &str| -> Vec<String> {
        body.get(key)
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };
    Some(OperationEnvelope {
        op_type: name.to_string(),
        block_num,
        timestamp,
        author: text("author"),
        permlink: text("permlink"),
        parent_author: text("parent_author"),
        parent_permlink: text("parent_permlink"),
        title: text("title"),
        body: text("body"),
        json_metadata: text("json_metadata"),
        id: text("id"),
        json: text("json"),
        required_auths: names("required_auths"),
        required_posting_auths: names("required_posting_auths"),
    })
}

fn decode_block(num: u64, raw: &Value) -> Option<OpBlock> {
    let timestamp = raw
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_chain_time)?;
    let mut operations = Vec::new();
    if let Some(transactions) = raw.get("transactions").and_then(Value::as_array) {
        for tx in transactions {
            let Some(ops) = tx.get("operations").and_then(Value::as_array) else {
                continue;
            };
            for op in ops {
                let Some(pair) = op.as_array().filter(|p| p.len() == 2) else {
                    continue;
                };
                let Some(name) = pair[0].as_str() else { continue };
                if let Some(envelope) = decode_operation(name, &pair[1], num, timestamp) {
                    operations.push(envelope);
                }
            }
        }
    }
    Some(OpBlock {
        num,
        timestamp,
        operations,
    })
}

#[async_trait]
impl PrimaryBlockSource for NodeRpc {
    async fn latest_block_num(&self) -> Result<u64, IndexError> {
        let props = self
            .call("condenser_api.get_dynamic_global_properties", json!([]))
            .await?;
        props
            .get("head_block_number")
            .and_then(Value::as_u64)
            .ok_or_else(|| IndexError::Source("missing head_block_number".into()))
    }

    async fn fetch_blocks(&self, start: u64, count: u64) -> Result<Vec<OpBlock>, IndexError> {
        let mut blocks = Vec::with_capacity(count as usize);
        for num in start..start + count {
            let raw = self.call("condenser_api.get_block", json!([num])).await?;
            if raw.is_null() {
                break;
            }
            match decode_block(num, &raw) {
                Some(block) => blocks.push(block),
                None => {
                    warn!(num, "block without parsable timestamp skipped");
                }
            }
        }
        Ok(blocks)
    }
}

// ─── Sidechain API ───────────────────────────────────────────────────────────

/// Client for the token layer's blockchain endpoint.
pub struct SidechainRpc {
    client: reqwest::Client,
    url: String,
}

impl SidechainRpc {
    pub fn new(api_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/blockchain", api_url.trim_end_matches('/')),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, IndexError> {
        let request = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(http_err)?
            .error_for_status()
            .map_err(http_err)?;
        let body: Value = response.json().await.map_err(http_err)?;
        if let Some(error) = body.get("error") {
            return Err(IndexError::Source(format!("{method}: {error}")));
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

fn decode_sidechain_block(raw: &Value) -> Option<SidechainBlock> {
    let height = raw.get("blockNumber").and_then(Value::as_u64)?;
    let timestamp = raw
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_chain_time)?;
    let transactions = raw
        .get("transactions")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|tx| {
                    Some(SidechainTransaction {
                        contract: tx.get("contract")?.as_str()?.to_string(),
                        action: tx.get("action")?.as_str()?.to_string(),
                        // Payloads are published as JSON-encoded strings, but
                        // some mirrors inline the object.
                        payload: match tx.get("payload")? {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        },
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Some(SidechainBlock {
        height,
        timestamp,
        transactions,
    })
}

#[async_trait]
impl SidechainSource for SidechainRpc {
    async fn latest_height(&self) -> Result<u64, IndexError> {
        let info = self.call("getLatestBlockInfo", json!({})).await?;
        info.get("blockNumber")
            .and_then(Value::as_u64)
            .ok_or_else(|| IndexError::Source("missing blockNumber".into()))
    }

    async fn block(&self, height: u64) -> Result<Option<SidechainBlock>, IndexError> {
        let raw = self
            .call("getBlockInfo", json!({"blockNumber": height}))
            .await?;
        Ok(decode_sidechain_block(&raw))
    }

    async fn block_range(
        &self,
        start: u64,
        count: u64,
    ) -> Result<Vec<SidechainBlock>, IndexError> {
        let raw = self
            .call(
                "getBlockRangeInfo",
                json!({"startBlockNumber": start, "count": count}),
            )
            .await?;
        Ok(raw
            .as_array()
            .map(|list| list.iter().filter_map(decode_sidechain_block).collect())
            .unwrap_or_default())
    }
}

// ─── Token configuration feed ────────────────────────────────────────────────

/// Fetch the externally published token configuration list.
pub async fn fetch_token_configs(url: &str) -> Result<Vec<TokenConfigRow>, IndexError> {
    let response = reqwest::get(url)
        .await
        .map_err(http_err)?
        .error_for_status()
        .map_err(http_err)?;
    let raw: Value = response.json().await.map_err(http_err)?;
    let Some(list) = raw.as_array() else {
        return Err(IndexError::Source("token config feed is not an array".into()));
    };
    let mut configs = Vec::with_capacity(list.len());
    for entry in list {
        // Older feed versions publish the symbol under "symbol".
        let token = entry
            .get("token")
            .or_else(|| entry.get("symbol"))
            .and_then(Value::as_str);
        let pool = entry.get("reward_pool_id").and_then(Value::as_i64);
        let issuer = entry.get("issuer").and_then(Value::as_str);
        let (Some(token), Some(pool), Some(issuer)) = (token, pool, issuer) else {
            warn!(%entry, "skipping malformed token config entry");
            continue;
        };
        configs.push(TokenConfigRow {
            token: token.to_string(),
            reward_pool_id: pool,
            issuer: issuer.to_string(),
            promoted_post_account: entry
                .get("promoted_post_account")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_time_formats() {
        assert!(parse_chain_time("2024-05-01T12:00:00").is_some());
        assert!(parse_chain_time("2024-05-01T12:00:00Z").is_some());
        assert!(parse_chain_time("not a time").is_none());
    }

    #[test]
    fn block_decoding_filters_ops() {
        let raw = json!({
            "timestamp": "2024-05-01T12:00:00",
            "transactions": [
                {"operations": [
                    ["comment", {"author": "alice", "permlink": "hello",
                                 "parent_author": "", "parent_permlink": "leo",
                                 "title": "Hello", "body": "Hi",
                                 "json_metadata": "{}"}],
                    ["vote", {"voter": "bob"}],
                    ["custom_json", {"id": "follow", "json": "[]",
                                     "required_posting_auths": ["bob"],
                                     "required_auths": []}]
                ]}
            ]
        });
        let block = decode_block(42, &raw).unwrap();
        assert_eq!(block.num, 42);
        assert_eq!(block.operations.len(), 2, "vote op is filtered out");
        assert_eq!(block.operations[0].op_type, "comment");
        assert_eq!(block.operations[1].required_posting_auths, ["bob"]);
    }

    #[test]
    fn sidechain_block_decoding() {
        let raw = json!({
            "blockNumber": 100,
            "timestamp": "2024-05-01T12:00:03",
            "transactions": [
                {"contract": "comments", "action": "vote",
                 "payload": "{\"rshares\":\"100\"}"},
                {"contract": "tokens", "action": "transfer",
                 "payload": {"symbol": "LEO"}}
            ]
        });
        let block = decode_sidechain_block(&raw).unwrap();
        assert_eq!(block.height, 100);
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.transactions[0].payload, "{\"rshares\":\"100\"}");
        assert_eq!(block.transactions[1].payload, "{\"symbol\":\"LEO\"}");
    }
}
