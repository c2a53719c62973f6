//! Lazy follow-graph refresh.
//!
//! Follow lists are materialized on first use and refreshed only once the
//! staleness window has elapsed; the hot query path never touches the node.

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use tribeindex_core::error::IndexError;
use tribeindex_core::node::NodeClient;
use tribeindex_storage::{AccountPatch, GraphStore};

/// Ensure `account`'s follow list is materialized and fresh enough.
pub async fn ensure_follows_fresh(
    store: &GraphStore,
    node: Option<&dyn NodeClient>,
    account: &str,
    window_secs: i64,
) -> Result<(), IndexError> {
    let stamp = store.follow_refresh_time(account).await?;
    if let Some(stamp) = stamp {
        if Utc::now().signed_duration_since(stamp) < Duration::seconds(window_secs) {
            return Ok(());
        }
    }
    let Some(node) = node else {
        return Ok(());
    };

    let following = match node.get_following(account).await {
        Ok(list) => list,
        Err(err) => {
            // Stale data beats no data; the next query retries.
            warn!(account, %err, "follow list fetch failed");
            return Ok(());
        }
    };
    store.replace_follows(account, &following).await?;

    // Stamp the refresh on one of the account's token rows.
    if let Some(first) = store.token_configs().await?.first() {
        store
            .merge_account(&AccountPatch {
                name: account.to_string(),
                token: first.token.clone(),
                last_follow_refresh_time: Some(Utc::now()),
                ..Default::default()
            })
            .await?;
    }
    debug!(account, count = following.len(), "follow list refreshed");
    Ok(())
}
