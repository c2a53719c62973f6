//! Tribe settings handler.
//!
//! Only the token's issuer may change settings. Updates land in the
//! token_config table and in the shared in-memory registry in the same
//! operation.

use serde_json::Value;
use tracing::{debug, info};

use tribeindex_core::classify::TribeSettingsOp;
use tribeindex_core::error::IndexError;
use tribeindex_core::types::TokenRegistry;
use tribeindex_storage::{BlockWriter, TokenConfigRow};

pub async fn process(
    writer: &mut BlockWriter,
    tokens: &TokenRegistry,
    op: &TribeSettingsOp,
) -> Result<(), IndexError> {
    let Some(reward_pool_id) = op.settings.get("reward_pool_id").and_then(Value::as_i64) else {
        debug!("tribe settings without reward_pool_id ignored");
        return Ok(());
    };
    let Some(mut config) = tokens.by_reward_pool(reward_pool_id) else {
        debug!(reward_pool_id, "tribe settings for unknown reward pool ignored");
        return Ok(());
    };
    if op.user != config.issuer {
        debug!(user = %op.user, token = %config.token, "tribe settings from non-issuer ignored");
        return Ok(());
    }

    if let Some(account) = op
        .settings
        .get("promoted_post_account")
        .and_then(Value::as_str)
    {
        config.promoted_post_account = Some(account.to_string());
    }

    writer
        .upsert_token_config(&TokenConfigRow::from(config.clone()))
        .await?;
    info!(token = %config.token, "tribe settings updated");
    tokens.update(config);
    Ok(())
}
