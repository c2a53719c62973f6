//! Follow handler — maintains the `(follower, following)` relation.

use tribeindex_core::classify::FollowOp;
use tribeindex_core::error::IndexError;
use tribeindex_storage::BlockWriter;

pub async fn process(writer: &mut BlockWriter, op: &FollowOp) -> Result<(), IndexError> {
    writer
        .upsert_follow(&op.follower, &op.following, op.state.as_i32() as i64)
        .await
}
