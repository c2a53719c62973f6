//! End-to-end pipeline properties: idempotence, checkpoint atomicity,
//! counter convergence, reblog gating, and cross-token deletion.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use tribeindex_core::checkpoint::{Checkpoint, CheckpointStore, StreamSource};
use tribeindex_core::classify::{classify, ClassifiedOp};
use tribeindex_core::error::IndexError;
use tribeindex_core::patcher::{BodyPatcher, EditReconciler};
use tribeindex_core::retry::RetryPolicy;
use tribeindex_core::source::{PrimaryBlockSource, SidechainSource};
use tribeindex_core::types::{
    OpBlock, OperationEnvelope, SidechainBlock, SidechainTransaction, TokenConfig, TokenRegistry,
};
use tribeindex_core::IndexerConfig;
use tribeindex_storage::GraphStore;
use tribeindex_stream::{comment, BlockOutcome, SidechainProcessor, StreamProcessor, WaitReason};

fn ts(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
}

fn registry() -> Arc<TokenRegistry> {
    Arc::new(TokenRegistry::new(vec![
        TokenConfig {
            token: "LEO".into(),
            reward_pool_id: 7,
            issuer: "leo-issuer".into(),
            promoted_post_account: Some("leo-promo".into()),
        },
        TokenConfig {
            token: "PAL".into(),
            reward_pool_id: 8,
            issuer: "pal-issuer".into(),
            promoted_post_account: None,
        },
    ]))
}

struct EmptySource;

#[async_trait]
impl PrimaryBlockSource for EmptySource {
    async fn latest_block_num(&self) -> Result<u64, IndexError> {
        Ok(0)
    }
    async fn fetch_blocks(&self, _start: u64, _count: u64) -> Result<Vec<OpBlock>, IndexError> {
        Ok(vec![])
    }
}

struct EmptySidechain;

#[async_trait]
impl SidechainSource for EmptySidechain {
    async fn latest_height(&self) -> Result<u64, IndexError> {
        Ok(0)
    }
    async fn block(&self, _height: u64) -> Result<Option<SidechainBlock>, IndexError> {
        Ok(None)
    }
    async fn block_range(
        &self,
        _start: u64,
        _count: u64,
    ) -> Result<Vec<SidechainBlock>, IndexError> {
        Ok(vec![])
    }
}

fn comment_env(
    author: &str,
    permlink: &str,
    parent_author: &str,
    parent_permlink: &str,
    body: &str,
    block_num: u64,
    timestamp: DateTime<Utc>,
) -> OperationEnvelope {
    OperationEnvelope {
        op_type: "comment".into(),
        block_num,
        timestamp,
        author: Some(author.into()),
        permlink: Some(permlink.into()),
        parent_author: Some(parent_author.into()),
        parent_permlink: Some(parent_permlink.into()),
        title: Some(format!("{permlink} title")),
        body: Some(body.into()),
        json_metadata: Some(r#"{"tags":["leo","pal"],"app":"tribeindex/0.2"}"#.into()),
        ..Default::default()
    }
}

fn custom_json_env(
    id: &str,
    user: &str,
    json: &str,
    block_num: u64,
    timestamp: DateTime<Utc>,
) -> OperationEnvelope {
    OperationEnvelope {
        op_type: "custom_json".into(),
        block_num,
        timestamp,
        id: Some(id.into()),
        json: Some(json.into()),
        required_posting_auths: vec![user.into()],
        ..Default::default()
    }
}

fn delete_env(author: &str, permlink: &str, block_num: u64) -> OperationEnvelope {
    OperationEnvelope {
        op_type: "delete_comment".into(),
        block_num,
        timestamp: ts(1, 6),
        author: Some(author.into()),
        permlink: Some(permlink.into()),
        ..Default::default()
    }
}

fn block(num: u64, timestamp: DateTime<Utc>, operations: Vec<OperationEnvelope>) -> OpBlock {
    OpBlock {
        num,
        timestamp,
        operations,
    }
}

/// Let the primary gate pass: the sidechain watermark sits ahead of every
/// test block.
async fn advance_sidechain_watermark(store: &GraphStore) {
    store
        .save(Checkpoint {
            source: StreamSource::Sidechain,
            last_height: 1,
            last_timestamp: Some(ts(28, 0)),
        })
        .await
        .unwrap();
}

fn processor<'a>(store: &'a GraphStore, source: &'a EmptySource) -> StreamProcessor<'a> {
    StreamProcessor::new(store, source, None, registry(), IndexerConfig::default())
}

// ─── Gating ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn too_fresh_block_waits() {
    let store = GraphStore::in_memory().await.unwrap();
    advance_sidechain_watermark(&store).await;
    let source = EmptySource;
    let proc = processor(&store, &source);

    let fresh = block(10, Utc::now(), vec![]);
    assert_eq!(
        proc.process_block(&fresh).await.unwrap(),
        BlockOutcome::Waiting(WaitReason::TooFresh)
    );
}

#[tokio::test]
async fn sidechain_lag_defers_block() {
    let store = GraphStore::in_memory().await.unwrap();
    let source = EmptySource;
    let proc = processor(&store, &source);

    // No sidechain checkpoint at all: must wait.
    let b = block(10, ts(1, 1), vec![]);
    assert_eq!(
        proc.process_block(&b).await.unwrap(),
        BlockOutcome::Waiting(WaitReason::SidechainLag)
    );
    // Checkpoint unchanged, so the block is redelivered after the wait.
    assert!(store.load(StreamSource::Primary).await.unwrap().is_none());

    advance_sidechain_watermark(&store).await;
    assert_eq!(proc.process_block(&b).await.unwrap(), BlockOutcome::Applied);
    let cp = store.load(StreamSource::Primary).await.unwrap().unwrap();
    assert_eq!(cp.last_height, 10);
}

// ─── Post creation, reply counters, idempotence ──────────────────────────────

#[tokio::test]
async fn root_post_indexed_under_matching_tokens() {
    let store = GraphStore::in_memory().await.unwrap();
    advance_sidechain_watermark(&store).await;
    let source = EmptySource;
    let proc = processor(&store, &source);

    let b = block(
        10,
        ts(1, 1),
        vec![comment_env("alice", "hello", "", "leo", "Hello World", 10, ts(1, 1))],
    );
    proc.process_block(&b).await.unwrap();

    let rows = store.post_rows("@alice/hello").await.unwrap();
    let tokens: Vec<_> = rows.iter().map(|p| p.token.as_str()).collect();
    assert_eq!(tokens, ["LEO", "PAL"]);
    assert!(rows[0].is_main_post());
    assert_eq!(rows[0].children, Some(0));
    assert_eq!(rows[0].created, Some(ts(1, 1)));

    let meta = store.post_metadata("@alice/hello").await.unwrap().unwrap();
    assert_eq!(meta.depth, Some(0));
    assert_eq!(meta.url.as_deref(), Some("/leo/@alice/hello"));
    assert_eq!(meta.body.as_deref(), Some("Hello World"));

    let account = store.account("alice", "LEO").await.unwrap().unwrap();
    assert_eq!(account.last_root_post, Some(ts(1, 1)));
    assert!(account.last_post.is_none());
}

#[tokio::test]
async fn two_replies_count_two_children() {
    let store = GraphStore::in_memory().await.unwrap();
    advance_sidechain_watermark(&store).await;
    let source = EmptySource;
    let proc = processor(&store, &source);

    proc.process_block(&block(
        10,
        ts(1, 1),
        vec![comment_env("alice", "root", "", "leo", "Root", 10, ts(1, 1))],
    ))
    .await
    .unwrap();
    proc.process_block(&block(
        11,
        ts(1, 2),
        vec![
            comment_env("bob", "re-1", "alice", "root", "First", 11, ts(1, 2)),
            comment_env("carol", "re-2", "alice", "root", "Second", 11, ts(1, 2)),
        ],
    ))
    .await
    .unwrap();

    let root = store.token_post("LEO", "@alice/root").await.unwrap().unwrap();
    assert_eq!(root.children, Some(2));
    let meta = store.post_metadata("@alice/root").await.unwrap().unwrap();
    assert_eq!(meta.children, Some(2));

    // Replies inherit the parent's tokens and depth/url.
    let reply_meta = store.post_metadata("@bob/re-1").await.unwrap().unwrap();
    assert_eq!(reply_meta.depth, Some(1));
    assert_eq!(reply_meta.url.as_deref(), Some("/leo/@alice/root"));
}

#[tokio::test]
async fn replaying_a_block_changes_nothing() {
    let store = GraphStore::in_memory().await.unwrap();
    advance_sidechain_watermark(&store).await;
    let source = EmptySource;
    let proc = processor(&store, &source);

    proc.process_block(&block(
        10,
        ts(1, 1),
        vec![comment_env("alice", "root", "", "leo", "Root", 10, ts(1, 1))],
    ))
    .await
    .unwrap();
    let reply_block = block(
        11,
        ts(1, 2),
        vec![comment_env("bob", "re-1", "alice", "root", "First", 11, ts(1, 2))],
    );
    proc.process_block(&reply_block).await.unwrap();
    // At-least-once delivery: the same block arrives again.
    proc.process_block(&reply_block).await.unwrap();

    let root = store.token_post("LEO", "@alice/root").await.unwrap().unwrap();
    assert_eq!(root.children, Some(1), "no double-counted children");
    let meta = store.post_metadata("@alice/root").await.unwrap().unwrap();
    assert_eq!(meta.children, Some(1));
}

#[tokio::test]
async fn crash_before_commit_reprocesses_cleanly() {
    let store = GraphStore::in_memory().await.unwrap();
    advance_sidechain_watermark(&store).await;
    let source = EmptySource;
    let proc = processor(&store, &source);

    proc.process_block(&block(
        10,
        ts(1, 1),
        vec![comment_env("alice", "root", "", "leo", "Root", 10, ts(1, 1))],
    ))
    .await
    .unwrap();

    // Simulated crash: apply the reply's mutations but drop the transaction
    // before the checkpoint commits.
    {
        let mut writer = store.begin_block().await.unwrap();
        let reconciler = EditReconciler::new(None, RetryPolicy::new(1));
        let env = comment_env("bob", "re-1", "alice", "root", "First", 11, ts(1, 2));
        let ClassifiedOp::Comment(op) = classify(&env) else {
            panic!("expected comment")
        };
        comment::process(&mut writer, &reconciler, &registry(), &op)
            .await
            .unwrap();
        // writer dropped here without commit
    }
    let cp = store.load(StreamSource::Primary).await.unwrap().unwrap();
    assert_eq!(cp.last_height, 10, "checkpoint untouched by the lost block");
    assert!(store.post_metadata("@bob/re-1").await.unwrap().is_none());

    // Restart resumes from checkpoint + 1 and replays the block.
    proc.process_block(&block(
        11,
        ts(1, 2),
        vec![comment_env("bob", "re-1", "alice", "root", "First", 11, ts(1, 2))],
    ))
    .await
    .unwrap();

    let root = store.token_post("LEO", "@alice/root").await.unwrap().unwrap();
    assert_eq!(root.children, Some(1));
    assert!(store.post_metadata("@bob/re-1").await.unwrap().is_some());
}

// ─── Edits ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn patch_edit_reconciles_body() {
    let store = GraphStore::in_memory().await.unwrap();
    advance_sidechain_watermark(&store).await;
    let source = EmptySource;
    let proc = processor(&store, &source);

    proc.process_block(&block(
        10,
        ts(1, 1),
        vec![comment_env("alice", "root", "", "leo", "Hello", 10, ts(1, 1))],
    ))
    .await
    .unwrap();

    let patcher = BodyPatcher::new();
    let script = patcher.make_patch("Hello", "Hello World").unwrap();
    proc.process_block(&block(
        11,
        ts(1, 2),
        vec![comment_env("alice", "root", "", "leo", &script, 11, ts(1, 2))],
    ))
    .await
    .unwrap();

    let meta = store.post_metadata("@alice/root").await.unwrap().unwrap();
    assert_eq!(meta.body.as_deref(), Some("Hello World"));
    let post = store.token_post("LEO", "@alice/root").await.unwrap().unwrap();
    assert_eq!(post.description.as_deref(), Some("Hello World"));
    // Edits never disturb creation time or counters.
    assert_eq!(post.created, Some(ts(1, 1)));
    assert_eq!(post.children, Some(0));
}

// ─── Follows and reblogs ─────────────────────────────────────────────────────

#[tokio::test]
async fn follow_and_reblog_flow() {
    let store = GraphStore::in_memory().await.unwrap();
    advance_sidechain_watermark(&store).await;
    let source = EmptySource;
    let proc = processor(&store, &source);

    proc.process_block(&block(
        10,
        ts(1, 1),
        vec![
            comment_env("bob", "post", "", "leo", "Post", 10, ts(1, 1)),
            comment_env("bob", "re-post", "bob", "post", "Reply", 10, ts(1, 1)),
        ],
    ))
    .await
    .unwrap();

    proc.process_block(&block(
        11,
        ts(1, 2),
        vec![
            custom_json_env(
                "follow",
                "alice",
                r#"["follow",{"follower":"alice","following":"bob","what":["blog"]}]"#,
                11,
                ts(1, 2),
            ),
            custom_json_env(
                "follow",
                "carol",
                r#"["reblog",{"account":"carol","author":"bob","permlink":"post"}]"#,
                11,
                ts(1, 2),
            ),
            // Reblogging a reply is rejected.
            custom_json_env(
                "reblog",
                "carol",
                r#"["reblog",{"account":"carol","author":"bob","permlink":"re-post"}]"#,
                11,
                ts(1, 2),
            ),
        ],
    ))
    .await
    .unwrap();

    let follows = store.following(Some("alice"), None, Some(1), None, 10).await.unwrap();
    assert_eq!(follows.len(), 1);
    assert_eq!(follows[0].following, "bob");

    assert!(store.reblog("carol", "@bob/post").await.unwrap().is_some());
    assert!(store.reblog("carol", "@bob/re-post").await.unwrap().is_none());

    // Un-reblog removes the row.
    proc.process_block(&block(
        12,
        ts(1, 3),
        vec![custom_json_env(
            "follow",
            "carol",
            r#"["reblog",{"account":"carol","author":"bob","permlink":"post","delete":"delete"}]"#,
            12,
            ts(1, 3),
        )],
    ))
    .await
    .unwrap();
    assert!(store.reblog("carol", "@bob/post").await.unwrap().is_none());
}

// ─── Deletion ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn delete_removes_all_tokens_and_rolls_back_counters() {
    let store = GraphStore::in_memory().await.unwrap();
    advance_sidechain_watermark(&store).await;
    let source = EmptySource;
    let proc = processor(&store, &source);

    proc.process_block(&block(
        10,
        ts(1, 1),
        vec![
            comment_env("alice", "root", "", "leo", "Root", 10, ts(1, 1)),
            comment_env("bob", "re-1", "alice", "root", "Reply", 10, ts(1, 1)),
        ],
    ))
    .await
    .unwrap();
    assert_eq!(store.post_rows("@bob/re-1").await.unwrap().len(), 2);

    proc.process_block(&block(11, ts(1, 2), vec![delete_env("bob", "re-1", 11)]))
        .await
        .unwrap();

    assert!(store.post_rows("@bob/re-1").await.unwrap().is_empty());
    let root = store.token_post("LEO", "@alice/root").await.unwrap().unwrap();
    assert_eq!(root.children, Some(0));
    let feed = store
        .discussions_by_comments("LEO", "bob", None, 10)
        .await
        .unwrap();
    assert!(feed.is_empty());
}

// ─── Sidechain: votes and promotion ──────────────────────────────────────────

fn sidechain_block(height: u64, timestamp: DateTime<Utc>, txs: Vec<SidechainTransaction>) -> SidechainBlock {
    SidechainBlock {
        height,
        timestamp,
        transactions: txs,
    }
}

fn tx(contract: &str, action: &str, payload: &str) -> SidechainTransaction {
    SidechainTransaction {
        contract: contract.into(),
        action: action.into(),
        payload: payload.into(),
    }
}

#[tokio::test]
async fn vote_updates_tally_and_scores_idempotently() {
    let store = GraphStore::in_memory().await.unwrap();
    advance_sidechain_watermark(&store).await;
    let source = EmptySource;
    let proc = processor(&store, &source);
    proc.process_block(&block(
        10,
        ts(1, 1),
        vec![comment_env("alice", "root", "", "leo", "Root", 10, ts(1, 1))],
    ))
    .await
    .unwrap();

    let sidechain = EmptySidechain;
    let side = SidechainProcessor::new(&store, &sidechain, registry(), IndexerConfig::default());

    let vote_block = sidechain_block(
        100,
        ts(1, 2),
        vec![tx(
            "comments",
            "vote",
            r#"{"rewardPoolId":7,"authorperm":"@alice/root","voter":"bob","rshares":"1000","weight":10000}"#,
        )],
    );
    side.process_block(&vote_block).await.unwrap();

    let post = store.token_post("LEO", "@alice/root").await.unwrap().unwrap();
    assert_eq!(post.vote_rshares, 1000);
    assert!(post.score_trend > 0.0);

    // Redelivery of the same vote is absorbed by the delta logic.
    side.process_block(&vote_block).await.unwrap();
    let post = store.token_post("LEO", "@alice/root").await.unwrap().unwrap();
    assert_eq!(post.vote_rshares, 1000, "no double-counted rshares");

    let votes = store.token_votes("@alice/root", "LEO").await.unwrap();
    assert_eq!(votes.len(), 1, "no duplicate vote rows");

    // A re-vote replaces in place and moves the tally by the delta.
    side.process_block(&sidechain_block(
        101,
        ts(1, 3),
        vec![tx(
            "comments",
            "vote",
            r#"{"rewardPoolId":7,"authorperm":"@alice/root","voter":"bob","rshares":"400","weight":4000}"#,
        )],
    ))
    .await
    .unwrap();
    let post = store.token_post("LEO", "@alice/root").await.unwrap().unwrap();
    assert_eq!(post.vote_rshares, 400);

    let cp = store.load(StreamSource::Sidechain).await.unwrap().unwrap();
    assert_eq!(cp.last_height, 101);
    assert_eq!(cp.last_timestamp, Some(ts(1, 3)));
}

#[tokio::test]
async fn sidechain_comment_creates_row_from_metadata() {
    let store = GraphStore::in_memory().await.unwrap();
    advance_sidechain_watermark(&store).await;
    let source = EmptySource;
    let proc = processor(&store, &source);
    // A post whose tags match no token still records metadata.
    proc.process_block(&block(
        10,
        ts(1, 1),
        vec![OperationEnvelope {
            op_type: "comment".into(),
            block_num: 10,
            timestamp: ts(1, 1),
            author: Some("alice".into()),
            permlink: Some("untagged".into()),
            parent_author: Some("".into()),
            parent_permlink: Some("misc".into()),
            title: Some("Untagged".into()),
            body: Some("Body text".into()),
            json_metadata: Some(r#"{"tags":["misc"]}"#.into()),
            ..Default::default()
        }],
    ))
    .await
    .unwrap();
    assert!(store.post_rows("@alice/untagged").await.unwrap().is_empty());

    // The comments contract assigns it to LEO's reward pool.
    let sidechain = EmptySidechain;
    let side = SidechainProcessor::new(&store, &sidechain, registry(), IndexerConfig::default());
    side.process_block(&sidechain_block(
        100,
        ts(1, 2),
        vec![tx(
            "comments",
            "comment",
            r#"{"rewardPoolId":7,"authorperm":"@alice/untagged"}"#,
        )],
    ))
    .await
    .unwrap();

    let post = store.token_post("LEO", "@alice/untagged").await.unwrap().unwrap();
    assert_eq!(post.title.as_deref(), Some("Untagged"));
    assert_eq!(post.description.as_deref(), Some("Body text"));
    assert!(post.is_main_post());
}

#[tokio::test]
async fn promotion_credits_configured_account_only() {
    let store = GraphStore::in_memory().await.unwrap();
    advance_sidechain_watermark(&store).await;
    let source = EmptySource;
    let proc = processor(&store, &source);
    proc.process_block(&block(
        10,
        ts(1, 1),
        vec![comment_env("alice", "root", "", "leo", "Root", 10, ts(1, 1))],
    ))
    .await
    .unwrap();

    let sidechain = EmptySidechain;
    let side = SidechainProcessor::new(&store, &sidechain, registry(), IndexerConfig::default());
    side.process_block(&sidechain_block(
        100,
        ts(1, 2),
        vec![
            tx(
                "tokens",
                "transfer",
                r#"{"symbol":"LEO","to":"leo-promo","memo":"@alice/root","quantity":"2.5"}"#,
            ),
            // Wrong destination account: ignored.
            tx(
                "tokens",
                "transfer",
                r#"{"symbol":"LEO","to":"someone","memo":"@alice/root","quantity":"9.9"}"#,
            ),
            // Unconfigured token symbol: ignored.
            tx(
                "tokens",
                "transfer",
                r#"{"symbol":"NOPE","to":"leo-promo","memo":"@alice/root","quantity":"9.9"}"#,
            ),
        ],
    ))
    .await
    .unwrap();

    let post = store.token_post("LEO", "@alice/root").await.unwrap().unwrap();
    assert!((post.promoted - 2.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn tribe_settings_only_for_issuer() {
    let store = GraphStore::in_memory().await.unwrap();
    advance_sidechain_watermark(&store).await;
    let source = EmptySource;
    let tokens = registry();
    let proc = StreamProcessor::new(&store, &source, None, tokens.clone(), IndexerConfig::default());

    // Non-issuer attempt is ignored.
    proc.process_block(&block(
        10,
        ts(1, 1),
        vec![custom_json_env(
            "scot_set_tribe_settings",
            "mallory",
            r#"{"reward_pool_id":7,"promoted_post_account":"mallory-promo"}"#,
            10,
            ts(1, 1),
        )],
    ))
    .await
    .unwrap();
    assert_eq!(
        tokens.get("LEO").unwrap().promoted_post_account.as_deref(),
        Some("leo-promo")
    );

    proc.process_block(&block(
        11,
        ts(1, 2),
        vec![custom_json_env(
            "scot_set_tribe_settings",
            "leo-issuer",
            r#"{"reward_pool_id":7,"promoted_post_account":"new-promo"}"#,
            11,
            ts(1, 2),
        )],
    ))
    .await
    .unwrap();
    assert_eq!(
        tokens.get("LEO").unwrap().promoted_post_account.as_deref(),
        Some("new-promo")
    );
    let row = store.token_config("LEO").await.unwrap().unwrap();
    assert_eq!(row.promoted_post_account.as_deref(), Some("new-promo"));
}
