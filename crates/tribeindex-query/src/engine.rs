//! The feed/discussion query engine — the only sanctioned read path into
//! the content graph.
//!
//! Every query returns an ordered page of posts with votes attached.
//! Unknown-but-plausible inputs (token nobody indexed, account nobody has
//! seen) produce empty results; malformed cursor pairs produce a validation
//! error.

use chrono::{DateTime, Utc};
use serde::Serialize;

use tribeindex_core::checkpoint::{CheckpointStore, StreamSource};
use tribeindex_core::config::IndexerConfig;
use tribeindex_core::error::IndexError;
use tribeindex_core::node::NodeClient;
use tribeindex_core::types::{construct_authorperm, resolve_authorperm};
use tribeindex_storage::{AccountRow, FeedPost, GraphStore, ScoreOrder, TagCount, VoteRow};

use crate::cursor::PageCursor;
use crate::follows::ensure_follows_fresh;
use crate::thread::fetch_and_save_thread;

/// Which votes to attach to each returned post.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VoteSelector {
    /// All votes for the post's token, ordered by timestamp.
    #[default]
    All,
    /// Exactly one voter's vote, when present.
    Voter(String),
    /// No votes.
    None,
}

/// A vote as attached to query results.
#[derive(Debug, Clone, Serialize)]
pub struct VoteView {
    pub voter: String,
    pub percent: Option<i64>,
    pub rshares: i64,
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<VoteRow> for VoteView {
    fn from(row: VoteRow) -> Self {
        Self {
            voter: row.voter,
            percent: row.percent,
            rshares: row.rshares,
            timestamp: row.timestamp,
        }
    }
}

/// A post as returned to query consumers.
#[derive(Debug, Clone, Serialize)]
pub struct PostView {
    pub author: String,
    pub permlink: String,
    pub authorperm: String,
    pub token: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub parent_author: Option<String>,
    pub parent_permlink: Option<String>,
    pub main_post: bool,
    pub children: i64,
    pub created: Option<DateTime<Utc>>,
    pub cashout_time: Option<DateTime<Utc>>,
    pub last_payout: Option<DateTime<Utc>>,
    pub vote_rshares: i64,
    pub score_trend: f64,
    pub score_hot: f64,
    pub promoted: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reblogged_by: Option<Vec<String>>,
    pub active_votes: Vec<VoteView>,
}

/// Per-source ingestion status, for health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct StateInfo {
    pub last_streamed_block: u64,
    pub last_streamed_timestamp: Option<DateTime<Utc>>,
    pub time_delay_seconds: Option<i64>,
    pub sidechain_last_block: u64,
    pub sidechain_last_timestamp: Option<DateTime<Utc>>,
    pub sidechain_time_delay_seconds: Option<i64>,
}

/// Follower/following counts for one account.
#[derive(Debug, Clone, Serialize)]
pub struct FollowCounts {
    pub account: String,
    pub follower_count: i64,
    pub following_count: i64,
}

/// Read-only facade over the content graph store.
pub struct QueryEngine<'a> {
    store: &'a GraphStore,
    node: Option<&'a dyn NodeClient>,
    config: IndexerConfig,
}

impl<'a> QueryEngine<'a> {
    pub fn new(
        store: &'a GraphStore,
        node: Option<&'a dyn NodeClient>,
        config: IndexerConfig,
    ) -> Self {
        Self { store, node, config }
    }

    // ─── Vote attachment ────────────────────────────────────────────────────

    async fn attach_votes(
        &self,
        post: &FeedPost,
        selector: &VoteSelector,
    ) -> Result<Vec<VoteView>, IndexError> {
        let rows = match selector {
            VoteSelector::None => vec![],
            VoteSelector::All => {
                self.store
                    .token_votes(&post.post.authorperm, &post.post.token)
                    .await?
            }
            VoteSelector::Voter(voter) => self
                .store
                .vote(&post.post.authorperm, voter, &post.post.token)
                .await?
                .into_iter()
                .collect(),
        };
        // Post-cashout votes are not economically meaningful to display.
        let cashout = post.post.cashout_time;
        Ok(rows
            .into_iter()
            .filter(|vote| match (vote.timestamp, cashout) {
                (Some(ts), Some(cashout)) => ts <= cashout,
                _ => true,
            })
            .map(VoteView::from)
            .collect())
    }

    async fn render(
        &self,
        posts: Vec<FeedPost>,
        selector: &VoteSelector,
    ) -> Result<Vec<PostView>, IndexError> {
        let mut views = Vec::with_capacity(posts.len());
        for fp in posts {
            let votes = self.attach_votes(&fp, selector).await?;
            let (author, permlink) = resolve_authorperm(&fp.post.authorperm)
                .map(|(a, p)| (a.to_string(), p.to_string()))
                .unwrap_or_else(|| (fp.post.author.clone(), String::new()));
            views.push(PostView {
                authorperm: construct_authorperm(&author, &permlink),
                author,
                permlink,
                token: fp.post.token,
                title: fp.post.title,
                description: fp.post.description,
                tags: fp.post.tags,
                parent_author: fp.post.parent_author,
                parent_permlink: fp.post.parent_permlink,
                main_post: fp.post.main_post.unwrap_or(false),
                children: fp.post.children.unwrap_or(0),
                created: fp.post.created,
                cashout_time: fp.post.cashout_time,
                last_payout: fp.post.last_payout,
                vote_rshares: fp.post.vote_rshares,
                score_trend: fp.post.score_trend,
                score_hot: fp.post.score_hot,
                promoted: fp.post.promoted,
                reblogged_by: fp.reblogged_by.map(|account| vec![account]),
                active_votes: votes,
            });
        }
        Ok(views)
    }

    // ─── Cursor boundaries ──────────────────────────────────────────────────

    /// Resolve a creation-time boundary from the cursor post. An unknown
    /// cursor post starts the page from the top.
    async fn created_boundary(
        &self,
        token: &str,
        cursor: Option<&PageCursor>,
    ) -> Result<Option<(DateTime<Utc>, String)>, IndexError> {
        let Some(cursor) = cursor else {
            return Ok(None);
        };
        let authorperm = cursor.authorperm();
        let post = self.store.token_post(token, &authorperm).await?;
        Ok(post.and_then(|p| p.created).map(|ts| (ts, authorperm)))
    }

    // ─── Discussion scopes ──────────────────────────────────────────────────

    pub async fn discussions_by_created(
        &self,
        token: &str,
        tag: Option<&str>,
        cursor: Option<&PageCursor>,
        limit: i64,
        votes: VoteSelector,
    ) -> Result<Vec<PostView>, IndexError> {
        let boundary = self.created_boundary(token, cursor).await?;
        let boundary = boundary.as_ref().map(|(ts, ap)| (*ts, ap.as_str()));
        let posts = self
            .store
            .discussions_by_created(token, tag, boundary, limit)
            .await?;
        self.render(posts, &votes).await
    }

    pub async fn discussions_by_score(
        &self,
        order: ScoreOrder,
        token: &str,
        tag: Option<&str>,
        cursor: Option<&PageCursor>,
        limit: i64,
        main_post: bool,
        votes: VoteSelector,
    ) -> Result<Vec<PostView>, IndexError> {
        let boundary = match cursor {
            Some(cursor) => {
                let authorperm = cursor.authorperm();
                self.store
                    .token_post(token, &authorperm)
                    .await?
                    .map(|post| {
                        let score = match order {
                            ScoreOrder::Trending => post.score_trend,
                            ScoreOrder::Hot => post.score_hot,
                            ScoreOrder::Payout => post.vote_rshares as f64,
                            ScoreOrder::Promoted => post.promoted,
                        };
                        (score, authorperm)
                    })
            }
            None => None,
        };
        let boundary = boundary.as_ref().map(|(score, ap)| (*score, ap.as_str()));
        let posts = self
            .store
            .discussions_by_score(order, token, tag, boundary, main_post, limit)
            .await?;
        self.render(posts, &votes).await
    }

    pub async fn discussions_by_trending(
        &self,
        token: &str,
        tag: Option<&str>,
        cursor: Option<&PageCursor>,
        limit: i64,
        votes: VoteSelector,
    ) -> Result<Vec<PostView>, IndexError> {
        self.discussions_by_score(ScoreOrder::Trending, token, tag, cursor, limit, true, votes)
            .await
    }

    pub async fn discussions_by_hot(
        &self,
        token: &str,
        tag: Option<&str>,
        cursor: Option<&PageCursor>,
        limit: i64,
        votes: VoteSelector,
    ) -> Result<Vec<PostView>, IndexError> {
        self.discussions_by_score(ScoreOrder::Hot, token, tag, cursor, limit, true, votes)
            .await
    }

    pub async fn discussions_by_payout(
        &self,
        token: &str,
        tag: Option<&str>,
        cursor: Option<&PageCursor>,
        limit: i64,
        votes: VoteSelector,
    ) -> Result<Vec<PostView>, IndexError> {
        self.discussions_by_score(ScoreOrder::Payout, token, tag, cursor, limit, true, votes)
            .await
    }

    pub async fn discussions_by_promoted(
        &self,
        token: &str,
        tag: Option<&str>,
        cursor: Option<&PageCursor>,
        limit: i64,
        votes: VoteSelector,
    ) -> Result<Vec<PostView>, IndexError> {
        self.discussions_by_score(ScoreOrder::Promoted, token, tag, cursor, limit, true, votes)
            .await
    }

    /// Comment-level payout ranking.
    pub async fn comment_discussions_by_payout(
        &self,
        token: &str,
        tag: Option<&str>,
        cursor: Option<&PageCursor>,
        limit: i64,
        votes: VoteSelector,
    ) -> Result<Vec<PostView>, IndexError> {
        self.discussions_by_score(ScoreOrder::Payout, token, tag, cursor, limit, false, votes)
            .await
    }

    /// An account's blog, optionally including posts they reblogged.
    pub async fn discussions_by_blog(
        &self,
        token: &str,
        account: &str,
        include_reblogs: bool,
        cursor: Option<&PageCursor>,
        limit: i64,
        votes: VoteSelector,
    ) -> Result<Vec<PostView>, IndexError> {
        let boundary = match cursor {
            Some(cursor) => {
                let authorperm = cursor.authorperm();
                if cursor.author == account {
                    self.store
                        .token_post(token, &authorperm)
                        .await?
                        .and_then(|p| p.created)
                        .map(|ts| (ts, authorperm))
                } else {
                    // The cursor post entered the blog via a reblog; its
                    // boundary is the reblog time.
                    self.store
                        .earliest_reblog_ts(account, &authorperm)
                        .await?
                        .map(|ts| (ts, authorperm))
                }
            }
            None => None,
        };
        let boundary = boundary.as_ref().map(|(ts, ap)| (*ts, ap.as_str()));
        let posts = self
            .store
            .discussions_by_blog(token, account, include_reblogs, boundary, limit)
            .await?;
        self.render(posts, &votes).await
    }

    /// An account's feed: posts authored or reblogged by their followees,
    /// ordered by the latest qualifying timestamp.
    pub async fn feed(
        &self,
        token: &str,
        account: &str,
        include_reblogs: bool,
        cursor: Option<&PageCursor>,
        limit: i64,
        votes: VoteSelector,
    ) -> Result<Vec<PostView>, IndexError> {
        ensure_follows_fresh(
            self.store,
            self.node,
            account,
            self.config.follow_refresh_window_secs,
        )
        .await?;

        let boundary = match cursor {
            Some(cursor) => {
                let authorperm = cursor.authorperm();
                match self.store.token_post(token, &authorperm).await? {
                    Some(post) => {
                        let mut ts = post.created;
                        if include_reblogs {
                            let reblog_ts = self
                                .store
                                .earliest_followee_reblog_ts(account, &authorperm)
                                .await?;
                            if let Some(reblog_ts) = reblog_ts {
                                if ts.map(|t| reblog_ts > t).unwrap_or(true) {
                                    ts = Some(reblog_ts);
                                }
                            }
                        }
                        ts.map(|ts| (ts, authorperm))
                    }
                    None => None,
                }
            }
            None => None,
        };
        let boundary = boundary.as_ref().map(|(ts, ap)| (*ts, ap.as_str()));
        let posts = self
            .store
            .feed_discussions(token, account, include_reblogs, boundary, limit)
            .await?;
        self.render(posts, &votes).await
    }

    pub async fn discussions_by_comments(
        &self,
        token: &str,
        account: &str,
        cursor: Option<&PageCursor>,
        limit: i64,
        votes: VoteSelector,
    ) -> Result<Vec<PostView>, IndexError> {
        let boundary = self.created_boundary(token, cursor).await?;
        let boundary = boundary.as_ref().map(|(ts, ap)| (*ts, ap.as_str()));
        let posts = self
            .store
            .discussions_by_comments(token, account, boundary, limit)
            .await?;
        self.render(posts, &votes).await
    }

    pub async fn discussions_by_replies(
        &self,
        token: &str,
        account: &str,
        cursor: Option<&PageCursor>,
        limit: i64,
        votes: VoteSelector,
    ) -> Result<Vec<PostView>, IndexError> {
        let boundary = self.created_boundary(token, cursor).await?;
        let boundary = boundary.as_ref().map(|(ts, ap)| (*ts, ap.as_str()));
        let posts = self
            .store
            .discussions_by_replies(token, account, boundary, limit)
            .await?;
        self.render(posts, &votes).await
    }

    /// A whole discussion thread. Missing or unrepaired threads are fetched
    /// from the node (iteratively) and re-served from the store.
    pub async fn thread(
        &self,
        token: &str,
        author: &str,
        permlink: &str,
        refresh: bool,
        votes: VoteSelector,
    ) -> Result<Vec<PostView>, IndexError> {
        let root_authorperm = construct_authorperm(author, permlink);
        let root_url = self
            .store
            .post_metadata(&root_authorperm)
            .await?
            .and_then(|m| m.url);

        let mut posts = self
            .store
            .thread_discussions(token, &root_authorperm, root_url.as_deref())
            .await?;

        let needs_repair = refresh || posts.is_empty() || root_url.is_none();
        if needs_repair {
            if let Some(node) = self.node {
                fetch_and_save_thread(self.store, node, token, author, permlink).await?;
                let url = self
                    .store
                    .post_metadata(&root_authorperm)
                    .await?
                    .and_then(|m| m.url);
                posts = self
                    .store
                    .thread_discussions(token, &root_authorperm, url.as_deref())
                    .await?;
            }
        }
        self.render(posts, &votes).await
    }

    // ─── Single entities ────────────────────────────────────────────────────

    /// One post across every token it is indexed under (optionally filtered
    /// to a single token), with all votes attached.
    pub async fn post(
        &self,
        author: &str,
        permlink: &str,
        token: Option<&str>,
    ) -> Result<Vec<PostView>, IndexError> {
        let authorperm = construct_authorperm(author, permlink);
        let rows = self.store.post_rows(&authorperm).await?;
        let posts: Vec<FeedPost> = rows
            .into_iter()
            .filter(|p| token.map(|t| p.token == t).unwrap_or(true))
            .map(|post| FeedPost {
                feed_timestamp: post.created,
                post,
                reblogged_by: None,
            })
            .collect();
        self.render(posts, &VoteSelector::All).await
    }

    /// Per-token account stats.
    pub async fn account(
        &self,
        name: &str,
        token: Option<&str>,
    ) -> Result<Vec<AccountRow>, IndexError> {
        let rows = self.store.accounts(name).await?;
        Ok(rows
            .into_iter()
            .filter(|row| token.map(|t| row.token == t).unwrap_or(true))
            .collect())
    }

    /// Follow relations, filterable by either side and by state
    /// (`"blog"` or `"ignore"`).
    pub async fn following(
        &self,
        follower: Option<&str>,
        following: Option<&str>,
        status: Option<&str>,
        start: Option<&str>,
        limit: i64,
    ) -> Result<Vec<tribeindex_storage::FollowRow>, IndexError> {
        let state = match status {
            Some("blog") => Some(1),
            Some("ignore") => Some(2),
            _ => None,
        };
        self.store
            .following(follower, following, state, start, limit)
            .await
    }

    pub async fn follow_counts(&self, account: &str) -> Result<FollowCounts, IndexError> {
        ensure_follows_fresh(
            self.store,
            self.node,
            account,
            self.config.follow_refresh_window_secs,
        )
        .await?;
        let (follower_count, following_count) = self.store.follow_counts(account).await?;
        Ok(FollowCounts {
            account: account.to_string(),
            follower_count,
            following_count,
        })
    }

    pub async fn trending_tags(&self, token: &str, limit: usize) -> Result<Vec<TagCount>, IndexError> {
        self.store.trending_tags(token, limit).await
    }

    /// Ingestion status of both pipelines.
    pub async fn state(&self) -> Result<StateInfo, IndexError> {
        let now = Utc::now();
        let primary = self.store.load(StreamSource::Primary).await?;
        let sidechain = self.store.load(StreamSource::Sidechain).await?;
        let delay = |ts: Option<DateTime<Utc>>| ts.map(|t| (now - t).num_seconds());
        Ok(StateInfo {
            last_streamed_block: primary.as_ref().map(|c| c.last_height).unwrap_or(0),
            last_streamed_timestamp: primary.as_ref().and_then(|c| c.last_timestamp),
            time_delay_seconds: delay(primary.and_then(|c| c.last_timestamp)),
            sidechain_last_block: sidechain.as_ref().map(|c| c.last_height).unwrap_or(0),
            sidechain_last_timestamp: sidechain.as_ref().and_then(|c| c.last_timestamp),
            sidechain_time_delay_seconds: delay(sidechain.and_then(|c| c.last_timestamp)),
        })
    }
}
