//! Thread repair — fetch a discussion tree from the node and materialize
//! its metadata.
//!
//! Runs when a thread query finds nothing (or rows missing their canonical
//! url). Walks the reply graph with an explicit work queue; reply trees can
//! be deep enough that recursion is not an option.

use std::collections::VecDeque;

use tracing::{debug, warn};

use tribeindex_core::error::IndexError;
use tribeindex_core::node::NodeClient;
use tribeindex_core::types::construct_authorperm;
use tribeindex_storage::{GraphStore, PostMetadataUpsert};

/// Fetch the thread rooted at `author/permlink` and save metadata for every
/// node that is indexed under `token`. Returns the number of repaired rows.
pub async fn fetch_and_save_thread(
    store: &GraphStore,
    node: &dyn NodeClient,
    token: &str,
    author: &str,
    permlink: &str,
) -> Result<usize, IndexError> {
    let root_authorperm = construct_authorperm(author, permlink);
    let Some(root) = node.get_content(author, permlink).await? else {
        debug!(%root_authorperm, "thread root not found on node");
        return Ok(0);
    };
    let root_url = format!(
        "/{}/{}",
        root.category.as_deref().unwrap_or_default(),
        root_authorperm
    );

    let mut repaired = 0usize;
    let mut queue: VecDeque<(String, String)> = VecDeque::new();
    queue.push_back((author.to_string(), permlink.to_string()));

    while let Some((author, permlink)) = queue.pop_front() {
        let authorperm = construct_authorperm(&author, &permlink);
        // Orphaned content that never reached this token's reward pool is
        // skipped along with its subtree.
        if store.token_post(token, &authorperm).await?.is_none() {
            debug!(%authorperm, token, "skipping subtree not indexed under token");
            continue;
        }
        let content = match node.get_content(&author, &permlink).await {
            Ok(Some(content)) => content,
            Ok(None) => continue,
            Err(err) => {
                warn!(%authorperm, %err, "content fetch failed during repair");
                continue;
            }
        };
        let replies = node.get_content_replies(&author, &permlink).await?;

        let tags = content
            .json_metadata
            .as_deref()
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
            .and_then(|meta| {
                meta.get("tags").and_then(|t| t.as_array()).map(|list| {
                    list.iter()
                        .filter_map(|v| v.as_str())
                        .collect::<Vec<_>>()
                        .join(",")
                })
            });

        store
            .upsert_post_metadata(&PostMetadataUpsert {
                authorperm: authorperm.clone(),
                body: Some(content.body.clone()),
                json_metadata: content.json_metadata.clone(),
                parent_authorperm: content.parent_authorperm(),
                tags,
                depth: content.depth.map(i64::from),
                url: Some(root_url.clone()),
                children: Some(replies.len() as i64),
                ..Default::default()
            })
            .await?;
        repaired += 1;

        for reply in replies {
            queue.push_back((reply.author, reply.permlink));
        }
    }
    Ok(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tribeindex_core::node::NodeContent;
    use tribeindex_storage::PostUpsert;

    struct FakeNode {
        content: HashMap<String, NodeContent>,
        replies: HashMap<String, Vec<NodeContent>>,
    }

    fn content(author: &str, permlink: &str, body: &str, depth: u32) -> NodeContent {
        NodeContent {
            author: author.into(),
            permlink: permlink.into(),
            body: body.into(),
            json_metadata: Some(r#"{"tags":["leo"]}"#.into()),
            parent_author: None,
            parent_permlink: None,
            depth: Some(depth),
            category: Some("leo".into()),
            created: None,
        }
    }

    #[async_trait]
    impl NodeClient for FakeNode {
        async fn get_content(
            &self,
            author: &str,
            permlink: &str,
        ) -> Result<Option<NodeContent>, IndexError> {
            Ok(self.content.get(&format!("@{author}/{permlink}")).cloned())
        }

        async fn get_content_replies(
            &self,
            author: &str,
            permlink: &str,
        ) -> Result<Vec<NodeContent>, IndexError> {
            Ok(self
                .replies
                .get(&format!("@{author}/{permlink}"))
                .cloned()
                .unwrap_or_default())
        }

        async fn get_following(&self, _account: &str) -> Result<Vec<String>, IndexError> {
            Ok(vec![])
        }
    }

    async fn seed_token_post(store: &GraphStore, authorperm: &str, author: &str) {
        let mut writer = store.begin_block().await.unwrap();
        writer
            .upsert_post(&PostUpsert {
                authorperm: authorperm.into(),
                token: "LEO".into(),
                author: author.into(),
                main_post: Some(authorperm.contains("/root")),
                ..Default::default()
            })
            .await
            .unwrap();
        writer.commit().await.unwrap();
    }

    #[tokio::test]
    async fn repairs_deep_thread_iteratively() {
        let store = GraphStore::in_memory().await.unwrap();

        // A linear chain of 200 replies; recursion would be risky here.
        let mut node = FakeNode {
            content: HashMap::new(),
            replies: HashMap::new(),
        };
        node.content
            .insert("@alice/root".into(), content("alice", "root", "Root", 0));
        seed_token_post(&store, "@alice/root", "alice").await;
        let mut prev = ("alice".to_string(), "root".to_string());
        for i in 1..=200u32 {
            let permlink = format!("re-{i}");
            let c = content("bob", &permlink, "reply", i);
            node.replies
                .insert(format!("@{}/{}", prev.0, prev.1), vec![c.clone()]);
            node.content.insert(format!("@bob/{permlink}"), c);
            seed_token_post(&store, &format!("@bob/{permlink}"), "bob").await;
            prev = ("bob".to_string(), permlink);
        }

        let repaired = fetch_and_save_thread(&store, &node, "LEO", "alice", "root")
            .await
            .unwrap();
        assert_eq!(repaired, 201);

        let leaf = store.post_metadata("@bob/re-200").await.unwrap().unwrap();
        assert_eq!(leaf.depth, Some(200));
        assert_eq!(leaf.url.as_deref(), Some("/leo/@alice/root"));
    }

    #[tokio::test]
    async fn skips_subtrees_outside_the_token() {
        let store = GraphStore::in_memory().await.unwrap();
        let mut node = FakeNode {
            content: HashMap::new(),
            replies: HashMap::new(),
        };
        node.content
            .insert("@alice/root".into(), content("alice", "root", "Root", 0));
        node.replies.insert(
            "@alice/root".into(),
            vec![content("eve", "orphan", "not in pool", 1)],
        );
        node.content
            .insert("@eve/orphan".into(), content("eve", "orphan", "not in pool", 1));
        seed_token_post(&store, "@alice/root", "alice").await;
        // @eve/orphan has no LEO row

        let repaired = fetch_and_save_thread(&store, &node, "LEO", "alice", "root")
            .await
            .unwrap();
        assert_eq!(repaired, 1);
        assert!(store.post_metadata("@eve/orphan").await.unwrap().is_none());
    }
}
