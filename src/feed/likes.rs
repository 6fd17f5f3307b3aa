use crate::backend::{paths, server_timestamp, DocumentStore};
use crate::post::Post;
use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LikeSnapshot {
    pub liked: bool,
    pub count: u64,
}

/// Like state of one post as seen by the viewer.
///
/// A toggle shows immediately as a local override. Server pushes are still
/// recorded while it is pending but do not show until the toggle settles,
/// so a stale push cannot flip the button back mid-request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikeState {
    server: LikeSnapshot,
    pending: Option<LikeSnapshot>,
}

impl LikeState {
    pub fn new(server: LikeSnapshot) -> Self {
        Self {
            server,
            pending: None,
        }
    }

    pub fn current(&self) -> LikeSnapshot {
        self.pending.unwrap_or(self.server)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Flips the visible state and returns it.
    pub fn toggle(&mut self) -> LikeSnapshot {
        let current = self.current();
        let next = if current.liked {
            LikeSnapshot {
                liked: false,
                count: current.count.saturating_sub(1),
            }
        } else {
            LikeSnapshot {
                liked: true,
                count: current.count + 1,
            }
        };
        self.pending = Some(next);
        next
    }

    /// Records a value pushed by the server. Returns whether it is visible.
    pub fn observe_server(&mut self, server: LikeSnapshot) -> bool {
        self.server = server;
        !self.is_pending()
    }

    /// Ends the pending toggle: `Some` adopts the confirmed value, `None`
    /// (the write failed) falls back to the last server value.
    pub fn settle(&mut self, confirmed: Option<LikeSnapshot>) {
        if let Some(confirmed) = confirmed {
            self.server = confirmed;
        }
        self.pending = None;
    }
}

/// Stores or removes the viewer's like and refreshes the post's count.
/// Fails without writing anything when the post no longer exists.
pub async fn toggle_like(
    store: &dyn DocumentStore,
    post: &Post,
    viewer_id: &str,
    like: bool,
) -> Result<LikeSnapshot> {
    let post_path = paths::post(&post.user_id, &post.id);
    if store.read(&post_path).await?.is_none() {
        bail!("Post {} no longer exists", post.id);
    }

    let like_path = paths::like(&post.user_id, &post.id, viewer_id);
    if like {
        store
            .write(&like_path, json!({ "createdAt": server_timestamp() }))
            .await
            .with_context(|| format!("Failed to like post {}", post.id))?;
    } else {
        store
            .remove(&like_path)
            .await
            .with_context(|| format!("Failed to unlike post {}", post.id))?;
    }

    let count = store
        .read(&paths::likes(&post.user_id, &post.id))
        .await?
        .and_then(|likes| likes.as_object().map(|likes| likes.len() as u64))
        .unwrap_or(0);
    store
        .update(&post_path, json!({ "likeCount": count }))
        .await?;

    debug!("Post {} now has {} likes", post.id, count);
    Ok(LikeSnapshot { liked: like, count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;

    #[test]
    fn test_toggle_is_optimistic() {
        let mut state = LikeState::new(LikeSnapshot {
            liked: false,
            count: 3,
        });

        let next = state.toggle();
        assert_eq!(next, LikeSnapshot { liked: true, count: 4 });
        assert_eq!(state.current(), next);

        let back = state.toggle();
        assert_eq!(back, LikeSnapshot { liked: false, count: 3 });
    }

    #[test]
    fn test_count_never_goes_negative() {
        let mut state = LikeState::new(LikeSnapshot {
            liked: true,
            count: 0,
        });
        assert_eq!(state.toggle().count, 0);
    }

    #[test]
    fn test_server_push_hidden_while_pending() {
        let mut state = LikeState::new(LikeSnapshot::default());
        state.toggle();

        let stale = LikeSnapshot {
            liked: false,
            count: 7,
        };
        assert!(!state.observe_server(stale));
        assert_eq!(state.current(), LikeSnapshot { liked: true, count: 1 });

        // failed write reverts to whatever the server said last
        state.settle(None);
        assert_eq!(state.current(), stale);
        assert!(state.observe_server(LikeSnapshot { liked: false, count: 8 }));
    }

    #[test]
    fn test_settle_adopts_confirmed_value() {
        let mut state = LikeState::new(LikeSnapshot::default());
        state.toggle();
        state.settle(Some(LikeSnapshot { liked: true, count: 5 }));

        assert!(!state.is_pending());
        assert_eq!(state.current(), LikeSnapshot { liked: true, count: 5 });
    }

    #[tokio::test]
    async fn test_toggle_like_counts_likes() {
        let store = MemoryStore::new();
        store
            .write(&paths::post("a", "p1"), json!({"likeCount": 0, "createdAt": 1}))
            .await
            .unwrap();
        let post = Post::from_record("a", "p1", json!({"createdAt": 1})).unwrap();

        toggle_like(&store, &post, "v1", true).await.unwrap();
        let snapshot = toggle_like(&store, &post, "v2", true).await.unwrap();
        assert_eq!(snapshot, LikeSnapshot { liked: true, count: 2 });

        let snapshot = toggle_like(&store, &post, "v1", false).await.unwrap();
        assert_eq!(snapshot, LikeSnapshot { liked: false, count: 1 });

        let record = store.read(&paths::post("a", "p1")).await.unwrap().unwrap();
        assert_eq!(Post::from_record("a", "p1", record).unwrap().like_count, 1);
    }

    #[tokio::test]
    async fn test_liking_a_deleted_post_writes_nothing() {
        let store = MemoryStore::new();
        store
            .write(&paths::post("a", "p1"), json!({"content": "hi", "createdAt": 1}))
            .await
            .unwrap();
        let post = Post::from_record("a", "p1", json!({"createdAt": 1})).unwrap();
        store.remove(&paths::post("a", "p1")).await.unwrap();

        assert!(toggle_like(&store, &post, "v1", true).await.is_err());
        assert!(store.read(&paths::post("a", "p1")).await.unwrap().is_none());
        assert!(store.read("users").await.unwrap().is_none());
    }
}
