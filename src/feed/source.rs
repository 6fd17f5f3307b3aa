use crate::backend::{paths, DocumentStore};
use crate::post::Post;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedPage {
    pub posts: Vec<Post>,
    pub has_more: bool,
}

/// Something that serves the feed a page at a time, newest first.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// `page` is 0-based.
    async fn fetch_page(&self, page: usize) -> Result<FeedPage>;
}

/// Pages built from the posts in the document store.
pub struct StoreFeedSource {
    store: Arc<dyn DocumentStore>,
    page_size: usize,
    author: Option<String>,
}

impl StoreFeedSource {
    /// Everyone's posts.
    pub fn new(store: Arc<dyn DocumentStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
            author: None,
        }
    }

    /// Only the posts of `user_id`, as on a profile page.
    pub fn for_author(store: Arc<dyn DocumentStore>, user_id: &str, page_size: usize) -> Self {
        Self {
            author: Some(user_id.to_string()),
            ..Self::new(store, page_size)
        }
    }

    async fn load_posts(&self) -> Result<Vec<Post>> {
        let posts = match &self.author {
            Some(user_id) => {
                let posts = self
                    .store
                    .read(&paths::posts(user_id))
                    .await
                    .with_context(|| format!("Failed to load posts of {}", user_id))?;
                posts
                    .map(|posts| collect_user_posts(user_id, &posts))
                    .unwrap_or_default()
            }
            None => {
                let users = self
                    .store
                    .read(paths::USERS)
                    .await
                    .context("Failed to load posts")?;
                users.map(|users| collect_posts(&users)).unwrap_or_default()
            }
        };
        Ok(posts)
    }
}

fn collect_user_posts(user_id: &str, posts: &Value) -> Vec<Post> {
    let Some(posts) = posts.as_object() else {
        return Vec::new();
    };

    posts
        .iter()
        .filter_map(|(post_id, record)| {
            match Post::from_record(user_id, post_id, record.clone()) {
                Ok(post) => Some(post),
                Err(e) => {
                    warn!("Skipping malformed post {}/{}: {}", user_id, post_id, e);
                    None
                }
            }
        })
        .collect()
}

fn collect_posts(users: &Value) -> Vec<Post> {
    let Some(users) = users.as_object() else {
        return Vec::new();
    };

    users
        .iter()
        .filter_map(|(user_id, user)| user.get("posts").map(|posts| (user_id, posts)))
        .flat_map(|(user_id, posts)| collect_user_posts(user_id, posts))
        .collect()
}

#[async_trait]
impl FeedSource for StoreFeedSource {
    async fn fetch_page(&self, page: usize) -> Result<FeedPage> {
        let mut posts = self.load_posts().await?;
        posts.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let start = page.saturating_mul(self.page_size);
        let has_more = start.saturating_add(self.page_size) < posts.len();
        let posts: Vec<Post> = posts
            .into_iter()
            .skip(start)
            .take(self.page_size)
            .collect();

        debug!("Feed page {} has {} posts", page, posts.len());
        Ok(FeedPage { posts, has_more })
    }
}
