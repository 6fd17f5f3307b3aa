use crate::backend::{paths, DocumentStore};
use crate::post::Post;
use crate::profile::UserProfile;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub const UNKNOWN_AUTHOR: &str = "Unknown User";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorInfo {
    pub name: String,
    pub avatar_url: String,
}

impl AuthorInfo {
    pub fn placeholder() -> Self {
        Self {
            name: UNKNOWN_AUTHOR.to_string(),
            avatar_url: String::new(),
        }
    }
}

/// Per-post lookups that decorate a feed entry after it is shown.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn author(&self, user_id: &str) -> Result<AuthorInfo>;

    async fn liked(&self, post: &Post, viewer_id: &str) -> Result<bool>;
}

pub struct StoreEnricher {
    store: Arc<dyn DocumentStore>,
}

impl StoreEnricher {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Enricher for StoreEnricher {
    async fn author(&self, user_id: &str) -> Result<AuthorInfo> {
        let record = self
            .store
            .read(&paths::profile(user_id))
            .await?
            .ok_or_else(|| anyhow!("{} has no profile", user_id))?;
        let profile: UserProfile = serde_json::from_value(record)
            .with_context(|| format!("Malformed profile of {}", user_id))?;

        Ok(AuthorInfo {
            name: if profile.name.is_empty() {
                UNKNOWN_AUTHOR.to_string()
            } else {
                profile.name
            },
            avatar_url: profile.profile_image_url,
        })
    }

    async fn liked(&self, post: &Post, viewer_id: &str) -> Result<bool> {
        let like = self
            .store
            .read(&paths::like(&post.user_id, &post.id, viewer_id))
            .await?;
        Ok(like.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrichment {
    pub author: AuthorInfo,
    pub liked: bool,
}

/// Runs both lookups concurrently. Failures become placeholders.
pub async fn enrich(enricher: &dyn Enricher, post: &Post, viewer_id: Option<&str>) -> Enrichment {
    let author = async {
        enricher.author(&post.user_id).await.unwrap_or_else(|e| {
            debug!("No author for post {}: {}", post.id, e);
            AuthorInfo::placeholder()
        })
    };

    let liked = async {
        let Some(viewer_id) = viewer_id else {
            return false;
        };
        enricher.liked(post, viewer_id).await.unwrap_or_else(|e| {
            debug!("No like state for post {}: {}", post.id, e);
            false
        })
    };

    let (author, liked) = futures::join!(author, liked);
    Enrichment { author, liked }
}
