//! Paginated, deduplicated feed with background enrichment.

mod enrich;
mod likes;
mod source;

pub use enrich::{enrich, AuthorInfo, Enricher, Enrichment, StoreEnricher, UNKNOWN_AUTHOR};
pub use likes::{toggle_like, LikeSnapshot, LikeState};
pub use source::{FeedPage, FeedSource, StoreFeedSource, DEFAULT_PAGE_SIZE};

use crate::post::Post;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub post: Post,
    pub author: AuthorInfo,
    pub liked: bool,
    /// False until the author and like lookups have come back.
    pub enriched: bool,
}

impl FeedEntry {
    fn pending(post: Post) -> Self {
        Self {
            post,
            author: AuthorInfo::placeholder(),
            liked: false,
            enriched: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { added: usize, has_more: bool },
    /// A fetch was already running, or the feed has ended.
    Skipped,
}

#[derive(Default)]
struct FeedInner {
    entries: Vec<FeedEntry>,
    seen: HashSet<String>,
    cursor: usize,
    pages_loaded: usize,
    end_reached: bool,
    is_fetching: bool,
}

/// Clears the in-flight flag however the fetch ends, including when the
/// caller drops the future.
struct FetchGuard<'a>(&'a Mutex<FeedInner>);

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().is_fetching = false;
    }
}

pub struct PaginatedFeed {
    source: Arc<dyn FeedSource>,
    enricher: Arc<dyn Enricher>,
    viewer_id: Option<String>,
    inner: Arc<Mutex<FeedInner>>,
    enrichment: Mutex<JoinSet<()>>,
}

impl PaginatedFeed {
    pub fn new(
        source: Arc<dyn FeedSource>,
        enricher: Arc<dyn Enricher>,
        viewer_id: Option<String>,
    ) -> Self {
        Self {
            source,
            enricher,
            viewer_id,
            inner: Arc::new(Mutex::new(FeedInner::default())),
            enrichment: Mutex::new(JoinSet::new()),
        }
    }

    /// Fetches the next page unless one is already in flight or the feed
    /// has ended. A failed fetch leaves the cursor where it was.
    pub async fn load_next(&self) -> Result<LoadOutcome> {
        let cursor = {
            let mut inner = self.inner.lock();
            if inner.is_fetching || inner.end_reached {
                debug!(
                    "Skipping feed fetch (fetching: {}, ended: {})",
                    inner.is_fetching, inner.end_reached
                );
                return Ok(LoadOutcome::Skipped);
            }
            inner.is_fetching = true;
            inner.cursor
        };
        let _guard = FetchGuard(&self.inner);

        let page = self
            .source
            .fetch_page(cursor)
            .await
            .with_context(|| format!("Failed to fetch feed page {}", cursor))?;
        let has_more = page.has_more;

        let fresh: Vec<Post> = {
            let mut inner = self.inner.lock();
            inner.pages_loaded += 1;
            if has_more {
                inner.cursor += 1;
            } else {
                inner.end_reached = true;
            }

            let mut fresh = Vec::new();
            for post in page.posts {
                if inner.seen.insert(post.id.clone()) {
                    inner.entries.push(FeedEntry::pending(post.clone()));
                    fresh.push(post);
                }
            }
            fresh
        };

        info!(
            "Loaded feed page {} with {} new posts{}",
            cursor,
            fresh.len(),
            if has_more { "" } else { ", end of feed" }
        );

        let added = fresh.len();
        self.spawn_enrichment(fresh);
        Ok(LoadOutcome::Loaded { added, has_more })
    }

    fn spawn_enrichment(&self, posts: Vec<Post>) {
        let mut tasks = self.enrichment.lock();
        reap_finished(&mut tasks);
        for post in posts {
            let enricher = self.enricher.clone();
            let inner = self.inner.clone();
            let viewer_id = self.viewer_id.clone();

            tasks.spawn(async move {
                let result = enrich(enricher.as_ref(), &post, viewer_id.as_deref()).await;

                let mut inner = inner.lock();
                if let Some(entry) = inner.entries.iter_mut().find(|e| e.post.id == post.id) {
                    entry.author = result.author;
                    entry.liked = result.liked;
                    entry.enriched = true;
                }
            });
        }
    }

    /// Enrichment tasks that have not finished yet.
    pub fn enrichments_in_flight(&self) -> usize {
        let mut tasks = self.enrichment.lock();
        reap_finished(&mut tasks);
        tasks.len()
    }

    /// Waits for every enrichment started so far.
    pub async fn settle(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.enrichment.lock());
            if tasks.is_empty() {
                return;
            }
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    warn!("Enrichment task failed: {}", e);
                }
            }
        }
    }

    /// Reflects a settled like toggle in the matching entry.
    pub fn apply_like(&self, post_id: &str, like: LikeSnapshot) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.iter_mut().find(|e| e.post.id == post_id) {
            Some(entry) => {
                entry.liked = like.liked;
                entry.post.like_count = like.count;
                true
            }
            None => false,
        }
    }

    pub fn entries(&self) -> Vec<FeedEntry> {
        self.inner.lock().entries.clone()
    }

    pub fn entry(&self, post_id: &str) -> Option<FeedEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .find(|e| e.post.id == post_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cursor(&self) -> usize {
        self.inner.lock().cursor
    }

    pub fn pages_loaded(&self) -> usize {
        self.inner.lock().pages_loaded
    }

    pub fn end_reached(&self) -> bool {
        self.inner.lock().end_reached
    }

    pub fn is_fetching(&self) -> bool {
        self.inner.lock().is_fetching
    }
}

fn reap_finished(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.try_join_next() {
        if let Err(e) = result {
            warn!("Enrichment task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{watch, Notify};

    fn post(user: &str, id: &str) -> Post {
        Post::from_record(user, id, json!({"createdAt": 1})).unwrap()
    }

    fn page(ids: &[&str], has_more: bool) -> FeedPage {
        FeedPage {
            posts: ids.iter().map(|id| post("a", id)).collect(),
            has_more,
        }
    }

    #[derive(Default)]
    struct ScriptedSource {
        pages: Vec<FeedPage>,
        calls: AtomicUsize,
        fail_first: bool,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl FeedSource for ScriptedSource {
        async fn fetch_page(&self, page: usize) -> Result<FeedPage> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail_first && call == 0 {
                bail!("network down");
            }
            match self.pages.get(page) {
                Some(page) => Ok(page.clone()),
                None => bail!("no page {}", page),
            }
        }
    }

    #[derive(Default)]
    struct MapEnricher {
        authors: HashMap<String, AuthorInfo>,
        gate: Option<watch::Receiver<bool>>,
    }

    #[async_trait]
    impl Enricher for MapEnricher {
        async fn author(&self, user_id: &str) -> Result<AuthorInfo> {
            if let Some(gate) = &self.gate {
                let mut gate = gate.clone();
                let _ = gate.wait_for(|open| *open).await;
            }
            match self.authors.get(user_id) {
                Some(author) => Ok(author.clone()),
                None => bail!("unknown author {}", user_id),
            }
        }

        async fn liked(&self, post: &Post, _viewer_id: &str) -> Result<bool> {
            if post.id == "broken" {
                bail!("like lookup failed");
            }
            Ok(post.id.ends_with("liked"))
        }
    }

    fn scripted_feed(source: ScriptedSource) -> (PaginatedFeed, Arc<ScriptedSource>) {
        let source = Arc::new(source);
        let feed = PaginatedFeed::new(
            source.clone(),
            Arc::new(MapEnricher::default()),
            Some("viewer".to_string()),
        );
        (feed, source)
    }

    #[tokio::test]
    async fn test_concurrent_loads_fetch_once() {
        let gate = Arc::new(Notify::new());
        let (feed, source) = scripted_feed(ScriptedSource {
            pages: vec![page(&["p1", "p2"], true)],
            gate: Some(gate.clone()),
            ..Default::default()
        });

        let (first, second, _) = tokio::join!(feed.load_next(), feed.load_next(), async {
            tokio::task::yield_now().await;
            gate.notify_one();
        });

        let outcomes = [first.unwrap(), second.unwrap()];
        assert!(outcomes.contains(&LoadOutcome::Skipped));
        assert!(outcomes.contains(&LoadOutcome::Loaded {
            added: 2,
            has_more: true
        }));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(!feed.is_fetching());
    }

    #[tokio::test]
    async fn test_end_of_feed_is_sticky() {
        let (feed, source) = scripted_feed(ScriptedSource {
            pages: vec![page(&["p1"], true), page(&["p2"], false)],
            ..Default::default()
        });

        feed.load_next().await.unwrap();
        assert_eq!(feed.cursor(), 1);
        assert!(!feed.end_reached());

        feed.load_next().await.unwrap();
        assert!(feed.end_reached());
        assert_eq!(feed.cursor(), 1);

        assert_eq!(feed.load_next().await.unwrap(), LoadOutcome::Skipped);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(feed.pages_loaded(), 2);
        assert!(feed.end_reached());
    }

    #[tokio::test]
    async fn test_duplicates_are_dropped() {
        let (feed, _) = scripted_feed(ScriptedSource {
            pages: vec![page(&["p1", "p2"], true), page(&["p2", "p3"], false)],
            ..Default::default()
        });

        feed.load_next().await.unwrap();
        let outcome = feed.load_next().await.unwrap();
        assert_eq!(
            outcome,
            LoadOutcome::Loaded {
                added: 1,
                has_more: false
            }
        );

        let ids: Vec<String> = feed.entries().into_iter().map(|e| e.post.id).collect();
        assert_eq!(ids, vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_cursor() {
        let (feed, source) = scripted_feed(ScriptedSource {
            pages: vec![page(&["p1"], true)],
            fail_first: true,
            ..Default::default()
        });

        assert!(feed.load_next().await.is_err());
        assert!(!feed.is_fetching());
        assert_eq!(feed.cursor(), 0);
        assert!(feed.is_empty());

        feed.load_next().await.unwrap();
        assert_eq!(feed.cursor(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_enrichment_fills_entries_with_placeholders() {
        let mut authors = HashMap::new();
        authors.insert(
            "a".to_string(),
            AuthorInfo {
                name: "Ana".to_string(),
                avatar_url: "https://x/a.jpg".to_string(),
            },
        );
        let source = ScriptedSource {
            pages: vec![FeedPage {
                posts: vec![post("a", "p-liked"), post("b", "broken")],
                has_more: false,
            }],
            ..Default::default()
        };
        let feed = PaginatedFeed::new(
            Arc::new(source),
            Arc::new(MapEnricher {
                authors,
                gate: None,
            }),
            Some("viewer".to_string()),
        );

        feed.load_next().await.unwrap();
        feed.settle().await;

        let liked = feed.entry("p-liked").unwrap();
        assert!(liked.enriched);
        assert!(liked.liked);
        assert_eq!(liked.author.name, "Ana");

        let broken = feed.entry("broken").unwrap();
        assert!(broken.enriched);
        assert!(!broken.liked);
        assert_eq!(broken.author.name, UNKNOWN_AUTHOR);
    }

    #[tokio::test]
    async fn test_enrichment_does_not_block_pagination() {
        let (open, gate) = watch::channel(false);
        let feed = PaginatedFeed::new(
            Arc::new(ScriptedSource {
                pages: vec![page(&["p1"], true), page(&["p2"], false)],
                ..Default::default()
            }),
            Arc::new(MapEnricher {
                authors: HashMap::new(),
                gate: Some(gate),
            }),
            None,
        );

        feed.load_next().await.unwrap();
        feed.load_next().await.unwrap();
        assert_eq!(feed.len(), 2);
        assert!(feed.entries().iter().all(|e| !e.enriched));

        open.send_replace(true);
        feed.settle().await;
        assert!(feed.entries().iter().all(|e| e.enriched));
    }

    #[tokio::test]
    async fn test_finished_enrichments_are_released_without_settle() {
        let (open, gate) = watch::channel(false);
        let feed = PaginatedFeed::new(
            Arc::new(ScriptedSource {
                pages: vec![page(&["p1", "p2"], true), page(&["p3"], false)],
                ..Default::default()
            }),
            Arc::new(MapEnricher {
                authors: HashMap::new(),
                gate: Some(gate),
            }),
            None,
        );

        feed.load_next().await.unwrap();
        assert_eq!(feed.enrichments_in_flight(), 2);

        open.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), async {
            while feed.enrichments_in_flight() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(feed.entries().iter().all(|e| e.enriched));

        feed.load_next().await.unwrap();
        assert!(feed.enrichments_in_flight() <= 1);
    }

    #[tokio::test]
    async fn test_apply_like() {
        let (feed, _) = scripted_feed(ScriptedSource {
            pages: vec![page(&["p1"], false)],
            ..Default::default()
        });
        feed.load_next().await.unwrap();

        assert!(feed.apply_like("p1", LikeSnapshot { liked: true, count: 4 }));
        let entry = feed.entry("p1").unwrap();
        assert!(entry.liked);
        assert_eq!(entry.post.like_count, 4);
        assert!(!feed.apply_like("missing", LikeSnapshot::default()));
    }
}
