use crate::media::MediaKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A post as read back from the document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub image_urls: Vec<String>,
    pub video_url: Option<String>,
    /// Milliseconds since the epoch, stamped by the store.
    pub created_at: u64,
    pub like_count: u64,
    /// Blob paths of the uploaded media, removed along with the post.
    pub media_paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostRecord {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    image_urls: Vec<String>,
    // written by older clients, one image per post
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    created_at: u64,
    #[serde(default)]
    like_count: i64,
    #[serde(default)]
    media_paths: Vec<String>,
}

impl Post {
    /// Parses the record stored at `users/{owner}/posts/{id}`.
    pub fn from_record(owner: &str, id: &str, value: Value) -> Result<Self, serde_json::Error> {
        let record: PostRecord = serde_json::from_value(value)?;

        let mut image_urls = record.image_urls;
        if image_urls.is_empty() {
            image_urls.extend(record.image_url.filter(|url| !url.is_empty()));
        }
        if record.video_url.is_some() {
            image_urls.clear();
        }

        Ok(Self {
            id: id.to_string(),
            user_id: if record.user_id.is_empty() {
                owner.to_string()
            } else {
                record.user_id
            },
            content: record.content,
            image_urls,
            video_url: record.video_url,
            created_at: record.created_at,
            like_count: record.like_count.max(0) as u64,
            media_paths: record.media_paths,
        })
    }

    pub fn media_kind(&self) -> Option<MediaKind> {
        if self.video_url.is_some() {
            Some(MediaKind::Video)
        } else if !self.image_urls.is_empty() {
            Some(MediaKind::Image)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_legacy_image_url() {
        let post = Post::from_record(
            "u1",
            "p1",
            json!({"userId": "u1", "content": "hi", "imageUrl": "https://x/1.jpg", "createdAt": 5}),
        )
        .unwrap();

        assert_eq!(post.image_urls, vec!["https://x/1.jpg".to_string()]);
        assert_eq!(post.media_kind(), Some(MediaKind::Image));
        assert_eq!(post.like_count, 0);
        assert_eq!(post.created_at, 5);
    }

    #[test]
    fn test_video_excludes_images() {
        let post = Post::from_record(
            "u1",
            "p1",
            json!({"imageUrls": ["a"], "videoUrl": "v", "likeCount": -3}),
        )
        .unwrap();

        assert!(post.image_urls.is_empty());
        assert_eq!(post.media_kind(), Some(MediaKind::Video));
        assert_eq!(post.user_id, "u1");
        assert_eq!(post.like_count, 0);
    }

    #[test]
    fn test_rejects_malformed_record() {
        assert!(Post::from_record("u1", "p1", json!({"createdAt": "yesterday"})).is_err());
    }
}
