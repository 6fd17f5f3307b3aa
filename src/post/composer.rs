use super::model::Post;
use crate::backend::{paths, server_timestamp, BlobStore, DocumentStore, Session};
use crate::media::{
    compress_image_async, ImageTarget, MediaError, MediaFile, MediaKind, VideoTranscoder,
};
use anyhow::anyhow;
use futures::future::try_join_all;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("A post needs text or media")]
    EmptyPost,

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Media ready for upload, after compression.
enum Attachment {
    None,
    Images(Vec<MediaFile>),
    Video(MediaFile),
}

fn blob_extension(file: &MediaFile) -> String {
    file.extension().unwrap_or_else(|| {
        file.mime
            .split(';')
            .next()
            .and_then(|base| base.split_once('/'))
            .map(|(_, subtype)| subtype.to_string())
            .unwrap_or_else(|| "bin".to_string())
    })
}

/// Turns picked media into a stored post.
pub struct PostComposer {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    image_target: ImageTarget,
    transcoder: Option<Arc<VideoTranscoder>>,
}

impl PostComposer {
    pub fn new(store: Arc<dyn DocumentStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            blobs,
            image_target: ImageTarget::default(),
            transcoder: None,
        }
    }

    pub fn with_image_target(mut self, target: ImageTarget) -> Self {
        self.image_target = target;
        self
    }

    /// Without a transcoder videos are uploaded as picked.
    pub fn with_transcoder(mut self, transcoder: Arc<VideoTranscoder>) -> Self {
        self.transcoder = Some(transcoder);
        self
    }

    async fn prepare(&self, files: Vec<MediaFile>) -> Result<Attachment, ComposeError> {
        let mut images = Vec::new();
        let mut video = None;

        for file in files {
            match file.kind() {
                Some(MediaKind::Video) if video.is_none() => video = Some(file),
                Some(MediaKind::Image) => images.push(file),
                _ => warn!("Not attaching {} ({})", file.filename, file.mime),
            }
        }

        if let Some(video) = video {
            if !images.is_empty() {
                warn!("Post has a video, dropping {} images", images.len());
            }
            let video = match &self.transcoder {
                Some(transcoder) => transcoder.transcode_or_original(&video).await,
                None => video,
            };
            return Ok(Attachment::Video(video));
        }

        if images.is_empty() {
            return Ok(Attachment::None);
        }

        let target = self.image_target;
        let compressed =
            try_join_all(images.into_iter().map(|file| compress_image_async(file, target)))
                .await?;
        Ok(Attachment::Images(compressed))
    }

    async fn upload(&self, path: String, file: MediaFile) -> anyhow::Result<String> {
        self.blobs.put(&path, file.data, &file.mime).await
    }

    async fn rollback(&self, post_path: &str, media_paths: &[String]) {
        for path in media_paths {
            if let Err(e) = self.blobs.delete(path).await {
                warn!("Failed to clean up {}: {}", path, e);
            }
        }
        if let Err(e) = self.store.remove(post_path).await {
            warn!("Failed to clean up {}: {}", post_path, e);
        }
    }

    /// Compresses the media, writes the post record and uploads the media
    /// next to it. Nothing is left behind when a step fails.
    pub async fn create_post(
        &self,
        session: &Session,
        content: &str,
        files: Vec<MediaFile>,
    ) -> Result<Post, ComposeError> {
        let content = content.trim();
        let user_id = session.user_id.as_str();

        if content.is_empty() && !files.iter().any(|f| f.kind().is_some()) {
            return Err(ComposeError::EmptyPost);
        }

        let attachment = self.prepare(files).await?;

        let post_id = self
            .store
            .append(
                &paths::posts(user_id),
                json!({
                    "userId": user_id,
                    "content": content,
                    "createdAt": server_timestamp(),
                    "likeCount": 0,
                }),
            )
            .await?;
        let post_path = paths::post(user_id, &post_id);

        let (media_paths, fields) = match attachment {
            Attachment::None => (Vec::new(), None),
            Attachment::Images(images) => {
                let media_paths: Vec<String> = images
                    .iter()
                    .enumerate()
                    .map(|(slot, file)| {
                        paths::post_image_blob(user_id, &post_id, slot, &blob_extension(file))
                    })
                    .collect();
                let uploads = media_paths
                    .iter()
                    .cloned()
                    .zip(images)
                    .map(|(path, file)| self.upload(path, file));

                match try_join_all(uploads).await {
                    Ok(urls) => (
                        media_paths.clone(),
                        Some(json!({ "imageUrls": urls, "mediaPaths": media_paths })),
                    ),
                    Err(e) => {
                        self.rollback(&post_path, &media_paths).await;
                        return Err(e.into());
                    }
                }
            }
            Attachment::Video(video) => {
                let path = paths::post_video_blob(user_id, &post_id, &blob_extension(&video));
                match self.upload(path.clone(), video).await {
                    Ok(url) => (
                        vec![path.clone()],
                        Some(json!({ "videoUrl": url, "mediaPaths": [path] })),
                    ),
                    Err(e) => {
                        self.rollback(&post_path, &[path]).await;
                        return Err(e.into());
                    }
                }
            }
        };

        if let Some(fields) = fields {
            if let Err(e) = self.store.update(&post_path, fields).await {
                self.rollback(&post_path, &media_paths).await;
                return Err(e.into());
            }
        }

        let record = self
            .store
            .read(&post_path)
            .await?
            .ok_or_else(|| anyhow!("Post {} vanished after creation", post_path))?;
        let post = Post::from_record(user_id, &post_id, record)
            .map_err(|e| anyhow!("Stored post {} is malformed: {}", post_path, e))?;

        info!(
            "Created post {} for {} with {} media",
            post.id,
            user_id,
            post.media_paths.len()
        );
        Ok(post)
    }

    /// Removes the post record and its uploaded media. Only the author may.
    pub async fn delete_post(&self, session: &Session, post: &Post) -> Result<(), ComposeError> {
        if post.user_id != session.user_id {
            return Err(anyhow!(
                "{} cannot delete post {} by {}",
                session.user_id,
                post.id,
                post.user_id
            )
            .into());
        }

        self.store
            .remove(&paths::post(&post.user_id, &post.id))
            .await?;

        for path in &post.media_paths {
            if let Err(e) = self.blobs.delete(path).await {
                warn!("Failed to delete {}: {}", path, e);
            }
        }

        debug!("Deleted post {} and {} blobs", post.id, post.media_paths.len());
        Ok(())
    }
}
