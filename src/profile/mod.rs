//! User profiles stored at `users/{uid}/profile`, with avatar and banner images.

use crate::backend::{paths, server_timestamp, BlobStore, DocumentStore};
use crate::media::{compress_image_async, ImageTarget, MediaFile};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    pub name: String,
    pub bio: String,
    pub profile_image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner_image_url: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Fields supplied when a profile is first set up.
#[derive(Debug, Clone, Default)]
pub struct NewProfile {
    pub name: String,
    pub bio: String,
    pub profile_image_url: String,
}

/// A partial edit. `None` leaves the field as it is.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub bio: Option<String>,
    pub profile_image_url: Option<String>,
    pub banner_image_url: Option<String>,
}

impl ProfileUpdate {
    fn into_fields(self) -> Map<String, Value> {
        let mut fields = Map::new();
        let entries = [
            ("name", self.name),
            ("bio", self.bio),
            ("profileImageUrl", self.profile_image_url),
            ("bannerImageUrl", self.banner_image_url),
        ];
        for (key, value) in entries {
            if let Some(value) = value {
                fields.insert(key.to_string(), Value::String(value));
            }
        }
        fields
    }
}

pub const AVATAR_TARGET: ImageTarget = ImageTarget {
    max_width: 400,
    max_height: 400,
    quality: 0.85,
};

pub const BANNER_TARGET: ImageTarget = ImageTarget {
    max_width: 1500,
    max_height: 500,
    quality: 0.85,
};

pub struct ProfileService {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    avatar_target: ImageTarget,
    banner_target: ImageTarget,
}

impl ProfileService {
    pub fn new(store: Arc<dyn DocumentStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            blobs,
            avatar_target: AVATAR_TARGET,
            banner_target: BANNER_TARGET,
        }
    }

    pub fn with_targets(mut self, avatar: ImageTarget, banner: ImageTarget) -> Self {
        self.avatar_target = avatar;
        self.banner_target = banner;
        self
    }

    pub async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let Some(record) = self.store.read(&paths::profile(user_id)).await? else {
            return Ok(None);
        };
        let profile = serde_json::from_value(record)
            .with_context(|| format!("Malformed profile of {}", user_id))?;
        Ok(Some(profile))
    }

    pub async fn profile_exists(&self, user_id: &str) -> Result<bool> {
        Ok(self.get_profile(user_id).await?.is_some())
    }

    pub async fn create_profile(&self, user_id: &str, profile: NewProfile) -> Result<()> {
        self.store
            .write(
                &paths::profile(user_id),
                json!({
                    "name": profile.name,
                    "bio": profile.bio,
                    "profileImageUrl": profile.profile_image_url,
                    "createdAt": server_timestamp(),
                    "updatedAt": server_timestamp(),
                }),
            )
            .await
            .with_context(|| format!("Failed to create profile of {}", user_id))?;
        info!("Created profile for {}", user_id);
        Ok(())
    }

    pub async fn update_profile(&self, user_id: &str, update: ProfileUpdate) -> Result<()> {
        let mut fields = update.into_fields();
        fields.insert("updatedAt".to_string(), server_timestamp());
        self.store
            .update(&paths::profile(user_id), Value::Object(fields))
            .await
            .with_context(|| format!("Failed to update profile of {}", user_id))
    }

    async fn replace_image(
        &self,
        path: &str,
        file: MediaFile,
        target: ImageTarget,
    ) -> Result<String> {
        let compressed = compress_image_async(file, target)
            .await
            .with_context(|| format!("Failed to compress image for {}", path))?;

        if let Err(e) = self.blobs.delete(path).await {
            warn!("Failed to delete old image {}: {}", path, e);
        }

        self.blobs
            .put(path, compressed.data, &compressed.mime)
            .await
    }

    /// Compresses, uploads and links a new profile picture. Returns its URL.
    pub async fn upload_avatar(&self, user_id: &str, file: MediaFile) -> Result<String> {
        let url = self
            .replace_image(&paths::avatar_blob(user_id), file, self.avatar_target)
            .await?;
        self.update_profile(
            user_id,
            ProfileUpdate {
                profile_image_url: Some(url.clone()),
                ..Default::default()
            },
        )
        .await?;
        Ok(url)
    }

    pub async fn upload_banner(&self, user_id: &str, file: MediaFile) -> Result<String> {
        let url = self
            .replace_image(&paths::banner_blob(user_id), file, self.banner_target)
            .await?;
        self.update_profile(
            user_id,
            ProfileUpdate {
                banner_image_url: Some(url.clone()),
                ..Default::default()
            },
        )
        .await?;
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBlobs, MemoryStore};
    use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn jpeg(width: u32, height: u32) -> MediaFile {
        let img = RgbImage::from_fn(width, height, |x, _| Rgb([x as u8, 10, 200]));
        let mut data = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut data), ImageFormat::Jpeg)
            .unwrap();
        MediaFile::new("me.jpg", "image/jpeg", data)
    }

    fn service() -> (ProfileService, Arc<MemoryBlobs>) {
        let blobs = Arc::new(MemoryBlobs::new());
        let service = ProfileService::new(Arc::new(MemoryStore::new()), blobs.clone());
        (service, blobs)
    }

    #[tokio::test]
    async fn test_create_and_read_profile() {
        let (service, _) = service();
        assert!(!service.profile_exists("u1").await.unwrap());

        service
            .create_profile(
                "u1",
                NewProfile {
                    name: "Ana".to_string(),
                    bio: "hello".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let profile = service.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.name, "Ana");
        assert_eq!(profile.bio, "hello");
        assert!(profile.created_at > 0);
        assert_eq!(profile.created_at, profile.updated_at);
        assert!(service.profile_exists("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_update_is_partial_and_bumps_updated_at() {
        let (service, _) = service();
        service
            .create_profile(
                "u1",
                NewProfile {
                    name: "Ana".to_string(),
                    bio: "old".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let before = service.get_profile("u1").await.unwrap().unwrap();

        service
            .update_profile(
                "u1",
                ProfileUpdate {
                    bio: Some("new".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let after = service.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(after.name, "Ana");
        assert_eq!(after.bio, "new");
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at > before.updated_at);
    }

    #[tokio::test]
    async fn test_upload_avatar_replaces_image() {
        let (service, blobs) = service();

        service.upload_avatar("u1", jpeg(900, 600)).await.unwrap();
        let url = service.upload_avatar("u1", jpeg(100, 100)).await.unwrap();

        assert_eq!(url, MemoryBlobs::url_for("users/u1/profile.jpg"));
        assert_eq!(blobs.len(), 1);
        let stored = image::load_from_memory(&blobs.get("users/u1/profile.jpg").unwrap()).unwrap();
        assert_eq!(stored.dimensions(), (100, 100));

        let profile = service.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.profile_image_url, url);
    }

    #[tokio::test]
    async fn test_upload_banner() {
        let (service, blobs) = service();
        let url = service.upload_banner("u1", jpeg(3000, 1000)).await.unwrap();

        let stored = image::load_from_memory(&blobs.get("users/u1/banner.jpg").unwrap()).unwrap();
        assert_eq!(stored.dimensions(), (1500, 500));
        let profile = service.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.banner_image_url, Some(url));
    }

    #[tokio::test]
    async fn test_undecodable_avatar_is_rejected() {
        let (service, blobs) = service();
        let broken = MediaFile::new("me.jpg", "image/jpeg", vec![0xFF, 0xD8, 0x00]);

        assert!(service.upload_avatar("u1", broken).await.is_err());
        assert!(blobs.is_empty());
        assert!(!service.profile_exists("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_configured_targets_are_used() {
        let blobs = Arc::new(MemoryBlobs::new());
        let small = ImageTarget {
            max_width: 300,
            max_height: 100,
            quality: 0.7,
        };
        let service = ProfileService::new(Arc::new(MemoryStore::new()), blobs.clone())
            .with_targets(small, small);

        service.upload_banner("u1", jpeg(3000, 1000)).await.unwrap();
        service.upload_avatar("u1", jpeg(900, 600)).await.unwrap();

        let banner = image::load_from_memory(&blobs.get("users/u1/banner.jpg").unwrap()).unwrap();
        assert_eq!(banner.dimensions(), (300, 100));
        let avatar = image::load_from_memory(&blobs.get("users/u1/profile.jpg").unwrap()).unwrap();
        assert_eq!(avatar.dimensions(), (150, 100));
    }
}
