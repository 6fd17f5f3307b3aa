use crate::feed::DEFAULT_PAGE_SIZE;
use crate::media::{ImageTarget, VideoTarget, DEFAULT_FPS, DEFAULT_PROBE_TIMEOUT};
use crate::profile::{AVATAR_TARGET, BANNER_TARGET};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub firebase: FirebaseConfig,
    pub media: MediaConfig,
    pub feed: FeedConfig,
    pub camera: CameraConfig,
    pub share: ShareConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `json` or `pretty`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FirebaseConfig {
    pub api_key: Option<String>,
    pub database_url: Option<String>,
    pub storage_bucket: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub image: ImageTarget,
    pub avatar: ImageTarget,
    pub banner: ImageTarget,
    pub video: VideoConfig,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            image: ImageTarget::default(),
            avatar: AVATAR_TARGET,
            banner: BANNER_TARGET,
            video: VideoConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    #[serde(flatten)]
    pub target: VideoTarget,
    pub probe_timeout_secs: u64,
    pub fps: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            target: VideoTarget::default(),
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT.as_secs(),
            fps: DEFAULT_FPS,
        }
    }
}

impl VideoConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub page_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Skip the live camera and use the native capture flow.
    pub prefer_native: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/video0"),
            width: 1280,
            height: 720,
            prefer_native: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    pub base_url: String,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            base_url: "https://kleo.app".to_string(),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn get_logging_format(&self) -> &str {
        &self.logging.format
    }
}
