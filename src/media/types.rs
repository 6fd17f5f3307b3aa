use serde::{Deserialize, Serialize};

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn from_mime(mime: &str) -> Option<Self> {
        if mime.starts_with("image/") {
            Some(Self::Image)
        } else if mime.starts_with("video/") {
            Some(Self::Video)
        } else {
            None
        }
    }
}

/// An in-memory media blob together with the name and type it was picked with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub filename: String,
    pub mime: String,
    pub data: Vec<u8>,
}

impl MediaFile {
    pub fn new(filename: impl Into<String>, mime: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime: mime.into(),
            data,
        }
    }

    /// Builds a file from a name only, guessing the MIME type from the extension.
    pub fn from_filename(filename: impl Into<String>, data: Vec<u8>) -> Self {
        let filename = filename.into();
        let mime = mime_from_extension(&filename).to_string();
        Self {
            filename,
            mime,
            data,
        }
    }

    pub fn kind(&self) -> Option<MediaKind> {
        MediaKind::from_mime(&self.mime)
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn size_mb(&self) -> f64 {
        self.size() as f64 / BYTES_PER_MB as f64
    }

    /// Returns the file name with its extension swapped for `ext`.
    pub fn with_extension(&self, ext: &str) -> String {
        match self.filename.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => format!("{}.{}", stem, ext),
            _ => format!("{}.{}", self.filename, ext),
        }
    }

    /// Lowercased extension of the file name, if it has one.
    pub fn extension(&self) -> Option<String> {
        match self.filename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
                Some(ext.to_ascii_lowercase())
            }
            _ => None,
        }
    }
}

pub fn mime_from_extension(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

/// Pixel dimensions of an image or video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn fits_within(&self, max_width: u32, max_height: u32) -> bool {
        self.width <= max_width && self.height <= max_height
    }

    /// Scales down, preserving aspect ratio, so that neither side exceeds its bound.
    ///
    /// Dimensions already within bounds come back unchanged. Otherwise the
    /// binding side lands exactly on its bound and the other side is rounded
    /// to the nearest pixel (never below 1).
    pub fn fit_within(&self, max_width: u32, max_height: u32) -> Dimensions {
        if self.fits_within(max_width, max_height) || self.width == 0 || self.height == 0 {
            return *self;
        }

        let (w, h) = (self.width as u64, self.height as u64);
        let (mw, mh) = (max_width.max(1) as u64, max_height.max(1) as u64);

        // w/mw >= h/mh means the width is the binding side
        if w * mh >= h * mw {
            let height = (h * mw * 2 + w) / (w * 2);
            Dimensions::new(mw as u32, height.max(1) as u32)
        } else {
            let width = (w * mh * 2 + h) / (h * 2);
            Dimensions::new(width.max(1) as u32, mh as u32)
        }
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Bounds and quality for still images.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageTarget {
    pub max_width: u32,
    pub max_height: u32,
    /// Encoder quality in `[0, 1]`.
    pub quality: f32,
}

impl Default for ImageTarget {
    fn default() -> Self {
        Self {
            max_width: 800,
            max_height: 800,
            quality: 0.8,
        }
    }
}

impl ImageTarget {
    /// Quality mapped onto the 1..=100 scale JPEG encoders take.
    pub fn jpeg_quality(&self) -> u8 {
        let q = self.quality.clamp(0.0, 1.0);
        ((q * 100.0).round() as u8).max(1)
    }
}

/// When a video that passed probing gets re-encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReencodePolicy {
    /// Re-encode when the byte size or either dimension is over its limit.
    #[default]
    AnyLimitExceeded,
    /// Re-encode only when the byte size is over its limit.
    SizeLimitExceeded,
}

/// Bounds for video transcoding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoTarget {
    pub max_width: u32,
    pub max_height: u32,
    pub max_bitrate_bps: u64,
    pub max_file_size_mb: u64,
    pub policy: ReencodePolicy,
}

impl Default for VideoTarget {
    fn default() -> Self {
        Self {
            max_width: 1280,
            max_height: 720,
            max_bitrate_bps: 2_000_000,
            max_file_size_mb: 50,
            policy: ReencodePolicy::AnyLimitExceeded,
        }
    }
}

impl VideoTarget {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * BYTES_PER_MB
    }

    pub fn needs_reencode(&self, size_bytes: u64, dims: Dimensions) -> bool {
        let oversize = size_bytes > self.max_file_size_bytes();
        match self.policy {
            ReencodePolicy::AnyLimitExceeded => {
                oversize || !dims.fits_within(self.max_width, self.max_height)
            }
            ReencodePolicy::SizeLimitExceeded => oversize,
        }
    }
}
