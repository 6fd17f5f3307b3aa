use thiserror::Error;

/// Failures of a single compression, transcode or capture operation.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Failed to decode media: {0}")]
    Decode(String),

    #[error("Failed to encode media: {0}")]
    Encode(String),

    #[error("No supported encoder for {0}")]
    UnsupportedCodec(String),

    #[error("Recording produced no data")]
    EmptyRecording,

    #[error("Operation aborted")]
    Aborted,

    #[error("Camera permission denied")]
    PermissionDenied,

    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("Media process failed: {0}")]
    Process(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Whether a camera error should route to the native capture fallback.
    pub fn is_camera_refusal(&self) -> bool {
        matches!(self, Self::PermissionDenied | Self::CameraUnavailable(_))
    }
}
