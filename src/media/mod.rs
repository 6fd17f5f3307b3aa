mod camera;
mod canvas;
mod codec;
mod error;
mod ffmpeg;
mod preview;
mod resize;
mod selection;
mod transcode;
mod types;

pub use camera::{Camera, CameraStream, FfmpegCamera, FileCapture, NativeCapture, NoCamera};
pub use canvas::Canvas;
pub use codec::{negotiate, EncoderCapabilities, OutputFormat, DEFAULT_FORMAT, PREFERRED_FORMATS};
pub use error::MediaError;
pub use ffmpeg::FfmpegEngine;
pub use preview::{PreviewHandle, PreviewRegistry, PreviewTracker};
pub use resize::{compress_image, compress_image_async, encode_image, encode_jpeg_frame};
pub use selection::{
    swipe_direction, CameraStart, MediaItem, MediaSelection, SelectionMode, SwipeDirection,
    SWIPE_THRESHOLD,
};
pub use transcode::{
    Frame, Playback, PlaybackEvents, StreamEncoder, TranscodeState, VideoEngine, VideoMetadata,
    VideoTranscoder, DEFAULT_FPS, DEFAULT_PROBE_TIMEOUT,
};
pub use types::{
    mime_from_extension, Dimensions, ImageTarget, MediaFile, MediaKind, ReencodePolicy,
    VideoTarget,
};
