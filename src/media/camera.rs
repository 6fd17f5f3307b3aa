use super::error::MediaError;
use super::ffmpeg::spawn_rawvideo;
use super::transcode::Frame;
use super::types::{Dimensions, MediaFile};
use async_trait::async_trait;
use image::RgbaImage;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// A device that can grant a live camera stream.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Requests the stream. Refusals surface as [`MediaError::PermissionDenied`]
    /// or [`MediaError::CameraUnavailable`].
    async fn open(&self) -> Result<Box<dyn CameraStream>, MediaError>;
}

/// A granted live stream. Exclusively owned by whoever opened it.
pub trait CameraStream: Send {
    fn snapshot(&self) -> Result<RgbaImage, MediaError>;
    fn stop(&mut self);
    fn is_live(&self) -> bool;
}

/// The platform's own capture flow (a file picker with a capture hint).
#[async_trait]
pub trait NativeCapture: Send + Sync {
    /// Returns `None` when the user backs out.
    async fn capture(&self) -> Result<Option<MediaFile>, MediaError>;
}

/// A camera that is never there.
pub struct NoCamera;

#[async_trait]
impl Camera for NoCamera {
    async fn open(&self) -> Result<Box<dyn CameraStream>, MediaError> {
        Err(MediaError::CameraUnavailable(
            "no camera configured".to_string(),
        ))
    }
}

/// Native capture backed by a file on disk.
pub struct FileCapture {
    path: Option<PathBuf>,
}

impl FileCapture {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

#[async_trait]
impl NativeCapture for FileCapture {
    async fn capture(&self) -> Result<Option<MediaFile>, MediaError> {
        let Some(path) = &self.path else {
            return Ok(None);
        };

        let data = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "capture.jpg".to_string());

        debug!("Captured {} ({} bytes) from file", filename, data.len());
        Ok(Some(MediaFile::from_filename(filename, data)))
    }
}

/// A V4L2 webcam read through ffmpeg.
pub struct FfmpegCamera {
    device: PathBuf,
    dims: Dimensions,
}

impl FfmpegCamera {
    pub fn new(device: impl Into<PathBuf>, dims: Dimensions) -> Self {
        Self {
            device: device.into(),
            dims,
        }
    }
}

#[async_trait]
impl Camera for FfmpegCamera {
    async fn open(&self) -> Result<Box<dyn CameraStream>, MediaError> {
        if let Err(e) = tokio::fs::File::open(&self.device).await {
            return Err(match e.kind() {
                std::io::ErrorKind::PermissionDenied => MediaError::PermissionDenied,
                _ => MediaError::CameraUnavailable(format!(
                    "{}: {}",
                    self.device.display(),
                    e
                )),
            });
        }

        let mut command = Command::new("ffmpeg");
        command
            .arg("-loglevel")
            .arg("error")
            .arg("-f")
            .arg("v4l2")
            .arg("-i")
            .arg(&self.device)
            .arg("-vf")
            .arg(format!("scale={}:{}", self.dims.width, self.dims.height))
            .arg("-pix_fmt")
            .arg("rgba")
            .arg("-f")
            .arg("rawvideo")
            .arg("pipe:1");

        let (child, events, reader) = spawn_rawvideo(&mut command, self.dims)?;
        let mut frames = events.frames;

        match tokio::time::timeout(FIRST_FRAME_TIMEOUT, frames.changed()).await {
            Ok(Ok(())) => {}
            _ => {
                reader.abort();
                return Err(MediaError::CameraUnavailable(format!(
                    "{} produced no frames",
                    self.device.display()
                )));
            }
        }

        info!("Camera {} is live at {}", self.device.display(), self.dims);
        Ok(Box::new(FfmpegCameraStream {
            child: Some(child),
            frames,
            reader: Some(reader),
        }))
    }
}

pub struct FfmpegCameraStream {
    child: Option<Child>,
    frames: watch::Receiver<Option<Frame>>,
    reader: Option<JoinHandle<()>>,
}

impl CameraStream for FfmpegCameraStream {
    fn snapshot(&self) -> Result<RgbaImage, MediaError> {
        if self.child.is_none() {
            return Err(MediaError::CameraUnavailable("stream stopped".to_string()));
        }

        let frame = self.frames.borrow().clone();
        frame
            .map(|frame| frame.as_ref().clone())
            .ok_or_else(|| MediaError::CameraUnavailable("no frame yet".to_string()))
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    fn is_live(&self) -> bool {
        self.child.is_some()
    }
}

impl Drop for FfmpegCameraStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_camera_is_unavailable() {
        let result = NoCamera.open().await;
        assert!(matches!(result, Err(MediaError::CameraUnavailable(_))));
    }

    #[tokio::test]
    async fn test_missing_device_is_unavailable() {
        let camera = FfmpegCamera::new("/nonexistent/video99", Dimensions::new(640, 480));
        let err = camera.open().await.err().unwrap();
        assert!(err.is_camera_refusal());
    }

    #[tokio::test]
    async fn test_file_capture_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        tokio::fs::write(&path, [1, 2, 3]).await.unwrap();

        let capture = FileCapture::new(Some(path));
        let file = capture.capture().await.unwrap().unwrap();
        assert_eq!(file.filename, "shot.png");
        assert_eq!(file.mime, "image/png");
        assert_eq!(file.data, vec![1, 2, 3]);

        assert!(FileCapture::new(None).capture().await.unwrap().is_none());
    }
}
