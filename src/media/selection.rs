//! Pending media picked for a post: previews, carousel cursor and camera capture.

use super::camera::{Camera, CameraStream, NativeCapture};
use super::error::MediaError;
use super::preview::{PreviewHandle, PreviewRegistry};
use super::resize::encode_jpeg_frame;
use super::types::{MediaFile, MediaKind};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Minimum horizontal travel, in logical pixels, for a swipe to navigate.
pub const SWIPE_THRESHOLD: f32 = 50.0;

const CAPTURE_QUALITY: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    None,
    Images,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwipeDirection {
    Next,
    Previous,
}

/// Maps a horizontal gesture to a carousel step. Leftward travel (negative
/// delta) advances, rightward goes back.
pub fn swipe_direction(delta_x: f32) -> Option<SwipeDirection> {
    if delta_x.abs() < SWIPE_THRESHOLD {
        None
    } else if delta_x < 0.0 {
        Some(SwipeDirection::Next)
    } else {
        Some(SwipeDirection::Previous)
    }
}

#[derive(Debug)]
pub struct MediaItem {
    pub file: MediaFile,
    pub preview: PreviewHandle,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraStart {
    /// A live stream is held; call [`MediaSelection::capture_photo`].
    Live,
    /// The native capture flow ran instead.
    Fallback { captured: bool },
}

pub struct MediaSelection {
    items: Vec<MediaItem>,
    current: usize,
    mode: SelectionMode,
    previews: Arc<dyn PreviewRegistry>,
    camera: Arc<dyn Camera>,
    native: Arc<dyn NativeCapture>,
    prefer_native: bool,
    stream: Option<Box<dyn CameraStream>>,
}

impl MediaSelection {
    pub fn new(
        previews: Arc<dyn PreviewRegistry>,
        camera: Arc<dyn Camera>,
        native: Arc<dyn NativeCapture>,
    ) -> Self {
        Self {
            items: Vec::new(),
            current: 0,
            mode: SelectionMode::None,
            previews,
            camera,
            native,
            prefer_native: false,
            stream: None,
        }
    }

    /// Skip the live camera and go straight to native capture.
    pub fn with_native_preference(mut self, prefer_native: bool) -> Self {
        self.prefer_native = prefer_native;
        self
    }

    pub fn items(&self) -> &[MediaItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_item(&self) -> Option<&MediaItem> {
        self.items.get(self.current)
    }

    pub fn is_camera_active(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.is_live())
    }

    fn push(&mut self, file: MediaFile, kind: MediaKind) {
        let preview = self.previews.create(&file);
        self.items.push(MediaItem {
            file,
            preview,
            kind,
        });
    }

    fn discard_all(&mut self) {
        for item in self.items.drain(..) {
            self.previews.revoke(item.preview);
        }
        self.current = 0;
        self.mode = SelectionMode::None;
    }

    /// Adds picked files. Returns how many were kept.
    ///
    /// A video replaces everything, including images picked in the same
    /// call; only the first video is kept. Images accumulate, replacing a
    /// selected video.
    pub fn add_files<I>(&mut self, files: I) -> usize
    where
        I: IntoIterator<Item = MediaFile>,
    {
        let mut images = Vec::new();
        let mut video = None;

        for file in files {
            match file.kind() {
                Some(MediaKind::Video) if video.is_none() => video = Some(file),
                Some(MediaKind::Video) => {
                    warn!("Only one video per post, ignoring {}", file.filename)
                }
                Some(MediaKind::Image) => images.push(file),
                None => warn!(
                    "Ignoring {} with unsupported type {}",
                    file.filename, file.mime
                ),
            }
        }

        if let Some(video) = video {
            if !images.is_empty() {
                debug!("Dropping {} images picked alongside a video", images.len());
            }
            self.discard_all();
            self.push(video, MediaKind::Video);
            self.mode = SelectionMode::Video;
            return 1;
        }

        if images.is_empty() {
            return 0;
        }

        if self.mode == SelectionMode::Video {
            self.discard_all();
        }

        let added = images.len();
        for image in images {
            self.push(image, MediaKind::Image);
        }
        self.mode = SelectionMode::Images;
        added
    }

    /// Removes one item and releases its preview.
    pub fn remove_at(&mut self, index: usize) -> Option<MediaFile> {
        if index >= self.items.len() {
            return None;
        }

        let item = self.items.remove(index);
        self.previews.revoke(item.preview);

        if self.items.is_empty() {
            self.current = 0;
            self.mode = SelectionMode::None;
        } else if self.current >= self.items.len() {
            self.current = self.items.len() - 1;
        }

        Some(item.file)
    }

    /// Drops every item and stops the camera.
    pub fn clear(&mut self) {
        self.discard_all();
        self.stop_camera();
    }

    /// Hands the pending files to the caller for upload.
    pub fn take_files(&mut self) -> Vec<MediaFile> {
        let files = self
            .items
            .drain(..)
            .map(|item| {
                self.previews.revoke(item.preview);
                item.file
            })
            .collect();
        self.current = 0;
        self.mode = SelectionMode::None;
        self.stop_camera();
        files
    }

    pub fn next(&mut self) {
        if !self.items.is_empty() {
            self.current = (self.current + 1) % self.items.len();
        }
    }

    pub fn prev(&mut self) {
        if !self.items.is_empty() {
            self.current = self
                .current
                .checked_sub(1)
                .unwrap_or(self.items.len() - 1);
        }
    }

    pub fn go_to(&mut self, index: usize) -> bool {
        if index < self.items.len() {
            self.current = index;
            true
        } else {
            false
        }
    }

    pub fn swipe(&mut self, delta_x: f32) -> Option<SwipeDirection> {
        let direction = swipe_direction(delta_x)?;
        match direction {
            SwipeDirection::Next => self.next(),
            SwipeDirection::Previous => self.prev(),
        }
        Some(direction)
    }

    /// Acquires the camera, falling back to native capture when the live
    /// stream is refused or unavailable.
    pub async fn start_camera(&mut self) -> Result<CameraStart, MediaError> {
        self.stop_camera();

        if !self.prefer_native {
            let camera = self.camera.clone();
            match camera.open().await {
                Ok(stream) => {
                    info!("Camera stream started");
                    self.stream = Some(stream);
                    return Ok(CameraStart::Live);
                }
                Err(e) if e.is_camera_refusal() => {
                    info!("Camera refused ({}), falling back to native capture", e);
                }
                Err(e) => {
                    warn!("Camera failed ({}), falling back to native capture", e);
                }
            }
        }

        let native = self.native.clone();
        let captured = match native.capture().await? {
            Some(file) => self.add_files([file]) > 0,
            None => false,
        };

        Ok(CameraStart::Fallback { captured })
    }

    /// Snapshots the live stream into a JPEG image item and releases the camera.
    /// Returns `false` when no stream is active.
    pub fn capture_photo(&mut self) -> Result<bool, MediaError> {
        let Some(stream) = self.stream.as_ref() else {
            return Ok(false);
        };

        let frame = stream.snapshot()?;
        let data = encode_jpeg_frame(&frame, CAPTURE_QUALITY)?;
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        let file = MediaFile::new(format!("camera-capture-{}.jpg", millis), "image/jpeg", data);
        self.add_files([file]);
        self.stop_camera();
        Ok(true)
    }

    pub fn stop_camera(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            debug!("Camera stream stopped");
        }
    }
}

impl Drop for MediaSelection {
    fn drop(&mut self) {
        self.discard_all();
        self.stop_camera();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::camera::NoCamera;
    use crate::media::preview::PreviewTracker;
    use async_trait::async_trait;
    use image::{Rgba, RgbaImage};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct DeniedCamera;

    #[async_trait]
    impl Camera for DeniedCamera {
        async fn open(&self) -> Result<Box<dyn CameraStream>, MediaError> {
            Err(MediaError::PermissionDenied)
        }
    }

    struct LiveCamera {
        opened: AtomicUsize,
        stopped: Arc<AtomicUsize>,
    }

    struct LiveStream {
        live: bool,
        stopped: Arc<AtomicUsize>,
    }

    impl CameraStream for LiveStream {
        fn snapshot(&self) -> Result<RgbaImage, MediaError> {
            Ok(RgbaImage::from_pixel(8, 6, Rgba([10, 20, 30, 255])))
        }

        fn stop(&mut self) {
            if self.live {
                self.live = false;
                self.stopped.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn is_live(&self) -> bool {
            self.live
        }
    }

    #[async_trait]
    impl Camera for LiveCamera {
        async fn open(&self) -> Result<Box<dyn CameraStream>, MediaError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(LiveStream {
                live: true,
                stopped: self.stopped.clone(),
            }))
        }
    }

    #[derive(Default)]
    struct PickerCapture {
        called: AtomicBool,
    }

    #[async_trait]
    impl NativeCapture for PickerCapture {
        async fn capture(&self) -> Result<Option<MediaFile>, MediaError> {
            self.called.store(true, Ordering::SeqCst);
            Ok(Some(image("picked.jpg")))
        }
    }

    fn image(name: &str) -> MediaFile {
        MediaFile::new(name, "image/jpeg", vec![1, 2, 3])
    }

    fn video(name: &str) -> MediaFile {
        MediaFile::new(name, "video/mp4", vec![4, 5, 6])
    }

    fn selection_with(
        camera: Arc<dyn Camera>,
        native: Arc<dyn NativeCapture>,
    ) -> (MediaSelection, Arc<PreviewTracker>) {
        let previews = Arc::new(PreviewTracker::new());
        let selection = MediaSelection::new(previews.clone(), camera, native);
        (selection, previews)
    }

    fn selection() -> (MediaSelection, Arc<PreviewTracker>) {
        selection_with(Arc::new(NoCamera), Arc::new(PickerCapture::default()))
    }

    #[test]
    fn test_images_accumulate_across_calls() {
        let (mut selection, previews) = selection();
        assert_eq!(selection.add_files([image("a.jpg"), image("b.jpg")]), 2);
        assert_eq!(selection.add_files([image("c.jpg")]), 1);

        assert_eq!(selection.len(), 3);
        assert_eq!(selection.mode(), SelectionMode::Images);
        assert_eq!(previews.live_count(), 3);
    }

    #[test]
    fn test_video_replaces_images() {
        let (mut selection, previews) = selection();
        selection.add_files([image("a.jpg"), image("b.jpg")]);
        selection.add_files([video("clip.mp4")]);

        assert_eq!(selection.len(), 1);
        assert_eq!(selection.mode(), SelectionMode::Video);
        assert_eq!(selection.items()[0].kind, MediaKind::Video);
        assert_eq!(previews.live_count(), 1);
    }

    #[test]
    fn test_images_replace_video() {
        let (mut selection, previews) = selection();
        selection.add_files([video("clip.mp4")]);
        selection.add_files([image("a.jpg"), image("b.jpg")]);

        assert_eq!(selection.len(), 2);
        assert_eq!(selection.mode(), SelectionMode::Images);
        assert!(selection.items().iter().all(|i| i.kind == MediaKind::Image));
        assert_eq!(previews.live_count(), 2);
    }

    #[test]
    fn test_only_first_video_is_kept() {
        let (mut selection, _) = selection();
        selection.add_files([image("a.jpg"), video("one.mp4"), video("two.mp4")]);

        assert_eq!(selection.len(), 1);
        assert_eq!(selection.items()[0].file.filename, "one.mp4");
    }

    #[test]
    fn test_unsupported_files_are_skipped() {
        let (mut selection, previews) = selection();
        let added = selection.add_files([MediaFile::new("notes.pdf", "application/pdf", vec![])]);

        assert_eq!(added, 0);
        assert!(selection.is_empty());
        assert_eq!(selection.mode(), SelectionMode::None);
        assert_eq!(previews.live_count(), 0);
    }

    #[test]
    fn test_remove_last_moves_cursor_back() {
        let (mut selection, previews) = selection();
        selection.add_files([image("a.jpg"), image("b.jpg"), image("c.jpg")]);
        assert!(selection.go_to(2));

        let removed = selection.remove_at(2).unwrap();
        assert_eq!(removed.filename, "c.jpg");
        assert_eq!(selection.current_index(), 1);
        assert_eq!(previews.live_count(), 2);
    }

    #[test]
    fn test_remove_sole_item_resets_mode() {
        let (mut selection, previews) = selection();
        selection.add_files([image("a.jpg")]);

        assert!(selection.remove_at(0).is_some());
        assert!(selection.is_empty());
        assert_eq!(selection.mode(), SelectionMode::None);
        assert_eq!(selection.current_index(), 0);
        assert_eq!(previews.live_count(), 0);
    }

    #[test]
    fn test_remove_out_of_range_is_ignored() {
        let (mut selection, previews) = selection();
        selection.add_files([image("a.jpg")]);

        assert!(selection.remove_at(3).is_none());
        assert_eq!(selection.len(), 1);
        assert_eq!(previews.live_count(), 1);
    }

    #[test]
    fn test_clear_and_take_release_previews() {
        let (mut selection, previews) = selection();
        selection.add_files([image("a.jpg"), image("b.jpg")]);
        selection.clear();
        assert_eq!(previews.live_count(), 0);

        selection.add_files([image("c.jpg")]);
        let files = selection.take_files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "c.jpg");
        assert_eq!(previews.live_count(), 0);
        assert_eq!(selection.mode(), SelectionMode::None);
    }

    #[test]
    fn test_drop_releases_previews() {
        let (mut selection, previews) = selection();
        selection.add_files([image("a.jpg"), image("b.jpg")]);
        drop(selection);
        assert_eq!(previews.live_count(), 0);
    }

    #[test]
    fn test_carousel_wraps() {
        let (mut selection, _) = selection();
        selection.add_files([image("a.jpg"), image("b.jpg"), image("c.jpg")]);

        selection.prev();
        assert_eq!(selection.current_index(), 2);
        selection.next();
        assert_eq!(selection.current_index(), 0);
        assert!(!selection.go_to(3));
        assert_eq!(selection.current_index(), 0);
    }

    #[test]
    fn test_swipe_threshold() {
        let (mut selection, _) = selection();
        selection.add_files([image("a.jpg"), image("b.jpg"), image("c.jpg")]);

        assert_eq!(selection.swipe(-40.0), None);
        assert_eq!(selection.current_index(), 0);

        assert_eq!(selection.swipe(-60.0), Some(SwipeDirection::Next));
        assert_eq!(selection.current_index(), 1);

        assert_eq!(selection.swipe(60.0), Some(SwipeDirection::Previous));
        assert_eq!(selection.current_index(), 0);
    }

    #[tokio::test]
    async fn test_denied_camera_falls_back_to_native_capture() {
        let native = Arc::new(PickerCapture::default());
        let (mut selection, _) = selection_with(Arc::new(DeniedCamera), native.clone());

        let start = selection.start_camera().await.unwrap();

        assert_eq!(start, CameraStart::Fallback { captured: true });
        assert!(native.called.load(Ordering::SeqCst));
        assert_eq!(selection.len(), 1);
        assert_eq!(selection.items()[0].file.filename, "picked.jpg");
    }

    #[tokio::test]
    async fn test_native_preference_skips_camera() {
        let camera = Arc::new(LiveCamera {
            opened: AtomicUsize::new(0),
            stopped: Arc::new(AtomicUsize::new(0)),
        });
        let native = Arc::new(PickerCapture::default());
        let (selection, _) = selection_with(camera.clone(), native.clone());
        let mut selection = selection.with_native_preference(true);

        let start = selection.start_camera().await.unwrap();
        assert_eq!(start, CameraStart::Fallback { captured: true });
        assert_eq!(camera.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_capture_photo_appends_jpeg_and_stops_stream() {
        let stopped = Arc::new(AtomicUsize::new(0));
        let camera = Arc::new(LiveCamera {
            opened: AtomicUsize::new(0),
            stopped: stopped.clone(),
        });
        let (mut selection, previews) =
            selection_with(camera, Arc::new(PickerCapture::default()));

        assert_eq!(selection.start_camera().await.unwrap(), CameraStart::Live);
        assert!(selection.is_camera_active());

        assert!(selection.capture_photo().unwrap());
        assert!(!selection.is_camera_active());
        assert_eq!(stopped.load(Ordering::SeqCst), 1);

        let item = &selection.items()[0];
        assert_eq!(item.file.mime, "image/jpeg");
        assert!(item.file.filename.starts_with("camera-capture-"));
        assert_eq!(previews.live_count(), 1);

        assert!(!selection.capture_photo().unwrap());
    }

    #[tokio::test]
    async fn test_restarting_camera_stops_previous_stream() {
        let stopped = Arc::new(AtomicUsize::new(0));
        let camera = Arc::new(LiveCamera {
            opened: AtomicUsize::new(0),
            stopped: stopped.clone(),
        });
        let (mut selection, _) = selection_with(camera.clone(), Arc::new(PickerCapture::default()));

        selection.start_camera().await.unwrap();
        selection.start_camera().await.unwrap();

        assert_eq!(camera.opened.load(Ordering::SeqCst), 2);
        assert_eq!(stopped.load(Ordering::SeqCst), 1);

        drop(selection);
        assert_eq!(stopped.load(Ordering::SeqCst), 2);
    }
}
