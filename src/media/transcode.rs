//! Video transcoding through a playback-driven record loop.
//!
//! The source is played back muted, a fixed-rate pump copies the current
//! frame onto an offscreen [`Canvas`] and the canvas is fed into a streaming
//! encoder. Recording starts when playback starts and stops when it ends.
//! Small enough inputs skip all of that and pass through untouched.

use super::canvas::Canvas;
use super::codec::{negotiate, EncoderCapabilities, OutputFormat, PREFERRED_FORMATS};
use super::error::MediaError;
use super::types::{Dimensions, MediaFile, VideoTarget};
use async_trait::async_trait;
use image::RgbaImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_FPS: u32 = 30;

pub type Frame = Arc<RgbaImage>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoMetadata {
    pub dimensions: Dimensions,
    pub duration_secs: Option<f64>,
}

/// Signals produced by a playing source.
pub struct PlaybackEvents {
    /// Latest decoded frame, replaced as playback advances.
    pub frames: watch::Receiver<Option<Frame>>,
    /// Resolves once playback reached the end, or failed.
    pub finished: oneshot::Receiver<Result<(), MediaError>>,
}

/// A loaded video source, the equivalent of a media element.
#[async_trait]
pub trait Playback: Send {
    /// Starts muted playback.
    async fn play(&mut self) -> Result<PlaybackEvents, MediaError>;

    fn pause(&mut self);

    /// Drops the media source. Must be safe to call more than once.
    fn release(&mut self);

    fn has_source(&self) -> bool;
}

/// A recorder fed with canvas frames.
#[async_trait]
pub trait StreamEncoder: Send {
    fn start(&mut self) -> Result<(), MediaError>;

    async fn write_frame(&mut self, frame: &RgbaImage) -> Result<(), MediaError>;

    /// Stops recording and hands back every chunk produced so far.
    /// Stopping an encoder that never started yields no chunks.
    async fn stop(&mut self) -> Result<Vec<Vec<u8>>, MediaError>;
}

/// Decoder/encoder backend the transcoder drives.
#[async_trait]
pub trait VideoEngine: EncoderCapabilities {
    async fn probe(&self, file: &MediaFile) -> Result<VideoMetadata, MediaError>;

    /// Loads `file` for playback, decoding at `output` dimensions.
    async fn open(
        &self,
        file: &MediaFile,
        output: Dimensions,
    ) -> Result<Box<dyn Playback>, MediaError>;

    fn create_encoder(
        &self,
        format: OutputFormat,
        output: Dimensions,
        bitrate_bps: u64,
        fps: u32,
    ) -> Result<Box<dyn StreamEncoder>, MediaError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeState {
    Idle,
    MetadataProbing,
    Passthrough,
    Recording,
    Done,
    Failed,
}

/// Runs on one transcoder are serialized, so the published state always
/// belongs to a single run.
pub struct VideoTranscoder {
    engine: Arc<dyn VideoEngine>,
    target: VideoTarget,
    probe_timeout: Duration,
    fps: u32,
    state: watch::Sender<TranscodeState>,
    running: Mutex<()>,
}

impl VideoTranscoder {
    pub fn new(engine: Arc<dyn VideoEngine>, target: VideoTarget) -> Self {
        let (state, _) = watch::channel(TranscodeState::Idle);
        Self {
            engine,
            target,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            fps: DEFAULT_FPS,
            state,
            running: Mutex::new(()),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    pub fn target(&self) -> &VideoTarget {
        &self.target
    }

    pub fn state(&self) -> TranscodeState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<TranscodeState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: TranscodeState) {
        debug!("Transcoder state: {:?}", state);
        self.state.send_replace(state);
    }

    pub async fn transcode(&self, file: &MediaFile) -> Result<MediaFile, MediaError> {
        self.transcode_with_abort(file, CancellationToken::new())
            .await
    }

    /// Transcodes `file`, falling back to the untouched input on any failure.
    pub async fn transcode_or_original(&self, file: &MediaFile) -> MediaFile {
        match self.transcode(file).await {
            Ok(output) => output,
            Err(e) => {
                warn!(
                    "Video compression failed for {}, using original file: {}",
                    file.filename, e
                );
                file.clone()
            }
        }
    }

    pub async fn transcode_with_abort(
        &self,
        file: &MediaFile,
        abort: CancellationToken,
    ) -> Result<MediaFile, MediaError> {
        let _running = tokio::select! {
            _ = abort.cancelled() => return Err(MediaError::Aborted),
            guard = self.running.lock() => guard,
        };
        self.set_state(TranscodeState::MetadataProbing);

        let probed = tokio::select! {
            _ = abort.cancelled() => {
                self.set_state(TranscodeState::Failed);
                return Err(MediaError::Aborted);
            }
            probed = tokio::time::timeout(self.probe_timeout, self.engine.probe(file)) => probed,
        };

        let metadata = match probed {
            Ok(Ok(metadata)) => metadata,
            Ok(Err(e)) => {
                warn!(
                    "Failed to load video metadata for {}, using original file: {}",
                    file.filename, e
                );
                return Ok(self.passthrough(file));
            }
            Err(_) => {
                warn!(
                    "Video metadata load timed out after {:?} for {}, using original file",
                    self.probe_timeout, file.filename
                );
                return Ok(self.passthrough(file));
            }
        };

        if !self.target.needs_reencode(file.size(), metadata.dimensions) {
            debug!(
                "Video {} ({}, {:.2} MB) is within limits",
                file.filename,
                metadata.dimensions,
                file.size_mb()
            );
            return Ok(self.passthrough(file));
        }

        self.set_state(TranscodeState::Recording);
        match self.record(file, metadata, &abort).await {
            Ok(output) => {
                self.set_state(TranscodeState::Done);
                Ok(output)
            }
            Err(e) => {
                self.set_state(TranscodeState::Failed);
                Err(e)
            }
        }
    }

    fn passthrough(&self, file: &MediaFile) -> MediaFile {
        self.set_state(TranscodeState::Passthrough);
        self.set_state(TranscodeState::Done);
        file.clone()
    }

    async fn record(
        &self,
        file: &MediaFile,
        metadata: VideoMetadata,
        abort: &CancellationToken,
    ) -> Result<MediaFile, MediaError> {
        let output = metadata
            .dimensions
            .fit_within(self.target.max_width, self.target.max_height);

        info!(
            "Transcoding {} ({}, {:.2} MB) to {} at {} kbps",
            file.filename,
            metadata.dimensions,
            file.size_mb(),
            output,
            self.target.max_bitrate_bps / 1000
        );

        let mut playback = self.engine.open(file, output).await?;

        let format = negotiate(self.engine.as_ref(), &PREFERRED_FORMATS);
        let mut encoder = match self.engine.create_encoder(
            format,
            output,
            self.target.max_bitrate_bps,
            self.fps,
        ) {
            Ok(encoder) => encoder,
            Err(e) => {
                playback.pause();
                playback.release();
                return Err(MediaError::UnsupportedCodec(format!("{}: {}", format.mime, e)));
            }
        };

        let pumped = self
            .pump(playback.as_mut(), encoder.as_mut(), output, abort)
            .await;

        // Every exit path stops the encoder and releases the source.
        let stopped = encoder.stop().await;
        playback.pause();
        playback.release();

        let frames = pumped?;
        let chunks = stopped?;

        if chunks.is_empty() {
            return Err(MediaError::EmptyRecording);
        }

        let data = chunks.concat();
        info!(
            "Transcoded {} from {:.2} MB to {:.2} MB ({} frames, {})",
            file.filename,
            file.size_mb(),
            data.len() as f64 / (1024.0 * 1024.0),
            frames,
            format.mime
        );

        Ok(MediaFile {
            filename: file.with_extension(format.extension),
            mime: format.base_mime().to_string(),
            data,
        })
    }

    /// Draws frames until playback ends. Returns the number of frames drawn.
    async fn pump(
        &self,
        playback: &mut dyn Playback,
        encoder: &mut dyn StreamEncoder,
        output: Dimensions,
        abort: &CancellationToken,
    ) -> Result<u64, MediaError> {
        let mut events = tokio::select! {
            _ = abort.cancelled() => return Err(MediaError::Aborted),
            events = playback.play() => events?,
        };

        encoder.start()?;

        let mut canvas = Canvas::new(output);
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / self.fps as f64));
        // Frames are dropped under load rather than drawn late
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut drawn = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    info!("Transcode aborted after {} frames", drawn);
                    return Err(MediaError::Aborted);
                }
                finished = &mut events.finished => {
                    return match finished {
                        Ok(Err(e)) => Err(e),
                        // a dropped sender means the source went away: treat as ended
                        Ok(Ok(())) | Err(_) => Ok(drawn),
                    };
                }
                _ = ticker.tick() => {
                    let frame = events.frames.borrow().clone();
                    if let Some(frame) = frame {
                        canvas.draw(&frame);
                        tokio::select! {
                            _ = abort.cancelled() => {
                                info!("Transcode aborted while writing frame {}", drawn + 1);
                                return Err(MediaError::Aborted);
                            }
                            written = encoder.write_frame(canvas.pixels()) => written?,
                        }
                        drawn += 1;
                    }
                }
            }
        }
    }
}
