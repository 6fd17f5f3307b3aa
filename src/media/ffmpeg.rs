//! ffmpeg/ffprobe process backend for the transcoder and the camera.

use super::codec::{EncoderCapabilities, OutputFormat};
use super::error::MediaError;
use super::transcode::{Frame, Playback, PlaybackEvents, StreamEncoder, VideoEngine, VideoMetadata};
use super::types::{Dimensions, MediaFile};
use async_trait::async_trait;
use image::RgbaImage;
use serde::Deserialize;
use std::collections::HashSet;
use std::io::Write;
use std::process::Stdio;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_probe_output(json: &str) -> Result<VideoMetadata, MediaError> {
    let output: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| MediaError::Decode(format!("Failed to parse ffprobe output: {}", e)))?;

    let stream = output
        .streams
        .iter()
        .find(|s| s.width.is_some() && s.height.is_some())
        .ok_or_else(|| MediaError::Decode("No video stream found".to_string()))?;

    let duration_secs = output
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok());

    Ok(VideoMetadata {
        dimensions: Dimensions::new(stream.width.unwrap_or(0), stream.height.unwrap_or(0)),
        duration_secs,
    })
}

/// Pulls encoder names out of `ffmpeg -encoders` output.
fn parse_encoder_list(stdout: &str) -> HashSet<String> {
    stdout
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("------"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            flags.starts_with('V').then(|| name.to_string())
        })
        .collect()
}

fn write_temp_file(file: &MediaFile) -> Result<NamedTempFile, MediaError> {
    let suffix = file
        .filename
        .rsplit_once('.')
        .map(|(_, ext)| format!(".{}", ext))
        .unwrap_or_default();
    let mut temp = tempfile::Builder::new().suffix(&suffix).tempfile()?;
    temp.write_all(&file.data)?;
    temp.flush()?;
    Ok(temp)
}

/// Spawns a process emitting raw RGBA frames of `dims` on stdout and
/// republishes them as the latest-frame channel of a [`PlaybackEvents`].
pub(crate) fn spawn_rawvideo(
    command: &mut Command,
    dims: Dimensions,
) -> Result<(Child, PlaybackEvents, JoinHandle<()>), MediaError> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| MediaError::Process(format!("Failed to spawn ffmpeg: {}", e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| MediaError::Process("Failed to get ffmpeg stdout".to_string()))?;

    let (frame_tx, frames) = watch::channel(None);
    let (finished_tx, finished) = oneshot::channel();
    let reader = tokio::spawn(async move {
        let result = read_frames(stdout, dims, &frame_tx).await;
        let _ = finished_tx.send(result);
    });

    Ok((child, PlaybackEvents { frames, finished }, reader))
}

async fn read_frames<R: AsyncRead + Unpin>(
    source: R,
    dims: Dimensions,
    frames: &watch::Sender<Option<Frame>>,
) -> Result<(), MediaError> {
    let frame_len = dims.width as usize * dims.height as usize * 4;
    let mut reader = BufReader::new(source);
    let mut count = 0u64;

    loop {
        let mut buffer = vec![0u8; frame_len];
        match reader.read_exact(&mut buffer).await {
            Ok(_) => {
                let frame = RgbaImage::from_raw(dims.width, dims.height, buffer)
                    .ok_or_else(|| MediaError::Decode("Short raw video frame".to_string()))?;
                frames.send_replace(Some(Arc::new(frame)));
                count += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("Raw video stream ended after {} frames", count);
                return Ok(());
            }
            Err(e) => return Err(MediaError::Io(e)),
        }
    }
}

pub struct FfmpegEngine {
    encoders: HashSet<String>,
}

impl FfmpegEngine {
    /// Asks the local ffmpeg which video encoders it was built with.
    pub async fn detect() -> Result<Self, MediaError> {
        let output = Command::new("ffmpeg")
            .arg("-hide_banner")
            .arg("-encoders")
            .output()
            .await
            .map_err(|e| MediaError::Process(format!("ffmpeg not found: {}", e)))?;

        if !output.status.success() {
            return Err(MediaError::Process(format!(
                "Failed to list ffmpeg encoders: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let encoders = parse_encoder_list(&String::from_utf8_lossy(&output.stdout));
        info!("ffmpeg reports {} video encoders", encoders.len());
        Ok(Self { encoders })
    }

    pub fn with_encoders<I, S>(encoders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            encoders: encoders.into_iter().map(Into::into).collect(),
        }
    }

    pub async fn test_availability() -> bool {
        let mut available = true;
        for tool in ["ffmpeg", "ffprobe"] {
            match Command::new(tool).arg("-version").output().await {
                Ok(output) if output.status.success() => {
                    let version_line = String::from_utf8_lossy(&output.stdout)
                        .lines()
                        .next()
                        .unwrap_or("unknown")
                        .to_string();
                    info!("{} is available: {}", tool, version_line);
                }
                Ok(_) => {
                    warn!("{} command failed", tool);
                    available = false;
                }
                Err(e) => {
                    warn!("{} not found: {}", tool, e);
                    available = false;
                }
            }
        }
        available
    }
}

impl EncoderCapabilities for FfmpegEngine {
    fn is_supported(&self, format: &OutputFormat) -> bool {
        self.encoders.contains(format.encoder)
    }
}

#[async_trait]
impl VideoEngine for FfmpegEngine {
    async fn probe(&self, file: &MediaFile) -> Result<VideoMetadata, MediaError> {
        let input = write_temp_file(file)?;

        let output = Command::new("ffprobe")
            .arg("-v")
            .arg("error")
            .arg("-select_streams")
            .arg("v:0")
            .arg("-show_entries")
            .arg("stream=width,height:format=duration")
            .arg("-of")
            .arg("json")
            .arg(input.path())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(MediaError::Decode(format!(
                "Failed to probe video: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }

    async fn open(
        &self,
        file: &MediaFile,
        output: Dimensions,
    ) -> Result<Box<dyn Playback>, MediaError> {
        let source = write_temp_file(file)?;
        Ok(Box::new(FfmpegPlayback {
            source: Some(source),
            dims: output,
            child: None,
            reader: None,
        }))
    }

    fn create_encoder(
        &self,
        format: OutputFormat,
        output: Dimensions,
        bitrate_bps: u64,
        fps: u32,
    ) -> Result<Box<dyn StreamEncoder>, MediaError> {
        if !self.is_supported(&format) {
            return Err(MediaError::UnsupportedCodec(format.encoder.to_string()));
        }

        Ok(Box::new(FfmpegEncoder {
            format,
            dims: output,
            bitrate_bps,
            fps,
            child: None,
            stdin: None,
            collector: None,
        }))
    }
}

/// Realtime decode of a temp-file copy of the source.
pub struct FfmpegPlayback {
    source: Option<NamedTempFile>,
    dims: Dimensions,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
}

#[async_trait]
impl Playback for FfmpegPlayback {
    async fn play(&mut self) -> Result<PlaybackEvents, MediaError> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| MediaError::Decode("Playback source was released".to_string()))?;

        let mut command = Command::new("ffmpeg");
        command
            .arg("-loglevel")
            .arg("error")
            .arg("-re")
            .arg("-i")
            .arg(source.path())
            .arg("-an")
            .arg("-vf")
            .arg(format!("scale={}:{}", self.dims.width, self.dims.height))
            .arg("-pix_fmt")
            .arg("rgba")
            .arg("-f")
            .arg("rawvideo")
            .arg("pipe:1");

        let (child, events, reader) = spawn_rawvideo(&mut command, self.dims)?;
        self.child = Some(child);
        self.reader = Some(reader);
        debug!("Started playback at {}", self.dims);
        Ok(events)
    }

    fn pause(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    fn release(&mut self) {
        self.pause();
        self.child = None;
        self.source = None;
    }

    fn has_source(&self) -> bool {
        self.source.is_some()
    }
}

type Collected = (std::io::Result<Vec<Vec<u8>>>, String);

/// Records raw RGBA frames written to ffmpeg's stdin.
pub struct FfmpegEncoder {
    format: OutputFormat,
    dims: Dimensions,
    bitrate_bps: u64,
    fps: u32,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    collector: Option<JoinHandle<Collected>>,
}

impl FfmpegEncoder {
    fn command(&self) -> Command {
        let mut command = Command::new("ffmpeg");
        command
            .arg("-loglevel")
            .arg("error")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgba")
            .arg("-s")
            .arg(self.dims.to_string())
            .arg("-r")
            .arg(self.fps.to_string())
            .arg("-i")
            .arg("pipe:0")
            .arg("-an")
            // yuv420p needs even dimensions
            .arg("-vf")
            .arg("pad=ceil(iw/2)*2:ceil(ih/2)*2")
            .arg("-c:v")
            .arg(self.format.encoder)
            .arg("-b:v")
            .arg(format!("{}k", self.bitrate_bps / 1000))
            .arg("-pix_fmt")
            .arg("yuv420p");

        if self.format.muxer == "mp4" {
            command.arg("-movflags").arg("frag_keyframe+empty_moov");
        } else {
            command.arg("-deadline").arg("realtime");
        }

        command.arg("-f").arg(self.format.muxer).arg("pipe:1");
        command
    }
}

async fn collect_chunks<R: AsyncRead + Unpin>(mut source: R) -> std::io::Result<Vec<Vec<u8>>> {
    let mut chunks = Vec::new();
    loop {
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let read = source.read(&mut buffer).await?;
        if read == 0 {
            return Ok(chunks);
        }
        buffer.truncate(read);
        chunks.push(buffer);
    }
}

#[async_trait]
impl StreamEncoder for FfmpegEncoder {
    fn start(&mut self) -> Result<(), MediaError> {
        let mut child = self
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::UnsupportedCodec(format!("Failed to spawn ffmpeg: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::Process("Failed to get ffmpeg stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::Process("Failed to get ffmpeg stdout".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::Process("Failed to get ffmpeg stderr".to_string()))?;

        self.collector = Some(tokio::spawn(async move {
            let mut errors = String::new();
            let (chunks, _) = tokio::join!(
                collect_chunks(stdout),
                stderr.read_to_string(&mut errors)
            );
            (chunks, errors)
        }));
        self.stdin = Some(stdin);
        self.child = Some(child);

        info!(
            "Recording {} at {} with {}",
            self.format.mime, self.dims, self.format.encoder
        );
        Ok(())
    }

    async fn write_frame(&mut self, frame: &RgbaImage) -> Result<(), MediaError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::Process("Encoder is not recording".to_string()))?;

        stdin
            .write_all(frame.as_raw())
            .await
            .map_err(|e| MediaError::Process(format!("Failed to write frame to ffmpeg: {}", e)))
    }

    async fn stop(&mut self) -> Result<Vec<Vec<u8>>, MediaError> {
        // Closing stdin lets ffmpeg flush and exit
        drop(self.stdin.take());

        let Some(collector) = self.collector.take() else {
            return Ok(Vec::new());
        };

        let (chunks, errors) = collector
            .await
            .map_err(|e| MediaError::Process(format!("Failed to join encoder output: {}", e)))?;
        let chunks = chunks?;

        if let Some(mut child) = self.child.take() {
            let status = child.wait().await?;
            if !status.success() {
                warn!("ffmpeg encoder exited with {}: {}", status, errors.trim());
                if chunks.is_empty() {
                    return Err(MediaError::Process(errors));
                }
            }
        }

        Ok(chunks)
    }
}
