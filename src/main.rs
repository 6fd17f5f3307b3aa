use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use kleo::backend::{CloudStorage, IdentityToolkit, RealtimeDatabase, SessionContext};
use kleo::config::{Config, FirebaseConfig};
use kleo::feed::{PaginatedFeed, StoreEnricher, StoreFeedSource};
use kleo::media::{
    compress_image_async, CameraStart, Dimensions, FfmpegCamera, FfmpegEngine, FileCapture,
    MediaFile, MediaSelection, PreviewTracker, VideoTranscoder,
};
use kleo::post::PostComposer;
use kleo::profile::{NewProfile, ProfileService};
use kleo::share::{format_post_for_sharing, post_link, ShareAction, ShareTarget};
use kleo::utils::{format_megabytes, format_number};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Downscale and re-encode an image
    CompressImage {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Use the profile picture bounds instead of the post image bounds
        #[arg(long)]
        avatar: bool,
    },
    /// Re-encode a video to fit the configured limits
    Transcode {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Take a photo with the camera
    Capture {
        #[arg(short, long, default_value = "capture.jpg")]
        output: PathBuf,
        /// Image to use when the camera is refused or missing
        #[arg(long)]
        fallback: Option<PathBuf>,
    },
    /// Print the newest posts
    Feed {
        #[arg(long, default_value_t = 1)]
        pages: usize,
        /// Only posts by this user
        #[arg(long)]
        author: Option<String>,
    },
    /// Publish a post as the configured account
    Post {
        #[arg(short, long, default_value = "")]
        content: String,
        media: Vec<PathBuf>,
    },
    /// Show the configured account's profile, optionally replacing its images
    Profile {
        #[arg(long)]
        avatar: Option<PathBuf>,
        #[arg(long)]
        banner: Option<PathBuf>,
    },
    /// Print the share link of a post
    Share {
        post_id: String,
        user_id: String,
        #[arg(long, value_enum)]
        target: Option<ShareTarget>,
        #[arg(long, default_value = "")]
        text: String,
    },
}

fn get_config_path(args: &Args) -> Option<String> {
    if let Some(path) = &args.config {
        return Some(path.clone());
    }

    if let Ok(path) = std::env::var("KLEO_CONFIG") {
        return Some(path);
    }

    if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
        let config_path = format!("{}/kleo/config.toml", xdg_config_home);
        if Path::new(&config_path).exists() {
            return Some(config_path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        let config_path = format!("{}/.config/kleo/config.toml", home.display());
        if Path::new(&config_path).exists() {
            return Some(config_path);
        }
    }

    None
}

async fn read_media(path: &Path) -> Result<MediaFile> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| anyhow!("{} has no file name", path.display()))?;
    Ok(MediaFile::from_filename(filename, data))
}

fn output_next_to(input: &Path, filename: &str) -> PathBuf {
    input.with_file_name(filename)
}

async fn compress_image_command(
    config: &Config,
    input: &Path,
    output: Option<PathBuf>,
    avatar: bool,
) -> Result<()> {
    let file = read_media(input).await?;
    let target = if avatar {
        config.media.avatar
    } else {
        config.media.image
    };

    let compressed = compress_image_async(file.clone(), target).await?;
    let output =
        output.unwrap_or_else(|| output_next_to(input, &format!("compressed-{}", file.filename)));
    tokio::fs::write(&output, &compressed.data)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "{} ({}) -> {} ({})",
        input.display(),
        format_megabytes(file.size()),
        output.display(),
        format_megabytes(compressed.size())
    );
    Ok(())
}

async fn build_transcoder(config: &Config) -> Result<VideoTranscoder> {
    let engine = FfmpegEngine::detect().await?;
    Ok(VideoTranscoder::new(Arc::new(engine), config.media.video.target)
        .with_probe_timeout(config.media.video.probe_timeout())
        .with_fps(config.media.video.fps))
}

async fn transcode_command(config: &Config, input: &Path, output: Option<PathBuf>) -> Result<()> {
    if !FfmpegEngine::test_availability().await {
        bail!("ffmpeg and ffprobe are required for transcoding");
    }

    let file = read_media(input).await?;
    let transcoder = build_transcoder(config).await?;

    let mut states = transcoder.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            info!("Transcoder is {:?}", state);
        }
    });

    let abort = CancellationToken::new();
    let on_ctrl_c = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping the recording");
            on_ctrl_c.cancel();
        }
    });

    let result = transcoder.transcode_with_abort(&file, abort).await?;
    let output = output.unwrap_or_else(|| {
        if result.filename == file.filename {
            output_next_to(input, &format!("transcoded-{}", result.filename))
        } else {
            output_next_to(input, &result.filename)
        }
    });
    tokio::fs::write(&output, &result.data)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "{} ({}) -> {} ({}, {})",
        input.display(),
        format_megabytes(file.size()),
        output.display(),
        format_megabytes(result.size()),
        result.mime
    );
    Ok(())
}

async fn capture_command(config: &Config, output: &Path, fallback: Option<PathBuf>) -> Result<()> {
    let camera = FfmpegCamera::new(
        config.camera.device.clone(),
        Dimensions::new(config.camera.width, config.camera.height),
    );
    let mut selection = MediaSelection::new(
        Arc::new(PreviewTracker::new()),
        Arc::new(camera),
        Arc::new(FileCapture::new(fallback)),
    )
    .with_native_preference(config.camera.prefer_native);

    match selection.start_camera().await? {
        CameraStart::Live => {
            if !selection.capture_photo()? {
                bail!("Camera stream ended before the photo was taken");
            }
        }
        CameraStart::Fallback { captured: false } => {
            bail!("Camera unavailable and no fallback image given");
        }
        CameraStart::Fallback { captured: true } => {
            info!("Used the fallback image instead of the camera");
        }
    }

    let photo = selection
        .take_files()
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Nothing was captured"))?;
    tokio::fs::write(output, &photo.data)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "Saved {} ({})",
        output.display(),
        format_megabytes(photo.size())
    );
    Ok(())
}

struct Firebase {
    database: Arc<RealtimeDatabase>,
    storage: Arc<CloudStorage>,
    identity: IdentityToolkit,
}

impl Firebase {
    fn connect(config: &FirebaseConfig) -> Result<Self> {
        let database_url = config
            .database_url
            .as_deref()
            .ok_or_else(|| anyhow!("firebase.database_url is not configured"))?;
        let bucket = config
            .storage_bucket
            .as_deref()
            .ok_or_else(|| anyhow!("firebase.storage_bucket is not configured"))?;
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("firebase.api_key is not configured"))?;

        Ok(Self {
            database: Arc::new(RealtimeDatabase::new(database_url)?),
            storage: Arc::new(CloudStorage::new(bucket)?),
            identity: IdentityToolkit::new(api_key)?,
        })
    }

    async fn sign_in(&self, config: &FirebaseConfig, session: &SessionContext) -> Result<()> {
        let (Some(email), Some(password)) = (&config.email, &config.password) else {
            debug!("No account configured, staying anonymous");
            return Ok(());
        };

        let signed_in = session.sign_in(&self.identity, email, password).await?;
        self.database.set_auth(signed_in.id_token.clone());
        self.storage.set_auth(signed_in.id_token);
        Ok(())
    }
}

async fn feed_command(config: &Config, pages: usize, author: Option<String>) -> Result<()> {
    let firebase = Firebase::connect(&config.firebase)?;
    let session = SessionContext::new();
    firebase.sign_in(&config.firebase, &session).await?;

    let source = match &author {
        Some(user_id) => {
            StoreFeedSource::for_author(firebase.database.clone(), user_id, config.feed.page_size)
        }
        None => StoreFeedSource::new(firebase.database.clone(), config.feed.page_size),
    };
    let feed = PaginatedFeed::new(
        Arc::new(source),
        Arc::new(StoreEnricher::new(firebase.database.clone())),
        session.user_id(),
    );

    for _ in 0..pages {
        feed.load_next().await?;
        if feed.end_reached() {
            break;
        }
    }
    feed.settle().await;

    for entry in feed.entries() {
        let media = match (&entry.post.video_url, entry.post.image_urls.len()) {
            (Some(_), _) => " [video]".to_string(),
            (None, 0) => String::new(),
            (None, n) => format!(" [{} images]", n),
        };
        println!(
            "{} ({} likes{}){}: {}",
            entry.author.name,
            format_number(entry.post.like_count),
            if entry.liked { ", liked" } else { "" },
            media,
            entry.post.content
        );
    }

    if feed.end_reached() {
        println!("-- end of feed --");
    }
    Ok(())
}

async fn post_command(config: &Config, content: &str, media: &[PathBuf]) -> Result<()> {
    let firebase = Firebase::connect(&config.firebase)?;
    let session = SessionContext::new();
    firebase.sign_in(&config.firebase, &session).await?;
    let signed_in = session
        .current()
        .ok_or_else(|| anyhow!("firebase.email and firebase.password are needed to post"))?;

    let mut files = Vec::with_capacity(media.len());
    for path in media {
        files.push(read_media(path).await?);
    }

    let mut composer = PostComposer::new(firebase.database.clone(), firebase.storage.clone())
        .with_image_target(config.media.image);
    match build_transcoder(config).await {
        Ok(transcoder) => composer = composer.with_transcoder(Arc::new(transcoder)),
        Err(e) => warn!("Videos will be uploaded as-is: {}", e),
    }

    let post = composer.create_post(&signed_in, content, files).await?;
    let link = post_link(&config.share.base_url, &post.id, &post.user_id)?;
    println!("Posted {}: {}", post.id, link);
    Ok(())
}

async fn profile_command(
    config: &Config,
    avatar: Option<PathBuf>,
    banner: Option<PathBuf>,
) -> Result<()> {
    let firebase = Firebase::connect(&config.firebase)?;
    let session = SessionContext::new();
    firebase.sign_in(&config.firebase, &session).await?;
    let signed_in = session
        .current()
        .ok_or_else(|| anyhow!("firebase.email and firebase.password are needed for a profile"))?;

    let profiles = ProfileService::new(firebase.database.clone(), firebase.storage.clone())
        .with_targets(config.media.avatar, config.media.banner);

    if !session.refresh_profile_status(firebase.database.as_ref()).await? {
        let name = signed_in
            .display_name
            .clone()
            .unwrap_or_else(|| signed_in.user_id.clone());
        profiles
            .create_profile(
                &signed_in.user_id,
                NewProfile {
                    name,
                    ..Default::default()
                },
            )
            .await?;
    }

    if let Some(path) = avatar {
        let url = profiles
            .upload_avatar(&signed_in.user_id, read_media(&path).await?)
            .await?;
        info!("Uploaded profile picture to {}", url);
    }
    if let Some(path) = banner {
        let url = profiles
            .upload_banner(&signed_in.user_id, read_media(&path).await?)
            .await?;
        info!("Uploaded banner to {}", url);
    }

    let profile = profiles
        .get_profile(&signed_in.user_id)
        .await?
        .ok_or_else(|| anyhow!("Profile of {} is missing", signed_in.user_id))?;
    println!("{}", profile.name);
    if !profile.bio.is_empty() {
        println!("{}", profile.bio);
    }
    if !profile.profile_image_url.is_empty() {
        println!("Picture: {}", profile.profile_image_url);
    }
    if let Some(banner) = &profile.banner_image_url {
        println!("Banner: {}", banner);
    }
    Ok(())
}

fn share_command(
    config: &Config,
    post_id: &str,
    user_id: &str,
    target: Option<ShareTarget>,
    text: &str,
) -> Result<()> {
    let link = post_link(&config.share.base_url, post_id, user_id)?;

    let Some(target) = target else {
        println!("{}", format_post_for_sharing(text, None, Some(link.as_str())));
        return Ok(());
    };

    match target.action(link.as_str(), text)? {
        ShareAction::Open(url) => println!("Open: {}", url),
        ShareAction::CopyToClipboard(text) => println!("Copy:\n{}", text),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let config = match get_config_path(&args) {
        Some(config_path) => Config::from_file(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path))?,
        None => Config::default(),
    };

    if config.get_logging_format() == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    info!("Starting Kleo...");
    match get_config_path(&args) {
        Some(config_path) => info!("Loaded config from: {}", config_path),
        None => info!("No config file found, using defaults"),
    }

    match args.command {
        Command::CompressImage {
            input,
            output,
            avatar,
        } => compress_image_command(&config, &input, output, avatar).await,
        Command::Transcode { input, output } => transcode_command(&config, &input, output).await,
        Command::Capture { output, fallback } => capture_command(&config, &output, fallback).await,
        Command::Feed { pages, author } => feed_command(&config, pages, author).await,
        Command::Post { content, media } => post_command(&config, &content, &media).await,
        Command::Profile { avatar, banner } => profile_command(&config, avatar, banner).await,
        Command::Share {
            post_id,
            user_id,
            target,
            text,
        } => share_command(&config, &post_id, &user_id, target, &text),
    }
}
