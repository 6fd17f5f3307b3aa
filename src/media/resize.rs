use super::error::MediaError;
use super::types::{Dimensions, ImageTarget, MediaFile};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;
use tracing::{debug, info};

fn detect_format(file: &MediaFile) -> Result<ImageFormat, MediaError> {
    if let Some(format) = ImageFormat::from_mime_type(&file.mime) {
        return Ok(format);
    }

    image::guess_format(&file.data)
        .map_err(|e| MediaError::Decode(format!("{}: {}", file.filename, e)))
}

/// Encodes `image` in `format`, applying `quality` where the format has one.
pub fn encode_image(
    image: &DynamicImage,
    format: ImageFormat,
    quality: u8,
) -> Result<Vec<u8>, MediaError> {
    let mut buffer = Vec::new();

    match format {
        ImageFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
            rgb.write_with_encoder(encoder)
                .map_err(|e| MediaError::Encode(e.to_string()))?;
        }
        _ => {
            image
                .write_to(&mut Cursor::new(&mut buffer), format)
                .map_err(|e| MediaError::Encode(e.to_string()))?;
        }
    }

    if buffer.is_empty() {
        return Err(MediaError::Encode(format!(
            "{:?} encoder produced no output",
            format
        )));
    }

    Ok(buffer)
}

/// Encodes a captured RGBA frame as a JPEG still.
pub fn encode_jpeg_frame(frame: &RgbaImage, quality: f32) -> Result<Vec<u8>, MediaError> {
    let quality = ImageTarget {
        quality,
        ..ImageTarget::default()
    }
    .jpeg_quality();
    encode_image(
        &DynamicImage::ImageRgba8(frame.clone()),
        ImageFormat::Jpeg,
        quality,
    )
}

/// Downscales an image to fit `target` and re-encodes it in its own format.
///
/// Images already within bounds keep their dimensions but are still
/// re-encoded at the target quality, so the byte size may change either way.
pub fn compress_image(file: &MediaFile, target: &ImageTarget) -> Result<MediaFile, MediaError> {
    let format = detect_format(file)?;
    let image = image::load_from_memory_with_format(&file.data, format)
        .map_err(|e| MediaError::Decode(format!("{}: {}", file.filename, e)))?;

    let current = Dimensions::new(image.width(), image.height());
    let next = current.fit_within(target.max_width, target.max_height);

    let image = if next == current {
        debug!("Image {} ({}) is within bounds", file.filename, current);
        image
    } else {
        image.resize_exact(next.width, next.height, FilterType::Triangle)
    };

    let data = encode_image(&image, format, target.jpeg_quality())?;

    info!(
        "Compressed {} from {} ({:.2} MB) to {} ({:.2} MB)",
        file.filename,
        current,
        file.size_mb(),
        next,
        data.len() as f64 / (1024.0 * 1024.0)
    );

    let mime = if file.mime.starts_with("image/") {
        file.mime.clone()
    } else {
        format.to_mime_type().to_string()
    };

    Ok(MediaFile {
        filename: file.filename.clone(),
        mime,
        data,
    })
}

/// Runs [`compress_image`] on the blocking pool.
pub async fn compress_image_async(
    file: MediaFile,
    target: ImageTarget,
) -> Result<MediaFile, MediaError> {
    tokio::task::spawn_blocking(move || compress_image(&file, &target))
        .await
        .map_err(|e| MediaError::Process(format!("compression task failed: {}", e)))?
}
