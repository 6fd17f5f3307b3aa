use serde::Serialize;

/// A container/codec pair a recorder can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutputFormat {
    pub mime: &'static str,
    pub extension: &'static str,
    /// ffmpeg encoder name
    pub encoder: &'static str,
    /// ffmpeg muxer name
    pub muxer: &'static str,
}

pub const WEBM_VP9: OutputFormat = OutputFormat {
    mime: "video/webm;codecs=vp9",
    extension: "webm",
    encoder: "libvpx-vp9",
    muxer: "webm",
};

pub const WEBM_VP8: OutputFormat = OutputFormat {
    mime: "video/webm;codecs=vp8",
    extension: "webm",
    encoder: "libvpx",
    muxer: "webm",
};

pub const WEBM: OutputFormat = OutputFormat {
    mime: "video/webm",
    extension: "webm",
    encoder: "libvpx",
    muxer: "webm",
};

pub const MP4: OutputFormat = OutputFormat {
    mime: "video/mp4",
    extension: "mp4",
    encoder: "libx264",
    muxer: "mp4",
};

/// Formats in the order they are tried.
pub const PREFERRED_FORMATS: [OutputFormat; 4] = [WEBM_VP9, WEBM_VP8, WEBM, MP4];

/// Used when nothing in the preference list reports support.
pub const DEFAULT_FORMAT: OutputFormat = WEBM;

impl OutputFormat {
    /// MIME type without codec parameters, as stored with uploads.
    pub fn base_mime(&self) -> &'static str {
        match self.mime.split_once(';') {
            Some((base, _)) => base,
            None => self.mime,
        }
    }
}

/// Answers whether the encoder side can produce a given format.
pub trait EncoderCapabilities: Send + Sync {
    fn is_supported(&self, format: &OutputFormat) -> bool;
}

/// Returns the first supported format from `preferences`, or [`DEFAULT_FORMAT`].
pub fn negotiate<C>(caps: &C, preferences: &[OutputFormat]) -> OutputFormat
where
    C: EncoderCapabilities + ?Sized,
{
    preferences
        .iter()
        .find(|format| caps.is_supported(format))
        .copied()
        .unwrap_or(DEFAULT_FORMAT)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Supports(Vec<&'static str>);

    impl EncoderCapabilities for Supports {
        fn is_supported(&self, format: &OutputFormat) -> bool {
            self.0.contains(&format.mime)
        }
    }

    #[test]
    fn test_negotiate_prefers_first_supported() {
        let caps = Supports(vec!["video/mp4", "video/webm;codecs=vp8"]);
        assert_eq!(negotiate(&caps, &PREFERRED_FORMATS), WEBM_VP8);

        let caps = Supports(vec!["video/mp4"]);
        assert_eq!(negotiate(&caps, &PREFERRED_FORMATS), MP4);
    }

    #[test]
    fn test_negotiate_falls_back_to_default() {
        let caps = Supports(vec![]);
        assert_eq!(negotiate(&caps, &PREFERRED_FORMATS), DEFAULT_FORMAT);
    }

    #[test]
    fn test_base_mime() {
        assert_eq!(WEBM_VP9.base_mime(), "video/webm");
        assert_eq!(MP4.base_mime(), "video/mp4");
    }
}
