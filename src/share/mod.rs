//! Links, share text and per-network share actions for posts.

use anyhow::{Context, Result};
use clap::ValueEnum;
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShareTarget {
    Twitter,
    Facebook,
    Reddit,
    #[value(name = "whatsapp")]
    WhatsApp,
    Messenger,
    Telegram,
    Discord,
    Instagram,
}

/// What the UI should do to share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareAction {
    Open(Url),
    CopyToClipboard(String),
}

impl ShareTarget {
    pub fn action(self, post_url: &str, text: &str) -> Result<ShareAction> {
        let open = |base: &str, params: &[(&str, &str)]| -> Result<ShareAction> {
            let url = Url::parse_with_params(base, params)
                .with_context(|| format!("Failed to build share link for {:?}", self))?;
            Ok(ShareAction::Open(url))
        };

        match self {
            Self::Twitter => open(
                "https://twitter.com/intent/tweet",
                &[("text", text), ("url", post_url)],
            ),
            Self::Facebook => open(
                "https://www.facebook.com/sharer/sharer.php",
                &[("u", post_url)],
            ),
            Self::Reddit => open(
                "https://reddit.com/submit",
                &[("url", post_url), ("title", text)],
            ),
            Self::WhatsApp => {
                let message = format!("{} {}", text, post_url);
                open("https://wa.me/", &[("text", message.as_str())])
            }
            Self::Messenger => open(
                "https://www.facebook.com/dialog/send",
                &[("link", post_url)],
            ),
            Self::Telegram => open(
                "https://t.me/share/url",
                &[("url", post_url), ("text", text)],
            ),
            Self::Discord => Ok(ShareAction::CopyToClipboard(format!(
                "{}\n\n{}",
                text, post_url
            ))),
            Self::Instagram => Ok(ShareAction::CopyToClipboard(post_url.to_string())),
        }
    }
}

/// `{origin}/feed?post=..&user=..` for the origin of `base_url`.
pub fn post_link(base_url: &str, post_id: &str, user_id: &str) -> Result<Url> {
    let mut url =
        Url::parse(base_url).with_context(|| format!("Invalid share base URL: {}", base_url))?;
    url.set_path("feed");
    url.set_fragment(None);
    url.query_pairs_mut()
        .clear()
        .append_pair("post", post_id)
        .append_pair("user", user_id);
    Ok(url)
}

pub fn format_post_for_sharing(
    content: &str,
    user_name: Option<&str>,
    post_url: Option<&str>,
) -> String {
    let mut lines = Vec::new();

    if let Some(user_name) = user_name {
        lines.push(format!("Check out this post by {}:", user_name));
        lines.push(String::new());
    }

    lines.push(content.to_string());

    if let Some(post_url) = post_url {
        lines.push(String::new());
        lines.push(format!("View on Kleo: {}", post_url));
    }

    lines.join("\n")
}

/// Title, text and link as one block for the clipboard.
pub fn clipboard_text(title: Option<&str>, text: &str, url: Option<&str>) -> String {
    [title, Some(text), url]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

static HASHTAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#[A-Za-z0-9_]+").expect("valid hashtag regex"));

/// `#word` tokens in order of appearance, `#` included.
pub fn extract_hashtags(content: &str) -> Vec<&str> {
    HASHTAG.find_iter(content).map(|m| m.as_str()).collect()
}

pub fn content_without_hashtags(content: &str) -> String {
    HASHTAG.replace_all(content, "").trim().to_string()
}

pub fn hashtags_string(content: &str) -> String {
    extract_hashtags(content).join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_link_uses_origin() {
        let url = post_link("https://kleo.app/some/page?x=1#top", "p 1", "u1").unwrap();
        assert_eq!(url.as_str(), "https://kleo.app/feed?post=p+1&user=u1");
    }

    #[test]
    fn test_format_post_for_sharing() {
        assert_eq!(format_post_for_sharing("hi", None, None), "hi");
        assert_eq!(
            format_post_for_sharing("hi", Some("Ana"), Some("https://kleo.app/feed")),
            "Check out this post by Ana:\n\nhi\n\nView on Kleo: https://kleo.app/feed"
        );
    }

    #[test]
    fn test_share_urls_are_encoded() {
        let action = ShareTarget::Twitter
            .action("https://kleo.app/feed?post=1&user=2", "a & b")
            .unwrap();
        let ShareAction::Open(url) = action else {
            panic!("expected a link");
        };
        assert_eq!(
            url.as_str(),
            "https://twitter.com/intent/tweet?text=a+%26+b&url=https%3A%2F%2Fkleo.app%2Ffeed%3Fpost%3D1%26user%3D2"
        );

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[1].1, "https://kleo.app/feed?post=1&user=2");
    }

    #[test]
    fn test_whatsapp_joins_text_and_url() {
        let ShareAction::Open(url) = ShareTarget::WhatsApp.action("https://k/p", "look").unwrap()
        else {
            panic!("expected a link");
        };
        assert_eq!(url.as_str(), "https://wa.me/?text=look+https%3A%2F%2Fk%2Fp");
    }

    #[test]
    fn test_clipboard_targets() {
        assert_eq!(
            ShareTarget::Discord.action("https://k/p", "look").unwrap(),
            ShareAction::CopyToClipboard("look\n\nhttps://k/p".to_string())
        );
        assert_eq!(
            ShareTarget::Instagram.action("https://k/p", "look").unwrap(),
            ShareAction::CopyToClipboard("https://k/p".to_string())
        );
    }

    #[test]
    fn test_clipboard_text_skips_missing_parts() {
        assert_eq!(clipboard_text(None, "text", Some("url")), "text\n\nurl");
        assert_eq!(clipboard_text(Some("T"), "text", None), "T\n\ntext");
    }

    #[test]
    fn test_hashtags() {
        let content = "Sunset at the lake #nofilter #summer_2024 # not-a-tag#inline";
        assert_eq!(
            extract_hashtags(content),
            vec!["#nofilter", "#summer_2024", "#inline"]
        );
        assert_eq!(
            hashtags_string(content),
            "#nofilter #summer_2024 #inline"
        );
        assert_eq!(
            content_without_hashtags("#hello world #x"),
            "world"
        );
        assert_eq!(extract_hashtags("#café #1"), vec!["#caf", "#1"]);
    }
}
