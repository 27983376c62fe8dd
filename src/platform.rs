#![forbid(unsafe_code)]

//! Recognizes which platform a pasted URL belongs to and pulls out the media
//! identifier where the URL shape allows it.

use regex::Regex;
use std::sync::LazyLock;

static YOUTUBE_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:youtube\.com/watch\?(?:.*&)?v=|youtu\.be/)([a-zA-Z0-9_-]{11})",
        r"youtube\.com/shorts/([a-zA-Z0-9_-]{11})",
        r"youtube\.com/embed/([a-zA-Z0-9_-]{11})",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid youtube pattern"))
    .collect()
});

static INSTAGRAM_SHORTCODE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"instagram\.com/p/([a-zA-Z0-9_-]+)",
        r"instagram\.com/reel/([a-zA-Z0-9_-]+)",
        r"instagram\.com/tv/([a-zA-Z0-9_-]+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid instagram pattern"))
    .collect()
});

static FACEBOOK_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"facebook\.com/.*/videos/(\d+)",
        r"facebook\.com/watch/?\?v=(\d+)",
        r"facebook\.com/reel/(\d+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid facebook pattern"))
    .collect()
});

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    Youtube,
    Instagram,
    Facebook,
    Whatsapp,
    Other,
}

impl Platform {
    /// Host-based detection. Anything unrecognized is `Other`; yt-dlp still
    /// gets a chance to handle it.
    pub fn detect(url: &str) -> Self {
        let lower = url.trim().to_ascii_lowercase();
        let host = host_of(&lower);
        if host_matches(host, &["youtube.com", "youtu.be"]) {
            Self::Youtube
        } else if host_matches(host, &["instagram.com"]) {
            Self::Instagram
        } else if host_matches(host, &["facebook.com", "fb.watch"]) {
            Self::Facebook
        } else if host_matches(host, &["whatsapp.com", "whatsapp.net"]) {
            Self::Whatsapp
        } else {
            Self::Other
        }
    }

    /// Accepts the client's platform hint (`"youtube"`, `"instagram"`, ...).
    pub fn from_hint(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "youtube" => Some(Self::Youtube),
            "instagram" => Some(Self::Instagram),
            "facebook" => Some(Self::Facebook),
            "whatsapp" => Some(Self::Whatsapp),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Instagram => "instagram",
            Self::Facebook => "facebook",
            Self::Whatsapp => "whatsapp",
            Self::Other => "unknown",
        }
    }

    /// Extracts the platform-specific media id when the URL carries one.
    pub fn media_id(self, url: &str) -> Option<String> {
        let patterns: &[Regex] = match self {
            Self::Youtube => YOUTUBE_ID_PATTERNS.as_slice(),
            Self::Instagram => INSTAGRAM_SHORTCODE_PATTERNS.as_slice(),
            Self::Facebook => FACEBOOK_ID_PATTERNS.as_slice(),
            Self::Whatsapp | Self::Other => return None,
        };
        patterns
            .iter()
            .find_map(|pattern| pattern.captures(url))
            .map(|caps| caps[1].to_string())
    }
}

fn host_of(url: &str) -> &str {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(without_scheme);
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    host.split(':').next().unwrap_or(host)
}

fn host_matches(host: &str, domains: &[&str]) -> bool {
    domains
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
}
