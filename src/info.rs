#![forbid(unsafe_code)]

//! Metadata lookups through `yt-dlp --dump-json`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::MediaError,
    format::{format_duration, format_filesize, format_views, truncate_chars, upload_date_to_iso},
    platform::Platform,
    tool::YtDlp,
};

pub const INFO_TIMEOUT: Duration = Duration::from_secs(60);

const DESCRIPTION_MAX_CHARS: usize = 500;

/// Canonical resolution ladder, highest first.
pub const QUALITY_LADDER: [u32; 9] = [4320, 2160, 1440, 1080, 720, 480, 360, 240, 144];

const DEFAULT_BITRATE_KBPS: u64 = 5_000;

/// The subset of the yt-dlp JSON dump we read. Every field is optional
/// because extractors differ wildly in what they fill in.
#[derive(Debug, Default, Deserialize)]
struct RawInfo {
    id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    duration: Option<f64>,
    view_count: Option<u64>,
    thumbnail: Option<String>,
    uploader: Option<String>,
    upload_date: Option<String>,
    extractor: Option<String>,
    webpage_url: Option<String>,
    is_live: Option<bool>,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    height: Option<f64>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    pub description: String,
    pub duration: String,
    pub duration_seconds: f64,
    pub views: String,
    pub view_count: u64,
    pub thumbnail: String,
    pub uploader: String,
    pub upload_date: String,
    pub upload_date_iso: Option<String>,
    pub available_qualities: Vec<String>,
    pub max_quality: String,
    pub estimated_size: String,
    pub estimated_size_bytes: u64,
    pub size_is_estimate: bool,
    pub platform: String,
    pub url: String,
    pub is_live: bool,
}

/// Runs the metadata lookup with the default timeout.
pub async fn fetch_info(tool: &YtDlp, url: &str) -> Result<VideoInfo, MediaError> {
    fetch_info_with_timeout(tool, url, INFO_TIMEOUT).await
}

pub async fn fetch_info_with_timeout(
    tool: &YtDlp,
    url: &str,
    limit: Duration,
) -> Result<VideoInfo, MediaError> {
    debug!(url, "fetching media info");
    let output = match tokio::time::timeout(limit, tool.info_command(url).output()).await {
        Ok(result) => result?,
        Err(_) => {
            warn!(url, ?limit, "info lookup timed out");
            return Err(MediaError::Timeout);
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MediaError::from_stderr(&stderr, "Failed to fetch video info"));
    }

    parse_info(&output.stdout, url)
}

/// Parses a JSON dump into the API shape.
pub fn parse_info(payload: &[u8], request_url: &str) -> Result<VideoInfo, MediaError> {
    let raw: RawInfo = serde_json::from_slice(payload).map_err(MediaError::MalformedResponse)?;
    Ok(normalize(raw, request_url))
}

fn normalize(raw: RawInfo, request_url: &str) -> VideoInfo {
    let heights: Vec<u32> = raw
        .formats
        .iter()
        .filter_map(|format| format.height)
        .filter(|height| height.is_finite() && *height > 0.0)
        .map(|height| height as u32)
        .collect();
    let available_qualities = available_qualities(&heights);
    let max_quality = available_qualities
        .first()
        .cloned()
        .unwrap_or_else(|| "best".to_string());

    let duration_seconds = raw.duration.filter(|d| d.is_finite() && *d > 0.0).unwrap_or(0.0);
    let estimated_size_bytes = estimate_size_bytes(duration_seconds, &max_quality);
    let view_count = raw.view_count.unwrap_or(0);
    let upload_date = raw.upload_date.unwrap_or_default();
    let platform = raw
        .extractor
        .filter(|extractor| !extractor.trim().is_empty())
        .unwrap_or_else(|| Platform::detect(request_url).as_str().to_string());

    VideoInfo {
        id: raw.id.unwrap_or_else(|| "unknown".to_string()),
        title: raw.title.unwrap_or_else(|| "Untitled".to_string()),
        description: truncate_chars(&raw.description.unwrap_or_default(), DESCRIPTION_MAX_CHARS),
        duration: format_duration(duration_seconds),
        duration_seconds,
        views: format_views(view_count),
        view_count,
        thumbnail: raw.thumbnail.unwrap_or_default(),
        uploader: raw.uploader.unwrap_or_else(|| "Unknown".to_string()),
        upload_date_iso: upload_date_to_iso(&upload_date),
        upload_date,
        available_qualities,
        max_quality,
        estimated_size: format_filesize(estimated_size_bytes),
        estimated_size_bytes,
        size_is_estimate: true,
        platform,
        url: raw.webpage_url.unwrap_or_default(),
        is_live: raw.is_live.unwrap_or(false),
    }
}

/// Ladder rungs present among `heights`, highest first; `["best"]` when no
/// height lands on a rung.
pub fn available_qualities(heights: &[u32]) -> Vec<String> {
    let sorted: Vec<String> = QUALITY_LADDER
        .iter()
        .filter(|rung| heights.contains(rung))
        .map(u32::to_string)
        .collect();
    if sorted.is_empty() {
        vec!["best".to_string()]
    } else {
        sorted
    }
}

/// Rough bitrate for a quality label, in kbps.
pub fn bitrate_kbps(quality: &str) -> u64 {
    match quality {
        "4320" => 100_000,
        "2160" => 45_000,
        "1440" => 16_000,
        "1080" => 8_000,
        "720" => 5_000,
        "480" => 2_500,
        "360" => 1_000,
        _ => DEFAULT_BITRATE_KBPS,
    }
}

pub fn estimate_size_bytes(duration_seconds: f64, quality: &str) -> u64 {
    (duration_seconds * bitrate_kbps(quality) as f64 * 1000.0 / 8.0) as u64
}
