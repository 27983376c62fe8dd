#![forbid(unsafe_code)]

//! Turns single lines of yt-dlp output into progress updates.
//!
//! Typical lines look like:
//!
//! ```text
//! [download] Destination: /tmp/mediagrab_downloads/Clip_1a2b3c4d.f137.mp4
//! [download]  45.3% of ~ 310.04MiB at  374.36KiB/s ETA 11:59 (frag 56/454)
//! [Merger] Merging formats into "/tmp/mediagrab_downloads/Clip_1a2b3c4d.mp4"
//! ```
//!
//! Nothing in here touches the filesystem or the job store; callers decide
//! what to do with the returned [`LineUpdate`].

use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

/// Progress is pinned here once merging starts because yt-dlp stops printing
/// percentages during the ffmpeg phase.
pub const MERGE_PROGRESS_FLOOR: f64 = 95.0;

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+\.?\d*)%").expect("valid percent regex"));
static SPEED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"at\s+~?\s*([\d.]+\s*\w+/s)").expect("valid speed regex"));
static ETA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ETA\s+(\d+:\d+(?::\d+)?)").expect("valid eta regex"));
static DESTINATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Destination:\s+(.+)$").expect("valid destination regex"));
static ALREADY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[download\]\s+(.+?)\s+has already been downloaded")
        .expect("valid already-downloaded regex")
});
static MERGE_TARGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"Merging formats into\s+"(.+)"\s*$"#).expect("valid merge target regex")
});

/// Everything one line told us. Fields that the line did not mention stay
/// `None`/`false` so they never overwrite earlier observations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineUpdate {
    pub percent: Option<f64>,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub destination: Option<PathBuf>,
    pub merging: bool,
}

impl LineUpdate {
    fn is_empty(&self) -> bool {
        self.percent.is_none()
            && self.speed.is_none()
            && self.eta.is_none()
            && self.destination.is_none()
            && !self.merging
    }
}

/// Parses one line. Returns `None` when the line carries nothing we track.
pub fn parse_line(line: &str) -> Option<LineUpdate> {
    let line = line.trim();
    let mut update = LineUpdate::default();

    if line.starts_with("[download]") {
        if let Some(dest) = DESTINATION_RE.captures(line) {
            update.destination = Some(PathBuf::from(dest[1].trim()));
        } else if let Some(done) = ALREADY_RE.captures(line) {
            update.destination = Some(PathBuf::from(done[1].trim()));
            update.percent = Some(100.0);
        } else {
            update.percent = PERCENT_RE
                .captures(line)
                .and_then(|caps| caps[1].parse::<f64>().ok())
                .map(|value| value.clamp(0.0, 100.0));
            update.speed = SPEED_RE
                .captures(line)
                .map(|caps| caps[1].replace(' ', ""));
            update.eta = ETA_RE.captures(line).map(|caps| caps[1].to_string());
        }
    } else if line.starts_with("[Merger]") || line.contains("Merging formats into") {
        update.merging = true;
        if let Some(target) = MERGE_TARGET_RE.captures(line) {
            update.destination = Some(PathBuf::from(&target[1]));
        }
    }

    if update.is_empty() { None } else { Some(update) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrelated_lines_produce_nothing() {
        for line in [
            "",
            "   ",
            "[youtube] Extracting URL: https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "[youtube] dQw4w9WgXcQ: Downloading webpage",
            "[info] dQw4w9WgXcQ: Downloading 1 format(s): 137+140",
            "Deleting original file /tmp/x.f137.mp4 (pass -k to keep)",
            "100% sure this is not a progress line",
        ] {
            assert_eq!(parse_line(line), None, "line: {line:?}");
        }
    }

    #[test]
    fn progress_line_yields_percent_speed_and_eta() {
        let update = parse_line(
            "[download]  45.3% of ~ 310.04MiB at  374.36KiB/s ETA 11:59 (frag 56/454)",
        )
        .unwrap();
        assert_eq!(update.percent, Some(45.3));
        assert_eq!(update.speed.as_deref(), Some("374.36KiB/s"));
        assert_eq!(update.eta.as_deref(), Some("11:59"));
        assert!(update.destination.is_none());
        assert!(!update.merging);
    }

    #[test]
    fn hour_long_eta_is_kept_whole() {
        let update =
            parse_line("[download]   1.0% of 2.00GiB at 1.00MiB/s ETA 1:02:03").unwrap();
        assert_eq!(update.eta.as_deref(), Some("1:02:03"));
    }

    #[test]
    fn final_progress_line_without_eta() {
        let update = parse_line("[download] 100% of   12.34MiB in 00:00:03 at 3.80MiB/s").unwrap();
        assert_eq!(update.percent, Some(100.0));
        assert_eq!(update.speed.as_deref(), Some("3.80MiB/s"));
        assert!(update.eta.is_none());
    }

    #[test]
    fn unknown_speed_is_skipped() {
        let update =
            parse_line("[download]   0.0% of  123.00MiB at Unknown B/s ETA Unknown").unwrap();
        assert_eq!(update.percent, Some(0.0));
        assert!(update.speed.is_none());
        assert!(update.eta.is_none());
    }

    #[test]
    fn destination_line_yields_path() {
        let update = parse_line(
            "[download] Destination: /tmp/mediagrab_downloads/My Clip 50%_1a2b3c4d.f137.mp4",
        )
        .unwrap();
        assert_eq!(
            update.destination,
            Some(PathBuf::from(
                "/tmp/mediagrab_downloads/My Clip 50%_1a2b3c4d.f137.mp4"
            ))
        );
        assert!(update.percent.is_none());
    }

    #[test]
    fn already_downloaded_line_counts_as_destination() {
        let update =
            parse_line("[download] /tmp/d/Clip_1a2b3c4d.mp4 has already been downloaded")
                .unwrap();
        assert_eq!(
            update.destination,
            Some(PathBuf::from("/tmp/d/Clip_1a2b3c4d.mp4"))
        );
        assert_eq!(update.percent, Some(100.0));
    }

    #[test]
    fn merger_line_marks_merging_and_captures_target() {
        let update =
            parse_line(r#"[Merger] Merging formats into "/tmp/d/Clip_1a2b3c4d.mp4""#).unwrap();
        assert!(update.merging);
        assert!(update.percent.is_none());
        assert_eq!(
            update.destination,
            Some(PathBuf::from("/tmp/d/Clip_1a2b3c4d.mp4"))
        );
    }

    #[test]
    fn merger_prefix_without_target_still_marks_merging() {
        let update = parse_line("[Merger] Merging video and audio").unwrap();
        assert!(update.merging);
        assert!(update.destination.is_none());
    }

    #[test]
    fn titles_mentioning_merging_are_not_merge_markers() {
        let update = parse_line(
            "[download] Destination: /tmp/d/Merging Lanes Tutorial_ab12cd34.f137.mp4",
        )
        .unwrap();
        assert!(!update.merging);
        assert_eq!(
            update.destination,
            Some(PathBuf::from("/tmp/d/Merging Lanes Tutorial_ab12cd34.f137.mp4"))
        );

        let update = parse_line(
            "[download]  12.0% of 8.00MiB at 1.00MiB/s ETA 00:07 Merging Lanes Tutorial",
        )
        .unwrap();
        assert!(!update.merging);
        assert_eq!(update.percent, Some(12.0));

        assert_eq!(parse_line("[youtube] Merging Lanes Tutorial: Downloading webpage"), None);
    }
}
