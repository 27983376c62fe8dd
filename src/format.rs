#![forbid(unsafe_code)]

//! Human-readable renderings used by the API payloads.

use chrono::NaiveDate;

const FILENAME_MAX_CHARS: usize = 200;

/// Renders durations as `H:MM:SS` or `M:SS` for short clips. Missing or zero
/// durations render as `00:00`.
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "00:00".to_string();
    }
    let total = seconds as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

/// `1.2M`, `3.4K` or the plain number; `N/A` when unknown.
pub fn format_views(views: u64) -> String {
    if views == 0 {
        return "N/A".to_string();
    }
    if views >= 1_000_000 {
        format!("{:.1}M", views as f64 / 1_000_000.0)
    } else if views >= 1_000 {
        format!("{:.1}K", views as f64 / 1_000.0)
    } else {
        views.to_string()
    }
}

/// Binary units with one decimal, e.g. `572.2 MB`.
pub fn format_filesize(bytes: u64) -> String {
    if bytes == 0 {
        return "Unknown".to_string();
    }
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}

/// Replaces characters that are invalid in filenames on common platforms and
/// caps the length.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(FILENAME_MAX_CHARS)
        .collect()
}

/// Cuts `value` to at most `max` characters without splitting a code point.
pub fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

/// Converts yt-dlp's `YYYYMMDD` upload date format into an ISO-8601 date.
pub fn upload_date_to_iso(value: &str) -> Option<String> {
    if value.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .ok()
        .map(|date| date.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(format_duration(0.0), "00:00");
        assert_eq!(format_duration(-3.0), "00:00");
        assert_eq!(format_duration(59.9), "0:59");
        assert_eq!(format_duration(600.0), "10:00");
        assert_eq!(format_duration(3725.0), "1:02:05");
    }

    #[test]
    fn views() {
        assert_eq!(format_views(0), "N/A");
        assert_eq!(format_views(999), "999");
        assert_eq!(format_views(1_500), "1.5K");
        assert_eq!(format_views(2_340_000), "2.3M");
    }

    #[test]
    fn filesizes() {
        assert_eq!(format_filesize(0), "Unknown");
        assert_eq!(format_filesize(512), "512.0 B");
        assert_eq!(format_filesize(2048), "2.0 KB");
        assert_eq!(format_filesize(600_000_000), "572.2 MB");
        assert_eq!(format_filesize(5 * 1024 * 1024 * 1024 * 1024), "5.0 TB");
    }

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(
            sanitize_filename("a<b>c:d\"e/f\\g|h?i*j"),
            "a_b_c_d_e_f_g_h_i_j"
        );
        assert_eq!(sanitize_filename(&"x".repeat(300)).chars().count(), 200);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 500), "short");
    }

    #[test]
    fn upload_dates() {
        assert_eq!(upload_date_to_iso("20240131").as_deref(), Some("2024-01-31"));
        assert_eq!(upload_date_to_iso("20241341"), None);
        assert_eq!(upload_date_to_iso(""), None);
    }
}
