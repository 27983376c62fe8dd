#![forbid(unsafe_code)]

//! Error taxonomy shared by the info fetcher, the download executor and the
//! HTTP layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("yt-dlp not found. Please install it: pip install yt-dlp")]
    ToolNotFound,

    #[error("This content is private or unavailable.")]
    PrivateOrUnavailable,

    #[error("Request timed out. Please try again.")]
    Timeout,

    #[error("Invalid response from server.")]
    MalformedResponse(#[source] serde_json::Error),

    #[error("{0}")]
    SubprocessFailure(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Maps a failed run's stderr to the taxonomy. Anything that is not
    /// recognized is surfaced verbatim, or as `fallback` when stderr is empty.
    pub fn from_stderr(stderr: &str, fallback: &str) -> Self {
        if stderr.contains("Private video") || stderr.to_lowercase().contains("private") {
            return Self::PrivateOrUnavailable;
        }
        let trimmed = stderr.trim();
        if trimmed.is_empty() {
            Self::SubprocessFailure(fallback.to_string())
        } else {
            Self::SubprocessFailure(trimmed.to_string())
        }
    }

    /// True for failures caused by the request or the remote content rather
    /// than by this service.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::ToolNotFound | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_video_is_classified() {
        let err = MediaError::from_stderr(
            "ERROR: [youtube] abc: Private video. Sign in if you've been granted access",
            "Failed",
        );
        assert!(matches!(err, MediaError::PrivateOrUnavailable));
        assert_eq!(err.to_string(), "This content is private or unavailable.");
    }

    #[test]
    fn lowercase_private_is_classified() {
        let err = MediaError::from_stderr("ERROR: this account is private", "Failed");
        assert!(matches!(err, MediaError::PrivateOrUnavailable));
    }

    #[test]
    fn unknown_stderr_is_surfaced_raw() {
        let err = MediaError::from_stderr("ERROR: Unsupported URL: https://x\n", "Failed");
        assert_eq!(err.to_string(), "ERROR: Unsupported URL: https://x");
    }

    #[test]
    fn empty_stderr_uses_fallback() {
        let err = MediaError::from_stderr("  \n", "Failed to fetch video info");
        assert_eq!(err.to_string(), "Failed to fetch video info");
    }

    #[test]
    fn tool_missing_is_not_a_client_error() {
        assert!(!MediaError::ToolNotFound.is_client_error());
        assert!(MediaError::Timeout.is_client_error());
    }
}
