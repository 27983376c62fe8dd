#![forbid(unsafe_code)]

//! Locating yt-dlp/ffmpeg and building yt-dlp command lines.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use tokio::process::Command;
use tracing::debug;

use crate::error::MediaError;

/// Probed in order when no explicit path is configured.
pub const TOOL_CANDIDATES: &[&str] = &[
    "yt-dlp",
    "yt-dlp.exe",
    "/usr/local/bin/yt-dlp",
    "/usr/bin/yt-dlp",
];

pub const MUXER_PROGRAM: &str = "ffmpeg";

/// Upper bound for a single `--version` / `-version` probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Requested upper bound for the video height.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quality {
    Best,
    MaxHeight(u32),
}

impl Quality {
    /// Purely numeric values cap the height; everything else means best.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
            value.parse().map(Self::MaxHeight).unwrap_or(Self::Best)
        } else {
            Self::Best
        }
    }

    /// `-f` selector plus the optional merge flag.
    pub fn format_args(self, include_audio: bool, always_merge: bool) -> Vec<String> {
        let selector = match (self, include_audio) {
            (Self::MaxHeight(h), true) => {
                format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]")
            }
            (Self::MaxHeight(h), false) => format!("bestvideo[height<={h}]/best[height<={h}]"),
            (Self::Best, true) => "bestvideo+bestaudio/best".to_string(),
            (Self::Best, false) => "bestvideo/best".to_string(),
        };
        let mut args = vec!["-f".to_string(), selector];
        if include_audio || always_merge {
            args.push("--merge-output-format".to_string());
            args.push("mp4".to_string());
        }
        args
    }
}

/// Finds yt-dlp on demand. Every lookup re-probes, so installing the tool
/// while the service runs is picked up without a restart. A configured path
/// is the only candidate when present.
#[derive(Clone, Debug)]
pub struct ToolLocator {
    override_path: Option<PathBuf>,
    cookies_file: PathBuf,
}

impl ToolLocator {
    pub fn new(override_path: Option<PathBuf>, cookies_file: PathBuf) -> Self {
        Self {
            override_path,
            cookies_file,
        }
    }

    pub async fn locate(&self) -> Result<YtDlp, MediaError> {
        let candidates: Vec<PathBuf> = match &self.override_path {
            Some(path) => vec![path.clone()],
            None => TOOL_CANDIDATES.iter().map(PathBuf::from).collect(),
        };
        for candidate in candidates {
            if let Some(version) = probe_version(&candidate, "--version").await {
                debug!(program = %candidate.display(), %version, "found yt-dlp");
                return Ok(YtDlp {
                    program: candidate,
                    version,
                    cookies_file: self.cookies_file.clone(),
                });
            }
        }
        Err(MediaError::ToolNotFound)
    }
}

/// A confirmed yt-dlp executable.
#[derive(Clone, Debug)]
pub struct YtDlp {
    program: PathBuf,
    version: String,
    cookies_file: PathBuf,
}

impl YtDlp {
    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// `--dump-json --no-download` metadata lookup.
    pub fn info_command(&self, url: &str) -> Command {
        let mut args: Vec<OsString> = ["--dump-json", "--no-download", "--no-warnings"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.extend(self.cookie_args());
        args.push(url.into());
        self.command(args)
    }

    /// Download into `output_template` with one progress line per update.
    pub fn download_command(
        &self,
        url: &str,
        output_template: &Path,
        quality: Quality,
        include_audio: bool,
    ) -> Command {
        let mut args: Vec<OsString> = vec![
            "--no-warnings".into(),
            "--progress".into(),
            "--newline".into(),
            "-o".into(),
            output_template.as_os_str().to_owned(),
        ];
        args.extend(
            quality
                .format_args(include_audio, false)
                .into_iter()
                .map(OsString::from),
        );
        args.extend(self.cookie_args());
        args.push(url.into());
        self.command(args)
    }

    /// Writes the muxed media to stdout.
    pub fn stream_command(&self, url: &str, quality: Quality, include_audio: bool) -> Command {
        let mut args: Vec<OsString> = vec!["--no-warnings".into(), "-o".into(), "-".into()];
        args.extend(
            quality
                .format_args(include_audio, true)
                .into_iter()
                .map(OsString::from),
        );
        args.extend(self.cookie_args());
        args.push(url.into());
        self.command(args)
    }

    fn cookie_args(&self) -> Vec<OsString> {
        if self.cookies_file.is_file() {
            vec!["--cookies".into(), self.cookies_file.as_os_str().to_owned()]
        } else {
            Vec::new()
        }
    }

    fn command(&self, args: Vec<OsString>) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

/// True when ffmpeg answers `-version`.
pub async fn muxer_available() -> bool {
    probe_version(Path::new(MUXER_PROGRAM), "-version")
        .await
        .is_some()
}

/// First line of stdout when `program flag` exits successfully.
async fn probe_version(program: &Path, flag: &str) -> Option<String> {
    probe_version_within(program, flag, PROBE_TIMEOUT).await
}

async fn probe_version_within(program: &Path, flag: &str, limit: Duration) -> Option<String> {
    let version_check = Command::new(program)
        .arg(flag)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();
    let output = match tokio::time::timeout(limit, version_check).await {
        Ok(result) => result.ok()?,
        Err(_) => {
            debug!(program = %program.display(), "version probe timed out");
            return None;
        }
    };
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Some(stdout.lines().next().unwrap_or_default().trim().to_string())
}
