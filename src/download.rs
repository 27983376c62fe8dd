#![forbid(unsafe_code)]

//! Background download jobs.
//!
//! Each accepted download becomes its own tokio task. The task is the only
//! writer of its job record: it spawns yt-dlp, feeds every stdout line
//! through [`parse_line`] into the [`JobStore`], and settles the job once
//! the process exits.

use std::{
    path::{Path, PathBuf},
    process::ExitStatus,
    sync::Arc,
    time::SystemTime,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader},
    sync::Semaphore,
};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{
    error::MediaError,
    jobs::{JobStatus, JobStore},
    progress::parse_line,
    tool::{Quality, ToolLocator},
};

#[derive(Clone, Debug)]
pub struct DownloadRequest {
    pub url: String,
    pub quality: Quality,
    pub include_audio: bool,
}

#[derive(Clone)]
pub struct Downloader {
    jobs: JobStore,
    locator: ToolLocator,
    download_dir: PathBuf,
    slots: Option<Arc<Semaphore>>,
}

impl Downloader {
    /// `max_concurrent` of `None` runs every job immediately.
    pub fn new(
        jobs: JobStore,
        locator: ToolLocator,
        download_dir: PathBuf,
        max_concurrent: Option<usize>,
    ) -> Self {
        Self {
            jobs,
            locator,
            download_dir,
            slots: max_concurrent.map(|limit| Arc::new(Semaphore::new(limit.max(1)))),
        }
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Registers the job and returns its id right away; the work happens on
    /// a spawned task.
    pub fn start(&self, request: DownloadRequest) -> String {
        let initial = if self.slots.is_some() {
            JobStatus::Queued
        } else {
            JobStatus::Downloading
        };
        let id = self.jobs.create(initial);
        info!(
            job = %id,
            url = %request.url,
            quality = ?request.quality,
            status = initial.as_str(),
            "download accepted"
        );

        let downloader = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move { downloader.run(job_id, request).await });
        id
    }

    async fn run(self, id: String, request: DownloadRequest) {
        let _permit = match &self.slots {
            Some(slots) => match slots.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(err) => {
                    self.jobs.fail(&id, format!("Download failed: {err}"));
                    return;
                }
            },
            None => None,
        };
        self.jobs.mark_started(&id);

        match self.execute(&id, &request).await {
            Ok(output_path) => {
                match &output_path {
                    Some(path) => info!(job = %id, path = %path.display(), "download complete"),
                    None => warn!(job = %id, "download finished but no output file was found"),
                }
                self.jobs.complete(&id, output_path);
            }
            Err(err) => {
                warn!(job = %id, error = %err, "download failed");
                self.jobs.fail(&id, err.to_string());
            }
        }
    }

    async fn execute(
        &self,
        id: &str,
        request: &DownloadRequest,
    ) -> Result<Option<PathBuf>, MediaError> {
        let tool = self.locator.locate().await?;
        let template = self.download_dir.join(format!("%(title)s_{id}.%(ext)s"));
        let mut child = tool
            .download_command(&request.url, &template, request.quality, request.include_audio)
            .spawn()?;
        debug!(job = %id, program = %tool.program().display(), "spawned yt-dlp");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::SubprocessFailure("yt-dlp stdout unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::SubprocessFailure("yt-dlp stderr unavailable".into()))?;
        let stderr_task = tokio::spawn(read_all(stderr));

        let mut destination = None;
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            // Titles are not guaranteed to be valid UTF-8.
            let line = String::from_utf8_lossy(&buf);
            let Some(update) = parse_line(&line) else {
                continue;
            };
            if update.merging {
                debug!(job = %id, "merging streams");
            }
            if let Some(path) = &update.destination {
                destination = Some(path.clone());
            }
            self.jobs.apply(id, &update);
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();
        if !status.success() {
            return Err(classify_failure(&stderr, status));
        }

        let dir = self.download_dir.clone();
        let id = id.to_string();
        let resolved = tokio::task::spawn_blocking(move || resolve_output(&dir, &id, destination))
            .await
            .map_err(|err| MediaError::SubprocessFailure(format!("Download failed: {err}")))?;
        Ok(resolved)
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    if let Err(err) = reader.read_to_end(&mut buf).await {
        debug!(error = %err, "stopped reading yt-dlp stderr");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Private content first, then the last `ERROR:` line, then a generic message.
fn classify_failure(stderr: &str, status: ExitStatus) -> MediaError {
    let classified = MediaError::from_stderr(stderr, "");
    if matches!(classified, MediaError::PrivateOrUnavailable) {
        return classified;
    }
    match stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.starts_with("ERROR:"))
    {
        Some(line) => MediaError::SubprocessFailure(line.to_string()),
        None => MediaError::SubprocessFailure(format!("Download failed ({status})")),
    }
}

/// The captured destination when it still exists, otherwise the newest file
/// in `dir` whose name carries `_<id>.`.
fn resolve_output(dir: &Path, id: &str, captured: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = captured
        && path.is_file()
    {
        return Some(path);
    }

    let marker = format!("_{id}.");
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_string_lossy().contains(&marker))
        .map(|entry| {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|meta| meta.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, entry.into_path())
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}
