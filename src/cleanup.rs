#![forbid(unsafe_code)]

//! Periodic removal of old files from the download directory.

use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Deletes regular files directly inside `dir` whose modification time is
/// older than `max_age`. Returns how many files were removed.
pub fn sweep_once(dir: &Path, max_age: Duration) -> usize {
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
    {
        let Some(modified) = entry.metadata().ok().and_then(|meta| meta.modified().ok()) else {
            continue;
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age <= max_age {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                info!(path = %entry.path().display(), age_secs = age.as_secs(), "removed old download");
                removed += 1;
            }
            Err(err) => warn!(path = %entry.path().display(), error = %err, "failed to remove old download"),
        }
    }
    removed
}

/// Runs [`sweep_once`] every `interval` for the life of the process.
pub fn spawn_sweeper(dir: PathBuf, interval: Duration, max_age: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so startup does not sweep.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let target = dir.clone();
            match tokio::task::spawn_blocking(move || sweep_once(&target, max_age)).await {
                Ok(removed) => debug!(removed, "sweep finished"),
                Err(err) => warn!(error = %err, "sweep task failed"),
            }
        }
    })
}
