#![forbid(unsafe_code)]

//! In-memory registry of download jobs.
//!
//! The store is cloned into every handler and every executor task; clones
//! share the same map. Each job is written by the single task that runs it,
//! while status polls read snapshots concurrently.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use crate::progress::{LineUpdate, MERGE_PROGRESS_FLOOR};

const JOB_ID_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Downloading,
    Merging,
    Complete,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Merging => "merging",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// Snapshot of one job as exposed by the status endpoint. Field names on the
/// wire follow what the web client polls for (`filename`, `error`).
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadJob {
    pub id: String,
    pub status: JobStatus,
    pub progress: f64,
    pub speed: String,
    pub eta: String,
    #[serde(rename = "filename")]
    pub output_path: Option<PathBuf>,
    #[serde(rename = "error", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl DownloadJob {
    fn new(id: String, status: JobStatus) -> Self {
        Self {
            id,
            status,
            progress: 0.0,
            speed: String::new(),
            eta: String::new(),
            output_path: None,
            error_message: None,
        }
    }
}

#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<String, DownloadJob>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new job and returns its id. The record exists before any
    /// work starts so an immediate status poll always finds it.
    pub fn create(&self, initial: JobStatus) -> String {
        let mut jobs = self.jobs.write();
        loop {
            let id = next_job_id();
            if jobs.contains_key(&id) {
                continue;
            }
            jobs.insert(id.clone(), DownloadJob::new(id.clone(), initial));
            return id;
        }
    }

    pub fn get(&self, id: &str) -> Option<DownloadJob> {
        self.jobs.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// `Queued -> Downloading` once a concurrency slot is available.
    pub fn mark_started(&self, id: &str) {
        self.update(id, |job| {
            if job.status == JobStatus::Queued {
                job.status = JobStatus::Downloading;
            }
        });
    }

    /// Folds one parsed output line into the job. Later values replace
    /// earlier ones; a merge marker pins progress to the merge floor.
    pub fn apply(&self, id: &str, update: &LineUpdate) {
        self.update(id, |job| {
            if update.merging {
                job.status = JobStatus::Merging;
                job.progress = MERGE_PROGRESS_FLOOR;
            } else if let Some(percent) = update.percent
                && job.status != JobStatus::Merging
            {
                job.progress = percent;
            }
            if let Some(speed) = &update.speed {
                job.speed = speed.clone();
            }
            if let Some(eta) = &update.eta {
                job.eta = eta.clone();
            }
            if let Some(destination) = &update.destination {
                job.output_path = Some(destination.clone());
            }
        });
    }

    pub fn complete(&self, id: &str, output_path: Option<PathBuf>) {
        self.update(id, |job| {
            job.status = JobStatus::Complete;
            job.progress = 100.0;
            job.output_path = output_path;
        });
    }

    pub fn fail(&self, id: &str, message: impl Into<String>) {
        let message = message.into();
        self.update(id, |job| {
            job.status = JobStatus::Error;
            job.error_message = Some(message);
        });
    }

    /// Applies `f` unless the job is unknown or already terminal.
    fn update(&self, id: &str, f: impl FnOnce(&mut DownloadJob)) {
        if let Some(job) = self.jobs.write().get_mut(id)
            && !job.status.is_terminal()
        {
            f(job);
        }
    }
}

fn next_job_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(JOB_ID_LEN);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::parse_line;
    use std::collections::HashSet;

    #[test]
    fn new_jobs_start_downloading_with_empty_fields() {
        let store = JobStore::new();
        let id = store.create(JobStatus::Downloading);
        let job = store.get(&id).unwrap();
        assert_eq!(id.len(), JOB_ID_LEN);
        assert_eq!(job.status, JobStatus::Downloading);
        assert_eq!(job.progress, 0.0);
        assert!(job.speed.is_empty());
        assert!(job.eta.is_empty());
        assert!(job.output_path.is_none());
        assert!(job.error_message.is_none());
    }

    #[test]
    fn ids_are_unique() {
        let store = JobStore::new();
        let ids: HashSet<String> = (0..500)
            .map(|_| store.create(JobStatus::Downloading))
            .collect();
        assert_eq!(ids.len(), 500);
        assert_eq!(store.len(), 500);
    }

    #[test]
    fn unknown_ids_are_absent() {
        let store = JobStore::new();
        assert!(store.get("missing").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn progress_sequence_through_merge_to_complete() {
        let store = JobStore::new();
        let id = store.create(JobStatus::Downloading);
        let mut seen = Vec::new();
        for line in [
            "[download]  10.0% of 50.00MiB at 1.00MiB/s ETA 00:45",
            "[download]  45.0% of 50.00MiB at 1.20MiB/s ETA 00:23",
            "[download]  99.0% of 50.00MiB at 1.10MiB/s ETA 00:01",
            r#"[Merger] Merging formats into "/tmp/d/Clip_abc.mp4""#,
        ] {
            store.apply(&id, &parse_line(line).unwrap());
            seen.push(store.get(&id).unwrap().progress);
        }
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Merging);
        store.complete(&id, Some(PathBuf::from("/tmp/d/Clip_abc.mp4")));
        let job = store.get(&id).unwrap();
        seen.push(job.progress);

        assert_eq!(seen, vec![10.0, 45.0, 99.0, 95.0, 100.0]);
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.speed, "1.10MiB/s");
        assert_eq!(job.eta, "00:01");
    }

    #[test]
    fn no_filename_until_destination_is_seen() {
        let store = JobStore::new();
        let id = store.create(JobStatus::Downloading);
        store.apply(
            &id,
            &parse_line("[download]  12.0% of 1.00MiB at 1.00KiB/s ETA 10:00").unwrap(),
        );
        assert!(store.get(&id).unwrap().output_path.is_none());

        store.apply(
            &id,
            &parse_line("[download] Destination: /tmp/d/Clip_x.f137.mp4").unwrap(),
        );
        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Downloading);
        assert_eq!(job.output_path, Some(PathBuf::from("/tmp/d/Clip_x.f137.mp4")));
    }

    #[test]
    fn percentages_are_ignored_while_merging() {
        let store = JobStore::new();
        let id = store.create(JobStatus::Downloading);
        store.apply(&id, &parse_line("[Merger] Merging formats").unwrap());
        store.apply(
            &id,
            &parse_line("[download]  20.0% of 1.00MiB at 1.00KiB/s ETA 10:00").unwrap(),
        );
        assert_eq!(store.get(&id).unwrap().progress, MERGE_PROGRESS_FLOOR);
    }

    #[test]
    fn title_containing_merging_keeps_job_downloading() {
        let store = JobStore::new();
        let id = store.create(JobStatus::Downloading);
        for line in [
            "[download] Destination: /tmp/d/Merging Lanes Tutorial_ab12cd34.f137.mp4",
            "[download]  12.0% of 8.00MiB at 1.00MiB/s ETA 00:07",
        ] {
            store.apply(&id, &parse_line(line).unwrap());
        }
        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Downloading);
        assert_eq!(job.progress, 12.0);
    }

    #[test]
    fn terminal_states_are_sticky() {
        let store = JobStore::new();
        let id = store.create(JobStatus::Downloading);
        store.fail(&id, "Download failed");
        store.complete(&id, None);
        store.apply(&id, &parse_line("[Merger] Merging formats").unwrap());
        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error_message.as_deref(), Some("Download failed"));
    }

    #[test]
    fn queued_jobs_move_to_downloading_once() {
        let store = JobStore::new();
        let id = store.create(JobStatus::Queued);
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Queued);
        store.mark_started(&id);
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Downloading);
        store.apply(&id, &parse_line("[Merger] Merging formats").unwrap());
        store.mark_started(&id);
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Merging);
    }

    #[test]
    fn serialized_shape_matches_client_expectations() {
        let store = JobStore::new();
        let id = store.create(JobStatus::Downloading);
        let running = serde_json::to_value(store.get(&id).unwrap()).unwrap();
        assert_eq!(running["status"], "downloading");
        assert!(running["filename"].is_null());
        assert!(running.get("error").is_none());

        store.fail(&id, "This content is private or unavailable.");
        let failed = serde_json::to_value(store.get(&id).unwrap()).unwrap();
        assert_eq!(failed["status"], "error");
        assert_eq!(failed["error"], "This content is private or unavailable.");
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let store = JobStore::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let id = store.create(JobStatus::Downloading);
                    for pct in 0..50 {
                        store.apply(
                            &id,
                            &LineUpdate {
                                percent: Some(pct as f64),
                                ..LineUpdate::default()
                            },
                        );
                        let _ = store.get(&id);
                    }
                    store.complete(&id, None);
                    id
                })
            })
            .collect();
        for handle in handles {
            let id = handle.join().unwrap();
            let job = store.get(&id).unwrap();
            assert_eq!(job.status, JobStatus::Complete);
            assert!(job.output_path.is_none());
        }
        assert_eq!(store.len(), 8);
    }
}
