//! Folder download job state, events and status definitions

use crate::backend::FileEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    #[serde(rename = "preparing")]
    Preparing,
    #[serde(rename = "downloading")]
    Downloading,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "stopped")]
    Stopped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled | JobStatus::Stopped
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Preparing | JobStatus::Downloading)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Preparing => write!(f, "preparing"),
            JobStatus::Downloading => write!(f, "downloading"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Error => write!(f, "error"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// State of one folder download job. Snapshots handed to callers are clones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobState {
    pub job_id: String,
    pub folder_name: String,
    pub source_path: String,
    pub destination_path: String,
    pub recursive: bool,
    pub status: JobStatus,
    pub total_files: u64,
    pub completed_files: u64,
    pub failed_files: u64,
    pub failed_paths: Vec<String>,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub progress_percent: u32,
    pub current_activity_label: String,
    /// True until every directory has been listed
    pub scanning: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Input for `JobManager::submit_job`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderDownloadRequest {
    pub source_path: String,
    pub folder_name: String,
    /// Already-known contents of `source_path`; when non-empty the root is not listed again
    #[serde(default)]
    pub seed_entries: Vec<FileEntry>,
    pub destination_path: String,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

fn default_recursive() -> bool {
    true
}

impl FolderDownloadRequest {
    pub fn new(
        source_path: impl Into<String>,
        folder_name: impl Into<String>,
        destination_path: impl Into<String>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            folder_name: folder_name.into(),
            seed_entries: Vec::new(),
            destination_path: destination_path.into(),
            recursive: true,
        }
    }

    pub fn with_seed_entries(mut self, entries: Vec<FileEntry>) -> Self {
        self.seed_entries = entries;
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }
}

/// A single file transfer produced by the enumerator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    pub source_path: String,
    pub dest_local_path: PathBuf,
    pub size_bytes: u64,
}

/// Job notifications delivered over the caller's channel
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// Sent from `submit_job` before it returns
    Started(JobState),
    Progress(JobState),
    FileComplete {
        job_id: String,
        source_path: String,
        dest_path: PathBuf,
        size_bytes: u64,
    },
    /// Terminal `completed`, `cancelled` or `stopped`
    Completed(JobState),
    /// Terminal `error`
    Failed { snapshot: JobState, error: String },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Started(s) | JobEvent::Progress(s) | JobEvent::Completed(s) => &s.job_id,
            JobEvent::FileComplete { job_id, .. } => job_id,
            JobEvent::Failed { snapshot, .. } => &snapshot.job_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_display_matches_expected_strings() {
        assert_eq!(JobStatus::Preparing.to_string(), "preparing");
        assert_eq!(JobStatus::Downloading.to_string(), "downloading");
        assert_eq!(JobStatus::Completed.to_string(), "completed");
        assert_eq!(JobStatus::Error.to_string(), "error");
        assert_eq!(JobStatus::Cancelled.to_string(), "cancelled");
        assert_eq!(JobStatus::Stopped.to_string(), "stopped");
    }

    #[test]
    fn only_preparing_and_downloading_are_active() {
        assert!(JobStatus::Preparing.is_active());
        assert!(JobStatus::Downloading.is_active());
        for status in [
            JobStatus::Completed,
            JobStatus::Error,
            JobStatus::Cancelled,
            JobStatus::Stopped,
        ] {
            assert!(status.is_terminal());
            assert!(!status.is_active());
        }
    }

    #[test]
    fn request_defaults_to_recursive() {
        let request: FolderDownloadRequest = serde_json::from_str(
            r#"{"source_path":"docs","folder_name":"docs","destination_path":"/tmp"}"#,
        )
        .unwrap();
        assert!(request.recursive);
        assert!(request.seed_entries.is_empty());
    }
}
