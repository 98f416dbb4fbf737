//! Progress aggregation for a folder download job.
//!
//! Totals grow while directories are still being discovered, so the
//! percentage is recomputed as `max(last, floor(completed / total * 100))`.
//! It never moves backward while the job is downloading, stays below 100
//! until scanning has finished and is pinned to 100 on completion.

use super::types::{JobState, JobStatus};
use chrono::Utc;

pub(crate) fn floor_percent(completed: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    let percent = (completed as u128 * 100) / total as u128;
    std::cmp::min(percent, 100) as u32
}

/// Job state plus the names of files currently in flight
#[derive(Debug)]
pub(crate) struct JobProgress {
    pub state: JobState,
    in_flight: Vec<String>,
    scanning_path: Option<String>,
    label_names: usize,
}

impl JobProgress {
    pub fn new(state: JobState, label_names: usize) -> Self {
        Self {
            state,
            in_flight: Vec::new(),
            scanning_path: None,
            label_names,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.status.is_terminal()
    }

    pub fn begin_downloading(&mut self) -> bool {
        if self.state.status != JobStatus::Preparing {
            return false;
        }
        self.state.status = JobStatus::Downloading;
        self.state.scanning = true;
        self.refresh_label();
        true
    }

    pub fn set_scanning_path(&mut self, path: Option<&str>) {
        if self.is_terminal() {
            return;
        }
        self.scanning_path = path.map(|p| p.to_string());
        self.refresh_label();
    }

    /// Enumeration is over; the percentage may now reach 100.
    pub fn finish_scanning(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.state.scanning = false;
        self.scanning_path = None;
        self.refresh_percent();
        self.refresh_label();
    }

    /// A newly listed batch of files grows the totals.
    pub fn add_discovered(&mut self, files: u64, bytes: u64) -> bool {
        if self.is_terminal() || files == 0 {
            return false;
        }
        self.state.total_files += files;
        self.state.total_bytes += bytes;
        self.refresh_percent();
        true
    }

    pub fn start_file(&mut self, name: &str) {
        if self.is_terminal() {
            return;
        }
        self.in_flight.push(name.to_string());
        self.refresh_label();
    }

    /// Record the outcome of one transfer. Counters are frozen once terminal.
    pub fn finish_file(&mut self, name: &str, source_path: &str, size_bytes: u64, ok: bool) -> bool {
        if let Some(pos) = self.in_flight.iter().position(|n| n == name) {
            self.in_flight.remove(pos);
        }
        if self.is_terminal() {
            return false;
        }
        if ok {
            self.state.completed_files += 1;
            self.state.downloaded_bytes += size_bytes;
        } else {
            self.state.failed_files += 1;
            self.state.failed_paths.push(source_path.to_string());
        }
        self.refresh_percent();
        self.refresh_label();
        true
    }

    /// Move to a terminal status. Returns false if the job was already terminal.
    pub fn complete(&mut self, status: JobStatus, error: Option<String>) -> bool {
        if self.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.state.status = status;
        self.state.scanning = false;
        self.state.end_time = Some(Utc::now());
        self.state.error = error;
        if status == JobStatus::Completed {
            self.state.progress_percent = 100;
        }
        self.in_flight.clear();
        self.scanning_path = None;
        self.state.current_activity_label = String::new();
        true
    }

    fn refresh_percent(&mut self) {
        if self.state.status != JobStatus::Downloading {
            return;
        }
        let computed = floor_percent(self.state.completed_files, self.state.total_files);
        let mut percent = std::cmp::max(self.state.progress_percent, computed);
        if self.state.scanning {
            percent = std::cmp::min(percent, 99);
        }
        self.state.progress_percent = std::cmp::max(self.state.progress_percent, percent);
    }

    fn refresh_label(&mut self) {
        self.state.current_activity_label = if self.in_flight.is_empty() {
            match &self.scanning_path {
                Some(path) => format!("scanning: {}", path),
                None => String::new(),
            }
        } else {
            let shown: Vec<&str> = self
                .in_flight
                .iter()
                .take(self.label_names)
                .map(|n| n.as_str())
                .collect();
            let extra = self.in_flight.len().saturating_sub(self.label_names);
            if extra > 0 {
                format!("downloading: {} +{}", shown.join(", "), extra)
            } else {
                format!("downloading: {}", shown.join(", "))
            }
        };
    }
}
