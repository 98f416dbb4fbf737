//! Per-job shared state: the registry entry and the context handed to the
//! enumerator and the scheduler.

use super::progress::JobProgress;
use super::types::{JobEvent, JobState, JobStatus};
use crate::backend::StorageBackend;
use crate::config::EngineConfig;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

pub(crate) struct JobHandle {
    pub seq: u64,
    pub job_id: String,
    pub progress: Mutex<JobProgress>,
    pub cancelled: AtomicBool,
    events: mpsc::UnboundedSender<JobEvent>,
    progress_events: bool,
    /// Flips to true once the job's task has sent its terminal event
    closed: watch::Sender<bool>,
}

impl JobHandle {
    pub fn new(
        seq: u64,
        progress: JobProgress,
        events: mpsc::UnboundedSender<JobEvent>,
        progress_events: bool,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            seq,
            job_id: progress.state.job_id.clone(),
            progress: Mutex::new(progress),
            cancelled: AtomicBool::new(false),
            events,
            progress_events,
            closed,
        }
    }

    pub fn snapshot(&self) -> JobState {
        self.progress.lock().unwrap().state.clone()
    }

    pub fn status(&self) -> JobStatus {
        self.progress.lock().unwrap().state.status
    }

    /// Apply `f` to the job progress and emit a `Progress` event if it reports a change.
    ///
    /// Returns what `f` returned.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut JobProgress) -> bool,
    {
        let snapshot = {
            let mut progress = self.progress.lock().unwrap();
            if !f(&mut progress) {
                return false;
            }
            progress.state.clone()
        };
        if self.progress_events {
            self.emit(JobEvent::Progress(snapshot));
        }
        true
    }

    pub fn emit(&self, event: JobEvent) {
        // The caller may have dropped its receiver
        let _ = self.events.send(event);
    }

    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn subscribe_closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

pub(crate) struct JobContext {
    pub backend: Arc<dyn StorageBackend>,
    pub config: EngineConfig,
    pub job: Arc<JobHandle>,
    pub service_stopped: Arc<AtomicBool>,
    pub source_root: String,
    pub dest_root: PathBuf,
    pub recursive: bool,
}

impl JobContext {
    /// Cancellation checkpoint: why the job should stop taking new work, if it should.
    pub fn halt_reason(&self) -> Option<JobStatus> {
        if self.job.cancelled.load(Ordering::SeqCst) {
            Some(JobStatus::Cancelled)
        } else if self.service_stopped.load(Ordering::SeqCst) {
            Some(JobStatus::Stopped)
        } else {
            None
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job.job_id
    }
}
