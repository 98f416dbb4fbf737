//! Job registry and cancellation controller.
//!
//! `JobManager` owns every job's state for the lifetime of the process. Jobs
//! are created synchronously by `submit_job` and run on the tokio runtime.
//! `stop_all_jobs` raises a service-wide stop flag that clears itself as soon
//! as no job is preparing or downloading any more.

use super::enumerator::enumerate;
use super::job::{JobContext, JobHandle};
use super::progress::JobProgress;
use super::scheduler::run_transfers;
use super::types::{FolderDownloadRequest, JobEvent, JobState, JobStatus};
use crate::backend::{FileEntry, StorageBackend};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::paths::{join_path, normalize_path};
use chrono::Utc;
use log::{error, info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

struct ManagerInner {
    backend: Arc<dyn StorageBackend>,
    config: EngineConfig,
    jobs: Mutex<HashMap<String, Arc<JobHandle>>>,
    service_stopped: Arc<AtomicBool>,
    next_seq: AtomicU64,
}

#[derive(Clone)]
pub struct JobManager {
    inner: Arc<ManagerInner>,
}

fn build_job_id(seq: u64) -> String {
    format!("folder-{}-{}", Utc::now().timestamp_millis(), seq)
}

impl JobManager {
    pub fn new(backend: Arc<dyn StorageBackend>, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                backend,
                config,
                jobs: Mutex::new(HashMap::new()),
                service_stopped: Arc::new(AtomicBool::new(false)),
                next_seq: AtomicU64::new(1),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Register a folder download and start it on the current tokio runtime.
    ///
    /// `JobEvent::Started` is sent before this returns; scanning and
    /// transfers begin on a spawned task. Must be called within a runtime.
    pub fn submit_job(
        &self,
        request: FolderDownloadRequest,
        events: mpsc::UnboundedSender<JobEvent>,
    ) -> String {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst);
        let job_id = build_job_id(seq);
        let state = JobState {
            job_id: job_id.clone(),
            folder_name: request.folder_name.clone(),
            source_path: request.source_path.clone(),
            destination_path: request.destination_path.clone(),
            recursive: request.recursive,
            status: JobStatus::Preparing,
            total_files: 0,
            completed_files: 0,
            failed_files: 0,
            failed_paths: Vec::new(),
            total_bytes: 0,
            downloaded_bytes: 0,
            progress_percent: 0,
            current_activity_label: String::new(),
            scanning: false,
            start_time: Utc::now(),
            end_time: None,
            error: None,
        };
        let progress = JobProgress::new(state, self.inner.config.activity_label_names);
        let handle = Arc::new(JobHandle::new(
            seq,
            progress,
            events,
            self.inner.config.progress_events,
        ));

        {
            let mut jobs = self.inner.jobs.lock().unwrap();
            jobs.insert(job_id.clone(), handle.clone());
        }
        info!(
            "folder_job_submit: {} {} -> {} recursive={} seed_entries={}",
            job_id,
            request.source_path,
            join_path(&request.destination_path, &request.folder_name),
            request.recursive,
            request.seed_entries.len()
        );
        handle.emit(JobEvent::Started(handle.snapshot()));

        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_job(handle, request).await;
        });

        job_id
    }

    /// Flag a job as cancelled. Transfers already in flight finish; nothing new starts.
    ///
    /// Returns false for unknown or already finished jobs.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        let Some(handle) = self.get_handle(job_id) else {
            return false;
        };
        let cancelled = {
            let mut progress = handle.progress.lock().unwrap();
            if progress.is_terminal() {
                false
            } else {
                handle.cancelled.store(true, Ordering::SeqCst);
                progress.complete(JobStatus::Cancelled, None)
            }
        };
        if cancelled {
            info!("cancel_job: flagged active job {}", job_id);
            self.resume_if_idle();
        }
        cancelled
    }

    /// Halt every active job at its next checkpoint and ask the backend to
    /// abandon in-flight transfers. Clears itself once no job is active.
    pub fn stop_all_jobs(&self) {
        self.inner.service_stopped.store(true, Ordering::SeqCst);
        let active = self.list_active_jobs().len();
        info!("stop_all_jobs: stopping {} active jobs", active);

        let backend = self.inner.backend.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    backend.cancel_all_transfers();
                });
            }
            Err(_) => backend.cancel_all_transfers(),
        }

        self.resume_if_idle();
    }

    pub fn is_service_stopped(&self) -> bool {
        self.inner.service_stopped.load(Ordering::SeqCst)
    }

    pub fn get_job_state(&self, job_id: &str) -> Option<JobState> {
        self.get_handle(job_id).map(|handle| handle.snapshot())
    }

    /// Jobs still preparing or downloading, newest first.
    pub fn list_active_jobs(&self) -> Vec<JobState> {
        self.snapshots(|state| state.status.is_active())
    }

    /// Every retained job, newest first.
    pub fn list_jobs(&self) -> Vec<JobState> {
        self.snapshots(|_| true)
    }

    /// Forget a job. A running job keeps running, unobserved.
    pub fn remove_job(&self, job_id: &str) -> bool {
        let removed = self.inner.jobs.lock().unwrap().remove(job_id).is_some();
        if removed {
            info!("remove_job: {}", job_id);
        }
        removed
    }

    /// Remove every job in a terminal state. Returns how many were removed.
    pub fn clear_finished_jobs(&self) -> usize {
        let mut jobs = self.inner.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|_, handle| !handle.status().is_terminal());
        let removed = before - jobs.len();
        info!("clear_finished_jobs: removed {}", removed);
        removed
    }

    /// Wait until the job's task has finished and return its final state.
    pub async fn wait_for_job(&self, job_id: &str) -> Option<JobState> {
        let handle = self.get_handle(job_id)?;
        let mut closed = handle.subscribe_closed();
        // The sender lives in `handle`, so the channel cannot close under us.
        let _ = closed.wait_for(|done| *done).await;
        Some(handle.snapshot())
    }

    fn get_handle(&self, job_id: &str) -> Option<Arc<JobHandle>> {
        self.inner.jobs.lock().unwrap().get(job_id).cloned()
    }

    fn snapshots<F>(&self, filter: F) -> Vec<JobState>
    where
        F: Fn(&JobState) -> bool,
    {
        let mut handles: Vec<Arc<JobHandle>> =
            self.inner.jobs.lock().unwrap().values().cloned().collect();
        handles.sort_by(|a, b| b.seq.cmp(&a.seq));
        handles
            .iter()
            .map(|handle| handle.snapshot())
            .filter(|state| filter(state))
            .collect()
    }

    /// Clear the stop flag once no job is preparing or downloading.
    fn resume_if_idle(&self) {
        if !self.is_service_stopped() {
            return;
        }
        let any_active = {
            let jobs = self.inner.jobs.lock().unwrap();
            jobs.values().any(|handle| handle.status().is_active())
        };
        if !any_active
            && self
                .inner
                .service_stopped
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            info!("resume_if_idle: no active jobs, stop flag cleared");
        }
    }

    async fn run_job(&self, handle: Arc<JobHandle>, request: FolderDownloadRequest) {
        let job_id = handle.job_id.clone();

        let ctx = match self.prepare(&handle, &request).await {
            Ok(ctx) => ctx,
            Err(e) => {
                error!("folder_job_failed: {} error={}", job_id, e);
                self.close_job(&handle, JobStatus::Error, Some(e.to_string()));
                return;
            }
        };

        if let Some(reason) = ctx.halt_reason() {
            self.close_job(&handle, reason, None);
            return;
        }
        handle.update(|p| p.begin_downloading());
        info!(
            "folder_job_start: {} source={} dest={}",
            job_id,
            ctx.source_root,
            ctx.dest_root.display()
        );

        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let seed_entries: Vec<FileEntry> = request.seed_entries;
        let (enum_halted, transfer_halted) = tokio::join!(
            enumerate(&ctx, seed_entries, task_tx),
            run_transfers(&ctx, task_rx)
        );

        let status = transfer_halted
            .or(enum_halted)
            .unwrap_or(JobStatus::Completed);
        self.close_job(&handle, status, None);
    }

    /// Validate the request and create the local destination root.
    async fn prepare(
        &self,
        handle: &Arc<JobHandle>,
        request: &FolderDownloadRequest,
    ) -> EngineResult<JobContext> {
        let source_root = normalize_path(&request.source_path);
        if source_root.is_empty() && request.seed_entries.is_empty() {
            return Err(EngineError::InvalidSource {
                path: request.source_path.clone(),
                reason: "source path is empty".to_string(),
            });
        }
        if request.destination_path.trim().is_empty() {
            return Err(EngineError::InvalidDestination {
                path: request.destination_path.clone(),
                reason: "destination path is empty".to_string(),
            });
        }
        let folder_name = request.folder_name.trim();
        if folder_name.is_empty()
            || folder_name == "."
            || folder_name == ".."
            || folder_name.contains('/')
            || folder_name.contains('\\')
        {
            return Err(EngineError::InvalidDestination {
                path: request.folder_name.clone(),
                reason: "folder name must be a single path segment".to_string(),
            });
        }

        let dest_root = PathBuf::from(&request.destination_path).join(folder_name);
        tokio::fs::create_dir_all(&dest_root)
            .await
            .map_err(|e| EngineError::DestinationCreate {
                path: dest_root.display().to_string(),
                source: e,
            })?;

        Ok(JobContext {
            backend: self.inner.backend.clone(),
            config: self.inner.config.clone(),
            job: handle.clone(),
            service_stopped: self.inner.service_stopped.clone(),
            source_root,
            dest_root,
            recursive: request.recursive,
        })
    }

    /// Reach the terminal state (unless `cancel_job` already did), notify the
    /// caller exactly once and clear the stop flag if nothing is left running.
    fn close_job(&self, handle: &Arc<JobHandle>, status: JobStatus, error: Option<String>) {
        let snapshot = {
            let mut progress = handle.progress.lock().unwrap();
            progress.complete(status, error.clone());
            progress.state.clone()
        };

        if snapshot.status == JobStatus::Completed && snapshot.failed_files > 0 {
            warn!(
                "folder_job_partial: {} completed={} failed={} total={}",
                snapshot.job_id,
                snapshot.completed_files,
                snapshot.failed_files,
                snapshot.total_files
            );
        }
        info!(
            "folder_job_status: {} -> {} files={}/{} bytes={}/{}",
            snapshot.job_id,
            snapshot.status,
            snapshot.completed_files,
            snapshot.total_files,
            snapshot.downloaded_bytes,
            snapshot.total_bytes
        );

        match snapshot.status {
            JobStatus::Error => {
                let error = snapshot.error.clone().unwrap_or_default();
                handle.emit(JobEvent::Failed { snapshot, error });
            }
            _ => handle.emit(JobEvent::Completed(snapshot)),
        }
        handle.close();
        self.resume_if_idle();
    }
}
