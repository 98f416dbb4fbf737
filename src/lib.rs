//! Folder transfer engine.
//!
//! Replicates a subtree of a remote or local namespace, reachable through a
//! pluggable [`StorageBackend`], into a local directory while reporting live
//! progress over a channel and tolerating per-directory and per-file failures.
//!
//! ```no_run
//! use folder_transfer::{EngineConfig, FolderDownloadRequest, JobEvent, JobManager, LocalBackend};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), folder_transfer::EngineError> {
//! let backend = Arc::new(LocalBackend::new("/srv/share"));
//! let manager = JobManager::new(backend, EngineConfig::default())?;
//! let (events, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!
//! let job_id = manager.submit_job(FolderDownloadRequest::new("docs", "docs", "/tmp/out"), events);
//! while let Some(event) = rx.recv().await {
//!     if let JobEvent::Completed(state) | JobEvent::Failed { snapshot: state, .. } = event {
//!         println!("{} finished: {}", state.job_id, state.status);
//!         break;
//!     }
//! }
//! let _final_state = manager.wait_for_job(&job_id).await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod folder_download;
pub mod paths;

pub use backend::{
    DirectoryPage, EntryKind, FileEntry, LocalBackend, MemoryBackend, S3Backend, S3BackendConfig,
    StorageBackend,
};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use folder_download::{
    FolderDownloadRequest, JobEvent, JobManager, JobState, JobStatus, TransferTask,
};
