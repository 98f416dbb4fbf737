//! Folder download engine with bounded concurrency and live job progress
//!
//! Provides recursive folder downloads over any `StorageBackend` with:
//! - Paginated enumeration interleaved with transfers
//! - At most `concurrency` transfers in flight per job
//! - Monotonic progress while totals are still growing
//! - Per-job cancel and a service-wide stop that clears itself when idle
//! - Per-file failures recorded without aborting the job

mod enumerator;
mod job;
mod manager;
mod progress;
mod scheduler;
mod types;

pub use manager::JobManager;
pub use types::{FolderDownloadRequest, JobEvent, JobState, JobStatus, TransferTask};
