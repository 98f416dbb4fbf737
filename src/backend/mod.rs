//! Storage backend contract consumed by the folder download engine.
//!
//! A backend lists directories one page at a time, transfers single files to
//! a local path and can be asked to abandon everything in flight.

pub mod local;
pub mod memory;
pub mod s3;

use crate::error::EngineResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use s3::{S3Backend, S3BackendConfig};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EntryKind {
    #[serde(rename = "file")]
    File,
    #[serde(rename = "directory")]
    Directory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub name: String,
    pub kind: EntryKind,
    pub size_bytes: u64,
}

impl FileEntry {
    pub fn file(path: impl Into<String>, name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            kind: EntryKind::File,
            size_bytes,
        }
    }

    pub fn directory(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            kind: EntryKind::Directory,
            size_bytes: 0,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// One page of a directory listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryPage {
    pub path: String,
    pub entries: Vec<FileEntry>,
    pub has_more: bool,
    pub next_marker: Option<String>,
}

#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// List one page of `path`. `marker` is the `next_marker` of the previous page.
    async fn list_directory_page(
        &self,
        path: &str,
        marker: Option<&str>,
        page_size: u32,
    ) -> EngineResult<DirectoryPage>;

    /// Transfer a single file to `dest_local_path`, returning the bytes written.
    async fn transfer_file(&self, source_path: &str, dest_local_path: &Path) -> EngineResult<u64>;

    /// Best-effort request to abandon every transfer in flight. Must not block.
    fn cancel_all_transfers(&self);
}
