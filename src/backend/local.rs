//! Local filesystem backend. Source paths are "/"-separated and resolved
//! below the backend root.

use super::{DirectoryPage, FileEntry, StorageBackend};
use crate::error::{EngineError, EngineResult};
use crate::paths::{join_path, local_destination};
use log::debug;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> EngineResult<PathBuf> {
        local_destination(&self.root, path).map_err(|_| EngineError::InvalidSource {
            path: path.to_string(),
            reason: "path escapes the backend root".to_string(),
        })
    }
}

#[async_trait::async_trait]
impl StorageBackend for LocalBackend {
    async fn list_directory_page(
        &self,
        path: &str,
        marker: Option<&str>,
        page_size: u32,
    ) -> EngineResult<DirectoryPage> {
        let dir = self.resolve(path)?;
        let offset = match marker {
            Some(m) => m
                .parse::<usize>()
                .map_err(|e| EngineError::listing(path, format!("bad marker '{}': {}", m, e)))?,
            None => 0,
        };

        let mut read_dir = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| EngineError::listing(path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| EngineError::listing(path, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| EngineError::listing(path, e))?;
            let entry_path = join_path(path, &name);
            if metadata.is_dir() {
                entries.push(FileEntry::directory(entry_path, name));
            } else if metadata.is_file() {
                entries.push(FileEntry::file(entry_path, name, metadata.len()));
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let total = entries.len();
        let end = std::cmp::min(offset.saturating_add(page_size as usize), total);
        let page: Vec<FileEntry> = if offset < total {
            entries.drain(offset..end).collect()
        } else {
            Vec::new()
        };
        let has_more = end < total;
        debug!(
            "local_list_page: {} offset={} returned={} has_more={}",
            path,
            offset,
            page.len(),
            has_more
        );

        Ok(DirectoryPage {
            path: path.to_string(),
            entries: page,
            has_more,
            next_marker: has_more.then(|| end.to_string()),
        })
    }

    async fn transfer_file(&self, source_path: &str, dest_local_path: &Path) -> EngineResult<u64> {
        let source = self.resolve(source_path)?;
        if let Some(parent) = dest_local_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                EngineError::transfer(source_path, format!("Failed to create directory: {}", e))
            })?;
        }
        tokio::fs::copy(&source, dest_local_path)
            .await
            .map_err(|e| EngineError::transfer(source_path, e))
    }

    fn cancel_all_transfers(&self) {
        // Local copies are not interruptible; in-flight copies finish normally.
        debug!("local_cancel_all: {}", self.root.display());
    }
}
