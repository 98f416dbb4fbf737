//! In-memory backend with scriptable failures and delays.
//!
//! Used for dry runs and by the engine tests to observe listing calls,
//! transfer concurrency and failure handling without touching a network.

use super::{DirectoryPage, FileEntry, StorageBackend};
use crate::error::{EngineError, EngineResult};
use crate::paths::{file_name, normalize_path};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct Tree {
    dirs: HashMap<String, Vec<FileEntry>>,
    files: HashMap<String, u64>,
}

impl Tree {
    fn ensure_dir(&mut self, path: &str) {
        let mut missing = Vec::new();
        let mut current = path.to_string();
        while !self.dirs.contains_key(&current) {
            missing.push(current.clone());
            if current.is_empty() {
                break;
            }
            current = parent_of(&current);
        }
        for dir in missing.into_iter().rev() {
            self.dirs.insert(dir.clone(), Vec::new());
            if !dir.is_empty() {
                let name = file_name(&dir);
                self.dirs
                    .entry(parent_of(&dir))
                    .or_default()
                    .push(FileEntry::directory(dir.clone(), name));
            }
        }
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    tree: Mutex<Tree>,
    failing_listings: Mutex<HashSet<String>>,
    broken_pagination: Mutex<HashSet<String>>,
    failing_files: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    default_delay: Mutex<Duration>,
    max_page_size: Mutex<Option<u32>>,
    write_files: Mutex<bool>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: AtomicUsize,
    list_calls: AtomicUsize,
    cancel_all_calls: AtomicUsize,
    transferred: Mutex<Vec<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        backend.tree.lock().unwrap().ensure_dir("");
        backend
    }

    pub fn add_dir(&self, path: &str) {
        self.tree.lock().unwrap().ensure_dir(&normalize_path(path));
    }

    pub fn add_file(&self, path: &str, size_bytes: u64) {
        let path = normalize_path(path);
        let mut tree = self.tree.lock().unwrap();
        let parent = parent_of(&path);
        tree.ensure_dir(&parent);
        tree.files.insert(path.clone(), size_bytes);
        let name = file_name(&path);
        tree.dirs
            .entry(parent)
            .or_default()
            .push(FileEntry::file(path, name, size_bytes));
    }

    /// Listing `path` fails every time.
    pub fn fail_listing(&self, path: &str) {
        self.failing_listings
            .lock()
            .unwrap()
            .insert(normalize_path(path));
    }

    /// Pages of `path` report `has_more` without a marker.
    pub fn break_pagination(&self, path: &str) {
        self.broken_pagination
            .lock()
            .unwrap()
            .insert(normalize_path(path));
    }

    /// Transferring `path` fails after its delay.
    pub fn fail_transfer(&self, path: &str) {
        self.failing_files
            .lock()
            .unwrap()
            .insert(normalize_path(path));
    }

    pub fn set_delay(&self, path: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(normalize_path(path), delay);
    }

    pub fn set_default_delay(&self, delay: Duration) {
        *self.default_delay.lock().unwrap() = delay;
    }

    /// Cap page sizes below what the engine requests.
    pub fn set_max_page_size(&self, page_size: u32) {
        *self.max_page_size.lock().unwrap() = Some(page_size);
    }

    /// Write zero-filled files of the recorded size to the destination.
    pub fn set_write_files(&self, write: bool) {
        *self.write_files.lock().unwrap() = write;
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn started_transfers(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_all_calls(&self) -> usize {
        self.cancel_all_calls.load(Ordering::SeqCst)
    }

    /// Source paths of transfers that succeeded, in completion order.
    pub fn transferred(&self) -> Vec<String> {
        self.transferred.lock().unwrap().clone()
    }

    async fn run_transfer(&self, source_path: &str, dest_local_path: &Path) -> EngineResult<u64> {
        let size = self
            .tree
            .lock()
            .unwrap()
            .files
            .get(source_path)
            .copied()
            .ok_or_else(|| EngineError::transfer(source_path, "no such file"))?;

        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(source_path)
            .copied()
            .unwrap_or_else(|| *self.default_delay.lock().unwrap());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.failing_files.lock().unwrap().contains(source_path) {
            return Err(EngineError::transfer(source_path, "injected failure"));
        }

        let write_files = *self.write_files.lock().unwrap();
        if write_files {
            if let Some(parent) = dest_local_path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| EngineError::transfer(source_path, e))?;
            }
            tokio::fs::write(dest_local_path, vec![0u8; size as usize])
                .await
                .map_err(|e| EngineError::transfer(source_path, e))?;
        }

        self.transferred
            .lock()
            .unwrap()
            .push(source_path.to_string());
        Ok(size)
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn list_directory_page(
        &self,
        path: &str,
        marker: Option<&str>,
        page_size: u32,
    ) -> EngineResult<DirectoryPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let path = normalize_path(path);
        if self.failing_listings.lock().unwrap().contains(&path) {
            return Err(EngineError::listing(&path, "injected failure"));
        }

        let offset = match marker {
            Some(m) => m
                .parse::<usize>()
                .map_err(|e| EngineError::listing(&path, e))?,
            None => 0,
        };
        let page_size = match *self.max_page_size.lock().unwrap() {
            Some(max) => std::cmp::min(max, page_size),
            None => page_size,
        } as usize;

        let tree = self.tree.lock().unwrap();
        let entries = tree
            .dirs
            .get(&path)
            .ok_or_else(|| EngineError::listing(&path, "no such directory"))?;
        let end = std::cmp::min(offset.saturating_add(page_size), entries.len());
        let page = entries.get(offset..end).unwrap_or_default().to_vec();
        let broken = self.broken_pagination.lock().unwrap().contains(&path);
        let has_more = broken || end < entries.len();
        let next_marker = if broken || !has_more {
            None
        } else {
            Some(end.to_string())
        };
        debug!(
            "memory_list_page: {} offset={} returned={} has_more={}",
            path,
            offset,
            page.len(),
            has_more
        );

        Ok(DirectoryPage {
            path,
            entries: page,
            has_more,
            next_marker,
        })
    }

    async fn transfer_file(&self, source_path: &str, dest_local_path: &Path) -> EngineResult<u64> {
        let source_path = normalize_path(source_path);
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.run_transfer(&source_path, dest_local_path).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn cancel_all_transfers(&self) {
        self.cancel_all_calls.fetch_add(1, Ordering::SeqCst);
        debug!("memory_cancel_all: in_flight={}", self.in_flight());
    }
}
