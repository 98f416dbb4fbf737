//! Directory enumeration feeding the transfer queue.
//!
//! Directories are processed from a FIFO work queue. Each directory is fully
//! paginated before its subdirectories are queued, and every page's files are
//! counted into the job totals and queued for transfer as soon as they arrive.

use super::job::JobContext;
use super::types::{JobStatus, TransferTask};
use crate::backend::FileEntry;
use crate::paths::{join_path, local_destination};
use log::{debug, info, warn};
use std::collections::VecDeque;
use tokio::sync::mpsc;

struct PendingDir {
    path: String,
    /// Location below the job's destination root
    rel: String,
    depth: usize,
}

/// A subdirectory found while scheduling a batch
struct FoundDir {
    path: String,
    rel: String,
}

/// Walk the source tree and send one `TransferTask` per discovered file.
///
/// Dropping `tasks` on return tells the scheduler no more work is coming.
/// Returns the halt reason if enumeration stopped at a checkpoint.
pub(crate) async fn enumerate(
    ctx: &JobContext,
    seed_entries: Vec<FileEntry>,
    tasks: mpsc::UnboundedSender<TransferTask>,
) -> Option<JobStatus> {
    let mut queue: VecDeque<PendingDir> = VecDeque::new();
    let mut directories_scanned: usize = 0;

    if seed_entries.is_empty() {
        queue.push_back(PendingDir {
            path: ctx.source_root.clone(),
            rel: String::new(),
            depth: 0,
        });
    } else {
        debug!(
            "folder_enum_seed: {} entries={}",
            ctx.job_id(),
            seed_entries.len()
        );
        let subdirs = match schedule_entries(ctx, "", &seed_entries, &tasks) {
            Some(subdirs) => subdirs,
            None => return ctx.halt_reason(),
        };
        directories_scanned += 1;
        if ctx.recursive {
            queue.extend(subdirs.into_iter().map(|found| PendingDir {
                path: found.path,
                rel: found.rel,
                depth: 1,
            }));
        }
    }

    while let Some(dir) = queue.pop_front() {
        if let Some(reason) = ctx.halt_reason() {
            info!(
                "folder_enum_halt: {} reason={} pending_dirs={}",
                ctx.job_id(),
                reason,
                queue.len() + 1
            );
            return Some(reason);
        }

        ctx.job.update(|p| {
            p.set_scanning_path(Some(&dir.path));
            false
        });

        let Some(subdirs) = scan_directory(ctx, &dir, &tasks).await else {
            return ctx.halt_reason();
        };
        directories_scanned += 1;

        if ctx.recursive {
            queue.extend(subdirs.into_iter().map(|found| PendingDir {
                path: found.path,
                rel: found.rel,
                depth: dir.depth + 1,
            }));
        }
    }

    finish(ctx, directories_scanned);
    None
}

fn finish(ctx: &JobContext, directories_scanned: usize) {
    info!(
        "folder_enum_done: {} directories={}",
        ctx.job_id(),
        directories_scanned
    );
    ctx.job.update(|p| {
        p.finish_scanning();
        true
    });
}

/// Drain every page of one directory. Returns its subdirectories, or `None`
/// when the job was halted or the transfer queue is gone.
async fn scan_directory(
    ctx: &JobContext,
    dir: &PendingDir,
    tasks: &mpsc::UnboundedSender<TransferTask>,
) -> Option<Vec<FoundDir>> {
    let mut subdirs = Vec::new();
    let mut marker: Option<String> = None;
    let mut pages = 0usize;

    loop {
        if ctx.halt_reason().is_some() {
            return None;
        }

        let page = match ctx
            .backend
            .list_directory_page(&dir.path, marker.as_deref(), ctx.config.page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(
                    "folder_list_failed: {} dir={} page={} error={}",
                    ctx.job_id(),
                    dir.path,
                    pages,
                    e
                );
                // Files from earlier pages stay queued; subdirectories already
                // seen are still descended into.
                return Some(subdirs);
            }
        };
        pages += 1;
        debug!(
            "folder_list_page: {} dir={} depth={} page={} entries={} has_more={}",
            ctx.job_id(),
            dir.path,
            dir.depth,
            pages,
            page.entries.len(),
            page.has_more
        );

        subdirs.extend(schedule_entries(ctx, &dir.rel, &page.entries, tasks)?);

        if !page.has_more {
            break;
        }
        match page.next_marker {
            Some(next) => marker = Some(next),
            None => {
                warn!(
                    "folder_list_no_marker: {} dir={} page={} has_more without marker, stopping pagination",
                    ctx.job_id(),
                    dir.path,
                    pages
                );
                break;
            }
        }
    }

    Some(subdirs)
}

/// Count a batch of entries into the totals and queue its files.
///
/// `rel` is the batch directory's location below the destination root.
/// Returns the batch's subdirectories, or `None` if the queue is closed.
fn schedule_entries(
    ctx: &JobContext,
    rel: &str,
    entries: &[FileEntry],
    tasks: &mpsc::UnboundedSender<TransferTask>,
) -> Option<Vec<FoundDir>> {
    let mut subdirs = Vec::new();
    let mut batch = Vec::new();
    let mut batch_bytes: u64 = 0;

    for entry in entries {
        if entry.name.is_empty() || entry.name == "." || entry.name == ".." {
            warn!("folder_skip_entry: {} path={} unusable name", ctx.job_id(), entry.path);
            continue;
        }
        let relative = join_path(rel, &entry.name);
        if entry.is_dir() {
            subdirs.push(FoundDir {
                path: entry.path.clone(),
                rel: relative,
            });
            continue;
        }
        let dest_local_path = match local_destination(&ctx.dest_root, &relative) {
            Ok(path) => path,
            Err(e) => {
                warn!("folder_skip_entry: {} path={} error={}", ctx.job_id(), entry.path, e);
                continue;
            }
        };
        batch_bytes += entry.size_bytes;
        batch.push(TransferTask {
            source_path: entry.path.clone(),
            dest_local_path,
            size_bytes: entry.size_bytes,
        });
    }

    if !batch.is_empty() {
        let files = batch.len() as u64;
        // Totals grow before any task of the batch can complete.
        ctx.job.update(|p| p.add_discovered(files, batch_bytes));
        for task in batch {
            if tasks.send(task).is_err() {
                debug!("folder_enum_queue_closed: {}", ctx.job_id());
                return None;
            }
        }
    }

    Some(subdirs)
}
