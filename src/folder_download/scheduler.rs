//! Bounded transfer pool for one job.
//!
//! Keeps at most `concurrency` transfers in flight: tops the in-flight set up
//! from the task queue, then waits for at least one transfer to finish.

use super::job::JobContext;
use super::types::{JobEvent, JobStatus, TransferTask};
use crate::error::EngineResult;
use crate::paths::file_name;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use log::{debug, info, warn};
use std::future::Future;
use tokio::sync::mpsc::{self, error::TryRecvError};

/// Run queued transfers until the queue is closed and drained, or the job is halted.
///
/// Returns the halt reason observed at a checkpoint. Transfers already in
/// flight when a halt is observed are allowed to finish.
pub(crate) async fn run_transfers(
    ctx: &JobContext,
    mut tasks: mpsc::UnboundedReceiver<TransferTask>,
) -> Option<JobStatus> {
    let concurrency = ctx.config.concurrency.max(1);
    let mut in_flight = FuturesUnordered::new();
    let mut queue_open = true;
    let mut halted: Option<JobStatus> = None;

    loop {
        // Top up the pool; checkpoint before every dequeue
        while halted.is_none() && queue_open && in_flight.len() < concurrency {
            if let Some(reason) = ctx.halt_reason() {
                halted = Some(reason);
                break;
            }
            match tasks.try_recv() {
                Ok(task) => in_flight.push(start_transfer(ctx, task)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => queue_open = false,
            }
        }

        if in_flight.is_empty() {
            if halted.is_some() || !queue_open {
                break;
            }
            // Idle until the enumerator produces more work or finishes
            match tasks.recv().await {
                Some(task) => match ctx.halt_reason() {
                    Some(reason) => halted = Some(reason),
                    None => in_flight.push(start_transfer(ctx, task)),
                },
                None => queue_open = false,
            }
            continue;
        }

        let accepting = halted.is_none() && queue_open && in_flight.len() < concurrency;
        tokio::select! {
            Some((task, result)) = in_flight.next() => {
                finish_transfer(ctx, task, result);
                if halted.is_none() {
                    halted = ctx.halt_reason();
                }
            }
            next = tasks.recv(), if accepting => match next {
                Some(task) => match ctx.halt_reason() {
                    Some(reason) => halted = Some(reason),
                    None => in_flight.push(start_transfer(ctx, task)),
                },
                None => queue_open = false,
            },
            else => break,
        }
    }

    if let Some(reason) = halted {
        info!(
            "folder_transfers_halt: {} reason={} queued_dropped={}",
            ctx.job_id(),
            reason,
            tasks.len()
        );
    }
    halted
}

fn start_transfer(
    ctx: &JobContext,
    task: TransferTask,
) -> impl Future<Output = (TransferTask, EngineResult<u64>)> + '_ {
    let name = file_name(&task.source_path);
    ctx.job.update(|p| {
        p.start_file(&name);
        false
    });
    debug!(
        "folder_transfer_start: {} {} -> {}",
        ctx.job_id(),
        task.source_path,
        task.dest_local_path.display()
    );

    async move {
        let result = ctx
            .backend
            .transfer_file(&task.source_path, &task.dest_local_path)
            .await;
        (task, result)
    }
}

fn finish_transfer(ctx: &JobContext, task: TransferTask, result: EngineResult<u64>) {
    let name = file_name(&task.source_path);
    let ok = result.is_ok();
    let counted = ctx
        .job
        .update(|p| p.finish_file(&name, &task.source_path, task.size_bytes, ok));

    match result {
        Ok(written) if !counted => {
            debug!(
                "folder_transfer_done_after_halt: {} {} bytes={}",
                ctx.job_id(),
                task.source_path,
                written
            );
        }
        Ok(written) => {
            debug!(
                "folder_transfer_done: {} {} bytes={}",
                ctx.job_id(),
                task.source_path,
                written
            );
            ctx.job.emit(JobEvent::FileComplete {
                job_id: ctx.job_id().to_string(),
                source_path: task.source_path,
                dest_path: task.dest_local_path,
                size_bytes: task.size_bytes,
            });
        }
        Err(e) => {
            warn!(
                "folder_transfer_failed: {} {} error={}",
                ctx.job_id(),
                task.source_path,
                e
            );
        }
    }
}
