//! Stage worker loop
//!
//! Workers pull chunks from the shared work queue until they receive
//! [`WorkItem::Stop`] or the queue closes. Each transform runs on the blocking
//! pool; an error or panic is logged and replaced by the stage's placeholder
//! so the collector still receives exactly one result per chunk.

use super::{PartialResult, WorkItem};
use crate::stages::StageTransform;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn, Instrument};

/// Per-worker counters reported on exit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub worker_id: usize,
    pub processed: usize,
    pub failed: usize,
}

pub(crate) type SharedQueue = Arc<Mutex<mpsc::Receiver<WorkItem>>>;

/// Consume chunks until stopped
pub(crate) async fn run_worker(
    worker_id: usize,
    queue: SharedQueue,
    results: mpsc::UnboundedSender<PartialResult>,
    transform: Arc<dyn StageTransform>,
) -> WorkerStats {
    let mut stats = WorkerStats {
        worker_id,
        ..WorkerStats::default()
    };

    loop {
        let item = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };

        let chunk = match item {
            Some(WorkItem::Chunk(chunk)) => chunk,
            Some(WorkItem::Stop) => {
                debug!(worker = worker_id, "Received stop");
                break;
            },
            None => {
                debug!(worker = worker_id, "Work queue closed");
                break;
            },
        };

        let seq = chunk.seq;
        let rows = chunk.table.len();
        let span = tracing::Span::current();
        let job = Arc::clone(&transform);
        let outcome = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            job.apply(&chunk.table)
        })
        .await;

        let partial = match outcome {
            Ok(Ok(outputs)) => PartialResult {
                seq,
                rows,
                outputs,
                failed: false,
            },
            Ok(Err(e)) => {
                warn!(worker = worker_id, chunk = seq, error = %e, "Transform failed, using placeholder");
                PartialResult::placeholder(seq, rows, transform.as_ref())
            },
            Err(e) => {
                error!(worker = worker_id, chunk = seq, error = %e, "Transform panicked, using placeholder");
                PartialResult::placeholder(seq, rows, transform.as_ref())
            },
        };

        if partial.failed {
            stats.failed += 1;
        }
        stats.processed += 1;

        if results.send(partial).is_err() {
            warn!(worker = worker_id, "Result queue closed, stopping");
            break;
        }
    }

    stats
}

/// Spawn `count` workers on the current runtime
pub(crate) fn spawn_workers(
    count: usize,
    queue: SharedQueue,
    results: &mpsc::UnboundedSender<PartialResult>,
    transform: &Arc<dyn StageTransform>,
) -> Vec<tokio::task::JoinHandle<WorkerStats>> {
    (0..count)
        .map(|id| {
            let span = tracing::debug_span!("worker", id);
            tokio::spawn(
                run_worker(id, Arc::clone(&queue), results.clone(), Arc::clone(transform))
                    .instrument(span),
            )
        })
        .collect()
}
