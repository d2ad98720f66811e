//! Per-stage worker pool
//!
//! Topology of one stage run:
//!
//! ```text
//! extractor (blocking pool) --bounded work queue--> N workers --unbounded--> collector
//! ```
//!
//! The extractor blocks while the work queue is full. The collector drains
//! results while extraction is still running and learns the expected result
//! count once extraction ends. After the last chunk one [`WorkItem::Stop`] per
//! worker is queued; the pool then waits for the collector and every worker.

mod worker;

pub use worker::WorkerStats;

use crate::error::{PipelineError, Result};
use crate::extract::{Chunk, ChunkSink, ExtractSummary, SourceExtractor};
use crate::stages::StageTransform;
use rollup_common::TabularStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Message on the work queue
#[derive(Debug)]
pub enum WorkItem {
    Chunk(Chunk),
    /// Poison pill: the receiving worker exits
    Stop,
}

/// Output of one chunk, one table per stage artifact
#[derive(Debug, Clone)]
pub struct PartialResult {
    pub seq: usize,
    pub rows: usize,
    pub outputs: Vec<TabularStore>,
    /// The transform failed and `outputs` is an empty placeholder
    pub failed: bool,
}

impl PartialResult {
    pub(crate) fn placeholder(seq: usize, rows: usize, transform: &dyn StageTransform) -> Self {
        Self {
            seq,
            rows,
            outputs: transform.placeholder(),
            failed: true,
        }
    }
}

/// Sizing of a stage's pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// How long the collector waits for outstanding results once extraction
    /// has finished
    pub result_timeout: Duration,
}

/// Everything a stage run produced before aggregation
#[derive(Debug)]
pub struct PoolOutcome {
    pub extraction: ExtractSummary,
    pub submitted: usize,
    pub results: Vec<PartialResult>,
    pub timed_out: bool,
    pub workers: Vec<WorkerStats>,
}

impl PoolOutcome {
    pub fn received(&self) -> usize {
        self.results.len()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.failed).count()
    }
}

/// Feeds extracted chunks into the work queue
struct QueueSink {
    tx: mpsc::Sender<WorkItem>,
    next_seq: usize,
}

impl ChunkSink for QueueSink {
    fn submit(&mut self, origin: &str, table: TabularStore) -> Result<()> {
        let chunk = Chunk {
            seq: self.next_seq,
            origin: origin.to_string(),
            table,
        };
        self.tx
            .blocking_send(WorkItem::Chunk(chunk))
            .map_err(|_| PipelineError::QueueClosed)?;
        self.next_seq += 1;
        Ok(())
    }
}

impl QueueSink {
    /// Queue one stop per worker; closed queues are ignored
    fn stop_workers(&self, workers: usize) {
        for _ in 0..workers {
            if self.tx.blocking_send(WorkItem::Stop).is_err() {
                break;
            }
        }
    }
}

struct Collected {
    results: Vec<PartialResult>,
    timed_out: bool,
}

/// Drain results until the expected count arrives, all workers hang up, or
/// the timeout elapses after the count is known.
async fn collect(
    mut results: mpsc::UnboundedReceiver<PartialResult>,
    mut expected_rx: oneshot::Receiver<usize>,
    timeout: Duration,
) -> Collected {
    let mut received = Vec::new();
    let mut expected: Option<usize> = None;
    let mut expecting = true;
    let mut deadline: Option<Instant> = None;

    loop {
        if expected.is_some_and(|n| received.len() >= n) {
            break;
        }

        let at = deadline;
        let wait = async move {
            match at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            msg = results.recv() => match msg {
                Some(partial) => received.push(partial),
                None => break,
            },
            count = &mut expected_rx, if expecting => {
                expecting = false;
                if let Ok(n) = count {
                    debug!(expected = n, received = received.len(), "Expected result count known");
                    expected = Some(n);
                    deadline = Some(Instant::now() + timeout);
                }
            },
            _ = wait => {
                warn!(
                    expected = ?expected,
                    received = received.len(),
                    timeout_secs = timeout.as_secs_f64(),
                    "Timed out waiting for results, continuing with partial data"
                );
                return Collected { results: received, timed_out: true };
            },
        }
    }

    Collected {
        results: received,
        timed_out: false,
    }
}

/// Runs one stage: extraction, parallel transforms and result collection
#[derive(Debug, Clone)]
pub struct WorkerPool {
    config: PoolConfig,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config: PoolConfig {
                workers: config.workers.max(1),
                queue_capacity: config.queue_capacity.max(1),
                ..config
            },
        }
    }

    pub fn workers(&self) -> usize {
        self.config.workers
    }

    /// Extract every pending chunk from `extractor`, transform them in
    /// parallel and return the collected partials.
    ///
    /// Fails when extraction fails. Workers are stopped and joined first.
    pub async fn run(
        &self,
        extractor: Box<dyn SourceExtractor>,
        transform: Arc<dyn StageTransform>,
    ) -> Result<PoolOutcome> {
        let workers = self.config.workers;
        let (work_tx, work_rx) = mpsc::channel::<WorkItem>(self.config.queue_capacity);
        let (result_tx, result_rx) = mpsc::unbounded_channel::<PartialResult>();
        let (expected_tx, expected_rx) = oneshot::channel::<usize>();

        let handles = worker::spawn_workers(
            workers,
            Arc::new(Mutex::new(work_rx)),
            &result_tx,
            &transform,
        );
        drop(result_tx);

        let collector = tokio::spawn(collect(result_rx, expected_rx, self.config.result_timeout));

        let source = extractor.describe();
        let span = tracing::Span::current();
        let extraction = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let mut sink = QueueSink {
                tx: work_tx,
                next_seq: 0,
            };
            let summary = extractor.extract(&mut sink);
            sink.stop_workers(workers);
            (summary, sink.next_seq)
        })
        .await;

        let (summary, submitted) = match extraction {
            Ok((summary, submitted)) => (summary, submitted),
            Err(e) => (Err(PipelineError::from_join(e)), 0),
        };
        // a dropped sender tells the collector to wait for hang-up instead
        if summary.is_ok() {
            let _ = expected_tx.send(submitted);
        } else {
            drop(expected_tx);
        }

        let collected = match collector.await {
            Ok(collected) => collected,
            Err(e) => {
                warn!(error = %e, "Result collector failed");
                Collected {
                    results: Vec::new(),
                    timed_out: false,
                }
            },
        };

        let stats = self.join_workers(handles, collected.timed_out).await;

        let extraction = summary?;
        info!(
            source = %source,
            submitted,
            received = collected.results.len(),
            workers,
            "Chunks processed"
        );

        Ok(PoolOutcome {
            extraction,
            submitted,
            results: collected.results,
            timed_out: collected.timed_out,
            workers: stats,
        })
    }

    async fn join_workers(
        &self,
        handles: Vec<tokio::task::JoinHandle<WorkerStats>>,
        timed_out: bool,
    ) -> Vec<WorkerStats> {
        let mut stats = Vec::with_capacity(handles.len());
        for handle in handles {
            if timed_out && !handle.is_finished() {
                // a stuck transform must not hold the stage hostage
                warn!("Abandoning a worker still busy after the result timeout");
                handle.abort();
                continue;
            }
            match handle.await {
                Ok(s) => stats.push(s),
                Err(e) => warn!(error = %e, "Worker task ended abnormally"),
            }
        }
        stats
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::stages::{ArtifactSpec, EVENT_ARTIFACTS};
    use rollup_common::Value;

    /// Emits `chunks` single-row chunks, optionally failing afterwards
    struct Synthetic {
        chunks: usize,
        fail: bool,
    }

    impl SourceExtractor for Synthetic {
        fn describe(&self) -> String {
            "synthetic".into()
        }

        fn extract(&self, sink: &mut dyn ChunkSink) -> Result<ExtractSummary> {
            for i in 0..self.chunks {
                let event = if i % 2 == 0 { "play" } else { "stop" };
                let table = TabularStore::from_rows(
                    ["event_type", "count"],
                    vec![vec![Value::from(event), Value::Int(1)]],
                )?;
                sink.submit("synthetic", table)?;
            }
            if self.fail {
                return Err(PipelineError::source_unavailable("gone mid-way"));
            }
            Ok(ExtractSummary {
                chunks: self.chunks,
                rows: self.chunks,
                ..ExtractSummary::default()
            })
        }
    }

    struct Identity {
        delay: Duration,
    }

    impl StageTransform for Identity {
        fn name(&self) -> &'static str {
            "identity"
        }

        fn artifacts(&self) -> &'static [ArtifactSpec] {
            EVENT_ARTIFACTS
        }

        fn apply(&self, chunk: &TabularStore) -> Result<Vec<TabularStore>> {
            std::thread::sleep(self.delay);
            Ok(vec![EVENT_ARTIFACTS[0].fold(chunk)?])
        }
    }

    fn pool(workers: usize, timeout: Duration) -> WorkerPool {
        WorkerPool::new(PoolConfig {
            workers,
            queue_capacity: workers * 2,
            result_timeout: timeout,
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_every_chunk_yields_one_result() {
        let outcome = pool(3, Duration::from_secs(30))
            .run(
                Box::new(Synthetic { chunks: 25, fail: false }),
                Arc::new(Identity { delay: Duration::ZERO }),
            )
            .await
            .unwrap();

        assert_eq!(outcome.submitted, 25);
        assert_eq!(outcome.received(), 25);
        assert!(!outcome.timed_out);
        assert_eq!(outcome.workers.len(), 3);
        assert_eq!(outcome.workers.iter().map(|w| w.processed).sum::<usize>(), 25);

        let mut seqs: Vec<usize> = outcome.results.iter().map(|r| r.seq).collect();
        seqs.sort_unstable();
        assert_eq!(seqs, (0..25).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_empty_source_stops_workers() {
        let outcome = pool(4, Duration::from_secs(30))
            .run(
                Box::new(Synthetic { chunks: 0, fail: false }),
                Arc::new(Identity { delay: Duration::ZERO }),
            )
            .await
            .unwrap();
        assert_eq!(outcome.received(), 0);
        assert_eq!(outcome.workers.len(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_extraction_failure_is_reported() {
        let err = pool(2, Duration::from_secs(30))
            .run(
                Box::new(Synthetic { chunks: 3, fail: true }),
                Arc::new(Identity { delay: Duration::ZERO }),
            )
            .await
            .unwrap_err();
        assert!(err.is_source_unavailable());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_keeps_partial_results() {
        let outcome = pool(1, Duration::from_millis(50))
            .run(
                Box::new(Synthetic { chunks: 2, fail: false }),
                Arc::new(Identity { delay: Duration::from_millis(400) }),
            )
            .await
            .unwrap();

        assert!(outcome.timed_out);
        assert!(outcome.received() < 2);
    }
}
