//! Bounded worker pool for freshly discovered complaints.
//!
//! N workers drain one bounded job channel; results flow back over a
//! bounded result channel. Submission blocks when the job buffer is full,
//! which is the backpressure contract: no job is ever dropped. Closing the
//! job side lets workers finish their current job and exit; the result
//! channel closes only once every worker has dropped its sender.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use ombud_browser::PortalSession;
use ombud_channel::Notifier;
use ombud_types::{ComplaintRef, OmbudError, ProcessResult};

/// Job and result buffer depth.
const CHANNEL_CAPACITY: usize = 100;

/// Per-worker pause between jobs, keeping the aggregate send rate well
/// under the chat platform's limit.
const INTER_JOB_PAUSE: Duration = Duration::from_millis(100);

/// A running pool of detail-fetch workers.
///
/// The worker body is injected as a closure so the channel mechanics can
/// be exercised without a live browser; production uses
/// [`process_complaint`].
pub struct DetailPool {
    jobs_tx: mpsc::Sender<ComplaintRef>,
    results_rx: mpsc::Receiver<ProcessResult>,
}

impl DetailPool {
    /// Start `worker_count` workers running `handler` for each job.
    pub fn spawn<F, Fut>(worker_count: usize, handler: F) -> Self
    where
        F: Fn(ComplaintRef) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ProcessResult> + Send + 'static,
    {
        let (jobs_tx, jobs_rx) = mpsc::channel::<ComplaintRef>(CHANNEL_CAPACITY);
        let (results_tx, results_rx) = mpsc::channel::<ProcessResult>(CHANNEL_CAPACITY);
        let jobs_rx = Arc::new(Mutex::new(jobs_rx));

        for worker_id in 0..worker_count {
            let jobs_rx = Arc::clone(&jobs_rx);
            let results_tx = results_tx.clone();
            let handler = handler.clone();

            tokio::spawn(async move {
                debug!(worker_id, "pool worker started");
                loop {
                    let job = jobs_rx.lock().await.recv().await;
                    let Some(job) = job else { break };

                    let display_id = job.display_id.clone();
                    let result = handler(job).await;
                    if let Some(e) = &result.error {
                        warn!(worker_id, display_id = %display_id, error = %e, "job failed");
                    }
                    if results_tx.send(result).await.is_err() {
                        break; // collector went away
                    }
                }
                debug!(worker_id, "pool worker stopped");
            });
        }

        // Workers hold the remaining result senders; the channel closes
        // when the last of them exits.
        drop(results_tx);

        Self { jobs_tx, results_rx }
    }

    /// Queue one job. Blocks while the job buffer is saturated.
    pub async fn submit(&self, job: ComplaintRef) -> Result<(), OmbudError> {
        self.jobs_tx
            .send(job)
            .await
            .map_err(|_| OmbudError::Fetch("worker pool is shut down".into()))
    }

    /// Stop accepting jobs and hand back the draining result stream.
    pub fn finish(self) -> mpsc::Receiver<ProcessResult> {
        drop(self.jobs_tx);
        self.results_rx
    }

    /// Run a whole batch through the pool and collect every result.
    ///
    /// Submission happens on a side task so collection can start
    /// immediately; with a bounded job buffer this is what keeps large
    /// batches from deadlocking the caller.
    pub async fn run<F, Fut>(
        worker_count: usize,
        jobs: Vec<ComplaintRef>,
        handler: F,
    ) -> Vec<ProcessResult>
    where
        F: Fn(ComplaintRef) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ProcessResult> + Send + 'static,
    {
        let pool = Self::spawn(worker_count, handler);
        let jobs_tx = pool.jobs_tx.clone();

        let feeder = tokio::spawn(async move {
            for job in jobs {
                if jobs_tx.send(job).await.is_err() {
                    break;
                }
            }
        });

        let mut results_rx = pool.finish();
        let mut results = Vec::new();
        while let Some(result) = results_rx.recv().await {
            results.push(result);
        }
        let _ = feeder.await;
        results
    }
}

/// Production worker body: fetch the detail record through the shared
/// session, send the notification, report the message id.
pub async fn process_complaint(
    session: Arc<PortalSession>,
    notifier: Arc<Notifier>,
    detail_url: String,
    job: ComplaintRef,
) -> ProcessResult {
    let detail = match crate::detail::fetch_detail(&session, &detail_url, &job.display_id).await {
        Ok(detail) => detail,
        Err(e) => return ProcessResult::failed(job.display_id, e),
    };

    let cached_name = detail.complainant_name.clone();
    let result = match notifier.send_complaint(&detail).await {
        Ok(message_id) => ProcessResult::ok(job.display_id, message_id, cached_name),
        Err(e) => ProcessResult::failed(job.display_id, e),
    };

    // Pace the chat sends: with ten workers this stays an order of
    // magnitude below the platform's per-second message limit.
    tokio::time::sleep(INTER_JOB_PAUSE).await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn job(id: &str) -> ComplaintRef {
        ComplaintRef {
            display_id: id.to_string(),
            portal_id: format!("p-{id}"),
        }
    }

    #[tokio::test]
    async fn processes_every_job() {
        let jobs: Vec<_> = (0..25).map(|i| job(&format!("C{i}"))).collect();
        let results = DetailPool::run(4, jobs, |j| async move {
            ProcessResult::ok(j.display_id, "1", "n")
        })
        .await;
        assert_eq!(results.len(), 25);
    }

    #[tokio::test]
    async fn failed_jobs_do_not_kill_workers() {
        let jobs: Vec<_> = (0..10).map(|i| job(&format!("C{i}"))).collect();
        let results = DetailPool::run(2, jobs, |j| async move {
            if j.display_id.ends_with('3') {
                ProcessResult::failed(j.display_id, OmbudError::Fetch("boom".into()))
            } else {
                ProcessResult::ok(j.display_id, "1", "n")
            }
        })
        .await;

        assert_eq!(results.len(), 10);
        assert_eq!(results.iter().filter(|r| r.error.is_some()).count(), 1);
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_worker_count() {
        static ACTIVE: AtomicUsize = AtomicUsize::new(0);
        static PEAK: AtomicUsize = AtomicUsize::new(0);

        let jobs: Vec<_> = (0..20).map(|i| job(&format!("C{i}"))).collect();
        let results = DetailPool::run(3, jobs, |j| async move {
            let now = ACTIVE.fetch_add(1, Ordering::SeqCst) + 1;
            PEAK.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            ACTIVE.fetch_sub(1, Ordering::SeqCst);
            ProcessResult::ok(j.display_id, "1", "n")
        })
        .await;

        assert_eq!(results.len(), 20);
        assert!(PEAK.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn submit_blocks_when_buffer_is_full() {
        // One worker parked on a long job; once the job buffer is full on
        // top of that, the next submit must block rather than drop.
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let started_tx = Arc::new(std::sync::Mutex::new(Some(started_tx)));

        let pool = DetailPool::spawn(1, move |j: ComplaintRef| {
            let started_tx = Arc::clone(&started_tx);
            async move {
                if let Some(tx) = started_tx.lock().unwrap().take() {
                    let _ = tx.send(());
                }
                tokio::time::sleep(Duration::from_secs(5)).await;
                ProcessResult::ok(j.display_id, "1", "n")
            }
        });

        // Park the worker, then fill the buffer to capacity.
        pool.submit(job("parked")).await.unwrap();
        started_rx.await.unwrap();
        for i in 0..CHANNEL_CAPACITY {
            tokio::time::timeout(Duration::from_secs(1), pool.submit(job(&format!("C{i}"))))
                .await
                .expect("buffered submit should not block")
                .unwrap();
        }

        let overflow = tokio::time::timeout(
            Duration::from_millis(100),
            pool.submit(job("overflow")),
        )
        .await;
        assert!(overflow.is_err(), "submit past capacity should block");
    }

    #[tokio::test]
    async fn finish_drains_and_closes_results() {
        let pool = DetailPool::spawn(2, |j: ComplaintRef| async move {
            ProcessResult::ok(j.display_id, "1", "n")
        });
        for i in 0..5 {
            pool.submit(job(&format!("C{i}"))).await.unwrap();
        }

        let mut rx = pool.finish();
        let mut count = 0;
        while let Some(_result) = rx.recv().await {
            count += 1;
        }
        // recv() returned None: the channel closed only after all workers
        // drained, with nothing lost.
        assert_eq!(count, 5);
    }
}
