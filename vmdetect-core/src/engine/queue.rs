//! Background analysis queue.
//!
//! ## Worker lifecycle
//!
//! ```text
//! submit() ──► push job ──► worker idle? ──► spawn worker
//!                                   │
//!                 worker: pop front ─┴─► process ──► callback + broadcast
//!                         queue empty ──► mark idle, exit
//! ```
//!
//! One worker at most; jobs run strictly in submission order. The queue mutex
//! guards only the job list and worker bookkeeping; processing and callbacks
//! run outside it. Errors and panics (in processing or in the callback) become
//! `error` outcomes and never take the worker down.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn};

use crate::audio::AudioSource;
use crate::error::{DetectError, Result};
use crate::report::{DetectionResult, JobOutcome, JobStatus, JobTicket};

/// Outcome broadcast capacity for slow subscribers.
const BROADCAST_CAP: usize = 256;

pub type JobCallback = Box<dyn FnOnce(&JobOutcome) + Send + 'static>;

/// What the worker runs for each job.
pub type JobProcessor = Arc<dyn Fn(&AnalysisJob) -> Result<DetectionResult> + Send + Sync>;

pub struct AnalysisJob {
    pub id: String,
    pub source: AudioSource,
    pub language: String,
    pub queued_at: DateTime<Utc>,
    callback: Option<JobCallback>,
    enqueued: Instant,
}

impl std::fmt::Debug for AnalysisJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisJob")
            .field("id", &self.id)
            .field("source", &self.source.describe())
            .field("language", &self.language)
            .field("queued_at", &self.queued_at)
            .finish_non_exhaustive()
    }
}

struct QueueState {
    jobs: VecDeque<AnalysisJob>,
    worker: Option<JoinHandle<()>>,
    worker_active: bool,
    accepting: bool,
    next_seq: u64,
}

struct Shared {
    state: Mutex<QueueState>,
    processor: JobProcessor,
    outcome_tx: broadcast::Sender<JobOutcome>,
}

pub struct JobQueue {
    shared: Arc<Shared>,
}

impl JobQueue {
    pub fn new(processor: JobProcessor) -> Self {
        let (outcome_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    jobs: VecDeque::new(),
                    worker: None,
                    worker_active: false,
                    accepting: true,
                    next_seq: 0,
                }),
                processor,
                outcome_tx,
            }),
        }
    }

    /// Subscribe to every job outcome (completed, error, cancelled).
    pub fn subscribe(&self) -> broadcast::Receiver<JobOutcome> {
        self.shared.outcome_tx.subscribe()
    }

    /// Enqueue a job and make sure a worker is draining the queue.
    ///
    /// # Errors
    /// - `DetectError::QueueClosed` after `shutdown()`.
    /// - `DetectError::Io` if the worker thread cannot be spawned.
    pub fn submit(
        &self,
        source: AudioSource,
        language: &str,
        callback: Option<JobCallback>,
    ) -> Result<JobTicket> {
        let finished_worker;
        let ticket;
        {
            let mut state = self.shared.state.lock();
            if !state.accepting {
                return Err(DetectError::QueueClosed);
            }

            state.next_seq += 1;
            let queued_at = Utc::now();
            let job_id = format!("job_{}_{}", queued_at.timestamp_millis(), state.next_seq);

            state.jobs.push_back(AnalysisJob {
                id: job_id.clone(),
                source,
                language: language.to_string(),
                queued_at,
                callback,
                enqueued: Instant::now(),
            });
            ticket = JobTicket {
                job_id,
                queue_position: state.jobs.len(),
            };

            finished_worker = if state.worker_active {
                None
            } else {
                let shared = Arc::clone(&self.shared);
                let spawned = thread::Builder::new()
                    .name("vmdetect-queue".into())
                    .spawn(move || worker_loop(shared));
                match spawned {
                    Ok(handle) => {
                        state.worker_active = true;
                        state.worker.replace(handle)
                    }
                    Err(e) => {
                        state.jobs.pop_back();
                        return Err(DetectError::Io(e));
                    }
                }
            };
        }

        // The previous worker already marked itself idle; this join is immediate.
        if let Some(handle) = finished_worker {
            let _ = handle.join();
        }

        debug!(job_id = %ticket.job_id, position = ticket.queue_position, "job queued");
        Ok(ticket)
    }

    /// Remove a job that has not started yet. Its callback receives a
    /// `cancelled` outcome on the calling thread. Returns false when the job is
    /// unknown, running or finished.
    pub fn cancel(&self, job_id: &str) -> bool {
        let job = {
            let mut state = self.shared.state.lock();
            let Some(pos) = state.jobs.iter().position(|j| j.id == job_id) else {
                return false;
            };
            state.jobs.remove(pos)
        };
        let Some(job) = job else {
            return false;
        };

        info!(job_id, "job cancelled");
        let wait = job.enqueued.elapsed().as_secs_f64();
        let result = DetectionResult::failure("job cancelled", 0.0);
        deliver(&self.shared, job, JobStatus::Cancelled, result, wait);
        true
    }

    /// Jobs waiting to start.
    pub fn len(&self) -> usize {
        self.shared.state.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_worker_active(&self) -> bool {
        self.shared.state.lock().worker_active
    }

    /// Stop accepting jobs, let the worker drain what is queued, and join it.
    /// Idempotent. Safe to call from a job callback (no self-join).
    pub fn shutdown(&self) {
        let handle = {
            let mut state = self.shared.state.lock();
            if state.accepting {
                info!(pending = state.jobs.len(), "analysis queue shutting down");
            }
            state.accepting = false;
            state.worker.take()
        };
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("JobQueue")
            .field("queued", &state.jobs.len())
            .field("worker_active", &state.worker_active)
            .field("accepting", &state.accepting)
            .finish()
    }
}

fn worker_loop(shared: Arc<Shared>) {
    debug!("queue worker started");
    loop {
        let job = {
            let mut state = shared.state.lock();
            match state.jobs.pop_front() {
                Some(job) => job,
                None => {
                    state.worker_active = false;
                    break;
                }
            }
        };
        run_job(&shared, job);
    }
    debug!("queue worker idle, exiting");
}

fn run_job(shared: &Shared, job: AnalysisJob) {
    let span = info_span!("job", id = %job.id);
    let _enter = span.enter();

    let wait = job.enqueued.elapsed().as_secs_f64();
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| (shared.processor)(&job)));
    let elapsed = started.elapsed().as_secs_f64();

    let (status, result) = match outcome {
        Ok(Ok(result)) => (JobStatus::Completed, result),
        Ok(Err(e)) => {
            error!(error = %e, "job failed");
            (JobStatus::Error, DetectionResult::failure(e.to_string(), elapsed))
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            error!(panic = %msg, "job panicked");
            (
                JobStatus::Error,
                DetectionResult::failure(format!("analysis panicked: {msg}"), elapsed),
            )
        }
    };

    deliver(shared, job, status, result, wait);
}

fn deliver(
    shared: &Shared,
    mut job: AnalysisJob,
    status: JobStatus,
    result: DetectionResult,
    wait: f64,
) {
    let outcome = JobOutcome {
        job_id: job.id.clone(),
        status,
        result,
        queue_wait_seconds: wait,
        queued_at: job.queued_at,
    };

    if let Some(callback) = job.callback.take() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(&outcome))) {
            warn!(
                job_id = %outcome.job_id,
                panic = %panic_message(payload.as_ref()),
                "job callback panicked"
            );
        }
    }

    // No subscribers is fine.
    let _ = shared.outcome_tx.send(outcome);
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crossbeam_channel::{unbounded, Receiver, Sender};

    use crate::report::DetectionMethod;

    fn ok_result(confidence: f32) -> DetectionResult {
        let mut r = DetectionResult::failure("unused", 0.0);
        r.error = None;
        r.confidence = confidence;
        r.method = DetectionMethod::None;
        r
    }

    /// Processor that fails on `b"bad"`, panics on `b"panic"` and otherwise
    /// returns a result whose confidence is the payload length / 100.
    fn scripted(delay: Duration) -> JobProcessor {
        Arc::new(move |job: &AnalysisJob| {
            std::thread::sleep(delay);
            match &job.source {
                AudioSource::Bytes(b) if b == b"bad" => {
                    Err(DetectError::UnsupportedFormat("bad bytes".into()))
                }
                AudioSource::Bytes(b) if b == b"panic" => panic!("processor exploded"),
                AudioSource::Bytes(b) => Ok(ok_result(b.len() as f32 / 100.0)),
                AudioSource::Path(_) => Ok(ok_result(0.0)),
            }
        })
    }

    fn collecting() -> (Sender<JobOutcome>, Receiver<JobOutcome>) {
        unbounded()
    }

    fn callback(tx: &Sender<JobOutcome>) -> Option<JobCallback> {
        let tx = tx.clone();
        Some(Box::new(move |o: &JobOutcome| {
            let _ = tx.send(o.clone());
        }))
    }

    fn bytes(b: &[u8]) -> AudioSource {
        AudioSource::Bytes(b.to_vec())
    }

    #[test]
    fn jobs_complete_in_submission_order_with_slow_callbacks() {
        let queue = JobQueue::new(scripted(Duration::from_millis(10)));
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut ids = Vec::new();

        for i in 0..5u8 {
            let order = Arc::clone(&order);
            let ticket = queue
                .submit(
                    bytes(&vec![i; (i as usize) + 1]),
                    "en-US",
                    Some(Box::new(move |o: &JobOutcome| {
                        std::thread::sleep(Duration::from_millis(15));
                        order.lock().push(o.job_id.clone());
                    })),
                )
                .unwrap();
            ids.push(ticket.job_id);
        }

        queue.shutdown();
        assert_eq!(*order.lock(), ids);
    }

    #[test]
    fn failing_and_panicking_jobs_are_isolated() {
        let queue = JobQueue::new(scripted(Duration::ZERO));
        let (tx, rx) = collecting();

        for payload in [&b"ok"[..], &b"bad"[..], &b"panic"[..], &b"fine"[..]] {
            queue.submit(bytes(payload), "en-US", callback(&tx)).unwrap();
        }
        queue.shutdown();

        let outcomes: Vec<JobOutcome> = rx.try_iter().collect();
        let statuses: Vec<JobStatus> = outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![JobStatus::Completed, JobStatus::Error, JobStatus::Error, JobStatus::Completed]
        );

        let bad = &outcomes[1].result;
        assert!(!bad.is_voicemail);
        assert!(bad.error.as_deref().unwrap().contains("bad bytes"));
        assert!(outcomes[2].result.error.as_deref().unwrap().contains("processor exploded"));
        assert_eq!(outcomes[3].result.confidence, 0.04);
    }

    #[test]
    fn callback_panic_does_not_stop_the_worker() {
        let queue = JobQueue::new(scripted(Duration::ZERO));
        let (tx, rx) = collecting();

        queue
            .submit(bytes(b"a"), "en-US", Some(Box::new(|_: &JobOutcome| panic!("callback boom"))))
            .unwrap();
        queue.submit(bytes(b"b"), "en-US", callback(&tx)).unwrap();
        queue.shutdown();

        let outcome = rx.try_recv().expect("second job delivered");
        assert_eq!(outcome.status, JobStatus::Completed);
    }

    #[test]
    fn queued_job_can_be_cancelled_running_job_cannot() {
        let (gate_tx, gate_rx) = unbounded::<()>();
        let (started_tx, started_rx) = unbounded::<String>();
        let processed = Arc::new(Mutex::new(Vec::new()));

        let processor: JobProcessor = {
            let processed = Arc::clone(&processed);
            Arc::new(move |job: &AnalysisJob| {
                let _ = started_tx.send(job.id.clone());
                let _ = gate_rx.recv_timeout(Duration::from_secs(5));
                processed.lock().push(job.id.clone());
                Ok(ok_result(0.1))
            })
        };
        let queue = JobQueue::new(processor);
        let (tx, rx) = collecting();

        let a = queue.submit(bytes(b"a"), "en-US", callback(&tx)).unwrap();
        let running = started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(running, a.job_id);

        let b = queue.submit(bytes(b"b"), "en-US", callback(&tx)).unwrap();
        let c = queue.submit(bytes(b"c"), "en-US", callback(&tx)).unwrap();
        assert_eq!(b.queue_position, 1);
        assert_eq!(c.queue_position, 2);

        assert!(!queue.cancel(&a.job_id));
        assert!(queue.cancel(&b.job_id));
        assert!(!queue.cancel(&b.job_id));
        assert_eq!(queue.len(), 1);

        let cancelled = rx.try_recv().expect("cancel delivered immediately");
        assert_eq!(cancelled.job_id, b.job_id);
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(!cancelled.result.is_voicemail);

        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();
        queue.shutdown();

        assert_eq!(*processed.lock(), vec![a.job_id, c.job_id]);
        let rest: Vec<JobStatus> = rx.try_iter().map(|o| o.status).collect();
        assert_eq!(rest, vec![JobStatus::Completed, JobStatus::Completed]);
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let queue = JobQueue::new(scripted(Duration::ZERO));
        queue.shutdown();
        assert!(matches!(
            queue.submit(bytes(b"x"), "en-US", None),
            Err(DetectError::QueueClosed)
        ));
    }

    #[test]
    fn subscribers_see_every_outcome() {
        let queue = JobQueue::new(scripted(Duration::ZERO));
        let mut sub = queue.subscribe();
        let t1 = queue.submit(bytes(b"one"), "en-US", None).unwrap();
        let t2 = queue.submit(bytes(b"bad"), "en-US", None).unwrap();
        queue.shutdown();

        let first = sub.try_recv().unwrap();
        let second = sub.try_recv().unwrap();
        assert_eq!(first.job_id, t1.job_id);
        assert_eq!(second.job_id, t2.job_id);
        assert_eq!(second.status, JobStatus::Error);
    }

    #[test]
    fn worker_restarts_after_going_idle() {
        let queue = JobQueue::new(scripted(Duration::ZERO));
        let (tx, rx) = collecting();

        queue.submit(bytes(b"first"), "en-US", callback(&tx)).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.is_worker_active() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!queue.is_worker_active());

        queue.submit(bytes(b"second"), "en-US", callback(&tx)).unwrap();
        let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.result.confidence, 0.06);
    }

    #[test]
    fn job_ids_are_unique() {
        let queue = JobQueue::new(scripted(Duration::ZERO));
        let a = queue.submit(bytes(b"x"), "en-US", None).unwrap();
        let b = queue.submit(bytes(b"x"), "en-US", None).unwrap();
        assert_ne!(a.job_id, b.job_id);
        assert!(a.job_id.starts_with("job_"));
    }
}
