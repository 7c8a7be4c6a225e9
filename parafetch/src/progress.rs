//! Progress reporting for parallel jobs.
//!
//! Workers bump per-worker atomic counters; a reporter thread polls them and
//! hands aggregated snapshots to a callback.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default interval between progress reports.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Snapshot of a job's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub job_id: u64,
    /// Bytes written so far across all workers.
    pub bytes_downloaded: u64,
    /// Expected total; 0 when unknown.
    pub total_bytes: u64,
    pub workers_completed: usize,
    pub workers: usize,
}

/// Callback receiving progress snapshots.
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Per-worker counters shared between workers and the reporter.
#[derive(Debug)]
pub struct ProgressCounters {
    worker_bytes: Vec<AtomicU64>,
    completed: AtomicUsize,
    done: AtomicBool,
}

impl ProgressCounters {
    pub fn new(workers: usize) -> Self {
        Self {
            worker_bytes: (0..workers).map(|_| AtomicU64::new(0)).collect(),
            completed: AtomicUsize::new(0),
            done: AtomicBool::new(false),
        }
    }

    pub fn workers(&self) -> usize {
        self.worker_bytes.len()
    }

    /// Total bytes across all workers.
    pub fn total_bytes(&self) -> u64 {
        self.worker_bytes
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .sum()
    }

    pub fn completed_workers(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// Add freshly written bytes for a worker.
    pub fn add(&self, worker: usize, bytes: u64) {
        if let Some(counter) = self.worker_bytes.get(worker) {
            counter.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    /// Forget a worker's bytes before it retries from the start of its range.
    pub fn reset(&self, worker: usize) {
        if let Some(counter) = self.worker_bytes.get(worker) {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn mark_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn signal_done(&self) {
        self.done.store(true, Ordering::Release);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn snapshot(&self, job_id: u64, total_bytes: u64) -> Progress {
        Progress {
            job_id,
            bytes_downloaded: self.total_bytes(),
            total_bytes,
            workers_completed: self.completed_workers(),
            workers: self.workers(),
        }
    }
}

/// Background thread polling [`ProgressCounters`].
///
/// Emits one final snapshot after the counters are marked done. Dropping the
/// reporter stops it.
pub struct ProgressReporter {
    handle: Option<JoinHandle<()>>,
    counters: Arc<ProgressCounters>,
}

impl ProgressReporter {
    pub fn start(
        job_id: u64,
        counters: Arc<ProgressCounters>,
        total_bytes: u64,
        callback: ProgressCallback,
        poll_interval: Duration,
    ) -> Self {
        let polled = Arc::clone(&counters);
        let handle = thread::spawn(move || {
            while !polled.is_done() {
                callback(polled.snapshot(job_id, total_bytes));
                thread::sleep(poll_interval);
            }
            callback(polled.snapshot(job_id, total_bytes));
        });

        Self {
            handle: Some(handle),
            counters,
        }
    }

    /// Stop polling and wait for the final report.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.counters.signal_done();
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_counters_aggregate() {
        let counters = ProgressCounters::new(3);
        counters.add(0, 100);
        counters.add(2, 50);
        counters.add(2, 50);
        counters.add(7, 1000); // out of range, ignored

        assert_eq!(counters.total_bytes(), 200);
        counters.reset(2);
        assert_eq!(counters.total_bytes(), 100);
    }

    #[test]
    fn test_completed_and_done() {
        let counters = ProgressCounters::new(2);
        counters.mark_completed();
        assert_eq!(counters.completed_workers(), 1);
        assert!(!counters.is_done());
        counters.signal_done();
        assert!(counters.is_done());
    }

    #[test]
    fn test_reporter_emits_final_snapshot() {
        let counters = Arc::new(ProgressCounters::new(2));
        let seen: Arc<Mutex<Vec<Progress>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let reporter = ProgressReporter::start(
            7,
            Arc::clone(&counters),
            1000,
            Arc::new(move |p| sink.lock().push(p)),
            Duration::from_millis(5),
        );

        counters.add(0, 600);
        counters.add(1, 400);
        counters.mark_completed();
        counters.mark_completed();
        reporter.stop();

        let seen = seen.lock();
        let last = seen.last().copied().unwrap();
        assert_eq!(
            last,
            Progress {
                job_id: 7,
                bytes_downloaded: 1000,
                total_bytes: 1000,
                workers_completed: 2,
                workers: 2,
            }
        );
    }
}
