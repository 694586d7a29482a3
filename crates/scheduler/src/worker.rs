//! Worker pool for background job execution
//!
//! Workers pull jobs from the [`JobScheduler`], run them through the executor
//! callback and send one [`Completion`] per job over a channel. A job whose
//! token was cancelled before or during execution is reported as
//! [`JobOutcome::Cancelled`]; its result, if any, is dropped.

use std::io;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::{CancellationToken, Job, JobId, JobScheduler, JobType};

/// Callback that performs a job
///
/// It should check `token.is_cancelled()` between units of work and return
/// early once cancelled. Errors are reported as [`JobOutcome::Failed`].
pub type JobExecutor<T> = Arc<dyn Fn(&Job, &CancellationToken) -> Result<T, String> + Send + Sync>;

#[derive(Debug)]
pub enum JobOutcome<T> {
    Completed(T),
    Cancelled,
    Failed(String),
}

/// Result message for one job
#[derive(Debug)]
pub struct Completion<T> {
    pub job_id: JobId,
    pub job_type: JobType,
    pub outcome: JobOutcome<T>,
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads. Default: logical CPU count.
    pub num_workers: usize,

    /// How long an idle worker sleeps before polling again. Default: 20ms.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { num_workers: num_cpus(), poll_interval: Duration::from_millis(20) }
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self { num_workers: num_workers.max(1), ..Self::default() }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Pool of worker threads executing scheduler jobs
///
/// # Example
///
/// ```
/// use pagemark_scheduler::{
///     CancellationToken, Job, JobOutcome, JobPriority, JobScheduler, JobType, WorkerPool,
///     WorkerPoolConfig,
/// };
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let scheduler = Arc::new(JobScheduler::new());
/// let executor = Arc::new(|job: &Job, _token: &CancellationToken| -> Result<usize, String> {
///     Ok(job.job_type.page_index().unwrap_or_default())
/// });
///
/// let (pool, completions) =
///     WorkerPool::start(scheduler.clone(), executor, WorkerPoolConfig::new(1)).unwrap();
/// scheduler.submit(
///     JobPriority::Visible,
///     JobType::RenderPage { page_index: 2, scale_percent: 100, rotation: 0 },
/// );
///
/// let completion = completions.recv_timeout(Duration::from_secs(5)).unwrap();
/// assert!(matches!(completion.outcome, JobOutcome::Completed(2)));
/// pool.shutdown();
/// ```
pub struct WorkerPool {
    workers: Vec<Worker>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawn the workers and return the pool with the completion channel.
    pub fn start<T: Send + 'static>(
        scheduler: Arc<JobScheduler>,
        executor: JobExecutor<T>,
        config: WorkerPoolConfig,
    ) -> io::Result<(Self, Receiver<Completion<T>>)> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = channel();
        let mut pool = Self { workers: Vec::with_capacity(config.num_workers), shutdown };

        for id in 0..config.num_workers {
            let spawned = Worker::spawn(
                id,
                scheduler.clone(),
                executor.clone(),
                sender.clone(),
                pool.shutdown.clone(),
                config.poll_interval,
            );
            match spawned {
                Ok(worker) => pool.workers.push(worker),
                Err(error) => {
                    pool.stop_and_join();
                    return Err(error);
                }
            }
        }

        log::debug!("started {} pagemark workers", pool.workers.len());
        Ok((pool, receiver))
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Signal workers to stop and wait for their current jobs to finish.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for worker in self.workers.drain(..) {
            worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

struct Worker {
    id: usize,
    thread: JoinHandle<()>,
}

impl Worker {
    fn spawn<T: Send + 'static>(
        id: usize,
        scheduler: Arc<JobScheduler>,
        executor: JobExecutor<T>,
        completions: Sender<Completion<T>>,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> io::Result<Self> {
        let thread = thread::Builder::new()
            .name(format!("pagemark-worker-{id}"))
            .spawn(move || Self::run(scheduler, executor, completions, shutdown, poll_interval))?;

        Ok(Self { id, thread })
    }

    fn run<T>(
        scheduler: Arc<JobScheduler>,
        executor: JobExecutor<T>,
        completions: Sender<Completion<T>>,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) {
        while !shutdown.load(Ordering::Acquire) {
            let Some(job) = scheduler.next_job() else {
                thread::sleep(poll_interval);
                continue;
            };

            let token = scheduler.get_cancellation_token(job.id).unwrap_or_default();
            let outcome = if token.is_cancelled() {
                JobOutcome::Cancelled
            } else {
                match executor(&job, &token) {
                    _ if token.is_cancelled() => JobOutcome::Cancelled,
                    Ok(value) => JobOutcome::Completed(value),
                    Err(message) => {
                        log::warn!("job {} failed: {message}", job.id);
                        JobOutcome::Failed(message)
                    }
                }
            };

            scheduler.complete_job(job.id);
            let completion = Completion { job_id: job.id, job_type: job.job_type, outcome };
            if completions.send(completion).is_err() {
                log::debug!("completion receiver dropped; discarding result of job {}", job.id);
            }
        }
    }

    fn join(self) {
        if self.thread.join().is_err() {
            log::error!("pagemark worker {} panicked", self.id);
        }
    }
}

fn num_cpus() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobPriority;
    use std::sync::Mutex;

    const WAIT: Duration = Duration::from_secs(5);

    fn render(page_index: usize) -> JobType {
        JobType::RenderPage { page_index, scale_percent: 100, rotation: 0 }
    }

    fn page_of(job: &Job) -> usize {
        job.job_type.page_index().unwrap_or(usize::MAX)
    }

    #[test]
    fn config_builder() {
        let config = WorkerPoolConfig::new(0).with_poll_interval(Duration::from_millis(5));
        assert_eq!(config.num_workers, 1);
        assert_eq!(config.poll_interval, Duration::from_millis(5));
        assert!(WorkerPoolConfig::default().num_workers > 0);
    }

    #[test]
    fn every_job_reports_a_completion() {
        let scheduler = Arc::new(JobScheduler::new());
        let executor: JobExecutor<usize> =
            Arc::new(|job: &Job, _token: &CancellationToken| -> Result<usize, String> {
                Ok(page_of(job))
            });
        let (pool, completions) =
            WorkerPool::start(scheduler.clone(), executor, WorkerPoolConfig::new(2)).unwrap();
        assert_eq!(pool.num_workers(), 2);

        for page in 0..5 {
            scheduler.submit(JobPriority::Visible, render(page));
        }

        let mut pages: Vec<usize> = (0..5)
            .map(|_| match completions.recv_timeout(WAIT).unwrap().outcome {
                JobOutcome::Completed(page) => page,
                other => panic!("unexpected outcome {other:?}"),
            })
            .collect();
        pages.sort_unstable();
        assert_eq!(pages, vec![0, 1, 2, 3, 4]);

        pool.shutdown();
    }

    #[test]
    fn single_worker_follows_priority_order() {
        let scheduler = Arc::new(JobScheduler::new());
        scheduler.submit(JobPriority::Ocr, JobType::Ocr { page_index: 3, language: "eng".into() });
        scheduler.submit(JobPriority::Export, JobType::Export { export_id: 9 });
        scheduler.submit(JobPriority::Visible, render(1));
        scheduler.submit(JobPriority::Adjacent, render(2));

        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = order.clone();
        let executor: JobExecutor<()> =
            Arc::new(move |job: &Job, _token: &CancellationToken| -> Result<(), String> {
            seen.lock().unwrap().push(job.priority);
            Ok(())
        });
        let (pool, completions) =
            WorkerPool::start(scheduler, executor, WorkerPoolConfig::new(1)).unwrap();

        for _ in 0..4 {
            completions.recv_timeout(WAIT).unwrap();
        }
        assert_eq!(
            *order.lock().unwrap(),
            vec![JobPriority::Visible, JobPriority::Adjacent, JobPriority::Export, JobPriority::Ocr]
        );

        pool.shutdown();
    }

    #[test]
    fn cancelled_running_job_is_never_completed() {
        let scheduler = Arc::new(JobScheduler::new());
        let (started_tx, started_rx) = channel();
        let started_tx = Mutex::new(started_tx);
        let executor: JobExecutor<&'static str> =
            Arc::new(move |_job: &Job, token: &CancellationToken| -> Result<&'static str, String> {
            started_tx.lock().unwrap().send(()).unwrap();
            while !token.is_cancelled() {
                thread::sleep(Duration::from_millis(2));
            }
            Ok("stale result")
        });
        let (pool, completions) =
            WorkerPool::start(scheduler.clone(), executor, WorkerPoolConfig::new(1)).unwrap();

        let (job_id, _token) = scheduler.submit(JobPriority::Visible, render(0));
        started_rx.recv_timeout(WAIT).unwrap();
        assert!(scheduler.cancel_job(job_id));

        let completion = completions.recv_timeout(WAIT).unwrap();
        assert_eq!(completion.job_id, job_id);
        assert!(matches!(completion.outcome, JobOutcome::Cancelled));

        pool.shutdown();
    }

    #[test]
    fn executor_errors_become_failures() {
        let scheduler = Arc::new(JobScheduler::new());
        let executor: JobExecutor<()> =
            Arc::new(|_job: &Job, _token: &CancellationToken| -> Result<(), String> {
                Err("engine closed".to_owned())
            });
        let (pool, completions) =
            WorkerPool::start(scheduler.clone(), executor, WorkerPoolConfig::new(1)).unwrap();

        scheduler.submit(JobPriority::Export, JobType::Export { export_id: 1 });
        match completions.recv_timeout(WAIT).unwrap().outcome {
            JobOutcome::Failed(message) => assert_eq!(message, "engine closed"),
            other => panic!("unexpected outcome {other:?}"),
        }

        pool.shutdown();
    }
}
