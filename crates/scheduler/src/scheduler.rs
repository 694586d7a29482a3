//! Job scheduler
//!
//! Owns the priority queue and the cancellation registry, and tracks job
//! lifecycle statistics.

use std::sync::Mutex;

use crate::cancel::{CancellationRegistry, CancellationToken};
use crate::priority::{Job, JobId, JobPriority, JobType, PriorityQueue};
use crate::viewport::VisiblePages;

/// Job scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_cancelled: u64,
    /// Jobs waiting in the queue
    pub queue_size: usize,
}

impl SchedulerStats {
    /// Jobs submitted but neither finished nor cancelled
    pub fn pending_jobs(&self) -> u64 {
        self.jobs_submitted - self.jobs_completed - self.jobs_cancelled
    }
}

/// Thread-safe scheduler shared between the control thread and workers
pub struct JobScheduler {
    queue: PriorityQueue,
    stats: Mutex<SchedulerStats>,
    cancellation: CancellationRegistry,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self {
            queue: PriorityQueue::new(),
            stats: Mutex::new(SchedulerStats::default()),
            cancellation: CancellationRegistry::new(),
        }
    }

    /// Queue a job. Returns its id and the token its worker will observe.
    pub fn submit(&self, priority: JobPriority, job_type: JobType) -> (JobId, CancellationToken) {
        let job_id = self.queue.push(priority, job_type);
        let token = self.cancellation.register(job_id);

        self.stats.lock().unwrap().jobs_submitted += 1;
        log::debug!("submitted job {job_id} at {priority:?}");

        (job_id, token)
    }

    /// Take the highest priority job. Its token stays registered until
    /// [`JobScheduler::complete_job`].
    pub fn next_job(&self) -> Option<Job> {
        self.queue.pop()
    }

    pub fn complete_job(&self, job_id: JobId) {
        self.stats.lock().unwrap().jobs_completed += 1;
        self.cancellation.unregister(job_id);
    }

    /// Cancel one job. A queued job is dropped; a running job has its token
    /// flagged and is expected to stop cooperatively.
    pub fn cancel_job(&self, job_id: JobId) -> bool {
        let token_cancelled = self.cancellation.cancel(job_id);
        let removed = self.queue.remove_if(|job| job.id == job_id);

        if removed.is_empty() {
            return token_cancelled;
        }

        self.stats.lock().unwrap().jobs_cancelled += removed.len() as u64;
        self.cancellation.unregister(job_id);
        true
    }

    /// Cancel every queued job matching `predicate`; returns how many were dropped.
    pub fn cancel_jobs_if<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Job) -> bool,
    {
        let removed = self.queue.remove_if(predicate);
        if removed.is_empty() {
            return 0;
        }

        let ids: Vec<JobId> = removed.iter().map(|job| job.id).collect();
        self.cancellation.cancel_many(&ids);
        for job_id in &ids {
            self.cancellation.unregister(*job_id);
        }

        self.stats.lock().unwrap().jobs_cancelled += ids.len() as u64;
        ids.len()
    }

    /// Cancel queued page renders and OCR for one page
    pub fn cancel_page_jobs(&self, page_index: usize) -> usize {
        self.cancel_jobs_if(|job| job.job_type.page_index() == Some(page_index))
    }

    /// Cancel queued renders whose page is no longer relevant to the viewport
    pub fn cancel_irrelevant_renders(&self, visible: &VisiblePages) -> usize {
        self.cancel_jobs_if(|job| match job.job_type {
            JobType::RenderPage { page_index, .. } => !visible.is_relevant(page_index),
            _ => false,
        })
    }

    /// Cancel everything, queued and running. Used when a document closes.
    pub fn cancel_all(&self) -> usize {
        let queued = self.queue.drain();
        let running = self.cancellation.cancel_all();

        for job in &queued {
            self.cancellation.unregister(job.id);
        }
        self.stats.lock().unwrap().jobs_cancelled += queued.len() as u64;

        log::debug!("cancelled {} queued and {} registered jobs", queued.len(), running);
        queued.len()
    }

    pub fn pending_jobs(&self) -> usize {
        self.queue.len()
    }

    pub fn has_pending_jobs(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = self.stats.lock().unwrap().clone();
        stats.queue_size = self.queue.len();
        stats
    }

    pub fn peek_next_job(&self) -> Option<Job> {
        self.queue.peek()
    }

    pub fn pending_jobs_list(&self) -> Vec<Job> {
        self.queue.jobs()
    }

    pub fn get_cancellation_token(&self, job_id: JobId) -> Option<CancellationToken> {
        self.cancellation.get(job_id)
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(page_index: usize) -> JobType {
        JobType::RenderPage { page_index, scale_percent: 100, rotation: 0 }
    }

    #[test]
    fn submit_and_complete_updates_stats() {
        let scheduler = JobScheduler::new();
        assert!(!scheduler.has_pending_jobs());

        let (job_id, token) = scheduler.submit(JobPriority::Visible, render(0));
        assert_eq!(scheduler.pending_jobs(), 1);
        assert!(!token.is_cancelled());

        let job = scheduler.next_job().unwrap();
        assert_eq!(job.id, job_id);
        scheduler.complete_job(job_id);

        let stats = scheduler.stats();
        assert_eq!(stats.jobs_submitted, 1);
        assert_eq!(stats.jobs_completed, 1);
        assert_eq!(stats.jobs_cancelled, 0);
        assert_eq!(stats.pending_jobs(), 0);
        assert!(scheduler.get_cancellation_token(job_id).is_none());
    }

    #[test]
    fn cancel_queued_job_flags_token_and_removes_it() {
        let scheduler = JobScheduler::new();
        let (job_id, token) = scheduler.submit(JobPriority::Export, JobType::Export { export_id: 1 });

        assert!(scheduler.cancel_job(job_id));
        assert!(token.is_cancelled());
        assert_eq!(scheduler.pending_jobs(), 0);
        assert_eq!(scheduler.stats().jobs_cancelled, 1);
        assert!(!scheduler.cancel_job(999));
    }

    #[test]
    fn cancel_running_job_only_flags_token() {
        let scheduler = JobScheduler::new();
        let (job_id, token) = scheduler.submit(JobPriority::Visible, render(0));
        let _running = scheduler.next_job().unwrap();

        assert!(scheduler.cancel_job(job_id));
        assert!(token.is_cancelled());
        assert_eq!(scheduler.stats().jobs_cancelled, 0);
    }

    #[test]
    fn cancel_page_jobs_leaves_other_pages() {
        let scheduler = JobScheduler::new();
        scheduler.submit(JobPriority::Visible, render(0));
        scheduler.submit(JobPriority::Visible, render(1));
        scheduler.submit(JobPriority::Ocr, JobType::Ocr { page_index: 0, language: "eng".into() });
        scheduler.submit(JobPriority::Export, JobType::Export { export_id: 1 });

        assert_eq!(scheduler.cancel_page_jobs(0), 2);
        assert_eq!(scheduler.pending_jobs(), 2);
        assert_eq!(scheduler.next_job().unwrap().job_type, render(1));
    }

    #[test]
    fn irrelevant_renders_are_cancelled() {
        let scheduler = JobScheduler::new();
        for page in 0..6 {
            scheduler.submit(JobPriority::Adjacent, render(page));
        }
        scheduler.submit(JobPriority::Ocr, JobType::Ocr { page_index: 5, language: "eng".into() });

        let mut visible = VisiblePages::new(6);
        visible.update(0..1);

        // pages 0 and 1 stay relevant
        assert_eq!(scheduler.cancel_irrelevant_renders(&visible), 4);
        assert_eq!(scheduler.pending_jobs(), 3);
    }

    #[test]
    fn cancel_all_reaches_running_jobs() {
        let scheduler = JobScheduler::new();
        let (_, running_token) = scheduler.submit(JobPriority::Visible, render(0));
        let (_, queued_token) = scheduler.submit(JobPriority::Visible, render(1));
        let _running = scheduler.next_job().unwrap();

        assert_eq!(scheduler.cancel_all(), 1);
        assert!(running_token.is_cancelled());
        assert!(queued_token.is_cancelled());
        assert!(!scheduler.has_pending_jobs());
    }
}
