//! Priority-based job queue
//!
//! Jobs are ordered by priority, then by insertion order so that jobs of the
//! same priority run first-in first-out.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;

/// Job priority levels
///
/// Higher numeric values run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    /// Text recognition (runs when nothing else is waiting)
    Ocr = 0,

    /// Baking the document into an output file
    Export = 1,

    /// Renders of pages next to the viewport (prefetch)
    Adjacent = 2,

    /// Renders of pages currently on screen
    Visible = 3,
}

/// Unique job identifier
pub type JobId = u64;

/// Work a job performs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobType {
    /// Render one page at a zoom level and visual rotation
    RenderPage { page_index: usize, scale_percent: u32, rotation: u16 },

    /// Bake a document; the payload is looked up by `export_id`
    Export { export_id: u64 },

    /// Recognize text inside a region of a page
    Ocr { page_index: usize, language: String },
}

impl JobType {
    /// Page the job belongs to, if it is page-bound
    pub fn page_index(&self) -> Option<usize> {
        match self {
            JobType::RenderPage { page_index, .. } | JobType::Ocr { page_index, .. } => {
                Some(*page_index)
            }
            JobType::Export { .. } => None,
        }
    }

    pub fn is_render(&self) -> bool {
        matches!(self, JobType::RenderPage { .. })
    }
}

/// A scheduled job
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub priority: JobPriority,
    pub job_type: JobType,
    insertion_order: u64,
}

impl Job {
    pub fn new(id: JobId, priority: JobPriority, job_type: JobType, insertion_order: u64) -> Self {
        Self { id, priority, job_type, insertion_order }
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // BinaryHeap is a max heap: earlier insertions must compare greater
            Ordering::Equal => other.insertion_order.cmp(&self.insertion_order),
            ordering => ordering,
        }
    }
}

/// Thread-safe priority queue of jobs
pub struct PriorityQueue {
    state: Mutex<QueueState>,
}

struct QueueState {
    heap: BinaryHeap<Job>,
    next_job_id: JobId,
    insertion_counter: u64,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_job_id: 1,
                insertion_counter: 0,
            }),
        }
    }

    /// Queue a job and return its newly assigned id
    pub fn push(&self, priority: JobPriority, job_type: JobType) -> JobId {
        let mut state = self.state.lock().unwrap();
        let job_id = state.next_job_id;
        state.next_job_id += 1;

        let insertion_order = state.insertion_counter;
        state.insertion_counter += 1;

        state.heap.push(Job::new(job_id, priority, job_type, insertion_order));
        job_id
    }

    pub fn pop(&self) -> Option<Job> {
        self.state.lock().unwrap().heap.pop()
    }

    pub fn peek(&self) -> Option<Job> {
        self.state.lock().unwrap().heap.peek().cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().heap.is_empty()
    }

    /// Drop every queued job and return them
    pub fn drain(&self) -> Vec<Job> {
        let mut state = self.state.lock().unwrap();
        state.heap.drain().collect()
    }

    /// Remove the jobs matching `predicate` and return them
    pub fn remove_if<F>(&self, predicate: F) -> Vec<Job>
    where
        F: Fn(&Job) -> bool,
    {
        let mut state = self.state.lock().unwrap();
        let (removed, kept): (Vec<Job>, Vec<Job>) =
            state.heap.drain().partition(|job| predicate(job));
        state.heap = kept.into_iter().collect();
        removed
    }

    /// Snapshot of queued jobs, in no particular order
    pub fn jobs(&self) -> Vec<Job> {
        self.state.lock().unwrap().heap.iter().cloned().collect()
    }
}

impl Default for PriorityQueue {
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

    fn ocr(page_index: usize) -> JobType {
        JobType::Ocr { page_index, language: "eng".to_owned() }
    }

    #[test]
    fn priority_levels_are_ordered() {
        assert!(JobPriority::Visible > JobPriority::Adjacent);
        assert!(JobPriority::Adjacent > JobPriority::Export);
        assert!(JobPriority::Export > JobPriority::Ocr);
    }

    #[test]
    fn jobs_pop_in_priority_order() {
        let queue = PriorityQueue::new();

        queue.push(JobPriority::Ocr, ocr(0));
        queue.push(JobPriority::Export, JobType::Export { export_id: 1 });
        queue.push(JobPriority::Adjacent, render(1));
        queue.push(JobPriority::Visible, render(0));

        let order: Vec<JobPriority> = std::iter::from_fn(|| queue.pop()).map(|job| job.priority).collect();
        assert_eq!(
            order,
            vec![JobPriority::Visible, JobPriority::Adjacent, JobPriority::Export, JobPriority::Ocr]
        );
    }

    #[test]
    fn same_priority_is_fifo() {
        let queue = PriorityQueue::new();
        let first = queue.push(JobPriority::Visible, render(0));
        let second = queue.push(JobPriority::Adjacent, render(1));
        let third = queue.push(JobPriority::Visible, render(2));
        let fourth = queue.push(JobPriority::Adjacent, render(3));

        let ids: Vec<JobId> = std::iter::from_fn(|| queue.pop()).map(|job| job.id).collect();
        assert_eq!(ids, vec![first, third, second, fourth]);
    }

    #[test]
    fn peek_does_not_remove() {
        let queue = PriorityQueue::default();
        assert!(queue.peek().is_none());

        let id = queue.push(JobPriority::Visible, render(0));
        queue.push(JobPriority::Ocr, ocr(0));

        assert_eq!(queue.peek().map(|job| job.id), Some(id));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn remove_if_returns_removed_jobs() {
        let queue = PriorityQueue::new();
        queue.push(JobPriority::Ocr, ocr(0));
        queue.push(JobPriority::Ocr, ocr(1));
        queue.push(JobPriority::Export, JobType::Export { export_id: 3 });

        let removed = queue.remove_if(|job| matches!(job.job_type, JobType::Ocr { .. }));
        assert_eq!(removed.len(), 2);
        assert_eq!(queue.len(), 1);
        assert!(matches!(queue.pop().map(|job| job.job_type), Some(JobType::Export { export_id: 3 })));
    }

    #[test]
    fn page_index_of_job_types() {
        assert_eq!(render(4).page_index(), Some(4));
        assert_eq!(ocr(2).page_index(), Some(2));
        assert_eq!(JobType::Export { export_id: 1 }.page_index(), None);
    }
}
