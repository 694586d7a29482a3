//! Pagemark Scheduler Library
//!
//! Background job scheduling for page renders, export and OCR.
//!
//! Every submission gets an explicit [`JobId`] and a [`CancellationToken`].
//! Jobs run in priority order (visible page renders, adjacent page renders,
//! export, OCR) with FIFO ordering inside each level. A [`WorkerPool`]
//! executes them on background threads and reports each result as a
//! [`Completion`] message, so the control thread never shares mutable state
//! with workers.
//!
//! # Example
//!
//! ```
//! use pagemark_scheduler::{JobPriority, JobScheduler, JobType};
//!
//! let scheduler = JobScheduler::new();
//!
//! let (job_id, token) = scheduler.submit(
//!     JobPriority::Visible,
//!     JobType::RenderPage { page_index: 0, scale_percent: 100, rotation: 0 },
//! );
//!
//! if let Some(job) = scheduler.next_job() {
//!     assert_eq!(job.id, job_id);
//!     assert!(!token.is_cancelled());
//!     scheduler.complete_job(job.id);
//! }
//!
//! // The page scrolled out of view
//! scheduler.cancel_page_jobs(0);
//! ```

mod cancel;
mod priority;
mod scheduler;
mod viewport;
mod worker;

pub use cancel::{CancellationRegistry, CancellationToken};
pub use priority::{Job, JobId, JobPriority, JobType};
pub use scheduler::{JobScheduler, SchedulerStats};
pub use viewport::VisiblePages;
pub use worker::{Completion, JobExecutor, JobOutcome, WorkerPool, WorkerPoolConfig};
