//! Background work for an open document
//!
//! [`BackgroundTasks`] owns the scheduler and worker pool for one document.
//! Page renders, exports and area OCR are submitted as jobs; results come
//! back as [`TaskEvent`]s from [`BackgroundTasks::poll`] on the control
//! thread. A render result is only delivered while its page is still relevant
//! and still the page at that index.

use std::collections::HashMap;
use std::io;
use std::ops::Range;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use doc_model::{Annotation, DocumentState, Frame, Page, PageId};
use pagemark_scheduler::{
    CancellationToken, Completion, Job, JobExecutor, JobId, JobOutcome, JobPriority, JobScheduler,
    JobType, VisiblePages, WorkerPool, WorkerPoolConfig,
};
use pdf_engine::{DocumentHandle, PdfEngine, RenderRequest, RgbaImage};

use crate::config::ExportConfig;
use crate::ocr::{self, OcrConfig, OcrService};
use crate::pdf_export::{BakeError, BakeOutput, Baker};

/// Zoom used for OCR input bitmaps, in percent
const OCR_SCALE_PERCENT: u32 = 200;

/// What a finished job produced
#[derive(Debug)]
pub enum TaskResult {
    PageImage { page_index: usize, page_id: PageId, bitmap: RgbaImage },
    Baked(BakeOutput),
    Recognized { page_index: usize, annotations: Vec<Annotation> },
}

/// Result delivered to the control thread
#[derive(Debug)]
pub enum TaskEvent {
    PageRendered { job_id: JobId, page_index: usize, page_id: PageId, bitmap: RgbaImage },
    ExportFinished { job_id: JobId, output: BakeOutput },
    TextRecognized { job_id: JobId, page_index: usize, annotations: Vec<Annotation> },
    Failed { job_id: JobId, job_type: JobType, error: String },
}

/// Inputs of queued jobs, keyed by job id
#[derive(Debug, Default)]
struct Payloads {
    /// Current page list in visual order
    pages: Vec<Page>,
    exports: HashMap<JobId, DocumentState>,
    ocr_areas: HashMap<JobId, Frame>,
}

impl Payloads {
    fn release(&mut self, job_id: JobId) {
        self.exports.remove(&job_id);
        self.ocr_areas.remove(&job_id);
    }

    #[cfg(test)]
    fn held(&self) -> usize {
        self.exports.len() + self.ocr_areas.len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct BackgroundTasks {
    scheduler: Arc<JobScheduler>,
    pool: Option<WorkerPool>,
    completions: Receiver<Completion<TaskResult>>,
    payloads: Arc<Mutex<Payloads>>,
    visible: VisiblePages,
    next_export: u64,
    ocr_language: String,
}

fn render_page(
    engine: &Mutex<Box<dyn PdfEngine + Send>>,
    handle: DocumentHandle,
    source_page: u32,
    scale_percent: u32,
    rotation: u16,
    clip_to_unrotated: bool,
) -> Result<RgbaImage, String> {
    let engine = lock(engine);
    let source_index = source_page.saturating_sub(1);
    let rotation = if clip_to_unrotated {
        // undo the page's own /Rotate so the bitmap matches annotation space
        let own = engine.page_rotation(handle, source_index).map_err(|e| e.to_string())?;
        (360 - own) % 360
    } else {
        rotation
    };
    let request = RenderRequest {
        page_index: source_index,
        scale: scale_percent as f32 / 100.0,
        rotation,
        clip: None,
    };
    engine.render_page(handle, request).map_err(|e| e.to_string())
}

fn executor(
    engine: Box<dyn PdfEngine + Send>,
    handle: DocumentHandle,
    ocr_service: Arc<dyn OcrService>,
    ocr_config: OcrConfig,
    export_config: ExportConfig,
    payloads: Arc<Mutex<Payloads>>,
) -> JobExecutor<TaskResult> {
    let engine = Mutex::new(engine);

    Arc::new(move |job: &Job, token: &CancellationToken| -> Result<TaskResult, String> {
        match &job.job_type {
            JobType::RenderPage { page_index, scale_percent, rotation } => {
                let page = lock(&payloads).pages.get(*page_index).copied();
                let page = page.ok_or_else(|| format!("page {page_index} no longer exists"))?;
                let bitmap =
                    render_page(&engine, handle, page.original_index, *scale_percent, *rotation, false)?;
                Ok(TaskResult::PageImage { page_index: *page_index, page_id: page.id, bitmap })
            }
            JobType::Export { export_id } => {
                let state = lock(&payloads).exports.remove(&job.id);
                let state = state.ok_or_else(|| format!("export {export_id} has no document"))?;
                let baker = Baker::new(export_config.clone()).with_cancellation(token.clone());
                match baker.bake(&state) {
                    Ok(output) => Ok(TaskResult::Baked(output)),
                    Err(BakeError::Cancelled) => Err("cancelled".to_owned()),
                    Err(err) => Err(err.to_string()),
                }
            }
            JobType::Ocr { page_index, language } => {
                let (page, area) = {
                    let mut payloads = lock(&payloads);
                    let area = payloads.ocr_areas.remove(&job.id);
                    (payloads.pages.get(*page_index).copied(), area)
                };
                let page = page.ok_or_else(|| format!("page {page_index} no longer exists"))?;
                let area = area.ok_or_else(|| format!("OCR job {} has no area", job.id))?;

                let bitmap = render_page(&engine, handle, page.original_index, OCR_SCALE_PERCENT, 0, true)?;
                if token.is_cancelled() {
                    return Err("cancelled".to_owned());
                }
                let config = ocr_config.clone().with_language(language.clone());
                let annotations = ocr::recognize_area(ocr_service.as_ref(), &bitmap, *page_index, area, &config)
                    .map_err(|e| e.to_string())?;
                Ok(TaskResult::Recognized { page_index: *page_index, annotations })
            }
        }
    })
}

impl BackgroundTasks {
    /// Start workers for the document behind `handle`, already opened in `engine`.
    pub fn start(
        engine: Box<dyn PdfEngine + Send>,
        handle: DocumentHandle,
        pages: &[Page],
        ocr_service: Arc<dyn OcrService>,
        ocr_config: OcrConfig,
        export_config: ExportConfig,
        pool_config: WorkerPoolConfig,
    ) -> io::Result<Self> {
        let scheduler = Arc::new(JobScheduler::new());
        let payloads = Arc::new(Mutex::new(Payloads { pages: pages.to_vec(), ..Payloads::default() }));
        let ocr_language = ocr_config.language.clone();
        let executor = executor(engine, handle, ocr_service, ocr_config, export_config, payloads.clone());
        let (pool, completions) = WorkerPool::start(scheduler.clone(), executor, pool_config)?;

        Ok(Self {
            scheduler,
            pool: Some(pool),
            completions,
            payloads,
            visible: VisiblePages::new(pages.len()),
            next_export: 0,
            ocr_language,
        })
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn visible(&self) -> &VisiblePages {
        &self.visible
    }

    /// Track a page list change (reorder, delete). Renders of pages that no
    /// longer exist are cancelled.
    pub fn set_pages(&mut self, pages: &[Page]) -> usize {
        lock(&self.payloads).pages = pages.to_vec();
        self.visible.set_page_count(pages.len());
        self.scheduler.cancel_irrelevant_renders(&self.visible)
    }

    /// Set the pages on screen and drop queued renders that became irrelevant.
    pub fn set_viewport(&mut self, visible: Range<usize>) -> usize {
        let left = self.visible.update(visible);
        let cancelled = self.scheduler.cancel_irrelevant_renders(&self.visible);
        if cancelled > 0 {
            log::debug!("pages {left:?} left the viewport, cancelled {cancelled} renders");
        }
        cancelled
    }

    /// Queue a render of a relevant page. Pages outside the viewport and its
    /// margin are not rendered.
    pub fn request_render(&self, page_index: usize, scale_percent: u32, rotation: u16) -> Option<JobId> {
        let priority = self.visible.priority_for(page_index)?;
        let (job_id, _) =
            self.scheduler.submit(priority, JobType::RenderPage { page_index, scale_percent, rotation });
        Some(job_id)
    }

    /// Queue an export of `state`; the token cancels it cooperatively.
    pub fn request_export(&mut self, state: DocumentState) -> (JobId, CancellationToken) {
        self.next_export += 1;
        let export_id = self.next_export;
        let mut payloads = lock(&self.payloads);
        let (job_id, token) = self.scheduler.submit(JobPriority::Export, JobType::Export { export_id });
        payloads.exports.insert(job_id, state);
        (job_id, token)
    }

    /// Queue recognition of `area` (page percentages) on a page.
    pub fn request_ocr(&self, page_index: usize, area: Frame) -> JobId {
        // held across submit so a worker cannot pick the job up before its area is known
        let mut payloads = lock(&self.payloads);
        let (job_id, _) = self.scheduler.submit(
            JobPriority::Ocr,
            JobType::Ocr { page_index, language: self.ocr_language.clone() },
        );
        payloads.ocr_areas.insert(job_id, area);
        job_id
    }

    /// Cancel a job and drop whatever input it was still holding.
    pub fn cancel(&self, job_id: JobId) -> bool {
        let cancelled = self.scheduler.cancel_job(job_id);
        lock(&self.payloads).release(job_id);
        cancelled
    }

    /// Turn a completion into an event, dropping cancelled jobs and renders
    /// of pages that are no longer relevant.
    fn accept(&self, completion: Completion<TaskResult>) -> Option<TaskEvent> {
        let mut payloads = lock(&self.payloads);
        payloads.release(completion.job_id);
        accept_completion(&self.visible, &payloads.pages, completion)
    }

    /// Drain finished jobs without blocking.
    pub fn poll(&self) -> Vec<TaskEvent> {
        self.completions.try_iter().filter_map(|completion| self.accept(completion)).collect()
    }

    /// Block until the next deliverable event or until `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Option<TaskEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.completions.recv_timeout(remaining) {
                Ok(completion) => {
                    if let Some(event) = self.accept(completion) {
                        return Some(event);
                    }
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Cancel everything and stop the workers. Used when the document closes.
    pub fn close(mut self) {
        let cancelled = self.scheduler.cancel_all();
        {
            let mut payloads = lock(&self.payloads);
            payloads.exports.clear();
            payloads.ocr_areas.clear();
        }
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
        log::debug!("background tasks closed, {cancelled} queued jobs dropped");
    }
}

fn accept_completion(
    visible: &VisiblePages,
    pages: &[Page],
    completion: Completion<TaskResult>,
) -> Option<TaskEvent> {
    let Completion { job_id, job_type, outcome } = completion;
    match outcome {
        JobOutcome::Cancelled => None,
        JobOutcome::Failed(error) => {
            log::warn!("job {job_id} ({job_type:?}) failed: {error}");
            Some(TaskEvent::Failed { job_id, job_type, error })
        }
        JobOutcome::Completed(TaskResult::PageImage { page_index, page_id, bitmap }) => {
            if !visible.is_relevant(page_index) {
                log::debug!("dropping stale render of page {page_index}");
                return None;
            }
            if pages.get(page_index).map(|page| page.id) != Some(page_id) {
                log::debug!("dropping render of page {page_index}: the page moved");
                return None;
            }
            Some(TaskEvent::PageRendered { job_id, page_index, page_id, bitmap })
        }
        JobOutcome::Completed(TaskResult::Baked(output)) => Some(TaskEvent::ExportFinished { job_id, output }),
        JobOutcome::Completed(TaskResult::Recognized { page_index, annotations }) => {
            Some(TaskEvent::TextRecognized { job_id, page_index, annotations })
        }
    }
}
