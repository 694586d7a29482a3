//! Annotation store and page store
//!
//! The store owns the page list and every annotation record. It is mutated from
//! a single control thread; observers receive [`StoreEvent`]s over channels
//! obtained from [`DocumentStore::subscribe`].
//!
//! Gestures use a two-phase protocol: a record is inserted as *pending* (or an
//! existing one is edited *transiently*) so it renders live, and is then
//! committed atomically, which emits exactly one notification.

use std::collections::HashSet;
use std::sync::mpsc::{channel, Receiver, Sender};

use crate::annotation::{Annotation, AnnotationId, AnnotationKind, AnnotationPatch, Geometry};
use crate::page::{Page, PageId, RotateDirection};
use crate::state::{DocumentId, DocumentState, ViewPosition};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("page index {index} out of range (document has {page_count} pages)")]
    PageOutOfRange { index: usize, page_count: usize },
    #[error("cannot delete the last remaining page")]
    LastPage,
    #[error("annotation {0} already exists")]
    DuplicateAnnotation(AnnotationId),
    #[error("corrupt document state: {0}")]
    CorruptState(String),
}

/// Change notification delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Added(AnnotationId),
    Updated(AnnotationId),
    Removed(AnnotationId),
    PagesChanged,
}

pub struct DocumentStore {
    id: DocumentId,
    title: String,
    source: Vec<u8>,
    view: ViewPosition,
    pages: Vec<Page>,
    /// Insertion order is z-order
    annotations: Vec<Annotation>,
    pending: HashSet<AnnotationId>,
    revision: u64,
    subscribers: Vec<Sender<StoreEvent>>,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("pages", &self.pages.len())
            .field("annotations", &self.annotations.len())
            .field("pending", &self.pending.len())
            .field("revision", &self.revision)
            .finish()
    }
}

/// Unknown ids are programming errors: loud in debug builds, logged no-ops
/// in release builds.
fn unknown_annotation(operation: &str, id: AnnotationId) {
    debug_assert!(false, "{operation}: unknown annotation {id}");
    log::warn!("{operation}: ignoring unknown annotation {id}");
}

impl DocumentStore {
    /// Create a store for a source document with `page_count` pages in their
    /// original order.
    pub fn new(title: impl Into<String>, source: Vec<u8>, page_count: usize) -> Self {
        let pages = (1..=page_count.max(1) as u32).map(|n| Page::new(PageId(n), n)).collect();

        Self {
            id: DocumentId::new(),
            title: title.into(),
            source,
            view: ViewPosition::default(),
            pages,
            annotations: Vec::new(),
            pending: HashSet::new(),
            revision: 0,
            subscribers: Vec::new(),
        }
    }

    pub fn from_page_count(page_count: usize) -> Self {
        Self::new("Untitled", Vec::new(), page_count)
    }

    /// Rebuild a store from a persisted snapshot, validating every invariant.
    pub fn from_state(state: DocumentState) -> Result<Self, StoreError> {
        if state.pages.is_empty() {
            return Err(StoreError::CorruptState("document has no pages".to_owned()));
        }

        let mut page_ids = HashSet::new();
        for page in &state.pages {
            if !page_ids.insert(page.id) {
                return Err(StoreError::CorruptState(format!("duplicate page id {}", page.id.0)));
            }
            if page.original_index == 0 {
                return Err(StoreError::CorruptState(format!(
                    "page {} has no source page",
                    page.id.0
                )));
            }
        }

        let mut annotation_ids = HashSet::new();
        for annotation in &state.annotations {
            if !annotation_ids.insert(annotation.id()) {
                return Err(StoreError::CorruptState(format!(
                    "duplicate annotation id {}",
                    annotation.id()
                )));
            }
            if annotation.page_index() >= state.pages.len() {
                return Err(StoreError::CorruptState(format!(
                    "annotation {} references page {} of {}",
                    annotation.id(),
                    annotation.page_index(),
                    state.pages.len()
                )));
            }
            if !annotation.geometry().is_on_page() {
                return Err(StoreError::CorruptState(format!(
                    "annotation {} lies outside its page",
                    annotation.id()
                )));
            }
            if let AnnotationKind::Freehand(mark) = annotation.kind() {
                if mark.points.len() < 2 {
                    return Err(StoreError::CorruptState(format!(
                        "freehand annotation {} has fewer than 2 points",
                        annotation.id()
                    )));
                }
            }
        }

        Ok(Self {
            id: state.id,
            title: state.title,
            source: state.source,
            view: state.view,
            pages: state.pages,
            annotations: state.annotations,
            pending: HashSet::new(),
            revision: 0,
            subscribers: Vec::new(),
        })
    }

    /// Committed state of the document; pending records are excluded.
    pub fn snapshot(&self) -> DocumentState {
        DocumentState {
            id: self.id,
            title: self.title.clone(),
            pages: self.pages.clone(),
            annotations: self
                .annotations
                .iter()
                .filter(|annotation| !self.pending.contains(&annotation.id()))
                .cloned()
                .collect(),
            source: self.source.clone(),
            view: self.view,
        }
    }

    pub fn subscribe(&mut self) -> Receiver<StoreEvent> {
        let (sender, receiver) = channel();
        self.subscribers.push(sender);
        receiver
    }

    fn notify(&mut self, event: StoreEvent) {
        log::debug!("store event {event:?} at revision {}", self.revision);
        self.subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    fn bump(&mut self) {
        self.revision += 1;
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn source(&self) -> &[u8] {
        &self.source
    }

    pub fn view(&self) -> &ViewPosition {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut ViewPosition {
        &mut self.view
    }

    /// Monotonic counter incremented by every mutation, transient ones included
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page(&self, index: usize) -> Option<&Page> {
        self.pages.get(index)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn get(&self, id: AnnotationId) -> Option<&Annotation> {
        self.annotations.iter().find(|annotation| annotation.id() == id)
    }

    pub fn contains(&self, id: AnnotationId) -> bool {
        self.get(id).is_some()
    }

    pub fn is_pending(&self, id: AnnotationId) -> bool {
        self.pending.contains(&id)
    }

    /// Annotations on a page in insertion (z) order, pending ones included
    pub fn annotations_on_page(&self, page_index: usize) -> impl Iterator<Item = &Annotation> {
        self.annotations.iter().filter(move |annotation| annotation.page_index() == page_index)
    }

    fn position(&self, id: AnnotationId) -> Option<usize> {
        self.annotations.iter().position(|annotation| annotation.id() == id)
    }

    fn check_page(&self, index: usize) -> Result<(), StoreError> {
        if index < self.pages.len() {
            Ok(())
        } else {
            Err(StoreError::PageOutOfRange { index, page_count: self.pages.len() })
        }
    }

    fn insert(&mut self, annotation: Annotation) -> Result<AnnotationId, StoreError> {
        self.check_page(annotation.page_index())?;
        let id = annotation.id();
        if self.contains(id) {
            return Err(StoreError::DuplicateAnnotation(id));
        }
        self.annotations.push(annotation);
        self.bump();
        Ok(id)
    }

    /// Add a committed annotation and notify subscribers.
    pub fn add(&mut self, annotation: Annotation) -> Result<AnnotationId, StoreError> {
        let id = self.insert(annotation)?;
        self.notify(StoreEvent::Added(id));
        Ok(id)
    }

    /// Apply a partial update and notify subscribers. Returns whether the
    /// record changed.
    pub fn update(&mut self, id: AnnotationId, patch: &AnnotationPatch) -> bool {
        let Some(index) = self.position(id) else {
            unknown_annotation("update", id);
            return false;
        };

        let changed = self.annotations[index].apply_patch(patch);
        if changed {
            self.bump();
            if !self.pending.contains(&id) {
                self.notify(StoreEvent::Updated(id));
            }
        }
        changed
    }

    pub fn remove(&mut self, id: AnnotationId) -> Option<Annotation> {
        let Some(index) = self.position(id) else {
            unknown_annotation("remove", id);
            return None;
        };

        let removed = self.annotations.remove(index);
        self.bump();
        if !self.pending.remove(&id) {
            self.notify(StoreEvent::Removed(id));
        }
        Some(removed)
    }

    /// Insert a record that exists only for the duration of a gesture.
    /// No notification is sent until [`DocumentStore::commit`].
    pub fn insert_pending(&mut self, annotation: Annotation) -> Result<AnnotationId, StoreError> {
        let id = self.insert(annotation)?;
        self.pending.insert(id);
        Ok(id)
    }

    /// Replace geometry without notifying observers.
    pub fn set_geometry_transient(&mut self, id: AnnotationId, geometry: Geometry) -> bool {
        let Some(index) = self.position(id) else {
            unknown_annotation("set_geometry_transient", id);
            return false;
        };

        let changed = self.annotations[index].kind_mut().set_geometry(geometry);
        if changed {
            self.bump();
        }
        changed
    }

    /// Apply a patch without notifying observers.
    pub fn update_transient(&mut self, id: AnnotationId, patch: &AnnotationPatch) -> bool {
        let Some(index) = self.position(id) else {
            unknown_annotation("update_transient", id);
            return false;
        };

        let changed = self.annotations[index].apply_patch(patch);
        if changed {
            self.bump();
        }
        changed
    }

    /// Finish a gesture on `id`: a pending record becomes committed (`Added`),
    /// an existing one reports its transient edits (`Updated`).
    pub fn commit(&mut self, id: AnnotationId) {
        if !self.contains(id) {
            unknown_annotation("commit", id);
            return;
        }

        self.bump();
        if self.pending.remove(&id) {
            self.notify(StoreEvent::Added(id));
        } else {
            self.notify(StoreEvent::Updated(id));
        }
    }

    /// Drop a pending record. Committed records are left untouched.
    pub fn discard_pending(&mut self, id: AnnotationId) -> bool {
        if !self.pending.remove(&id) {
            return false;
        }

        if let Some(index) = self.position(id) {
            self.annotations.remove(index);
            self.bump();
        }
        true
    }

    /// Move the page at `from` so it ends up at `to`, re-indexing annotations.
    pub fn move_page(&mut self, from: usize, to: usize) -> Result<(), StoreError> {
        self.check_page(from)?;
        self.check_page(to)?;
        if from == to {
            return Ok(());
        }

        let page = self.pages.remove(from);
        self.pages.insert(to, page);

        for annotation in &mut self.annotations {
            let index = annotation.page_index();
            let new_index = if index == from {
                to
            } else if from < to && index > from && index <= to {
                index - 1
            } else if to < from && index >= to && index < from {
                index + 1
            } else {
                index
            };
            annotation.set_page_index(new_index);
        }

        log::debug!("moved page {from} to {to}");
        self.bump();
        self.notify(StoreEvent::PagesChanged);
        Ok(())
    }

    /// Delete a page together with its annotations. The last page cannot be
    /// deleted.
    pub fn delete_page(&mut self, index: usize) -> Result<Vec<AnnotationId>, StoreError> {
        self.check_page(index)?;
        if self.pages.len() == 1 {
            return Err(StoreError::LastPage);
        }

        self.pages.remove(index);

        let mut removed = Vec::new();
        let mut removed_committed = Vec::new();
        let pending = &mut self.pending;
        self.annotations.retain(|annotation| {
            if annotation.page_index() != index {
                return true;
            }
            removed.push(annotation.id());
            if !pending.remove(&annotation.id()) {
                removed_committed.push(annotation.id());
            }
            false
        });

        for annotation in &mut self.annotations {
            if annotation.page_index() > index {
                annotation.set_page_index(annotation.page_index() - 1);
            }
        }

        if self.view.page_index >= self.pages.len() {
            self.view.page_index = self.pages.len() - 1;
        }

        log::debug!("deleted page {index} and {} annotations", removed.len());
        self.bump();
        for id in removed_committed {
            self.notify(StoreEvent::Removed(id));
        }
        self.notify(StoreEvent::PagesChanged);
        Ok(removed)
    }

    /// Rotate a page by a quarter turn. Annotation coordinates are unaffected
    /// because they live in the page's unrotated space.
    pub fn rotate_page(&mut self, index: usize, direction: RotateDirection) -> Result<(), StoreError> {
        self.check_page(index)?;
        let page = &mut self.pages[index];
        page.rotation = page.rotation.rotated(direction);

        self.bump();
        self.notify(StoreEvent::PagesChanged);
        Ok(())
    }
}
