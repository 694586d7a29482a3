//! Annotation interaction state machine
//!
//! Pointer and touch events go through [`InteractionMachine::handle`], the only
//! place where gestures mutate the [`DocumentStore`]. While a gesture is in
//! progress its record is edited transiently (no notifications) so it renders
//! live; on release the change is committed, which emits exactly one store
//! event. Selection is ephemeral and lives here, never in the records.
//!
//! At most one gesture is active. A second pointer-down while one is running
//! is ignored.

use std::time::{Duration, Instant};

use doc_model::{
    Annotation, AnnotationId, AnnotationKind, Color, CommentMark, DocumentStore, Frame, Geometry,
    HighlightMark, InkMark, MathMark, Point, ShapeMark, TextMark, DEFAULT_HIGHLIGHT_OPACITY,
};

use crate::composite;
use crate::config::InteractionConfig;
use crate::geometry::{to_page_coords, PageBox, ViewportPoint};
use crate::manipulation::{hit_handle, Manipulation, ManipulationKind, ResizeHandle};

/// Active tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tool {
    /// Select, move and resize existing annotations
    #[default]
    Select,
    Text,
    Rect,
    Highlight,
    Freehand,
    Comment,
    Math,
    /// Marquee handed to a capture consumer such as OCR
    AreaSelect,
}

impl Tool {
    /// Whether the tool creates something on empty canvas
    pub fn is_creation(self) -> bool {
        !matches!(self, Tool::Select)
    }
}

/// Presentation applied to annotations created by the tools
#[derive(Debug, Clone, PartialEq)]
pub struct ToolStyle {
    pub color: Color,
    pub fill_color: Option<Color>,
    pub stroke_width: f32,
    pub font_size: f32,
    pub opacity: f32,
}

impl Default for ToolStyle {
    fn default() -> Self {
        Self {
            color: Color::RED,
            fill_color: None,
            stroke_width: 2.0,
            font_size: 16.0,
            opacity: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Mouse,
    Touch,
    Pen,
}

/// Raw input routed to the machine
///
/// Only `Down` names a page; the rest of the gesture stays on that page and
/// keeps using the page box captured at `Down`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down {
        pointer: PointerKind,
        position: ViewportPoint,
        page_index: usize,
        page_box: PageBox,
        at: Instant,
    },
    Move {
        position: ViewportPoint,
        at: Instant,
    },
    Up {
        position: ViewportPoint,
        at: Instant,
    },
    Cancel,
    /// Timer heartbeat used to fire long presses without movement
    Tick {
        at: Instant,
    },
}

/// Current gesture
#[derive(Debug, Clone, PartialEq)]
pub enum InteractionState {
    Idle,
    Drawing {
        id: AnnotationId,
        page_box: PageBox,
        points: Vec<Point>,
    },
    CreatingBox {
        id: AnnotationId,
        page_box: PageBox,
        start: Point,
    },
    MovingAnnotation {
        page_box: PageBox,
        manipulation: Manipulation,
    },
    ResizingAnnotation {
        handle: ResizeHandle,
        page_box: PageBox,
        manipulation: Manipulation,
    },
    SelectingArea {
        page_index: usize,
        page_box: PageBox,
        start: Point,
        current: Point,
    },
    LongPressPending {
        page_index: usize,
        page_box: PageBox,
        origin: ViewportPoint,
        since: Instant,
    },
}

impl InteractionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, InteractionState::Idle)
    }

    /// Record being created by the current gesture, if any
    fn pending_id(&self) -> Option<AnnotationId> {
        match self {
            InteractionState::Drawing { id, .. } | InteractionState::CreatingBox { id, .. } => {
                Some(*id)
            }
            _ => None,
        }
    }
}

/// Observable outcome of an event
#[derive(Debug, Clone, PartialEq)]
pub enum InteractionEffect {
    SelectionChanged(Option<AnnotationId>),
    /// A gesture finished and its record was committed to the store
    Committed(AnnotationId),
    /// A pending creation was dropped
    Discarded(AnnotationId),
    /// Marquee released; the rectangle is not stored anywhere
    AreaSelected { page_index: usize, frame: Frame },
}

#[derive(Debug)]
pub struct InteractionMachine {
    config: InteractionConfig,
    tool: Tool,
    style: ToolStyle,
    state: InteractionState,
    selection: Option<AnnotationId>,
}

impl Default for InteractionMachine {
    fn default() -> Self {
        Self::new(InteractionConfig::default())
    }
}

impl InteractionMachine {
    pub fn new(config: InteractionConfig) -> Self {
        Self {
            config,
            tool: Tool::Select,
            style: ToolStyle::default(),
            state: InteractionState::Idle,
            selection: None,
        }
    }

    pub fn with_style(mut self, style: ToolStyle) -> Self {
        self.style = style;
        self
    }

    pub fn config(&self) -> &InteractionConfig {
        &self.config
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn style(&self) -> &ToolStyle {
        &self.style
    }

    pub fn set_style(&mut self, style: ToolStyle) {
        self.style = style;
    }

    pub fn state(&self) -> &InteractionState {
        &self.state
    }

    pub fn selection(&self) -> Option<AnnotationId> {
        self.selection
    }

    /// Switch tools. Any gesture in progress is cancelled first.
    pub fn set_tool(&mut self, store: &mut DocumentStore, tool: Tool) -> Vec<InteractionEffect> {
        let effects = self.cancel(store);
        self.tool = tool;
        effects
    }

    /// Replace the selection programmatically (e.g. from a properties list).
    pub fn select(
        &mut self,
        store: &DocumentStore,
        id: Option<AnnotationId>,
    ) -> Vec<InteractionEffect> {
        let id = id.filter(|id| store.contains(*id));
        let mut effects = Vec::new();
        self.set_selection(id, &mut effects);
        effects
    }

    /// Abort the current gesture: pending creations are discarded and edits to
    /// existing annotations are rolled back without notification.
    pub fn cancel(&mut self, store: &mut DocumentStore) -> Vec<InteractionEffect> {
        let mut effects = Vec::new();
        match std::mem::replace(&mut self.state, InteractionState::Idle) {
            InteractionState::Drawing { id, .. } | InteractionState::CreatingBox { id, .. } => {
                if store.discard_pending(id) {
                    log::debug!("discarded pending annotation {id}");
                    effects.push(InteractionEffect::Discarded(id));
                }
            }
            InteractionState::MovingAnnotation { manipulation, .. }
            | InteractionState::ResizingAnnotation { manipulation, .. } => {
                if store.contains(manipulation.annotation_id) {
                    store.set_geometry_transient(manipulation.annotation_id, manipulation.origin);
                }
            }
            _ => {}
        }
        effects
    }

    /// Feed one event through the machine.
    pub fn handle(
        &mut self,
        store: &mut DocumentStore,
        event: PointerEvent,
    ) -> Vec<InteractionEffect> {
        let mut effects = Vec::new();
        self.drop_stale_selection(store, &mut effects);

        match event {
            PointerEvent::Down { pointer, position, page_index, page_box, at } => {
                if !self.state.is_idle() {
                    log::debug!("ignoring pointer-down during an active gesture");
                } else if store.page(page_index).is_none() {
                    log::warn!("pointer-down on missing page {page_index}");
                } else {
                    self.pointer_down(store, pointer, position, page_index, page_box, at, &mut effects);
                }
            }
            PointerEvent::Move { position, at } => self.pointer_move(store, position, at),
            PointerEvent::Up { position, .. } => self.pointer_up(store, position, &mut effects),
            PointerEvent::Cancel => effects.extend(self.cancel(store)),
            PointerEvent::Tick { at } => self.fire_long_press(at),
        }

        effects
    }

    #[allow(clippy::too_many_arguments)]
    fn pointer_down(
        &mut self,
        store: &mut DocumentStore,
        pointer: PointerKind,
        position: ViewportPoint,
        page_index: usize,
        page_box: PageBox,
        at: Instant,
        effects: &mut Vec<InteractionEffect>,
    ) {
        let point = to_page_coords(position, &page_box);

        if let Some((id, handle, frame)) = self.selected_handle_at(store, page_index, &page_box, position)
        {
            log::debug!("resizing {id} from {handle:?}");
            self.state = InteractionState::ResizingAnnotation {
                handle,
                page_box,
                manipulation: Manipulation::new(
                    id,
                    ManipulationKind::Resize(handle),
                    Geometry::Box(frame),
                    point,
                ),
            };
            return;
        }

        let tolerance = self.config.handle_size_px / 2.0;
        if let Some(id) = composite::hit_test(store, page_index, &page_box, position, tolerance) {
            let Some(annotation) = store.get(id) else {
                return;
            };
            let origin = annotation.geometry();
            self.set_selection(Some(id), effects);
            self.state = InteractionState::MovingAnnotation {
                page_box,
                manipulation: Manipulation::new(id, ManipulationKind::Move, origin, point),
            };
            return;
        }

        if !self.tool.is_creation() {
            self.set_selection(None, effects);
            if pointer == PointerKind::Touch {
                self.state = InteractionState::LongPressPending {
                    page_index,
                    page_box,
                    origin: position,
                    since: at,
                };
            }
            return;
        }

        match self.tool {
            Tool::Freehand => {
                let kind = AnnotationKind::Freehand(InkMark {
                    points: vec![point],
                    color: self.style.color,
                    stroke_width: self.style.stroke_width,
                    opacity: self.style.opacity,
                });
                if let Some(id) = insert_pending(store, page_index, kind) {
                    self.state = InteractionState::Drawing { id, page_box, points: vec![point] };
                }
            }
            Tool::Comment => {
                let kind = AnnotationKind::Comment(CommentMark {
                    anchor: point,
                    content: String::new(),
                    color: self.style.color,
                });
                match store.add(Annotation::new(page_index, kind)) {
                    Ok(id) => effects.push(InteractionEffect::Committed(id)),
                    Err(error) => log::warn!("could not place comment: {error}"),
                }
            }
            Tool::AreaSelect => {
                self.state = InteractionState::SelectingArea {
                    page_index,
                    page_box,
                    start: point,
                    current: point,
                };
            }
            Tool::Text | Tool::Rect | Tool::Highlight | Tool::Math => {
                let frame = Frame::new(point.x, point.y, 0.0, 0.0);
                if let Some(kind) = self.box_kind(frame) {
                    if let Some(id) = insert_pending(store, page_index, kind) {
                        self.state = InteractionState::CreatingBox { id, page_box, start: point };
                    }
                }
            }
            Tool::Select => {}
        }
    }

    fn pointer_move(&mut self, store: &mut DocumentStore, position: ViewportPoint, at: Instant) {
        if let InteractionState::LongPressPending { origin, .. } = self.state {
            if origin.distance_to(position) > self.config.touch_slop_px {
                log::debug!("long press abandoned after movement");
                self.state = InteractionState::Idle;
            } else {
                self.fire_long_press(at);
            }
            return;
        }

        let min_size = self.config.min_size_percent;
        match &mut self.state {
            InteractionState::Idle | InteractionState::LongPressPending { .. } => {}
            InteractionState::Drawing { id, page_box, points } => {
                points.push(to_page_coords(position, page_box));
                store.set_geometry_transient(*id, Geometry::Path(points.clone()));
            }
            InteractionState::CreatingBox { id, page_box, start } => {
                let frame = Frame::from_corners(*start, to_page_coords(position, page_box));
                store.set_geometry_transient(*id, Geometry::Box(frame));
            }
            InteractionState::MovingAnnotation { page_box, manipulation }
            | InteractionState::ResizingAnnotation { page_box, manipulation, .. } => {
                let geometry = manipulation.geometry_at(to_page_coords(position, page_box), min_size);
                store.set_geometry_transient(manipulation.annotation_id, geometry);
            }
            InteractionState::SelectingArea { page_box, current, .. } => {
                *current = to_page_coords(position, page_box);
            }
        }
    }

    fn pointer_up(
        &mut self,
        store: &mut DocumentStore,
        position: ViewportPoint,
        effects: &mut Vec<InteractionEffect>,
    ) {
        match std::mem::replace(&mut self.state, InteractionState::Idle) {
            InteractionState::Idle | InteractionState::LongPressPending { .. } => {}
            InteractionState::Drawing { id, points, .. } => {
                if points.len() < self.config.min_freehand_points {
                    log::debug!("discarding {}-point stroke as a tap", points.len());
                    store.discard_pending(id);
                    effects.push(InteractionEffect::Discarded(id));
                } else {
                    store.commit(id);
                    effects.push(InteractionEffect::Committed(id));
                }
            }
            InteractionState::CreatingBox { id, page_box, start } => {
                let frame = Frame::from_corners(start, to_page_coords(position, &page_box));
                store.set_geometry_transient(id, Geometry::Box(self.viable_frame(frame)));
                store.commit(id);
                effects.push(InteractionEffect::Committed(id));
            }
            InteractionState::MovingAnnotation { page_box, manipulation }
            | InteractionState::ResizingAnnotation { page_box, manipulation, .. } => {
                let id = manipulation.annotation_id;
                let geometry = manipulation
                    .geometry_at(to_page_coords(position, &page_box), self.config.min_size_percent);
                if geometry != manipulation.origin {
                    store.set_geometry_transient(id, geometry);
                    store.commit(id);
                    effects.push(InteractionEffect::Committed(id));
                } else if store.get(id).map(Annotation::geometry).as_ref() != Some(&geometry) {
                    // Dragged away and back: restore silently.
                    store.set_geometry_transient(id, geometry);
                }
            }
            InteractionState::SelectingArea { page_index, page_box, start, .. } => {
                let frame = Frame::from_corners(start, to_page_coords(position, &page_box));
                effects.push(InteractionEffect::AreaSelected { page_index, frame });
            }
        }
    }

    fn fire_long_press(&mut self, at: Instant) {
        let InteractionState::LongPressPending { page_index, page_box, origin, since } = self.state
        else {
            return;
        };

        if at.saturating_duration_since(since) >= Duration::from_millis(self.config.long_press_ms) {
            let start = to_page_coords(origin, &page_box);
            log::debug!("long press on page {page_index} starts an area selection");
            self.state =
                InteractionState::SelectingArea { page_index, page_box, start, current: start };
        }
    }

    fn selected_handle_at(
        &self,
        store: &DocumentStore,
        page_index: usize,
        page_box: &PageBox,
        position: ViewportPoint,
    ) -> Option<(AnnotationId, ResizeHandle, Frame)> {
        let annotation = store.get(self.selection?)?;
        if annotation.page_index() != page_index || !annotation.kind().is_resizable() {
            return None;
        }
        let frame = annotation.kind().frame()?;
        let handle = hit_handle(frame, page_box, self.config.handle_size_px, position)?;
        Some((annotation.id(), handle, frame))
    }

    /// Promote a collapsed box to the default size, per dimension.
    fn viable_frame(&self, frame: Frame) -> Frame {
        let config = &self.config;
        let mut frame = frame;
        if frame.width < config.min_size_percent {
            frame.width = config.default_box_width_percent;
        }
        if frame.height < config.min_size_percent {
            frame.height = config.default_box_height_percent;
        }
        frame.clamped()
    }

    fn box_kind(&self, frame: Frame) -> Option<AnnotationKind> {
        let style = &self.style;
        let kind = match self.tool {
            Tool::Text => AnnotationKind::Text(TextMark {
                frame,
                content: String::new(),
                color: style.color,
                font_size: style.font_size,
                vertical: false,
                background: style.fill_color,
                opacity: style.opacity,
            }),
            Tool::Rect => AnnotationKind::Rect(ShapeMark {
                frame,
                color: style.color,
                fill_color: style.fill_color,
                stroke_width: style.stroke_width,
                opacity: style.opacity,
            }),
            Tool::Highlight => AnnotationKind::Highlight(HighlightMark {
                frame,
                color: style.fill_color.unwrap_or(Color::YELLOW),
                opacity: DEFAULT_HIGHLIGHT_OPACITY,
            }),
            Tool::Math => AnnotationKind::Math(MathMark {
                frame,
                source: String::new(),
                color: style.color,
                font_size: style.font_size,
            }),
            _ => return None,
        };
        Some(kind)
    }

    fn set_selection(&mut self, id: Option<AnnotationId>, effects: &mut Vec<InteractionEffect>) {
        if self.selection != id {
            self.selection = id;
            effects.push(InteractionEffect::SelectionChanged(id));
        }
    }

    fn drop_stale_selection(&mut self, store: &DocumentStore, effects: &mut Vec<InteractionEffect>) {
        if self.selection.is_some_and(|id| !store.contains(id)) {
            self.set_selection(None, effects);
        }
        if let Some(id) = self.state.pending_id() {
            if !store.contains(id) {
                self.state = InteractionState::Idle;
            }
        }
    }
}

fn insert_pending(
    store: &mut DocumentStore,
    page_index: usize,
    kind: AnnotationKind,
) -> Option<AnnotationId> {
    match store.insert_pending(Annotation::new(page_index, kind)) {
        Ok(id) => Some(id),
        Err(error) => {
            log::warn!("could not start gesture: {error}");
            None
        }
    }
}
