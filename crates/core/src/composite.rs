//! Page composition for presentation and hit testing
//!
//! [`compose_page`] is a pure function of the store, the selection and the page
//! box. It never mutates anything; the interaction machine hit tests with the
//! same [`body_rect`] and [`handle_zones`] used here so what is drawn is what
//! can be grabbed.

use doc_model::{Annotation, AnnotationId, AnnotationKind, DocumentStore};

use crate::geometry::{scaled, to_pixel_point, to_pixel_rect, PageBox, PixelRect, ViewportPoint};
use crate::manipulation::{handle_zones, HandleZone};

/// On-screen edge length of a comment marker
pub const COMMENT_MARKER_PX: f32 = 24.0;

/// One annotation as it appears on screen
#[derive(Debug, Clone, PartialEq)]
pub struct LayerItem {
    pub id: AnnotationId,
    pub kind: &'static str,
    /// Position in the page's annotation list; later items draw on top
    pub z: usize,
    pub rect: PixelRect,
    /// Stroke samples for freehand ink
    pub points: Vec<ViewportPoint>,
    pub stroke_width: f32,
    pub font_size: Option<f32>,
    pub opacity: f32,
    pub selected: bool,
    /// `false` for recognized-text overlays, which are selectable but not drawn
    pub visible: bool,
}

/// Everything drawn over one page
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageLayer {
    pub page_index: usize,
    pub items: Vec<LayerItem>,
    /// Resize handles of the selected annotation, if it is resizable
    pub handles: Vec<HandleZone>,
}

impl PageLayer {
    pub fn visible_items(&self) -> impl Iterator<Item = &LayerItem> {
        self.items.iter().filter(|item| item.visible)
    }

    pub fn item(&self, id: AnnotationId) -> Option<&LayerItem> {
        self.items.iter().find(|item| item.id == id)
    }
}

/// Screen rectangle that counts as the annotation's body.
///
/// Strokes and comment markers get `tolerance_px` of slack so thin lines stay
/// grabbable.
pub fn body_rect(annotation: &Annotation, page_box: &PageBox, tolerance_px: f32) -> PixelRect {
    match annotation.kind() {
        AnnotationKind::Comment(mark) => {
            let corner = to_pixel_point(mark.anchor, page_box);
            PixelRect::new(corner.x, corner.y, COMMENT_MARKER_PX, COMMENT_MARKER_PX)
        }
        AnnotationKind::Freehand(_) => {
            let rect = to_pixel_rect(annotation.bounds(), page_box);
            PixelRect::new(
                rect.x - tolerance_px,
                rect.y - tolerance_px,
                rect.width + 2.0 * tolerance_px,
                rect.height + 2.0 * tolerance_px,
            )
        }
        _ => to_pixel_rect(annotation.bounds(), page_box),
    }
}

/// Topmost visible, committed annotation on the page under `point`.
pub fn hit_test(
    store: &DocumentStore,
    page_index: usize,
    page_box: &PageBox,
    point: ViewportPoint,
    tolerance_px: f32,
) -> Option<AnnotationId> {
    let hits: Vec<&Annotation> = store
        .annotations_on_page(page_index)
        .filter(|annotation| annotation.kind().is_visible() && !store.is_pending(annotation.id()))
        .collect();

    hits.into_iter()
        .rev()
        .find(|annotation| body_rect(annotation, page_box, tolerance_px).contains(point))
        .map(Annotation::id)
}

fn stroke_and_font(kind: &AnnotationKind) -> (f32, Option<f32>, f32) {
    match kind {
        AnnotationKind::Text(mark) => (0.0, Some(mark.font_size), mark.opacity),
        AnnotationKind::Rect(mark) => (mark.stroke_width, None, mark.opacity),
        AnnotationKind::Highlight(mark) => (0.0, None, mark.opacity),
        AnnotationKind::Freehand(mark) => (mark.stroke_width, None, mark.opacity),
        AnnotationKind::Comment(_) => (0.0, None, 1.0),
        AnnotationKind::Image(mark) => (0.0, None, mark.opacity),
        AnnotationKind::Math(mark) => (0.0, Some(mark.font_size), 1.0),
        AnnotationKind::OcrText(_) => (0.0, None, 0.0),
    }
}

/// Build the overlay for `page_index` at `scale`.
pub fn compose_page(
    store: &DocumentStore,
    page_index: usize,
    selection: Option<AnnotationId>,
    page_box: &PageBox,
    scale: f32,
    handle_px: f32,
) -> PageLayer {
    let mut layer = PageLayer { page_index, ..PageLayer::default() };

    for (z, annotation) in store.annotations_on_page(page_index).enumerate() {
        let kind = annotation.kind();
        let (stroke_width, font_size, opacity) = stroke_and_font(kind);
        let points = match kind {
            AnnotationKind::Freehand(mark) => {
                mark.points.iter().map(|point| to_pixel_point(*point, page_box)).collect()
            }
            _ => Vec::new(),
        };
        let selected = selection == Some(annotation.id());

        if selected && kind.is_resizable() {
            if let Some(frame) = kind.frame() {
                layer.handles = handle_zones(frame, page_box, handle_px).to_vec();
            }
        }

        layer.items.push(LayerItem {
            id: annotation.id(),
            kind: kind.name(),
            z,
            rect: body_rect(annotation, page_box, 0.0),
            points,
            stroke_width: scaled(stroke_width, scale),
            font_size: font_size.map(|size| scaled(size, scale)),
            opacity,
            selected,
            visible: kind.is_visible(),
        });
    }

    layer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manipulation::ResizeHandle;
    use doc_model::{Color, CommentMark, Frame, InkMark, OcrTextMark, Point, ShapeMark};

    fn rect(frame: Frame) -> AnnotationKind {
        AnnotationKind::Rect(ShapeMark {
            frame,
            color: Color::RED,
            fill_color: None,
            stroke_width: 2.0,
            opacity: 1.0,
        })
    }

    fn store_with(kinds: Vec<AnnotationKind>) -> (DocumentStore, Vec<AnnotationId>) {
        let mut store = DocumentStore::from_page_count(2);
        let ids = kinds
            .into_iter()
            .map(|kind| store.add(Annotation::new(0, kind)).expect("page 0 exists"))
            .collect();
        (store, ids)
    }

    #[test]
    fn items_follow_insertion_order_and_scale() {
        let (store, ids) = store_with(vec![
            rect(Frame::new(10.0, 10.0, 20.0, 20.0)),
            AnnotationKind::Freehand(InkMark {
                points: vec![Point::new(0.0, 0.0), Point::new(50.0, 50.0)],
                color: Color::BLACK,
                stroke_width: 3.0,
                opacity: 1.0,
            }),
        ]);
        let page_box = PageBox::new(0.0, 0.0, 1000.0, 1000.0);

        let layer = compose_page(&store, 0, None, &page_box, 2.0, 10.0);
        assert_eq!(layer.items.len(), 2);
        assert_eq!(layer.items[0].id, ids[0]);
        assert_eq!(layer.items[0].z, 0);
        assert_eq!(layer.items[0].rect, PixelRect::new(100.0, 100.0, 200.0, 200.0));
        assert_eq!(layer.items[0].stroke_width, 4.0);
        assert_eq!(layer.items[1].stroke_width, 6.0);
        assert_eq!(layer.items[1].points[1], ViewportPoint::new(500.0, 500.0));
        assert!(layer.handles.is_empty());

        assert!(compose_page(&store, 1, None, &page_box, 1.0, 10.0).items.is_empty());
    }

    #[test]
    fn selected_box_exposes_handles() {
        let (store, ids) = store_with(vec![rect(Frame::new(10.0, 10.0, 20.0, 20.0))]);
        let page_box = PageBox::new(0.0, 0.0, 1000.0, 1000.0);

        let layer = compose_page(&store, 0, Some(ids[0]), &page_box, 1.0, 10.0);
        assert!(layer.items[0].selected);
        assert_eq!(layer.handles.len(), 4);
        assert_eq!(layer.handles[3].handle, ResizeHandle::SouthEast);
        assert_eq!(layer.handles[3].rect, PixelRect::new(295.0, 295.0, 10.0, 10.0));
    }

    #[test]
    fn ocr_text_is_invisible_and_not_hit() {
        let (store, ids) = store_with(vec![
            rect(Frame::new(10.0, 10.0, 20.0, 20.0)),
            AnnotationKind::OcrText(OcrTextMark {
                frame: Frame::new(0.0, 0.0, 100.0, 100.0),
                text: "scanned".to_owned(),
            }),
        ]);
        let page_box = PageBox::new(0.0, 0.0, 1000.0, 1000.0);

        let layer = compose_page(&store, 0, None, &page_box, 1.0, 10.0);
        assert_eq!(layer.visible_items().count(), 1);
        assert!(!layer.item(ids[1]).expect("ocr item").visible);

        assert_eq!(hit_test(&store, 0, &page_box, ViewportPoint::new(150.0, 150.0), 5.0), Some(ids[0]));
        assert_eq!(hit_test(&store, 0, &page_box, ViewportPoint::new(800.0, 800.0), 5.0), None);
    }

    #[test]
    fn topmost_annotation_wins() {
        let (store, ids) = store_with(vec![
            rect(Frame::new(10.0, 10.0, 50.0, 50.0)),
            rect(Frame::new(20.0, 20.0, 10.0, 10.0)),
            AnnotationKind::Comment(CommentMark {
                anchor: Point::new(80.0, 80.0),
                content: "note".to_owned(),
                color: Color::YELLOW,
            }),
        ]);
        let page_box = PageBox::new(0.0, 0.0, 1000.0, 1000.0);

        assert_eq!(hit_test(&store, 0, &page_box, ViewportPoint::new(250.0, 250.0), 0.0), Some(ids[1]));
        assert_eq!(hit_test(&store, 0, &page_box, ViewportPoint::new(150.0, 150.0), 0.0), Some(ids[0]));
        assert_eq!(hit_test(&store, 0, &page_box, ViewportPoint::new(810.0, 810.0), 0.0), Some(ids[2]));
    }
}
