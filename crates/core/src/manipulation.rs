//! Annotation manipulation handles and operations
//!
//! Box annotations get four corner handles for resizing. Handles have a
//! constant on-screen size, so their hit zones are computed in viewport pixels
//! from the annotation's frame and the page box. Move and resize are always
//! computed from the geometry captured when the gesture started.

use doc_model::{AnnotationId, Frame, Geometry, Point, PERCENT_MAX};

use crate::geometry::{to_pixel_point, PageBox, PixelRect, ViewportPoint};

/// Corner handle of a box annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResizeHandle {
    NorthWest,
    NorthEast,
    SouthWest,
    SouthEast,
}

impl ResizeHandle {
    pub const ALL: [ResizeHandle; 4] = [
        ResizeHandle::NorthWest,
        ResizeHandle::NorthEast,
        ResizeHandle::SouthWest,
        ResizeHandle::SouthEast,
    ];

    fn moves_left_edge(self) -> bool {
        matches!(self, ResizeHandle::NorthWest | ResizeHandle::SouthWest)
    }

    fn moves_top_edge(self) -> bool {
        matches!(self, ResizeHandle::NorthWest | ResizeHandle::NorthEast)
    }

    /// Corner of `frame` this handle sits on, in percentage space
    pub fn corner(self, frame: Frame) -> Point {
        let x = if self.moves_left_edge() { frame.x } else { frame.right() };
        let y = if self.moves_top_edge() { frame.y } else { frame.bottom() };
        Point::new(x, y)
    }
}

/// Hit area of one handle in viewport pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandleZone {
    pub handle: ResizeHandle,
    pub rect: PixelRect,
}

/// Handle zones for a box annotation drawn inside `page_box`.
pub fn handle_zones(frame: Frame, page_box: &PageBox, handle_px: f32) -> [HandleZone; 4] {
    ResizeHandle::ALL.map(|handle| HandleZone {
        handle,
        rect: PixelRect::centered(to_pixel_point(handle.corner(frame), page_box), handle_px),
    })
}

/// The handle under `point`, if any. Handles listed later win ties so the
/// south-east corner of a tiny box stays reachable.
pub fn hit_handle(
    frame: Frame,
    page_box: &PageBox,
    handle_px: f32,
    point: ViewportPoint,
) -> Option<ResizeHandle> {
    handle_zones(frame, page_box, handle_px)
        .iter()
        .rev()
        .find(|zone| zone.rect.contains(point))
        .map(|zone| zone.handle)
}

/// Clamp that tolerates `lo > hi` by preferring `lo`.
fn bounded(value: f32, lo: f32, hi: f32) -> f32 {
    value.max(lo).min(hi.max(lo))
}

/// Resize `origin` by dragging `handle` by (dx, dy) percent.
///
/// West and north edges move position and size inversely; east and south edges
/// change only the size. Width and height never drop below `min_size` and the
/// box never leaves the page.
pub fn apply_resize(origin: Frame, handle: ResizeHandle, dx: f32, dy: f32, min_size: f32) -> Frame {
    let (x, width) = if handle.moves_left_edge() {
        let right = origin.right();
        let x = bounded(origin.x + dx, 0.0, right - min_size);
        (x, right - x)
    } else {
        let right = bounded(origin.right() + dx, origin.x + min_size, PERCENT_MAX);
        (origin.x, right - origin.x)
    };

    let (y, height) = if handle.moves_top_edge() {
        let bottom = origin.bottom();
        let y = bounded(origin.y + dy, 0.0, bottom - min_size);
        (y, bottom - y)
    } else {
        let bottom = bounded(origin.bottom() + dy, origin.y + min_size, PERCENT_MAX);
        (origin.y, bottom - origin.y)
    };

    Frame::new(x, y, width, height)
}

/// What an active manipulation does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManipulationKind {
    Move,
    Resize(ResizeHandle),
}

/// Active manipulation of an existing annotation
#[derive(Debug, Clone, PartialEq)]
pub struct Manipulation {
    pub annotation_id: AnnotationId,
    pub kind: ManipulationKind,
    /// Geometry before the gesture started
    pub origin: Geometry,
    /// Pointer position at gesture start, in percentage space
    pub drag_start: Point,
}

impl Manipulation {
    pub fn new(
        annotation_id: AnnotationId,
        kind: ManipulationKind,
        origin: Geometry,
        drag_start: Point,
    ) -> Self {
        Self { annotation_id, kind, origin, drag_start }
    }

    /// Geometry for the pointer at `current`, using the cumulative delta from
    /// the start of the gesture.
    pub fn geometry_at(&self, current: Point, min_size: f32) -> Geometry {
        let dx = current.x - self.drag_start.x;
        let dy = current.y - self.drag_start.y;

        match (self.kind, &self.origin) {
            (ManipulationKind::Resize(handle), Geometry::Box(frame)) => {
                Geometry::Box(apply_resize(*frame, handle, dx, dy, min_size))
            }
            // Only boxes have handles; anything else moves.
            _ => self.origin.translated_within_page(dx, dy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    fn assert_frame(actual: Frame, expected: Frame) {
        assert!(
            approx(actual.x, expected.x)
                && approx(actual.y, expected.y)
                && approx(actual.width, expected.width)
                && approx(actual.height, expected.height),
            "{actual:?} != {expected:?}"
        );
    }

    #[test]
    fn test_handle_zones_sit_on_corners() {
        let page_box = PageBox::new(0.0, 0.0, 1000.0, 1000.0);
        let zones = handle_zones(Frame::new(10.0, 20.0, 30.0, 40.0), &page_box, 10.0);

        assert_eq!(zones[0].handle, ResizeHandle::NorthWest);
        assert_eq!(zones[0].rect, PixelRect::new(95.0, 195.0, 10.0, 10.0));
        assert_eq!(zones[3].handle, ResizeHandle::SouthEast);
        assert_eq!(zones[3].rect, PixelRect::new(395.0, 595.0, 10.0, 10.0));
    }

    #[test]
    fn test_hit_handle() {
        let page_box = PageBox::new(0.0, 0.0, 1000.0, 1000.0);
        let frame = Frame::new(10.0, 20.0, 30.0, 40.0);

        assert_eq!(
            hit_handle(frame, &page_box, 10.0, ViewportPoint::new(402.0, 598.0)),
            Some(ResizeHandle::SouthEast)
        );
        assert_eq!(
            hit_handle(frame, &page_box, 10.0, ViewportPoint::new(398.0, 203.0)),
            Some(ResizeHandle::NorthEast)
        );
        assert_eq!(hit_handle(frame, &page_box, 10.0, ViewportPoint::new(250.0, 400.0)), None);
    }

    #[test]
    fn test_handle_size_is_zoom_independent() {
        let frame = Frame::new(10.0, 10.0, 10.0, 10.0);
        for scale in [0.5, 1.0, 4.0] {
            let page_box = PageBox::new(0.0, 0.0, 600.0 * scale, 800.0 * scale);
            for zone in handle_zones(frame, &page_box, 10.0) {
                assert_eq!((zone.rect.width, zone.rect.height), (10.0, 10.0));
            }
        }
    }

    #[test]
    fn test_north_west_resize_moves_position_and_size_inversely() {
        let origin = Frame::new(20.0, 20.0, 30.0, 30.0);
        let resized = apply_resize(origin, ResizeHandle::NorthWest, 5.0, -5.0, 1.0);
        assert_frame(resized, Frame::new(25.0, 15.0, 25.0, 35.0));
    }

    #[test]
    fn test_resize_never_inverts() {
        let origin = Frame::new(20.0, 20.0, 30.0, 30.0);

        let collapsed = apply_resize(origin, ResizeHandle::NorthWest, 40.0, 40.0, 1.0);
        assert_frame(collapsed, Frame::new(49.0, 49.0, 1.0, 1.0));

        let collapsed = apply_resize(origin, ResizeHandle::SouthEast, -80.0, -80.0, 1.0);
        assert_frame(collapsed, Frame::new(20.0, 20.0, 1.0, 1.0));
    }

    #[test]
    fn test_resize_stays_on_page() {
        let origin = Frame::new(20.0, 20.0, 30.0, 30.0);

        let grown = apply_resize(origin, ResizeHandle::SouthEast, 200.0, 200.0, 1.0);
        assert_frame(grown, Frame::new(20.0, 20.0, 80.0, 80.0));

        let grown = apply_resize(origin, ResizeHandle::NorthWest, -200.0, -200.0, 1.0);
        assert_frame(grown, Frame::new(0.0, 0.0, 50.0, 50.0));
    }

    #[test]
    fn test_mixed_corners() {
        let origin = Frame::new(20.0, 20.0, 30.0, 30.0);

        let ne = apply_resize(origin, ResizeHandle::NorthEast, 10.0, 10.0, 1.0);
        assert_frame(ne, Frame::new(20.0, 30.0, 40.0, 20.0));

        let sw = apply_resize(origin, ResizeHandle::SouthWest, 10.0, 10.0, 1.0);
        assert_frame(sw, Frame::new(30.0, 20.0, 20.0, 40.0));
    }

    #[test]
    fn test_move_uses_cumulative_delta() {
        let origin = Geometry::Box(Frame::new(10.0, 10.0, 20.0, 20.0));
        let manipulation = Manipulation::new(
            AnnotationId::new_v4(),
            ManipulationKind::Move,
            origin,
            Point::new(15.0, 15.0),
        );

        // Intermediate frames do not accumulate.
        let _ = manipulation.geometry_at(Point::new(16.1, 16.1), 1.0);
        let _ = manipulation.geometry_at(Point::new(17.3, 17.3), 1.0);
        assert_eq!(
            manipulation.geometry_at(Point::new(20.0, 25.0), 1.0),
            Geometry::Box(Frame::new(15.0, 20.0, 20.0, 20.0))
        );
    }

    #[test]
    fn test_move_clamps_at_page_edge() {
        let origin = Geometry::Path(vec![Point::new(80.0, 10.0), Point::new(90.0, 20.0)]);
        let manipulation = Manipulation::new(
            AnnotationId::new_v4(),
            ManipulationKind::Move,
            origin,
            Point::new(85.0, 15.0),
        );

        assert_eq!(
            manipulation.geometry_at(Point::new(100.0, 0.0), 1.0),
            Geometry::Path(vec![Point::new(90.0, 0.0), Point::new(100.0, 10.0)])
        );
    }
}
