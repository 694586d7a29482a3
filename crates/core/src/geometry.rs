//! Conversions between viewport pixels and page percentage space
//!
//! Annotations live in the page's *unrotated* percentage space. On screen the
//! page is drawn inside a [`PageBox`]: its top-left corner and displayed size
//! in viewport pixels, plus the visual rotation. The functions here map between
//! the two in both directions, clamping at the page boundary so gestures that
//! leave the page keep producing valid coordinates.

use doc_model::{Frame, Point, Rotation, PERCENT_MAX};

/// On-screen edge length of a resize handle. Constant at every zoom level.
pub const HANDLE_SIZE_PX: f32 = 10.0;

/// A position in viewport pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportPoint {
    pub x: f32,
    pub y: f32,
}

impl ViewportPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: ViewportPoint) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Where a page is drawn in the viewport
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub left: f32,
    pub top: f32,
    /// Displayed width in pixels (after rotation)
    pub width: f32,
    /// Displayed height in pixels (after rotation)
    pub height: f32,
    pub rotation: Rotation,
}

impl PageBox {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self { left, top, width, height, rotation: Rotation::Deg0 }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Box for a page of `width_pt` x `height_pt` points at `scale`, shown at
    /// the viewport origin with the given rotation.
    pub fn for_page(width_pt: f32, height_pt: f32, scale: f32, rotation: Rotation) -> Self {
        let (width, height) = if rotation.is_sideways() {
            (height_pt * scale, width_pt * scale)
        } else {
            (width_pt * scale, height_pt * scale)
        };
        Self { left: 0.0, top: 0.0, width, height, rotation }
    }

    /// Pixel size of the page in its unrotated orientation
    pub fn unrotated_size(&self) -> (f32, f32) {
        if self.rotation.is_sideways() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }

    pub fn contains(&self, point: ViewportPoint) -> bool {
        point.x >= self.left
            && point.x <= self.left + self.width
            && point.y >= self.top
            && point.y <= self.top + self.height
    }
}

/// Axis-aligned rectangle in viewport pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PixelRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Square of edge `size` centered on `center`
    pub fn centered(center: ViewportPoint, size: f32) -> Self {
        Self::new(center.x - size / 2.0, center.y - size / 2.0, size, size)
    }

    pub fn contains(&self, point: ViewportPoint) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }
}

fn fraction(value: f32, origin: f32, extent: f32) -> f32 {
    if extent <= 0.0 || value.is_nan() {
        return 0.0;
    }
    ((value - origin) / extent).clamp(0.0, 1.0)
}

/// Displayed fractions (u, v) to unrotated fractions (x, y)
fn unrotate(u: f32, v: f32, rotation: Rotation) -> (f32, f32) {
    match rotation {
        Rotation::Deg0 => (u, v),
        Rotation::Deg90 => (v, 1.0 - u),
        Rotation::Deg180 => (1.0 - u, 1.0 - v),
        Rotation::Deg270 => (1.0 - v, u),
    }
}

/// Unrotated fractions (x, y) to displayed fractions (u, v)
fn rotate(x: f32, y: f32, rotation: Rotation) -> (f32, f32) {
    match rotation {
        Rotation::Deg0 => (x, y),
        Rotation::Deg90 => (1.0 - y, x),
        Rotation::Deg180 => (1.0 - x, 1.0 - y),
        Rotation::Deg270 => (y, 1.0 - x),
    }
}

/// Convert a viewport position into page percentage space, clamped to
/// [0, 100] on both axes.
pub fn to_page_coords(point: ViewportPoint, page_box: &PageBox) -> Point {
    let u = fraction(point.x, page_box.left, page_box.width);
    let v = fraction(point.y, page_box.top, page_box.height);
    let (x, y) = unrotate(u, v, page_box.rotation);
    Point::new(x * PERCENT_MAX, y * PERCENT_MAX)
}

/// Convert a point in percentage space to its viewport position.
pub fn to_pixel_point(point: Point, page_box: &PageBox) -> ViewportPoint {
    let (u, v) = rotate(point.x / PERCENT_MAX, point.y / PERCENT_MAX, page_box.rotation);
    ViewportPoint::new(page_box.left + u * page_box.width, page_box.top + v * page_box.height)
}

/// Viewport rectangle covered by `frame` on a page drawn in `page_box`.
pub fn to_pixel_rect(frame: Frame, page_box: &PageBox) -> PixelRect {
    let a = to_pixel_point(Point::new(frame.x, frame.y), page_box);
    let b = to_pixel_point(Point::new(frame.right(), frame.bottom()), page_box);
    PixelRect::new(a.x.min(b.x), a.y.min(b.y), (a.x - b.x).abs(), (a.y - b.y).abs())
}

/// Stroke widths and font sizes scale linearly with zoom.
pub fn scaled(value: f32, scale: f32) -> f32 {
    value * scale
}

/// Size of an on-screen pixel extent in percentage units along the
/// unrotated x and y axes.
pub fn handle_extent_percent(size_px: f32, page_box: &PageBox) -> (f32, f32) {
    let (width, height) = page_box.unrotated_size();
    let per = |extent: f32| if extent > 0.0 { size_px / extent * PERCENT_MAX } else { 0.0 };
    (per(width), per(height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn drag_on_800_by_1000_box() {
        let page_box = PageBox::new(0.0, 0.0, 800.0, 1000.0);
        let a = to_page_coords(ViewportPoint::new(100.0, 100.0), &page_box);
        let b = to_page_coords(ViewportPoint::new(300.0, 400.0), &page_box);
        let frame = Frame::from_corners(a, b);

        assert!(approx(frame.x, 12.5));
        assert!(approx(frame.y, 10.0));
        assert!(approx(frame.width, 25.0));
        assert!(approx(frame.height, 30.0));
    }

    #[test]
    fn offset_box_is_relative_to_its_corner() {
        let page_box = PageBox::new(40.0, 60.0, 200.0, 100.0);
        let point = to_page_coords(ViewportPoint::new(90.0, 85.0), &page_box);
        assert!(approx(point.x, 25.0));
        assert!(approx(point.y, 25.0));
    }

    #[test]
    fn pointer_outside_page_is_clamped() {
        let page_box = PageBox::new(0.0, 0.0, 800.0, 1000.0);
        let point = to_page_coords(ViewportPoint::new(-50.0, 5000.0), &page_box);
        assert_eq!(point, Point::new(0.0, 100.0));

        let nan = to_page_coords(ViewportPoint::new(f32::NAN, 10.0), &page_box);
        assert_eq!(nan.x, 0.0);
    }

    #[test]
    fn degenerate_box_does_not_divide_by_zero() {
        let page_box = PageBox::new(0.0, 0.0, 0.0, 0.0);
        assert_eq!(to_page_coords(ViewportPoint::new(10.0, 10.0), &page_box), Point::new(0.0, 0.0));
        assert_eq!(handle_extent_percent(10.0, &page_box), (0.0, 0.0));
    }

    #[test]
    fn rotated_pages_map_back_to_unrotated_space() {
        // A 100x200 page turned clockwise is shown as 200x100.
        let page_box = PageBox::for_page(100.0, 200.0, 1.0, Rotation::Deg90);
        assert_eq!((page_box.width, page_box.height), (200.0, 100.0));

        // The unrotated top-left corner is shown at the top-right.
        let corner = to_page_coords(ViewportPoint::new(200.0, 0.0), &page_box);
        assert!(approx(corner.x, 0.0) && approx(corner.y, 0.0));

        for rotation in [Rotation::Deg0, Rotation::Deg90, Rotation::Deg180, Rotation::Deg270] {
            let page_box = PageBox::for_page(100.0, 200.0, 2.0, rotation);
            let original = Point::new(30.0, 70.0);
            let back = to_page_coords(to_pixel_point(original, &page_box), &page_box);
            assert!(approx(back.x, original.x), "{rotation:?}: {back:?}");
            assert!(approx(back.y, original.y), "{rotation:?}: {back:?}");
        }
    }

    #[test]
    fn pixel_rect_follows_rotation() {
        let frame = Frame::new(0.0, 0.0, 50.0, 25.0);

        let upright = to_pixel_rect(frame, &PageBox::new(0.0, 0.0, 400.0, 800.0));
        assert_eq!(upright, PixelRect::new(0.0, 0.0, 200.0, 200.0));

        let turned = PageBox::for_page(400.0, 800.0, 1.0, Rotation::Deg90);
        let rect = to_pixel_rect(frame, &turned);
        assert!(approx(rect.x, 600.0));
        assert!(approx(rect.y, 0.0));
        assert!(approx(rect.width, 200.0));
        assert!(approx(rect.height, 200.0));
    }

    #[test]
    fn handles_keep_their_screen_size() {
        let small = PageBox::new(0.0, 0.0, 500.0, 1000.0);
        let large = PageBox::new(0.0, 0.0, 1000.0, 2000.0);

        let (wx, hy) = handle_extent_percent(HANDLE_SIZE_PX, &small);
        assert!(approx(wx, 2.0) && approx(hy, 1.0));

        let (wx, hy) = handle_extent_percent(HANDLE_SIZE_PX, &large);
        assert!(approx(wx, 1.0) && approx(hy, 0.5));

        assert_eq!(scaled(2.0, 1.5), 3.0);
    }
}
