//! Annotation records
//!
//! Every annotation is positioned in percentage space: `x`, `y`, `width` and
//! `height` are fractions (0 to 100) of the page's rendered box, independent of
//! zoom. The kind is a closed tagged union so each variant only carries the
//! fields that make sense for it.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Unique identifier for an annotation
///
/// Stable across the document lifetime and persisted in project files.
pub type AnnotationId = uuid::Uuid;

/// Upper bound of percentage space.
pub const PERCENT_MAX: f32 = 100.0;

/// Default opacity for highlight fills.
pub const DEFAULT_HIGHLIGHT_OPACITY: f32 = 0.4;

fn clamp_percent(value: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, PERCENT_MAX)
}

/// A point in percentage space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Clamp both coordinates into [0, 100].
    pub fn clamped(self) -> Self {
        Self { x: clamp_percent(self.x), y: clamp_percent(self.y) }
    }

    pub fn offset(self, dx: f32, dy: f32) -> Self {
        Self { x: self.x + dx, y: self.y + dy }
    }

    pub fn is_on_page(&self) -> bool {
        in_percent_range(self.x) && in_percent_range(self.y)
    }
}

/// Slack for accumulated float error when checking far edges
const EDGE_TOLERANCE: f32 = 1e-3;

fn in_percent_range(value: f32) -> bool {
    value.is_finite() && (0.0..=PERCENT_MAX).contains(&value)
}

/// An axis-aligned box in percentage space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Frame {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Normalized rectangle spanned by two corner points.
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            x: a.x.min(b.x),
            y: a.y.min(b.y),
            width: (a.x - b.x).abs(),
            height: (a.y - b.y).abs(),
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x && point.x <= self.right() && point.y >= self.y && point.y <= self.bottom()
    }

    /// Keep the box inside the page: size is capped at 100 and the origin is
    /// shifted so the far edges stay within bounds.
    pub fn clamped(self) -> Self {
        let width = clamp_percent(self.width);
        let height = clamp_percent(self.height);
        Self {
            x: clamp_percent(self.x).min(PERCENT_MAX - width),
            y: clamp_percent(self.y).min(PERCENT_MAX - height),
            width,
            height,
        }
    }

    pub fn translated(self, dx: f32, dy: f32) -> Self {
        Self { x: self.x + dx, y: self.y + dy, ..self }
    }

    /// Finite, non-negative and entirely inside [0, 100] on both axes.
    pub fn is_on_page(&self) -> bool {
        in_percent_range(self.x)
            && in_percent_range(self.y)
            && in_percent_range(self.width)
            && in_percent_range(self.height)
            && self.right() <= PERCENT_MAX + EDGE_TOLERANCE
            && self.bottom() <= PERCENT_MAX + EDGE_TOLERANCE
    }
}

/// RGBA color, serialized as `#rrggbb` or `#rrggbbaa`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0, a: 255 };
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255, a: 255 };
    pub const RED: Color = Color { r: 255, g: 0, b: 0, a: 255 };
    pub const YELLOW: Color = Color { r: 255, g: 235, b: 59, a: 255 };

    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Normalized RGBA values (0.0 to 1.0)
    pub fn to_normalized(&self) -> (f32, f32, f32, f32) {
        (
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
            self.a as f32 / 255.0,
        )
    }

    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }

    pub fn from_hex(value: &str) -> Result<Self, ColorParseError> {
        let hex = value.trim().trim_start_matches('#');
        let channel = |range: std::ops::Range<usize>| {
            hex.get(range)
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                .ok_or_else(|| ColorParseError(value.to_owned()))
        };

        match hex.len() {
            3 => {
                let expand = |index: usize| {
                    hex.get(index..index + 1)
                        .and_then(|digit| u8::from_str_radix(digit, 16).ok())
                        .map(|v| v * 17)
                        .ok_or_else(|| ColorParseError(value.to_owned()))
                };
                Ok(Self::rgb(expand(0)?, expand(1)?, expand(2)?))
            }
            6 => Ok(Self::rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?)),
            8 => Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?, channel(6..8)?)),
            _ => Err(ColorParseError(value.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid color '{0}'")]
pub struct ColorParseError(pub String);

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_hex()
    }
}

impl TryFrom<String> for Color {
    type Error = ColorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Color::from_hex(&value)
    }
}

fn default_opacity() -> f32 {
    1.0
}

fn default_highlight_opacity() -> f32 {
    DEFAULT_HIGHLIGHT_OPACITY
}

/// Rich text box; `content` is HTML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMark {
    pub frame: Frame,
    pub content: String,
    pub color: Color,
    pub font_size: f32,
    #[serde(default)]
    pub vertical: bool,
    #[serde(default)]
    pub background: Option<Color>,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
}

/// Rectangle: a stroked border, or an opaque fill when `fill_color` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeMark {
    pub frame: Frame,
    pub color: Color,
    #[serde(default)]
    pub fill_color: Option<Color>,
    pub stroke_width: f32,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightMark {
    pub frame: Frame,
    pub color: Color,
    #[serde(default = "default_highlight_opacity")]
    pub opacity: f32,
}

/// Freehand ink stroke
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InkMark {
    pub points: Vec<Point>,
    pub color: Color,
    pub stroke_width: f32,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
}

/// Sticky note anchored at a single point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentMark {
    pub anchor: Point,
    pub content: String,
    pub color: Color,
}

/// Embedded raster image; `data` is a data URI such as `data:image/png;base64,...`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMark {
    pub frame: Frame,
    pub data: String,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
}

/// Decoded image payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    /// MIME type taken from the data URI, e.g. `image/png`
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("image payload is not a data URI")]
    NotDataUri,
    #[error("image payload is not base64 encoded")]
    NotBase64,
    #[error("image payload could not be decoded: {0}")]
    Decode(String),
}

impl ImageMark {
    /// Split the data URI into its format tag and raw bytes.
    pub fn decode_payload(&self) -> Result<ImagePayload, PayloadError> {
        let rest = self.data.trim().strip_prefix("data:").ok_or(PayloadError::NotDataUri)?;
        let (header, body) = rest.split_once(',').ok_or(PayloadError::NotDataUri)?;
        let mut parts = header.split(';');
        let mime = parts.next().unwrap_or_default().to_ascii_lowercase();
        if !parts.any(|part| part.eq_ignore_ascii_case("base64")) {
            return Err(PayloadError::NotBase64);
        }

        let bytes = B64.decode(body.trim()).map_err(|e| PayloadError::Decode(e.to_string()))?;
        Ok(ImagePayload { mime, bytes })
    }

    /// Build a data URI payload from raw bytes.
    pub fn encode_payload(mime: &str, bytes: &[u8]) -> String {
        format!("data:{};base64,{}", mime, B64.encode(bytes))
    }
}

/// Typeset math; `source` is TeX-like math notation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MathMark {
    pub frame: Frame,
    pub source: String,
    pub color: Color,
    pub font_size: f32,
}

/// Invisible recognized-text overlay used for selection and search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrTextMark {
    pub frame: Frame,
    pub text: String,
}

/// Annotation variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AnnotationKind {
    Text(TextMark),
    Rect(ShapeMark),
    Highlight(HighlightMark),
    Freehand(InkMark),
    Comment(CommentMark),
    Image(ImageMark),
    Math(MathMark),
    OcrText(OcrTextMark),
}

/// Position-bearing part of an annotation, used to snapshot geometry at the
/// start of a gesture.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Box(Frame),
    Path(Vec<Point>),
    Anchor(Point),
}

impl Geometry {
    /// Bounding box of the geometry
    pub fn bounds(&self) -> Frame {
        match self {
            Geometry::Box(frame) => *frame,
            Geometry::Anchor(point) => Frame::new(point.x, point.y, 0.0, 0.0),
            Geometry::Path(points) => {
                let Some(first) = points.first() else {
                    return Frame::new(0.0, 0.0, 0.0, 0.0);
                };
                let (mut min_x, mut min_y, mut max_x, mut max_y) =
                    (first.x, first.y, first.x, first.y);
                for point in points.iter().skip(1) {
                    min_x = min_x.min(point.x);
                    min_y = min_y.min(point.y);
                    max_x = max_x.max(point.x);
                    max_y = max_y.max(point.y);
                }
                Frame::new(min_x, min_y, max_x - min_x, max_y - min_y)
            }
        }
    }

    /// Translate by (dx, dy), limiting the delta so the whole geometry stays
    /// inside [0, 100].
    pub fn translated_within_page(&self, dx: f32, dy: f32) -> Geometry {
        let bounds = self.bounds();
        let dx = limit_delta(dx, -bounds.x, PERCENT_MAX - bounds.right());
        let dy = limit_delta(dy, -bounds.y, PERCENT_MAX - bounds.bottom());
        match self {
            Geometry::Box(frame) => Geometry::Box(frame.translated(dx, dy).clamped()),
            Geometry::Anchor(point) => Geometry::Anchor(point.offset(dx, dy).clamped()),
            Geometry::Path(points) => {
                Geometry::Path(points.iter().map(|p| p.offset(dx, dy).clamped()).collect())
            }
        }
    }
}

/// Clamp a delta into [lo, hi]. An inverted or NaN range, as produced by
/// geometry that already overhangs the page, yields `lo` instead of panicking.
fn limit_delta(delta: f32, lo: f32, hi: f32) -> f32 {
    let lo = if lo.is_finite() { lo } else { 0.0 };
    let hi = if hi.is_finite() { hi.max(lo) } else { lo };
    delta.max(lo).min(hi).min(PERCENT_MAX)
}

impl Geometry {
    /// Whether every coordinate is finite and on the page.
    pub fn is_on_page(&self) -> bool {
        match self {
            Geometry::Box(frame) => frame.is_on_page(),
            Geometry::Anchor(point) => point.is_on_page(),
            Geometry::Path(points) => points.iter().all(Point::is_on_page),
        }
    }
}

impl AnnotationKind {
    /// Tag name as used in serialized projects
    pub fn name(&self) -> &'static str {
        match self {
            AnnotationKind::Text(_) => "text",
            AnnotationKind::Rect(_) => "rect",
            AnnotationKind::Highlight(_) => "highlight",
            AnnotationKind::Freehand(_) => "freehand",
            AnnotationKind::Comment(_) => "comment",
            AnnotationKind::Image(_) => "image",
            AnnotationKind::Math(_) => "math",
            AnnotationKind::OcrText(_) => "ocrText",
        }
    }

    pub fn frame(&self) -> Option<Frame> {
        match self {
            AnnotationKind::Text(mark) => Some(mark.frame),
            AnnotationKind::Rect(mark) => Some(mark.frame),
            AnnotationKind::Highlight(mark) => Some(mark.frame),
            AnnotationKind::Image(mark) => Some(mark.frame),
            AnnotationKind::Math(mark) => Some(mark.frame),
            AnnotationKind::OcrText(mark) => Some(mark.frame),
            AnnotationKind::Freehand(_) | AnnotationKind::Comment(_) => None,
        }
    }

    fn frame_mut(&mut self) -> Option<&mut Frame> {
        match self {
            AnnotationKind::Text(mark) => Some(&mut mark.frame),
            AnnotationKind::Rect(mark) => Some(&mut mark.frame),
            AnnotationKind::Highlight(mark) => Some(&mut mark.frame),
            AnnotationKind::Image(mark) => Some(&mut mark.frame),
            AnnotationKind::Math(mark) => Some(&mut mark.frame),
            AnnotationKind::OcrText(mark) => Some(&mut mark.frame),
            AnnotationKind::Freehand(_) | AnnotationKind::Comment(_) => None,
        }
    }

    pub fn geometry(&self) -> Geometry {
        match self {
            AnnotationKind::Freehand(mark) => Geometry::Path(mark.points.clone()),
            AnnotationKind::Comment(mark) => Geometry::Anchor(mark.anchor),
            other => Geometry::Box(other.frame().unwrap_or(Frame::new(0.0, 0.0, 0.0, 0.0))),
        }
    }

    /// Replace the geometry. Mismatched shapes (a path for a box kind, etc.)
    /// are ignored and reported as `false`.
    pub fn set_geometry(&mut self, geometry: Geometry) -> bool {
        match (self, geometry) {
            (AnnotationKind::Freehand(mark), Geometry::Path(points)) => {
                mark.points = points;
                true
            }
            (AnnotationKind::Comment(mark), Geometry::Anchor(anchor)) => {
                mark.anchor = anchor;
                true
            }
            (kind, Geometry::Box(frame)) => match kind.frame_mut() {
                Some(target) => {
                    *target = frame;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Box-shaped kinds can be resized with corner handles.
    pub fn is_resizable(&self) -> bool {
        self.frame().is_some() && !matches!(self, AnnotationKind::OcrText(_))
    }

    /// Whether the annotation is visible on screen and in export.
    pub fn is_visible(&self) -> bool {
        !matches!(self, AnnotationKind::OcrText(_))
    }

    /// Plain text carried by the annotation, if any (HTML is returned as-is).
    pub fn text_content(&self) -> Option<&str> {
        match self {
            AnnotationKind::Text(mark) => Some(&mark.content),
            AnnotationKind::Comment(mark) => Some(&mark.content),
            AnnotationKind::Math(mark) => Some(&mark.source),
            AnnotationKind::OcrText(mark) => Some(&mark.text),
            _ => None,
        }
    }
}

/// A positioned, typed mark layered over a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    id: AnnotationId,
    page_index: usize,
    #[serde(flatten)]
    kind: AnnotationKind,
}

impl Annotation {
    /// Create a new annotation with a generated id
    pub fn new(page_index: usize, kind: AnnotationKind) -> Self {
        Self { id: AnnotationId::new_v4(), page_index, kind }
    }

    /// Create an annotation with a specific id (for imports and tests)
    pub fn with_id(id: AnnotationId, page_index: usize, kind: AnnotationKind) -> Self {
        Self { id, page_index, kind }
    }

    pub fn id(&self) -> AnnotationId {
        self.id
    }

    pub fn page_index(&self) -> usize {
        self.page_index
    }

    pub(crate) fn set_page_index(&mut self, page_index: usize) {
        self.page_index = page_index;
    }

    pub fn kind(&self) -> &AnnotationKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut AnnotationKind {
        &mut self.kind
    }

    pub fn geometry(&self) -> Geometry {
        self.kind.geometry()
    }

    pub fn bounds(&self) -> Frame {
        self.kind.geometry().bounds()
    }

    /// Apply a partial update. Fields that do not exist on this kind are
    /// ignored. Returns `true` if anything changed.
    pub fn apply_patch(&mut self, patch: &AnnotationPatch) -> bool {
        let before = self.kind.clone();

        if let Some(frame) = self.kind.frame_mut() {
            if let Some(x) = patch.x {
                frame.x = x;
            }
            if let Some(y) = patch.y {
                frame.y = y;
            }
            if let Some(width) = patch.width {
                frame.width = width.max(0.0);
            }
            if let Some(height) = patch.height {
                frame.height = height.max(0.0);
            }
            *frame = frame.clamped();
        }

        match &mut self.kind {
            AnnotationKind::Text(mark) => {
                patch.apply_color(&mut mark.color);
                patch.apply_opacity(&mut mark.opacity);
                if let Some(size) = patch.font_size {
                    mark.font_size = size.max(1.0);
                }
                if let Some(content) = &patch.content {
                    mark.content.clone_from(content);
                }
                if let Some(vertical) = patch.vertical {
                    mark.vertical = vertical;
                }
                if let Some(fill) = patch.fill_color {
                    mark.background = fill;
                }
            }
            AnnotationKind::Rect(mark) => {
                patch.apply_color(&mut mark.color);
                patch.apply_opacity(&mut mark.opacity);
                if let Some(fill) = patch.fill_color {
                    mark.fill_color = fill;
                }
                if let Some(width) = patch.stroke_width {
                    mark.stroke_width = width.max(0.0);
                }
            }
            AnnotationKind::Highlight(mark) => {
                patch.apply_color(&mut mark.color);
                patch.apply_opacity(&mut mark.opacity);
            }
            AnnotationKind::Freehand(mark) => {
                patch.apply_color(&mut mark.color);
                patch.apply_opacity(&mut mark.opacity);
                if let Some(width) = patch.stroke_width {
                    mark.stroke_width = width.max(0.0);
                }
                if let Some(points) = &patch.points {
                    mark.points = points.iter().map(|p| p.clamped()).collect();
                }
            }
            AnnotationKind::Comment(mark) => {
                patch.apply_color(&mut mark.color);
                if let Some(content) = &patch.content {
                    mark.content.clone_from(content);
                }
                if patch.x.is_some() || patch.y.is_some() {
                    mark.anchor = Point::new(
                        patch.x.unwrap_or(mark.anchor.x),
                        patch.y.unwrap_or(mark.anchor.y),
                    )
                    .clamped();
                }
            }
            AnnotationKind::Image(mark) => {
                patch.apply_opacity(&mut mark.opacity);
                if let Some(data) = &patch.image_data {
                    mark.data.clone_from(data);
                }
            }
            AnnotationKind::Math(mark) => {
                patch.apply_color(&mut mark.color);
                if let Some(size) = patch.font_size {
                    mark.font_size = size.max(1.0);
                }
                if let Some(content) = &patch.content {
                    mark.source.clone_from(content);
                }
            }
            AnnotationKind::OcrText(mark) => {
                if let Some(content) = &patch.content {
                    mark.text.clone_from(content);
                }
            }
        }

        self.kind != before
    }
}

/// Partial update of an annotation's properties
///
/// `fill_color` distinguishes "leave unchanged" (`None`) from "clear the
/// fill" (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnnotationPatch {
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub width: Option<f32>,
    pub height: Option<f32>,
    pub points: Option<Vec<Point>>,
    pub color: Option<Color>,
    pub fill_color: Option<Option<Color>>,
    pub opacity: Option<f32>,
    pub stroke_width: Option<f32>,
    pub font_size: Option<f32>,
    pub content: Option<String>,
    pub image_data: Option<String>,
    pub vertical: Option<bool>,
}

impl AnnotationPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame(mut self, frame: Frame) -> Self {
        self.x = Some(frame.x);
        self.y = Some(frame.y);
        self.width = Some(frame.width);
        self.height = Some(frame.height);
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_fill_color(mut self, fill: Option<Color>) -> Self {
        self.fill_color = Some(fill);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = Some(opacity);
        self
    }

    fn apply_color(&self, target: &mut Color) {
        if let Some(color) = self.color {
            *target = color;
        }
    }

    fn apply_opacity(&self, target: &mut f32) {
        if let Some(opacity) = self.opacity {
            *target = opacity.clamp(0.0, 1.0);
        }
    }
}
