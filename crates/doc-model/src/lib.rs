//! Document model: annotation records, pages, the annotation/page store and
//! the serializable document snapshot.

pub mod annotation;
pub mod page;
pub mod state;
pub mod store;

pub use annotation::{
    Annotation, AnnotationId, AnnotationKind, AnnotationPatch, Color, ColorParseError,
    CommentMark, Frame, Geometry, HighlightMark, ImageMark, ImagePayload, InkMark, MathMark,
    OcrTextMark, PayloadError, Point, ShapeMark, TextMark, DEFAULT_HIGHLIGHT_OPACITY, PERCENT_MAX,
};
pub use page::{Page, PageId, RotateDirection, Rotation};
pub use state::{
    apply_view_action, DocumentId, DocumentState, ViewAction, ViewPosition, MAX_ZOOM_PERCENT,
    MIN_ZOOM_PERCENT,
};
pub use store::{DocumentStore, StoreError, StoreEvent};
