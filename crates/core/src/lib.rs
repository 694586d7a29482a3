//! Pagemark Core Library
//!
//! Interaction, composition and export for annotated documents: the pointer
//! state machine that creates and manipulates annotations, the page overlay
//! composition used for drawing and hit testing, and the baking pipeline that
//! flattens annotations into a new PDF.

pub mod composite;
pub mod config;
pub mod geometry;
pub mod interaction;
pub mod manipulation;
pub mod math;
pub mod ocr;
pub mod pdf_export;
pub mod raster;
pub mod rich_text;
pub mod speech;
pub mod tasks;

pub use composite::{compose_page, hit_test, LayerItem, PageLayer};
pub use config::{ConfigError, ExportConfig, InteractionConfig, PagemarkConfig};
pub use geometry::{to_page_coords, to_pixel_rect, PageBox, PixelRect, ViewportPoint};
pub use interaction::{
    InteractionEffect, InteractionMachine, InteractionState, PointerEvent, PointerKind, Tool,
    ToolStyle,
};
pub use manipulation::{HandleZone, Manipulation, ManipulationKind, ResizeHandle};
pub use math::{typeset, MathError, MathLayout};
pub use ocr::{OcrConfig, OcrError, OcrOutput, OcrService, OcrWord, UnavailableOcr};
pub use pdf_export::{
    bake_document, BakeError, BakeOutput, BakeProgress, BakeReport, Baker, SkippedAnnotation,
};
pub use raster::{RasterError, RasterTarget};
pub use speech::{LoggingSpeech, SpeechService};
pub use tasks::{BackgroundTasks, TaskEvent, TaskResult};
