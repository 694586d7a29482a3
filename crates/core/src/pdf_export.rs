//! Baking annotations into a flattened PDF
//!
//! The source document is loaded with `lopdf`, its pages are re-linked in the
//! working order and every annotation is drawn into page content. Geometric
//! marks become path operators; text and math are rasterized and embedded as
//! image XObjects with a soft mask. One failing annotation is logged and
//! skipped, never fatal for the whole export.

use std::collections::BTreeMap;

use image::ImageFormat;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use serde::Serialize;

use doc_model::{
    Annotation, AnnotationId, AnnotationKind, Color, CommentMark, DocumentState, Frame,
    HighlightMark, ImageMark, InkMark, MathMark, PayloadError, Point, ShapeMark, TextMark,
    PERCENT_MAX,
};
use pagemark_scheduler::CancellationToken;
use pdf_engine::{inherited_attribute, media_box, normalize_rotation, page_rotate, RgbaImage};

use crate::config::ExportConfig;
use crate::math;
use crate::raster::{self, RasterError, RasterTarget};
use crate::rich_text;

/// Resource categories that receive generated entries
const OWNED_CATEGORIES: [&[u8]; 3] = [b"XObject", b"ExtGState", b"Font"];

const COMMENT_FONT: &str = "PmHelv";

#[derive(Debug, thiserror::Error)]
pub enum BakeError {
    #[error("source document could not be read: {0}")]
    Source(#[from] lopdf::Error),
    #[error("document has no pages to export")]
    NoPages,
    #[error("source document has no page {0}")]
    MissingSourcePage(u32),
    #[error("export cancelled")]
    Cancelled,
    #[error("output could not be written: {0}")]
    Write(#[from] std::io::Error),
}

pub type BakeResult<T> = Result<T, BakeError>;

/// Why a single annotation could not be drawn
#[derive(Debug, thiserror::Error)]
pub enum DrawError {
    #[error("invalid image payload: {0}")]
    Payload(#[from] PayloadError),
    #[error("unsupported image format {0:?}")]
    UnsupportedImage(String),
    #[error("image could not be decoded: {0}")]
    Image(#[from] image::ImageError),
    #[error("rasterization failed: {0}")]
    Raster(#[from] RasterError),
    #[error("annotation refers to page {0}, which is not in the document")]
    PageOutOfRange(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedAnnotation {
    pub id: AnnotationId,
    pub page_index: usize,
    pub kind: &'static str,
    pub reason: String,
}

/// Summary of an export run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BakeReport {
    pub pages: usize,
    pub drawn: usize,
    pub skipped: Vec<SkippedAnnotation>,
    /// Math annotations exported as their raw source
    pub fallbacks: Vec<AnnotationId>,
}

impl BakeReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BakeProgress {
    /// Pages finished so far
    pub done: usize,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct BakeOutput {
    pub bytes: Vec<u8>,
    pub report: BakeReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrawOutcome {
    Drawn,
    Fallback,
    Hidden,
}

/// Drawing surface for one output page, in PDF user space
struct PageCanvas {
    origin: (f32, f32),
    width: f32,
    height: f32,
    resources: Dictionary,
    operations: Vec<Operation>,
    gstates: BTreeMap<u32, Vec<u8>>,
    next_name: usize,
}

fn op(operator: &str, operands: Vec<Object>) -> Operation {
    Operation::new(operator, operands)
}

fn reals<const N: usize>(values: [f32; N]) -> Vec<Object> {
    values.into_iter().map(Object::Real).collect()
}

fn rgb(color: Color) -> [f32; 3] {
    let (r, g, b, _) = color.to_normalized();
    [r, g, b]
}

/// WinAnsi bytes for the standard Helvetica font; unmappable characters become `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{2026}' => 0x85,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201c}' => 0x93,
            '\u{201d}' => 0x94,
            c if (c as u32) < 0x80 || (0xa0..=0xff).contains(&(c as u32)) => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

impl PageCanvas {
    fn new(media: [f32; 4], resources: Dictionary) -> Self {
        Self {
            origin: (media[0], media[1]),
            width: media[2] - media[0],
            height: media[3] - media[1],
            resources,
            operations: Vec::new(),
            gstates: BTreeMap::new(),
            next_name: 0,
        }
    }

    /// `(x, y, width, height)` of a frame, bottom-left origin
    fn rect(&self, frame: Frame) -> [f32; 4] {
        let width = frame.width / PERCENT_MAX * self.width;
        let height = frame.height / PERCENT_MAX * self.height;
        let x = self.origin.0 + frame.x / PERCENT_MAX * self.width;
        let y = self.origin.1 + self.height - frame.y / PERCENT_MAX * self.height - height;
        [x, y, width, height]
    }

    fn point(&self, point: Point) -> [f32; 2] {
        [
            self.origin.0 + point.x / PERCENT_MAX * self.width,
            self.origin.1 + self.height - point.y / PERCENT_MAX * self.height,
        ]
    }

    fn push(&mut self, operator: &str, operands: Vec<Object>) {
        self.operations.push(op(operator, operands));
    }

    fn with_category<R>(&mut self, category: &[u8], f: impl FnOnce(&mut Dictionary) -> R) -> R {
        let mut dict = match self.resources.remove(category) {
            Some(Object::Dictionary(dict)) => dict,
            _ => Dictionary::new(),
        };
        let result = f(&mut dict);
        self.resources.set(category.to_vec(), dict);
        result
    }

    /// Add `value` under a fresh name that does not clash with source resources.
    fn register(&mut self, category: &[u8], prefix: &str, value: Object) -> Vec<u8> {
        let mut counter = self.next_name;
        let name = self.with_category(category, |dict| loop {
            counter += 1;
            let name = format!("{prefix}{counter}").into_bytes();
            if !dict.has(&name) {
                dict.set(name.clone(), value);
                break name;
            }
        });
        self.next_name = counter;
        name
    }

    fn set_opacity(&mut self, opacity: f32) {
        let opacity = opacity.clamp(0.0, 1.0);
        if opacity >= 1.0 {
            return;
        }
        let key = (opacity * 1000.0).round() as u32;
        let name = match self.gstates.get(&key) {
            Some(name) => name.clone(),
            None => {
                let state = dictionary! {
                    "Type" => "ExtGState",
                    "CA" => Object::Real(opacity),
                    "ca" => Object::Real(opacity),
                };
                let name = self.register(b"ExtGState", "PmGs", Object::Dictionary(state));
                self.gstates.insert(key, name.clone());
                name
            }
        };
        self.push("gs", vec![Object::Name(name)]);
    }

    fn comment_font(&mut self) -> Vec<u8> {
        let name = COMMENT_FONT.as_bytes().to_vec();
        self.with_category(b"Font", |fonts| {
            if !fonts.has(&name) {
                fonts.set(
                    name.clone(),
                    dictionary! {
                        "Type" => "Font",
                        "Subtype" => "Type1",
                        "BaseFont" => "Helvetica",
                        "Encoding" => "WinAnsiEncoding",
                    },
                );
            }
        });
        name
    }

    fn draw_shape(&mut self, mark: &ShapeMark) {
        let [x, y, w, h] = self.rect(mark.frame);
        self.push("q", vec![]);
        self.set_opacity(mark.opacity);
        match mark.fill_color {
            Some(fill) => {
                self.push("rg", reals(rgb(fill)));
                self.push("re", reals([x, y, w, h]));
                self.push("f", vec![]);
            }
            None => {
                self.push("RG", reals(rgb(mark.color)));
                self.push("w", reals([mark.stroke_width.max(0.0)]));
                self.push("re", reals([x, y, w, h]));
                self.push("S", vec![]);
            }
        }
        self.push("Q", vec![]);
    }

    fn draw_highlight(&mut self, mark: &HighlightMark, fallback_opacity: f32) {
        let opacity = if mark.opacity > 0.0 && mark.opacity < 1.0 {
            mark.opacity
        } else {
            fallback_opacity
        };
        let [x, y, w, h] = self.rect(mark.frame);
        self.push("q", vec![]);
        self.set_opacity(opacity);
        self.push("rg", reals(rgb(mark.color)));
        self.push("re", reals([x, y, w, h]));
        self.push("f", vec![]);
        self.push("Q", vec![]);
    }

    fn draw_ink(&mut self, mark: &InkMark) -> DrawOutcome {
        let Some((first, rest)) = mark.points.split_first() else {
            return DrawOutcome::Hidden;
        };
        self.push("q", vec![]);
        self.set_opacity(mark.opacity);
        self.push("RG", reals(rgb(mark.color)));
        self.push("w", reals([mark.stroke_width.max(0.0)]));
        self.push("J", vec![Object::Integer(1)]);
        self.push("j", vec![Object::Integer(1)]);
        self.push("m", reals(self.point(*first)));
        if rest.is_empty() {
            // a single sample still leaves a round dot
            self.push("l", reals(self.point(*first)));
        }
        for point in rest {
            self.push("l", reals(self.point(*point)));
        }
        self.push("S", vec![]);
        self.push("Q", vec![]);
        DrawOutcome::Drawn
    }

    fn draw_comment(&mut self, mark: &CommentMark, config: &ExportConfig) {
        let [x, top] = self.point(mark.anchor);
        let size = config.comment_marker_pt;

        self.push("q", vec![]);
        self.push("rg", reals(rgb(mark.color)));
        self.push("RG", reals([0.0, 0.0, 0.0]));
        self.push("w", reals([0.5]));
        self.push("re", reals([x, top - size, size, size]));
        self.push("B", vec![]);

        let excerpt = rich_text::excerpt(&mark.content, config.comment_excerpt_chars);
        if !excerpt.is_empty() {
            let font = self.comment_font();
            self.push("rg", reals([0.0, 0.0, 0.0]));
            self.push("BT", vec![]);
            self.push("Tf", vec![Object::Name(font), Object::Real(config.comment_font_pt)]);
            self.push("Td", reals([x + size + 2.0, top - size * 0.75]));
            self.push("Tj", vec![Object::String(win_ansi(&excerpt), StringFormat::Literal)]);
            self.push("ET", vec![]);
        }
        self.push("Q", vec![]);
    }

    /// Embed `bitmap` as an RGB image with an alpha soft mask, stretched into `frame`.
    fn draw_bitmap(&mut self, doc: &mut Document, bitmap: &RgbaImage, frame: Frame, opacity: f32) {
        let (width, height) = bitmap.dimensions();
        let mut color = Vec::with_capacity((width * height * 3) as usize);
        let mut alpha = Vec::with_capacity((width * height) as usize);
        for pixel in bitmap.pixels() {
            color.extend_from_slice(&pixel.0[..3]);
            alpha.push(pixel.0[3]);
        }

        let smask_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            alpha,
        ));
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "SMask" => smask_id,
            },
            color,
        ));
        let name = self.register(b"XObject", "PmIm", Object::Reference(image_id));

        let [x, y, w, h] = self.rect(frame);
        self.push("q", vec![]);
        self.set_opacity(opacity);
        self.push("cm", reals([w, 0.0, 0.0, h, x, y]));
        self.push("Do", vec![Object::Name(name)]);
        self.push("Q", vec![]);
    }

    fn into_content(self) -> (Vec<Operation>, Dictionary) {
        (self.operations, self.resources)
    }
}

fn image_format(mime: &str) -> Result<ImageFormat, DrawError> {
    match mime {
        "image/png" => Ok(ImageFormat::Png),
        "image/jpeg" | "image/jpg" => Ok(ImageFormat::Jpeg),
        "image/gif" => Ok(ImageFormat::Gif),
        "image/webp" => Ok(ImageFormat::WebP),
        other => Err(DrawError::UnsupportedImage(other.to_owned())),
    }
}

fn decode_image(mark: &ImageMark) -> Result<RgbaImage, DrawError> {
    let payload = mark.decode_payload()?;
    let format = image_format(&payload.mime)?;
    Ok(image::load_from_memory_with_format(&payload.bytes, format)?.to_rgba8())
}

/// Resources of a page with inherited entries resolved and generated
/// categories inlined, so they can be extended without touching shared objects.
fn page_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    let mut resources = inherited_attribute(doc, page_id, b"Resources")
        .and_then(|obj| obj.as_dict().ok())
        .cloned()
        .unwrap_or_default();

    for category in OWNED_CATEGORIES {
        let resolved = match resources.get(category) {
            Ok(Object::Reference(id)) => doc.get_dictionary(*id).ok().cloned(),
            _ => None,
        };
        if let Some(dict) = resolved {
            resources.set(category.to_vec(), dict);
        }
    }
    resources
}

fn page_contents(doc: &Document, page_id: ObjectId) -> Vec<Object> {
    let contents = doc.get_dictionary(page_id).ok().and_then(|page| page.get(b"Contents").ok());
    match contents {
        Some(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Some(Object::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

fn content_stream(operations: Vec<Operation>) -> BakeResult<Stream> {
    let bytes = Content { operations }.encode()?;
    Ok(Stream::new(dictionary! {}, bytes))
}

pub struct Baker {
    config: ExportConfig,
    cancel: Option<CancellationToken>,
}

impl Baker {
    pub fn new(config: ExportConfig) -> Self {
        Self { config, cancel: None }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn bake(&self, state: &DocumentState) -> BakeResult<BakeOutput> {
        self.bake_with_progress(state, |_| {})
    }

    /// Produce the flattened document, reporting after every page.
    pub fn bake_with_progress<F>(&self, state: &DocumentState, mut progress: F) -> BakeResult<BakeOutput>
    where
        F: FnMut(BakeProgress),
    {
        if state.pages.is_empty() {
            return Err(BakeError::NoPages);
        }

        let mut doc = Document::load_mem(&state.source)?;
        let source_pages = doc.get_pages();
        let pages_root = doc.catalog()?.get(b"Pages")?.as_reference()?;

        let mut report = BakeReport { pages: state.pages.len(), ..BakeReport::default() };
        let mut by_page: Vec<Vec<&Annotation>> = vec![Vec::new(); state.pages.len()];
        for annotation in &state.annotations {
            match by_page.get_mut(annotation.page_index()) {
                Some(list) => list.push(annotation),
                None => skip(&mut report, annotation, &DrawError::PageOutOfRange(annotation.page_index())),
            }
        }

        let mut kids = Vec::with_capacity(state.pages.len());
        for (index, page) in state.pages.iter().enumerate() {
            if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                log::info!("export cancelled after {index} of {} pages", state.pages.len());
                return Err(BakeError::Cancelled);
            }

            let page_id = *source_pages
                .get(&page.original_index)
                .ok_or(BakeError::MissingSourcePage(page.original_index))?;

            let media = media_box(&doc, page_id);
            let rotation =
                normalize_rotation(i64::from(page_rotate(&doc, page_id)) + i64::from(page.rotation.degrees()));
            let crop_box = inherited_attribute(&doc, page_id, b"CropBox").cloned();
            let mut contents = page_contents(&doc, page_id);

            let mut canvas = PageCanvas::new(media, page_resources(&doc, page_id));
            for annotation in &by_page[index] {
                match self.draw(&mut canvas, &mut doc, annotation) {
                    Ok(DrawOutcome::Drawn) => report.drawn += 1,
                    Ok(DrawOutcome::Fallback) => {
                        report.drawn += 1;
                        report.fallbacks.push(annotation.id());
                    }
                    Ok(DrawOutcome::Hidden) => {}
                    Err(err) => skip(&mut report, annotation, &err),
                }
            }

            let (mut operations, resources) = canvas.into_content();
            if !operations.is_empty() {
                operations.insert(0, op("Q", vec![]));
                let save_id = doc.add_object(content_stream(vec![op("q", vec![])])?);
                let overlay_id = doc.add_object(content_stream(operations)?);
                contents.insert(0, Object::Reference(save_id));
                contents.push(Object::Reference(overlay_id));
            }

            let page_dict = doc.get_object_mut(page_id)?.as_dict_mut()?;
            page_dict.set("Parent", pages_root);
            page_dict.set("MediaBox", reals(media));
            if let Some(crop_box) = crop_box {
                page_dict.set("CropBox", crop_box);
            }
            page_dict.set("Resources", resources);
            page_dict.set("Contents", contents);
            page_dict.set("Rotate", i64::from(rotation));
            kids.push(Object::Reference(page_id));

            progress(BakeProgress { done: index + 1, total: state.pages.len() });
        }

        let root = doc.get_object_mut(pages_root)?.as_dict_mut()?;
        root.set("Count", kids.len() as i64);
        root.set("Kids", kids);
        root.remove(b"Parent");
        let pruned = doc.prune_objects();
        log::debug!("pruned {} unreachable objects", pruned.len());

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)?;

        log::info!(
            "baked {} pages: {} annotations drawn, {} skipped, {} fallbacks",
            report.pages,
            report.drawn,
            report.skipped.len(),
            report.fallbacks.len()
        );
        Ok(BakeOutput { bytes, report })
    }

    fn raster_target(&self, canvas: &PageCanvas, frame: Frame) -> RasterTarget {
        let [_, _, width, height] = canvas.rect(frame);
        RasterTarget::new(width, height, self.config.supersample, self.config.max_raster_px)
    }

    fn draw(
        &self,
        canvas: &mut PageCanvas,
        doc: &mut Document,
        annotation: &Annotation,
    ) -> Result<DrawOutcome, DrawError> {
        match annotation.kind() {
            AnnotationKind::Rect(mark) => canvas.draw_shape(mark),
            AnnotationKind::Highlight(mark) => canvas.draw_highlight(mark, self.config.highlight_opacity),
            AnnotationKind::Freehand(mark) => return Ok(canvas.draw_ink(mark)),
            AnnotationKind::Comment(mark) => canvas.draw_comment(mark, &self.config),
            AnnotationKind::Image(mark) => {
                let bitmap = decode_image(mark)?;
                canvas.draw_bitmap(doc, &bitmap, mark.frame, mark.opacity);
            }
            AnnotationKind::Text(mark) => self.draw_text(canvas, doc, mark)?,
            AnnotationKind::Math(mark) => return self.draw_math(canvas, doc, mark, annotation.id()),
            AnnotationKind::OcrText(_) => return Ok(DrawOutcome::Hidden),
        }
        Ok(DrawOutcome::Drawn)
    }

    fn draw_text(&self, canvas: &mut PageCanvas, doc: &mut Document, mark: &TextMark) -> Result<(), DrawError> {
        let target = self.raster_target(canvas, mark.frame);
        let bitmap = raster::rasterize_text(mark, target)?;
        canvas.draw_bitmap(doc, &bitmap, mark.frame, 1.0);
        Ok(())
    }

    fn draw_math(
        &self,
        canvas: &mut PageCanvas,
        doc: &mut Document,
        mark: &MathMark,
        id: AnnotationId,
    ) -> Result<DrawOutcome, DrawError> {
        let target = self.raster_target(canvas, mark.frame);
        let (bitmap, outcome) = match math::typeset(&mark.source) {
            Ok(layout) => (raster::rasterize_math(&layout, mark.color, mark.font_size, target)?, DrawOutcome::Drawn),
            Err(err) => {
                log::warn!("math annotation {id} could not be typeset ({err}), exporting its source");
                let bitmap = raster::rasterize_monospace(&mark.source, mark.color, mark.font_size, target)?;
                (bitmap, DrawOutcome::Fallback)
            }
        };
        canvas.draw_bitmap(doc, &bitmap, mark.frame, 1.0);
        Ok(outcome)
    }
}

fn skip(report: &mut BakeReport, annotation: &Annotation, err: &DrawError) {
    log::warn!("skipping {} annotation {}: {err}", annotation.kind().name(), annotation.id());
    report.skipped.push(SkippedAnnotation {
        id: annotation.id(),
        page_index: annotation.page_index(),
        kind: annotation.kind().name(),
        reason: err.to_string(),
    });
}

/// Bake with a fresh [`Baker`] and no progress reporting.
pub fn bake_document(state: &DocumentState, config: &ExportConfig) -> BakeResult<BakeOutput> {
    Baker::new(config.clone()).bake(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_model::{DocumentStore, OcrTextMark, RotateDirection};
    use pdf_engine::{blank_document, PageSize};

    fn store_with_pages(sizes: &[(f32, f32)]) -> DocumentStore {
        let sizes: Vec<PageSize> =
            sizes.iter().map(|&(width_pt, height_pt)| PageSize { width_pt, height_pt }).collect();
        let source = blank_document(&sizes).expect("blank document");
        DocumentStore::new("test", source, sizes.len())
    }

    fn shape(frame: Frame, fill: Option<Color>) -> AnnotationKind {
        AnnotationKind::Rect(ShapeMark { frame, color: Color::RED, fill_color: fill, stroke_width: 2.0, opacity: 1.0 })
    }

    fn page_operations(bytes: &[u8], page_number: u32) -> (Document, ObjectId, Vec<Operation>) {
        let doc = Document::load_mem(bytes).expect("output parses");
        let page_id = *doc.get_pages().get(&page_number).expect("page exists");
        let content = doc.get_page_content(page_id).expect("content");
        let operations = Content::decode(&content).expect("decodes").operations;
        (doc, page_id, operations)
    }

    fn operands(operation: &Operation) -> Vec<f32> {
        operation.operands.iter().map(|obj| obj.as_float().expect("number")).collect()
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-2, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn test_geometric_annotations_keep_their_position() {
        let mut store = store_with_pages(&[(800.0, 1000.0)]);
        store.add(Annotation::new(0, shape(Frame::new(10.0, 20.0, 30.0, 40.0), None))).expect("rect");
        store
            .add(Annotation::new(
                0,
                AnnotationKind::Highlight(HighlightMark {
                    frame: Frame::new(50.0, 50.0, 25.0, 5.0),
                    color: Color::YELLOW,
                    opacity: 0.4,
                }),
            ))
            .expect("highlight");
        store
            .add(Annotation::new(
                0,
                AnnotationKind::Freehand(InkMark {
                    points: vec![Point::new(0.0, 0.0), Point::new(50.0, 50.0), Point::new(100.0, 100.0)],
                    color: Color::BLACK,
                    stroke_width: 3.0,
                    opacity: 1.0,
                }),
            ))
            .expect("ink");

        let output = bake_document(&store.snapshot(), &ExportConfig::default()).expect("bake");
        assert_eq!(output.report.drawn, 3);
        assert!(output.report.is_complete());

        let (_, _, operations) = page_operations(&output.bytes, 1);
        let rects: Vec<Vec<f32>> =
            operations.iter().filter(|op| op.operator == "re").map(operands).collect();
        assert_close(&rects[0], &[80.0, 400.0, 240.0, 400.0]);
        assert_close(&rects[1], &[400.0, 450.0, 200.0, 50.0]);

        let line: Vec<Vec<f32>> = operations
            .iter()
            .filter(|op| op.operator == "m" || op.operator == "l")
            .map(operands)
            .collect();
        assert_close(&line.concat(), &[0.0, 1000.0, 400.0, 500.0, 800.0, 0.0]);
        assert!(operations.iter().any(|op| op.operator == "gs"));
    }

    #[test]
    fn test_filled_rect_has_no_border() {
        let mut store = store_with_pages(&[(612.0, 792.0)]);
        store
            .add(Annotation::new(0, shape(Frame::new(0.0, 0.0, 10.0, 10.0), Some(Color::BLACK))))
            .expect("rect");

        let output = bake_document(&store.snapshot(), &ExportConfig::default()).expect("bake");
        let (_, _, operations) = page_operations(&output.bytes, 1);
        let operators: Vec<&str> = operations.iter().map(|op| op.operator.as_str()).collect();
        assert!(operators.contains(&"f"));
        assert!(!operators.contains(&"S"));
    }

    #[test]
    fn test_failing_math_falls_back_and_export_completes() {
        let mut store = store_with_pages(&[(612.0, 792.0)]);
        let rect_id =
            store.add(Annotation::new(0, shape(Frame::new(5.0, 5.0, 20.0, 10.0), None))).expect("rect");
        let math_id = store
            .add(Annotation::new(
                0,
                AnnotationKind::Math(MathMark {
                    frame: Frame::new(40.0, 40.0, 30.0, 10.0),
                    source: r"\frac{1}{2".to_owned(),
                    color: Color::BLACK,
                    font_size: 16.0,
                }),
            ))
            .expect("math");
        assert!(store.contains(rect_id));

        let output = bake_document(&store.snapshot(), &ExportConfig::default()).expect("bake");
        assert_eq!(output.report.fallbacks, vec![math_id]);
        assert_eq!(output.report.drawn, 2);
        assert!(output.report.is_complete());

        let (doc, page_id, operations) = page_operations(&output.bytes, 1);
        assert!(operations.iter().any(|op| op.operator == "re"));
        assert!(operations.iter().any(|op| op.operator == "Do"));

        let resources = doc
            .get_dictionary(page_id)
            .and_then(|page| page.get(b"Resources"))
            .and_then(Object::as_dict)
            .expect("resources");
        let xobjects = resources.get(b"XObject").and_then(Object::as_dict).expect("xobjects");
        assert_eq!(xobjects.len(), 1);
    }

    #[test]
    fn test_deeply_nested_math_falls_back_to_source() {
        let mut store = store_with_pages(&[(612.0, 792.0)]);
        let source = format!("{}x{}", "{".repeat(100), "}".repeat(100));
        let math_id = store
            .add(Annotation::new(
                0,
                AnnotationKind::Math(MathMark {
                    frame: Frame::new(10.0, 10.0, 40.0, 10.0),
                    source,
                    color: Color::BLACK,
                    font_size: 12.0,
                }),
            ))
            .expect("math");

        let output = bake_document(&store.snapshot(), &ExportConfig::default()).expect("bake");
        assert_eq!(output.report.fallbacks, vec![math_id]);
        assert_eq!(output.report.drawn, 1);
        assert!(output.bytes.starts_with(b"%PDF"));
        Document::load_mem(&output.bytes).expect("output parses");
    }

    #[test]
    fn test_bad_image_is_skipped_and_ocr_text_is_not_drawn() {
        let mut store = store_with_pages(&[(612.0, 792.0)]);
        let image_id = store
            .add(Annotation::new(
                0,
                AnnotationKind::Image(ImageMark {
                    frame: Frame::new(0.0, 0.0, 10.0, 10.0),
                    data: ImageMark::encode_payload("image/tiff", b"not really"),
                    opacity: 1.0,
                }),
            ))
            .expect("image");
        store
            .add(Annotation::new(
                0,
                AnnotationKind::OcrText(OcrTextMark { frame: Frame::new(0.0, 0.0, 50.0, 5.0), text: "scan".to_owned() }),
            ))
            .expect("ocr");
        store.add(Annotation::new(0, shape(Frame::new(60.0, 60.0, 10.0, 10.0), None))).expect("rect");

        let output = bake_document(&store.snapshot(), &ExportConfig::default()).expect("bake");
        assert_eq!(output.report.drawn, 1);
        assert_eq!(output.report.skipped.len(), 1);
        assert_eq!(output.report.skipped[0].id, image_id);
        assert_eq!(output.report.skipped[0].kind, "image");

        let (_, _, operations) = page_operations(&output.bytes, 1);
        assert_eq!(operations.iter().filter(|op| op.operator == "re").count(), 1);
        assert!(!operations.iter().any(|op| op.operator == "Do"));
    }

    #[test]
    fn test_png_image_is_embedded_with_soft_mask() {
        let mut png = Vec::new();
        image::RgbaImage::from_pixel(4, 2, image::Rgba([0, 128, 255, 128]))
            .write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)
            .expect("encode png");

        let mut store = store_with_pages(&[(612.0, 792.0)]);
        store
            .add(Annotation::new(
                0,
                AnnotationKind::Image(ImageMark {
                    frame: Frame::new(10.0, 10.0, 20.0, 10.0),
                    data: ImageMark::encode_payload("image/png", &png),
                    opacity: 1.0,
                }),
            ))
            .expect("image");

        let output = bake_document(&store.snapshot(), &ExportConfig::default()).expect("bake");
        let (doc, page_id, operations) = page_operations(&output.bytes, 1);
        let cm = operations.iter().find(|op| op.operator == "cm").expect("placement");
        assert_close(&operands(cm), &[122.4, 0.0, 0.0, 79.2, 61.2, 633.6]);

        let resources = doc
            .get_dictionary(page_id)
            .and_then(|page| page.get(b"Resources"))
            .and_then(Object::as_dict)
            .expect("resources");
        let (_, image_ref) = resources
            .get(b"XObject")
            .and_then(Object::as_dict)
            .expect("xobjects")
            .iter()
            .next()
            .expect("one image");
        let image = doc.get_object(image_ref.as_reference().expect("reference")).expect("image object");
        let image = image.as_stream().expect("stream");
        assert_eq!(image.dict.get(b"Width").and_then(Object::as_i64).expect("width"), 4);
        assert_eq!(image.content.len(), 4 * 2 * 3);
        assert!(image.dict.get(b"SMask").is_ok());
    }

    #[test]
    fn test_comment_draws_marker_and_excerpt() {
        let mut store = store_with_pages(&[(612.0, 792.0)]);
        store
            .add(Annotation::new(
                0,
                AnnotationKind::Comment(CommentMark {
                    anchor: Point::new(50.0, 50.0),
                    content: "<p>Check <b>this</b> figure</p>".to_owned(),
                    color: Color::YELLOW,
                }),
            ))
            .expect("comment");

        let output = bake_document(&store.snapshot(), &ExportConfig::default()).expect("bake");
        let (_, _, operations) = page_operations(&output.bytes, 1);

        let marker = operations.iter().find(|op| op.operator == "re").expect("marker");
        assert_close(&operands(marker), &[306.0, 382.0, 14.0, 14.0]);
        let text = operations.iter().find(|op| op.operator == "Tj").expect("excerpt");
        assert_eq!(text.operands[0].as_str().expect("string"), b"Check this figure");
    }

    #[test]
    fn test_pages_follow_working_order_and_rotation() {
        let mut store = store_with_pages(&[(100.0, 100.0), (200.0, 100.0), (300.0, 100.0)]);
        store.delete_page(0).expect("delete");
        store.move_page(1, 0).expect("move");
        store.rotate_page(0, RotateDirection::Clockwise).expect("rotate");

        let output = bake_document(&store.snapshot(), &ExportConfig::default()).expect("bake");
        assert_eq!(output.report.pages, 2);

        let doc = Document::load_mem(&output.bytes).expect("parses");
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 2);
        let widths: Vec<f32> = pages.values().map(|&id| media_box(&doc, id)[2]).collect();
        assert_eq!(widths, vec![300.0, 200.0]);
        let rotations: Vec<u16> = pages.values().map(|&id| page_rotate(&doc, id)).collect();
        assert_eq!(rotations, vec![90, 0]);
    }

    #[test]
    fn test_four_quarter_turns_export_upright() {
        let mut store = store_with_pages(&[(612.0, 792.0)]);
        for _ in 0..4 {
            store.rotate_page(0, RotateDirection::Clockwise).expect("rotate");
        }
        let output = bake_document(&store.snapshot(), &ExportConfig::default()).expect("bake");
        let doc = Document::load_mem(&output.bytes).expect("parses");
        let page_id = *doc.get_pages().get(&1).expect("page");
        assert_eq!(page_rotate(&doc, page_id), 0);
    }

    #[test]
    fn test_progress_and_cancellation() {
        let store = store_with_pages(&[(100.0, 100.0), (100.0, 100.0)]);
        let mut seen = Vec::new();
        Baker::new(ExportConfig::default())
            .bake_with_progress(&store.snapshot(), |progress| seen.push(progress))
            .expect("bake");
        assert_eq!(seen, vec![BakeProgress { done: 1, total: 2 }, BakeProgress { done: 2, total: 2 }]);

        let token = CancellationToken::new();
        token.cancel();
        let result = Baker::new(ExportConfig::default()).with_cancellation(token).bake(&store.snapshot());
        assert!(matches!(result, Err(BakeError::Cancelled)));
    }

    #[test]
    fn test_invalid_source_is_an_input_error() {
        let mut state = store_with_pages(&[(100.0, 100.0)]).snapshot();
        state.source = b"definitely not a pdf".to_vec();
        assert!(matches!(bake_document(&state, &ExportConfig::default()), Err(BakeError::Source(_))));
    }

    #[test]
    fn test_win_ansi_mapping() {
        assert_eq!(win_ansi("a\u{2026}\u{e9}\u{4e2d}"), vec![b'a', 0x85, 0xe9, b'?']);
    }
}
