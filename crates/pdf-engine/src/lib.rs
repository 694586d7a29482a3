//! Document rendering service
//!
//! [`PdfEngine`] is the capability boundary for everything that needs to read a
//! source document: page count and sizes, page bitmaps, and positioned text
//! runs. [`LopdfEngine`] is the pure-Rust backend. It parses structure and
//! text with `lopdf` and produces layout previews (page background with text
//! runs drawn as bars) rather than full-fidelity renders.

use image::{imageops, ImageBuffer, Rgba};
use lopdf::content::Content;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// US Letter, used when a page has no usable MediaBox
pub const DEFAULT_PAGE_SIZE: PageSize = PageSize { width_pt: 612.0, height_pt: 792.0 };

const MAX_PARENT_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

/// Rectangle in page points with a top-left origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub page_index: u32,
    pub scale: f32,
    /// Extra clockwise rotation in degrees on top of the page's own /Rotate
    pub rotation: u16,
    /// Region of the displayed page to render, in points at scale 1
    pub clip: Option<PageRect>,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self { page_index: 0, scale: 1.0, rotation: 0, clip: None }
    }
}

/// A run of text on a page with its approximate bounding box
#[derive(Debug, Clone, PartialEq)]
pub struct TextRegion {
    pub text: String,
    pub bbox: PageRect,
}

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported in the default backend")]
    EncryptedUnsupported,
    #[error("rotation must be a multiple of 90, got {0}")]
    InvalidRotation(u16),
    #[error("backend error: {0}")]
    Backend(String),
}

pub trait PdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError>;
    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError>;
    /// Unrotated page size (MediaBox)
    fn page_size(&self, handle: DocumentHandle, page_index: u32)
        -> Result<PageSize, PdfEngineError>;
    /// The page's own /Rotate, normalized to 0, 90, 180 or 270
    fn page_rotation(&self, handle: DocumentHandle, page_index: u32)
        -> Result<u16, PdfEngineError>;
    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError>;
    /// Text runs of a page in unrotated page space
    fn text_regions(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<Vec<TextRegion>, PdfEngineError>;
    /// The bytes the document was opened from
    fn source_bytes(&self, handle: DocumentHandle) -> Result<&[u8], PdfEngineError>;
    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError>;
}

/// Resolve a page attribute, following the /Parent chain for inherited keys
/// such as MediaBox, Resources and Rotate.
pub fn inherited_attribute<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Option<&'a Object> {
    let mut dict = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_PARENT_DEPTH {
        if let Ok(value) = dict.get(key) {
            return match value.as_reference() {
                Ok(id) => doc.get_object(id).ok(),
                Err(_) => Some(value),
            };
        }
        let parent = dict.get(b"Parent").ok()?.as_reference().ok()?;
        dict = doc.get_dictionary(parent).ok()?;
    }
    None
}

/// MediaBox of a page as `[x0, y0, x1, y1]`, defaulting to US Letter.
pub fn media_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    inherited_attribute(doc, page_id, b"MediaBox")
        .and_then(|obj| obj.as_array().ok())
        .and_then(|array| {
            if array.len() != 4 {
                return None;
            }
            let mut values = [0.0; 4];
            for (slot, value) in values.iter_mut().zip(array) {
                *slot = value.as_float().ok()?;
            }
            Some([
                values[0].min(values[2]),
                values[1].min(values[3]),
                values[0].max(values[2]),
                values[1].max(values[3]),
            ])
        })
        .unwrap_or([0.0, 0.0, DEFAULT_PAGE_SIZE.width_pt, DEFAULT_PAGE_SIZE.height_pt])
}

/// Normalize any /Rotate value into 0, 90, 180 or 270.
pub fn normalize_rotation(degrees: i64) -> u16 {
    (degrees.rem_euclid(360) / 90 * 90) as u16
}

/// The page's own /Rotate value
pub fn page_rotate(doc: &Document, page_id: ObjectId) -> u16 {
    inherited_attribute(doc, page_id, b"Rotate")
        .and_then(|obj| obj.as_i64().ok())
        .map(normalize_rotation)
        .unwrap_or(0)
}

/// Build an empty document with one blank page per size.
pub fn blank_document(sizes: &[PageSize]) -> Result<Vec<u8>, PdfEngineError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids = Vec::with_capacity(sizes.len());
    for size in sizes {
        let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(size.width_pt),
                Object::Real(size.height_pt),
            ],
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => sizes.len() as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}

#[derive(Debug, Clone)]
struct PageRecord {
    id: ObjectId,
    size: PageSize,
    rotation: u16,
}

#[derive(Debug, Clone)]
struct DocumentRecord {
    bytes: Vec<u8>,
    doc: Document,
    pages: Vec<PageRecord>,
}

#[derive(Debug, Default)]
pub struct LopdfEngine {
    next_handle: u64,
    docs: HashMap<DocumentHandle, DocumentRecord>,
}

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse(bytes: &[u8]) -> Result<(Document, Vec<PageRecord>), PdfEngineError> {
        if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(PdfEngineError::EncryptedUnsupported);
        }

        let doc = Document::load_mem(bytes)?;
        let pages: Vec<PageRecord> = doc
            .get_pages()
            .into_values()
            .map(|id| {
                let [x0, y0, x1, y1] = media_box(&doc, id);
                PageRecord {
                    id,
                    size: PageSize { width_pt: x1 - x0, height_pt: y1 - y0 },
                    rotation: page_rotate(&doc, id),
                }
            })
            .collect();

        if pages.is_empty() {
            return Err(PdfEngineError::Backend("document has no pages".to_owned()));
        }

        Ok((doc, pages))
    }

    fn record(&self, handle: DocumentHandle) -> Result<&DocumentRecord, PdfEngineError> {
        self.docs.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }

    fn page(&self, handle: DocumentHandle, page_index: u32) -> Result<&PageRecord, PdfEngineError> {
        let record = self.record(handle)?;
        record.pages.get(page_index as usize).ok_or(PdfEngineError::PageOutOfRange {
            page: page_index,
            page_count: record.pages.len() as u32,
        })
    }
}

impl PdfEngine for LopdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
        let bytes = match source {
            OpenSource::Path(path) => fs::read(path)?,
            OpenSource::Bytes(bytes) => bytes,
        };

        let (doc, pages) = Self::parse(&bytes)?;

        self.next_handle += 1;
        let handle = DocumentHandle(self.next_handle);
        log::debug!("opened document {} with {} pages", handle.raw(), pages.len());
        self.docs.insert(handle, DocumentRecord { bytes, doc, pages });

        Ok(handle)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
        Ok(self.record(handle)?.pages.len() as u32)
    }

    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, PdfEngineError> {
        Ok(self.page(handle, page_index)?.size)
    }

    fn page_rotation(&self, handle: DocumentHandle, page_index: u32) -> Result<u16, PdfEngineError> {
        Ok(self.page(handle, page_index)?.rotation)
    }

    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError> {
        if request.rotation % 90 != 0 {
            return Err(PdfEngineError::InvalidRotation(request.rotation));
        }

        let page = self.page(handle, request.page_index)?;
        let scale = if request.scale <= 0.0 { 1.0 } else { request.scale };

        let width = (page.size.width_pt * scale).round().max(1.0) as u32;
        let height = (page.size.height_pt * scale).round().max(1.0) as u32;
        let mut image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

        let ink = Rgba([200, 200, 200, 255]);
        for region in self.text_regions(handle, request.page_index)? {
            let x0 = (region.bbox.x * scale).max(0.0) as u32;
            let y0 = (region.bbox.y * scale).max(0.0) as u32;
            let x1 = (((region.bbox.x + region.bbox.width) * scale) as u32).min(width);
            let y1 = (((region.bbox.y + region.bbox.height) * scale) as u32).min(height);
            for y in y0..y1 {
                for x in x0..x1 {
                    image.put_pixel(x, y, ink);
                }
            }
        }

        if width >= 4 && height >= 4 {
            let border = Rgba([220, 220, 220, 255]);
            for x in 0..width {
                image.put_pixel(x, 0, border);
                image.put_pixel(x, height - 1, border);
            }
            for y in 0..height {
                image.put_pixel(0, y, border);
                image.put_pixel(width - 1, y, border);
            }
        }

        let image = match normalize_rotation(i64::from(page.rotation) + i64::from(request.rotation)) {
            90 => imageops::rotate90(&image),
            180 => imageops::rotate180(&image),
            270 => imageops::rotate270(&image),
            _ => image,
        };

        let Some(clip) = request.clip else {
            return Ok(image);
        };
        let x = ((clip.x * scale).max(0.0) as u32).min(image.width().saturating_sub(1));
        let y = ((clip.y * scale).max(0.0) as u32).min(image.height().saturating_sub(1));
        let clip_width = ((clip.width * scale).round().max(1.0) as u32).min(image.width() - x);
        let clip_height = ((clip.height * scale).round().max(1.0) as u32).min(image.height() - y);

        Ok(imageops::crop_imm(&image, x, y, clip_width, clip_height).to_image())
    }

    fn text_regions(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<Vec<TextRegion>, PdfEngineError> {
        let record = self.record(handle)?;
        let page = self.page(handle, page_index)?;
        let [_, y0, _, _] = media_box(&record.doc, page.id);

        let content = record.doc.get_page_content(page.id)?;
        let content = Content::decode(&content)?;
        let mut regions = TextScanner::default().scan(&content);

        for region in &mut regions {
            // baseline-up PDF space to top-left origin
            region.bbox.y = page.size.height_pt - (region.bbox.y - y0) - region.bbox.height;
        }
        Ok(regions)
    }

    fn source_bytes(&self, handle: DocumentHandle) -> Result<&[u8], PdfEngineError> {
        Ok(&self.record(handle)?.bytes)
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
        self.docs.remove(&handle).map(|_| ()).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

/// Average glyph advance as a fraction of the font size
const GLYPH_ADVANCE: f32 = 0.5;

/// Minimal text-state machine over content stream operators. Produces one
/// region per show-text operation with a bottom-left origin.
#[derive(Debug)]
struct TextScanner {
    font_size: f32,
    leading: f32,
    /// Horizontal and vertical scale of the text matrix
    scale: (f32, f32),
    line: (f32, f32),
    cursor: (f32, f32),
}

impl Default for TextScanner {
    fn default() -> Self {
        Self { font_size: 12.0, leading: 0.0, scale: (1.0, 1.0), line: (0.0, 0.0), cursor: (0.0, 0.0) }
    }
}

impl TextScanner {
    fn scan(mut self, content: &Content) -> Vec<TextRegion> {
        let mut regions = Vec::new();

        for operation in &content.operations {
            let numbers: Vec<f32> =
                operation.operands.iter().filter_map(|obj| obj.as_float().ok()).collect();

            match operation.operator.as_str() {
                "BT" => {
                    self.scale = (1.0, 1.0);
                    self.line = (0.0, 0.0);
                    self.cursor = (0.0, 0.0);
                }
                "Tf" => {
                    if let Some(size) = numbers.last() {
                        self.font_size = size.abs();
                    }
                }
                "TL" => {
                    if let Some(leading) = numbers.first() {
                        self.leading = *leading;
                    }
                }
                "Td" | "TD" => {
                    if let [tx, ty] = numbers[..] {
                        if operation.operator == "TD" {
                            self.leading = -ty;
                        }
                        self.move_line(tx, ty);
                    }
                }
                "Tm" => {
                    if let [a, _, _, d, e, f] = numbers[..] {
                        self.scale = (a, d);
                        self.line = (e, f);
                        self.cursor = self.line;
                    }
                }
                "T*" => self.move_line(0.0, -self.leading),
                "Tj" | "'" | "\"" => {
                    if operation.operator != "Tj" {
                        self.move_line(0.0, -self.leading);
                    }
                    let text: String = operation
                        .operands
                        .iter()
                        .filter_map(|obj| obj.as_str().ok())
                        .map(decode_pdf_string)
                        .collect();
                    self.emit(text, &mut regions);
                }
                "TJ" => {
                    let text: String = operation
                        .operands
                        .first()
                        .and_then(|obj| obj.as_array().ok())
                        .map(|items| {
                            items
                                .iter()
                                .filter_map(|item| item.as_str().ok())
                                .map(decode_pdf_string)
                                .collect()
                        })
                        .unwrap_or_default();
                    self.emit(text, &mut regions);
                }
                _ => {}
            }
        }

        regions
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.line = (self.line.0 + tx * self.scale.0, self.line.1 + ty * self.scale.1);
        self.cursor = self.line;
    }

    fn emit(&mut self, text: String, regions: &mut Vec<TextRegion>) {
        if text.trim().is_empty() {
            return;
        }

        let size = self.font_size * self.scale.1.abs();
        let width = text.chars().count() as f32 * self.font_size * GLYPH_ADVANCE * self.scale.0.abs();
        // descenders sit roughly a fifth of the size below the baseline
        let bottom = self.cursor.1 - size * 0.2;

        regions.push(TextRegion {
            text,
            bbox: PageRect { x: self.cursor.0, y: bottom, width, height: size },
        });
        self.cursor.0 += width;
    }
}

fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> =
            utf16.chunks_exact(2).map(|pair| u16::from_be_bytes([pair[0], pair[1]])).collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&byte| char::from(byte)).collect()
}

pub fn default_engine() -> LopdfEngine {
    LopdfEngine::new()
}
