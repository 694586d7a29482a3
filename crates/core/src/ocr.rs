//! Text recognition for selected page areas
//!
//! The recognition engine itself sits behind [`OcrService`]. This module
//! prepares its input (the selected area cut out of a page bitmap) and turns
//! its output into invisible `ocrText` annotations. A failing service yields
//! an explicit error and no annotations at all.

use image::imageops;
use pdf_engine::RgbaImage;

use doc_model::{Annotation, AnnotationKind, Frame, OcrTextMark, PERCENT_MAX};

#[derive(Debug, Clone, PartialEq)]
pub struct OcrConfig {
    /// Recognition language, e.g. "eng"
    pub language: String,
    /// Words below this confidence (0.0 to 1.0) are dropped
    pub min_confidence: f32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self { language: "eng".to_string(), min_confidence: 0.5 }
    }
}

impl OcrConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_min_confidence(mut self, confidence: f32) -> Self {
        self.min_confidence = confidence;
        self
    }
}

/// A recognized word with its box in bitmap pixels
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl OcrWord {
    pub fn new(text: impl Into<String>, bbox: (f32, f32, f32, f32), confidence: f32) -> Self {
        let (x, y, width, height) = bbox;
        Self { text: text.into(), x, y, width, height, confidence }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrOutput {
    pub words: Vec<OcrWord>,
}

impl OcrOutput {
    pub fn text(&self) -> String {
        self.words.iter().map(|word| word.text.as_str()).collect::<Vec<_>>().join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OcrError {
    #[error("text recognition is not available")]
    Unavailable,
    #[error("OCR language data not found: {0}")]
    LanguageNotFound(String),
    #[error("invalid image data: {0}")]
    InvalidImage(String),
    #[error("OCR processing failed: {0}")]
    ProcessingFailed(String),
}

/// Recognition backend
pub trait OcrService: Send + Sync {
    fn recognize(&self, bitmap: &RgbaImage, language: &str) -> Result<OcrOutput, OcrError>;

    fn is_available(&self) -> bool {
        true
    }
}

/// Service used when no recognition backend is installed
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableOcr;

impl OcrService for UnavailableOcr {
    fn recognize(&self, _bitmap: &RgbaImage, _language: &str) -> Result<OcrOutput, OcrError> {
        Err(OcrError::Unavailable)
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Whether a page's own text layer is too thin to be useful.
///
/// Pages with fewer than 10 words or 50 characters of extracted text are
/// treated as scans.
pub fn needs_ocr(extracted_text: &str) -> bool {
    let trimmed = extracted_text.trim();
    trimmed.split_whitespace().count() < 10 || trimmed.chars().count() < 50
}

/// Cut the area given in page percentages out of a full page bitmap.
pub fn crop_area(page: &RgbaImage, area: Frame) -> Result<RgbaImage, OcrError> {
    let area = area.clamped();
    let (width, height) = page.dimensions();
    let x = (area.x / PERCENT_MAX * width as f32).floor() as u32;
    let y = (area.y / PERCENT_MAX * height as f32).floor() as u32;
    let right = ((area.right() / PERCENT_MAX * width as f32).ceil() as u32).min(width);
    let bottom = ((area.bottom() / PERCENT_MAX * height as f32).ceil() as u32).min(height);

    if right <= x || bottom <= y {
        return Err(OcrError::InvalidImage(format!(
            "selected area covers no pixels of a {width}x{height} page"
        )));
    }
    Ok(imageops::crop_imm(page, x, y, right - x, bottom - y).to_image())
}

/// Map recognized words of an area bitmap back onto the page as `ocrText` annotations.
pub fn words_to_annotations(
    output: &OcrOutput,
    page_index: usize,
    area: Frame,
    bitmap_size: (u32, u32),
    min_confidence: f32,
) -> Vec<Annotation> {
    let (width, height) = (bitmap_size.0.max(1) as f32, bitmap_size.1.max(1) as f32);

    output
        .words
        .iter()
        .filter(|word| word.confidence >= min_confidence && !word.text.trim().is_empty())
        .map(|word| {
            let frame = Frame::new(
                area.x + word.x / width * area.width,
                area.y + word.y / height * area.height,
                word.width / width * area.width,
                word.height / height * area.height,
            )
            .clamped();
            Annotation::new(
                page_index,
                AnnotationKind::OcrText(OcrTextMark { frame, text: word.text.trim().to_owned() }),
            )
        })
        .collect()
}

/// Recognize the text inside `area` of a rendered page.
pub fn recognize_area(
    service: &dyn OcrService,
    page_bitmap: &RgbaImage,
    page_index: usize,
    area: Frame,
    config: &OcrConfig,
) -> Result<Vec<Annotation>, OcrError> {
    let crop = crop_area(page_bitmap, area)?;
    let output = service.recognize(&crop, &config.language)?;
    let annotations = words_to_annotations(&output, page_index, area, crop.dimensions(), config.min_confidence);
    log::debug!(
        "recognized {} of {} words on page {page_index}",
        annotations.len(),
        output.words.len()
    );
    Ok(annotations)
}
