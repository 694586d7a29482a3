//! Off-screen rasterization of rich content
//!
//! Text, math and fallback text are laid out into positioned pieces, written
//! as an SVG scene and rendered with `resvg` into an RGBA bitmap sized to the
//! annotation's box at the supersampling factor.

use std::sync::Arc;

use image::ImageBuffer;
use once_cell::sync::Lazy;
use pdf_engine::RgbaImage;
use resvg::tiny_skia::{Pixmap, Transform};
use resvg::usvg;

use doc_model::{Color, TextMark};

use crate::math::MathLayout;
use crate::rich_text::{self, BlockKind};

/// Average advance of a proportional glyph relative to the font size
const AVG_CHAR_WIDTH: f32 = 0.5;
const MONO_CHAR_WIDTH: f32 = 0.6;
const LINE_HEIGHT: f32 = 1.3;
const PADDING_EM: f32 = 0.25;

static FONT_DB: Lazy<Arc<usvg::fontdb::Database>> = Lazy::new(|| {
    let mut db = usvg::fontdb::Database::new();
    db.load_system_fonts();
    log::debug!("loaded {} font faces for rasterization", db.len());
    Arc::new(db)
});

#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("cannot rasterize into a {width}x{height} canvas")]
    EmptyCanvas { width: f32, height: f32 },
    #[error("could not allocate a {width}x{height} bitmap")]
    Allocation { width: u32, height: u32 },
    #[error("invalid scene: {0}")]
    Svg(String),
}

/// Destination box of a rasterization, in PDF points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterTarget {
    pub width_pt: f32,
    pub height_pt: f32,
    pub supersample: f32,
    /// Upper bound for either side of the bitmap
    pub max_px: u32,
}

impl RasterTarget {
    pub fn new(width_pt: f32, height_pt: f32, supersample: f32, max_px: u32) -> Self {
        Self { width_pt, height_pt, supersample, max_px }
    }

    /// Bitmap size and the pixels-per-point factor actually used.
    pub fn pixel_size(&self) -> Result<(u32, u32, f32), RasterError> {
        let empty = || RasterError::EmptyCanvas { width: self.width_pt, height: self.height_pt };
        if !(self.width_pt.is_finite() && self.height_pt.is_finite())
            || self.width_pt <= 0.0
            || self.height_pt <= 0.0
        {
            return Err(empty());
        }

        let mut scale = self.supersample.max(0.1);
        let longest = self.width_pt.max(self.height_pt) * scale;
        if longest > self.max_px as f32 {
            scale *= self.max_px as f32 / longest;
        }

        let width = (self.width_pt * scale).round().max(1.0) as u32;
        let height = (self.height_pt * scale).round().max(1.0) as u32;
        Ok((width, height, scale))
    }
}

/// Positioned text in bitmap pixels, `y` on the baseline
#[derive(Debug, Clone, PartialEq)]
pub struct TextPiece {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub bold: bool,
    pub italic: bool,
    /// Centered on `x` instead of starting there
    pub centered: bool,
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn fill_attrs(color: Color) -> String {
    let (_, _, _, alpha) = color.to_normalized();
    format!(
        r##"fill="#{:02x}{:02x}{:02x}" fill-opacity="{alpha:.3}""##,
        color.r, color.g, color.b
    )
}

/// Characters per line for a given pixel width.
fn columns(width_px: f32, size_px: f32, char_width: f32) -> usize {
    ((width_px / (size_px * char_width)).floor() as usize).max(1)
}

/// Lay out rich text horizontally, wrapping at the box width.
pub fn layout_horizontal(mark: &TextMark, width: f32, scale: f32) -> Vec<TextPiece> {
    let base = mark.font_size * scale;
    let padding = base * PADDING_EM;
    let mut pieces = Vec::new();
    let mut baseline = padding;

    for block in rich_text::parse(&mark.content) {
        let (size, heading) = match block.kind {
            BlockKind::Heading(1) => (base * 1.6, true),
            BlockKind::Heading(2) => (base * 1.35, true),
            BlockKind::Heading(_) => (base * 1.15, true),
            _ => (base, false),
        };
        let indent = match &block.kind {
            BlockKind::ListItem { depth, .. } => base * 1.2 * *depth as f32,
            BlockKind::Quote => base,
            _ => 0.0,
        };
        let left = padding + indent;
        let cols = columns(width - left - padding, size, AVG_CHAR_WIDTH);

        if let BlockKind::ListItem { marker, .. } = &block.kind {
            pieces.push(TextPiece {
                text: marker.clone(),
                x: left - base * 1.1,
                y: baseline + size,
                size,
                bold: false,
                italic: false,
                centered: false,
            });
        }

        // Style per character, so wrapped lines can be split back into runs.
        let styled: Vec<(char, bool, bool)> = block
            .runs
            .iter()
            .flat_map(|run| run.text.chars().map(move |c| (c, run.bold || heading, run.italic)))
            .collect();
        let plain: String = styled.iter().map(|(c, _, _)| *c).collect();
        let mut cursor = 0;

        for hard_line in plain.split('\n') {
            for line in textwrap::wrap(hard_line, cols) {
                baseline += size * LINE_HEIGHT;
                let mut x = left;
                let mut current: Option<(String, bool, bool)> = None;
                for c in line.chars() {
                    while cursor < styled.len() && styled[cursor].0 != c {
                        cursor += 1;
                    }
                    let (bold, italic) =
                        styled.get(cursor).map(|(_, b, i)| (*b, *i)).unwrap_or((heading, false));
                    cursor += 1;
                    match current.as_mut() {
                        Some((text, b, i)) if *b == bold && *i == italic => text.push(c),
                        _ => {
                            if let Some((text, bold, italic)) = current.take() {
                                let advance = text.chars().count() as f32 * size * AVG_CHAR_WIDTH;
                                pieces.push(TextPiece { text, x, y: baseline, size, bold, italic, centered: false });
                                x += advance;
                            }
                            current = Some((c.to_string(), bold, italic));
                        }
                    }
                }
                if let Some((text, bold, italic)) = current {
                    pieces.push(TextPiece { text, x, y: baseline, size, bold, italic, centered: false });
                }
            }
        }
        baseline += size * 0.4;
    }

    pieces
}

/// Lay out text in vertical columns, top to bottom, right to left.
pub fn layout_vertical(mark: &TextMark, width: f32, height: f32, scale: f32) -> Vec<TextPiece> {
    let size = mark.font_size * scale;
    let padding = size * PADDING_EM;
    let column_width = size * LINE_HEIGHT;
    let rows = (((height - 2.0 * padding) / size).floor() as usize).max(1);

    let mut pieces = Vec::new();
    let mut column = 0usize;
    let text = rich_text::strip_html(&mark.content);

    for line in text.split('\n') {
        let chars: Vec<char> = line.chars().filter(|c| !c.is_control()).collect();
        for chunk in chars.chunks(rows) {
            let x = width - padding - column_width * (column as f32 + 0.5);
            for (row, c) in chunk.iter().enumerate() {
                pieces.push(TextPiece {
                    text: c.to_string(),
                    x,
                    y: padding + size * (row as f32 + 0.88),
                    size,
                    bold: false,
                    italic: false,
                    centered: true,
                });
            }
            column += 1;
        }
        if chars.is_empty() {
            column += 1;
        }
    }

    pieces
}

fn svg_document(width: u32, height: u32, body: &str) -> String {
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">{body}</svg>"#
    )
}

fn write_pieces(out: &mut String, pieces: &[TextPiece], family: &str, color: Color) {
    let fill = fill_attrs(color);
    for piece in pieces {
        out.push_str(&format!(
            r#"<text x="{:.2}" y="{:.2}" font-family="{family}" font-size="{:.2}" {fill}{}{}{}>{}</text>"#,
            piece.x,
            piece.y,
            piece.size,
            if piece.bold { r#" font-weight="bold""# } else { "" },
            if piece.italic { r#" font-style="italic""# } else { "" },
            if piece.centered { r#" text-anchor="middle""# } else { "" },
            escape_xml(&piece.text),
        ));
    }
}

/// SVG scene for a text annotation.
pub fn rich_text_svg(mark: &TextMark, width: u32, height: u32, scale: f32) -> String {
    let (w, h) = (width as f32, height as f32);
    let mut body = String::new();
    body.push_str(&format!(r#"<g opacity="{:.3}">"#, mark.opacity.clamp(0.0, 1.0)));
    if let Some(background) = mark.background {
        body.push_str(&format!(
            r#"<rect x="0" y="0" width="{w}" height="{h}" {}/>"#,
            fill_attrs(background)
        ));
    }
    let pieces = if mark.vertical {
        layout_vertical(mark, w, h, scale)
    } else {
        layout_horizontal(mark, w, scale)
    };
    write_pieces(&mut body, &pieces, "sans-serif", mark.color);
    body.push_str("</g>");
    svg_document(width, height, &body)
}

/// SVG scene for a typeset formula, scaled down if needed to fit the box.
pub fn math_svg(layout: &MathLayout, color: Color, font_px: f32, width: u32, height: u32) -> String {
    let (w, h) = (width as f32, height as f32);
    let pad = font_px * PADDING_EM;
    let natural_w = layout.width * font_px;
    let natural_h = layout.height() * font_px;
    let fit = if natural_w > 0.0 && natural_h > 0.0 {
        ((w - 2.0 * pad) / natural_w).min((h - 2.0 * pad) / natural_h).min(1.0).max(0.05)
    } else {
        1.0
    };
    let em = font_px * fit;
    let origin_x = pad;
    let baseline = (h - layout.height() * em) / 2.0 + layout.ascent * em;

    let pieces: Vec<TextPiece> = layout
        .glyphs
        .iter()
        .map(|glyph| TextPiece {
            text: glyph.text.clone(),
            x: origin_x + glyph.x * em,
            y: baseline + glyph.y * em,
            size: glyph.size * em,
            bold: false,
            italic: glyph.italic,
            centered: false,
        })
        .collect();

    let mut body = String::new();
    let fill = fill_attrs(color);
    for rule in &layout.rules {
        body.push_str(&format!(
            r#"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}" {fill}/>"#,
            origin_x + rule.x * em,
            baseline + rule.y * em - rule.thickness * em / 2.0,
            rule.width * em,
            (rule.thickness * em).max(1.0),
        ));
    }
    write_pieces(&mut body, &pieces, "serif", color);
    svg_document(width, height, &body)
}

/// SVG scene for raw text in a monospace face, wrapped at the box width.
pub fn monospace_svg(text: &str, color: Color, font_px: f32, width: u32, height: u32) -> String {
    let pad = font_px * PADDING_EM;
    let cols = columns(width as f32 - 2.0 * pad, font_px, MONO_CHAR_WIDTH);
    let mut baseline = pad;
    let mut pieces = Vec::new();
    for hard_line in text.split('\n') {
        for line in textwrap::wrap(hard_line, cols) {
            baseline += font_px * LINE_HEIGHT;
            if baseline > height as f32 + font_px {
                break;
            }
            pieces.push(TextPiece {
                text: line.into_owned(),
                x: pad,
                y: baseline,
                size: font_px,
                bold: false,
                italic: false,
                centered: false,
            });
        }
    }

    let mut body = String::new();
    write_pieces(&mut body, &pieces, "monospace", color);
    svg_document(width, height, &body)
}

fn unpremultiply_rgba(data: &mut [u8]) {
    for pixel in data.chunks_mut(4) {
        let alpha = pixel[3];
        if alpha == 0 {
            pixel[0] = 0;
            pixel[1] = 0;
            pixel[2] = 0;
            continue;
        }
        let a = alpha as u32;
        pixel[0] = ((pixel[0] as u32 * 255 + a / 2) / a).min(255) as u8;
        pixel[1] = ((pixel[1] as u32 * 255 + a / 2) / a).min(255) as u8;
        pixel[2] = ((pixel[2] as u32 * 255 + a / 2) / a).min(255) as u8;
    }
}

/// Render an SVG scene into a straight-alpha RGBA bitmap.
pub fn render_svg(svg: &str, width: u32, height: u32) -> Result<RgbaImage, RasterError> {
    let mut options = usvg::Options::default();
    options.fontdb = FONT_DB.clone();
    let tree = usvg::Tree::from_str(svg, &options).map_err(|e| RasterError::Svg(e.to_string()))?;

    let mut pixmap = Pixmap::new(width, height).ok_or(RasterError::Allocation { width, height })?;
    resvg::render(&tree, Transform::identity(), &mut pixmap.as_mut());

    let mut rgba = pixmap.take();
    unpremultiply_rgba(&mut rgba);
    ImageBuffer::from_raw(width, height, rgba).ok_or(RasterError::Allocation { width, height })
}

pub fn rasterize_text(mark: &TextMark, target: RasterTarget) -> Result<RgbaImage, RasterError> {
    let (width, height, scale) = target.pixel_size()?;
    render_svg(&rich_text_svg(mark, width, height, scale), width, height)
}

pub fn rasterize_math(
    layout: &MathLayout,
    color: Color,
    font_size: f32,
    target: RasterTarget,
) -> Result<RgbaImage, RasterError> {
    let (width, height, scale) = target.pixel_size()?;
    render_svg(&math_svg(layout, color, font_size * scale, width, height), width, height)
}

pub fn rasterize_monospace(
    text: &str,
    color: Color,
    font_size: f32,
    target: RasterTarget,
) -> Result<RgbaImage, RasterError> {
    let (width, height, scale) = target.pixel_size()?;
    render_svg(&monospace_svg(text, color, font_size * scale, width, height), width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math;
    use doc_model::Frame;

    fn text_mark(content: &str) -> TextMark {
        TextMark {
            frame: Frame::new(0.0, 0.0, 10.0, 10.0),
            content: content.to_owned(),
            color: Color::BLACK,
            font_size: 12.0,
            vertical: false,
            background: None,
            opacity: 1.0,
        }
    }

    #[test]
    fn pixel_size_applies_supersampling_and_cap() {
        let (w, h, scale) = RasterTarget::new(100.0, 50.0, 2.0, 4096).pixel_size().expect("valid");
        assert_eq!((w, h, scale), (200, 100, 2.0));

        let (w, h, _) = RasterTarget::new(5000.0, 100.0, 2.0, 4096).pixel_size().expect("valid");
        assert_eq!((w, h), (4096, 82));

        assert!(RasterTarget::new(0.0, 10.0, 2.0, 4096).pixel_size().is_err());
        assert!(RasterTarget::new(f32::NAN, 10.0, 2.0, 4096).pixel_size().is_err());
    }

    #[test]
    fn background_fills_the_bitmap() {
        let mut mark = text_mark("");
        mark.background = Some(Color::rgb(255, 0, 0));

        let bitmap = rasterize_text(&mark, RasterTarget::new(40.0, 20.0, 2.0, 4096)).expect("rendered");
        assert_eq!(bitmap.dimensions(), (80, 40));
        assert_eq!(bitmap.get_pixel(40, 20).0, [255, 0, 0, 255]);
    }

    #[test]
    fn fraction_rule_is_drawn() {
        let layout = math::typeset(r"\frac{1}{2}").expect("valid");
        let bitmap = rasterize_math(&layout, Color::BLACK, 12.0, RasterTarget::new(60.0, 40.0, 2.0, 4096))
            .expect("rendered");

        assert!(bitmap.pixels().any(|pixel| pixel.0[3] > 0));
    }

    #[test]
    fn markup_is_escaped_in_the_scene() {
        let svg = monospace_svg("a < b & c", Color::BLACK, 12.0, 400, 100);
        assert!(svg.contains("a &lt; b &amp; c"));
        assert!(svg.contains(r#"font-family="monospace""#));
        assert!(render_svg(&svg, 400, 100).is_ok());
    }

    #[test]
    fn horizontal_layout_wraps_and_keeps_styles() {
        let mark = text_mark("<p>plain <b>strong</b> words that need wrapping</p>");
        // 12 px font, 6 px per char: about 10 characters per line at 80 px.
        let pieces = layout_horizontal(&mark, 80.0, 1.0);

        let lines: std::collections::BTreeSet<i32> = pieces.iter().map(|p| p.y as i32).collect();
        assert!(lines.len() > 2);
        assert!(pieces.iter().any(|p| p.bold && p.text == "strong"));
        assert!(pieces.iter().filter(|p| !p.bold).all(|p| !p.text.contains("strong")));
    }

    #[test]
    fn vertical_columns_run_right_to_left() {
        let mut mark = text_mark("abcd\nef");
        mark.vertical = true;
        // Two characters per column.
        let pieces = layout_vertical(&mark, 200.0, 12.0 * 2.0 + 6.0, 1.0);
        let texts: Vec<&str> = pieces.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c", "d", "e", "f"]);

        assert_eq!(pieces[0].x, pieces[1].x);
        assert!(pieces[1].y > pieces[0].y);
        assert!(pieces[2].x < pieces[0].x);
        assert!(pieces[4].x < pieces[2].x);
        assert!(pieces.iter().all(|p| p.centered));
    }
}
