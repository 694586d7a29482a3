//! HTML subset used by text annotations
//!
//! Supported: `h1`-`h3`, `p`, `div`, `br`, `ul`/`ol`/`li`, `blockquote`,
//! `b`/`strong`, `i`/`em` and character entities. Unknown tags are dropped but
//! their text is kept. Input without any markup is treated as plain text where
//! newlines are line breaks.

use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<!--.*?-->|<(/?)([a-zA-Z][a-zA-Z0-9]*)[^>]*>|[^<]+|<")
        .expect("token regex is valid")
});

static ENTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").expect("entity regex is valid")
});

static SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\r\n]+").expect("space regex is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Paragraph,
    /// Level 1 to 3
    Heading(u8),
    /// List entry with its rendered marker, e.g. `•` or `2.`
    ListItem { marker: String, depth: usize },
    Quote,
}

/// Styled text span; `\n` inside `text` is a hard line break
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub text: String,
    pub bold: bool,
    pub italic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub runs: Vec<Run>,
}

impl Block {
    pub fn plain_text(&self) -> String {
        self.runs.iter().map(|run| run.text.as_str()).collect()
    }
}

/// Decode named and numeric character references.
pub fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            let decoded = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                named_entity(name)
            };
            decoded.map(String::from).unwrap_or_else(|| caps[0].to_owned())
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "hellip" => '\u{2026}',
        "copy" => '\u{a9}',
        "laquo" => '\u{ab}',
        "raquo" => '\u{bb}',
        _ => return None,
    })
}

#[derive(Default)]
struct Builder {
    blocks: Vec<Block>,
    runs: Vec<Run>,
    kind: Option<BlockKind>,
    bold: usize,
    italic: usize,
    quote: usize,
    /// (ordered, next number) per open list
    lists: Vec<(bool, usize)>,
}

impl Builder {
    fn default_kind(&self) -> BlockKind {
        if self.quote > 0 {
            BlockKind::Quote
        } else {
            BlockKind::Paragraph
        }
    }

    fn flush(&mut self) {
        let runs = std::mem::take(&mut self.runs);
        let kind = self.kind.take().unwrap_or_else(|| self.default_kind());
        let runs = trim_runs(runs);
        if !runs.is_empty() {
            self.blocks.push(Block { kind, runs });
        }
    }

    fn start(&mut self, kind: BlockKind) {
        self.flush();
        self.kind = Some(kind);
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let (bold, italic) = (self.bold > 0, self.italic > 0);
        match self.runs.last_mut() {
            Some(last) if last.bold == bold && last.italic == italic => last.text.push_str(text),
            _ => self.runs.push(Run { text: text.to_owned(), bold, italic }),
        }
    }

    fn open(&mut self, tag: &str) {
        match tag {
            "b" | "strong" => self.bold += 1,
            "i" | "em" => self.italic += 1,
            "br" => self.push_text("\n"),
            "h1" | "h2" | "h3" => {
                let level = tag[1..].parse().unwrap_or(1);
                self.start(BlockKind::Heading(level));
            }
            "p" | "div" => {
                let kind = self.default_kind();
                self.start(kind);
            }
            "blockquote" => {
                self.flush();
                self.quote += 1;
            }
            "ul" | "ol" => {
                self.flush();
                self.lists.push((tag == "ol", 1));
            }
            "li" => {
                let depth = self.lists.len().max(1);
                let marker = match self.lists.last_mut() {
                    Some((true, next)) => {
                        let marker = format!("{next}.");
                        *next += 1;
                        marker
                    }
                    _ => "\u{2022}".to_owned(),
                };
                self.start(BlockKind::ListItem { marker, depth });
            }
            _ => {}
        }
    }

    fn close(&mut self, tag: &str) {
        match tag {
            "b" | "strong" => self.bold = self.bold.saturating_sub(1),
            "i" | "em" => self.italic = self.italic.saturating_sub(1),
            "h1" | "h2" | "h3" | "p" | "div" | "li" => self.flush(),
            "blockquote" => {
                self.flush();
                self.quote = self.quote.saturating_sub(1);
            }
            "ul" | "ol" => {
                self.flush();
                self.lists.pop();
            }
            _ => {}
        }
    }
}

/// Drop leading/trailing spaces of a block and remove empty runs.
fn trim_runs(mut runs: Vec<Run>) -> Vec<Run> {
    if let Some(first) = runs.first_mut() {
        first.text = first.text.trim_start_matches(' ').to_owned();
    }
    if let Some(last) = runs.last_mut() {
        last.text = last.text.trim_end_matches([' ', '\n']).to_owned();
    }
    for run in &mut runs {
        run.text = run.text.replace(" \n", "\n").replace("\n ", "\n");
    }
    runs.retain(|run| !run.text.is_empty());
    runs
}

fn looks_like_html(content: &str) -> bool {
    TOKEN_RE.captures_iter(content).any(|caps| caps.get(2).is_some())
}

/// Parse annotation content into styled blocks.
pub fn parse(content: &str) -> Vec<Block> {
    if !looks_like_html(content) {
        return content
            .split("\n\n")
            .map(|paragraph| decode_entities(paragraph.trim_matches('\n')))
            .filter(|text| !text.trim().is_empty())
            .map(|text| Block {
                kind: BlockKind::Paragraph,
                runs: vec![Run { text, bold: false, italic: false }],
            })
            .collect();
    }

    let mut builder = Builder::default();
    for caps in TOKEN_RE.captures_iter(content) {
        let token = &caps[0];
        if token.starts_with("<!--") {
            continue;
        }
        match caps.get(2) {
            Some(tag) => {
                let tag = tag.as_str().to_ascii_lowercase();
                if caps.get(1).is_some_and(|slash| !slash.as_str().is_empty()) {
                    builder.close(&tag);
                } else {
                    builder.open(&tag);
                }
            }
            None => {
                let text = SPACE_RE.replace_all(token, " ");
                builder.push_text(&decode_entities(&text));
            }
        }
    }
    builder.flush();
    builder.blocks
}

/// Plain text rendition: one line per block, list markers kept.
pub fn strip_html(content: &str) -> String {
    parse(content)
        .iter()
        .map(|block| match &block.kind {
            BlockKind::ListItem { marker, .. } => format!("{marker} {}", block.plain_text()),
            _ => block.plain_text(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// First `max_chars` characters of the plain text on a single line, with an
/// ellipsis when truncated.
pub fn excerpt(content: &str, max_chars: usize) -> String {
    let flat = SPACE_RE.replace_all(strip_html(content).trim(), " ").into_owned();
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut short: String = flat.chars().take(max_chars.saturating_sub(1)).collect();
    short.push('\u{2026}');
    short
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str, bold: bool, italic: bool) -> Run {
        Run { text: text.to_owned(), bold, italic }
    }

    #[test]
    fn headings_paragraphs_and_emphasis() {
        let blocks = parse("<h2>Title</h2><p>Some <b>bold</b> and <em>soft</em>\n text</p>");

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].kind, BlockKind::Heading(2));
        assert_eq!(blocks[0].plain_text(), "Title");
        assert_eq!(
            blocks[1].runs,
            vec![
                run("Some ", false, false),
                run("bold", true, false),
                run(" and ", false, false),
                run("soft", false, true),
                run(" text", false, false),
            ]
        );
    }

    #[test]
    fn lists_are_numbered() {
        let blocks = parse("<ol><li>one</li><li>two</li></ol><ul><li>dot</li></ul>");
        let markers: Vec<_> = blocks
            .iter()
            .map(|block| match &block.kind {
                BlockKind::ListItem { marker, .. } => marker.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(markers, vec!["1.", "2.", "\u{2022}"]);
    }

    #[test]
    fn blockquote_and_line_breaks() {
        let blocks = parse("<blockquote>first<br>second</blockquote>after");
        assert_eq!(blocks[0].kind, BlockKind::Quote);
        assert_eq!(blocks[0].plain_text(), "first\nsecond");
        assert_eq!(blocks[1].kind, BlockKind::Paragraph);
        assert_eq!(blocks[1].plain_text(), "after");
    }

    #[test]
    fn entities_are_decoded() {
        assert_eq!(decode_entities("a &amp; b &lt;c&gt; &#65;&#x42; &unknown;"), "a & b <c> AB &unknown;");
        assert_eq!(strip_html("<p>x &gt; 1</p>"), "x > 1");
    }

    #[test]
    fn plain_text_keeps_newlines() {
        let blocks = parse("line one\nline two\n\nnext paragraph");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].plain_text(), "line one\nline two");
    }

    #[test]
    fn strip_and_excerpt() {
        let html = "<h1>Note</h1><ul><li>buy milk</li></ul><!-- hidden --><p>call <i>Bob</i></p>";
        assert_eq!(strip_html(html), "Note\n\u{2022} buy milk\ncall Bob");
        assert_eq!(excerpt(html, 80), "Note \u{2022} buy milk call Bob");
        assert_eq!(excerpt(html, 6), "Note \u{2026}");
        assert_eq!(excerpt("", 10), "");
    }

    #[test]
    fn unknown_tags_keep_text() {
        assert_eq!(strip_html("<span style=\"color:red\">red</span> text"), "red text");
    }
}
