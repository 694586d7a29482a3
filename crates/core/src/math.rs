//! Typesetting for math annotations
//!
//! Accepts a TeX-like subset: `^` and `_` scripts, `{}` groups, `\frac`,
//! `\sqrt`, Greek letters and common operators. The result is a list of
//! positioned glyph runs and rules in em units, with the baseline at `y = 0`
//! and `y` growing downwards, ready to be drawn at any font size.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MathError {
    #[error("unbalanced braces")]
    UnbalancedBraces,
    #[error("unknown command \\{0}")]
    UnknownCommand(String),
    #[error("missing argument for {0}")]
    MissingArgument(String),
    #[error("expression nested deeper than {0} levels")]
    TooDeep(usize),
}

/// Deepest group/fraction/script nesting accepted by the parser
const MAX_NESTING: usize = 64;

/// Commands that expand to a single symbol. `true` marks binary operators
/// and relations, which get extra spacing.
static SYMBOLS: Lazy<HashMap<&'static str, (&'static str, bool)>> = Lazy::new(|| {
    [
        ("alpha", ("α", false)),
        ("beta", ("β", false)),
        ("gamma", ("γ", false)),
        ("delta", ("δ", false)),
        ("epsilon", ("ε", false)),
        ("zeta", ("ζ", false)),
        ("eta", ("η", false)),
        ("theta", ("θ", false)),
        ("iota", ("ι", false)),
        ("kappa", ("κ", false)),
        ("lambda", ("λ", false)),
        ("mu", ("μ", false)),
        ("nu", ("ν", false)),
        ("xi", ("ξ", false)),
        ("pi", ("π", false)),
        ("rho", ("ρ", false)),
        ("sigma", ("σ", false)),
        ("tau", ("τ", false)),
        ("phi", ("φ", false)),
        ("chi", ("χ", false)),
        ("psi", ("ψ", false)),
        ("omega", ("ω", false)),
        ("Gamma", ("Γ", false)),
        ("Delta", ("Δ", false)),
        ("Theta", ("Θ", false)),
        ("Lambda", ("Λ", false)),
        ("Pi", ("Π", false)),
        ("Sigma", ("Σ", false)),
        ("Phi", ("Φ", false)),
        ("Psi", ("Ψ", false)),
        ("Omega", ("Ω", false)),
        ("infty", ("∞", false)),
        ("partial", ("∂", false)),
        ("nabla", ("∇", false)),
        ("sum", ("∑", false)),
        ("prod", ("∏", false)),
        ("int", ("∫", false)),
        ("ldots", ("…", false)),
        ("cdots", ("⋯", false)),
        ("cdot", ("·", true)),
        ("times", ("×", true)),
        ("div", ("÷", true)),
        ("pm", ("±", true)),
        ("mp", ("∓", true)),
        ("leq", ("≤", true)),
        ("le", ("≤", true)),
        ("geq", ("≥", true)),
        ("ge", ("≥", true)),
        ("neq", ("≠", true)),
        ("ne", ("≠", true)),
        ("approx", ("≈", true)),
        ("equiv", ("≡", true)),
        ("in", ("∈", true)),
        ("to", ("→", true)),
        ("rightarrow", ("→", true)),
        ("leftarrow", ("←", true)),
        ("Rightarrow", ("⇒", true)),
    ]
    .into_iter()
    .collect()
});

/// Parsed expression
#[derive(Debug, Clone, PartialEq)]
enum Node {
    Symbol { text: String, italic: bool, operator: bool },
    Space(f32),
    Row(Vec<Node>),
    Frac(Box<Node>, Box<Node>),
    Sqrt(Box<Node>),
    Scripts { base: Box<Node>, sup: Option<Box<Node>>, sub: Option<Box<Node>> },
}

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self { chars: source.chars().peekable(), depth: 0 }
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
    }

    /// Parse until end of input (`in_group == false`) or a closing brace.
    fn sequence(&mut self, in_group: bool) -> Result<Vec<Node>, MathError> {
        let mut nodes: Vec<Node> = Vec::new();
        loop {
            self.skip_whitespace();
            let Some(c) = self.chars.next() else {
                return if in_group { Err(MathError::UnbalancedBraces) } else { Ok(nodes) };
            };
            match c {
                '}' if in_group => return Ok(nodes),
                '}' => return Err(MathError::UnbalancedBraces),
                '^' | '_' => {
                    let argument = self.argument(&c.to_string())?;
                    let base = nodes.pop().unwrap_or(Node::Row(Vec::new()));
                    nodes.push(attach_script(base, c == '^', argument));
                }
                _ => nodes.push(self.atom(c)?),
            }
        }
    }

    /// A single argument: a braced group, a command, or one character.
    fn argument(&mut self, owner: &str) -> Result<Node, MathError> {
        self.skip_whitespace();
        match self.chars.next() {
            None => Err(MathError::MissingArgument(owner.to_owned())),
            Some('}') => Err(MathError::UnbalancedBraces),
            Some('^') | Some('_') => Err(MathError::MissingArgument(owner.to_owned())),
            Some(c) => self.atom(c),
        }
    }

    fn atom(&mut self, c: char) -> Result<Node, MathError> {
        if self.depth >= MAX_NESTING {
            return Err(MathError::TooDeep(MAX_NESTING));
        }
        self.depth += 1;
        let node = self.atom_inner(c);
        self.depth -= 1;
        node
    }

    fn atom_inner(&mut self, c: char) -> Result<Node, MathError> {
        match c {
            '{' => Ok(Node::Row(self.sequence(true)?)),
            '\\' => self.command(),
            c if c.is_ascii_alphabetic() => {
                Ok(Node::Symbol { text: c.to_string(), italic: true, operator: false })
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut text = c.to_string();
                while let Some(d) = self.chars.next_if(|d| d.is_ascii_digit() || *d == '.') {
                    text.push(d);
                }
                Ok(Node::Symbol { text, italic: false, operator: false })
            }
            '+' | '-' | '=' | '<' | '>' => Ok(Node::Symbol {
                text: if c == '-' { "\u{2212}".to_owned() } else { c.to_string() },
                italic: false,
                operator: true,
            }),
            c => Ok(Node::Symbol { text: c.to_string(), italic: false, operator: false }),
        }
    }

    fn command(&mut self) -> Result<Node, MathError> {
        let mut name = String::new();
        while let Some(c) = self.chars.next_if(|c| c.is_ascii_alphabetic()) {
            name.push(c);
        }
        if name.is_empty() {
            let Some(c) = self.chars.next() else {
                return Err(MathError::MissingArgument("\\".to_owned()));
            };
            return match c {
                ',' => Ok(Node::Space(0.17)),
                ';' => Ok(Node::Space(0.28)),
                ' ' => Ok(Node::Space(0.25)),
                '{' | '}' | '%' | '$' | '#' | '&' | '_' => {
                    Ok(Node::Symbol { text: c.to_string(), italic: false, operator: false })
                }
                other => Err(MathError::UnknownCommand(other.to_string())),
            };
        }

        match name.as_str() {
            "frac" => {
                let numerator = self.argument("\\frac")?;
                let denominator = self.argument("\\frac")?;
                Ok(Node::Frac(Box::new(numerator), Box::new(denominator)))
            }
            "sqrt" => Ok(Node::Sqrt(Box::new(self.argument("\\sqrt")?))),
            "quad" => Ok(Node::Space(1.0)),
            "qquad" => Ok(Node::Space(2.0)),
            "left" | "right" => {
                // Delimiter sizing is not supported; keep the delimiter itself.
                self.skip_whitespace();
                match self.chars.next() {
                    Some('.') | None => Ok(Node::Row(Vec::new())),
                    Some('\\') => self.command(),
                    Some(c) => self.atom(c),
                }
            }
            "sin" | "cos" | "tan" | "log" | "ln" | "exp" | "lim" | "max" | "min" => {
                Ok(Node::Symbol { text: name, italic: false, operator: false })
            }
            other => match SYMBOLS.get(other) {
                Some((text, operator)) => Ok(Node::Symbol {
                    text: (*text).to_owned(),
                    italic: false,
                    operator: *operator,
                }),
                None => Err(MathError::UnknownCommand(name)),
            },
        }
    }
}

fn attach_script(base: Node, superscript: bool, script: Node) -> Node {
    let script = Some(Box::new(script));
    match base {
        Node::Scripts { base, sup, sub } => {
            if superscript {
                Node::Scripts { base, sup: script, sub }
            } else {
                Node::Scripts { base, sup, sub: script }
            }
        }
        base if superscript => Node::Scripts { base: Box::new(base), sup: script, sub: None },
        base => Node::Scripts { base: Box::new(base), sup: None, sub: script },
    }
}

/// A run of text positioned on its baseline, in em units
#[derive(Debug, Clone, PartialEq)]
pub struct Glyph {
    pub text: String,
    pub x: f32,
    pub y: f32,
    /// Relative to the base font size
    pub size: f32,
    pub italic: bool,
}

/// Horizontal bar (fraction line, radical overline), in em units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rule {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub thickness: f32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MathLayout {
    pub width: f32,
    /// Extent above the baseline
    pub ascent: f32,
    /// Extent below the baseline
    pub descent: f32,
    pub glyphs: Vec<Glyph>,
    pub rules: Vec<Rule>,
}

const CHAR_WIDTH: f32 = 0.55;
const OPERATOR_PAD: f32 = 0.22;
const SCRIPT_SCALE: f32 = 0.7;
const FRACTION_SCALE: f32 = 0.85;
const AXIS: f32 = 0.3;
const RULE_THICKNESS: f32 = 0.06;

impl MathLayout {
    pub fn height(&self) -> f32 {
        self.ascent + self.descent
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty() && self.rules.is_empty()
    }

    /// Place `other` with its origin at (dx, dy) relative to this layout.
    fn place(&mut self, other: MathLayout, dx: f32, dy: f32) {
        self.glyphs.extend(other.glyphs.into_iter().map(|glyph| Glyph {
            x: glyph.x + dx,
            y: glyph.y + dy,
            ..glyph
        }));
        self.rules.extend(other.rules.into_iter().map(|rule| Rule {
            x: rule.x + dx,
            y: rule.y + dy,
            ..rule
        }));
    }
}

fn layout(node: &Node, size: f32) -> MathLayout {
    match node {
        Node::Symbol { text, italic, operator } => {
            let pad = if *operator { OPERATOR_PAD * size } else { 0.0 };
            let advance = text.chars().count() as f32 * CHAR_WIDTH * size;
            MathLayout {
                width: advance + 2.0 * pad,
                ascent: 0.75 * size,
                descent: 0.25 * size,
                glyphs: vec![Glyph { text: text.clone(), x: pad, y: 0.0, size, italic: *italic }],
                rules: Vec::new(),
            }
        }
        Node::Space(em) => MathLayout { width: em * size, ..MathLayout::default() },
        Node::Row(nodes) => {
            let mut row = MathLayout::default();
            for child in nodes {
                let child = layout(child, size);
                let x = row.width;
                row.width += child.width;
                row.ascent = row.ascent.max(child.ascent);
                row.descent = row.descent.max(child.descent);
                row.place(child, x, 0.0);
            }
            row
        }
        Node::Frac(numerator, denominator) => {
            let num = layout(numerator, size * FRACTION_SCALE);
            let den = layout(denominator, size * FRACTION_SCALE);
            let gap = 0.15 * size;
            let axis = AXIS * size;
            let width = num.width.max(den.width) + 0.2 * size;

            let num_baseline = -(axis + gap + num.descent);
            let den_baseline = -axis + gap + den.ascent;
            let mut frac = MathLayout {
                width,
                ascent: axis + gap + num.height(),
                descent: (den_baseline + den.descent).max(0.0),
                glyphs: Vec::new(),
                rules: vec![Rule { x: 0.0, y: -axis, width, thickness: RULE_THICKNESS * size }],
            };
            let (num_x, den_x) = ((width - num.width) / 2.0, (width - den.width) / 2.0);
            frac.place(num, num_x, num_baseline);
            frac.place(den, den_x, den_baseline);
            frac
        }
        Node::Sqrt(radicand) => {
            let inner = layout(radicand, size);
            let sign_width = 0.6 * size;
            let top = inner.ascent + 0.12 * size;
            let mut root = MathLayout {
                width: sign_width + inner.width + 0.1 * size,
                ascent: top + RULE_THICKNESS * size,
                descent: inner.descent,
                glyphs: vec![Glyph { text: "√".to_owned(), x: 0.0, y: 0.0, size, italic: false }],
                rules: vec![Rule {
                    x: sign_width * 0.9,
                    y: -top,
                    width: inner.width + 0.1 * size + sign_width * 0.1,
                    thickness: RULE_THICKNESS * size,
                }],
            };
            root.place(inner, sign_width, 0.0);
            root
        }
        Node::Scripts { base, sup, sub } => {
            let mut scripted = layout(base, size);
            let base_width = scripted.width;
            let mut script_width: f32 = 0.0;

            if let Some(sup) = sup {
                let sup = layout(sup, size * SCRIPT_SCALE);
                let shift = -(scripted.ascent * 0.55).max(0.4 * size);
                script_width = script_width.max(sup.width);
                scripted.ascent = scripted.ascent.max(-shift + sup.ascent);
                scripted.place(sup, base_width, shift);
            }
            if let Some(sub) = sub {
                let sub = layout(sub, size * SCRIPT_SCALE);
                let shift = 0.25 * size;
                script_width = script_width.max(sub.width);
                scripted.descent = scripted.descent.max(shift + sub.descent);
                scripted.place(sub, base_width, shift);
            }
            scripted.width = base_width + script_width;
            scripted
        }
    }
}

/// Typeset `source` at a base size of 1 em.
pub fn typeset(source: &str) -> Result<MathLayout, MathError> {
    let nodes = Parser::new(source).sequence(false)?;
    Ok(layout(&Node::Row(nodes), 1.0))
}
