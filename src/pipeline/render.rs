//! PDF layout: Markdown blocks → paginated A4 PDF with an outline.
//!
//! ## Why a hand-rolled layout?
//!
//! The PDF must carry a table of contents whose entries point at the page each
//! heading actually lands on. That needs to know where every line goes, so the
//! renderer owns the layout: a single top-to-bottom cursor, greedy line
//! wrapping against the built-in font metrics and a page break whenever the
//! next line would cross the bottom margin. The headings it places are handed
//! to [`outline`](super::outline) once the pages are serialised.
//!
//! ## Fonts
//!
//! Only the PDF base-14 fonts are used (Helvetica family and Courier), so no
//! font files are embedded. Their repertoire is limited, so text passes through
//! [`sanitize`]: typographic punctuation and common accented letters are
//! transliterated, anything else becomes `?`.
//!
//! ## Coordinates
//!
//! Layout runs in points measured from the top-left corner; printpdf wants
//! millimetres from the bottom-left. The conversion happens only at draw time
//! in `Layout::mm`.

use crate::error::Article2PdfError;
use crate::pipeline::markdown::{self, Block, Span, SpanStyle};
use crate::pipeline::outline::{self, OutlineItem};
use crate::style::{RgbColor, Stylesheet};
use printpdf::path::{PaintMode, WindingOrder};
use printpdf::{
    BuiltinFont, Color, IndirectFontRef, Line, Mm, PdfDocument, PdfDocumentReference,
    PdfLayerReference, Point, Polygon, Rgb,
};
use tracing::{debug, info, warn};

const PT_TO_MM: f32 = 25.4 / 72.0;
const LAYER_NAME: &str = "Layer 1";
const TABLE_LINE_HEIGHT: f32 = 1.4;

pub use crate::pipeline::outline::TocEntry;

/// A finished PDF.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    pub page_count: usize,
    /// Outline entries, in document order.
    pub toc: Vec<TocEntry>,
}

/// Lay out `markdown` and serialise the PDF.
///
/// Headings with `level <= toc_level` become outline entries. CPU-bound; the
/// exporter calls this inside `spawn_blocking`.
///
/// # Errors
/// [`Article2PdfError::MarkdownParse`] if parsing fails,
/// [`Article2PdfError::PdfRender`] if the PDF cannot be assembled.
pub fn render_pdf(
    markdown: &str,
    title: &str,
    toc_level: u8,
    style: &Stylesheet,
) -> Result<RenderedDocument, Article2PdfError> {
    let blocks = markdown::parse_blocks(markdown)?;
    debug!("Parsed {} top-level blocks", blocks.len());

    let mut layout = Layout::new(title, toc_level, style)?;
    let ctx = TextCtx {
        color: style.body.color,
        italic: false,
        gap: style.body.paragraph_spacing_pt,
    };
    let (x, width) = (layout.margin, layout.content_width());
    for block in &blocks {
        layout.block(block, x, width, &ctx);
    }
    layout.finish()
}

// ── Fonts and metrics ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Face {
    Regular,
    Bold,
    Italic,
    BoldItalic,
    Mono,
}

impl Face {
    fn pick(style: SpanStyle, bold: bool, italic: bool) -> Self {
        if style.code {
            return Face::Mono;
        }
        match (bold || style.bold, italic || style.italic) {
            (false, false) => Face::Regular,
            (true, false) => Face::Bold,
            (false, true) => Face::Italic,
            (true, true) => Face::BoldItalic,
        }
    }

    fn is_bold(self) -> bool {
        matches!(self, Face::Bold | Face::BoldItalic)
    }
}

struct Fonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    italic: IndirectFontRef,
    bold_italic: IndirectFontRef,
    mono: IndirectFontRef,
}

impl Fonts {
    fn load(doc: &PdfDocumentReference) -> Result<Self, Article2PdfError> {
        let add = |font: BuiltinFont| {
            doc.add_builtin_font(font)
                .map_err(|e| Article2PdfError::PdfRender(format!("font {font:?}: {e}")))
        };
        Ok(Self {
            regular: add(BuiltinFont::Helvetica)?,
            bold: add(BuiltinFont::HelveticaBold)?,
            italic: add(BuiltinFont::HelveticaOblique)?,
            bold_italic: add(BuiltinFont::HelveticaBoldOblique)?,
            mono: add(BuiltinFont::Courier)?,
        })
    }

    fn get(&self, face: Face) -> &IndirectFontRef {
        match face {
            Face::Regular => &self.regular,
            Face::Bold => &self.bold,
            Face::Italic => &self.italic,
            Face::BoldItalic => &self.bold_italic,
            Face::Mono => &self.mono,
        }
    }
}

/// Helvetica advance widths (1/1000 em) for ASCII 32..=126.
#[rustfmt::skip]
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

fn char_width(c: char, face: Face) -> f32 {
    if face == Face::Mono {
        return 600.0;
    }
    let base = match c as u32 {
        n @ 32..=126 => f32::from(HELVETICA_WIDTHS[(n - 32) as usize]),
        _ => 556.0,
    };
    if face.is_bold() {
        base * 1.06
    } else {
        base
    }
}

fn text_width(text: &str, face: Face, size: f32) -> f32 {
    text.chars().map(|c| char_width(c, face)).sum::<f32>() * size / 1000.0
}

// ── Text sanitisation ───────────────────────────────────────────────────────

/// Map text onto the printable ASCII the base-14 fonts can show.
///
/// Returns the mapped text and how many characters had no mapping and were
/// replaced by `?`.
pub(crate) fn sanitize(text: &str) -> (String, usize) {
    let mut out = String::with_capacity(text.len());
    let mut replaced = 0;
    for c in text.chars() {
        match c {
            ' '..='~' => out.push(c),
            '\n' | '\r' | '\u{00A0}' | '\u{2002}'..='\u{200A}' | '\u{202F}' => out.push(' '),
            '\t' => out.push_str("    "),
            '\u{200B}'..='\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}' => {}
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => out.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' => out.push('"'),
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2212}' => out.push('-'),
            '\u{2014}' | '\u{2015}' => out.push_str("--"),
            '\u{2026}' => out.push_str("..."),
            '\u{2022}' | '\u{00B7}' | '\u{2023}' | '\u{25CF}' => out.push('*'),
            '\u{00AB}' => out.push_str("<<"),
            '\u{00BB}' => out.push_str(">>"),
            '\u{2192}' => out.push_str("->"),
            '\u{2190}' => out.push_str("<-"),
            '\u{21D2}' => out.push_str("=>"),
            '\u{00D7}' => out.push('x'),
            '\u{00A9}' => out.push_str("(c)"),
            '\u{00AE}' => out.push_str("(R)"),
            '\u{2122}' => out.push_str("(TM)"),
            '\u{20AC}' => out.push_str("EUR"),
            '\u{00A3}' => out.push_str("GBP"),
            '\u{00B0}' => out.push_str(" deg"),
            '\u{00DF}' => out.push_str("ss"),
            '\u{00E6}' => out.push_str("ae"),
            '\u{00C6}' => out.push_str("AE"),
            '\u{0153}' => out.push_str("oe"),
            '\u{0152}' => out.push_str("OE"),
            other => match fold_latin(other) {
                Some(ascii) => out.push(ascii),
                None => {
                    out.push('?');
                    replaced += 1;
                }
            },
        }
    }
    (out, replaced)
}

fn fold_latin(c: char) -> Option<char> {
    let folded = match c {
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'Ç' => 'C',
        'ç' => 'c',
        'È' | 'É' | 'Ê' | 'Ë' => 'E',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'Ì' | 'Í' | 'Î' | 'Ï' => 'I',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'Ñ' => 'N',
        'ñ' => 'n',
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' => 'O',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => 'o',
        'Ù' | 'Ú' | 'Û' | 'Ü' => 'U',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'Ý' => 'Y',
        'ý' | 'ÿ' => 'y',
        _ => return None,
    };
    Some(folded)
}

// ── Line wrapping ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Frag {
    text: String,
    face: Face,
    size: f32,
    width: f32,
    style: SpanStyle,
}

#[derive(Debug, Clone, Default)]
struct TextLine {
    frags: Vec<Frag>,
    width: f32,
}

impl TextLine {
    fn is_blank(&self) -> bool {
        self.frags.iter().all(|f| f.text.trim().is_empty())
    }

    fn trim_end(&mut self) {
        while let Some(last) = self.frags.last_mut() {
            let trimmed = last.text.trim_end().len();
            if trimmed == last.text.len() {
                break;
            }
            last.text.truncate(trimmed);
            let w = text_width(&last.text, last.face, last.size);
            self.width -= last.width - w;
            last.width = w;
            if last.text.is_empty() {
                self.frags.pop();
            } else {
                break;
            }
        }
    }
}

/// Greedy word wrapper.
struct Wrapper {
    max_width: f32,
    lines: Vec<TextLine>,
    current: TextLine,
    replaced: usize,
}

impl Wrapper {
    fn new(max_width: f32) -> Self {
        Self {
            max_width: max_width.max(1.0),
            lines: Vec::new(),
            current: TextLine::default(),
            replaced: 0,
        }
    }

    fn break_line(&mut self) {
        let mut line = std::mem::take(&mut self.current);
        line.trim_end();
        self.lines.push(line);
    }

    fn append(&mut self, text: &str, face: Face, size: f32, style: SpanStyle) {
        let width = text_width(text, face, size);
        if let Some(last) = self.current.frags.last_mut() {
            if last.face == face && last.style == style && last.size == size {
                last.text.push_str(text);
                last.width += width;
                self.current.width += width;
                return;
            }
        }
        self.current.frags.push(Frag {
            text: text.to_string(),
            face,
            size,
            width,
            style,
        });
        self.current.width += width;
    }

    fn push_word(&mut self, word: &str, face: Face, size: f32, style: SpanStyle) {
        let width = text_width(word, face, size);
        if self.current.width + width > self.max_width && !self.current.is_blank() {
            self.break_line();
        }
        if width <= self.max_width {
            self.append(word, face, size, style);
            return;
        }
        // Longer than a whole line: hard split.
        let mut chunk = String::new();
        for c in word.chars() {
            let cw = char_width(c, face) * size / 1000.0;
            if self.current.width + text_width(&chunk, face, size) + cw > self.max_width
                && !(chunk.is_empty() && self.current.is_blank())
            {
                self.append(&chunk, face, size, style);
                chunk.clear();
                self.break_line();
            }
            chunk.push(c);
        }
        if !chunk.is_empty() {
            self.append(&chunk, face, size, style);
        }
    }

    fn push_text(&mut self, text: &str, face: Face, size: f32, style: SpanStyle) {
        let (clean, replaced) = sanitize(text);
        self.replaced += replaced;
        let mut word = String::new();
        for c in clean.chars() {
            if c == ' ' {
                if !word.is_empty() {
                    self.push_word(&word, face, size, style);
                    word.clear();
                }
                if !self.current.frags.is_empty() {
                    self.append(" ", face, size, style);
                }
            } else {
                word.push(c);
            }
        }
        if !word.is_empty() {
            self.push_word(&word, face, size, style);
        }
    }

    fn finish(mut self) -> (Vec<TextLine>, usize) {
        if !self.current.frags.is_empty() || self.lines.is_empty() {
            self.break_line();
        }
        (self.lines, self.replaced)
    }
}

/// Parameters for wrapping a run list.
struct Wrap {
    size: f32,
    bold: bool,
    italic: bool,
    code_scale: f32,
    max_width: f32,
}

fn wrap_spans(spans: &[Span], opts: &Wrap) -> (Vec<TextLine>, usize) {
    let mut wrapper = Wrapper::new(opts.max_width);
    for span in spans {
        if span.is_break() {
            wrapper.break_line();
            continue;
        }
        let face = Face::pick(span.style, opts.bold, opts.italic);
        let size = if span.style.code {
            opts.size * opts.code_scale
        } else {
            opts.size
        };
        wrapper.push_text(&span.text, face, size, span.style);
    }
    wrapper.finish()
}

/// Code lines wrap by character and keep their indentation.
fn wrap_code(text: &str, size: f32, max_width: f32) -> (Vec<TextLine>, usize) {
    let per_line = ((max_width / (600.0 * size / 1000.0)).floor() as usize).max(1);
    let mut lines = Vec::new();
    let mut replaced = 0;
    for source in text.split('\n') {
        let (clean, r) = sanitize(source.trim_end_matches('\r'));
        replaced += r;
        let chars: Vec<char> = clean.chars().collect();
        if chars.is_empty() {
            lines.push(TextLine::default());
            continue;
        }
        for chunk in chars.chunks(per_line) {
            let s: String = chunk.iter().collect();
            let width = text_width(&s, Face::Mono, size);
            lines.push(TextLine {
                frags: vec![Frag {
                    text: s,
                    face: Face::Mono,
                    size,
                    width,
                    style: SpanStyle::default(),
                }],
                width,
            });
        }
    }
    (lines, replaced)
}

// ── Layout engine ───────────────────────────────────────────────────────────

/// Vertical decoration painted behind every line while active
/// (code block background, blockquote bar and background).
#[derive(Debug, Clone, Copy)]
struct Band {
    x: f32,
    width: f32,
    background: Option<RgbColor>,
    bar: Option<(RgbColor, f32)>,
}

#[derive(Debug, Clone)]
enum Marker {
    Bullet { x: f32 },
    Number { right: f32, text: String },
}

/// Text context inherited by nested blocks.
#[derive(Debug, Clone, Copy)]
struct TextCtx {
    color: RgbColor,
    italic: bool,
    /// Space after each paragraph.
    gap: f32,
}

struct Layout<'a> {
    doc: PdfDocumentReference,
    fonts: Fonts,
    style: &'a Stylesheet,
    toc_level: u8,
    page_w: f32,
    page_h: f32,
    margin: f32,
    layer: PdfLayerReference,
    page_count: usize,
    /// Cursor, points from the top edge.
    y: f32,
    bands: Vec<Band>,
    marker: Option<Marker>,
    headings: Vec<OutlineItem>,
    replaced: usize,
}

impl<'a> Layout<'a> {
    fn new(title: &str, toc_level: u8, style: &'a Stylesheet) -> Result<Self, Article2PdfError> {
        let (doc_title, _) = sanitize(title);
        let (doc, page, layer) = PdfDocument::new(
            doc_title,
            Mm(style.page.width_mm),
            Mm(style.page.height_mm),
            LAYER_NAME,
        );
        let fonts = Fonts::load(&doc)?;
        let layer = doc.get_page(page).get_layer(layer);
        let margin = style.page.margin_mm / PT_TO_MM;

        Ok(Self {
            fonts,
            style,
            toc_level,
            page_w: style.page.width_mm / PT_TO_MM,
            page_h: style.page.height_mm / PT_TO_MM,
            margin,
            layer,
            page_count: 1,
            y: margin,
            bands: Vec::new(),
            marker: None,
            headings: Vec::new(),
            replaced: 0,
            doc,
        })
    }

    fn finish(self) -> Result<RenderedDocument, Article2PdfError> {
        if self.replaced > 0 {
            warn!(
                "{} character(s) outside the built-in font repertoire were replaced with '?'",
                self.replaced
            );
        }
        let page_count = self.page_count;
        let headings = self.headings;
        let bytes = self
            .doc
            .save_to_bytes()
            .map_err(|e| Article2PdfError::PdfRender(e.to_string()))?;
        let bytes = outline::write_outline(bytes, &headings)?;
        let toc: Vec<TocEntry> = headings.into_iter().map(|h| h.entry).collect();
        info!(
            "Rendered {} page(s), {} outline entries, {} bytes",
            page_count,
            toc.len(),
            bytes.len()
        );
        Ok(RenderedDocument {
            bytes,
            page_count,
            toc,
        })
    }

    fn content_width(&self) -> f32 {
        self.page_w - 2.0 * self.margin
    }

    fn bottom(&self) -> f32 {
        self.page_h - self.margin
    }

    fn at_page_top(&self) -> bool {
        self.y <= self.margin + 0.01
    }

    fn mm(&self, x: f32, y: f32) -> (Mm, Mm) {
        (Mm(x * PT_TO_MM), Mm((self.page_h - y) * PT_TO_MM))
    }

    fn point(&self, x: f32, y: f32) -> Point {
        let (x, y) = self.mm(x, y);
        Point::new(x, y)
    }

    fn new_page(&mut self) {
        let (page, layer) = self.doc.add_page(
            Mm(self.style.page.width_mm),
            Mm(self.style.page.height_mm),
            LAYER_NAME,
        );
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.page_count += 1;
        self.y = self.margin;
        debug!("Started page {}", self.page_count);
    }

    /// Break the page unless `height` still fits (or we are already at the top).
    fn ensure(&mut self, height: f32) {
        if self.y + height > self.bottom() && !self.at_page_top() {
            self.new_page();
        }
    }

    /// Move the cursor down, painting active bands over the gap.
    fn advance(&mut self, dy: f32) {
        if dy <= 0.0 {
            return;
        }
        let visible = dy.min(self.bottom() - self.y);
        if visible > 0.0 {
            self.paint_bands(self.y, visible);
        }
        self.y += dy;
        if self.y >= self.bottom() {
            self.new_page();
        }
    }

    // ── primitives ──

    fn fill_rect(&self, x: f32, top: f32, w: f32, h: f32, color: RgbColor) {
        if w <= 0.0 || h <= 0.0 {
            return;
        }
        let ring = vec![
            (self.point(x, top), false),
            (self.point(x + w, top), false),
            (self.point(x + w, top + h), false),
            (self.point(x, top + h), false),
        ];
        self.layer.set_fill_color(rgb(color));
        self.layer.add_polygon(Polygon {
            rings: vec![ring],
            mode: PaintMode::Fill,
            winding_order: WindingOrder::NonZero,
        });
    }

    fn stroke(&self, from: (f32, f32), to: (f32, f32), thickness_pt: f32, color: RgbColor) {
        self.layer.set_outline_color(rgb(color));
        self.layer.set_outline_thickness(thickness_pt);
        self.layer.add_line(Line {
            points: vec![
                (self.point(from.0, from.1), false),
                (self.point(to.0, to.1), false),
            ],
            is_closed: false,
        });
    }

    fn paint_bands(&self, top: f32, h: f32) {
        for band in &self.bands {
            if let Some(bg) = band.background {
                self.fill_rect(band.x, top, band.width, h, bg);
            }
            if let Some((color, w)) = band.bar {
                self.fill_rect(band.x, top, w, h, color);
            }
        }
    }

    /// Draw one wrapped line with its top edge at `top`.
    fn draw_line(&self, line: &TextLine, x: f32, top: f32, lh: f32, color: RgbColor) {
        let mut cursor = x;
        for frag in &line.frags {
            let baseline = top + (lh + frag.size * 0.7) / 2.0;
            if frag.style.code && frag.face == Face::Mono && !frag.text.trim().is_empty() {
                let pad = frag.size * 0.15;
                self.fill_rect(
                    cursor - pad,
                    baseline - frag.size * 0.85,
                    frag.width + 2.0 * pad,
                    frag.size * 1.15,
                    self.style.code.background,
                );
            }
            let fill = if frag.style.link {
                self.style.link.color
            } else if frag.style.code {
                self.style.code.color
            } else {
                color
            };
            self.layer.set_fill_color(rgb(fill));
            let (tx, ty) = self.mm(cursor, baseline);
            self.layer
                .use_text(frag.text.as_str(), frag.size, tx, ty, self.fonts.get(frag.face));
            let thickness = (frag.size / 18.0).max(0.4);
            if frag.style.link && self.style.link.underline {
                let y = baseline + frag.size * 0.12;
                self.stroke((cursor, y), (cursor + frag.width, y), thickness, fill);
            }
            if frag.style.strike {
                let y = baseline - frag.size * 0.3;
                self.stroke((cursor, y), (cursor + frag.width, y), thickness, fill);
            }
            cursor += frag.width;
        }
    }

    fn draw_marker(&self, marker: &Marker, top: f32, lh: f32, size: f32, color: RgbColor) {
        let baseline = top + (lh + size * 0.7) / 2.0;
        match marker {
            Marker::Bullet { x } => {
                let side = size * 0.32;
                let cx = x - self.style.list.indent_pt * 0.5;
                self.fill_rect(cx - side / 2.0, baseline - size * 0.5, side, side, color);
            }
            Marker::Number { right, text } => {
                let w = text_width(text, Face::Regular, size);
                self.layer.set_fill_color(rgb(color));
                let (tx, ty) = self.mm(right - w, baseline);
                self.layer
                    .use_text(text.as_str(), size, tx, ty, &self.fonts.regular);
            }
        }
    }

    /// Place wrapped lines one after another, breaking pages as needed.
    fn lines(&mut self, lines: &[TextLine], x: f32, lh: f32, size: f32, color: RgbColor) {
        for line in lines {
            self.ensure(lh);
            self.paint_bands(self.y, lh);
            if let Some(marker) = self.marker.take() {
                self.draw_marker(&marker, self.y, lh, size, color);
            }
            self.draw_line(line, x, self.y, lh, color);
            self.y += lh;
        }
    }

    // ── blocks ──

    fn block(&mut self, block: &Block, x: f32, width: f32, ctx: &TextCtx) {
        match block {
            Block::Heading { level, spans } => self.heading(*level, spans, x, width),
            Block::Paragraph(spans) => self.paragraph(spans, x, width, ctx),
            Block::Code { text, .. } => self.code(text, x, width, ctx),
            Block::Quote(inner) => self.quote(inner, x, width),
            Block::List {
                ordered,
                start,
                items,
            } => self.list(*ordered, *start, items, x, width, ctx),
            Block::Table { header, rows } => self.table(header, rows, x, width),
            Block::Rule => self.rule(x, width),
            Block::Image { alt, url } => {
                let label = if alt.trim().is_empty() { url } else { alt };
                let caption = Span {
                    text: format!("[image: {label}]"),
                    style: SpanStyle {
                        italic: true,
                        ..SpanStyle::default()
                    },
                };
                self.paragraph(&[caption], x, width, ctx);
            }
        }
    }

    fn paragraph(&mut self, spans: &[Span], x: f32, width: f32, ctx: &TextCtx) {
        let body = &self.style.body;
        let size = body.font_size_pt;
        let lh = size * body.line_height;
        let (lines, replaced) = wrap_spans(
            spans,
            &Wrap {
                size,
                bold: false,
                italic: ctx.italic,
                code_scale: self.style.code.inline_scale,
                max_width: width,
            },
        );
        self.replaced += replaced;
        self.lines(&lines, x, lh, size, ctx.color);
        self.advance(ctx.gap);
    }

    fn heading(&mut self, level: u8, spans: &[Span], x: f32, width: f32) {
        let hs = &self.style.headings;
        let size = hs.size_for(level);
        let lh = size * hs.line_height;
        let color = hs.color_for(level);
        let (margin_top, margin_bottom) = (hs.margin_top_pt, hs.margin_bottom_pt);
        let rule = match level {
            1 => Some(hs.h1_rule_pt),
            2 => Some(hs.h2_rule_pt),
            _ => None,
        };
        let rule_color = hs.rule_color;

        if !self.at_page_top() {
            self.advance(margin_top);
        }
        // Keep the heading with at least one following line.
        self.ensure(lh + self.style.body.font_size_pt * self.style.body.line_height);

        let title = markdown::plain_text(spans);
        if level <= self.toc_level && !title.trim().is_empty() {
            self.headings.push(OutlineItem {
                entry: TocEntry {
                    level,
                    title,
                    page: self.page_count,
                },
                top_pt: self.page_h - self.y,
            });
        }

        let (lines, replaced) = wrap_spans(
            spans,
            &Wrap {
                size,
                bold: true,
                italic: false,
                code_scale: self.style.code.inline_scale,
                max_width: width,
            },
        );
        self.replaced += replaced;
        self.lines(&lines, x, lh, size, color);

        if let Some(thickness) = rule.filter(|t| *t > 0.0) {
            self.y += size * 0.2;
            self.stroke((x, self.y), (x + width, self.y), thickness, rule_color);
            self.y += thickness;
        }
        self.advance(margin_bottom);
    }

    fn code(&mut self, text: &str, x: f32, width: f32, ctx: &TextCtx) {
        let cs = &self.style.code;
        let size = cs.block_font_size_pt;
        let lh = size * cs.block_line_height;
        let pad = cs.block_padding_pt;
        let (color, background) = (cs.color, cs.background);

        let (lines, replaced) = wrap_code(text, size, width - 2.0 * pad);
        self.replaced += replaced;

        self.ensure(2.0 * pad + lh);
        self.bands.push(Band {
            x,
            width,
            background: Some(background),
            bar: None,
        });
        self.advance(pad);
        self.lines(&lines, x + pad, lh, size, color);
        self.advance(pad);
        self.bands.pop();
        self.advance(ctx.gap);
    }

    fn quote(&mut self, inner: &[Block], x: f32, width: f32) {
        let bq = &self.style.blockquote;
        let pad = bq.padding_pt;
        let bar = bq.bar_width_pt;
        let margin = bq.margin_pt;
        let inner_ctx = TextCtx {
            color: bq.text_color,
            italic: bq.italic,
            gap: self.style.body.paragraph_spacing_pt * 0.5,
        };
        let band = Band {
            x,
            width,
            background: Some(bq.background),
            bar: Some((bq.bar_color, bar)),
        };

        self.ensure(2.0 * pad + self.style.body.font_size_pt * self.style.body.line_height);
        self.bands.push(band);
        self.advance(pad * 0.5);
        let (ix, iw) = (x + bar + pad, width - bar - 2.0 * pad);
        for block in inner {
            self.block(block, ix, iw, &inner_ctx);
        }
        self.bands.pop();
        self.advance(margin * 0.5);
    }

    fn list(
        &mut self,
        ordered: bool,
        start: u32,
        items: &[Vec<Block>],
        x: f32,
        width: f32,
        ctx: &TextCtx,
    ) {
        let indent = self.style.list.indent_pt;
        let spacing = self.style.list.item_spacing_pt;
        let item_ctx = TextCtx { gap: spacing, ..*ctx };
        let (ix, iw) = (x + indent, width - indent);

        for (i, item) in items.iter().enumerate() {
            self.marker = Some(if ordered {
                Marker::Number {
                    right: ix - indent * 0.25,
                    text: format!("{}.", start as usize + i),
                }
            } else {
                Marker::Bullet { x: ix }
            });
            for block in item {
                self.block(block, ix, iw, &item_ctx);
            }
            self.marker = None;
        }
        self.advance((ctx.gap - spacing).max(0.0));
    }

    fn table(&mut self, header: &[Vec<Span>], rows: &[Vec<Vec<Span>>], x: f32, width: f32) {
        let ts = &self.style.table;
        let size = ts.font_size_pt;
        let pad = ts.cell_padding_pt;
        let lh = size * TABLE_LINE_HEIGHT;
        let (border, border_pt, header_bg, margin) =
            (ts.border_color, ts.border_pt, ts.header_background, ts.margin_pt);
        let text_color = self.style.body.color;
        let code_scale = self.style.code.inline_scale;

        let cols = rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(header.len()))
            .max()
            .unwrap_or(0);
        if cols == 0 {
            return;
        }

        // Column widths proportional to their widest cell.
        let mut natural = vec![3.0 * size; cols];
        for row in std::iter::once(header).chain(rows.iter().map(Vec::as_slice)) {
            for (c, cell) in row.iter().enumerate() {
                let (text, _) = sanitize(&markdown::plain_text(cell));
                let w = text_width(&text, Face::Regular, size) + 2.0 * pad;
                natural[c] = natural[c].max(w);
            }
        }
        let total: f32 = natural.iter().sum();
        let widths: Vec<f32> = natural.iter().map(|w| width * w / total).collect();

        let draw_row = |layout: &mut Layout<'_>, cells: &[Vec<Span>], is_header: bool| {
            let wrapped: Vec<Vec<TextLine>> = (0..cols)
                .map(|c| {
                    let spans = cells.get(c).map(Vec::as_slice).unwrap_or(&[]);
                    let (lines, replaced) = wrap_spans(
                        spans,
                        &Wrap {
                            size,
                            bold: is_header,
                            italic: false,
                            code_scale,
                            max_width: widths[c] - 2.0 * pad,
                        },
                    );
                    layout.replaced += replaced;
                    lines
                })
                .collect();
            let line_count = wrapped.iter().map(Vec::len).max().unwrap_or(1).max(1);
            let full_height = line_count as f32 * lh + 2.0 * pad;

            // A row taller than a page is drawn in slices, each with its own
            // borders; otherwise the whole row moves to the next page.
            if full_height <= layout.bottom() - layout.margin {
                layout.ensure(full_height);
            } else {
                layout.ensure(lh + 2.0 * pad);
            }
            let mut first = 0;
            while first < line_count {
                let room = layout.bottom() - layout.y - 2.0 * pad;
                let take = ((room / lh).floor() as usize).clamp(1, line_count - first);
                let height = take as f32 * lh + 2.0 * pad;
                let top = layout.y;

                layout.paint_bands(top, height);
                if is_header {
                    layout.fill_rect(x, top, width, height, header_bg);
                }
                let mut cx = x;
                for (c, lines) in wrapped.iter().enumerate() {
                    let slice = lines.iter().skip(first).take(take);
                    for (k, line) in slice.enumerate() {
                        let line_top = top + pad + k as f32 * lh;
                        layout.draw_line(line, cx + pad, line_top, lh, text_color);
                    }
                    cx += widths[c];
                }

                let bottom = top + height;
                layout.stroke((x, top), (x + width, top), border_pt, border);
                layout.stroke((x, bottom), (x + width, bottom), border_pt, border);
                let mut edge = x;
                layout.stroke((edge, top), (edge, bottom), border_pt, border);
                for w in &widths {
                    edge += w;
                    layout.stroke((edge, top), (edge, bottom), border_pt, border);
                }
                layout.y = bottom;
                first += take;
                if first < line_count {
                    layout.new_page();
                }
            }
        };

        if !header.is_empty() {
            draw_row(self, header, true);
        }
        for row in rows {
            draw_row(self, row, false);
        }
        self.advance(margin);
    }

    fn rule(&mut self, x: f32, width: f32) {
        let rs = &self.style.rule;
        let (color, thickness, margin) = (rs.color, rs.thickness_pt, rs.margin_pt);
        self.advance(margin * 0.5);
        self.ensure(thickness);
        self.stroke((x, self.y), (x + width, self.y), thickness, color);
        self.advance(margin * 0.5);
    }
}

fn rgb(color: RgbColor) -> Color {
    let (r, g, b) = color.unit();
    Color::Rgb(Rgb::new(r, g, b, None))
}
