//! Markdown parsing: GFM text → a flat block model the layout engine walks.
//!
//! Parsing is delegated to the `markdown` crate (mdast output with GFM
//! extensions). This module only folds the syntax tree down to what the PDF
//! layout can draw: blocks of styled text runs. Anything without a visual
//! counterpart (definitions, front-matter, MDX) is dropped; raw HTML is kept
//! as its tag-stripped text.

use crate::error::Article2PdfError;
use markdown::mdast::{self, Node};
use markdown::ParseOptions;
use once_cell::sync::Lazy;
use regex::Regex;

/// Inline formatting of a text run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpanStyle {
    pub bold: bool,
    pub italic: bool,
    pub code: bool,
    pub link: bool,
    pub strike: bool,
}

/// A run of text with one style. `text == "\n"` marks a hard line break.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub style: SpanStyle,
}

impl Span {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style: SpanStyle::default(),
        }
    }

    pub fn is_break(&self) -> bool {
        self.text == "\n"
    }
}

/// One block-level element.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading { level: u8, spans: Vec<Span> },
    Paragraph(Vec<Span>),
    Code { lang: Option<String>, text: String },
    Quote(Vec<Block>),
    List {
        ordered: bool,
        start: u32,
        items: Vec<Vec<Block>>,
    },
    Table {
        header: Vec<Vec<Span>>,
        rows: Vec<Vec<Vec<Span>>>,
    },
    Rule,
    Image { alt: String, url: String },
}

/// Plain text of a run list (used for outline titles).
pub fn plain_text(spans: &[Span]) -> String {
    let joined: String = spans
        .iter()
        .map(|s| if s.is_break() { " " } else { s.text.as_str() })
        .collect();
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse GFM Markdown into blocks.
pub fn parse_blocks(markdown: &str) -> Result<Vec<Block>, Article2PdfError> {
    let root = markdown::to_mdast(markdown, &ParseOptions::gfm())
        .map_err(|e| Article2PdfError::MarkdownParse(e.to_string()))?;
    let mut blocks = Vec::new();
    if let Some(children) = root.children() {
        collect_blocks(children, &mut blocks);
    }
    Ok(blocks)
}

/// Text of the first level-1 heading, if any.
pub fn first_heading(blocks: &[Block]) -> Option<String> {
    blocks.iter().find_map(|b| match b {
        Block::Heading { level: 1, spans } => Some(plain_text(spans)).filter(|t| !t.is_empty()),
        _ => None,
    })
}

fn collect_blocks(nodes: &[Node], out: &mut Vec<Block>) {
    for node in nodes {
        match node {
            Node::Heading(h) => out.push(Block::Heading {
                level: h.depth,
                spans: inline_spans(&h.children),
            }),
            Node::Paragraph(p) => push_paragraph(&p.children, out),
            Node::Code(c) => out.push(Block::Code {
                lang: c.lang.clone(),
                text: c.value.clone(),
            }),
            Node::Blockquote(q) => {
                let mut inner = Vec::new();
                collect_blocks(&q.children, &mut inner);
                out.push(Block::Quote(inner));
            }
            Node::List(l) => out.push(list_block(l)),
            Node::Table(t) => out.push(table_block(t)),
            Node::ThematicBreak(_) => out.push(Block::Rule),
            Node::Html(h) => {
                let text = strip_tags(&h.value);
                if !text.trim().is_empty() {
                    out.push(Block::Paragraph(vec![Span::plain(text.trim())]));
                }
            }
            // Footnote bodies and anything else with children: keep the content.
            other => {
                if let Some(children) = other.children() {
                    collect_blocks(children, out);
                }
            }
        }
    }
}

/// A paragraph that is nothing but an image becomes an image block; any
/// other paragraph keeps images inline as captions.
fn push_paragraph(children: &[Node], out: &mut Vec<Block>) {
    if let [Node::Image(img)] = children {
        out.push(Block::Image {
            alt: img.alt.clone(),
            url: img.url.clone(),
        });
        return;
    }
    let spans = inline_spans(children);
    if !spans.is_empty() {
        out.push(Block::Paragraph(spans));
    }
}

fn list_block(list: &mdast::List) -> Block {
    let items = list
        .children
        .iter()
        .map(|item| {
            let mut blocks = Vec::new();
            if let Node::ListItem(li) = item {
                if let Some(checked) = li.checked {
                    blocks.push(Block::Paragraph(vec![Span::plain(if checked {
                        "[x]"
                    } else {
                        "[ ]"
                    })]));
                }
                collect_blocks(&li.children, &mut blocks);
                merge_task_marker(&mut blocks);
            } else if let Some(children) = item.children() {
                collect_blocks(children, &mut blocks);
            }
            blocks
        })
        .collect();

    Block::List {
        ordered: list.ordered,
        start: list.start.unwrap_or(1),
        items,
    }
}

/// `[x]` + first paragraph → one paragraph `[x] text`.
fn merge_task_marker(blocks: &mut Vec<Block>) {
    if blocks.len() < 2 {
        return;
    }
    if let (Block::Paragraph(marker), Block::Paragraph(_)) = (&blocks[0], &blocks[1]) {
        let is_marker = marker.len() == 1 && (marker[0].text == "[x]" || marker[0].text == "[ ]");
        if is_marker {
            let marker_text = format!("{} ", marker[0].text);
            blocks.remove(0);
            if let Block::Paragraph(spans) = &mut blocks[0] {
                spans.insert(0, Span::plain(marker_text));
            }
        }
    }
}

fn table_block(table: &mdast::Table) -> Block {
    let mut rows: Vec<Vec<Vec<Span>>> = table
        .children
        .iter()
        .filter_map(|row| row.children())
        .map(|cells| {
            cells
                .iter()
                .map(|cell| cell.children().map(|c| inline_spans(c)).unwrap_or_default())
                .collect()
        })
        .collect();

    let header = if rows.is_empty() {
        Vec::new()
    } else {
        rows.remove(0)
    };
    Block::Table { header, rows }
}

fn inline_spans(nodes: &[Node]) -> Vec<Span> {
    let mut spans = Vec::new();
    walk_inline(nodes, SpanStyle::default(), &mut spans);
    spans
}

fn walk_inline(nodes: &[Node], style: SpanStyle, out: &mut Vec<Span>) {
    for node in nodes {
        match node {
            Node::Text(t) => push_text(out, &t.value, style),
            Node::InlineCode(c) => push_text(out, &c.value, SpanStyle { code: true, ..style }),
            Node::InlineMath(m) => push_text(out, &m.value, SpanStyle { code: true, ..style }),
            Node::Strong(s) => walk_inline(&s.children, SpanStyle { bold: true, ..style }, out),
            Node::Emphasis(e) => walk_inline(&e.children, SpanStyle { italic: true, ..style }, out),
            Node::Delete(d) => walk_inline(&d.children, SpanStyle { strike: true, ..style }, out),
            Node::Link(l) => walk_inline(&l.children, SpanStyle { link: true, ..style }, out),
            Node::LinkReference(l) => {
                walk_inline(&l.children, SpanStyle { link: true, ..style }, out)
            }
            Node::Image(img) => push_text(
                out,
                &format!("[image: {}]", img.alt),
                SpanStyle { italic: true, ..style },
            ),
            Node::Break(_) => out.push(Span {
                text: "\n".into(),
                style,
            }),
            Node::Html(h) => push_text(out, &strip_tags(&h.value), style),
            Node::FootnoteReference(f) => push_text(out, &format!("[{}]", f.identifier), style),
            other => {
                if let Some(children) = other.children() {
                    walk_inline(children, style, out);
                }
            }
        }
    }
}

/// Append text, merging with the previous run when the style matches.
fn push_text(out: &mut Vec<Span>, text: &str, style: SpanStyle) {
    if text.is_empty() {
        return;
    }
    if let Some(last) = out.last_mut() {
        if last.style == style && !last.is_break() {
            last.text.push_str(text);
            return;
        }
    }
    out.push(Span {
        text: text.to_string(),
        style,
    });
}

static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

fn strip_tags(html: &str) -> String {
    RE_TAG.replace_all(html, "").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_and_paragraphs() {
        let blocks = parse_blocks("# Title\n\nHello\n\n## Sub").unwrap();
        assert_eq!(
            blocks,
            vec![
                Block::Heading {
                    level: 1,
                    spans: vec![Span::plain("Title")]
                },
                Block::Paragraph(vec![Span::plain("Hello")]),
                Block::Heading {
                    level: 2,
                    spans: vec![Span::plain("Sub")]
                },
            ]
        );
        assert_eq!(first_heading(&blocks).as_deref(), Some("Title"));
    }

    #[test]
    fn inline_styles_are_tracked() {
        let blocks = parse_blocks("a **b *c*** `d` [e](https://x.y)").unwrap();
        let Block::Paragraph(spans) = &blocks[0] else {
            panic!("expected paragraph, got {blocks:?}");
        };
        let bold_italic = spans.iter().find(|s| s.text == "c").unwrap();
        assert!(bold_italic.style.bold && bold_italic.style.italic);
        assert!(spans.iter().any(|s| s.text == "d" && s.style.code));
        assert!(spans.iter().any(|s| s.text == "e" && s.style.link));
    }

    #[test]
    fn code_blocks_keep_language_and_text() {
        let blocks = parse_blocks("```rust\nfn main() {}\n```").unwrap();
        assert_eq!(
            blocks,
            vec![Block::Code {
                lang: Some("rust".into()),
                text: "fn main() {}".into()
            }]
        );
    }

    #[test]
    fn lists_tables_quotes_rules() {
        let md = "- one\n- two\n\n3. three\n\n> quoted\n\n---\n\n| A | B |\n|---|---|\n| 1 | 2 |\n";
        let blocks = parse_blocks(md).unwrap();
        assert!(matches!(&blocks[0], Block::List { ordered: false, items, .. } if items.len() == 2));
        assert!(matches!(&blocks[1], Block::List { ordered: true, start: 3, .. }));
        assert!(matches!(&blocks[2], Block::Quote(inner) if inner.len() == 1));
        assert_eq!(blocks[3], Block::Rule);
        let Block::Table { header, rows } = &blocks[4] else {
            panic!("expected table, got {:?}", blocks[4]);
        };
        assert_eq!(header.len(), 2);
        assert_eq!(rows.len(), 1);
        assert_eq!(plain_text(&rows[0][1]), "2");
    }

    #[test]
    fn lone_image_becomes_image_block() {
        let blocks = parse_blocks("![A chart](https://x.y/c.png)").unwrap();
        assert_eq!(
            blocks,
            vec![Block::Image {
                alt: "A chart".into(),
                url: "https://x.y/c.png".into()
            }]
        );
    }

    #[test]
    fn task_items_get_a_marker() {
        let blocks = parse_blocks("- [x] done\n- [ ] todo\n").unwrap();
        let Block::List { items, .. } = &blocks[0] else {
            panic!("expected list");
        };
        let Block::Paragraph(spans) = &items[0][0] else {
            panic!("expected paragraph");
        };
        assert_eq!(plain_text(spans), "[x] done");
    }

    #[test]
    fn raw_html_is_reduced_to_text() {
        let blocks = parse_blocks("<div><b>Bold</b> words</div>\n").unwrap();
        assert_eq!(blocks, vec![Block::Paragraph(vec![Span::plain("Bold words")])]);
    }

    #[test]
    fn empty_input_has_no_blocks() {
        assert!(parse_blocks("").unwrap().is_empty());
        assert_eq!(first_heading(&[]), None);
    }
}
