//! Document outline (bookmarks) for a finished PDF.
//!
//! printpdf 0.7 keeps at most one bookmark per page and cannot nest them, so
//! the outline is written afterwards into the saved bytes with lopdf (the
//! object model printpdf serialises through). Each heading becomes one item,
//! nested under the closest preceding heading of a lower level, with an
//! `/XYZ` destination at the heading's position on its page.
//!
//! [`read_outline`] walks the tree back out of a PDF so callers can check what
//! a file actually contains.

use crate::error::Article2PdfError;
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// One entry of the document outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TocEntry {
    /// Heading level, 1–6.
    pub level: u8,
    pub title: String,
    /// 1-indexed page the heading starts on.
    pub page: usize,
}

/// A heading placed by the layout, with its vertical position.
#[derive(Debug, Clone)]
pub(crate) struct OutlineItem {
    pub entry: TocEntry,
    /// Top edge of the heading, points above the bottom of the page.
    pub top_pt: f32,
}

/// One item read back from a PDF outline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineNode {
    /// Nesting depth; top-level items are 1.
    pub depth: usize,
    pub title: String,
    /// 1-indexed page the item's destination points at.
    pub page: Option<usize>,
}

fn pdf_error(e: lopdf::Error) -> Article2PdfError {
    Article2PdfError::PdfRender(format!("outline: {e}"))
}

/// Parent of each item: the nearest earlier item with a lower level.
fn nest(items: &[OutlineItem]) -> Vec<Option<usize>> {
    let mut stack: Vec<usize> = Vec::new();
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            while let Some(&top) = stack.last() {
                if items[top].entry.level >= item.entry.level {
                    stack.pop();
                } else {
                    break;
                }
            }
            let parent = stack.last().copied();
            stack.push(i);
            parent
        })
        .collect()
}

/// PDF text string: literal for ASCII, UTF-16BE with a byte-order mark
/// otherwise.
fn text_string(s: &str) -> Object {
    if s.is_ascii() {
        return Object::string_literal(s);
    }
    let mut buf = vec![0xFE, 0xFF];
    for unit in s.encode_utf16() {
        buf.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(buf, StringFormat::Hexadecimal)
}

fn decode_text(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Add an outline holding `items` (in document order) to a saved PDF.
///
/// Returns the bytes unchanged when there is nothing to add.
pub(crate) fn write_outline(
    bytes: Vec<u8>,
    items: &[OutlineItem],
) -> Result<Vec<u8>, Article2PdfError> {
    if items.is_empty() {
        return Ok(bytes);
    }
    let mut pdf = Document::load_mem(&bytes).map_err(pdf_error)?;
    let pages = pdf.get_pages();

    let parents = nest(items);
    let n = items.len();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut roots = Vec::new();
    for (i, parent) in parents.iter().enumerate() {
        match parent {
            Some(p) => children[*p].push(i),
            None => roots.push(i),
        }
    }
    let mut prev = vec![None; n];
    let mut next = vec![None; n];
    for siblings in children.iter().chain(std::iter::once(&roots)) {
        for pair in siblings.windows(2) {
            next[pair[0]] = Some(pair[1]);
            prev[pair[1]] = Some(pair[0]);
        }
    }
    // Children always come after their parent.
    let mut descendants = vec![0_i64; n];
    for i in (0..n).rev() {
        descendants[i] = children[i].iter().map(|&c| 1 + descendants[c]).sum();
    }

    let outlines_id = pdf
        .catalog()
        .ok()
        .and_then(|catalog| catalog.get(b"Outlines").ok())
        .and_then(|o| o.as_reference().ok());
    let root_id = match outlines_id {
        Some(id) => id,
        None => pdf.new_object_id(),
    };
    let ids: Vec<ObjectId> = (0..n).map(|_| pdf.new_object_id()).collect();

    for (i, item) in items.iter().enumerate() {
        let page_id = u32::try_from(item.entry.page)
            .ok()
            .and_then(|p| pages.get(&p).copied())
            .ok_or_else(|| {
                Article2PdfError::PdfRender(format!(
                    "outline entry '{}' points at missing page {}",
                    item.entry.title, item.entry.page
                ))
            })?;

        let mut dict = Dictionary::new();
        dict.set("Title", text_string(&item.entry.title));
        dict.set("Parent", parents[i].map_or(root_id, |p| ids[p]));
        dict.set(
            "Dest",
            vec![
                page_id.into(),
                Object::Name(b"XYZ".to_vec()),
                Object::Null,
                item.top_pt.into(),
                Object::Null,
            ],
        );
        if let Some(p) = prev[i] {
            dict.set("Prev", ids[p]);
        }
        if let Some(nx) = next[i] {
            dict.set("Next", ids[nx]);
        }
        if let (Some(&first), Some(&last)) = (children[i].first(), children[i].last()) {
            dict.set("First", ids[first]);
            dict.set("Last", ids[last]);
            dict.set("Count", descendants[i]);
        }
        pdf.objects.insert(ids[i], Object::Dictionary(dict));
    }

    let mut root = Dictionary::new();
    root.set("Type", Object::Name(b"Outlines".to_vec()));
    if let (Some(&first), Some(&last)) = (roots.first(), roots.last()) {
        root.set("First", ids[first]);
        root.set("Last", ids[last]);
    }
    root.set("Count", n as i64);
    pdf.objects.insert(root_id, Object::Dictionary(root));

    let catalog = pdf.catalog_mut().map_err(pdf_error)?;
    catalog.set("Outlines", root_id);
    catalog.set("PageMode", Object::Name(b"UseOutlines".to_vec()));

    let mut out = Vec::with_capacity(bytes.len() + n * 128);
    pdf.save_to(&mut out).map_err(|e| pdf_error(e.into()))?;
    debug!("Wrote {} outline item(s)", n);
    Ok(out)
}

/// Read the outline of a PDF as a flat list in document order.
///
/// A PDF without an outline yields an empty list.
///
/// # Errors
/// [`Article2PdfError::PdfRender`] if the bytes are not a readable PDF or the
/// outline links form a cycle.
pub fn read_outline(bytes: &[u8]) -> Result<Vec<OutlineNode>, Article2PdfError> {
    let pdf = Document::load_mem(bytes).map_err(pdf_error)?;
    let pages: HashMap<ObjectId, usize> = pdf
        .get_pages()
        .into_iter()
        .map(|(number, id)| (id, number as usize))
        .collect();

    let catalog = pdf.catalog().map_err(pdf_error)?;
    let first = match catalog.get(b"Outlines") {
        Ok(obj) => {
            let (_, outlines) = pdf.dereference(obj).map_err(pdf_error)?;
            outlines
                .as_dict()
                .ok()
                .and_then(|d| d.get(b"First").ok())
                .and_then(|f| f.as_reference().ok())
        }
        Err(_) => None,
    };

    let mut nodes = Vec::new();
    let mut seen = HashSet::new();
    walk(&pdf, first, 1, &pages, &mut seen, &mut nodes)?;
    Ok(nodes)
}

fn walk(
    pdf: &Document,
    mut cursor: Option<ObjectId>,
    depth: usize,
    pages: &HashMap<ObjectId, usize>,
    seen: &mut HashSet<ObjectId>,
    out: &mut Vec<OutlineNode>,
) -> Result<(), Article2PdfError> {
    while let Some(id) = cursor {
        if !seen.insert(id) {
            return Err(Article2PdfError::PdfRender(format!(
                "outline item {} {} is linked twice",
                id.0, id.1
            )));
        }
        let dict = pdf.get_dictionary(id).map_err(pdf_error)?;
        let title = dict
            .get(b"Title")
            .and_then(Object::as_str)
            .map(decode_text)
            .unwrap_or_default();
        let page = dict
            .get(b"Dest")
            .and_then(Object::as_array)
            .ok()
            .and_then(|dest| dest.first())
            .and_then(|target| target.as_reference().ok())
            .and_then(|target| pages.get(&target).copied());
        out.push(OutlineNode { depth, title, page });

        let child = dict.get(b"First").and_then(Object::as_reference).ok();
        walk(pdf, child, depth + 1, pages, seen, out)?;
        cursor = dict.get(b"Next").and_then(Object::as_reference).ok();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(level: u8, title: &str) -> OutlineItem {
        OutlineItem {
            entry: TocEntry {
                level,
                title: title.into(),
                page: 1,
            },
            top_pt: 700.0,
        }
    }

    #[test]
    fn nesting_follows_heading_levels() {
        let items = vec![
            item(1, "A"),
            item(2, "A.1"),
            item(3, "A.1.a"),
            item(2, "A.2"),
            item(1, "B"),
            item(3, "B.x"),
        ];
        assert_eq!(
            nest(&items),
            vec![None, Some(0), Some(1), Some(0), None, Some(4)]
        );
    }

    #[test]
    fn document_starting_below_level_one_nests_from_the_root() {
        let items = vec![item(2, "x"), item(2, "y"), item(1, "z")];
        assert_eq!(nest(&items), vec![None, None, None]);
    }

    #[test]
    fn non_ascii_titles_survive_as_utf16() {
        let title = "Caf\u{e9} \u{2014} \u{4e16}\u{754c}";
        let Object::String(bytes, _) = text_string(title) else {
            panic!("expected a string object");
        };
        assert_eq!(&bytes[..2], &[0xFE, 0xFF]);
        assert_eq!(decode_text(&bytes), title);
        assert_eq!(decode_text(b"plain"), "plain");
    }
}
