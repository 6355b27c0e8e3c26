//! PDF inspection: page counts and document info from in-memory payloads

use lopdf::{Document, Object};
use std::path::Path;

use crate::error::{Error, Result};

/// True when the payload starts with a PDF header (leading whitespace allowed)
pub fn is_pdf(bytes: &[u8]) -> bool {
    let trimmed = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|start| &bytes[start..])
        .unwrap_or(&[][..]);
    trimmed.starts_with(b"%PDF-")
}

/// Read `/Count` from the root Pages dictionary.
///
/// Nested page trees are counted correctly this way; `get_pages()` is only
/// used as a fallback when the catalog is malformed.
fn count_pages_from_catalog(doc: &Document) -> Result<usize> {
    let catalog_id = match doc.trailer.get(b"Root")? {
        Object::Reference(id) => *id,
        _ => return Err(Error::General("Root is not a reference".to_string())),
    };

    let pages_id = match doc.get_dictionary(catalog_id)?.get(b"Pages")? {
        Object::Reference(id) => *id,
        _ => return Err(Error::General("Pages is not a reference".to_string())),
    };

    match doc.get_dictionary(pages_id)?.get(b"Count")? {
        Object::Integer(n) if *n >= 0 => Ok(*n as usize),
        _ => Err(Error::General("Count is not a non-negative integer".to_string())),
    }
}

fn page_count(doc: &Document) -> usize {
    count_pages_from_catalog(doc).unwrap_or_else(|_| doc.get_pages().len())
}

/// PDF document info
#[derive(Debug, Clone)]
pub struct PdfInfo {
    pub page_count: usize,
    pub version: String,
    pub title: Option<String>,
}

/// Inspect an in-memory PDF
pub fn inspect(bytes: &[u8]) -> Result<PdfInfo> {
    let doc = Document::load_mem(bytes)?;
    let page_count = page_count(&doc);

    let title = doc
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|info| match info {
            Object::Reference(id) => doc.get_dictionary(*id).ok(),
            Object::Dictionary(dict) => Some(dict),
            _ => None,
        })
        .and_then(|dict| dict.get(b"Title").ok())
        .and_then(|obj| obj.as_str().ok())
        .and_then(|raw| String::from_utf8(raw.to_vec()).ok());

    Ok(PdfInfo {
        page_count,
        version: doc.version.clone(),
        title,
    })
}

/// Count the pages of an in-memory PDF
pub fn count_pages_in_memory(bytes: &[u8]) -> Result<usize> {
    let doc = Document::load_mem(bytes)?;
    Ok(page_count(&doc))
}

/// Count the pages of a PDF file
pub fn count_pages(path: &Path) -> Result<usize> {
    let bytes = std::fs::read(path)?;
    count_pages_in_memory(&bytes)
}

/// Build a minimal PDF with `pages` empty pages
#[cfg(test)]
pub(crate) fn blank_pdf(pages: usize) -> Vec<u8> {
    use lopdf::{dictionary, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    for _ in 0..pages {
        let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(100),
                Object::Integer(100),
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
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("save pdf");
    bytes
}
