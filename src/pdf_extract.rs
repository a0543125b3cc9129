// src/pdf_extract.rs

use lopdf::{Document, Object};
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{info, warn};

static PRODUCT_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"P\d+").expect("product number pattern is valid"));

static STORE_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Store\s+(\d+)").expect("store title pattern is valid"));

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to parse PDF: {0}")]
    Decode(#[from] lopdf::Error),

    #[error("Failed to extract PDF text: {0}")]
    Text(String),
}

/// Everything the pipeline needs from one uploaded count sheet.
#[derive(Debug, Clone)]
pub struct ParsedPdf {
    pub page_count: usize,
    /// All pages, each prefixed with a `--- Page N ---` marker.
    pub text: String,
    /// Document information dictionary (`/Info`), e.g. `Title`, `Producer`.
    pub metadata: Map<String, Value>,
    /// One string per product-number token, in order of appearance.
    pub rows: Vec<String>,
    /// `Store <digits>` found on the first page.
    pub store_title: Option<String>,
}

impl ParsedPdf {
    /// Title recorded with the upload: the store title, else the document's own `Title`.
    pub fn title(&self) -> Option<String> {
        self.store_title.clone().or_else(|| {
            self.metadata
                .get("Title")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        })
    }
}

/// Main entry point: takes raw PDF bytes and returns the per-page text split
/// into product rows. A document without product numbers is not an error.
pub fn extract_document(pdf_bytes: &[u8]) -> Result<ParsedPdf, ExtractError> {
    let doc = Document::load_mem(pdf_bytes)?;
    let pages = doc.get_pages();
    let page_count = pages.len();

    let mut page_texts = Vec::with_capacity(page_count);
    let mut failed_pages = 0;
    for page_num in pages.keys() {
        match doc.extract_text(&[*page_num]) {
            Ok(raw) => page_texts.push(join_fragments(&raw)),
            Err(e) => {
                warn!(page = page_num, error = %e, "Page text extraction failed");
                failed_pages += 1;
                page_texts.push(String::new());
            }
        }
    }

    if page_count > 0 && failed_pages == page_count {
        warn!("No page could be read with lopdf, falling back to pdf-extract");
        let raw = pdf_extract::extract_text_from_mem(pdf_bytes)
            .map_err(|e| ExtractError::Text(e.to_string()))?;
        page_texts = vec![join_fragments(&raw)];
    }

    let mut full_text = String::new();
    for (idx, page_text) in page_texts.iter().enumerate() {
        full_text.push_str(&format!("--- Page {} ---\n{}\n\n", idx + 1, page_text));
    }
    let text = full_text.trim().to_string();

    let rows = split_into_product_rows(&text);
    // only the first page carries the store header
    let store_title = page_texts.first().and_then(|page| extract_store_title(page));
    let metadata = document_info(&doc);

    info!(
        pages = page_count,
        chars = text.len(),
        rows = rows.len(),
        store_title = ?store_title,
        "PDF text extracted"
    );

    Ok(ParsedPdf {
        page_count,
        text,
        metadata,
        rows,
        store_title,
    })
}

/// Collapse the fragments of a page into one line separated by single spaces.
fn join_fragments(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut the text at every `P<digits>` token: each row runs from one token to
/// the next (or to the end of the text).
pub fn split_into_product_rows(text: &str) -> Vec<String> {
    let starts: Vec<usize> = PRODUCT_NUMBER.find_iter(text).map(|m| m.start()).collect();

    starts
        .iter()
        .enumerate()
        .filter_map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            let row = text[start..end].trim();
            (!row.is_empty()).then(|| row.to_string())
        })
        .collect()
}

pub fn extract_store_title(first_page_text: &str) -> Option<String> {
    STORE_TITLE
        .captures(first_page_text)
        .map(|c| format!("Store {}", &c[1]))
}

/// Read the trailer's `/Info` dictionary into JSON. Missing or malformed
/// info yields an empty map.
fn document_info(doc: &Document) -> Map<String, Value> {
    let mut out = Map::new();

    let Some(info) = doc
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|obj| doc.dereference(obj).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
    else {
        return out;
    };

    for (key, obj) in info.iter() {
        let resolved = doc.dereference(obj).map(|(_, o)| o).unwrap_or(obj);
        if let Some(value) = info_value(resolved) {
            out.insert(String::from_utf8_lossy(key).into_owned(), value);
        }
    }
    out
}

fn info_value(obj: &Object) -> Option<Value> {
    match obj {
        Object::String(bytes, _) => Some(Value::String(decode_pdf_string(bytes))),
        Object::Name(name) => Some(Value::String(String::from_utf8_lossy(name).into_owned())),
        Object::Integer(i) => Some(Value::Number((*i).into())),
        Object::Real(r) => Number::from_f64(f64::from(*r)).map(Value::Number),
        Object::Boolean(b) => Some(Value::Bool(*b)),
        _ => None,
    }
}

/// PDF text strings are UTF-16BE with a BOM, or a single-byte encoding.
fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(utf8) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(utf8).into_owned();
    }
    bytes.iter().map(|&b| b as char).collect()
}
