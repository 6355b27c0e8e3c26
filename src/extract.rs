//! Upload normalization and page extraction
//!
//! Raw uploads are normalized once into a [`FileGroup`]; everything after
//! that works on the typed group. Extraction turns each group into ordered
//! [`Page`]s. A document that cannot be rasterized becomes a
//! [`DocumentFailure`] plus an [`UploadIssue`]; its siblings are unaffected.

use image::{ImageFormat, RgbImage};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::natural;
use crate::pdf::{self, PageRenderer};
use crate::raster;

/// One uploaded file as received from the transport layer
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }
}

/// Which side of the comparison a group belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GroupSide {
    A,
    B,
}

impl fmt::Display for GroupSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupSide::A => f.write_str("A"),
            GroupSide::B => f.write_str("B"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GroupKind {
    /// One document, compared page by page
    SingleMultiPage,
    /// Several documents, one page each, matched by filename
    MultipleSinglePage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Raster(ImageFormat),
    Unknown,
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentFormat::Pdf => f.write_str("pdf"),
            DocumentFormat::Raster(format) => {
                let ext = format.extensions_str().first().copied().unwrap_or("image");
                f.write_str(ext)
            }
            DocumentFormat::Unknown => f.write_str("unknown"),
        }
    }
}

/// Sniff the payload first, then fall back to the file extension
pub fn detect_format(filename: &str, bytes: &[u8]) -> DocumentFormat {
    if pdf::is_pdf(bytes) {
        return DocumentFormat::Pdf;
    }
    if let Ok(format) = image::guess_format(bytes) {
        return DocumentFormat::Raster(format);
    }

    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if ext == "pdf" {
        return DocumentFormat::Pdf;
    }
    match ImageFormat::from_extension(&ext) {
        Some(format) => DocumentFormat::Raster(format),
        None => DocumentFormat::Unknown,
    }
}

/// Strip any client-side directory components and surrounding whitespace
pub fn normalize_filename(name: &str) -> String {
    name.rsplit(['/', '\\']).next().unwrap_or(name).trim().to_string()
}

#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub format: DocumentFormat,
    /// 1 for single images; the catalog count for PDFs (0 if unreadable)
    pub page_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IssueKind {
    UnsupportedFormat,
    MixedFormats,
    DuplicateFilename,
    ExtraPagesIgnored,
    AlignmentMismatch,
}

/// Non-fatal warning reported back from `check_pages`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadIssue {
    pub group: GroupSide,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub kind: IssueKind,
    pub message: String,
}

impl UploadIssue {
    pub fn new(group: GroupSide, filename: Option<&str>, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            group,
            filename: filename.map(str::to_string),
            kind,
            message: message.into(),
        }
    }
}

/// Normalized upload group
#[derive(Debug, Clone)]
pub struct FileGroup {
    pub side: GroupSide,
    pub kind: GroupKind,
    /// In upload order; extraction applies the natural order
    pub documents: Vec<SourceDocument>,
}

impl FileGroup {
    /// Validate and normalize raw uploads.
    ///
    /// Fails with [`Error::Validation`] on an empty group, a nameless file,
    /// or a document over the size/page ceilings. Duplicate filenames keep
    /// the first upload and are reported as issues.
    pub fn from_uploads(
        side: GroupSide,
        uploads: Vec<Upload>,
        config: &EngineConfig,
    ) -> Result<(FileGroup, Vec<UploadIssue>)> {
        if uploads.is_empty() {
            return Err(Error::Validation(format!("group {} has no files", side)));
        }

        let mut issues = Vec::new();
        let mut seen = BTreeSet::new();
        let mut documents = Vec::with_capacity(uploads.len());

        for upload in uploads {
            let filename = normalize_filename(&upload.filename);
            if filename.is_empty() {
                return Err(Error::Validation(format!(
                    "group {} contains a file without a name",
                    side
                )));
            }
            if upload.bytes.len() as u64 > config.max_document_bytes {
                return Err(Error::Validation(format!(
                    "{} is {} bytes, limit is {}",
                    filename,
                    upload.bytes.len(),
                    config.max_document_bytes
                )));
            }
            if !seen.insert(filename.clone()) {
                issues.push(UploadIssue::new(
                    side,
                    Some(filename.as_str()),
                    IssueKind::DuplicateFilename,
                    "duplicate filename in group; only the first upload is used",
                ));
                continue;
            }

            let format = detect_format(&filename, &upload.bytes);
            let page_count = match format {
                DocumentFormat::Pdf => pdf::count_pages_in_memory(&upload.bytes).unwrap_or(0),
                _ => 1,
            };

            documents.push(SourceDocument {
                filename,
                bytes: upload.bytes,
                format,
                page_count,
            });
        }

        let kind = if documents.len() == 1 {
            GroupKind::SingleMultiPage
        } else {
            GroupKind::MultipleSinglePage
        };

        if kind == GroupKind::SingleMultiPage {
            let doc = &documents[0];
            if doc.page_count > config.max_pages_per_document {
                return Err(Error::Validation(format!(
                    "{} has {} pages, limit is {}",
                    doc.filename, doc.page_count, config.max_pages_per_document
                )));
            }
        }

        Ok((FileGroup { side, kind, documents }, issues))
    }

    pub fn payload_bytes(&self) -> u64 {
        self.documents.iter().map(|d| d.bytes.len() as u64).sum()
    }
}

/// One rasterized unit of comparison. Immutable once extracted.
#[derive(Debug, Clone)]
pub struct Page {
    /// Alignment key: zero-padded page index or normalized filename
    pub key: String,
    /// Human-readable name: the filename, with a page suffix for multi-page documents
    pub label: String,
    /// Normalized filename of the source document
    pub source: String,
    pub raster: Arc<RgbImage>,
}

impl Page {
    pub fn raster_bytes(&self) -> u64 {
        self.raster.as_raw().len() as u64
    }
}

/// A document that produced no page
#[derive(Debug, Clone)]
pub struct DocumentFailure {
    pub key: String,
    pub filename: String,
    pub reason: String,
}

/// Output of extracting one group
#[derive(Debug, Clone)]
pub struct ExtractedGroup {
    pub side: GroupSide,
    pub kind: GroupKind,
    pub pages: Vec<Page>,
    pub failures: Vec<DocumentFailure>,
    /// Document names in natural order
    pub file_names: Vec<String>,
    pub issues: Vec<UploadIssue>,
}

impl ExtractedGroup {
    /// Units this group contributes to alignment: pages plus failed documents
    pub fn unit_count(&self) -> usize {
        self.pages.len() + self.failures.len()
    }

    pub fn raster_bytes(&self) -> u64 {
        self.pages.iter().map(Page::raster_bytes).sum()
    }
}

/// Zero-padded page key used for positional alignment
pub fn page_key(index: usize) -> String {
    format!("{:04}", index + 1)
}

pub struct PageExtractor<'a> {
    renderer: &'a dyn PageRenderer,
    dpi: u32,
    max_pages: usize,
}

impl<'a> PageExtractor<'a> {
    /// `max_pages` bounds how many pages a single document may rasterize to
    pub fn new(renderer: &'a dyn PageRenderer, dpi: u32, max_pages: usize) -> Self {
        Self {
            renderer,
            dpi,
            max_pages,
        }
    }

    fn rasterize(&self, doc: &SourceDocument, last_page: Option<usize>) -> Result<Vec<RgbImage>> {
        match doc.format {
            DocumentFormat::Pdf => {
                if doc.page_count == 0 {
                    return Err(Error::UnsupportedFormat {
                        filename: doc.filename.clone(),
                        reason: "unreadable or empty PDF".to_string(),
                    });
                }
                self.renderer.render(&doc.bytes, self.dpi, last_page)
            }
            DocumentFormat::Raster(_) => Ok(vec![raster::decode(&doc.bytes)?]),
            DocumentFormat::Unknown => Err(Error::UnsupportedFormat {
                filename: doc.filename.clone(),
                reason: "not a PDF or a supported image".to_string(),
            }),
        }
    }

    pub fn extract(&self, group: &FileGroup) -> ExtractedGroup {
        let mut out = ExtractedGroup {
            side: group.side,
            kind: group.kind,
            pages: Vec::new(),
            failures: Vec::new(),
            file_names: Vec::new(),
            issues: Vec::new(),
        };

        let mut order: Vec<usize> = (0..group.documents.len()).collect();
        order.sort_by(|&a, &b| {
            natural::compare(&group.documents[a].filename, &group.documents[b].filename)
        });
        out.file_names = order
            .iter()
            .map(|&i| group.documents[i].filename.clone())
            .collect();

        match group.kind {
            GroupKind::SingleMultiPage => self.extract_single(group, &mut out),
            GroupKind::MultipleSinglePage => {
                for &idx in &order {
                    self.extract_one_page(group, idx, &mut out);
                }
                check_mixed_formats(group, &mut out);
            }
        }

        debug!(
            group = %group.side,
            pages = out.pages.len(),
            failures = out.failures.len(),
            "Extracted group"
        );
        out
    }

    fn extract_single(&self, group: &FileGroup, out: &mut ExtractedGroup) {
        let doc = &group.documents[0];
        // One page past the ceiling is enough to tell that the catalog lied
        match self.rasterize(doc, Some(self.max_pages.saturating_add(1))) {
            Ok(rasters) if rasters.len() > self.max_pages => record_failure(
                group.side,
                doc,
                Error::Validation(format!(
                    "{} renders more than {} pages",
                    doc.filename, self.max_pages
                )),
                out,
            ),
            Ok(rasters) => {
                let single = rasters.len() == 1;
                for (page_index, raster) in rasters.into_iter().enumerate() {
                    out.pages.push(Page {
                        key: page_key(page_index),
                        label: if single {
                            doc.filename.clone()
                        } else {
                            format!("{} p.{}", doc.filename, page_index + 1)
                        },
                        source: doc.filename.clone(),
                        raster: Arc::new(raster),
                    });
                }
            }
            Err(e) => record_failure(group.side, doc, e, out),
        }
    }

    fn extract_one_page(&self, group: &FileGroup, idx: usize, out: &mut ExtractedGroup) {
        let doc = &group.documents[idx];
        match self.rasterize(doc, Some(1)) {
            Ok(mut rasters) if !rasters.is_empty() => {
                if doc.page_count > 1 {
                    out.issues.push(UploadIssue::new(
                        group.side,
                        Some(doc.filename.as_str()),
                        IssueKind::ExtraPagesIgnored,
                        format!(
                            "{} pages in a multi-file group; only page 1 is compared",
                            doc.page_count
                        ),
                    ));
                }
                out.pages.push(Page {
                    key: doc.filename.clone(),
                    label: doc.filename.clone(),
                    source: doc.filename.clone(),
                    raster: Arc::new(rasters.swap_remove(0)),
                });
            }
            Ok(_) => record_failure(
                group.side,
                doc,
                Error::Render("renderer produced no pages".to_string()),
                out,
            ),
            Err(e) => record_failure(group.side, doc, e, out),
        }
    }
}

fn record_failure(side: GroupSide, doc: &SourceDocument, err: Error, out: &mut ExtractedGroup) {
    warn!(group = %side, file = %doc.filename, error = %err, "Document could not be rasterized");
    let reason = err.to_string();
    out.issues.push(UploadIssue::new(
        side,
        Some(doc.filename.as_str()),
        IssueKind::UnsupportedFormat,
        reason.clone(),
    ));
    out.failures.push(DocumentFailure {
        key: doc.filename.clone(),
        filename: doc.filename.clone(),
        reason,
    });
}

fn check_mixed_formats(group: &FileGroup, out: &mut ExtractedGroup) {
    let formats: BTreeSet<String> = group
        .documents
        .iter()
        .filter(|d| d.format != DocumentFormat::Unknown)
        .map(|d| d.format.to_string())
        .collect();
    if formats.len() > 1 {
        let list: Vec<String> = formats.into_iter().collect();
        out.issues.push(UploadIssue::new(
            group.side,
            None,
            IssueKind::MixedFormats,
            format!("group mixes formats: {}", list.join(", ")),
        ));
    }
}
