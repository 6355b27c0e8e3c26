//! Integration tests for the page diff engine

use image::{Rgb, RgbImage};
use lopdf::{dictionary, Document, Object, Stream};
use std::sync::Arc;
use tempfile::TempDir;

use pdf_pagediff::extract::IssueKind;
use pdf_pagediff::pdf::{count_pages, PageRenderer};
use pdf_pagediff::{raster, CheckPagesRequest, ComparisonEngine, EngineConfig, Error, Status, Upload};

/// Renders each PDF page as a flat gray square whose level is the page's
/// MediaBox width, so tests can encode page content in the PDF itself.
struct ShadeRenderer;

impl PageRenderer for ShadeRenderer {
    fn render(&self, bytes: &[u8], _dpi: u32, last_page: Option<usize>) -> pdf_pagediff::Result<Vec<RgbImage>> {
        let doc = Document::load_mem(bytes)?;
        let limit = last_page.unwrap_or(usize::MAX);
        let mut pages = Vec::new();
        for (_, page_id) in doc.get_pages().into_iter().take(limit) {
            let media_box = doc.get_dictionary(page_id)?.get(b"MediaBox")?.as_array()?;
            let shade = media_box[2].as_i64()? as u8;
            pages.push(RgbImage::from_pixel(8, 8, Rgb([shade, shade, shade])));
        }
        Ok(pages)
    }
}

/// One page per entry; each page's MediaBox width is its shade
fn shaded_pdf(shades: &[u8]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    for &shade in shades {
        let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(shade as i64),
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
            "Count" => shades.len() as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("Failed to save PDF");
    bytes
}

fn png(shade: u8) -> Vec<u8> {
    raster::to_png(&RgbImage::from_pixel(8, 8, Rgb([shade, shade, shade]))).expect("Failed to encode PNG")
}

fn engine() -> ComparisonEngine {
    ComparisonEngine::with_renderer(EngineConfig::default(), Arc::new(ShadeRenderer)).expect("Failed to build engine")
}

#[test]
fn test_pdf_revisions_compare_by_position() {
    let engine = engine();
    let checked = engine
        .check_pages(CheckPagesRequest {
            files_a: vec![Upload::new("report-v1.pdf", shaded_pdf(&[10, 20, 30]))],
            files_b: vec![Upload::new("report-v2.pdf", shaded_pdf(&[10, 99, 30, 40]))],
        })
        .expect("Failed to check pages");

    assert_eq!(checked.group_file_count_a, 3);
    assert_eq!(checked.group_file_count_b, 4);
    assert!(checked
        .upload_issues
        .iter()
        .any(|i| i.kind == IssueKind::AlignmentMismatch));

    let report = engine.diff(checked.session_id.as_str()).expect("Failed to diff");
    let rows: Vec<(&str, Status)> = report
        .results
        .iter()
        .map(|r| (r.filename.as_str(), r.status))
        .collect();
    assert_eq!(
        rows,
        vec![
            ("page-0001", Status::Unchanged),
            ("page-0002", Status::Changed),
            ("page-0003", Status::Unchanged),
            ("page-0004", Status::AddedInB),
        ]
    );
    assert_eq!(report.results[1].difference_percentage, Some(100.0));
    assert!(report.results[3].difference_percentage.is_none());
}

#[test]
fn test_image_folders_match_by_name_with_a_corrupt_file() {
    let engine = engine();
    let corrupt = b"\x89PNG\r\n\x1a\nthis is not really a png".to_vec();
    let checked = engine
        .check_pages(CheckPagesRequest {
            files_a: vec![
                Upload::new("page10.png", png(200)),
                Upload::new("page9.png", png(50)),
                Upload::new("page2.png", corrupt),
            ],
            files_b: vec![
                Upload::new("page9.png", png(50)),
                Upload::new("page10.png", png(0)),
                Upload::new("page2.png", png(50)),
            ],
        })
        .expect("Failed to check pages");

    assert_eq!(checked.file_names_a, vec!["page2.png", "page9.png", "page10.png"]);
    assert!(checked
        .upload_issues
        .iter()
        .any(|i| i.kind == IssueKind::UnsupportedFormat && i.filename.as_deref() == Some("page2.png")));

    let report = engine.diff(checked.session_id.as_str()).expect("Failed to diff");
    let rows: Vec<(&str, Status)> = report
        .results
        .iter()
        .map(|r| (r.filename.as_str(), r.status))
        .collect();
    assert_eq!(
        rows,
        vec![
            ("page2.png", Status::Error),
            ("page9.png", Status::Unchanged),
            ("page10.png", Status::Changed),
        ]
    );
    assert!(report.results[0].error.is_some());
}

#[test]
fn test_single_images_keep_their_names() {
    let engine = engine();
    let checked = engine
        .check_pages(CheckPagesRequest {
            files_a: vec![Upload::new("scan.png", png(10))],
            files_b: vec![Upload::new("scan.png", png(200))],
        })
        .expect("Failed to check pages");
    assert_eq!(checked.file_names_a, vec!["scan.png"]);

    let report = engine.diff(checked.session_id.as_str()).expect("Failed to diff");
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].filename, "scan.png");
    assert_eq!(report.results[0].status, Status::Changed);
}

#[test]
fn test_one_sided_files_are_reported() {
    let engine = engine();
    let checked = engine
        .check_pages(CheckPagesRequest {
            files_a: vec![Upload::new("a.png", png(1)), Upload::new("b.png", png(2))],
            files_b: vec![Upload::new("b.png", png(2)), Upload::new("c.png", png(3))],
        })
        .expect("Failed to check pages");

    let report = engine.diff(checked.session_id.as_str()).expect("Failed to diff");
    let statuses: Vec<Status> = report.results.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![Status::RemovedFromA, Status::Unchanged, Status::AddedInB]);
    assert!(report.results[0].original_b.is_none());
    assert!(report.results[2].original_a.is_none());
}

#[test]
fn test_repeat_diff_is_stable_and_encodes_images() {
    let engine = engine();
    let checked = engine
        .check_pages(CheckPagesRequest {
            files_a: vec![Upload::new("old.pdf", shaded_pdf(&[0, 120]))],
            files_b: vec![Upload::new("new.pdf", shaded_pdf(&[0, 250]))],
        })
        .expect("Failed to check pages");
    let id = checked.session_id.as_str();

    let first = engine.diff_response(id).expect("Failed to diff");
    let second = engine.diff_response(id).expect("Failed to diff again");
    let pct = |r: &pdf_pagediff::DiffResponse| -> Vec<Option<f64>> {
        r.results.iter().map(|e| e.difference_percentage).collect()
    };
    assert_eq!(pct(&first), pct(&second));
    assert_eq!(first.results[1].diff_image, second.results[1].diff_image);

    let changed = &first.results[1];
    assert_eq!(changed.status, Status::Changed);
    for uri in [&changed.diff_image, &changed.original_a, &changed.original_b] {
        let uri = uri.as_deref().expect("image present");
        assert!(uri.starts_with("data:image/png;base64,"));
    }
    assert!(first.results[0].diff_image.is_none());
}

#[test]
fn test_clear_session_lifecycle() {
    let engine = engine();
    let checked = engine
        .check_pages(CheckPagesRequest {
            files_a: vec![Upload::new("a.png", png(1))],
            files_b: vec![Upload::new("a.png", png(1))],
        })
        .expect("Failed to check pages");
    let id = checked.session_id.as_str().to_string();
    assert!(engine.store().used_bytes() > 0);

    engine.clear_session(&id).expect("Failed to clear");
    engine.clear_session(&id).expect("Second clear should succeed");
    engine.clear_session("never-issued").expect("Unknown id should succeed");

    assert!(matches!(engine.diff(&id), Err(Error::SessionNotFound(_))));
    assert_eq!(engine.store().used_bytes(), 0);
    assert!(engine.store().is_empty());
}

#[test]
fn test_count_pages_from_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = temp_dir.path().join("five.pdf");
    std::fs::write(&path, shaded_pdf(&[1, 2, 3, 4, 5])).expect("Failed to write PDF");

    let pages = count_pages(&path).expect("Failed to count pages");
    assert_eq!(pages, 5);
}
