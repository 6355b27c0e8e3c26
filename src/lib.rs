//! PDF Page Diff Library
//!
//! A library for comparing two groups of documents page by page.
//! This library provides functionality to:
//! - Rasterize PDFs and decode raster images into pages
//! - Align pages across groups by position or by filename
//! - Compute pixel differences with a highlighted overlay
//! - Keep per-session state between the check and diff steps
//!
//! # Example
//!
//! ```no_run
//! use pdf_pagediff::{CheckPagesRequest, ComparisonEngine, EngineConfig, Upload};
//!
//! let engine = ComparisonEngine::new(EngineConfig::default()).expect("engine");
//! let checked = engine
//!     .check_pages(CheckPagesRequest {
//!         files_a: vec![Upload::new("old.pdf", std::fs::read("old.pdf").unwrap())],
//!         files_b: vec![Upload::new("new.pdf", std::fs::read("new.pdf").unwrap())],
//!     })
//!     .expect("check pages");
//!
//! let report = engine.diff(checked.session_id.as_str()).expect("diff");
//! for result in &report.results {
//!     println!("{} {:?}", result.filename, result.status);
//! }
//! engine.clear_session(checked.session_id.as_str()).expect("clear");
//! ```

pub mod align;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod extract;
pub mod logging;
pub mod natural;
pub mod pdf;
pub mod raster;
pub mod result;
pub mod session;
pub mod view;

// Re-export commonly used items
pub use config::EngineConfig;
pub use engine::{CheckPagesRequest, CheckPagesResponse, ComparisonEngine, DiffEntry, DiffResponse};
pub use error::{Error, Result};
pub use extract::Upload;
pub use result::{ComparisonResult, DiffReport, Status};
pub use session::SessionId;
