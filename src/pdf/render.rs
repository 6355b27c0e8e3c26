//! PDF rasterization
//!
//! The engine never rasterizes PDF content itself. A [`PageRenderer`] turns
//! a PDF payload into one bitmap per page; the shipped implementation drives
//! poppler's `pdftoppm` in a scratch directory.

use image::RgbImage;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

use crate::error::{Error, Result};
use crate::natural;

/// Turns a PDF payload into page bitmaps.
///
/// Implementations must return pages in document order and must be
/// deterministic: identical input and DPI give identical rasters.
pub trait PageRenderer: Send + Sync {
    /// Render pages `1..=last_page` (all pages when `None`)
    fn render(&self, bytes: &[u8], dpi: u32, last_page: Option<usize>) -> Result<Vec<RgbImage>>;
}

/// Renderer backed by the `pdftoppm` executable
#[derive(Debug, Clone)]
pub struct PdftoppmRenderer {
    program: PathBuf,
}

impl PdftoppmRenderer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for PdftoppmRenderer {
    fn default() -> Self {
        Self::new("pdftoppm")
    }
}

const OUTPUT_PREFIX: &str = "page";

impl PageRenderer for PdftoppmRenderer {
    fn render(&self, bytes: &[u8], dpi: u32, last_page: Option<usize>) -> Result<Vec<RgbImage>> {
        let dir = tempfile::TempDir::new()?;
        let input = dir.path().join("input.pdf");
        std::fs::write(&input, bytes)?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("-r").arg(dpi.to_string()).arg("-png");
        if let Some(last) = last_page {
            cmd.arg("-f").arg("1").arg("-l").arg(last.to_string());
        }
        cmd.arg(&input).arg(dir.path().join(OUTPUT_PREFIX));

        debug!(program = %self.program.display(), dpi, "Running PDF renderer");
        let output = cmd.output().map_err(|e| {
            Error::Render(format!("failed to run {}: {}", self.program.display(), e))
        })?;

        if !output.status.success() {
            return Err(Error::Render(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        collect_rendered_pages(dir.path(), OUTPUT_PREFIX)
    }
}

/// Load `<prefix>-N.png` files from `dir` in page order.
///
/// pdftoppm zero-pads page numbers to the width of the page count, so
/// natural ordering is used rather than relying on the padding.
fn collect_rendered_pages(dir: &Path, prefix: &str) -> Result<Vec<RgbImage>> {
    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(prefix) && name.ends_with(".png"))
        .collect();
    natural::sort(&mut names);

    if names.is_empty() {
        return Err(Error::Render("renderer produced no pages".to_string()));
    }

    names
        .iter()
        .map(|name| Ok(image::open(dir.join(name))?.to_rgb8()))
        .collect()
}
