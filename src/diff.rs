//! Pixel-level page comparison
//!
//! Both rasters are laid onto a shared canvas (the bounding rectangle,
//! filled with [`raster::BACKGROUND`]) and compared pixel by pixel. A pixel
//! differs when any RGB channel moves by more than the tolerance. Counting is
//! done in integers, so identical input always yields an identical
//! percentage no matter how the work is scheduled.

use image::{Rgb, RgbImage};
use rayon::prelude::*;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{Error, Result};
use crate::raster;

/// Highlight colour for differing pixels
pub const MARKER: Rgb<u8> = Rgb([255, 0, 0]);

/// Rows between deadline checks
const ROW_BAND: u32 = 64;

/// Cooperative time bound for a diff run
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
    limit: Duration,
}

impl Deadline {
    pub fn after(limit: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(limit),
            limit,
        }
    }

    pub fn none() -> Self {
        Self {
            at: None,
            limit: Duration::ZERO,
        }
    }

    pub fn check(&self) -> Result<()> {
        match self.at {
            Some(at) if Instant::now() >= at => Err(Error::Timeout(self.limit.as_secs())),
            _ => Ok(()),
        }
    }
}

/// Outcome of comparing one page pair
#[derive(Debug, Clone, PartialEq)]
pub struct PixelDiff {
    pub width: u32,
    pub height: u32,
    pub differing: u64,
    pub total: u64,
    /// 0.0 to 100.0, rounded to 4 decimals
    pub percentage: f64,
    /// Present only when at least one pixel differs
    pub overlay: Option<RgbImage>,
}

impl PixelDiff {
    pub fn is_unchanged(&self) -> bool {
        self.differing == 0
    }
}

/// Round to 4 decimals; a nonzero count never reports as exactly zero
pub fn percentage(differing: u64, total: u64) -> f64 {
    if total == 0 || differing == 0 {
        return 0.0;
    }
    let raw = differing as f64 * 100.0 / total as f64;
    let rounded = (raw * 10_000.0).round() / 10_000.0;
    if rounded == 0.0 {
        0.0001
    } else {
        rounded
    }
}

#[inline]
fn pixel_or_background(img: &RgbImage, x: u32, y: u32) -> Rgb<u8> {
    if x < img.width() && y < img.height() {
        *img.get_pixel(x, y)
    } else {
        raster::BACKGROUND
    }
}

#[inline]
fn differs(a: &Rgb<u8>, b: &Rgb<u8>, tolerance: u8) -> bool {
    a.0.iter()
        .zip(b.0.iter())
        .any(|(x, y)| x.abs_diff(*y) > tolerance)
}

/// Muted grayscale so the marker stays legible
#[inline]
fn muted(px: &Rgb<u8>) -> Rgb<u8> {
    let [r, g, b] = px.0;
    let luma = (299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000;
    let v = (luma / 2 + 128) as u8;
    Rgb([v, v, v])
}

/// Compare one pair of rasters
pub fn compare_pages(a: &RgbImage, b: &RgbImage, tolerance: u8, deadline: &Deadline) -> Result<PixelDiff> {
    let width = a.width().max(b.width());
    let height = a.height().max(b.height());
    let mut overlay = RgbImage::new(width, height);
    let mut differing = 0u64;

    for y in 0..height {
        if y % ROW_BAND == 0 {
            deadline.check()?;
        }
        for x in 0..width {
            let pa = pixel_or_background(a, x, y);
            let pb = pixel_or_background(b, x, y);
            if differs(&pa, &pb, tolerance) {
                differing += 1;
                overlay.put_pixel(x, y, MARKER);
            } else {
                overlay.put_pixel(x, y, muted(&pb));
            }
        }
    }

    let total = width as u64 * height as u64;
    Ok(PixelDiff {
        width,
        height,
        differing,
        total,
        percentage: percentage(differing, total),
        overlay: (differing > 0).then_some(overlay),
    })
}

/// Index-tagged unit of work; `index` is the alignment entry position
pub struct DiffJob<'a> {
    pub index: usize,
    pub a: &'a RgbImage,
    pub b: &'a RgbImage,
}

/// Runs page comparisons on a bounded worker pool
pub struct DiffEngine {
    tolerance: u8,
    pool: rayon::ThreadPool,
}

impl DiffEngine {
    /// `worker_threads == 0` lets rayon size the pool from the CPU count
    pub fn new(tolerance: u8, worker_threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .thread_name(|i| format!("pagediff-worker-{}", i))
            .build()
            .map_err(|e| Error::General(format!("failed to build diff worker pool: {}", e)))?;
        Ok(Self { tolerance, pool })
    }

    pub fn tolerance(&self) -> u8 {
        self.tolerance
    }

    pub fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Compare every job; results come back sorted by job index regardless
    /// of completion order. Any timeout fails the whole run.
    pub fn run(&self, jobs: &[DiffJob<'_>], deadline: Deadline) -> Result<Vec<(usize, PixelDiff)>> {
        let tolerance = self.tolerance;
        let mut results: Vec<(usize, Result<PixelDiff>)> = self.pool.install(|| {
            jobs.par_iter()
                .map(|job| {
                    let started = Instant::now();
                    let res = deadline
                        .check()
                        .and_then(|_| compare_pages(job.a, job.b, tolerance, &deadline));
                    debug!(
                        entry = job.index,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Compared page pair"
                    );
                    (job.index, res)
                })
                .collect()
        });
        results.sort_by_key(|(idx, _)| *idx);

        let mut out = Vec::with_capacity(results.len());
        for (idx, res) in results {
            out.push((idx, res?));
        }
        Ok(out)
    }
}
