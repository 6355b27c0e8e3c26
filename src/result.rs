//! Final result list assembly

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::align::Alignment;
use crate::diff::PixelDiff;
use crate::extract::ExtractedGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    Unchanged,
    Changed,
    AddedInB,
    RemovedFromA,
    Error,
}

/// One row of the diff response.
///
/// `difference_percentage` and `diff_image` are both `None` for one-sided
/// and error rows; for matched rows the percentage is set and the overlay is
/// present exactly when the status is `Changed`.
#[derive(Debug, Clone)]
pub struct ComparisonResult {
    pub filename: String,
    pub status: Status,
    pub difference_percentage: Option<f64>,
    pub diff_image: Option<Arc<RgbImage>>,
    pub original_a: Option<Arc<RgbImage>>,
    pub original_b: Option<Arc<RgbImage>>,
    pub error: Option<String>,
}

/// Stored outcome of a diff run
#[derive(Debug, Clone)]
pub struct DiffReport {
    pub results: Vec<ComparisonResult>,
    pub computed_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl DiffReport {
    pub fn count(&self, status: Status) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Bytes held by diff overlays; originals are owned by the extracted groups
    pub fn overlay_bytes(&self) -> u64 {
        self.results
            .iter()
            .filter_map(|r| r.diff_image.as_ref())
            .map(|img| img.as_raw().len() as u64)
            .sum()
    }
}

/// Merge alignment entries and per-pair diffs into ordered results.
///
/// `diffs` is keyed by alignment entry index.
pub fn assemble(
    alignment: &Alignment,
    a: &ExtractedGroup,
    b: &ExtractedGroup,
    diffs: Vec<(usize, PixelDiff)>,
) -> Vec<ComparisonResult> {
    let mut diffs: HashMap<usize, PixelDiff> = diffs.into_iter().collect();

    alignment
        .entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            let original_a = entry.a.map(|i| Arc::clone(&a.pages[i].raster));
            let original_b = entry.b.map(|i| Arc::clone(&b.pages[i].raster));

            let mut result = ComparisonResult {
                filename: entry.display.clone(),
                status: Status::Error,
                difference_percentage: None,
                diff_image: None,
                original_a,
                original_b,
                error: entry.error.clone(),
            };

            if entry.error.is_some() {
                return result;
            }

            match (entry.a, entry.b) {
                (Some(_), Some(_)) => match diffs.remove(&idx) {
                    Some(diff) => {
                        result.difference_percentage = Some(diff.percentage);
                        if diff.is_unchanged() {
                            result.status = Status::Unchanged;
                        } else {
                            result.status = Status::Changed;
                            result.diff_image = diff.overlay.map(Arc::new);
                        }
                    }
                    None => result.error = Some("no diff computed for matched pair".to_string()),
                },
                (Some(_), None) => result.status = Status::RemovedFromA,
                (None, Some(_)) => result.status = Status::AddedInB,
                (None, None) => result.error = Some("empty alignment entry".to_string()),
            }

            result
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::{AlignMode, AlignedEntry};
    use crate::diff::{compare_pages, Deadline};
    use crate::extract::{GroupKind, GroupSide, Page};
    use image::Rgb;

    fn group(side: GroupSide, colors: &[[u8; 3]]) -> ExtractedGroup {
        ExtractedGroup {
            side,
            kind: GroupKind::MultipleSinglePage,
            pages: colors
                .iter()
                .enumerate()
                .map(|(i, c)| Page {
                    key: format!("{}.png", i),
                    label: format!("{}.png", i),
                    source: format!("{}.png", i),
                    raster: Arc::new(RgbImage::from_pixel(2, 2, Rgb(*c))),
                })
                .collect(),
            failures: Vec::new(),
            file_names: Vec::new(),
            issues: Vec::new(),
        }
    }

    fn entry(key: &str, a: Option<usize>, b: Option<usize>, error: Option<&str>) -> AlignedEntry {
        AlignedEntry {
            key: key.to_string(),
            display: key.to_string(),
            a,
            b,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_assemble_all_statuses() {
        let a = group(GroupSide::A, &[[0, 0, 0], [0, 0, 0], [9, 9, 9]]);
        let b = group(GroupSide::B, &[[0, 0, 0], [255, 255, 255], [7, 7, 7]]);
        let alignment = Alignment {
            mode: AlignMode::Keyed,
            entries: vec![
                entry("same", Some(0), Some(0), None),
                entry("changed", Some(1), Some(1), None),
                entry("gone", Some(2), None, None),
                entry("new", None, Some(2), None),
                entry("broken", None, Some(2), Some("A: bad")),
            ],
        };
        let diffs = vec![
            (1, compare_pages(&a.pages[1].raster, &b.pages[1].raster, 30, &Deadline::none()).expect("diff")),
            (0, compare_pages(&a.pages[0].raster, &b.pages[0].raster, 30, &Deadline::none()).expect("diff")),
        ];

        let results = assemble(&alignment, &a, &b, diffs);
        let statuses: Vec<Status> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                Status::Unchanged,
                Status::Changed,
                Status::RemovedFromA,
                Status::AddedInB,
                Status::Error
            ]
        );

        assert_eq!(results[0].difference_percentage, Some(0.0));
        assert!(results[0].diff_image.is_none());
        assert_eq!(results[1].difference_percentage, Some(100.0));
        assert!(results[1].diff_image.is_some());

        assert!(results[2].original_a.is_some() && results[2].original_b.is_none());
        assert!(results[3].original_a.is_none() && results[3].original_b.is_some());
        for r in &results[2..] {
            assert!(r.difference_percentage.is_none());
            assert!(r.diff_image.is_none());
        }
        assert_eq!(results[4].error.as_deref(), Some("A: bad"));
    }
}
