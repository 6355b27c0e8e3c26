//! Cross-group page alignment
//!
//! Two single-document groups align by position. Any other combination
//! aligns by filename key. Entries hold indices into the groups' page
//! vectors rather than the pages themselves.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::extract::{page_key, ExtractedGroup, GroupKind, GroupSide, IssueKind, Page, UploadIssue};
use crate::natural::NaturalKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlignMode {
    Positional,
    Keyed,
}

/// One row of the comparison: a matched pair, a one-sided page, or a
/// document that failed extraction
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedEntry {
    pub key: String,
    pub display: String,
    pub a: Option<usize>,
    pub b: Option<usize>,
    pub error: Option<String>,
}

impl AlignedEntry {
    pub fn is_matched(&self) -> bool {
        self.error.is_none() && self.a.is_some() && self.b.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Alignment {
    pub mode: AlignMode,
    pub entries: Vec<AlignedEntry>,
}

impl Alignment {
    pub fn matched_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_matched()).count()
    }
}

/// Align two extracted groups
pub fn align(a: &ExtractedGroup, b: &ExtractedGroup) -> Alignment {
    if a.kind == GroupKind::SingleMultiPage && b.kind == GroupKind::SingleMultiPage {
        align_positional(a, b)
    } else {
        align_keyed(a, b)
    }
}

fn align_positional(a: &ExtractedGroup, b: &ExtractedGroup) -> Alignment {
    let mut entries = Vec::new();

    for (side, group) in [(GroupSide::A, a), (GroupSide::B, b)] {
        for failure in &group.failures {
            entries.push(AlignedEntry {
                key: failure.key.clone(),
                display: failure.filename.clone(),
                a: None,
                b: None,
                error: Some(format!("{}: {}", side, failure.reason)),
            });
        }
    }

    // Two one-page documents keep the uploaded name instead of a page number
    let one_page_each = a.pages.len() <= 1 && b.pages.len() <= 1;
    let len = a.pages.len().max(b.pages.len());
    for i in 0..len {
        let key = page_key(i);
        let display = match a.pages.get(i).or_else(|| b.pages.get(i)) {
            Some(page) if one_page_each => page.label.clone(),
            _ => format!("page-{}", key),
        };
        entries.push(AlignedEntry {
            display,
            key,
            a: (i < a.pages.len()).then_some(i),
            b: (i < b.pages.len()).then_some(i),
            error: None,
        });
    }

    Alignment {
        mode: AlignMode::Positional,
        entries,
    }
}

/// Filename key used when a group takes part in keyed alignment.
///
/// A lone multi-page document contributes `name#0001`, `name#0002`, ...
fn keyed_key(group: &ExtractedGroup, page: &Page) -> String {
    if group.kind == GroupKind::SingleMultiPage && group.pages.len() > 1 {
        format!("{}#{}", page.source, page.key)
    } else {
        page.source.clone()
    }
}

#[derive(Default)]
struct Slot {
    a: Option<usize>,
    b: Option<usize>,
    errors: Vec<String>,
}

fn align_keyed(a: &ExtractedGroup, b: &ExtractedGroup) -> Alignment {
    let mut slots: BTreeMap<NaturalKey, Slot> = BTreeMap::new();

    for (side, group) in [(GroupSide::A, a), (GroupSide::B, b)] {
        for (idx, page) in group.pages.iter().enumerate() {
            let slot = slots.entry(NaturalKey::new(keyed_key(group, page))).or_default();
            match side {
                GroupSide::A => slot.a = Some(idx),
                GroupSide::B => slot.b = Some(idx),
            }
        }
        for failure in &group.failures {
            slots
                .entry(NaturalKey::new(failure.key.clone()))
                .or_default()
                .errors
                .push(format!("{}: {}", side, failure.reason));
        }
    }

    let entries = slots
        .into_iter()
        .map(|(key, slot)| {
            let key = key.into_string();
            let error = (!slot.errors.is_empty()).then(|| slot.errors.join("; "));
            AlignedEntry {
                display: key.clone(),
                key,
                a: slot.a,
                b: slot.b,
                error,
            }
        })
        .collect();

    Alignment {
        mode: AlignMode::Keyed,
        entries,
    }
}

/// Warnings for one-sided entries, raised before the diff runs
pub fn mismatch_issues(alignment: &Alignment, a: &ExtractedGroup, b: &ExtractedGroup) -> Vec<UploadIssue> {
    match alignment.mode {
        AlignMode::Positional => {
            let (la, lb) = (a.pages.len(), b.pages.len());
            if la == lb {
                return Vec::new();
            }
            let longer = if la > lb { GroupSide::A } else { GroupSide::B };
            vec![UploadIssue::new(
                longer,
                None,
                IssueKind::AlignmentMismatch,
                format!(
                    "page count differs: A has {}, B has {}; {} trailing page(s) have no counterpart",
                    la,
                    lb,
                    la.abs_diff(lb)
                ),
            )]
        }
        AlignMode::Keyed => alignment
            .entries
            .iter()
            .filter(|e| e.error.is_none())
            .filter_map(|e| match (e.a, e.b) {
                (Some(_), None) => Some((GroupSide::A, GroupSide::B, e)),
                (None, Some(_)) => Some((GroupSide::B, GroupSide::A, e)),
                _ => None,
            })
            .map(|(side, other, e)| {
                UploadIssue::new(
                    side,
                    Some(e.key.as_str()),
                    IssueKind::AlignmentMismatch,
                    format!("no counterpart in group {}", other),
                )
            })
            .collect(),
    }
}
