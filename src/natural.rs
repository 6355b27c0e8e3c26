//! Numeric-aware filename ordering
//!
//! Splits names into alternating digit / non-digit runs so that `page9.png`
//! sorts before `page10.png`. Non-digit runs compare case-insensitively and
//! digit runs compare by numeric value. Names that compare equal on runs
//! (`"A"` vs `"a"`, `"007"` vs `"7"`) fall back to a byte comparison, which
//! makes the result a total order whose equality is plain string equality.

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Run<'a> {
    Digits(&'a str),
    Text(String),
}

fn runs(s: &str) -> Vec<Run<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_digits: Option<bool> = None;

    for (idx, ch) in s.char_indices() {
        let is_digit = ch.is_ascii_digit();
        match in_digits {
            Some(prev) if prev != is_digit => {
                out.push(make_run(&s[start..idx], prev));
                start = idx;
            }
            _ => {}
        }
        in_digits = Some(is_digit);
    }

    if let Some(prev) = in_digits {
        out.push(make_run(&s[start..], prev));
    }

    out
}

fn make_run(slice: &str, digits: bool) -> Run<'_> {
    if digits {
        Run::Digits(slice)
    } else {
        Run::Text(slice.to_lowercase())
    }
}

/// Compare two digit runs by value without parsing (no overflow on long runs)
fn compare_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn compare_runs(a: &Run<'_>, b: &Run<'_>) -> Ordering {
    match (a, b) {
        (Run::Digits(x), Run::Digits(y)) => compare_digits(x, y),
        (Run::Text(x), Run::Text(y)) => x.cmp(y),
        (Run::Digits(_), Run::Text(_)) => Ordering::Less,
        (Run::Text(_), Run::Digits(_)) => Ordering::Greater,
    }
}

/// Natural comparison of two names
pub fn compare(a: &str, b: &str) -> Ordering {
    let ra = runs(a);
    let rb = runs(b);

    for (x, y) in ra.iter().zip(rb.iter()) {
        let ord = compare_runs(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }

    ra.len().cmp(&rb.len()).then_with(|| a.cmp(b))
}

/// Sort names in place by natural order
pub fn sort<S: AsRef<str>>(names: &mut [S]) {
    names.sort_by(|a, b| compare(a.as_ref(), b.as_ref()));
}

/// Owned name ordered by [`compare`]
///
/// Usable as a `BTreeMap` key where alignment needs natural iteration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey(String);

impl NaturalKey {
    pub fn new(name: impl Into<String>) -> Self {
        NaturalKey(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Ord for NaturalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(&self.0, &other.0)
    }
}

impl PartialOrd for NaturalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NaturalKey {
    fn from(s: &str) -> Self {
        NaturalKey(s.to_string())
    }
}
