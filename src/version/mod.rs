// src/version/mod.rs

//! Package version ordering and installer name/version decomposition
//!
//! Conda versions are compared component-wise: the string is split on
//! `.`, `_` and `-`, each component further split into numeric and
//! alphabetic runs. Numbers compare numerically and sort after letters,
//! so `1.0a1 < 1.0 < 1.0.1`.

use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Num(u64),
    Text(String),
}

impl Ord for Part {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Part::Num(a), Part::Num(b)) => a.cmp(b),
            (Part::Text(a), Part::Text(b)) => a.cmp(b),
            // Pre-release tags sort before numbers
            (Part::Text(_), Part::Num(_)) => Ordering::Less,
            (Part::Num(_), Part::Text(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Part {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn parts(version: &str) -> Vec<Vec<Part>> {
    version
        .to_lowercase()
        .split(['.', '_', '-'])
        .map(|component| {
            let mut out = Vec::new();
            let mut current = String::new();
            let mut numeric = None;
            for c in component.chars() {
                let is_digit = c.is_ascii_digit();
                if numeric.is_some_and(|n| n != is_digit) {
                    out.push(finish(&current, numeric == Some(true)));
                    current.clear();
                }
                numeric = Some(is_digit);
                current.push(c);
            }
            if !current.is_empty() {
                out.push(finish(&current, numeric == Some(true)));
            }
            out
        })
        .collect()
}

fn finish(run: &str, numeric: bool) -> Part {
    if numeric {
        run.parse().map(Part::Num).unwrap_or_else(|_| Part::Text(run.to_string()))
    } else {
        Part::Text(run.to_string())
    }
}

/// Compare two package versions
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (pa, pb) = (parts(a), parts(b));
    let len = pa.len().max(pb.len());
    for i in 0..len {
        let ca = pa.get(i).map(Vec::as_slice).unwrap_or(&[]);
        let cb = pb.get(i).map(Vec::as_slice).unwrap_or(&[]);
        let n = ca.len().max(cb.len());
        for j in 0..n {
            let ord = match (ca.get(j), cb.get(j)) {
                (Some(x), Some(y)) => x.cmp(y),
                // A missing part equals 0; text is a pre-release of nothing
                (Some(Part::Num(x)), None) => x.cmp(&0),
                (None, Some(Part::Num(y))) => 0.cmp(y),
                (Some(Part::Text(_)), None) => Ordering::Less,
                (None, Some(Part::Text(_))) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
    }
    Ordering::Equal
}

fn numeric_version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^v?\d+(\.\d+)*([._\-+]?[A-Za-z0-9]+)*$").expect("Invalid version regex")
    })
}

/// Split an installer display name into `(name, version)`
///
/// The last whitespace-separated token that starts like a numeric version
/// becomes the version; every other token stays in the name, in order.
/// `"Miniconda 1.2 py313"` gives `("Miniconda py313", "1.2")`.
pub fn split_name_version(full: &str) -> (String, String) {
    let tokens: Vec<&str> = full.split_whitespace().collect();
    let Some(idx) = tokens
        .iter()
        .rposition(|t| numeric_version_re().is_match(t))
    else {
        return (tokens.join(" "), String::new());
    };
    let name: Vec<&str> = tokens
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != idx)
        .map(|(_, t)| *t)
        .collect();
    (name.join(" "), tokens[idx].to_string())
}

/// Major.minor of a version string, e.g. `3.11` for `3.11.4`
pub fn major_minor(version: &str) -> Option<String> {
    let mut it = version.split('.');
    let major = it.next().filter(|s| s.chars().all(|c| c.is_ascii_digit()) && !s.is_empty())?;
    let minor: String = it.next()?.chars().take_while(|c| c.is_ascii_digit()).collect();
    if minor.is_empty() {
        return None;
    }
    Some(format!("{major}.{minor}"))
}
