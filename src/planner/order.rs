// src/planner/order.rs

//! Deterministic install ordering
//!
//! Records are sorted so that every dependency precedes its dependents.
//! Among records whose dependencies are already placed, the primary
//! environment keeps the solver's order and extra environments go
//! alphabetically, so repeated builds stage identical manifests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::error::{Error, Result};
use crate::package::{INTERPRETER, PackageRecord};

/// Tie-break between records that are ready at the same time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    SolverOrder,
    Alphabetical,
}

/// Stable topological sort of `records` by their `depends` names
///
/// Dependency cycles are broken at the record that sorts first under
/// `tie`.
pub fn topological(records: Vec<PackageRecord>, tie: TieBreak) -> Vec<PackageRecord> {
    let position: HashMap<&str, usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.name.as_str(), i))
        .collect();

    let key = |i: usize| -> (String, usize) {
        match tie {
            TieBreak::SolverOrder => (String::new(), i),
            TieBreak::Alphabetical => (records[i].name.clone(), i),
        }
    };

    // Unplaced in-plan dependencies per record
    let mut pending: Vec<BTreeSet<usize>> = records
        .iter()
        .enumerate()
        .map(|(i, r)| {
            r.dependency_names()
                .filter_map(|d| position.get(d).copied())
                .filter(|&d| d != i)
                .collect()
        })
        .collect();

    let mut ready: BTreeMap<(String, usize), usize> = pending
        .iter()
        .enumerate()
        .filter(|(_, deps)| deps.is_empty())
        .map(|(i, _)| (key(i), i))
        .collect();
    let mut placed = vec![false; records.len()];
    let mut order = Vec::with_capacity(records.len());

    while order.len() < records.len() {
        let next = match ready.pop_first() {
            Some((_, i)) => i,
            None => {
                let i = (0..records.len())
                    .filter(|&i| !placed[i])
                    .min_by_key(|&i| key(i))
                    .unwrap_or(0);
                debug!("Breaking dependency cycle at {}", records[i].name);
                i
            }
        };
        if placed[next] {
            continue;
        }
        placed[next] = true;
        order.push(next);
        for (i, deps) in pending.iter_mut().enumerate() {
            if !placed[i] && deps.remove(&next) && deps.is_empty() {
                ready.insert(key(i), i);
            }
        }
    }

    let mut slots: Vec<Option<PackageRecord>> = records.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}

/// Move the interpreter to the front
///
/// Fails when the interpreter is not part of the plan.
pub fn interpreter_first(mut records: Vec<PackageRecord>, env: &str) -> Result<Vec<PackageRecord>> {
    let idx = records
        .iter()
        .position(|r| r.name == INTERPRETER)
        .ok_or_else(|| Error::Plan(format!("{INTERPRETER} is required but not part of environment {env}")))?;
    let interpreter = records.remove(idx);
    records.insert(0, interpreter);
    Ok(records)
}

/// Verify a frozen package list starts with the interpreter
pub fn check_interpreter_first(records: &[PackageRecord], env: &str) -> Result<()> {
    match records.first() {
        Some(r) if r.name == INTERPRETER => Ok(()),
        Some(r) => Err(Error::Plan(format!(
            "first package of environment {env} is {} but must be {INTERPRETER}",
            r.name
        ))),
        None => Err(Error::Plan(format!("environment {env} is empty"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::IndexEntry;

    fn rec(name: &str, depends: &[&str]) -> PackageRecord {
        let entry = IndexEntry {
            name: name.to_string(),
            version: "1.0".to_string(),
            build: "0".to_string(),
            depends: depends.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        };
        let filename = format!("{name}-1.0-0.conda");
        PackageRecord::from_entry("https://repo.example.com/main", "https://repo.example.com/main", "linux-64", &filename, &entry)
    }

    fn names(records: &[PackageRecord]) -> Vec<&str> {
        records.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_dependencies_come_first() {
        let records = vec![
            rec("pip", &["python >=3.8"]),
            rec("python", &["zlib", "openssl >=3"]),
            rec("zlib", &[]),
            rec("openssl", &["ca-certificates"]),
            rec("ca-certificates", &[]),
        ];
        let ordered = topological(records, TieBreak::SolverOrder);
        assert_eq!(
            names(&ordered),
            vec!["zlib", "ca-certificates", "openssl", "python", "pip"]
        );
    }

    #[test]
    fn test_alphabetical_is_independent_of_input_order() {
        let a = vec![rec("b", &[]), rec("a", &[]), rec("c", &["a"])];
        let b = vec![rec("c", &["a"]), rec("a", &[]), rec("b", &[])];
        let x = topological(a, TieBreak::Alphabetical);
        let y = topological(b, TieBreak::Alphabetical);
        assert_eq!(names(&x), vec!["a", "b", "c"]);
        assert_eq!(names(&x), names(&y));
    }

    #[test]
    fn test_cycle_is_broken() {
        let ordered = topological(vec![rec("a", &["b"]), rec("b", &["a"]), rec("c", &[])], TieBreak::SolverOrder);
        assert_eq!(names(&ordered), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_interpreter_first() {
        let ordered = interpreter_first(vec![rec("zlib", &[]), rec("python", &["zlib"])], "base").unwrap();
        assert_eq!(names(&ordered), vec!["python", "zlib"]);
        check_interpreter_first(&ordered, "base").unwrap();

        assert!(matches!(
            check_interpreter_first(&[rec("zlib", &[])], "base"),
            Err(Error::Plan(_))
        ));
        assert!(interpreter_first(vec![rec("zlib", &[])], "base").is_err());
    }
}
