// src/planner/conflict.rs

//! Consistency checks over planned environments

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::EnvironmentPlan;
use crate::error::{Error, Result};
use crate::package::PackageRecord;

/// At most one record per package name
pub fn check_unique_names(plan: &EnvironmentPlan) -> Result<()> {
    let mut seen: HashMap<&str, &PackageRecord> = HashMap::new();
    for r in &plan.records {
        if let Some(first) = seen.insert(r.name.as_str(), r) {
            return Err(Error::Plan(format!(
                "environment {} contains {} twice: {} and {}",
                plan.name,
                r.name,
                first.url(),
                r.url()
            )));
        }
    }
    Ok(())
}

/// Every dependency names a package in the plan
///
/// Virtual packages (`__*`) and excluded names are exempt.
pub fn check_dependencies_present(plan: &EnvironmentPlan) -> Result<()> {
    let names: BTreeSet<&str> = plan.records.iter().map(|r| r.name.as_str()).collect();
    for r in &plan.records {
        for dep in r.dependency_names() {
            if dep.starts_with("__") || names.contains(dep) || plan.excluded.iter().any(|e| e == dep) {
                continue;
            }
            return Err(Error::Plan(format!(
                "{} in environment {} depends on {} which is not part of the plan",
                r.dist(),
                plan.name,
                dep
            )));
        }
    }
    Ok(())
}

/// Same `(name, subdir, filename)` must not carry different hashes
///
/// Happens when several remapped sources feed one destination.
pub fn check_hash_conflicts<'a>(plans: impl IntoIterator<Item = &'a EnvironmentPlan>) -> Result<()> {
    let mut seen: HashMap<(&str, &str, &str), &PackageRecord> = HashMap::new();
    for plan in plans {
        for r in &plan.records {
            let key = (r.name.as_str(), r.subdir.as_str(), r.filename.as_str());
            let Some(first) = seen.get(&key) else {
                seen.insert(key, r);
                continue;
            };
            let differs = |a: &Option<String>, b: &Option<String>| matches!((a, b), (Some(x), Some(y)) if x != y);
            if differs(&first.md5, &r.md5) || differs(&first.sha256, &r.sha256) {
                return Err(Error::Plan(format!(
                    "{}/{} is provided with different contents by {} and {}",
                    r.subdir,
                    r.filename,
                    first.channel_url,
                    r.channel_url
                )));
            }
        }
    }
    Ok(())
}

/// No two records install the same path into the same prefix
///
/// Extra environments install under `envs/<name>/`, so their paths are
/// checked with that prefix in one pass over every plan.
pub fn check_duplicate_files<'a>(plans: impl IntoIterator<Item = &'a EnvironmentPlan>) -> Result<()> {
    let mut owners: BTreeMap<String, &PackageRecord> = BTreeMap::new();
    for plan in plans {
        let root = plan.install_root();
        for r in &plan.records {
            for file in &r.files {
                let path = format!("{root}{}", file.trim_start_matches('/'));
                match owners.get(&path) {
                    Some(first) if *first != r => {
                        return Err(Error::DuplicateFile {
                            path,
                            first: first.dist(),
                            second: r.dist(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        owners.insert(path, r);
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::IndexEntry;

    fn rec(channel: &str, name: &str, md5: &str, files: &[&str]) -> PackageRecord {
        let entry = IndexEntry {
            name: name.to_string(),
            version: "1.0".to_string(),
            build: "0".to_string(),
            md5: Some(md5.to_string()),
            files: files.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        };
        PackageRecord::from_entry(channel, channel, "linux-64", &format!("{name}-1.0-0.conda"), &entry)
    }

    fn plan(name: &str, records: Vec<PackageRecord>) -> EnvironmentPlan {
        EnvironmentPlan {
            name: name.to_string(),
            records,
            ..Default::default()
        }
    }

    const A: &str = "https://a.example.com/main";
    const B: &str = "https://b.example.com/main";

    #[test]
    fn test_unique_names() {
        let p = plan("base", vec![rec(A, "zlib", "1", &[]), rec(B, "zlib", "1", &[])]);
        assert!(matches!(check_unique_names(&p), Err(Error::Plan(_))));
        check_unique_names(&plan("base", vec![rec(A, "zlib", "1", &[])])).unwrap();
    }

    #[test]
    fn test_hash_conflict_across_sources() {
        let base = plan("base", vec![rec(A, "zlib", "aaaa", &[])]);
        let same = plan("tools", vec![rec(B, "zlib", "aaaa", &[])]);
        let different = plan("tools", vec![rec(B, "zlib", "bbbb", &[])]);
        check_hash_conflicts([&base, &same]).unwrap();
        assert!(check_hash_conflicts([&base, &different]).is_err());
    }

    #[test]
    fn test_duplicate_files() {
        let p = plan(
            "base",
            vec![rec(A, "a", "1", &["bin/tool"]), rec(A, "b", "2", &["bin/tool"])],
        );
        let err = check_duplicate_files([&p]).unwrap_err();
        assert!(matches!(err, Error::DuplicateFile { ref path, .. } if path == "bin/tool"));
        assert!(err.to_string().contains("a-1.0-0"));
        assert!(err.to_string().contains("b-1.0-0"));

        // The same path in another prefix is fine
        let base = plan("base", vec![rec(A, "a", "1", &["bin/tool"])]);
        let tools = plan("tools", vec![rec(A, "b", "2", &["bin/tool"])]);
        check_duplicate_files([&base, &tools]).unwrap();
    }

    #[test]
    fn test_missing_dependency() {
        let mut python = rec(A, "python", "1", &[]);
        python.depends = vec!["tk".into(), "__glibc >=2.17".into()];
        let mut p = plan("base", vec![python]);
        assert!(check_dependencies_present(&p).is_err());
        p.excluded = vec!["tk".into()];
        check_dependencies_present(&p).unwrap();
    }
}
