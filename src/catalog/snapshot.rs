// src/catalog/snapshot.rs

//! Offline channel snapshots embedded in installers
//!
//! Each snapshot is a repodata cache file under `pkgs/cache/` named after
//! the embedded channel URL, in the layout the install-time runtime reads.
//! It lists only shipped packages, plus the newest build of a few packages
//! the runtime needs to update itself later. The synthetic modification
//! header lets the runtime use the file at install time and refresh it
//! against the live channel afterwards.

use serde_json::{Map, Value, json};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{Catalog, IndexEntry};
use crate::error::Result;
use crate::filesystem::write_atomic;
use crate::hash::{HashAlgorithm, hash_bytes};
use crate::package::PackageRecord;
use crate::version::compare_versions;

/// Packages always listed when their channel carries them
pub const SNAPSHOT_ALLOWLIST: &[&str] = &["conda", "conda-env", "conda-libmamba-solver"];

/// Synthetic `Last-Modified` value
pub const SNAPSHOT_MOD: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// Synthetic `Cache-Control` value
pub const SNAPSHOT_CACHE_CONTROL: &str = "public, max-age=1200";

/// Cache file name for a channel subdir: 8 hex digits of the URL's MD5
pub fn snapshot_filename(embedded_channel_url: &str, subdir: &str) -> String {
    let url = format!("{}/{}/", embedded_channel_url.trim_end_matches('/'), subdir);
    let digest = hash_bytes(HashAlgorithm::Md5, url.as_bytes());
    format!("{}.json", &digest[..8])
}

fn newest<'a>(entries: impl Iterator<Item = (&'a String, &'a IndexEntry)>) -> Option<(&'a String, &'a IndexEntry)> {
    entries.max_by(|(fa, a), (fb, b)| {
        compare_versions(&a.version, &b.version)
            .then(a.build_number.cmp(&b.build_number))
            .then_with(|| fa.cmp(fb))
    })
}

/// Build the JSON document for one snapshot
pub fn snapshot_document(
    embedded_url: &str,
    subdir: &str,
    shipped: &[&PackageRecord],
    allowlisted: &[(String, IndexEntry)],
) -> Result<Value> {
    let mut tar_bz2 = Map::new();
    let mut conda = Map::new();
    let mut insert = |filename: &str, entry: &IndexEntry| -> Result<()> {
        let target = if filename.ends_with(".conda") {
            &mut conda
        } else {
            &mut tar_bz2
        };
        target.insert(filename.to_string(), serde_json::to_value(entry)?);
        Ok(())
    };

    for record in shipped {
        insert(&record.filename, &record.to_entry())?;
    }
    for (filename, entry) in allowlisted {
        insert(filename, entry)?;
    }

    Ok(json!({
        "_url": format!("{}/{}", embedded_url.trim_end_matches('/'), subdir),
        "_mod": SNAPSHOT_MOD,
        "_cache_control": SNAPSHOT_CACHE_CONTROL,
        "info": { "subdir": subdir },
        "packages": tar_bz2,
        "packages.conda": conda,
        "removed": [],
        "repodata_version": 1,
    }))
}

/// Write one snapshot per embedded channel subdir into `cache_dir`
///
/// `shipped` are the records as they appear in the installer (after
/// transmutation), so sizes and hashes describe the shipped files.
pub fn write_snapshots(
    cache_dir: &Path,
    catalog: &Catalog,
    shipped: &[PackageRecord],
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for (embedded, subdir) in catalog.snapshot_keys() {
        let records: Vec<&PackageRecord> = shipped
            .iter()
            .filter(|r| r.remapped_channel_url == embedded && r.subdir == subdir)
            .collect();

        let mut allowlisted: Vec<(String, IndexEntry)> = Vec::new();
        for name in SNAPSHOT_ALLOWLIST {
            if records.iter().any(|r| r.name == *name) {
                continue;
            }
            let candidates = catalog
                .indices()
                .iter()
                .filter(|i| i.embedded_url == embedded && i.subdir == subdir)
                .flat_map(|i| i.named(name));
            if let Some((filename, entry)) = newest(candidates) {
                allowlisted.push((filename.clone(), entry.clone()));
            }
        }

        let doc = snapshot_document(&embedded, &subdir, &records, &allowlisted)?;
        let path = cache_dir.join(snapshot_filename(&embedded, &subdir));
        write_atomic(&path, serde_json::to_vec(&doc)?)?;
        debug!(
            "Snapshot {} for {}/{}: {} shipped, {} allowlisted",
            path.display(),
            embedded,
            subdir,
            records.len(),
            allowlisted.len()
        );
        written.push(path);
    }
    Ok(written)
}

/// Order entries deterministically by filename (used by tests and dry runs)
pub fn sorted_filenames(doc: &Value) -> Vec<String> {
    let mut names = BTreeSet::new();
    for key in ["packages", "packages.conda"] {
        if let Some(Value::Object(map)) = doc.get(key) {
            names.extend(map.keys().cloned());
        }
    }
    names.into_iter().collect()
}
