// src/stager/download.rs

//! Persistent package download cache
//!
//! Archives live in a per-platform cache directory shared with other
//! invocations. A cached file is reused when its MD5 matches the catalog;
//! otherwise it is downloaded through a temporary file and renamed into
//! place. A file that fails verification is deleted and fetched again, up
//! to [`MAX_ATTEMPTS`] times.

use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::progress::DownloadProgress;
use crate::catalog::CatalogClient;
use crate::error::{Error, Result};
use crate::hash::{self, HashAlgorithm};
use crate::package::PackageRecord;

/// Download attempts per archive before giving up
pub const MAX_ATTEMPTS: u32 = 3;

/// Compare a file against the hashes and size a record carries
pub fn verify(path: &Path, record: &PackageRecord) -> Result<()> {
    let checks = [
        (HashAlgorithm::Md5, record.md5.as_deref()),
        (HashAlgorithm::Sha256, record.sha256.as_deref()),
    ];
    for (algo, expected) in checks {
        let Some(expected) = expected else { continue };
        if let Err(actual) = hash::verify_file(path, expected, algo).map_err(|e| Error::io_at(path, e))? {
            return Err(Error::ChecksumMismatch {
                filename: record.filename.clone(),
                algorithm: algo.name().to_string(),
                expected: expected.to_string(),
                actual,
            });
        }
    }
    if record.size > 0 {
        let actual = fs::metadata(path).map_err(|e| Error::io_at(path, e))?.len();
        if actual != record.size {
            return Err(Error::ChecksumMismatch {
                filename: record.filename.clone(),
                algorithm: "size".to_string(),
                expected: record.size.to_string(),
                actual: actual.to_string(),
            });
        }
    }
    Ok(())
}

/// Fill missing MD5, SHA-256 and size from a verified local file
pub fn fill_missing_metadata(record: &mut PackageRecord, path: &Path) -> Result<()> {
    if record.md5.is_none() || record.sha256.is_none() {
        let (md5, sha256) = hash::md5_and_sha256(path).map_err(|e| Error::io_at(path, e))?;
        record.md5.get_or_insert(md5);
        record.sha256.get_or_insert(sha256);
    }
    if record.size == 0 {
        record.size = fs::metadata(path).map_err(|e| Error::io_at(path, e))?.len();
    }
    Ok(())
}

/// The on-disk download cache of one platform
#[derive(Debug, Clone)]
pub struct PackageCache {
    dir: PathBuf,
}

impl PackageCache {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::io_at(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, record: &PackageRecord) -> PathBuf {
        self.dir.join(&record.filename)
    }

    /// Cached archive for `record`, if present and matching its MD5
    ///
    /// Records without any hash are never served from the cache.
    pub fn cached(&self, record: &PackageRecord) -> Option<PathBuf> {
        let path = self.path(record);
        if !path.is_file() || (record.md5.is_none() && record.sha256.is_none()) {
            return None;
        }
        match verify(&path, record) {
            Ok(()) => Some(path),
            Err(e) => {
                debug!("Ignoring cached {}: {}", record.filename, e);
                None
            }
        }
    }

    /// Cached or freshly downloaded archive for `record`
    pub fn fetch(
        &self,
        client: &CatalogClient,
        record: &PackageRecord,
        progress: Option<&DownloadProgress>,
    ) -> Result<PathBuf> {
        if let Some(path) = self.cached(record) {
            debug!("Using cached {}", record.filename);
            return Ok(path);
        }

        let path = self.path(record);
        let url = record.url();
        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            let bar = progress.map(|p| p.add_download(&record.filename, record.size));
            let outcome = client
                .download_file(&url, &path, bar.as_ref())
                .and_then(|n| verify(&path, record).map(|()| n));
            match outcome {
                Ok(bytes) => {
                    if let (Some(p), Some(bar)) = (progress, &bar) {
                        p.finish_download(bar, &record.filename, bytes);
                    }
                    return Ok(path);
                }
                Err(e) => {
                    if let Some(bar) = &bar {
                        DownloadProgress::fail_download(bar, &record.filename, &e.to_string());
                    }
                    let _ = fs::remove_file(&path);
                    let retry = matches!(e, Error::ChecksumMismatch { .. }) || e.is_transient();
                    if !retry || attempt == MAX_ATTEMPTS {
                        last_err = Some(e);
                        break;
                    }
                    warn!("Attempt {}/{} for {} failed: {}", attempt, MAX_ATTEMPTS, record.filename, e);
                    last_err = Some(e);
                }
            }
        }
        Err(match last_err {
            Some(Error::ChecksumMismatch { .. }) | None => Error::Staging(format!(
                "{} failed verification after {MAX_ATTEMPTS} attempts",
                record.filename
            )),
            Some(e) => e,
        })
    }

    /// Fetch every record in parallel, once per `(filename, hash)`
    ///
    /// Returns the local path of each record, keyed by filename.
    pub fn fetch_all(
        &self,
        client: &CatalogClient,
        records: &[&PackageRecord],
        quiet: bool,
    ) -> Result<HashMap<String, PathBuf>> {
        let mut unique: HashMap<(String, Option<String>), &PackageRecord> = HashMap::new();
        for r in records.iter().copied() {
            let key = (r.filename.clone(), r.md5.clone().or_else(|| r.sha256.clone()));
            unique.entry(key).or_insert(r);
        }
        let mut jobs: Vec<&PackageRecord> = unique.into_values().collect();
        jobs.sort_by(|a, b| a.filename.cmp(&b.filename));

        let missing: Vec<&PackageRecord> = jobs.iter().copied().filter(|r| self.cached(r).is_none()).collect();
        let total: u64 = missing.iter().map(|r| r.size).sum();
        info!(
            "{} packages cached, {} to download ({:.2} MB)",
            jobs.len() - missing.len(),
            missing.len(),
            total as f64 / 1_048_576.0
        );
        let progress = DownloadProgress::new(missing.len(), total, quiet);

        let results: Vec<Result<(String, PathBuf)>> = jobs
            .par_iter()
            .map(|r| self.fetch(client, r, Some(&progress)).map(|p| (r.filename.clone(), p)))
            .collect();
        progress.finish_all();

        results.into_iter().collect()
    }
}
