// src/solver/existing.rs

//! Shipping the packages of an existing environment
//!
//! Every `conda-meta/*.json` record of the prefix becomes one package
//! record. The catalog entry wins when the archive is indexed; otherwise
//! the metadata recorded at install time is used as is.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use super::{SolveRequest, SolveResult, Solver, virtual_overrides};
use crate::catalog::{Catalog, IndexEntry};
use crate::error::{Error, Result};
use crate::package::{PackageRecord, PrefixPlaceholder, remap_url};

#[derive(Debug, Deserialize)]
struct PrefixRecord {
    name: String,
    version: String,
    #[serde(alias = "build_string")]
    build: String,
    #[serde(default)]
    build_number: u64,
    url: String,
    #[serde(default)]
    md5: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    depends: Vec<String>,
    #[serde(default)]
    constrains: Vec<String>,
    #[serde(default)]
    license: Option<String>,
    #[serde(default)]
    timestamp: Option<u64>,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    paths_data: Option<PathsData>,
}

#[derive(Debug, Deserialize)]
struct PathsData {
    #[serde(default)]
    paths: Vec<PathEntry>,
}

#[derive(Debug, Deserialize)]
struct PathEntry {
    #[serde(rename = "_path")]
    path: String,
    #[serde(default)]
    prefix_placeholder: Option<String>,
    #[serde(default)]
    file_mode: Option<String>,
}

/// Solver that returns the packages installed in a prefix
#[derive(Debug, Clone)]
pub struct ExistingEnvSolver {
    prefix: PathBuf,
}

impl ExistingEnvSolver {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn read_record(path: &Path, request: &SolveRequest, catalog: &Catalog) -> Result<PackageRecord> {
        let data = fs::read(path).map_err(|e| Error::io_at(path, e))?;
        let meta: PrefixRecord = serde_json::from_slice(&data)
            .map_err(|e| Error::Plan(format!("invalid prefix record {}: {e}", path.display())))?;

        let mut record = match catalog.record_for_url(&meta.url) {
            Some(r) => r,
            None => {
                let (rest, filename) = meta
                    .url
                    .rsplit_once('/')
                    .ok_or_else(|| Error::Plan(format!("invalid package URL {}", meta.url)))?;
                let (channel, subdir) = rest
                    .rsplit_once('/')
                    .ok_or_else(|| Error::Plan(format!("invalid package URL {}", meta.url)))?;
                let entry = IndexEntry {
                    name: meta.name.clone(),
                    version: meta.version.clone(),
                    build: meta.build.clone(),
                    build_number: meta.build_number,
                    depends: meta.depends.clone(),
                    constrains: meta.constrains.clone(),
                    license: meta.license.clone(),
                    md5: meta.md5.clone(),
                    sha256: meta.sha256.clone(),
                    size: meta.size,
                    subdir: Some(subdir.to_string()),
                    timestamp: meta.timestamp,
                    files: Vec::new(),
                };
                let embedded = remap_url(channel, &request.channels_remap);
                PackageRecord::from_entry(channel, &embedded, subdir, filename, &entry)
            }
        };

        record.files = meta.files;
        if let Some(paths) = meta.paths_data {
            record.prefix_placeholders = paths
                .paths
                .into_iter()
                .filter_map(|p| {
                    Some(PrefixPlaceholder {
                        placeholder: p.prefix_placeholder?,
                        mode: p.file_mode.unwrap_or_else(|| "text".to_string()),
                        path: p.path,
                    })
                })
                .collect();
        }
        Ok(record)
    }
}

impl Solver for ExistingEnvSolver {
    fn name(&self) -> &str {
        "existing-environment"
    }

    fn solve(&self, request: &SolveRequest, catalog: &Catalog) -> Result<SolveResult> {
        let meta_dir = self.prefix.join("conda-meta");
        let mut paths: Vec<PathBuf> = fs::read_dir(&meta_dir)
            .map_err(|e| Error::recipe(self.prefix.display().to_string(), format!("not an environment: {e}")))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|x| x == "json"))
            .collect();
        paths.sort();

        let records = paths
            .iter()
            .map(|p| Self::read_record(p, request, catalog))
            .collect::<Result<Vec<_>>>()?;

        let (_, unsatisfied) = virtual_overrides(&request.virtual_specs, request.platform);
        Ok(SolveResult {
            records,
            unsatisfied_virtual_specs: unsatisfied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;
    use tempfile::TempDir;

    #[test]
    fn test_reads_conda_meta() {
        let dir = TempDir::new().unwrap();
        let meta = dir.path().join("conda-meta");
        fs::create_dir_all(&meta).unwrap();
        fs::write(
            meta.join("zlib-1.2.13-h0_0.json"),
            r#"{"name": "zlib", "version": "1.2.13", "build": "h0_0",
                "url": "https://repo.example.com/main/linux-64/zlib-1.2.13-h0_0.conda",
                "md5": "0123456789abcdef0123456789abcdef", "size": 12,
                "files": ["lib/libz.so"],
                "paths_data": {"paths": [
                    {"_path": "lib/pkgconfig/zlib.pc", "prefix_placeholder": "/opt/placeholder", "file_mode": "text"},
                    {"_path": "lib/libz.so"}
                ]}}"#,
        )
        .unwrap();
        fs::write(meta.join("history"), "").unwrap();

        let request = SolveRequest {
            env_name: "base".into(),
            platform: Platform::Linux64,
            channels: Vec::new(),
            channels_remap: Vec::new(),
            specs: Vec::new(),
            virtual_specs: Vec::new(),
        };
        let result = ExistingEnvSolver::new(dir.path())
            .solve(&request, &Catalog::default())
            .unwrap();
        assert_eq!(result.records.len(), 1);
        let zlib = &result.records[0];
        assert_eq!(zlib.filename, "zlib-1.2.13-h0_0.conda");
        assert_eq!(zlib.files, vec!["lib/libz.so"]);
        assert_eq!(zlib.prefix_placeholders.len(), 1);
        assert_eq!(zlib.prefix_placeholders[0].placeholder, "/opt/placeholder");
    }
}
