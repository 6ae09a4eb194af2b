// src/solver/explicit.rs

//! Environment files: `@EXPLICIT` lockfiles and environment YAML
//!
//! An explicit lockfile already is a solution; its URLs are shipped in
//! file order. An environment YAML only contributes channels and specs
//! for the configured solver.

use serde::Deserialize;
use std::path::Path;
use tracing::warn;

use super::{SolveRequest, SolveResult, Solver, virtual_overrides};
use crate::catalog::{Catalog, IndexEntry};
use crate::error::{Error, Result};
use crate::package::{PackageRecord, parse_dist, remap_url};

/// Parsed contents of an `environment_file`
#[derive(Debug, Clone, PartialEq)]
pub enum EnvironmentFile {
    /// `url#hash` lines after an `@EXPLICIT` marker
    Explicit(Vec<String>),
    /// `channels` and `dependencies` of an environment YAML
    Yaml {
        channels: Vec<String>,
        specs: Vec<String>,
    },
}

#[derive(Debug, Deserialize)]
struct EnvYaml {
    #[serde(default)]
    channels: Vec<String>,
    #[serde(default)]
    dependencies: Vec<serde_yaml::Value>,
}

impl EnvironmentFile {
    /// Read and classify an environment file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io_at(path, e))?;
        Self::parse(&text).map_err(|e| match e {
            Error::Yaml(y) => Error::recipe(path.display().to_string(), y.to_string()),
            other => other,
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let is_explicit = text.lines().any(|l| l.trim() == "@EXPLICIT");
        if is_explicit {
            let urls = text
                .lines()
                .map(str::trim)
                .skip_while(|l| *l != "@EXPLICIT")
                .skip(1)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string)
                .collect();
            return Ok(Self::Explicit(urls));
        }

        let doc: EnvYaml = serde_yaml::from_str(text)?;
        let mut specs = Vec::new();
        for dep in doc.dependencies {
            match dep {
                serde_yaml::Value::String(s) => specs.push(s),
                other => warn!("Ignoring non-conda dependency entry {:?}", other),
            }
        }
        Ok(Self::Yaml {
            channels: doc.channels,
            specs,
        })
    }
}

/// Solver returning the packages of an `@EXPLICIT` lockfile
#[derive(Debug, Clone)]
pub struct ExplicitSolver {
    urls: Vec<String>,
}

impl ExplicitSolver {
    pub fn new(urls: Vec<String>) -> Self {
        Self { urls }
    }

    /// Record for one explicit line, from the catalog when indexed
    fn record(line: &str, request: &SolveRequest, catalog: &Catalog) -> Result<PackageRecord> {
        let (url, fragment) = match line.split_once('#') {
            Some((u, f)) => (u, Some(f)),
            None => (line, None),
        };
        let mut record = match catalog.record_for_url(url) {
            Some(r) => r,
            None => {
                let (rest, filename) = url
                    .rsplit_once('/')
                    .ok_or_else(|| Error::Plan(format!("invalid explicit URL {url}")))?;
                let (channel, subdir) = rest
                    .rsplit_once('/')
                    .ok_or_else(|| Error::Plan(format!("invalid explicit URL {url}")))?;
                let (name, version, build) = parse_dist(filename)
                    .ok_or_else(|| Error::Plan(format!("not a package archive: {url}")))?;
                let entry = IndexEntry {
                    name,
                    version,
                    build,
                    ..Default::default()
                };
                let embedded = remap_url(channel, &request.channels_remap);
                PackageRecord::from_entry(channel, &embedded, subdir, filename, &entry)
            }
        };

        if let Some(hash) = fragment {
            let hash = hash.trim_start_matches("md5:").trim_start_matches("sha256:");
            let (slot, known) = match hash.len() {
                32 => (&mut record.md5, "md5"),
                64 => (&mut record.sha256, "sha256"),
                _ => return Err(Error::Plan(format!("unrecognized hash in {line}"))),
            };
            if let Some(existing) = slot.as_deref().filter(|e| *e != hash) {
                return Err(Error::Plan(format!(
                    "{known} of {url} is {hash} in the lockfile but {existing} in the channel"
                )));
            }
            *slot = Some(hash.to_string());
        }
        Ok(record)
    }
}

impl Solver for ExplicitSolver {
    fn name(&self) -> &str {
        "explicit"
    }

    fn solve(&self, request: &SolveRequest, catalog: &Catalog) -> Result<SolveResult> {
        let mut records: Vec<PackageRecord> = Vec::new();
        for line in &self.urls {
            let record = Self::record(line, request, catalog)?;
            if !records.contains(&record) {
                records.push(record);
            }
        }
        let (_, unsatisfied) = virtual_overrides(&request.virtual_specs, request.platform);
        Ok(SolveResult {
            records,
            unsatisfied_virtual_specs: unsatisfied,
        })
    }
}
