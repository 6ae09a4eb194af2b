// tests/common/mod.rs

//! Shared fixtures for integration tests.
//!
//! A [`LocalChannel`] is a `file://` channel on disk with a real
//! `repodata.json` and fake archives whose MD5 and SHA-256 match the index.
//! [`FixtureSolver`] resolves specs by name against the fetched catalog, so
//! builds run without network access or a conda executable.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use constructor::catalog::{Catalog, IndexEntry};
use constructor::context::BuildOptions;
use constructor::hash;
use constructor::package::spec_name;
use constructor::solver::{SolveRequest, SolveResult, Solver};
use constructor::{PackageRecord, Result};
use tempfile::TempDir;

/// A local channel with one platform subdir
pub struct LocalChannel {
    pub dir: TempDir,
    pub subdir: String,
    packages: BTreeMap<String, IndexEntry>,
}

impl LocalChannel {
    pub fn new(subdir: &str) -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            subdir: subdir.to_string(),
            packages: BTreeMap::new(),
        }
    }

    /// `file://` URL of the channel, without trailing slash
    pub fn url(&self) -> String {
        url::Url::from_file_path(self.dir.path()).unwrap().to_string()
    }

    /// Add `name-version-build.tar.bz2` depending on `depends`
    pub fn add(&mut self, name: &str, version: &str, depends: &[&str]) -> &mut Self {
        let filename = format!("{name}-{version}-0.tar.bz2");
        let subdir_path = self.dir.path().join(&self.subdir);
        fs::create_dir_all(&subdir_path).unwrap();
        let archive = subdir_path.join(&filename);
        fs::write(&archive, format!("archive of {name} {version}\n")).unwrap();
        let (md5, sha256) = hash::md5_and_sha256(&archive).unwrap();

        self.packages.insert(
            filename,
            IndexEntry {
                name: name.to_string(),
                version: version.to_string(),
                build: "0".to_string(),
                depends: depends.iter().map(|d| d.to_string()).collect(),
                license: Some("BSD-3-Clause".to_string()),
                md5: Some(md5),
                sha256: Some(sha256),
                size: fs::metadata(&archive).unwrap().len(),
                subdir: Some(self.subdir.clone()),
                ..Default::default()
            },
        );
        self
    }

    /// Write `repodata.json` for everything added so far
    pub fn publish(&self) {
        let doc = serde_json::json!({
            "info": { "subdir": self.subdir },
            "packages": self.packages,
        });
        let path = self.dir.path().join(&self.subdir).join("repodata.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_vec_pretty(&doc).unwrap()).unwrap();
    }

    pub fn entry(&self, filename: &str) -> &IndexEntry {
        &self.packages[filename]
    }
}

/// The usual test channel: python, pip, tk and idle (which needs tk)
pub fn python_channel(subdir: &str) -> LocalChannel {
    let mut channel = LocalChannel::new(subdir);
    channel
        .add("python", "3.11.5", &[])
        .add("pip", "23.2", &["python >=3.8"])
        .add("tk", "8.6.12", &[])
        .add("idle", "3.11.5", &["python", "tk"]);
    channel.publish();
    channel
}

/// Resolves specs by name, pulling in dependencies depth first
#[derive(Debug, Default)]
pub struct FixtureSolver;

impl FixtureSolver {
    fn visit(
        &self,
        name: &str,
        request: &SolveRequest,
        catalog: &Catalog,
        out: &mut Vec<PackageRecord>,
    ) -> Result<()> {
        if name.starts_with("__") || out.iter().any(|r| r.name == name) {
            return Ok(());
        }
        let record = catalog
            .records_named(&request.channels, name)
            .into_iter()
            .next()
            .ok_or_else(|| constructor::Error::Plan(format!("nothing provides {name}")))?;
        for dep in record.depends.clone() {
            if let Some(dep) = spec_name(&dep) {
                self.visit(dep, request, catalog, out)?;
            }
        }
        out.push(record);
        Ok(())
    }
}

impl Solver for FixtureSolver {
    fn name(&self) -> &str {
        "fixture"
    }

    fn solve(&self, request: &SolveRequest, catalog: &Catalog) -> Result<SolveResult> {
        let mut records = Vec::new();
        for spec in &request.specs {
            if let Some(name) = spec_name(spec) {
                self.visit(name, request, catalog, &mut records)?;
            }
        }
        Ok(SolveResult {
            records,
            unsatisfied_virtual_specs: Vec::new(),
        })
    }
}

/// A recipe directory, output directory and package cache
pub struct Workspace {
    pub recipe: TempDir,
    pub output: TempDir,
    pub cache: TempDir,
}

impl Workspace {
    pub fn new(recipe_yaml: &str) -> Self {
        let recipe = TempDir::new().unwrap();
        fs::write(recipe.path().join("construct.yaml"), recipe_yaml).unwrap();
        Self {
            recipe,
            output: TempDir::new().unwrap(),
            cache: TempDir::new().unwrap(),
        }
    }

    pub fn options(&self) -> BuildOptions {
        BuildOptions {
            output_dir: self.output.path().to_path_buf(),
            cache_dir: Some(self.cache.path().to_path_buf()),
            quiet: true,
            ..BuildOptions::new(self.recipe.path())
        }
    }

    pub fn output_file(&self, name: &str) -> PathBuf {
        self.output.path().join(name)
    }
}

/// Split an SH installer into header and payload using its `LINES:` field
pub fn split_sh_installer(path: &Path) -> (Vec<u8>, Vec<u8>) {
    let bytes = fs::read(path).unwrap();
    let text = String::from_utf8_lossy(&bytes);
    let lines: usize = text
        .lines()
        .find_map(|l| l.strip_prefix("# LINES: "))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let mut offset = 0;
    for _ in 0..lines {
        offset += bytes[offset..].iter().position(|b| *b == b'\n').unwrap() + 1;
    }
    (bytes[..offset].to_vec(), bytes[offset..].to_vec())
}

/// Value of a `# KEY:` field of an SH header
pub fn header_field(header: &[u8], key: &str) -> String {
    let prefix = format!("# {key}:");
    String::from_utf8_lossy(header)
        .lines()
        .find_map(|l| l.strip_prefix(prefix.as_str()).map(|v| v.trim().to_string()))
        .unwrap()
}
