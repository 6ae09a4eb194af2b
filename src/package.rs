// src/package.rs

//! Package records and archive naming
//!
//! A [`PackageRecord`] identifies one archive in one channel subdir. Two
//! records are the same package iff `(channel_url, subdir, filename)`
//! match; everything else is metadata carried along for staging.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use crate::catalog::IndexEntry;
use crate::recipe::ChannelRemap;

/// Archive extensions understood by the install-time runtime
pub const ARCHIVE_EXTENSIONS: &[&str] = &[".conda", ".tar.bz2"];

/// Name of the interpreter package placed first when required
pub const INTERPRETER: &str = "python";

/// A recorded prefix placeholder inside one package file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixPlaceholder {
    pub path: String,
    pub placeholder: String,
    /// `text` or `binary`
    pub mode: String,
}

/// One concrete package artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    pub build_string: String,
    #[serde(default)]
    pub build_number: u64,
    pub subdir: String,
    /// Channel the archive is fetched from, without trailing slash
    pub channel_url: String,
    /// Channel the archive is labeled with inside the installer
    pub remapped_channel_url: String,
    pub filename: String,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub constrains: Vec<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub timestamp: Option<u64>,
    /// Files the package installs, when the source declares them
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub prefix_placeholders: Vec<PrefixPlaceholder>,
    /// Archive inside the staging tree once staged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    /// Extracted package directory, for emitters that unpack at build time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_dir: Option<PathBuf>,
}

impl PartialEq for PackageRecord {
    fn eq(&self, other: &Self) -> bool {
        self.channel_url == other.channel_url
            && self.subdir == other.subdir
            && self.filename == other.filename
    }
}

impl Eq for PackageRecord {}

impl Hash for PackageRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.channel_url.hash(state);
        self.subdir.hash(state);
        self.filename.hash(state);
    }
}

impl PackageRecord {
    /// Build a record from a catalog index entry
    pub fn from_entry(
        channel_url: &str,
        remapped_channel_url: &str,
        subdir: &str,
        filename: &str,
        entry: &IndexEntry,
    ) -> Self {
        Self {
            name: entry.name.clone(),
            version: entry.version.clone(),
            build_string: entry.build.clone(),
            build_number: entry.build_number,
            subdir: entry.subdir.clone().unwrap_or_else(|| subdir.to_string()),
            channel_url: channel_url.trim_end_matches('/').to_string(),
            remapped_channel_url: remapped_channel_url.trim_end_matches('/').to_string(),
            filename: filename.to_string(),
            md5: entry.md5.clone(),
            sha256: entry.sha256.clone(),
            size: entry.size,
            depends: entry.depends.clone(),
            constrains: entry.constrains.clone(),
            license: entry.license.clone(),
            timestamp: entry.timestamp,
            files: entry.files.clone(),
            prefix_placeholders: Vec::new(),
            local_path: None,
            extracted_dir: None,
        }
    }

    /// `name-version-build`
    pub fn dist(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.build_string)
    }

    /// URL the archive is downloaded from
    pub fn url(&self) -> String {
        format!("{}/{}/{}", self.channel_url, self.subdir, self.filename)
    }

    /// URL the archive is labeled with inside the installer
    pub fn embedded_url(&self) -> String {
        format!("{}/{}/{}", self.remapped_channel_url, self.subdir, self.filename)
    }

    /// `<embedded_url>#<md5>` line for `urls` and explicit lockfiles
    pub fn url_with_md5(&self) -> String {
        match &self.md5 {
            Some(md5) => format!("{}#{}", self.embedded_url(), md5),
            None => self.embedded_url(),
        }
    }

    /// Archive extension of the filename
    pub fn extension(&self) -> Option<&'static str> {
        archive_extension(&self.filename)
    }

    /// Names of the packages this record depends on
    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.depends.iter().filter_map(|d| spec_name(d))
    }

    /// Index entry describing this record, as embedded in snapshots
    pub fn to_entry(&self) -> IndexEntry {
        IndexEntry {
            name: self.name.clone(),
            version: self.version.clone(),
            build: self.build_string.clone(),
            build_number: self.build_number,
            depends: self.depends.clone(),
            constrains: self.constrains.clone(),
            license: self.license.clone(),
            md5: self.md5.clone(),
            sha256: self.sha256.clone(),
            size: self.size,
            subdir: Some(self.subdir.clone()),
            timestamp: self.timestamp,
            files: Vec::new(),
        }
    }
}

/// Archive extension of `filename`, if it is a known package archive
pub fn archive_extension(filename: &str) -> Option<&'static str> {
    ARCHIVE_EXTENSIONS
        .iter()
        .copied()
        .find(|ext| filename.ends_with(ext))
}

/// Split an archive filename into `(name, version, build)`
///
/// Names may contain dashes; version and build may not.
pub fn parse_dist(filename: &str) -> Option<(String, String, String)> {
    let stem = match archive_extension(filename) {
        Some(ext) => &filename[..filename.len() - ext.len()],
        None => filename,
    };
    let mut parts = stem.rsplitn(3, '-');
    let build = parts.next()?;
    let version = parts.next()?;
    let name = parts.next()?;
    if name.is_empty() || version.is_empty() || build.is_empty() {
        return None;
    }
    Some((name.to_string(), version.to_string(), build.to_string()))
}

/// Replace the archive extension of `filename` with `ext`
pub fn with_extension(filename: &str, ext: &str) -> String {
    match archive_extension(filename) {
        Some(old) => format!("{}{}", &filename[..filename.len() - old.len()], ext),
        None => format!("{filename}{ext}"),
    }
}

/// Package name of a match spec such as `python >=3.11` or `pip==23.1`
pub fn spec_name(spec: &str) -> Option<&str> {
    let spec = spec.trim();
    let spec = spec.rsplit_once("::").map_or(spec, |(_, s)| s);
    let end = spec
        .find(|c: char| c.is_whitespace() || "<>=!~[".contains(c))
        .unwrap_or(spec.len());
    let name = &spec[..end];
    (!name.is_empty()).then_some(name)
}

/// Rewrite `url` through the channel remap table
///
/// The longest matching `src` prefix wins. URLs are compared without
/// trailing slashes.
pub fn remap_url(url: &str, remaps: &[ChannelRemap]) -> String {
    let url = url.trim_end_matches('/');
    remaps
        .iter()
        .filter_map(|r| {
            let src = r.src.trim_end_matches('/');
            let rest = url.strip_prefix(src)?;
            (rest.is_empty() || rest.starts_with('/')).then(|| (src.len(), r, rest))
        })
        .max_by_key(|(len, _, _)| *len)
        .map(|(_, r, rest)| format!("{}{}", r.dest.trim_end_matches('/'), rest))
        .unwrap_or_else(|| url.to_string())
}
