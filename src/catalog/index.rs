// src/catalog/index.rs

//! Channel index (repodata) parsing and normalization

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::package::archive_extension;

/// One package entry of a channel index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: String,
    pub version: String,
    pub build: String,
    #[serde(default)]
    pub build_number: u64,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constrains: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    /// Installed files, present only in indices that publish them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawRepodata {
    #[serde(default)]
    packages: BTreeMap<String, IndexEntry>,
    #[serde(default, rename = "packages.conda")]
    packages_conda: BTreeMap<String, IndexEntry>,
}

/// Normalized index of one `(channel, subdir)` pair
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelIndex {
    /// URL the index was fetched from (without subdir)
    pub channel_url: String,
    /// URL the channel is labeled with inside the installer
    pub embedded_url: String,
    pub subdir: String,
    /// Filename to entry, across both archive formats
    pub packages: BTreeMap<String, IndexEntry>,
}

impl ChannelIndex {
    /// URL of the `repodata.json` for a channel and subdir
    pub fn repodata_url(channel_url: &str, subdir: &str) -> String {
        format!("{}/{}/repodata.json", channel_url.trim_end_matches('/'), subdir)
    }

    /// Parse raw `repodata.json` bytes fetched from `url`
    pub fn parse(
        url: &str,
        channel_url: &str,
        embedded_url: &str,
        subdir: &str,
        data: &[u8],
    ) -> Result<Self> {
        let raw: RawRepodata = serde_json::from_slice(data)
            .map_err(|e| Error::catalog(url, format!("malformed index: {e}")))?;

        let mut packages = BTreeMap::new();
        for (filename, entry) in raw.packages.into_iter().chain(raw.packages_conda) {
            if archive_extension(&filename).is_none() {
                return Err(Error::catalog(
                    url,
                    format!("index entry {filename} is not a package archive"),
                ));
            }
            if entry.name.is_empty() || entry.version.is_empty() {
                return Err(Error::catalog(
                    url,
                    format!("index entry {filename} lacks name or version"),
                ));
            }
            packages.insert(filename, entry);
        }

        Ok(Self {
            channel_url: channel_url.trim_end_matches('/').to_string(),
            embedded_url: embedded_url.trim_end_matches('/').to_string(),
            subdir: subdir.to_string(),
            packages,
        })
    }

    pub fn get(&self, filename: &str) -> Option<&IndexEntry> {
        self.packages.get(filename)
    }

    /// Entries whose package name is `name`
    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = (&'a String, &'a IndexEntry)> {
        self.packages.iter().filter(move |(_, e)| e.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPODATA: &str = r#"{
        "info": {"subdir": "linux-64"},
        "packages": {
            "pip-23.1-py_0.tar.bz2": {"name": "pip", "version": "23.1", "build": "py_0",
                "build_number": 0, "depends": ["python"], "md5": "aa", "size": 10}
        },
        "packages.conda": {
            "python-3.11.4-h0_0.conda": {"name": "python", "version": "3.11.4", "build": "h0_0",
                "depends": [], "md5": "bb", "sha256": "cc", "size": 20}
        }
    }"#;

    #[test]
    fn test_parse_merges_both_formats() {
        let idx = ChannelIndex::parse(
            "https://repo.example.com/main/linux-64/repodata.json",
            "https://repo.example.com/main/",
            "https://repo.example.com/main",
            "linux-64",
            REPODATA.as_bytes(),
        )
        .unwrap();
        assert_eq!(idx.packages.len(), 2);
        assert_eq!(idx.channel_url, "https://repo.example.com/main");
        assert_eq!(idx.get("python-3.11.4-h0_0.conda").unwrap().size, 20);
        assert_eq!(idx.named("pip").count(), 1);
    }

    #[test]
    fn test_malformed_index_is_not_transient() {
        let err = ChannelIndex::parse("u", "c", "c", "linux-64", b"{not json").unwrap_err();
        assert!(matches!(err, Error::Catalog { transient: false, .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_repodata_url() {
        assert_eq!(
            ChannelIndex::repodata_url("file:///tmp/local/", "noarch"),
            "file:///tmp/local/noarch/repodata.json"
        );
    }
}
