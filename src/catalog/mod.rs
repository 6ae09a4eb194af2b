// src/catalog/mod.rs

//! Channel catalogs
//!
//! Fetches `repodata.json` for every `(channel, subdir)` pair a build
//! needs, normalizes it into [`ChannelIndex`] values, and writes the
//! offline snapshots embedded in installers.

mod client;
mod index;
pub mod snapshot;

pub use client::{CatalogClient, file_url_path};
pub use index::{ChannelIndex, IndexEntry};

use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::package::{PackageRecord, remap_url};
use crate::platform::Platform;
use crate::recipe::ChannelRemap;

/// Default channel alias for bare channel names
pub const DEFAULT_CHANNEL_ALIAS: &str = "https://conda.anaconda.org";

/// Turn a channel name, path or URL into a URL without trailing slash
pub fn normalize_channel(channel: &str, alias: Option<&str>) -> String {
    let channel = channel.trim().trim_end_matches('/');
    if channel.contains("://") {
        return channel.to_string();
    }
    if channel.starts_with('/') {
        return format!("file://{channel}");
    }
    let alias = alias.unwrap_or(DEFAULT_CHANNEL_ALIAS).trim_end_matches('/');
    format!("{alias}/{channel}")
}

/// Channels to fetch: the listed channels, then every remap source
pub fn fetch_channels(channels: &[String], remaps: &[ChannelRemap], alias: Option<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let candidates = channels
        .iter()
        .map(|c| normalize_channel(c, alias))
        .chain(remaps.iter().map(|r| normalize_channel(&r.src, alias)));
    for c in candidates {
        if !out.contains(&c) {
            out.push(c);
        }
    }
    out
}

/// All indices fetched for one build, in channel priority order
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    indices: Vec<ChannelIndex>,
}

impl Catalog {
    pub fn from_indices(indices: Vec<ChannelIndex>) -> Self {
        Self { indices }
    }

    /// Fetch the platform subdir and `noarch` of every channel
    ///
    /// A channel must provide at least one of the two subdirs.
    pub fn fetch(
        client: &CatalogClient,
        channels: &[String],
        remaps: &[ChannelRemap],
        platform: Platform,
    ) -> Result<Self> {
        let mut indices = Vec::new();
        for channel in channels {
            let embedded = remap_url(channel, remaps);
            let mut found = 0;
            for subdir in [platform.subdir(), "noarch"] {
                let url = ChannelIndex::repodata_url(channel, subdir);
                info!("Fetching index {}", url);
                match client.fetch_bytes(&url) {
                    Ok(data) => {
                        let index = ChannelIndex::parse(&url, channel, &embedded, subdir, &data)?;
                        debug!("{} packages in {}/{}", index.packages.len(), channel, subdir);
                        indices.push(index);
                        found += 1;
                    }
                    Err(e) if !e.is_transient() => {
                        warn!("No index at {}: {}", url, e);
                    }
                    Err(e) => return Err(e),
                }
            }
            if found == 0 {
                return Err(Error::catalog(
                    channel.clone(),
                    format!("channel has neither {} nor noarch", platform.subdir()),
                ));
            }
        }
        Ok(Self { indices })
    }

    pub fn indices(&self) -> &[ChannelIndex] {
        &self.indices
    }

    /// Indices restricted to the given channels, keeping their order
    pub fn restricted(&self, channels: &[String]) -> Vec<&ChannelIndex> {
        channels
            .iter()
            .flat_map(|c| self.indices.iter().filter(move |i| &i.channel_url == c))
            .collect()
    }

    /// Look up one archive in one channel and subdir
    pub fn record(&self, channel_url: &str, subdir: &str, filename: &str) -> Option<PackageRecord> {
        let channel_url = channel_url.trim_end_matches('/');
        self.indices
            .iter()
            .find(|i| i.channel_url == channel_url && i.subdir == subdir)
            .and_then(|i| {
                i.get(filename).map(|e| {
                    PackageRecord::from_entry(&i.channel_url, &i.embedded_url, &i.subdir, filename, e)
                })
            })
    }

    /// Look up an archive by its full URL (`<channel>/<subdir>/<filename>`)
    pub fn record_for_url(&self, url: &str) -> Option<PackageRecord> {
        let url = url.split('#').next().unwrap_or(url);
        let (rest, filename) = url.rsplit_once('/')?;
        let (channel, subdir) = rest.rsplit_once('/')?;
        self.record(channel, subdir, filename)
    }

    /// Find an archive by filename in the given channels, first match wins
    pub fn find_filename(&self, channels: &[String], filename: &str) -> Option<PackageRecord> {
        self.restricted(channels).into_iter().find_map(|i| {
            i.get(filename).map(|e| {
                PackageRecord::from_entry(&i.channel_url, &i.embedded_url, &i.subdir, filename, e)
            })
        })
    }

    /// Every record of package `name` across the given channels
    pub fn records_named(&self, channels: &[String], name: &str) -> Vec<PackageRecord> {
        self.restricted(channels)
            .into_iter()
            .flat_map(|i| {
                i.named(name).map(|(f, e)| {
                    PackageRecord::from_entry(&i.channel_url, &i.embedded_url, &i.subdir, f, e)
                })
            })
            .collect()
    }

    /// Distinct `(embedded channel, subdir)` pairs, in fetch order
    pub fn snapshot_keys(&self) -> Vec<(String, String)> {
        let mut seen = BTreeSet::new();
        self.indices
            .iter()
            .filter(|i| seen.insert((i.embedded_url.clone(), i.subdir.clone())))
            .map(|i| (i.embedded_url.clone(), i.subdir.clone()))
            .collect()
    }
}
