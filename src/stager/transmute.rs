// src/stager/transmute.rs

//! Re-packing archives between `.tar.bz2` and `.conda`
//!
//! Done by the external `cph` tool. The transmuted file replaces the
//! original in every manifest, with size and hashes taken from the new
//! file.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

use crate::error::{Error, Result};
use crate::hash;
use crate::package::{PackageRecord, with_extension};
use crate::process;

/// `cph transmute <archive> <ext> --out-folder <dir>`
pub fn transmute_command(cph: &Path, archive: &Path, target_ext: &str, out_dir: &Path) -> Command {
    let mut cmd = Command::new(cph);
    cmd.arg("transmute")
        .arg(archive)
        .arg(target_ext.trim_start_matches('.'))
        .arg("--out-folder")
        .arg(out_dir);
    cmd
}

/// Whether `record` must be re-packed to reach `target_ext`
pub fn needs_transmute(record: &PackageRecord, target_ext: &str) -> bool {
    record.extension().is_some_and(|ext| ext != target_ext)
}

/// Re-pack `archive` of `record` into `out_dir`
///
/// Returns the record describing the new file and its path.
pub fn transmute(
    record: &PackageRecord,
    archive: &Path,
    target_ext: &str,
    out_dir: &Path,
) -> Result<(PackageRecord, PathBuf)> {
    let filename = with_extension(&record.filename, target_ext);
    let dest = out_dir.join(&filename);

    if !dest.is_file() {
        let cph = process::find_tool("cph")?;
        fs::create_dir_all(out_dir).map_err(|e| Error::io_at(out_dir, e))?;
        info!("Transmuting {} to {}", record.filename, target_ext);
        process::run("cph", &mut transmute_command(&cph, archive, target_ext, out_dir))?;
        if !dest.is_file() {
            return Err(Error::Staging(format!(
                "transmuting {} did not produce {}",
                record.filename, filename
            )));
        }
    }

    Ok((describe(record, &filename, &dest)?, dest))
}

/// Copy of `record` describing `path`, renamed to `filename`
pub fn describe(record: &PackageRecord, filename: &str, path: &Path) -> Result<PackageRecord> {
    let (md5, sha256) = hash::md5_and_sha256(path).map_err(|e| Error::io_at(path, e))?;
    let size = fs::metadata(path).map_err(|e| Error::io_at(path, e))?.len();
    let mut out = record.clone();
    out.filename = filename.to_string();
    out.md5 = Some(md5);
    out.sha256 = Some(sha256);
    out.size = size;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::IndexEntry;

    fn record(filename: &str) -> PackageRecord {
        let entry = IndexEntry {
            name: "zlib".into(),
            version: "1.2.13".into(),
            build: "h0_0".into(),
            md5: Some("0".repeat(32)),
            ..Default::default()
        };
        PackageRecord::from_entry("https://repo.example.com/main", "https://repo.example.com/main", "linux-64", filename, &entry)
    }

    #[test]
    fn test_transmute_command() {
        let cmd = transmute_command(
            Path::new("/usr/bin/cph"),
            Path::new("/cache/zlib-1.2.13-h0_0.tar.bz2"),
            ".conda",
            Path::new("/stage/pkgs"),
        );
        assert_eq!(
            process::command_line(&cmd),
            vec![
                "/usr/bin/cph",
                "transmute",
                "/cache/zlib-1.2.13-h0_0.tar.bz2",
                "conda",
                "--out-folder",
                "/stage/pkgs"
            ]
        );
    }

    #[test]
    fn test_needs_transmute() {
        assert!(needs_transmute(&record("zlib-1.2.13-h0_0.tar.bz2"), ".conda"));
        assert!(!needs_transmute(&record("zlib-1.2.13-h0_0.conda"), ".conda"));
    }

    #[test]
    fn test_describe_recomputes_hashes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("zlib-1.2.13-h0_0.conda");
        fs::write(&path, b"abc").unwrap();
        let out = describe(&record("zlib-1.2.13-h0_0.tar.bz2"), "zlib-1.2.13-h0_0.conda", &path).unwrap();
        assert_eq!(out.filename, "zlib-1.2.13-h0_0.conda");
        assert_eq!(out.md5.as_deref(), Some("900150983cd24fb0d6963f7d28e17f72"));
        assert_eq!(out.size, 3);
    }
}
