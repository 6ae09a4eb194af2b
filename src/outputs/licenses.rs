// src/outputs/licenses.rs

//! `licenses` build output
//!
//! Each bundled package is unpacked into a scratch directory and its
//! `info/licenses/` tree is listed. Problems with a single package are
//! reported as warnings and leave that package's file list empty.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

use crate::emit::pkg::extract::extract_archive;
use crate::error::{Error, Result};
use crate::package::PackageRecord;
use crate::stager::StagedLayout;

/// How undecodable license text is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextErrors {
    /// Omit the text and warn
    Strict,
    /// Substitute U+FFFD for invalid sequences
    Replace,
    /// Drop invalid sequences
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LicenseOptions {
    pub include_text: bool,
    pub text_errors: TextErrors,
}

impl LicenseOptions {
    pub fn new(include_text: bool, text_errors: Option<&str>) -> Result<Self> {
        let text_errors = match text_errors {
            None | Some("strict") => TextErrors::Strict,
            Some("replace") => TextErrors::Replace,
            Some("ignore") => TextErrors::Ignore,
            Some(other) => {
                return Err(Error::recipe(
                    "build_outputs.licenses.text_errors",
                    format!("expected strict, replace or ignore, got '{other}'"),
                ));
            }
        };
        Ok(Self {
            include_text,
            text_errors,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LicenseFile {
    /// Path inside the package, relative to `info/licenses`
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageLicense {
    #[serde(rename = "type")]
    pub license_type: Option<String>,
    pub files: Vec<LicenseFile>,
}

/// Decode license bytes; `None` when strict decoding fails
pub fn decode(bytes: &[u8], errors: TextErrors) -> Option<String> {
    match errors {
        TextErrors::Strict => String::from_utf8(bytes.to_vec()).ok(),
        TextErrors::Replace => Some(String::from_utf8_lossy(bytes).into_owned()),
        TextErrors::Ignore => Some(
            bytes
                .utf8_chunks()
                .map(|chunk| chunk.valid())
                .collect::<String>(),
        ),
    }
}

/// List `info/licenses` of an unpacked package
pub fn scan_package(root: &Path, options: &LicenseOptions, warnings: &mut Vec<String>) -> Vec<LicenseFile> {
    let licenses = root.join("info").join("licenses");
    if !licenses.is_dir() {
        return Vec::new();
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(&licenses).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warnings.push(format!("cannot read {}: {e}", licenses.display()));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(&licenses)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let text = if options.include_text {
            match fs::read(entry.path()) {
                Ok(bytes) => {
                    let text = decode(&bytes, options.text_errors);
                    if text.is_none() {
                        warnings.push(format!("license file {rel} is not valid UTF-8; text omitted"));
                    }
                    text
                }
                Err(e) => {
                    warnings.push(format!("cannot read license file {rel}: {e}"));
                    None
                }
            }
        } else {
            None
        };
        files.push(LicenseFile { path: rel, text });
    }
    files
}

/// Collect licenses of every bundled package, keyed by dist name
pub fn collect(
    records: &[&PackageRecord],
    layout: &StagedLayout,
    options: &LicenseOptions,
) -> (BTreeMap<String, PackageLicense>, Vec<String>) {
    let mut report = BTreeMap::new();
    let mut warnings = Vec::new();

    for record in records {
        let dist = record.dist();
        let files = match tempfile::Builder::new().prefix("constructor-lic-").tempdir() {
            Ok(scratch) => match extract_archive(&layout.archive(record), scratch.path()) {
                Ok(()) => {
                    let mut package_warnings = Vec::new();
                    let files = scan_package(scratch.path(), options, &mut package_warnings);
                    warnings.extend(package_warnings.into_iter().map(|w| format!("{dist}: {w}")));
                    files
                }
                Err(e) => {
                    warnings.push(format!("{dist}: cannot unpack for license scan: {e}"));
                    Vec::new()
                }
            },
            Err(e) => {
                warnings.push(format!("{dist}: cannot create scratch directory: {e}"));
                Vec::new()
            }
        };
        debug!("{} license files in {}", files.len(), dist);
        report.insert(
            dist,
            PackageLicense {
                license_type: record.license.clone(),
                files,
            },
        );
    }
    (report, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_text_errors_option() {
        assert_eq!(LicenseOptions::new(true, None).unwrap().text_errors, TextErrors::Strict);
        assert_eq!(
            LicenseOptions::new(true, Some("replace")).unwrap().text_errors,
            TextErrors::Replace
        );
        assert!(LicenseOptions::new(true, Some("surrogateescape")).is_err());
    }

    #[test]
    fn test_decode() {
        let bad = b"MIT \xff License";
        assert_eq!(decode(bad, TextErrors::Strict), None);
        assert_eq!(decode(bad, TextErrors::Replace).unwrap(), "MIT \u{FFFD} License");
        assert_eq!(decode(bad, TextErrors::Ignore).unwrap(), "MIT  License");
        assert_eq!(decode(b"BSD", TextErrors::Strict).unwrap(), "BSD");
    }

    #[test]
    fn test_scan_package() {
        let dir = TempDir::new().unwrap();
        let lic = dir.path().join("info/licenses");
        fs::create_dir_all(lic.join("vendored")).unwrap();
        fs::write(lic.join("LICENSE.txt"), "MIT").unwrap();
        fs::write(lic.join("vendored/COPYING"), b"\xfe\xff").unwrap();

        let mut warnings = Vec::new();
        let options = LicenseOptions::new(true, None).unwrap();
        let files = scan_package(dir.path(), &options, &mut warnings);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "LICENSE.txt");
        assert_eq!(files[0].text.as_deref(), Some("MIT"));
        assert_eq!(files[1].path, "vendored/COPYING");
        assert_eq!(files[1].text, None);
        assert_eq!(warnings.len(), 1);

        let options = LicenseOptions::new(false, None).unwrap();
        let files = scan_package(dir.path(), &options, &mut Vec::new());
        assert!(files.iter().all(|f| f.text.is_none()));
    }

    #[test]
    fn test_package_without_licenses() {
        let dir = TempDir::new().unwrap();
        let options = LicenseOptions::new(true, None).unwrap();
        assert!(scan_package(dir.path(), &options, &mut Vec::new()).is_empty());
    }
}
