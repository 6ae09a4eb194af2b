// src/stager/extra_files.rs

//! User-declared `extra_files` and `temp_extra_files`
//!
//! Both are copied to their declared destination below the staging root.
//! Temporary files are also listed in `pkgs/temp_extra_files.txt` so the
//! installer removes them once installation completes.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::filesystem::{copy_atomic, copy_tree, safe_join, write_atomic};
use crate::recipe::ExtraFile;

/// File listing install-time-only paths, relative to `pkgs/`
pub const TEMP_EXTRA_FILES_LIST: &str = "temp_extra_files.txt";

/// Copy every entry to `root`; returns destinations relative to `root`
pub fn stage_extra_files(root: &Path, entries: &[ExtraFile]) -> Result<Vec<PathBuf>> {
    let mut staged = Vec::new();
    for entry in entries {
        for (src, dest) in entry.pairs() {
            let target = safe_join(root, &dest)?;
            if target.starts_with(root.join("pkgs")) {
                return Err(Error::recipe(
                    dest.display().to_string(),
                    "extra file destination collides with the package directory",
                ));
            }
            if src.is_dir() {
                copy_tree(&src, &target)?;
            } else {
                copy_atomic(&src, &target)?;
            }
            debug!("Staged extra file {} -> {}", src.display(), target.display());
            let rel = target.strip_prefix(root).map(Path::to_path_buf).unwrap_or(target);
            staged.push(rel);
        }
    }
    Ok(staged)
}

/// Stage temporary files and write their removal list into `pkgs/`
pub fn stage_temp_extra_files(root: &Path, entries: &[ExtraFile]) -> Result<Vec<PathBuf>> {
    let staged = stage_extra_files(root, entries)?;
    if !staged.is_empty() {
        let list: String = staged
            .iter()
            .map(|p| format!("{}\n", p.to_string_lossy().replace('\\', "/")))
            .collect();
        write_atomic(&root.join("pkgs").join(TEMP_EXTRA_FILES_LIST), list)?;
    }
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_stage_mapped_and_plain() {
        let src = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let readme = src.path().join("README.md");
        fs::write(&readme, "hi").unwrap();
        let mut mapped = BTreeMap::new();
        mapped.insert(readme.clone(), PathBuf::from("share/doc/README.md"));

        let staged = stage_extra_files(
            root.path(),
            &[ExtraFile::Path(readme), ExtraFile::Mapped(mapped)],
        )
        .unwrap();
        assert_eq!(
            staged,
            vec![PathBuf::from("README.md"), PathBuf::from("share/doc/README.md")]
        );
        assert_eq!(fs::read_to_string(root.path().join("share/doc/README.md")).unwrap(), "hi");
    }

    #[test]
    fn test_escape_and_pkgs_collision_rejected() {
        let src = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let file = src.path().join("a.txt");
        fs::write(&file, "x").unwrap();

        let mut escape = BTreeMap::new();
        escape.insert(file.clone(), PathBuf::from("../outside.txt"));
        assert!(stage_extra_files(root.path(), &[ExtraFile::Mapped(escape)]).is_err());

        let mut pkgs = BTreeMap::new();
        pkgs.insert(file, PathBuf::from("pkgs/urls"));
        assert!(stage_extra_files(root.path(), &[ExtraFile::Mapped(pkgs)]).is_err());
    }

    #[test]
    fn test_temp_files_are_listed() {
        let src = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let file = src.path().join("setup.sh");
        fs::write(&file, "echo").unwrap();
        stage_temp_extra_files(root.path(), &[ExtraFile::Path(file)]).unwrap();
        assert_eq!(
            fs::read_to_string(root.path().join("pkgs").join(TEMP_EXTRA_FILES_LIST)).unwrap(),
            "setup.sh\n"
        );
    }
}
