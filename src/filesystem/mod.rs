// src/filesystem/mod.rs

//! Filesystem helpers for the staging tree and download cache
//!
//! Every file that another process could observe (the shared download
//! cache, the staging tree) is written to a sibling temporary file first
//! and renamed into place.

pub mod path;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub use path::{safe_join, sanitize_filename, sanitize_path};

/// Temporary sibling used while writing `dest`
fn temp_sibling(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}

fn ensure_parent(dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
    }
    Ok(())
}

/// Write `data` to `dest` through a temporary file and rename
pub fn write_atomic(dest: &Path, data: impl AsRef<[u8]>) -> Result<()> {
    ensure_parent(dest)?;
    let temp = temp_sibling(dest);
    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&temp)?;
        file.write_all(data.as_ref())?;
        file.sync_all()
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&temp);
        return Err(Error::io_at(&temp, e));
    }
    fs::rename(&temp, dest).map_err(|e| {
        let _ = fs::remove_file(&temp);
        Error::io_at(dest, e)
    })
}

/// Copy `src` to `dest` through a temporary file and rename
pub fn copy_atomic(src: &Path, dest: &Path) -> Result<u64> {
    ensure_parent(dest)?;
    let temp = temp_sibling(dest);
    let copied = fs::copy(src, &temp).map_err(|e| {
        let _ = fs::remove_file(&temp);
        Error::io_at(src, e)
    })?;
    fs::rename(&temp, dest).map_err(|e| {
        let _ = fs::remove_file(&temp);
        Error::io_at(dest, e)
    })?;
    Ok(copied)
}

/// Mark a file executable (no-op off Unix)
pub fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path).map_err(|e| Error::io_at(path, e))?.permissions();
        perms.set_mode(perms.mode() | 0o755);
        fs::set_permissions(path, perms).map_err(|e| Error::io_at(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Copy a directory tree, preserving relative layout
pub fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Staging(format!("cannot walk {}: {e}", src.display())))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::Staging(e.to_string()))?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::io_at(&target, e))?;
        } else {
            copy_atomic(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_parents_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("pkgs/cache/abc.json");
        write_atomic(&dest, b"{}").unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"{}");
        write_atomic(&dest, b"{\"a\":1}").unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "{\"a\":1}");
        let names: Vec<_> = fs::read_dir(dest.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_copy_tree() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::write(src.join("a/b/c.txt"), "c").unwrap();
        fs::write(src.join("top.txt"), "t").unwrap();
        let dest = dir.path().join("dest");
        copy_tree(&src, &dest).unwrap();
        assert_eq!(fs::read_to_string(dest.join("a/b/c.txt")).unwrap(), "c");
        assert_eq!(fs::read_to_string(dest.join("top.txt")).unwrap(), "t");
    }

    #[cfg(unix)]
    #[test]
    fn test_set_executable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let f = dir.path().join("installer.sh");
        fs::write(&f, "#!/bin/sh\n").unwrap();
        set_executable(&f).unwrap();
        let mode = fs::metadata(&f).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
