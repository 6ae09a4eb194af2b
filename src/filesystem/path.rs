// src/filesystem/path.rs

//! Relative path handling for staged files
//!
//! Destinations in the staging tree come from recipes and channel indices.
//! Both must stay below the staging root.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Normalize a destination path relative to the staging root
///
/// Leading separators and `.` components are dropped; `..` is rejected.
pub fn sanitize_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let path_str = path.to_string_lossy();
    let relative = path_str.trim_start_matches(['/', '\\']);

    let mut normalized = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::Staging(format!("path escapes the prefix: {path_str}")));
            }
            Component::Prefix(_) | Component::RootDir => {}
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(Error::Staging(format!("empty destination path: '{path_str}'")));
    }
    Ok(normalized)
}

/// Join `root` with a sanitized relative `path`
pub fn safe_join(root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<PathBuf> {
    Ok(root.as_ref().join(sanitize_path(path)?))
}

/// Check a single file name (archive names from channel indices)
pub fn sanitize_filename(name: &str) -> Result<&str> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(Error::Staging(format!("invalid file name: '{name}'")));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path_normal() {
        assert_eq!(
            sanitize_path("share/doc/README").unwrap(),
            PathBuf::from("share/doc/README")
        );
        assert_eq!(
            sanitize_path("/etc/conda/.condarc").unwrap(),
            PathBuf::from("etc/conda/.condarc")
        );
        assert_eq!(sanitize_path("./a/./b").unwrap(), PathBuf::from("a/b"));
    }

    #[test]
    fn test_sanitize_path_rejects_traversal_and_empty() {
        assert!(sanitize_path("../etc/passwd").is_err());
        assert!(sanitize_path("a/../../b").is_err());
        assert!(sanitize_path("").is_err());
        assert!(sanitize_path("/").is_err());
    }

    #[test]
    fn test_safe_join() {
        assert_eq!(
            safe_join("/stage", "bin/tool").unwrap(),
            PathBuf::from("/stage/bin/tool")
        );
        assert!(safe_join("/stage", "../x").is_err());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("pip-23.1-py_0.conda").unwrap(), "pip-23.1-py_0.conda");
        assert!(sanitize_filename("../pip.conda").is_err());
        assert!(sanitize_filename("sub/pip.conda").is_err());
        assert!(sanitize_filename("..").is_err());
    }
}
