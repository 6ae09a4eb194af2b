// src/error.rs

//! Error types for the installer build pipeline
//!
//! Each variant corresponds to one pipeline component. The CLI maps
//! variants onto exit codes with [`Error::exit_code`]:
//!
//! | Code | Meaning |
//! |------|---------|
//! | 1 | Recipe or validation error |
//! | 2 | Resolution or network error |
//! | 3 | Staging, emitter, or toolchain error |

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for constructor
#[derive(Error, Debug)]
pub enum Error {
    /// Recipe validation, unknown options, missing referenced files
    #[error("recipe error in {location}: {message}")]
    Recipe { location: String, message: String },

    /// Network failure or malformed index
    #[error("catalog error for {url}: {message}")]
    Catalog {
        url: String,
        message: String,
        /// Whether retrying could succeed
        transient: bool,
    },

    /// Solver failure, duplicate names, unsatisfied virtual specs
    #[error("planning error: {0}")]
    Plan(String),

    /// Two packages contribute the same file
    #[error("duplicate file {path} provided by {first} and {second}")]
    DuplicateFile {
        path: String,
        first: String,
        second: String,
    },

    /// Download verification, disk, transmutation failures
    #[error("staging error: {0}")]
    Staging(String),

    /// Downloaded content does not match the catalog
    #[error("{algorithm} mismatch for {filename}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        filename: String,
        algorithm: String,
        expected: String,
        actual: String,
    },

    /// Template rendering or installer assembly failure
    #[error("emit error: {0}")]
    Emit(String),

    /// Required external tool is not installed
    #[error("required tool not found: {0}")]
    ToolNotFound(String),

    /// External tool exited unsuccessfully
    #[error("{tool} failed with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    /// Build output could not be produced
    #[error("build output {output} failed: {message}")]
    Post { output: String, message: String },

    #[error("I/O error at {path}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for constructor operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build a recipe error at a location (a file path or recipe key)
    pub fn recipe(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Recipe {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Build a catalog error that is safe to retry
    pub fn transient(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Catalog {
            url: url.into(),
            message: message.into(),
            transient: true,
        }
    }

    /// Build a catalog error that must not be retried
    pub fn catalog(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Catalog {
            url: url.into(),
            message: message.into(),
            transient: false,
        }
    }

    /// Attach a path to an I/O error
    pub fn io_at(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::IoAt {
            path: path.into(),
            source,
        }
    }

    /// Whether the operation that produced this error may be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Catalog { transient: true, .. })
    }

    /// Name of the pipeline component the error originated in
    pub fn component(&self) -> &'static str {
        match self {
            Self::Recipe { .. } | Self::Yaml(_) => "recipe",
            Self::Catalog { .. } => "catalog",
            Self::Plan(_) | Self::DuplicateFile { .. } => "planner",
            Self::Staging(_) | Self::ChecksumMismatch { .. } => "stager",
            Self::Emit(_) | Self::ToolNotFound(_) | Self::ToolFailed { .. } => "emitter",
            Self::Post { .. } => "outputs",
            Self::IoAt { .. } | Self::Io(_) | Self::Json(_) => "io",
        }
    }

    /// Process exit code the CLI reports for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Recipe { .. } | Self::Yaml(_) => 1,
            Self::Catalog { .. } | Self::Plan(_) | Self::DuplicateFile { .. } => 2,
            _ => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::recipe("construct.yaml", "bad").exit_code(), 1);
        assert_eq!(Error::transient("https://x", "timeout").exit_code(), 2);
        assert_eq!(Error::Plan("no python".into()).exit_code(), 2);
        assert_eq!(Error::Emit("template".into()).exit_code(), 3);
        assert_eq!(Error::ToolNotFound("makensis".into()).exit_code(), 3);
    }

    #[test]
    fn test_transient_flag() {
        assert!(Error::transient("u", "m").is_transient());
        assert!(!Error::catalog("u", "m").is_transient());
        assert!(!Error::Staging("x".into()).is_transient());
    }

    #[test]
    fn test_component_names() {
        let err = Error::DuplicateFile {
            path: "bin/x".into(),
            first: "a-1-0".into(),
            second: "b-1-0".into(),
        };
        assert_eq!(err.component(), "planner");
        assert!(err.to_string().contains("bin/x"));
    }
}
