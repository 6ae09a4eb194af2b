// src/process.rs

//! External tool invocation
//!
//! Installer assembly shells out to platform tools (`pkgbuild`,
//! `makensis`, `codesign`, ...). Tools are located on `PATH` with `which`
//! and run to completion with captured output.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::{Command, Output};
use tracing::debug;

use crate::error::{Error, Result};

/// Locate `name` on `PATH`
pub fn find_tool(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| Error::ToolNotFound(name.to_string()))
}

/// Render a command as a display string, for logs and tests
pub fn command_line(cmd: &Command) -> Vec<String> {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|s: &OsStr| s.to_string_lossy().into_owned())
        .collect()
}

/// Last `max` characters of a tool's stderr, falling back to stdout
fn tail(output: &Output, max: usize) -> String {
    let text = if output.stderr.is_empty() {
        String::from_utf8_lossy(&output.stdout)
    } else {
        String::from_utf8_lossy(&output.stderr)
    };
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(max.saturating_sub(1))
        .map_or(0, |(i, _)| i);
    text[start..].to_string()
}

/// Run `cmd` to completion; a nonzero exit is [`Error::ToolFailed`]
pub fn run(tool: &str, cmd: &mut Command) -> Result<Output> {
    debug!("Running {}", command_line(cmd).join(" "));
    let output = cmd.output().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::ToolNotFound(tool.to_string()),
        _ => Error::ToolFailed {
            tool: tool.to_string(),
            status: "spawn failure".to_string(),
            stderr: e.to_string(),
        },
    })?;

    if !output.status.success() {
        return Err(Error::ToolFailed {
            tool: tool.to_string(),
            status: output.status.to_string(),
            stderr: tail(&output, 2000),
        });
    }
    Ok(output)
}
