// src/solver/conda_exe.rs

//! Solving through the conda standalone executable
//!
//! Runs `create --dry-run --json` against the request's channels with
//! `CONDA_SUBDIR` pinned to the target platform and virtual packages
//! overridden from `virtual_specs`, then maps the reported `LINK` actions
//! back onto catalog records.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use tracing::{debug, info};

use super::{SolveRequest, SolveResult, Solver, virtual_overrides};
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::package::ARCHIVE_EXTENSIONS;
use crate::process;

#[derive(Debug, Deserialize)]
struct DryRunOutput {
    #[serde(default)]
    actions: Option<Actions>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Actions {
    #[serde(default, rename = "LINK")]
    link: Vec<LinkAction>,
}

#[derive(Debug, Deserialize)]
struct LinkAction {
    base_url: String,
    #[serde(alias = "subdir")]
    platform: String,
    dist_name: String,
    #[serde(default)]
    url: Option<String>,
}

/// Solver backed by `conda create --dry-run --json`
#[derive(Debug, Clone)]
pub struct CondaExeSolver {
    exe: PathBuf,
}

impl CondaExeSolver {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }

    pub fn exe(&self) -> &Path {
        &self.exe
    }

    /// Build the dry-run command for `request` targeting `prefix`
    pub fn command(&self, request: &SolveRequest, prefix: &Path) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.args(["create", "--dry-run", "--json", "--yes", "--override-channels"])
            .arg("--prefix")
            .arg(prefix);
        for channel in &request.channels {
            cmd.arg("--channel").arg(channel);
        }
        cmd.args(&request.specs);
        cmd.args(&request.virtual_specs);

        let (overrides, _) = virtual_overrides(&request.virtual_specs, request.platform);
        cmd.env("CONDA_SUBDIR", request.platform.subdir())
            .env("CONDA_PKGS_DIRS", prefix.join(".pkgs"))
            .envs(overrides);
        cmd
    }

    /// Map dry-run JSON onto catalog records, in reported order
    pub fn parse_output(&self, stdout: &[u8], catalog: &Catalog) -> Result<Vec<crate::package::PackageRecord>> {
        let output: DryRunOutput = serde_json::from_slice(stdout)
            .map_err(|e| Error::Plan(format!("unreadable solver output: {e}")))?;
        if let Some(err) = output.error.or(output.message.filter(|_| output.actions.is_none())) {
            return Err(Error::Plan(err));
        }

        let mut records = Vec::new();
        for link in output.actions.map(|a| a.link).unwrap_or_default() {
            let found = match &link.url {
                Some(url) => catalog.record_for_url(url),
                None => ARCHIVE_EXTENSIONS.iter().find_map(|ext| {
                    catalog.record(&link.base_url, &link.platform, &format!("{}{}", link.dist_name, ext))
                }),
            };
            let record = found.ok_or_else(|| {
                Error::catalog(
                    format!("{}/{}", link.base_url, link.platform),
                    format!("no index entry for {}", link.dist_name),
                )
            })?;
            if !records.contains(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

impl Solver for CondaExeSolver {
    fn name(&self) -> &str {
        "conda-exe"
    }

    fn solve(&self, request: &SolveRequest, catalog: &Catalog) -> Result<SolveResult> {
        info!(
            "Solving {} ({} specs) for {}",
            request.env_name,
            request.specs.len(),
            request.platform
        );
        let scratch = TempDir::new()?;
        let prefix = scratch.path().join("env");
        let mut cmd = self.command(request, &prefix);

        // The solver reports unsatisfiable specs as JSON on stdout with a
        // nonzero exit status.
        let output = cmd.output().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::ToolNotFound(self.exe.display().to_string()),
            _ => Error::Plan(format!("cannot run {}: {e}", self.exe.display())),
        })?;
        if !output.status.success() && output.stdout.is_empty() {
            return Err(Error::ToolFailed {
                tool: self.exe.display().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let records = self.parse_output(&output.stdout, catalog)?;
        debug!("{} resolved {} packages", process::command_line(&cmd).join(" "), records.len());

        let (_, unsatisfied) = virtual_overrides(&request.virtual_specs, request.platform);
        Ok(SolveResult {
            records,
            unsatisfied_virtual_specs: unsatisfied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ChannelIndex, IndexEntry};
    use crate::platform::Platform;
    use std::collections::BTreeMap;

    fn catalog() -> Catalog {
        let mut packages = BTreeMap::new();
        packages.insert(
            "python-3.11.4-h0_0.conda".to_string(),
            IndexEntry {
                name: "python".into(),
                version: "3.11.4".into(),
                build: "h0_0".into(),
                ..Default::default()
            },
        );
        Catalog::from_indices(vec![ChannelIndex {
            channel_url: "https://repo.example.com/main".into(),
            embedded_url: "https://repo.example.com/main".into(),
            subdir: "linux-64".into(),
            packages,
        }])
    }

    fn request() -> SolveRequest {
        SolveRequest {
            env_name: "base".into(),
            platform: Platform::Linux64,
            channels: vec!["https://repo.example.com/main".into()],
            channels_remap: Vec::new(),
            specs: vec!["python 3.11".into()],
            virtual_specs: vec!["__glibc>=2.17".into()],
        }
    }

    #[test]
    fn test_command_pins_subdir_and_overrides() {
        let solver = CondaExeSolver::new("/opt/conda.exe");
        let cmd = solver.command(&request(), Path::new("/tmp/p"));
        let line = process::command_line(&cmd);
        assert_eq!(line[0], "/opt/conda.exe");
        assert!(line.contains(&"--dry-run".to_string()));
        assert!(line.contains(&"python 3.11".to_string()));
        assert!(line.contains(&"__glibc>=2.17".to_string()));

        let envs: BTreeMap<String, String> = cmd
            .get_envs()
            .filter_map(|(k, v)| Some((k.to_string_lossy().into_owned(), v?.to_string_lossy().into_owned())))
            .collect();
        assert_eq!(envs.get("CONDA_SUBDIR"), Some(&"linux-64".to_string()));
        assert_eq!(envs.get("CONDA_OVERRIDE_GLIBC"), Some(&"2.17".to_string()));
    }

    #[test]
    fn test_parse_output_maps_link_actions() {
        let solver = CondaExeSolver::new("conda");
        let json = br#"{"actions": {"LINK": [
            {"base_url": "https://repo.example.com/main", "platform": "linux-64",
             "dist_name": "python-3.11.4-h0_0", "name": "python"}
        ]}, "success": true}"#;
        let records = solver.parse_output(json, &catalog()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].filename, "python-3.11.4-h0_0.conda");

        let missing = br#"{"actions": {"LINK": [
            {"base_url": "https://repo.example.com/main", "platform": "linux-64",
             "dist_name": "tk-8.6-0"}
        ]}}"#;
        let err = solver.parse_output(missing, &catalog()).unwrap_err();
        assert!(err.to_string().contains("tk-8.6-0"));

        let failed = br#"{"error": "PackagesNotFoundError: nope", "exception_name": "PackagesNotFoundError"}"#;
        assert!(matches!(solver.parse_output(failed, &catalog()), Err(Error::Plan(_))));
    }
}
