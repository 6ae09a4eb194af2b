// src/solver/mod.rs

//! Solver adapters
//!
//! The planner never resolves dependencies itself. It hands a
//! [`SolveRequest`] and the fetched [`Catalog`] to a [`Solver`] and gets
//! back an ordered, deduplicated list of package records.
//!
//! Implementations:
//! - [`CondaExeSolver`]: the conda standalone executable in dry-run mode
//! - [`ExplicitSolver`]: an `@EXPLICIT` lockfile, shipped verbatim
//! - [`ExistingEnvSolver`]: the packages of an existing prefix

mod conda_exe;
mod existing;
mod explicit;

pub use conda_exe::CondaExeSolver;
pub use existing::ExistingEnvSolver;
pub use explicit::{EnvironmentFile, ExplicitSolver};

use std::collections::BTreeMap;

use crate::catalog::Catalog;
use crate::error::Result;
use crate::package::{PackageRecord, spec_name};
use crate::platform::{Os, Platform};
use crate::recipe::ChannelRemap;

/// Input to one solve
#[derive(Debug, Clone, PartialEq)]
pub struct SolveRequest {
    /// `base` or the extra environment name
    pub env_name: String,
    pub platform: Platform,
    /// Normalized channel URLs, highest priority first
    pub channels: Vec<String>,
    pub channels_remap: Vec<ChannelRemap>,
    pub specs: Vec<String>,
    pub virtual_specs: Vec<String>,
}

/// Output of one solve
#[derive(Debug, Clone, Default)]
pub struct SolveResult {
    /// Ordered, deduplicated records
    pub records: Vec<PackageRecord>,
    /// Virtual specs the solver could not mark satisfied
    pub unsatisfied_virtual_specs: Vec<String>,
}

/// A dependency solver
pub trait Solver: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Resolve `request` against `catalog`
    fn solve(&self, request: &SolveRequest, catalog: &Catalog) -> Result<SolveResult>;
}

/// Split a virtual spec into its name and lower version bound
pub fn parse_virtual_spec(spec: &str) -> (String, Option<String>) {
    let name = spec_name(spec).unwrap_or(spec).to_string();
    let rest = spec.trim()[name.len()..].trim();
    let version = rest
        .split(',')
        .next()
        .map(|c| c.trim_start_matches(['>', '=', ' ']).trim())
        .filter(|v| !v.is_empty() && !v.starts_with(['<', '!']))
        .map(|v| v.trim_end_matches(".*").to_string());
    (name, version)
}

/// Derive `CONDA_OVERRIDE_*` variables for `virtual_specs` on `platform`
///
/// Returns the overrides and the specs that cannot hold on the platform.
pub fn virtual_overrides(
    virtual_specs: &[String],
    platform: Platform,
) -> (BTreeMap<String, String>, Vec<String>) {
    let mut overrides = BTreeMap::new();
    let mut unsatisfied = Vec::new();
    let os = platform.os();

    for spec in virtual_specs {
        let (name, version) = parse_virtual_spec(spec);
        let holds = match name.as_str() {
            "__glibc" | "__linux" => os == Os::Linux,
            "__osx" => os == Os::MacOs,
            "__win" => os == Os::Windows,
            "__unix" => platform.is_unix(),
            "__cuda" => version.is_some(),
            "__archspec" => true,
            _ => false,
        };
        if !holds {
            unsatisfied.push(spec.clone());
            continue;
        }
        if let Some(version) = version {
            let var = format!(
                "CONDA_OVERRIDE_{}",
                name.trim_start_matches('_').to_uppercase()
            );
            overrides.insert(var, version);
        }
    }
    (overrides, unsatisfied)
}
