// src/lib.rs

//! Constructor: native installers from conda packages
//!
//! Builds self-contained installers (`.sh`, macOS `.pkg`, Windows `.exe`)
//! from a declarative recipe and a set of package channels.
//!
//! # Pipeline
//!
//! - Recipe: `construct.yaml` parsed with platform selectors applied
//! - Catalog: channel indices fetched once for every environment
//! - Planner: one frozen package list per environment, via a [`solver::Solver`]
//! - Stager: archives downloaded, verified and laid out in a staging root
//! - Emitters: one installer per requested type
//! - Outputs: hashes, lockfiles, package lists and license reports

pub mod catalog;
pub mod context;
pub mod emit;
mod error;
pub mod filesystem;
pub mod hash;
pub mod outputs;
pub mod package;
pub mod planner;
pub mod platform;
pub mod prefix;
pub mod process;
pub mod recipe;
pub mod solver;
pub mod stager;
pub mod template;
pub mod version;

pub use catalog::{Catalog, CatalogClient};
pub use context::{BuildContext, BuildOptions};
pub use error::{Error, Result};
pub use package::PackageRecord;
pub use planner::{EnvironmentPlan, PlanSet, Planner};
pub use platform::Platform;
pub use recipe::{InstallerType, Recipe};

use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::{debug, info};

use solver::{CondaExeSolver, Solver};

/// Solver executables looked up on `PATH` when `--conda-exe` is not given
const SOLVER_CANDIDATES: &[&str] = &["conda-standalone", "conda.exe", "conda"];

/// What a run produced
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Installers, in emission order
    pub installers: Vec<PathBuf>,
    /// Build outputs written next to the installers
    pub outputs: Vec<PathBuf>,
    pub warnings: Vec<String>,
    /// Staging root retained by `--debug`
    pub staging_dir: Option<PathBuf>,
    /// Frozen environments; the only result of a dry run
    pub plans: PlanSet,
}

/// Solver used for environments declared through `specs`
///
/// The explicit `--conda-exe` wins; otherwise the first candidate on
/// `PATH`. A solver that cannot be found fails only when a spec-based
/// environment is actually solved.
pub fn default_solver(options: &BuildOptions) -> CondaExeSolver {
    if let Some(exe) = &options.conda_exe {
        return CondaExeSolver::new(exe);
    }
    let exe = SOLVER_CANDIDATES
        .iter()
        .find_map(|name| process::find_tool(name).ok())
        .unwrap_or_else(|| PathBuf::from(SOLVER_CANDIDATES[0]));
    debug!("Using solver executable {}", exe.display());
    CondaExeSolver::new(exe)
}

/// Run a full build with the default solver
pub fn build(options: &BuildOptions) -> Result<BuildReport> {
    let solver = default_solver(options);
    build_with_solver(options, &solver)
}

/// Run a full build, solving spec-based environments with `solver`
pub fn build_with_solver(options: &BuildOptions, solver: &dyn Solver) -> Result<BuildReport> {
    let (recipe, recipe_warnings) = recipe::parse_recipe_dir(&options.recipe_dir, options.platform)?;
    info!(
        "Building {} {} for {}",
        recipe.name, recipe.version, recipe.platform
    );

    let client = CatalogClient::new()?;
    let (catalog, mut plans) = {
        let planner = Planner::new(&recipe, solver)?;
        let catalog = planner.fetch_catalog(&client)?;
        let plans = planner.plan(&catalog)?;
        (catalog, plans)
    };
    let mut warnings = recipe_warnings;
    warnings.append(&mut plans.warnings);
    plans.warnings = warnings;

    if options.dry_run {
        info!("Dry run: nothing staged or emitted");
        return Ok(BuildReport {
            warnings: plans.warnings.clone(),
            plans,
            ..Default::default()
        });
    }

    std::fs::create_dir_all(&options.output_dir)
        .map_err(|e| Error::io_at(&options.output_dir, e))?;

    let mut ctx = BuildContext::new(recipe, plans, options)?;
    let layout = stager::stage(&mut ctx, &client, &catalog)?;
    for itype in ctx.installer_types.clone() {
        emit::emit(&mut ctx, &layout, itype)?;
    }
    let written = outputs::write_outputs(&mut ctx, &layout)?;

    let BuildContext {
        staging,
        outputs: installers,
        warnings,
        plans,
        ..
    } = ctx;
    let staging_dir = staging.finish()?;
    Ok(BuildReport {
        installers,
        outputs: written,
        warnings,
        staging_dir,
        plans,
    })
}

/// Remove the download cache of the target platform
///
/// The platform is the `--platform` override, else the recipe's declared
/// platform, else the host.
pub fn clean(options: &BuildOptions) -> Result<Option<PathBuf>> {
    let path = options.recipe_dir.join(recipe::RECIPE_FILENAME);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(Error::io_at(&path, e)),
    };
    let platform = recipe::parser::resolve_platform(&content, options.platform, &mut Vec::new())?;
    let cache = options.cache_dir_for(platform)?;
    if !cache.exists() {
        info!("No package cache at {}", cache.display());
        return Ok(None);
    }
    std::fs::remove_dir_all(&cache).map_err(|e| Error::io_at(&cache, e))?;
    info!("Removed package cache {}", cache.display());
    Ok(Some(cache))
}

/// Human-readable listing of every planned environment
pub fn describe_plans(plans: &PlanSet) -> String {
    let mut out = String::new();
    for plan in plans.all() {
        let _ = writeln!(out, "Environment {} ({} packages)", plan.name, plan.records.len());
        for r in &plan.records {
            let _ = writeln!(
                out,
                "  {:<24} {:<12} {:<20} {}",
                r.name, r.version, r.build_string, r.remapped_channel_url
            );
        }
        if !plan.excluded.is_empty() {
            let _ = writeln!(out, "  excluded: {}", plan.excluded.join(", "));
        }
    }
    out
}
