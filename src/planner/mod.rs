// src/planner/mod.rs

//! Environment planning
//!
//! Turns the recipe into one frozen [`EnvironmentPlan`] per environment:
//! the primary (`base`) environment plus every extra environment in recipe
//! order. For each environment the planner
//!
//! 1. resolves its effective settings ([`inheritance`])
//! 2. hands the request to a [`Solver`] chosen by the package source
//! 3. applies `exclude` to the solution
//! 4. orders the records ([`order`])
//! 5. checks the plan ([`conflict`])
//!
//! Hash conflicts and duplicate files are checked once over every plan.

pub mod conflict;
pub mod inheritance;
pub mod order;

pub use inheritance::{BASE_ENV, EnvSettings, PackageSource};
pub use order::TieBreak;

use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, CatalogClient};
use crate::error::{Error, Result};
use crate::package::{PackageRecord, remap_url};
use crate::prefix::validate_placeholders;
use crate::recipe::{ChannelRemap, Recipe};
use crate::solver::{ExistingEnvSolver, ExplicitSolver, SolveRequest, Solver};

/// Frozen package list of one environment
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnvironmentPlan {
    pub name: String,
    /// Install order
    pub records: Vec<PackageRecord>,
    pub user_requested_specs: Vec<String>,
    /// Names removed from the solution
    pub excluded: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub menu_packages: Option<Vec<String>>,
    pub channels: Vec<String>,
    pub channels_remap: Vec<ChannelRemap>,
}

impl EnvironmentPlan {
    pub fn is_base(&self) -> bool {
        self.name == BASE_ENV
    }

    /// Location of the environment relative to the install prefix, with a
    /// trailing slash unless empty
    pub fn install_root(&self) -> String {
        if self.is_base() {
            String::new()
        } else {
            format!("envs/{}/", self.name)
        }
    }

    /// Channels as labeled inside the installer
    pub fn embedded_channels(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for c in &self.channels {
            let c = remap_url(c, &self.channels_remap);
            if !out.contains(&c) {
                out.push(c);
            }
        }
        out
    }

    /// `@EXPLICIT` lockfile for this environment
    pub fn explicit_lockfile(&self, platform: &str) -> String {
        let mut out = format!("# platform: {platform}\n@EXPLICIT\n");
        for r in &self.records {
            out.push_str(&r.url_with_md5());
            out.push('\n');
        }
        out
    }
}

/// Every environment of a build
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanSet {
    pub primary: EnvironmentPlan,
    pub extra_envs: Vec<EnvironmentPlan>,
    /// Collected warnings, reported after a successful build
    #[serde(skip)]
    pub warnings: Vec<String>,
}

impl PlanSet {
    /// Primary first, then extra environments in recipe order
    pub fn all(&self) -> impl Iterator<Item = &EnvironmentPlan> {
        std::iter::once(&self.primary).chain(self.extra_envs.iter())
    }

    pub fn all_mut(&mut self) -> impl Iterator<Item = &mut EnvironmentPlan> {
        std::iter::once(&mut self.primary).chain(self.extra_envs.iter_mut())
    }

    pub fn env(&self, name: &str) -> Option<&EnvironmentPlan> {
        self.all().find(|p| p.name == name)
    }

    /// Distinct records across all environments, first appearance wins
    pub fn bundled(&self) -> Vec<&PackageRecord> {
        let mut seen = HashSet::new();
        self.all()
            .flat_map(|p| p.records.iter())
            .filter(|r| seen.insert(*r))
            .collect()
    }
}

/// Plans every environment of a recipe
pub struct Planner<'a> {
    recipe: &'a Recipe,
    solver: &'a dyn Solver,
    settings: Vec<EnvSettings>,
}

impl<'a> Planner<'a> {
    /// Resolve settings for every environment; `solver` handles spec sources
    pub fn new(recipe: &'a Recipe, solver: &'a dyn Solver) -> Result<Self> {
        Ok(Self {
            recipe,
            solver,
            settings: inheritance::all_settings(recipe)?,
        })
    }

    pub fn settings(&self) -> &[EnvSettings] {
        &self.settings
    }

    /// Union of every environment's channels, primary first
    pub fn channels_to_fetch(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for c in self.settings.iter().flat_map(|s| s.solve_channels()) {
            if !out.contains(&c) {
                out.push(c);
            }
        }
        out
    }

    /// Union of every environment's remaps, primary first
    pub fn remaps(&self) -> Vec<ChannelRemap> {
        let mut out: Vec<ChannelRemap> = Vec::new();
        for r in self.settings.iter().flat_map(|s| s.channels_remap.iter()) {
            if !out.contains(r) {
                out.push(r.clone());
            }
        }
        out
    }

    /// Fetch the indices every environment needs
    pub fn fetch_catalog(&self, client: &CatalogClient) -> Result<Catalog> {
        Catalog::fetch(client, &self.channels_to_fetch(), &self.remaps(), self.recipe.platform)
    }

    /// Plan every environment against `catalog`
    pub fn plan(&self, catalog: &Catalog) -> Result<PlanSet> {
        let requires_interpreter = self
            .recipe
            .installer_types()
            .iter()
            .any(|t| t.requires_interpreter());

        let mut warnings = Vec::new();
        let mut plans = Vec::with_capacity(self.settings.len());
        for settings in &self.settings {
            let require = requires_interpreter && settings.is_base();
            plans.push(self.plan_env(settings, catalog, require, &mut warnings)?);
        }

        conflict::check_hash_conflicts(&plans)?;
        if !self.recipe.ignore_duplicate_files {
            conflict::check_duplicate_files(&plans)?;
        }

        let mut plans = plans.into_iter();
        let primary = plans
            .next()
            .ok_or_else(|| Error::Plan("no primary environment".to_string()))?;
        Ok(PlanSet {
            primary,
            extra_envs: plans.collect(),
            warnings,
        })
    }

    fn plan_env(
        &self,
        settings: &EnvSettings,
        catalog: &Catalog,
        require_interpreter: bool,
        warnings: &mut Vec<String>,
    ) -> Result<EnvironmentPlan> {
        let request = SolveRequest {
            env_name: settings.name.clone(),
            platform: self.recipe.platform,
            channels: settings.solve_channels(),
            channels_remap: settings.channels_remap.clone(),
            specs: settings.specs.clone(),
            virtual_specs: settings.virtual_specs.clone(),
        };

        let result = match &settings.source {
            PackageSource::Solve => self.solver.solve(&request, catalog)?,
            PackageSource::Prefix(prefix) => ExistingEnvSolver::new(prefix).solve(&request, catalog)?,
            PackageSource::Explicit(urls) => ExplicitSolver::new(urls.clone()).solve(&request, catalog)?,
        };
        if !result.unsatisfied_virtual_specs.is_empty() {
            return Err(Error::Plan(format!(
                "virtual specs not satisfiable on {} for environment {}: {}",
                self.recipe.platform,
                settings.name,
                result.unsatisfied_virtual_specs.join(", ")
            )));
        }

        let mut records = result.records;
        for r in &mut records {
            r.remapped_channel_url = remap_url(&r.channel_url, &settings.channels_remap);
        }

        // Exclusions apply to the solution, not the request
        let mut excluded = Vec::new();
        for name in &settings.exclude {
            let before = records.len();
            records.retain(|r| &r.name != name);
            if records.len() < before {
                warn!("Excluding {} from environment {}", name, settings.name);
                excluded.push(name.clone());
            } else if settings.is_base() {
                warnings.push(format!("exclude: {name} is not part of the {} environment", settings.name));
            }
        }

        let tie = if settings.is_base() {
            TieBreak::SolverOrder
        } else {
            TieBreak::Alphabetical
        };
        let mut records = order::topological(records, tie);
        if require_interpreter {
            records = order::interpreter_first(records, &settings.name)?;
            order::check_interpreter_first(&records, &settings.name)?;
        }

        let min_placeholder = self.min_placeholder_len();
        for r in &records {
            validate_placeholders(r, min_placeholder)?;
        }

        let plan = EnvironmentPlan {
            name: settings.name.clone(),
            records,
            user_requested_specs: settings.user_requested_specs.clone(),
            excluded,
            menu_packages: settings.menu_packages.clone(),
            channels: settings.channels.clone(),
            channels_remap: settings.channels_remap.clone(),
        };
        conflict::check_unique_names(&plan)?;
        conflict::check_dependencies_present(&plan)?;

        info!(
            "Planned environment {} with {} packages via {}",
            plan.name,
            plan.records.len(),
            self.solver.name()
        );
        for r in &plan.records {
            debug!("  {} ({})", r.dist(), r.embedded_url());
        }
        Ok(plan)
    }

    /// Length of the default prefix when it is a literal absolute path
    fn min_placeholder_len(&self) -> usize {
        match self.recipe.default_prefix.as_deref() {
            Some(p) if p.starts_with('/') && !p.contains(['$', '~', '%']) => p.len(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ChannelIndex, IndexEntry};
    use crate::platform::Platform;
    use crate::recipe::parse_recipe;
    use crate::solver::SolveResult;
    use std::collections::BTreeMap;
    use std::path::Path;

    /// Picks the first catalog record per name and follows dependencies
    struct NameSolver;

    impl Solver for NameSolver {
        fn name(&self) -> &str {
            "by-name"
        }

        fn solve(&self, request: &SolveRequest, catalog: &Catalog) -> Result<SolveResult> {
            let mut queue: Vec<String> = request
                .specs
                .iter()
                .filter_map(|s| crate::package::spec_name(s).map(str::to_string))
                .collect();
            let mut records: Vec<PackageRecord> = Vec::new();
            while let Some(name) = queue.pop() {
                if records.iter().any(|r| r.name == name) {
                    continue;
                }
                let r = catalog
                    .records_named(&request.channels, &name)
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::Plan(format!("nothing provides {name}")))?;
                queue.extend(r.dependency_names().filter(|d| !d.starts_with("__")).map(str::to_string));
                records.push(r);
            }
            let (_, unsatisfied) = crate::solver::virtual_overrides(&request.virtual_specs, request.platform);
            Ok(SolveResult {
                records,
                unsatisfied_virtual_specs: unsatisfied,
            })
        }
    }

    fn entry(name: &str, depends: &[&str], files: &[&str]) -> (String, IndexEntry) {
        (
            format!("{name}-1.0-0.conda"),
            IndexEntry {
                name: name.to_string(),
                version: "1.0".to_string(),
                build: "0".to_string(),
                depends: depends.iter().map(|d| d.to_string()).collect(),
                files: files.iter().map(|f| f.to_string()).collect(),
                md5: Some(format!("{:0>32}", name.len())),
                ..Default::default()
            },
        )
    }

    fn catalog() -> Catalog {
        let packages: BTreeMap<String, IndexEntry> = [
            entry("python", &["tk", "zlib"], &["bin/python"]),
            entry("pip", &["python"], &["bin/pip"]),
            entry("tk", &[], &["lib/libtk.so"]),
            entry("zlib", &[], &["lib/libz.so"]),
            entry("git", &["zlib"], &["bin/git"]),
            entry("fakepip", &[], &["bin/pip"]),
        ]
        .into_iter()
        .collect();
        Catalog::from_indices(vec![ChannelIndex {
            channel_url: "https://repo.example.com/main".into(),
            embedded_url: "https://repo.example.com/main".into(),
            subdir: "linux-64".into(),
            packages,
        }])
    }

    fn recipe(extra: &str) -> Recipe {
        let text = format!(
            "name: Miniconda\nversion: '1.0'\nchannels: [https://repo.example.com/main/]\n\
             specs: [python 3.11, pip]\n{extra}"
        );
        parse_recipe(&text, Platform::Linux64, Path::new("/tmp"), "construct.yaml")
            .unwrap()
            .0
    }

    fn plan(recipe: &Recipe) -> Result<PlanSet> {
        Planner::new(recipe, &NameSolver)?.plan(&catalog())
    }

    fn names(plan: &EnvironmentPlan) -> Vec<&str> {
        plan.records.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_primary_plan_starts_with_interpreter() {
        let r = recipe("");
        let plans = plan(&r).unwrap();
        assert_eq!(plans.primary.records[0].name, "python");
        assert_eq!(plans.primary.records.len(), 4);
        assert_eq!(plans.primary.user_requested_specs, vec!["python 3.11", "pip"]);
    }

    #[test]
    fn test_exclude_inherited_and_overridden() {
        let r = recipe("exclude: [tk]\nextra_envs:\n  tools:\n    specs: [git, python]\n");
        let plans = plan(&r).unwrap();
        assert!(!names(&plans.primary).contains(&"tk"));
        assert!(!names(&plans.extra_envs[0]).contains(&"tk"));
        assert_eq!(plans.primary.excluded, vec!["tk"]);

        let r = recipe("exclude: [tk]\nextra_envs:\n  tools:\n    specs: [git, python]\n    exclude: []\n");
        let plans = plan(&r).unwrap();
        assert!(!names(&plans.primary).contains(&"tk"));
        assert!(names(&plans.extra_envs[0]).contains(&"tk"));
    }

    #[test]
    fn test_unmatched_exclude_warns_only_for_primary() {
        let r = recipe("exclude: [nothing]\nextra_envs:\n  tools:\n    specs: [git]\n");
        let plans = plan(&r).unwrap();
        assert_eq!(plans.warnings.len(), 1);
        assert!(plans.warnings[0].contains("nothing"));
    }

    #[test]
    fn test_extra_env_is_alphabetical_and_needs_no_interpreter() {
        let r = recipe("extra_envs:\n  tools:\n    specs: [git]\n");
        let plans = plan(&r).unwrap();
        assert_eq!(names(&plans.extra_envs[0]), vec!["zlib", "git"]);
        assert_eq!(plans.extra_envs[0].install_root(), "envs/tools/");
    }

    #[test]
    fn test_missing_interpreter_is_plan_error() {
        let mut r = recipe("");
        r.specs = vec!["git".into()];
        assert!(matches!(plan(&r), Err(Error::Plan(_))));

        // Windows installers carry their own runtime
        let text = "name: M\nversion: '1'\nchannels: [https://repo.example.com/main]\nspecs: [git]\n";
        let (r, _) = parse_recipe(text, Platform::Win64, Path::new("/tmp"), "construct.yaml").unwrap();
        let win_catalog = {
            let mut indices = catalog().indices().to_vec();
            indices[0].subdir = "win-64".into();
            Catalog::from_indices(indices)
        };
        let plans = Planner::new(&r, &NameSolver).unwrap().plan(&win_catalog).unwrap();
        assert_eq!(names(&plans.primary), vec!["zlib", "git"]);
    }

    #[test]
    fn test_unsatisfied_virtual_spec_is_fatal() {
        let r = recipe("virtual_specs: [__osx>=11]\n");
        let err = plan(&r).unwrap_err();
        assert!(err.to_string().contains("__osx>=11"));
    }

    #[test]
    fn test_duplicate_files_respect_flag() {
        let mut r = recipe("");
        r.specs = vec!["python".into(), "pip".into(), "fakepip".into()];
        assert!(plan(&r).is_ok());

        r.ignore_duplicate_files = false;
        assert!(matches!(plan(&r), Err(Error::DuplicateFile { .. })));
    }

    #[test]
    fn test_lockfile_and_bundled() {
        let r = recipe("extra_envs:\n  tools:\n    specs: [git]\n");
        let plans = plan(&r).unwrap();
        let lock = plans.primary.explicit_lockfile("linux-64");
        assert!(lock.starts_with("# platform: linux-64\n@EXPLICIT\n"));
        assert!(lock.contains("https://repo.example.com/main/linux-64/python-1.0-0.conda#"));
        // zlib is shared between environments
        assert_eq!(plans.bundled().len(), 5);
    }
}
