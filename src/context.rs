// src/context.rs

//! Run settings and the per-build accumulator
//!
//! [`BuildOptions`] carries the resolved settings of one invocation
//! (defaults, then environment variables, then CLI flags).
//! [`BuildContext`] is threaded through every pipeline stage and owns the
//! staging root.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::package::PackageRecord;
use crate::planner::PlanSet;
use crate::platform::Platform;
use crate::recipe::{InstallerType, Recipe};

/// Environment variable naming the conda standalone executable
pub const ENV_CONDA_EXE: &str = "CONSTRUCTOR_CONDA_EXE";
/// Environment variable overriding the download cache
pub const ENV_CACHE_DIR: &str = "CONSTRUCTOR_CACHE_DIR";

/// Resolved settings of one invocation
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub recipe_dir: PathBuf,
    pub output_dir: PathBuf,
    pub platform: Option<Platform>,
    pub conda_exe: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    /// Keep the staging root
    pub debug: bool,
    /// Plan only, emit nothing
    pub dry_run: bool,
    pub verbose: bool,
    /// Hide progress bars
    pub quiet: bool,
}

impl BuildOptions {
    pub fn new(recipe_dir: impl Into<PathBuf>) -> Self {
        Self {
            recipe_dir: recipe_dir.into(),
            output_dir: PathBuf::from("."),
            ..Default::default()
        }
    }

    /// Fill unset options from `CONSTRUCTOR_*` environment variables
    pub fn from_env(mut self) -> Self {
        if self.conda_exe.is_none() {
            self.conda_exe = env::var_os(ENV_CONDA_EXE).filter(|v| !v.is_empty()).map(PathBuf::from);
        }
        if self.cache_dir.is_none() {
            self.cache_dir = env::var_os(ENV_CACHE_DIR).filter(|v| !v.is_empty()).map(PathBuf::from);
        }
        self
    }

    /// Download cache for `platform`
    ///
    /// Defaults to `<home>/.conda/constructor/<platform>`.
    pub fn cache_dir_for(&self, platform: Platform) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.join(platform.subdir()));
        }
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Staging("cannot determine home directory for the package cache".to_string()))?;
        Ok(home.join(".conda").join("constructor").join(platform.subdir()))
    }
}

/// The exclusive temporary directory a build is staged in
#[derive(Debug)]
pub struct StagingRoot {
    dir: Option<TempDir>,
    path: PathBuf,
    keep: bool,
}

impl StagingRoot {
    /// Create a fresh staging root; `keep` retains it after the run
    pub fn create(keep: bool) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("constructor-").tempdir()?;
        let path = dir.path().to_path_buf();
        debug!("Staging in {}", path.display());
        Ok(Self {
            dir: Some(dir),
            path,
            keep,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `pkgs/` inside the staging root
    pub fn pkgs(&self) -> PathBuf {
        self.path.join("pkgs")
    }

    /// Release the root, deleting it unless kept
    pub fn finish(mut self) -> Result<Option<PathBuf>> {
        let Some(dir) = self.dir.take() else {
            return Ok(None);
        };
        if self.keep {
            let kept = dir.keep();
            info!("Keeping staging directory {}", kept.display());
            Ok(Some(kept))
        } else {
            dir.close().map_err(|e| Error::io_at(&self.path, e))?;
            Ok(None)
        }
    }
}

impl Drop for StagingRoot {
    fn drop(&mut self) {
        // Error paths drop the root without calling finish()
        if self.keep {
            if let Some(dir) = self.dir.take() {
                let kept = dir.keep();
                info!("Keeping staging directory {}", kept.display());
            }
        }
    }
}

/// Everything accumulated during one build
#[derive(Debug, Serialize)]
pub struct BuildContext {
    pub recipe: Recipe,
    #[serde(skip)]
    pub recipe_dir: PathBuf,
    #[serde(flatten)]
    pub plans: PlanSet,
    #[serde(skip)]
    pub staging: StagingRoot,
    pub cache_dir: PathBuf,
    #[serde(skip)]
    pub output_dir: PathBuf,
    pub installer_types: Vec<InstallerType>,
    /// Installers produced so far
    pub outputs: Vec<PathBuf>,
    /// Distinct shipped records, after staging
    pub bundled: Vec<PackageRecord>,
    #[serde(skip)]
    pub conda_exe: Option<PathBuf>,
    #[serde(skip)]
    pub warnings: Vec<String>,
    pub debug: bool,
    pub quiet: bool,
    pub started: DateTime<Utc>,
}

impl BuildContext {
    pub fn new(recipe: Recipe, plans: PlanSet, options: &BuildOptions) -> Result<Self> {
        let cache_dir = options.cache_dir_for(recipe.platform)?;
        let installer_types = recipe.installer_types();
        let warnings = plans.warnings.clone();
        Ok(Self {
            recipe_dir: options.recipe_dir.clone(),
            staging: StagingRoot::create(options.debug)?,
            output_dir: options.output_dir.clone(),
            conda_exe: options.conda_exe.clone(),
            debug: options.debug,
            quiet: options.quiet,
            recipe,
            plans,
            cache_dir,
            installer_types,
            outputs: Vec::new(),
            bundled: Vec::new(),
            warnings,
            started: Utc::now(),
        })
    }

    pub fn platform(&self) -> Platform {
        self.recipe.platform
    }

    pub fn staging_dir(&self) -> &Path {
        self.staging.path()
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }

    /// Output path of the installer of `itype`
    pub fn output_path(&self, itype: InstallerType) -> PathBuf {
        self.output_dir.join(self.recipe.installer_filename(itype))
    }

    /// `info.json` document: the context minus transient handles
    pub fn info_json(&self) -> Result<serde_json::Value> {
        let mut value = serde_json::to_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            let (name, version) = crate::version::split_name_version(&format!(
                "{} {}",
                self.recipe.name, self.recipe.version
            ));
            obj.insert("display_name".to_string(), name.into());
            obj.insert("display_version".to_string(), version.into());
            obj.insert("constructor_version".to_string(), env!("CARGO_PKG_VERSION").into());
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_dir_override() {
        let mut options = BuildOptions::new("/tmp/recipe");
        options.cache_dir = Some(PathBuf::from("/var/cache/ctor"));
        assert_eq!(
            options.cache_dir_for(Platform::Linux64).unwrap(),
            PathBuf::from("/var/cache/ctor/linux-64")
        );
    }

    #[test]
    fn test_staging_root_removed_unless_kept() {
        let root = StagingRoot::create(false).unwrap();
        let path = root.path().to_path_buf();
        assert!(path.is_dir());
        assert_eq!(root.finish().unwrap(), None);
        assert!(!path.exists());

        let root = StagingRoot::create(true).unwrap();
        let path = root.path().to_path_buf();
        drop(root);
        assert!(path.is_dir());
        std::fs::remove_dir_all(&path).unwrap();
    }
}
