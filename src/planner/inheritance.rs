// src/planner/inheritance.rs

//! Effective per-environment settings
//!
//! `channels`, `channels_remap` and `exclude` fall back to the recipe's
//! global values when an extra environment leaves them unset; an explicit
//! empty list overrides to empty. `user_requested_specs` and
//! `menu_packages` never inherit.

use std::path::PathBuf;

use crate::catalog::{fetch_channels, normalize_channel};
use crate::error::{Error, Result};
use crate::recipe::{ChannelRemap, ExtraEnv, Recipe};
use crate::solver::EnvironmentFile;

/// Name of the primary environment
pub const BASE_ENV: &str = "base";

/// Where an environment's packages come from
#[derive(Debug, Clone, PartialEq)]
pub enum PackageSource {
    /// Resolve `specs` with the configured solver
    Solve,
    /// Ship the packages installed in an existing prefix
    Prefix(PathBuf),
    /// Ship the URLs of an `@EXPLICIT` lockfile
    Explicit(Vec<String>),
}

/// Fully resolved settings for one environment
#[derive(Debug, Clone, PartialEq)]
pub struct EnvSettings {
    pub name: String,
    pub source: PackageSource,
    /// Normalized channel URLs as listed, highest priority first
    pub channels: Vec<String>,
    pub channels_remap: Vec<ChannelRemap>,
    pub specs: Vec<String>,
    pub virtual_specs: Vec<String>,
    pub user_requested_specs: Vec<String>,
    pub exclude: Vec<String>,
    pub menu_packages: Option<Vec<String>>,
}

impl EnvSettings {
    pub fn is_base(&self) -> bool {
        self.name == BASE_ENV
    }

    /// Channels the solver sees: listed channels, then remap sources
    pub fn solve_channels(&self) -> Vec<String> {
        fetch_channels(&self.channels, &self.channels_remap, None)
    }
}

struct Sources<'a> {
    specs: &'a [String],
    environment: Option<&'a PathBuf>,
    environment_file: Option<&'a PathBuf>,
}

/// Classify the package source and fold environment YAML into channels/specs
fn resolve_source(
    env_name: &str,
    sources: Sources<'_>,
    channels: &mut Vec<String>,
    alias: Option<&str>,
) -> Result<(PackageSource, Vec<String>)> {
    if let Some(prefix) = sources.environment {
        return Ok((PackageSource::Prefix(prefix.clone()), Vec::new()));
    }
    let Some(path) = sources.environment_file else {
        return Ok((PackageSource::Solve, sources.specs.to_vec()));
    };
    match EnvironmentFile::load(path)? {
        EnvironmentFile::Explicit(urls) => {
            if urls.is_empty() {
                return Err(Error::recipe(
                    path.display().to_string(),
                    format!("lockfile for environment {env_name} lists no packages"),
                ));
            }
            Ok((PackageSource::Explicit(urls), Vec::new()))
        }
        EnvironmentFile::Yaml {
            channels: file_channels,
            specs,
        } => {
            for c in file_channels {
                let c = normalize_channel(&c, alias);
                if !channels.contains(&c) {
                    channels.push(c);
                }
            }
            Ok((PackageSource::Solve, specs))
        }
    }
}

fn normalized(channels: &[String], alias: Option<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for c in channels {
        let c = normalize_channel(c, alias);
        if !out.contains(&c) {
            out.push(c);
        }
    }
    out
}

fn normalized_remaps(remaps: &[ChannelRemap], alias: Option<&str>) -> Vec<ChannelRemap> {
    remaps
        .iter()
        .map(|r| ChannelRemap {
            src: normalize_channel(&r.src, alias),
            dest: r.dest.trim_end_matches('/').to_string(),
        })
        .collect()
}

/// Settings of the primary environment
pub fn primary_settings(recipe: &Recipe) -> Result<EnvSettings> {
    let alias = recipe.conda_channel_alias.as_deref();
    let mut channels = normalized(&recipe.channels, alias);
    let (source, specs) = resolve_source(
        BASE_ENV,
        Sources {
            specs: &recipe.specs,
            environment: recipe.environment.as_ref(),
            environment_file: recipe.environment_file.as_ref(),
        },
        &mut channels,
        alias,
    )?;
    let user_requested_specs = match &recipe.user_requested_specs {
        Some(explicit) => explicit.clone(),
        None => specs.clone(),
    };
    Ok(EnvSettings {
        name: BASE_ENV.to_string(),
        source,
        channels,
        channels_remap: normalized_remaps(&recipe.channels_remap, alias),
        specs,
        virtual_specs: recipe.virtual_specs.clone(),
        user_requested_specs,
        exclude: recipe.exclude.clone(),
        menu_packages: recipe.menu_packages.clone(),
    })
}

/// Settings of one extra environment, inheriting from the recipe
pub fn extra_settings(recipe: &Recipe, name: &str, env: &ExtraEnv) -> Result<EnvSettings> {
    let alias = recipe.conda_channel_alias.as_deref();
    let mut channels = normalized(env.channels.as_ref().unwrap_or(&recipe.channels), alias);
    let remaps = env.channels_remap.as_ref().unwrap_or(&recipe.channels_remap);
    let (source, specs) = resolve_source(
        name,
        Sources {
            specs: &env.specs,
            environment: env.environment.as_ref(),
            environment_file: env.environment_file.as_ref(),
        },
        &mut channels,
        alias,
    )?;
    let user_requested_specs = env.user_requested_specs.clone().unwrap_or_else(|| specs.clone());
    Ok(EnvSettings {
        name: name.to_string(),
        source,
        channels,
        channels_remap: normalized_remaps(remaps, alias),
        specs,
        virtual_specs: recipe.virtual_specs.clone(),
        user_requested_specs,
        exclude: env.exclude.clone().unwrap_or_else(|| recipe.exclude.clone()),
        menu_packages: env.menu_packages.clone(),
    })
}

/// Settings of every environment: primary first, extras in recipe order
pub fn all_settings(recipe: &Recipe) -> Result<Vec<EnvSettings>> {
    let mut out = vec![primary_settings(recipe)?];
    for (name, env) in recipe.extra_envs.iter() {
        out.push(extra_settings(recipe, name, env)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;
    use crate::recipe::parse_recipe;
    use std::path::Path;

    fn recipe(extra: &str) -> Recipe {
        let text = format!(
            "name: Miniconda\nversion: '1.0'\nchannels:\n  - https://repo.example.com/main/\n\
             specs: [python 3.11, pip]\nmenu_packages: [spyder]\nexclude: [tk]\n{extra}"
        );
        parse_recipe(&text, Platform::Linux64, Path::new("/tmp"), "construct.yaml")
            .unwrap()
            .0
    }

    #[test]
    fn test_extra_env_inherits_channels_and_exclude() {
        let r = recipe("extra_envs:\n  tools:\n    specs: [git]\n");
        let all = all_settings(&r).unwrap();
        assert_eq!(all.len(), 2);
        let tools = &all[1];
        assert_eq!(tools.name, "tools");
        assert_eq!(tools.channels, vec!["https://repo.example.com/main"]);
        assert_eq!(tools.exclude, vec!["tk"]);
        assert_eq!(tools.user_requested_specs, vec!["git"]);
        assert_eq!(tools.menu_packages, None);
        assert_eq!(all[0].menu_packages, Some(vec!["spyder".to_string()]));
    }

    #[test]
    fn test_explicit_empty_overrides() {
        let r = recipe("extra_envs:\n  tools:\n    specs: [git]\n    exclude: []\n    channels: [conda-forge]\n");
        let tools = &all_settings(&r).unwrap()[1];
        assert!(tools.exclude.is_empty());
        assert_eq!(tools.channels, vec!["https://conda.anaconda.org/conda-forge"]);
    }

    #[test]
    fn test_environment_yaml_contributes_channels_and_specs() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("env.yml");
        std::fs::write(&file, "channels: [https://other.example.com/ch]\ndependencies: [numpy]\n").unwrap();
        let mut r = recipe("");
        r.specs.clear();
        r.environment_file = Some(file);
        let base = primary_settings(&r).unwrap();
        assert_eq!(base.source, PackageSource::Solve);
        assert_eq!(base.specs, vec!["numpy"]);
        assert_eq!(
            base.channels,
            vec!["https://repo.example.com/main", "https://other.example.com/ch"]
        );
    }
}
