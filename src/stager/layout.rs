// src/stager/layout.rs

//! Manifests and the install-time runtime
//!
//! Layout under the staging root:
//!
//! ```text
//! pkgs/<filename>              every shipped archive
//! pkgs/cache/<hash>.json       channel snapshots
//! pkgs/urls                    <embedded_url>#<md5>, primary plan order
//! pkgs/urls.txt                <embedded_url>, primary plan order
//! pkgs/env.txt                 @EXPLICIT lockfile of the primary plan
//! pkgs/.install.py             install-time runtime for every environment
//! pkgs/envs/<name>/...         the same files for each extra environment
//! ```

use serde_json::{Map, Value, json};
use std::path::Path;

use crate::error::Result;
use crate::filesystem::write_atomic;
use crate::package::PackageRecord;
use crate::planner::EnvironmentPlan;
use crate::recipe::Recipe;
use crate::template::{TemplateScope, render_general};

/// Prefix placeholder packages are built with
pub const PREFIX_PLACEHOLDER: &str = "/opt/anaconda1anaconda2anaconda3";

const INSTALL_PY: &str = include_str!("../templates/install.py");

/// `<embedded_url>#<md5>` per record
pub fn urls_with_md5(records: &[PackageRecord]) -> String {
    records.iter().map(|r| format!("{}\n", r.url_with_md5())).collect()
}

/// `<embedded_url>` per record
pub fn urls_plain(records: &[PackageRecord]) -> String {
    records.iter().map(|r| format!("{}\n", r.embedded_url())).collect()
}

/// Write `urls`, `urls.txt` and `env.txt` of `plan` into `dir`
pub fn write_env_manifests(dir: &Path, plan: &EnvironmentPlan, platform: &str) -> Result<()> {
    write_atomic(&dir.join("urls"), urls_with_md5(&plan.records))?;
    write_atomic(&dir.join("urls.txt"), urls_plain(&plan.records))?;
    write_atomic(&dir.join("env.txt"), plan.explicit_lockfile(platform))?;
    if !plan.user_requested_specs.is_empty() {
        let specs: String = plan.user_requested_specs.iter().map(|s| format!("{s}\n")).collect();
        write_atomic(&dir.join("user_requested_specs.txt"), specs)?;
    }
    if let Some(menu) = &plan.menu_packages {
        let names: String = menu.iter().map(|s| format!("{s}\n")).collect();
        write_atomic(&dir.join("menu_packages.txt"), names)?;
    }
    Ok(())
}

fn dist_entry(r: &PackageRecord) -> Value {
    json!({
        "dist": r.dist(),
        "url": r.embedded_url(),
        "md5": r.md5.clone().unwrap_or_default(),
        "record": {
            "name": r.name,
            "version": r.version,
            "build": r.build_string,
            "build_number": r.build_number,
            "channel": r.remapped_channel_url,
            "subdir": r.subdir,
            "fn": r.filename,
            "depends": r.depends,
            "constrains": r.constrains,
            "license": r.license,
            "md5": r.md5,
            "sha256": r.sha256,
            "size": r.size,
        },
    })
}

/// Render the install-time runtime for `plans`
///
/// The runtime receives the filename to package map, the per-environment
/// install order, the prefix placeholder, and the installer filename.
pub fn render_runtime(recipe: &Recipe, plans: &[&EnvironmentPlan], installer_filename: &str) -> Result<String> {
    let mut dists = Map::new();
    let mut envs = Vec::new();
    for plan in plans {
        for r in &plan.records {
            dists.entry(r.filename.clone()).or_insert_with(|| dist_entry(r));
        }
        envs.push(json!({
            "name": plan.name,
            "root": plan.install_root(),
            "dists": plan.records.iter().map(|r| r.filename.as_str()).collect::<Vec<_>>(),
            "user_requested_specs": plan.user_requested_specs,
        }));
    }

    let mut scope = TemplateScope::for_recipe(recipe)?;
    scope.set("installer_name", &recipe.name)?;
    scope.set("installer_version", &recipe.version)?;
    scope.set("installer_filename", installer_filename)?;
    scope.set("prefix_placeholder", PREFIX_PLACEHOLDER)?;
    scope.set("dists", Value::Object(dists))?;
    scope.set("envs", envs)?;
    scope.set("keep_pkgs", recipe.keep_pkgs)?;
    render_general("install.py", INSTALL_PY, &scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::IndexEntry;
    use crate::platform::Platform;
    use crate::recipe::parse_recipe;

    fn rec(name: &str) -> PackageRecord {
        let entry = IndexEntry {
            name: name.into(),
            version: "1.0".into(),
            build: "0".into(),
            md5: Some("d41d8cd98f00b204e9800998ecf8427e".into()),
            ..Default::default()
        };
        PackageRecord::from_entry(
            "file:///tmp/local",
            "https://repo.example.com/main",
            "linux-64",
            &format!("{name}-1.0-0.conda"),
            &entry,
        )
    }

    fn plan(name: &str, names: &[&str]) -> EnvironmentPlan {
        EnvironmentPlan {
            name: name.into(),
            records: names.iter().map(|n| rec(n)).collect(),
            user_requested_specs: vec!["python".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_urls_use_embedded_channel() {
        let p = plan("base", &["python", "pip"]);
        let urls = urls_with_md5(&p.records);
        assert_eq!(
            urls,
            "https://repo.example.com/main/linux-64/python-1.0-0.conda#d41d8cd98f00b204e9800998ecf8427e\n\
             https://repo.example.com/main/linux-64/pip-1.0-0.conda#d41d8cd98f00b204e9800998ecf8427e\n"
        );
        assert!(!urls.contains("file://"));
        assert!(urls_plain(&p.records).lines().all(|l| !l.contains('#')));
    }

    #[test]
    fn test_write_env_manifests() {
        let dir = tempfile::TempDir::new().unwrap();
        write_env_manifests(dir.path(), &plan("base", &["python"]), "linux-64").unwrap();
        let env_txt = std::fs::read_to_string(dir.path().join("env.txt")).unwrap();
        assert!(env_txt.contains("@EXPLICIT"));
        assert!(dir.path().join("urls").is_file());
        assert!(dir.path().join("urls.txt").is_file());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("user_requested_specs.txt")).unwrap(),
            "python\n"
        );
    }

    #[test]
    fn test_render_runtime() {
        let text = "name: Miniconda\nversion: '1.0'\nchannels: [https://repo.example.com/main]\nspecs: [python]\n";
        let (recipe, _) = parse_recipe(text, Platform::Linux64, Path::new("/tmp"), "construct.yaml").unwrap();
        let base = plan("base", &["python", "pip"]);
        let tools = plan("tools", &["git"]);
        let out = render_runtime(&recipe, &[&base, &tools], "Miniconda-1.0-Linux-x86_64.sh").unwrap();
        assert!(out.contains("INSTALLER = \"Miniconda-1.0-Linux-x86_64.sh\""));
        assert!(out.contains(PREFIX_PLACEHOLDER));
        assert!(out.contains("\"root\":\"envs/tools/\""));
        assert!(out.contains("KEEP_PKGS = False"));
        assert!(!out.contains("{{"));
    }
}
