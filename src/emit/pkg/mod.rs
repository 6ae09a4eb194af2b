// src/emit/pkg/mod.rs
//! macOS product archive (`.pkg`) emitter
//!
//! The product is assembled from intermediate component packages built
//! with `pkgbuild`, installed in this order:
//!
//! 1. `prepare_installation`: pre-install checks (path, existing install)
//! 2. `user_pre_install`: the recipe's pre-install script, if any
//! 3. `preconda`: the staging tree (runtime, manifests, archives)
//! 4. one component per package, unpacked under `pkgs/<dist>`
//! 5. `post_extract`: runs the install-time runtime
//! 6. `pathupdate`: optional shell initialization, a visible choice
//! 7. `user_post_install`: the recipe's post-install script, if any
//!
//! `productbuild --synthesize` lists them in a distribution document,
//! [`distribution::patch`] dresses it up, and a final `productbuild`
//! produces the installer. All components are non-relocatable.

pub mod distribution;
pub mod extract;

use regex::Regex;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use tracing::{debug, info};

use super::{Emitter, Rendered, interpreter_dist, script_env};
use crate::context::BuildContext;
use crate::error::{Error, Result};
use crate::filesystem::{copy_atomic, copy_tree, set_executable, write_atomic};
use crate::process;
use crate::recipe::{InstallerType, Recipe};
use crate::stager::StagedLayout;
use crate::template::{TemplateScope, render_general};
use distribution::{DistributionOptions, PathChoice};

const PREINSTALL: &str = include_str!("../../templates/osx/preinstall.sh");
const POST_EXTRACT: &str = include_str!("../../templates/osx/post_extract.sh");
const UPDATE_PATH: &str = include_str!("../../templates/osx/update_path.sh");
const RUN_USER_SCRIPT: &str = include_str!("../../templates/osx/run_user_script.sh");

/// Bundle identifier prefix of every component
pub fn identifier(recipe: &Recipe) -> String {
    recipe
        .reverse_domain_identifier
        .clone()
        .unwrap_or_else(|| format!("io.continuum.pkg.{}", recipe.name.to_lowercase().replace(' ', "-")))
}

/// Directory name of the installation below the chosen domain
pub fn pkg_name(recipe: &Recipe) -> String {
    recipe
        .pkg_name
        .clone()
        .unwrap_or_else(|| recipe.default_prefix_name())
}

/// Install location of every component, relative to the chosen domain
pub fn install_location(recipe: &Recipe) -> String {
    let name = pkg_name(recipe);
    match recipe.default_location_pkg.as_deref().map(|d| d.trim_matches('/')) {
        Some(dir) if !dir.is_empty() => format!("/{dir}/{name}"),
        _ => format!("/{name}"),
    }
}

fn relocatable_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(<key>BundleIsRelocatable</key>\s*)<true\s*/>").expect("Invalid relocatable regex")
    })
}

/// Mark every bundle of an analyzed component plist non-relocatable
pub fn mark_non_relocatable(plist: &str) -> String {
    relocatable_re().replace_all(plist, "${1}<false/>").into_owned()
}

/// `pkgbuild --analyze --root <root> <plist>`
pub fn pkgbuild_analyze(pkgbuild: &Path, root: &Path, plist: &Path) -> Command {
    let mut cmd = Command::new(pkgbuild);
    cmd.arg("--analyze").arg("--root").arg(root).arg(plist);
    cmd
}

/// `pkgbuild` for a payload component
pub fn pkgbuild_component(
    pkgbuild: &Path,
    root: &Path,
    plist: &Path,
    identifier: &str,
    version: &str,
    location: &str,
    output: &Path,
) -> Command {
    let mut cmd = Command::new(pkgbuild);
    cmd.arg("--root")
        .arg(root)
        .arg("--component-plist")
        .arg(plist)
        .arg("--identifier")
        .arg(identifier)
        .arg("--version")
        .arg(version)
        .arg("--install-location")
        .arg(location)
        .arg(output);
    cmd
}

/// `pkgbuild --nopayload` for a scripts-only component
pub fn pkgbuild_scripts(
    pkgbuild: &Path,
    scripts: &Path,
    identifier: &str,
    version: &str,
    location: &str,
    output: &Path,
) -> Command {
    let mut cmd = Command::new(pkgbuild);
    cmd.arg("--nopayload")
        .arg("--scripts")
        .arg(scripts)
        .arg("--identifier")
        .arg(identifier)
        .arg("--version")
        .arg(version)
        .arg("--install-location")
        .arg(location)
        .arg(output);
    cmd
}

/// `productbuild --synthesize --package ... <distribution>`
pub fn productbuild_synthesize(productbuild: &Path, packages: &[PathBuf], distribution: &Path) -> Command {
    let mut cmd = Command::new(productbuild);
    cmd.arg("--synthesize");
    for p in packages {
        cmd.arg("--package").arg(p);
    }
    cmd.arg(distribution);
    cmd
}

/// Final `productbuild` against the patched distribution
pub fn productbuild_final(
    productbuild: &Path,
    distribution: &Path,
    package_path: &Path,
    resources: &Path,
    output: &Path,
) -> Command {
    let mut cmd = Command::new(productbuild);
    cmd.arg("--distribution")
        .arg(distribution)
        .arg("--package-path")
        .arg(package_path)
        .arg("--resources")
        .arg(resources)
        .arg(output);
    cmd
}

/// `productsign --sign <identity> <input> <output>`
pub fn productsign_command(productsign: &Path, identity: &str, input: &Path, output: &Path) -> Command {
    let mut cmd = Command::new(productsign);
    cmd.arg("--sign").arg(identity).arg(input).arg(output);
    cmd
}

/// `codesign` with the hardened runtime, as notarization requires
pub fn codesign_command(codesign: &Path, identity: &str, path: &Path) -> Command {
    let mut cmd = Command::new(codesign);
    cmd.arg("--sign")
        .arg(identity)
        .arg("--force")
        .arg("--options")
        .arg("runtime")
        .arg("--timestamp")
        .arg(path);
    cmd
}

/// Components in installation order: `(suffix, script file, rendered name)`
///
/// Payload components (`preconda` and the packages) sit between the
/// pre-install and post-extract steps.
fn script_components(rendered: &Rendered) -> (Vec<(&'static str, &'static str, String)>, Vec<(&'static str, &'static str, String)>) {
    let before = [
        ("prepare_installation", "preinstall", "preinstall.sh"),
        ("user_pre_install", "preinstall", "user_pre_install.sh"),
    ];
    let after = [
        ("post_extract", "postinstall", "post_extract.sh"),
        ("pathupdate", "postinstall", "update_path.sh"),
        ("user_post_install", "postinstall", "user_post_install.sh"),
    ];
    let pick = |list: &[(&'static str, &'static str, &'static str)]| {
        list.iter()
            .filter(|(_, _, name)| rendered.get(name).is_some())
            .map(|(suffix, script, name)| (*suffix, *script, name.to_string()))
            .collect::<Vec<_>>()
    };
    (pick(&before), pick(&after))
}

/// Copy a resource file, or write inline text, into `resources`
fn stage_resource(
    resources: &Path,
    stem: &str,
    file: Option<&Path>,
    text: Option<&str>,
) -> Result<Option<String>> {
    if let Some(src) = file {
        let ext = src
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_else(|| ".txt".to_string());
        let name = format!("{stem}{ext}");
        copy_atomic(src, &resources.join(&name))?;
        return Ok(Some(name));
    }
    if let Some(text) = text {
        let name = format!("{stem}.txt");
        write_atomic(&resources.join(&name), text)?;
        return Ok(Some(name));
    }
    Ok(None)
}

/// Domains the installer offers; `pkg_domains` overrides the defaults
pub fn domains(recipe: &Recipe) -> std::collections::BTreeMap<String, bool> {
    let mut domains = std::collections::BTreeMap::new();
    domains.insert("enable_anywhere".to_string(), true);
    domains.insert("enable_currentUserHome".to_string(), true);
    domains.insert("enable_localSystem".to_string(), false);
    for (k, v) in &recipe.pkg_domains {
        domains.insert(k.clone(), *v);
    }
    domains
}

/// The macOS package emitter
#[derive(Debug, Clone, Copy, Default)]
pub struct PkgEmitter;

struct Tools {
    pkgbuild: PathBuf,
    productbuild: PathBuf,
}

impl PkgEmitter {
    fn scope(&self, ctx: &BuildContext, layout: &StagedLayout) -> Result<TemplateScope> {
        let recipe = &ctx.recipe;
        let env_vars: Vec<_> = script_env(ctx)?
            .into_iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();
        let exists_error = recipe.install_path_exists_error_text.clone().unwrap_or_else(|| {
            format!(
                "{} is already installed in this location. Remove it or choose another location.",
                recipe.name
            )
        });

        let mut scope = TemplateScope::for_recipe(recipe)?;
        scope.set("install_location", install_location(recipe))?;
        scope.set("pkg_name", pkg_name(recipe))?;
        scope.set("python_dist", interpreter_dist(ctx)?)?;
        scope.set("check_path_spaces", recipe.check_path_spaces)?;
        scope.set("path_exists_error", exists_error)?;
        scope.set("env_vars", env_vars)?;
        scope.set("keep_pkgs", recipe.keep_pkgs)?;
        scope.set("has_conda_exe", layout.conda_exe.is_some())?;
        Ok(scope)
    }

    /// Build one scripts-only component holding `script` as `kind`
    fn scripts_component(
        &self,
        ctx: &BuildContext,
        tools: &Tools,
        work: &Path,
        suffix: &str,
        kind: &str,
        text: &str,
        user_script: Option<&Path>,
    ) -> Result<PathBuf> {
        let dir = work.join("scripts").join(suffix);
        let script = dir.join(kind);
        write_atomic(&script, text)?;
        set_executable(&script)?;

        if let Some(staged) = user_script {
            let dest = dir.join("user_script");
            copy_atomic(staged, &dest)?;
            set_executable(&dest)?;
        }

        let out = work.join("built").join(format!("{suffix}.pkg"));
        let id = format!("{}.{suffix}", identifier(&ctx.recipe));
        process::run(
            "pkgbuild",
            &mut pkgbuild_scripts(
                &tools.pkgbuild,
                &dir,
                &id,
                &ctx.recipe.version,
                &install_location(&ctx.recipe),
                &out,
            ),
        )?;
        Ok(out)
    }

    /// Build one payload component from `root`
    fn payload_component(&self, ctx: &BuildContext, tools: &Tools, work: &Path, suffix: &str, root: &Path) -> Result<PathBuf> {
        let plist = work.join("plists").join(format!("{suffix}.plist"));
        if let Some(parent) = plist.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
        }
        process::run("pkgbuild", &mut pkgbuild_analyze(&tools.pkgbuild, root, &plist))?;
        let analyzed = fs::read_to_string(&plist).map_err(|e| Error::io_at(&plist, e))?;
        write_atomic(&plist, mark_non_relocatable(&analyzed))?;

        let out = work.join("built").join(format!("{suffix}.pkg"));
        let id = format!("{}.{suffix}", identifier(&ctx.recipe));
        process::run(
            "pkgbuild",
            &mut pkgbuild_component(
                &tools.pkgbuild,
                root,
                &plist,
                &id,
                &ctx.recipe.version,
                &install_location(&ctx.recipe),
                &out,
            ),
        )?;
        Ok(out)
    }

    fn distribution_options(&self, ctx: &BuildContext, resources: &Path) -> Result<DistributionOptions> {
        let recipe = &ctx.recipe;
        fs::create_dir_all(resources).map_err(|e| Error::io_at(resources, e))?;
        let background = match &recipe.welcome_image {
            Some(image) => stage_resource(resources, "background", Some(image), None)?,
            None => None,
        };
        let path_choice = recipe.initialize_conda.then(|| PathChoice {
            id: format!("{}.pathupdate", identifier(recipe)),
            title: "Add conda initialization to the shell".to_string(),
            description: format!(
                "If this option is selected, your shell startup files are updated so that {} is activated in new shells.",
                recipe.name
            ),
            selected: recipe.initialize_by_default.unwrap_or(true),
        });
        Ok(DistributionOptions {
            title: format!("{} {}", recipe.name, recipe.version),
            license: stage_resource(resources, "license", recipe.license_file.as_deref(), None)?,
            welcome: stage_resource(resources, "welcome", recipe.welcome_file.as_deref(), recipe.welcome_text.as_deref())?,
            readme: stage_resource(resources, "readme", recipe.readme_file.as_deref(), recipe.readme_text.as_deref())?,
            conclusion: stage_resource(
                resources,
                "conclusion",
                recipe.conclusion_file.as_deref(),
                recipe.conclusion_text.as_deref(),
            )?,
            background,
            domains: domains(recipe),
            path_choice,
        })
    }
}

impl Emitter for PkgEmitter {
    fn installer_type(&self) -> InstallerType {
        InstallerType::Pkg
    }

    fn render(&self, ctx: &BuildContext, layout: &StagedLayout) -> Result<Rendered> {
        let mut scope = self.scope(ctx, layout)?;
        let mut rendered = Rendered::default();
        rendered.push("preinstall.sh", render_general("preinstall.sh", PREINSTALL, &scope)?);
        rendered.push("post_extract.sh", render_general("post_extract.sh", POST_EXTRACT, &scope)?);
        if ctx.recipe.initialize_conda {
            rendered.push("update_path.sh", render_general("update_path.sh", UPDATE_PATH, &scope)?);
        }
        for kind in ["pre_install", "post_install"] {
            if layout.scripts.contains_key(kind) {
                scope.set("script_kind", kind)?;
                let name = format!("user_{kind}.sh");
                let text = render_general(&name, RUN_USER_SCRIPT, &scope)?;
                rendered.push(name, text);
            }
        }
        Ok(rendered)
    }

    fn assemble(&self, ctx: &BuildContext, layout: &StagedLayout, rendered: Rendered) -> Result<PathBuf> {
        let tools = Tools {
            pkgbuild: process::find_tool("pkgbuild")?,
            productbuild: process::find_tool("productbuild")?,
        };
        let work_dir = tempfile::Builder::new().prefix("constructor-pkg-").tempdir()?;
        let work = work_dir.path().to_path_buf();
        fs::create_dir_all(work.join("built")).map_err(|e| Error::io_at(work.join("built"), e))?;
        info!("Assembling macOS package in {}", work.display());

        let (before, after) = script_components(&rendered);
        let mut packages = Vec::new();

        for (suffix, kind, name) in &before {
            let text = rendered.get(name).unwrap_or_default();
            let user_script = suffix.strip_prefix("user_").and_then(|k| layout.scripts.get(k));
            packages.push(self.scripts_component(ctx, &tools, &work, suffix, kind, text, user_script.map(PathBuf::as_path))?);
        }

        // Staging tree without the archives, which ship unpacked
        let preconda = work.join("roots").join("preconda");
        copy_tree(&layout.root, &preconda)?;
        if !ctx.recipe.keep_pkgs {
            for archive in &layout.archives {
                if let Some(name) = archive.file_name() {
                    let copy = preconda.join("pkgs").join(name);
                    fs::remove_file(&copy).map_err(|e| Error::io_at(&copy, e))?;
                }
            }
        }
        if let (Some(identity), Some(_)) = (&ctx.recipe.notarization_identity_name, &layout.conda_exe) {
            let codesign = process::find_tool("codesign")?;
            process::run("codesign", &mut codesign_command(&codesign, identity, &preconda.join("_conda")))?;
        }
        packages.push(self.payload_component(ctx, &tools, &work, "preconda", &preconda)?);

        let mut jobs = Vec::new();
        let mut roots = Vec::new();
        for record in ctx.plans.bundled() {
            let root = work.join("roots").join(record.dist());
            jobs.push((layout.archive(record), root.join("pkgs").join(record.dist())));
            roots.push((record.dist(), root));
        }
        extract::extract_all(&jobs)?;
        for (dist, root) in &roots {
            debug!("Building component for {}", dist);
            packages.push(self.payload_component(ctx, &tools, &work, &format!("pkgs.{dist}"), root)?);
        }

        for (suffix, kind, name) in &after {
            let text = rendered.get(name).unwrap_or_default();
            let user_script = suffix.strip_prefix("user_").and_then(|k| layout.scripts.get(k));
            packages.push(self.scripts_component(ctx, &tools, &work, suffix, kind, text, user_script.map(PathBuf::as_path))?);
        }

        let synthesized = work.join("distribution.xml");
        process::run(
            "productbuild",
            &mut productbuild_synthesize(&tools.productbuild, &packages, &synthesized),
        )?;
        let xml = fs::read_to_string(&synthesized).map_err(|e| Error::io_at(&synthesized, e))?;
        let resources = work.join("resources");
        let patched = distribution::patch(&xml, &self.distribution_options(ctx, &resources)?)?;
        write_atomic(&synthesized, patched)?;

        let output = ctx.output_path(InstallerType::Pkg);
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
        }
        process::run(
            "productbuild",
            &mut productbuild_final(&tools.productbuild, &synthesized, &work.join("built"), &resources, &output),
        )?;

        if ctx.debug {
            let kept = work_dir.keep();
            info!("Keeping package work directory {}", kept.display());
        }
        Ok(output)
    }

    fn post_process(&self, ctx: &BuildContext, output: &Path) -> Result<()> {
        let Some(identity) = &ctx.recipe.signing_identity_name else {
            return Ok(());
        };
        let productsign = process::find_tool("productsign")?;
        let signed = output.with_extension("signed.pkg");
        process::run("productsign", &mut productsign_command(&productsign, identity, output, &signed))?;
        fs::rename(&signed, output).map_err(|e| Error::io_at(output, e))?;
        info!("Signed {} as {}", output.display(), identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;
    use crate::recipe::parse_recipe;

    fn recipe(extra: &str) -> Recipe {
        let text = format!(
            "name: Miniconda\nversion: '1.0'\nchannels: [https://repo.example.com/main]\nspecs: [python]\n{extra}"
        );
        parse_recipe(&text, Platform::OsxArm64, Path::new("/tmp"), "construct.yaml")
            .unwrap()
            .0
    }

    #[test]
    fn test_identifier_and_location() {
        let r = recipe("");
        assert_eq!(identifier(&r), "io.continuum.pkg.miniconda");
        assert_eq!(install_location(&r), "/miniconda");
        let r = recipe("reverse_domain_identifier: org.example.mc\ndefault_location_pkg: /Applications/\npkg_name: mc\n");
        assert_eq!(identifier(&r), "org.example.mc");
        assert_eq!(install_location(&r), "/Applications/mc");
    }

    #[test]
    fn test_mark_non_relocatable() {
        let plist = "<dict>\n<key>BundleIsRelocatable</key>\n<true/>\n<key>BundleIsVersionChecked</key>\n<true/>\n</dict>";
        let out = mark_non_relocatable(plist);
        assert!(out.contains("<key>BundleIsRelocatable</key>\n<false/>"));
        assert!(out.contains("<key>BundleIsVersionChecked</key>\n<true/>"));
    }

    #[test]
    fn test_pkgbuild_commands() {
        let cmd = pkgbuild_component(
            Path::new("pkgbuild"),
            Path::new("/w/roots/preconda"),
            Path::new("/w/plists/preconda.plist"),
            "io.continuum.pkg.miniconda.preconda",
            "1.0",
            "/miniconda",
            Path::new("/w/built/preconda.pkg"),
        );
        assert_eq!(
            process::command_line(&cmd),
            vec![
                "pkgbuild",
                "--root",
                "/w/roots/preconda",
                "--component-plist",
                "/w/plists/preconda.plist",
                "--identifier",
                "io.continuum.pkg.miniconda.preconda",
                "--version",
                "1.0",
                "--install-location",
                "/miniconda",
                "/w/built/preconda.pkg"
            ]
        );
        let cmd = pkgbuild_scripts(
            Path::new("pkgbuild"),
            Path::new("/w/scripts/post_extract"),
            "id.post_extract",
            "1.0",
            "/miniconda",
            Path::new("/w/built/post_extract.pkg"),
        );
        assert_eq!(process::command_line(&cmd)[..3], ["pkgbuild", "--nopayload", "--scripts"]);
    }

    #[test]
    fn test_productbuild_and_signing_commands() {
        let cmd = productbuild_synthesize(
            Path::new("productbuild"),
            &[PathBuf::from("a.pkg"), PathBuf::from("b.pkg")],
            Path::new("dist.xml"),
        );
        assert_eq!(
            process::command_line(&cmd),
            vec!["productbuild", "--synthesize", "--package", "a.pkg", "--package", "b.pkg", "dist.xml"]
        );
        let cmd = productsign_command(Path::new("productsign"), "Developer ID Installer: X", Path::new("in.pkg"), Path::new("out.pkg"));
        assert_eq!(
            process::command_line(&cmd),
            vec!["productsign", "--sign", "Developer ID Installer: X", "in.pkg", "out.pkg"]
        );
        let cmd = codesign_command(Path::new("codesign"), "Developer ID Application: X", Path::new("_conda"));
        assert!(process::command_line(&cmd).contains(&"runtime".to_string()));
    }

    #[test]
    fn test_component_order() {
        let mut rendered = Rendered::default();
        for name in ["post_extract.sh", "preinstall.sh", "user_post_install.sh", "update_path.sh"] {
            rendered.push(name, "#!/bin/bash\n");
        }
        let (before, after) = script_components(&rendered);
        let before: Vec<_> = before.iter().map(|c| c.0).collect();
        let after: Vec<_> = after.iter().map(|c| c.0).collect();
        assert_eq!(before, vec!["prepare_installation"]);
        assert_eq!(after, vec!["post_extract", "pathupdate", "user_post_install"]);
    }

    #[test]
    fn test_domains_override() {
        let r = recipe("pkg_domains:\n  enable_localSystem: true\n  enable_anywhere: false\n");
        let d = domains(&r);
        assert_eq!(d["enable_localSystem"], true);
        assert_eq!(d["enable_anywhere"], false);
        assert_eq!(d["enable_currentUserHome"], true);
    }

    #[test]
    fn test_stage_resource() {
        let dir = tempfile::TempDir::new().unwrap();
        let name = stage_resource(dir.path(), "readme", None, Some("Hello")).unwrap();
        assert_eq!(name.as_deref(), Some("readme.txt"));
        assert_eq!(fs::read_to_string(dir.path().join("readme.txt")).unwrap(), "Hello");
        assert_eq!(stage_resource(dir.path(), "welcome", None, None).unwrap(), None);
    }

    #[test]
    fn test_render_osx_scripts() {
        let r = recipe("check_path_spaces: true\n");
        let mut scope = TemplateScope::for_recipe(&r).unwrap();
        scope.set("install_location", install_location(&r)).unwrap();
        scope.set("check_path_spaces", true).unwrap();
        scope.set("path_exists_error", "Miniconda's already here").unwrap();
        scope.set("python_dist", "python-3.11.0-h0_0").unwrap();
        scope.set("env_vars", vec![json!({ "name": "FOO", "value": "a b" })]).unwrap();
        scope.set("keep_pkgs", false).unwrap();
        scope.set("has_conda_exe", false).unwrap();
        scope.set("script_kind", "post_install").unwrap();

        let pre = render_general("preinstall.sh", PREINSTALL, &scope).unwrap();
        assert!(pre.contains("/miniconda"));
        assert!(pre.contains(r"'Miniconda'\''s already here'"));
        let post = render_general("post_extract.sh", POST_EXTRACT, &scope).unwrap();
        assert!(post.contains("FOO='a b'"));
        assert!(post.contains("pkgs/python-3.11.0-h0_0/bin/python"));
        let user = render_general("user_post_install.sh", RUN_USER_SCRIPT, &scope).unwrap();
        assert!(user.contains("post_install"));
    }
}
