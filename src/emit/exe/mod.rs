// src/emit/exe/mod.rs
//! Windows installer (`.exe`) emitter
//!
//! An NSIS script is rendered from the selector-dialect template, placed in
//! a work directory next to its include files and branding bitmaps, and
//! compiled with `makensis`. Each package archive is embedded with its own
//! `File` instruction followed by an install-time extraction command; the
//! rest of the staging tree is embedded recursively.

pub mod images;
pub mod signing;

use regex::Regex;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use tracing::{info, warn};

use super::{Emitter, Rendered, interpreter_record, script_env};
use crate::context::BuildContext;
use crate::error::{Error, Result};
use crate::filesystem::{copy_atomic, write_atomic};
use crate::package::PackageRecord;
use crate::process;
use crate::recipe::InstallerType;
use crate::stager::StagedLayout;
use crate::template::{TemplateScope, render_selectors};
use crate::version::{major_minor, split_name_version};
use signing::SigningEnv;

const MAIN_TEMPLATE: &str = include_str!("../../templates/win/main.nsi.tmpl");
const PATH_HELPER: &str = include_str!("../../templates/win/_system_path.nsh");

const MAIN_SCRIPT: &str = "main.nsi";
const PATH_HELPER_NAME: &str = "_system_path.nsh";
const WELCOME_BMP: &str = "welcome.bmp";
const HEADER_BMP: &str = "header.bmp";
const ICON: &str = "icon.ico";
const LICENSE: &str = "license.txt";

/// Set to use the logging build of NSIS (`LogSet on`)
pub const ENV_NSIS_LOG_BUILD: &str = "NSIS_USING_LOG_BUILD";

/// Escape text for a double-quoted NSIS string
pub fn nsis_escape(text: &str) -> String {
    text.replace('$', "$$")
        .replace('"', "$\\\"")
        .replace("\r\n", "$\\r$\\n")
        .replace('\n', "$\\r$\\n")
}

fn env_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"%([A-Za-z_][A-Za-z0-9_]*)%").expect("Invalid env reference regex"))
}

/// Escape a prefix, turning `%VAR%` references into NSIS `$%VAR%`
pub fn nsis_prefix(prefix: &str) -> String {
    env_ref_re().replace_all(&nsis_escape(prefix), "$$%${1}%").into_owned()
}

/// Registry-safe key derived from the installer name
pub fn uninstall_key(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

/// `File` plus extraction instructions for every embedded archive
pub fn pkg_commands(records: &[&PackageRecord], pkgs_dir: &Path) -> String {
    let mut out = String::new();
    for record in records {
        let dist = record.dist();
        let source = pkgs_dir.join(&record.filename);
        out.push_str(&format!("    DetailPrint \"Extracting {}...\"\n", nsis_escape(&dist)));
        out.push_str(&format!("    File \"{}\"\n", nsis_escape(&source.display().to_string())));
        out.push_str(&format!(
            "    nsExec::ExecToLog '\"$INSTDIR\\_conda.exe\" constructor --prefix \"$INSTDIR\\pkgs\\{}\" --extract-conda-pkgs \"$INSTDIR\\pkgs\\{}\"'\n",
            nsis_escape(&dist),
            nsis_escape(&record.filename)
        ));
        out.push_str("    Pop $0\n");
        out.push_str(&format!(
            "    !insertmacro AbortOnFailure $0 \"Failed to extract {}.\"\n",
            nsis_escape(&dist)
        ));
    }
    out.trim_end_matches('\n').to_string()
}

/// `makensis -V2 -INPUTCHARSET UTF8 main.nsi`, run inside the work directory
pub fn makensis_command(makensis: &Path, work: &Path) -> Command {
    let mut cmd = Command::new(makensis);
    cmd.arg("-V2")
        .arg("-INPUTCHARSET")
        .arg("UTF8")
        .arg(MAIN_SCRIPT)
        .current_dir(work);
    cmd
}

fn flag(value: bool) -> String {
    let flag = if value { "1" } else { "0" };
    flag.to_string()
}

/// The Windows installer emitter
#[derive(Debug, Clone, Copy, Default)]
pub struct ExeEmitter;

impl ExeEmitter {
    fn scope(&self, ctx: &BuildContext, layout: &StagedLayout) -> Result<TemplateScope> {
        let recipe = &ctx.recipe;
        let mut scope = TemplateScope::for_recipe(recipe)?;
        scope.set("nsis_log_build", env::var_os(ENV_NSIS_LOG_BUILD).is_some_and(|v| !v.is_empty()))?;
        scope.set("has_icon", recipe.icon_image.is_some())?;
        scope.set("has_license", layout.license.is_some())?;
        scope.set("has_pre_install", layout.scripts.contains_key("pre_install"))?;
        scope.set("has_post_install", layout.scripts.contains_key("post_install"))?;
        scope.set("has_pre_uninstall", layout.scripts.contains_key("pre_uninstall"))?;
        scope.set("check_path_spaces", recipe.check_path_spaces)?;
        scope.set("check_path_length", recipe.check_path_length.unwrap_or(false))?;
        scope.set("initialize_conda", recipe.initialize_conda)?;
        scope.set("register_python", recipe.register_python)?;
        Ok(scope)
    }

    fn vars(&self, ctx: &BuildContext, layout: &StagedLayout) -> Result<BTreeMap<String, String>> {
        let recipe = &ctx.recipe;
        let interpreter = interpreter_record(ctx)?;
        let python_dist = interpreter.dist();
        let py_ver = major_minor(&interpreter.version).unwrap_or_default();
        let prefix_name = recipe.default_prefix_name();
        let bits = ctx.platform().bits();

        let display_name = recipe.uninstall_name.clone().unwrap_or_else(|| {
            format!("{} {} (Python {} {}-bit)", recipe.name, recipe.version, py_ver, bits)
        });
        let (_, display_version) = split_name_version(&display_name);
        let display_version = if display_version.is_empty() {
            recipe.version.clone()
        } else {
            display_version
        };

        let exists_error = recipe.install_path_exists_error_text.clone().unwrap_or_else(|| {
            format!(
                "$INSTDIR already contains an installation. Choose an empty directory or uninstall {} first.",
                recipe.name
            )
        });

        let env_lines: Vec<String> = script_env(ctx)?
            .into_iter()
            .map(|(k, v)| format!("    !insertmacro SetEnv \"{k}\" \"{}\"", nsis_escape(&v)))
            .collect();
        let pages: Vec<String> = (0..recipe.post_install_pages.len())
            .map(|i| format!("!include \"post_install_page_{i}.nsi\""))
            .collect();

        let mut vars = BTreeMap::new();
        let mut set = |k: &str, v: String| {
            vars.insert(k.to_string(), v);
        };
        set("NAME", nsis_escape(&recipe.name));
        set("VERSION", nsis_escape(&recipe.version));
        set("COMPANY", nsis_escape(recipe.company.as_deref().unwrap_or("Anaconda, Inc.")));
        set("PLAT", ctx.platform().subdir().to_string());
        set("CONSTRUCTOR_VERSION", env!("CARGO_PKG_VERSION").to_string());
        set("PYTHON_DIST", python_dist);
        set("PY_VER", py_ver);
        set("UNINSTALL_NAME", nsis_escape(&display_name));
        set("UNINSTALL_REG_KEY", uninstall_key(&recipe.name));
        set("DISPLAY_VERSION", nsis_escape(&display_version));
        set("OUTFILE", nsis_escape(&ctx.output_path(InstallerType::Exe).display().to_string()));
        set("STAGING", nsis_escape(&layout.root.display().to_string()));
        set("ICON", ICON.to_string());
        set("HEADER_IMAGE", HEADER_BMP.to_string());
        set("WELCOME_IMAGE", WELCOME_BMP.to_string());
        set("LICENSE", LICENSE.to_string());
        set(
            "DEFAULT_PREFIX",
            nsis_prefix(recipe.default_prefix.as_deref().unwrap_or(&format!("%USERPROFILE%\\{prefix_name}"))),
        );
        set(
            "DEFAULT_PREFIX_DOMAIN_USER",
            nsis_prefix(
                recipe
                    .default_prefix_domain_user
                    .as_deref()
                    .unwrap_or(&format!("%LOCALAPPDATA%\\{prefix_name}")),
            ),
        );
        set(
            "DEFAULT_PREFIX_ALL_USERS",
            nsis_prefix(
                recipe
                    .default_prefix_all_users
                    .as_deref()
                    .unwrap_or(&format!("%ALLUSERSPROFILE%\\{prefix_name}")),
            ),
        );
        // $INSTDIR stays live in the message
        set("INSTALL_PATH_EXISTS_ERROR", nsis_escape(&exists_error).replace("$$INSTDIR", "$INSTDIR"));
        set("REGISTER_PYTHON_DEFAULT", flag(recipe.register_python && recipe.register_python_default.unwrap_or(false)));
        set("ADD_TO_PATH_DEFAULT", flag(recipe.initialize_conda && recipe.initialize_by_default.unwrap_or(false)));
        set("KEEP_PKGS", flag(recipe.keep_pkgs));
        set("SCRIPT_ENV_VARIABLES", env_lines.join("\n"));
        set("POST_INSTALL_PAGES", pages.join("\n"));
        set("PKG_COMMANDS", pkg_commands(&ctx.plans.bundled(), &layout.pkgs_dir));
        for kind in ["pre_install", "post_install", "pre_uninstall"] {
            let name = layout
                .scripts
                .get(kind)
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            set(&kind.to_ascii_uppercase(), name);
        }
        Ok(vars)
    }

    /// Bitmaps, icon, license and extra pages next to the script
    fn stage_resources(&self, ctx: &BuildContext, layout: &StagedLayout, work: &Path) -> Result<()> {
        let recipe = &ctx.recipe;
        if recipe.welcome_image_text.is_some() || recipe.header_image_text.is_some() {
            warn!("welcome_image_text and header_image_text are not drawn on generated images");
        }
        images::stage_bitmap(
            work,
            WELCOME_BMP,
            recipe.welcome_image.as_deref(),
            images::WELCOME_SIZE,
            &recipe.default_image_color,
        )?;
        images::stage_bitmap(
            work,
            HEADER_BMP,
            recipe.header_image.as_deref(),
            images::HEADER_SIZE,
            &recipe.default_image_color,
        )?;
        if let Some(icon) = &recipe.icon_image {
            copy_atomic(icon, &work.join(ICON))?;
        }
        if let Some(license) = &layout.license {
            copy_atomic(license, &work.join(LICENSE))?;
        }
        for (i, page) in recipe.post_install_pages.iter().enumerate() {
            copy_atomic(page, &work.join(format!("post_install_page_{i}.nsi")))?;
        }
        Ok(())
    }
}

impl Emitter for ExeEmitter {
    fn installer_type(&self) -> InstallerType {
        InstallerType::Exe
    }

    fn render(&self, ctx: &BuildContext, layout: &StagedLayout) -> Result<Rendered> {
        if layout.conda_exe.is_none() {
            return Err(Error::Emit(
                "EXE installers embed a conda standalone executable; pass --conda-exe or set CONSTRUCTOR_CONDA_EXE"
                    .to_string(),
            ));
        }
        let template = match &ctx.recipe.nsis_template {
            Some(path) => fs::read_to_string(path).map_err(|e| Error::io_at(path, e))?,
            None => MAIN_TEMPLATE.to_string(),
        };
        let scope = self.scope(ctx, layout)?;
        let vars = self.vars(ctx, layout)?;
        let mut rendered = Rendered::default();
        rendered.push(MAIN_SCRIPT, render_selectors(MAIN_SCRIPT, &template, &scope, &vars)?);
        rendered.push(PATH_HELPER_NAME, PATH_HELPER);
        Ok(rendered)
    }

    fn assemble(&self, ctx: &BuildContext, layout: &StagedLayout, rendered: Rendered) -> Result<PathBuf> {
        let makensis = process::find_tool("makensis")?;
        let work_dir = tempfile::Builder::new().prefix("constructor-nsis-").tempdir()?;
        let work = work_dir.path();

        for (name, text) in &rendered.files {
            write_atomic(&work.join(name), text)?;
        }
        self.stage_resources(ctx, layout, work)?;

        let output = ctx.output_path(InstallerType::Exe);
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
        }
        info!("Compiling NSIS script in {}", work.display());
        process::run("makensis", &mut makensis_command(&makensis, work))?;
        if !output.is_file() {
            return Err(Error::Emit(format!("makensis did not produce {}", output.display())));
        }

        if ctx.debug {
            let kept = work_dir.keep();
            info!("Keeping NSIS work directory {}", kept.display());
        }
        Ok(output)
    }

    fn post_process(&self, ctx: &BuildContext, output: &Path) -> Result<()> {
        let recipe = &ctx.recipe;
        let certificate = recipe.signing_certificate.as_deref();
        let Some(tool) = signing::effective_tool(recipe.windows_signing_tool, certificate) else {
            return Ok(());
        };
        let env = SigningEnv::from_env();
        let program = signing::resolve_program(tool, &env)?;
        let mut cmd = signing::sign_command(tool, &program, &env, certificate, output)?;
        process::run(&program.display().to_string(), &mut cmd)?;
        info!("Signed {}", output.display());
        Ok(())
    }
}
