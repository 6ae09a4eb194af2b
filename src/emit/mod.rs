// src/emit/mod.rs
//! Installer emitters
//!
//! Each installer type turns the staged layout into one artifact in three
//! steps:
//! - render: fill the platform templates into script text
//! - assemble: combine the rendered scripts and the staged tree into the output file
//! - post_process: sign or otherwise finalize the artifact in place
//!
//! [`emitter_for`] selects the implementation for an [`InstallerType`].

pub mod exe;
pub mod pkg;
pub mod sh;

use std::path::{Path, PathBuf};
use tracing::info;

use crate::context::BuildContext;
use crate::error::{Error, Result};
use crate::package::{INTERPRETER, PackageRecord};
use crate::recipe::InstallerType;
use crate::stager::StagedLayout;

/// Rendered script files, named relative to the emitter's work directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    pub files: Vec<(String, String)>,
}

impl Rendered {
    pub fn push(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.files.push((name.into(), text.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, text)| text.as_str())
    }
}

/// Common interface of the SH, PKG and EXE emitters
pub trait Emitter {
    fn installer_type(&self) -> InstallerType;

    /// Render every template the installer needs
    fn render(&self, ctx: &BuildContext, layout: &StagedLayout) -> Result<Rendered>;

    /// Build the installer at `ctx.output_path(..)` and return its path
    fn assemble(&self, ctx: &BuildContext, layout: &StagedLayout, rendered: Rendered) -> Result<PathBuf>;

    /// Finalize the produced file (signing, notarization)
    fn post_process(&self, _ctx: &BuildContext, _output: &Path) -> Result<()> {
        Ok(())
    }
}

/// Dist name of the interpreter heading the base environment
///
/// SH and PKG installers run the install-time runtime with it.
pub(crate) fn interpreter_dist(ctx: &BuildContext) -> Result<String> {
    ctx.plans
        .primary
        .records
        .first()
        .filter(|r| r.name == INTERPRETER)
        .map(|r| r.dist())
        .ok_or_else(|| {
            Error::Emit(format!(
                "{} installers need {INTERPRETER} first in the base environment",
                ctx.recipe.name
            ))
        })
}

/// The interpreter's record, wherever it sits in the base environment
///
/// EXE installers extract with the embedded conda executable, so the
/// interpreter keeps its dependency-ordered position.
pub(crate) fn interpreter_record(ctx: &BuildContext) -> Result<&PackageRecord> {
    ctx.plans
        .primary
        .records
        .iter()
        .find(|r| r.name == INTERPRETER)
        .ok_or_else(|| {
            Error::Emit(format!(
                "{} installers need {INTERPRETER} in the base environment",
                ctx.recipe.name
            ))
        })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `script_env_variables` as validated `(name, value)` pairs
pub(crate) fn script_env(ctx: &BuildContext) -> Result<Vec<(String, String)>> {
    ctx.recipe
        .script_env_variables
        .iter()
        .map(|(key, value)| {
            if is_identifier(key) {
                Ok((key.clone(), value.clone()))
            } else {
                Err(Error::recipe(
                    format!("script_env_variables.{key}"),
                    "not a valid environment variable name",
                ))
            }
        })
        .collect()
}

/// The emitter producing installers of `itype`
pub fn emitter_for(itype: InstallerType) -> Box<dyn Emitter> {
    match itype {
        InstallerType::Sh => Box::new(sh::ShEmitter),
        InstallerType::Pkg => Box::new(pkg::PkgEmitter),
        InstallerType::Exe => Box::new(exe::ExeEmitter),
    }
}

/// Run all three steps for `itype` and record the output in the context
pub fn emit(ctx: &mut BuildContext, layout: &StagedLayout, itype: InstallerType) -> Result<PathBuf> {
    let emitter = emitter_for(itype);
    info!("Building {} installer", itype);
    let rendered = emitter.render(ctx, layout)?;
    let output = emitter.assemble(ctx, layout, rendered)?;
    emitter.post_process(ctx, &output)?;
    info!("Wrote {}", output.display());
    ctx.outputs.push(output.clone());
    Ok(output)
}
