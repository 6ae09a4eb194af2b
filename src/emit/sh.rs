// src/emit/sh.rs
//! Self-extracting shell installer
//!
//! The output is a POSIX shell header followed by an uncompressed tar of
//! the staging root. The header declares its own line count, its byte
//! length, the total file length and the MD5 of the payload. Those values
//! are only known after rendering, so the header is rendered with
//! fixed-width slots and the slots are overwritten in place once the
//! payload exists. Filling a slot never changes the header length.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tar::{Builder as TarBuilder, EntryType, Header};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{Emitter, Rendered, interpreter_dist, script_env};
use crate::context::BuildContext;
use crate::error::{Error, Result};
use crate::filesystem::set_executable;
use crate::hash::{self, HashAlgorithm};
use crate::platform::Os;
use crate::recipe::InstallerType;
use crate::solver::parse_virtual_spec;
use crate::stager::StagedLayout;
use crate::template::{TemplateScope, render_selectors};

const HEADER_TEMPLATE: &str = include_str!("../templates/header.sh");
const HEADER_NAME: &str = "header.sh";

/// Width of the numeric slots; enough for any file size
const NUMBER_WIDTH: usize = 20;
const MD5_WIDTH: usize = 32;

/// A fixed-width region of the header filled after the payload is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Md5,
    HeaderLines,
    HeaderBytes,
    TotalBytes,
}

impl Slot {
    const ALL: [Slot; 4] = [Slot::Md5, Slot::HeaderLines, Slot::HeaderBytes, Slot::TotalBytes];

    fn placeholder(&self) -> &'static str {
        match self {
            Slot::Md5 => "MD5",
            Slot::HeaderLines => "HEADER_LINES",
            Slot::HeaderBytes => "HEADER_BYTES",
            Slot::TotalBytes => "TOTAL_BYTES",
        }
    }

    fn width(&self) -> usize {
        match self {
            Slot::Md5 => MD5_WIDTH,
            _ => NUMBER_WIDTH,
        }
    }

    /// Marker rendered into the header in place of the value
    fn marker(&self) -> String {
        format!("{:@<width$}", format!("@{}", self.placeholder()), width = self.width())
    }
}

/// Overwrite every occurrence of `slot` in `header`, padding with spaces
fn fill_slot(header: &mut String, slot: Slot, value: &str) -> Result<()> {
    if value.len() > slot.width() {
        return Err(Error::Emit(format!(
            "value {value} does not fit the {} slot",
            slot.placeholder()
        )));
    }
    let marker = slot.marker();
    if !header.contains(&marker) {
        return Err(Error::Emit(format!("header lacks the {} slot", slot.placeholder())));
    }
    let padded = format!("{value:<width$}", width = slot.width());
    *header = header.replace(&marker, &padded);
    Ok(())
}

/// Single-quote `value` for the shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Escape `value` for use inside double quotes
fn double_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Shell lines checking the host against `virtual_specs`
///
/// glibc is probed with `ldd --version`, macOS with `sw_vers`, the Linux
/// kernel with `uname -r`. Other virtual packages cannot be probed from a
/// shell and are left to the solver.
pub fn virtual_specs_check(virtual_specs: &[String], os: Os) -> String {
    let mut lines = Vec::new();
    for spec in virtual_specs {
        let (name, version) = parse_virtual_spec(spec);
        let Some(min) = version else { continue };
        let probe = match (name.as_str(), os) {
            ("__glibc", Os::Linux) => "ldd --version 2>/dev/null | head -n 1 | awk '{print $NF}'",
            ("__linux", Os::Linux) => "uname -r | cut -d- -f1",
            ("__osx", Os::MacOs) => "sw_vers -productVersion",
            _ => continue,
        };
        lines.push(format!("found=$({probe} || true)"));
        lines.push(format!(
            "if [ -n \"$found\" ] && ! version_ge \"$found\" \"{min}\"; then\n    \
             printf \"ERROR: this installer requires %s, found %s\\n\" \"{}\" \"$found\" >&2\n    \
             exit 1\nfi",
            double_quoted(spec)
        ));
    }
    if lines.is_empty() {
        return ":".to_string();
    }
    let mut out = String::from(
        "version_ge() {\n    \
         [ \"$(printf '%s\\n%s\\n' \"$2\" \"$1\" | sort -t. -k1,1n -k2,2n -k3,3n | head -n 1)\" = \"$2\" ]\n}\n",
    );
    out.push_str(&lines.join("\n"));
    out
}

/// Default install location shown to the user
/// Terminator of the license heredoc in the header
const LICENSE_DELIMITER: &str = "EOF_LICENSE";

/// License text as spliced into the header's heredoc
///
/// A line equal to the delimiter would end the heredoc early and run the
/// remaining license lines as shell commands.
fn heredoc_license(text: &str) -> Result<String> {
    if text.lines().any(|line| line.trim_end_matches('\r') == LICENSE_DELIMITER) {
        return Err(Error::recipe(
            "license_file",
            format!("license text must not contain a line reading {LICENSE_DELIMITER}"),
        ));
    }
    Ok(text.trim_end().to_string())
}

fn default_prefix(ctx: &BuildContext) -> String {
    ctx.recipe
        .default_prefix
        .clone()
        .unwrap_or_else(|| format!("$HOME/{}", ctx.recipe.default_prefix_name()))
}

/// Staged script name below `pkgs/`, or empty
fn script_name(layout: &StagedLayout, kind: &str) -> String {
    layout
        .scripts
        .get(kind)
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Write the payload tar of `root` to `dest`, omitting `exclude`
///
/// Entries are added in sorted order with zeroed ownership and mtime so the
/// same tree always yields the same bytes.
fn write_payload(root: &Path, dest: &mut File, exclude: &[PathBuf]) -> Result<()> {
    let mut builder = TarBuilder::new(BufWriter::new(dest));
    builder.follow_symlinks(false);
    for entry in walkdir::WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Emit(format!("cannot walk {}: {e}", root.display())))?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| Error::Emit(e.to_string()))?;
        if exclude.iter().any(|x| x == rel) {
            continue;
        }
        let meta = entry
            .path()
            .symlink_metadata()
            .map_err(|e| Error::io_at(entry.path(), e))?;

        let mut header = Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(file_mode(&meta));
        let file_type = entry.file_type();
        if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, rel, io::empty())?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(entry.path()).map_err(|e| Error::io_at(entry.path(), e))?;
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            builder.append_link(&mut header, rel, target)?;
        } else {
            header.set_entry_type(EntryType::Regular);
            header.set_size(meta.len());
            let file = File::open(entry.path()).map_err(|e| Error::io_at(entry.path(), e))?;
            builder.append_data(&mut header, rel, file)?;
        }
    }
    builder.into_inner()?.flush()?;
    Ok(())
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(meta: &fs::Metadata) -> u32 {
    if meta.is_dir() { 0o755 } else { 0o644 }
}

/// Fill the slots of a rendered header for a payload of `payload_len`
/// bytes with MD5 `payload_md5`
pub fn finalize_header(rendered: &str, payload_len: u64, payload_md5: &str) -> Result<String> {
    let mut header = rendered.to_string();
    let header_lines = header.matches('\n').count();
    let header_bytes = header.len() as u64;
    fill_slot(&mut header, Slot::Md5, payload_md5)?;
    fill_slot(&mut header, Slot::HeaderLines, &header_lines.to_string())?;
    fill_slot(&mut header, Slot::HeaderBytes, &header_bytes.to_string())?;
    fill_slot(&mut header, Slot::TotalBytes, &(header_bytes + payload_len).to_string())?;
    debug_assert_eq!(header.len() as u64, header_bytes);
    Ok(header)
}

/// The shell installer emitter
#[derive(Debug, Clone, Copy, Default)]
pub struct ShEmitter;

impl ShEmitter {
    fn scope(&self, ctx: &BuildContext, layout: &StagedLayout) -> Result<TemplateScope> {
        let recipe = &ctx.recipe;
        let mut scope = TemplateScope::for_recipe(recipe)?;
        scope.set("batch_mode", recipe.batch_mode)?;
        scope.set("has_license", layout.license.is_some())?;
        scope.set("has_condarc", layout.condarc.is_some())?;
        scope.set("has_pre_install", layout.scripts.contains_key("pre_install"))?;
        scope.set("has_post_install", layout.scripts.contains_key("post_install"))?;
        scope.set("has_conda_exe", layout.conda_exe.is_some())?;
        scope.set("check_path_spaces", recipe.check_path_spaces)?;
        scope.set("initialize_conda", recipe.initialize_conda)?;
        Ok(scope)
    }

    fn vars(&self, ctx: &BuildContext, layout: &StagedLayout) -> Result<BTreeMap<String, String>> {
        let recipe = &ctx.recipe;
        let python_dist = interpreter_dist(ctx)?;

        let license = match &layout.license {
            Some(path) => fs::read_to_string(path).map_err(|e| Error::io_at(path, e))?,
            None => String::new(),
        };
        let condarc = match &layout.condarc {
            Some(path) => fs::read_to_string(path).map_err(|e| Error::io_at(path, e))?,
            None => String::new(),
        };

        let env_lines: Vec<String> = script_env(ctx)?
            .into_iter()
            .map(|(key, value)| format!("{key}={}\nexport {key}", shell_quote(&value)))
            .collect();

        let install_commands: Vec<String> = ctx
            .plans
            .bundled()
            .iter()
            .map(|r| format!("extract_dist \"{}\"", double_quoted(&r.filename)))
            .collect();

        let exists_error = recipe.install_path_exists_error_text.clone().unwrap_or_else(|| {
            "File or directory already exists. Use -u to update an existing installation \
             or -f to force installation."
                .to_string()
        });
        let initialize_default = if recipe.initialize_by_default.unwrap_or(false) {
            "yes"
        } else {
            "no"
        };

        let mut vars = BTreeMap::new();
        let mut set = |k: &str, v: String| {
            vars.insert(k.to_string(), v);
        };
        set("NAME", double_quoted(&recipe.name));
        set("VERSION", double_quoted(&recipe.version));
        set("PLAT", ctx.platform().subdir().to_string());
        set("CONSTRUCTOR_VERSION", env!("CARGO_PKG_VERSION").to_string());
        set("DEFAULT_PREFIX", double_quoted(&default_prefix(ctx)));
        set("LICENSE", heredoc_license(&license)?);
        set("CONDARC", condarc.trim_end().to_string());
        set("VIRTUAL_SPECS_CHECK", virtual_specs_check(&recipe.virtual_specs, ctx.platform().os()));
        set("SCRIPT_ENV_VARIABLES", env_lines.join("\n"));
        set("INSTALL_COMMANDS", install_commands.join("\n"));
        set("PYTHON_DIST", python_dist);
        set("PRE_INSTALL", script_name(layout, "pre_install"));
        set("POST_INSTALL", script_name(layout, "post_install"));
        set("INSTALL_PATH_EXISTS_ERROR", double_quoted(&exists_error).replace('$', "\\$"));
        set("INITIALIZE_DEFAULT", initialize_default.to_string());
        for slot in Slot::ALL {
            set(slot.placeholder(), slot.marker());
        }
        Ok(vars)
    }
}

impl Emitter for ShEmitter {
    fn installer_type(&self) -> InstallerType {
        InstallerType::Sh
    }

    fn render(&self, ctx: &BuildContext, layout: &StagedLayout) -> Result<Rendered> {
        let scope = self.scope(ctx, layout)?;
        let vars = self.vars(ctx, layout)?;
        let header = render_selectors(HEADER_NAME, HEADER_TEMPLATE, &scope, &vars)?;
        let mut rendered = Rendered::default();
        rendered.push(HEADER_NAME, header);
        Ok(rendered)
    }

    fn assemble(&self, ctx: &BuildContext, layout: &StagedLayout, rendered: Rendered) -> Result<PathBuf> {
        let header = rendered
            .get(HEADER_NAME)
            .ok_or_else(|| Error::Emit("shell header was not rendered".to_string()))?;
        let output = ctx.output_path(InstallerType::Sh);
        let out_dir = output.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(out_dir).map_err(|e| Error::io_at(out_dir, e))?;

        // The condarc is written by the header itself
        let exclude = vec![PathBuf::from(".condarc")];
        let mut payload = NamedTempFile::new_in(out_dir)?;
        write_payload(&layout.root, payload.as_file_mut(), &exclude)?;
        let payload_len = payload.as_file().metadata()?.len();
        let payload_md5 =
            hash::hash_file(HashAlgorithm::Md5, payload.path()).map_err(|e| Error::io_at(payload.path(), e))?;
        debug!("Payload is {} bytes, md5 {}", payload_len, payload_md5);

        let header = finalize_header(header, payload_len, &payload_md5)?;

        let mut installer = NamedTempFile::new_in(out_dir)?;
        {
            let mut writer = BufWriter::new(installer.as_file_mut());
            writer.write_all(header.as_bytes())?;
            let mut source = File::open(payload.path()).map_err(|e| Error::io_at(payload.path(), e))?;
            io::copy(&mut source, &mut writer)?;
            writer.flush()?;
        }
        installer
            .persist(&output)
            .map_err(|e| Error::io_at(&output, e.error))?;
        set_executable(&output)?;
        Ok(output)
    }
}
