// src/stager/mod.rs

//! Artifact staging
//!
//! Downloads and verifies every planned archive, optionally transmutes it,
//! and lays out the staging root consumed by the emitters (see [`layout`]
//! for the tree). All writes go through a temporary file and a rename. The
//! staging root itself is owned by the [`BuildContext`] and removed on
//! error unless debug mode keeps it.

pub mod download;
pub mod extra_files;
pub mod layout;
mod progress;
pub mod transmute;

pub use download::{MAX_ATTEMPTS, PackageCache};
pub use layout::PREFIX_PLACEHOLDER;
pub use progress::DownloadProgress;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::catalog::{Catalog, CatalogClient, snapshot};
use crate::context::BuildContext;
use crate::error::{Error, Result};
use crate::filesystem::{copy_atomic, sanitize_filename, set_executable, write_atomic};
use crate::package::PackageRecord;
use crate::planner::EnvironmentPlan;

/// Files the stager produced, as absolute paths
#[derive(Debug, Clone, Default)]
pub struct StagedLayout {
    pub root: PathBuf,
    pub pkgs_dir: PathBuf,
    /// `pkgs/<filename>` of every distinct archive, primary order first
    pub archives: Vec<PathBuf>,
    pub snapshots: Vec<PathBuf>,
    pub runtime: PathBuf,
    pub license: Option<PathBuf>,
    pub condarc: Option<PathBuf>,
    /// `pre_install`, `post_install`, `pre_uninstall` copies
    pub scripts: BTreeMap<String, PathBuf>,
    /// Relative destinations of `extra_files`
    pub extra_files: Vec<PathBuf>,
    /// Relative destinations of `temp_extra_files`
    pub temp_extra_files: Vec<PathBuf>,
    /// Bundled conda standalone executable
    pub conda_exe: Option<PathBuf>,
}

impl StagedLayout {
    /// Archive path of `record` inside the staging tree
    pub fn archive(&self, record: &PackageRecord) -> PathBuf {
        self.pkgs_dir.join(&record.filename)
    }

    /// Manifest directory of `plan`: `pkgs/` or `pkgs/envs/<name>/`
    pub fn env_dir(&self, plan: &EnvironmentPlan) -> PathBuf {
        if plan.is_base() {
            self.pkgs_dir.clone()
        } else {
            self.pkgs_dir.join("envs").join(&plan.name)
        }
    }
}

type RecordKey = (String, String, String);

fn key(r: &PackageRecord) -> RecordKey {
    (r.channel_url.clone(), r.subdir.clone(), r.filename.clone())
}

/// Stage everything the build ships into the context's staging root
pub fn stage(ctx: &mut BuildContext, client: &CatalogClient, catalog: &Catalog) -> Result<StagedLayout> {
    let root = ctx.staging_dir().to_path_buf();
    let pkgs_dir = root.join("pkgs");
    fs::create_dir_all(&pkgs_dir).map_err(|e| Error::io_at(&pkgs_dir, e))?;
    info!("Staging {} into {}", ctx.recipe.name, root.display());

    let cache = PackageCache::open(&ctx.cache_dir)?;
    let bundled: Vec<PackageRecord> = ctx.plans.bundled().into_iter().cloned().collect();
    for r in &bundled {
        sanitize_filename(&r.filename)?;
    }
    let refs: Vec<&PackageRecord> = bundled.iter().collect();
    let local = cache.fetch_all(client, &refs, ctx.quiet)?;

    // Final shipped record per original identity
    let mut shipped: HashMap<RecordKey, PackageRecord> = HashMap::new();
    for r in &bundled {
        let cached = local
            .get(&r.filename)
            .ok_or_else(|| Error::Staging(format!("{} was not downloaded", r.filename)))?;
        let mut record = r.clone();
        download::fill_missing_metadata(&mut record, cached)?;

        let source = match ctx.recipe.transmute_file_type.as_deref() {
            Some(ext) if transmute::needs_transmute(&record, ext) => {
                let (transmuted, path) =
                    transmute::transmute(&record, cached, ext, &cache.dir().join("transmuted"))?;
                record = transmuted;
                path
            }
            _ => cached.clone(),
        };

        let dest = pkgs_dir.join(&record.filename);
        copy_atomic(&source, &dest)?;
        download::verify(&dest, &record)?;
        record.local_path = Some(dest);
        shipped.insert(key(r), record);
    }

    for plan in ctx.plans.all_mut() {
        for r in &mut plan.records {
            if let Some(s) = shipped.get(&key(r)) {
                *r = s.clone();
            }
        }
    }
    let bundled: Vec<PackageRecord> = ctx.plans.bundled().into_iter().cloned().collect();

    let snapshots = snapshot::write_snapshots(&pkgs_dir.join("cache"), catalog, &bundled)?;

    let platform = ctx.platform().subdir();
    let installer_filename = ctx
        .installer_types
        .first()
        .map(|t| ctx.recipe.installer_filename(*t))
        .unwrap_or_default();

    let mut layout = StagedLayout {
        root: root.clone(),
        pkgs_dir: pkgs_dir.clone(),
        archives: bundled.iter().filter_map(|r| r.local_path.clone()).collect(),
        snapshots,
        runtime: pkgs_dir.join(".install.py"),
        ..Default::default()
    };

    let all: Vec<&EnvironmentPlan> = ctx.plans.all().collect();
    for plan in &all {
        let dir = layout.env_dir(plan);
        layout::write_env_manifests(&dir, plan, platform)?;
        if !plan.is_base() {
            let runtime = layout::render_runtime(&ctx.recipe, &[*plan], &installer_filename)?;
            write_atomic(&dir.join(".install.py"), runtime)?;
        }
    }
    let runtime = layout::render_runtime(&ctx.recipe, &all, &installer_filename)?;
    write_atomic(&layout.runtime, runtime)?;

    if let Some(text) = ctx.recipe.condarc_text()? {
        let path = root.join(".condarc");
        write_atomic(&path, text)?;
        layout.condarc = Some(path);
    }

    if let Some(license) = &ctx.recipe.license_file {
        let path = pkgs_dir.join("LICENSE.txt");
        copy_atomic(license, &path)?;
        layout.license = Some(path);
    }

    let scripts = [
        ("pre_install", &ctx.recipe.pre_install),
        ("post_install", &ctx.recipe.post_install),
        ("pre_uninstall", &ctx.recipe.pre_uninstall),
    ];
    for (kind, script) in scripts {
        let Some(src) = script else { continue };
        layout.scripts.insert(kind.to_string(), stage_script(&pkgs_dir, kind, src)?);
    }

    layout.extra_files = extra_files::stage_extra_files(&root, &ctx.recipe.extra_files)?;
    layout.temp_extra_files = extra_files::stage_temp_extra_files(&root, &ctx.recipe.temp_extra_files)?;

    if let Some(exe) = &ctx.conda_exe {
        let name = if ctx.platform().os() == crate::platform::Os::Windows {
            "_conda.exe"
        } else {
            "_conda"
        };
        let dest = root.join(name);
        copy_atomic(exe, &dest)?;
        set_executable(&dest)?;
        layout.conda_exe = Some(dest);
    }

    ctx.bundled = bundled;
    debug!("Staged {} archives", layout.archives.len());
    Ok(layout)
}

/// Copy a user script to `pkgs/user_<kind><ext>`
fn stage_script(pkgs_dir: &Path, kind: &str, src: &Path) -> Result<PathBuf> {
    let ext = src
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let dest = pkgs_dir.join(format!("user_{kind}{ext}"));
    copy_atomic(src, &dest)?;
    set_executable(&dest)?;
    Ok(dest)
}

/// Staged files relative to the root, sorted, for manifests and tests
pub fn staged_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Staging(format!("cannot walk {}: {e}", root.display())))?;
        if entry.file_type().is_file() {
            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| Error::Staging(e.to_string()))?;
            files.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(files)
}
