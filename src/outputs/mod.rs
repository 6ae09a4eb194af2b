// src/outputs/mod.rs
//! Build outputs written next to the installers
//!
//! Every `build_outputs` entry of the recipe maps to one writer here. All
//! outputs land in the output directory. A failing `hash` output fails the
//! build; license collection problems are only warnings.

pub mod licenses;

use std::path::{Path, PathBuf};
use tracing::info;

use crate::context::BuildContext;
use crate::error::{Error, Result};
use crate::filesystem::write_atomic;
use crate::hash::{self, HashAlgorithm};
use crate::planner::{BASE_ENV, EnvironmentPlan};
use crate::recipe::BuildOutput;
use crate::stager::StagedLayout;

/// `<hex>  <basename>\n`, the format `sha256sum -c` reads
pub fn hash_line(digest: &str, installer: &Path) -> String {
    let name = installer
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{digest}  {name}\n")
}

/// Write `<installer>.<algo>` for every installer and algorithm
pub fn write_hashes(installers: &[PathBuf], algorithms: &[HashAlgorithm]) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for installer in installers {
        for algo in algorithms {
            let digest = hash::hash_file(*algo, installer).map_err(|e| Error::Post {
                output: "hash".to_string(),
                message: format!("cannot hash {}: {e}", installer.display()),
            })?;
            let mut dest = installer.clone().into_os_string();
            dest.push(format!(".{}", algo.name()));
            let dest = PathBuf::from(dest);
            write_atomic(&dest, hash_line(&digest, installer))?;
            written.push(dest);
        }
    }
    Ok(written)
}

/// One `name=version=build` line per shipped package
pub fn pkgs_list(plan: &EnvironmentPlan) -> String {
    plan.records
        .iter()
        .map(|r| format!("{}={}={}\n", r.name, r.version, r.build_string))
        .collect()
}

/// `<stem>.txt` for the base environment, `<stem>.<env>.txt` otherwise
fn env_output_name(stem: &str, env: Option<&str>) -> String {
    match env {
        None => format!("{stem}.txt"),
        Some(name) if name == BASE_ENV => format!("{stem}.txt"),
        Some(name) => format!("{stem}.{name}.txt"),
    }
}

fn plan_for<'a>(ctx: &'a BuildContext, output: &str, env: Option<&str>) -> Result<&'a EnvironmentPlan> {
    match env {
        None => Ok(&ctx.plans.primary),
        Some(name) => ctx.plans.env(name).ok_or_else(|| Error::Post {
            output: output.to_string(),
            message: format!("no environment named '{name}'"),
        }),
    }
}

/// Run every requested output; returns the files written
pub fn write_outputs(ctx: &mut BuildContext, layout: &StagedLayout) -> Result<Vec<PathBuf>> {
    let requested = ctx.recipe.build_outputs()?;
    let mut written = Vec::new();

    for output in requested {
        match output {
            BuildOutput::Hash { algorithms } => {
                written.extend(write_hashes(&ctx.outputs, &algorithms)?);
            }
            BuildOutput::InfoJson => {
                let dest = ctx.output_dir.join("info.json");
                let text = serde_json::to_string_pretty(&ctx.info_json()?)?;
                write_atomic(&dest, text)?;
                written.push(dest);
            }
            BuildOutput::PkgsList { env } => {
                let plan = plan_for(ctx, "pkgs_list", env.as_deref())?;
                let dest = ctx.output_dir.join(env_output_name("pkgs_list", env.as_deref()));
                write_atomic(&dest, pkgs_list(plan))?;
                written.push(dest);
            }
            BuildOutput::Lockfile { env } => {
                let plan = plan_for(ctx, "lockfile", env.as_deref())?;
                let dest = ctx.output_dir.join(env_output_name("lockfile", env.as_deref()));
                write_atomic(&dest, plan.explicit_lockfile(ctx.platform().subdir()))?;
                written.push(dest);
            }
            BuildOutput::Licenses {
                include_text,
                text_errors,
            } => {
                let options = licenses::LicenseOptions::new(include_text, text_errors.as_deref())?;
                let (report, warnings) = licenses::collect(&ctx.plans.bundled(), layout, &options);
                for warning in warnings {
                    ctx.warn(warning);
                }
                let dest = ctx.output_dir.join("licenses.json");
                write_atomic(&dest, serde_json::to_string_pretty(&report)?)?;
                written.push(dest);
            }
        }
    }

    for path in &written {
        info!("Wrote {}", path.display());
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::IndexEntry;
    use crate::package::PackageRecord;
    use tempfile::TempDir;

    #[test]
    fn test_hash_line_is_posix() {
        let line = hash_line("abc123", Path::new("/out/Mini-1.0-Linux-x86_64.sh"));
        assert_eq!(line, "abc123  Mini-1.0-Linux-x86_64.sh\n");
        assert!(!line.contains('\r'));
    }

    #[test]
    fn test_write_hashes() {
        let dir = TempDir::new().unwrap();
        let installer = dir.path().join("Mini-1.0-Linux-x86_64.sh");
        std::fs::write(&installer, b"hello").unwrap();
        let written = write_hashes(
            std::slice::from_ref(&installer),
            &[HashAlgorithm::Sha256, HashAlgorithm::Md5],
        )
        .unwrap();
        assert_eq!(written.len(), 2);
        let sha = std::fs::read_to_string(dir.path().join("Mini-1.0-Linux-x86_64.sh.sha256")).unwrap();
        assert_eq!(
            sha,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824  Mini-1.0-Linux-x86_64.sh\n"
        );
        let md5 = std::fs::read_to_string(dir.path().join("Mini-1.0-Linux-x86_64.sh.md5")).unwrap();
        assert!(md5.starts_with("5d41402abc4b2a76b9719d911017c592  "));
    }

    #[test]
    fn test_write_hashes_per_installer_and_algorithm() {
        let dir = TempDir::new().unwrap();
        let installers = vec![
            dir.path().join("Mini-1.0-MacOSX-arm64.sh"),
            dir.path().join("Mini-1.0-MacOSX-arm64.pkg"),
        ];
        std::fs::write(&installers[0], b"shell installer").unwrap();
        std::fs::write(&installers[1], b"flat package").unwrap();
        let algorithms = [HashAlgorithm::Sha256, HashAlgorithm::Md5];

        let written = write_hashes(&installers, &algorithms).unwrap();
        assert_eq!(written.len(), 4);

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".sha256") || n.ends_with(".md5"))
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "Mini-1.0-MacOSX-arm64.pkg.md5",
                "Mini-1.0-MacOSX-arm64.pkg.sha256",
                "Mini-1.0-MacOSX-arm64.sh.md5",
                "Mini-1.0-MacOSX-arm64.sh.sha256",
            ]
        );

        for installer in &installers {
            let basename = installer.file_name().unwrap().to_string_lossy().into_owned();
            for algo in algorithms {
                let path = dir.path().join(format!("{basename}.{}", algo.name()));
                let digest = hash::hash_file(algo, installer).unwrap();
                assert_eq!(std::fs::read_to_string(path).unwrap(), format!("{digest}  {basename}\n"));
            }
        }
    }

    #[test]
    fn test_missing_installer_is_fatal() {
        let err = write_hashes(&[PathBuf::from("/nonexistent/x.sh")], &[HashAlgorithm::Sha256]).unwrap_err();
        assert!(matches!(err, Error::Post { .. }));
    }

    #[test]
    fn test_pkgs_list_and_names() {
        let entry = IndexEntry {
            name: "zlib".into(),
            version: "1.2.13".into(),
            build: "h0_0".into(),
            ..Default::default()
        };
        let plan = EnvironmentPlan {
            records: vec![PackageRecord::from_entry(
                "https://repo.example.com/main",
                "https://repo.example.com/main",
                "linux-64",
                "zlib-1.2.13-h0_0.conda",
                &entry,
            )],
            ..Default::default()
        };
        assert_eq!(pkgs_list(&plan), "zlib=1.2.13=h0_0\n");
        assert_eq!(env_output_name("lockfile", None), "lockfile.txt");
        assert_eq!(env_output_name("lockfile", Some("base")), "lockfile.txt");
        assert_eq!(env_output_name("pkgs_list", Some("py310")), "pkgs_list.py310.txt");
    }
}
