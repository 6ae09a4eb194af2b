// src/emit/pkg/extract.rs
//! Build-time package extraction
//!
//! macOS packages ship every conda package already unpacked under
//! `pkgs/<dist>`. `.tar.bz2` archives are unpacked with the host `tar`;
//! `.conda` archives are zip containers whose inner `.tar.zst` payloads are
//! decompressed here.

use rayon::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::package::archive_extension;
use crate::process;

/// `tar -xjf <archive> -C <dest>`
pub fn untar_command(tar: &Path, archive: &Path, dest: &Path) -> Command {
    let mut cmd = Command::new(tar);
    cmd.arg("-xjf").arg(archive).arg("-C").arg(dest);
    cmd
}

/// `tar -xf <archive> -C <dest>`; bsdtar reads the zip container
pub fn unzip_command(tar: &Path, archive: &Path, dest: &Path) -> Command {
    let mut cmd = Command::new(tar);
    cmd.arg("-xf").arg(archive).arg("-C").arg(dest);
    cmd
}

/// Unpack a zstd-compressed tarball into `dest`
fn unpack_tar_zst(path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(path).map_err(|e| Error::io_at(path, e))?;
    let decoder = zstd::Decoder::new(file)
        .map_err(|e| Error::Emit(format!("cannot decode {}: {e}", path.display())))?;
    tar::Archive::new(decoder)
        .unpack(dest)
        .map_err(|e| Error::Emit(format!("cannot unpack {}: {e}", path.display())))
}

/// Unpack one package archive into `dest`
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    fs::create_dir_all(dest).map_err(|e| Error::io_at(dest, e))?;
    let tar = process::find_tool("tar")?;

    match archive_extension(&name) {
        Some(".tar.bz2") => {
            process::run("tar", &mut untar_command(&tar, archive, dest))?;
        }
        Some(".conda") => {
            let scratch = tempfile::Builder::new()
                .prefix(".conda-")
                .tempdir_in(dest)
                .map_err(|e| Error::io_at(dest, e))?;
            process::run("tar", &mut unzip_command(&tar, archive, scratch.path()))?;
            let mut inner: Vec<PathBuf> = fs::read_dir(scratch.path())
                .map_err(|e| Error::io_at(scratch.path(), e))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.to_string_lossy().ends_with(".tar.zst"))
                .collect();
            inner.sort();
            if inner.is_empty() {
                return Err(Error::Emit(format!("{name} holds no .tar.zst payload")));
            }
            for part in &inner {
                unpack_tar_zst(part, dest)?;
            }
        }
        _ => return Err(Error::Emit(format!("unknown archive format: {name}"))),
    }
    debug!("Extracted {} into {}", name, dest.display());
    Ok(())
}

/// Run `job` over every `(archive, dest)` pair on a bounded pool
///
/// Falls back to sequential extraction when the pool cannot be created;
/// both paths stop at the first error.
pub fn run_jobs<F>(jobs: &[(PathBuf, PathBuf)], threads: usize, job: F) -> Result<()>
where
    F: Fn(&Path, &Path) -> Result<()> + Sync,
{
    match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => pool.install(|| jobs.par_iter().try_for_each(|(a, d)| job(a, d))),
        Err(e) => {
            warn!("Cannot create extraction pool ({}), extracting sequentially", e);
            jobs.iter().try_for_each(|(a, d)| job(a, d))
        }
    }
}

/// Extract every archive into its destination in parallel
pub fn extract_all(jobs: &[(PathBuf, PathBuf)]) -> Result<()> {
    let threads = std::thread::available_parallelism().map_or(1, |n| n.get().min(8));
    run_jobs(jobs, threads, extract_archive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[test]
    fn test_untar_command() {
        let cmd = untar_command(
            Path::new("/usr/bin/tar"),
            Path::new("/stage/pkgs/zlib-1.2.13-h0_0.tar.bz2"),
            Path::new("/root/pkgs/zlib-1.2.13-h0_0"),
        );
        assert_eq!(
            process::command_line(&cmd),
            vec![
                "/usr/bin/tar",
                "-xjf",
                "/stage/pkgs/zlib-1.2.13-h0_0.tar.bz2",
                "-C",
                "/root/pkgs/zlib-1.2.13-h0_0"
            ]
        );
    }

    #[test]
    fn test_run_jobs_visits_every_pair() {
        let jobs: Vec<(PathBuf, PathBuf)> = (0..5)
            .map(|i| (PathBuf::from(format!("a{i}")), PathBuf::from(format!("d{i}"))))
            .collect();
        let seen = Mutex::new(Vec::new());
        run_jobs(&jobs, 2, |a, _| {
            seen.lock().unwrap().push(a.to_path_buf());
            Ok(())
        })
        .unwrap();
        let mut seen = seen.into_inner().unwrap();
        seen.sort();
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn test_run_jobs_propagates_failure() {
        let jobs = vec![(PathBuf::from("bad"), PathBuf::from("d"))];
        let err = run_jobs(&jobs, 1, |_, _| Err(Error::Emit("boom".into()))).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_unpack_tar_zst() {
        let dir = TempDir::new().unwrap();
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(5);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "info/index.json", &b"{}\n\n\n"[..]).unwrap();
        let tarball = builder.into_inner().unwrap();
        let compressed = zstd::encode_all(&tarball[..], 3).unwrap();
        let part = dir.path().join("info-zlib.tar.zst");
        fs::write(&part, compressed).unwrap();

        let dest = dir.path().join("out");
        unpack_tar_zst(&part, &dest).unwrap();
        assert_eq!(fs::read(dest.join("info/index.json")).unwrap(), b"{}\n\n\n");
    }

    #[test]
    fn test_unknown_format_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("zlib.zip");
        fs::write(&file, b"x").unwrap();
        if process::find_tool("tar").is_ok() {
            assert!(extract_archive(&file, &dir.path().join("out")).is_err());
        }
    }
}
