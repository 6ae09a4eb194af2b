// src/stager/progress.rs

//! Download progress display
//!
//! One aggregate bar for the total byte count plus one bar per package,
//! managed through indicatif's `MultiProgress`. Hidden in quiet mode;
//! indicatif itself stays silent when stderr is not a terminal.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

pub struct DownloadProgress {
    multi: MultiProgress,
    overall: ProgressBar,
    packages: usize,
    completed: AtomicUsize,
    bytes: AtomicU64,
}

impl DownloadProgress {
    /// Progress for `packages` downloads totalling `total_size` bytes
    pub fn new(packages: usize, total_size: u64, quiet: bool) -> Self {
        let multi = if quiet {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };

        let overall = ProgressBar::new(total_size);
        overall.set_style(
            ProgressStyle::default_bar()
                .template("Total: [{bar:40.green/dim}] {bytes}/{total_bytes} ({bytes_per_sec}) - {msg}")
                .expect("Invalid progress bar template")
                .progress_chars("=>-"),
        );
        overall.set_message(format!("0/{packages} packages"));
        let overall = multi.add(overall);

        Self {
            multi,
            overall,
            packages,
            completed: AtomicUsize::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    /// Bar for one package; a spinner when the size is unknown
    pub fn add_download(&self, name: &str, size: u64) -> ProgressBar {
        let pb = if size > 0 {
            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {msg}")
                    .expect("Invalid progress bar template")
                    .progress_chars("#>-"),
            );
            pb
        } else {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {bytes} {msg}")
                    .expect("Invalid spinner template"),
            );
            pb
        };
        pb.set_message(name.to_string());
        self.multi.add(pb)
    }

    /// Record a finished package and advance the aggregate bar
    pub fn finish_download(&self, pb: &ProgressBar, name: &str, bytes: u64) {
        pb.finish_and_clear();
        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.overall.set_position(total);
        self.overall.set_message(format!("{done}/{} packages ({name})", self.packages));
    }

    pub fn fail_download(pb: &ProgressBar, name: &str, error: &str) {
        pb.abandon_with_message(format!("{name} [FAILED: {error}]"));
    }

    pub fn finish_all(&self) {
        let mb = self.bytes.load(Ordering::Relaxed) as f64 / 1_048_576.0;
        self.overall.finish_with_message(format!(
            "{} packages ({:.2} MB)",
            self.completed.load(Ordering::Relaxed),
            mb
        ));
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }
}
