// src/cli.rs
//! CLI definitions for the constructor binary
//!
//! One invocation builds the installers of one recipe directory. `--clean`
//! and `--print-options` are maintenance modes that exit without building.

use clap::Parser;
use std::path::PathBuf;

use constructor::{BuildOptions, Platform};

#[derive(Parser, Debug)]
#[command(name = "constructor")]
#[command(author = "Constructor Contributors")]
#[command(version)]
#[command(about = "Build self-contained installers from conda packages", long_about = None)]
pub struct Cli {
    /// Directory containing construct.yaml
    #[arg(value_name = "RECIPE_DIR", required_unless_present = "print_options")]
    pub recipe_dir: Option<PathBuf>,

    /// Where installers and build outputs are written
    #[arg(long, value_name = "PATH", default_value = ".")]
    pub output_dir: PathBuf,

    /// Download cache (default: ~/.conda/constructor/<platform>)
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Target platform, e.g. linux-64 or osx-arm64 (default: recipe, then host)
    #[arg(long, value_name = "TRIPLE")]
    pub platform: Option<Platform>,

    /// Conda standalone executable used for solving and bundled as the runtime
    #[arg(long, value_name = "PATH")]
    pub conda_exe: Option<PathBuf>,

    /// Keep the staging directory
    #[arg(long)]
    pub debug: bool,

    /// Plan and validate without staging or emitting
    #[arg(long)]
    pub dry_run: bool,

    /// Debug-level logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Hide progress bars
    #[arg(short, long)]
    pub quiet: bool,

    /// Remove the download cache of the target platform and exit
    #[arg(long)]
    pub clean: bool,

    /// List every recipe key with its default and exit
    #[arg(long, alias = "help-construct")]
    pub print_options: bool,
}

impl Cli {
    /// Run settings from the flags, then `CONSTRUCTOR_*` variables for unset ones
    pub fn options(&self) -> BuildOptions {
        BuildOptions {
            recipe_dir: self.recipe_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
            output_dir: self.output_dir.clone(),
            platform: self.platform,
            conda_exe: self.conda_exe.clone(),
            cache_dir: self.cache_dir.clone(),
            debug: self.debug,
            dry_run: self.dry_run,
            verbose: self.verbose,
            quiet: self.quiet,
        }
        .from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build_flags() {
        let cli = Cli::try_parse_from([
            "constructor",
            "recipes/mini",
            "--output-dir",
            "dist",
            "--platform",
            "osx-arm64",
            "--dry-run",
            "--debug",
        ])
        .unwrap();
        let options = cli.options();
        assert_eq!(options.recipe_dir, PathBuf::from("recipes/mini"));
        assert_eq!(options.output_dir, PathBuf::from("dist"));
        assert_eq!(options.platform, Some(Platform::OsxArm64));
        assert!(options.dry_run && options.debug);
    }

    #[test]
    fn test_recipe_dir_required_unless_listing_options() {
        assert!(Cli::try_parse_from(["constructor"]).is_err());
        assert!(Cli::try_parse_from(["constructor", "--print-options"]).is_ok());
        assert!(Cli::try_parse_from(["constructor", "x", "--platform", "amiga-68k"]).is_err());
    }
}
