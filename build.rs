// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Boolean flag with a long name
fn flag(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name).long(name).action(ArgAction::SetTrue).help(help)
}

/// Option taking a path
fn path_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name).long(name).value_name("PATH").help(help)
}

fn build_cli() -> Command {
    Command::new("constructor")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Constructor Contributors")
        .about("Build self-contained installers from conda packages")
        .arg(
            Arg::new("recipe_dir")
                .value_name("RECIPE_DIR")
                .help("Directory containing construct.yaml"),
        )
        .arg(path_arg("output-dir", "Where installers and build outputs are written").default_value("."))
        .arg(path_arg("cache-dir", "Download cache (default: ~/.conda/constructor/<platform>)"))
        .arg(
            Arg::new("platform")
                .long("platform")
                .value_name("TRIPLE")
                .help("Target platform, e.g. linux-64 or osx-arm64 (default: recipe, then host)"),
        )
        .arg(path_arg(
            "conda-exe",
            "Conda standalone executable used for solving and bundled as the runtime",
        ))
        .arg(flag("debug", "Keep the staging directory"))
        .arg(flag("dry-run", "Plan and validate without staging or emitting"))
        .arg(flag("verbose", "Debug-level logging").short('v'))
        .arg(flag("quiet", "Hide progress bars").short('q'))
        .arg(flag("clean", "Remove the download cache of the target platform and exit"))
        .arg(flag("print-options", "List every recipe key with its default and exit"))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory - use CARGO_MANIFEST_DIR which is always set by cargo
    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("constructor.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
