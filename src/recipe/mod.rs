// src/recipe/mod.rs

//! Installer recipes
//!
//! A recipe directory holds `construct.yaml` plus any files it references
//! (license, scripts, images). Lines may carry a trailing platform
//! selector:
//!
//! ```yaml
//! name: Miniconda
//! version: 1.0
//! channels:
//!   - https://repo.example.com/main/
//! specs:
//!   - python 3.11
//!   - pip
//!   - menuinst  # [win]
//! installer_type: pkg  # [osx]
//! ```
//!
//! Parsing is two-phase: selectors are evaluated against the target
//! platform, then the remaining document is validated against the key
//! table in [`schema`].

mod format;
pub mod parser;
pub mod schema;

pub use format::{
    BuildOutput, BuildOutputEntry, ChannelRemap, ExtraEnv, ExtraEnvs, ExtraFile, InstallerType,
    InstallerTypeSpec, Recipe, SigningTool,
};
pub use parser::{RECIPE_FILENAME, parse_recipe, parse_recipe_dir, to_yaml, validate_recipe};
