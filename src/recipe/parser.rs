// src/recipe/parser.rs

//! Recipe file parsing and validation
//!
//! Loading runs selector preprocessing first, then checks the resulting
//! document against [`super::schema`], deserializes it, resolves relative
//! paths against the recipe directory and finally validates cross-key
//! invariants.

use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::platform::{Os, Platform};
use crate::recipe::format::{BuildOutput, ExtraFile, InstallerTypeSpec, Recipe};
use crate::recipe::schema::{self, EXTRA_ENV_KEYS, RESERVED_ENV_NAMES};
use crate::template::{TemplateScope, selector};

/// File name of the recipe inside a recipe directory
pub const RECIPE_FILENAME: &str = "construct.yaml";

const IMAGE_COLORS: &[&str] = &["blue", "green", "red", "yellow"];

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_ .\-]*$").expect("Invalid name regex"))
}

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.+\- ]+$").expect("Invalid version regex"))
}

fn env_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]*$").expect("Invalid env name regex"))
}

fn platform_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^platform:\s*['"]?([A-Za-z0-9_\-]+)['"]?\s*$"#)
            .expect("Invalid platform regex")
    })
}

/// Platform declared by an unconditional `platform:` line, if any
///
/// Selectors need the platform before the document can be parsed, so this
/// looks at the raw text.
pub fn declared_platform(content: &str) -> Option<&str> {
    platform_line_re()
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Choose the target platform: CLI override, then recipe, then host
pub fn resolve_platform(
    content: &str,
    platform_override: Option<Platform>,
    warnings: &mut Vec<String>,
) -> Result<Platform> {
    let declared = declared_platform(content)
        .map(str::parse::<Platform>)
        .transpose()?;
    match (platform_override, declared) {
        (Some(over), Some(decl)) if over != decl => {
            warnings.push(format!(
                "platform {decl} from the recipe is overridden by --platform {over}"
            ));
            Ok(over)
        }
        (Some(over), _) => Ok(over),
        (None, Some(decl)) => Ok(decl),
        (None, None) => Platform::current().ok_or_else(|| {
            Error::recipe("platform", "host platform is not supported; set `platform`")
        }),
    }
}

/// Parse a recipe directory (`<dir>/construct.yaml`)
pub fn parse_recipe_dir(
    dir: &Path,
    platform_override: Option<Platform>,
) -> Result<(Recipe, Vec<String>)> {
    let path = dir.join(RECIPE_FILENAME);
    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::recipe(path.display().to_string(), format!("cannot read recipe: {e}")))?;

    let mut warnings = Vec::new();
    let platform = resolve_platform(&content, platform_override, &mut warnings)?;
    let base = std::path::absolute(dir).map_err(|e| Error::io_at(dir, e))?;
    let (recipe, more) = parse_recipe(&content, platform, &base, &path.display().to_string())?;
    warnings.extend(more);
    Ok((recipe, warnings))
}

/// Parse recipe text for `platform`, resolving paths against `base_dir`
///
/// `source` names the document in error locations.
pub fn parse_recipe(
    content: &str,
    platform: Platform,
    base_dir: &Path,
    source: &str,
) -> Result<(Recipe, Vec<String>)> {
    let scope = TemplateScope::for_platform(platform);
    let selected = selector::preprocess(content, scope.as_map())
        .map_err(|e| Error::recipe(source, format!("selector {e}")))?;

    let mut doc: Value = serde_yaml::from_str(&selected)
        .map_err(|e| Error::recipe(source, format!("invalid YAML: {e}")))?;
    let Value::Mapping(map) = &mut doc else {
        return Err(Error::recipe(source, "recipe must be a mapping"));
    };

    let mut warnings = check_keys(map, source)?;
    map.insert(
        Value::String("platform".to_string()),
        Value::String(platform.subdir().to_string()),
    );

    let mut recipe: Recipe = serde_yaml::from_value(doc)
        .map_err(|e| Error::recipe(source, e.to_string()))?;
    resolve_paths(&mut recipe, base_dir);
    warnings.extend(validate_recipe(&recipe)?);

    debug!("Parsed recipe {} {} for {}", recipe.name, recipe.version, platform);
    Ok((recipe, warnings))
}

/// Serialize a recipe back into recipe YAML
pub fn to_yaml(recipe: &Recipe) -> Result<String> {
    Ok(serde_yaml::to_string(recipe)?)
}

/// Reject unknown keys and collect deprecation warnings
fn check_keys(map: &Mapping, source: &str) -> Result<Vec<String>> {
    let mut warnings = Vec::new();
    for (key, value) in map {
        let Some(key) = key.as_str() else {
            return Err(Error::recipe(source, "recipe keys must be strings"));
        };
        let Some(info) = schema::lookup(key) else {
            return Err(Error::recipe(source, format!("unknown key '{key}'")));
        };
        if let (Some(note), false) = (info.deprecated, value.is_null()) {
            warnings.push(format!("'{key}' is deprecated: {note}"));
        }
    }

    if let Some(Value::Mapping(envs)) = map.get("extra_envs") {
        for (name, env) in envs {
            let name = name.as_str().unwrap_or_default();
            let Value::Mapping(env) = env else {
                if env.is_null() {
                    continue;
                }
                return Err(Error::recipe(
                    format!("{source}: extra_envs.{name}"),
                    "environment options must be a mapping",
                ));
            };
            for key in env.keys() {
                let key = key.as_str().unwrap_or_default();
                if !EXTRA_ENV_KEYS.contains(&key) {
                    return Err(Error::recipe(
                        format!("{source}: extra_envs.{name}"),
                        format!("unknown key '{key}'"),
                    ));
                }
            }
        }
    }
    Ok(warnings)
}

fn absolutize(base: &Path, path: &mut PathBuf) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

fn absolutize_opt(base: &Path, path: &mut Option<PathBuf>) {
    if let Some(p) = path {
        absolutize(base, p);
    }
}

fn absolutize_extra(base: &Path, files: &mut [ExtraFile]) {
    for file in files {
        match file {
            ExtraFile::Path(p) => absolutize(base, p),
            ExtraFile::Mapped(map) => {
                *map = std::mem::take(map)
                    .into_iter()
                    .map(|(src, dest)| {
                        let src = if src.is_relative() { base.join(src) } else { src };
                        (src, dest)
                    })
                    .collect();
            }
        }
    }
}

/// Make every referenced path absolute
fn resolve_paths(recipe: &mut Recipe, base: &Path) {
    for path in [
        &mut recipe.license_file,
        &mut recipe.environment,
        &mut recipe.environment_file,
        &mut recipe.pre_install,
        &mut recipe.post_install,
        &mut recipe.pre_uninstall,
        &mut recipe.welcome_image,
        &mut recipe.header_image,
        &mut recipe.icon_image,
        &mut recipe.nsis_template,
        &mut recipe.welcome_file,
        &mut recipe.readme_file,
        &mut recipe.conclusion_file,
        &mut recipe.signing_certificate,
    ] {
        absolutize_opt(base, path);
    }
    for page in &mut recipe.post_install_pages {
        absolutize(base, page);
    }
    absolutize_extra(base, &mut recipe.extra_files);
    absolutize_extra(base, &mut recipe.temp_extra_files);
    for (_, env) in &mut recipe.extra_envs.0 {
        absolutize_opt(base, &mut env.environment);
        absolutize_opt(base, &mut env.environment_file);
    }
}

/// Every file or directory the recipe references
fn referenced_paths(recipe: &Recipe) -> Vec<(String, PathBuf)> {
    let mut refs = Vec::new();
    let singles = [
        ("license_file", &recipe.license_file),
        ("environment", &recipe.environment),
        ("environment_file", &recipe.environment_file),
        ("pre_install", &recipe.pre_install),
        ("post_install", &recipe.post_install),
        ("pre_uninstall", &recipe.pre_uninstall),
        ("welcome_image", &recipe.welcome_image),
        ("header_image", &recipe.header_image),
        ("icon_image", &recipe.icon_image),
        ("nsis_template", &recipe.nsis_template),
        ("welcome_file", &recipe.welcome_file),
        ("readme_file", &recipe.readme_file),
        ("conclusion_file", &recipe.conclusion_file),
        ("signing_certificate", &recipe.signing_certificate),
    ];
    for (key, path) in singles {
        if let Some(p) = path {
            refs.push((key.to_string(), p.clone()));
        }
    }
    for page in &recipe.post_install_pages {
        refs.push(("post_install_pages".to_string(), page.clone()));
    }
    for (key, files) in [
        ("extra_files", &recipe.extra_files),
        ("temp_extra_files", &recipe.temp_extra_files),
    ] {
        for file in files {
            for (src, _) in file.pairs() {
                refs.push((key.to_string(), src));
            }
        }
    }
    for (name, env) in recipe.extra_envs.iter() {
        for (key, path) in [
            ("environment", &env.environment),
            ("environment_file", &env.environment_file),
        ] {
            if let Some(p) = path {
                refs.push((format!("extra_envs.{name}.{key}"), p.clone()));
            }
        }
    }
    refs
}

fn check_sources(
    location: &str,
    specs: &[String],
    environment: &Option<PathBuf>,
    environment_file: &Option<PathBuf>,
) -> Result<()> {
    let given = [
        !specs.is_empty(),
        environment.is_some(),
        environment_file.is_some(),
    ]
    .into_iter()
    .filter(|b| *b)
    .count();
    match given {
        0 => Err(Error::recipe(
            location,
            "one of specs, environment or environment_file is required",
        )),
        1 => Ok(()),
        _ => Err(Error::recipe(
            location,
            "specs, environment and environment_file are mutually exclusive",
        )),
    }
}

/// Validate cross-key invariants of a parsed recipe
pub fn validate_recipe(recipe: &Recipe) -> Result<Vec<String>> {
    let mut warnings = Vec::new();

    if recipe.name.trim() != recipe.name || !name_re().is_match(&recipe.name) {
        return Err(Error::recipe(
            "name",
            format!("invalid installer name '{}'", recipe.name),
        ));
    }
    if recipe.version.trim() != recipe.version || !version_re().is_match(&recipe.version) {
        return Err(Error::recipe(
            "version",
            format!("invalid installer version '{}'", recipe.version),
        ));
    }

    check_sources("specs", &recipe.specs, &recipe.environment, &recipe.environment_file)?;

    if recipe.channels.is_empty() && recipe.channels_remap.is_empty() {
        return Err(Error::recipe(
            "channels",
            "at least one of channels or channels_remap must be non-empty",
        ));
    }
    for remap in &recipe.channels_remap {
        if remap.src.is_empty() || remap.dest.is_empty() {
            return Err(Error::recipe("channels_remap", "src and dest must be non-empty"));
        }
    }

    for spec in &recipe.virtual_specs {
        if !spec.starts_with("__") {
            return Err(Error::recipe(
                "virtual_specs",
                format!("'{spec}' is not a virtual package spec (must start with __)"),
            ));
        }
    }

    let os = recipe.platform.os();
    match (recipe.installer_type, os) {
        (Some(InstallerTypeSpec::Sh), Os::Windows)
        | (Some(InstallerTypeSpec::Pkg), Os::Linux | Os::Windows)
        | (Some(InstallerTypeSpec::Exe), Os::Linux | Os::MacOs) => {
            return Err(Error::recipe(
                "installer_type",
                format!("not available for {}", recipe.platform),
            ));
        }
        _ => {}
    }

    if let Some(ext) = &recipe.transmute_file_type {
        if ext != ".conda" && ext != ".tar.bz2" {
            return Err(Error::recipe(
                "transmute_file_type",
                format!("unsupported archive type '{ext}'"),
            ));
        }
    }

    if !IMAGE_COLORS.contains(&recipe.default_image_color.as_str()) {
        return Err(Error::recipe(
            "default_image_color",
            format!(
                "'{}' is not one of {}",
                recipe.default_image_color,
                IMAGE_COLORS.join(", ")
            ),
        ));
    }

    if let Some(condarc) = &recipe.condarc {
        if !(condarc.is_string() || condarc.is_object()) {
            return Err(Error::recipe("condarc", "must be a mapping or a string"));
        }
    }

    for key in recipe.script_env_variables.keys() {
        let valid = key.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(Error::recipe(
                "script_env_variables",
                format!("'{key}' is not a valid variable name"),
            ));
        }
    }

    for (file_key, text_key, both) in [
        ("welcome_file", "welcome_text", recipe.welcome_file.is_some() && recipe.welcome_text.is_some()),
        ("readme_file", "readme_text", recipe.readme_file.is_some() && recipe.readme_text.is_some()),
        (
            "conclusion_file",
            "conclusion_text",
            recipe.conclusion_file.is_some() && recipe.conclusion_text.is_some(),
        ),
    ] {
        if both {
            return Err(Error::recipe(
                file_key,
                format!("{file_key} and {text_key} are mutually exclusive"),
            ));
        }
    }

    // Extra environments
    for (name, env) in recipe.extra_envs.iter() {
        let location = format!("extra_envs.{name}");
        if !env_name_re().is_match(name) {
            return Err(Error::recipe(location, "invalid environment name"));
        }
        if RESERVED_ENV_NAMES.contains(&name.as_str()) {
            return Err(Error::recipe(location, format!("'{name}' is a reserved name")));
        }
        check_sources(&location, &env.specs, &env.environment, &env.environment_file)?;
        let channels = env.channels.as_ref().unwrap_or(&recipe.channels);
        let remap = env.channels_remap.as_ref().unwrap_or(&recipe.channels_remap);
        if channels.is_empty() && remap.is_empty() {
            return Err(Error::recipe(
                location,
                "at least one of channels or channels_remap must be non-empty",
            ));
        }
    }

    // Build outputs
    let outputs = recipe.build_outputs()?;
    for output in &outputs {
        if let BuildOutput::PkgsList { env: Some(env) } | BuildOutput::Lockfile { env: Some(env) } =
            output
        {
            if env != "base" && recipe.extra_envs.get(env).is_none() {
                return Err(Error::recipe(
                    "build_outputs",
                    format!("unknown environment '{env}'"),
                ));
            }
        }
    }

    for (key, path) in referenced_paths(recipe) {
        if !path.exists() {
            return Err(Error::recipe(
                key,
                format!("referenced file not found: {}", path.display()),
            ));
        }
    }

    // Platform-specific keys that will be ignored
    if os != Os::MacOs {
        for (key, set) in [
            ("signing_identity_name", recipe.signing_identity_name.is_some()),
            ("notarization_identity_name", recipe.notarization_identity_name.is_some()),
            ("default_location_pkg", recipe.default_location_pkg.is_some()),
        ] {
            if set {
                warnings.push(format!("'{key}' is ignored for {}", recipe.platform));
            }
        }
    }
    if os != Os::Windows {
        for (key, set) in [
            ("windows_signing_tool", recipe.windows_signing_tool.is_some()),
            ("signing_certificate", recipe.signing_certificate.is_some()),
            ("nsis_template", recipe.nsis_template.is_some()),
        ] {
            if set {
                warnings.push(format!("'{key}' is ignored for {}", recipe.platform));
            }
        }
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = "\
name: Miniconda
version: '1.0'
channels:
  - https://repo.example.com/main/
specs:
  - python 3.11
  - pip
";

    fn parse(content: &str, platform: Platform) -> Result<(Recipe, Vec<String>)> {
        parse_recipe(content, platform, Path::new("/recipes/mini"), RECIPE_FILENAME)
    }

    #[test]
    fn test_parse_valid_recipe() {
        let (recipe, warnings) = parse(MINIMAL, Platform::Linux64).unwrap();
        assert_eq!(recipe.name, "Miniconda");
        assert_eq!(recipe.platform, Platform::Linux64);
        assert_eq!(recipe.specs, vec!["python 3.11", "pip"]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_selectors_apply_before_schema() {
        let content = format!("{MINIMAL}installer_type: pkg  # [osx]\ninstaller_type: exe  # [win]\n");
        let (recipe, _) = parse(&content, Platform::Win64).unwrap();
        assert_eq!(recipe.installer_type, Some(InstallerTypeSpec::Exe));
        let (recipe, _) = parse(&content, Platform::Linux64).unwrap();
        assert_eq!(recipe.installer_type, None);
    }

    #[test]
    fn test_undefined_selector_is_recipe_error() {
        let content = format!("{MINIMAL}batch_mode: true  # [beos]\n");
        let err = parse(&content, Platform::Linux64).unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("beos"));
    }

    #[test]
    fn test_unknown_key_named() {
        let content = format!("{MINIMAL}chanels: []\n");
        let err = parse(&content, Platform::Linux64).unwrap_err();
        assert!(err.to_string().contains("chanels"));

        let content = format!("{MINIMAL}extra_envs:\n  tools:\n    specz: [a]\n");
        let err = parse(&content, Platform::Linux64).unwrap_err();
        assert!(err.to_string().contains("specz"));
    }

    #[test]
    fn test_deprecated_key_warns() {
        let content = format!("{MINIMAL}attempt_hardlinks: true\n");
        let (_, warnings) = parse(&content, Platform::Linux64).unwrap();
        assert!(warnings.iter().any(|w| w.contains("attempt_hardlinks")));
    }

    #[test]
    fn test_mutually_exclusive_sources() {
        let content = format!("{MINIMAL}environment_file: env.txt\n");
        let err = parse(&content, Platform::Linux64).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_empty_channels_and_remap_rejected() {
        let content = "name: A\nversion: '1'\nspecs: [python]\n";
        let err = parse(content, Platform::Linux64).unwrap_err();
        assert!(matches!(err, Error::Recipe { .. }));
    }

    #[test]
    fn test_installer_type_must_match_platform() {
        let content = format!("{MINIMAL}installer_type: exe\n");
        assert!(parse(&content, Platform::Linux64).is_err());
        let content = format!("{MINIMAL}installer_type: pkg\n");
        assert!(parse(&content, Platform::OsxArm64).is_ok());
        assert!(parse(&content, Platform::Win64).is_err());
    }

    #[test]
    fn test_invalid_name_and_version() {
        let bad_name = MINIMAL.replace("name: Miniconda", "name: 'Mini/conda'");
        assert!(parse(&bad_name, Platform::Linux64).is_err());
        let bad_version = MINIMAL.replace("version: '1.0'", "version: '1.0;rm'");
        assert!(parse(&bad_version, Platform::Linux64).is_err());
        let spaced = MINIMAL.replace("version: '1.0'", "version: '1.2 py313'");
        assert!(parse(&spaced, Platform::Linux64).is_ok());
    }

    #[test]
    fn test_reserved_env_name() {
        let content = format!("{MINIMAL}extra_envs:\n  base:\n    specs: [a]\n");
        let err = parse(&content, Platform::Linux64).unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_missing_referenced_file() {
        let dir = TempDir::new().unwrap();
        let content = format!("{MINIMAL}license_file: LICENSE.txt\n");
        let err = parse_recipe(&content, Platform::Linux64, dir.path(), RECIPE_FILENAME).unwrap_err();
        assert!(err.to_string().contains("LICENSE.txt"));

        std::fs::write(dir.path().join("LICENSE.txt"), "BSD").unwrap();
        let (recipe, _) =
            parse_recipe(&content, Platform::Linux64, dir.path(), RECIPE_FILENAME).unwrap();
        assert_eq!(recipe.license_file, Some(dir.path().join("LICENSE.txt")));
    }

    #[test]
    fn test_parse_recipe_dir_and_platform_resolution() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(RECIPE_FILENAME),
            format!("{MINIMAL}platform: osx-arm64\n"),
        )
        .unwrap();
        let (recipe, warnings) = parse_recipe_dir(dir.path(), None).unwrap();
        assert_eq!(recipe.platform, Platform::OsxArm64);
        assert!(warnings.is_empty());

        let (recipe, warnings) = parse_recipe_dir(dir.path(), Some(Platform::Linux64)).unwrap();
        assert_eq!(recipe.platform, Platform::Linux64);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_roundtrip_is_structurally_equal() {
        let content = format!(
            "{MINIMAL}channels_remap:\n  - src: file:///tmp/local\n    dest: https://repo.example.com/main\n\
             exclude: [tk]\nextra_envs:\n  tools:\n    specs: [git]\n    exclude: []\n\
             build_outputs:\n  - info.json\n  - hash: {{algorithm: [sha256, md5]}}\n\
             script_env_variables: {{FOO: bar}}\n"
        );
        let (first, _) = parse(&content, Platform::Linux64).unwrap();
        let yaml = to_yaml(&first).unwrap();
        let (second, _) = parse(&yaml, Platform::Linux64).unwrap();
        assert_eq!(first, second);
    }
}
