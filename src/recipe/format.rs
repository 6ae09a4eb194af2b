// src/recipe/format.rs

//! Recipe document definitions
//!
//! A recipe is the `construct.yaml` document in a recipe directory, after
//! selector preprocessing. Every key is listed in [`super::schema::SCHEMA`]
//! together with its default.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::hash::HashAlgorithm;
use crate::platform::{Os, Platform};

/// A validated, immutable build recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Recipe {
    pub name: String,
    pub version: String,
    pub platform: Platform,

    // Package sources
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub channels_remap: Vec<ChannelRemap>,
    #[serde(default)]
    pub specs: Vec<String>,
    #[serde(default)]
    pub user_requested_specs: Option<Vec<String>>,
    #[serde(default)]
    pub virtual_specs: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub menu_packages: Option<Vec<String>>,
    #[serde(default)]
    pub environment: Option<PathBuf>,
    #[serde(default)]
    pub environment_file: Option<PathBuf>,
    #[serde(default)]
    pub extra_envs: ExtraEnvs,
    #[serde(default = "default_true")]
    pub register_envs: bool,
    #[serde(default = "default_true")]
    pub ignore_duplicate_files: bool,
    #[serde(default)]
    pub transmute_file_type: Option<String>,

    // Output selection
    #[serde(default)]
    pub installer_filename: Option<String>,
    #[serde(default)]
    pub installer_type: Option<InstallerTypeSpec>,
    #[serde(default)]
    pub build_outputs: Vec<BuildOutputEntry>,

    // Install-time behavior
    #[serde(default)]
    pub license_file: Option<PathBuf>,
    #[serde(default)]
    pub keep_pkgs: bool,
    #[serde(default)]
    pub batch_mode: bool,
    #[serde(default)]
    pub write_condarc: bool,
    #[serde(default)]
    pub condarc: Option<serde_json::Value>,
    #[serde(default)]
    pub conda_default_channels: Vec<String>,
    #[serde(default)]
    pub conda_channel_alias: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub reverse_domain_identifier: Option<String>,
    #[serde(default)]
    pub uninstall_name: Option<String>,
    #[serde(default)]
    pub script_env_variables: BTreeMap<String, String>,
    #[serde(default)]
    pub pre_install: Option<PathBuf>,
    #[serde(default)]
    pub post_install: Option<PathBuf>,
    #[serde(default)]
    pub pre_uninstall: Option<PathBuf>,
    #[serde(default)]
    pub default_prefix: Option<String>,
    #[serde(default)]
    pub default_prefix_domain_user: Option<String>,
    #[serde(default)]
    pub default_prefix_all_users: Option<String>,
    #[serde(default)]
    pub default_location_pkg: Option<String>,
    #[serde(default = "default_pkg_domains")]
    pub pkg_domains: BTreeMap<String, bool>,
    #[serde(default)]
    pub pkg_name: Option<String>,
    #[serde(default)]
    pub install_path_exists_error_text: Option<String>,
    #[serde(default)]
    pub progress_notifications: bool,
    #[serde(default = "default_true")]
    pub initialize_conda: bool,
    #[serde(default)]
    pub initialize_by_default: Option<bool>,
    #[serde(default = "default_true")]
    pub register_python: bool,
    #[serde(default)]
    pub register_python_default: Option<bool>,
    #[serde(default)]
    pub check_path_length: Option<bool>,
    #[serde(default = "default_true")]
    pub check_path_spaces: bool,
    #[serde(default)]
    pub uninstall_with_conda_exe: bool,

    // Presentation
    #[serde(default)]
    pub welcome_image: Option<PathBuf>,
    #[serde(default)]
    pub header_image: Option<PathBuf>,
    #[serde(default)]
    pub icon_image: Option<PathBuf>,
    #[serde(default = "default_image_color")]
    pub default_image_color: String,
    #[serde(default)]
    pub welcome_image_text: Option<String>,
    #[serde(default)]
    pub header_image_text: Option<String>,
    #[serde(default)]
    pub nsis_template: Option<PathBuf>,
    #[serde(default)]
    pub welcome_file: Option<PathBuf>,
    #[serde(default)]
    pub welcome_text: Option<String>,
    #[serde(default)]
    pub readme_file: Option<PathBuf>,
    #[serde(default)]
    pub readme_text: Option<String>,
    #[serde(default)]
    pub conclusion_file: Option<PathBuf>,
    #[serde(default)]
    pub conclusion_text: Option<String>,
    #[serde(default)]
    pub post_install_pages: Vec<PathBuf>,

    // Extra payload
    #[serde(default)]
    pub extra_files: Vec<ExtraFile>,
    #[serde(default)]
    pub temp_extra_files: Vec<ExtraFile>,

    // Signing
    #[serde(default)]
    pub signing_identity_name: Option<String>,
    #[serde(default)]
    pub notarization_identity_name: Option<String>,
    #[serde(default)]
    pub windows_signing_tool: Option<SigningTool>,
    #[serde(default)]
    pub signing_certificate: Option<PathBuf>,

    /// Deprecated; components are always non-relocatable
    #[serde(default)]
    pub attempt_hardlinks: Option<bool>,
}

fn default_true() -> bool {
    true
}

fn default_image_color() -> String {
    "blue".to_string()
}

fn default_pkg_domains() -> BTreeMap<String, bool> {
    BTreeMap::from([
        ("enable_anywhere".to_string(), true),
        ("enable_currentUserHome".to_string(), true),
    ])
}

/// Rewrite of a channel URL prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelRemap {
    /// URL the packages are fetched from
    pub src: String,
    /// URL the packages are labeled with inside the installer
    pub dest: String,
}

/// Requested installer type(s)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallerTypeSpec {
    Sh,
    Pkg,
    Exe,
    All,
}

/// A concrete installer kind produced by one emitter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum InstallerType {
    Sh,
    Pkg,
    Exe,
}

impl InstallerType {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Sh => "sh",
            Self::Pkg => "pkg",
            Self::Exe => "exe",
        }
    }

    /// Whether the embedded runtime needs the interpreter unpacked first
    pub fn requires_interpreter(&self) -> bool {
        matches!(self, Self::Sh | Self::Pkg)
    }
}

impl fmt::Display for InstallerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Windows code-signing tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningTool {
    Signtool,
    Azuresigntool,
}

/// An `extra_files` entry: a bare path, or `{src: dest}` pairs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtraFile {
    Path(PathBuf),
    Mapped(BTreeMap<PathBuf, PathBuf>),
}

impl ExtraFile {
    /// Expand into `(source, destination relative to the prefix)` pairs
    pub fn pairs(&self) -> Vec<(PathBuf, PathBuf)> {
        match self {
            ExtraFile::Path(p) => {
                let dest = p.file_name().map(PathBuf::from).unwrap_or_else(|| p.clone());
                vec![(p.clone(), dest)]
            }
            ExtraFile::Mapped(map) => map.iter().map(|(s, d)| (s.clone(), d.clone())).collect(),
        }
    }
}

/// A `build_outputs` entry as written in the recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildOutputEntry {
    Name(String),
    Configured(BTreeMap<String, serde_json::Value>),
}

/// A parsed build output request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutput {
    Hash { algorithms: Vec<HashAlgorithm> },
    InfoJson,
    PkgsList { env: Option<String> },
    Lockfile { env: Option<String> },
    Licenses {
        include_text: bool,
        text_errors: Option<String>,
    },
}

impl BuildOutputEntry {
    /// Interpret the entry, rejecting unknown outputs and options
    pub fn parse(&self) -> Result<BuildOutput> {
        let (name, opts) = match self {
            BuildOutputEntry::Name(name) => (name.as_str(), serde_json::Map::new()),
            BuildOutputEntry::Configured(map) => {
                let mut iter = map.iter();
                let (Some((name, opts)), None) = (iter.next(), iter.next()) else {
                    return Err(Error::recipe(
                        "build_outputs",
                        "each entry must name exactly one output",
                    ));
                };
                let opts = match opts {
                    serde_json::Value::Object(o) => o.clone(),
                    serde_json::Value::Null => serde_json::Map::new(),
                    _ => {
                        return Err(Error::recipe(
                            format!("build_outputs.{name}"),
                            "options must be a mapping",
                        ));
                    }
                };
                (name.as_str(), opts)
            }
        };

        let location = format!("build_outputs.{name}");
        let allowed: &[&str] = match name {
            "hash" => &["algorithm"],
            "info.json" => &[],
            "pkgs_list" | "lockfile" => &["env"],
            "licenses" => &["include_text", "text_errors"],
            other => {
                return Err(Error::recipe("build_outputs", format!("unknown output '{other}'")));
            }
        };
        if let Some(bad) = opts.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(Error::recipe(location, format!("unknown option '{bad}'")));
        }

        let env = opts.get("env").and_then(|v| v.as_str()).map(str::to_string);
        Ok(match name {
            "hash" => {
                let names: Vec<String> = match opts.get("algorithm") {
                    None => vec!["sha256".to_string()],
                    Some(serde_json::Value::String(s)) => vec![s.clone()],
                    Some(serde_json::Value::Array(items)) => items
                        .iter()
                        .map(|i| i.as_str().map(str::to_string))
                        .collect::<Option<_>>()
                        .ok_or_else(|| Error::recipe(&location, "algorithm must be strings"))?,
                    Some(_) => return Err(Error::recipe(&location, "algorithm must be a string or list")),
                };
                let mut algorithms = Vec::new();
                for n in names {
                    let algo = n
                        .parse::<HashAlgorithm>()
                        .map_err(|e| Error::recipe(&location, e.to_string()))?;
                    if !algorithms.contains(&algo) {
                        algorithms.push(algo);
                    }
                }
                BuildOutput::Hash { algorithms }
            }
            "info.json" => BuildOutput::InfoJson,
            "pkgs_list" => BuildOutput::PkgsList { env },
            "lockfile" => BuildOutput::Lockfile { env },
            _ => BuildOutput::Licenses {
                include_text: opts
                    .get("include_text")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
                text_errors: opts
                    .get("text_errors")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            },
        })
    }
}

/// Options of one named side environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtraEnv {
    #[serde(default)]
    pub specs: Vec<String>,
    #[serde(default)]
    pub environment: Option<PathBuf>,
    #[serde(default)]
    pub environment_file: Option<PathBuf>,
    /// `None` inherits the global channels
    #[serde(default)]
    pub channels: Option<Vec<String>>,
    #[serde(default)]
    pub channels_remap: Option<Vec<ChannelRemap>>,
    /// Not inherited; defaults to this env's specs
    #[serde(default)]
    pub user_requested_specs: Option<Vec<String>>,
    /// `None` inherits the global exclude list; `Some([])` clears it
    #[serde(default)]
    pub exclude: Option<Vec<String>>,
    /// Not inherited
    #[serde(default)]
    pub menu_packages: Option<Vec<String>>,
}

/// Extra environments in recipe order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraEnvs(pub Vec<(String, ExtraEnv)>);

impl ExtraEnvs {
    pub fn iter(&self) -> impl Iterator<Item = &(String, ExtraEnv)> {
        self.0.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ExtraEnv> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, e)| e)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for ExtraEnvs {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, env) in &self.0 {
            map.serialize_entry(name, env)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ExtraEnvs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EnvsVisitor;

        impl<'de> Visitor<'de> for EnvsVisitor {
            type Value = ExtraEnvs;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of environment names to options")
            }

            fn visit_unit<E: serde::de::Error>(self) -> std::result::Result<ExtraEnvs, E> {
                Ok(ExtraEnvs::default())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<ExtraEnvs, A::Error> {
                let mut envs: Vec<(String, ExtraEnv)> = Vec::new();
                while let Some((name, env)) = access.next_entry::<String, Option<ExtraEnv>>()? {
                    if envs.iter().any(|(n, _)| *n == name) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate extra_envs key '{name}'"
                        )));
                    }
                    envs.push((name, env.unwrap_or_default()));
                }
                Ok(ExtraEnvs(envs))
            }
        }

        deserializer.deserialize_any(EnvsVisitor)
    }
}

impl Recipe {
    /// Installer types this recipe produces, in emission order
    pub fn installer_types(&self) -> Vec<InstallerType> {
        let os = self.platform.os();
        match (self.installer_type, os) {
            (Some(InstallerTypeSpec::Sh), _) => vec![InstallerType::Sh],
            (Some(InstallerTypeSpec::Pkg), _) => vec![InstallerType::Pkg],
            (Some(InstallerTypeSpec::Exe), _) => vec![InstallerType::Exe],
            (Some(InstallerTypeSpec::All), Os::MacOs) => vec![InstallerType::Sh, InstallerType::Pkg],
            (_, Os::Linux) | (None, Os::MacOs) => vec![InstallerType::Sh],
            (_, Os::Windows) => vec![InstallerType::Exe],
        }
    }

    /// Output filename for one installer type
    ///
    /// An explicit `installer_filename` applies when a single installer is
    /// produced; with several, its extension is replaced per type.
    pub fn installer_filename(&self, itype: InstallerType) -> String {
        match &self.installer_filename {
            Some(name) if self.installer_types().len() == 1 => name.clone(),
            Some(name) => {
                let stem = name.rsplit_once('.').map_or(name.as_str(), |(s, _)| s);
                format!("{stem}.{}", itype.extension())
            }
            None => format!(
                "{}-{}-{}.{}",
                self.name,
                self.version,
                self.platform.filename_tag(),
                itype.extension()
            ),
        }
    }

    /// Specs recorded as explicitly requested in the base environment
    pub fn effective_user_requested_specs(&self) -> Vec<String> {
        self.user_requested_specs
            .clone()
            .unwrap_or_else(|| self.specs.clone())
    }

    /// Parsed `build_outputs`
    pub fn build_outputs(&self) -> Result<Vec<BuildOutput>> {
        self.build_outputs.iter().map(BuildOutputEntry::parse).collect()
    }

    /// Default install prefix name (`~/<name>` style directory)
    pub fn default_prefix_name(&self) -> String {
        self.name.to_lowercase().replace(' ', "_")
    }

    /// Text written as `.condarc` at install time, if any
    pub fn condarc_text(&self) -> Result<Option<String>> {
        if let Some(condarc) = &self.condarc {
            return Ok(Some(match condarc {
                serde_json::Value::String(s) => s.clone(),
                other => serde_yaml::to_string(other)?,
            }));
        }
        if !self.write_condarc {
            return Ok(None);
        }
        let mut lines = vec!["channels:".to_string()];
        let embedded: Vec<String> = self
            .channels
            .iter()
            .map(|c| crate::package::remap_url(c, &self.channels_remap))
            .chain(self.channels_remap.iter().map(|r| r.dest.clone()))
            .collect();
        let mut seen = Vec::new();
        for channel in embedded {
            if !seen.contains(&channel) {
                lines.push(format!("  - {channel}"));
                seen.push(channel);
            }
        }
        if let Some(alias) = &self.conda_channel_alias {
            lines.push(format!("channel_alias: {alias}"));
        }
        if !self.conda_default_channels.is_empty() {
            lines.push("default_channels:".to_string());
            for c in &self.conda_default_channels {
                lines.push(format!("  - {c}"));
            }
        }
        Ok(Some(lines.join("\n") + "\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(platform: &str) -> Recipe {
        serde_yaml::from_str(&format!(
            "name: Miniconda\nversion: '1.0'\nplatform: {platform}\nchannels: [https://repo.example.com/main/]\nspecs: [python 3.11, pip]\n"
        ))
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let r = minimal("linux-64");
        assert!(r.register_envs);
        assert!(r.initialize_conda);
        assert!(r.ignore_duplicate_files);
        assert_eq!(r.default_image_color, "blue");
        assert!(r.extra_envs.is_empty());
        assert_eq!(r.effective_user_requested_specs(), vec!["python 3.11", "pip"]);
    }

    #[test]
    fn test_installer_types_and_filenames() {
        let r = minimal("linux-64");
        assert_eq!(r.installer_types(), vec![InstallerType::Sh]);
        assert_eq!(
            r.installer_filename(InstallerType::Sh),
            "Miniconda-1.0-Linux-x86_64.sh"
        );

        let mut r = minimal("osx-arm64");
        r.installer_type = Some(InstallerTypeSpec::All);
        assert_eq!(r.installer_types(), vec![InstallerType::Sh, InstallerType::Pkg]);
        r.installer_filename = Some("My.pkg".to_string());
        assert_eq!(r.installer_filename(InstallerType::Sh), "My.sh");

        assert_eq!(minimal("win-64").installer_types(), vec![InstallerType::Exe]);
    }

    #[test]
    fn test_extra_envs_keep_order_and_reject_duplicates() {
        let r: Recipe = serde_yaml::from_str(
            "name: A\nversion: '1'\nplatform: linux-64\nextra_envs:\n  zeta: {specs: [a]}\n  alpha:\n    exclude: []\n",
        )
        .unwrap();
        let names: Vec<&str> = r.extra_envs.names().collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(r.extra_envs.get("alpha").unwrap().exclude, Some(vec![]));
        assert_eq!(r.extra_envs.get("zeta").unwrap().exclude, None);

        let dup = serde_yaml::from_str::<Recipe>(
            "name: A\nversion: '1'\nplatform: linux-64\nextra_envs:\n  a: {}\n  a: {}\n",
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_build_output_parsing() {
        let entry: BuildOutputEntry =
            serde_yaml::from_str("hash: {algorithm: [sha256, md5]}").unwrap();
        assert_eq!(
            entry.parse().unwrap(),
            BuildOutput::Hash {
                algorithms: vec![HashAlgorithm::Sha256, HashAlgorithm::Md5]
            }
        );
        let entry: BuildOutputEntry = serde_yaml::from_str("info.json").unwrap();
        assert_eq!(entry.parse().unwrap(), BuildOutput::InfoJson);
        let entry: BuildOutputEntry = serde_yaml::from_str("lockfile: {env: tools}").unwrap();
        assert_eq!(
            entry.parse().unwrap(),
            BuildOutput::Lockfile {
                env: Some("tools".to_string())
            }
        );
        let entry: BuildOutputEntry = serde_yaml::from_str("hash: {algo: md5}").unwrap();
        assert!(entry.parse().is_err());
        let entry: BuildOutputEntry = serde_yaml::from_str("tarball").unwrap();
        assert!(entry.parse().is_err());
    }

    #[test]
    fn test_condarc_text() {
        let mut r = minimal("linux-64");
        assert_eq!(r.condarc_text().unwrap(), None);
        r.write_condarc = true;
        r.channels_remap = vec![ChannelRemap {
            src: "https://repo.example.com/main".to_string(),
            dest: "https://mirror.example.org/main".to_string(),
        }];
        let text = r.condarc_text().unwrap().unwrap();
        assert!(text.contains("  - https://mirror.example.org/main"));
        assert!(!text.contains("repo.example.com"));
    }

    #[test]
    fn test_extra_file_pairs() {
        let f: ExtraFile = serde_yaml::from_str("docs/README.md").unwrap();
        assert_eq!(
            f.pairs(),
            vec![(PathBuf::from("docs/README.md"), PathBuf::from("README.md"))]
        );
        let f: ExtraFile = serde_yaml::from_str("{a.txt: share/a.txt}").unwrap();
        assert_eq!(f.pairs(), vec![(PathBuf::from("a.txt"), PathBuf::from("share/a.txt"))]);
    }
}
