// src/recipe/schema.rs

//! Declared recipe keys, their defaults and deprecation status
//!
//! This table is the single place defaults are documented. It drives the
//! unknown-key check and `--print-options`.

/// One recognized recipe key
#[derive(Debug, Clone, Copy)]
pub struct KeyInfo {
    pub key: &'static str,
    /// Default as shown to users
    pub default: &'static str,
    /// Deprecation note, if the key is deprecated
    pub deprecated: Option<&'static str>,
    pub description: &'static str,
}

const fn key(key: &'static str, default: &'static str, description: &'static str) -> KeyInfo {
    KeyInfo {
        key,
        default,
        deprecated: None,
        description,
    }
}

const fn deprecated(key: &'static str, note: &'static str, description: &'static str) -> KeyInfo {
    KeyInfo {
        key,
        default: "(unset)",
        deprecated: Some(note),
        description,
    }
}

/// Top-level keys of `construct.yaml`
pub const SCHEMA: &[KeyInfo] = &[
    key("name", "(required)", "Installer name"),
    key("version", "(required)", "Installer version"),
    key("platform", "host platform", "Target platform subdir, e.g. linux-64"),
    key("channels", "[]", "Channels packages are resolved from"),
    key("channels_remap", "[]", "src/dest pairs rewriting channel URLs embedded in the installer"),
    key("specs", "[]", "Package specs to resolve"),
    key("user_requested_specs", "specs", "Specs recorded as explicitly requested"),
    key("virtual_specs", "[]", "Constraints on the install host, e.g. __glibc>=2.17"),
    key("exclude", "[]", "Package names removed after solving"),
    key("menu_packages", "all packages", "Packages allowed to create shortcuts"),
    key("environment", "(unset)", "Existing prefix whose packages are shipped"),
    key("environment_file", "(unset)", "@EXPLICIT lockfile or environment YAML"),
    key("extra_envs", "{}", "Named side environments with per-env source options"),
    key("register_envs", "true", "Register environments in ~/.conda/environments.txt"),
    key("ignore_duplicate_files", "true", "Allow two packages to provide the same file"),
    key("transmute_file_type", "(unset)", "Re-pack archives to this extension, e.g. .conda"),
    key("installer_filename", "<name>-<version>-<tag>.<ext>", "Output filename"),
    key("installer_type", "sh on Linux, sh on macOS, exe on Windows", "sh, pkg, exe or all"),
    key("build_outputs", "[]", "Additional artifacts: hash, info.json, pkgs_list, lockfile, licenses"),
    key("license_file", "(unset)", "License shown before installation"),
    key("keep_pkgs", "false", "Keep the package cache after install"),
    key("batch_mode", "false", "Never prompt during install"),
    key("write_condarc", "false", "Write a .condarc with the embedded channels"),
    key("condarc", "(unset)", "Literal .condarc contents, mapping or string"),
    key("conda_default_channels", "[]", "default_channels written to .condarc"),
    key("conda_channel_alias", "(unset)", "channel_alias written to .condarc"),
    key("company", "(unset)", "Publisher name"),
    key("reverse_domain_identifier", "io.continuum.<name>", "macOS package identifier prefix"),
    key("uninstall_name", "<name> <version> (Python <pyver> <bits>-bit)", "Windows uninstall entry name"),
    key("script_env_variables", "{}", "Variables exported to pre/post install scripts"),
    key("pre_install", "(unset)", "Script run before installation"),
    key("post_install", "(unset)", "Script run after installation"),
    key("pre_uninstall", "(unset)", "Script run before uninstallation (Windows)"),
    key("default_prefix", "~/<name>", "Default install prefix"),
    key("default_prefix_domain_user", "%LOCALAPPDATA%\\<name>", "Default prefix for a Windows user install"),
    key("default_prefix_all_users", "%ALLUSERSPROFILE%\\<name>", "Default prefix for a Windows system install"),
    key("default_location_pkg", "(unset)", "Install location below the chosen domain (macOS)"),
    key("pkg_domains", "{enable_anywhere: true, enable_currentUserHome: true}", "macOS install domains"),
    key("pkg_name", "<name lowercased>", "Install directory name for macOS packages"),
    key("install_path_exists_error_text", "(built-in message)", "Error shown when the prefix exists"),
    key("progress_notifications", "false", "Show progress notifications (macOS)"),
    key("welcome_image", "(generated)", "Welcome image, 164x314 (Windows)"),
    key("header_image", "(generated)", "Header image, 150x57 (Windows)"),
    key("icon_image", "(NSIS default)", "Installer icon (Windows)"),
    key("default_image_color", "blue", "Color of generated images: blue, green, red, yellow"),
    deprecated("welcome_image_text", "image text rendering was removed", "Text on the welcome image"),
    deprecated("header_image_text", "image text rendering was removed", "Text on the header image"),
    key("initialize_conda", "true", "Offer to initialize shell startup files"),
    key("initialize_by_default", "false on Windows, true elsewhere", "Default answer for initialization"),
    key("register_python", "true", "Offer to register Python as system default (Windows)"),
    key("register_python_default", "false", "Default answer for Python registration"),
    key("check_path_length", "false", "Fail on long install paths (Windows)"),
    key("check_path_spaces", "true", "Reject install paths containing spaces"),
    key("uninstall_with_conda_exe", "false", "Uninstall through the conda standalone (Windows)"),
    key("nsis_template", "(built-in)", "Replacement NSIS template (Windows)"),
    key("welcome_file", "(unset)", "Welcome page contents"),
    key("welcome_text", "(unset)", "Welcome page text"),
    key("readme_file", "(unset)", "Readme page contents (macOS)"),
    key("readme_text", "(unset)", "Readme page text (macOS)"),
    key("conclusion_file", "(unset)", "Conclusion page contents"),
    key("conclusion_text", "(unset)", "Conclusion page text"),
    key("post_install_pages", "[]", "Extra NSIS pages shown after install"),
    key("extra_files", "[]", "Files copied into the prefix"),
    key("temp_extra_files", "[]", "Files present only while installing"),
    key("signing_identity_name", "(unset)", "macOS product signing identity"),
    key("notarization_identity_name", "(unset)", "macOS application signing identity"),
    key("windows_signing_tool", "signtool when signing_certificate is set", "signtool or azuresigntool"),
    key("signing_certificate", "(unset)", "PFX certificate for Windows signing"),
    deprecated("attempt_hardlinks", "components are always non-relocatable", "Hardlink packages into the prefix"),
];

/// Keys accepted inside each `extra_envs` entry
pub const EXTRA_ENV_KEYS: &[&str] = &[
    "specs",
    "environment",
    "environment_file",
    "channels",
    "channels_remap",
    "user_requested_specs",
    "exclude",
    "menu_packages",
];

/// Names an extra environment may not use
pub const RESERVED_ENV_NAMES: &[&str] = &["base", "root", "cache", "pkgs", "envs", "conda-meta"];

/// Look up a top-level key
pub fn lookup(name: &str) -> Option<&'static KeyInfo> {
    SCHEMA.iter().find(|k| k.key == name)
}

/// Render the key table for `--print-options`
pub fn describe() -> String {
    let width = SCHEMA.iter().map(|k| k.key.len()).max().unwrap_or(0);
    let mut out = String::new();
    for info in SCHEMA {
        out.push_str(&format!("{:width$}  {}\n", info.key, info.description));
        out.push_str(&format!("{:width$}  default: {}\n", "", info.default));
        if let Some(note) = info.deprecated {
            out.push_str(&format!("{:width$}  DEPRECATED: {}\n", "", note));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_keys_are_unique() {
        let mut seen = HashSet::new();
        for info in SCHEMA {
            assert!(seen.insert(info.key), "duplicate key {}", info.key);
        }
    }

    #[test]
    fn test_lookup() {
        assert!(lookup("channels_remap").is_some());
        assert!(lookup("attempt_hardlinks").unwrap().deprecated.is_some());
        assert!(lookup("chanels").is_none());
    }

    #[test]
    fn test_describe_lists_every_key() {
        let text = describe();
        for info in SCHEMA {
            assert!(text.contains(info.key));
        }
        assert!(text.contains("DEPRECATED"));
    }
}
