// src/platform.rs

//! Target platforms and their selector predicates
//!
//! A platform is a conda subdir such as `linux-64` or `osx-arm64`. Each one
//! exposes a dictionary of boolean predicates (`linux`, `osx`, `win64`,
//! `linux-64`, ...) used by recipe selectors and installer templates.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    MacOs,
    Windows,
}

/// CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86,
    X86_64,
    Aarch64,
    Arm64,
    Ppc64le,
    S390x,
}

/// A conda target platform (`os-arch` subdir)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Platform {
    Linux32,
    Linux64,
    LinuxAarch64,
    LinuxPpc64le,
    LinuxS390x,
    Osx64,
    OsxArm64,
    Win32,
    Win64,
    WinArm64,
}

/// Every supported platform, used for selector validation
pub const ALL_PLATFORMS: [Platform; 10] = [
    Platform::Linux32,
    Platform::Linux64,
    Platform::LinuxAarch64,
    Platform::LinuxPpc64le,
    Platform::LinuxS390x,
    Platform::Osx64,
    Platform::OsxArm64,
    Platform::Win32,
    Platform::Win64,
    Platform::WinArm64,
];

impl Platform {
    /// The conda subdir name
    pub const fn subdir(&self) -> &'static str {
        match self {
            Self::Linux32 => "linux-32",
            Self::Linux64 => "linux-64",
            Self::LinuxAarch64 => "linux-aarch64",
            Self::LinuxPpc64le => "linux-ppc64le",
            Self::LinuxS390x => "linux-s390x",
            Self::Osx64 => "osx-64",
            Self::OsxArm64 => "osx-arm64",
            Self::Win32 => "win-32",
            Self::Win64 => "win-64",
            Self::WinArm64 => "win-arm64",
        }
    }

    pub const fn os(&self) -> Os {
        match self {
            Self::Linux32
            | Self::Linux64
            | Self::LinuxAarch64
            | Self::LinuxPpc64le
            | Self::LinuxS390x => Os::Linux,
            Self::Osx64 | Self::OsxArm64 => Os::MacOs,
            Self::Win32 | Self::Win64 | Self::WinArm64 => Os::Windows,
        }
    }

    pub const fn arch(&self) -> Arch {
        match self {
            Self::Linux32 | Self::Win32 => Arch::X86,
            Self::Linux64 | Self::Osx64 | Self::Win64 => Arch::X86_64,
            Self::LinuxAarch64 => Arch::Aarch64,
            Self::OsxArm64 | Self::WinArm64 => Arch::Arm64,
            Self::LinuxPpc64le => Arch::Ppc64le,
            Self::LinuxS390x => Arch::S390x,
        }
    }

    /// Word size in bits
    pub const fn bits(&self) -> u32 {
        match self.arch() {
            Arch::X86 => 32,
            _ => 64,
        }
    }

    pub fn is_unix(&self) -> bool {
        self.os() != Os::Windows
    }

    /// Tag used in default installer filenames, e.g. `Linux-x86_64`
    pub fn filename_tag(&self) -> &'static str {
        match self {
            Self::Linux32 => "Linux-x86",
            Self::Linux64 => "Linux-x86_64",
            Self::LinuxAarch64 => "Linux-aarch64",
            Self::LinuxPpc64le => "Linux-ppc64le",
            Self::LinuxS390x => "Linux-s390x",
            Self::Osx64 => "MacOSX-x86_64",
            Self::OsxArm64 => "MacOSX-arm64",
            Self::Win32 => "Windows-x86",
            Self::Win64 => "Windows-x86_64",
            Self::WinArm64 => "Windows-arm64",
        }
    }

    /// The platform of the running host, if supported
    pub fn current() -> Option<Self> {
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;
        match (os, arch) {
            ("linux", "x86") => Some(Self::Linux32),
            ("linux", "x86_64") => Some(Self::Linux64),
            ("linux", "aarch64") => Some(Self::LinuxAarch64),
            ("linux", "powerpc64") => Some(Self::LinuxPpc64le),
            ("linux", "s390x") => Some(Self::LinuxS390x),
            ("macos", "x86_64") => Some(Self::Osx64),
            ("macos", "aarch64") => Some(Self::OsxArm64),
            ("windows", "x86") => Some(Self::Win32),
            ("windows", "x86_64") => Some(Self::Win64),
            ("windows", "aarch64") => Some(Self::WinArm64),
            _ => None,
        }
    }

    /// Selector predicates that hold for this platform
    ///
    /// Contains the OS family names (`linux`, `osx`, `win`, `unix`), the
    /// word-size forms (`linux64`, `win32`, ...), architecture names, and
    /// the subdir spelling of every known platform (`linux-64`, ...).
    pub fn predicates(&self) -> BTreeMap<String, bool> {
        let mut preds = BTreeMap::new();
        let os = self.os();
        let arch = self.arch();
        let bits = self.bits();

        preds.insert("linux".to_string(), os == Os::Linux);
        preds.insert("osx".to_string(), os == Os::MacOs);
        preds.insert("win".to_string(), os == Os::Windows);
        preds.insert("unix".to_string(), self.is_unix());

        for family in ["linux", "osx", "win"] {
            for b in [32, 64] {
                let holds = preds[family] && bits == b;
                preds.insert(format!("{family}{b}"), holds);
            }
        }

        preds.insert("x86".to_string(), matches!(arch, Arch::X86 | Arch::X86_64));
        preds.insert("x86_64".to_string(), arch == Arch::X86_64);
        preds.insert("aarch64".to_string(), arch == Arch::Aarch64);
        preds.insert("arm64".to_string(), matches!(arch, Arch::Arm64 | Arch::Aarch64));
        preds.insert("ppc64le".to_string(), arch == Arch::Ppc64le);
        preds.insert("s390x".to_string(), arch == Arch::S390x);

        for other in ALL_PLATFORMS {
            preds.insert(other.subdir().to_string(), other == *self);
        }

        preds
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subdir())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ALL_PLATFORMS
            .iter()
            .copied()
            .find(|p| p.subdir() == s)
            .ok_or_else(|| Error::recipe("platform", format!("unsupported platform '{s}'")))
    }
}

impl TryFrom<String> for Platform {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Platform> for String {
    fn from(value: Platform) -> Self {
        value.subdir().to_string()
    }
}
