use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::Serialize;

pub fn java_bin_name() -> &'static str {
    OperatingSystem::current().java_bin_name()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OperatingSystem {
    Windows,
    MacOs,
    Linux,
    Unknown,
}

impl OperatingSystem {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(unix) {
            Self::Linux
        } else {
            Self::Unknown
        }
    }

    /// Maps an `os.name` property to a platform.
    pub fn infer(os_name: &str) -> Self {
        let name = os_name.to_lowercase();
        if name.contains("linux") || name.contains("unix") {
            Self::Linux
        } else if name.contains("osx") || name.contains("os x") || name.contains("mac") {
            Self::MacOs
        } else if name.contains("windows") {
            Self::Windows
        } else {
            Self::Unknown
        }
    }

    pub fn java_bin_name(self) -> &'static str {
        match self {
            Self::Windows => "java.exe",
            _ => "java",
        }
    }

    pub fn path_separator(self) -> char {
        match self {
            Self::Windows => ';',
            _ => ':',
        }
    }

    pub fn line_separator(self) -> &'static str {
        match self {
            Self::Windows => "\r\n",
            _ => "\n",
        }
    }
}

/// Pointer width of a runtime. Variants are declared in ranking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Bitness {
    Unknown,
    X32,
    X64,
}

impl Bitness {
    pub fn bits(self) -> Option<u32> {
        match self {
            Self::X32 => Some(32),
            Self::X64 => Some(64),
            Self::Unknown => None,
        }
    }
}

/// Platform characteristics as reported by the runtime itself, which may
/// differ from the host (a 32-bit runtime on a 64-bit OS, for instance).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JavaPlatform {
    pub os: OperatingSystem,
    pub bits: Bitness,
    pub path_separator: char,
    pub line_separator: String,
    pub encoding: String,
}

impl JavaPlatform {
    pub fn new(os: OperatingSystem, bits: Bitness) -> Self {
        Self {
            os,
            bits,
            path_separator: os.path_separator(),
            line_separator: os.line_separator().to_string(),
            encoding: "UTF-8".to_string(),
        }
    }
}

/// A validated Java installation.
///
/// Identity is the executable path: two runtimes are equal when their paths
/// are, whatever version they reported.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JavaRuntime {
    executable: PathBuf,
    version: Option<u32>,
    version_name: Option<String>,
    platform: JavaPlatform,
}

impl JavaRuntime {
    /// Normally produced by a [`JavaProbe`](crate::core::java_probe::JavaProbe).
    pub fn new(
        executable: PathBuf,
        version: Option<u32>,
        version_name: Option<String>,
        platform: JavaPlatform,
    ) -> Self {
        Self {
            executable,
            version,
            version_name,
            platform,
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Major version, `None` when the reported version could not be parsed.
    pub fn version(&self) -> Option<u32> {
        self.version
    }

    pub fn version_name(&self) -> Option<&str> {
        self.version_name.as_deref()
    }

    pub fn platform(&self) -> &JavaPlatform {
        &self.platform
    }

    /// Ranking order: newest major first, then widest pointer size, then path.
    /// Unknown versions sort after every known one.
    pub fn rank(&self, other: &Self) -> Ordering {
        other
            .version
            .cmp(&self.version)
            .then_with(|| other.platform.bits.cmp(&self.platform.bits))
            .then_with(|| self.executable.cmp(&other.executable))
    }
}

impl PartialEq for JavaRuntime {
    fn eq(&self, other: &Self) -> bool {
        self.executable == other.executable
    }
}

impl Eq for JavaRuntime {}

impl Hash for JavaRuntime {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.executable.hash(state);
    }
}

impl fmt::Display for JavaRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(version) => write!(f, "Java {version} ({})", self.executable.display()),
            None => write!(f, "Java <unknown> ({})", self.executable.display()),
        }
    }
}
