use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{trace, warn};

use crate::core::error::JavaError;
use crate::core::java::{java_bin_name, Bitness, JavaPlatform, JavaRuntime, OperatingSystem};

static LEADING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<major>[0-9]+)").expect("valid version regex"));

/// Validates candidate paths by running them.
pub trait JavaProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<JavaRuntime, JavaError>;

    /// Probes the runtime again; a different version means the install was
    /// replaced and the old descriptor is stale.
    fn revalidate(&self, runtime: &JavaRuntime) -> Result<JavaRuntime, JavaError> {
        let fresh = self.probe(runtime.executable())?;
        if fresh.version() != runtime.version() {
            return Err(JavaError::Expired {
                path: runtime.executable().to_path_buf(),
            });
        }
        Ok(fresh)
    }
}

/// Runs `<java> -XshowSettings:properties -version` and parses the dump.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandProbe;

impl JavaProbe for CommandProbe {
    fn probe(&self, path: &Path) -> Result<JavaRuntime, JavaError> {
        let executable = resolve_executable(path);
        if !executable.is_file() {
            return Err(JavaError::Missing { path: executable });
        }

        trace!(path = %executable.display(), "probing Java executable");
        let output = Command::new(&executable)
            .args(["-XshowSettings:properties", "-version"])
            .stdin(Stdio::null())
            .output()
            .map_err(|source| JavaError::Spawn {
                path: executable.clone(),
                source,
            })?;

        // The settings dump goes to stderr; keep both streams like a merged pipe.
        let mut content = String::from_utf8_lossy(&output.stderr).into_owned();
        content.push_str(&String::from_utf8_lossy(&output.stdout));

        parse_probe_output(executable, &content)
    }
}

/// A home directory is turned into `<home>/bin/java`; anything else is taken
/// as the executable itself.
pub fn resolve_executable(path: &Path) -> PathBuf {
    let executable = if path.is_dir() {
        path.join("bin").join(java_bin_name())
    } else {
        path.to_path_buf()
    };
    std::path::absolute(&executable).unwrap_or(executable)
}

pub(crate) fn parse_probe_output(
    executable: PathBuf,
    content: &str,
) -> Result<JavaRuntime, JavaError> {
    if !content.contains("java") && !content.contains("sun") {
        return Err(JavaError::Unrecognized { path: executable });
    }

    let properties = parse_properties(content);
    let version_name = properties.get("java.version").cloned();
    let version = match version_name.as_deref() {
        Some(raw) => parse_version(raw),
        None => {
            warn!(path = %executable.display(), "failed to retrieve Java version");
            None
        }
    };

    Ok(JavaRuntime::new(
        executable,
        version,
        version_name,
        parse_platform(&properties),
    ))
}

/// Collects `key = value` lines. Continuation lines of multi-valued
/// properties carry no `=` and are skipped.
pub(crate) fn parse_properties(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(|line| line.trim().split_once(" = "))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// Major version from a `java.version` value. Modern versions start with the
/// major number; legacy ones are `1.x`.
pub fn parse_version(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let head = LEADING_NUMBER
        .captures(raw)
        .and_then(|captures| captures.name("major"))
        .and_then(|major| major.as_str().parse::<u32>().ok());
    if let Some(major) = head.filter(|major| *major > 1) {
        return Some(major);
    }

    if raw.contains("1.8") {
        Some(8)
    } else if raw.contains("1.7") {
        Some(7)
    } else if raw.contains("1.6") {
        Some(6)
    } else {
        warn!(version = raw, "failed to parse Java version");
        None
    }
}

pub(crate) fn parse_platform(properties: &HashMap<String, String>) -> JavaPlatform {
    let os = properties
        .get("os.name")
        .map(|name| OperatingSystem::infer(name))
        .unwrap_or(OperatingSystem::Unknown);

    let bits = match properties.get("sun.arch.data.model").map(String::as_str) {
        Some("64") => Bitness::X64,
        Some("32") => Bitness::X32,
        _ => match properties.get("os.arch") {
            Some(arch) if arch.contains("64") => Bitness::X64,
            Some(_) => Bitness::X32,
            None => Bitness::Unknown,
        },
    };

    let path_separator = properties
        .get("path.separator")
        .and_then(|value| value.chars().next())
        .unwrap_or_else(|| os.path_separator());

    let line_separator = properties
        .get("line.separator")
        .map(|value| unescape(value))
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| os.line_separator().to_string());

    let encoding = ["sun.jnu.encoding", "file.encoding", "native.encoding"]
        .iter()
        .find_map(|key| properties.get(*key))
        .cloned()
        .unwrap_or_else(|| "UTF-8".to_string());

    JavaPlatform {
        os,
        bits,
        path_separator,
        line_separator,
        encoding,
    }
}

fn unescape(value: &str) -> String {
    value.replace("\\r", "\r").replace("\\n", "\n")
}
