//! Windows registry lookups through the `reg query` command.
//!
//! The output is plain text: a header line with the queried key, then one
//! line per subkey or one indented `name  TYPE  data` line per value.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{trace, warn};

use crate::core::error::DiscoveryError;

/// Java homes registered under `key`. Only entries installed through MSI
/// (those carrying an `MSI` subkey) are trusted.
pub(crate) fn query_java_homes(key: &str) -> Result<Vec<PathBuf>, DiscoveryError> {
    java_homes_with(key, run_reg_query)
}

/// `query` runs one `reg query <key> [extra...]` and returns its stdout.
fn java_homes_with<Q>(key: &str, mut query: Q) -> Result<Vec<PathBuf>, DiscoveryError>
where
    Q: FnMut(&str, &[&str]) -> Result<String, DiscoveryError>,
{
    let mut homes = Vec::new();
    for java in parse_subkeys(key, &query(key, &[])?) {
        let children = match query(&java, &[]) {
            Ok(output) => parse_subkeys(&java, &output),
            Err(error) => {
                trace!(%error, "skipping registry entry");
                continue;
            }
        };
        let msi = format!("{java}\\MSI");
        if !children.iter().any(|child| child.eq_ignore_ascii_case(&msi)) {
            continue;
        }
        let home = query(&java, &["/v", "JavaHome"])
            .map(|output| parse_value(&java, "JavaHome", &output));
        match home {
            Ok(Some(home)) => homes.push(PathBuf::from(home)),
            Ok(None) => warn!(key = %java, "registry entry has no JavaHome"),
            Err(error) => warn!(%error, "invalid Java entry in system registry"),
        }
    }
    Ok(homes)
}

fn run_reg_query(key: &str, extra: &[&str]) -> Result<String, DiscoveryError> {
    let output = Command::new("reg")
        .arg("query")
        .arg(key)
        .args(extra)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .map_err(|error| DiscoveryError::RegistryQuery {
            key: key.to_string(),
            reason: error.to_string(),
        })?;

    if !output.status.success() {
        return Err(DiscoveryError::RegistryQuery {
            key: key.to_string(),
            reason: format!("reg exited with {}", output.status),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Subkey lines start with the queried key; the header is the key itself.
pub(crate) fn parse_subkeys(key: &str, output: &str) -> Vec<String> {
    let parent = key.trim_end_matches('\\');
    output
        .lines()
        .map(str::trim)
        .filter(|line| {
            let Some(prefix) = line.get(..parent.len()) else {
                return false;
            };
            let child = &line[parent.len()..];
            prefix.eq_ignore_ascii_case(parent) && child.starts_with('\\') && child.len() > 1
        })
        .map(str::to_string)
        .collect()
}

/// Data of the `REG_*` value called `name`, looked up only after the header
/// line for `key`.
pub(crate) fn parse_value(key: &str, name: &str, output: &str) -> Option<String> {
    let header = key.trim_end_matches('\\');
    let mut in_key = false;
    for line in output.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if line.trim_end_matches('\\').eq_ignore_ascii_case(header) {
            in_key = true;
            continue;
        }
        if !in_key {
            continue;
        }
        let Some(rest) = line.strip_prefix(name) else {
            continue;
        };
        let mut parts = rest.trim_start().splitn(2, char::is_whitespace);
        let kind = parts.next().unwrap_or_default();
        if !kind.starts_with("REG_") {
            continue;
        }
        let data = parts.next().unwrap_or_default().trim();
        if !data.is_empty() {
            return Some(data.to_string());
        }
    }
    None
}
