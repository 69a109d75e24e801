use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::LaunchError;
use crate::core::java::JavaRuntime;

/// A fully assembled game command line. How the arguments are produced is up
/// to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchCommand {
    pub java_path: PathBuf,
    pub arguments: Vec<String>,
    pub working_dir: PathBuf,
}

impl LaunchCommand {
    pub fn for_runtime(
        runtime: &JavaRuntime,
        arguments: Vec<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            java_path: runtime.executable().to_path_buf(),
            arguments,
            working_dir: working_dir.into(),
        }
    }

    /// Splits a raw command line into program and arguments.
    pub fn from_commandline(
        commandline: Vec<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Result<Self, LaunchError> {
        let mut parts = commandline.into_iter();
        let program = parts
            .next()
            .filter(|program| !program.trim().is_empty())
            .ok_or(LaunchError::EmptyCommand)?;
        Ok(Self {
            java_path: PathBuf::from(program),
            arguments: parts.collect(),
            working_dir: working_dir.into(),
        })
    }

    pub fn program(&self) -> &Path {
        &self.java_path
    }

    pub(crate) fn validate(&self) -> Result<(), LaunchError> {
        if self.java_path.as_os_str().is_empty() {
            return Err(LaunchError::EmptyCommand);
        }
        if !self.working_dir.is_dir() {
            return Err(LaunchError::MissingWorkingDirectory {
                path: self.working_dir.clone(),
            });
        }
        Ok(())
    }

    /// Shell-like rendering for logs.
    pub fn display_line(&self) -> String {
        std::iter::once(self.java_path.to_string_lossy().to_string())
            .chain(self.arguments.iter().map(|argument| {
                if argument.contains(char::is_whitespace) {
                    format!("\"{argument}\"")
                } else {
                    argument.clone()
                }
            }))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
