use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A candidate path that is not a usable Java runtime.
#[derive(Debug, Error)]
pub enum JavaError {
    #[error("no Java executable at {}", path.display())]
    Missing { path: PathBuf },

    #[error("failed to execute {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} did not report itself as a Java runtime", path.display())]
    Unrecognized { path: PathBuf },

    #[error("Java runtime at {} changed since it was validated", path.display())]
    Expired { path: PathBuf },
}

/// Failure of a single candidate source during a search.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("registry query for {key} failed: {reason}")]
    RegistryQuery { key: String, reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Java runtime registry already initialized")]
    AlreadyInitialized,
}

/// The game process could not be started.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("launch command is empty")]
    EmptyCommand,

    #[error("working directory {} does not exist", path.display())]
    MissingWorkingDirectory { path: PathBuf },

    #[error("no Tokio runtime to supervise the process on")]
    NoRuntime,

    #[error("couldn't start process {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}
