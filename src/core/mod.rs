pub mod config;
pub mod error;
pub mod instance_runner;
pub mod java;
pub mod java_discovery;
pub mod java_manager;
pub mod java_probe;
pub mod launcher;

use serde::{Deserialize, Serialize};

/// Lifecycle of a supervised game process. `Exited` and `Stopped` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessState {
    Starting,
    Running,
    Exited,
    Stopped,
}

impl ProcessState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Exited | Self::Stopped)
    }
}
