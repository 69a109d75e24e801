//! Supervision of launched game processes.
//!
//! Each process gets three tasks: one reader per output stream and an exit
//! watcher that owns the child. The watcher is the only place a natural exit
//! is recorded; `stop` races it and whichever finishes first wins.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::error::LaunchError;
use crate::core::launcher::LaunchCommand;
use crate::core::ProcessState;

/// How long the exit watcher waits for the readers to drain after the
/// process is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

type Tracker = Mutex<HashMap<u32, InstanceProcess>>;

pub trait InstanceRunner {
    fn launch(&self, launch_command: &LaunchCommand) -> Result<InstanceProcess, LaunchError>;
}

/// Handle to one supervised game process. Clones share the same process.
#[derive(Debug, Clone)]
pub struct InstanceProcess {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    pid: u32,
    command: LaunchCommand,
    inner: Mutex<Inner>,
    state: watch::Sender<ProcessState>,
    cancel: CancellationToken,
    tracker: Weak<Tracker>,
}

/// State and log buffer live under one lock so no line is appended once the
/// process has finished.
#[derive(Debug)]
struct Inner {
    state: ProcessState,
    logs: Vec<String>,
}

impl Shared {
    fn transition(&self, next: ProcessState) -> bool {
        {
            let mut inner = lock(&self.inner);
            if inner.state.is_finished() || inner.state == next {
                return false;
            }
            inner.state = next;
        }
        if next.is_finished() {
            if let Some(tracker) = self.tracker.upgrade() {
                lock(&tracker).remove(&self.pid);
            }
        }
        self.state.send_replace(next);
        true
    }

    fn append(&self, stream: &'static str, line: String) -> bool {
        let mut inner = lock(&self.inner);
        if inner.state.is_finished() {
            return false;
        }
        info!(target: "minecraft", pid = self.pid, stream, "{line}");
        inner.logs.push(line);
        true
    }
}

/// Starts an untracked supervised process.
pub fn launch(command: &LaunchCommand) -> Result<InstanceProcess, LaunchError> {
    spawn_supervised(command, Weak::new())
}

fn spawn_supervised(
    command: &LaunchCommand,
    tracker: Weak<Tracker>,
) -> Result<InstanceProcess, LaunchError> {
    command.validate()?;
    if Handle::try_current().is_err() {
        return Err(LaunchError::NoRuntime);
    }

    let mut child = Command::new(&command.java_path)
        .args(&command.arguments)
        .current_dir(&command.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| LaunchError::Spawn {
            program: command.java_path.clone(),
            source,
        })?;

    let pid = child.id().unwrap_or_default();
    let shared = Arc::new(Shared {
        pid,
        command: command.clone(),
        inner: Mutex::new(Inner {
            state: ProcessState::Starting,
            logs: Vec::new(),
        }),
        state: watch::Sender::new(ProcessState::Starting),
        cancel: CancellationToken::new(),
        tracker,
    });

    // Readers may append as soon as they are spawned.
    shared.transition(ProcessState::Running);
    let readers: Vec<JoinHandle<()>> = [
        spawn_reader(Arc::clone(&shared), child.stdout.take(), "stdout"),
        spawn_reader(Arc::clone(&shared), child.stderr.take(), "stderr"),
    ]
    .into_iter()
    .flatten()
    .collect();

    tokio::spawn(watch_exit(Arc::clone(&shared), child, readers));

    info!(pid, command = %command.display_line(), "Started listening for Minecraft instance");
    Ok(InstanceProcess { shared })
}

fn spawn_reader<R>(
    shared: Arc<Shared>,
    stream: Option<R>,
    name: &'static str,
) -> Option<JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let stream = stream?;
    Some(tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            let read = tokio::select! {
                _ = shared.cancel.cancelled() => break,
                read = reader.read_until(b'\n', &mut buffer) => read,
            };
            match read {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buffer)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if !shared.append(name, line) {
                        break;
                    }
                }
                Err(error) => {
                    error!(pid = shared.pid, stream = name, %error, "Error while reading Minecraft stream");
                    break;
                }
            }
        }
        debug!(pid = shared.pid, stream = name, "stream reader exiting");
    }))
}

async fn watch_exit(shared: Arc<Shared>, mut child: Child, readers: Vec<JoinHandle<()>>) {
    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => info!(pid = shared.pid, code = ?status.code(), "Minecraft process exited"),
                Err(error) => warn!(pid = shared.pid, %error, "failed to wait for Minecraft process"),
            }
            let deadline = Instant::now() + DRAIN_TIMEOUT;
            for reader in readers {
                let _ = tokio::time::timeout_at(deadline, reader).await;
            }
            shared.transition(ProcessState::Exited);
            // Releases readers stuck on pipes inherited by grandchildren.
            shared.cancel.cancel();
        }
        _ = shared.cancel.cancelled() => {
            if let Err(error) = child.kill().await {
                warn!(pid = shared.pid, %error, "failed to kill Minecraft process");
            }
        }
    }
}

impl InstanceProcess {
    pub fn pid(&self) -> u32 {
        self.shared.pid
    }

    pub fn command(&self) -> &LaunchCommand {
        &self.shared.command
    }

    pub fn state(&self) -> ProcessState {
        lock(&self.shared.inner).state
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProcessState::Running
    }

    /// Output lines captured so far. Order is kept within each stream only.
    pub fn logs(&self) -> Vec<String> {
        lock(&self.shared.inner).logs.clone()
    }

    /// Kills the process. Safe to call repeatedly or after it exited.
    pub fn stop(&self) {
        if self.shared.transition(ProcessState::Stopped) {
            info!(pid = self.shared.pid, "Stopped Minecraft instance");
        }
        self.shared.cancel.cancel();
    }

    /// Resolves with `Exited` or `Stopped`.
    pub async fn wait(&self) -> ProcessState {
        let mut receiver = self.shared.state.subscribe();
        let state = match receiver.wait_for(|state| state.is_finished()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }
}

/// Processes started through this collection, keyed by pid. Entries remove
/// themselves when their process exits or is stopped.
#[derive(Debug, Clone, Default)]
pub struct RunningInstances {
    processes: Arc<Tracker>,
}

impl RunningInstances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Vec<InstanceProcess> {
        let mut processes: Vec<_> = lock(&self.processes).values().cloned().collect();
        processes.sort_by_key(InstanceProcess::pid);
        processes
    }

    pub fn resolve(&self, pid: u32) -> Option<InstanceProcess> {
        lock(&self.processes).get(&pid).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.processes).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.processes).is_empty()
    }

    pub fn stop_all(&self) {
        for process in self.get() {
            process.stop();
        }
    }
}

impl InstanceRunner for RunningInstances {
    fn launch(&self, launch_command: &LaunchCommand) -> Result<InstanceProcess, LaunchError> {
        // Held across the spawn so an early exit can't remove the entry before
        // it is inserted.
        let mut processes = lock(&self.processes);
        let process = spawn_supervised(launch_command, Arc::downgrade(&self.processes))?;
        processes.insert(process.pid(), process.clone());
        Ok(process)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::{Path, PathBuf};

    use tokio::io::AsyncWriteExt;

    use super::*;

    fn shell(script: &str, dir: &Path) -> LaunchCommand {
        LaunchCommand {
            java_path: PathBuf::from("sh"),
            arguments: vec!["-c".to_string(), script.to_string()],
            working_dir: dir.to_path_buf(),
        }
    }

    fn starting_shared() -> Arc<Shared> {
        Arc::new(Shared {
            pid: 0,
            command: shell("true", Path::new(".")),
            inner: Mutex::new(Inner {
                state: ProcessState::Starting,
                logs: Vec::new(),
            }),
            state: watch::Sender::new(ProcessState::Starting),
            cancel: CancellationToken::new(),
            tracker: Weak::new(),
        })
    }

    async fn wait_for_logs(process: &InstanceProcess) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while process.logs().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn captures_both_streams_until_exit() {
        let dir = tempfile::tempdir().unwrap();
        let instances = RunningInstances::new();
        let process = instances
            .launch(&shell("echo out; echo err 1>&2; pwd", dir.path()))
            .unwrap();

        assert_eq!(process.wait().await, ProcessState::Exited);
        assert!(!process.is_running());

        let logs = process.logs();
        assert!(logs.contains(&"out".to_string()), "{logs:?}");
        assert!(logs.contains(&"err".to_string()), "{logs:?}");
        assert!(logs.iter().any(|line| line.ends_with(
            dir.path().file_name().unwrap().to_str().unwrap()
        )));
        assert!(instances.is_empty());
    }

    #[tokio::test]
    async fn reader_keeps_lines_written_before_running() {
        let shared = starting_shared();
        let (mut writer, stream) = tokio::io::duplex(64);
        writer.write_all(b"early\n").await.unwrap();

        let reader = spawn_reader(Arc::clone(&shared), Some(stream), "stdout").unwrap();
        for _ in 0..100 {
            if !lock(&shared.inner).logs.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!reader.is_finished());
        shared.transition(ProcessState::Running);
        writer.write_all(b"late\n").await.unwrap();
        drop(writer);
        reader.await.unwrap();

        assert_eq!(lock(&shared.inner).logs, vec!["early", "late"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn immediate_output_is_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let process = launch(&shell(
            "i=0; while [ $i -lt 200 ]; do echo line$i; i=$((i+1)); done",
            dir.path(),
        ))
        .unwrap();

        assert_eq!(process.wait().await, ProcessState::Exited);
        let expected: Vec<String> = (0..200).map(|i| format!("line{i}")).collect();
        assert_eq!(process.logs(), expected);
    }

    #[test]
    fn launch_outside_a_runtime_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = launch(&shell("true", dir.path()));
        assert!(matches!(result, Err(LaunchError::NoRuntime)));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let instances = RunningInstances::new();
        let process = instances.launch(&shell("sleep 30", dir.path())).unwrap();
        assert!(process.is_running());
        assert!(instances.resolve(process.pid()).is_some());

        process.stop();
        process.stop();

        assert_eq!(process.state(), ProcessState::Stopped);
        assert_eq!(process.wait().await, ProcessState::Stopped);
        assert!(instances.resolve(process.pid()).is_none());
    }

    #[tokio::test]
    async fn stop_after_natural_exit_keeps_exited() {
        let dir = tempfile::tempdir().unwrap();
        let process = launch(&shell("exit 3", dir.path())).unwrap();
        assert_eq!(process.wait().await, ProcessState::Exited);

        process.stop();
        process.stop();
        assert_eq!(process.state(), ProcessState::Exited);
        assert!(!process.is_running());
    }

    #[tokio::test]
    async fn no_lines_are_captured_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let process = launch(&shell(
            "while true; do echo tick; sleep 0.05; done",
            dir.path(),
        ))
        .unwrap();
        wait_for_logs(&process).await;

        process.stop();
        let captured = process.logs().len();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(captured > 0);
        assert_eq!(process.logs().len(), captured);
    }

    #[tokio::test]
    async fn missing_program_fails_synchronously() {
        let dir = tempfile::tempdir().unwrap();
        let command = LaunchCommand {
            java_path: dir.path().join("no-such-java"),
            arguments: Vec::new(),
            working_dir: dir.path().to_path_buf(),
        };
        let instances = RunningInstances::new();

        let result = instances.launch(&command);
        assert!(matches!(result, Err(LaunchError::Spawn { .. })));
        assert!(instances.is_empty());
    }

    #[tokio::test]
    async fn stop_all_empties_the_collection() {
        let dir = tempfile::tempdir().unwrap();
        let instances = RunningInstances::new();
        let first = instances.launch(&shell("sleep 30", dir.path())).unwrap();
        let second = instances.launch(&shell("sleep 30", dir.path())).unwrap();
        assert_eq!(instances.len(), 2);

        instances.stop_all();

        assert!(instances.is_empty());
        assert_eq!(first.wait().await, ProcessState::Stopped);
        assert_eq!(second.wait().await, ProcessState::Stopped);
    }
}
