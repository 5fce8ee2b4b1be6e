//! Process supervisor for the language server child process.
//!
//! The child's stdin/stdout are handed out exactly once as [`ProcessPipes`];
//! stderr is drained into `tracing` so a chatty server never blocks on a full
//! pipe. A supervisor task owns `Child::wait` and publishes the exit reason,
//! which lets the connection notice a crash even when stdout stays open.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use polyglot_types::LaunchSpec;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span};

/// Log target for lines the server writes to stderr.
pub const STDERR_TARGET: &str = "polyglot_lsp::stderr";

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{command} not found in PATH")]
    NotFound {
        command: String,
        #[source]
        source: which::Error,
    },
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("no {0} pipe from child")]
    MissingPipe(&'static str),
    #[error("{dependency} is not available. {hint}")]
    MissingDependency { dependency: String, hint: String },
    #[error("repository root {} is not usable: {reason}", path.display())]
    InvalidRoot { path: PathBuf, reason: String },
    #[error("adapter failed while preparing the launch: {0}")]
    Adapter(String),
}

/// How the child process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    Code(i32),
    Signal(i32),
    Unknown(String),
}

impl ExitReason {
    fn from_wait(result: io::Result<ExitStatus>) -> Self {
        match result {
            Ok(status) => {
                if let Some(code) = status.code() {
                    return Self::Code(code);
                }
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    if let Some(signal) = status.signal() {
                        return Self::Signal(signal);
                    }
                }
                Self::Unknown(status.to_string())
            }
            Err(e) => Self::Unknown(e.to_string()),
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        *self == Self::Code(0)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signal(signal) => write!(f, "signal {signal}"),
            Self::Unknown(detail) => write!(f, "unknown exit ({detail})"),
        }
    }
}

/// The child's stdio pair, handed to the framer.
#[derive(Debug)]
pub struct ProcessPipes {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// A running (or exited) language server process.
pub struct ServerProcess {
    command: String,
    pid: Option<u32>,
    exit_rx: watch::Receiver<Option<ExitReason>>,
    kill_tx: Option<oneshot::Sender<()>>,
    supervisor: JoinHandle<()>,
    stderr_task: Option<JoinHandle<()>>,
}

impl ServerProcess {
    /// Spawn the process described by `spec`.
    ///
    /// Must be called from within a tokio runtime. Background tasks are
    /// instrumented with `span`.
    pub fn spawn(spec: &LaunchSpec, span: &Span) -> Result<(Self, ProcessPipes), StartupError> {
        let command = spec.program().display().to_string();
        let resolved = which::which_in(spec.program(), std::env::var_os("PATH"), spec.cwd())
            .map_err(|source| StartupError::NotFound {
                command: command.clone(),
                source,
            })?;

        let mut cmd = Command::new(&resolved);
        cmd.args(spec.arguments())
            .current_dir(spec.cwd())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in spec.envs() {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| StartupError::Spawn {
            command: command.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or(StartupError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(StartupError::MissingPipe("stdout"))?;
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_stderr(stderr).instrument(span.clone())));

        let pid = child.id();
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        let supervisor = tokio::spawn(
            async move {
                // A dropped kill sender also counts as a kill request.
                let waited = tokio::select! {
                    status = child.wait() => Some(status),
                    _ = kill_rx => None,
                };
                let status = match waited {
                    Some(status) => status,
                    None => {
                        if let Err(e) = child.start_kill() {
                            tracing::debug!("kill failed (process already gone?): {e}");
                        }
                        child.wait().await
                    }
                };
                let reason = ExitReason::from_wait(status);
                tracing::debug!(%reason, "language server process exited");
                let _ = exit_tx.send(Some(reason));
            }
            .instrument(span.clone()),
        );

        tracing::info!(
            parent: span,
            command = %spec.display_command(),
            cwd = %spec.cwd().display(),
            pid,
            "language server process spawned"
        );

        Ok((
            Self {
                command,
                pid,
                exit_rx,
                kill_tx: Some(kill_tx),
                supervisor,
                stderr_task,
            },
            ProcessPipes { stdin, stdout },
        ))
    }

    /// The exit reason, if the process has already exited.
    #[must_use]
    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.exit_rx.borrow().clone()
    }

    /// A receiver that observes the exit reason once it is known.
    #[must_use]
    pub fn exit_watch(&self) -> watch::Receiver<Option<ExitReason>> {
        self.exit_rx.clone()
    }

    /// Wait until the process exits on its own.
    pub async fn wait(&self) -> ExitReason {
        wait_for_exit(self.exit_rx.clone()).await
    }

    /// Stop the process: SIGTERM (unix), wait up to `grace`, then kill.
    ///
    /// Idempotent; returns the recorded reason when the process already exited.
    pub async fn terminate(&mut self, grace: Duration) -> ExitReason {
        if let Some(reason) = self.exit_reason() {
            return reason;
        }

        if let Some(pid) = self.pid {
            send_terminate(pid);
        }
        if let Ok(reason) = tokio::time::timeout(grace, self.wait()).await {
            return reason;
        }

        tracing::debug!(command = %self.command, "process did not exit in time, killing");
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        let reason = self.wait().await;
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        reason
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        // Dropping `kill_tx` makes the supervisor kill and reap the child.
        if self.exit_rx.borrow().is_some() {
            self.supervisor.abort();
        }
    }
}

impl fmt::Debug for ServerProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerProcess")
            .field("command", &self.command)
            .field("pid", &self.pid)
            .field("exit", &*self.exit_rx.borrow())
            .finish_non_exhaustive()
    }
}

pub(crate) async fn wait_for_exit(mut exit_rx: watch::Receiver<Option<ExitReason>>) -> ExitReason {
    match exit_rx.wait_for(Option::is_some).await {
        Ok(reason) => reason
            .clone()
            .unwrap_or_else(|| ExitReason::Unknown("no status".into())),
        Err(_) => ExitReason::Unknown("supervisor stopped".into()),
    }
}

async fn drain_stderr(stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end();
                if !text.is_empty() {
                    tracing::debug!(target: STDERR_TARGET, "{text}");
                }
            }
            Err(e) => {
                tracing::debug!(target: STDERR_TARGET, "stderr read failed: {e}");
                break;
            }
        }
    }
}

#[cfg(unix)]
fn send_terminate(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers and touches no memory of ours.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        tracing::debug!(pid, "SIGTERM failed: {}", io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32) {}
