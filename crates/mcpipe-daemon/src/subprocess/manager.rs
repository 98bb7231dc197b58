//! Child process lifecycle manager.
//!
//! Spawns the relayed program with all three stdio streams piped and stops
//! it with a graceful-then-forceful sequence.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Program (and optional interpreter) launched for every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    /// Path of the child program or script.
    pub program: PathBuf,
    /// Interpreter that runs `program`, e.g. `python3`.
    pub interpreter: Option<PathBuf>,
    /// Extra arguments passed after `program`.
    pub args: Vec<OsString>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            interpreter: None,
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    fn build(&self) -> Command {
        let mut cmd = match &self.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&self.program);
                cmd
            }
            None => Command::new(&self.program),
        };
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl fmt::Display for ProcessCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(interpreter) = &self.interpreter {
            write!(f, "{} ", interpreter.display())?;
        }
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// A freshly spawned child with its three stdio streams.
///
/// The streams are public so each relay can take ownership of exactly one.
#[derive(Debug)]
pub struct ChildProcess {
    pub handle: ChildHandle,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Owned handle used to terminate the child.
#[derive(Debug)]
pub struct ChildHandle {
    id: String,
    child: Child,
    reaped: bool,
}

impl ChildHandle {
    /// Unique identifier for log correlation.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// OS process ID, while the process has not been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

/// How a [`ProcessManager::terminate`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// The process had already exited (or was already terminated).
    AlreadyExited,
    /// The process exited within the grace period.
    Graceful(ExitStatus),
    /// The grace period elapsed and the process was killed.
    Killed,
}

/// Spawns and stops child processes. Never restarts one on its own.
#[derive(Debug, Clone)]
pub struct ProcessManager {
    /// Timeout for graceful termination before SIGKILL.
    terminate_timeout: Duration,
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl ProcessManager {
    pub const fn new(terminate_timeout: Duration) -> Self {
        Self { terminate_timeout }
    }

    pub const fn terminate_timeout(&self) -> Duration {
        self.terminate_timeout
    }

    /// Spawn the child with piped stdin, stdout and stderr.
    pub fn spawn(&self, command: &ProcessCommand) -> Result<ChildProcess, SubprocessError> {
        info!(command = %command, "Spawning child process");
        let mut child = command
            .build()
            .spawn()
            .map_err(|e| SubprocessError::SpawnFailed {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        let missing = |stream: &str| SubprocessError::SpawnFailed {
            command: command.to_string(),
            reason: format!("Failed to capture {stream}"),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let id = uuid::Uuid::new_v4().to_string();
        info!(process_id = %id, pid = ?child.id(), "Child process started");

        Ok(ChildProcess {
            handle: ChildHandle {
                id,
                child,
                reaped: false,
            },
            stdin,
            stdout,
            stderr,
        })
    }

    /// Stop the child: SIGTERM, wait for the grace period, then SIGKILL.
    ///
    /// Returns only once the process has been reaped. Calling it again, or on
    /// a process that already exited, is a no-op.
    pub async fn terminate(&self, handle: &mut ChildHandle) -> TerminateOutcome {
        if handle.reaped {
            return TerminateOutcome::AlreadyExited;
        }
        let process_id = handle.id.clone();

        match handle.child.try_wait() {
            Ok(Some(status)) => {
                handle.reaped = true;
                debug!(process_id, ?status, "Child already exited");
                return TerminateOutcome::AlreadyExited;
            }
            Ok(None) => {}
            Err(e) => warn!(process_id, error = %e, "Failed to poll child status"),
        }

        debug!(process_id, "Terminating child process");
        if !request_stop(&handle.child) {
            return Self::force_kill(handle).await;
        }

        match tokio::time::timeout(self.terminate_timeout, handle.child.wait()).await {
            Ok(Ok(status)) => {
                handle.reaped = true;
                info!(process_id, ?status, "Child exited gracefully");
                TerminateOutcome::Graceful(status)
            }
            Ok(Err(e)) => {
                warn!(process_id, error = %e, "Error waiting for child");
                Self::force_kill(handle).await
            }
            Err(_) => {
                warn!(
                    process_id,
                    timeout_ms = self.terminate_timeout.as_millis(),
                    "Timeout waiting for graceful shutdown, killing"
                );
                Self::force_kill(handle).await
            }
        }
    }

    async fn force_kill(handle: &mut ChildHandle) -> TerminateOutcome {
        // `kill` also waits, so the process is reaped when this returns.
        if let Err(e) = handle.child.kill().await {
            warn!(process_id = %handle.id, error = %e, "Failed to kill child");
        }
        handle.reaped = true;
        info!(process_id = %handle.id, "Child killed");
        TerminateOutcome::Killed
    }
}

/// Send SIGTERM. Returns `false` when no graceful request could be made.
#[cfg(unix)]
fn request_stop(child: &Child) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return false;
    };
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            warn!(pid, error = %e, "Failed to send SIGTERM");
            false
        }
    }
}

#[cfg(not(unix))]
fn request_stop(_child: &Child) -> bool {
    false
}

/// Errors from subprocess operations.
#[derive(Debug, thiserror::Error)]
pub enum SubprocessError {
    #[error("Failed to spawn '{command}': {reason}")]
    SpawnFailed { command: String, reason: String },
}
