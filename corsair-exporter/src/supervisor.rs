//! Lifecycle of the PSU monitor subprocess.
//!
//! The supervisor starts `<binary> <device>` once, forwards every stdout line
//! to the ingestion channel, logs stderr verbatim and records how the process
//! ended. A process that exits is not restarted; the exporter keeps serving
//! the last values it saw.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::{ExporterError, Result};
use crate::line::LineReader;

/// How long stderr may keep draining after the process has been reaped.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Observable state of the monitor process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    /// `run` has not been called yet.
    NotStarted,
    /// The process is running.
    Running { pid: Option<u32> },
    /// The process ended. `code` is `None` when it was killed by a signal.
    Exited { code: Option<i32> },
    /// The process could not be started.
    Failed { reason: String },
}

impl SupervisorState {
    /// Whether the process has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited { .. } | Self::Failed { .. })
    }
}

/// Why the stdout loop stopped.
enum StopReason {
    EndOfOutput,
    Shutdown,
    ConsumerClosed,
}

/// Starts and watches the monitor subprocess.
pub struct ProcessSupervisor {
    program: String,
    device: String,
    state: watch::Sender<SupervisorState>,
}

impl ProcessSupervisor {
    /// Create a supervisor for `<program> <device>`.
    pub fn new(program: impl Into<String>, device: impl Into<String>) -> Self {
        let (state, _) = watch::channel(SupervisorState::NotStarted);
        Self {
            program: program.into(),
            device: device.into(),
            state,
        }
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> SupervisorState {
        self.state.borrow().clone()
    }

    fn spawn_child(&self) -> Result<Child> {
        Command::new(&self.program)
            .arg(&self.device)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExporterError::Spawn {
                program: self.program.clone(),
                source,
            })
    }

    /// Run the monitor until its output ends or shutdown is signalled.
    ///
    /// Each complete stdout line is sent to `lines` in arrival order. The
    /// child is killed on shutdown. Returns the terminal state.
    pub async fn run(
        self,
        lines: mpsc::Sender<Vec<u8>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> SupervisorState {
        let mut child = match self.spawn_child() {
            Ok(child) => child,
            Err(e) => {
                error!(error = %e, "Failed to start monitor process");
                return self.finish(SupervisorState::Failed {
                    reason: e.to_string(),
                });
            }
        };

        let pid = child.id();
        info!(
            program = %self.program,
            device = %self.device,
            pid = ?pid,
            "Monitor process started"
        );
        self.state.send_replace(SupervisorState::Running { pid });

        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(log_stderr(self.program.clone(), stderr)));

        let stop = match child.stdout.take() {
            Some(stdout) => forward_stdout(stdout, &lines, &mut shutdown).await,
            None => {
                warn!("Monitor stdout was not captured");
                StopReason::EndOfOutput
            }
        };
        drop(lines);

        let mut requested = false;
        match stop {
            StopReason::EndOfOutput => {}
            StopReason::Shutdown => {
                info!(pid = ?pid, "Stopping monitor process");
                requested = kill(&mut child);
            }
            StopReason::ConsumerClosed => {
                warn!("Telemetry consumer closed, stopping monitor process");
                requested = kill(&mut child);
            }
        }

        // The output may end while the process keeps running
        let status = if requested {
            child.wait().await
        } else {
            tokio::select! {
                status = child.wait() => status,
                () = shutdown_signalled(&mut shutdown) => {
                    info!(pid = ?pid, "Stopping monitor process");
                    requested = kill(&mut child);
                    child.wait().await
                }
            }
        };

        let state = match status {
            Ok(status) => {
                log_exit(&status, requested);
                SupervisorState::Exited {
                    code: status.code(),
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to wait for monitor process");
                SupervisorState::Failed {
                    reason: e.to_string(),
                }
            }
        };

        // Descendants of the monitor may still hold stderr open
        if let Some(mut task) = stderr_task {
            if requested
                || tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut task)
                    .await
                    .is_err()
            {
                task.abort();
            }
        }

        self.finish(state)
    }

    fn finish(&self, state: SupervisorState) -> SupervisorState {
        self.state.send_replace(state.clone());
        state
    }
}

async fn forward_stdout<R: AsyncRead + Unpin>(
    stdout: R,
    lines: &mpsc::Sender<Vec<u8>>,
    shutdown: &mut watch::Receiver<bool>,
) -> StopReason {
    let mut reader = LineReader::new(stdout);

    loop {
        tokio::select! {
            line = reader.next_line() => match line {
                Ok(Some(line)) => {
                    debug!(line = %String::from_utf8_lossy(&line), "Monitor output");
                    if lines.send(line).await.is_err() {
                        return StopReason::ConsumerClosed;
                    }
                }
                Ok(None) => return StopReason::EndOfOutput,
                Err(e) => {
                    warn!(error = %e, "Failed to read monitor output");
                    return StopReason::EndOfOutput;
                }
            },
            () = shutdown_signalled(shutdown) => return StopReason::Shutdown,
        }
    }
}

/// Resolve once shutdown is signalled. Never resolves if the sender is gone.
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    let signalled = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !signalled {
        std::future::pending::<()>().await;
    }
}

/// Send a kill signal, returning whether it was delivered.
fn kill(child: &mut Child) -> bool {
    match child.start_kill() {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Failed to signal monitor process");
            false
        }
    }
}

async fn log_stderr<R: AsyncRead + Unpin>(program: String, stderr: R) {
    let mut reader = LineReader::new(stderr);
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                warn!(program = %program, "{}", String::from_utf8_lossy(&line));
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Failed to read monitor stderr");
                break;
            }
        }
    }
}

fn log_exit(status: &ExitStatus, requested: bool) {
    let code = status.code();
    let signal = exit_signal(status);

    if requested {
        info!(code = ?code, signal = ?signal, "Monitor process stopped");
    } else if status.success() {
        info!("Monitor process exited with code 0");
    } else {
        warn!(
            code = ?code,
            signal = ?signal,
            "Monitor process exited, metrics will no longer update"
        );
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;

    fn script(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", body).unwrap();
        file
    }

    async fn drain(mut rx: mpsc::Receiver<Vec<u8>>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(line) = rx.recv().await {
            out.push(String::from_utf8(line).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_forwards_stdout_and_records_exit_code() {
        let file = script(
            "echo '{\"temperature\": 40}'\n\
             echo 'diagnostic' >&2\n\
             printf 'not json\\n'\n\
             printf 'unterminated'\n\
             exit 1",
        );
        let supervisor = ProcessSupervisor::new("/bin/sh", file.path().to_string_lossy());
        let state_rx = supervisor.subscribe();
        let (tx, rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let (state, lines) = tokio::join!(supervisor.run(tx, shutdown_rx), drain(rx));

        assert_eq!(state, SupervisorState::Exited { code: Some(1) });
        assert_eq!(*state_rx.borrow(), SupervisorState::Exited { code: Some(1) });
        assert_eq!(lines, vec!["{\"temperature\": 40}", "not json"]);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let supervisor = ProcessSupervisor::new("/nonexistent/cpsumoncli", "psu0");
        let (tx, rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let state = supervisor.run(tx, shutdown_rx).await;

        assert!(matches!(state, SupervisorState::Failed { .. }));
        assert!(state.is_terminal());
        assert!(drain(rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_kills_child() {
        let file = script("echo '{\"voltage\": 12}'\nexec sleep 30");
        let supervisor = ProcessSupervisor::new("/bin/sh", file.path().to_string_lossy());
        let mut state_rx = supervisor.subscribe();
        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(supervisor.run(tx, shutdown_rx));

        assert_eq!(rx.recv().await.unwrap(), b"{\"voltage\": 12}".to_vec());
        state_rx
            .wait_for(|s| matches!(s, SupervisorState::Running { .. }))
            .await
            .unwrap();

        shutdown_tx.send(true).unwrap();
        let state = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(state, SupervisorState::Exited { code: None });
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_after_stdout_closed() {
        let file = script("echo '{\"voltage\": 12}'\nexec 1>&-\nexec sleep 30");
        let supervisor = ProcessSupervisor::new("/bin/sh", file.path().to_string_lossy());
        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(supervisor.run(tx, shutdown_rx));

        assert_eq!(rx.recv().await.unwrap(), b"{\"voltage\": 12}".to_vec());
        // Output has ended but the process is still running
        assert!(rx.recv().await.is_none());

        shutdown_tx.send(true).unwrap();
        let state = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("supervisor should return after shutdown")
            .unwrap();

        assert_eq!(state, SupervisorState::Exited { code: None });
    }

    #[tokio::test]
    async fn test_exit_reported_while_descendant_holds_stderr() {
        let file = script("sleep 30 >/dev/null &\nexit 1");
        let supervisor = ProcessSupervisor::new("/bin/sh", file.path().to_string_lossy());
        let state_rx = supervisor.subscribe();
        let (tx, rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(supervisor.run(tx, shutdown_rx));
        let state = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("supervisor should report the exit")
            .unwrap();

        assert_eq!(state, SupervisorState::Exited { code: Some(1) });
        assert_eq!(*state_rx.borrow(), SupervisorState::Exited { code: Some(1) });
        assert!(drain(rx).await.is_empty());
    }

    #[test]
    fn test_initial_state() {
        let supervisor = ProcessSupervisor::new("/app/cpsumoncli", "psu0");
        assert_eq!(supervisor.state(), SupervisorState::NotStarted);
        assert!(!supervisor.state().is_terminal());
    }
}
