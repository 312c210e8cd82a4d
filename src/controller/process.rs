//! The external tunnel process: launch, output tailing, termination.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::CommandLine;
use crate::errors::RotationError;

/// A running tunnel and the task tailing its output.
pub struct TunnelProcess {
    pub server: String,
    child: Child,
    listener: JoinHandle<()>,
    connected: Arc<AtomicBool>,
}

impl TunnelProcess {
    /// Launch `command` with `config_path` appended and start tailing its
    /// combined stdout/stderr for `marker`.
    pub fn spawn(
        server: &str,
        command: &CommandLine,
        config_path: &Path,
        marker: &str,
    ) -> Result<Self, RotationError> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .arg(config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RotationError::TunnelSpawnFailed {
                command: command.display(),
                source,
            })?;

        debug!(server, pid = child.id().unwrap_or(0), "tunnel process spawned");

        let connected = Arc::new(AtomicBool::new(false));
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let listener = tokio::spawn(watch_output(
            stdout,
            stderr,
            marker.to_string(),
            connected.clone(),
        ));

        Ok(Self {
            server: server.to_string(),
            child,
            listener,
            connected,
        })
    }

    /// Flag set once the connected marker appears on the output stream.
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    /// SIGTERM, wait up to `grace`, then kill. Always reaps the child.
    pub async fn terminate(mut self, grace: Duration) {
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!(server = %self.server, ?status, "tunnel already exited");
        } else {
            send_terminate(&self.child);
            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(Ok(status)) => debug!(server = %self.server, ?status, "tunnel exited"),
                Ok(Err(e)) => warn!(server = %self.server, error = %e, "failed waiting on tunnel"),
                Err(_) => {
                    warn!(server = %self.server, "tunnel ignored SIGTERM, killing");
                    if let Err(e) = self.child.kill().await {
                        warn!(server = %self.server, error = %e, "failed to kill tunnel");
                    }
                }
            }
        }
        // No output is consulted after teardown.
        self.listener.abort();
    }
}

#[cfg(unix)]
fn send_terminate(child: &Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        debug!(pid, error = %e, "SIGTERM not delivered");
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &Child) {
    // No graceful signal; the grace wait falls through to kill().
    let _ = child;
}

type PipeLines<R> = Option<Lines<BufReader<R>>>;

async fn next_line<R: AsyncRead + Unpin>(lines: &mut PipeLines<R>) -> std::io::Result<Option<String>> {
    match lines {
        Some(lines) => lines.next_line().await,
        None => Ok(None),
    }
}

enum Pipe {
    Stdout,
    Stderr,
}

/// Tail both output pipes, flipping `connected` the first time a line
/// contains `marker`. Keeps draining afterwards so the pipes never fill.
async fn watch_output(
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    marker: String,
    connected: Arc<AtomicBool>,
) {
    let mut out: PipeLines<ChildStdout> = stdout.map(|s| BufReader::new(s).lines());
    let mut err: PipeLines<ChildStderr> = stderr.map(|s| BufReader::new(s).lines());

    loop {
        let (pipe, result) = tokio::select! {
            r = next_line(&mut out), if out.is_some() => (Pipe::Stdout, r),
            r = next_line(&mut err), if err.is_some() => (Pipe::Stderr, r),
            else => break,
        };

        let line = match result {
            Ok(Some(line)) => line,
            _ => {
                match pipe {
                    Pipe::Stdout => out = None,
                    Pipe::Stderr => err = None,
                }
                continue;
            }
        };

        trace!(line = %line, "tunnel output");
        if !connected.load(Ordering::SeqCst) && line.contains(&marker) {
            connected.store(true, Ordering::SeqCst);
        }
    }
}
