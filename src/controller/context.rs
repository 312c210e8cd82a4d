//! Run context: owns the in-flight tunnel so an interrupt can tear it down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};

use super::process::TunnelProcess;
use crate::config::CommandLine;

/// What `RunContext::cancel` did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CancelReport {
    /// Server whose tunnel was terminated, if one was active.
    pub terminated: Option<String>,
    /// Whether the network-recovery command ran and exited successfully.
    pub recovered: bool,
}

/// What occupies the tunnel slot.
enum Slot {
    Idle,
    Running(TunnelProcess),
    /// Termination runs on a detached task so it finishes even if the
    /// caller that started it is dropped. `reaped` flips once the child is gone.
    Terminating {
        server: String,
        reaped: watch::Receiver<bool>,
    },
}

/// Holds the single active tunnel for a run.
///
/// The controller installs the process after launch and takes it back at
/// teardown; an interrupt handler calls [`RunContext::cancel`] from any state,
/// including while a teardown is still waiting on the process.
pub struct RunContext {
    active: Mutex<Slot>,
    recover_command: Option<CommandLine>,
    terminate_grace: Duration,
    cancelled: AtomicBool,
}

impl RunContext {
    pub fn new(recover_command: Option<CommandLine>, terminate_grace: Duration) -> Self {
        Self {
            active: Mutex::new(Slot::Idle),
            recover_command,
            terminate_grace,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Set once [`RunContext::cancel`] has been called. No new attempt
    /// should start after this.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Record `process` as the active tunnel.
    pub(crate) async fn install(&self, process: TunnelProcess) {
        // Only one tunnel may be up at a time.
        if let Some(stale) = self.teardown().await {
            warn!(server = %stale, "tore down a tunnel that was still active");
        }
        *self.active.lock().await = Slot::Running(process);
    }

    /// True while a tunnel is running or still being terminated.
    pub async fn has_active_tunnel(&self) -> bool {
        !matches!(*self.active.lock().await, Slot::Idle)
    }

    /// Terminate and reap the active tunnel, if any.
    ///
    /// If another teardown is already in progress this waits for it and
    /// reports the same server.
    pub(crate) async fn teardown(&self) -> Option<String> {
        let (server, reaped) = {
            let mut slot = self.active.lock().await;
            let (server, reaped) = match std::mem::replace(&mut *slot, Slot::Idle) {
                Slot::Idle => return None,
                Slot::Running(process) => {
                    let server = process.server.clone();
                    (server, self.spawn_terminate(process))
                }
                Slot::Terminating { server, reaped } => (server, reaped),
            };
            *slot = Slot::Terminating {
                server: server.clone(),
                reaped: reaped.clone(),
            };
            (server, reaped)
        };

        wait_reaped(reaped.clone()).await;

        let mut slot = self.active.lock().await;
        if matches!(&*slot, Slot::Terminating { reaped: r, .. } if r.same_channel(&reaped)) {
            *slot = Slot::Idle;
        }
        Some(server)
    }

    fn spawn_terminate(&self, process: TunnelProcess) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        let grace = self.terminate_grace;
        tokio::spawn(async move {
            process.terminate(grace).await;
            let _ = tx.send(true);
        });
        rx
    }

    /// Stop the run: terminate any active tunnel, then run the recovery
    /// command. Safe to call when nothing is running and safe to call twice.
    pub async fn cancel(&self) -> CancelReport {
        self.cancelled.store(true, Ordering::SeqCst);
        let terminated = self.teardown().await;
        let recovered = match (&terminated, &self.recover_command) {
            (Some(server), Some(cmd)) => {
                info!(server = %server, "recovering network after interrupted tunnel");
                run_recovery(cmd).await
            }
            _ => false,
        };
        CancelReport {
            terminated,
            recovered,
        }
    }
}

async fn wait_reaped(mut reaped: watch::Receiver<bool>) {
    // The sender only drops unsent if the terminate task panicked.
    if reaped.wait_for(|done| *done).await.is_err() {
        warn!("tunnel termination task ended without reaping");
    }
}

async fn run_recovery(cmd: &CommandLine) -> bool {
    match Command::new(&cmd.program).args(&cmd.args).status().await {
        Ok(status) if status.success() => true,
        Ok(status) => {
            warn!(command = %cmd.display(), ?status, "network recovery exited unsuccessfully");
            false
        }
        Err(e) => {
            warn!(command = %cmd.display(), error = %e, "failed to run network recovery");
            false
        }
    }
}
