//! Connection Controller: one attempt through one egress server.
//!
//! ```text
//! Idle → HealthChecked → Launching → AwaitingEvent → Connected → VerifyingEgress → Ready
//!                  │                        │                          │
//!                  └──── Aborted ◄──────────┴─ TimedOut ◄──────────────┘
//!                                       (all paths) → TornDown
//! ```
//!
//! Only two failures leave a durable mark on the server: a negative health
//! check and a connection timeout. Egress verification failures and a
//! missing health snapshot are treated as transient.

pub mod context;
pub mod process;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

pub use context::{CancelReport, RunContext};
pub use process::TunnelProcess;

use crate::config::TunnelSettings;
use crate::egress::EgressIpSource;
use crate::errors::{AbortReason, RotationError};
use crate::health::{HealthGate, HealthSource, HealthStatus, StatusSnapshot};
use crate::oracle::ClickOracle;
use crate::pool::Candidate;
use crate::scheduler::Attempter;
use crate::store::StoreHandle;
use crate::ui::RotationUI;

/// Skip reason persisted when the connected marker never appears.
pub const TIMEOUT_REASON: &str = "connection timeout";

/// States of a single attempt, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    HealthChecked,
    Launching,
    AwaitingEvent,
    Connected,
    TimedOut,
    VerifyingEgress,
    Ready,
    Aborted,
    TornDown,
}

/// Terminal result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The click oracle was called; `success` is what it reported.
    Clicked { success: bool },
    /// Reached `Ready` in dry-run mode; recorded as an unsuccessful click.
    DryRun,
    Aborted(AbortReason),
}

impl AttemptOutcome {
    /// Only successful clicks count toward the goal and the dedup set.
    pub fn counts_as_view(&self) -> bool {
        matches!(self, Self::Clicked { success: true })
    }
}

/// Fetch the pre-tunnel public IP. Failure here is fatal for the run.
pub async fn establish_baseline(source: &dyn EgressIpSource) -> Result<String, RotationError> {
    source
        .current_ip()
        .await
        .map(|egress| egress.ip)
        .map_err(|e| RotationError::BaselineIpUnavailable(format!("{:#}", e)))
}

/// External collaborators an attempt talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub health: Arc<dyn HealthSource>,
    pub egress: Arc<dyn EgressIpSource>,
    pub click: Arc<dyn ClickOracle>,
}

pub struct ConnectionController {
    tunnel: TunnelSettings,
    store: StoreHandle,
    gate: HealthGate,
    collaborators: Collaborators,
    ctx: Arc<RunContext>,
    baseline_ip: String,
    /// Status listing for this run, fetched on first use.
    snapshot: Option<StatusSnapshot>,
    dry_run: bool,
    ui: Arc<RotationUI>,
}

impl ConnectionController {
    pub fn new(
        tunnel: TunnelSettings,
        store: StoreHandle,
        collaborators: Collaborators,
        ctx: Arc<RunContext>,
        baseline_ip: String,
    ) -> Self {
        Self {
            tunnel,
            gate: HealthGate::new(store.clone()),
            store,
            collaborators,
            ctx,
            baseline_ip,
            snapshot: None,
            dry_run: false,
            ui: Arc::new(RotationUI::hidden()),
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_ui(mut self, ui: Arc<RotationUI>) -> Self {
        self.ui = ui;
        self
    }

    /// Use an already fetched status listing instead of fetching on first use.
    pub fn with_snapshot(mut self, snapshot: StatusSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    fn enter(&self, server: &str, state: ConnectionState) {
        debug!(server, ?state, "attempt state");
    }

    /// Fetch the status listing once per run. A failed fetch leaves it
    /// unset so the next attempt tries again.
    async fn ensure_snapshot(&mut self) {
        if self.snapshot.is_some() {
            return;
        }
        match self.collaborators.health.fetch_status().await {
            Ok(snapshot) => self.snapshot = Some(snapshot),
            Err(e) => warn!(error = %format!("{:#}", e), "failed to fetch server status"),
        }
    }

    /// Run one attempt end to end. Teardown runs on every path.
    pub async fn run_attempt(&mut self, target: &str, candidate: &Candidate) -> Result<AttemptOutcome> {
        let server = candidate.server_name.as_str();
        self.enter(server, ConnectionState::Idle);

        let result = self.drive(target, candidate).await;

        if self.ctx.teardown().await.is_some() {
            self.ui.disconnecting();
        }
        self.enter(server, ConnectionState::TornDown);

        match &result {
            Ok(AttemptOutcome::Aborted(reason)) => {
                self.enter(server, ConnectionState::Aborted);
                info!(server, reason = %reason, persisted = reason.is_persisted(), "attempt aborted");
            }
            Ok(outcome) => info!(server, ?outcome, "attempt finished"),
            Err(e) => warn!(server, error = %e, "attempt failed"),
        }
        result
    }

    async fn drive(&mut self, target: &str, candidate: &Candidate) -> Result<AttemptOutcome> {
        let server = candidate.server_name.as_str();

        // Idle → HealthChecked
        self.ensure_snapshot().await;
        let health = self
            .gate
            .check_health(server, self.snapshot.as_ref())
            .await?;
        self.enter(server, ConnectionState::HealthChecked);
        match health {
            HealthStatus::Healthy => {}
            HealthStatus::Unhealthy(reason) => {
                self.ui.unhealthy(server, &reason);
                return Ok(AttemptOutcome::Aborted(AbortReason::Unhealthy(reason)));
            }
            HealthStatus::Unknown => {
                self.ui.unhealthy(server, "health status unavailable");
                return Ok(AttemptOutcome::Aborted(AbortReason::HealthUnknown));
            }
        }

        // HealthChecked → Launching
        self.enter(server, ConnectionState::Launching);
        self.ui.start_connect(server);
        let process = match TunnelProcess::spawn(
            server,
            &self.tunnel.command,
            &candidate.config_path,
            &self.tunnel.connected_marker,
        ) {
            Ok(process) => process,
            Err(e) => {
                warn!(server, error = %e, "tunnel launch failed");
                return Ok(AttemptOutcome::Aborted(AbortReason::SpawnFailed(e.to_string())));
            }
        };
        let connected = process.connected_flag();
        self.ctx.install(process).await;

        // Launching → AwaitingEvent: poll the flag, never block on the output.
        self.enter(server, ConnectionState::AwaitingEvent);
        debug!(server, budget = ?self.tunnel.connect_budget(), "waiting for connected marker");
        let budget = self.tunnel.connect_ticks;
        let mut tick = 0;
        while tick < budget && !connected.load(Ordering::SeqCst) {
            tick += 1;
            self.ui.connect_tick(tick, budget);
            tokio::time::sleep(self.tunnel.tick_interval).await;
        }

        if !connected.load(Ordering::SeqCst) {
            self.enter(server, ConnectionState::TimedOut);
            self.ui.timed_out(server);
            let name = server.to_string();
            self.store
                .call(move |s| s.mark_skipped(&name, TIMEOUT_REASON))
                .await?;
            return Ok(AttemptOutcome::Aborted(AbortReason::ConnectionTimeout));
        }
        self.enter(server, ConnectionState::Connected);
        self.ui.connected(server);

        // Connected → VerifyingEgress
        self.enter(server, ConnectionState::VerifyingEgress);
        let egress = match self.collaborators.egress.current_ip().await {
            Ok(egress) if egress.ip != self.baseline_ip => egress,
            Ok(_) => {
                debug!(server, "egress IP equals baseline");
                self.ui.egress_unverified(server);
                return Ok(AttemptOutcome::Aborted(AbortReason::EgressUnverified));
            }
            Err(e) => {
                debug!(server, error = %e, "egress IP unavailable");
                self.ui.egress_unverified(server);
                return Ok(AttemptOutcome::Aborted(AbortReason::EgressUnverified));
            }
        };
        debug!(
            server,
            ip = %egress.ip,
            on_expected_network = egress.on_expected_network,
            "egress verified"
        );
        self.ui.egress_ip(&egress.ip);

        // VerifyingEgress → Ready
        self.enter(server, ConnectionState::Ready);
        let (outcome, success) = if self.dry_run {
            self.ui.dry_run_click(server);
            (AttemptOutcome::DryRun, false)
        } else {
            let success = self.collaborators.click.click(target).await;
            if !success {
                self.ui.click_failed(server);
            }
            (AttemptOutcome::Clicked { success }, success)
        };

        let link = target.to_string();
        let name = server.to_string();
        self.store
            .call(move |s| s.log_click(&link, &name, success).map(|_| ()))
            .await?;
        Ok(outcome)
    }
}

#[async_trait]
impl Attempter for ConnectionController {
    async fn attempt(&mut self, target: &str, candidate: &Candidate) -> Result<AttemptOutcome> {
        self.run_attempt(target, candidate).await
    }
}
