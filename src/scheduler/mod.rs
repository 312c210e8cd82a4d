//! Rotation Scheduler: walks the candidate pool for one target until the
//! view goal is met or the pool runs dry.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::controller::{AttemptOutcome, RunContext};
use crate::pool::Candidate;
use crate::store::StoreHandle;
use crate::ui::RotationUI;

/// Runs one attempt through one candidate.
///
/// Implemented by `ConnectionController`; tests substitute scripted fakes.
#[async_trait]
pub trait Attempter: Send {
    async fn attempt(&mut self, target: &str, candidate: &Candidate) -> Result<AttemptOutcome>;
}

/// Result of one rotation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RotationOutcome {
    /// Successful views added by this run.
    pub added: i64,
    /// Views that were still needed when the run started.
    pub remaining: i64,
    /// Candidates handed to the attempter.
    pub attempted: usize,
}

impl RotationOutcome {
    pub fn shortfall(&self) -> i64 {
        (self.remaining - self.added).max(0)
    }

    pub fn reached_goal(&self) -> bool {
        self.added >= self.remaining
    }
}

pub struct RotationScheduler {
    store: StoreHandle,
    ui: Arc<RotationUI>,
    ctx: Option<Arc<RunContext>>,
}

impl RotationScheduler {
    pub fn new(store: StoreHandle) -> Self {
        Self {
            store,
            ui: Arc::new(RotationUI::hidden()),
            ctx: None,
        }
    }

    pub fn with_ui(mut self, ui: Arc<RotationUI>) -> Self {
        self.ui = ui;
        self
    }

    /// Stop handing out candidates once `ctx` is cancelled.
    pub fn with_context(mut self, ctx: Arc<RunContext>) -> Self {
        self.ctx = Some(ctx);
        self
    }

    fn cancelled(&self) -> bool {
        self.ctx.as_ref().is_some_and(|ctx| ctx.is_cancelled())
    }

    /// Rotate through `candidates` for `target` until `goal` is reached.
    ///
    /// Candidates are visited in the order given. A server is eligible if it
    /// is not skipped and has no successful click for `target`; both sets
    /// are read once here, and the used set is updated after every success
    /// before the next candidate is considered.
    pub async fn rotate<A>(
        &self,
        attempter: &mut A,
        target: &str,
        goal: i64,
        live: i64,
        candidates: &[Candidate],
    ) -> Result<RotationOutcome>
    where
        A: Attempter + ?Sized,
    {
        let remaining = goal - live;
        let mut outcome = RotationOutcome {
            remaining: remaining.max(0),
            ..Default::default()
        };
        if remaining <= 0 {
            info!(link = %target, goal, live, "goal already reached, nothing to do");
            return Ok(outcome);
        }

        let link = target.to_string();
        let (usable, mut used) = self
            .store
            .call(move |s| Ok((s.usable_servers()?, s.used_servers_for_link(&link)?)))
            .await?;

        let eligible = eligible_candidates(candidates, &usable, &used);
        info!(
            link = %target,
            remaining,
            candidates = candidates.len(),
            eligible = eligible.len(),
            "starting rotation"
        );

        for candidate in eligible {
            if outcome.added >= remaining {
                break;
            }
            if self.cancelled() {
                info!(link = %target, added = outcome.added, "run cancelled, no further attempts");
                break;
            }
            // Duplicate configs for one server: the first success uses it up.
            if used.contains(&candidate.server_name) {
                debug!(server = %candidate.server_name, "already used for target");
                continue;
            }

            self.ui.show_candidate(&candidate.server_name, &file_name(candidate));
            outcome.attempted += 1;
            let result = attempter.attempt(target, candidate).await?;

            if result.counts_as_view() {
                outcome.added += 1;
                used.insert(candidate.server_name.clone());
                self.ui.view_added(live + outcome.added, goal);
            }
        }

        if outcome.reached_goal() {
            info!(link = %target, added = outcome.added, "goal reached");
        } else {
            warn!(
                link = %target,
                added = outcome.added,
                shortfall = outcome.shortfall(),
                "candidates exhausted before goal"
            );
        }
        Ok(outcome)
    }
}

fn eligible_candidates<'a>(
    candidates: &'a [Candidate],
    usable: &HashSet<String>,
    used: &HashSet<String>,
) -> Vec<&'a Candidate> {
    candidates
        .iter()
        .filter(|c| usable.contains(&c.server_name) && !used.contains(&c.server_name))
        .collect()
}

fn file_name(candidate: &Candidate) -> String {
    candidate
        .config_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AbortReason;
    use crate::store::{HealthRecord, ProgressStore};
    use std::collections::HashMap;

    const LINK: &str = "https://dragon.dvc.land/view/us?id=abc123";

    /// Scripted attempter: each server maps to an outcome, default success.
    /// Records successful clicks in the store the way the controller does.
    struct ScriptedAttempter {
        store: StoreHandle,
        outcomes: HashMap<String, AttemptOutcome>,
        calls: Vec<String>,
    }

    impl ScriptedAttempter {
        fn new(store: StoreHandle) -> Self {
            Self {
                store,
                outcomes: HashMap::new(),
                calls: Vec::new(),
            }
        }

        fn on(mut self, server: &str, outcome: AttemptOutcome) -> Self {
            self.outcomes.insert(server.to_string(), outcome);
            self
        }
    }

    #[async_trait]
    impl Attempter for ScriptedAttempter {
        async fn attempt(&mut self, target: &str, candidate: &Candidate) -> Result<AttemptOutcome> {
            self.calls.push(candidate.server_name.clone());
            let outcome = self
                .outcomes
                .get(&candidate.server_name)
                .cloned()
                .unwrap_or(AttemptOutcome::Clicked { success: true });
            match &outcome {
                AttemptOutcome::Clicked { success } => {
                    let (link, name, success) = (target.to_string(), candidate.server_name.clone(), *success);
                    self.store
                        .call(move |s| s.log_click(&link, &name, success).map(|_| ()))
                        .await?;
                }
                AttemptOutcome::Aborted(AbortReason::ConnectionTimeout) => {
                    let name = candidate.server_name.clone();
                    self.store
                        .call(move |s| s.mark_skipped(&name, "connection timeout"))
                        .await?;
                }
                _ => {}
            }
            Ok(outcome)
        }
    }

    fn setup(servers: &[&str]) -> (StoreHandle, Vec<Candidate>) {
        let store = ProgressStore::new_in_memory().unwrap();
        for name in servers {
            store.upsert_server_location(name, Some("NL"), None).unwrap();
        }
        let candidates = servers
            .iter()
            .map(|n| Candidate::new(*n, format!("configs/{}.ovpn", n)))
            .collect();
        (StoreHandle::new(store), candidates)
    }

    #[tokio::test]
    async fn test_goal_already_met_makes_no_attempts() -> Result<()> {
        let (store, candidates) = setup(&["A", "B"]);
        let scheduler = RotationScheduler::new(store.clone());
        let mut attempter = ScriptedAttempter::new(store);

        let outcome = scheduler.rotate(&mut attempter, LINK, 5, 5, &candidates).await?;
        assert_eq!(outcome.added, 0);
        assert_eq!(outcome.attempted, 0);
        assert!(attempter.calls.is_empty());

        let outcome = scheduler.rotate(&mut attempter, LINK, 5, 9, &candidates).await?;
        assert_eq!(outcome.added, 0);
        assert_eq!(outcome.shortfall(), 0);
        assert!(attempter.calls.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_stops_at_remaining_and_leaves_rest_untouched() -> Result<()> {
        let (store, candidates) = setup(&["A", "B", "C", "D"]);
        let scheduler = RotationScheduler::new(store.clone());
        let mut attempter = ScriptedAttempter::new(store.clone());

        let outcome = scheduler.rotate(&mut attempter, LINK, 5, 2, &candidates).await?;
        assert_eq!(outcome.added, 3);
        assert!(outcome.reached_goal());
        assert_eq!(attempter.calls, vec!["A", "B", "C"]);
        assert_eq!(store.call(|s| s.view_count_for_link(LINK)).await?, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_all_used_returns_zero_with_shortfall() -> Result<()> {
        let (store, candidates) = setup(&["A", "B"]);
        store
            .call(|s| {
                s.log_click(LINK, "A", true)?;
                s.log_click(LINK, "B", true)?;
                Ok(())
            })
            .await?;
        let scheduler = RotationScheduler::new(store.clone());
        let mut attempter = ScriptedAttempter::new(store);

        let outcome = scheduler.rotate(&mut attempter, LINK, 10, 2, &candidates).await?;
        assert_eq!(outcome.added, 0);
        assert_eq!(outcome.shortfall(), 8);
        assert!(attempter.calls.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_unhealthy_server_never_selected_again() -> Result<()> {
        let (store, candidates) = setup(&["A", "X", "B"]);
        store
            .call(|s| s.record_health("X", &HealthRecord::unhealthy(Some("warning".into()), "High load")))
            .await?;
        let scheduler = RotationScheduler::new(store.clone());

        let mut first = ScriptedAttempter::new(store.clone());
        scheduler.rotate(&mut first, LINK, 10, 0, &candidates).await?;
        assert_eq!(first.calls, vec!["A", "B"]);

        let mut second = ScriptedAttempter::new(store.clone());
        scheduler.rotate(&mut second, "https://other/link", 10, 0, &candidates).await?;
        assert!(!second.calls.contains(&"X".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_failures_continue_without_counting() -> Result<()> {
        let (store, candidates) = setup(&["A", "B", "C", "D", "E"]);
        let scheduler = RotationScheduler::new(store.clone());
        let mut attempter = ScriptedAttempter::new(store.clone())
            .on("A", AttemptOutcome::Aborted(AbortReason::ConnectionTimeout))
            .on("B", AttemptOutcome::Aborted(AbortReason::EgressUnverified))
            .on("C", AttemptOutcome::Clicked { success: false })
            .on("D", AttemptOutcome::DryRun);

        let outcome = scheduler.rotate(&mut attempter, LINK, 2, 0, &candidates).await?;
        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.attempted, 5);
        assert_eq!(outcome.shortfall(), 1);

        // Only the timeout left a durable skip; B and C remain eligible.
        let usable = store.call(|s| s.usable_servers()).await?;
        assert!(!usable.contains("A"));
        assert!(usable.contains("B") && usable.contains("C"));
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_configs_for_one_server_click_once() -> Result<()> {
        let (store, mut candidates) = setup(&["A", "B"]);
        candidates.insert(1, Candidate::new("A", "configs/A-entry2.ovpn"));
        let scheduler = RotationScheduler::new(store.clone());
        let mut attempter = ScriptedAttempter::new(store.clone());

        scheduler.rotate(&mut attempter, LINK, 10, 0, &candidates).await?;
        assert_eq!(attempter.calls, vec!["A", "B"]);

        let attempts = store.call(|s| s.click_attempts_for_link(LINK)).await?;
        let mut servers: Vec<_> = attempts
            .iter()
            .filter(|a| a.success)
            .map(|a| a.server_name.clone())
            .collect();
        servers.sort();
        servers.dedup();
        assert_eq!(servers.len(), attempts.iter().filter(|a| a.success).count());
        Ok(())
    }

    #[tokio::test]
    async fn test_successive_runs_are_monotonic_and_dedup() -> Result<()> {
        let (store, candidates) = setup(&["A", "B", "C", "D"]);
        let scheduler = RotationScheduler::new(store.clone());

        let mut first = ScriptedAttempter::new(store.clone());
        scheduler.rotate(&mut first, LINK, 2, 0, &candidates).await?;
        let after_first = store.call(|s| s.view_count_for_link(LINK)).await?;

        let mut second = ScriptedAttempter::new(store.clone());
        scheduler.rotate(&mut second, LINK, 4, after_first, &candidates).await?;
        let after_second = store.call(|s| s.view_count_for_link(LINK)).await?;

        assert_eq!(after_first, 2);
        assert_eq!(after_second, 4);
        assert_eq!(second.calls, vec!["C", "D"]);
        Ok(())
    }

    /// Cancels the run from inside its first attempt.
    struct CancellingAttempter {
        ctx: Arc<RunContext>,
        calls: usize,
    }

    #[async_trait]
    impl Attempter for CancellingAttempter {
        async fn attempt(&mut self, _target: &str, _candidate: &Candidate) -> Result<AttemptOutcome> {
            self.calls += 1;
            self.ctx.cancel().await;
            Ok(AttemptOutcome::Clicked { success: false })
        }
    }

    #[tokio::test]
    async fn test_cancelled_run_starts_no_new_attempts() -> Result<()> {
        let (store, candidates) = setup(&["A", "B", "C"]);
        let ctx = Arc::new(RunContext::new(None, std::time::Duration::from_secs(1)));
        let scheduler = RotationScheduler::new(store).with_context(ctx.clone());
        let mut attempter = CancellingAttempter { ctx, calls: 0 };

        let outcome = scheduler.rotate(&mut attempter, LINK, 3, 0, &candidates).await?;
        assert_eq!(attempter.calls, 1);
        assert_eq!(outcome.attempted, 1);
        assert_eq!(outcome.added, 0);
        Ok(())
    }
}
