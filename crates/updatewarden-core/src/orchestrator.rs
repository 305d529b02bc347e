//! One invocation, end to end.
//!
//! lock → pending updates → load state → evaluate → gate → dialog →
//! apply response → save → execute.
//!
//! The policy is evaluated before the gate because evaluation is pure and
//! read-only; it tells the gate whether the power check applies. Nothing is
//! written before the gate has passed, except the assertion counter, and an
//! install writes nothing until it has finished.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::error::CoreError;
use crate::events::{Event, RunOutcome, RunReport};
use crate::executor::ActionExecutor;
use crate::gate::{EligibilityGate, GateOutcome, SkipReason};
use crate::platform::{Collaborators, EpochSecs};
use crate::policy::{EscalationPolicy, Evaluation, PolicyConfig, ResponseAction};
use crate::storage::{DeferralState, DeferralStateStore, PersistentKv, PolicyLock};

/// Drives a single run for one policy.
pub struct Orchestrator<K: PersistentKv> {
    config: PolicyConfig,
    collab: Collaborators,
    store: DeferralStateStore<K>,
    lock_dir: Option<PathBuf>,
    dry_run: bool,
}

impl<K: PersistentKv> Orchestrator<K> {
    pub fn new(config: PolicyConfig, collab: Collaborators, store: DeferralStateStore<K>) -> Self {
        Self {
            config,
            collab,
            store,
            lock_dir: None,
            dry_run: false,
        }
    }

    /// Hold `<dir>/<policy_id>.lock` for the duration of [`Self::run`].
    pub fn with_lock_dir(mut self, dir: PathBuf) -> Self {
        self.lock_dir = Some(dir);
        self
    }

    /// Evaluate only: no gate, dialog, install or state change.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn store(&self) -> &DeferralStateStore<K> {
        &self.store
    }

    /// Run once.
    ///
    /// # Errors
    /// Configuration, store and platform failures are returned as-is. An
    /// install failure is returned as [`CoreError::Execution`] after the
    /// user has been told.
    pub fn run(&self) -> Result<RunReport, CoreError> {
        let policy_id = self.config.policy_id.clone();
        let mut report = RunReport {
            policy_id: policy_id.clone(),
            outcome: RunOutcome::Quiet,
            tier: None,
            decision: None,
            events: Vec::new(),
        };

        let _lock = match &self.lock_dir {
            Some(dir) => match PolicyLock::try_acquire(dir, &policy_id)? {
                Some(lock) => Some(lock),
                None => {
                    info!(%policy_id, "another run is in progress");
                    return Ok(self.skipped(report, SkipReason::AlreadyRunning));
                }
            },
            None => None,
        };

        let now = self.collab.clock.now();
        let pending = self.collab.updates.list_pending()?;
        report.events.push(Event::UpdatesChecked {
            pending: pending.count(),
            restart_required: pending.needs_restart(),
            at: now,
        });
        if pending.is_empty() {
            info!(%policy_id, "no updates pending");
            if !self.dry_run {
                self.store.reset(&policy_id)?;
                report.events.push(Event::StateReset { at: now });
            }
            report.outcome = RunOutcome::NoUpdates;
            return Ok(report);
        }

        let mut state = self.store.load(&policy_id);
        if let Some(started_at) = self.stale_force_time(now, &state) {
            warn!(started_at, "discarding stale forced-update start time");
            state.force_update_start_time = None;
            report.events.push(Event::StaleForceTimeCleared { started_at, at: now });
        }

        let evaluation = EscalationPolicy::evaluate(now, &self.config, &state)?;
        report.tier = Some(evaluation.tier);
        report.decision = Some(evaluation.decision);
        report.events.push(Event::Evaluated {
            tier: evaluation.tier,
            decision: evaluation.decision,
            at: now,
        });
        info!(tier = ?evaluation.tier, decision = ?evaluation.decision, "policy evaluated");

        if evaluation.decision.is_quiet() {
            return Ok(report);
        }
        if self.dry_run {
            report.outcome = RunOutcome::DryRun;
            return Ok(report);
        }

        let executor = ActionExecutor::new(&self.collab, &self.config, &self.store);
        let gate = EligibilityGate::new(&self.collab, &self.config);
        match gate.check(evaluation.decision.requires_cli_install())? {
            GateOutcome::Proceed => {}
            GateOutcome::InstallUnattended => {
                report.outcome = executor.force_via_cli(&pending, false, &mut report.events)?;
                return Ok(report);
            }
            GateOutcome::Exit(reason) => {
                if matches!(reason, SkipReason::DisplayAssertion { .. }) {
                    self.store.record_assertion_encounter(&policy_id)?;
                }
                return Ok(self.skipped(report, reason));
            }
        }

        let response = executor.present(evaluation.tier, &state)?;
        // The dialog can block for up to `dialog_timeout`; postponements
        // count from when it was answered.
        let answered_at = self.collab.clock.now();
        report.events.push(Event::DialogShown {
            tier: evaluation.tier,
            response,
            at: answered_at,
        });

        let outcome = EscalationPolicy::apply_response(
            evaluation.tier,
            response,
            answered_at,
            &self.config,
            &state,
        );
        let mut state = outcome.state;
        state.last_run_time = Some(answered_at);
        // An install only writes state once its outcome is known.
        if outcome.action != ResponseAction::Install {
            self.store.save(&policy_id, &state)?;
        }
        report.events.push(Event::ResponseApplied {
            action: outcome.action,
            deferral_count: state.deferral_count,
            times_ignored: state.times_ignored,
            at: answered_at,
        });

        report.outcome = match outcome.action {
            ResponseAction::Install => executor.install(&pending, &mut state, &mut report.events)?,
            ResponseAction::MoreInfo { until } => {
                executor.open_info(&mut report.events);
                RunOutcome::Postponed { until }
            }
            ResponseAction::Postpone { until } => {
                info!(until, "postponed");
                RunOutcome::Postponed { until }
            }
            ResponseAction::None => RunOutcome::Quiet,
        };
        Ok(report)
    }

    /// Evaluate the policy at `at` without touching anything.
    pub fn simulate(&self, at: EpochSecs) -> Result<(DeferralState, Evaluation), CoreError> {
        let state = self.store.load(&self.config.policy_id);
        let evaluation = EscalationPolicy::evaluate(at, &self.config, &state)?;
        Ok((state, evaluation))
    }

    fn stale_force_time(&self, now: EpochSecs, state: &DeferralState) -> Option<EpochSecs> {
        let started_at = state.force_update_start_time?;
        let stale_after =
            EpochSecs::try_from(self.config.forced_update_stale_after).unwrap_or(EpochSecs::MAX);
        (now.saturating_sub(started_at) > stale_after).then_some(started_at)
    }

    fn skipped(&self, mut report: RunReport, reason: SkipReason) -> RunReport {
        report.events.push(Event::Skipped {
            reason: reason.clone(),
            at: self.collab.clock.now(),
        });
        report.outcome = RunOutcome::Skipped { reason };
        report
    }
}
