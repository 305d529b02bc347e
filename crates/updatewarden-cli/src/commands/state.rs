use serde::Serialize;
use updatewarden_core::policy::dates::format_local;
use updatewarden_core::{Config, CoreError, DeferralState, Evaluation};

use super::{now, open_store, orchestrator, print_json, resolve_policy};

#[derive(Serialize)]
struct Status {
    policy_id: String,
    now: i64,
    deferrals_remaining: u32,
    next_reminder: Option<String>,
    state: DeferralState,
    #[serde(flatten)]
    evaluation: Evaluation,
}

pub fn status() -> Result<(), CoreError> {
    let config = Config::load()?;
    let policy = resolve_policy(&config)?;
    let orchestrator = orchestrator(policy)?;
    let at = now();
    let (state, evaluation) = orchestrator.simulate(at)?;

    print_json(&Status {
        policy_id: orchestrator.config().policy_id.clone(),
        now: at,
        deferrals_remaining: orchestrator.config().deferrals_remaining(state.deferral_count),
        next_reminder: state.next_reminder_time.map(format_local),
        state,
        evaluation,
    })
}

/// Clear the state of the configured policy. Uses the raw policy id so a
/// broken date configuration cannot prevent a reset.
pub fn reset() -> Result<(), CoreError> {
    let config = Config::load()?;
    let policy_id = config.policy.policy_id.trim();
    open_store()?.reset(policy_id)?;
    println!("deferral state reset for {policy_id}");
    Ok(())
}
