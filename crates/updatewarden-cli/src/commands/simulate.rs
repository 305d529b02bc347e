use clap::Args;
use serde::Serialize;
use updatewarden_core::policy::dates::{format_local, parse_instant};
use updatewarden_core::{Config, CoreError, EscalationPolicy, Evaluation};

use super::run::PolicyOverrides;
use super::{now, open_store, print_json, resolve_policy};

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Instant to evaluate at (defaults to now)
    #[arg(long)]
    pub at: Option<String>,
    /// Pretend this many deferrals have been used
    #[arg(long)]
    pub deferrals: Option<u32>,
    #[command(flatten)]
    pub overrides: PolicyOverrides,
}

#[derive(Serialize)]
struct Simulation {
    at: i64,
    at_local: String,
    deferral_count: u32,
    #[serde(flatten)]
    evaluation: Evaluation,
}

pub fn run(args: SimulateArgs) -> Result<(), CoreError> {
    let mut config = Config::load()?;
    args.overrides.apply(&mut config);
    let policy = resolve_policy(&config)?;

    let at = match args.at.as_deref() {
        Some(value) => parse_instant("at", value)?,
        None => now(),
    };
    let mut state = open_store()?.load(&policy.policy_id);
    if let Some(count) = args.deferrals {
        state.deferral_count = count;
    }
    let evaluation = EscalationPolicy::evaluate(at, &policy, &state)?;

    print_json(&Simulation {
        at,
        at_local: format_local(at),
        deferral_count: state.deferral_count,
        evaluation,
    })
}
