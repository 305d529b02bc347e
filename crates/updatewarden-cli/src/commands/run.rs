use clap::Args;
use tracing::info;
use updatewarden_core::storage::data_dir;
use updatewarden_core::{Config, CoreError};

use super::{orchestrator, print_json, resolve_policy};

/// Command-line values that take precedence over `config.toml`.
#[derive(Args, Debug, Default)]
pub struct PolicyOverrides {
    /// Reminders start at this date
    #[arg(long)]
    pub start_date: Option<String>,
    /// The user can no longer choose a delay after this date
    #[arg(long)]
    pub nag_date: Option<String>,
    /// Deferrals are limited to one per day after this date
    #[arg(long)]
    pub end_date: Option<String>,
    #[arg(long)]
    pub max_deferrals: Option<u32>,
    /// Seconds until the next reminder after a dismissal
    #[arg(long)]
    pub renotify_period: Option<u64>,
    /// Seconds before an unanswered dialog counts as dismissed
    #[arg(long)]
    pub dialog_timeout: Option<u64>,
    /// Skip the run when the user has been idle longer than this
    #[arg(long)]
    pub max_idle_time: Option<u64>,
    /// Delays offered in the reminder dialog, in seconds
    #[arg(long, value_delimiter = ',')]
    pub delay_options: Option<Vec<u64>>,
    /// Process whose display-sleep assertion never blocks a dialog
    #[arg(long = "ignore-assertion")]
    pub ignore_assertions: Vec<String>,
    /// auto, cli or gui
    #[arg(long)]
    pub install_method: Option<String>,
    #[arg(long)]
    pub policy_id: Option<String>,
}

impl PolicyOverrides {
    pub fn apply(self, config: &mut Config) {
        let policy = &mut config.policy;
        if let Some(v) = self.start_date {
            policy.start_date = Some(v);
        }
        if let Some(v) = self.nag_date {
            policy.nag_date = Some(v);
        }
        if let Some(v) = self.end_date {
            policy.end_date = Some(v);
        }
        if let Some(v) = self.max_deferrals {
            policy.max_deferrals = v;
        }
        if let Some(v) = self.renotify_period {
            policy.renotify_period = v;
        }
        if let Some(v) = self.dialog_timeout {
            policy.dialog_timeout = v;
        }
        if let Some(v) = self.delay_options {
            policy.delay_options = v;
        }
        if let Some(v) = self.policy_id {
            policy.policy_id = v;
        }
        if let Some(v) = self.max_idle_time {
            config.gate.max_idle_time = v;
        }
        config.gate.assertions_to_ignore.extend(self.ignore_assertions);
        if let Some(v) = self.install_method {
            config.enforcement.install_method = v;
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub overrides: PolicyOverrides,
    /// Evaluate and report without showing dialogs or changing state
    #[arg(long)]
    pub dry_run: bool,
}

pub fn run(args: RunArgs) -> Result<(), CoreError> {
    let mut config = Config::load()?;
    args.overrides.apply(&mut config);
    execute(&config, args.dry_run)
}

/// Resolve `config`, run the policy once and print the report.
pub fn execute(config: &Config, dry_run: bool) -> Result<(), CoreError> {
    let policy = resolve_policy(config)?;
    info!(policy_id = %policy.policy_id, method = ?policy.install_method, "starting run");
    let report = orchestrator(policy)?
        .with_lock_dir(data_dir()?)
        .dry_run(dry_run)
        .run()?;
    print_json(&report)
}
