//! Escalation policy: which tier a run is in, what to show, and how the
//! user's answer changes the deferral state.
//!
//! Both [`EscalationPolicy::evaluate`] and [`EscalationPolicy::apply_response`]
//! are pure. The orchestrator owns every side effect.
//!
//! Precedence, first match wins:
//! 1. a reminder scheduled in the future suppresses everything
//! 2. milestone dates must be ordered
//! 3. before the start date nothing happens
//! 4. past the end date with every deferral used, enforce
//! 5. past the end date, final warning
//! 6. past the nag date, nag
//! 7. otherwise, reminder

use serde::Serialize;
use tracing::debug;

use super::config::PolicyConfig;
use crate::error::ConfigError;
use crate::platform::{DialogResponse, EpochSecs, InstallMethod};
use crate::storage::DeferralState;

/// Seconds between final-tier postponements.
pub const FINAL_POSTPONE_SECS: u64 = 86_400;

/// Index of the "proceed" button in every tier's dialog.
pub const PROCEED_BUTTON: usize = 0;
/// Index of the secondary button: "More Info" while nagging, "Postpone" in
/// the final tier.
pub const SECONDARY_BUTTON: usize = 1;

/// Escalation tier, ordered from least to most insistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Dormant,
    Reminder,
    Nagging,
    Final,
    ForcedEnforcement,
}

/// Why a run decided to stay quiet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum QuietReason {
    Debounced { until: EpochSecs },
    Dormant { starts_at: EpochSecs },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    DoNothing(QuietReason),
    ShowReminder,
    ShowNag,
    ShowFinal,
    ForceViaCli,
    ForceViaGui,
}

impl Decision {
    /// Whether the decision commits to a command-line install up front.
    pub fn requires_cli_install(&self) -> bool {
        matches!(self, Decision::ForceViaCli)
    }

    pub fn is_quiet(&self) -> bool {
        matches!(self, Decision::DoNothing(_))
    }
}

/// Tier and decision for one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub tier: Tier,
    pub decision: Decision,
}

/// What the orchestrator should do after a dialog was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResponseAction {
    /// Start the install now.
    Install,
    /// Postponed until the given instant.
    Postpone { until: EpochSecs },
    /// Open the info URL, then postpone.
    MoreInfo { until: EpochSecs },
    /// Nothing was asked.
    None,
}

/// New state plus the follow-up action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseOutcome {
    pub state: DeferralState,
    pub action: ResponseAction,
}

/// Stateless namespace for the transition rules.
pub struct EscalationPolicy;

impl EscalationPolicy {
    /// Classify `now` and pick a decision.
    ///
    /// # Errors
    /// Returns [`ConfigError::DateOrder`] when the milestones are misordered.
    /// A debounced run returns before the dates are looked at.
    pub fn evaluate(
        now: EpochSecs,
        config: &PolicyConfig,
        state: &DeferralState,
    ) -> Result<Evaluation, ConfigError> {
        let tier = Self::tier_at(now, config, state);

        if let Some(until) = state.next_reminder_time.filter(|&t| t > now) {
            debug!(now, until, ?tier, "debounced");
            return Ok(Evaluation {
                tier,
                decision: Decision::DoNothing(QuietReason::Debounced { until }),
            });
        }

        config.validate_date_order()?;

        let decision = match tier {
            Tier::Dormant => Decision::DoNothing(QuietReason::Dormant {
                starts_at: config.start_date.unwrap_or(now),
            }),
            Tier::ForcedEnforcement => match config.install_method {
                InstallMethod::Gui => Decision::ForceViaGui,
                InstallMethod::Cli | InstallMethod::Auto => Decision::ForceViaCli,
            },
            Tier::Final => Decision::ShowFinal,
            Tier::Nagging => Decision::ShowNag,
            Tier::Reminder => Decision::ShowReminder,
        };
        debug!(now, ?tier, ?decision, "evaluated policy");
        Ok(Evaluation { tier, decision })
    }

    /// Tier for `now`, ignoring the reminder debounce.
    pub fn tier_at(now: EpochSecs, config: &PolicyConfig, state: &DeferralState) -> Tier {
        let reached = |milestone: Option<EpochSecs>| milestone.is_some_and(|at| now >= at);

        if config.start_date.is_some_and(|start| now < start) {
            Tier::Dormant
        } else if reached(config.end_date) && state.deferral_count >= config.max_deferrals {
            Tier::ForcedEnforcement
        } else if reached(config.end_date) {
            Tier::Final
        } else if reached(config.nag_date) {
            Tier::Nagging
        } else {
            Tier::Reminder
        }
    }

    /// Apply the user's answer to a tier's dialog.
    pub fn apply_response(
        tier: Tier,
        response: DialogResponse,
        now: EpochSecs,
        config: &PolicyConfig,
        state: &DeferralState,
    ) -> ResponseOutcome {
        let mut next = state.clone();
        let renotify_at = now.saturating_add(secs(config.renotify_period));

        let action = match (tier, response) {
            (Tier::Dormant, _) => ResponseAction::None,

            (Tier::ForcedEnforcement, _) => ResponseAction::Install,

            (Tier::Reminder, DialogResponse::Clicked { chosen_delay, .. }) => match chosen_delay {
                Some(0) => ResponseAction::Install,
                Some(delay) => {
                    let until = now.saturating_add(secs(delay));
                    next.next_reminder_time = Some(until);
                    ResponseAction::Postpone { until }
                }
                None => {
                    next.next_reminder_time = Some(renotify_at);
                    ResponseAction::Postpone { until: renotify_at }
                }
            },

            (Tier::Nagging, DialogResponse::Clicked { button, .. }) if button == PROCEED_BUTTON => {
                ResponseAction::Install
            }
            (Tier::Nagging, DialogResponse::Clicked { button, .. })
                if button == SECONDARY_BUTTON =>
            {
                next.next_reminder_time = Some(renotify_at);
                ResponseAction::MoreInfo { until: renotify_at }
            }

            (Tier::Final, DialogResponse::Clicked { button, .. }) if button == PROCEED_BUTTON => {
                ResponseAction::Install
            }
            (Tier::Final, _) => {
                let until = now.saturating_add(secs(FINAL_POSTPONE_SECS));
                next.deferral_count = next
                    .deferral_count
                    .saturating_add(1)
                    .min(config.max_deferrals);
                next.next_reminder_time = Some(until);
                next.times_ignored = next.times_ignored.saturating_add(1);
                ResponseAction::Postpone { until }
            }

            // Reminder or nag that timed out, was quit, or came back with an
            // unknown button.
            (Tier::Reminder | Tier::Nagging, _) => {
                next.next_reminder_time = Some(renotify_at);
                next.times_ignored = next.times_ignored.saturating_add(1);
                ResponseAction::Postpone { until: renotify_at }
            }
        };

        debug!(?tier, ?response, ?action, "applied dialog response");
        ResponseOutcome {
            state: next,
            action,
        }
    }
}

fn secs(value: u64) -> EpochSecs {
    EpochSecs::try_from(value).unwrap_or(EpochSecs::MAX)
}
