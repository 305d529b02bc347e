use serde::Serialize;

use crate::gate::SkipReason;
use crate::platform::{DialogResponse, EpochSecs, RestartAction};
use crate::policy::{Decision, ResponseAction, Tier};

/// Every step of a run produces an Event.
/// The CLI prints them as JSON; tests assert on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    UpdatesChecked {
        pending: usize,
        restart_required: bool,
        at: EpochSecs,
    },
    /// The forced GUI hand-off started too long ago to be trusted.
    StaleForceTimeCleared {
        started_at: EpochSecs,
        at: EpochSecs,
    },
    Evaluated {
        tier: Tier,
        decision: Decision,
        at: EpochSecs,
    },
    Skipped {
        reason: SkipReason,
        at: EpochSecs,
    },
    DialogShown {
        tier: Tier,
        response: DialogResponse,
        at: EpochSecs,
    },
    ResponseApplied {
        action: ResponseAction,
        deferral_count: u32,
        times_ignored: u32,
        at: EpochSecs,
    },
    InfoOpened {
        url: String,
        at: EpochSecs,
    },
    InstallStarted {
        unattended: bool,
        at: EpochSecs,
    },
    InstallFinished {
        exit_code: i32,
        restart: RestartAction,
        at: EpochSecs,
    },
    InstallFailed {
        error: String,
        at: EpochSecs,
    },
    UpdateUiOpened {
        target: String,
        deadline: EpochSecs,
        at: EpochSecs,
    },
    /// Installer activity was seen and has now stopped.
    InstallerFinished {
        at: EpochSecs,
    },
    ForcedDeadlinePassed {
        deadline: EpochSecs,
        at: EpochSecs,
    },
    StateReset {
        at: EpochSecs,
    },
}

/// Outcome of a whole run, as reported to the management system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The OS reported nothing to install; deferral state was cleared.
    NoUpdates,
    /// Debounced or dormant.
    Quiet,
    /// An environmental precondition failed.
    Skipped { reason: SkipReason },
    /// The user postponed.
    Postponed { until: EpochSecs },
    /// Evaluated without showing anything or touching state.
    DryRun,
    Installed { restart: RestartAction },
    /// The OS update UI is open but the installer has not run yet.
    AwaitingUserInstall { deadline: EpochSecs },
}

/// Everything one run did, printed by the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub policy_id: String,
    pub outcome: RunOutcome,
    pub tier: Option<Tier>,
    pub decision: Option<Decision>,
    pub events: Vec<Event>,
}
