//! Action execution.
//!
//! Turns a tier into a dialog, and an install decision into a command-line
//! install or a hand-off to the OS update UI. Failures are shown to the user
//! and returned as [`ExecutionError`]s; the deferral state is left alone so
//! the next scheduled run retries.

use tracing::{error, info, warn};

use crate::error::{CoreError, ExecutionError, PlatformError};
use crate::events::{Event, RunOutcome};
use crate::platform::{
    Collaborators, DialogRequest, DialogResponse, EpochSecs, InstallMethod, PendingUpdates,
    RestartAction,
};
use crate::policy::dates::format_local;
use crate::policy::{PolicyConfig, Tier};
use crate::storage::{DeferralState, DeferralStateStore, PersistentKv};

const BYTES_PER_GB: u64 = 1_000_000_000;

/// Executes decisions against the collaborators and records events.
pub struct ActionExecutor<'a, K: PersistentKv> {
    collab: &'a Collaborators,
    config: &'a PolicyConfig,
    store: &'a DeferralStateStore<K>,
}

impl<'a, K: PersistentKv> ActionExecutor<'a, K> {
    pub fn new(
        collab: &'a Collaborators,
        config: &'a PolicyConfig,
        store: &'a DeferralStateStore<K>,
    ) -> Self {
        Self {
            collab,
            config,
            store,
        }
    }

    /// Show the tier's dialog and wait for the answer.
    ///
    /// Dormant runs never reach this point; they are answered as dismissed.
    pub fn present(
        &self,
        tier: Tier,
        state: &DeferralState,
    ) -> Result<DialogResponse, PlatformError> {
        match dialog_for(tier, self.config, state) {
            Some(request) => {
                info!(?tier, title = %request.title, "showing dialog");
                self.collab.dialogs.show(&request)
            }
            None => Ok(DialogResponse::Dismissed),
        }
    }

    /// Open the configured info URL. Failures are logged, not fatal.
    pub fn open_info(&self, events: &mut Vec<Event>) {
        let Some(url) = &self.config.messages.info_url else {
            return;
        };
        match self.collab.urls.open(url) {
            Ok(()) => events.push(Event::InfoOpened {
                url: url.clone(),
                at: self.collab.clock.now(),
            }),
            Err(e) => warn!(%url, error = %e, "failed to open info URL"),
        }
    }

    /// Install with the configured method.
    pub fn install(
        &self,
        pending: &PendingUpdates,
        state: &mut DeferralState,
        events: &mut Vec<Event>,
    ) -> Result<RunOutcome, CoreError> {
        match self.config.install_method {
            InstallMethod::Gui => self.force_via_gui(state, events),
            InstallMethod::Cli | InstallMethod::Auto => self.force_via_cli(pending, true, events),
        }
    }

    /// Run the command-line installer and restart or shut down afterwards.
    ///
    /// `interactive` controls whether a failure dialog can be shown.
    pub fn force_via_cli(
        &self,
        pending: &PendingUpdates,
        interactive: bool,
        events: &mut Vec<Event>,
    ) -> Result<RunOutcome, CoreError> {
        events.push(Event::InstallStarted {
            unattended: !interactive,
            at: self.collab.clock.now(),
        });

        let (exit_code, restart) = match self.run_cli_install(pending) {
            Ok(finished) => finished,
            Err(CoreError::Execution(e)) => {
                error!(error = %e, "update install failed");
                events.push(Event::InstallFailed {
                    error: e.to_string(),
                    at: self.collab.clock.now(),
                });
                if interactive {
                    self.show_failure();
                }
                return Err(e.into());
            }
            Err(e) => return Err(e),
        };

        events.push(Event::InstallFinished {
            exit_code,
            restart,
            at: self.collab.clock.now(),
        });
        self.store.reset(&self.config.policy_id)?;
        events.push(Event::StateReset {
            at: self.collab.clock.now(),
        });

        match restart {
            RestartAction::Restart => self.collab.restart.restart()?,
            RestartAction::Shutdown => self.collab.restart.shutdown()?,
            RestartAction::None => {}
        }
        info!(?restart, "update installed");
        Ok(RunOutcome::Installed { restart })
    }

    /// Preflight, install and classify the result as (exit code, follow-up).
    fn run_cli_install(
        &self,
        pending: &PendingUpdates,
    ) -> Result<(i32, RestartAction), CoreError> {
        if self.collab.storage.encryption_in_progress()? {
            return Err(ExecutionError::EncryptionInProgress.into());
        }

        let required_gb = self.config.required_free_space_gb;
        let available_gb = self.collab.storage.free_bytes()? / BYTES_PER_GB;
        if available_gb < required_gb {
            return Err(ExecutionError::InsufficientSpace {
                available_gb,
                required_gb,
            }
            .into());
        }

        info!(updates = pending.count(), "running command-line installer");
        let report = self.collab.runner.install_all()?;

        if reports_insufficient_space(&report.output) {
            return Err(ExecutionError::InsufficientSpace {
                available_gb,
                required_gb,
            }
            .into());
        }
        if report.exit_code != 0 {
            return Err(ExecutionError::InstallFailed {
                exit_code: report.exit_code,
            }
            .into());
        }

        let restart = if requests_shutdown(&report.output) {
            RestartAction::Shutdown
        } else if pending.needs_restart() {
            RestartAction::Restart
        } else {
            RestartAction::None
        };
        Ok((report.exit_code, restart))
    }

    /// Open the OS update UI and wait for the installer to run.
    ///
    /// The forced-update start time is recorded on first use and kept across
    /// runs until the install finishes, so the grace deadline does not move.
    pub fn force_via_gui(
        &self,
        state: &mut DeferralState,
        events: &mut Vec<Event>,
    ) -> Result<RunOutcome, CoreError> {
        let start = *state
            .force_update_start_time
            .get_or_insert_with(|| self.collab.clock.now());
        self.store.save(&self.config.policy_id, state)?;

        let grace = EpochSecs::try_from(self.config.forced_update_grace).unwrap_or(EpochSecs::MAX);
        let deadline = start.saturating_add(grace);

        let target = &self.config.update_ui_target;
        if let Err(e) = self.collab.runner.open_update_ui(target) {
            let err = ExecutionError::UpdateUiUnavailable(e.to_string());
            error!(error = %err, "cannot hand off to the update UI");
            events.push(Event::InstallFailed {
                error: err.to_string(),
                at: self.collab.clock.now(),
            });
            self.show_failure();
            return Err(err.into());
        }
        events.push(Event::UpdateUiOpened {
            target: target.clone(),
            deadline,
            at: self.collab.clock.now(),
        });

        let mut seen_activity = false;
        loop {
            let active = self.collab.installer.is_active()?;
            let now = self.collab.clock.now();
            if active {
                seen_activity = true;
            } else if seen_activity {
                events.push(Event::InstallerFinished { at: now });
                break;
            }
            if !seen_activity && now >= deadline {
                info!(deadline, "no installer activity before the deadline");
                events.push(Event::ForcedDeadlinePassed { deadline, at: now });
                return Ok(RunOutcome::AwaitingUserInstall { deadline });
            }
            self.collab.sleeper.sleep(self.config.installer_poll_interval);
        }

        let countdown = DialogRequest {
            title: self.config.messages.title.clone(),
            body: render(&self.config.messages.shutdown, self.config, state),
            buttons: vec!["Shut Down Now".into()],
            timeout: self.config.shutdown_countdown,
            delay_options: None,
            icon: self.config.messages.icon.clone(),
        };
        if let Err(e) = self.collab.dialogs.show(&countdown) {
            warn!(error = %e, "shutdown countdown dialog failed");
        }

        self.store.reset(&self.config.policy_id)?;
        events.push(Event::StateReset {
            at: self.collab.clock.now(),
        });
        self.collab.restart.shutdown()?;
        Ok(RunOutcome::Installed {
            restart: RestartAction::Shutdown,
        })
    }

    fn show_failure(&self) {
        let request = DialogRequest {
            title: self.config.messages.title.clone(),
            body: render(
                &self.config.messages.failure,
                self.config,
                &DeferralState::default(),
            ),
            buttons: vec!["OK".into()],
            timeout: self.config.dialog_timeout,
            delay_options: None,
            icon: self.config.messages.icon.clone(),
        };
        if let Err(e) = self.collab.dialogs.show(&request) {
            warn!(error = %e, "support dialog failed");
        }
    }
}

/// The dialog shown for `tier`, or `None` when nothing is shown.
pub fn dialog_for(
    tier: Tier,
    config: &PolicyConfig,
    state: &DeferralState,
) -> Option<DialogRequest> {
    let messages = &config.messages;
    let (body, buttons, delay_options) = match tier {
        Tier::Dormant => return None,
        Tier::Reminder => (
            &messages.reminder,
            vec!["OK".to_string()],
            Some(config.delay_options.clone()),
        ),
        Tier::Nagging => {
            let mut buttons = vec!["Update Now".to_string()];
            if messages.info_url.is_some() {
                buttons.push("More Info".to_string());
            }
            (&messages.nag, buttons, None)
        }
        Tier::Final => (
            &messages.final_warning,
            vec!["Update Now".to_string(), "Postpone".to_string()],
            None,
        ),
        Tier::ForcedEnforcement => (&messages.forced, vec!["OK".to_string()], None),
    };

    Some(DialogRequest {
        title: messages.title.clone(),
        body: render(body, config, state),
        buttons,
        timeout: config.dialog_timeout,
        delay_options,
        icon: messages.icon.clone(),
    })
}

/// Fill `{deferrals_remaining}`, `{max_deferrals}`, `{end_date}` and
/// `{contact}` in a message template.
pub fn render(template: &str, config: &PolicyConfig, state: &DeferralState) -> String {
    let end_date = config
        .end_date
        .map(format_local)
        .unwrap_or_else(|| "the deadline".to_string());
    template
        .replace(
            "{deferrals_remaining}",
            &config.deferrals_remaining(state.deferral_count).to_string(),
        )
        .replace("{max_deferrals}", &config.max_deferrals.to_string())
        .replace("{end_date}", &end_date)
        .replace("{contact}", &config.messages.support_contact)
}

fn reports_insufficient_space(output: &str) -> bool {
    let lower = output.to_ascii_lowercase();
    lower.contains("not enough free disk space")
        || lower.contains("not enough space")
        || lower.contains("insufficient space")
}

fn requests_shutdown(output: &str) -> bool {
    let lower = output.to_ascii_lowercase();
    lower.contains("halt") || lower.contains("shut down")
}
