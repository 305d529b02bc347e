//! Eligibility gate.
//!
//! Ordered, short-circuiting checks that decide whether this run may
//! interrupt the user at all. A failed check is not an error: the run exits
//! cleanly and the next scheduled invocation tries again.
//!
//! Order:
//! 1. logged-in user (with the unattended install escape hatch)
//! 2. power source, only when the run commits to a command-line install
//! 3. idle time
//! 4. display-sleep assertions

use serde::Serialize;
use tracing::{debug, info};

use crate::error::PlatformError;
use crate::platform::{Collaborators, InstallMethod};
use crate::policy::PolicyConfig;

/// Holders that never block a dialog regardless of configuration.
const ALWAYS_IGNORED_HOLDERS: &[&str] = &["coreaudiod"];

/// Why a run stopped before showing anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    NoUserSession,
    OnBatteryPower { attempts: u32 },
    UserIdle { idle_secs: u64, max_idle_secs: u64 },
    DisplayAssertion { holders: Vec<String> },
    AlreadyRunning,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoUserSession => write!(f, "no user is logged in"),
            SkipReason::OnBatteryPower { attempts } => {
                write!(f, "still on battery power after {attempts} checks")
            }
            SkipReason::UserIdle {
                idle_secs,
                max_idle_secs,
            } => write!(f, "user idle for {idle_secs}s (limit {max_idle_secs}s)"),
            SkipReason::DisplayAssertion { holders } => {
                write!(f, "display sleep prevented by {}", holders.join(", "))
            }
            SkipReason::AlreadyRunning => write!(f, "another run holds the policy lock"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Show the dialog for the evaluated decision.
    Proceed,
    /// Nobody is logged in; install from the command line without asking.
    InstallUnattended,
    Exit(SkipReason),
}

/// Runs the checks against the live collaborators.
pub struct EligibilityGate<'a> {
    collab: &'a Collaborators,
    config: &'a PolicyConfig,
}

impl<'a> EligibilityGate<'a> {
    pub fn new(collab: &'a Collaborators, config: &'a PolicyConfig) -> Self {
        Self { collab, config }
    }

    /// Run every check in order.
    ///
    /// `cli_install` is true when the decision already commits to a
    /// command-line install, which is the only case that waits for AC power.
    pub fn check(&self, cli_install: bool) -> Result<GateOutcome, PlatformError> {
        let user = self.collab.session.console_user()?;
        if user.as_deref().map_or(true, str::is_empty) {
            return self.check_unattended();
        }

        if cli_install {
            if let Some(reason) = self.wait_for_ac_power()? {
                return Ok(GateOutcome::Exit(reason));
            }
        }

        let idle_secs = self.collab.idle.seconds()?;
        if idle_secs > self.config.max_idle_time {
            return Ok(self.exit(SkipReason::UserIdle {
                idle_secs,
                max_idle_secs: self.config.max_idle_time,
            }));
        }

        let holders = self.blocking_assertions()?;
        if !holders.is_empty() {
            return Ok(self.exit(SkipReason::DisplayAssertion { holders }));
        }

        debug!(user = ?user, idle_secs, "eligibility gate passed");
        Ok(GateOutcome::Proceed)
    }

    fn check_unattended(&self) -> Result<GateOutcome, PlatformError> {
        if !self.config.unattended_install || self.config.install_method != InstallMethod::Cli {
            return Ok(self.exit(SkipReason::NoUserSession));
        }
        if let Some(reason) = self.wait_for_ac_power()? {
            return Ok(GateOutcome::Exit(reason));
        }
        info!("no user logged in, installing unattended");
        Ok(GateOutcome::InstallUnattended)
    }

    /// Poll the power source, sleeping between attempts. Returns the skip
    /// reason when the machine never reached AC power.
    fn wait_for_ac_power(&self) -> Result<Option<SkipReason>, PlatformError> {
        let attempts = self.config.power_check_attempts.max(1);
        for attempt in 1..=attempts {
            if !self.collab.power.is_on_battery()? {
                debug!(attempt, "on AC power");
                return Ok(None);
            }
            if attempt < attempts {
                debug!(attempt, attempts, "on battery, waiting for AC power");
                self.collab.sleeper.sleep(self.config.power_check_interval);
            }
        }
        let reason = SkipReason::OnBatteryPower { attempts };
        info!(%reason, "skipping run");
        Ok(Some(reason))
    }

    fn blocking_assertions(&self) -> Result<Vec<String>, PlatformError> {
        let mut holders: Vec<String> = self
            .collab
            .assertions
            .active()?
            .into_iter()
            .filter(|holder| {
                !ALWAYS_IGNORED_HOLDERS.contains(&holder.as_str())
                    && !self.config.assertions_to_ignore.contains(holder)
            })
            .collect();
        holders.sort();
        holders.dedup();
        Ok(holders)
    }

    fn exit(&self, reason: SkipReason) -> GateOutcome {
        info!(%reason, "skipping run");
        GateOutcome::Exit(reason)
    }
}
