//! Collaborator contracts the core calls into.
//!
//! Every OS interaction goes through one of these traits. The macOS
//! adapters in [`super::macos`] implement them by shelling out; tests use
//! in-memory fakes.

use serde::{Deserialize, Serialize};

use crate::error::PlatformError;

/// Epoch seconds. All dates and deadlines in the core use this unit.
pub type EpochSecs = i64;

/// Updates reported by the OS as pending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUpdates {
    /// Labels of updates that require a restart.
    pub restart_required: Vec<String>,
    /// Labels of updates that install without a restart.
    pub no_restart: Vec<String>,
}

impl PendingUpdates {
    pub fn is_empty(&self) -> bool {
        self.restart_required.is_empty() && self.no_restart.is_empty()
    }

    pub fn needs_restart(&self) -> bool {
        !self.restart_required.is_empty()
    }

    pub fn count(&self) -> usize {
        self.restart_required.len() + self.no_restart.len()
    }
}

/// Result of a blocking installer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub exit_code: i32,
    /// Combined stdout/stderr, inspected for space and halt signals.
    pub output: String,
}

/// A dialog to show to the logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DialogRequest {
    pub title: String,
    pub body: String,
    /// Button labels, left to right in index order.
    pub buttons: Vec<String>,
    /// Seconds before the dialog gives up waiting.
    pub timeout: u64,
    /// Delay choices offered in a pop-up, when present.
    pub delay_options: Option<Vec<u64>>,
    pub icon: Option<String>,
}

/// What came back from a dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DialogResponse {
    /// The user explicitly clicked a button.
    Clicked {
        button: usize,
        chosen_delay: Option<u64>,
    },
    /// Timed out or force-quit without an explicit answer.
    Dismissed,
}

/// How the machine goes down after an install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartAction {
    None,
    Restart,
    Shutdown,
}

pub trait UpdateChecker {
    /// List the updates the OS currently offers.
    fn list_pending(&self) -> Result<PendingUpdates, PlatformError>;
}

pub trait UpdateRunner {
    /// Install every pending update. Blocks until the installer exits.
    fn install_all(&self) -> Result<InstallReport, PlatformError>;

    /// Hand control to the OS update UI.
    fn open_update_ui(&self, target: &str) -> Result<(), PlatformError>;
}

pub trait DialogPresenter {
    /// Show a dialog and block until it is answered, dismissed or times out.
    fn show(&self, request: &DialogRequest) -> Result<DialogResponse, PlatformError>;
}

pub trait PowerSource {
    fn is_on_battery(&self) -> Result<bool, PlatformError>;
}

pub trait IdleTime {
    /// Seconds since the last keyboard or mouse input.
    fn seconds(&self) -> Result<u64, PlatformError>;
}

pub trait DisplayAssertions {
    /// Names of processes currently holding display-sleep assertions.
    fn active(&self) -> Result<Vec<String>, PlatformError>;
}

pub trait RestartTrigger {
    fn restart(&self) -> Result<(), PlatformError>;
    fn shutdown(&self) -> Result<(), PlatformError>;
}

pub trait SessionProbe {
    /// Short name of the user owning the console, if any.
    fn console_user(&self) -> Result<Option<String>, PlatformError>;
}

pub trait StorageProbe {
    /// Free bytes on the boot volume.
    fn free_bytes(&self) -> Result<u64, PlatformError>;

    /// Whether FileVault is currently encrypting or decrypting.
    fn encryption_in_progress(&self) -> Result<bool, PlatformError>;
}

pub trait InstallerActivity {
    /// Whether the OS installer has logged activity recently.
    fn is_active(&self) -> Result<bool, PlatformError>;
}

pub trait UrlOpener {
    fn open(&self, url: &str) -> Result<(), PlatformError>;
}

/// Time provider, injectable for testing.
pub trait Clock {
    fn now(&self) -> EpochSecs;
}

/// Blocking sleep used by polling loops, injectable for testing.
pub trait Sleeper {
    fn sleep(&self, secs: u64);
}

/// System clock implementation
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> EpochSecs {
        chrono::Utc::now().timestamp()
    }
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, secs: u64) {
        std::thread::sleep(std::time::Duration::from_secs(secs));
    }
}

/// The full set of collaborators one invocation needs.
pub struct Collaborators {
    pub updates: Box<dyn UpdateChecker>,
    pub runner: Box<dyn UpdateRunner>,
    pub dialogs: Box<dyn DialogPresenter>,
    pub power: Box<dyn PowerSource>,
    pub idle: Box<dyn IdleTime>,
    pub assertions: Box<dyn DisplayAssertions>,
    pub restart: Box<dyn RestartTrigger>,
    pub session: Box<dyn SessionProbe>,
    pub storage: Box<dyn StorageProbe>,
    pub installer: Box<dyn InstallerActivity>,
    pub urls: Box<dyn UrlOpener>,
    pub clock: Box<dyn Clock>,
    pub sleeper: Box<dyn Sleeper>,
}
