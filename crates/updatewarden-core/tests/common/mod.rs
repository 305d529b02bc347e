//! In-memory collaborators for integration tests.
//!
//! One [`FakeMac`] implements every collaborator trait over shared state, so
//! a test can script the machine, run the orchestrator, and then inspect
//! what was shown, slept and installed. Sleeping advances the fake clock.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use updatewarden_core::error::PlatformError;
use updatewarden_core::platform::traits::*;
use updatewarden_core::platform::{Arch, Capabilities, OsVersion};
use updatewarden_core::storage::{Config, DeferralStateStore, MemoryKv};
use updatewarden_core::{Orchestrator, PolicyConfig};

pub const NOW: EpochSecs = 1_750_000_000;

#[derive(Default)]
pub struct Machine {
    pub now: Cell<EpochSecs>,
    pub pending: RefCell<PendingUpdates>,
    pub console_user: RefCell<Option<String>>,
    pub on_battery: Cell<bool>,
    /// When non-zero, AC power appears on this power check.
    pub ac_on_check: Cell<u32>,
    pub power_checks: Cell<u32>,
    pub idle_secs: Cell<u64>,
    pub assertions: RefCell<Vec<String>>,
    pub responses: RefCell<VecDeque<DialogResponse>>,
    pub dialogs: RefCell<Vec<DialogRequest>>,
    /// Dialogs stay open until their timeout before being answered.
    pub slow_user: Cell<bool>,
    pub install_report: RefCell<Option<InstallReport>>,
    pub installs: Cell<u32>,
    pub ui_opened: RefCell<Vec<String>>,
    pub ui_unavailable: Cell<bool>,
    pub restarts: Cell<u32>,
    pub shutdowns: Cell<u32>,
    pub free_bytes: Cell<u64>,
    pub encrypting: Cell<bool>,
    pub installer_activity: RefCell<VecDeque<bool>>,
    pub urls_opened: RefCell<Vec<String>>,
    pub sleeps: RefCell<Vec<u64>>,
}

/// Handle to a scripted machine. Cloning shares the state.
#[derive(Clone)]
pub struct FakeMac(pub Rc<Machine>);

impl FakeMac {
    /// A logged-in, active user on AC power with one restart-required update.
    pub fn new() -> Self {
        let machine = Machine::default();
        machine.now.set(NOW);
        *machine.pending.borrow_mut() = PendingUpdates {
            restart_required: vec!["macOS Sonoma 14.6.1-23G93".into()],
            no_restart: vec![],
        };
        *machine.console_user.borrow_mut() = Some("alice".into());
        machine.free_bytes.set(100 * 1_000_000_000);
        *machine.install_report.borrow_mut() = Some(InstallReport {
            exit_code: 0,
            output: "Downloading macOS Sonoma\nDone.".into(),
        });
        Self(Rc::new(machine))
    }

    pub fn respond(&self, response: DialogResponse) -> &Self {
        self.0.responses.borrow_mut().push_back(response);
        self
    }

    pub fn click(&self, button: usize, chosen_delay: Option<u64>) -> &Self {
        self.respond(DialogResponse::Clicked {
            button,
            chosen_delay,
        })
    }

    pub fn no_updates(&self) {
        *self.0.pending.borrow_mut() = PendingUpdates::default();
    }

    pub fn now(&self) -> EpochSecs {
        self.0.now.get()
    }

    pub fn dialog_count(&self) -> usize {
        self.0.dialogs.borrow().len()
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            updates: Box::new(self.clone()),
            runner: Box::new(self.clone()),
            dialogs: Box::new(self.clone()),
            power: Box::new(self.clone()),
            idle: Box::new(self.clone()),
            assertions: Box::new(self.clone()),
            restart: Box::new(self.clone()),
            session: Box::new(self.clone()),
            storage: Box::new(self.clone()),
            installer: Box::new(self.clone()),
            urls: Box::new(self.clone()),
            clock: Box::new(self.clone()),
            sleeper: Box::new(self.clone()),
        }
    }
}

impl UpdateChecker for FakeMac {
    fn list_pending(&self) -> Result<PendingUpdates, PlatformError> {
        Ok(self.0.pending.borrow().clone())
    }
}

impl UpdateRunner for FakeMac {
    fn install_all(&self) -> Result<InstallReport, PlatformError> {
        self.0.installs.set(self.0.installs.get() + 1);
        self.0
            .install_report
            .borrow()
            .clone()
            .ok_or_else(|| PlatformError::Spawn {
                command: "softwareupdate".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            })
    }

    fn open_update_ui(&self, target: &str) -> Result<(), PlatformError> {
        if self.0.ui_unavailable.get() {
            return Err(PlatformError::Dialog("open failed".into()));
        }
        self.0.ui_opened.borrow_mut().push(target.to_string());
        Ok(())
    }
}

impl DialogPresenter for FakeMac {
    fn show(&self, request: &DialogRequest) -> Result<DialogResponse, PlatformError> {
        self.0.dialogs.borrow_mut().push(request.clone());
        if self.0.slow_user.get() {
            self.0.now.set(self.0.now.get() + request.timeout as EpochSecs);
        }
        Ok(self
            .0
            .responses
            .borrow_mut()
            .pop_front()
            .unwrap_or(DialogResponse::Dismissed))
    }
}

impl PowerSource for FakeMac {
    fn is_on_battery(&self) -> Result<bool, PlatformError> {
        let check = self.0.power_checks.get() + 1;
        self.0.power_checks.set(check);
        match self.0.ac_on_check.get() {
            0 => Ok(self.0.on_battery.get()),
            ac_on => Ok(check < ac_on),
        }
    }
}

impl IdleTime for FakeMac {
    fn seconds(&self) -> Result<u64, PlatformError> {
        Ok(self.0.idle_secs.get())
    }
}

impl DisplayAssertions for FakeMac {
    fn active(&self) -> Result<Vec<String>, PlatformError> {
        Ok(self.0.assertions.borrow().clone())
    }
}

impl RestartTrigger for FakeMac {
    fn restart(&self) -> Result<(), PlatformError> {
        self.0.restarts.set(self.0.restarts.get() + 1);
        Ok(())
    }

    fn shutdown(&self) -> Result<(), PlatformError> {
        self.0.shutdowns.set(self.0.shutdowns.get() + 1);
        Ok(())
    }
}

impl SessionProbe for FakeMac {
    fn console_user(&self) -> Result<Option<String>, PlatformError> {
        Ok(self.0.console_user.borrow().clone())
    }
}

impl StorageProbe for FakeMac {
    fn free_bytes(&self) -> Result<u64, PlatformError> {
        Ok(self.0.free_bytes.get())
    }

    fn encryption_in_progress(&self) -> Result<bool, PlatformError> {
        Ok(self.0.encrypting.get())
    }
}

impl InstallerActivity for FakeMac {
    fn is_active(&self) -> Result<bool, PlatformError> {
        Ok(self
            .0
            .installer_activity
            .borrow_mut()
            .pop_front()
            .unwrap_or(false))
    }
}

impl UrlOpener for FakeMac {
    fn open(&self, url: &str) -> Result<(), PlatformError> {
        self.0.urls_opened.borrow_mut().push(url.to_string());
        Ok(())
    }
}

impl Clock for FakeMac {
    fn now(&self) -> EpochSecs {
        self.0.now.get()
    }
}

impl Sleeper for FakeMac {
    fn sleep(&self, secs: u64) {
        self.0.sleeps.borrow_mut().push(secs);
        self.0.now.set(self.0.now.get() + secs as EpochSecs);
    }
}

/// Intel Mac on Sonoma, so `auto` resolves to a command-line install.
pub fn intel_caps() -> Capabilities {
    Capabilities::resolve(OsVersion::new(14, 5, 0), Arch::Intel)
}

/// Apple Silicon on Sonoma, so `auto` resolves to the GUI hand-off.
pub fn apple_silicon_caps() -> Capabilities {
    Capabilities::resolve(OsVersion::new(14, 5, 0), Arch::AppleSilicon)
}

pub fn policy(caps: &Capabilities) -> PolicyConfig {
    PolicyConfig::from_config(&Config::default(), caps).expect("default config is valid")
}

pub fn orchestrator(mac: &FakeMac, config: PolicyConfig) -> Orchestrator<MemoryKv> {
    Orchestrator::new(
        config,
        mac.collaborators(),
        DeferralStateStore::new(MemoryKv::new()),
    )
}
