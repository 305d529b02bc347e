//! OS collaborators: the trait contracts, the capability table and the
//! macOS adapters behind them.

pub mod capability;
pub mod macos;
pub mod traits;

pub use capability::{Arch, Capabilities, InstallMethod, OsVersion};
pub use traits::{
    Clock, Collaborators, DialogPresenter, DialogRequest, DialogResponse, DisplayAssertions,
    EpochSecs, IdleTime, InstallReport, InstallerActivity, PendingUpdates, PowerSource,
    RestartAction, RestartTrigger, SessionProbe, Sleeper, StorageProbe, SystemClock,
    ThreadSleeper, UpdateChecker, UpdateRunner, UrlOpener,
};
