//! # updatewarden Core Library
//!
//! This library provides the core logic for `updatewarden`, a tool run by a
//! device-management agent to notify users about pending macOS updates, let
//! them postpone within limits, and eventually enforce the install.
//!
//! ## Architecture
//!
//! - **Policy**: immutable configuration plus a pure escalation state machine
//!   (dormant, reminder, nagging, final, forced enforcement)
//! - **Storage**: SQLite-backed deferral state keyed by policy identifier,
//!   TOML configuration and a per-policy run lock
//! - **Gate**: environmental preconditions (user session, power, idle time,
//!   display-sleep assertions)
//! - **Executor**: dialogs, command-line installs and the GUI hand-off
//! - **Platform**: collaborator traits, the OS capability table and thin
//!   macOS adapters
//!
//! ## Key Components
//!
//! - [`Orchestrator`]: runs one invocation end to end
//! - [`EscalationPolicy`]: tier, decision and response rules
//! - [`DeferralStateStore`]: deferral persistence
//! - [`Config`]: administrator configuration

pub mod error;
pub mod events;
pub mod executor;
pub mod gate;
pub mod orchestrator;
pub mod platform;
pub mod policy;
pub mod storage;

pub use error::{ConfigError, CoreError, ExecutionError, PlatformError, StoreError};
pub use events::{Event, RunOutcome, RunReport};
pub use executor::ActionExecutor;
pub use gate::{EligibilityGate, GateOutcome, SkipReason};
pub use orchestrator::Orchestrator;
pub use platform::{Capabilities, Collaborators, InstallMethod, OsVersion};
pub use policy::{Decision, EscalationPolicy, Evaluation, PolicyConfig, Tier};
pub use storage::{Config, DeferralState, DeferralStateStore, MemoryKv, PersistentKv, SqliteKv};
