//! Core error types for updatewarden-core.
//!
//! The hierarchy mirrors the run taxonomy: configuration problems are fatal
//! and reported before anything is touched, execution failures are shown to
//! the user and leave the deferral state alone, and storage or platform
//! failures have no safe degraded mode.
//!
//! Environmental preconditions (battery power, idle user, display-sleep
//! assertions) are not errors; see [`crate::gate::SkipReason`].

use std::path::PathBuf;
use thiserror::Error;

/// Exit code for a clean run, including every "try again later" outcome.
pub const EXIT_OK: i32 = 0;
/// Exit code for fatal store/platform failures.
pub const EXIT_FATAL: i32 = 1;
/// Exit code for configuration errors.
pub const EXIT_CONFIG: i32 = 2;
/// Exit code when the installer returned a failure.
pub const EXIT_INSTALL_FAILED: i32 = 10;
/// Exit code when the boot volume lacks free space for the update.
pub const EXIT_INSUFFICIENT_SPACE: i32 = 11;
/// Exit code when FileVault is encrypting or decrypting the boot volume.
pub const EXIT_ENCRYPTION_IN_PROGRESS: i32 = 12;
/// Exit code when the OS update UI could not be opened.
pub const EXIT_UPDATE_UI_UNAVAILABLE: i32 = 13;

/// Core error type for updatewarden-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Deferral state persistence errors
    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    /// The chosen action ran and failed
    #[error("Execution failed: {0}")]
    Execution(#[from] ExecutionError),

    /// An OS collaborator could not be invoked at all
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Process exit code reported to the calling management system.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::Config(_) => EXIT_CONFIG,
            CoreError::Execution(e) => e.exit_code(),
            CoreError::Store(_)
            | CoreError::Platform(_)
            | CoreError::Io(_)
            | CoreError::Json(_) => EXIT_FATAL,
        }
    }
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Missing required configuration key
    #[error("Missing required configuration key: {0}")]
    MissingKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    /// Unknown dot-path key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Milestone dates are not strictly increasing
    #[error("Invalid date ordering: {earlier} ({earlier_at}) must be before {later} ({later_at})")]
    DateOrder {
        earlier: &'static str,
        earlier_at: i64,
        later: &'static str,
        later_at: i64,
    },

    /// A date string could not be parsed
    #[error("Cannot parse {field} '{value}' as a date")]
    InvalidDate { field: String, value: String },

    /// Could not determine where to keep configuration and state
    #[error("Cannot determine data directory: {0}")]
    DataDir(String),
}

/// Deferral state store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open the state database
    #[error("Failed to open state store at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database is locked
    #[error("State store is locked")]
    Locked,

    /// Lock file could not be created or locked
    #[error("Failed to lock {path}: {source}")]
    LockFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of the chosen action. The deferral state is left untouched so
/// the next scheduled run retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// Installer exited non-zero
    #[error("Installer exited with status {exit_code}")]
    InstallFailed { exit_code: i32 },

    /// Not enough free space on the boot volume
    #[error("Insufficient disk space: {available_gb} GB free, {required_gb} GB required")]
    InsufficientSpace { available_gb: u64, required_gb: u64 },

    /// FileVault is converting the boot volume
    #[error("FileVault encryption or decryption is in progress")]
    EncryptionInProgress,

    /// The OS update UI could not be opened
    #[error("Could not open the software update UI: {0}")]
    UpdateUiUnavailable(String),
}

impl ExecutionError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecutionError::InstallFailed { .. } => EXIT_INSTALL_FAILED,
            ExecutionError::InsufficientSpace { .. } => EXIT_INSUFFICIENT_SPACE,
            ExecutionError::EncryptionInProgress => EXIT_ENCRYPTION_IN_PROGRESS,
            ExecutionError::UpdateUiUnavailable(_) => EXIT_UPDATE_UI_UNAVAILABLE,
        }
    }
}

/// An external collaborator could not be invoked.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Command could not be spawned
    #[error("Failed to run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Command output could not be understood
    #[error("Unexpected output from '{command}': {message}")]
    UnexpectedOutput { command: String, message: String },

    /// Dialog helper failed
    #[error("Dialog failed: {0}")]
    Dialog(String),
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg)
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                StoreError::Locked
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_taxonomy() {
        let config: CoreError = ConfigError::MissingKey("policy.policy_id".into()).into();
        assert_eq!(config.exit_code(), EXIT_CONFIG);

        let install: CoreError = ExecutionError::InstallFailed { exit_code: 1 }.into();
        assert_eq!(install.exit_code(), EXIT_INSTALL_FAILED);

        let space: CoreError = ExecutionError::InsufficientSpace {
            available_gb: 3,
            required_gb: 20,
        }
        .into();
        assert_eq!(space.exit_code(), EXIT_INSUFFICIENT_SPACE);

        let store: CoreError = StoreError::Locked.into();
        assert_eq!(store.exit_code(), EXIT_FATAL);
    }

    #[test]
    fn date_order_message_names_both_fields() {
        let err = ConfigError::DateOrder {
            earlier: "nag_date",
            earlier_at: 200,
            later: "end_date",
            later_at: 100,
        };
        let msg = err.to_string();
        assert!(msg.contains("nag_date"));
        assert!(msg.contains("end_date"));
    }
}
