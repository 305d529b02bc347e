mod config;
pub mod kv;
pub mod lock;
pub mod state_store;

pub use config::{Config, EnforcementSection, GateSection, MessagesSection, PolicySection};
pub use kv::{MemoryKv, PersistentKv, SqliteKv};
pub use lock::PolicyLock;
pub use state_store::{DeferralState, DeferralStateStore};

use std::path::PathBuf;

use crate::error::ConfigError;

const SYSTEM_DATA_DIR: &str = "/Library/Application Support/updatewarden";

/// Directory holding `config.toml`, `state.db` and lock files.
///
/// Resolution order:
/// 1. `UPDATEWARDEN_DATA_DIR` when set.
/// 2. `/Library/Application Support/updatewarden` when running as root on
///    macOS (the normal case under a management agent).
/// 3. `~/.config/updatewarden[-dev]/`, with `-dev` when
///    `UPDATEWARDEN_ENV=dev`.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = resolve_data_dir(
        std::env::var_os("UPDATEWARDEN_DATA_DIR").map(PathBuf::from),
        cfg!(target_os = "macos") && running_as_root(),
        dirs::home_dir(),
        std::env::var("UPDATEWARDEN_ENV").ok().as_deref(),
    );

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}

fn resolve_data_dir(
    explicit: Option<PathBuf>,
    system: bool,
    home: Option<PathBuf>,
    env: Option<&str>,
) -> PathBuf {
    if let Some(explicit) = explicit {
        return explicit;
    }
    if system {
        return PathBuf::from(SYSTEM_DATA_DIR);
    }
    let base_dir = home.unwrap_or_else(|| PathBuf::from(".")).join(".config");
    if env == Some("dev") {
        base_dir.join("updatewarden-dev")
    } else {
        base_dir.join("updatewarden")
    }
}

/// Effective uid, so a root agent with `HOME` pointing elsewhere still
/// uses the system directory.
#[cfg(unix)]
fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    false
}
