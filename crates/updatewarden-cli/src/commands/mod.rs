pub mod config;
pub mod jamf;
pub mod run;
pub mod simulate;
pub mod state;

use serde::Serialize;
use updatewarden_core::platform::macos;
use updatewarden_core::{
    Config, CoreError, DeferralStateStore, Orchestrator, PolicyConfig, SqliteKv,
};

/// Validate the file configuration against this machine's capabilities.
pub fn resolve_policy(config: &Config) -> Result<PolicyConfig, CoreError> {
    let caps = macos::detect_capabilities();
    Ok(PolicyConfig::from_config(config, &caps)?)
}

pub fn open_store() -> Result<DeferralStateStore<SqliteKv>, CoreError> {
    Ok(DeferralStateStore::new(SqliteKv::open()?))
}

/// Orchestrator wired to the real machine and the on-disk store.
pub fn orchestrator(policy: PolicyConfig) -> Result<Orchestrator<SqliteKv>, CoreError> {
    Ok(Orchestrator::new(policy, macos::collaborators(), open_store()?))
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CoreError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
