//! TOML-based policy configuration.
//!
//! Stores the administrator's settings:
//! - Milestone dates and deferral thresholds
//! - Eligibility gate tuning (idle time, ignored assertions, power polling)
//! - Enforcement behaviour (install method, free space, forced-update timing)
//! - Dialog texts, support contact and info URL
//!
//! Configuration is stored at `<data_dir>/config.toml`. Values here are raw;
//! [`crate::policy::PolicyConfig::from_config`] validates them and converts
//! dates to epoch seconds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::ConfigError;

/// Milestones and deferral thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySection {
    #[serde(default = "default_policy_id")]
    pub policy_id: String,
    /// Reminders start at this date. Absent means "already started".
    #[serde(default)]
    pub start_date: Option<String>,
    /// After this date the user can no longer pick their own delay.
    #[serde(default)]
    pub nag_date: Option<String>,
    /// After this date deferrals are limited to one per day.
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default = "default_max_deferrals")]
    pub max_deferrals: u32,
    #[serde(default = "default_renotify_period")]
    pub renotify_period: u64,
    #[serde(default = "default_dialog_timeout")]
    pub dialog_timeout: u64,
    #[serde(default = "default_delay_options")]
    pub delay_options: Vec<u64>,
}

/// Eligibility gate tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSection {
    #[serde(default = "default_max_idle_time")]
    pub max_idle_time: u64,
    /// Processes whose display-sleep assertions never block a dialog.
    #[serde(default)]
    pub assertions_to_ignore: BTreeSet<String>,
    #[serde(default = "default_power_check_attempts")]
    pub power_check_attempts: u32,
    #[serde(default = "default_power_check_interval")]
    pub power_check_interval: u64,
}

/// Enforcement behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementSection {
    /// `auto`, `cli` or `gui`.
    #[serde(default = "default_install_method")]
    pub install_method: String,
    /// Install without asking when nobody is logged in.
    #[serde(default)]
    pub unattended_install: bool,
    #[serde(default = "default_required_free_space_gb")]
    pub required_free_space_gb: u64,
    #[serde(default = "default_forced_update_grace")]
    pub forced_update_grace: u64,
    #[serde(default = "default_forced_update_stale_after")]
    pub forced_update_stale_after: u64,
    #[serde(default = "default_installer_poll_interval")]
    pub installer_poll_interval: u64,
    #[serde(default = "default_shutdown_countdown")]
    pub shutdown_countdown: u64,
}

/// Dialog texts.
///
/// Bodies may use `{deferrals_remaining}`, `{max_deferrals}`, `{end_date}`
/// and `{contact}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesSection {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_reminder_body")]
    pub reminder: String,
    #[serde(default = "default_nag_body")]
    pub nag: String,
    #[serde(default = "default_final_body")]
    pub final_warning: String,
    #[serde(default = "default_forced_body")]
    pub forced: String,
    #[serde(default = "default_failure_body")]
    pub failure: String,
    #[serde(default = "default_shutdown_body")]
    pub shutdown: String,
    #[serde(default = "default_support_contact")]
    pub support_contact: String,
    /// Opened by the "More Info" button while nagging.
    #[serde(default)]
    pub info_url: Option<String>,
}

/// Application configuration.
///
/// Serialized to/from TOML at `<data_dir>/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub policy: PolicySection,
    #[serde(default)]
    pub gate: GateSection,
    #[serde(default)]
    pub enforcement: EnforcementSection,
    #[serde(default)]
    pub messages: MessagesSection,
}

// Default functions
fn default_policy_id() -> String {
    "com.updatewarden.osupdate".into()
}
fn default_max_deferrals() -> u32 {
    3
}
fn default_renotify_period() -> u64 {
    3600
}
fn default_dialog_timeout() -> u64 {
    5400
}
fn default_delay_options() -> Vec<u64> {
    vec![0, 3600, 14400, 86400]
}
fn default_max_idle_time() -> u64 {
    600
}
fn default_power_check_attempts() -> u32 {
    5
}
fn default_power_check_interval() -> u64 {
    60
}
fn default_install_method() -> String {
    "auto".into()
}
fn default_required_free_space_gb() -> u64 {
    20
}
fn default_forced_update_grace() -> u64 {
    3600
}
fn default_forced_update_stale_after() -> u64 {
    7 * 86400
}
fn default_installer_poll_interval() -> u64 {
    15
}
fn default_shutdown_countdown() -> u64 {
    60
}
fn default_title() -> String {
    "Software Update Required".into()
}
fn default_reminder_body() -> String {
    indoc::indoc! {"
        A required macOS update is available for your Mac.

        Choose when you would like to be reminded, or pick \"Now\" to start the update right away.
    "}
    .trim_end()
    .to_string()
}
fn default_nag_body() -> String {
    indoc::indoc! {"
        A required macOS update is waiting to be installed.

        The update must be installed by {end_date}. Please start it as soon as possible.
    "}
    .trim_end()
    .to_string()
}
fn default_final_body() -> String {
    indoc::indoc! {"
        The deadline for this required macOS update has passed.

        You can postpone {deferrals_remaining} more time(s), once per day. After that the update will start automatically.
    "}
    .trim_end()
    .to_string()
}
fn default_forced_body() -> String {
    indoc::indoc! {"
        All postponements for this required macOS update have been used.

        The update is starting now. Save your work; your Mac will restart when it finishes.
    "}
    .trim_end()
    .to_string()
}
fn default_failure_body() -> String {
    indoc::indoc! {"
        The macOS update could not be installed.

        Please contact {contact} for help.
    "}
    .trim_end()
    .to_string()
}
fn default_shutdown_body() -> String {
    "Your Mac will shut down shortly to finish installing the update. Save your work now.".into()
}
fn default_support_contact() -> String {
    "your IT department".into()
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            policy_id: default_policy_id(),
            start_date: None,
            nag_date: None,
            end_date: None,
            max_deferrals: default_max_deferrals(),
            renotify_period: default_renotify_period(),
            dialog_timeout: default_dialog_timeout(),
            delay_options: default_delay_options(),
        }
    }
}

impl Default for GateSection {
    fn default() -> Self {
        Self {
            max_idle_time: default_max_idle_time(),
            assertions_to_ignore: BTreeSet::new(),
            power_check_attempts: default_power_check_attempts(),
            power_check_interval: default_power_check_interval(),
        }
    }
}

impl Default for EnforcementSection {
    fn default() -> Self {
        Self {
            install_method: default_install_method(),
            unattended_install: false,
            required_free_space_gb: default_required_free_space_gb(),
            forced_update_grace: default_forced_update_grace(),
            forced_update_stale_after: default_forced_update_stale_after(),
            installer_poll_interval: default_installer_poll_interval(),
            shutdown_countdown: default_shutdown_countdown(),
        }
    }
}

impl Default for MessagesSection {
    fn default() -> Self {
        Self {
            title: default_title(),
            reminder: default_reminder_body(),
            nag: default_nag_body(),
            final_warning: default_final_body(),
            forced: default_forced_body(),
            failure: default_failure_body(),
            shutdown: default_shutdown_body(),
            support_contact: default_support_contact(),
            info_url: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            policy: PolicySection::default(),
            gate: GateSection::default(),
            enforcement: EnforcementSection::default(),
            messages: MessagesSection::default(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        let n = value
                            .parse::<u64>()
                            .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?;
                        serde_json::Value::Number(n.into())
                    }
                    serde_json::Value::Array(_) => parse_list(value).map_err(invalid)?,
                    serde_json::Value::Object(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    // Unset optional strings and plain strings.
                    _ if value.is_empty() => serde_json::Value::Null,
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Default location, `<data_dir>/config.toml`.
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the default location, writing defaults on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from `path`, writing defaults there if the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    /// Persist to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => Some(String::new()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving. Returns error if key is
    /// unknown or the value has the wrong type.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}

/// Lists on the command line are comma separated: `0,3600,86400` or
/// `zoom.us, Keynote`.
fn parse_list(value: &str) -> Result<serde_json::Value, String> {
    let trimmed = value.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| e.to_string());
    }
    let items: Vec<&str> = trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if !items.is_empty() && items.iter().all(|s| s.parse::<u64>().is_ok()) {
        let numbers = items
            .iter()
            .filter_map(|s| s.parse::<u64>().ok())
            .map(serde_json::Value::from)
            .collect();
        Ok(serde_json::Value::Array(numbers))
    } else {
        Ok(serde_json::Value::Array(
            items.into_iter().map(serde_json::Value::from).collect(),
        ))
    }
}
