//! Immutable, validated policy configuration.
//!
//! Built once per run from the raw [`Config`] and the machine's
//! [`Capabilities`]. Nothing downstream re-parses dates or re-resolves the
//! install method.

use std::collections::BTreeSet;

use serde::Serialize;

use super::dates::parse_optional;
use crate::error::ConfigError;
use crate::platform::{Capabilities, EpochSecs, InstallMethod};
use crate::storage::Config;

/// Dialog texts with the support contact and info URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DialogMessages {
    pub title: String,
    pub reminder: String,
    pub nag: String,
    pub final_warning: String,
    pub forced: String,
    pub failure: String,
    pub shutdown: String,
    pub support_contact: String,
    pub info_url: Option<String>,
    pub icon: Option<String>,
}

/// Validated configuration for one policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyConfig {
    pub policy_id: String,
    pub start_date: Option<EpochSecs>,
    pub nag_date: Option<EpochSecs>,
    pub end_date: Option<EpochSecs>,
    pub max_deferrals: u32,
    pub renotify_period: u64,
    pub dialog_timeout: u64,
    pub max_idle_time: u64,
    pub delay_options: Vec<u64>,
    pub assertions_to_ignore: BTreeSet<String>,
    /// Always `Cli` or `Gui` once resolved.
    pub install_method: InstallMethod,
    pub update_ui_target: String,
    pub unattended_install: bool,
    pub required_free_space_gb: u64,
    pub forced_update_grace: u64,
    pub forced_update_stale_after: u64,
    pub power_check_attempts: u32,
    pub power_check_interval: u64,
    pub installer_poll_interval: u64,
    pub shutdown_countdown: u64,
    pub messages: DialogMessages,
}

impl PolicyConfig {
    /// Parse dates, resolve the install method and validate everything.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] for unparseable dates, misordered
    /// milestones, an unknown install method or an invalid info URL.
    pub fn from_config(config: &Config, caps: &Capabilities) -> Result<Self, ConfigError> {
        let policy = &config.policy;
        let gate = &config.gate;
        let enforcement = &config.enforcement;
        let messages = &config.messages;

        let preferred: InstallMethod = enforcement
            .install_method
            .parse()
            .map_err(|message| ConfigError::InvalidValue {
                key: "enforcement.install_method".into(),
                message,
            })?;

        let resolved = Self {
            policy_id: policy.policy_id.trim().to_string(),
            start_date: parse_optional("start_date", policy.start_date.as_deref())?,
            nag_date: parse_optional("nag_date", policy.nag_date.as_deref())?,
            end_date: parse_optional("end_date", policy.end_date.as_deref())?,
            max_deferrals: policy.max_deferrals,
            renotify_period: policy.renotify_period,
            dialog_timeout: policy.dialog_timeout,
            max_idle_time: gate.max_idle_time,
            delay_options: policy.delay_options.clone(),
            assertions_to_ignore: gate.assertions_to_ignore.clone(),
            install_method: caps.install_method(preferred),
            update_ui_target: caps.update_ui_target.clone(),
            unattended_install: enforcement.unattended_install,
            required_free_space_gb: enforcement.required_free_space_gb,
            forced_update_grace: enforcement.forced_update_grace,
            forced_update_stale_after: enforcement.forced_update_stale_after,
            power_check_attempts: gate.power_check_attempts,
            power_check_interval: gate.power_check_interval,
            installer_poll_interval: enforcement.installer_poll_interval,
            shutdown_countdown: enforcement.shutdown_countdown,
            messages: DialogMessages {
                title: messages.title.clone(),
                reminder: messages.reminder.clone(),
                nag: messages.nag.clone(),
                final_warning: messages.final_warning.clone(),
                forced: messages.forced.clone(),
                failure: messages.failure.clone(),
                shutdown: messages.shutdown.clone(),
                support_contact: messages.support_contact.clone(),
                info_url: messages
                    .info_url
                    .as_deref()
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .map(str::to_string),
                icon: Some(caps.dialog_icon.clone()),
            },
        };
        resolved.validate()?;
        Ok(resolved)
    }

    /// Check every invariant the escalation policy relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.policy_id.is_empty() {
            return Err(ConfigError::MissingKey("policy.policy_id".into()));
        }
        self.validate_date_order()?;
        if self.delay_options.is_empty() {
            return Err(invalid("policy.delay_options", "at least one delay is required"));
        }
        if self.power_check_attempts == 0 {
            return Err(invalid("gate.power_check_attempts", "must be at least 1"));
        }
        if self.installer_poll_interval == 0 {
            return Err(invalid("enforcement.installer_poll_interval", "must be at least 1"));
        }
        if self.install_method == InstallMethod::Auto {
            return Err(invalid("enforcement.install_method", "was not resolved"));
        }
        if let Some(info_url) = &self.messages.info_url {
            url::Url::parse(info_url)
                .map_err(|e| invalid("messages.info_url", &e.to_string()))?;
        }
        Ok(())
    }

    /// Every present pair of milestones must be strictly increasing.
    pub fn validate_date_order(&self) -> Result<(), ConfigError> {
        let milestones = [
            ("start_date", self.start_date),
            ("nag_date", self.nag_date),
            ("end_date", self.end_date),
        ];
        for (i, (earlier, earlier_at)) in milestones.iter().enumerate() {
            for (later, later_at) in &milestones[i + 1..] {
                if let (Some(a), Some(b)) = (earlier_at, later_at) {
                    if a >= b {
                        return Err(ConfigError::DateOrder {
                            earlier: *earlier,
                            earlier_at: *a,
                            later: *later,
                            later_at: *b,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Postponements left before enforcement.
    pub fn deferrals_remaining(&self, deferral_count: u32) -> u32 {
        self.max_deferrals.saturating_sub(deferral_count)
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Arch, OsVersion};

    fn caps() -> Capabilities {
        Capabilities::resolve(OsVersion::new(14, 5, 0), Arch::Intel)
    }

    fn config_with_dates(start: &str, nag: &str, end: &str) -> Config {
        let mut config = Config::default();
        config.policy.start_date = Some(start.into());
        config.policy.nag_date = Some(nag.into());
        config.policy.end_date = Some(end.into());
        config
    }

    #[test]
    fn defaults_resolve_cleanly() {
        let policy = PolicyConfig::from_config(&Config::default(), &caps()).unwrap();
        assert_eq!(policy.max_deferrals, 3);
        assert_eq!(policy.install_method, InstallMethod::Cli);
        assert_eq!(policy.start_date, None);
        assert!(policy.messages.icon.is_some());
    }

    #[test]
    fn ordered_dates_parse() {
        let config = config_with_dates("100", "200", "300");
        let policy = PolicyConfig::from_config(&config, &caps()).unwrap();
        assert_eq!(policy.start_date, Some(100));
        assert_eq!(policy.nag_date, Some(200));
        assert_eq!(policy.end_date, Some(300));
    }

    #[test]
    fn misordered_dates_are_rejected() {
        let config = config_with_dates("100", "300", "200");
        let err = PolicyConfig::from_config(&config, &caps()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::DateOrder {
                earlier: "nag_date",
                later: "end_date",
                ..
            }
        ));
    }

    #[test]
    fn equal_dates_are_rejected() {
        let config = config_with_dates("100", "100", "300");
        assert!(matches!(
            PolicyConfig::from_config(&config, &caps()),
            Err(ConfigError::DateOrder { .. })
        ));
    }

    #[test]
    fn order_is_checked_across_missing_middle() {
        let mut config = Config::default();
        config.policy.start_date = Some("500".into());
        config.policy.end_date = Some("400".into());
        let err = PolicyConfig::from_config(&config, &caps()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::DateOrder {
                earlier: "start_date",
                later: "end_date",
                ..
            }
        ));
    }

    #[test]
    fn empty_delay_options_are_rejected() {
        let mut config = Config::default();
        config.policy.delay_options.clear();
        assert!(matches!(
            PolicyConfig::from_config(&config, &caps()),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "policy.delay_options"
        ));
    }

    #[test]
    fn bad_info_url_is_rejected() {
        let mut config = Config::default();
        config.messages.info_url = Some("not a url".into());
        assert!(PolicyConfig::from_config(&config, &caps()).is_err());

        config.messages.info_url = Some("https://support.example.com/macos".into());
        assert!(PolicyConfig::from_config(&config, &caps()).is_ok());

        config.messages.info_url = Some("   ".into());
        let policy = PolicyConfig::from_config(&config, &caps()).unwrap();
        assert_eq!(policy.messages.info_url, None);
    }

    #[test]
    fn unknown_install_method_is_rejected() {
        let mut config = Config::default();
        config.enforcement.install_method = "pkg".into();
        assert!(matches!(
            PolicyConfig::from_config(&config, &caps()),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn apple_silicon_auto_resolves_to_gui() {
        let caps = Capabilities::resolve(OsVersion::new(14, 5, 0), Arch::AppleSilicon);
        let policy = PolicyConfig::from_config(&Config::default(), &caps).unwrap();
        assert_eq!(policy.install_method, InstallMethod::Gui);
        assert!(policy.update_ui_target.starts_with("x-apple.systempreferences:"));
    }

    #[test]
    fn deferrals_remaining_saturates() {
        let policy = PolicyConfig::from_config(&Config::default(), &caps()).unwrap();
        assert_eq!(policy.deferrals_remaining(1), 2);
        assert_eq!(policy.deferrals_remaining(7), 0);
    }
}
