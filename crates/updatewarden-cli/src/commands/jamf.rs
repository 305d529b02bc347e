//! Jamf Pro passes script parameters positionally: the first three are
//! always the target mount point, computer name and console user, and
//! `$4` to `$11` are free for the policy. An empty parameter keeps the
//! configured value.

use clap::Args;
use tracing::debug;
use updatewarden_core::{Config, CoreError};

use super::run::execute;

/// Config keys filled from `$4` to `$11`, in order.
const PARAMETER_KEYS: [&str; 8] = [
    "policy.start_date",
    "policy.nag_date",
    "policy.end_date",
    "policy.max_deferrals",
    "policy.renotify_period",
    "policy.dialog_timeout",
    "messages.support_contact",
    "messages.info_url",
];

#[derive(Args, Debug)]
pub struct JamfArgs {
    /// Target volume mount point ($1)
    pub mount_point: String,
    /// Computer name ($2)
    pub computer_name: String,
    /// Console user at policy start ($3)
    pub username: String,
    /// Start date ($4)
    pub start_date: Option<String>,
    /// Nag date ($5)
    pub nag_date: Option<String>,
    /// End date ($6)
    pub end_date: Option<String>,
    /// Maximum deferrals ($7)
    pub max_deferrals: Option<String>,
    /// Renotify period in seconds ($8)
    pub renotify_period: Option<String>,
    /// Dialog timeout in seconds ($9)
    pub dialog_timeout: Option<String>,
    /// Support contact shown in dialogs ($10)
    pub support_contact: Option<String>,
    /// "More Info" URL ($11)
    pub info_url: Option<String>,
}

impl JamfArgs {
    fn parameters(&self) -> [Option<&str>; 8] {
        [
            self.start_date.as_deref(),
            self.nag_date.as_deref(),
            self.end_date.as_deref(),
            self.max_deferrals.as_deref(),
            self.renotify_period.as_deref(),
            self.dialog_timeout.as_deref(),
            self.support_contact.as_deref(),
            self.info_url.as_deref(),
        ]
    }

    /// Overlay non-empty parameters onto `config`.
    pub fn apply(&self, config: &mut Config) -> Result<(), CoreError> {
        for (key, value) in PARAMETER_KEYS.iter().zip(self.parameters()) {
            if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
                config.set(key, value)?;
            }
        }
        Ok(())
    }
}

pub fn run(args: JamfArgs) -> Result<(), CoreError> {
    debug!(
        mount_point = %args.mount_point,
        computer = %args.computer_name,
        user = %args.username,
        "invoked by Jamf"
    );
    let mut config = Config::load()?;
    args.apply(&mut config)?;
    execute(&config, false)
}
