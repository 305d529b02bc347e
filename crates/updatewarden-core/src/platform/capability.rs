//! OS capability table.
//!
//! Which update UI to open, which icon to show and whether a command-line
//! install is viable all depend on the OS release and CPU architecture.
//! They are resolved once per run from a small table keyed by normalized
//! OS version.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Normalized macOS version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OsVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl OsVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Parse `"14"`, `"11.2"` or `"10.15.7"`. Missing components are zero.
    ///
    /// # Examples
    /// ```
    /// use updatewarden_core::platform::OsVersion;
    /// assert_eq!(OsVersion::parse("10.15.7"), Some(OsVersion::new(10, 15, 7)));
    /// assert_eq!(OsVersion::parse("14"), Some(OsVersion::new(14, 0, 0)));
    /// assert_eq!(OsVersion::parse("sonoma"), None);
    /// ```
    pub fn parse(version: &str) -> Option<Self> {
        let mut parts = version.trim().split('.');
        let major = parts.next()?.parse::<u32>().ok()?;
        let minor = match parts.next() {
            Some(p) => p.parse::<u32>().ok()?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => p.parse::<u32>().ok()?,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self { major, minor, patch })
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// CPU architecture of the managed machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    Intel,
    AppleSilicon,
}

impl Arch {
    /// Architecture of the running process.
    pub fn current() -> Self {
        if std::env::consts::ARCH == "aarch64" {
            Arch::AppleSilicon
        } else {
            Arch::Intel
        }
    }
}

/// How the update gets installed when enforcement kicks in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMethod {
    /// Pick from the capability table.
    #[default]
    Auto,
    /// Run the command-line installer and wait for it.
    Cli,
    /// Hand off to the OS update UI.
    Gui,
}

impl std::str::FromStr for InstallMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(InstallMethod::Auto),
            "cli" => Ok(InstallMethod::Cli),
            "gui" => Ok(InstallMethod::Gui),
            other => Err(format!("unknown install method '{other}' (expected auto, cli or gui)")),
        }
    }
}

struct CapabilityRow {
    /// First version (inclusive) this row applies to.
    since: OsVersion,
    update_ui: &'static str,
    icon: &'static str,
    cli_on_apple_silicon: bool,
}

const APP_STORE_ICON: &str = "/Applications/App Store.app/Contents/Resources/AppIcon.icns";
const PREFS_ICON: &str =
    "/System/Library/PreferencePanes/SoftwareUpdate.prefPane/Contents/Resources/SoftwareUpdate.icns";
const SETTINGS_ICON: &str =
    "/System/Applications/System Settings.app/Contents/Resources/AppIcon.icns";

// Newest first; the first row whose `since` is <= the running version wins.
const CAPABILITY_TABLE: &[CapabilityRow] = &[
    CapabilityRow {
        since: OsVersion::new(13, 0, 0),
        update_ui: "x-apple.systempreferences:com.apple.Software-Update-Settings.extension",
        icon: SETTINGS_ICON,
        cli_on_apple_silicon: false,
    },
    CapabilityRow {
        since: OsVersion::new(11, 0, 0),
        update_ui: "/System/Library/PreferencePanes/SoftwareUpdate.prefPane",
        icon: PREFS_ICON,
        cli_on_apple_silicon: false,
    },
    CapabilityRow {
        since: OsVersion::new(10, 14, 0),
        update_ui: "/System/Library/PreferencePanes/SoftwareUpdate.prefPane",
        icon: PREFS_ICON,
        cli_on_apple_silicon: true,
    },
    CapabilityRow {
        since: OsVersion::new(0, 0, 0),
        update_ui: "macappstore://showUpdatesPage",
        icon: APP_STORE_ICON,
        cli_on_apple_silicon: true,
    },
];

/// Capabilities resolved for one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub version: OsVersion,
    pub arch: Arch,
    /// Argument passed to `open` to show the OS update UI.
    pub update_ui_target: String,
    pub dialog_icon: String,
    /// Whether a command-line install can run unattended on this machine.
    pub cli_install_viable: bool,
}

impl Capabilities {
    pub fn resolve(version: OsVersion, arch: Arch) -> Self {
        let row = CAPABILITY_TABLE
            .iter()
            .find(|row| row.since <= version)
            .unwrap_or(&CAPABILITY_TABLE[CAPABILITY_TABLE.len() - 1]);

        let cli_install_viable = match arch {
            Arch::Intel => true,
            Arch::AppleSilicon => row.cli_on_apple_silicon,
        };

        Self {
            version,
            arch,
            update_ui_target: row.update_ui.to_string(),
            dialog_icon: row.icon.to_string(),
            cli_install_viable,
        }
    }

    /// Concrete install method for a configured preference.
    pub fn install_method(&self, preferred: InstallMethod) -> InstallMethod {
        match preferred {
            InstallMethod::Auto if self.cli_install_viable => InstallMethod::Cli,
            InstallMethod::Auto => InstallMethod::Gui,
            explicit => explicit,
        }
    }
}
