//! Thin macOS adapters for the collaborator traits.
//!
//! Each adapter runs one OS command and parses its output. The parsers are
//! plain functions so they can be tested on any host.

use std::process::{Command, Output};
use std::time::Instant;

use tracing::debug;

use super::capability::{Arch, Capabilities, OsVersion};
use super::traits::{
    Collaborators, DialogPresenter, DialogRequest, DialogResponse, DisplayAssertions, IdleTime,
    InstallReport, InstallerActivity, PendingUpdates, PowerSource, RestartTrigger, SessionProbe,
    StorageProbe, SystemClock, ThreadSleeper, UpdateChecker, UpdateRunner, UrlOpener,
};
use crate::error::PlatformError;

pub const JAMF_HELPER: &str =
    "/Library/Application Support/JAMF/bin/jamfHelper.app/Contents/MacOS/jamfHelper";

/// jamfHelper exit status when the window was closed without a button.
const JAMF_HELPER_QUIT: i32 = 239;

/// Console owners that do not represent an interactive user.
const NON_INTERACTIVE_USERS: &[&str] = &["root", "loginwindow", "_mbsetupuser"];

/// Audio output keeps display-sleep assertions open while anything plays.
const AUDIO_SUBSYSTEM: &str = "coreaudiod";

fn run(program: &str, args: &[&str]) -> Result<Output, PlatformError> {
    debug!(program, ?args, "running command");
    Command::new(program)
        .args(args)
        .output()
        .map_err(|source| PlatformError::Spawn {
            command: program.to_string(),
            source,
        })
}

fn stdout_of(program: &str, args: &[&str]) -> Result<String, PlatformError> {
    let output = run(program, args)?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

// ── Parsers ──────────────────────────────────────────────────────────

/// Parse `softwareupdate -l` output in both the Catalina+ (`* Label:`) and
/// the older (`   * Name` plus `[restart]`) formats.
pub fn parse_softwareupdate_list(output: &str) -> PendingUpdates {
    fn flush(entry: Option<(String, bool)>, pending: &mut PendingUpdates) {
        if let Some((label, restart)) = entry {
            if restart {
                pending.restart_required.push(label);
            } else {
                pending.no_restart.push(label);
            }
        }
    }

    let mut pending = PendingUpdates::default();
    let mut current: Option<(String, bool)> = None;

    for line in output.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("* ") {
            flush(current.take(), &mut pending);
            let label = rest.strip_prefix("Label:").unwrap_or(rest).trim();
            if !label.is_empty() {
                current = Some((label.to_string(), false));
            }
        } else if let Some((_, restart)) = current.as_mut() {
            let lower = trimmed.to_ascii_lowercase();
            if lower.contains("action: restart")
                || lower.contains("[restart]")
                || lower.contains("action: shut down")
            {
                *restart = true;
            }
        }
    }
    flush(current.take(), &mut pending);
    pending
}

/// `pmset -g batt` reports the active source on its first line.
pub fn parse_on_battery(output: &str) -> bool {
    output.contains("'Battery Power'")
}

/// Extract `HIDIdleTime` (nanoseconds) from `ioreg -c IOHIDSystem`.
pub fn parse_hid_idle_seconds(output: &str) -> Option<u64> {
    output
        .lines()
        .filter(|line| line.contains("\"HIDIdleTime\""))
        .find_map(|line| line.rsplit('=').next()?.trim().parse::<u64>().ok())
        .map(|ns| ns / 1_000_000_000)
}

/// Owners of display-sleep assertions from `pmset -g assertions`, excluding
/// the audio subsystem.
pub fn parse_display_assertions(output: &str) -> Vec<String> {
    let mut holders: Vec<String> = Vec::new();
    for line in output.lines() {
        if !(line.contains("PreventUserIdleDisplaySleep")
            || line.contains("NoDisplaySleepAssertion"))
        {
            continue;
        }
        let Some(start) = line.find('(') else {
            continue;
        };
        let Some(len) = line[start + 1..].find("):") else {
            continue;
        };
        let name = line[start + 1..start + 1 + len].trim();
        if name.is_empty() || name == AUDIO_SUBSYSTEM {
            continue;
        }
        if !holders.iter().any(|h| h == name) {
            holders.push(name.to_string());
        }
    }
    holders
}

/// Available KiB column of `df -k /`, returned in bytes.
pub fn parse_df_free_bytes(output: &str) -> Option<u64> {
    let line = output.lines().nth(1)?;
    let available_kib = line.split_whitespace().nth(3)?.parse::<u64>().ok()?;
    Some(available_kib * 1024)
}

pub fn parse_fdesetup_converting(output: &str) -> bool {
    output.contains("Encryption in progress") || output.contains("Decryption in progress")
}

/// `log show --style compact` prints a header line before matching entries.
pub fn parse_log_has_entries(output: &str) -> bool {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .any(|line| !line.starts_with("Timestamp") && !line.starts_with("Filtering"))
}

pub fn parse_console_user(output: &str) -> Option<String> {
    let user = output.trim();
    if user.is_empty() || NON_INTERACTIVE_USERS.contains(&user) {
        None
    } else {
        Some(user.to_string())
    }
}

/// Interpret jamfHelper's result. With delay options, stdout carries the
/// chosen delay with the button number appended (`"36001"`).
pub fn parse_jamf_helper_result(
    stdout: &str,
    status: Option<i32>,
    timed_out: bool,
) -> Result<DialogResponse, PlatformError> {
    if timed_out || status == Some(JAMF_HELPER_QUIT) {
        return Ok(DialogResponse::Dismissed);
    }

    let digits = stdout.trim();
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) && digits.len() >= 2 {
        let (delay, button) = digits.split_at(digits.len() - 1);
        let button: usize = button.parse().unwrap_or(1);
        return Ok(DialogResponse::Clicked {
            button: button.saturating_sub(1),
            chosen_delay: delay.parse::<u64>().ok(),
        });
    }

    match status {
        Some(0) => Ok(DialogResponse::Clicked {
            button: 0,
            chosen_delay: None,
        }),
        Some(2) => Ok(DialogResponse::Clicked {
            button: 1,
            chosen_delay: None,
        }),
        other => Err(PlatformError::Dialog(format!(
            "jamfHelper exited with {other:?}"
        ))),
    }
}

// ── Adapters ─────────────────────────────────────────────────────────

/// Shells out to the stock macOS tools.
pub struct MacOs;

impl UpdateChecker for MacOs {
    fn list_pending(&self) -> Result<PendingUpdates, PlatformError> {
        let output = run("softwareupdate", &["-l"])?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(parse_softwareupdate_list(&text))
    }
}

impl UpdateRunner for MacOs {
    fn install_all(&self) -> Result<InstallReport, PlatformError> {
        let output = run("softwareupdate", &["-i", "-a"])?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(InstallReport {
            exit_code: output.status.code().unwrap_or(-1),
            output: text,
        })
    }

    fn open_update_ui(&self, target: &str) -> Result<(), PlatformError> {
        let output = run("open", &[target])?;
        if output.status.success() {
            Ok(())
        } else {
            Err(PlatformError::UnexpectedOutput {
                command: format!("open {target}"),
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

impl PowerSource for MacOs {
    fn is_on_battery(&self) -> Result<bool, PlatformError> {
        Ok(parse_on_battery(&stdout_of("pmset", &["-g", "batt"])?))
    }
}

impl IdleTime for MacOs {
    fn seconds(&self) -> Result<u64, PlatformError> {
        let output = stdout_of("ioreg", &["-c", "IOHIDSystem"])?;
        parse_hid_idle_seconds(&output).ok_or_else(|| PlatformError::UnexpectedOutput {
            command: "ioreg -c IOHIDSystem".into(),
            message: "no HIDIdleTime entry".into(),
        })
    }
}

impl DisplayAssertions for MacOs {
    fn active(&self) -> Result<Vec<String>, PlatformError> {
        Ok(parse_display_assertions(&stdout_of(
            "pmset",
            &["-g", "assertions"],
        )?))
    }
}

impl RestartTrigger for MacOs {
    fn restart(&self) -> Result<(), PlatformError> {
        run("shutdown", &["-r", "now"]).map(|_| ())
    }

    fn shutdown(&self) -> Result<(), PlatformError> {
        run("shutdown", &["-h", "now"]).map(|_| ())
    }
}

impl SessionProbe for MacOs {
    fn console_user(&self) -> Result<Option<String>, PlatformError> {
        Ok(parse_console_user(&stdout_of(
            "stat",
            &["-f%Su", "/dev/console"],
        )?))
    }
}

impl StorageProbe for MacOs {
    fn free_bytes(&self) -> Result<u64, PlatformError> {
        let output = stdout_of("df", &["-k", "/"])?;
        parse_df_free_bytes(&output).ok_or_else(|| PlatformError::UnexpectedOutput {
            command: "df -k /".into(),
            message: output.trim().to_string(),
        })
    }

    fn encryption_in_progress(&self) -> Result<bool, PlatformError> {
        Ok(parse_fdesetup_converting(&stdout_of("fdesetup", &["status"])?))
    }
}

impl InstallerActivity for MacOs {
    fn is_active(&self) -> Result<bool, PlatformError> {
        let output = stdout_of(
            "log",
            &[
                "show",
                "--style",
                "compact",
                "--last",
                "1m",
                "--predicate",
                "process == \"softwareupdated\" AND eventMessage CONTAINS[c] \"install\"",
            ],
        )?;
        Ok(parse_log_has_entries(&output))
    }
}

impl UrlOpener for MacOs {
    fn open(&self, url: &str) -> Result<(), PlatformError> {
        open::that(url).map_err(|source| PlatformError::Spawn {
            command: format!("open {url}"),
            source,
        })
    }
}

/// Dialogs through Jamf's jamfHelper utility.
pub struct JamfHelperDialog {
    pub helper_path: String,
}

impl Default for JamfHelperDialog {
    fn default() -> Self {
        Self {
            helper_path: JAMF_HELPER.to_string(),
        }
    }
}

impl JamfHelperDialog {
    fn args(request: &DialogRequest) -> Vec<String> {
        let mut args = vec![
            "-windowType".to_string(),
            "utility".to_string(),
            "-title".to_string(),
            request.title.clone(),
            "-description".to_string(),
            request.body.clone(),
            "-timeout".to_string(),
            request.timeout.to_string(),
            "-defaultButton".to_string(),
            "1".to_string(),
        ];
        for (i, label) in request.buttons.iter().take(2).enumerate() {
            args.push(format!("-button{}", i + 1));
            args.push(label.clone());
        }
        if let Some(icon) = &request.icon {
            args.push("-icon".to_string());
            args.push(icon.clone());
        }
        if let Some(delays) = &request.delay_options {
            let joined = delays
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            args.push("-showDelayOptions".to_string());
            args.push(joined);
        }
        args
    }
}

impl DialogPresenter for JamfHelperDialog {
    fn show(&self, request: &DialogRequest) -> Result<DialogResponse, PlatformError> {
        let args = Self::args(request);
        let started = Instant::now();
        let output = Command::new(&self.helper_path)
            .args(&args)
            .output()
            .map_err(|source| PlatformError::Spawn {
                command: self.helper_path.clone(),
                source,
            })?;
        let timed_out = request.timeout > 0 && started.elapsed().as_secs() >= request.timeout;
        parse_jamf_helper_result(
            &String::from_utf8_lossy(&output.stdout),
            output.status.code(),
            timed_out,
        )
    }
}

/// `sw_vers -productVersion`, falling back to a modern release when it
/// cannot be read.
pub fn detect_os_version() -> OsVersion {
    stdout_of("sw_vers", &["-productVersion"])
        .ok()
        .and_then(|v| OsVersion::parse(&v))
        .unwrap_or(OsVersion::new(14, 0, 0))
}

pub fn detect_capabilities() -> Capabilities {
    Capabilities::resolve(detect_os_version(), Arch::current())
}

/// Wire every collaborator to the macOS adapters.
pub fn collaborators() -> Collaborators {
    Collaborators {
        updates: Box::new(MacOs),
        runner: Box::new(MacOs),
        dialogs: Box::new(JamfHelperDialog::default()),
        power: Box::new(MacOs),
        idle: Box::new(MacOs),
        assertions: Box::new(MacOs),
        restart: Box::new(MacOs),
        session: Box::new(MacOs),
        storage: Box::new(MacOs),
        installer: Box::new(MacOs),
        urls: Box::new(MacOs),
        clock: Box::new(SystemClock),
        sleeper: Box::new(ThreadSleeper),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softwareupdate_modern_format() {
        let output = "Software Update Tool\n\n\
Finding available software\n\
Software Update found the following new or updated software:\n\
* Label: macOS Sonoma 14.6.1-23G93\n\
\tTitle: macOS Sonoma 14.6.1, Version: 14.6.1, Size: 1474560KiB, Recommended: YES, Action: restart,\n\
* Label: Safari17.6SonomaAuto-17.6\n\
\tTitle: Safari, Version: 17.6, Size: 158632KiB, Recommended: YES, \n";
        let pending = parse_softwareupdate_list(output);
        assert_eq!(pending.restart_required, vec!["macOS Sonoma 14.6.1-23G93"]);
        assert_eq!(pending.no_restart, vec!["Safari17.6SonomaAuto-17.6"]);
    }

    #[test]
    fn softwareupdate_legacy_format() {
        let output = "Software Update found the following new or updated software:\n\
   * Security Update 2019-001-10.13.6\n\
\tSecurity Update 2019-001 (10.13.6), 1950722K [recommended] [restart]\n\
   * iTunesX-12.8.2\n\
\tiTunes (12.8.2), 273614K [recommended]\n";
        let pending = parse_softwareupdate_list(output);
        assert_eq!(pending.restart_required, vec!["Security Update 2019-001-10.13.6"]);
        assert_eq!(pending.no_restart, vec!["iTunesX-12.8.2"]);
    }

    #[test]
    fn softwareupdate_nothing_pending() {
        let output = "Software Update Tool\n\nFinding available software\nNo new software available.\n";
        assert!(parse_softwareupdate_list(output).is_empty());
    }

    #[test]
    fn power_source_parsing() {
        assert!(parse_on_battery("Now drawing from 'Battery Power'\n -InternalBattery-0 (id=1)\t85%;"));
        assert!(!parse_on_battery("Now drawing from 'AC Power'\n"));
    }

    #[test]
    fn hid_idle_time_in_seconds() {
        let output = "    | |   \"HIDIdleTime\" = 734000000000\n    | |   \"HIDParameters\" = {}";
        assert_eq!(parse_hid_idle_seconds(output), Some(734));
        assert_eq!(parse_hid_idle_seconds("nothing here"), None);
    }

    #[test]
    fn display_assertions_skip_audio_and_dedupe() {
        let output = "Assertion status system-wide:\n   PreventUserIdleDisplaySleep    1\n\
Listed by owning process:\n\
   pid 356(coreaudiod): [0x0000] 00:01:00 PreventUserIdleSystemSleep named: \"com.apple.audio.context\"\n\
   pid 356(coreaudiod): [0x0001] 00:01:00 PreventUserIdleDisplaySleep named: \"audio\"\n\
   pid 912(zoom.us): [0x0002] 00:12:10 PreventUserIdleDisplaySleep named: \"Meeting\"\n\
   pid 912(zoom.us): [0x0003] 00:12:10 NoDisplaySleepAssertion named: \"Meeting 2\"\n\
   pid 401(Google Chrome): [0x0004] 00:00:10 PreventUserIdleSystemSleep named: \"Download\"\n";
        assert_eq!(parse_display_assertions(output), vec!["zoom.us"]);
    }

    #[test]
    fn df_available_column() {
        let output = "Filesystem     1024-blocks      Used Available Capacity iused ifree %iused  Mounted on\n\
/dev/disk3s1s1   494384795  10371392 300000000     4%  404167 1000000000    0%   /\n";
        assert_eq!(parse_df_free_bytes(output), Some(300_000_000 * 1024));
        assert_eq!(parse_df_free_bytes("garbage"), None);
    }

    #[test]
    fn fdesetup_conversion_states() {
        assert!(parse_fdesetup_converting("FileVault is On.\nEncryption in progress: Percent completed = 12.3"));
        assert!(!parse_fdesetup_converting("FileVault is On."));
    }

    #[test]
    fn log_entries_detection() {
        assert!(!parse_log_has_entries("Filtering the log data using \"process == 1\"\nTimestamp               Ty Process[PID:TID]\n"));
        assert!(parse_log_has_entries("Timestamp               Ty Process[PID:TID]\n2024-08-01 10:00:00.1 Df softwareupdated[1:2] Installing\n"));
    }

    #[test]
    fn console_user_filters_system_accounts() {
        assert_eq!(parse_console_user("jdoe\n"), Some("jdoe".to_string()));
        assert_eq!(parse_console_user("root\n"), None);
        assert_eq!(parse_console_user("loginwindow"), None);
        assert_eq!(parse_console_user("_mbsetupuser"), None);
        assert_eq!(parse_console_user(""), None);
    }

    #[test]
    fn jamf_helper_delay_and_button() {
        assert_eq!(
            parse_jamf_helper_result("36001", Some(0), false).unwrap(),
            DialogResponse::Clicked { button: 0, chosen_delay: Some(3600) }
        );
        assert_eq!(
            parse_jamf_helper_result("01\n", Some(0), false).unwrap(),
            DialogResponse::Clicked { button: 0, chosen_delay: Some(0) }
        );
        assert_eq!(
            parse_jamf_helper_result("", Some(2), false).unwrap(),
            DialogResponse::Clicked { button: 1, chosen_delay: None }
        );
    }

    #[test]
    fn jamf_helper_quit_and_timeout_are_dismissals() {
        assert_eq!(
            parse_jamf_helper_result("", Some(JAMF_HELPER_QUIT), false).unwrap(),
            DialogResponse::Dismissed
        );
        assert_eq!(
            parse_jamf_helper_result("", Some(0), true).unwrap(),
            DialogResponse::Dismissed
        );
        assert!(parse_jamf_helper_result("", Some(1), false).is_err());
    }

    #[test]
    fn jamf_helper_args_include_delay_options() {
        let request = DialogRequest {
            title: "Update".into(),
            body: "Please update".into(),
            buttons: vec!["OK".into()],
            timeout: 60,
            delay_options: Some(vec![0, 3600]),
            icon: None,
        };
        let args = JamfHelperDialog::args(&request);
        let pos = args.iter().position(|a| a == "-showDelayOptions").unwrap();
        assert_eq!(args[pos + 1], "0, 3600");
        assert!(args.contains(&"-button1".to_string()));
        assert!(!args.contains(&"-button2".to_string()));
    }
}
