//! Lockdown policy: the externally supplied configuration data the
//! enforcement and monitoring code runs against. Everything here has a
//! built-in default and can be overridden from a JSON file.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LockdownPolicy {
    /// Global shortcut combinations intercepted while locked.
    pub blocked_shortcuts: Vec<String>,
    /// Single keys intercepted at the surface level (escape, function keys).
    pub blocked_keys: Vec<String>,
    /// Process names that trigger `blacklisted_process` and a kill attempt.
    pub process_blacklist: Vec<String>,
    /// Hypervisor guest-agent process names.
    pub vm_indicator_processes: Vec<String>,
    /// Substrings of manufacturer/model strings that mark a VM.
    pub vm_identity_markers: Vec<String>,
    /// Foreground process names that never count as an escape.
    pub allowed_foreground: Vec<String>,
    /// Process name -> display name used in `app_opened` descriptions.
    pub friendly_names: HashMap<String, String>,
    /// Cooldown for suppressing identical repeated signals.
    pub classifier_cooldown_ms: u64,
    /// Upper bound on any single OS probe.
    pub probe_timeout_ms: u64,
    pub focus_tick_ms: u64,
    pub process_scan_ms: u64,
    pub foreground_scan_ms: u64,
    /// Lock durations in seconds per penalty level; the last entry caps.
    pub penalty_lock_seconds: Vec<u64>,
}

impl Default for LockdownPolicy {
    fn default() -> Self {
        Self {
            blocked_shortcuts: [
                "Alt+Tab",
                "Alt+Shift+Tab",
                "Alt+F4",
                "Alt+Escape",
                "Alt+Space",
                "Ctrl+W",
                "Ctrl+Q",
                "Ctrl+N",
                "Ctrl+T",
                "Ctrl+O",
                "Ctrl+P",
                "Ctrl+S",
                "Ctrl+R",
                "Ctrl+U",
                "Ctrl+Tab",
                "Ctrl+Shift+Tab",
                "Ctrl+Shift+N",
                "Ctrl+Shift+R",
                "Ctrl+Shift+I",
                "Ctrl+Shift+J",
                "Ctrl+Shift+C",
                "Ctrl+Shift+Escape",
                "Ctrl+Alt+Delete",
                "Super+Tab",
                "Super+D",
                "Super+E",
                "Super+R",
                "Super+L",
                "Super+S",
                "Super+Shift+S",
                "PrintScreen",
                "Alt+PrintScreen",
                "F11",
                "F12",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            blocked_keys: [
                "Escape", "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8", "F9", "F10",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            process_blacklist: [
                // Screen recording
                "obs64.exe",
                "obs32.exe",
                "obs.exe",
                "obs",
                "camtasia.exe",
                "bandicam.exe",
                "sharex.exe",
                "loom.exe",
                "xsplit.exe",
                "streamlabs.exe",
                // Virtual machines
                "vmware.exe",
                "vmware-vmx.exe",
                "vmplayer.exe",
                "virtualbox.exe",
                "virtualboxvm.exe",
                "vboxsvc.exe",
                "qemu.exe",
                "qemu-system-x86_64",
                "qemu-system-x86_64.exe",
                // Remote desktop
                "teamviewer.exe",
                "teamviewer",
                "anydesk.exe",
                "anydesk",
                "vncviewer.exe",
                "tightvnc.exe",
                "rustdesk.exe",
                "rustdesk",
                "parsec.exe",
                // Chat / screen share
                "zoom.exe",
                "zoom",
                "discord.exe",
                "discord",
                "slack.exe",
                "slack",
                "skype.exe",
                "teams.exe",
                "webex.exe",
                // Developer tools
                "code.exe",
                "code",
                "devenv.exe",
                "idea64.exe",
                "pycharm64.exe",
                "webstorm64.exe",
                "notepad++.exe",
                "sublime_text.exe",
                // Capture utilities
                "snippingtool.exe",
                "gamebar.exe",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            vm_indicator_processes: [
                "vmtoolsd.exe",
                "vmtoolsd",
                "vmwaretray.exe",
                "vmwareuser.exe",
                "vboxservice.exe",
                "vboxtray.exe",
                "qemu-ga.exe",
                "qemu-ga",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            vm_identity_markers: ["vmware", "virtualbox", "virtual", "qemu", "xen"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allowed_foreground: Vec::new(),
            friendly_names: [
                ("chrome.exe", "Google Chrome"),
                ("firefox.exe", "Mozilla Firefox"),
                ("msedge.exe", "Microsoft Edge"),
                ("explorer.exe", "Windows Explorer"),
                ("discord.exe", "Discord"),
                ("discord", "Discord"),
                ("slack.exe", "Slack"),
                ("zoom.exe", "Zoom"),
                ("code.exe", "Visual Studio Code"),
                ("code", "Visual Studio Code"),
                ("notepad.exe", "Notepad"),
                ("calc.exe", "Calculator"),
                ("cmd.exe", "Command Prompt"),
                ("powershell.exe", "PowerShell"),
            ]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
            classifier_cooldown_ms: 1500,
            probe_timeout_ms: 1500,
            focus_tick_ms: 1000,
            process_scan_ms: 5000,
            foreground_scan_ms: 1000,
            penalty_lock_seconds: vec![120, 300, 600, 900, 1800],
        }
    }
}

impl LockdownPolicy {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&raw).map_err(|e| {
            Error::Config(format!(
                "Invalid lockdown policy {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    pub fn classifier_cooldown(&self) -> Duration {
        Duration::from_millis(self.classifier_cooldown_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Lock duration for a penalty level (1-based); levels beyond the table
    /// stay at the cap.
    pub fn penalty_lock_duration(&self, level: u32) -> Duration {
        if level == 0 || self.penalty_lock_seconds.is_empty() {
            return Duration::ZERO;
        }
        let idx = (level as usize - 1).min(self.penalty_lock_seconds.len() - 1);
        Duration::from_secs(self.penalty_lock_seconds[idx])
    }

    /// Display name for a foreground process; unmapped names pass through.
    pub fn friendly_name<'a>(&'a self, process: &'a str) -> &'a str {
        self.friendly_names
            .get(&process.to_ascii_lowercase())
            .map(String::as_str)
            .unwrap_or(process)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn penalty_table_caps_at_last_entry() {
        let policy = LockdownPolicy::default();
        assert_eq!(policy.penalty_lock_duration(1), Duration::from_secs(120));
        assert_eq!(policy.penalty_lock_duration(5), Duration::from_secs(1800));
        assert_eq!(policy.penalty_lock_duration(12), Duration::from_secs(1800));
        assert_eq!(policy.penalty_lock_duration(0), Duration::ZERO);
    }

    #[test]
    fn friendly_name_falls_back_to_raw() {
        let policy = LockdownPolicy::default();
        assert_eq!(policy.friendly_name("Chrome.exe"), "Google Chrome");
        assert_eq!(policy.friendly_name("weirdtool.exe"), "weirdtool.exe");
    }

    #[test]
    fn policy_overrides_merge_with_defaults() {
        let json = r#"{ "classifierCooldownMs": 500, "penaltyLockSeconds": [60] }"#;
        let policy: LockdownPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.classifier_cooldown(), Duration::from_millis(500));
        assert_eq!(policy.penalty_lock_duration(3), Duration::from_secs(60));
        // untouched fields keep their defaults
        assert!(!policy.process_blacklist.is_empty());
    }
}
