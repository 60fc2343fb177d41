use std::collections::BTreeMap;
use std::time::Duration;

use tracing::debug;

use crate::app::adb::parse::{
    parse_focused_activity, parse_oom_adj, parse_package_installed, parse_package_uid,
    parse_process_list, parse_vm_rss_kb,
};
use crate::app::adb::runner::run_command_with_timeout;

/// Device reads the sampling loop depends on. Every operation maps to one
/// shell invocation; non-presence (timeout, non-zero exit, empty or
/// unparseable output) is an absent value, never an error. Retrying is the
/// caller's business.
pub trait MemoryProbe: Send + Sync {
    /// Device identity this probe is scoped to (serial for real devices).
    fn identity(&self) -> &str;
    /// pid -> process name for every live process of `package`.
    fn resolve_process_ids(&self, package: &str) -> BTreeMap<String, String>;
    fn uid_of(&self, package: &str) -> Option<String>;
    fn foreground_activity(&self) -> Option<String>;
    /// Absent when the process no longer exists (exited, not an error).
    fn oom_adjustment(&self, pid: &str) -> Option<String>;
    fn resident_set_kb(&self, pid: &str) -> Option<String>;
    /// The full `dumpsys meminfo <pid>` text, unparsed.
    fn raw_memory_dump(&self, pid: &str) -> Option<String>;
    fn package_installed(&self, package: &str) -> bool;
    /// Replays one scripted `input` gesture. False when the device rejected
    /// or never ran it.
    fn ui_action(&self, args: &[String]) -> bool;
}

/// Adb-backed probe, scoped to one device serial.
#[derive(Debug, Clone)]
pub struct DeviceBridge {
    program: String,
    serial: String,
    timeout: Duration,
    trace_id: String,
}

impl DeviceBridge {
    pub fn new(
        program: impl Into<String>,
        serial: impl Into<String>,
        timeout: Duration,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            serial: serial.into(),
            timeout,
            trace_id: trace_id.into(),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    fn shell(&self, command: &str) -> Option<String> {
        let args = vec![
            "-s".to_string(),
            self.serial.clone(),
            "shell".to_string(),
            command.to_string(),
        ];
        match run_command_with_timeout(&self.program, &args, self.timeout, &self.trace_id) {
            Ok(output) if output.succeeded() => {
                if output.stdout.trim().is_empty() {
                    None
                } else {
                    Some(output.stdout)
                }
            }
            Ok(output) => {
                debug!(
                    serial = %self.serial,
                    exit_code = ?output.exit_code,
                    stderr = %output.stderr.trim(),
                    "shell command failed"
                );
                None
            }
            Err(err) => {
                debug!(serial = %self.serial, error = %err, "shell command did not complete");
                None
            }
        }
    }
}

impl MemoryProbe for DeviceBridge {
    fn identity(&self) -> &str {
        &self.serial
    }

    fn resolve_process_ids(&self, package: &str) -> BTreeMap<String, String> {
        match self.shell("ps -A") {
            Some(output) => parse_process_list(&output, package),
            None => BTreeMap::new(),
        }
    }

    fn uid_of(&self, package: &str) -> Option<String> {
        let output = self.shell(&format!("dumpsys package {package}"))?;
        parse_package_uid(&output)
    }

    fn foreground_activity(&self) -> Option<String> {
        let output = self.shell("dumpsys window windows")?;
        parse_focused_activity(&output)
    }

    fn oom_adjustment(&self, pid: &str) -> Option<String> {
        let output = self.shell(&format!("cat /proc/{pid}/oom_adj"))?;
        parse_oom_adj(&output)
    }

    fn resident_set_kb(&self, pid: &str) -> Option<String> {
        let output = self.shell(&format!("cat /proc/{pid}/status"))?;
        parse_vm_rss_kb(&output)
    }

    fn raw_memory_dump(&self, pid: &str) -> Option<String> {
        self.shell(&format!("dumpsys meminfo {pid}"))
    }

    fn package_installed(&self, package: &str) -> bool {
        match self.shell(&format!("pm list packages {package}")) {
            Some(output) => parse_package_installed(&output, package),
            None => false,
        }
    }

    fn ui_action(&self, args: &[String]) -> bool {
        // `input` prints nothing on success, so the empty-output rule of
        // `shell` does not apply here; only the exit code matters.
        let command = format!("input {}", args.join(" "));
        let args = vec![
            "-s".to_string(),
            self.serial.clone(),
            "shell".to_string(),
            command,
        ];
        match run_command_with_timeout(&self.program, &args, self.timeout, &self.trace_id) {
            Ok(output) => output.succeeded(),
            Err(err) => {
                debug!(serial = %self.serial, error = %err, "ui action did not complete");
                false
            }
        }
    }
}
