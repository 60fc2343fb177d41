use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::app::error::AppError;

/// Campaign manifest: which sessions belong to one test scenario on one
/// device. Reporting merges these sessions into a single report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub time: String,
    pub device: String,
    pub sessions: Vec<String>,
}

/// One sampling run: a timestamp-named directory holding the session log.
pub struct Session {
    id: String,
    dir: PathBuf,
    log_file: File,
}

impl Session {
    pub fn create(output_root: &Path, trace_id: &str) -> Result<Self, AppError> {
        let id = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let dir = output_root.join(&id);
        fs::create_dir_all(&dir).map_err(|err| {
            AppError::system(format!("Failed to create session directory: {err}"), trace_id)
        })?;
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("session.log"))
            .map_err(|err| {
                AppError::system(format!("Failed to open session log: {err}"), trace_id)
            })?;
        Ok(Self { id, dir, log_file })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Best-effort append; a failed log line never aborts sampling.
    pub fn log(&mut self, message: &str) {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let _ = writeln!(self.log_file, "[{stamp}] {message}");
    }
}

fn manifest_path(output_root: &Path, campaign: &str) -> PathBuf {
    let safe: String = campaign
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    output_root.join(format!("{safe}.manifest.json"))
}

/// Read-modify-write on every session start: append to the campaign's
/// manifest when it exists, otherwise create it.
pub fn register_session(
    output_root: &Path,
    campaign: &str,
    device: &str,
    session_id: &str,
    trace_id: &str,
) -> Result<Manifest, AppError> {
    let path = manifest_path(output_root, campaign);
    let mut manifest = if path.exists() {
        let raw = fs::read_to_string(&path).map_err(|err| {
            AppError::system(format!("Failed to read manifest: {err}"), trace_id)
        })?;
        serde_json::from_str::<Manifest>(&raw).map_err(|err| {
            AppError::system(format!("Failed to parse manifest: {err}"), trace_id)
        })?
    } else {
        Manifest {
            time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            device: device.to_string(),
            sessions: Vec::new(),
        }
    };
    manifest.sessions.push(session_id.to_string());

    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let payload = serde_json::to_string_pretty(&manifest).map_err(|err| {
        AppError::system(format!("Failed to serialize manifest: {err}"), trace_id)
    })?;
    fs::write(&path, payload)
        .map_err(|err| AppError::system(format!("Failed to write manifest: {err}"), trace_id))?;
    Ok(manifest)
}
