//! Session run log under `<output_dir>/.rustify/sessions/<session-id>/`.
//!
//! `session.log` is free text appended per event; every repair attempt is
//! serialized to `attempt-<n>.json` and the final report to `report.json`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::core::types::{RepairAttempt, RepairReport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub dir: PathBuf,
    pub log_path: PathBuf,
    pub report_path: PathBuf,
}

impl SessionPaths {
    pub fn new(output_dir: &Path, session_id: &str) -> Self {
        let dir = output_dir
            .join(".rustify")
            .join("sessions")
            .join(session_id);
        Self {
            log_path: dir.join("session.log"),
            report_path: dir.join("report.json"),
            dir,
        }
    }

    pub fn attempt_path(&self, attempt: u32) -> PathBuf {
        self.dir.join(format!("attempt-{attempt}.json"))
    }
}

/// Append-only record of one session.
#[derive(Debug, Clone)]
pub struct SessionLog {
    session_id: String,
    paths: SessionPaths,
}

impl SessionLog {
    /// Create the session directory.
    pub fn create(output_dir: &Path, session_id: &str) -> Result<Self> {
        let paths = SessionPaths::new(output_dir, session_id);
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create session dir {}", paths.dir.display()))?;
        Ok(Self {
            session_id: session_id.to_string(),
            paths,
        })
    }

    /// Timestamp-based id, unique per process.
    pub fn new_session_id() -> String {
        format!(
            "{}-{}",
            Utc::now().format("%Y%m%dT%H%M%S%3fZ"),
            std::process::id()
        )
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    /// Append one timestamped line (multi-line messages are kept verbatim).
    pub fn event(&self, message: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.paths.log_path)
            .with_context(|| format!("open {}", self.paths.log_path.display()))?;
        writeln!(
            file,
            "{} {message}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        )
        .with_context(|| format!("append {}", self.paths.log_path.display()))
    }

    pub fn write_attempt(&self, attempt: &RepairAttempt) -> Result<PathBuf> {
        let path = self.paths.attempt_path(attempt.attempt);
        write_json(&path, attempt)?;
        Ok(path)
    }

    pub fn write_report(&self, report: &RepairReport) -> Result<PathBuf> {
        write_json(&self.paths.report_path, report)?;
        Ok(self.paths.report_path.clone())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}
