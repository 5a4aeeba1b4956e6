//! Run report persistence
//!
//! `rounds.jsonl` grows one line per round (and per finished phase) while the
//! loop runs, so a crashed run still leaves its history behind. The final
//! `report.json` is written once at the end.

use crate::lighthouse::ManualCheck;
use crate::util::write_atomic;
use anyhow::Context;
use axfix_core::protocol::ReportSink;
use axfix_core::round::{PhaseReport, Round, RunOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const ROUND_LOG_FILE: &str = "rounds.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub file: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// `<stem>_old.<ext>` copy of the input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_backup: Option<PathBuf>,
    pub outcome: RunOutcome,
    #[serde(default)]
    pub manual_checks: Vec<ManualCheck>,
}

pub fn write_report(path: &Path, report: &RunReport) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    write_atomic(path, &json).with_context(|| format!("Failed to write report {}", path.display()))
}

#[derive(Debug, Serialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
enum LogEntry<'a> {
    Round {
        run_id: Uuid,
        at: DateTime<Utc>,
        #[serde(flatten)]
        round: &'a Round,
    },
    Phase {
        run_id: Uuid,
        at: DateTime<Utc>,
        #[serde(flatten)]
        report: &'a PhaseReport,
    },
}

/// Appends each round and phase to `<state_dir>/rounds.jsonl`.
pub struct JsonlReportSink {
    path: PathBuf,
    run_id: Uuid,
}

impl JsonlReportSink {
    pub fn new(state_dir: &Path, run_id: Uuid) -> anyhow::Result<Self> {
        fs::create_dir_all(state_dir)?;
        Ok(Self {
            path: state_dir.join(ROUND_LOG_FILE),
            run_id,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, entry: &LogEntry<'_>) -> anyhow::Result<()> {
        let row = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        writeln!(file, "{}", row)?;
        Ok(())
    }
}

impl ReportSink for JsonlReportSink {
    fn record_round(&mut self, round: &Round) -> anyhow::Result<()> {
        self.append(&LogEntry::Round {
            run_id: self.run_id,
            at: Utc::now(),
            round,
        })
    }

    fn record_phase(&mut self, report: &PhaseReport) -> anyhow::Result<()> {
        self.append(&LogEntry::Phase {
            run_id: self.run_id,
            at: Utc::now(),
            report,
        })
    }
}
