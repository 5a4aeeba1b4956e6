//! Collaborator contracts
//!
//! The loop only ever talks to analyzers, the LLM, and storage through these
//! narrow traits, so every control decision can be exercised with
//! deterministic stubs.

use crate::error::{AnalyzerError, GenerationError};
use crate::issue::{DomDescriptor, Issue, LineRange};
use crate::revision::{FileRevision, Phase};
use crate::round::{FixGroup, PhaseReport, Round};
use anyhow::Result;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

pub use futures::future::BoxFuture;

/// Adapts an external analyzer's output into normalized issues.
///
/// Must be idempotent for a given revision up to the tool's own noise.
pub trait IssueSource: Send + Sync {
    fn name(&self) -> &str;

    fn collect<'a>(
        &'a self,
        revision: &'a FileRevision,
    ) -> BoxFuture<'a, std::result::Result<Vec<Issue>, AnalyzerError>>;
}

impl<T: IssueSource + ?Sized> IssueSource for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn collect<'a>(
        &'a self,
        revision: &'a FileRevision,
    ) -> BoxFuture<'a, std::result::Result<Vec<Issue>, AnalyzerError>> {
        (**self).collect(revision)
    }
}

/// Proposed replacement for the whole file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFix {
    pub content: String,
    pub explanation: Option<String>,
}

/// Produces new file content for a group. Makes no claim the issues are
/// resolved; only the next collection can confirm that.
pub trait FixGenerator: Send + Sync {
    fn generate<'a>(
        &'a self,
        group: &'a FixGroup,
        revision: &'a FileRevision,
    ) -> BoxFuture<'a, std::result::Result<GeneratedFix, GenerationError>>;
}

/// LLM-assisted partitioning. Returns 1-based issue numbers per group.
pub trait GroupingOracle: Send + Sync {
    fn propose_groups<'a>(
        &'a self,
        issues: &'a [Issue],
        content: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Vec<usize>>>>;
}

/// LLM-assisted line lookup for a rendered element.
pub trait LineOracle: Send + Sync {
    fn locate<'a>(
        &'a self,
        dom: &'a DomDescriptor,
        content: &'a str,
    ) -> BoxFuture<'a, Result<LineRange>>;
}

/// Identifies one backup snapshot. A key is written at most once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackupKey {
    pub file_name: String,
    pub phase: Phase,
    /// Round within the phase; 0 for work done before the first round
    pub round: u32,
    /// Revision number of the snapshotted content
    pub revision: u64,
}

impl BackupKey {
    /// Filesystem-safe name such as `Card.tsx.static.r2.v3`.
    pub fn storage_name(&self) -> String {
        format!(
            "{}.{}.r{}.v{}",
            self.file_name, self.phase, self.round, self.revision
        )
    }
}

impl fmt::Display for BackupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_name())
    }
}

/// Append-only snapshot storage for operator recovery.
pub trait BackupStore: Send {
    fn store(&mut self, key: &BackupKey, content: &str) -> Result<()>;

    fn load(&self, key: &BackupKey) -> Result<Option<String>>;
}

/// The live file being remediated.
pub trait WorkingCopy: Send {
    fn path(&self) -> &Path;

    fn write(&mut self, content: &str) -> Result<()>;
}

/// Write-only destination for round history.
pub trait ReportSink: Send {
    fn record_round(&mut self, round: &Round) -> Result<()>;

    fn record_phase(&mut self, report: &PhaseReport) -> Result<()>;
}
