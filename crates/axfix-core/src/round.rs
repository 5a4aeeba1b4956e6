//! Append-only history of a run
//!
//! A `Round` is built once by the round executor and never mutated afterwards.
//! Phase and run outcomes carry the full round history so reporting never has
//! to reconstruct anything.

use crate::issue::{distinct_kinds, Issue, LineRange};
use crate::revision::Phase;
use serde::{Deserialize, Serialize};

/// Issues chosen to be fixed together in one generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixGroup {
    /// Position of the group within its round (0-based)
    pub index: usize,
    pub issues: Vec<Issue>,
}

impl FixGroup {
    pub fn new(index: usize, issues: Vec<Issue>) -> Self {
        Self { index, issues }
    }

    pub fn kinds(&self) -> Vec<String> {
        distinct_kinds(&self.issues)
    }

    /// True if any member has no source location, so the fix must look at the whole file.
    pub fn needs_whole_file(&self) -> bool {
        self.issues.iter().any(|issue| !issue.location.is_resolved())
    }

    /// Smallest span covering every located member.
    pub fn span(&self) -> Option<LineRange> {
        self.issues
            .iter()
            .filter_map(Issue::span)
            .reduce(|a, b| LineRange::new(a.start.min(b.start), a.end.max(b.end)))
    }

    /// Lint-style listing of the members, one per line.
    pub fn describe(&self) -> String {
        self.issues
            .iter()
            .map(Issue::describe)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// What happened when a group's fix was generated and applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GroupOutcome {
    /// New content was written as this revision
    Applied {
        revision: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explanation: Option<String>,
    },
    /// Proposed content was identical to the input; nothing written
    Unchanged,
    /// Generation failed; the group's issues carry over
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub group: FixGroup,
    pub outcome: GroupOutcome,
}

/// One collect → group → fix → re-collect cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub phase: Phase,
    /// 1-based within the phase
    pub number: u32,
    pub issues_before: Vec<Issue>,
    pub groups: Vec<GroupRecord>,
    /// Empty when the round stopped early, since nothing was re-collected
    pub issues_after: Vec<Issue>,
    /// Why the round stopped before re-collecting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Round {
    pub fn is_partial(&self) -> bool {
        self.error.is_some()
    }

    pub fn applied_count(&self) -> usize {
        self.groups
            .iter()
            .filter(|record| matches!(record.outcome, GroupOutcome::Applied { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.groups
            .iter()
            .filter(|record| matches!(record.outcome, GroupOutcome::Failed { .. }))
            .count()
    }
}

/// Why a phase was declared non-convergent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DeadlockReason {
    /// Same non-empty signature for `window` consecutive rounds
    RepeatedSignature { window: usize },
    /// Round budget exhausted while issues kept changing
    RoundLimit { limit: u32 },
}

/// Terminal outcome of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PhaseResult {
    Clean,
    Deadlocked {
        #[serde(flatten)]
        reason: DeadlockReason,
        unresolved_kinds: Vec<String>,
    },
    Aborted {
        error: String,
        unresolved_kinds: Vec<String>,
    },
}

impl PhaseResult {
    pub fn label(&self) -> &'static str {
        match self {
            PhaseResult::Clean => "clean",
            PhaseResult::Deadlocked { .. } => "deadlocked",
            PhaseResult::Aborted { .. } => "aborted",
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, PhaseResult::Clean)
    }

    pub fn unresolved_kinds(&self) -> &[String] {
        match self {
            PhaseResult::Clean => &[],
            PhaseResult::Deadlocked {
                unresolved_kinds, ..
            }
            | PhaseResult::Aborted {
                unresolved_kinds, ..
            } => unresolved_kinds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub result: PhaseResult,
    pub rounds: Vec<Round>,
    /// Revision that was live when the phase ended
    pub final_revision: u64,
}

/// Everything a run produced, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub static_phase: PhaseReport,
    /// Absent when runtime analysis was skipped or the static phase aborted
    pub runtime_phase: Option<PhaseReport>,
    pub final_revision: u64,
    /// Backup keys in the order revisions were replaced
    pub backups: Vec<String>,
}

impl RunOutcome {
    pub fn phases(&self) -> impl Iterator<Item = &PhaseReport> {
        std::iter::once(&self.static_phase).chain(self.runtime_phase.as_ref())
    }

    pub fn is_clean(&self) -> bool {
        self.phases().all(|report| report.result.is_clean())
    }

    pub fn any_aborted(&self) -> bool {
        self.phases()
            .any(|report| matches!(report.result, PhaseResult::Aborted { .. }))
    }

    pub fn total_rounds(&self) -> usize {
        self.phases().map(|report| report.rounds.len()).sum()
    }
}
