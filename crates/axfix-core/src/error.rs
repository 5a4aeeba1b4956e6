//! Error taxonomy for the remediation loop
//!
//! Each class has its own blast radius: analyzer and apply failures end the
//! phase, generation failures only affect one group, mapping failures only
//! widen one issue's fix scope to the whole file.

use thiserror::Error;

/// External analyzer or audit harness failed. Fatal to the current phase.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("{tool} is unavailable: {reason}")]
    Unavailable { tool: String, reason: String },
    #[error("{tool} crashed: {reason}")]
    Crashed { tool: String, reason: String },
    #[error("{tool} produced an unreadable report: {reason}")]
    InvalidReport { tool: String, reason: String },
}

impl AnalyzerError {
    pub fn unavailable(tool: impl Into<String>, reason: impl ToString) -> Self {
        AnalyzerError::Unavailable {
            tool: tool.into(),
            reason: reason.to_string(),
        }
    }

    pub fn crashed(tool: impl Into<String>, reason: impl ToString) -> Self {
        AnalyzerError::Crashed {
            tool: tool.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_report(tool: impl Into<String>, reason: impl ToString) -> Self {
        AnalyzerError::InvalidReport {
            tool: tool.into(),
            reason: reason.to_string(),
        }
    }
}

/// The fix collaborator produced nothing usable for one group. Non-fatal.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("fix collaborator failed: {0}")]
    Collaborator(String),
    #[error("fix collaborator returned an empty response")]
    EmptyResponse,
    #[error("response did not contain a <file> block")]
    MissingFile,
    #[error("fix collaborator declined: {0}")]
    Declined(String),
    #[error("proposed content does not parse: {0}")]
    SyntaxCheckFailed(String),
}

/// A runtime issue could not be tied to source lines. Non-fatal.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("{candidates} elements match <{tag}> equally well")]
    Ambiguous { tag: String, candidates: usize },
    #[error("no source element matches {0}")]
    NoCandidate(String),
    #[error("line oracle failed: {0}")]
    Oracle(String),
}

/// Persisting a revision failed. The previous revision is still live.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("backup of revision {revision} failed: {source}")]
    Backup {
        revision: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("writing revision {revision} failed: {source}")]
    Write {
        revision: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Anything that ends a round early.
#[derive(Debug, Error)]
pub enum RoundError {
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
}
