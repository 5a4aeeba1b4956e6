use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Detection modality a phase runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Lint over the component source
    Static,
    /// Audit over the rendered DOM
    Runtime,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Static => "static",
            Phase::Runtime => "runtime",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Immutable snapshot of the working file.
///
/// Only [`crate::applier::FixApplier`] can produce a successor revision, which
/// keeps it the single writer of the live file. Everything else reads
/// revisions and never touches the path directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRevision {
    path: Arc<PathBuf>,
    content: Arc<str>,
    number: u64,
}

impl FileRevision {
    /// The on-disk content at the start of a run.
    pub fn initial(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: Arc::new(path.into()),
            content: Arc::from(content.into()),
            number: 0,
        }
    }

    pub(crate) fn successor(&self, content: String) -> Self {
        Self {
            path: Arc::clone(&self.path),
            content: Arc::from(content),
            number: self.number + 1,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "component".to_string())
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn line_count(&self) -> usize {
        self.content.lines().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successor_increments_and_keeps_path() {
        let first = FileRevision::initial("src/Card.tsx", "a");
        let second = first.successor("b".to_string());
        assert_eq!(first.number(), 0);
        assert_eq!(second.number(), 1);
        assert_eq!(second.path(), Path::new("src/Card.tsx"));
        assert_eq!(first.content(), "a");
        assert_eq!(second.content(), "b");
        assert_eq!(second.file_name(), "Card.tsx");
    }
}
