use crate::error::ApplyError;
use crate::protocol::{BackupKey, BackupStore, WorkingCopy};
use crate::revision::{FileRevision, Phase};
use tracing::debug;

/// Sole writer of the working file.
///
/// Every apply snapshots the live revision to the backup store before the new
/// content replaces it, so after N applies exactly N prior revisions are
/// recoverable and the original input is always one of them.
pub struct FixApplier {
    working: Box<dyn WorkingCopy>,
    backups: Box<dyn BackupStore>,
    current: FileRevision,
    log: Vec<BackupKey>,
}

impl FixApplier {
    pub fn new(
        initial: FileRevision,
        working: Box<dyn WorkingCopy>,
        backups: Box<dyn BackupStore>,
    ) -> Self {
        Self {
            working,
            backups,
            current: initial,
            log: Vec::new(),
        }
    }

    pub fn current(&self) -> &FileRevision {
        &self.current
    }

    /// Backup keys in the order revisions were replaced.
    pub fn backup_log(&self) -> &[BackupKey] {
        &self.log
    }

    pub fn backups(&self) -> &dyn BackupStore {
        self.backups.as_ref()
    }

    pub fn apply(
        &mut self,
        phase: Phase,
        round: u32,
        content: String,
    ) -> Result<FileRevision, ApplyError> {
        let key = BackupKey {
            file_name: self.current.file_name(),
            phase,
            round,
            revision: self.current.number(),
        };

        self.backups
            .store(&key, self.current.content())
            .map_err(|e| ApplyError::Backup {
                revision: self.current.number(),
                source: e.into(),
            })?;

        let next = self.current.successor(content);
        self.working
            .write(next.content())
            .map_err(|e| ApplyError::Write {
                revision: next.number(),
                source: e.into(),
            })?;

        debug!(
            file = %self.working.path().display(),
            backup = %key,
            revision = next.number(),
            "applied revision"
        );
        self.log.push(key);
        self.current = next.clone();
        Ok(next)
    }
}
