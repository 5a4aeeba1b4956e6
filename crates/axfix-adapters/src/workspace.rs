//! Filesystem side of a run: the live component file, the backup directory,
//! the preserved original, and the per-file run lock.

use crate::util::write_atomic;
use anyhow::{anyhow, Context};
use axfix_core::protocol::{BackupKey, BackupStore, WorkingCopy};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// The component file on disk. Writes are atomic.
#[derive(Debug, Clone)]
pub struct FsWorkingCopy {
    path: PathBuf,
}

impl FsWorkingCopy {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl WorkingCopy for FsWorkingCopy {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write(&mut self, content: &str) -> anyhow::Result<()> {
        write_atomic(&self.path, content)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

/// One file per snapshot under the backup directory. Existing snapshots are
/// never overwritten, so every run gets its own directory.
#[derive(Debug, Clone)]
pub struct FsBackupStore {
    dir: PathBuf,
}

impl FsBackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create backup directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// Store for one run: `<root>/<run_id>/`.
    pub fn for_run(root: &Path, run_id: &Uuid) -> anyhow::Result<Self> {
        Self::new(root.join(run_id.to_string()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &BackupKey) -> PathBuf {
        self.dir.join(key.storage_name())
    }
}

impl BackupStore for FsBackupStore {
    fn store(&mut self, key: &BackupKey, content: &str) -> anyhow::Result<()> {
        let path = self.path_for(key);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("Backup {} already exists or cannot be created", path.display()))?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        debug!(backup = %path.display(), "stored backup");
        Ok(())
    }

    fn load(&self, key: &BackupKey) -> anyhow::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Copy the untouched input next to the backups as `<stem>_old.<ext>`,
/// numbering the name if an earlier run already left one.
pub fn preserve_original(source: &Path, content: &str, backup_dir: &Path) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(backup_dir)?;
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("{} has no file name", source.display()))?;
    let ext = source.extension().and_then(|e| e.to_str());

    let name_for = |n: usize| {
        let suffix = if n == 0 { String::new() } else { format!(".{}", n) };
        match ext {
            Some(ext) => format!("{}_old{}.{}", stem, suffix, ext),
            None => format!("{}_old{}", stem, suffix),
        }
    };

    let mut n = 0;
    loop {
        let path = backup_dir.join(name_for(n));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(content.as_bytes())?;
                return Ok(path);
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => n += 1,
            Err(err) => return Err(err.into()),
        }
    }
}

/// Exclusive lock so two runs never remediate the same file at once.
/// Released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(state_dir: &Path, target: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(state_dir)?;
        let name = target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("{} has no file name", target.display()))?;
        let path = state_dir.join(format!("{}.lock", name));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Self { file, path }),
            Err(err) if err.kind() == ErrorKind::WouldBlock => Err(anyhow!(
                "Another axfix run is already working on {}",
                target.display()
            )),
            Err(err) => Err(err.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
