//! Deterministic collaborators for exercising the loop without external tools.

use crate::error::{AnalyzerError, GenerationError};
use crate::issue::{DomDescriptor, Issue, LineRange, Severity};
use crate::protocol::{
    BackupKey, BackupStore, BoxFuture, FixGenerator, GeneratedFix, IssueSource, LineOracle,
    ReportSink, WorkingCopy,
};
use crate::revision::FileRevision;
use crate::round::{FixGroup, PhaseReport, Round};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory live file. Clones share the same content.
#[derive(Debug, Clone)]
pub struct MemoryWorkingCopy {
    path: PathBuf,
    content: Arc<Mutex<String>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryWorkingCopy {
    pub fn new(path: impl Into<PathBuf>, content: &str) -> Self {
        Self {
            path: path.into(),
            content: Arc::new(Mutex::new(content.to_string())),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn content(&self) -> String {
        self.content.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl WorkingCopy for MemoryWorkingCopy {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write(&mut self, content: &str) -> anyhow::Result<()> {
        let mut guard = self
            .content
            .lock()
            .map_err(|_| anyhow::anyhow!("working copy lock poisoned"))?;
        *guard = content.to_string();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory backup store that refuses to overwrite a key.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackupStore {
    entries: Arc<Mutex<BTreeMap<BackupKey, String>>>,
    fail_next: Arc<AtomicBool>,
}

impl MemoryBackupStore {
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fail_next_store(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl BackupStore for MemoryBackupStore {
    fn store(&mut self, key: &BackupKey, content: &str) -> anyhow::Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(anyhow::anyhow!("backup disk full"));
        }
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("backup lock poisoned"))?;
        if entries.contains_key(key) {
            return Err(anyhow::anyhow!("backup {} already exists", key));
        }
        entries.insert(key.clone(), content.to_string());
        Ok(())
    }

    fn load(&self, key: &BackupKey) -> anyhow::Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("backup lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }
}

/// Derives issues from content: one issue per line containing `needle`.
/// Mirrors a linter closely enough for convergence scenarios.
pub struct PatternSource {
    rules: Vec<(String, String)>,
    calls: AtomicUsize,
}

impl PatternSource {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn rule(mut self, kind: &str, needle: &str) -> Self {
        self.rules.push((kind.to_string(), needle.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for PatternSource {
    fn default() -> Self {
        Self::new()
    }
}

impl IssueSource for PatternSource {
    fn name(&self) -> &str {
        "pattern"
    }

    fn collect<'a>(
        &'a self,
        revision: &'a FileRevision,
    ) -> BoxFuture<'a, Result<Vec<Issue>, AnalyzerError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut issues = Vec::new();
            for (number, line) in revision.content().lines().enumerate() {
                for (kind, needle) in &self.rules {
                    if let Some(column) = line.find(needle.as_str()) {
                        issues.push(Issue::at(
                            kind.clone(),
                            number + 1,
                            column + 1,
                            format!("found {}", needle),
                            Severity::Error,
                        ));
                    }
                }
            }
            Ok(issues)
        })
    }
}

/// Replays queued results, then repeats the last one.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<Vec<Issue>, String>>>,
    last: Mutex<Option<Result<Vec<Issue>, String>>>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<Vec<Issue>, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
        }
    }
}

impl IssueSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn collect<'a>(
        &'a self,
        _revision: &'a FileRevision,
    ) -> BoxFuture<'a, Result<Vec<Issue>, AnalyzerError>> {
        Box::pin(async move {
            let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
            let result = match next {
                Some(result) => {
                    if let Ok(mut last) = self.last.lock() {
                        *last = Some(result.clone());
                    }
                    result
                }
                None => self
                    .last
                    .lock()
                    .ok()
                    .and_then(|last| last.clone())
                    .unwrap_or_else(|| Ok(Vec::new())),
            };
            result.map_err(|reason| AnalyzerError::crashed("scripted", reason))
        })
    }
}

type FixFn = dyn Fn(&FixGroup, &str) -> Result<GeneratedFix, GenerationError> + Send + Sync;

/// Fix generator driven by a closure. Records the groups it was given.
pub struct StubGenerator {
    fix: Box<FixFn>,
    seen: Mutex<Vec<FixGroup>>,
}

impl StubGenerator {
    pub fn new(
        fix: impl Fn(&FixGroup, &str) -> Result<GeneratedFix, GenerationError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            fix: Box::new(fix),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Always hands back the input unchanged (a stuck model).
    pub fn identity() -> Self {
        Self::new(|_, content| {
            Ok(GeneratedFix {
                content: content.to_string(),
                explanation: None,
            })
        })
    }

    /// Replaces every occurrence of `from` with `to`.
    pub fn replacing(from: &'static str, to: &'static str) -> Self {
        Self::new(move |_, content| {
            Ok(GeneratedFix {
                content: content.replace(from, to),
                explanation: Some(format!("replaced {} with {}", from, to)),
            })
        })
    }

    pub fn seen(&self) -> Vec<FixGroup> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl FixGenerator for StubGenerator {
    fn generate<'a>(
        &'a self,
        group: &'a FixGroup,
        revision: &'a FileRevision,
    ) -> BoxFuture<'a, Result<GeneratedFix, GenerationError>> {
        Box::pin(async move {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(group.clone());
            }
            (self.fix)(group, revision.content())
        })
    }
}

/// Line oracle returning a fixed answer.
pub struct FixedLineOracle {
    answer: Result<LineRange, String>,
    calls: AtomicUsize,
}

impl FixedLineOracle {
    pub fn answering(range: LineRange) -> Self {
        Self {
            answer: Ok(range),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            answer: Err(reason.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LineOracle for FixedLineOracle {
    fn locate<'a>(
        &'a self,
        _dom: &'a DomDescriptor,
        _content: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<LineRange>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone().map_err(|reason| anyhow::anyhow!(reason))
        })
    }
}

/// Report sink that keeps everything in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub rounds: Arc<Mutex<Vec<Round>>>,
    pub phases: Arc<Mutex<Vec<PhaseReport>>>,
}

impl ReportSink for MemorySink {
    fn record_round(&mut self, round: &Round) -> anyhow::Result<()> {
        self.rounds
            .lock()
            .map_err(|_| anyhow::anyhow!("sink lock poisoned"))?
            .push(round.clone());
        Ok(())
    }

    fn record_phase(&mut self, report: &PhaseReport) -> anyhow::Result<()> {
        self.phases
            .lock()
            .map_err(|_| anyhow::anyhow!("sink lock poisoned"))?
            .push(report.clone());
        Ok(())
    }
}
