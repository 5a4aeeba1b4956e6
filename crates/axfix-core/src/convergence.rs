//! Phase state machine
//!
//! `Static` runs lint rounds until the file is clean or stuck, then hands the
//! best-effort file to `Runtime`, which does the same with the rendered-DOM
//! audit. `Done` carries both phase reports. There is no way back from
//! `Runtime` to `Static`.

use crate::applier::FixApplier;
use crate::deadlock::{DeadlockDetector, DEFAULT_WINDOW};
use crate::executor::RoundExecutor;
use crate::grouping::IssueGrouper;
use crate::issue::{distinct_kinds, Issue, IssueSignature, SignatureMode};
use crate::protocol::{FixGenerator, IssueSource, ReportSink};
use crate::revision::Phase;
use crate::round::{DeadlockReason, PhaseReport, PhaseResult, Round, RunOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_MAX_ROUNDS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub deadlock_window: usize,
    pub signature_mode: SignatureMode,
    pub max_rounds_per_phase: u32,
    pub skip_runtime: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            deadlock_window: DEFAULT_WINDOW,
            signature_mode: SignatureMode::default(),
            max_rounds_per_phase: DEFAULT_MAX_ROUNDS,
            skip_runtime: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    Static,
    Runtime { static_report: PhaseReport },
    Done(RunOutcome),
}

impl LoopState {
    pub fn phase(&self) -> Option<Phase> {
        match self {
            LoopState::Static => Some(Phase::Static),
            LoopState::Runtime { .. } => Some(Phase::Runtime),
            LoopState::Done(_) => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, LoopState::Done(_))
    }
}

pub struct ConvergenceLoop {
    applier: FixApplier,
    static_source: Box<dyn IssueSource>,
    runtime_source: Option<Box<dyn IssueSource>>,
    grouper: Arc<dyn IssueGrouper>,
    generator: Arc<dyn FixGenerator>,
    config: LoopConfig,
    detector: DeadlockDetector,
    sink: Option<Box<dyn ReportSink>>,
    state: LoopState,
}

impl ConvergenceLoop {
    pub fn new(
        applier: FixApplier,
        static_source: Box<dyn IssueSource>,
        grouper: Arc<dyn IssueGrouper>,
        generator: Arc<dyn FixGenerator>,
        config: LoopConfig,
    ) -> Self {
        Self {
            applier,
            static_source,
            runtime_source: None,
            grouper,
            generator,
            detector: DeadlockDetector::new(config.deadlock_window),
            config,
            sink: None,
            state: LoopState::Static,
        }
    }

    pub fn with_runtime_source(mut self, source: Box<dyn IssueSource>) -> Self {
        self.runtime_source = Some(source);
        self
    }

    pub fn with_report_sink(mut self, sink: Box<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn applier(&self) -> &FixApplier {
        &self.applier
    }

    /// Run one phase to completion and move to the next state. No-op once done.
    pub async fn advance(&mut self) -> &LoopState {
        let next = match std::mem::replace(&mut self.state, LoopState::Static) {
            LoopState::Static => {
                let report = self.run_phase(Phase::Static).await;
                let aborted = matches!(report.result, PhaseResult::Aborted { .. });
                if aborted || self.config.skip_runtime || self.runtime_source.is_none() {
                    if !aborted {
                        info!("runtime phase skipped");
                    }
                    LoopState::Done(self.finish(report, None))
                } else {
                    LoopState::Runtime {
                        static_report: report,
                    }
                }
            }
            LoopState::Runtime { static_report } => {
                let report = self.run_phase(Phase::Runtime).await;
                LoopState::Done(self.finish(static_report, Some(report)))
            }
            done @ LoopState::Done(_) => done,
        };
        self.state = next;
        &self.state
    }

    /// Drive both phases and return the outcome.
    pub async fn run(mut self) -> RunOutcome {
        loop {
            if let LoopState::Done(outcome) = self.advance().await {
                return outcome.clone();
            }
        }
    }

    fn finish(&self, static_phase: PhaseReport, runtime_phase: Option<PhaseReport>) -> RunOutcome {
        RunOutcome {
            static_phase,
            runtime_phase,
            final_revision: self.applier.current().number(),
            backups: self
                .applier
                .backup_log()
                .iter()
                .map(|key| key.storage_name())
                .collect(),
        }
    }

    async fn run_phase(&mut self, phase: Phase) -> PhaseReport {
        info!(%phase, revision = self.applier.current().number(), "phase started");
        self.detector.reset();

        let (rounds, result) = {
            let source: &dyn IssueSource = match phase {
                Phase::Static => self.static_source.as_ref(),
                Phase::Runtime => match self.runtime_source.as_deref() {
                    Some(source) => source,
                    None => self.static_source.as_ref(),
                },
            };
            let executor = RoundExecutor::new(source, self.grouper.as_ref(), self.generator.as_ref());
            drive_phase(
                &executor,
                &mut self.applier,
                phase,
                &self.config,
                &mut self.detector,
                &mut self.sink,
            )
            .await
        };

        let report = PhaseReport {
            phase,
            result,
            rounds,
            final_revision: self.applier.current().number(),
        };
        info!(
            %phase,
            result = report.result.label(),
            rounds = report.rounds.len(),
            unresolved = ?report.result.unresolved_kinds(),
            "phase finished"
        );
        if let Some(sink) = self.sink.as_mut() {
            if let Err(err) = sink.record_phase(&report) {
                warn!(error = %err, "failed to record phase report");
            }
        }
        report
    }
}

async fn drive_phase(
    executor: &RoundExecutor<'_>,
    applier: &mut FixApplier,
    phase: Phase,
    config: &LoopConfig,
    detector: &mut DeadlockDetector,
    sink: &mut Option<Box<dyn ReportSink>>,
) -> (Vec<Round>, PhaseResult) {
    let mut rounds: Vec<Round> = Vec::new();
    let mut pending: Option<Vec<Issue>> = None;
    let mut number: u32 = 0;

    loop {
        number += 1;
        let outstanding = pending.as_ref().map(|issues| !issues.is_empty()).unwrap_or(true);
        if number > config.max_rounds_per_phase && outstanding {
            let limit = config.max_rounds_per_phase;
            warn!(%phase, limit, "round limit reached without convergence");
            let unresolved_kinds = pending.as_deref().map(distinct_kinds).unwrap_or_default();
            return (
                rounds,
                PhaseResult::Deadlocked {
                    reason: DeadlockReason::RoundLimit { limit },
                    unresolved_kinds,
                },
            );
        }

        let round = match executor.run_round(applier, phase, number, pending.take()).await {
            Ok(round) => round,
            Err(aborted) => {
                warn!(%phase, round = number, error = %aborted.error, "phase aborted");
                let unresolved_kinds = match &aborted.partial {
                    Some(partial) => distinct_kinds(&partial.issues_before),
                    None => rounds
                        .last()
                        .map(|round| distinct_kinds(&round.issues_after))
                        .unwrap_or_default(),
                };
                if let Some(partial) = aborted.partial {
                    record_round(sink, &partial);
                    rounds.push(partial);
                }
                return (
                    rounds,
                    PhaseResult::Aborted {
                        error: aborted.error.to_string(),
                        unresolved_kinds,
                    },
                );
            }
        };

        record_round(sink, &round);

        if round.issues_before.is_empty() {
            rounds.push(round);
            return (rounds, PhaseResult::Clean);
        }

        let signature = IssueSignature::from_issues(&round.issues_after, config.signature_mode);
        let deadlocked = detector.observe(signature);
        let issues_after = round.issues_after.clone();
        rounds.push(round);

        if deadlocked {
            let unresolved_kinds = distinct_kinds(&issues_after);
            warn!(
                %phase,
                round = number,
                window = detector.window(),
                kinds = ?unresolved_kinds,
                "deadlock detected"
            );
            return (
                rounds,
                PhaseResult::Deadlocked {
                    reason: DeadlockReason::RepeatedSignature {
                        window: detector.window(),
                    },
                    unresolved_kinds,
                },
            );
        }

        pending = Some(issues_after);
    }
}

fn record_round(sink: &mut Option<Box<dyn ReportSink>>, round: &Round) {
    if let Some(sink) = sink.as_mut() {
        if let Err(err) = sink.record_round(round) {
            warn!(error = %err, "failed to record round");
        }
    }
}

#[cfg(test)]
mod tests;
