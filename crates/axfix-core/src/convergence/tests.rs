use super::*;
use crate::grouping::RegionGrouper;
use crate::issue::{DomDescriptor, Location, Severity};
use crate::mapper::{MappedIssueSource, SourceMapper};
use crate::protocol::GeneratedFix;
use crate::revision::FileRevision;
use crate::round::GroupOutcome;
use crate::testing::{
    FixedLineOracle, MemoryBackupStore, MemorySink, MemoryWorkingCopy, PatternSource,
    ScriptedSource, StubGenerator,
};

const LOGO: &str = "export const Logo = () => (\n  <a href=\"/\">\n    <img src=\"logo.png\" />\n  </a>\n);\n";

const STRIP: &str = "export const Strip = () => (\n  <div>\n    <img src=\"a.png\" />\n\n    <img src=\"b.png\" />\n\n    <img src=\"c.png\" />\n  </div>\n);\n";

const TWINS: &str = "export const Twins = () => (\n  <div>\n    <img src=\"x.png\" />\n    <img src=\"x.png\" />\n  </div>\n);\n";

struct Harness {
    applier: FixApplier,
    working: MemoryWorkingCopy,
    backups: MemoryBackupStore,
}

fn harness(name: &str, content: &str) -> Harness {
    let working = MemoryWorkingCopy::new(name, content);
    let backups = MemoryBackupStore::default();
    let applier = FixApplier::new(
        FileRevision::initial(name, content),
        Box::new(working.clone()),
        Box::new(backups.clone()),
    );
    Harness {
        applier,
        working,
        backups,
    }
}

fn missing_alt() -> Arc<PatternSource> {
    Arc::new(PatternSource::new().rule("missing-alt", "<img src"))
}

fn issue(kind: &str) -> Issue {
    Issue::at(kind, 1, 1, kind, Severity::Error)
}

fn assert_round_continuity(rounds: &[Round]) {
    for (i, round) in rounds.iter().enumerate() {
        assert_eq!(round.number, i as u32 + 1);
    }
    for pair in rounds.windows(2) {
        assert_eq!(pair[0].issues_after, pair[1].issues_before);
    }
}

#[tokio::test]
async fn single_fix_is_clean_after_two_rounds() {
    let h = harness("Logo.jsx", LOGO);
    let source = missing_alt();
    let outcome = ConvergenceLoop::new(
        h.applier,
        Box::new(source.clone()),
        Arc::new(RegionGrouper::default()),
        Arc::new(StubGenerator::replacing("<img src", "<img alt=\"Company logo\" src")),
        LoopConfig::default(),
    )
    .run()
    .await;

    let report = &outcome.static_phase;
    assert_eq!(report.result, PhaseResult::Clean);
    assert_eq!(report.rounds.len(), 2);
    assert_round_continuity(&report.rounds);

    let first = &report.rounds[0];
    assert_eq!(first.issues_before.len(), 1);
    assert_eq!(first.issues_before[0].span(), Some(crate::issue::LineRange::single(3)));
    assert_eq!(first.groups.len(), 1);
    assert!(first.issues_after.is_empty());
    assert!(report.rounds[1].groups.is_empty());

    assert!(outcome.runtime_phase.is_none());
    assert!(outcome.is_clean());
    assert_eq!(outcome.final_revision, 1);
    assert_eq!(outcome.backups, vec!["Logo.jsx.static.r1.v0".to_string()]);
    assert!(h.working.content().contains("alt=\"Company logo\""));
    // one collect before round 1 and one after it
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn stuck_generator_deadlocks_on_round_three() {
    let h = harness("Logo.jsx", LOGO);
    let outcome = ConvergenceLoop::new(
        h.applier,
        Box::new(missing_alt()),
        Arc::new(RegionGrouper::default()),
        Arc::new(StubGenerator::identity()),
        LoopConfig::default(),
    )
    .run()
    .await;

    let report = &outcome.static_phase;
    assert_eq!(report.rounds.len(), 3);
    assert_round_continuity(&report.rounds);
    assert_eq!(
        report.result,
        PhaseResult::Deadlocked {
            reason: DeadlockReason::RepeatedSignature { window: 3 },
            unresolved_kinds: vec!["missing-alt".to_string()],
        }
    );
    for round in &report.rounds {
        assert_eq!(round.groups[0].outcome, GroupOutcome::Unchanged);
    }
    assert_eq!(h.working.content(), LOGO);
    assert_eq!(h.working.writes(), 0);
    assert!(h.backups.is_empty());
    assert_eq!(outcome.final_revision, 0);
}

#[tokio::test]
async fn analyzer_failure_aborts_and_keeps_applied_revisions() {
    let h = harness("Logo.jsx", LOGO);
    let source = ScriptedSource::new(vec![
        Ok(vec![issue("missing-alt")]),
        Ok(vec![issue("missing-alt")]),
        Err("eslint: cannot find module".to_string()),
    ]);
    let generator = StubGenerator::new(|group, content| {
        Ok(GeneratedFix {
            content: format!("{}// attempt {}\n", content, group.index),
            explanation: None,
        })
    });
    let runtime = ScriptedSource::new(vec![Ok(Vec::new())]);

    let outcome = ConvergenceLoop::new(
        h.applier,
        Box::new(source),
        Arc::new(RegionGrouper::default()),
        Arc::new(generator),
        LoopConfig::default(),
    )
    .with_runtime_source(Box::new(runtime))
    .run()
    .await;

    let report = &outcome.static_phase;
    assert_eq!(report.rounds.len(), 2);
    assert_round_continuity(&report.rounds);
    assert!(!report.rounds[0].is_partial());
    let stopped = &report.rounds[1];
    assert!(stopped.is_partial());
    assert_eq!(stopped.applied_count(), 1);
    match &report.result {
        PhaseResult::Aborted {
            error,
            unresolved_kinds,
        } => {
            assert!(error.contains("cannot find module"));
            assert_eq!(unresolved_kinds, &vec!["missing-alt".to_string()]);
        }
        other => panic!("expected abort, got {:?}", other),
    }
    assert!(outcome.any_aborted());
    assert!(outcome.runtime_phase.is_none(), "runtime never starts after an abort");
    assert_eq!(outcome.final_revision, 2);
    assert_eq!(h.backups.len(), 2);
    assert!(h.working.content().ends_with("// attempt 0\n"));
}

#[tokio::test]
async fn crash_after_first_fix_keeps_the_round_in_history() {
    let h = harness("Logo.jsx", LOGO);
    let sink = MemorySink::default();
    let source = ScriptedSource::new(vec![
        Ok(vec![issue("missing-alt")]),
        Err("eslint crashed".to_string()),
    ]);

    let outcome = ConvergenceLoop::new(
        h.applier,
        Box::new(source),
        Arc::new(RegionGrouper::default()),
        Arc::new(StubGenerator::replacing("<img src", "<img alt=\"Company logo\" src")),
        LoopConfig::default(),
    )
    .with_report_sink(Box::new(sink.clone()))
    .run()
    .await;

    let report = &outcome.static_phase;
    assert_eq!(report.rounds.len(), 1);
    let round = &report.rounds[0];
    assert!(round.is_partial());
    assert_eq!(
        round.groups[0].outcome,
        GroupOutcome::Applied {
            revision: 1,
            explanation: Some("replaced <img src with <img alt=\"Company logo\" src".to_string()),
        }
    );
    assert_eq!(
        report.result.unresolved_kinds(),
        &["missing-alt".to_string()]
    );
    assert_eq!(outcome.final_revision, 1);
    assert_eq!(outcome.backups, vec!["Logo.jsx.static.r1.v0".to_string()]);

    let recorded = sink.rounds.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0], *round);
}

#[tokio::test]
async fn runtime_abort_keeps_static_progress() {
    let h = harness("Logo.jsx", LOGO);
    let runtime = ScriptedSource::new(vec![Err("dev server exited before the audit".to_string())]);

    let outcome = ConvergenceLoop::new(
        h.applier,
        Box::new(missing_alt()),
        Arc::new(RegionGrouper::default()),
        Arc::new(StubGenerator::replacing("<img src", "<img alt=\"Company logo\" src")),
        LoopConfig::default(),
    )
    .with_runtime_source(Box::new(runtime))
    .run()
    .await;

    assert_eq!(outcome.static_phase.result, PhaseResult::Clean);
    assert_eq!(outcome.static_phase.rounds.len(), 2);

    let runtime = outcome.runtime_phase.as_ref().unwrap();
    assert!(runtime.rounds.is_empty());
    match &runtime.result {
        PhaseResult::Aborted { error, .. } => assert!(error.contains("dev server exited")),
        other => panic!("expected abort, got {:?}", other),
    }
    assert_eq!(runtime.final_revision, 1);

    assert!(outcome.any_aborted());
    assert!(!outcome.is_clean());
    assert_eq!(outcome.final_revision, 1);
    assert_eq!(outcome.backups.len(), 1);
    assert!(h.working.content().contains("alt=\"Company logo\""));
}

#[tokio::test]
async fn oscillation_hits_round_limit() {
    let h = harness("Logo.jsx", LOGO);
    let a = || -> Result<Vec<Issue>, String> { Ok(vec![issue("aria-role")]) };
    let b = || -> Result<Vec<Issue>, String> { Ok(vec![issue("role-has-required-aria-props")]) };
    let source = ScriptedSource::new(vec![a(), b(), a(), b(), a()]);
    let config = LoopConfig {
        max_rounds_per_phase: 4,
        ..LoopConfig::default()
    };

    let outcome = ConvergenceLoop::new(
        h.applier,
        Box::new(source),
        Arc::new(RegionGrouper::default()),
        Arc::new(StubGenerator::identity()),
        config,
    )
    .run()
    .await;

    let report = &outcome.static_phase;
    assert_eq!(report.rounds.len(), 4);
    assert_round_continuity(&report.rounds);
    assert_eq!(
        report.result,
        PhaseResult::Deadlocked {
            reason: DeadlockReason::RoundLimit { limit: 4 },
            unresolved_kinds: vec!["aria-role".to_string()],
        }
    );
}

#[tokio::test]
async fn static_deadlock_escalates_to_runtime() {
    let h = harness("Logo.jsx", LOGO);
    let runtime = ScriptedSource::new(vec![Ok(Vec::new())]);
    let mut lp = ConvergenceLoop::new(
        h.applier,
        Box::new(missing_alt()),
        Arc::new(RegionGrouper::default()),
        Arc::new(StubGenerator::identity()),
        LoopConfig::default(),
    )
    .with_runtime_source(Box::new(runtime));

    assert_eq!(lp.state().phase(), Some(Phase::Static));
    match lp.advance().await {
        LoopState::Runtime { static_report } => {
            assert_eq!(static_report.result.label(), "deadlocked");
        }
        other => panic!("expected runtime, got {:?}", other),
    }
    assert!(lp.advance().await.is_done());

    let LoopState::Done(outcome) = lp.state().clone() else {
        panic!("loop did not finish");
    };
    let runtime = outcome.runtime_phase.as_ref().unwrap();
    assert_eq!(runtime.result, PhaseResult::Clean);
    assert_eq!(runtime.rounds.len(), 1);
    assert!(runtime.rounds.iter().all(|r| r.phase == Phase::Runtime));
    assert!(!outcome.is_clean());
    assert_eq!(outcome.total_rounds(), 4);

    // advancing a finished loop changes nothing
    assert!(lp.advance().await.is_done());
}

#[tokio::test]
async fn skip_runtime_ends_after_static() {
    let h = harness("Logo.jsx", LOGO);
    let runtime = ScriptedSource::new(vec![Ok(vec![issue("image-alt")])]);
    let config = LoopConfig {
        skip_runtime: true,
        ..LoopConfig::default()
    };
    let outcome = ConvergenceLoop::new(
        h.applier,
        Box::new(PatternSource::new()),
        Arc::new(RegionGrouper::default()),
        Arc::new(StubGenerator::identity()),
        config,
    )
    .with_runtime_source(Box::new(runtime))
    .run()
    .await;

    assert_eq!(outcome.static_phase.result, PhaseResult::Clean);
    assert_eq!(outcome.static_phase.rounds.len(), 1);
    assert!(outcome.runtime_phase.is_none());
}

#[tokio::test]
async fn backups_match_content_before_each_fix() {
    let h = harness("Strip.jsx", STRIP);
    // fixes whichever image is first still missing alt
    let generator = StubGenerator::new(|_, content| {
        Ok(GeneratedFix {
            content: content.replacen("<img src", "<img alt=\"\" src", 1),
            explanation: Some("marked image decorative".to_string()),
        })
    });
    let mut lp = ConvergenceLoop::new(
        h.applier,
        Box::new(missing_alt()),
        Arc::new(RegionGrouper::new(0)),
        Arc::new(generator),
        LoopConfig::default(),
    );
    while !lp.advance().await.is_done() {}

    let LoopState::Done(outcome) = lp.state() else {
        panic!("loop did not finish");
    };
    assert_eq!(outcome.static_phase.result, PhaseResult::Clean);
    assert_eq!(outcome.static_phase.rounds[0].applied_count(), 3);

    let mut expected = vec![STRIP.to_string()];
    for _ in 0..3 {
        let prev = expected.last().cloned().unwrap_or_default();
        expected.push(prev.replacen("<img src", "<img alt=\"\" src", 1));
    }

    let log = lp.applier().backup_log();
    assert_eq!(log.len(), 3);
    assert_eq!(h.backups.len(), 3);
    for (n, key) in log.iter().enumerate() {
        let saved = lp.applier().backups().load(key).unwrap();
        assert_eq!(saved.as_deref(), Some(expected[n].as_str()));
    }
    assert_eq!(lp.applier().current().content(), expected[3]);
    assert_eq!(lp.applier().backups().load(&log[0]).unwrap().as_deref(), Some(STRIP));
}

#[tokio::test]
async fn unmappable_runtime_issue_is_fixed_with_whole_file_scope() {
    let h = harness("Twins.jsx", TWINS);
    let runtime_issue = Issue::in_dom(
        "image-alt",
        DomDescriptor::new("div > img"),
        "Image elements do not have [alt] attributes",
        Severity::Error,
    );
    let oracle = Arc::new(FixedLineOracle::failing("model returned no line"));
    let runtime = MappedIssueSource::new(
        ScriptedSource::new(vec![Ok(vec![runtime_issue])]),
        SourceMapper::new(Some(oracle.clone())),
    );
    let generator = Arc::new(StubGenerator::identity());

    let outcome = ConvergenceLoop::new(
        h.applier,
        Box::new(PatternSource::new()),
        Arc::new(RegionGrouper::default()),
        generator.clone(),
        LoopConfig::default(),
    )
    .with_runtime_source(Box::new(runtime))
    .run()
    .await;

    let runtime = outcome.runtime_phase.as_ref().unwrap();
    let first = &runtime.rounds[0];
    assert_eq!(first.issues_before.len(), 1);
    assert_eq!(first.issues_before[0].location, Location::Unresolved);

    let seen = generator.seen();
    assert!(!seen.is_empty());
    assert_eq!(seen[0].issues[0].kind, "image-alt");
    assert!(seen[0].needs_whole_file());

    assert_eq!(runtime.result.label(), "deadlocked");
    // one lookup per collection: before round 1 and after each of three rounds
    assert_eq!(oracle.calls(), 4);
}

#[tokio::test]
async fn sink_receives_every_round_and_phase() {
    let h = harness("Logo.jsx", LOGO);
    let sink = MemorySink::default();
    let outcome = ConvergenceLoop::new(
        h.applier,
        Box::new(missing_alt()),
        Arc::new(RegionGrouper::default()),
        Arc::new(StubGenerator::identity()),
        LoopConfig::default(),
    )
    .with_runtime_source(Box::new(ScriptedSource::new(vec![Ok(Vec::new())])))
    .with_report_sink(Box::new(sink.clone()))
    .run()
    .await;

    let rounds = sink.rounds.lock().unwrap();
    let phases = sink.phases.lock().unwrap();
    assert_eq!(rounds.len(), outcome.total_rounds());
    assert_eq!(phases.len(), 2);
    assert_eq!(phases[0], outcome.static_phase);
}

#[tokio::test]
async fn repeated_collection_yields_same_kinds() {
    let revision = FileRevision::initial("Strip.jsx", STRIP);
    let source = missing_alt();
    let first = source.collect(&revision).await.unwrap();
    let second = source.collect(&revision).await.unwrap();
    assert_eq!(
        IssueSignature::from_issues(&first, SignatureMode::Kind),
        IssueSignature::from_issues(&second, SignatureMode::Kind)
    );
    assert_eq!(first.len(), 3);
}
