//! axfix - drives a React component to zero accessibility issues
//!
//! Lints with ESLint (jsx-a11y), audits the rendered page with Lighthouse, and
//! asks an LLM for fixes until both phases are clean or stop making progress.

use anyhow::{Context, Result};
use axfix_adapters::config::{Config, StaticAnalysisConfig, API_KEY_VAR};
use axfix_adapters::eslint::EslintSource;
use axfix_adapters::lighthouse::LighthouseHarness;
use axfix_adapters::prettier::Formatter;
use axfix_adapters::report::{write_report, JsonlReportSink, RunReport};
use axfix_adapters::workspace::{preserve_original, FsBackupStore, FsWorkingCopy, RunLock};
use axfix_core::applier::FixApplier;
use axfix_core::convergence::ConvergenceLoop;
use axfix_core::grouping::{GroupingStrategy, IssueGrouper, OracleGrouper, RegionGrouper};
use axfix_core::mapper::{MappedIssueSource, SourceMapper};
use axfix_core::protocol::{FixGenerator, GroupingOracle, LineOracle};
use axfix_core::revision::{FileRevision, Phase};
use axfix_core::round::{DeadlockReason, GroupOutcome, PhaseReport, PhaseResult, RunOutcome};
use axfix_engine::{LlmOracle, OpenRouterClient, Usage};
use chrono::Utc;
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "axfix",
    about = "Fix accessibility issues in a React component",
    long_about = "Lints the component with ESLint (jsx-a11y), audits the rendered page with\n\
                  Lighthouse, and applies LLM-generated fixes round by round until no issues\n\
                  remain or the fixes stop making progress.",
    version
)]
struct Args {
    /// Component file to fix (.jsx or .tsx)
    file: PathBuf,

    /// Config file (defaults to ./axfix.toml, then the user config)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip the Lighthouse phase
    #[arg(long)]
    static_only: bool,

    /// Where to write the JSON run report
    #[arg(long)]
    report: Option<PathBuf>,

    /// Debug logging (AXFIX_LOG overrides)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("  ! {:#}", err);
            ExitCode::from(1)
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("AXFIX_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(args: Args) -> Result<ExitCode> {
    let (mut config, config_path) = Config::load(args.config.as_deref())?;
    if let Some(path) = &config_path {
        debug!(path = %path.display(), "using config");
    }
    if args.static_only {
        config.convergence.skip_runtime = true;
    }
    if let Some(report) = args.report {
        config.output.report_file = Some(report);
    }

    let api_key = Config::api_key().ok_or_else(|| {
        anyhow::anyhow!("No API key found. Set {}.", API_KEY_VAR)
    })?;

    let content = fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;

    let state_dir = config.output.state_dir.clone();
    let _lock = RunLock::acquire(&state_dir, &args.file)?;
    let original_backup = preserve_original(&args.file, &content, &config.output.backup_dir())
        .context("Failed to save a copy of the original file")?;

    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    info!(file = %args.file.display(), %run_id, "starting run");

    let backups = FsBackupStore::for_run(&config.output.backup_dir(), &run_id)?;
    let backup_dir = backups.dir().to_path_buf();
    let mut applier = FixApplier::new(
        FileRevision::initial(&args.file, content),
        Box::new(FsWorkingCopy::new(&args.file)),
        Box::new(backups),
    );
    if config.static_analysis.format_first {
        format_first(&mut applier, &config.static_analysis).await?;
    }

    let client = OpenRouterClient::new(api_key, config.llm.clone())?;
    let oracle = Arc::new(LlmOracle::new(Arc::new(client), &config.llm));

    let region = RegionGrouper::new(config.grouping.adjacency_lines);
    let grouper: Arc<dyn IssueGrouper> = match config.grouping.strategy {
        GroupingStrategy::Region => Arc::new(region),
        GroupingStrategy::Oracle => Arc::new(OracleGrouper::new(
            oracle.clone() as Arc<dyn GroupingOracle>,
            region,
        )),
    };

    let harness = Arc::new(LighthouseHarness::new(config.runtime.clone()));
    let mut convergence = ConvergenceLoop::new(
        applier,
        Box::new(EslintSource::new(config.static_analysis.clone())),
        grouper,
        oracle.clone() as Arc<dyn FixGenerator>,
        config.convergence.clone(),
    )
    .with_report_sink(Box::new(JsonlReportSink::new(&state_dir, run_id)?));
    if !config.convergence.skip_runtime {
        let mapper = SourceMapper::new(Some(oracle.clone() as Arc<dyn LineOracle>));
        convergence =
            convergence.with_runtime_source(Box::new(MappedIssueSource::new(harness.clone(), mapper)));
    }

    let outcome = convergence.run().await;

    let report = RunReport {
        run_id,
        file: args.file.clone(),
        started_at,
        finished_at: Utc::now(),
        original_backup: Some(original_backup),
        outcome,
        manual_checks: harness.manual_checks(),
    };
    let report_path = config.output.report_path();
    write_report(&report_path, &report)?;

    print_summary(&report, &oracle.usage(), &report_path, &backup_dir);
    Ok(ExitCode::from(exit_status(&report.outcome)))
}

/// Normalise formatting before the first lint so line numbers stay stable.
/// A formatter failure only costs that normalisation.
async fn format_first(applier: &mut FixApplier, settings: &StaticAnalysisConfig) -> Result<()> {
    let formatter = Formatter::new(settings.format_command.clone(), settings.timeout_secs);
    match formatter.format(applier.current()).await {
        Ok(formatted) if formatted != applier.current().content() => {
            applier
                .apply(Phase::Static, 0, formatted)
                .context("Failed to write formatted file")?;
            info!("formatted before first round");
        }
        Ok(_) => debug!("already formatted"),
        Err(err) => warn!(error = %format!("{:#}", err), "formatter failed, continuing unformatted"),
    }
    Ok(())
}

/// 0 when every phase that ran is clean, 2 when one stalled, 1 when one aborted.
fn exit_status(outcome: &RunOutcome) -> u8 {
    if outcome.any_aborted() {
        1
    } else if outcome.is_clean() {
        0
    } else {
        2
    }
}

fn describe_result(result: &PhaseResult) -> String {
    match result {
        PhaseResult::Clean => "clean".to_string(),
        PhaseResult::Deadlocked {
            reason: DeadlockReason::RepeatedSignature { window },
            ..
        } => format!("stuck (same issues for {} rounds)", window),
        PhaseResult::Deadlocked {
            reason: DeadlockReason::RoundLimit { limit },
            ..
        } => format!("stopped at the {} round limit", limit),
        PhaseResult::Aborted { error, .. } => format!("aborted: {}", error),
    }
}

fn print_phase(report: &PhaseReport) {
    let label = match report.phase {
        Phase::Static => "Static (ESLint)",
        Phase::Runtime => "Runtime (Lighthouse)",
    };
    println!(
        "  {}: {} after {} round(s)",
        label,
        describe_result(&report.result),
        report.rounds.len()
    );

    for round in &report.rounds {
        for record in &round.groups {
            let kinds = record.group.kinds().join(", ");
            match &record.outcome {
                GroupOutcome::Applied { explanation, .. } => {
                    println!("    + round {}: {}", round.number, kinds);
                    if let Some(explanation) = explanation {
                        println!("      {}", explanation.lines().next().unwrap_or_default());
                    }
                }
                GroupOutcome::Unchanged => {
                    println!("    ! round {}: {} (no change proposed)", round.number, kinds)
                }
                GroupOutcome::Failed { error } => {
                    println!("    ! round {}: {} ({})", round.number, kinds, error)
                }
            }
        }
        if let Some(error) = &round.error {
            println!("    ! round {} stopped early: {}", round.number, error);
        }
    }

    let unresolved = report.result.unresolved_kinds();
    if !unresolved.is_empty() {
        println!("    ! unresolved: {}", unresolved.join(", "));
    }
}

fn print_summary(report: &RunReport, usage: &Usage, report_path: &Path, backup_dir: &Path) {
    println!();
    println!("  axfix: {}", report.file.display());
    println!("  ─────────────────────");
    for phase in report.outcome.phases() {
        print_phase(phase);
    }
    if report.outcome.runtime_phase.is_none() && !report.outcome.any_aborted() {
        println!("  Runtime (Lighthouse): skipped");
    }

    if !report.manual_checks.is_empty() {
        println!();
        println!("  Check by hand:");
        for check in &report.manual_checks {
            println!("    - {}", check.title);
        }
    }

    println!();
    println!(
        "  {} revision(s) written, {} backup(s) in {}",
        report.outcome.final_revision,
        report.outcome.backups.len(),
        backup_dir.display()
    );
    if let Some(original) = &report.original_backup {
        println!("  Original saved to {}", original.display());
    }
    println!("  Report: {}", report_path.display());
    if usage.total_tokens > 0 {
        match usage.cost {
            Some(cost) => println!("  LLM usage: {} tokens (${:.4})", usage.total_tokens, cost),
            None => println!("  LLM usage: {} tokens", usage.total_tokens),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase(phase: Phase, result: PhaseResult) -> PhaseReport {
        PhaseReport {
            phase,
            result,
            rounds: Vec::new(),
            final_revision: 0,
        }
    }

    fn outcome(static_result: PhaseResult, runtime: Option<PhaseResult>) -> RunOutcome {
        RunOutcome {
            static_phase: phase(Phase::Static, static_result),
            runtime_phase: runtime.map(|r| phase(Phase::Runtime, r)),
            final_revision: 0,
            backups: Vec::new(),
        }
    }

    fn deadlocked() -> PhaseResult {
        PhaseResult::Deadlocked {
            reason: DeadlockReason::RepeatedSignature { window: 3 },
            unresolved_kinds: vec!["image-alt".to_string()],
        }
    }

    fn aborted() -> PhaseResult {
        PhaseResult::Aborted {
            error: "eslint crashed".to_string(),
            unresolved_kinds: Vec::new(),
        }
    }

    #[test]
    fn test_exit_status() {
        assert_eq!(exit_status(&outcome(PhaseResult::Clean, Some(PhaseResult::Clean))), 0);
        assert_eq!(exit_status(&outcome(PhaseResult::Clean, None)), 0);
        assert_eq!(exit_status(&outcome(deadlocked(), Some(PhaseResult::Clean))), 2);
        assert_eq!(exit_status(&outcome(aborted(), None)), 1);
        assert_eq!(exit_status(&outcome(deadlocked(), Some(aborted()))), 1);
        assert_eq!(exit_status(&outcome(PhaseResult::Clean, Some(aborted()))), 1);
    }

    #[test]
    fn test_describe_result() {
        assert_eq!(describe_result(&PhaseResult::Clean), "clean");
        assert!(describe_result(&deadlocked()).contains("3 rounds"));
        assert!(describe_result(&aborted()).contains("eslint crashed"));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["axfix", "src/Card.tsx", "--static-only", "-v"]);
        assert_eq!(args.file, PathBuf::from("src/Card.tsx"));
        assert!(args.static_only);
        assert!(args.verbose);
        assert!(args.config.is_none());
    }
}
