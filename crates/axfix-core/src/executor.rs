use crate::applier::FixApplier;
use crate::error::RoundError;
use crate::grouping::IssueGrouper;
use crate::issue::{dedup_issues, Issue};
use crate::protocol::{FixGenerator, IssueSource};
use crate::revision::Phase;
use crate::round::{GroupOutcome, GroupRecord, Round};
use tracing::{debug, info, warn};

/// A round that ended early. `partial` is the history up to the failure and
/// is absent only when the opening collection failed.
#[derive(Debug)]
pub struct RoundAborted {
    pub partial: Option<Round>,
    pub error: RoundError,
}

impl RoundAborted {
    fn before_start(error: impl Into<RoundError>) -> Self {
        Self {
            partial: None,
            error: error.into(),
        }
    }
}

/// Runs one collect → group → fix → re-collect cycle.
///
/// Groups are fixed strictly in order and each one is generated against the
/// revision the previous group left behind. A failed generation only marks
/// its own group; analyzer and apply failures end the round with an error
/// that still carries the groups handled so far.
pub struct RoundExecutor<'a> {
    source: &'a dyn IssueSource,
    grouper: &'a dyn IssueGrouper,
    generator: &'a dyn FixGenerator,
}

impl<'a> RoundExecutor<'a> {
    pub fn new(
        source: &'a dyn IssueSource,
        grouper: &'a dyn IssueGrouper,
        generator: &'a dyn FixGenerator,
    ) -> Self {
        Self {
            source,
            grouper,
            generator,
        }
    }

    /// Collect issues on the live revision, deduplicated.
    pub async fn collect(&self, applier: &FixApplier) -> Result<Vec<Issue>, RoundError> {
        let issues = self.source.collect(applier.current()).await?;
        Ok(dedup_issues(issues))
    }

    /// Run round `number` of `phase`. `known` is the previous round's
    /// `issues_after`; when absent the round collects its own starting set.
    pub async fn run_round(
        &self,
        applier: &mut FixApplier,
        phase: Phase,
        number: u32,
        known: Option<Vec<Issue>>,
    ) -> Result<Round, RoundAborted> {
        let issues_before = match known {
            Some(issues) => issues,
            None => self.collect(applier).await.map_err(RoundAborted::before_start)?,
        };

        let mut round = Round {
            phase,
            number,
            issues_before,
            groups: Vec::new(),
            issues_after: Vec::new(),
            error: None,
        };
        if round.issues_before.is_empty() {
            debug!(%phase, round = number, "no issues, nothing to fix");
            return Ok(round);
        }

        let groups = self
            .grouper
            .group(&round.issues_before, applier.current().content())
            .await;
        info!(
            %phase,
            round = number,
            issues = round.issues_before.len(),
            groups = groups.len(),
            source = self.source.name(),
            "starting round"
        );

        for group in groups {
            let revision = applier.current().clone();
            let outcome = match self.generator.generate(&group, &revision).await {
                Err(err) => {
                    warn!(%phase, round = number, group = group.index, error = %err, "fix failed");
                    GroupOutcome::Failed {
                        error: err.to_string(),
                    }
                }
                Ok(fix) if fix.content == revision.content() => {
                    debug!(%phase, round = number, group = group.index, "fix left content unchanged");
                    GroupOutcome::Unchanged
                }
                Ok(fix) => match applier.apply(phase, number, fix.content) {
                    Ok(next) => {
                        info!(
                            %phase,
                            round = number,
                            group = group.index,
                            revision = next.number(),
                            kinds = ?group.kinds(),
                            "applied fix"
                        );
                        GroupOutcome::Applied {
                            revision: next.number(),
                            explanation: fix.explanation,
                        }
                    }
                    Err(err) => {
                        let error = RoundError::from(err);
                        round.groups.push(GroupRecord {
                            group,
                            outcome: GroupOutcome::Failed {
                                error: error.to_string(),
                            },
                        });
                        return Err(stopped(round, error));
                    }
                },
            };
            round.groups.push(GroupRecord { group, outcome });
        }

        match self.collect(applier).await {
            Ok(issues_after) => {
                round.issues_after = issues_after;
                Ok(round)
            }
            Err(error) => Err(stopped(round, error)),
        }
    }
}

fn stopped(mut round: Round, error: RoundError) -> RoundAborted {
    round.error = Some(error.to_string());
    RoundAborted {
        partial: Some(round),
        error,
    }
}
