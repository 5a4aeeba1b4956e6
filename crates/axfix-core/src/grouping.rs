//! Issue grouping
//!
//! Issues whose fixes would touch overlapping or adjacent code are fixed in one
//! generation call so a single pass can reconcile the edits. Whatever the
//! strategy, the result is a partition: every issue lands in exactly one
//! group, and group order is a pure function of the input order.

use crate::issue::Issue;
use crate::protocol::{BoxFuture, GroupingOracle};
use crate::round::FixGroup;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Which grouping strategy a run uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingStrategy {
    /// Line-span and element overlap
    #[default]
    Region,
    /// LLM proposal, validated, with region grouping as fallback
    Oracle,
}

pub trait IssueGrouper: Send + Sync {
    fn group<'a>(&'a self, issues: &'a [Issue], content: &'a str) -> BoxFuture<'a, Vec<FixGroup>>;
}

/// Structural grouping over line spans and DOM selectors.
///
/// Located issues whose spans overlap or sit within `adjacency` lines of each
/// other share a group, as do runtime issues on the same selector. Issues with
/// no location each get their own group, since their fix scope is the whole
/// file and merging them would only make one call do everything.
#[derive(Debug, Clone)]
pub struct RegionGrouper {
    adjacency: usize,
}

impl Default for RegionGrouper {
    fn default() -> Self {
        Self::new(1)
    }
}

impl RegionGrouper {
    pub fn new(adjacency: usize) -> Self {
        Self { adjacency }
    }

    pub fn partition(&self, issues: &[Issue]) -> Vec<FixGroup> {
        let mut sets = DisjointSets::new(issues.len());

        for i in 0..issues.len() {
            for j in (i + 1)..issues.len() {
                if self.conflicts(&issues[i], &issues[j]) {
                    sets.union(i, j);
                }
            }
        }

        assemble(issues, |i| sets.find(i))
    }

    fn conflicts(&self, a: &Issue, b: &Issue) -> bool {
        if let (Some(x), Some(y)) = (a.span(), b.span()) {
            if x.touches(&y, self.adjacency) {
                return true;
            }
        }
        match (&a.dom, &b.dom) {
            (Some(x), Some(y)) => !x.selector.is_empty() && x.selector == y.selector,
            _ => false,
        }
    }
}

impl IssueGrouper for RegionGrouper {
    fn group<'a>(
        &'a self,
        issues: &'a [Issue],
        _content: &'a str,
    ) -> BoxFuture<'a, Vec<FixGroup>> {
        Box::pin(async move { self.partition(issues) })
    }
}

/// Asks the LLM which issues belong together, then repairs its answer into a
/// valid partition. Unknown, repeated, or missing issue numbers are never
/// trusted: leftovers are grouped structurally and appended.
pub struct OracleGrouper {
    oracle: Arc<dyn GroupingOracle>,
    fallback: RegionGrouper,
}

impl OracleGrouper {
    pub fn new(oracle: Arc<dyn GroupingOracle>, fallback: RegionGrouper) -> Self {
        Self { oracle, fallback }
    }
}

impl IssueGrouper for OracleGrouper {
    fn group<'a>(&'a self, issues: &'a [Issue], content: &'a str) -> BoxFuture<'a, Vec<FixGroup>> {
        Box::pin(async move {
            if issues.len() <= 1 {
                return self.fallback.partition(issues);
            }
            match self.oracle.propose_groups(issues, content).await {
                Ok(proposal) => repair_partition(issues, &proposal, &self.fallback),
                Err(err) => {
                    warn!(error = %err, "grouping oracle failed, using region grouping");
                    self.fallback.partition(issues)
                }
            }
        })
    }
}

/// Turn a 1-based proposal into a partition of `issues`.
pub fn repair_partition(
    issues: &[Issue],
    proposal: &[Vec<usize>],
    fallback: &RegionGrouper,
) -> Vec<FixGroup> {
    let mut owner: Vec<Option<usize>> = vec![None; issues.len()];
    let mut dropped = 0usize;

    for (group_id, numbers) in proposal.iter().enumerate() {
        for &number in numbers {
            match number.checked_sub(1).filter(|&i| i < issues.len()) {
                Some(i) if owner[i].is_none() => owner[i] = Some(group_id),
                _ => dropped += 1,
            }
        }
    }

    let leftovers: Vec<usize> = (0..issues.len()).filter(|&i| owner[i].is_none()).collect();
    if dropped > 0 || !leftovers.is_empty() {
        debug!(
            dropped,
            leftovers = leftovers.len(),
            "repairing grouping proposal"
        );
    }

    if !leftovers.is_empty() {
        let leftover_issues: Vec<Issue> = leftovers.iter().map(|&i| issues[i].clone()).collect();
        let base = proposal.len();
        let mut position_of = HashMap::new();
        for group in fallback.partition(&leftover_issues) {
            for issue in &group.issues {
                position_of.insert(issue.key(), base + group.index);
            }
        }
        for &i in &leftovers {
            owner[i] = position_of.get(&issues[i].key()).copied();
        }
    }

    // Every slot is filled now; a missing owner would only come from
    // duplicate identities, which share the first occurrence's group.
    let mut last = proposal.len() + issues.len();
    assemble(issues, |i| {
        owner[i].unwrap_or_else(|| {
            last += 1;
            last
        })
    })
}

/// Build groups from a label per issue. Groups are ordered by their first
/// member's position and members keep input order.
fn assemble(issues: &[Issue], mut label: impl FnMut(usize) -> usize) -> Vec<FixGroup> {
    let mut order: Vec<usize> = Vec::new();
    let mut members: BTreeMap<usize, Vec<Issue>> = BTreeMap::new();

    for (i, issue) in issues.iter().enumerate() {
        let id = label(i);
        let bucket = members.entry(id).or_default();
        if bucket.is_empty() {
            order.push(id);
        }
        bucket.push(issue.clone());
    }

    order
        .into_iter()
        .enumerate()
        .filter_map(|(index, id)| members.remove(&id).map(|issues| FixGroup::new(index, issues)))
        .collect()
}

struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = i;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Smaller index wins so roots stay stable for a given input.
            let (keep, merge) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[merge] = keep;
        }
    }
}
