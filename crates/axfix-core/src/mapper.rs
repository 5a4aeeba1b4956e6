//! DOM → source mapping for runtime issues
//!
//! Structural matching first: candidate JSX elements with the same tag,
//! narrowed by id, classes, visible text, and attribute values from the
//! audit's snippet. Only when several candidates remain equally plausible do
//! we ask the line oracle. Failing both, the issue keeps `Location::Unresolved`
//! and its fix is scoped to the whole file. Issues are never dropped here.

use crate::error::{AnalyzerError, MappingError};
use crate::issue::{DomDescriptor, Issue, LineRange, Location};
use crate::jsx::{self, Dialect, JsxElement};
use crate::protocol::{BoxFuture, IssueSource, LineOracle};
use crate::revision::FileRevision;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone, Default)]
pub struct SourceMapper {
    oracle: Option<Arc<dyn LineOracle>>,
}

impl SourceMapper {
    pub fn new(oracle: Option<Arc<dyn LineOracle>>) -> Self {
        Self { oracle }
    }

    pub async fn map(
        &self,
        dom: &DomDescriptor,
        revision: &FileRevision,
    ) -> Result<LineRange, MappingError> {
        let content = revision.content();
        let tag = dom
            .element_tag()
            .ok_or_else(|| MappingError::NoCandidate(dom.selector.clone()))?;

        let elements = jsx::extract_elements(content, Dialect::from_path(revision.path()))
            .map_err(|e| MappingError::NoCandidate(format!("{} ({})", dom.selector, e)))?;
        let candidates: Vec<&JsxElement> = elements.iter().filter(|e| e.is_tag(&tag)).collect();

        match candidates.len() {
            0 => return Err(MappingError::NoCandidate(format!("<{}>", tag))),
            1 => return Ok(candidates[0].opening),
            _ => {}
        }

        let narrowed = narrow(dom, &candidates);
        if let [only] = narrowed.as_slice() {
            debug!(tag = %tag, lines = %only.opening, "structural match after narrowing");
            return Ok(only.opening);
        }

        let ambiguous = MappingError::Ambiguous {
            tag: tag.clone(),
            candidates: narrowed.len(),
        };
        let Some(oracle) = &self.oracle else {
            return Err(ambiguous);
        };

        info!(tag = %tag, candidates = narrowed.len(), "escalating element mapping to line oracle");
        let range = oracle
            .locate(dom, content)
            .await
            .map_err(|e| MappingError::Oracle(e.to_string()))?;

        let line_count = revision.line_count().max(1);
        if range.start == 0 || range.end > line_count {
            return Err(MappingError::Oracle(format!(
                "line range {} is outside the file (1-{})",
                range, line_count
            )));
        }
        Ok(range)
    }

    /// Resolve every unresolved DOM-carrying issue in place.
    pub async fn resolve_all(&self, issues: &mut [Issue], revision: &FileRevision) {
        for issue in issues.iter_mut() {
            if issue.location.is_resolved() {
                continue;
            }
            let Some(dom) = issue.dom.clone() else {
                continue;
            };
            match self.map(&dom, revision).await {
                Ok(range) => issue.location = Location::range(range),
                Err(err) => {
                    warn!(
                        kind = %issue.kind,
                        selector = %dom.selector,
                        error = %err,
                        "keeping issue without source location"
                    );
                }
            }
        }
    }
}

/// Keep the best-scoring candidates. Returns all of them if nothing scores.
fn narrow<'e>(dom: &DomDescriptor, candidates: &[&'e JsxElement]) -> Vec<&'e JsxElement> {
    let scores: Vec<usize> = candidates.iter().map(|c| score(dom, c)).collect();
    let best = scores.iter().copied().max().unwrap_or(0);
    if best == 0 {
        return candidates.to_vec();
    }
    candidates
        .iter()
        .zip(scores)
        .filter(|(_, s)| *s == best)
        .map(|(c, _)| *c)
        .collect()
}

fn score(dom: &DomDescriptor, element: &JsxElement) -> usize {
    let mut score = 0;

    if let Some(id) = dom.selector_id() {
        if element.attribute("id") == Some(id) {
            score += 4;
        }
    }

    let classes = dom.selector_classes();
    if !classes.is_empty() {
        let class_attr = element
            .attribute("className")
            .or_else(|| element.attribute("class"))
            .unwrap_or("");
        let present = classes
            .iter()
            .filter(|c| class_attr.split_whitespace().any(|have| have == **c))
            .count();
        score += present * 2;
    }

    if let Some(label) = dom.label.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
        if element.inner_text().contains(label) || element.opening_text.contains(label) {
            score += 3;
        }
    }

    if let Some(snippet) = &dom.snippet {
        for value in quoted_values(snippet) {
            if value.len() > 1 && element.opening_text.contains(value) {
                score += 1;
            }
        }
    }

    score
}

/// Attribute values quoted in an HTML snippet.
fn quoted_values(snippet: &str) -> impl Iterator<Item = &str> {
    snippet.split('"').skip(1).step_by(2)
}

/// Runtime issue source with source mapping applied to everything it returns.
pub struct MappedIssueSource<S> {
    inner: S,
    mapper: SourceMapper,
}

impl<S: IssueSource> MappedIssueSource<S> {
    pub fn new(inner: S, mapper: SourceMapper) -> Self {
        Self { inner, mapper }
    }
}

impl<S: IssueSource> IssueSource for MappedIssueSource<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn collect<'a>(
        &'a self,
        revision: &'a FileRevision,
    ) -> BoxFuture<'a, Result<Vec<Issue>, AnalyzerError>> {
        Box::pin(async move {
            let mut issues = self.inner.collect(revision).await?;
            self.mapper.resolve_all(&mut issues, revision).await;
            Ok(issues)
        })
    }
}
