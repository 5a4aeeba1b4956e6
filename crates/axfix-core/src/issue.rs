//! Normalized accessibility issues
//!
//! Both detection modalities (lint and rendered-DOM audit) are adapted into the
//! same `Issue` shape so grouping, fixing, and deadlock tracking never care
//! which tool produced them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// How bad the analyzer thinks an issue is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

/// Inclusive, 1-based span of source lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    pub fn single(line: usize) -> Self {
        Self::new(line, line)
    }

    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, line: usize) -> bool {
        (self.start..=self.end).contains(&line)
    }

    /// True when the two spans overlap or are at most `slack` lines apart.
    pub fn touches(&self, other: &LineRange, slack: usize) -> bool {
        self.start <= other.end.saturating_add(slack) && other.start <= self.end.saturating_add(slack)
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Where in the source an issue lives, as far as we know.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Location {
    /// Exact position reported by the static analyzer
    Point { line: usize, column: usize },
    /// Best-effort span resolved from a DOM descriptor
    Range { start: usize, end: usize },
    /// Could not be tied to source; fixes must consider the whole file
    Unresolved,
}

impl Location {
    pub fn range(range: LineRange) -> Self {
        Location::Range {
            start: range.start,
            end: range.end,
        }
    }

    pub fn span(&self) -> Option<LineRange> {
        match self {
            Location::Point { line, .. } => Some(LineRange::single(*line)),
            Location::Range { start, end } => Some(LineRange::new(*start, *end)),
            Location::Unresolved => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Location::Unresolved)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Point { line, column } => write!(f, "{}:{}", line, column),
            Location::Range { start, end } => write!(f, "{}", LineRange::new(*start, *end)),
            Location::Unresolved => write!(f, "?"),
        }
    }
}

/// What the audit runner knows about an offending rendered element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DomDescriptor {
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    /// Accessible name or visible text the audit attached to the node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl DomDescriptor {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            ..Self::default()
        }
    }

    /// Element name, from the explicit tag, the HTML snippet, or the last selector step.
    pub fn element_tag(&self) -> Option<String> {
        if let Some(tag) = self.tag.as_deref().filter(|t| !t.trim().is_empty()) {
            return Some(tag.trim().to_ascii_lowercase());
        }
        if let Some(tag) = self.snippet.as_deref().and_then(tag_from_snippet) {
            return Some(tag);
        }
        let last = self
            .selector
            .rsplit(|c: char| c.is_whitespace() || c == '>')
            .find(|step| !step.is_empty())?;
        let name: String = last
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect();
        if name.is_empty() {
            None
        } else {
            Some(name.to_ascii_lowercase())
        }
    }

    /// `#id` from the last selector step, if any.
    pub fn selector_id(&self) -> Option<&str> {
        let last = self.selector.split_whitespace().last()?;
        let start = last.find('#')? + 1;
        let rest = &last[start..];
        let end = rest
            .find(|c: char| matches!(c, '.' | '[' | ':' | '>'))
            .unwrap_or(rest.len());
        Some(&rest[..end]).filter(|id| !id.is_empty())
    }

    /// `.class` names from the last selector step.
    pub fn selector_classes(&self) -> Vec<&str> {
        let Some(last) = self.selector.split_whitespace().last() else {
            return Vec::new();
        };
        last.split('.')
            .skip(1)
            .map(|part| {
                let end = part
                    .find(|c: char| matches!(c, '#' | '[' | ':' | '>'))
                    .unwrap_or(part.len());
                &part[..end]
            })
            .filter(|class| !class.is_empty())
            .collect()
    }
}

fn tag_from_snippet(snippet: &str) -> Option<String> {
    let rest = snippet.trim_start().strip_prefix('<')?;
    let name: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name.to_ascii_lowercase())
    }
}

/// A single detected accessibility defect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Rule or audit id that fired (e.g. `jsx-a11y/alt-text`, `image-alt`)
    pub kind: String,
    pub location: Location,
    pub message: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom: Option<DomDescriptor>,
}

impl Issue {
    pub fn at(
        kind: impl Into<String>,
        line: usize,
        column: usize,
        message: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            kind: kind.into(),
            location: Location::Point { line, column },
            message: message.into(),
            severity,
            dom: None,
        }
    }

    /// Runtime issue whose source location is not known yet.
    pub fn in_dom(
        kind: impl Into<String>,
        dom: DomDescriptor,
        message: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            kind: kind.into(),
            location: Location::Unresolved,
            message: message.into(),
            severity,
            dom: Some(dom),
        }
    }

    pub fn key(&self) -> IssueKey {
        IssueKey {
            kind: self.kind.clone(),
            location: self.location.clone(),
            selector: self.dom.as_ref().map(|d| d.selector.clone()),
        }
    }

    pub fn span(&self) -> Option<LineRange> {
        self.location.span()
    }

    /// One-line rendering in the familiar lint layout: `3:7  error  message  rule`.
    pub fn describe(&self) -> String {
        let mut line = format!(
            "{}  {}  {}  {}",
            self.location,
            self.severity.label(),
            self.message.trim(),
            self.kind
        );
        if let Some(dom) = &self.dom {
            if !dom.selector.is_empty() {
                line.push_str(&format!("  [element: {}]", dom.selector));
            }
            if let Some(snippet) = &dom.snippet {
                line.push_str(&format!("  [html: {}]", snippet.trim()));
            }
        }
        if !self.location.is_resolved() {
            line.push_str("  [source location unknown: consider the whole file]");
        }
        line
    }
}

/// Identity used for deduplication: two issues with the same kind at
/// different places are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IssueKey {
    pub kind: String,
    pub location: Location,
    pub selector: Option<String>,
}

/// Drop repeated issues, keeping the first occurrence of each identity.
pub fn dedup_issues(issues: Vec<Issue>) -> Vec<Issue> {
    let mut seen = HashSet::new();
    issues
        .into_iter()
        .filter(|issue| seen.insert(issue.key()))
        .collect()
}

/// Sorted, unique issue kinds. Used to name what is left for a human.
pub fn distinct_kinds(issues: &[Issue]) -> Vec<String> {
    issues
        .iter()
        .map(|issue| issue.kind.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// How much of an issue takes part in the deadlock comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureMode {
    /// Kind only; tolerant of locations drifting as fixes reformat code
    #[default]
    Kind,
    /// Kind plus location
    KindAndLocation,
}

/// Order-independent set summarizing one round's issues.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IssueSignature(BTreeSet<String>);

impl IssueSignature {
    pub fn from_issues(issues: &[Issue], mode: SignatureMode) -> Self {
        let entries = issues
            .iter()
            .map(|issue| match mode {
                SignatureMode::Kind => issue.kind.clone(),
                SignatureMode::KindAndLocation => match (&issue.location, &issue.dom) {
                    (Location::Unresolved, Some(dom)) => format!("{}@{}", issue.kind, dom.selector),
                    (location, _) => format!("{}@{}", issue.kind, location),
                },
            })
            .collect();
        Self(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for IssueSignature {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alt(line: usize) -> Issue {
        Issue::at("jsx-a11y/alt-text", line, 7, "img needs alt", Severity::Error)
    }

    #[test]
    fn test_same_kind_different_location_is_distinct() {
        let issues = vec![alt(3), alt(9), alt(3)];
        let deduped = dedup_issues(issues);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].span(), Some(LineRange::single(3)));
        assert_eq!(deduped[1].span(), Some(LineRange::single(9)));
    }

    #[test]
    fn test_signature_ignores_location_by_default() {
        let a = IssueSignature::from_issues(&[alt(3)], SignatureMode::Kind);
        let b = IssueSignature::from_issues(&[alt(12)], SignatureMode::Kind);
        assert_eq!(a, b);

        let a = IssueSignature::from_issues(&[alt(3)], SignatureMode::KindAndLocation);
        let b = IssueSignature::from_issues(&[alt(12)], SignatureMode::KindAndLocation);
        assert_ne!(a, b);
    }

    #[test]
    fn test_signature_is_order_independent() {
        let other = Issue::at("jsx-a11y/label", 5, 1, "label", Severity::Warning);
        let a = IssueSignature::from_issues(&[alt(3), other.clone()], SignatureMode::Kind);
        let b = IssueSignature::from_issues(&[other, alt(3)], SignatureMode::Kind);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_line_range_touches_with_slack() {
        let a = LineRange::new(3, 5);
        assert!(a.touches(&LineRange::single(6), 1));
        assert!(!a.touches(&LineRange::single(7), 1));
        assert!(a.touches(&LineRange::new(1, 3), 0));
        assert_eq!(LineRange::new(9, 4), LineRange::new(4, 9));
    }

    #[test]
    fn test_element_tag_sources() {
        let mut dom = DomDescriptor::new("div.card > img.hero");
        assert_eq!(dom.element_tag().as_deref(), Some("img"));

        dom.snippet = Some("<button class=\"x\">".to_string());
        assert_eq!(dom.element_tag().as_deref(), Some("button"));

        dom.tag = Some("INPUT".to_string());
        assert_eq!(dom.element_tag().as_deref(), Some("input"));

        assert_eq!(DomDescriptor::new("#main").element_tag(), None);
    }

    #[test]
    fn test_selector_id_and_classes() {
        let dom = DomDescriptor::new("main > img#logo.hero.wide");
        assert_eq!(dom.selector_id(), Some("logo"));
        assert_eq!(dom.selector_classes(), vec!["hero", "wide"]);
    }

    #[test]
    fn test_describe_flags_unresolved_location() {
        let issue = Issue::in_dom(
            "image-alt",
            DomDescriptor::new("img"),
            "Image elements do not have [alt] attributes",
            Severity::Error,
        );
        let line = issue.describe();
        assert!(line.contains("image-alt"));
        assert!(line.contains("whole file"));
    }

    #[test]
    fn test_location_serializes_with_tag() {
        let json = serde_json::to_string(&Location::Point { line: 3, column: 7 }).unwrap();
        assert_eq!(json, r#"{"type":"point","line":3,"column":7}"#);
    }
}
