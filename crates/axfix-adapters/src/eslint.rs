//! ESLint as the static issue source
//!
//! The live revision is piped through `eslint --stdin` so the linter never
//! reads the working file directly. Only rules under the configured prefix
//! (`jsx-a11y/` by default) become issues.

use crate::config::StaticAnalysisConfig;
use crate::util::{command_from, run_command_with_timeout, truncate};
use axfix_core::error::AnalyzerError;
use axfix_core::issue::{Issue, Location, Severity};
use axfix_core::protocol::{BoxFuture, IssueSource};
use axfix_core::revision::FileRevision;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const TOOL: &str = "eslint";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileReport {
    #[serde(default)]
    messages: Vec<LintMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LintMessage {
    #[serde(default)]
    rule_id: Option<String>,
    #[serde(default)]
    severity: u8,
    #[serde(default)]
    message: String,
    #[serde(default)]
    line: Option<usize>,
    #[serde(default)]
    column: Option<usize>,
    #[serde(default)]
    fatal: bool,
}

/// Turn `eslint -f json` output into issues. A fatal message means ESLint
/// could not parse the file, which no fix round can recover from.
pub fn parse_eslint_report(json: &str, rule_prefix: &str) -> Result<Vec<Issue>, AnalyzerError> {
    let reports: Vec<FileReport> = serde_json::from_str(json.trim())
        .map_err(|e| AnalyzerError::invalid_report(TOOL, e))?;

    let mut issues = Vec::new();
    for message in reports.into_iter().flat_map(|r| r.messages) {
        if message.fatal {
            return Err(AnalyzerError::crashed(
                TOOL,
                format!(
                    "parse error at {}:{}: {}",
                    message.line.unwrap_or(0),
                    message.column.unwrap_or(0),
                    truncate(&message.message, 200)
                ),
            ));
        }
        let Some(rule) = message.rule_id.filter(|rule| rule.starts_with(rule_prefix)) else {
            continue;
        };
        let severity = if message.severity >= 2 {
            Severity::Error
        } else {
            Severity::Warning
        };
        let mut issue = Issue::at(
            rule,
            message.line.unwrap_or(0),
            message.column.unwrap_or(1),
            message.message,
            severity,
        );
        if message.line.is_none() {
            issue.location = Location::Unresolved;
        }
        issues.push(issue);
    }
    Ok(issues)
}

#[derive(Debug, Clone)]
pub struct EslintSource {
    config: StaticAnalysisConfig,
}

impl EslintSource {
    pub fn new(config: StaticAnalysisConfig) -> Self {
        Self { config }
    }

    fn run(config: &StaticAnalysisConfig, revision: &FileRevision) -> Result<Vec<Issue>, AnalyzerError> {
        let mut command = command_from(&config.command)
            .map_err(|e| AnalyzerError::unavailable(TOOL, e))?;
        command
            .arg("--format")
            .arg("json")
            .arg("--stdin")
            .arg("--stdin-filename")
            .arg(revision.path());

        let result = run_command_with_timeout(
            &mut command,
            Some(revision.content()),
            Duration::from_secs(config.timeout_secs),
        )
        .map_err(|e| AnalyzerError::unavailable(TOOL, e))?;

        if result.timed_out {
            return Err(AnalyzerError::crashed(
                TOOL,
                format!("timed out after {}s", config.timeout_secs),
            ));
        }
        // 0 = clean, 1 = lint findings, anything else is a configuration or runtime failure
        match result.exit_code() {
            Some(0) | Some(1) if !result.stdout.trim().is_empty() => {}
            code => {
                return Err(AnalyzerError::crashed(
                    TOOL,
                    format!("exit status {:?}: {}", code, result.stderr_tail()),
                ));
            }
        }

        let issues = parse_eslint_report(&result.stdout, &config.rule_prefix)?;
        debug!(
            revision = revision.number(),
            issues = issues.len(),
            "eslint finished"
        );
        Ok(issues)
    }
}

impl IssueSource for EslintSource {
    fn name(&self) -> &str {
        TOOL
    }

    fn collect<'a>(
        &'a self,
        revision: &'a FileRevision,
    ) -> BoxFuture<'a, Result<Vec<Issue>, AnalyzerError>> {
        Box::pin(async move {
            let config = self.config.clone();
            let revision = revision.clone();
            tokio::task::spawn_blocking(move || Self::run(&config, &revision))
                .await
                .map_err(|e| AnalyzerError::crashed(TOOL, e))?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"[
      {
        "filePath": "/work/Card.tsx",
        "messages": [
          {"ruleId": "jsx-a11y/alt-text", "severity": 2, "message": "img elements must have an alt prop", "line": 4, "column": 7, "nodeType": "JSXOpeningElement"},
          {"ruleId": "no-unused-vars", "severity": 2, "message": "'x' is defined but never used", "line": 1, "column": 7},
          {"ruleId": "jsx-a11y/no-autofocus", "severity": 1, "message": "The autoFocus prop should not be used", "line": 9, "column": 14}
        ],
        "errorCount": 2,
        "warningCount": 1
      }
    ]"#;

    #[test]
    fn test_parse_filters_by_prefix() {
        let issues = parse_eslint_report(REPORT, "jsx-a11y/").unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].kind, "jsx-a11y/alt-text");
        assert_eq!(issues[0].location, Location::Point { line: 4, column: 7 });
        assert_eq!(issues[0].severity, Severity::Error);
        assert_eq!(issues[1].severity, Severity::Warning);
    }

    #[test]
    fn test_parse_empty_report() {
        assert!(parse_eslint_report("[]", "jsx-a11y/").unwrap().is_empty());
        let clean = r#"[{"filePath": "/work/Card.tsx", "messages": []}]"#;
        assert!(parse_eslint_report(clean, "jsx-a11y/").unwrap().is_empty());
    }

    #[test]
    fn test_fatal_message_is_a_crash() {
        let fatal = r#"[{"filePath": "a.tsx", "messages": [{"ruleId": null, "fatal": true, "severity": 2, "message": "Parsing error: Unexpected token", "line": 3, "column": 1}]}]"#;
        let err = parse_eslint_report(fatal, "jsx-a11y/").unwrap_err();
        assert!(matches!(err, AnalyzerError::Crashed { .. }));
        assert!(err.to_string().contains("Unexpected token"));
    }

    #[test]
    fn test_garbage_is_invalid_report() {
        let err = parse_eslint_report("Oops! Something went wrong!", "jsx-a11y/").unwrap_err();
        assert!(matches!(err, AnalyzerError::InvalidReport { .. }));
    }

    #[test]
    fn test_parse_is_repeatable() {
        let a = parse_eslint_report(REPORT, "jsx-a11y/").unwrap();
        let b = parse_eslint_report(REPORT, "jsx-a11y/").unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let source = EslintSource::new(StaticAnalysisConfig {
            command: vec!["axfix-no-such-linter-binary".to_string()],
            ..StaticAnalysisConfig::default()
        });
        let revision = FileRevision::initial("Card.tsx", "<img />");
        let err = source.collect(&revision).await.unwrap_err();
        assert!(matches!(err, AnalyzerError::Unavailable { .. }));
    }
}
