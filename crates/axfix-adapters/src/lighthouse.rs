//! Runtime issue source: render the component in a Vite template and audit
//! the page with Lighthouse's accessibility category.
//!
//! Each failing audit node becomes one issue carrying a DOM descriptor and no
//! source location; `SourceMapper` resolves lines afterwards. Audits that
//! Lighthouse can only flag for manual review are kept aside as
//! [`ManualCheck`]s for the report.

use crate::config::RuntimeConfig;
use crate::util::{command_from, run_command_with_timeout, ChildGuard};
use axfix_core::error::AnalyzerError;
use axfix_core::issue::{DomDescriptor, Issue, Severity};
use axfix_core::protocol::{BoxFuture, IssueSource};
use axfix_core::revision::FileRevision;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const TOOL: &str = "lighthouse";

/// An audit automated tooling cannot decide, listed for a human reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualCheck {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct LighthouseReport {
    #[serde(default)]
    audits: BTreeMap<String, Audit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Audit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    score_display_mode: String,
    #[serde(default)]
    details: Option<AuditDetails>,
}

#[derive(Debug, Deserialize)]
struct AuditDetails {
    #[serde(default)]
    items: Vec<AuditItem>,
}

#[derive(Debug, Deserialize)]
struct AuditItem {
    #[serde(default)]
    node: Option<AuditNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuditNode {
    #[serde(default)]
    selector: String,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    node_label: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
}

/// Everything one Lighthouse run said about the page.
#[derive(Debug, Default)]
pub struct AuditFindings {
    pub issues: Vec<Issue>,
    pub manual_checks: Vec<ManualCheck>,
}

pub fn parse_lighthouse_report(json: &str) -> Result<AuditFindings, AnalyzerError> {
    let report: LighthouseReport =
        serde_json::from_str(json.trim()).map_err(|e| AnalyzerError::invalid_report(TOOL, e))?;
    if report.audits.is_empty() {
        return Err(AnalyzerError::invalid_report(TOOL, "report has no audits"));
    }

    let mut findings = AuditFindings::default();
    for (id, audit) in report.audits {
        match audit.score_display_mode.as_str() {
            "manual" => findings.manual_checks.push(ManualCheck {
                id,
                title: audit.title,
                description: audit.description,
            }),
            "binary" | "numeric" if audit.score.map(|s| s < 1.0).unwrap_or(false) => {
                let nodes: Vec<AuditNode> = audit
                    .details
                    .map(|d| d.items.into_iter().filter_map(|item| item.node).collect())
                    .unwrap_or_default();

                if nodes.is_empty() {
                    // page-level failure (e.g. missing lang); nothing to point at
                    findings.issues.push(Issue::in_dom(
                        id.clone(),
                        DomDescriptor::default(),
                        audit.title.clone(),
                        Severity::Error,
                    ));
                    continue;
                }

                for node in nodes {
                    // the last explanation line names the failed check
                    let detail = node
                        .explanation
                        .as_deref()
                        .and_then(|e| e.lines().map(str::trim).filter(|l| !l.is_empty()).last());
                    let message = match detail {
                        Some(detail) => format!("{} ({})", audit.title, detail),
                        None => audit.title.clone(),
                    };
                    let dom = DomDescriptor {
                        selector: node.selector,
                        tag: None,
                        snippet: node.snippet,
                        label: node.node_label,
                        role: None,
                    };
                    findings
                        .issues
                        .push(Issue::in_dom(id.clone(), dom, message, Severity::Error));
                }
            }
            _ => {}
        }
    }
    Ok(findings)
}

/// Serves the component through the template's dev server and audits it.
pub struct LighthouseHarness {
    config: RuntimeConfig,
    manual_checks: Mutex<Vec<ManualCheck>>,
}

impl LighthouseHarness {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            manual_checks: Mutex::new(Vec::new()),
        }
    }

    /// Manual checks from the most recent audit.
    pub fn manual_checks(&self) -> Vec<ManualCheck> {
        self.manual_checks
            .lock()
            .map(|checks| checks.clone())
            .unwrap_or_default()
    }

    fn page_url(port: u16) -> Result<Url, AnalyzerError> {
        Url::parse(&format!("http://localhost:{}/", port))
            .map_err(|e| AnalyzerError::unavailable(TOOL, e))
    }

    fn component_path(config: &RuntimeConfig, revision: &FileRevision) -> PathBuf {
        let target = config.template_dir.join(&config.component_target);
        match revision.path().extension() {
            Some(ext) => target.with_extension(ext),
            None => target,
        }
    }

    fn audit(config: &RuntimeConfig, revision: &FileRevision) -> Result<AuditFindings, AnalyzerError> {
        if !config.template_dir.is_dir() {
            return Err(AnalyzerError::unavailable(
                "render harness",
                format!("template directory {} not found", config.template_dir.display()),
            ));
        }

        let target = Self::component_path(config, revision);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| AnalyzerError::unavailable("render harness", e))?;
        }
        fs::write(&target, revision.content())
            .map_err(|e| AnalyzerError::unavailable("render harness", e))?;

        let mut server = command_from(&config.dev_server_command)
            .map_err(|e| AnalyzerError::unavailable("dev server", e))?;
        server
            .arg("--port")
            .arg(config.port.to_string())
            .arg("--strictPort")
            .current_dir(&config.template_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = server
            .spawn()
            .map_err(|e| AnalyzerError::unavailable("dev server", e))?;
        let mut guard = ChildGuard::new(child);
        info!(port = config.port, "dev server starting");

        std::thread::sleep(Duration::from_millis(config.startup_wait_ms));
        if guard.has_exited() {
            return Err(AnalyzerError::crashed(
                "dev server",
                format!("exited during startup (is port {} in use?)", config.port),
            ));
        }

        let url = Self::page_url(config.port)?;
        let mut lighthouse = command_from(&config.lighthouse_command)
            .map_err(|e| AnalyzerError::unavailable(TOOL, e))?;
        lighthouse
            .arg(url.as_str())
            .arg("--output=json")
            .arg("--output-path=stdout")
            .arg("--only-categories=accessibility")
            .arg("--chrome-flags=--headless")
            .arg("--quiet");

        let result = run_command_with_timeout(
            &mut lighthouse,
            None,
            Duration::from_secs(config.timeout_secs),
        )
        .map_err(|e| AnalyzerError::unavailable(TOOL, e))?;
        drop(guard);

        if result.timed_out {
            return Err(AnalyzerError::crashed(
                TOOL,
                format!("timed out after {}s", config.timeout_secs),
            ));
        }
        if result.exit_code() != Some(0) {
            return Err(AnalyzerError::crashed(
                TOOL,
                format!("exit status {:?}: {}", result.exit_code(), result.stderr_tail()),
            ));
        }

        let findings = parse_lighthouse_report(&result.stdout)?;
        debug!(
            revision = revision.number(),
            issues = findings.issues.len(),
            manual = findings.manual_checks.len(),
            "lighthouse finished"
        );
        Ok(findings)
    }
}

impl IssueSource for LighthouseHarness {
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
            let findings = tokio::task::spawn_blocking(move || Self::audit(&config, &revision))
                .await
                .map_err(|e| AnalyzerError::crashed(TOOL, e))??;

            if let Ok(mut checks) = self.manual_checks.lock() {
                *checks = findings.manual_checks;
            }
            Ok(findings.issues)
        })
    }
}
