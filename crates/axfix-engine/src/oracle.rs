//! The LLM as fix generator, grouping oracle, and line oracle.

use crate::llm::client::{truncate_str, ChatBackend, ChatCall};
use crate::llm::models::{LlmResponse, Usage};
use crate::llm::parse::{is_declined, parse_fix_response, parse_groups, parse_line_answer};
use crate::llm::prompts;
use axfix_adapters::config::LlmConfig;
use axfix_core::error::GenerationError;
use axfix_core::issue::{DomDescriptor, Issue, LineRange};
use axfix_core::jsx::{first_syntax_error, Dialect};
use axfix_core::protocol::{
    BoxFuture, FixGenerator, GeneratedFix, GroupingOracle, LineOracle,
};
use axfix_core::revision::FileRevision;
use axfix_core::round::FixGroup;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub struct LlmOracle {
    backend: Arc<dyn ChatBackend>,
    fix_temperature: f32,
    grouping_temperature: f32,
    usage: Mutex<Usage>,
}

impl LlmOracle {
    pub fn new(backend: Arc<dyn ChatBackend>, settings: &LlmConfig) -> Self {
        Self {
            backend,
            fix_temperature: settings.fix_temperature,
            grouping_temperature: settings.grouping_temperature,
            usage: Mutex::new(Usage::default()),
        }
    }

    /// Token usage summed over every call so far.
    pub fn usage(&self) -> Usage {
        self.usage.lock().map(|u| u.clone()).unwrap_or_default()
    }

    async fn ask(&self, call: ChatCall<'_>) -> anyhow::Result<String> {
        let response: LlmResponse = self.backend.complete(call).await?;
        if let (Some(usage), Ok(mut total)) = (&response.usage, self.usage.lock()) {
            total.add(usage);
        }
        Ok(response.content)
    }
}

/// Reject content that no longer parses, unless the input was already broken.
fn check_syntax(proposed: &str, revision: &FileRevision) -> Result<(), GenerationError> {
    let dialect = Dialect::from_path(revision.path());
    let before = first_syntax_error(revision.content(), dialect)
        .map_err(|e| GenerationError::SyntaxCheckFailed(e.to_string()))?;
    if before.is_some() {
        return Ok(());
    }
    match first_syntax_error(proposed, dialect) {
        Ok(None) => Ok(()),
        Ok(Some(line)) => Err(GenerationError::SyntaxCheckFailed(format!(
            "syntax error near line {}",
            line
        ))),
        Err(e) => Err(GenerationError::SyntaxCheckFailed(e.to_string())),
    }
}

impl FixGenerator for LlmOracle {
    fn generate<'a>(
        &'a self,
        group: &'a FixGroup,
        revision: &'a FileRevision,
    ) -> BoxFuture<'a, Result<GeneratedFix, GenerationError>> {
        Box::pin(async move {
            let system = prompts::fix_system();
            let user = prompts::fix_user(group, revision.content());
            let text = self
                .ask(ChatCall {
                    system: &system,
                    user: &user,
                    temperature: self.fix_temperature,
                    json_mode: false,
                })
                .await
                .map_err(|e| GenerationError::Collaborator(e.to_string()))?;

            if text.trim().is_empty() {
                return Err(GenerationError::EmptyResponse);
            }

            let parsed = parse_fix_response(&text);
            let declined = match (&parsed.file, &parsed.explanation) {
                (None, _) => is_declined(&text),
                (Some(_), Some(explanation)) => is_declined(explanation),
                (Some(_), None) => false,
            };
            if declined {
                let reason = parsed.explanation.as_deref().unwrap_or(text.trim());
                return Err(GenerationError::Declined(
                    truncate_str(reason, 200).to_string(),
                ));
            }

            let mut content = parsed.file.ok_or(GenerationError::MissingFile)?;
            if content.trim().is_empty() {
                return Err(GenerationError::EmptyResponse);
            }
            if revision.content().ends_with('\n') && !content.ends_with('\n') {
                content.push('\n');
            }
            check_syntax(&content, revision)?;

            debug!(group = group.index, bytes = content.len(), "fix generated");
            Ok(GeneratedFix {
                content,
                explanation: parsed.explanation,
            })
        })
    }
}

impl GroupingOracle for LlmOracle {
    fn propose_groups<'a>(
        &'a self,
        issues: &'a [Issue],
        content: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Vec<usize>>>> {
        Box::pin(async move {
            let user = prompts::grouping_user(issues, content);
            let text = self
                .ask(ChatCall {
                    system: prompts::GROUPING_SYSTEM,
                    user: &user,
                    temperature: self.grouping_temperature,
                    json_mode: false,
                })
                .await?;
            parse_groups(&text)
        })
    }
}

impl LineOracle for LlmOracle {
    fn locate<'a>(
        &'a self,
        dom: &'a DomDescriptor,
        content: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<LineRange>> {
        Box::pin(async move {
            let user = prompts::line_user(dom, content);
            let text = self
                .ask(ChatCall {
                    system: prompts::LINE_SYSTEM,
                    user: &user,
                    temperature: self.grouping_temperature,
                    json_mode: true,
                })
                .await?;
            parse_line_answer(&text)
        })
    }
}
