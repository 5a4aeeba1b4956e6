use crate::util::{command_from, run_command_with_timeout};
use anyhow::{anyhow, Context};
use axfix_core::revision::FileRevision;
use std::time::Duration;

/// Prettier, run over stdin so line numbers the linter reports match what the
/// model sees.
#[derive(Debug, Clone)]
pub struct Formatter {
    command: Vec<String>,
    timeout: Duration,
}

impl Formatter {
    pub fn new(command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            command,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn run(command: &[String], timeout: Duration, revision: &FileRevision) -> anyhow::Result<String> {
        let mut cmd = command_from(command).map_err(|e| anyhow!(e))?;
        cmd.arg("--stdin-filepath").arg(revision.path());

        let result = run_command_with_timeout(&mut cmd, Some(revision.content()), timeout)
            .map_err(|e| anyhow!(e))
            .context("Failed to run formatter")?;

        if result.timed_out {
            return Err(anyhow!("Formatter timed out after {}s", timeout.as_secs()));
        }
        if result.exit_code() != Some(0) {
            return Err(anyhow!(
                "Formatter exited with {:?}: {}",
                result.exit_code(),
                result.stderr_tail()
            ));
        }
        if result.stdout.trim().is_empty() {
            return Err(anyhow!("Formatter produced no output"));
        }
        Ok(result.stdout)
    }

    /// Formatted content for `revision`. Does not write anything.
    pub async fn format(&self, revision: &FileRevision) -> anyhow::Result<String> {
        let command = self.command.clone();
        let timeout = self.timeout;
        let revision = revision.clone();
        tokio::task::spawn_blocking(move || Self::run(&command, timeout, &revision))
            .await
            .context("Formatter task failed")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_format_passes_content_through_stdin() {
        // trailing flags land in the script's positional args
        let argv = ["sh", "-c", "cat", "sh"].map(String::from).to_vec();
        let formatter = Formatter::new(argv, 5);
        let revision = FileRevision::initial("Card.tsx", "<img alt=\"\" />\n");
        let formatted = formatter.format(&revision).await.unwrap();
        assert_eq!(formatted, "<img alt=\"\" />\n");
    }

    #[tokio::test]
    async fn test_missing_formatter_is_an_error() {
        let formatter = Formatter::new(vec!["axfix-no-such-formatter".to_string()], 5);
        let revision = FileRevision::initial("Card.tsx", "<img />");
        assert!(formatter.format(&revision).await.is_err());
    }
}
