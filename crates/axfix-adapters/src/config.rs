//! Configuration management for axfix
//!
//! Settings live in TOML. Lookup order: an explicit `--config` path, then
//! `./axfix.toml`, then `~/.config/axfix/config.toml`. Every key has a
//! default, so a missing file is not an error.

use anyhow::Context;
use axfix_core::convergence::LoopConfig;
use axfix_core::grouping::GroupingStrategy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";
const LOCAL_CONFIG_FILE: &str = "axfix.toml";

/// Environment variables checked for an API key, in order.
/// Only an OpenRouter key works against the default `base_url`.
pub const API_KEY_VAR: &str = "OPENROUTER_API_KEY";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "loop")]
    pub convergence: LoopConfig,
    pub grouping: GroupingConfig,
    pub llm: LlmConfig,
    pub static_analysis: StaticAnalysisConfig,
    pub runtime: RuntimeConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingConfig {
    pub strategy: GroupingStrategy,
    /// Issues this many lines apart or closer are fixed together
    pub adjacency_lines: usize,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            strategy: GroupingStrategy::Region,
            adjacency_lines: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub fix_temperature: f32,
    pub grouping_temperature: f32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: OPENROUTER_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 8192,
            fix_temperature: 0.2,
            grouping_temperature: 0.0,
            timeout_secs: 60,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticAnalysisConfig {
    pub command: Vec<String>,
    /// Only rules whose id starts with this prefix become issues
    pub rule_prefix: String,
    pub format_command: Vec<String>,
    /// Run the formatter once before the first static round
    pub format_first: bool,
    pub timeout_secs: u64,
}

impl Default for StaticAnalysisConfig {
    fn default() -> Self {
        Self {
            command: vec!["npx".to_string(), "eslint".to_string()],
            rule_prefix: "jsx-a11y/".to_string(),
            format_command: vec!["npx".to_string(), "prettier".to_string()],
            format_first: true,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Vite project the component is rendered in
    pub template_dir: PathBuf,
    /// Path inside `template_dir` the component is copied to, without extension
    pub component_target: PathBuf,
    pub dev_server_command: Vec<String>,
    pub port: u16,
    pub startup_wait_ms: u64,
    pub lighthouse_command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from("template"),
            component_target: PathBuf::from("src/Component"),
            dev_server_command: vec!["npx".to_string(), "vite".to_string()],
            port: 5173,
            startup_wait_ms: 3000,
            lighthouse_command: vec!["npx".to_string(), "lighthouse".to_string()],
            timeout_secs: 180,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Backups, round log, and the lock file live here
    pub state_dir: PathBuf,
    /// Where the run report is written; defaults to `<state_dir>/report.json`
    pub report_file: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".axfix"),
            report_file: None,
        }
    }
}

impl OutputConfig {
    pub fn report_path(&self) -> PathBuf {
        self.report_file
            .clone()
            .unwrap_or_else(|| self.state_dir.join("report.json"))
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.state_dir.join("backups")
    }
}

impl Config {
    /// Get the user config file path
    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("axfix").join("config.toml"))
    }

    /// Load configuration. An explicit path must exist; the implicit
    /// locations are optional. Returns the file that was used, if any.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let config = Self::parse(&content)
                .with_context(|| format!("Invalid config {}", path.display()))?;
            return Ok((config, Some(path.to_path_buf())));
        }

        let candidates = std::iter::once(PathBuf::from(LOCAL_CONFIG_FILE)).chain(Self::user_config_path());
        for path in candidates {
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            match Self::parse(&content) {
                Ok(config) => {
                    debug!(path = %path.display(), "loaded config");
                    return Ok((config, Some(path)));
                }
                Err(err) => {
                    preserve_corrupt_config(&path, &content);
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "config file was corrupted; a backup was saved and defaults were loaded"
                    );
                    return Ok((Self::default(), None));
                }
            }
        }
        Ok((Self::default(), None))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.sanitize();
        Ok(config)
    }

    fn sanitize(&mut self) {
        if self.convergence.deadlock_window == 0 {
            self.convergence.deadlock_window = 1;
        }
        if self.convergence.max_rounds_per_phase == 0 {
            self.convergence.max_rounds_per_phase = 1;
        }
        if self.llm.max_retries > 10 {
            self.llm.max_retries = 10;
        }
        self.llm.fix_temperature = self.llm.fix_temperature.clamp(0.0, 2.0);
        self.llm.grouping_temperature = self.llm.grouping_temperature.clamp(0.0, 2.0);
    }

    /// API key from the environment.
    pub fn api_key() -> Option<String> {
        non_empty_key(std::env::var(API_KEY_VAR).ok())
    }
}

fn non_empty_key(value: Option<String>) -> Option<String> {
    value
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("toml.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axfix_core::issue::SignatureMode;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.convergence.deadlock_window, 3);
        assert_eq!(config.convergence.max_rounds_per_phase, 10);
        assert_eq!(config.llm.fix_temperature, 0.2);
        assert_eq!(config.static_analysis.rule_prefix, "jsx-a11y/");
        assert_eq!(config.runtime.port, 5173);
        assert_eq!(config.output.report_path(), PathBuf::from(".axfix/report.json"));
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = Config::parse(
            r#"
            [loop]
            deadlock_window = 4
            signature_mode = "kind_and_location"

            [grouping]
            strategy = "oracle"

            [llm]
            model = "openai/gpt-4.1"
            "#,
        )
        .unwrap();
        assert_eq!(config.convergence.deadlock_window, 4);
        assert_eq!(
            config.convergence.signature_mode,
            SignatureMode::KindAndLocation
        );
        assert_eq!(config.convergence.max_rounds_per_phase, 10);
        assert_eq!(config.grouping.strategy, GroupingStrategy::Oracle);
        assert_eq!(config.grouping.adjacency_lines, 1);
        assert_eq!(config.llm.model, "openai/gpt-4.1");
        assert_eq!(config.llm.base_url, OPENROUTER_URL);
    }

    #[test]
    fn test_sanitize_clamps_values() {
        let config = Config::parse("[loop]\ndeadlock_window = 0\n[llm]\nmax_retries = 99\n").unwrap();
        assert_eq!(config.convergence.deadlock_window, 1);
        assert_eq!(config.llm.max_retries, 10);
    }

    #[test]
    fn test_zero_round_limit_allows_one_round() {
        let config = Config::parse("[loop]\nmax_rounds_per_phase = 0\n").unwrap();
        assert_eq!(config.convergence.max_rounds_per_phase, 1);
    }

    #[test]
    fn test_api_key_reads_only_openrouter() {
        assert_eq!(non_empty_key(Some("  sk-or-v1-abc \n".to_string())).as_deref(), Some("sk-or-v1-abc"));
        assert_eq!(non_empty_key(Some("   ".to_string())), None);
        assert_eq!(non_empty_key(None), None);

        std::env::set_var("ANTHROPIC_API_KEY", "sk-ant-not-for-openrouter");
        std::env::set_var("OPENAI_API_KEY", "sk-not-for-openrouter");
        let key = Config::api_key();
        assert_ne!(key.as_deref(), Some("sk-ant-not-for-openrouter"));
        assert_ne!(key.as_deref(), Some("sk-not-for-openrouter"));
    }

    #[test]
    fn test_explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_explicit_config_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("axfix.toml");
        fs::write(&path, "[loop]\nskip_runtime = true\n").unwrap();
        let (config, used) = Config::load(Some(&path)).unwrap();
        assert!(config.convergence.skip_runtime);
        assert_eq!(used, Some(path));
    }

    #[test]
    fn test_preserve_corrupt_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[loop\nbroken").unwrap();
        preserve_corrupt_config(&path, "[loop\nbroken");
        assert!(!path.exists());
        assert!(dir.path().join("config.toml.corrupt").exists());
    }

    #[test]
    fn test_config_round_trip() {
        let config = Config::default();
        let encoded = toml::to_string(&config).unwrap();
        let decoded = Config::parse(&encoded).unwrap();
        assert_eq!(decoded, config);
    }
}
