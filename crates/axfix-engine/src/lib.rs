//! LLM collaborator for axfix: an OpenRouter-compatible chat client, the
//! prompts, response parsing, and `LlmOracle`.

pub mod llm;
pub mod oracle;

pub use llm::{ChatBackend, ChatCall, OpenRouterClient, Usage};
pub use oracle::LlmOracle;
