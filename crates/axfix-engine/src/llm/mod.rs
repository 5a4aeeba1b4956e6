pub mod client;
pub mod models;
pub mod parse;
pub mod prompts;

pub use client::{ChatBackend, ChatCall, OpenRouterClient};
pub use models::{LlmResponse, Usage};
