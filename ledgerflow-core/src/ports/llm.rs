//! LLM client port

use crate::domain::result::Result;

/// Text-in, text-out completion call
pub trait LlmClient: Send + Sync {
    /// Send a prompt and return the raw response text
    fn generate(&self, prompt: &str) -> Result<String>;

    /// Model identifier recorded on every cache entry
    fn model_version(&self) -> &str;
}
