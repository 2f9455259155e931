use async_trait::async_trait;

use kbase_core::error::Result;

use crate::context::ContextBlock;

/// The downstream text-completion collaborator. Given the user's prompt
/// and the assembled context (which carries the mode), returns free text.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, prompt: &str, context: &ContextBlock) -> Result<String>;
}
