//! Language model capability used to answer questions.

use async_trait::async_trait;

use crate::document::ChatMessage;
use crate::error::Result;

/// Generates a completion for an ordered list of chat messages.
///
/// Implementations report failures as [`RagError::Generation`](crate::RagError::Generation).
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Return the assistant's reply to `messages`.
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;
}
