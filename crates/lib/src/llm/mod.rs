//! LLM abstraction and Ollama client.
//!
//! The agent loop talks to a [`ChatBackend`]; [`OllamaClient`] is the only real implementation.

mod ollama;

pub use ollama::{
    ChatError, ChatMessage, ChatResponse, OllamaClient, OllamaModel, ToolCall, ToolCallFunction,
    ToolDefinition, ToolFunctionDefinition,
};

/// One non-streaming chat completion with optional tools.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<ChatResponse, ChatError>;
}

#[async_trait::async_trait]
impl ChatBackend for OllamaClient {
    async fn chat(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<ChatResponse, ChatError> {
        OllamaClient::chat(self, model, messages, tools).await
    }
}
