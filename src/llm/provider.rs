//! Provider-agnostic completion types and the `LlmProvider` trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// System messages joined as a preamble, everything else joined as the prompt.
    pub fn split_prompt(&self) -> (Option<String>, String) {
        let system: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let prompt: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let preamble = if system.is_empty() {
            None
        } else {
            Some(system.join("\n\n"))
        };
        (preamble, prompt.join("\n\n"))
    }
}

/// A completion response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
}

/// Backend-agnostic LLM provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    /// Run a single completion.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_prompt_separates_system_messages() {
        let request = CompletionRequest::new(vec![
            ChatMessage::system("You classify calls."),
            ChatMessage::user("Summary: booked"),
            ChatMessage::user("Transcript: hi"),
        ]);
        let (preamble, prompt) = request.split_prompt();
        assert_eq!(preamble.as_deref(), Some("You classify calls."));
        assert_eq!(prompt, "Summary: booked\n\nTranscript: hi");
    }

    #[test]
    fn split_prompt_without_system() {
        let request = CompletionRequest::new(vec![ChatMessage::user("hello")]);
        let (preamble, prompt) = request.split_prompt();
        assert!(preamble.is_none());
        assert_eq!(prompt, "hello");
    }

    #[test]
    fn builder_sets_sampling_options() {
        let request = CompletionRequest::new(vec![])
            .with_temperature(0.1)
            .with_max_tokens(512);
        assert_eq!(request.temperature, Some(0.1));
        assert_eq!(request.max_tokens, Some(512));
    }
}
