use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Request options live with the rest of the configuration; re-exported here for the clients.
pub use crate::config::ModelParameters;

/// Errors that can occur during LLM client operations.
#[derive(Error, Debug)]
pub enum LLMError {
    /// Error related to network requests (e.g., connection refused, timeout).
    #[error("HTTP request failed: {0}")]
    Network(reqwest::Error),
    /// Error reported by the LLM API (e.g., invalid request, rate limit).
    #[error("API error: {0}")]
    ApiError(String),
    /// The provider answered, but the body did not have the documented shape.
    #[error("Failed to parse response: {0}")]
    ParsingError(String),
    /// Required API key was not provided.
    #[error("No API key provided")]
    NoApiKey,
    /// The model id does not belong to a family the client knows how to call.
    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),
    /// Any other type of error.
    #[error("Other error: {0}")]
    Other(String),
}

/// Represents the role of a message in a conversation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message, usually setting context or instructions for the LLM.
    System,
    /// Message from the end-user.
    User,
    /// Message from the AI assistant.
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// Represents a single message in a conversation with an LLM.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LLMMessage {
    /// The role of the message sender.
    pub role: MessageRole,
    /// The textual content of the message.
    pub content: String,
}

impl LLMMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

}

/// Represents token usage information for an LLM API call.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LLMUsage {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u32,
    /// Number of tokens in the completion (response).
    pub completion_tokens: u32,
    /// Total number of tokens used in the request (prompt + completion).
    pub total_tokens: u32,
}

impl LLMUsage {
    /// Builds usage from input/output counts, deriving the total.
    pub fn from_counts(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Provider-neutral view of a completion.
///
/// Every client maps its own response schema onto this shape so that callers
/// (workflows, the chain, the tracing wrapper) never see provider JSON.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LLMResponse {
    /// Provider-assigned response id, when the provider returns one.
    pub id: String,
    /// The model that generated the response.
    pub model: String,
    /// Generated text. `None` when the provider returned no text block.
    pub content: Option<String>,
    /// Why generation stopped ("stop", "end_turn", "LENGTH", ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Token usage for the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<LLMUsage>,
}

impl LLMResponse {
    /// The generated text, or an empty string.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// Trait defining the interface for an LLM client.
///
/// This allows for different LLM providers (OpenAI, Anthropic, Bedrock) to be used
/// interchangeably by the runner, the chain and the workflows.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Creates a new instance of the LLM client.
    ///
    /// # Arguments
    /// * `api_key`: Optional API key. If not provided, the client falls back to its environment variable.
    /// * `base_url`: Optional custom base URL for the API.
    async fn new(api_key: Option<String>, base_url: Option<String>) -> Result<Self, LLMError>
    where
        Self: Sized;

    /// Sends a chat request to the LLM.
    ///
    /// # Arguments
    /// * `messages`: The prompt, as role-tagged messages.
    /// * `params`: Model name and sampling options for this call.
    async fn chat(
        &self,
        messages: &[LLMMessage],
        params: &ModelParameters,
    ) -> Result<LLMResponse, LLMError>;

    fn get_provider_name(&self) -> String;
}

/// Resolves an API key: explicit value first, then the named environment variable.
pub(crate) fn resolve_api_key(api_key: Option<String>, env_var: &str) -> Option<String> {
    api_key
        .filter(|k| !k.trim().is_empty())
        .or_else(|| std::env::var(env_var).ok().filter(|k| !k.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_role_serializes_lowercase() {
        let msg = LLMMessage::system("be brief");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "be brief");
    }

    #[test]
    fn test_usage_from_counts_sums_total() {
        let usage = LLMUsage::from_counts(12, 30);
        assert_eq!(usage.total_tokens, 42);
    }

    #[test]
    fn test_usage_total_saturates_on_huge_counts() {
        let usage = LLMUsage::from_counts(u32::MAX, 7);
        assert_eq!(usage.total_tokens, u32::MAX);
        assert_eq!(usage.completion_tokens, 7);
    }

    #[test]
    fn test_response_text_defaults_to_empty() {
        let response = LLMResponse {
            id: "r1".to_string(),
            model: "m".to_string(),
            content: None,
            finish_reason: None,
            usage: None,
        };
        assert_eq!(response.text(), "");
    }

    #[test]
    fn test_resolve_api_key_prefers_explicit_value() {
        let key = resolve_api_key(
            Some("sk-explicit".to_string()),
            "TRACED_LLM_TEST_UNSET_KEY_VAR",
        );
        assert_eq!(key.as_deref(), Some("sk-explicit"));
        assert!(resolve_api_key(Some("  ".to_string()), "TRACED_LLM_TEST_UNSET_KEY_VAR").is_none());
    }
}
