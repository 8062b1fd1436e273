use super::base_client::{
    resolve_api_key, LLMClient, LLMError, LLMMessage, LLMResponse, LLMUsage, MessageRole,
    ModelParameters,
};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

// Anthropic specific structs

#[derive(Serialize, Debug, PartialEq)]
pub(crate) struct AnthropicMessage<'a> {
    pub(crate) role: &'a str,
    pub(crate) content: &'a str,
}

#[derive(Serialize, Debug)]
struct AnthropicChatRequest<'a> {
    model: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct AnthropicChatResponse {
    #[serde(default)]
    pub(crate) id: Option<String>,
    #[serde(default)]
    pub(crate) model: Option<String>,
    pub(crate) content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    pub(crate) stop_reason: Option<String>,
    #[serde(default)]
    pub(crate) usage: Option<AnthropicUsage>,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct AnthropicContentBlock {
    #[serde(rename = "type")]
    pub(crate) block_type: String,
    #[serde(default)]
    pub(crate) text: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub(crate) struct AnthropicUsage {
    #[serde(default)]
    pub(crate) input_tokens: u32,
    #[serde(default)]
    pub(crate) output_tokens: u32,
}

impl AnthropicChatResponse {
    /// Maps the messages-API shape (shared by Anthropic and Bedrock-hosted Claude)
    /// onto the provider-neutral response.
    pub(crate) fn into_llm_response(self, requested_model: &str) -> LLMResponse {
        let texts: Vec<String> = self
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text)
            .collect();
        LLMResponse {
            id: self.id.unwrap_or_default(),
            model: self.model.unwrap_or_else(|| requested_model.to_string()),
            content: if texts.is_empty() {
                None
            } else {
                Some(texts.concat())
            },
            finish_reason: self.stop_reason,
            usage: self
                .usage
                .map(|u| LLMUsage::from_counts(u.input_tokens, u.output_tokens)),
        }
    }
}

/// Splits a prompt into the top-level system text and the user/assistant turns,
/// since the messages API does not accept a `system` role inside `messages`.
pub(crate) fn split_system(messages: &[LLMMessage]) -> (Option<String>, Vec<AnthropicMessage<'_>>) {
    let system_parts: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == MessageRole::System)
        .map(|m| m.content.as_str())
        .collect();
    let turns = messages
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .map(|m| AnthropicMessage {
            role: m.role.as_str(),
            content: &m.content,
        })
        .collect();
    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, turns)
}

const DEFAULT_ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_API_VERSION: &str = "2023-06-01";
/// `max_tokens` is mandatory for the messages API.
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Debug)]
pub struct AnthropicClient {
    http_client: HttpClient,
    base_url: String,
}

#[async_trait]
impl LLMClient for AnthropicClient {
    #[instrument(skip(api_key))]
    async fn new(api_key: Option<String>, base_url: Option<String>) -> Result<Self, LLMError> {
        let Some(final_key) = resolve_api_key(api_key, "ANTHROPIC_API_KEY") else {
            error!("Anthropic API key not provided and not found in ANTHROPIC_API_KEY env var or config.");
            return Err(LLMError::NoApiKey);
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_str(&final_key)
                .map_err(|e| LLMError::Other(format!("Invalid Anthropic API key format: {}", e)))?,
        );
        headers.insert(
            HeaderName::from_static("anthropic-version"),
            HeaderValue::from_static(ANTHROPIC_API_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(LLMError::Network)?;

        Ok(Self {
            http_client,
            base_url: base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_API_BASE.to_string()),
        })
    }

    #[instrument(skip(self, messages), fields(model = %params.model))]
    async fn chat(
        &self,
        messages: &[LLMMessage],
        params: &ModelParameters,
    ) -> Result<LLMResponse, LLMError> {
        let (system, turns) = split_system(messages);
        let request_payload = AnthropicChatRequest {
            model: &params.model,
            messages: turns,
            system,
            max_tokens: params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: params.temperature,
            top_p: params.top_p,
        };

        debug!(payload = ?request_payload, "Sending Anthropic messages request");

        let url = format!("{}/messages", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(&request_payload)
            .send()
            .await
            .map_err(LLMError::Network)?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.map_err(LLMError::Network)?;
            error!(error_body = %error_body, "Anthropic API error");
            return Err(LLMError::ApiError(format!(
                "API request failed with status {}: {}",
                status, error_body
            )));
        }

        let raw = response.json::<AnthropicChatResponse>().await.map_err(|e| {
            error!(error = %e, "Failed to parse Anthropic JSON response");
            if e.is_decode() {
                LLMError::ParsingError(e.to_string())
            } else {
                LLMError::Network(e)
            }
        })?;

        Ok(raw.into_llm_response(&params.model))
    }

    fn get_provider_name(&self) -> String {
        "anthropic".to_string()
    }
}
