//! AWS Bedrock `invoke_model` client.
//!
//! Bedrock hosts several model families behind one endpoint, each with its own
//! request/response body. The family is picked from the model id prefix.
//! Authentication uses a Bedrock API key sent as a bearer token.

use super::anthropic_client::{split_system, AnthropicChatResponse, DEFAULT_MAX_TOKENS};
use super::base_client::{
    resolve_api_key, LLMClient, LLMError, LLMMessage, LLMResponse, LLMUsage, ModelParameters,
};
use crate::config::DEFAULT_AWS_REGION;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, instrument};

const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
const DEFAULT_TITAN_MAX_TOKENS: u32 = 512;

/// Model families reachable through `invoke_model`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BedrockModelFamily {
    AnthropicClaude,
    AmazonTitan,
}

impl BedrockModelFamily {
    pub fn from_model_id(model_id: &str) -> Result<Self, LLMError> {
        // Cross-region inference profiles prefix the id with a geography ("us.", "eu.").
        let bare = match model_id.split_once('.') {
            Some((geo, rest)) if matches!(geo, "us" | "eu" | "apac" | "global") => rest,
            _ => model_id,
        };
        if bare.starts_with("anthropic.") {
            Ok(Self::AnthropicClaude)
        } else if bare.starts_with("amazon.titan-text") || bare.starts_with("amazon.titan-tg1") {
            Ok(Self::AmazonTitan)
        } else {
            Err(LLMError::UnsupportedModel(model_id.to_string()))
        }
    }
}

#[derive(Serialize, Debug)]
struct ClaudeInvokeBody<'a> {
    anthropic_version: &'static str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<super::anthropic_client::AnthropicMessage<'a>>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TitanInvokeBody {
    input_text: String,
    text_generation_config: TitanGenerationConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TitanGenerationConfig {
    max_token_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TitanInvokeResponse {
    #[serde(default)]
    input_text_token_count: u32,
    results: Vec<TitanResult>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TitanResult {
    #[serde(default)]
    token_count: u32,
    output_text: String,
    #[serde(default)]
    completion_reason: Option<String>,
}

/// Titan takes a single text prompt; role tags are folded into it.
fn titan_prompt(messages: &[LLMMessage]) -> String {
    if let [only] = messages {
        return only.content.clone();
    }
    messages
        .iter()
        .map(|m| match m.role {
            super::base_client::MessageRole::System => m.content.clone(),
            super::base_client::MessageRole::User => format!("User: {}", m.content),
            super::base_client::MessageRole::Assistant => format!("Bot: {}", m.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Builds the JSON body `invoke_model` expects for the given model.
pub fn build_invoke_body(
    messages: &[LLMMessage],
    params: &ModelParameters,
) -> Result<Value, LLMError> {
    let body = match BedrockModelFamily::from_model_id(&params.model)? {
        BedrockModelFamily::AnthropicClaude => {
            let (system, turns) = split_system(messages);
            serde_json::to_value(ClaudeInvokeBody {
                anthropic_version: BEDROCK_ANTHROPIC_VERSION,
                max_tokens: params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                temperature: params.temperature,
                top_p: params.top_p,
                system,
                messages: turns,
            })
        }
        BedrockModelFamily::AmazonTitan => serde_json::to_value(TitanInvokeBody {
            input_text: titan_prompt(messages),
            text_generation_config: TitanGenerationConfig {
                max_token_count: params.max_tokens.unwrap_or(DEFAULT_TITAN_MAX_TOKENS),
                temperature: params.temperature,
                top_p: params.top_p,
            },
        }),
    };
    body.map_err(|e| LLMError::Other(format!("Failed to encode invoke body: {}", e)))
}

/// Reads the text and token counts out of an `invoke_model` response body.
pub fn parse_invoke_body(body: &[u8], params: &ModelParameters) -> Result<LLMResponse, LLMError> {
    match BedrockModelFamily::from_model_id(&params.model)? {
        BedrockModelFamily::AnthropicClaude => {
            let raw: AnthropicChatResponse = serde_json::from_slice(body)
                .map_err(|e| LLMError::ParsingError(e.to_string()))?;
            Ok(raw.into_llm_response(&params.model))
        }
        BedrockModelFamily::AmazonTitan => {
            let raw: TitanInvokeResponse = serde_json::from_slice(body)
                .map_err(|e| LLMError::ParsingError(e.to_string()))?;
            let first = raw.results.into_iter().next().ok_or_else(|| {
                LLMError::ParsingError("Titan response contained no results".to_string())
            })?;
            Ok(LLMResponse {
                id: String::new(),
                model: params.model.clone(),
                content: Some(first.output_text),
                finish_reason: first.completion_reason,
                usage: Some(LLMUsage::from_counts(
                    raw.input_text_token_count,
                    first.token_count,
                )),
            })
        }
    }
}

#[derive(Debug)]
pub struct BedrockClient {
    http_client: HttpClient,
    base_url: String,
}

impl BedrockClient {
    pub fn endpoint_for_region(region: &str) -> String {
        format!("https://bedrock-runtime.{}.amazonaws.com", region)
    }
}

#[async_trait]
impl LLMClient for BedrockClient {
    #[instrument(skip(api_key))]
    async fn new(api_key: Option<String>, base_url: Option<String>) -> Result<Self, LLMError> {
        let Some(final_key) = resolve_api_key(api_key, "AWS_BEARER_TOKEN_BEDROCK") else {
            error!("Bedrock API key not provided and not found in AWS_BEARER_TOKEN_BEDROCK env var.");
            return Err(LLMError::NoApiKey);
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", final_key))
                .map_err(|e| LLMError::Other(format!("Invalid Bedrock API key format: {}", e)))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http_client = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(LLMError::Network)?;

        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| {
                let region =
                    std::env::var("AWS_REGION").unwrap_or_else(|_| DEFAULT_AWS_REGION.to_string());
                Self::endpoint_for_region(&region)
            });

        Ok(Self {
            http_client,
            base_url,
        })
    }

    #[instrument(skip(self, messages), fields(model = %params.model))]
    async fn chat(
        &self,
        messages: &[LLMMessage],
        params: &ModelParameters,
    ) -> Result<LLMResponse, LLMError> {
        let body = build_invoke_body(messages, params)?;
        debug!(payload = %body, "Invoking Bedrock model");

        let url = format!("{}/model/{}/invoke", self.base_url, params.model);
        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(LLMError::Network)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(LLMError::Network)?;
        if !status.is_success() {
            let error_body = String::from_utf8_lossy(&bytes);
            error!(error_body = %error_body, "Bedrock invoke_model error");
            return Err(LLMError::ApiError(format!(
                "API request failed with status {}: {}",
                status, error_body
            )));
        }

        parse_invoke_body(&bytes, params)
    }

    fn get_provider_name(&self) -> String {
        "bedrock".to_string()
    }
}
