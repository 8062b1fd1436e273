use super::base_client::{
    resolve_api_key, LLMClient, LLMError, LLMMessage, LLMResponse, LLMUsage, ModelParameters,
};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Serialize, Debug)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: &'a [LLMMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize, Debug)]
struct OpenAIChatResponse {
    id: String,
    model: String,
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize, Debug)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct OpenAIUsage {
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<OpenAIChatResponse> for LLMResponse {
    fn from(raw: OpenAIChatResponse) -> Self {
        let first = raw.choices.into_iter().next();
        let (content, finish_reason) = match first {
            Some(choice) => (choice.message.content, choice.finish_reason),
            None => (None, None),
        };
        LLMResponse {
            id: raw.id,
            model: raw.model,
            content,
            finish_reason,
            usage: raw.usage.map(|u| LLMUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        }
    }
}

/// Client for OpenAI-compatible chat completion endpoints.
#[derive(Debug)]
pub struct OpenAIClient {
    http_client: HttpClient,
    base_url: String,
}

#[async_trait]
impl LLMClient for OpenAIClient {
    #[instrument(skip(api_key))]
    async fn new(api_key: Option<String>, base_url: Option<String>) -> Result<Self, LLMError> {
        let Some(final_key) = resolve_api_key(api_key, "OPENAI_API_KEY") else {
            error!("OpenAI API key not provided and not found in OPENAI_API_KEY env var.");
            return Err(LLMError::NoApiKey);
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", final_key))
                .map_err(|e| LLMError::Other(format!("Invalid API key format: {}", e)))?,
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
                .unwrap_or_else(|| DEFAULT_OPENAI_API_BASE.to_string()),
        })
    }

    #[instrument(skip(self, messages), fields(model = %params.model))]
    async fn chat(
        &self,
        messages: &[LLMMessage],
        params: &ModelParameters,
    ) -> Result<LLMResponse, LLMError> {
        let request_payload = OpenAIChatRequest {
            model: &params.model,
            messages,
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_tokens,
        };

        debug!(payload = ?request_payload, "Sending OpenAI chat request");

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(&request_payload)
            .send()
            .await
            .map_err(LLMError::Network)?;

        let status = response.status();
        debug!(status = ?status, "Received OpenAI response status");

        if !status.is_success() {
            let error_body = response.text().await.map_err(LLMError::Network)?;
            error!(error_body = %error_body, "OpenAI API error");
            return Err(LLMError::ApiError(format!(
                "API request failed with status {}: {}",
                status, error_body
            )));
        }

        let raw = response.json::<OpenAIChatResponse>().await.map_err(|e| {
            error!(error = %e, "Failed to parse OpenAI JSON response");
            if e.is_decode() {
                LLMError::ParsingError(e.to_string())
            } else {
                LLMError::Network(e)
            }
        })?;

        debug!(response_id = %raw.id, "Successfully parsed OpenAI response");
        Ok(raw.into())
    }

    fn get_provider_name(&self) -> String {
        "openai".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{bearer_token, body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup_mock_server(api_key: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(bearer_token(api_key))
            .and(header("Content-Type", "application/json"))
            .and(body_partial_json(json!({
                "model": "gpt-3.5-turbo",
                "max_tokens": 150,
                "messages": [
                    { "role": "system", "content": "You are a creative storyteller." },
                    { "role": "user", "content": "Write a short story about space exploration." }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-test123",
                "object": "chat.completion",
                "created": 1677652288,
                "model": "gpt-3.5-turbo-0125",
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": "Once upon a time, in orbit..."
                    },
                    "finish_reason": "stop"
                }],
                "usage": {
                    "prompt_tokens": 9,
                    "completion_tokens": 12,
                    "total_tokens": 21
                }
            })))
            .mount(&server)
            .await;
        server
    }

    fn story_messages() -> Vec<LLMMessage> {
        vec![
            LLMMessage::system("You are a creative storyteller."),
            LLMMessage::user("Write a short story about space exploration."),
        ]
    }

    #[tokio::test]
    async fn test_openai_client_new_success() {
        let client_result = OpenAIClient::new(Some("test_api_key".to_string()), None).await;
        assert!(client_result.is_ok());
        assert_eq!(client_result.unwrap().base_url, DEFAULT_OPENAI_API_BASE);
    }

    #[tokio::test]
    async fn test_openai_chat_simple_message() {
        let api_key = "test_api_key_chat";
        let server = setup_mock_server(api_key).await;
        let client = OpenAIClient::new(Some(api_key.to_string()), Some(server.uri()))
            .await
            .unwrap();

        let params = ModelParameters::new("gpt-3.5-turbo")
            .max_tokens(150)
            .temperature(0.7);
        let response = client.chat(&story_messages(), &params).await.unwrap();
        assert_eq!(response.text(), "Once upon a time, in orbit...");
        assert_eq!(response.model, "gpt-3.5-turbo-0125");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage, Some(LLMUsage::from_counts(9, 12)));
    }

    #[tokio::test]
    async fn test_openai_chat_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let client = OpenAIClient::new(Some("k".to_string()), Some(server.uri()))
            .await
            .unwrap();
        let err = client
            .chat(&story_messages(), &ModelParameters::new("gpt-3.5-turbo"))
            .await
            .unwrap_err();
        match err {
            LLMError::ApiError(msg) => {
                assert!(msg.contains("429"));
                assert!(msg.contains("rate limited"));
            }
            other => panic!("Expected ApiError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_openai_chat_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "unexpected": true })))
            .mount(&server)
            .await;

        let client = OpenAIClient::new(Some("k".to_string()), Some(server.uri()))
            .await
            .unwrap();
        let err = client
            .chat(&story_messages(), &ModelParameters::new("gpt-3.5-turbo"))
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::ParsingError(_)));
    }
}
