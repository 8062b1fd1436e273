use std::sync::Arc;

use chrono::Utc;
use tracing::{instrument, warn};

use super::base_client::{LLMClient, LLMError, LLMMessage, LLMResponse, ModelParameters};
use crate::langfuse::ObservationContext;

/// Wraps a provider client so that every call is recorded as a Langfuse generation.
///
/// The generation is opened before the request (input messages, model, sampling
/// options) and closed afterwards with either the output text and token usage or
/// the error message at ERROR level.
#[derive(Clone)]
pub struct TracedClient {
    inner: Arc<dyn LLMClient>,
}

impl TracedClient {
    pub fn new(inner: Arc<dyn LLMClient>) -> Self {
        Self { inner }
    }

    pub fn provider_name(&self) -> String {
        self.inner.get_provider_name()
    }

    #[instrument(skip(self, ctx, messages, params), fields(provider = %self.inner.get_provider_name(), model = %params.model))]
    pub async fn chat(
        &self,
        ctx: &ObservationContext,
        name: &str,
        messages: &[LLMMessage],
        params: &ModelParameters,
    ) -> Result<LLMResponse, LLMError> {
        let input = serde_json::to_value(messages).unwrap_or_default();
        let generation = ctx.generation(name, params, input);
        match self.inner.chat(messages, params).await {
            Ok(response) => {
                generation.end(&response, Utc::now());
                Ok(response)
            }
            Err(e) => {
                warn!(error = %e, "Model call failed");
                generation.end_with_error(e.to_string());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LangfuseSettings;
    use crate::langfuse::LangfuseClient;
    use crate::llm::OpenAIClient;
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_traced_chat_records_generation_around_call() {
        let provider = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-1",
                "model": "gpt-3.5-turbo",
                "choices": [{ "index": 0, "message": { "role": "assistant", "content": "POSITIVE" }, "finish_reason": "stop" }],
                "usage": { "prompt_tokens": 20, "completion_tokens": 1, "total_tokens": 21 }
            })))
            .mount(&provider)
            .await;
        Mock::given(method("POST"))
            .and(path("/fail/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream"))
            .mount(&provider)
            .await;

        let collector = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&collector)
            .await;
        let langfuse = LangfuseClient::from_settings(&LangfuseSettings {
            public_key: Some("pk".to_string()),
            secret_key: Some("sk".to_string()),
            host: Some(collector.uri()),
            flush_at: 1000,
            flush_interval_ms: 60_000,
            enabled: true,
        });

        let ok_client = TracedClient::new(Arc::new(
            OpenAIClient::new(Some("k".to_string()), Some(provider.uri()))
                .await
                .unwrap(),
        ));
        let failing_client = TracedClient::new(Arc::new(
            OpenAIClient::new(Some("k".to_string()), Some(format!("{}/fail", provider.uri())))
                .await
                .unwrap(),
        ));

        let trace = langfuse.trace("creative-writing-flow");
        let params = ModelParameters::new("gpt-3.5-turbo").max_tokens(10).temperature(0.1);
        let messages = [LLMMessage::user("I loved it")];
        let response = ok_client
            .chat(trace.context(), "classify_sentiment", &messages, &params)
            .await
            .unwrap();
        assert_eq!(response.text(), "POSITIVE");
        assert!(failing_client
            .chat(trace.context(), "classify_sentiment", &messages, &params)
            .await
            .is_err());
        langfuse.flush().await;

        let events: Vec<Value> = collector
            .received_requests()
            .await
            .unwrap()
            .iter()
            .flat_map(|r| {
                let body: Value = serde_json::from_slice(&r.body).unwrap();
                body["batch"].as_array().cloned().unwrap_or_default()
            })
            .collect();
        let kinds: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(
            kinds,
            vec![
                "trace-create",
                "generation-create",
                "generation-update",
                "generation-create",
                "generation-update"
            ]
        );
        assert_eq!(events[1]["body"]["input"][0]["content"], "I loved it");
        assert_eq!(events[1]["body"]["modelParameters"]["max_tokens"], 10);
        assert_eq!(events[2]["body"]["output"], "POSITIVE");
        assert_eq!(events[2]["body"]["usage"]["input"], 20);
        assert_eq!(events[4]["body"]["level"], "ERROR");
    }
}
