//! # Chain Module
//!
//! A minimal prompt-template + LLM chain, with a callback handler that records
//! each chain run in Langfuse.

mod prompt;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::langfuse::{ObservationContext, Span};
use crate::llm::{LLMClient, LLMError, LLMMessage, LLMResponse, LLMUsage, ModelParameters, TracedClient};

pub use prompt::PromptTemplate;

/// Key under which a chain returns the model output.
pub const OUTPUT_KEY: &str = "text";

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Missing value for prompt variable '{0}'")]
    MissingVariable(String),
    #[error("Template uses variable '{0}' that is not declared")]
    UndeclaredVariable(String),
    #[error("Malformed template: {0}")]
    MalformedTemplate(String),
    #[error(transparent)]
    Llm(#[from] LLMError),
}

/// Records chain runs below a Langfuse trace or span.
///
/// Each run becomes a span named after the chain, with the model call nested
/// beneath it as a generation.
#[derive(Debug, Clone)]
pub struct LangfuseCallbackHandler {
    parent: ObservationContext,
}

impl LangfuseCallbackHandler {
    pub fn new(parent: &ObservationContext) -> Self {
        Self {
            parent: parent.clone(),
        }
    }

    fn on_chain_start(&self, name: &str, inputs: &HashMap<String, String>) -> Span {
        self.parent.span(name, Some(json!(inputs)))
    }

    fn on_chain_end(&self, span: &Span, outputs: &HashMap<String, String>) {
        span.end(Some(json!(outputs)));
    }

    fn on_chain_error(&self, span: &Span, error: &ChainError) {
        span.end_with_error(error.to_string());
    }
}

/// Chain outputs together with the token usage the model reported.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    pub values: HashMap<String, String>,
    pub usage: Option<LLMUsage>,
}

/// Formats a prompt from inputs, sends it as a single user message, and returns
/// the inputs plus the model output under [`OUTPUT_KEY`].
pub struct LLMChain {
    llm: Arc<dyn LLMClient>,
    prompt: PromptTemplate,
    parameters: ModelParameters,
    callbacks: Option<LangfuseCallbackHandler>,
}

impl LLMChain {
    pub fn new(llm: Arc<dyn LLMClient>, prompt: PromptTemplate, parameters: ModelParameters) -> Self {
        Self {
            llm,
            prompt,
            parameters,
            callbacks: None,
        }
    }

    pub fn with_callbacks(mut self, handler: LangfuseCallbackHandler) -> Self {
        self.callbacks = Some(handler);
        self
    }

    pub async fn invoke(
        &self,
        inputs: HashMap<String, String>,
    ) -> Result<HashMap<String, String>, ChainError> {
        Ok(self.invoke_with_usage(inputs).await?.values)
    }

    #[instrument(skip(self, inputs), fields(model = %self.parameters.model))]
    pub async fn invoke_with_usage(
        &self,
        inputs: HashMap<String, String>,
    ) -> Result<ChainOutput, ChainError> {
        let Some(handler) = &self.callbacks else {
            let text = self.prompt.format(&inputs)?;
            let response = self
                .llm
                .chat(&[LLMMessage::user(text)], &self.parameters)
                .await?;
            return Ok(ChainOutput {
                values: with_output(inputs, response.text()),
                usage: response.usage,
            });
        };

        let span = handler.on_chain_start("LLMChain", &inputs);
        let result = self.invoke_traced(span.context(), &inputs).await;
        match result {
            Ok(response) => {
                let values = with_output(inputs, response.text());
                handler.on_chain_end(&span, &values);
                Ok(ChainOutput {
                    values,
                    usage: response.usage,
                })
            }
            Err(e) => {
                handler.on_chain_error(&span, &e);
                Err(e)
            }
        }
    }

    async fn invoke_traced(
        &self,
        ctx: &ObservationContext,
        inputs: &HashMap<String, String>,
    ) -> Result<LLMResponse, ChainError> {
        let text = self.prompt.format(inputs)?;
        debug!(
            prompt_len = text.len(),
            variables = ?self.prompt.input_variables(),
            "Formatted chain prompt"
        );
        let traced = TracedClient::new(self.llm.clone());
        let generation_name = format!("{}-chat", traced.provider_name());
        let response = traced
            .chat(ctx, &generation_name, &[LLMMessage::user(text)], &self.parameters)
            .await?;
        Ok(response)
    }
}

fn with_output(mut inputs: HashMap<String, String>, text: &str) -> HashMap<String, String> {
    inputs.insert(OUTPUT_KEY.to_string(), text.to_string());
    inputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LangfuseSettings;
    use crate::langfuse::LangfuseClient;
    use crate::llm::OpenAIClient;
    use serde_json::Value;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn openai_mock(answer: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "messages": [{
                    "role": "user",
                    "content": "Please summarize the following text in 2-3 sentences:\n\nAI is everywhere."
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-chain",
                "model": "gpt-3.5-turbo",
                "choices": [{ "index": 0, "message": { "role": "assistant", "content": answer }, "finish_reason": "stop" }],
                "usage": { "prompt_tokens": 30, "completion_tokens": 10, "total_tokens": 40 }
            })))
            .mount(&server)
            .await;
        server
    }

    fn summarize_prompt() -> PromptTemplate {
        PromptTemplate::new(
            &["text"],
            "Please summarize the following text in 2-3 sentences:\n\n{text}",
        )
        .unwrap()
    }

    fn text_input() -> HashMap<String, String> {
        HashMap::from([("text".to_string(), "AI is everywhere.".to_string())])
    }

    #[tokio::test]
    async fn test_chain_invoke_returns_inputs_and_text() {
        let server = openai_mock("AI is pervasive.").await;
        let llm = Arc::new(
            OpenAIClient::new(Some("k".to_string()), Some(server.uri()))
                .await
                .unwrap(),
        );
        let chain = LLMChain::new(llm, summarize_prompt(), ModelParameters::new("gpt-3.5-turbo").temperature(0.7));

        let result = chain.invoke(text_input()).await.unwrap();
        assert_eq!(result[OUTPUT_KEY], "AI is pervasive.");
        assert_eq!(result["text"], "AI is pervasive.");
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn test_chain_with_callbacks_records_span_and_generation() {
        let server = openai_mock("AI is pervasive.").await;
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
        let trace = langfuse.trace("summarize_text");

        let llm = Arc::new(
            OpenAIClient::new(Some("k".to_string()), Some(server.uri()))
                .await
                .unwrap(),
        );
        let chain = LLMChain::new(llm, summarize_prompt(), ModelParameters::new("gpt-3.5-turbo"))
            .with_callbacks(LangfuseCallbackHandler::new(trace.context()));
        chain.invoke(text_input()).await.unwrap();
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
            vec!["trace-create", "span-create", "generation-create", "generation-update", "span-update"]
        );
        assert_eq!(events[1]["body"]["name"], "LLMChain");
        assert_eq!(events[2]["body"]["name"], "openai-chat");
        assert_eq!(events[2]["body"]["parentObservationId"], events[1]["body"]["id"]);
        assert_eq!(events[4]["body"]["output"]["text"], "AI is pervasive.");
    }

    #[tokio::test]
    async fn test_chain_reports_model_usage() {
        let server = openai_mock("AI is pervasive.").await;
        let llm = Arc::new(
            OpenAIClient::new(Some("k".to_string()), Some(server.uri()))
                .await
                .unwrap(),
        );
        let langfuse = LangfuseClient::disabled();
        let trace = langfuse.trace("summarize_text");
        let chain = LLMChain::new(llm, summarize_prompt(), ModelParameters::new("gpt-3.5-turbo"))
            .with_callbacks(LangfuseCallbackHandler::new(trace.context()));

        let output = chain.invoke_with_usage(text_input()).await.unwrap();
        assert_eq!(output.values[OUTPUT_KEY], "AI is pervasive.");
        let usage = output.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 30);
        assert_eq!(usage.total_tokens, 40);
    }

    #[tokio::test]
    async fn test_chain_missing_variable_fails_before_calling_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let llm = Arc::new(
            OpenAIClient::new(Some("k".to_string()), Some(server.uri()))
                .await
                .unwrap(),
        );
        let chain = LLMChain::new(llm, summarize_prompt(), ModelParameters::new("gpt-3.5-turbo"));
        let err = chain.invoke(HashMap::new()).await.unwrap_err();
        assert!(matches!(err, ChainError::MissingVariable(_)));
    }
}
