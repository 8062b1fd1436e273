//! Single traced model call: `run_example(provider, prompt, options)`.

use std::collections::HashMap;
use std::sync::Arc;

use clap::ValueEnum;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::chain::{LLMChain, LangfuseCallbackHandler, PromptTemplate, OUTPUT_KEY};
use crate::config::Config;
use crate::langfuse::{LangfuseClient, Trace, TraceUpdate};
use crate::llm::{
    AnthropicClient, BedrockClient, LLMClient, LLMError, LLMMessage, LLMUsage, ModelParameters,
    OpenAIClient, TracedClient,
};
use crate::scoring::confidence_score;

pub const OPENAI_DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const ANTHROPIC_DEFAULT_MODEL: &str = "claude-3-opus-20240229";
pub const BEDROCK_CLAUDE_DEFAULT_MODEL: &str = "anthropic.claude-3-sonnet-20240229-v1:0";
pub const BEDROCK_TITAN_DEFAULT_MODEL: &str = "amazon.titan-text-express-v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    Openai,
    Anthropic,
    BedrockClaude,
    BedrockTitan,
    /// Prompt template + chat model chain (OpenAI backed).
    Langchain,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Openai => "openai",
            Provider::Anthropic => "anthropic",
            Provider::BedrockClaude => "bedrock-claude",
            Provider::BedrockTitan => "bedrock-titan",
            Provider::Langchain => "langchain",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Openai | Provider::Langchain => OPENAI_DEFAULT_MODEL,
            Provider::Anthropic => ANTHROPIC_DEFAULT_MODEL,
            Provider::BedrockClaude => BEDROCK_CLAUDE_DEFAULT_MODEL,
            Provider::BedrockTitan => BEDROCK_TITAN_DEFAULT_MODEL,
        }
    }
}

/// The flat options map: model name plus sampling options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

impl RunOptions {
    pub fn to_parameters(&self, provider: Provider) -> ModelParameters {
        ModelParameters {
            model: self
                .model
                .clone()
                .unwrap_or_else(|| provider.default_model().to_string()),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExampleResult {
    pub provider: Provider,
    pub model: String,
    /// Model text, or `"Error: …"` when the call failed.
    pub output: String,
    /// Only set when the call succeeded.
    pub confidence: Option<f64>,
    pub usage: Option<LLMUsage>,
    pub trace_id: String,
}

impl ExampleResult {
    pub fn is_error(&self) -> bool {
        self.confidence.is_none()
    }
}

/// Builds the client for a provider from the resolved configuration.
pub async fn build_client(
    provider: Provider,
    config: &Config,
) -> Result<Arc<dyn LLMClient>, LLMError> {
    let client: Arc<dyn LLMClient> = match provider {
        Provider::Openai | Provider::Langchain => Arc::new(
            OpenAIClient::new(config.openai.api_key.clone(), config.openai.base_url.clone())
                .await?,
        ),
        Provider::Anthropic => Arc::new(
            AnthropicClient::new(
                config.anthropic.api_key.clone(),
                config.anthropic.base_url.clone(),
            )
            .await?,
        ),
        Provider::BedrockClaude | Provider::BedrockTitan => Arc::new(
            BedrockClient::new(config.bedrock.api_key.clone(), Some(config.bedrock.endpoint()))
                .await?,
        ),
    };
    Ok(client)
}

/// Calls one provider with `prompt` inside a new trace and scores the answer.
///
/// Provider failures never propagate: they become an `"Error: …"` output and no
/// confidence score is recorded.
#[instrument(skip_all, fields(provider = provider.as_str()))]
pub async fn run_example(
    config: &Config,
    langfuse: &LangfuseClient,
    provider: Provider,
    prompt: &str,
    options: &RunOptions,
) -> ExampleResult {
    let params = options.to_parameters(provider);
    let trace = langfuse.trace("run_example");
    trace.update(TraceUpdate {
        tags: Some(vec![provider.as_str().to_string()]),
        input: Some(json!({ "prompt": prompt })),
        ..Default::default()
    });

    let outcome = call_provider(config, &trace, provider, prompt, &params).await;
    let result = match outcome {
        Ok((text, usage)) => {
            let confidence = confidence_score(&text);
            trace.score("answer_confidence", confidence, None);
            ExampleResult {
                provider,
                model: params.model.clone(),
                output: text,
                confidence: Some(confidence),
                usage,
                trace_id: trace.id().to_string(),
            }
        }
        Err(e) => {
            warn!(error = %e, "Provider call failed; continuing");
            ExampleResult {
                provider,
                model: params.model.clone(),
                output: format!("Error: {}", e),
                confidence: None,
                usage: None,
                trace_id: trace.id().to_string(),
            }
        }
    };

    trace.update(TraceUpdate {
        output: Some(json!(result.output)),
        metadata: Some(json!({ "model": result.model, "usage": result.usage })),
        ..Default::default()
    });
    info!(trace_id = %result.trace_id, error = result.is_error(), "Example finished");
    result
}

async fn call_provider(
    config: &Config,
    trace: &Trace,
    provider: Provider,
    prompt: &str,
    params: &ModelParameters,
) -> anyhow::Result<(String, Option<LLMUsage>)> {
    let client = build_client(provider, config).await?;
    if provider == Provider::Langchain {
        let template = PromptTemplate::new(&["input"], "{input}")?;
        let chain = LLMChain::new(client, template, params.clone())
            .with_callbacks(LangfuseCallbackHandler::new(trace.context()));
        let mut output = chain
            .invoke_with_usage(HashMap::from([("input".to_string(), prompt.to_string())]))
            .await?;
        let text = output.values.remove(OUTPUT_KEY).unwrap_or_default();
        return Ok((text, output.usage));
    }

    let traced = TracedClient::new(client);
    let response = traced
        .chat(
            trace.context(),
            &format!("{}-completion", provider.as_str()),
            &[LLMMessage::user(prompt)],
            params,
        )
        .await?;
    Ok((response.text().to_string(), response.usage))
}
