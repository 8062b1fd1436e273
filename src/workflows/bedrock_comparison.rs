//! Side-by-side comparison of a Claude and a Titan model on Bedrock.
//!
//! Either model may fail without stopping the other; a failed model's output is
//! reported as `"Error: …"` and it receives no clarity score. A successful
//! model's clarity score is attached to its own completion span.

use serde::Serialize;
use serde_json::json;
use tracing::warn;

use super::excerpt;
use crate::config::Config;
use crate::langfuse::{observe, LangfuseClient, ObservationContext, TraceUpdate};
use crate::llm::{LLMError, LLMMessage, ModelParameters, TracedClient};
use crate::runner::{
    build_client, Provider, BEDROCK_CLAUDE_DEFAULT_MODEL, BEDROCK_TITAN_DEFAULT_MODEL,
};

pub const TRACE_NAME: &str = "bedrock-model-comparison";
pub const COMPLETION_MESSAGE: &str = "\nProcess completed successfully!";
pub const PROMPT: &str = "Explain the concept of quantum entanglement in simple terms.";

const EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonResult {
    pub claude_response: String,
    pub titan_response: String,
}

/// One side of the comparison.
struct Contender {
    label: &'static str,
    provider: Provider,
    observation: &'static str,
    model_type: &'static str,
    params: ModelParameters,
    clarity: f64,
    clarity_comment: &'static str,
}

fn contenders() -> [Contender; 2] {
    [
        Contender {
            label: "Claude",
            provider: Provider::BedrockClaude,
            observation: "bedrock-claude-completion",
            model_type: "anthropic",
            params: ModelParameters::new(BEDROCK_CLAUDE_DEFAULT_MODEL)
                .max_tokens(500)
                .temperature(0.5),
            clarity: 0.85,
            clarity_comment: "Clear explanation from Claude",
        },
        Contender {
            label: "Titan",
            provider: Provider::BedrockTitan,
            observation: "bedrock-titan-completion",
            model_type: "amazon",
            params: ModelParameters::new(BEDROCK_TITAN_DEFAULT_MODEL)
                .max_tokens(500)
                .temperature(0.7)
                .top_p(0.9),
            clarity: 0.80,
            clarity_comment: "Good explanation from Titan",
        },
    ]
}

pub async fn run(config: &Config, langfuse: &LangfuseClient) -> anyhow::Result<ComparisonResult> {
    let trace = langfuse.trace(TRACE_NAME);
    trace.update(
        TraceUpdate::user("bedrock-user-789")
            .session("model-comparison-123")
            .tags(["bedrock", "comparison"]),
    );

    let mut responses = Vec::with_capacity(2);
    for contender in contenders() {
        let response = match generate(config, trace.context(), &contender, PROMPT).await {
            Ok(text) => {
                println!(
                    "\n{} Response (excerpt): {}",
                    contender.label,
                    excerpt(&text, EXCERPT_CHARS)
                );
                text
            }
            Err(e) => {
                warn!(model = %contender.params.model, error = %e, "Bedrock model failed");
                println!("Error with {}: {}", contender.label, e);
                format!("Error: {}", e)
            }
        };
        responses.push(response);
    }

    let titan_response = responses.pop().unwrap_or_default();
    let claude_response = responses.pop().unwrap_or_default();
    let result = ComparisonResult {
        claude_response,
        titan_response,
    };
    trace.update(TraceUpdate {
        input: Some(json!({ "prompt": PROMPT })),
        output: Some(json!(result)),
        ..Default::default()
    });
    Ok(result)
}

async fn generate(
    config: &Config,
    parent: &ObservationContext,
    contender: &Contender,
    prompt: &str,
) -> Result<String, LLMError> {
    observe(parent, contender.observation, Some(json!({ "prompt": prompt })), |span| async move {
        let llm = TracedClient::new(build_client(contender.provider, config).await?);
        let response = llm
            .chat(
                span.context(),
                "bedrock-generation",
                &[LLMMessage::user(prompt)],
                &contender.params,
            )
            .await?;
        span.update_metadata(json!({ "model_type": contender.model_type }));
        span.score("clarity", contender.clarity, Some(contender.clarity_comment));
        Ok(response.text().to_string())
    })
    .await
}
