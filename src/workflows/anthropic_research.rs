//! Research assistant: a Claude research summary followed by a question about it.

use serde::Serialize;
use serde_json::json;

use super::excerpt;
use crate::config::Config;
use crate::langfuse::{observe, LangfuseClient, ObservationContext, TraceUpdate};
use crate::llm::{LLMError, LLMMessage, ModelParameters, TracedClient};
use crate::runner::{build_client, Provider, ANTHROPIC_DEFAULT_MODEL};

pub const TRACE_NAME: &str = "research-assistant";
pub const COMPLETION_MESSAGE: &str = "\nProcess completed successfully!";

const EXCERPT_CHARS: usize = 300;

const RESEARCH_PROMPT: &str = "Write a comprehensive research summary on quantum computing, including:
1. Basic principles
2. Current state of the technology
3. Major challenges
4. Potential applications
5. Future outlook

Make it accessible to someone with a basic understanding of physics.";

fn follow_up_prompt(research_summary: &str) -> String {
    format!(
        "Based on the following research summary on quantum computing, \
what are the 3 most promising near-term applications?\n\n{}",
        research_summary
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct ResearchResult {
    pub research_summary: String,
    pub applications: String,
}

pub async fn run(config: &Config, langfuse: &LangfuseClient) -> anyhow::Result<ResearchResult> {
    let llm = TracedClient::new(build_client(Provider::Anthropic, config).await?);
    let trace = langfuse.trace(TRACE_NAME);
    trace.update(
        TraceUpdate::user("anthropic-user-456")
            .session("research-session-123")
            .tags(["anthropic", "research"]),
    );

    let research_summary = generate_with_claude(&llm, trace.context(), RESEARCH_PROMPT).await?;
    println!(
        "\nResearch Summary (excerpt): {}",
        excerpt(&research_summary, EXCERPT_CHARS)
    );

    let applications =
        generate_with_claude(&llm, trace.context(), &follow_up_prompt(&research_summary)).await?;
    println!(
        "\nPromising Applications (excerpt): {}",
        excerpt(&applications, EXCERPT_CHARS)
    );

    trace.score(
        "comprehensiveness",
        0.9,
        Some("Provided detailed information on quantum computing"),
    );

    let result = ResearchResult {
        research_summary,
        applications,
    };
    trace.update(TraceUpdate {
        output: Some(json!(result)),
        ..Default::default()
    });
    Ok(result)
}

async fn generate_with_claude(
    llm: &TracedClient,
    parent: &ObservationContext,
    prompt: &str,
) -> Result<String, LLMError> {
    observe(parent, "anthropic-completion", Some(json!({ "prompt": prompt })), |span| async move {
        let params = ModelParameters::new(ANTHROPIC_DEFAULT_MODEL)
            .max_tokens(1000)
            .temperature(0.7);
        let response = llm
            .chat(span.context(), "claude-generation", &[LLMMessage::user(prompt)], &params)
            .await?;
        Ok(response.text().to_string())
    })
    .await
}
