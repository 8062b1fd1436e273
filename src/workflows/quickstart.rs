//! Creative writing flow: story, one-sentence summary, sentiment label.

use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::config::Config;
use crate::langfuse::{observe, LangfuseClient, ObservationContext, TraceUpdate};
use crate::llm::{LLMError, LLMMessage, ModelParameters, TracedClient};
use crate::runner::{build_client, Provider, OPENAI_DEFAULT_MODEL};

pub const TRACE_NAME: &str = "creative-writing-flow";
pub const COMPLETION_MESSAGE: &str = "\nProcess completed successfully!";

const STORY_TOPIC: &str = "space exploration";
const GENERATION_NAME: &str = "OpenAI-generation";

#[derive(Debug, Clone, Serialize)]
pub struct CreativeWritingResult {
    pub story: String,
    pub summary: String,
    pub sentiment: String,
}

pub async fn run(config: &Config, langfuse: &LangfuseClient) -> anyhow::Result<CreativeWritingResult> {
    let llm = TracedClient::new(build_client(Provider::Openai, config).await?);
    let trace = langfuse.trace(TRACE_NAME);
    trace.update(TraceUpdate::user("example-user-123").session("example-session-456"));
    info!(trace_id = %trace.id(), "Starting creative writing flow");

    let story = generate_story(&llm, trace.context(), STORY_TOPIC).await?;
    println!("\nStory: {}", story);

    let summary = generate_summary(&llm, trace.context(), &story).await?;
    println!("\nSummary: {}", summary);

    let sentiment = classify_sentiment(&llm, trace.context(), &summary).await?;
    println!("\nSentiment: {}", sentiment);

    trace.score(
        "creativity",
        0.95,
        Some("This was a highly creative story about space"),
    );

    let result = CreativeWritingResult {
        story,
        summary,
        sentiment,
    };
    trace.update(TraceUpdate {
        output: Some(json!(result)),
        ..Default::default()
    });
    Ok(result)
}

async fn generate_story(
    llm: &TracedClient,
    parent: &ObservationContext,
    topic: &str,
) -> Result<String, LLMError> {
    observe(parent, "generate_story", Some(json!({ "topic": topic })), |span| async move {
        let params = ModelParameters::new(OPENAI_DEFAULT_MODEL)
            .max_tokens(150)
            .temperature(0.7);
        let messages = [
            LLMMessage::system("You are a creative storyteller."),
            LLMMessage::user(format!("Write a short story about {}.", topic)),
        ];
        let response = llm
            .chat(span.context(), GENERATION_NAME, &messages, &params)
            .await?;
        Ok(response.text().to_string())
    })
    .await
}

async fn generate_summary(
    llm: &TracedClient,
    parent: &ObservationContext,
    text: &str,
) -> Result<String, LLMError> {
    observe(parent, "generate_summary", Some(json!({ "text": text })), |span| async move {
        let params = ModelParameters::new(OPENAI_DEFAULT_MODEL)
            .max_tokens(50)
            .temperature(0.3);
        let messages = [
            LLMMessage::system("You are a helpful assistant that summarizes text."),
            LLMMessage::user(format!("Summarize this in one sentence: {}", text)),
        ];
        let response = llm
            .chat(span.context(), GENERATION_NAME, &messages, &params)
            .await?;
        Ok(response.text().to_string())
    })
    .await
}

async fn classify_sentiment(
    llm: &TracedClient,
    parent: &ObservationContext,
    text: &str,
) -> Result<String, LLMError> {
    observe(parent, "classify_sentiment", Some(json!({ "text": text })), |span| async move {
        let params = ModelParameters::new(OPENAI_DEFAULT_MODEL)
            .max_tokens(10)
            .temperature(0.1);
        let messages = [
            LLMMessage::system("Classify the sentiment as POSITIVE, NEGATIVE, or NEUTRAL."),
            LLMMessage::user(text),
        ];
        let response = llm
            .chat(span.context(), GENERATION_NAME, &messages, &params)
            .await?;
        Ok(response.text().to_string())
    })
    .await
}
