//! Content processing: keywords, summary and sentiment for one text, each in
//! its own span below a `content_workflow` trace.

use serde::Serialize;
use serde_json::json;
use tracing::{instrument, warn};

use crate::config::Config;
use crate::langfuse::{observe, EventFields, LangfuseClient, ObservationContext, TraceUpdate};
use crate::llm::{LLMError, LLMMessage, ModelParameters, TracedClient};
use crate::runner::{build_client, Provider, OPENAI_DEFAULT_MODEL};
use crate::scoring::{keyword_quality, overall_quality, parse_keywords, parse_sentiment, Sentiment};

pub const TRACE_NAME: &str = "content_workflow";
pub const COMPLETION_MESSAGE: &str = "\nAll events sent to Langfuse.";

pub const SAMPLE_TEXT: &str = "Artificial intelligence has transformed industries worldwide, enabling automation \
and insights previously unattainable. However, its rapid advancement raises important \
ethical considerations regarding privacy, bias, and the future of work. Responsible AI \
development requires careful governance and transparent practices to ensure benefits \
are widely shared while minimizing potential harms.";

const REVIEW_TEXT: &str = "I really enjoyed this product. It exceeded my expectations!";
const SENTIMENT_MODEL: &str = "gpt-4";
const SUMMARY_MAX_WORDS: u32 = 100;
const GENERATION_NAME: &str = "OpenAI-generation";

#[derive(Debug, Clone, Serialize)]
pub struct ContentResult {
    pub keywords: Vec<String>,
    pub summary: String,
    pub sentiment: Sentiment,
}

/// Processes the sample text, then analyzes one review on its own.
///
/// A failed model call is reported and ends the demo without failing the
/// command.
pub async fn run(config: &Config, langfuse: &LangfuseClient) -> anyhow::Result<()> {
    let llm = TracedClient::new(build_client(Provider::Openai, config).await?);
    if let Err(e) = demo(&llm, langfuse).await {
        warn!(error = %e, "Content processing failed");
        println!("Error during processing: {}", e);
    }
    Ok(())
}

async fn demo(llm: &TracedClient, langfuse: &LangfuseClient) -> Result<(), LLMError> {
    let result = process_content(llm, langfuse, SAMPLE_TEXT, Some("demo-user-123")).await?;

    println!("\n=== Content Processing Results ===");
    println!("Summary: {}", result.summary);
    println!("Keywords: {}", result.keywords.join(", "));
    println!("Sentiment: {}", result.sentiment);

    println!("\n=== Individual API Calls ===");
    let standalone = langfuse.trace("analyze_sentiment");
    let sentiment = analyze_sentiment(llm, standalone.context(), REVIEW_TEXT).await?;
    println!("Positive sentiment analysis: {}", sentiment);
    Ok(())
}

#[instrument(skip_all, fields(user_id = user_id))]
pub async fn process_content(
    llm: &TracedClient,
    langfuse: &LangfuseClient,
    text: &str,
    user_id: Option<&str>,
) -> Result<ContentResult, LLMError> {
    let trace = langfuse.trace(TRACE_NAME);
    if let Some(user_id) = user_id {
        trace.update(TraceUpdate::user(user_id));
    }
    trace.update(TraceUpdate::default().tags(["content-processing", "production"]));
    let ctx = trace.context();

    let keywords = extract_keywords(llm, ctx, text).await?;
    let summary = generate_summary(llm, ctx, text, SUMMARY_MAX_WORDS).await?;
    let sentiment = analyze_sentiment(llm, ctx, text).await?;

    ctx.score_trace("overall_quality", overall_quality(&sentiment), None);

    let result = ContentResult {
        keywords,
        summary,
        sentiment,
    };
    trace.update(TraceUpdate {
        input: Some(json!({ "text": text })),
        output: Some(json!(result)),
        ..Default::default()
    });
    Ok(result)
}

async fn extract_keywords(
    llm: &TracedClient,
    parent: &ObservationContext,
    text: &str,
) -> Result<Vec<String>, LLMError> {
    observe(parent, "extract_keywords", Some(json!({ "text": text })), |span| async move {
        let params = ModelParameters::new(OPENAI_DEFAULT_MODEL).temperature(0.2);
        let messages = [
            LLMMessage::system(
                "You are a keyword extraction assistant. Extract the 5 most important keywords from the text.",
            ),
            LLMMessage::user(text),
        ];
        let response = llm
            .chat(span.context(), GENERATION_NAME, &messages, &params)
            .await?;

        let keywords = parse_keywords(response.text());
        span.context()
            .score_trace("keyword_quality", keyword_quality(&keywords), None);
        Ok(keywords)
    })
    .await
}

async fn generate_summary(
    llm: &TracedClient,
    parent: &ObservationContext,
    text: &str,
    max_words: u32,
) -> Result<String, LLMError> {
    let input = json!({ "text": text, "max_length": max_words });
    observe(parent, "generate_summary", Some(input), |span| async move {
        let params = ModelParameters::new(OPENAI_DEFAULT_MODEL).temperature(0.3);
        let messages = [
            LLMMessage::system(format!(
                "You are a summarization assistant. Summarize the following text in {} words or less.",
                max_words
            )),
            LLMMessage::user(text),
        ];
        let response = llm
            .chat(span.context(), GENERATION_NAME, &messages, &params)
            .await?;

        span.event(
            "token_usage",
            EventFields {
                metadata: response.usage.map(|usage| json!(usage)),
                ..Default::default()
            },
        );
        Ok(response.text().trim().to_string())
    })
    .await
}

async fn analyze_sentiment(
    llm: &TracedClient,
    parent: &ObservationContext,
    text: &str,
) -> Result<Sentiment, LLMError> {
    observe(parent, "analyze_sentiment", Some(json!({ "text": text })), |span| async move {
        let params = ModelParameters::new(SENTIMENT_MODEL).temperature(0.0);
        let messages = [
            LLMMessage::system(
                "You are a sentiment analysis assistant. Analyze the sentiment of the text and return a JSON with scores for positive, negative, and neutral sentiments. The scores should sum to 1.0.",
            ),
            LLMMessage::user(text),
        ];
        let response = llm
            .chat(span.context(), GENERATION_NAME, &messages, &params)
            .await?;
        Ok(parse_sentiment(response.text()))
    })
    .await
}
