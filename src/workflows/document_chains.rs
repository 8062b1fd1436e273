//! Prompt-template chains: summarization, question answering over a context,
//! and a two-step document workflow. Each example is its own trace.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::chain::{ChainError, LLMChain, LangfuseCallbackHandler, PromptTemplate, OUTPUT_KEY};
use crate::config::Config;
use crate::langfuse::{observe, EventFields, LangfuseClient, ObservationContext, Trace, TraceUpdate};
use crate::llm::{LLMClient, ModelParameters};
use crate::runner::{build_client, Provider, OPENAI_DEFAULT_MODEL};
use crate::scoring::confidence_score;

pub const COMPLETION_MESSAGE: &str = "All examples completed and traces sent to Langfuse.";

const SUMMARY_TEMPLATE: &str = "Please summarize the following text in 2-3 sentences:\n\n{text}";
const QA_TEMPLATE: &str = "Given the following context, please answer the question accurately and concisely.\n\nContext: {context}\n\nQuestion: {question}\n\nAnswer:";
const EXTRACTION_TEMPLATE: &str = "Extract the key entities, dates, and numerical values from this text. Format as a JSON.\n\n{document}";

const AI_TEXT: &str = "Artificial intelligence (AI) is intelligence demonstrated by machines, as opposed to natural intelligence displayed by animals including humans.
AI research has been defined as the field of study of intelligent agents, which refers to any system that perceives its environment and takes actions that maximize its chance of achieving its goals.
The term \"artificial intelligence\" had previously been used to describe machines that mimic and display \"human\" cognitive skills that are associated with the human mind, such as \"learning\" and \"problem-solving\".
This definition has since been rejected by major AI researchers who now describe AI in terms of rationality and acting rationally, which does not limit how intelligence can be articulated.";

const LANGFUSE_CONTEXT: &str = "Langfuse is an open-source LLM engineering platform focused on tracing, evaluation, and monitoring.
It helps developers debug, analyze, and improve their LLM applications in production.
Langfuse was founded in 2023 and supports integrations with OpenAI, LangChain, LlamaIndex, and other popular LLM frameworks.";

const LANGFUSE_QUESTION: &str = "What is Langfuse and what integrations does it support?";

const QUARTERLY_REPORT: &str = "QUARTERLY REPORT
Q3 2023

Revenue: $10.2M (up 15% YoY)
Operating Expenses: $7.5M
Net Profit: $2.7M

Key Highlights:
- Launched new product line on September 15th
- Expanded to European market, opening office in Berlin
- Hired 25 new employees, bringing total headcount to 120
- Customer retention rate improved to 92% from 87% in previous quarter";

#[derive(Debug, Clone, Serialize)]
pub struct DocumentResult {
    pub summary: String,
    pub extracted_info: String,
}

pub async fn run(config: &Config, langfuse: &LangfuseClient) -> anyhow::Result<()> {
    let llm = build_client(Provider::Langchain, config).await?;

    let trace = open_trace(langfuse, "summarize_text", "user-456");
    let summary = summarize_text(&llm, trace.context(), AI_TEXT).await?;
    println!("Summarized text:\n{}\n", output_text(&summary));

    let trace = open_trace(langfuse, "qa_chain", "user-789");
    let answer = answer_question(&llm, trace.context(), LANGFUSE_QUESTION, LANGFUSE_CONTEXT).await?;
    println!("Answer to question:\n{}\n", output_text(&answer));

    let trace = open_trace(langfuse, "multi_step_workflow", "user-101");
    let processed = process_document(&llm, trace.context(), QUARTERLY_REPORT).await?;
    println!("Document Summary:\n{}\n", processed.summary);
    println!("Extracted Information:\n{}\n", processed.extracted_info);

    Ok(())
}

/// Opens a trace for one example and records who it ran for.
fn open_trace(langfuse: &LangfuseClient, name: &str, user_id: &str) -> Trace {
    let trace = langfuse.trace(name);
    trace.update(TraceUpdate::default().metadata(json!({ "user_id": user_id })));
    info!(trace = name, user_id, "Running chain example");
    trace
}

fn output_text(outputs: &HashMap<String, String>) -> &str {
    outputs.get(OUTPUT_KEY).map(String::as_str).unwrap_or_default()
}

fn chain_for(
    llm: &Arc<dyn LLMClient>,
    parent: &ObservationContext,
    input_variables: &[&str],
    template: &str,
    temperature: f32,
) -> Result<LLMChain, ChainError> {
    let prompt = PromptTemplate::new(input_variables, template)?;
    let parameters = ModelParameters::new(OPENAI_DEFAULT_MODEL).temperature(temperature);
    Ok(LLMChain::new(llm.clone(), prompt, parameters)
        .with_callbacks(LangfuseCallbackHandler::new(parent)))
}

pub async fn summarize_text(
    llm: &Arc<dyn LLMClient>,
    parent: &ObservationContext,
    text: &str,
) -> Result<HashMap<String, String>, ChainError> {
    observe(parent, "summarize_text", Some(json!({ "text": text })), |span| async move {
        let chain = chain_for(llm, span.context(), &["text"], SUMMARY_TEMPLATE, 0.7)?;
        chain
            .invoke(HashMap::from([("text".to_string(), text.to_string())]))
            .await
    })
    .await
}

/// Answers from the given context and scores the trace on how sure the answer sounds.
pub async fn answer_question(
    llm: &Arc<dyn LLMClient>,
    parent: &ObservationContext,
    question: &str,
    context: &str,
) -> Result<HashMap<String, String>, ChainError> {
    let input = json!({ "question": question, "context": context });
    observe(parent, "qa_chain", Some(input), |span| async move {
        let chain = chain_for(llm, span.context(), &["context", "question"], QA_TEMPLATE, 0.3)?;
        let result = chain
            .invoke(HashMap::from([
                ("context".to_string(), context.to_string()),
                ("question".to_string(), question.to_string()),
            ]))
            .await?;

        let confidence = confidence_score(output_text(&result));
        span.context()
            .score_trace("answer_confidence", confidence, None);
        Ok(result)
    })
    .await
}

/// Summarizes the document, then extracts entities, dates and figures from it.
pub async fn process_document(
    llm: &Arc<dyn LLMClient>,
    parent: &ObservationContext,
    document: &str,
) -> Result<DocumentResult, ChainError> {
    observe(parent, "multi_step_workflow", Some(json!({ "document": document })), |span| async move {
        let summary_result = summarize_text(llm, span.context(), document).await?;
        let summary = output_text(&summary_result).to_string();

        let chain = chain_for(llm, span.context(), &["document"], EXTRACTION_TEMPLATE, 0.3)?;
        let extraction = chain
            .invoke(HashMap::from([("document".to_string(), document.to_string())]))
            .await?;
        let extracted_info = output_text(&extraction).to_string();

        span.event(
            "document_extraction",
            EventFields {
                input: Some(json!({ "document": document })),
                output: Some(json!(extracted_info)),
                ..Default::default()
            },
        );

        Ok(DocumentResult {
            summary,
            extracted_info,
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::langfuse::with_flush;
    use crate::workflows::test_support::{chat_completion, collector, events, of_type, openai_config};
    use serde_json::Value;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn openai_mock() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("Extract the key entities"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion(
                r#"{"revenue": "$10.2M", "office": "Berlin"}"#,
            )))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("Question:"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion(
                "It might be an LLM engineering platform with OpenAI and LangChain integrations.",
            )))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(chat_completion("A short summary.")),
            )
            .mount(&server)
            .await;
        server
    }

    fn names<'a>(events: &'a [Value], kind: &str) -> Vec<&'a str> {
        of_type(events, kind)
            .into_iter()
            .map(|e| e["body"]["name"].as_str().unwrap_or_default())
            .collect()
    }

    #[tokio::test]
    async fn test_answer_question_scores_hedged_answer() {
        let provider = openai_mock().await;
        let (server, langfuse) = collector().await;
        let llm = build_client(Provider::Langchain, &openai_config(provider.uri()))
            .await
            .unwrap();
        let trace = langfuse.trace("qa_chain");

        let result = answer_question(&llm, trace.context(), LANGFUSE_QUESTION, LANGFUSE_CONTEXT)
            .await
            .unwrap();
        langfuse.flush().await;

        assert!(output_text(&result).starts_with("It might be"));
        assert_eq!(result["question"], LANGFUSE_QUESTION);
        let events = events(&server).await;
        let scores = of_type(&events, "score-create");
        assert_eq!(scores[0]["body"]["name"], "answer_confidence");
        assert_eq!(scores[0]["body"]["value"], serde_json::json!(0.7));
        assert!(scores[0]["body"].get("observationId").is_none());
    }

    #[tokio::test]
    async fn test_process_document_nests_summary_and_records_extraction() {
        let provider = openai_mock().await;
        let (server, langfuse) = collector().await;
        let llm = build_client(Provider::Langchain, &openai_config(provider.uri()))
            .await
            .unwrap();
        let trace = langfuse.trace("multi_step_workflow");

        let result = process_document(&llm, trace.context(), QUARTERLY_REPORT)
            .await
            .unwrap();
        langfuse.flush().await;

        assert_eq!(result.summary, "A short summary.");
        assert!(result.extracted_info.contains("Berlin"));

        let events = events(&server).await;
        assert_eq!(
            names(&events, "span-create"),
            vec!["multi_step_workflow", "summarize_text", "LLMChain", "LLMChain"]
        );
        let spans = of_type(&events, "span-create");
        assert_eq!(spans[1]["body"]["parentObservationId"], spans[0]["body"]["id"]);
        assert_eq!(spans[2]["body"]["parentObservationId"], spans[1]["body"]["id"]);
        assert_eq!(spans[3]["body"]["parentObservationId"], spans[0]["body"]["id"]);

        let extraction = of_type(&events, "event-create");
        assert_eq!(extraction.len(), 1);
        assert_eq!(extraction[0]["body"]["name"], "document_extraction");
        assert_eq!(extraction[0]["body"]["level"], "DEFAULT");
        assert_eq!(extraction[0]["body"]["parentObservationId"], spans[0]["body"]["id"]);
    }

    #[tokio::test]
    async fn test_run_opens_one_trace_per_example() {
        let provider = openai_mock().await;
        let (server, langfuse) = collector().await;

        with_flush(&langfuse, run(&openai_config(provider.uri()), &langfuse))
            .await
            .unwrap();

        let events = events(&server).await;
        let traces: Vec<&Value> = of_type(&events, "trace-create")
            .into_iter()
            .filter(|t| t["body"].get("name").is_some())
            .collect();
        let trace_names: Vec<&str> = traces
            .iter()
            .map(|t| t["body"]["name"].as_str().unwrap())
            .collect();
        assert_eq!(trace_names, vec!["summarize_text", "qa_chain", "multi_step_workflow"]);

        let users: Vec<&Value> = of_type(&events, "trace-create")
            .into_iter()
            .filter_map(|t| t["body"]["metadata"].get("user_id"))
            .collect();
        assert_eq!(users, vec!["user-456", "user-789", "user-101"]);
        assert_eq!(of_type(&events, "generation-create").len(), 4);
    }

    #[tokio::test]
    async fn test_template_error_marks_span_failed() {
        let (server, langfuse) = collector().await;
        let llm = build_client(Provider::Langchain, &openai_config("http://127.0.0.1:9".to_string()))
            .await
            .unwrap();
        let trace = langfuse.trace("t");

        let err = observe(trace.context(), "bad_template", None, |span| async move {
            chain_for(&llm, span.context(), &["text"], "{text} and {other}", 0.1).map(|_| ())
        })
        .await
        .unwrap_err();
        langfuse.flush().await;

        assert!(matches!(err, ChainError::UndeclaredVariable(ref v) if v == "other"));
        let events = events(&server).await;
        assert_eq!(of_type(&events, "span-update")[0]["body"]["level"], "ERROR");
    }
}
