//! Wire types for the Langfuse batch ingestion endpoint (`POST /api/public/ingestion`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::llm::LLMUsage;

/// One entry of the `batch` array.
#[derive(Serialize, Debug, Clone)]
pub struct IngestionEvent {
    /// Event id, used by the server for deduplication. Distinct from the entity id.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl IngestionEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.payload {
            EventPayload::TraceCreate(_) => "trace-create",
            EventPayload::SpanCreate(_) => "span-create",
            EventPayload::SpanUpdate(_) => "span-update",
            EventPayload::GenerationCreate(_) => "generation-create",
            EventPayload::GenerationUpdate(_) => "generation-update",
            EventPayload::EventCreate(_) => "event-create",
            EventPayload::ScoreCreate(_) => "score-create",
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", content = "body", rename_all = "kebab-case")]
pub enum EventPayload {
    TraceCreate(TraceBody),
    SpanCreate(ObservationBody),
    SpanUpdate(ObservationBody),
    GenerationCreate(ObservationBody),
    GenerationUpdate(ObservationBody),
    EventCreate(ObservationBody),
    ScoreCreate(ScoreBody),
}

/// Trace fields. Re-sending a `trace-create` with the same `id` upserts the trace.
#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct TraceBody {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObservationLevel {
    Debug,
    #[default]
    Default,
    Warning,
    Error,
}

/// Token counts in the shape Langfuse expects on generations.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageBody {
    pub input: u32,
    pub output: u32,
    pub total: u32,
    pub unit: &'static str,
}

impl From<LLMUsage> for UsageBody {
    fn from(usage: LLMUsage) -> Self {
        Self {
            input: usage.prompt_tokens,
            output: usage.completion_tokens,
            total: usage.total_tokens,
            unit: "TOKENS",
        }
    }
}

/// Shared body for spans, generations and events. Unset fields are left untouched on update.
#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObservationBody {
    pub id: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_observation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<ObservationLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_parameters: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageBody>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBody {
    pub id: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation_id: Option<String>,
    pub name: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub data_type: &'static str,
}

/// Request body of the ingestion endpoint.
#[derive(Serialize, Debug)]
pub struct IngestionBatch<'a> {
    pub batch: &'a [IngestionEvent],
}

/// Per-event failure reported in a 207 Multi-Status reply.
#[derive(Deserialize, Debug, Clone)]
pub struct IngestionFailure {
    pub id: String,
    pub status: u16,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct IngestionResponse {
    #[serde(default)]
    pub errors: Vec<IngestionFailure>,
}
