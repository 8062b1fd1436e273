use std::fmt::Display;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::client::LangfuseClient;
use super::events::{EventPayload, ObservationBody, ObservationLevel, ScoreBody, TraceBody};
use crate::llm::{LLMResponse, ModelParameters};

/// Fields to set on a trace. `None` leaves the stored value unchanged.
#[derive(Debug, Clone, Default)]
pub struct TraceUpdate {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<Value>,
    pub input: Option<Value>,
    pub output: Option<Value>,
}

impl TraceUpdate {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Payload of a point-in-time observation.
#[derive(Debug, Clone, Default)]
pub struct EventFields {
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub metadata: Option<Value>,
    pub level: ObservationLevel,
}

/// Where new observations attach: a trace, optionally below a parent observation.
#[derive(Debug, Clone)]
pub struct ObservationContext {
    client: LangfuseClient,
    trace_id: String,
    parent_id: Option<String>,
}

impl ObservationContext {
    pub fn span(&self, name: &str, input: Option<Value>) -> Span {
        let id = Uuid::new_v4().to_string();
        self.client.enqueue(EventPayload::SpanCreate(ObservationBody {
            id: id.clone(),
            trace_id: self.trace_id.clone(),
            parent_observation_id: self.parent_id.clone(),
            name: Some(name.to_string()),
            start_time: Some(Utc::now()),
            input,
            ..Default::default()
        }));
        Span {
            ctx: ObservationContext {
                client: self.client.clone(),
                trace_id: self.trace_id.clone(),
                parent_id: Some(id),
            },
        }
    }

    /// Records a point-in-time observation with no duration.
    pub fn event(&self, name: &str, fields: EventFields) {
        self.client.enqueue(EventPayload::EventCreate(ObservationBody {
            id: Uuid::new_v4().to_string(),
            trace_id: self.trace_id.clone(),
            parent_observation_id: self.parent_id.clone(),
            name: Some(name.to_string()),
            start_time: Some(Utc::now()),
            input: fields.input,
            output: fields.output,
            metadata: fields.metadata,
            level: Some(fields.level),
            ..Default::default()
        }));
    }

    /// Scores the whole trace, wherever in it this context sits.
    pub fn score_trace(&self, name: &str, value: f64, comment: Option<&str>) {
        self.score_observation(None, name, value, comment);
    }

    /// Opens a generation for a model call.
    pub fn generation(&self, name: &str, params: &ModelParameters, input: Value) -> Generation {
        let id = Uuid::new_v4().to_string();
        // The model name has its own field; everything else is a sampling option.
        let mut model_parameters = serde_json::to_value(params).unwrap_or_default();
        if let Some(options) = model_parameters.as_object_mut() {
            options.remove("model");
        }
        self.client.enqueue(EventPayload::GenerationCreate(ObservationBody {
            id: id.clone(),
            trace_id: self.trace_id.clone(),
            parent_observation_id: self.parent_id.clone(),
            name: Some(name.to_string()),
            start_time: Some(Utc::now()),
            input: Some(input),
            model: Some(params.model.clone()),
            model_parameters: Some(model_parameters),
            ..Default::default()
        }));
        Generation {
            client: self.client.clone(),
            trace_id: self.trace_id.clone(),
            id,
        }
    }

    fn score_observation(
        &self,
        observation_id: Option<String>,
        name: &str,
        value: f64,
        comment: Option<&str>,
    ) {
        self.client.enqueue(EventPayload::ScoreCreate(ScoreBody {
            id: Uuid::new_v4().to_string(),
            trace_id: self.trace_id.clone(),
            observation_id,
            name: name.to_string(),
            value,
            comment: comment.map(str::to_string),
            data_type: "NUMERIC",
        }));
    }
}

/// Handle to an open trace.
#[derive(Debug, Clone)]
pub struct Trace {
    ctx: ObservationContext,
}

impl Trace {
    pub(crate) fn new(client: LangfuseClient, id: String) -> Self {
        Self {
            ctx: ObservationContext {
                client,
                trace_id: id,
                parent_id: None,
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.ctx.trace_id
    }

    pub fn context(&self) -> &ObservationContext {
        &self.ctx
    }

    pub fn update(&self, update: TraceUpdate) {
        self.ctx.client.enqueue(EventPayload::TraceCreate(TraceBody {
            id: self.ctx.trace_id.clone(),
            user_id: update.user_id,
            session_id: update.session_id,
            tags: update.tags,
            metadata: update.metadata,
            input: update.input,
            output: update.output,
            ..Default::default()
        }));
    }

    pub fn score(&self, name: &str, value: f64, comment: Option<&str>) {
        self.ctx.score_trace(name, value, comment);
    }
}

/// Handle to an open span. Children created through it nest below it.
#[derive(Debug, Clone)]
pub struct Span {
    ctx: ObservationContext,
}

impl Span {
    pub fn id(&self) -> &str {
        self.ctx.parent_id.as_deref().unwrap_or_default()
    }

    pub fn context(&self) -> &ObservationContext {
        &self.ctx
    }

    pub fn event(&self, name: &str, fields: EventFields) {
        self.ctx.event(name, fields);
    }

    pub fn update_metadata(&self, metadata: Value) {
        self.update(ObservationBody {
            metadata: Some(metadata),
            ..self.blank_body()
        });
    }

    /// Scores this observation (and its trace).
    pub fn score(&self, name: &str, value: f64, comment: Option<&str>) {
        self.ctx
            .score_observation(Some(self.id().to_string()), name, value, comment);
    }

    pub fn end(&self, output: Option<Value>) {
        self.update(ObservationBody {
            end_time: Some(Utc::now()),
            output,
            ..self.blank_body()
        });
    }

    pub fn end_with_error(&self, message: impl Into<String>) {
        self.update(ObservationBody {
            end_time: Some(Utc::now()),
            level: Some(ObservationLevel::Error),
            status_message: Some(message.into()),
            ..self.blank_body()
        });
    }

    fn blank_body(&self) -> ObservationBody {
        ObservationBody {
            id: self.id().to_string(),
            trace_id: self.ctx.trace_id.clone(),
            ..Default::default()
        }
    }

    fn update(&self, body: ObservationBody) {
        self.ctx.client.enqueue(EventPayload::SpanUpdate(body));
    }
}

/// Handle to an open generation (a model call).
#[derive(Debug)]
pub struct Generation {
    client: LangfuseClient,
    trace_id: String,
    id: String,
}

impl Generation {
    pub fn end(self, response: &LLMResponse, end_time: DateTime<Utc>) {
        self.client
            .enqueue(EventPayload::GenerationUpdate(ObservationBody {
                id: self.id,
                trace_id: self.trace_id,
                end_time: Some(end_time),
                output: Some(Value::String(response.text().to_string())),
                model: Some(response.model.clone()),
                usage: response.usage.map(Into::into),
                metadata: response
                    .finish_reason
                    .as_ref()
                    .map(|r| serde_json::json!({ "finish_reason": r })),
                ..Default::default()
            }));
    }

    pub fn end_with_error(self, message: impl Into<String>) {
        self.client
            .enqueue(EventPayload::GenerationUpdate(ObservationBody {
                id: self.id,
                trace_id: self.trace_id,
                end_time: Some(Utc::now()),
                level: Some(ObservationLevel::Error),
                status_message: Some(message.into()),
                ..Default::default()
            }));
    }
}

/// Runs `body` inside a span named `name`.
///
/// The span receives the serialized output on success, or ERROR level and the
/// error text on failure. The result is passed through unchanged.
pub async fn observe<T, E, F, Fut>(
    parent: &ObservationContext,
    name: &str,
    input: Option<Value>,
    body: F,
) -> Result<T, E>
where
    T: Serialize,
    E: Display,
    F: FnOnce(Span) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let span = parent.span(name, input);
    let result = body(span.clone()).await;
    match &result {
        Ok(output) => span.end(serde_json::to_value(output).ok()),
        Err(e) => span.end_with_error(e.to_string()),
    }
    result
}
