use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use reqwest::Client as HttpClient;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::events::{EventPayload, IngestionBatch, IngestionEvent, IngestionResponse, TraceBody};
use super::trace::Trace;
use crate::config::LangfuseSettings;

const INGESTION_PATH: &str = "/api/public/ingestion";

/// Errors raised while delivering a batch to the collector.
#[derive(Error, Debug)]
pub enum LangfuseError {
    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Ingestion rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

enum Command {
    Event(Box<IngestionEvent>),
    Flush(oneshot::Sender<()>),
}

struct Inner {
    sender: Option<mpsc::UnboundedSender<Command>>,
    flush_count: AtomicUsize,
}

/// Handle to the Langfuse collector.
///
/// Events are queued to a background worker and never block the caller. The
/// worker sends a batch once `flush_at` events are waiting or `flush_interval`
/// has elapsed; `flush` sends whatever is left and waits for it. Cloning is
/// cheap and every clone feeds the same worker.
#[derive(Clone)]
pub struct LangfuseClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LangfuseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LangfuseClient")
            .field("enabled", &self.is_enabled())
            .field("flush_count", &self.flush_count())
            .finish()
    }
}

impl LangfuseClient {
    /// Starts the background worker. Must be called from within a tokio runtime.
    ///
    /// Returns a disabled client when tracing is switched off or a key is missing.
    pub fn from_settings(settings: &LangfuseSettings) -> Self {
        let (Some(public_key), Some(secret_key)) = (
            settings.public_key.clone(),
            settings.secret_key.clone(),
        ) else {
            if settings.enabled {
                warn!("Langfuse keys missing; tracing is disabled for this run.");
            }
            return Self::disabled();
        };
        if !settings.enabled {
            info!("Langfuse tracing disabled by configuration.");
            return Self::disabled();
        }

        let worker = IngestionWorker {
            http_client: HttpClient::new(),
            endpoint: format!("{}{}", settings.host().trim_end_matches('/'), INGESTION_PATH),
            public_key,
            secret_key,
        };
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(worker.run(
            receiver,
            settings.flush_at.max(1),
            Duration::from_millis(settings.flush_interval_ms.max(1)),
        ));
        debug!(host = %settings.host(), "Langfuse client started");

        Self {
            inner: Arc::new(Inner {
                sender: Some(sender),
                flush_count: AtomicUsize::new(0),
            }),
        }
    }

    /// A client that accepts every call and sends nothing.
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(Inner {
                sender: None,
                flush_count: AtomicUsize::new(0),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.sender.is_some()
    }

    /// Number of times `flush` has been called on this client or any clone.
    pub fn flush_count(&self) -> usize {
        self.inner.flush_count.load(Ordering::SeqCst)
    }

    /// Opens a new trace and returns a handle for attaching observations and scores.
    pub fn trace(&self, name: &str) -> Trace {
        let id = Uuid::new_v4().to_string();
        self.enqueue(EventPayload::TraceCreate(TraceBody {
            id: id.clone(),
            name: Some(name.to_string()),
            timestamp: Some(chrono::Utc::now()),
            ..Default::default()
        }));
        Trace::new(self.clone(), id)
    }

    pub(crate) fn enqueue(&self, payload: EventPayload) {
        let Some(sender) = &self.inner.sender else {
            return;
        };
        let event = IngestionEvent::new(payload);
        debug!(kind = event.kind(), "Queueing Langfuse event");
        if sender.send(Command::Event(Box::new(event))).is_err() {
            warn!("Langfuse worker has stopped; event dropped.");
        }
    }

    /// Sends every buffered event and waits until the worker has finished with them.
    pub async fn flush(&self) {
        self.inner.flush_count.fetch_add(1, Ordering::SeqCst);
        let Some(sender) = &self.inner.sender else {
            return;
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if sender.send(Command::Flush(ack_tx)).is_err() {
            warn!("Langfuse worker has stopped; nothing to flush.");
            return;
        }
        if ack_rx.await.is_err() {
            warn!("Langfuse worker exited before acknowledging flush.");
        }
    }
}

/// Runs `workflow` to completion, then flushes exactly once.
///
/// The flush also happens when the workflow returns an error or panics; a panic
/// is resumed after the flush.
pub async fn with_flush<F, T>(client: &LangfuseClient, workflow: F) -> T
where
    F: Future<Output = T>,
{
    let outcome: Result<T, Box<dyn Any + Send>> = AssertUnwindSafe(workflow).catch_unwind().await;
    client.flush().await;
    match outcome {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

struct IngestionWorker {
    http_client: HttpClient,
    endpoint: String,
    public_key: String,
    secret_key: String,
}

impl IngestionWorker {
    async fn run(
        self,
        mut receiver: mpsc::UnboundedReceiver<Command>,
        flush_at: usize,
        flush_interval: Duration,
    ) {
        let mut buffer: Vec<IngestionEvent> = Vec::new();
        let mut ticker = tokio::time::interval(flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = receiver.recv() => match command {
                    Some(Command::Event(event)) => {
                        buffer.push(*event);
                        if buffer.len() >= flush_at {
                            self.drain(&mut buffer).await;
                        }
                    }
                    Some(Command::Flush(ack)) => {
                        self.drain(&mut buffer).await;
                        let _ = ack.send(());
                    }
                    None => {
                        self.drain(&mut buffer).await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !buffer.is_empty() {
                        self.drain(&mut buffer).await;
                    }
                }
            }
        }
        debug!("Langfuse worker stopped");
    }

    /// Sends and clears the buffer. A failed batch is logged and dropped.
    async fn drain(&self, buffer: &mut Vec<IngestionEvent>) {
        if buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(buffer);
        if let Err(e) = self.send(&batch).await {
            error!(error = %e, dropped = batch.len(), "Failed to deliver Langfuse batch");
        }
    }

    #[instrument(skip(self, batch), fields(events = batch.len()))]
    async fn send(&self, batch: &[IngestionEvent]) -> Result<(), LangfuseError> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .basic_auth(&self.public_key, Some(&self.secret_key))
            .json(&IngestionBatch { batch })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LangfuseError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        // 207 Multi-Status carries per-event failures.
        let reply: IngestionResponse = response.json().await.unwrap_or_default();
        for failure in &reply.errors {
            warn!(
                event_id = %failure.id,
                status = failure.status,
                message = failure.message.as_deref().unwrap_or_default(),
                "Langfuse rejected event"
            );
        }
        debug!(status = ?status, "Delivered Langfuse batch");
        Ok(())
    }
}
