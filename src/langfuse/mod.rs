//! # Langfuse Module
//!
//! Client for the Langfuse tracing collector: traces, spans, generations and
//! scores are queued as ingestion events and delivered in batches by a
//! background worker. `with_flush` guarantees delivery before the process exits.

pub mod client;
pub mod events;
pub mod trace;

pub use client::{with_flush, LangfuseClient};
pub use trace::{observe, EventFields, ObservationContext, Span, Trace, TraceUpdate};
