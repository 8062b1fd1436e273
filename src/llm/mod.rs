//! # LLM Module
//!
//! Provides abstractions and clients for interacting with Large Language Models (LLMs).
//! It defines a common `LLMClient` trait and implementations for OpenAI, Anthropic
//! and AWS Bedrock, plus `TracedClient`, which records every call in Langfuse.

pub mod anthropic_client;
pub mod base_client;
pub mod bedrock_client;
pub mod openai_client;
pub mod traced_client;

pub use anthropic_client::AnthropicClient;
pub use base_client::{LLMClient, LLMError, LLMMessage, LLMResponse, LLMUsage, ModelParameters};
pub use bedrock_client::BedrockClient;
pub use openai_client::OpenAIClient;
pub use traced_client::TracedClient;
