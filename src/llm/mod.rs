//! LLM integration.
//!
//! An OpenAI-compatible chat completion client behind the [`LlmProvider`]
//! trait, used for model-driven prompt repair.
//!
//! ```ignore
//! use bookforge::llm::{CompletionRequest, LlmClient, LlmProvider, Message};
//!
//! let client = LlmClient::from_env()?;
//! let response = client
//!     .complete(CompletionRequest::new("", vec![Message::user("Hello!")]))
//!     .await?;
//! ```

pub mod client;

pub use client::{
    Choice, CompletionRequest, CompletionResponse, LlmClient, LlmProvider, Message, Usage,
    DEFAULT_API_BASE, DEFAULT_MODEL,
};
