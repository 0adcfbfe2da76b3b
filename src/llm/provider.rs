//! Provider contract: a uniform chat / stream / embed surface over
//! pluggable LLM backends.

use std::future::Future;
use std::pin::Pin;

use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::models::ChatMessage;

/// Boxed stream of assistant text fragments. Single-consumer, finite, not
/// restartable; fragments concatenate in order to form the full content.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// One entry of the tool catalogue handed to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's arguments.
    pub parameters: serde_json::Value,
}

/// A structured tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub function_name: String,
    /// Raw JSON string of the call arguments.
    pub arguments: String,
}

/// Result of a non-streaming chat turn: either assistant text or a
/// non-empty list of tool calls (in which case `content` may be empty and
/// the caller must process the tools before producing a final answer).
#[derive(Debug, Clone, Default)]
pub struct ChatOutcome {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ChatOutcome {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
        }
    }
}

pub trait LlmProvider: Send + Sync {
    /// Send messages (and an optional tool catalogue) to the model.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` when the backend cannot be reached or its
    /// response cannot be interpreted.
    fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> impl Future<Output = Result<ChatOutcome, ProviderError>> + Send;

    /// Send messages and return a stream of content fragments.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` when the streaming request cannot be opened.
    fn chat_stream(
        &self,
        messages: &[ChatMessage],
    ) -> impl Future<Output = Result<ChatStream, ProviderError>> + Send;

    /// Embed a batch of texts, preserving input order. Oversized batches
    /// are split transparently by the backend.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` when the embedding endpoint fails.
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, ProviderError>> + Send;

    /// Embed a single text.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, ProviderError>> + Send
    where
        Self: Sized,
    {
        async move {
            let mut results = self.embed_batch(&[text.to_string()]).await?;
            if results.is_empty() {
                return Err(ProviderError::Empty);
            }
            Ok(results.remove(0))
        }
    }

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// Runtime-selected provider backend.
pub enum AnyProvider {
    Ollama(super::ollama::OllamaProvider),
    OpenAi(super::openai::OpenAiProvider),
}

impl AnyProvider {
    /// Build the backend named by the configuration, sharing one HTTP
    /// client across all provider traffic.
    pub fn from_config(config: &crate::config::Config, client: reqwest::Client) -> Self {
        match config.provider.as_str() {
            "openai" => AnyProvider::OpenAi(super::openai::OpenAiProvider::new(
                client,
                config.provider_endpoint.clone(),
                config.provider_key.clone().unwrap_or_default(),
                config.chat_model.clone(),
                config.embedding_model.clone(),
            )),
            _ => AnyProvider::Ollama(super::ollama::OllamaProvider::new(
                client,
                config.provider_endpoint.clone(),
                config.chat_model.clone(),
                config.embedding_model.clone(),
            )),
        }
    }
}

impl LlmProvider for AnyProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatOutcome, ProviderError> {
        match self {
            AnyProvider::Ollama(p) => p.chat(messages, tools).await,
            AnyProvider::OpenAi(p) => p.chat(messages, tools).await,
        }
    }

    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<ChatStream, ProviderError> {
        match self {
            AnyProvider::Ollama(p) => p.chat_stream(messages).await,
            AnyProvider::OpenAi(p) => p.chat_stream(messages).await,
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        match self {
            AnyProvider::Ollama(p) => p.embed_batch(texts).await,
            AnyProvider::OpenAi(p) => p.embed_batch(texts).await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            AnyProvider::Ollama(p) => p.name(),
            AnyProvider::OpenAi(p) => p.name(),
        }
    }
}
