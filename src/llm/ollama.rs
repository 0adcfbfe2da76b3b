//! Ollama backend for the provider contract.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::http::stream_lines;
use super::normalize::extract_inline_tool_call;
use super::provider::{ChatOutcome, ChatStream, LlmProvider, ToolCall, ToolDefinition};
use crate::error::ProviderError;
use crate::models::{ChatMessage, Role};

/// Ollama's /api/embed accepts batched input; keep batches modest so a
/// single oversized request cannot blow the context of the embedder.
const EMBED_BATCH_SIZE: usize = 32;

const CHAT_TIMEOUT_SECS: u64 = 300;

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    chat_model: String,
    embedding_model: String,
}

impl OllamaProvider {
    pub fn new(
        client: reqwest::Client,
        mut base_url: String,
        chat_model: String,
        embedding_model: String,
    ) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client,
            base_url,
            chat_model,
            embedding_model,
        }
    }
}

// ─── Wire types ──────────────────────────────────────────

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OllamaTool<'a>>,
}

#[derive(Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OllamaToolCall>>,
}

#[derive(Serialize)]
struct OllamaTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolDefinition,
}

#[derive(Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaToolFunction,
}

#[derive(Serialize, Deserialize)]
struct OllamaToolFunction {
    name: String,
    arguments: serde_json::Value,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Deserialize)]
struct OllamaStreamChunk {
    message: OllamaStreamMessage,
    done: bool,
}

#[derive(Deserialize)]
struct OllamaStreamMessage {
    #[serde(default)]
    content: String,
}

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: Vec<String>,
    /// Ask Ollama to silently truncate inputs that exceed the model's
    /// context length instead of returning a 400.
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    }
}

fn convert_messages(messages: &[ChatMessage]) -> Vec<OllamaMessage> {
    messages
        .iter()
        .map(|m| {
            let tool_calls = if m.tool_calls.is_empty() {
                None
            } else {
                Some(
                    m.tool_calls
                        .iter()
                        .map(|c| OllamaToolCall {
                            function: OllamaToolFunction {
                                name: c.function_name.clone(),
                                arguments: serde_json::from_str(&c.arguments)
                                    .unwrap_or(serde_json::Value::Null),
                            },
                        })
                        .collect(),
                )
            };
            OllamaMessage {
                role: role_str(m.role).to_string(),
                content: m.content.clone(),
                tool_calls,
            }
        })
        .collect()
}

/// Parse a single streaming line. Returns `None` for the done marker and
/// empty deltas.
fn parse_stream_line(line: &str) -> Option<Result<String, ProviderError>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<OllamaStreamChunk>(line) {
        Ok(chunk) => {
            if chunk.done || chunk.message.content.is_empty() {
                return None;
            }
            Some(Ok(chunk.message.content))
        }
        Err(e) => Some(Err(ProviderError::Parse(format!(
            "bad Ollama stream chunk: {e}"
        )))),
    }
}

impl LlmProvider for OllamaProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatOutcome, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let req = OllamaChatRequest {
            model: &self.chat_model,
            messages: convert_messages(messages),
            stream: false,
            tools: tools
                .iter()
                .map(|t| OllamaTool {
                    kind: "function",
                    function: t,
                })
                .collect(),
        };

        let resp = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(CHAT_TIMEOUT_SECS))
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body: OllamaChatResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(format!("bad Ollama chat response: {e}")))?;

        let native_calls: Vec<ToolCall> = body
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| ToolCall {
                // Ollama does not assign call ids; synthesize one
                id: format!("call-{}", Uuid::new_v4()),
                function_name: c.function.name,
                arguments: c.function.arguments.to_string(),
            })
            .collect();

        if !native_calls.is_empty() {
            return Ok(ChatOutcome {
                content: Some(body.message.content).filter(|c| !c.is_empty()),
                tool_calls: native_calls,
            });
        }

        // Smaller models emit tool calls inline as JSON text
        if let Some(call) = extract_inline_tool_call(&body.message.content, tools) {
            return Ok(ChatOutcome::calls(vec![call]));
        }

        if body.message.content.is_empty() {
            return Err(ProviderError::Empty);
        }
        Ok(ChatOutcome::text(body.message.content))
    }

    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<ChatStream, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let req = OllamaChatRequest {
            model: &self.chat_model,
            messages: convert_messages(messages),
            stream: true,
            tools: Vec::new(),
        };

        let resp = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(CHAT_TIMEOUT_SECS))
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let stream = stream_lines(resp.bytes_stream()).filter_map(|line_result| async move {
            match line_result {
                Ok(line) => parse_stream_line(&line),
                Err(e) => Some(Err(e)),
            }
        });

        Ok(Box::pin(stream))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.base_url);
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            let req = OllamaEmbedRequest {
                model: &self.embedding_model,
                input: batch.to_vec(),
                truncate: true,
            };

            let resp = self.client.post(&url).json(&req).send().await?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(ProviderError::Api {
                    status: status.as_u16(),
                    body,
                });
            }

            let body: OllamaEmbedResponse = resp
                .json()
                .await
                .map_err(|e| ProviderError::Parse(format!("bad Ollama embed response: {e}")))?;

            all_embeddings.extend(body.embeddings);
        }

        Ok(all_embeddings)
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
