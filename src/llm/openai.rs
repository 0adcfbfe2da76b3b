//! OpenAI-compatible backend for the provider contract.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::http::stream_lines;
use super::normalize::extract_inline_tool_call;
use super::provider::{ChatOutcome, ChatStream, LlmProvider, ToolCall, ToolDefinition};
use crate::error::ProviderError;
use crate::models::{ChatMessage, Role};

const EMBED_BATCH_SIZE: usize = 64;

const CHAT_TIMEOUT_SECS: u64 = 300;

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    chat_model: String,
    embedding_model: String,
}

impl OpenAiProvider {
    pub fn new(
        client: reqwest::Client,
        mut base_url: String,
        api_key: String,
        chat_model: String,
        embedding_model: String,
    ) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client,
            base_url,
            api_key,
            chat_model,
            embedding_model,
        }
    }

    async fn send_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let req = OpenAiChatRequest {
            model: &self.chat_model,
            messages: convert_messages(messages),
            stream,
            tools: tools
                .iter()
                .map(|t| OpenAiTool {
                    kind: "function",
                    function: t,
                })
                .collect(),
        };

        let resp = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(CHAT_TIMEOUT_SECS))
            .header("Authorization", format!("Bearer {}", self.api_key))
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

        Ok(resp)
    }

    /// One retry after a second on 429; chat completions are idempotent
    /// from the caller's point of view.
    async fn send_chat_with_retry(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        match self.send_chat(messages, tools, stream).await {
            Err(ProviderError::Api { status: 429, .. }) => {
                tracing::warn!("provider rate limited, retrying in 1s");
                tokio::time::sleep(Duration::from_secs(1)).await;
                self.send_chat(messages, tools, stream).await
            }
            other => other,
        }
    }
}

// ─── Wire types ──────────────────────────────────────────

#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAiTool<'a>>,
}

#[derive(Serialize)]
struct OpenAiTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolDefinition,
}

#[derive(Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Serialize, Deserialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiToolFunction,
}

#[derive(Serialize, Deserialize)]
struct OpenAiToolFunction {
    name: String,
    /// OpenAI transports arguments as a JSON-encoded string.
    arguments: String,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
}

#[derive(Deserialize)]
struct OpenAiStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct OpenAiEmbedRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    embedding: Vec<f32>,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    }
}

fn convert_messages(messages: &[ChatMessage]) -> Vec<OpenAiMessage> {
    messages
        .iter()
        .map(|m| {
            let tool_calls = if m.tool_calls.is_empty() {
                None
            } else {
                Some(
                    m.tool_calls
                        .iter()
                        .map(|c| OpenAiToolCall {
                            id: c.id.clone(),
                            kind: "function".to_string(),
                            function: OpenAiToolFunction {
                                name: c.function_name.clone(),
                                arguments: c.arguments.clone(),
                            },
                        })
                        .collect(),
                )
            };
            OpenAiMessage {
                role: role_str(m.role),
                content: m.content.clone(),
                tool_call_id: m.tool_call_id.clone(),
                tool_calls,
            }
        })
        .collect()
}

/// Parse a single SSE line. Returns `None` for non-data lines, `[DONE]`,
/// and empty deltas.
fn parse_stream_line(line: &str) -> Option<Result<String, ProviderError>> {
    let line = line.trim();
    let data = line.strip_prefix("data: ")?.trim();
    if data == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<OpenAiStreamChunk>(data) {
        Ok(chunk) => {
            let content = chunk
                .choices
                .first()
                .and_then(|c| c.delta.content.clone())
                .unwrap_or_default();
            if content.is_empty() {
                return None;
            }
            Some(Ok(content))
        }
        Err(e) => Some(Err(ProviderError::Parse(format!(
            "bad OpenAI stream chunk: {e}"
        )))),
    }
}

impl LlmProvider for OpenAiProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatOutcome, ProviderError> {
        let resp = self.send_chat_with_retry(messages, tools, false).await?;

        let body: OpenAiChatResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(format!("bad OpenAI chat response: {e}")))?;

        let message = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or(ProviderError::Empty)?;

        let native_calls: Vec<ToolCall> = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| ToolCall {
                id: c.id,
                function_name: c.function.name,
                arguments: c.function.arguments,
            })
            .collect();

        let content = message.content.unwrap_or_default();

        if !native_calls.is_empty() {
            return Ok(ChatOutcome {
                content: Some(content).filter(|c| !c.is_empty()),
                tool_calls: native_calls,
            });
        }

        if let Some(call) = extract_inline_tool_call(&content, tools) {
            return Ok(ChatOutcome::calls(vec![call]));
        }

        if content.is_empty() {
            return Err(ProviderError::Empty);
        }
        Ok(ChatOutcome::text(content))
    }

    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<ChatStream, ProviderError> {
        let resp = self.send_chat_with_retry(messages, &[], true).await?;

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

        let url = format!("{}/v1/embeddings", self.base_url);
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            let req = OpenAiEmbedRequest {
                model: &self.embedding_model,
                input: batch.to_vec(),
            };

            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
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

            let body: OpenAiEmbedResponse = resp
                .json()
                .await
                .map_err(|e| ProviderError::Parse(format!("bad OpenAI embed response: {e}")))?;

            all_embeddings.extend(body.data.into_iter().map(|d| d.embedding));
        }

        Ok(all_embeddings)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stream_data_line() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#;
        assert_eq!(parse_stream_line(line).unwrap().unwrap(), "Hello");
    }

    #[test]
    fn test_parse_stream_done() {
        assert!(parse_stream_line("data: [DONE]").is_none());
    }

    #[test]
    fn test_parse_stream_role_only_chunk() {
        let line = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert!(parse_stream_line(line).is_none());
    }

    #[test]
    fn test_parse_stream_non_data_line() {
        assert!(parse_stream_line("event: message").is_none());
    }

    #[test]
    fn test_parse_stream_malformed() {
        let result = parse_stream_line("data: {broken");
        assert!(result.unwrap().is_err());
    }

    #[test]
    fn test_convert_tool_result_message() {
        let msg = ChatMessage::tool_result("call-9", "read_file", "line 1");
        let converted = convert_messages(&[msg]);
        assert_eq!(converted[0].role, "tool");
        assert_eq!(converted[0].tool_call_id.as_deref(), Some("call-9"));
    }

    #[test]
    fn test_convert_assistant_with_calls_keeps_argument_string() {
        let msg = ChatMessage::assistant_with_calls(
            "",
            vec![ToolCall {
                id: "call-2".into(),
                function_name: "read_file".into(),
                arguments: r#"{"file_path":"src/a.rs"}"#.into(),
            }],
        );
        let converted = convert_messages(&[msg]);
        let calls = converted[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, r#"{"file_path":"src/a.rs"}"#);
    }
}
