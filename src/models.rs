use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::llm::provider::ToolCall;

/// An indexed repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub indexed_at: Option<DateTime<Utc>>,
    pub chunk_count: usize,
    pub languages: Vec<String>,
}

/// Semantic category of a code chunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Code,
    Class,
    Method,
    Function,
    Comment,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Code => "code",
            ChunkType::Class => "class",
            ChunkType::Method => "method",
            ChunkType::Function => "function",
            ChunkType::Comment => "comment",
        }
    }

    pub fn parse(s: &str) -> Option<ChunkType> {
        match s.to_lowercase().as_str() {
            "code" => Some(ChunkType::Code),
            "class" => Some(ChunkType::Class),
            "method" => Some(ChunkType::Method),
            "function" => Some(ChunkType::Function),
            "comment" => Some(ChunkType::Comment),
            _ => None,
        }
    }
}

/// Symbolic context attached to a chunk by the chunker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<u32>,
}

/// A contiguous span of source code, the unit of indexing and retrieval.
///
/// `start_line`/`end_line` are 1-based and inclusive; `content` holds exactly
/// those lines. Chunks are created during ingestion, wholesale replaced on
/// re-index, and never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeChunk {
    pub id: String,
    pub repository_id: String,
    pub file_path: String,
    pub file_name: String,
    pub language: String,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub chunk_type: ChunkType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_name: Option<String>,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: ChunkMetadata,
    pub created_at: DateTime<Utc>,
}

/// Role of a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// A single message in a conversation, including tool-call traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_call_id: None,
            tool_name: None,
            tool_calls: Vec::new(),
        }
    }

    /// Assistant message that carries tool invocations.
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::new(Role::Assistant, content);
        msg.tool_calls = calls;
        msg
    }

    /// Tool-result message paired to a prior tool call.
    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = Some(call_id.into());
        msg.tool_name = Some(tool_name.into());
        msg
    }
}

/// Stored conversation history. Grows by append only; the tail delivered to
/// the model may be truncated, the stored history never is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    pub id: String,
    pub repository_id: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationContext {
    pub fn new(id: impl Into<String>, repository_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            repository_id: repository_id.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Which tool surface produced a citation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CitationSource {
    CodeSearch,
    FileRead,
    Reference,
}

/// A verifiable source span backing part of an answer.
///
/// `(file_path, start_line, end_line)` is the deduplication key within a
/// response. Citations are owned by the response and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub id: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_name: Option<String>,
    pub relevance_score: f32,
    pub source_type: CitationSource,
}

/// One tool invocation as recorded for the non-streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningStep {
    pub step_number: usize,
    pub thought: String,
    pub action: String,
    pub action_input: String,
    pub observation: String,
}

/// Final answer of the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub content: String,
    pub citations: Vec<Citation>,
    pub reasoning_steps: Vec<ReasoningStep>,
    pub is_complete: bool,
    pub conversation_id: String,
}

// ─── Request / response payloads ─────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub repository_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRepositoryRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub path: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Aggregate statistics for one repository's chunk set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryStats {
    pub repository_id: String,
    pub chunk_count: usize,
    pub file_count: usize,
    pub languages: BTreeMap<String, usize>,
    pub chunk_types: BTreeMap<String, usize>,
}
