//! Integration tests for the ingestion, retrieval, and agent pipeline.
//!
//! These tests exercise the full flow against a scripted provider; no
//! live LLM is required. Embeddings come from a tiny keyword vocabulary
//! so vector search behaves deterministically.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use repo_qa::agent::tools::AgentTool;
use repo_qa::agent::{run_agent, run_agent_streaming, MAX_ITERATIONS};
use repo_qa::chunking::{chunk_file, walk_repository};
use repo_qa::config::ChunkingConfig;
use repo_qa::error::ProviderError;
use repo_qa::llm::embeddings::{build_embedding_text, embed_chunks};
use repo_qa::llm::provider::{ChatOutcome, ChatStream, LlmProvider, ToolCall, ToolDefinition};
use repo_qa::models::{ChatMessage, ChunkType, Repository};
use repo_qa::search::hybrid_search;
use repo_qa::store::Store;
use tokio_util::sync::CancellationToken;

/// Deterministic embeddings: one dimension per vocabulary keyword.
fn vocab_embed(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    ["auth", "database", "user", "flask"]
        .iter()
        .map(|kw| lower.matches(kw).count() as f32)
        .collect()
}

/// Provider with scripted chat outcomes and vocabulary embeddings.
struct ScriptedProvider {
    script: Mutex<VecDeque<ChatOutcome>>,
    stream_answer: String,
}

impl ScriptedProvider {
    fn new(script: Vec<ChatOutcome>, stream_answer: &str) -> Self {
        Self {
            script: Mutex::new(script.into()),
            stream_answer: stream_answer.to_string(),
        }
    }

    fn embeddings_only() -> Self {
        Self::new(Vec::new(), "")
    }
}

impl LlmProvider for ScriptedProvider {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> Result<ChatOutcome, ProviderError> {
        self.script.lock().pop_front().ok_or(ProviderError::Empty)
    }

    async fn chat_stream(&self, _messages: &[ChatMessage]) -> Result<ChatStream, ProviderError> {
        let fragments: Vec<Result<String, ProviderError>> = self
            .stream_answer
            .split_inclusive(' ')
            .map(|f| Ok(f.to_string()))
            .collect();
        Ok(Box::pin(futures_util::stream::iter(fragments)))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| vocab_embed(t)).collect())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Write a small mixed C#/Python project to disk.
fn write_sample_repo(root: &Path) {
    fs::create_dir_all(root.join("src/Auth")).unwrap();
    fs::create_dir_all(root.join("src/Db")).unwrap();
    fs::create_dir_all(root.join("node_modules/junk")).unwrap();

    fs::write(
        root.join("src/Auth/AuthService.cs"),
        "using System;\n\nnamespace App.Auth\n{\n    public class AuthService\n    {\n        public bool Authenticate(string name, string password)\n        {\n            var valid = password.Length > 0;\n            return valid;\n        }\n\n        public void Logout(string name)\n        {\n            Console.WriteLine(name);\n        }\n    }\n}\n",
    )
    .unwrap();

    fs::write(
        root.join("src/Db/Database.cs"),
        "using System;\n\nnamespace App.Db\n{\n    public class Database\n    {\n        public string Connect(string url)\n        {\n            return url;\n        }\n    }\n}\n",
    )
    .unwrap();

    fs::write(
        root.join("src/Program.cs"),
        "using App.Auth;\n\nnamespace App\n{\n    public class Program\n    {\n        public static void Main(string[] args)\n        {\n            // wire up the user entry point\n            var service = new AuthService();\n            service.Authenticate(\"bob\", \"secret\");\n        }\n    }\n}\n",
    )
    .unwrap();

    fs::write(
        root.join("app.py"),
        "from flask import Flask\n\napp = Flask(__name__)\n\ndef health():\n    return 'ok'\n\ndef create_user(payload):\n    return payload\n",
    )
    .unwrap();

    fs::write(root.join("node_modules/junk/bundle.js"), "var x=1;").unwrap();
    fs::write(root.join("yarn.lock"), "lockfile").unwrap();
}

/// Ingest the sample repo: walk, chunk, embed, store, repository record.
async fn ingest<P: LlmProvider>(store: &Store, provider: &P, repository_id: &str, root: &Path) {
    let config = ChunkingConfig::default();
    store.delete_repository_chunks(repository_id).unwrap();

    let files = walk_repository(root);
    let mut chunks = Vec::new();
    for file in &files {
        chunks.extend(chunk_file(repository_id, file, &config));
    }
    embed_chunks(provider, &mut chunks).await.unwrap();

    let chunk_count = chunks.len();
    store.upsert_chunks(chunks).unwrap();
    store
        .upsert_repository(Repository {
            id: repository_id.to_string(),
            name: "sample".into(),
            path: root.display().to_string(),
            description: None,
            indexed_at: Some(chrono::Utc::now()),
            chunk_count,
            languages: vec!["csharp".into(), "python".into()],
        })
        .unwrap();
}

fn setup() -> (tempfile::TempDir, tempfile::TempDir, Store) {
    let repo_dir = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let store = Store::open(store_dir.path()).unwrap();
    write_sample_repo(repo_dir.path());
    (repo_dir, store_dir, store)
}

#[tokio::test]
async fn test_ingestion_produces_semantic_chunks() {
    let (repo_dir, _store_dir, store) = setup();
    let provider = ScriptedProvider::embeddings_only();
    ingest(&store, &provider, "r1", repo_dir.path()).await;

    let chunks = store.chunks_for_repository("r1");
    assert!(!chunks.is_empty());

    // Excluded dirs and lockfiles were never chunked
    assert!(chunks.iter().all(|c| !c.file_path.contains("node_modules")));
    assert!(chunks.iter().all(|c| c.file_name != "yarn.lock"));

    // The AuthService method chunk carries its symbolic context
    let authenticate = chunks
        .iter()
        .find(|c| c.symbol_name.as_deref() == Some("Authenticate"))
        .expect("Authenticate method chunk");
    assert_eq!(authenticate.chunk_type, ChunkType::Method);
    assert_eq!(authenticate.metadata.parent_class.as_deref(), Some("AuthService"));
    assert_eq!(authenticate.metadata.namespace.as_deref(), Some("App.Auth"));

    // Python defs were split at headers
    assert!(chunks
        .iter()
        .any(|c| c.symbol_name.as_deref() == Some("create_user")
            && c.chunk_type == ChunkType::Function));

    // Chunk invariants hold across the whole set
    for chunk in &chunks {
        assert!(chunk.start_line >= 1);
        assert!(chunk.end_line >= chunk.start_line);
        assert_eq!(
            chunk.content.lines().count(),
            chunk.end_line - chunk.start_line + 1,
            "line-count invariant violated for {}:{}",
            chunk.file_path,
            chunk.start_line
        );
        assert!(!chunk.embedding.is_empty());
    }
}

#[tokio::test]
async fn test_reindex_is_idempotent() {
    let (repo_dir, _store_dir, store) = setup();
    let provider = ScriptedProvider::embeddings_only();

    ingest(&store, &provider, "r1", repo_dir.path()).await;
    let first: Vec<(String, usize, usize, String)> = store
        .chunks_for_repository("r1")
        .into_iter()
        .map(|c| (c.file_path, c.start_line, c.end_line, c.content))
        .collect();

    ingest(&store, &provider, "r1", repo_dir.path()).await;
    let second: Vec<(String, usize, usize, String)> = store
        .chunks_for_repository("r1")
        .into_iter()
        .map(|c| (c.file_path, c.start_line, c.end_line, c.content))
        .collect();

    // Same chunk set modulo ids, stable chunk count
    let mut a = first.clone();
    let mut b = second.clone();
    a.sort();
    b.sort();
    assert_eq!(a, b);
    assert_eq!(store.repository("r1").unwrap().chunk_count, second.len());
}

#[tokio::test]
async fn test_hybrid_search_finds_auth_code() {
    let (repo_dir, _store_dir, store) = setup();
    let provider = ScriptedProvider::embeddings_only();
    ingest(&store, &provider, "r1", repo_dir.path()).await;

    let results = hybrid_search(&store, &provider, "r1", "authentication", None, 5)
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert!(
        results[0].chunk.file_path.contains("Auth"),
        "expected an Auth file on top, got {}",
        results[0].chunk.file_path
    );
    assert!(results[0].score > 0.0);
    assert!(results[0].score <= 1.0);
}

#[tokio::test]
async fn test_read_file_tool_reconstructs_windowed_content() {
    let (repo_dir, _store_dir, store) = setup();
    let provider = ScriptedProvider::embeddings_only();
    ingest(&store, &provider, "r1", repo_dir.path()).await;

    let result = AgentTool::ReadFile
        .execute(
            &store,
            &provider,
            "r1",
            r#"{"file_path": "authservice", "start_line": 5, "end_line": 8}"#,
        )
        .await;
    assert!(result.contains("[src/Auth/AuthService.cs:5-8]"));
    assert!(result.contains("5 |"));
    assert!(result.contains("public class AuthService"));
}

#[tokio::test]
async fn test_find_references_tool_on_indexed_repo() {
    let (repo_dir, _store_dir, store) = setup();
    let provider = ScriptedProvider::embeddings_only();
    ingest(&store, &provider, "r1", repo_dir.path()).await;

    let result = AgentTool::FindReferences
        .execute(
            &store,
            &provider,
            "r1",
            r#"{"symbol": "AuthService", "kind": "class"}"#,
        )
        .await;

    assert!(result.contains("References to 'AuthService' (definition):"));
    assert!(result.contains("public class AuthService"));
    // Program.cs instantiates the service
    assert!(result.contains("(call):") || result.contains("(usage):"));
    assert!(result.contains("src/Program.cs"));
}

#[tokio::test]
async fn test_agent_chat_grounds_citations() {
    let (repo_dir, _store_dir, store) = setup();
    let provider = ScriptedProvider::new(
        vec![
            ChatOutcome::calls(vec![ToolCall {
                id: "call-1".into(),
                function_name: "code_search".into(),
                arguments: r#"{"query": "authentication"}"#.into(),
            }]),
            ChatOutcome::text("Authentication is handled by AuthService."),
        ],
        "",
    );
    ingest(&store, &provider, "r1", repo_dir.path()).await;

    let response = run_agent(&store, &provider, "r1", "How does login work?", None)
        .await
        .unwrap();

    assert!(response.is_complete);
    assert_eq!(response.reasoning_steps.len(), 1);
    assert_eq!(response.reasoning_steps[0].action, "code_search");
    // The search hit Auth code and produced extractable citations
    assert!(!response.citations.is_empty());
    assert!(response.citations[0].file_path.contains("Auth"));
    // Citations are unique by (path, start, end)
    let mut keys: Vec<(String, usize, usize)> = response
        .citations
        .iter()
        .map(|c| (c.file_path.clone(), c.start_line, c.end_line))
        .collect();
    let total = keys.len();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), total);
}

#[tokio::test]
async fn test_streaming_chat_event_sequence() {
    let (repo_dir, _store_dir, store) = setup();
    let provider = ScriptedProvider::new(
        vec![
            ChatOutcome::calls(vec![ToolCall {
                id: "call-1".into(),
                function_name: "code_search".into(),
                arguments: r#"{"query": "authenticate"}"#.into(),
            }]),
            ChatOutcome::text("ready"),
        ],
        "Authentication is implemented in AuthService.Authenticate. ",
    );
    ingest(&store, &provider, "r1", repo_dir.path()).await;

    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    run_agent_streaming(
        &store,
        &provider,
        "r1",
        "How does login work?",
        None,
        tx,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    let kinds: Vec<&str> = events.iter().map(|e| e.event_type).collect();

    // Exactly one action for the single tool call, one observation,
    // at least one answer fragment, citations, then done.
    assert_eq!(kinds.iter().filter(|k| **k == "action").count(), 1);
    assert_eq!(kinds.iter().filter(|k| **k == "observation").count(), 1);
    assert!(kinds.iter().filter(|k| **k == "answer").count() >= 1);
    assert_eq!(kinds.last(), Some(&"done"));

    let action: serde_json::Value =
        serde_json::from_str(&events[0].content).expect("action content is JSON");
    assert_eq!(action["tool"], "code_search");

    let done = events.last().unwrap();
    assert!(done
        .conversation_id
        .as_deref()
        .is_some_and(|id| !id.is_empty()));

    // No event follows done, and order is action ≺ observation ≺ answer ≺ citation ≺ done
    let positions: Vec<usize> = ["action", "observation", "answer"]
        .iter()
        .map(|k| kinds.iter().position(|x| x == k).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));

    // The stored conversation now carries the streamed answer
    let convo = store
        .conversation(done.conversation_id.as_deref().unwrap())
        .unwrap();
    assert!(convo
        .messages
        .last()
        .unwrap()
        .content
        .contains("AuthService"));
}

#[tokio::test]
async fn test_agent_iteration_budget() {
    let (repo_dir, _store_dir, store) = setup();
    let script: Vec<ChatOutcome> = (0..MAX_ITERATIONS + 3)
        .map(|i| {
            ChatOutcome::calls(vec![ToolCall {
                id: format!("call-{i}"),
                function_name: "code_search".into(),
                arguments: r#"{"query": "anything"}"#.into(),
            }])
        })
        .collect();
    let provider = ScriptedProvider::new(script, "");
    ingest(&store, &provider, "r1", repo_dir.path()).await;

    let response = run_agent(&store, &provider, "r1", "loop forever", None)
        .await
        .unwrap();
    assert!(!response.is_complete);
    assert_eq!(response.reasoning_steps.len(), MAX_ITERATIONS);
}

#[tokio::test]
async fn test_embedding_text_prefixes_context() {
    let (repo_dir, _store_dir, store) = setup();
    let provider = ScriptedProvider::embeddings_only();
    ingest(&store, &provider, "r1", repo_dir.path()).await;

    let chunk = store
        .chunks_for_repository("r1")
        .into_iter()
        .find(|c| c.symbol_name.as_deref() == Some("Authenticate"))
        .unwrap();
    let text = build_embedding_text(&chunk);
    assert!(text.starts_with("File: src/Auth/AuthService.cs"));
    assert!(text.contains("method: Authenticate"));
    assert!(text.contains("Namespace: App.Auth"));
    assert!(text.contains("Code:\n"));
}
