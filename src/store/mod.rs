//! Persistence for chunks, repositories, and conversations.
//!
//! Three logical collections held in memory behind `RwLock`s and
//! snapshotted to JSON files under the configured data directory
//! (atomic tmp-file + rename writes). The store is the single source of
//! truth; no in-memory replica survives outside it.

use chrono::{Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::models::{CodeChunk, ConversationContext, Repository};

/// Conversations older than this are treated as absent on read.
const CONVERSATION_TTL_DAYS: i64 = 7;

/// A chunk annotated with its vector distance to a query embedding.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub chunk: CodeChunk,
    /// Cosine distance, lower is closer.
    pub distance: f32,
}

pub struct Store {
    /// Chunks partitioned by repository id.
    chunks: RwLock<HashMap<String, Vec<CodeChunk>>>,
    repositories: RwLock<HashMap<String, Repository>>,
    conversations: RwLock<HashMap<String, ConversationContext>>,
    data_dir: PathBuf,
}

impl Store {
    /// Open the store rooted at `data_dir`, loading any existing
    /// snapshots. Unreadable snapshots start the collection empty.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)?;

        Ok(Self {
            chunks: RwLock::new(load_collection(&data_dir.join("chunks.json"))),
            repositories: RwLock::new(load_collection(&data_dir.join("repositories.json"))),
            conversations: RwLock::new(load_collection(&data_dir.join("conversations.json"))),
            data_dir: data_dir.to_path_buf(),
        })
    }

    // ─── Chunks ──────────────────────────────────────────

    pub fn upsert_chunk(&self, chunk: CodeChunk) -> Result<(), StoreError> {
        {
            let mut chunks = self.chunks.write();
            let partition = chunks.entry(chunk.repository_id.clone()).or_default();
            match partition.iter_mut().find(|c| c.id == chunk.id) {
                Some(existing) => *existing = chunk,
                None => partition.push(chunk),
            }
        }
        self.persist_chunks()
    }

    pub fn upsert_chunks(&self, new_chunks: Vec<CodeChunk>) -> Result<(), StoreError> {
        {
            let mut chunks = self.chunks.write();
            for chunk in new_chunks {
                let partition = chunks.entry(chunk.repository_id.clone()).or_default();
                match partition.iter_mut().find(|c| c.id == chunk.id) {
                    Some(existing) => *existing = chunk,
                    None => partition.push(chunk),
                }
            }
        }
        self.persist_chunks()
    }

    /// Remove every chunk of a repository by enumerating its partition.
    /// Best-effort: callers must tolerate leftover chunks on a retried
    /// re-index.
    pub fn delete_repository_chunks(&self, repository_id: &str) -> Result<usize, StoreError> {
        let removed = {
            let mut chunks = self.chunks.write();
            chunks.remove(repository_id).map(|p| p.len()).unwrap_or(0)
        };
        self.persist_chunks()?;
        Ok(removed)
    }

    pub fn chunks_for_repository(&self, repository_id: &str) -> Vec<CodeChunk> {
        self.chunks
            .read()
            .get(repository_id)
            .cloned()
            .unwrap_or_default()
    }

    /// The `k` chunks of a repository closest to `query_embedding` by
    /// cosine distance, ascending. Chunks without an embedding are skipped.
    pub fn vector_top_k(
        &self,
        repository_id: &str,
        query_embedding: &[f32],
        k: usize,
    ) -> Vec<VectorMatch> {
        let chunks = self.chunks.read();
        let Some(partition) = chunks.get(repository_id) else {
            return Vec::new();
        };

        let mut scored: Vec<VectorMatch> = partition
            .iter()
            .filter(|c| !c.embedding.is_empty())
            .map(|c| VectorMatch {
                chunk: c.clone(),
                distance: cosine_distance(query_embedding, &c.embedding),
            })
            .collect();

        scored.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        scored
    }

    // ─── Repositories ────────────────────────────────────

    pub fn upsert_repository(&self, repository: Repository) -> Result<(), StoreError> {
        self.repositories
            .write()
            .insert(repository.id.clone(), repository);
        self.persist_repositories()
    }

    pub fn repository(&self, id: &str) -> Option<Repository> {
        self.repositories.read().get(id).cloned()
    }

    pub fn repositories(&self) -> Vec<Repository> {
        let mut repos: Vec<Repository> = self.repositories.read().values().cloned().collect();
        repos.sort_by(|a, b| a.name.cmp(&b.name));
        repos
    }

    pub fn delete_repository(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.repositories.write().remove(id).is_some();
        self.persist_repositories()?;
        Ok(removed)
    }

    // ─── Conversations ───────────────────────────────────

    /// Insert or replace a conversation, bumping `updated_at`.
    pub fn upsert_conversation(
        &self,
        mut conversation: ConversationContext,
    ) -> Result<(), StoreError> {
        conversation.updated_at = Utc::now();
        self.conversations
            .write()
            .insert(conversation.id.clone(), conversation);
        self.persist_conversations()
    }

    /// Read a conversation. Entries past the TTL are treated as absent.
    pub fn conversation(&self, id: &str) -> Option<ConversationContext> {
        let conversations = self.conversations.read();
        let convo = conversations.get(id)?;
        if Utc::now() - convo.updated_at > Duration::days(CONVERSATION_TTL_DAYS) {
            return None;
        }
        Some(convo.clone())
    }

    pub fn delete_conversation(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.conversations.write().remove(id).is_some();
        self.persist_conversations()?;
        Ok(removed)
    }

    // ─── Persistence ─────────────────────────────────────

    fn persist_chunks(&self) -> Result<(), StoreError> {
        let snapshot = serde_json::to_string(&*self.chunks.read())?;
        write_atomic(&self.data_dir.join("chunks.json"), &snapshot)
    }

    fn persist_repositories(&self) -> Result<(), StoreError> {
        let snapshot = serde_json::to_string(&*self.repositories.read())?;
        write_atomic(&self.data_dir.join("repositories.json"), &snapshot)
    }

    fn persist_conversations(&self) -> Result<(), StoreError> {
        let snapshot = serde_json::to_string(&*self.conversations.read())?;
        write_atomic(&self.data_dir.join("conversations.json"), &snapshot)
    }
}

fn load_collection<T: serde::de::DeserializeOwned + Default>(path: &Path) -> T {
    if !path.exists() {
        return T::default();
    }
    match std::fs::read_to_string(path) {
        Ok(data) => serde_json::from_str(&data).unwrap_or_default(),
        Err(e) => {
            tracing::warn!("failed to read {}: {e}", path.display());
            T::default()
        }
    }
}

fn write_atomic(path: &Path, data: &str) -> Result<(), StoreError> {
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, data)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Cosine similarity of two vectors; 0.0 for mismatched or empty inputs
/// and for zero-magnitude vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, a_sq, b_sq) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, a_sq, b_sq), (x, y)| {
            (dot + x * y, a_sq + x * x, b_sq + y * y)
        });

    let magnitude = (a_sq * b_sq).sqrt();
    if magnitude == 0.0 {
        return 0.0;
    }
    dot / magnitude
}
