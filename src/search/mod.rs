//! Hybrid retriever: vector similarity fused with keyword matching over a
//! repository's chunk set.
//!
//! Pipeline: embed the query, take the vector top-K, score a keyword scan
//! of the partition, merge 0.7/0.3, filter, rank.

use std::collections::HashMap;

use crate::error::ProviderError;
use crate::llm::embeddings::embed_query;
use crate::llm::provider::LlmProvider;
use crate::models::{ChunkType, CodeChunk};
use crate::store::Store;

/// Weight of the vector leg in the merged score.
const VECTOR_WEIGHT: f32 = 0.7;
/// Weight of the keyword leg in the merged score.
const KEYWORD_WEIGHT: f32 = 0.3;

/// A chunk with its retrieval score.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: CodeChunk,
    pub score: f32,
}

/// Conjunctive, case-insensitive result filter.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub language: Option<String>,
    pub chunk_type: Option<ChunkType>,
    pub file_name: Option<String>,
    pub path_contains: Vec<String>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.language.is_none()
            && self.chunk_type.is_none()
            && self.file_name.is_none()
            && self.path_contains.is_empty()
    }

    fn matches(&self, chunk: &CodeChunk) -> bool {
        if let Some(ref lang) = self.language {
            if !chunk.language.eq_ignore_ascii_case(lang) {
                return false;
            }
        }
        if let Some(ct) = self.chunk_type {
            if chunk.chunk_type != ct {
                return false;
            }
        }
        if let Some(ref name) = self.file_name {
            if !chunk
                .file_name
                .to_lowercase()
                .contains(&name.to_lowercase())
            {
                return false;
            }
        }
        if !self.path_contains.is_empty() {
            let path = chunk.file_path.to_lowercase();
            if !self
                .path_contains
                .iter()
                .all(|p| path.contains(&p.to_lowercase()))
            {
                return false;
            }
        }
        true
    }
}

/// Pure vector search: embed the query and return the top-K chunks scored
/// by cosine similarity.
pub async fn search<P: LlmProvider>(
    store: &Store,
    provider: &P,
    repository_id: &str,
    query: &str,
    top_k: usize,
) -> Result<Vec<RetrievedChunk>, ProviderError> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(Vec::new());
    }

    let embedding = embed_query(provider, query).await?;
    let matches = store.vector_top_k(repository_id, &embedding, top_k);

    Ok(matches
        .into_iter()
        .map(|m| RetrievedChunk {
            score: (1.0 - m.distance).clamp(0.0, 1.0),
            chunk: m.chunk,
        })
        .collect())
}

/// Hybrid search: vector and keyword legs merged by weighted sum, then
/// filtered and ranked. An empty query yields an empty result, never an
/// error.
pub async fn hybrid_search<P: LlmProvider>(
    store: &Store,
    provider: &P,
    repository_id: &str,
    query: &str,
    filter: Option<&SearchFilter>,
    top_k: usize,
) -> Result<Vec<RetrievedChunk>, ProviderError> {
    let query = query.trim();
    if query.is_empty() || top_k == 0 {
        return Ok(Vec::new());
    }

    // Vector leg fetches double so the merge has headroom
    let vector_hits = search(store, provider, repository_id, query, top_k * 2).await?;

    let all_chunks = store.chunks_for_repository(repository_id);
    let keyword_hits = keyword_search(&all_chunks, query, top_k);

    let mut merged = merge_hits(vector_hits, keyword_hits);

    if let Some(filter) = filter {
        merged.retain(|hit| filter.matches(&hit.chunk));
    }

    merged.truncate(top_k);
    Ok(merged)
}

/// Keyword leg: tokenize on whitespace and score each chunk by the
/// fraction of tokens occurring (case-insensitive substring) in its
/// content or symbol name. Only positive scores are retained.
fn keyword_search(chunks: &[CodeChunk], query: &str, top_k: usize) -> Vec<RetrievedChunk> {
    let tokens: Vec<String> = query
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect();
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut hits: Vec<RetrievedChunk> = chunks
        .iter()
        .filter_map(|chunk| {
            let haystack = chunk.content.to_lowercase();
            let symbol = chunk
                .symbol_name
                .as_deref()
                .map(str::to_lowercase)
                .unwrap_or_default();
            let matches = tokens
                .iter()
                .filter(|t| haystack.contains(t.as_str()) || symbol.contains(t.as_str()))
                .count();
            if matches == 0 {
                return None;
            }
            Some(RetrievedChunk {
                chunk: chunk.clone(),
                score: matches as f32 / tokens.len() as f32,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    hits.truncate(top_k);
    hits
}

/// Merge the two legs by chunk id: vector scores weighted 0.7, keyword
/// 0.3, summed on collision. Ordering is stable: vector candidates keep
/// their vector order, keyword-only candidates follow by id, then the
/// whole list is stably re-ranked by combined score.
fn merge_hits(
    vector_hits: Vec<RetrievedChunk>,
    keyword_hits: Vec<RetrievedChunk>,
) -> Vec<RetrievedChunk> {
    let mut keyword_scores: HashMap<String, f32> = keyword_hits
        .iter()
        .map(|h| (h.chunk.id.clone(), h.score))
        .collect();

    let mut merged: Vec<RetrievedChunk> = Vec::with_capacity(vector_hits.len() + keyword_hits.len());

    for hit in vector_hits {
        let keyword = keyword_scores.remove(&hit.chunk.id).unwrap_or(0.0);
        merged.push(RetrievedChunk {
            score: VECTOR_WEIGHT * hit.score + KEYWORD_WEIGHT * keyword,
            chunk: hit.chunk,
        });
    }

    let mut keyword_only: Vec<RetrievedChunk> = keyword_hits
        .into_iter()
        .filter(|h| keyword_scores.contains_key(&h.chunk.id))
        .map(|h| RetrievedChunk {
            score: KEYWORD_WEIGHT * h.score,
            chunk: h.chunk,
        })
        .collect();
    keyword_only.sort_by(|a, b| a.chunk.id.cmp(&b.chunk.id));
    merged.extend(keyword_only);

    // Stable sort preserves vector order, then id order, among ties
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    merged
}
