//! Ingestion endpoints: repository registration, re-indexing, deletion,
//! and aggregate statistics. Indexing runs as a background task; the
//! repository record is rewritten with derived counts when it completes.

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use uuid::Uuid;

use crate::chunking::{chunk_file, walk_repository};
use crate::error::ApiError;
use crate::llm::embeddings::embed_chunks;
use crate::models::{CreateRepositoryRequest, Repository, RepositoryStats};
use crate::state::AppState;

/// GET /api/ingestion/repositories
pub async fn list_repositories(State(state): State<AppState>) -> Json<Vec<Repository>> {
    Json(state.store.repositories())
}

/// GET /api/ingestion/repositories/{id}
pub async fn get_repository(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Repository>, ApiError> {
    state
        .store
        .repository(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("repository '{id}' not found")))
}

/// POST /api/ingestion/repositories: register a repository and index it
/// in the background. Posting an existing id re-indexes it
/// (delete-then-insert of the whole chunk partition).
pub async fn create_repository(
    State(state): State<AppState>,
    Json(req): Json<CreateRepositoryRequest>,
) -> Result<(StatusCode, Json<Repository>), ApiError> {
    let path = req.path.trim().to_string();
    if path.is_empty() {
        return Err(ApiError::Validation("path is required".into()));
    }
    if !PathBuf::from(&path).is_dir() {
        return Err(ApiError::Validation(format!(
            "path '{path}' is not a readable directory"
        )));
    }

    let id = req
        .id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let name = req
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| {
            path.trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or("repository")
                .to_string()
        });

    let existing = state.store.repository(&id);
    let repository = Repository {
        id: id.clone(),
        name,
        path,
        description: req.description,
        indexed_at: existing.as_ref().and_then(|r| r.indexed_at),
        chunk_count: existing.as_ref().map(|r| r.chunk_count).unwrap_or(0),
        languages: existing.map(|r| r.languages).unwrap_or_default(),
    };
    state.store.upsert_repository(repository.clone())?;

    let state_clone = state.clone();
    tokio::spawn(async move {
        if let Err(e) = run_indexing(&state_clone, &id).await {
            tracing::error!("indexing failed for repository {id}: {e:#}");
        }
    });

    Ok((StatusCode::CREATED, Json(repository)))
}

/// DELETE /api/ingestion/repositories/{id}
pub async fn delete_repository(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.store.repository(&id).is_none() {
        return Err(ApiError::NotFound(format!("repository '{id}' not found")));
    }

    if let Err(e) = state.store.delete_repository_chunks(&id) {
        tracing::warn!("failed to delete chunks for {id}: {e}");
    }
    state.store.delete_repository(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/ingestion/repositories/{id}/stats
pub async fn repository_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RepositoryStats>, ApiError> {
    if state.store.repository(&id).is_none() {
        return Err(ApiError::NotFound(format!("repository '{id}' not found")));
    }

    let chunks = state.store.chunks_for_repository(&id);
    let mut languages: BTreeMap<String, usize> = BTreeMap::new();
    let mut chunk_types: BTreeMap<String, usize> = BTreeMap::new();
    let mut files: HashSet<&str> = HashSet::new();
    for chunk in &chunks {
        *languages.entry(chunk.language.clone()).or_insert(0) += 1;
        *chunk_types
            .entry(chunk.chunk_type.as_str().to_string())
            .or_insert(0) += 1;
        files.insert(chunk.file_path.as_str());
    }

    Ok(Json(RepositoryStats {
        repository_id: id,
        chunk_count: chunks.len(),
        file_count: files.len(),
        languages,
        chunk_types,
    }))
}

/// The ingestion pipeline: walk → chunk (file-parallel) → embed (ordered
/// batches) → store chunks → rewrite the repository record.
async fn run_indexing(state: &AppState, repository_id: &str) -> anyhow::Result<()> {
    let repository = state
        .store
        .repository(repository_id)
        .context("repository record disappeared before indexing")?;

    // Wholesale delete-then-insert; concurrent readers may observe a
    // mixed view and must tolerate missing chunks.
    state.store.delete_repository_chunks(repository_id)?;

    let root = PathBuf::from(&repository.path);
    let files = tokio::task::spawn_blocking(move || walk_repository(&root)).await?;
    tracing::info!(
        "found {} indexable files in {}",
        files.len(),
        repository.name
    );

    let chunk_tasks: Vec<_> = files
        .into_iter()
        .map(|file| {
            let repository_id = repository_id.to_string();
            let chunking = state.config.chunking.clone();
            tokio::task::spawn_blocking(move || chunk_file(&repository_id, &file, &chunking))
        })
        .collect();

    let mut chunks = Vec::new();
    for task in futures_util::future::join_all(chunk_tasks).await {
        match task {
            Ok(file_chunks) => chunks.extend(file_chunks),
            Err(e) => tracing::warn!("chunking task failed: {e}"),
        }
    }
    tracing::info!("created {} chunks for {}", chunks.len(), repository.name);

    // Keyword retrieval still works without vectors, so an unavailable
    // embedding provider degrades the index instead of failing it.
    if let Err(e) = embed_chunks(state.provider.as_ref(), &mut chunks).await {
        tracing::warn!(
            "embedding failed for {} (provider may be down): {e}",
            repository.name
        );
    }

    let chunk_count = chunks.len();
    let languages: BTreeSet<String> = chunks.iter().map(|c| c.language.clone()).collect();
    state.store.upsert_chunks(chunks)?;

    // Repository record is written only after every chunk upsert settled
    let mut repository = state
        .store
        .repository(repository_id)
        .unwrap_or(repository);
    repository.indexed_at = Some(Utc::now());
    repository.chunk_count = chunk_count;
    repository.languages = languages.into_iter().collect();
    state.store.upsert_repository(repository.clone())?;

    tracing::info!(
        "repository {} indexed: {chunk_count} chunks",
        repository.name
    );
    Ok(())
}
