//! Agent endpoints: question answering over an indexed repository, in
//! buffered and streaming form, plus conversation retrieval.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::Json;
use futures_util::stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::agent::{run_agent, run_agent_streaming};
use crate::error::ApiError;
use crate::models::{AgentChatRequest, AgentResponse, ConversationContext};
use crate::state::AppState;

fn validate(state: &AppState, req: &AgentChatRequest) -> Result<(), ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::Validation("message is required".into()));
    }
    if req.repository_id.trim().is_empty() {
        return Err(ApiError::Validation("repositoryId is required".into()));
    }
    if state.store.repository(&req.repository_id).is_none() {
        return Err(ApiError::NotFound(format!(
            "repository '{}' not found",
            req.repository_id
        )));
    }
    Ok(())
}

/// POST /api/agent/chat
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<AgentChatRequest>,
) -> Result<Json<AgentResponse>, ApiError> {
    validate(&state, &req)?;

    let _permit = state
        .chat_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ApiError::Internal("chat service shut down".into()))?;

    let response = run_agent(
        &state.store,
        state.provider.as_ref(),
        &req.repository_id,
        req.message.trim(),
        req.conversation_id.as_deref(),
    )
    .await?;

    Ok(Json(response))
}

/// POST /api/agent/chat/stream: server-sent events, one `data:` frame
/// per agent event, terminated by `done`.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(req): Json<AgentChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    validate(&state, &req)?;

    let permit = state
        .chat_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ApiError::Internal("chat service shut down".into()))?;

    let (tx, rx) = tokio::sync::mpsc::channel(64);
    let cancel = CancellationToken::new();

    {
        let state = state.clone();
        let cancel = cancel.clone();
        let message = req.message.trim().to_string();
        tokio::spawn(async move {
            if let Err(e) = run_agent_streaming(
                &state.store,
                state.provider.as_ref(),
                &req.repository_id,
                &message,
                req.conversation_id.as_deref(),
                tx,
                cancel,
            )
            .await
            {
                tracing::error!("streaming agent run failed: {e}");
            }
        });
    }

    // Dropping the response stream cancels the agent run and releases the
    // chat permit.
    let guard = cancel.drop_guard();
    let event_stream = ReceiverStream::new(rx).map(move |event| {
        let _guard = &guard;
        let _permit = &permit;
        Ok(Event::default()
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().data("{}")))
    });

    Ok(Sse::new(event_stream))
}

/// GET /api/agent/conversations/{id}
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationContext>, ApiError> {
    state
        .store
        .conversation(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("conversation '{id}' not found")))
}

/// DELETE /api/agent/conversations/{id}
pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_conversation(&id)?;
    Ok(StatusCode::NO_CONTENT)
}
