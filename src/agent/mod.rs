//! Agent orchestrator: a bounded tool-calling loop over the provider,
//! with streaming event emission and citation grounding of the final
//! answer.

pub mod citations;
pub mod tools;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::llm::provider::LlmProvider;
use crate::models::{
    AgentResponse, ChatMessage, Citation, ConversationContext, ReasoningStep, Role,
};
use crate::store::Store;
use tools::AgentTool;

/// Hard cap on model turns per request.
pub const MAX_ITERATIONS: usize = 10;
/// Conversation turns delivered to the model.
pub const MAX_HISTORY_TURNS: usize = 10;
/// Observation events are truncated to this many characters.
const OBSERVATION_PREVIEW_CHARS: usize = 500;
/// Citation events emitted per streaming response.
const MAX_CITATION_EVENTS: usize = 10;

const SYSTEM_PROMPT: &str = "You are a code assistant answering questions about one indexed repository.\n\
     Ground every claim in actual code before answering: use code_search to find\n\
     relevant code, read_file to inspect files, find_references to trace symbols,\n\
     and explain_code for snippets. When you have enough evidence, answer directly\n\
     and cite sources as [path:start-end]. If the code does not answer the\n\
     question, say what you found and what is missing.";

const INCOMPLETE_MESSAGE: &str = "I could not complete the analysis within the allowed number of \
     reasoning steps. Sorry about that. A more specific question may help.";

/// One server-sent event of the streaming endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation: Option<Citation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl StreamEvent {
    fn action(tool: &str, input: &str) -> Self {
        let content = serde_json::json!({ "tool": tool, "input": input }).to_string();
        Self {
            event_type: "action",
            content,
            citation: None,
            conversation_id: None,
        }
    }

    fn observation(result: &str) -> Self {
        Self {
            event_type: "observation",
            content: truncate_chars(result, OBSERVATION_PREVIEW_CHARS),
            citation: None,
            conversation_id: None,
        }
    }

    fn answer(fragment: &str) -> Self {
        Self {
            event_type: "answer",
            content: fragment.to_string(),
            citation: None,
            conversation_id: None,
        }
    }

    fn citation(citation: Citation) -> Self {
        Self {
            event_type: "citation",
            content: String::new(),
            citation: Some(citation),
            conversation_id: None,
        }
    }

    fn done(conversation_id: &str) -> Self {
        Self {
            event_type: "done",
            content: String::new(),
            citation: None,
            conversation_id: Some(conversation_id.to_string()),
        }
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}

enum Verdict {
    Answered(String),
    Exhausted,
    Cancelled,
}

struct LoopOutput {
    verdict: Verdict,
    tool_results: Vec<String>,
    steps: Vec<ReasoningStep>,
}

/// Load the conversation (ignoring expired ones) or start a new one under
/// the requested id.
fn load_conversation(
    store: &Store,
    repository_id: &str,
    conversation_id: Option<&str>,
) -> ConversationContext {
    match conversation_id {
        Some(id) => store
            .conversation(id)
            .unwrap_or_else(|| ConversationContext::new(id, repository_id)),
        None => ConversationContext::new(uuid::Uuid::new_v4().to_string(), repository_id),
    }
}

/// The ≤10-turn user/assistant tail delivered to the model. Tool traffic
/// stays in the stored history but is not replayed.
fn history_tail(conversation: &ConversationContext) -> Vec<ChatMessage> {
    conversation
        .messages
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant) && m.tool_calls.is_empty())
        .rev()
        .take(MAX_HISTORY_TURNS)
        .cloned()
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect()
}

fn build_messages(conversation: &ConversationContext, user_message: &str) -> Vec<ChatMessage> {
    let tail = history_tail(conversation);
    let mut messages = Vec::with_capacity(tail.len() + 2);
    messages.push(ChatMessage::new(Role::System, SYSTEM_PROMPT));
    messages.extend(tail);
    messages.push(ChatMessage::new(Role::User, user_message));
    messages
}

/// The tool loop shared by both response paths. Assistant and tool
/// messages are appended to `messages` (model view) and `conversation`
/// (stored history); the sink, when present, receives action/observation
/// events as tools run.
async fn drive<P: LlmProvider>(
    store: &Store,
    provider: &P,
    repository_id: &str,
    messages: &mut Vec<ChatMessage>,
    conversation: &mut ConversationContext,
    cancel: &CancellationToken,
    sink: Option<&mpsc::Sender<StreamEvent>>,
) -> Result<LoopOutput, AgentError> {
    let catalogue = AgentTool::catalogue();
    let mut tool_results: Vec<String> = Vec::new();
    let mut steps: Vec<ReasoningStep> = Vec::new();

    for _iteration in 0..MAX_ITERATIONS {
        if cancel.is_cancelled() {
            return Ok(LoopOutput {
                verdict: Verdict::Cancelled,
                tool_results,
                steps,
            });
        }

        let outcome = tokio::select! {
            r = provider.chat(messages.as_slice(), &catalogue) => r?,
            () = cancel.cancelled() => {
                return Ok(LoopOutput { verdict: Verdict::Cancelled, tool_results, steps });
            }
        };

        if outcome.tool_calls.is_empty() {
            let content = outcome.content.unwrap_or_default();
            return Ok(LoopOutput {
                verdict: Verdict::Answered(content),
                tool_results,
                steps,
            });
        }

        let thought = outcome.content.clone().unwrap_or_default();
        let assistant =
            ChatMessage::assistant_with_calls(thought.clone(), outcome.tool_calls.clone());
        conversation.messages.push(assistant.clone());
        messages.push(assistant);

        if let Some(tx) = sink {
            for call in &outcome.tool_calls {
                let event = StreamEvent::action(&call.function_name, &call.arguments);
                if tx.send(event).await.is_err() {
                    return Ok(LoopOutput {
                        verdict: Verdict::Cancelled,
                        tool_results,
                        steps,
                    });
                }
            }
        }

        // Execute this turn's calls concurrently; results are appended in
        // the provider's call order.
        let futures: Vec<_> = outcome
            .tool_calls
            .iter()
            .map(|call| {
                let name = call.function_name.clone();
                let arguments = call.arguments.clone();
                async move {
                    match AgentTool::by_name(&name) {
                        Some(tool) => {
                            tool.execute(store, provider, repository_id, &arguments).await
                        }
                        None => format!("Error: unknown tool '{name}'"),
                    }
                }
            })
            .collect();
        let results = tokio::select! {
            r = futures_util::future::join_all(futures) => r,
            () = cancel.cancelled() => {
                return Ok(LoopOutput { verdict: Verdict::Cancelled, tool_results, steps });
            }
        };

        for (call, result) in outcome.tool_calls.iter().zip(results) {
            if let Some(tx) = sink {
                if tx.send(StreamEvent::observation(&result)).await.is_err() {
                    return Ok(LoopOutput {
                        verdict: Verdict::Cancelled,
                        tool_results,
                        steps,
                    });
                }
            }

            steps.push(ReasoningStep {
                step_number: steps.len() + 1,
                thought: if thought.is_empty() {
                    format!("Invoking {}", call.function_name)
                } else {
                    thought.clone()
                },
                action: call.function_name.clone(),
                action_input: call.arguments.clone(),
                observation: result.clone(),
            });

            let tool_msg = ChatMessage::tool_result(&call.id, &call.function_name, &result);
            conversation.messages.push(tool_msg.clone());
            messages.push(tool_msg);
            tool_results.push(result);
        }
    }

    Ok(LoopOutput {
        verdict: Verdict::Exhausted,
        tool_results,
        steps,
    })
}

/// Non-streaming agent run: drive the loop, ground the answer through the
/// citation service, persist the conversation, and return the response.
pub async fn run_agent<P: LlmProvider>(
    store: &Store,
    provider: &P,
    repository_id: &str,
    message: &str,
    conversation_id: Option<&str>,
) -> Result<AgentResponse, AgentError> {
    let mut conversation = load_conversation(store, repository_id, conversation_id);
    let mut messages = build_messages(&conversation, message);
    conversation
        .messages
        .push(ChatMessage::new(Role::User, message));

    let cancel = CancellationToken::new();
    let output = drive(
        store,
        provider,
        repository_id,
        &mut messages,
        &mut conversation,
        &cancel,
        None,
    )
    .await?;

    let (content, is_complete) = match output.verdict {
        Verdict::Answered(content) => (content, true),
        Verdict::Exhausted | Verdict::Cancelled => (INCOMPLETE_MESSAGE.to_string(), false),
    };

    let grounded = citations::ground(&content, &output.tool_results);

    conversation
        .messages
        .push(ChatMessage::new(Role::Assistant, grounded.content.clone()));
    let conversation_id = conversation.id.clone();
    store.upsert_conversation(conversation)?;

    Ok(AgentResponse {
        content: grounded.content,
        citations: grounded.citations,
        reasoning_steps: output.steps,
        is_complete,
        conversation_id,
    })
}

/// Streaming agent run. Events are emitted in the order
/// `action → observation → … → answer* → citation* → done`; nothing
/// follows `done`, and cancellation (a dropped receiver or a fired token)
/// stops the pipeline quietly.
pub async fn run_agent_streaming<P: LlmProvider>(
    store: &Store,
    provider: &P,
    repository_id: &str,
    message: &str,
    conversation_id: Option<&str>,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) -> Result<(), AgentError> {
    let mut conversation = load_conversation(store, repository_id, conversation_id);
    let mut messages = build_messages(&conversation, message);
    conversation
        .messages
        .push(ChatMessage::new(Role::User, message));

    let output = drive(
        store,
        provider,
        repository_id,
        &mut messages,
        &mut conversation,
        &cancel,
        Some(&tx),
    )
    .await?;

    let answer = match output.verdict {
        Verdict::Cancelled => return Ok(()),
        Verdict::Exhausted => {
            if tx
                .send(StreamEvent::answer(INCOMPLETE_MESSAGE))
                .await
                .is_err()
            {
                return Ok(());
            }
            INCOMPLETE_MESSAGE.to_string()
        }
        Verdict::Answered(_) => {
            // Follow-up streaming call produces the delivered answer
            let mut stream = tokio::select! {
                r = provider.chat_stream(&messages) => r?,
                () = cancel.cancelled() => return Ok(()),
            };

            let mut answer = String::new();
            loop {
                let item = tokio::select! {
                    i = stream.next() => i,
                    () = cancel.cancelled() => return Ok(()),
                };
                match item {
                    None => break,
                    Some(Ok(fragment)) => {
                        answer.push_str(&fragment);
                        if tx.send(StreamEvent::answer(&fragment)).await.is_err() {
                            return Ok(());
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!("answer stream interrupted: {e}");
                        break;
                    }
                }
            }
            answer
        }
    };

    for citation in citations::ground(&answer, &output.tool_results)
        .citations
        .into_iter()
        .take(MAX_CITATION_EVENTS)
    {
        if tx.send(StreamEvent::citation(citation)).await.is_err() {
            return Ok(());
        }
    }

    conversation
        .messages
        .push(ChatMessage::new(Role::Assistant, answer));
    let conversation_id = conversation.id.clone();
    store.upsert_conversation(conversation)?;

    let _ = tx.send(StreamEvent::done(&conversation_id)).await;
    Ok(())
}
