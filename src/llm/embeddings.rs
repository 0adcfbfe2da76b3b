//! Embedding preparation: structured context is prefixed to the chunk
//! body before embedding so the vector carries file and symbol identity,
//! not just the raw code.

use std::fmt::Write;

use super::provider::LlmProvider;
use crate::error::ProviderError;
use crate::models::CodeChunk;

/// Maximum characters to send per text to the embedding API. Dense code
/// tokenises at up to ~2.3 tokens/char; 3 000 chars stays safely inside
/// the 8 192-token context of the common embedding models.
pub const MAX_EMBED_CHARS: usize = 3_000;

/// Build the text that represents a chunk in embedding space:
/// file path, symbol, language, and enclosing scope, then the code.
pub fn build_embedding_text(chunk: &CodeChunk) -> String {
    let mut text = String::with_capacity(chunk.content.len() + 128);

    writeln!(text, "File: {}", chunk.file_path).unwrap();
    if let Some(ref symbol) = chunk.symbol_name {
        writeln!(text, "{}: {}", chunk.chunk_type.as_str(), symbol).unwrap();
    }
    writeln!(text, "Language: {}", chunk.language).unwrap();
    if let Some(ref namespace) = chunk.metadata.namespace {
        writeln!(text, "Namespace: {namespace}").unwrap();
    }
    if let Some(ref parent) = chunk.metadata.parent_class {
        writeln!(text, "Class: {parent}").unwrap();
    }
    write!(text, "Code:\n{}", chunk.content).unwrap();

    truncate_to_char_boundary(&text, MAX_EMBED_CHARS).to_string()
}

/// Truncate `text` to at most `max_len` bytes on a UTF-8 char boundary.
fn truncate_to_char_boundary(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Embed a list of chunks in insertion order and assign the vectors back
/// positionally. Reordering is forbidden: result `i` belongs to chunk `i`.
pub async fn embed_chunks<P: LlmProvider>(
    provider: &P,
    chunks: &mut [CodeChunk],
) -> Result<(), ProviderError> {
    if chunks.is_empty() {
        return Ok(());
    }

    let texts: Vec<String> = chunks.iter().map(build_embedding_text).collect();
    let embeddings = provider.embed_batch(&texts).await?;

    if embeddings.len() != chunks.len() {
        return Err(ProviderError::Parse(format!(
            "embedding count mismatch: {} texts, {} vectors",
            chunks.len(),
            embeddings.len()
        )));
    }

    for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
        chunk.embedding = embedding;
    }
    Ok(())
}

/// Embed a retrieval query.
pub async fn embed_query<P: LlmProvider>(
    provider: &P,
    query: &str,
) -> Result<Vec<f32>, ProviderError> {
    let truncated = truncate_to_char_boundary(query, MAX_EMBED_CHARS);
    provider.embed(truncated).await
}
