//! Size-based fallback chunking for files where the semantic probes find
//! nothing, and for plain-text languages.
//!
//! Chunks grow line-by-line until the character budget is reached;
//! consecutive chunks overlap by a configured number of lines to preserve
//! local context across the boundary.

use super::{span_chunk, RawChunk};
use crate::models::ChunkType;

pub(crate) fn chunk_by_size(
    content: &str,
    max_chunk_size: usize,
    overlap_lines: usize,
) -> Vec<RawChunk> {
    if content.trim().is_empty() {
        return Vec::new();
    }

    let lines: Vec<&str> = content.lines().collect();
    let budget = max_chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize; // 0-based line index

    while start < lines.len() {
        let mut end = start;
        let mut chars = lines[start].len();
        while chars < budget && end + 1 < lines.len() {
            end += 1;
            chars += lines[end].len() + 1;
        }

        chunks.extend(span_chunk(
            &lines,
            start + 1,
            end + 1,
            ChunkType::Code,
            None,
            None,
        ));

        if end + 1 >= lines.len() {
            break;
        }
        // Overlap with the tail of this chunk, always making progress
        start = (end + 1).saturating_sub(overlap_lines).max(start + 1);
    }

    chunks
}
