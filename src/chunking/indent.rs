//! Semantic chunking for indentation-delimited languages (Python-like).
//!
//! `class X` / `def X` headers delimit the chunks: each chunk spans from
//! one header to the line before the next header, or to end of file.

use regex::Regex;
use std::sync::LazyLock;

use super::{span_chunk, RawChunk};
use crate::models::ChunkType;

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:(class)\s+([A-Za-z_]\w*)|(?:async[ \t]+)?(def)\s+([A-Za-z_]\w*))")
        .unwrap()
});

struct Header {
    line: usize,
    chunk_type: ChunkType,
    name: String,
}

/// Chunk Python-like source at class/def headers. Returns `None` when no
/// header exists, handing the file to the size fallback.
pub(crate) fn chunk_indent(content: &str) -> Option<Vec<RawChunk>> {
    let lines: Vec<&str> = content.lines().collect();

    let headers: Vec<Header> = HEADER_RE
        .captures_iter(content)
        .map(|caps| {
            let start = caps.get(0).unwrap().start();
            let line = content.as_bytes()[..start]
                .iter()
                .filter(|&&b| b == b'\n')
                .count()
                + 1;
            if caps.get(1).is_some() {
                Header {
                    line,
                    chunk_type: ChunkType::Class,
                    name: caps[2].to_string(),
                }
            } else {
                Header {
                    line,
                    chunk_type: ChunkType::Function,
                    name: caps[4].to_string(),
                }
            }
        })
        .collect();

    if headers.is_empty() {
        return None;
    }

    let mut chunks = Vec::new();
    for (i, header) in headers.iter().enumerate() {
        let end_line = headers
            .get(i + 1)
            .map(|next| next.line - 1)
            .unwrap_or(lines.len());
        chunks.extend(span_chunk(
            &lines,
            header.line,
            end_line,
            header.chunk_type,
            Some(header.name.clone()),
            None,
        ));
    }

    if chunks.is_empty() {
        return None;
    }
    Some(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_functions_split_at_headers() {
        let source = "def first():\n    return 1\n\ndef second():\n    return 2\n";
        let chunks = chunk_indent(source).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].symbol_name.as_deref(), Some("first"));
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 2);
        assert_eq!(chunks[1].symbol_name.as_deref(), Some("second"));
        assert_eq!(chunks[1].start_line, 4);
    }

    #[test]
    fn test_class_then_methods() {
        let source =
            "class Service:\n    def run(self):\n        return 1\n\n    def stop(self):\n        return 0\n";
        let chunks = chunk_indent(source).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chunk_type, ChunkType::Class);
        assert_eq!(chunks[0].symbol_name.as_deref(), Some("Service"));
        // Class chunk spans only up to the first method header
        assert_eq!(chunks[0].end_line, 1);
        assert_eq!(chunks[1].chunk_type, ChunkType::Function);
        assert_eq!(chunks[2].symbol_name.as_deref(), Some("stop"));
    }

    #[test]
    fn test_async_def() {
        let source = "async def fetch():\n    return await get()\n";
        let chunks = chunk_indent(source).unwrap();
        assert_eq!(chunks[0].symbol_name.as_deref(), Some("fetch"));
        assert_eq!(chunks[0].chunk_type, ChunkType::Function);
    }

    #[test]
    fn test_last_chunk_runs_to_eof() {
        let source = "def only():\n    a = 1\n    b = 2\n    return a + b\n";
        let chunks = chunk_indent(source).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].end_line, 4);
    }

    #[test]
    fn test_trailing_blank_lines_trimmed() {
        let source = "def padded():\n    return 1\n\n\n\ndef next_one():\n    return 2\n";
        let chunks = chunk_indent(source).unwrap();
        assert_eq!(chunks[0].end_line, 2);
        assert_eq!(
            chunks[0].content.lines().count(),
            chunks[0].end_line - chunks[0].start_line + 1
        );
    }

    #[test]
    fn test_no_headers_returns_none() {
        assert!(chunk_indent("x = 1\nprint(x)\n").is_none());
    }

    #[test]
    fn test_classdef_like_words_do_not_match() {
        assert!(chunk_indent("classification = 1\ndefine = 2\n").is_none());
    }
}
