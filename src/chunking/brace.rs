//! Semantic chunking for brace-delimited languages.
//!
//! Regular-expression probes locate top-level type and function
//! declarations; each declaration's body is extracted by scanning for the
//! matching `}` with a depth counter that ignores braces inside string
//! literals and comments. Every type declaration yields a class chunk;
//! classes containing member declarations additionally emit one method
//! chunk per member, carrying the parent class in their metadata.
//!
//! This is a deliberate approximation of a real parser. Files where the
//! probes find nothing fall back to size-based chunking.

use regex::Regex;
use std::sync::LazyLock;

use super::{span_chunk, RawChunk};
use crate::models::ChunkType;

static NAMESPACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:namespace|package)\s+([A-Za-z_][\w.]*)").unwrap()
});

static TYPE_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:(?:public|private|protected|internal|export|default|abstract|sealed|static|partial|final|open|data|pub(?:\([^)]*\))?)\s+)*(class|interface|struct|enum|trait)\s+([A-Za-z_]\w*)",
    )
    .unwrap()
});

static FUNC_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:(?:public|private|protected|internal|export|default|static|async|unsafe|const|pub(?:\([^)]*\))?)\s+)*(?:function|fn|func)\s+(?:\([^)]*\)\s+)?([A-Za-z_]\w*)",
    )
    .unwrap()
});

static MEMBER_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:public|private|protected|internal)\s+(?:(?:static|async|virtual|override|sealed|readonly|abstract|final|unsafe|extern|new|partial)\s+)*[A-Za-z_][\w<>\[\],\. ?]*?\s+([A-Za-z_]\w*)\s*\(",
    )
    .unwrap()
});

/// Chunk brace-language source. Returns `None` when no declaration probe
/// matches, handing the file to the size fallback.
pub(crate) fn chunk_brace(content: &str) -> Option<Vec<RawChunk>> {
    let lines: Vec<&str> = content.lines().collect();
    let namespace = NAMESPACE_RE
        .captures(content)
        .map(|caps| caps[1].to_string());

    let mut chunks: Vec<RawChunk> = Vec::new();
    // Byte spans of type bodies, to keep their members out of the
    // top-level function pass.
    let mut type_spans: Vec<(usize, usize)> = Vec::new();

    for caps in TYPE_DECL_RE.captures_iter(content) {
        let decl = caps.get(0).unwrap();
        let keyword = caps.get(1).unwrap().as_str();
        let type_name = caps[2].to_string();

        // Skip declarations nested inside an already-captured type body
        if type_spans
            .iter()
            .any(|&(s, e)| decl.start() > s && decl.start() < e)
        {
            continue;
        }

        let Some(open) = find_body_open(content, decl.end()) else {
            continue;
        };
        let Some(close) = matching_close(content, open) else {
            continue;
        };
        type_spans.push((decl.start(), close));

        let members = if keyword == "enum" {
            Vec::new()
        } else {
            find_members(content, open + 1, close)
        };

        // The type itself is always a chunk; members add one chunk each
        // so symbol-level retrieval can land on a single method.
        chunks.extend(span_chunk(
            &lines,
            line_of(content, decl.start()),
            line_of(content, close),
            ChunkType::Class,
            Some(type_name.clone()),
            None,
        ));
        for member in members {
            chunks.extend(span_chunk(
                &lines,
                line_of(content, member.start),
                line_of(content, member.end),
                ChunkType::Method,
                Some(member.name),
                Some(type_name.clone()),
            ));
        }
    }

    // Top-level functions outside any captured type body
    for caps in FUNC_DECL_RE.captures_iter(content) {
        let decl = caps.get(0).unwrap();
        if type_spans
            .iter()
            .any(|&(s, e)| decl.start() >= s && decl.start() <= e)
        {
            continue;
        }
        let name = caps[1].to_string();
        let Some(open) = find_body_open(content, decl.end()) else {
            continue;
        };
        let Some(close) = matching_close(content, open) else {
            continue;
        };
        chunks.extend(span_chunk(
            &lines,
            line_of(content, decl.start()),
            line_of(content, close),
            ChunkType::Function,
            Some(name),
            None,
        ));
    }

    if chunks.is_empty() {
        return None;
    }

    chunks.sort_by_key(|c| (c.start_line, c.end_line));
    chunks.dedup_by(|a, b| a.start_line == b.start_line && a.end_line == b.end_line);
    for chunk in &mut chunks {
        chunk.namespace = namespace.clone();
    }
    Some(chunks)
}

struct MemberSpan {
    start: usize,
    end: usize,
    name: String,
}

/// Visibility-prefixed member declarations within a type body, each with
/// its braced body (or the terminating `;` for bodiless declarations).
fn find_members(content: &str, body_start: usize, body_end: usize) -> Vec<MemberSpan> {
    let body = &content[body_start..body_end];
    let mut members = Vec::new();

    for caps in MEMBER_DECL_RE.captures_iter(body) {
        let decl = caps.get(0).unwrap();
        let abs_start = body_start + decl.start();
        let abs_after = body_start + decl.end();

        let end = match find_body_open(content, abs_after) {
            Some(open) if open < body_end => match matching_close(content, open) {
                Some(close) if close <= body_end => close,
                _ => continue,
            },
            // Bodiless member (interface method, abstract signature)
            _ => match content[abs_after..body_end].find(';') {
                Some(semi) => abs_after + semi,
                None => continue,
            },
        };

        members.push(MemberSpan {
            start: abs_start,
            end,
            name: caps[1].to_string(),
        });
    }

    members
}

/// Find the `{` opening a declaration body, scanning forward from `from`.
/// Aborts at a `;` (bodiless declaration) or another declaration line.
fn find_body_open(content: &str, from: usize) -> Option<usize> {
    for (offset, ch) in content[from..].char_indices() {
        match ch {
            '{' => return Some(from + offset),
            ';' => return None,
            _ => {}
        }
    }
    None
}

/// Index of the `}` matching the `{` at `open`. Braces inside string and
/// char literals, line comments, and block comments are ignored.
fn matching_close(content: &str, open: usize) -> Option<usize> {
    let bytes = content.as_bytes();
    let mut depth = 0usize;
    let mut i = open;
    let mut string_delim: Option<u8> = None;
    let mut escaped = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;

    while i < bytes.len() {
        let b = bytes[i];

        if in_line_comment {
            if b == b'\n' {
                in_line_comment = false;
            }
        } else if in_block_comment {
            if b == b'*' && bytes.get(i + 1) == Some(&b'/') {
                in_block_comment = false;
                i += 1;
            }
        } else if let Some(delim) = string_delim {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == delim {
                string_delim = None;
            }
        } else {
            match b {
                b'"' | b'\'' | b'`' => string_delim = Some(b),
                b'/' if bytes.get(i + 1) == Some(&b'/') => in_line_comment = true,
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    in_block_comment = true;
                    i += 1;
                }
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }

    None
}

/// 1-based line number of a byte offset.
fn line_of(content: &str, byte_idx: usize) -> usize {
    content.as_bytes()[..byte_idx]
        .iter()
        .filter(|&&b| b == b'\n')
        .count()
        + 1
}
