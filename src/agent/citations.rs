//! Citation grounding: extract file-range references from tool results
//! and assistant content, deduplicate them, and renumber the answer's
//! inline references to `[N]` markers.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use uuid::Uuid;

use crate::models::{Citation, CitationSource};

/// Header-block pattern emitted by the code_search and read_file tools:
/// `--- [path:start-end] (kind: symbol) [Score: s] ---` followed by a
/// fenced code block.
static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)---\s*\[([^\[\]:\n]+):(\d+)-(\d+)\]\s*\(([^)\n]*)\)\s*\[Score:\s*([0-9.]+)\]\s*---\s*\n```[^\n]*\n(.*?)```",
    )
    .unwrap()
});

/// Inline `[path:line]` / `[path:start-end]` reference in assistant text.
static INLINE_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([A-Za-z_][\w./\\-]*):(\d+)(?:-(\d+))?\]").unwrap());

/// Assistant content with its citations resolved and renumbered.
#[derive(Debug, Clone)]
pub struct GroundedContent {
    pub content: String,
    pub citations: Vec<Citation>,
    /// `path:start-end` → 1-based citation index.
    pub citation_map: HashMap<String, usize>,
}

fn citation_key(file_path: &str, start_line: usize, end_line: usize) -> String {
    format!("{file_path}:{start_line}-{end_line}")
}

/// Extract header-block citations from tool result strings, sorted by
/// relevance score descending. The parenthetical classifies the source:
/// `file: …` blocks come from read_file, everything else from code_search.
pub fn extract_tool_citations(tool_results: &[String]) -> Vec<Citation> {
    let mut citations = Vec::new();

    for result in tool_results {
        for caps in BLOCK_RE.captures_iter(result) {
            let (Ok(start_line), Ok(end_line)) = (caps[2].parse(), caps[3].parse()) else {
                continue;
            };
            let annotation = caps[4].trim();
            let source_type = if annotation.starts_with("file") {
                CitationSource::FileRead
            } else {
                CitationSource::CodeSearch
            };
            let symbol_name = annotation
                .split_once(':')
                .map(|(_, sym)| sym.trim().to_string())
                .filter(|s| !s.is_empty());
            let relevance_score: f32 = caps[5].parse().unwrap_or(0.0);

            citations.push(Citation {
                id: Uuid::new_v4().to_string(),
                file_path: caps[1].to_string(),
                start_line,
                end_line,
                content: caps[6].trim_end().to_string(),
                symbol_name,
                relevance_score: relevance_score.clamp(0.0, 1.0),
                source_type,
            });
        }
    }

    citations.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    citations
}

/// Extract bare `[path:line]` references from assistant content.
fn extract_content_citations(content: &str) -> Vec<Citation> {
    INLINE_REF_RE
        .captures_iter(content)
        .filter_map(|caps| {
            let start_line: usize = caps[2].parse().ok()?;
            let end_line: usize = caps
                .get(3)
                .map(|m| m.as_str().parse().ok())
                .unwrap_or(Some(start_line))?;
            Some(Citation {
                id: Uuid::new_v4().to_string(),
                file_path: caps[1].to_string(),
                start_line,
                end_line,
                content: String::new(),
                symbol_name: None,
                relevance_score: 1.0,
                source_type: CitationSource::Reference,
            })
        })
        .collect()
}

/// Ground assistant content against the accumulated tool results:
/// tool-result citations first (score-descending), then content
/// references, deduplicated by `(path, start, end)` keeping the first
/// occurrence, renumbered 1-based. Inline references whose target is in
/// the citation set are rewritten to `[N]`; others are left intact.
pub fn ground(content: &str, tool_results: &[String]) -> GroundedContent {
    let mut citations = extract_tool_citations(tool_results);
    citations.extend(extract_content_citations(content));

    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut deduped: Vec<Citation> = Vec::new();
    for citation in citations {
        let key = citation_key(&citation.file_path, citation.start_line, citation.end_line);
        if seen.contains_key(&key) {
            continue;
        }
        seen.insert(key, deduped.len() + 1);
        deduped.push(citation);
    }

    let rewritten = INLINE_REF_RE.replace_all(content, |caps: &regex::Captures| {
        let start: usize = caps[2].parse().unwrap_or(0);
        let end: usize = caps
            .get(3)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(start);
        let key = citation_key(&caps[1], start, end);
        match seen.get(&key) {
            Some(n) => format!("[{n}]"),
            None => caps[0].to_string(),
        }
    });

    GroundedContent {
        content: rewritten.into_owned(),
        citations: deduped,
        citation_map: seen,
    }
}
