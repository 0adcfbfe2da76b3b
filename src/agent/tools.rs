//! Agent tool catalogue: code search, file read, reference lookup, and
//! code explanation.
//!
//! Tools are a fixed set of tagged variants looked up by name. Every
//! failure is returned as a string starting with `Error:`; nothing
//! throws across the tool boundary. Results are formatted so the
//! citation service can re-extract `[path:line-line]` markers.

use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;

use crate::llm::provider::{LlmProvider, ToolDefinition};
use crate::models::{ChatMessage, ChunkType, Role};
use crate::search::{hybrid_search, SearchFilter};
use crate::store::Store;

/// Search hits returned per code_search call.
const MAX_SEARCH_RESULTS: usize = 5;
/// Hits listed per reference group before the overflow count.
const MAX_GROUP_HITS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentTool {
    CodeSearch,
    ReadFile,
    FindReferences,
    ExplainCode,
}

impl AgentTool {
    pub const ALL: [AgentTool; 4] = [
        AgentTool::CodeSearch,
        AgentTool::ReadFile,
        AgentTool::FindReferences,
        AgentTool::ExplainCode,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AgentTool::CodeSearch => "code_search",
            AgentTool::ReadFile => "read_file",
            AgentTool::FindReferences => "find_references",
            AgentTool::ExplainCode => "explain_code",
        }
    }

    pub fn by_name(name: &str) -> Option<AgentTool> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            AgentTool::CodeSearch => {
                "Search the repository for code relevant to a natural-language query. \
                 Optionally filter by language or chunk type."
            }
            AgentTool::ReadFile => {
                "Read a file from the repository by path, optionally windowed to a \
                 line range. Partial paths are matched by substring."
            }
            AgentTool::FindReferences => {
                "Find definitions, calls, and usages of a symbol across the repository."
            }
            AgentTool::ExplainCode => {
                "Explain a code snippet at the requested level of detail."
            }
        }
    }

    pub fn parameters(&self) -> serde_json::Value {
        match self {
            AgentTool::CodeSearch => serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "What to search for" },
                    "language": { "type": "string", "description": "Restrict to one language" },
                    "chunk_type": {
                        "type": "string",
                        "enum": ["code", "class", "method", "function", "comment"]
                    }
                },
                "required": ["query"]
            }),
            AgentTool::ReadFile => serde_json::json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string", "description": "Path of the file to read" },
                    "start_line": { "type": "integer", "minimum": 1 },
                    "end_line": { "type": "integer", "minimum": 1 }
                },
                "required": ["file_path"]
            }),
            AgentTool::FindReferences => serde_json::json!({
                "type": "object",
                "properties": {
                    "symbol": { "type": "string", "description": "Symbol name to look up" },
                    "kind": {
                        "type": "string",
                        "enum": ["function", "class", "variable", "any"]
                    }
                },
                "required": ["symbol"]
            }),
            AgentTool::ExplainCode => serde_json::json!({
                "type": "object",
                "properties": {
                    "code": { "type": "string", "description": "The snippet to explain" },
                    "detail_level": {
                        "type": "string",
                        "enum": ["brief", "detailed", "comprehensive"]
                    }
                },
                "required": ["code"]
            }),
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }

    pub fn catalogue() -> Vec<ToolDefinition> {
        Self::ALL.iter().map(AgentTool::definition).collect()
    }

    /// Execute the tool against a repository. Malformed arguments and
    /// execution failures come back as `Error:` strings.
    pub async fn execute<P: LlmProvider>(
        &self,
        store: &Store,
        provider: &P,
        repository_id: &str,
        arguments_json: &str,
    ) -> String {
        match self {
            AgentTool::CodeSearch => {
                code_search(store, provider, repository_id, arguments_json).await
            }
            AgentTool::ReadFile => read_file(store, repository_id, arguments_json),
            AgentTool::FindReferences => find_references(store, repository_id, arguments_json),
            AgentTool::ExplainCode => explain_code(provider, arguments_json).await,
        }
    }
}

// ─── code_search ─────────────────────────────────────────

#[derive(Deserialize)]
struct CodeSearchArgs {
    query: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    chunk_type: Option<String>,
}

async fn code_search<P: LlmProvider>(
    store: &Store,
    provider: &P,
    repository_id: &str,
    arguments_json: &str,
) -> String {
    let args: CodeSearchArgs = match serde_json::from_str(arguments_json) {
        Ok(args) => args,
        Err(e) => return format!("Error: invalid arguments for code_search: {e}"),
    };
    if args.query.trim().is_empty() {
        return "Error: code_search requires a non-empty query".to_string();
    }

    let chunk_type = match args.chunk_type.as_deref() {
        None => None,
        Some(raw) => match ChunkType::parse(raw) {
            Some(ct) => Some(ct),
            None => return format!("Error: unknown chunk_type '{raw}'"),
        },
    };
    let filter = SearchFilter {
        language: args.language,
        chunk_type,
        ..Default::default()
    };
    let filter = (!filter.is_empty()).then_some(filter);

    let hits = match hybrid_search(
        store,
        provider,
        repository_id,
        &args.query,
        filter.as_ref(),
        MAX_SEARCH_RESULTS,
    )
    .await
    {
        Ok(hits) => hits,
        Err(e) => return format!("Error: code search failed: {e}"),
    };

    if hits.is_empty() {
        return format!("No matching code found for '{}'.", args.query.trim());
    }

    let mut out = String::new();
    for hit in &hits {
        let annotation = match &hit.chunk.symbol_name {
            Some(symbol) => format!("{}: {symbol}", hit.chunk.chunk_type.as_str()),
            None => hit.chunk.chunk_type.as_str().to_string(),
        };
        writeln!(
            out,
            "--- [{}:{}-{}] ({annotation}) [Score: {:.2}] ---",
            hit.chunk.file_path, hit.chunk.start_line, hit.chunk.end_line, hit.score
        )
        .unwrap();
        writeln!(out, "```{}\n{}\n```", hit.chunk.language, hit.chunk.content).unwrap();
    }
    out
}

// ─── read_file ───────────────────────────────────────────

#[derive(Deserialize)]
struct ReadFileArgs {
    file_path: String,
    #[serde(default)]
    start_line: Option<usize>,
    #[serde(default)]
    end_line: Option<usize>,
}

fn read_file(store: &Store, repository_id: &str, arguments_json: &str) -> String {
    let args: ReadFileArgs = match serde_json::from_str(arguments_json) {
        Ok(args) => args,
        Err(e) => return format!("Error: invalid arguments for read_file: {e}"),
    };
    let wanted = args.file_path.trim();
    if wanted.is_empty() {
        return "Error: read_file requires a file_path".to_string();
    }

    let chunks = store.chunks_for_repository(repository_id);
    let mut paths: Vec<&str> = chunks.iter().map(|c| c.file_path.as_str()).collect();
    paths.sort_unstable();
    paths.dedup();

    // Case-insensitive exact match first, substring fallback second
    let exact: Vec<&str> = paths
        .iter()
        .copied()
        .filter(|p| p.eq_ignore_ascii_case(wanted))
        .collect();
    let candidates = if exact.is_empty() {
        let needle = wanted.to_lowercase();
        paths
            .iter()
            .copied()
            .filter(|p| p.to_lowercase().contains(&needle))
            .collect()
    } else {
        exact
    };

    let path = match candidates.as_slice() {
        [] => return format!("Error: no file matching '{wanted}' in this repository"),
        [single] => *single,
        many => {
            let mut out = format!("Multiple files match '{wanted}':\n");
            for p in many {
                writeln!(out, "- {p}").unwrap();
            }
            return out;
        }
    };

    // Reconstruct the file from its chunks; fallback chunks may overlap,
    // so lines are keyed by absolute number.
    let mut lines: BTreeMap<usize, String> = BTreeMap::new();
    for chunk in chunks.iter().filter(|c| c.file_path == path) {
        for (offset, line) in chunk.content.lines().enumerate() {
            lines.insert(chunk.start_line + offset, line.to_string());
        }
    }
    let Some(&total_lines) = lines.keys().max() else {
        return format!("Error: no content stored for '{path}'");
    };

    let start = args.start_line.unwrap_or(1).clamp(1, total_lines);
    let end = args.end_line.unwrap_or(total_lines).clamp(start, total_lines);

    let file_name = path.rsplit('/').next().unwrap_or(path);
    let width = end.to_string().len();
    let mut out = format!("--- [{path}:{start}-{end}] (file: {file_name}) [Score: 1.00] ---\n```\n");
    for n in start..=end {
        let text = lines.get(&n).map(String::as_str).unwrap_or("");
        writeln!(out, "{n:>width$} | {text}").unwrap();
    }
    out.push_str("```\n");
    out
}

// ─── find_references ─────────────────────────────────────

#[derive(Deserialize)]
struct FindReferencesArgs {
    symbol: String,
    #[serde(default)]
    kind: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReferenceGroup {
    Definition,
    Call,
    Usage,
}

impl ReferenceGroup {
    fn label(&self) -> &'static str {
        match self {
            ReferenceGroup::Definition => "definition",
            ReferenceGroup::Call => "call",
            ReferenceGroup::Usage => "usage",
        }
    }
}

struct ReferenceProbes {
    type_def: Regex,
    func_def: Regex,
    member_def: Regex,
    var_decl: Regex,
    call: Regex,
    usage: Regex,
}

impl ReferenceProbes {
    fn new(symbol: &str) -> Self {
        let sym = regex::escape(symbol);
        Self {
            type_def: Regex::new(&format!(
                r"\b(?:class|struct|interface|enum|trait)\s+{sym}\b"
            ))
            .unwrap(),
            func_def: Regex::new(&format!(r"\b(?:function|def|fn|func)\s+{sym}\b")).unwrap(),
            member_def: Regex::new(&format!(
                r"\b(?:public|private|protected|internal)\b[^=;(){{}}]*\b{sym}\s*\("
            ))
            .unwrap(),
            var_decl: Regex::new(&format!(r"\b(?:const|let|var|val)\s+{sym}\b")).unwrap(),
            call: Regex::new(&format!(r"\b{sym}\s*\(")).unwrap(),
            usage: Regex::new(&format!(r"\b{sym}\b")).unwrap(),
        }
    }

    fn is_definition(&self, line: &str, kind: &str) -> bool {
        match kind {
            "class" => self.type_def.is_match(line),
            "function" => self.func_def.is_match(line) || self.member_def.is_match(line),
            "variable" => self.var_decl.is_match(line),
            _ => {
                self.type_def.is_match(line)
                    || self.func_def.is_match(line)
                    || self.member_def.is_match(line)
                    || self.var_decl.is_match(line)
            }
        }
    }

    fn classify(&self, line: &str, kind: &str) -> Option<ReferenceGroup> {
        if !self.usage.is_match(line) {
            return None;
        }
        if self.is_definition(line, kind) {
            return Some(ReferenceGroup::Definition);
        }
        if self.call.is_match(line) {
            return Some(ReferenceGroup::Call);
        }
        Some(ReferenceGroup::Usage)
    }
}

fn find_references(store: &Store, repository_id: &str, arguments_json: &str) -> String {
    let args: FindReferencesArgs = match serde_json::from_str(arguments_json) {
        Ok(args) => args,
        Err(e) => return format!("Error: invalid arguments for find_references: {e}"),
    };
    let symbol = args.symbol.trim();
    if symbol.is_empty() {
        return "Error: find_references requires a symbol".to_string();
    }
    let kind = args.kind.as_deref().unwrap_or("any").to_lowercase();
    if !matches!(kind.as_str(), "function" | "class" | "variable" | "any") {
        return format!("Error: unknown reference kind '{kind}'");
    }

    let probes = ReferenceProbes::new(symbol);
    let mut groups: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
    let mut seen: HashSet<(String, usize)> = HashSet::new();

    for chunk in store.chunks_for_repository(repository_id) {
        for (offset, line) in chunk.content.lines().enumerate() {
            let Some(group) = probes.classify(line, &kind) else {
                continue;
            };
            let absolute_line = chunk.start_line + offset;
            if !seen.insert((chunk.file_path.clone(), absolute_line)) {
                continue;
            }
            groups
                .entry(group.label())
                .or_default()
                .push(format!("[{}:{absolute_line}] {}", chunk.file_path, line.trim()));
        }
    }

    if groups.is_empty() {
        return format!("No references to '{symbol}' found.");
    }

    let mut out = String::new();
    for group in [
        ReferenceGroup::Definition,
        ReferenceGroup::Call,
        ReferenceGroup::Usage,
    ] {
        let Some(hits) = groups.get(group.label()) else {
            continue;
        };
        writeln!(out, "References to '{symbol}' ({}):", group.label()).unwrap();
        for hit in hits.iter().take(MAX_GROUP_HITS) {
            writeln!(out, "{hit}").unwrap();
        }
        if hits.len() > MAX_GROUP_HITS {
            writeln!(out, "... and {} more", hits.len() - MAX_GROUP_HITS).unwrap();
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

// ─── explain_code ────────────────────────────────────────

#[derive(Deserialize)]
struct ExplainCodeArgs {
    code: String,
    #[serde(default)]
    detail_level: Option<String>,
}

async fn explain_code<P: LlmProvider>(provider: &P, arguments_json: &str) -> String {
    let args: ExplainCodeArgs = match serde_json::from_str(arguments_json) {
        Ok(args) => args,
        Err(e) => return format!("Error: invalid arguments for explain_code: {e}"),
    };
    if args.code.trim().is_empty() {
        return "Error: explain_code requires a code snippet".to_string();
    }

    let detail = match args.detail_level.as_deref().unwrap_or("detailed") {
        "brief" => "Give a one-paragraph summary of what this code does.",
        "comprehensive" => {
            "Explain this code exhaustively: purpose, control flow, data structures, \
             edge cases, and pitfalls."
        }
        _ => "Explain what this code does and how, in a few paragraphs.",
    };

    let messages = vec![
        ChatMessage::new(Role::System, detail),
        ChatMessage::new(Role::User, format!("```\n{}\n```", args.code)),
    ];

    match provider.chat(&messages, &[]).await {
        Ok(outcome) => outcome
            .content
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| "Error: the model returned no explanation".to_string()),
        Err(e) => format!("Error: explain_code failed: {e}"),
    }
}
