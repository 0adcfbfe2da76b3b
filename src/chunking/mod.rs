//! Document chunker: walks a repository tree and turns each source file
//! into semantically typed code chunks, preferring class/method/function
//! cuts and falling back to fixed-size chunking.

pub mod brace;
pub mod fallback;
pub mod indent;

use chrono::Utc;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::ChunkingConfig;
use crate::models::{ChunkMetadata, ChunkType, CodeChunk};

/// A source file read from the repository tree.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub relative_path: String,
    pub content: String,
    pub language: &'static str,
}

/// Chunker output before it is lifted into a [`CodeChunk`].
#[derive(Debug, Clone)]
pub(crate) struct RawChunk {
    pub content: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub chunk_type: ChunkType,
    pub symbol_name: Option<String>,
    pub parent_class: Option<String>,
    pub namespace: Option<String>,
}

/// Files larger than this are skipped outright.
const MAX_FILE_BYTES: u64 = 1_048_576;

static IMPORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:using|import|use|from|#include)\b[^\n]*").unwrap()
});

static COMPLEXITY_PROBE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:if|else|for|while|switch|match|case|catch)\b").unwrap()
});

/// How a language's source is cut into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageFamily {
    /// C-family and TS/JS-family languages with braced bodies.
    Brace,
    /// Python-like languages where headers delimit blocks.
    Indent,
    /// Everything else: fixed-size chunking only.
    Plain,
}

/// Fixed extension → language table. Files with other extensions are not
/// considered for indexing.
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "cs" => Some("csharp"),
        "java" => Some("java"),
        "c" => Some("c"),
        "cpp" | "cc" | "h" | "hpp" => Some("cpp"),
        "go" => Some("go"),
        "rs" => Some("rust"),
        "js" => Some("javascript"),
        "jsx" => Some("jsx"),
        "ts" => Some("typescript"),
        "tsx" => Some("tsx"),
        "py" => Some("python"),
        "rb" => Some("ruby"),
        "php" => Some("php"),
        "swift" => Some("swift"),
        "kt" | "kts" => Some("kotlin"),
        "scala" => Some("scala"),
        "sh" | "bash" => Some("shell"),
        "sql" => Some("sql"),
        "html" => Some("html"),
        "css" | "scss" => Some("css"),
        "json" => Some("json"),
        "yaml" | "yml" => Some("yaml"),
        "toml" => Some("toml"),
        "xml" => Some("xml"),
        "md" => Some("markdown"),
        "txt" => Some("text"),
        _ => None,
    }
}

pub fn family_for_language(language: &str) -> LanguageFamily {
    match language {
        "csharp" | "java" | "c" | "cpp" | "go" | "rust" | "javascript" | "jsx" | "typescript"
        | "tsx" | "php" | "swift" | "kotlin" | "scala" => LanguageFamily::Brace,
        "python" => LanguageFamily::Indent,
        _ => LanguageFamily::Plain,
    }
}

fn is_excluded_dir(name: &str) -> bool {
    name.starts_with('.')
        || matches!(
            name,
            "node_modules"
                | "bin"
                | "obj"
                | "dist"
                | "build"
                | "target"
                | "__pycache__"
                | "venv"
                | "env"
                | "vendor"
                | "packages"
        )
}

fn is_excluded_file(name: &str) -> bool {
    let lower = name.to_lowercase();
    if lower.ends_with(".min.js") || lower.ends_with(".min.css") {
        return true;
    }
    matches!(
        lower.as_str(),
        "package-lock.json"
            | "yarn.lock"
            | "pnpm-lock.yaml"
            | "cargo.lock"
            | "composer.lock"
            | "gemfile.lock"
            | "poetry.lock"
            | ".gitignore"
            | ".gitattributes"
            | ".dockerignore"
            | ".npmignore"
            | ".editorconfig"
    )
}

/// Recursively collect the indexable source files under `root`.
/// Unreadable files are logged and skipped; other files proceed.
pub fn walk_repository(root: &Path) -> Vec<SourceFile> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0 || !is_excluded_dir(&e.file_name().to_string_lossy())
        })
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        if is_excluded_file(&file_name) {
            continue;
        }

        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let Some(language) = language_for_extension(&ext) else {
            continue;
        };

        if let Ok(meta) = std::fs::metadata(path) {
            if meta.len() > MAX_FILE_BYTES {
                tracing::warn!("skipping oversized file {}", path.display());
                continue;
            }
        }

        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        match std::fs::read_to_string(path) {
            Ok(content) => files.push(SourceFile {
                relative_path: relative,
                content,
                language,
            }),
            Err(e) => {
                tracing::warn!("skipping unreadable file {}: {e}", path.display());
            }
        }
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    files
}

/// Chunk one file's content according to its language family. Semantic
/// modes fall back to size-based chunking when they find nothing to cut.
pub(crate) fn chunk_source(
    content: &str,
    language: &str,
    config: &ChunkingConfig,
) -> Vec<RawChunk> {
    if content.trim().is_empty() {
        return Vec::new();
    }

    let semantic = match family_for_language(language) {
        LanguageFamily::Brace => brace::chunk_brace(content),
        LanguageFamily::Indent => indent::chunk_indent(content),
        LanguageFamily::Plain => None,
    };

    semantic.unwrap_or_else(|| {
        fallback::chunk_by_size(content, config.max_chunk_size, config.overlap_lines())
    })
}

/// Produce the chunks of a single file, with metadata attached and
/// ordered ascending by start line.
pub fn chunk_file(
    repository_id: &str,
    file: &SourceFile,
    config: &ChunkingConfig,
) -> Vec<CodeChunk> {
    let raw = chunk_source(&file.content, file.language, config);
    let file_name = file
        .relative_path
        .rsplit('/')
        .next()
        .unwrap_or(&file.relative_path)
        .to_string();
    let created_at = Utc::now();

    let mut chunks: Vec<CodeChunk> = raw
        .into_iter()
        .map(|r| {
            let imports: Vec<String> = IMPORT_LINE
                .find_iter(&r.content)
                .map(|m| m.as_str().trim().to_string())
                .collect();
            let branch_count = COMPLEXITY_PROBE.find_iter(&r.content).count() as u32;
            CodeChunk {
                id: Uuid::new_v4().to_string(),
                repository_id: repository_id.to_string(),
                file_path: file.relative_path.clone(),
                file_name: file_name.clone(),
                language: file.language.to_string(),
                content: r.content,
                start_line: r.start_line,
                end_line: r.end_line,
                chunk_type: r.chunk_type,
                symbol_name: r.symbol_name,
                embedding: Vec::new(),
                metadata: ChunkMetadata {
                    parent_class: r.parent_class,
                    namespace: r.namespace,
                    imports,
                    references: Vec::new(),
                    complexity: (branch_count > 0).then_some(branch_count),
                },
                created_at,
            }
        })
        .collect();

    chunks.sort_by_key(|c| c.start_line);
    chunks
}

/// Build a chunk content from a line span, trimming trailing blank lines
/// so the emitted content holds exactly `end − start + 1` lines.
pub(crate) fn span_chunk(
    lines: &[&str],
    start_line: usize,
    end_line: usize,
    chunk_type: ChunkType,
    symbol_name: Option<String>,
    parent_class: Option<String>,
) -> Option<RawChunk> {
    let mut end = end_line.min(lines.len());
    let start = start_line.max(1);
    while end > start && lines[end - 1].trim().is_empty() {
        end -= 1;
    }
    if end < start || lines[start - 1..end].iter().all(|l| l.trim().is_empty()) {
        return None;
    }

    Some(RawChunk {
        content: lines[start - 1..end].join("\n"),
        start_line: start,
        end_line: end,
        chunk_type,
        symbol_name,
        parent_class,
        namespace: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config() -> ChunkingConfig {
        ChunkingConfig::default()
    }

    #[test]
    fn test_language_table() {
        assert_eq!(language_for_extension("cs"), Some("csharp"));
        assert_eq!(language_for_extension("rs"), Some("rust"));
        assert_eq!(language_for_extension("py"), Some("python"));
        assert_eq!(language_for_extension("exe"), None);
        assert_eq!(language_for_extension("png"), None);
    }

    #[test]
    fn test_family_dispatch() {
        assert_eq!(family_for_language("csharp"), LanguageFamily::Brace);
        assert_eq!(family_for_language("typescript"), LanguageFamily::Brace);
        assert_eq!(family_for_language("python"), LanguageFamily::Indent);
        assert_eq!(family_for_language("markdown"), LanguageFamily::Plain);
    }

    #[test]
    fn test_excluded_dirs_and_files() {
        assert!(is_excluded_dir("node_modules"));
        assert!(is_excluded_dir("obj"));
        assert!(is_excluded_dir(".git"));
        assert!(!is_excluded_dir("src"));

        assert!(is_excluded_file("package-lock.json"));
        assert!(is_excluded_file("bundle.min.js"));
        assert!(is_excluded_file(".gitignore"));
        assert!(!is_excluded_file("main.rs"));
    }

    #[test]
    fn test_chunk_source_empty() {
        assert!(chunk_source("", "rust", &config()).is_empty());
        assert!(chunk_source("  \n  ", "rust", &config()).is_empty());
    }

    #[test]
    fn test_chunk_file_line_count_invariant() {
        let file = SourceFile {
            relative_path: "src/svc.cs".into(),
            content: "namespace App {\n    public class Svc {\n        public int Run() {\n            return 1;\n        }\n    }\n}\n"
                .into(),
            language: "csharp",
        };
        let chunks = chunk_file("r1", &file, &config());
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.start_line >= 1);
            assert!(c.end_line >= c.start_line);
            assert_eq!(c.content.lines().count(), c.end_line - c.start_line + 1);
        }
    }

    #[test]
    fn test_chunk_file_orders_by_start_line() {
        let file = SourceFile {
            relative_path: "lib.rs".into(),
            content: "fn a() {\n    1;\n}\n\nfn b() {\n    2;\n}\n".into(),
            language: "rust",
        };
        let chunks = chunk_file("r1", &file, &config());
        let starts: Vec<usize> = chunks.iter().map(|c| c.start_line).collect();
        let mut sorted = starts.clone();
        sorted.sort_unstable();
        assert_eq!(starts, sorted);
    }

    #[test]
    fn test_chunk_file_deterministic() {
        let file = SourceFile {
            relative_path: "a.py".into(),
            content: "class A:\n    pass\n\ndef run():\n    return 1\n".into(),
            language: "python",
        };
        let first = chunk_file("r1", &file, &config());
        let second = chunk_file("r1", &file, &config());
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.content, b.content);
            assert_eq!(a.start_line, b.start_line);
            assert_eq!(a.symbol_name, b.symbol_name);
        }
    }

    #[test]
    fn test_walk_skips_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "// dep").unwrap();
        fs::write(root.join(".git/config"), "[core]").unwrap();
        fs::write(root.join("yarn.lock"), "lock").unwrap();
        fs::write(root.join("photo.png"), "binary").unwrap();

        let files = walk_repository(&root);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "src/main.rs");
        assert_eq!(files[0].language, "rust");
    }

    #[test]
    fn test_walk_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let files = walk_repository(&dir.path().join("nope"));
        assert!(files.is_empty());
    }

    #[test]
    fn test_imports_collected_into_metadata() {
        let file = SourceFile {
            relative_path: "loader.py".into(),
            content: "def load():\n    import json\n    return json.loads('{}')\n".into(),
            language: "python",
        };
        let chunks = chunk_file("r1", &file, &config());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.imports, vec!["import json".to_string()]);
    }

    #[test]
    fn test_complexity_counts_branches() {
        let file = SourceFile {
            relative_path: "branchy.rs".into(),
            content: "fn decide(x: i32) -> i32 {\n    if x > 0 {\n        1\n    } else {\n        0\n    }\n}\n".into(),
            language: "rust",
        };
        let chunks = chunk_file("r1", &file, &config());
        assert_eq!(chunks[0].metadata.complexity, Some(2));

        let plain = SourceFile {
            relative_path: "plain.txt".into(),
            content: "just prose\n".into(),
            language: "text",
        };
        let chunks = chunk_file("r1", &plain, &config());
        assert_eq!(chunks[0].metadata.complexity, None);
    }
}
