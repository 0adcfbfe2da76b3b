//! Normalization of non-native tool calling.
//!
//! Some providers emit tool calls as a JSON object embedded in the
//! assistant text instead of a structured field. The adapter scans the
//! content for the first balanced JSON object, matches it against the
//! tool catalogue, and returns a synthetic [`ToolCall`] so downstream
//! code only ever sees the structured representation.

use uuid::Uuid;

use super::provider::{ToolCall, ToolDefinition};

/// Try to interpret assistant content as an inline tool call against the
/// given catalogue. Returns `None` when the content carries no parseable,
/// matching call; the caller then passes the content through unchanged.
pub fn extract_inline_tool_call(content: &str, tools: &[ToolDefinition]) -> Option<ToolCall> {
    if tools.is_empty() {
        return None;
    }

    let candidate = first_balanced_object(content)?;
    let value: serde_json::Value = serde_json::from_str(candidate).ok()?;
    let object = value.as_object()?;

    let name = object
        .get("name")
        .or_else(|| object.get("tool"))
        .or_else(|| object.get("function"))?
        .as_str()?;

    let tool = tools
        .iter()
        .find(|t| canonical_name(&t.name) == canonical_name(name))?;

    let arguments = match object
        .get("arguments")
        .or_else(|| object.get("parameters"))
        .or_else(|| object.get("input"))
    {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => "{}".to_string(),
    };

    Some(ToolCall {
        id: format!("call-{}", Uuid::new_v4()),
        function_name: tool.name.clone(),
        arguments,
    })
}

/// Find the first balanced `{…}` span in `content` that parses as JSON.
/// Braces inside string literals are ignored while scanning.
fn first_balanced_object(content: &str) -> Option<&str> {
    let bytes = content.as_bytes();
    let mut search_from = 0usize;

    while let Some(rel) = content[search_from..].find('{') {
        let open = search_from + rel;
        if let Some(close) = balanced_close(bytes, open) {
            let candidate = &content[open..=close];
            if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                return Some(candidate);
            }
        }
        search_from = open + 1;
    }

    None
}

/// Index of the `}` matching the `{` at `open`, skipping string literals.
fn balanced_close(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = open;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
        } else {
            match b {
                b'"' => in_string = true,
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

/// Lowercase a tool name and drop separator characters so `code-search`,
/// `Code_Search`, and `codesearch` all compare equal.
fn canonical_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '-' | '_' | '.' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalogue() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "code_search".into(),
                description: "search".into(),
                parameters: serde_json::json!({"type": "object"}),
            },
            ToolDefinition {
                name: "read_file".into(),
                description: "read".into(),
                parameters: serde_json::json!({"type": "object"}),
            },
        ]
    }

    #[test]
    fn test_extracts_plain_call() {
        let content = r#"{"name": "code_search", "arguments": {"query": "auth"}}"#;
        let call = extract_inline_tool_call(content, &catalogue()).unwrap();
        assert_eq!(call.function_name, "code_search");
        assert!(call.arguments.contains("auth"));
    }

    #[test]
    fn test_extracts_call_with_surrounding_prose() {
        let content = "I will search the code now.\n{\"name\": \"code_search\", \"arguments\": {\"query\": \"login\"}}\nDone.";
        let call = extract_inline_tool_call(content, &catalogue()).unwrap();
        assert_eq!(call.function_name, "code_search");
    }

    #[test]
    fn test_name_matching_ignores_case_and_separators() {
        let content = r#"{"name": "Code-Search", "arguments": {}}"#;
        let call = extract_inline_tool_call(content, &catalogue()).unwrap();
        assert_eq!(call.function_name, "code_search");
    }

    #[test]
    fn test_accepts_alternate_key_spellings() {
        let content = r#"{"tool": "read_file", "parameters": {"file_path": "a.rs"}}"#;
        let call = extract_inline_tool_call(content, &catalogue()).unwrap();
        assert_eq!(call.function_name, "read_file");
        assert!(call.arguments.contains("file_path"));
    }

    #[test]
    fn test_string_arguments_pass_through() {
        let content = r#"{"name": "read_file", "arguments": "{\"file_path\": \"a.rs\"}"}"#;
        let call = extract_inline_tool_call(content, &catalogue()).unwrap();
        assert_eq!(call.arguments, r#"{"file_path": "a.rs"}"#);
    }

    #[test]
    fn test_unknown_tool_returns_none() {
        let content = r#"{"name": "delete_everything", "arguments": {}}"#;
        assert!(extract_inline_tool_call(content, &catalogue()).is_none());
    }

    #[test]
    fn test_plain_prose_returns_none() {
        assert!(extract_inline_tool_call("The answer is 42.", &catalogue()).is_none());
    }

    #[test]
    fn test_braces_inside_strings_do_not_break_balance() {
        let content = r#"{"name": "code_search", "arguments": {"query": "fn main() {"}}"#;
        let call = extract_inline_tool_call(content, &catalogue()).unwrap();
        assert!(call.arguments.contains("fn main() {"));
    }

    #[test]
    fn test_unbalanced_object_returns_none() {
        let content = r#"{"name": "code_search", "arguments": {"#;
        assert!(extract_inline_tool_call(content, &catalogue()).is_none());
    }

    #[test]
    fn test_skips_invalid_json_before_valid_object() {
        let content = r#"not json {oops} but then {"name": "read_file", "arguments": {}}"#;
        let call = extract_inline_tool_call(content, &catalogue()).unwrap();
        assert_eq!(call.function_name, "read_file");
    }

    #[test]
    fn test_missing_arguments_defaults_to_empty_object() {
        let content = r#"{"name": "code_search"}"#;
        let call = extract_inline_tool_call(content, &catalogue()).unwrap();
        assert_eq!(call.arguments, "{}");
    }
}
