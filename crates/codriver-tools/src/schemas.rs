//! Tool definitions exposed to the LLM.
//!
//! One entry per external tool, with the JSON Schema for its input.  The
//! descriptions are part of the prompt surface; keep them instructive.

use serde_json::json;

use codriver_agent::ToolDefinition;

/// Build the full tool surface.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "read_file".into(),
            description: "Reads the contents of a specified file. You may read the entire file \
                or a specific range of lines by providing optional start and end line numbers."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string", "description": "Path to the file to read"},
                    "start_line": {"type": "integer", "description": "First line to read (1-based, optional)"},
                    "end_line": {"type": "integer", "description": "Last line to read (inclusive, optional)"},
                    "explanation": {"type": "string", "description": "Why the file is being read"}
                },
                "required": ["file_path", "explanation"]
            }),
        },
        ToolDefinition {
            name: "list_directory".into(),
            description: "List the contents of a directory. The quick tool to use for discovery \
                before using more targeted tools like semantic search or file reading."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "dir_path": {"type": "string", "description": "Directory to list; '.' means the workspace root"},
                    "explanation": {"type": "string", "description": "Why the listing is needed"}
                },
                "required": ["dir_path", "explanation"]
            }),
        },
        ToolDefinition {
            name: "run_terminal_command".into(),
            description: "PROPOSE a command to run on behalf of the user. State persists between \
                executions. For long-running commands set is_background to true rather than \
                changing the command. Don't include any newlines in the command."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "The terminal command to execute"},
                    "is_background": {"type": "boolean", "description": "Run the command in the background"},
                    "explanation": {"type": "string", "description": "Why the command is needed"}
                },
                "required": ["command", "is_background"]
            }),
        },
        ToolDefinition {
            name: "search_files".into(),
            description: "Fast file search based on fuzzy matching against file paths. Use when \
                you know part of a file path but not its exact location. Results are capped at 10."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Fuzzy pattern to match against file paths"},
                    "explanation": {"type": "string", "description": "Why the search is needed"}
                },
                "required": ["query", "explanation"]
            }),
        },
        ToolDefinition {
            name: "grep_search".into(),
            description: "Fast, exact regex search over text files using the ripgrep engine. \
                Preferred over semantic search when the exact symbol or string is known. \
                Results are capped at 50 matches; use include/exclude patterns to filter scope."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "The regex pattern to search for"},
                    "case_sensitive": {"type": "boolean", "description": "Whether the search is case sensitive"},
                    "include_pattern": {"type": "string", "description": "Glob pattern for files to include"},
                    "exclude_pattern": {"type": "string", "description": "Glob pattern for files to exclude"},
                    "explanation": {"type": "string", "description": "Why the search is being performed"}
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "search_and_replace".into(),
            description: "Search for a pattern in files and replace it with new text across the \
                codebase. Supports include/exclude file patterns and case-sensitive matching."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "The text or regex pattern to search for"},
                    "replacement": {"type": "string", "description": "The replacement text"},
                    "explanation": {"type": "string", "description": "Why the replacement is needed"},
                    "options": {"type": "object", "description": "Search options (include/exclude globs, case flag)"}
                },
                "required": ["query", "replacement", "explanation"]
            }),
        },
        ToolDefinition {
            name: "codebase_search".into(),
            description: "Find snippets of code from the codebase most relevant to the search \
                query. This is a semantic search tool; reuse the user's exact wording when \
                possible."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "The semantic search query"},
                    "explanation": {"type": "string", "description": "Why the search is needed"}
                },
                "required": ["query", "explanation"]
            }),
        },
        ToolDefinition {
            name: "edit_file".into(),
            description: "Propose an edit to an existing file. The edit is applied by a faster \
                model; represent unchanged regions with the special comment \
                `// ... existing code ...` and repeat as few original lines as possible while \
                keeping enough context to resolve ambiguity."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "target_file_path": {"type": "string", "description": "File to edit"},
                    "code_snippet": {"type": "string", "description": "The edit snippet"},
                    "explanation": {"type": "string", "description": "What the edit does"}
                },
                "required": ["target_file_path", "code_snippet", "explanation"]
            }),
        },
        ToolDefinition {
            name: "reapply".into(),
            description: "Calls a smarter model to apply the last edit to the specified file. \
                Use immediately after edit_file ONLY IF the resulting diff was not what you \
                expected."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "target_file_path": {"type": "string", "description": "File whose last edit should be re-applied"},
                    "code_snippet": {"type": "string", "description": "The edit snippet"},
                    "explanation": {"type": "string", "description": "Why the reapply is needed"}
                },
                "required": ["target_file_path", "code_snippet", "explanation"]
            }),
        },
        ToolDefinition {
            name: "web_search".into(),
            description: "Search the web for real-time information. Use for up-to-date facts \
                that may postdate training data. If target_urls are given, only those pages are \
                searched."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "search_term": {"type": "string", "description": "The search query"},
                    "target_urls": {"type": "array", "items": {"type": "string"}, "description": "Optional URLs to restrict the search to"},
                    "explanation": {"type": "string", "description": "Why the search is needed"}
                },
                "required": ["search_term"]
            }),
        },
        ToolDefinition {
            name: "delete_file".into(),
            description: "Deletes a file or directory at the specified path with strict safety \
                checks. Protected or project-critical paths cannot be deleted."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path to delete"},
                    "explanation": {"type": "string", "description": "Why the deletion is needed"}
                },
                "required": ["path", "explanation"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_tool_surface_present() {
        let names: Vec<String> = tool_definitions().into_iter().map(|t| t.name).collect();
        for expected in [
            "read_file",
            "list_directory",
            "run_terminal_command",
            "search_files",
            "grep_search",
            "search_and_replace",
            "codebase_search",
            "edit_file",
            "reapply",
            "web_search",
            "delete_file",
        ] {
            assert!(names.contains(&expected.to_owned()), "missing {expected}");
        }
        assert_eq!(names.len(), 11);
    }

    #[test]
    fn schemas_are_objects_with_properties() {
        for def in tool_definitions() {
            assert_eq!(def.input_schema["type"], "object", "{}", def.name);
            assert!(def.input_schema["properties"].is_object(), "{}", def.name);
            assert!(!def.description.is_empty(), "{}", def.name);
        }
    }
}
