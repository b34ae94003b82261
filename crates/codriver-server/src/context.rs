//! Request schemas and system-prompt assembly.
//!
//! The `/stream` request carries rich editor context — system information,
//! the active file, mention strings — that is folded into the session's
//! cached system prompt before each run.

use serde::{Deserialize, Serialize};

use codriver_agent::SessionContext;

// ---------------------------------------------------------------------------
// Inbound schemas
// ---------------------------------------------------------------------------

/// Host system information sent by the editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Operating system platform (e.g. `"darwin"`, `"linux"`).
    pub platform: String,

    /// OS version string.
    #[serde(rename = "osVersion", default)]
    pub os_version: String,

    /// The user's shell, if known.
    #[serde(default)]
    pub shell: Option<String>,

    /// Workspace name shown in the editor.
    #[serde(rename = "workspaceName", default)]
    pub workspace_name: Option<String>,
}

/// Context about the file currently open in the editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveFileContext {
    /// Path relative to the workspace root.
    #[serde(rename = "relativePath")]
    pub relative_path: String,

    /// Editor language id (e.g. `"rust"`, `"python"`).
    #[serde(rename = "languageId", default)]
    pub language_id: Option<String>,

    /// Number of lines in the file.
    #[serde(rename = "lineCount", default)]
    pub line_count: Option<u64>,

    /// Whether the buffer has unsaved changes.
    #[serde(rename = "isDirty", default)]
    pub is_dirty: bool,
}

/// Body of `POST /stream`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    /// The user's natural-language request.
    pub query: String,

    /// Absolute path of the workspace.
    pub workspace_path: String,

    /// Hashed workspace path, used by the indexing backend.
    #[serde(default)]
    pub hashed_workspace_path: String,

    /// Current git branch.
    #[serde(default)]
    pub git_branch: String,

    /// Host system information.
    #[serde(default)]
    pub system_info: Option<SystemInfo>,

    /// The file currently open in the editor.
    #[serde(default)]
    pub active_file_context: Option<ActiveFileContext>,

    /// `@`-mention strings from the query.
    #[serde(default)]
    pub context_mentions: Option<Vec<String>>,
}

impl QueryRequest {
    /// The session context carried into tool dispatches.
    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            workspace_path: self.workspace_path.clone(),
            hashed_workspace_path: self.hashed_workspace_path.clone(),
            git_branch: self.git_branch.clone(),
        }
    }
}

/// Body of `POST /permission`.
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionResponse {
    pub permission_id: String,
    pub granted: bool,
}

// ---------------------------------------------------------------------------
// System prompt assembly
// ---------------------------------------------------------------------------

/// Base system prompt for the coding agent.
const BASE_SYSTEM_PROMPT: &str = "\
You are Codriver, an expert AI coding assistant operating inside the user's \
editor. You help with understanding, writing, and modifying code in the \
user's workspace.

You have access to tools for reading files, listing directories, searching \
the codebase (exact and semantic), editing files, running terminal commands, \
and searching the web. Use them deliberately:

1. Gather context before acting. Prefer list_directory and read_file to \
understand structure; use grep_search when you know the exact symbol and \
codebase_search when you only know the intent.
2. When editing, use edit_file with minimal snippets and the \
`// ... existing code ...` marker for unchanged regions. If the applied diff \
is wrong, use reapply once.
3. Terminal commands require user approval and may be rejected. Never \
propose destructive commands.
4. When the task is complete, answer the user directly and concisely. Do \
not narrate tool output back verbatim.";

/// Assemble the full system prompt from the base prompt and request context.
pub fn build_system_prompt(
    workspace_path: &str,
    system_info: Option<&SystemInfo>,
    active_file: Option<&ActiveFileContext>,
    context_mentions: Option<&[String]>,
) -> String {
    let mut prompt = String::from(BASE_SYSTEM_PROMPT);

    prompt.push_str("\n\n## Environment\n");
    prompt.push_str(&format!("- Workspace path: {workspace_path}\n"));
    if let Some(name) = workspace_path.rsplit('/').next().filter(|n| !n.is_empty()) {
        prompt.push_str(&format!("- Workspace name: {name}\n"));
    }

    if let Some(info) = system_info {
        prompt.push_str(&format!("- Platform: {}", info.platform));
        if !info.os_version.is_empty() {
            prompt.push_str(&format!(" {}", info.os_version));
        }
        prompt.push('\n');
        if let Some(ref shell) = info.shell {
            prompt.push_str(&format!("- Shell: {shell}\n"));
        }
    }

    if let Some(file) = active_file {
        prompt.push_str("\n## Active file\n");
        prompt.push_str(&format!("- Path: {}\n", file.relative_path));
        if let Some(ref language) = file.language_id {
            prompt.push_str(&format!("- Language: {language}\n"));
        }
        if let Some(lines) = file.line_count {
            prompt.push_str(&format!("- Lines: {lines}\n"));
        }
        if file.is_dirty {
            prompt.push_str("- The buffer has unsaved changes.\n");
        }
    }

    if let Some(mentions) = context_mentions
        && !mentions.is_empty()
    {
        prompt.push_str("\n## Mentioned context\n");
        for mention in mentions {
            prompt.push_str(&format!("- {mention}\n"));
        }
    }

    prompt
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
