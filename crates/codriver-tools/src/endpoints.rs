//! Tool backend endpoint configuration.
//!
//! Each external tool has a dedicated HTTP POST endpoint.  URLs come from
//! `TOOL_BACKEND_<TOOL>_URL` environment variables, defaulting to a local
//! backend.

/// Default base for the local tool backend.
const DEFAULT_BASE: &str = "http://localhost:8002";

/// Per-tool endpoint URLs.
#[derive(Debug, Clone)]
pub struct ToolEndpoints {
    pub read_file: String,
    pub list_directory: String,
    pub run_terminal_command: String,
    pub search_files: String,
    pub grep_search: String,
    pub search_and_replace: String,
    pub codebase_search_metadata: String,
    pub codebase_search: String,
    pub edit_file: String,
    pub reapply: String,
    pub web_search: String,
    pub delete_file: String,
}

impl Default for ToolEndpoints {
    fn default() -> Self {
        Self {
            read_file: format!("{DEFAULT_BASE}/api/v1/file-access/read-file"),
            list_directory: format!("{DEFAULT_BASE}/api/v1/file-access/list-directory"),
            run_terminal_command: format!("{DEFAULT_BASE}/api/v1/environment/run-terminal-command"),
            search_files: format!("{DEFAULT_BASE}/api/v1/file-access/search-files"),
            grep_search: format!("{DEFAULT_BASE}/api/v1/search/grep-search"),
            search_and_replace: format!("{DEFAULT_BASE}/api/v1/modification/search-and-replace"),
            codebase_search_metadata: format!("{DEFAULT_BASE}/api/v1/search/codebase-metadata"),
            codebase_search: format!("{DEFAULT_BASE}/api/v1/search/codebase-search"),
            edit_file: format!("{DEFAULT_BASE}/api/v1/modification/edit-file"),
            reapply: format!("{DEFAULT_BASE}/api/v1/modification/reapply"),
            web_search: format!("{DEFAULT_BASE}/api/v1/external/web-search"),
            delete_file: format!("{DEFAULT_BASE}/api/v1/file-access/delete-file"),
        }
    }
}

impl ToolEndpoints {
    /// Load endpoint overrides from the environment.
    pub fn from_env() -> Self {
        let mut endpoints = Self::default();
        let overrides: [(&str, &mut String); 12] = [
            ("TOOL_BACKEND_READ_FILE_URL", &mut endpoints.read_file),
            ("TOOL_BACKEND_LIST_DIR_URL", &mut endpoints.list_directory),
            ("TOOL_BACKEND_RUN_CMD_URL", &mut endpoints.run_terminal_command),
            ("TOOL_BACKEND_SEARCH_FILES_URL", &mut endpoints.search_files),
            ("TOOL_BACKEND_GREP_SEARCH_URL", &mut endpoints.grep_search),
            (
                "TOOL_BACKEND_SEARCH_AND_REPLACE_URL",
                &mut endpoints.search_and_replace,
            ),
            (
                "TOOL_BACKEND_CODEBASE_SEARCH_METADATA_URL",
                &mut endpoints.codebase_search_metadata,
            ),
            (
                "TOOL_BACKEND_CODEBASE_SEARCH_URL",
                &mut endpoints.codebase_search,
            ),
            ("TOOL_BACKEND_EDIT_FILE_URL", &mut endpoints.edit_file),
            ("TOOL_BACKEND_REAPPLY_URL", &mut endpoints.reapply),
            ("TOOL_BACKEND_WEB_SEARCH_URL", &mut endpoints.web_search),
            ("TOOL_BACKEND_DELETE_FILE_URL", &mut endpoints.delete_file),
        ];

        for (var, slot) in overrides {
            if let Ok(url) = std::env::var(var) {
                *slot = url;
            }
        }
        endpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_backend() {
        let endpoints = ToolEndpoints::default();
        assert!(endpoints.read_file.starts_with(DEFAULT_BASE));
        assert!(endpoints.run_terminal_command.contains("run-terminal-command"));
        assert_ne!(endpoints.codebase_search, endpoints.codebase_search_metadata);
    }
}
