use std::path::PathBuf;

/// Process settings, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Workspace opened before the first request; requests can still switch
    /// with `workspace.select`.
    pub workspace: Option<PathBuf>,
    /// `tracing` filter directive.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            workspace: std::env::var("SCHOOLD_WORKSPACE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .or(default.workspace),
            log_filter: std::env::var("SCHOOLD_LOG")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default.log_filter),
        }
    }
}
