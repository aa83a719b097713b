/// Top-level error type for the echo memory system.
///
/// Subsystem errors fold in via `#[from]`; callers at the tool-server
/// boundary truncate `Display` output to 200 chars and never surface
/// `Debug` (which may carry paths) to the RPC caller.
#[derive(Debug, thiserror::Error)]
pub enum EchoError {
    #[error("echo entry not found: {id}")]
    NotFound { id: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("migration failed at version {version}: {reason}")]
    MigrationFailed { version: u32, reason: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("subprocess error: {0}")]
    Subprocess(String),

    #[error("path traversal rejected: {path}")]
    PathTraversal { path: String },
}

pub type EchoResult<T> = Result<T, EchoError>;

impl EchoError {
    /// Truncate the display message to at most `n` chars, for error
    /// payloads returned to a tool caller: never leak absolute paths or
    /// stack frames beyond a short, bounded message.
    pub fn truncated(&self, n: usize) -> String {
        let msg = self.to_string();
        if msg.chars().count() <= n {
            msg
        } else {
            msg.chars().take(n).collect()
        }
    }
}
