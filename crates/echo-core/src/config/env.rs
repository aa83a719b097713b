use std::path::{Path, PathBuf};

use crate::errors::{EchoError, EchoResult};

/// Directories under which `ECHO_DIR`/`DB_PATH` may never resolve. Checked
/// against the raw configured path, with no symlink resolution; the check
/// exists to reject obviously-wrong system paths at startup, not to defend
/// against a hostile filesystem.
const FORBIDDEN_PREFIXES: [&str; 7] = ["/etc", "/usr", "/bin", "/sbin", "/var/run", "/proc", "/sys"];

/// The env-var layer of configuration, read once at process startup.
/// `DB_PATH` is always required; `ECHO_DIR` is required only for the
/// indexing path (reindex / server before first search) but is still
/// captured here since nearly every entry point needs it.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub echo_dir: Option<PathBuf>,
    pub db_path: PathBuf,
    pub trace: bool,
    pub claude_config_dir: Option<PathBuf>,
}

impl EnvConfig {
    /// Load from the process environment. Fatal (returns `Err`) when
    /// `DB_PATH` is unset or either configured path resolves under a
    /// forbidden system prefix.
    pub fn load() -> EchoResult<Self> {
        let db_path = std::env::var("DB_PATH")
            .map_err(|_| EchoError::Config("DB_PATH is required".to_string()))?;
        let db_path = PathBuf::from(db_path);
        check_not_forbidden(&db_path)?;

        let echo_dir = std::env::var("ECHO_DIR").ok().map(PathBuf::from);
        if let Some(ref dir) = echo_dir {
            check_not_forbidden(dir)?;
        }

        let trace = std::env::var("RUNE_TRACE")
            .map(|v| v == "1")
            .unwrap_or(false);

        let claude_config_dir = std::env::var("CLAUDE_CONFIG_DIR").ok().map(PathBuf::from);

        Ok(Self {
            echo_dir,
            db_path,
            trace,
            claude_config_dir,
        })
    }

    /// `ECHO_DIR` required; used by entry points that cannot proceed
    /// without it (indexing, promotion).
    pub fn require_echo_dir(&self) -> EchoResult<&Path> {
        self.echo_dir
            .as_deref()
            .ok_or_else(|| EchoError::Config("ECHO_DIR is required".to_string()))
    }
}

fn check_not_forbidden(path: &Path) -> EchoResult<()> {
    let s = path.to_string_lossy();
    for prefix in FORBIDDEN_PREFIXES {
        if s.starts_with(prefix) {
            return Err(EchoError::Config(format!(
                "path '{s}' resolves under forbidden prefix '{prefix}'"
            )));
        }
    }
    Ok(())
}
