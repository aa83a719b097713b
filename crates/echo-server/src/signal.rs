use std::path::{Path, PathBuf};

/// `ECHO_DIR` is conventionally `<project>/.claude/echoes`; the signal
/// lives at `<project>/tmp/.rune-signals/.echo-dirty`. Strips the
/// `.claude/echoes` suffix to recover the project root; if the suffix
/// isn't present, falls back to walking up two directories.
const SIGNAL_SUFFIX: &str = ".claude/echoes";

/// Derive the dirty-signal sentinel path from `echo_dir`. Returns `None`
/// for an empty `echo_dir` (nothing to signal against).
pub fn signal_path(echo_dir: &Path) -> Option<PathBuf> {
    if echo_dir.as_os_str().is_empty() {
        return None;
    }
    let normalized = echo_dir.to_string_lossy().trim_end_matches('/').to_string();

    let project_root = if normalized.ends_with(SIGNAL_SUFFIX) {
        normalized[..normalized.len() - SIGNAL_SUFFIX.len()].trim_end_matches('/').to_string()
    } else {
        Path::new(&normalized)
            .parent()
            .and_then(|p| p.parent())
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default()
    };

    Some(Path::new(&project_root).join("tmp").join(".rune-signals").join(".echo-dirty"))
}

/// Atomically check-and-unlink the dirty signal. Returns `true` (and
/// deletes the file) if present. A missing file, missing directory, or
/// any I/O error is treated as "not dirty" — a consumer racing another
/// consumer, or lacking permissions, must not fail the calling search.
pub fn check_and_clear_dirty(echo_dir: Option<&Path>) -> bool {
    let Some(echo_dir) = echo_dir else { return false };
    let Some(path) = signal_path(echo_dir) else {
        return false;
    };
    if path.is_file() {
        std::fs::remove_file(&path).is_ok()
    } else {
        false
    }
}

/// Write the dirty signal, creating its parent directory if needed.
/// Failures are non-fatal: a promotion that can't signal still
/// succeeded, the next search just won't auto-reindex from it.
pub fn write_dirty(echo_dir: &Path) {
    let Some(path) = signal_path(echo_dir) else { return };
    if let Some(dir) = path.parent() {
        if std::fs::create_dir_all(dir).is_err() {
            return;
        }
    }
    let _ = std::fs::write(&path, "promoted");
}
