use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use echo_core::{EchoError, EchoResult};

/// A single Observations entry eligible for promotion, identified by the
/// file it lives in and the line its H2 header occupies.
#[derive(Debug, Clone)]
pub struct PromotionTarget {
    pub file_path: PathBuf,
    pub line_number: usize,
}

fn observations_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(##\s+)Observations(\s*[—–-]\s*.+)$").unwrap())
}

const DRIFT_WINDOW: i64 = 10;

/// Rewrite every `MEMORY.md` affected by `targets`, replacing each
/// Observations header with an Inscribed one. Targets are grouped by
/// file so each file is read, patched and atomically replaced once.
/// Returns the set of files actually rewritten (used by the caller to
/// decide whether to write the dirty signal).
pub fn promote_observations(echo_dir: &Path, targets: &[PromotionTarget]) -> EchoResult<Vec<PathBuf>> {
    let echo_dir_real = std::fs::canonicalize(echo_dir).unwrap_or_else(|_| echo_dir.to_path_buf());

    let mut by_file: HashMap<PathBuf, Vec<usize>> = HashMap::new();
    for t in targets {
        by_file.entry(t.file_path.clone()).or_default().push(t.line_number);
    }

    let mut promoted = Vec::new();
    for (file_path, line_numbers) in by_file {
        match promote_one_file(&echo_dir_real, &file_path, &line_numbers) {
            Ok(true) => promoted.push(file_path),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!("promotion abandoned for {}: {e}", file_path.display());
            }
        }
    }
    Ok(promoted)
}

/// Returns `Ok(true)` if the file was rewritten, `Ok(false)` if it was
/// legitimately skipped (no matching lines found), `Err` on a guard
/// failure or I/O error (both non-fatal to the overall promotion pass).
fn promote_one_file(echo_dir_real: &Path, file_path: &Path, line_numbers: &[usize]) -> EchoResult<bool> {
    let file_real = std::fs::canonicalize(file_path).map_err(EchoError::Io)?;
    if !file_real.starts_with(echo_dir_real) {
        return Err(EchoError::PathTraversal {
            path: file_path.display().to_string(),
        });
    }

    let metadata = std::fs::metadata(file_path).map_err(EchoError::Io)?;
    if metadata.permissions().readonly() {
        return Err(EchoError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "target file is not writable",
        )));
    }

    let text = std::fs::read_to_string(file_path).map_err(EchoError::Io)?;
    let mut lines: Vec<String> = text.lines().map(String::from).collect();

    let mut claimed: HashSet<usize> = HashSet::new();
    let mut any_matched = false;

    for &line_number in line_numbers {
        if let Some(idx) = find_target_line(&lines, line_number, &claimed) {
            claimed.insert(idx);
            if let Some(caps) = observations_header_re().captures(&lines[idx]) {
                lines[idx] = format!("{}Inscribed{}", &caps[1], &caps[2]);
                any_matched = true;
            }
        }
    }

    if !any_matched {
        return Ok(false);
    }

    let mut rewritten = lines.join("\n");
    if text.ends_with('\n') {
        rewritten.push('\n');
    }

    let dir = file_path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::Builder::new()
        .prefix(".promote-")
        .suffix(".md")
        .tempfile_in(dir)
        .map_err(EchoError::Io)?;
    use std::io::Write;
    temp.write_all(rewritten.as_bytes()).map_err(EchoError::Io)?;
    temp.persist(file_path)
        .map_err(|e| EchoError::Io(e.error))?;

    Ok(true)
}

/// Exact line first; on miss, scan drift offsets `±1, ±2, … ±10` for an
/// unclaimed line that still matches the Observations header shape (the
/// file may have gained or lost lines since the index was built).
fn find_target_line(lines: &[String], line_number: usize, claimed: &HashSet<usize>) -> Option<usize> {
    let exact = line_number.checked_sub(1)?;
    if exact < lines.len() && !claimed.contains(&exact) && observations_header_re().is_match(&lines[exact]) {
        return Some(exact);
    }

    for offset in 1..=DRIFT_WINDOW {
        for candidate in [exact as i64 + offset, exact as i64 - offset] {
            if candidate < 0 {
                continue;
            }
            let idx = candidate as usize;
            if idx < lines.len() && !claimed.contains(&idx) && observations_header_re().is_match(&lines[idx]) {
                return Some(idx);
            }
        }
    }
    None
}
