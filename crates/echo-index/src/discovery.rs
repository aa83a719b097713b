use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use echo_core::models::EchoEntry;

use crate::parser::parse_memory_file;

fn role_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap())
}

/// Discover every role directory directly under `echo_dir` (sorted
/// alphabetically, one level deep, `.`-prefixed or whitespace-bearing
/// names rejected) and parse its `MEMORY.md`, if present. A missing or
/// empty `echo_dir` yields an empty vec.
pub fn discover_and_parse(echo_dir: &Path) -> Vec<EchoEntry> {
    let Ok(read_dir) = std::fs::read_dir(echo_dir) else {
        return Vec::new();
    };

    let mut roles: Vec<String> = read_dir
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| role_re().is_match(name))
        .collect();
    roles.sort();

    let mut entries = Vec::new();
    for role in roles {
        let memory_path = echo_dir.join(&role).join("MEMORY.md");
        if !memory_path.is_file() {
            continue;
        }
        entries.extend(parse_memory_file(&memory_path, &role));
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_dir_yields_empty() {
        assert!(discover_and_parse(Path::new("/nonexistent/echoes")).is_empty());
    }

    #[test]
    fn roles_processed_in_sorted_order_and_invalid_names_skipped() {
        let dir = tempfile::tempdir().unwrap();
        for role in ["zebra", "alpha", ".hidden", "bad name"] {
            let role_dir = dir.path().join(role);
            fs::create_dir_all(&role_dir).unwrap();
            fs::write(
                role_dir.join("MEMORY.md"),
                "## Notes — Entry (2026-01-01)\nbody\n",
            )
            .unwrap();
        }
        // A non-role plain file at the root must not be treated as a role.
        fs::write(dir.path().join("stray.md"), "ignored").unwrap();

        let entries = discover_and_parse(dir.path());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, "alpha");
        assert_eq!(entries[1].role, "zebra");
    }

    #[test]
    fn role_dir_without_memory_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("empty_role")).unwrap();
        assert!(discover_and_parse(dir.path()).is_empty());
    }
}
