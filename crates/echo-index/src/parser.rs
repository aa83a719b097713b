use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use echo_core::models::{EchoEntry, Layer};

use crate::id::generate_id;

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^##\s+(Etched|Inscribed|Traced|Notes|Observations)\s+[—–-]\s+(.+?)\s+\((\d{4}-\d{2}-\d{2})\)\s*$",
        )
        .unwrap()
    })
}

fn source_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\*\*Source\*\*:\s*`?([^`]+?)`?\s*$").unwrap())
}

struct PendingEntry {
    layer: Layer,
    tags: String,
    date: String,
    line_number: usize,
    source: String,
    expect_source_line: bool,
    content_lines: Vec<String>,
}

/// Parse one `MEMORY.md` file into its `EchoEntry`s. A nonexistent file
/// yields an empty vec (not an error) so discovery can call this
/// unconditionally on every candidate role directory.
pub fn parse_memory_file(path: &Path, role: &str) -> Vec<EchoEntry> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(_) => return Vec::new(),
    };
    let file_path = path.to_string_lossy().to_string();

    let mut entries = Vec::new();
    let mut current: Option<PendingEntry> = None;
    let mut prev_blank = true;

    for (idx, line) in text.lines().enumerate() {
        let line_number = idx + 1;

        if prev_blank {
            if let Some(caps) = header_re().captures(line) {
                if let Some(entry) = current.take() {
                    flush(entry, role, &file_path, &mut entries);
                }
                let layer = Layer::parse(&caps[1]);
                if let Some(layer) = layer {
                    current = Some(PendingEntry {
                        layer,
                        tags: caps[2].to_string(),
                        date: caps[3].to_string(),
                        line_number,
                        source: String::new(),
                        expect_source_line: true,
                        content_lines: Vec::new(),
                    });
                    prev_blank = false;
                    continue;
                }
            }
        }

        if let Some(entry) = current.as_mut() {
            if entry.expect_source_line {
                entry.expect_source_line = false;
                if let Some(caps) = source_re().captures(line) {
                    entry.source = caps[1].to_string();
                    prev_blank = line.trim().is_empty();
                    continue;
                }
            }
            entry.content_lines.push(line.to_string());
        }

        prev_blank = line.trim().is_empty();
    }

    if let Some(entry) = current.take() {
        flush(entry, role, &file_path, &mut entries);
    }

    entries
}

fn flush(entry: PendingEntry, role: &str, file_path: &str, out: &mut Vec<EchoEntry>) {
    let content = entry.content_lines.join("\n");
    let content = content.trim_end().to_string();
    if content.is_empty() {
        return;
    }
    let id = generate_id(role, entry.line_number, file_path);
    out.push(EchoEntry {
        id,
        role: role.to_string(),
        layer: entry.layer.as_str().to_string(),
        date: entry.date,
        source: entry.source,
        tags: entry.tags,
        content,
        line_number: entry.line_number,
        file_path: file_path.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("MEMORY.md")).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        dir
    }

    #[test]
    fn nonexistent_file_yields_empty() {
        let entries = parse_memory_file(Path::new("/nonexistent/MEMORY.md"), "role");
        assert!(entries.is_empty());
    }

    #[test]
    fn parses_single_entry_with_source() {
        let dir = write_temp(
            "## Inscribed — Prefer guard clauses (2026-07-27)\n\
             **Source**: `src/handler.rs:42`\n\
             Guard clauses read clearer than nested ifs.\n",
        );
        let entries = parse_memory_file(&dir.path().join("MEMORY.md"), "reviewer");
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.layer, "inscribed");
        assert_eq!(e.tags, "Prefer guard clauses");
        assert_eq!(e.date, "2026-07-27");
        assert_eq!(e.source, "src/handler.rs:42");
        assert_eq!(e.content, "Guard clauses read clearer than nested ifs.");
        assert_eq!(e.line_number, 1);
    }

    #[test]
    fn empty_content_entry_is_dropped() {
        let dir = write_temp("## Notes — Empty one (2026-01-01)\n\n");
        let entries = parse_memory_file(&dir.path().join("MEMORY.md"), "role");
        assert!(entries.is_empty());
    }

    #[test]
    fn header_inside_content_does_not_split_without_blank_line() {
        let dir = write_temp(
            "## Notes — Title (2026-01-01)\n\
             some content\n\
             ## Notes — not actually a header (2026-01-01)\n\
             more content\n",
        );
        let entries = parse_memory_file(&dir.path().join("MEMORY.md"), "role");
        assert_eq!(entries.len(), 1);
        assert!(entries[0].content.contains("not actually a header"));
    }

    #[test]
    fn blank_line_before_header_allows_new_entry() {
        let dir = write_temp(
            "## Notes — First (2026-01-01)\n\
             body one\n\
             \n\
             ## Traced — Second (2026-01-02)\n\
             body two\n",
        );
        let entries = parse_memory_file(&dir.path().join("MEMORY.md"), "role");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].tags, "Second");
    }

    #[test]
    fn unknown_layer_name_is_not_a_header() {
        let dir = write_temp("## Mystery — Title (2026-01-01)\nbody\n");
        let entries = parse_memory_file(&dir.path().join("MEMORY.md"), "role");
        assert!(entries.is_empty());
    }

    #[test]
    fn en_dash_and_hyphen_separators_both_work() {
        let dir = write_temp("## Notes – En dash (2026-01-01)\nbody\n\n## Notes - Hyphen (2026-01-02)\nbody\n");
        let entries = parse_memory_file(&dir.path().join("MEMORY.md"), "role");
        assert_eq!(entries.len(), 2);
    }
}
