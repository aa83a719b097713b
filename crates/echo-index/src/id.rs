use sha2::{Digest, Sha256};

/// Deterministic 16-hex-char id over `role|line_number|file_path`: the
/// first 16 hex chars of the SHA-256 digest of that pipe-joined string.
/// Unicode-safe: hashing operates on the UTF-8 byte representation, so
/// non-ASCII role names or paths hash the same way on every platform.
pub fn generate_id(role: &str, line_number: usize, file_path: &str) -> String {
    let input = format!("{role}|{line_number}|{file_path}");
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_over_same_inputs() {
        let a = generate_id("reviewer", 5, "/echoes/reviewer/MEMORY.md");
        let b = generate_id("reviewer", 5, "/echoes/reviewer/MEMORY.md");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn differs_on_any_component() {
        let base = generate_id("reviewer", 5, "/echoes/reviewer/MEMORY.md");
        assert_ne!(base, generate_id("observer", 5, "/echoes/reviewer/MEMORY.md"));
        assert_ne!(base, generate_id("reviewer", 6, "/echoes/reviewer/MEMORY.md"));
        assert_ne!(base, generate_id("reviewer", 5, "/echoes/observer/MEMORY.md"));
    }

    #[test]
    fn handles_unicode_paths() {
        let id = generate_id("réviewer", 1, "/echoes/réviewer/MEMORY.md");
        assert_eq!(id.len(), 16);
    }
}
