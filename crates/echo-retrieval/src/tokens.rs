use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/// Fixed 51-word stopword list, dropped during tokenization unless doing
/// so would empty the token set entirely (in which case the filter is
/// skipped for that call — see [`extract_tokens`]).
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "had", "has", "have",
    "he", "her", "his", "i", "in", "is", "it", "its", "my", "not", "of", "on", "or", "our", "she",
    "so", "that", "the", "their", "them", "then", "there", "these", "they", "this", "to", "us",
    "was", "we", "what", "when", "which", "who", "will", "with", "you", "your",
];

const MAX_QUERY_CHARS: usize = 500;
const MAX_TOKENS: usize = 20;
const MIN_TOKEN_LEN: usize = 2;

pub(crate) fn stopwords() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOPWORDS.iter().copied().collect())
}

pub(crate) fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9_]+").unwrap())
}

/// Raw tokens from `text`: truncate to 500 chars, extract `[A-Za-z0-9_]+`
/// runs, lower-case. Does not apply stopword/length filtering.
fn raw_tokens(text: &str) -> Vec<String> {
    let truncated: String = text.chars().take(MAX_QUERY_CHARS).collect();
    token_re()
        .find_iter(&truncated)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Build the sanitized token list used both for the FTS query and for
/// the fingerprint: drop stopwords and tokens shorter than 2 chars; if
/// that empties the set, retry once without the stopword filter (but
/// still with the length filter); cap at 20 tokens.
pub fn extract_tokens(text: &str) -> Vec<String> {
    let raw = raw_tokens(text);

    let filtered: Vec<String> = raw
        .iter()
        .filter(|t| t.len() >= MIN_TOKEN_LEN && !stopwords().contains(t.as_str()))
        .cloned()
        .collect();

    let tokens = if filtered.is_empty() {
        raw.into_iter().filter(|t| t.len() >= MIN_TOKEN_LEN).collect()
    } else {
        filtered
    };

    tokens.into_iter().take(MAX_TOKENS).collect()
}

/// Build the FTS5 `MATCH` argument: sanitized tokens joined with ` OR `.
/// Raw user text is never passed to `MATCH` directly. An empty token set
/// yields an empty string, which callers treat as "zero results", not an
/// error.
pub fn build_fts_query(text: &str) -> String {
    extract_tokens(text).join(" OR ")
}

/// SHA-256 hex digest of the sorted, de-duplicated sanitized token list,
/// space-joined. Identifies "equivalent" queries for retry tracking. An
/// empty token set yields an empty fingerprint, which callers must treat
/// as "skip retry logic", not as a valid fingerprint of zero tokens.
pub fn fingerprint(text: &str) -> String {
    let mut tokens = extract_tokens(text);
    if tokens.is_empty() {
        return String::new();
    }
    tokens.sort();
    tokens.dedup();
    let joined = tokens.join(" ");
    hex::encode(Sha256::digest(joined.as_bytes()))
}
