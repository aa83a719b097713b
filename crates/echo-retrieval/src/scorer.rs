use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use echo_core::config::ScoringWeights;
use echo_core::models::{EchoEntry, Layer, ScoreBreakdown};

const RECENCY_HALF_LIFE_DAYS: f64 = 30.0;
const MAX_EVIDENCE_PATHS: usize = 10;

fn evidence_backtick_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`([^`]+\.[a-z]{1,6})`").unwrap())
}

/// Extract up to 10 file-path-shaped tokens from an entry's preview/
/// content and its `source` field. Paths are strings only — never
/// opened or `stat`-ed.
pub fn extract_evidence_paths(content: &str, source: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for caps in evidence_backtick_re().captures_iter(content) {
        let raw = &caps[1];
        if raw.contains('/') {
            let normalized = raw.replace('\\', "/");
            if seen.insert(normalized.clone()) {
                out.push(normalized);
                if out.len() >= MAX_EVIDENCE_PATHS {
                    return out;
                }
            }
        }
    }

    for token in source.split_whitespace() {
        if token.contains('/') && !token.contains(':') {
            let normalized = token.replace('\\', "/");
            if seen.insert(normalized.clone()) {
                out.push(normalized);
                if out.len() >= MAX_EVIDENCE_PATHS {
                    return out;
                }
            }
        }
    }

    out
}

/// Path-proximity score between one evidence path and one context file,
/// both treated as plain strings (no real-path resolution): equal → 1.0,
/// same directory → 0.8, else scaled by shared path-segment prefix.
pub fn path_proximity(a: &str, b: &str) -> f64 {
    let a = a.replace('\\', "/");
    let b = b.replace('\\', "/");
    if a == b {
        return 1.0;
    }
    let a_parts: Vec<&str> = a.split('/').filter(|s| !s.is_empty()).collect();
    let b_parts: Vec<&str> = b.split('/').filter(|s| !s.is_empty()).collect();

    if !a_parts.is_empty() && !b_parts.is_empty() && a_parts[..a_parts.len() - 1] == b_parts[..b_parts.len() - 1] {
        return 0.8;
    }

    let common = a_parts.iter().zip(b_parts.iter()).take_while(|(x, y)| x == y).count();
    let denom = a_parts.len().max(b_parts.len());
    if common == 0 || denom == 0 {
        return 0.0;
    }
    0.2 + 0.4 * (common as f64 / denom as f64)
}

/// Best pairwise proximity between an entry's evidence paths and the
/// caller-supplied `context_files`. Empty or missing context → 0.0 for
/// all entries. 1.0 short-circuits the search.
pub fn score_proximity(evidence_paths: &[String], context_files: &[String]) -> f64 {
    let mut best = 0.0_f64;
    for ep in evidence_paths {
        for cf in context_files {
            let s = path_proximity(ep, cf);
            if s > best {
                best = s;
                if (best - 1.0).abs() < f64::EPSILON {
                    return 1.0;
                }
            }
        }
    }
    best
}

/// Min-max inverted relevance: the most-negative BM25 score (best match)
/// maps to 1.0, the least-negative to 0.0. A single result, or a batch
/// where every BM25 value is equal, maps to 1.0 for all.
pub fn score_relevance(bm25: f64, min_bm25: f64, max_bm25: f64) -> f64 {
    if (max_bm25 - min_bm25).abs() < f64::EPSILON {
        return 1.0;
    }
    (max_bm25 - bm25) / (max_bm25 - min_bm25)
}

pub fn score_importance(layer: &str) -> f64 {
    Layer::from_stored(layer).map(|l| l.importance()).unwrap_or(0.3)
}

/// `2^(-age_days / 30)`. An empty or unparseable date scores 0.0 rather
/// than erroring — an entry without a date simply never benefits from
/// recency.
pub fn score_recency(date: &str, today: NaiveDate) -> f64 {
    if date.is_empty() {
        return 0.0;
    }
    let Ok(parsed) = NaiveDate::parse_from_str(date, "%Y-%m-%d") else {
        return 0.0;
    };
    let age_days = (today - parsed).num_days() as f64;
    2f64.powf(-age_days / RECENCY_HALF_LIFE_DAYS)
}

/// `log(1 + count) / max(log(1 + count_j))`. No access data, or every
/// count is zero, yields 0.0 for all entries. Takes the access-count map
/// directly — no unused database handle in the signature (see
/// DESIGN.md's Open Question resolution).
pub fn score_frequency(entry_id: &str, access_counts: &HashMap<String, u64>) -> f64 {
    let max = access_counts.values().copied().max().unwrap_or(0);
    if max == 0 {
        return 0.0;
    }
    let count = access_counts.get(entry_id).copied().unwrap_or(0);
    ((1.0 + count as f64).ln()) / ((1.0 + max as f64).ln())
}

/// Weighted sum of the five factors, rounded to 4 decimal places as the
/// spec requires for the surfaced `composite_score`.
pub fn composite_score(breakdown: &ScoreBreakdown, weights: &ScoringWeights) -> f64 {
    let raw = weights.relevance * breakdown.relevance
        + weights.importance * breakdown.importance
        + weights.recency * breakdown.recency
        + weights.proximity * breakdown.proximity
        + weights.frequency * breakdown.frequency;
    (raw * 10_000.0).round() / 10_000.0
}

/// Convenience bundling the five factor computations for one entry
/// inside a batch whose min/max BM25 and access counts are already
/// known to the caller (the pipeline computes these once per batch).
pub fn score_entry(
    entry: &EchoEntry,
    content_for_evidence: &str,
    bm25: f64,
    min_bm25: f64,
    max_bm25: f64,
    context_files: &[String],
    access_counts: &HashMap<String, u64>,
    today: NaiveDate,
) -> ScoreBreakdown {
    let evidence_paths = extract_evidence_paths(content_for_evidence, &entry.source);
    ScoreBreakdown {
        relevance: score_relevance(bm25, min_bm25, max_bm25),
        importance: score_importance(&entry.layer),
        recency: score_recency(&entry.date, today),
        proximity: score_proximity(&evidence_paths, context_files),
        frequency: score_frequency(&entry.id, access_counts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_result_relevance_is_one() {
        assert_eq!(score_relevance(-5.0, -5.0, -5.0), 1.0);
    }

    #[test]
    fn most_negative_bm25_scores_highest_relevance() {
        assert_eq!(score_relevance(-10.0, -10.0, -1.0), 1.0);
        assert_eq!(score_relevance(-1.0, -10.0, -1.0), 0.0);
    }

    #[test]
    fn importance_matches_layer_table() {
        assert_eq!(score_importance("etched"), 1.0);
        assert_eq!(score_importance("notes"), 0.8);
        assert_eq!(score_importance("inscribed"), 0.6);
        assert_eq!(score_importance("observations"), 0.4);
        assert_eq!(score_importance("traced"), 0.3);
        assert_eq!(score_importance("unknown"), 0.3);
    }

    #[test]
    fn recency_today_is_near_one() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 27).unwrap();
        let r = score_recency("2026-07-27", today);
        assert!(r > 0.99);
    }

    #[test]
    fn recency_old_date_is_near_zero() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 27).unwrap();
        let r = score_recency("2020-01-01", today);
        assert!(r < 0.05);
    }

    #[test]
    fn recency_empty_date_is_zero() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 27).unwrap();
        assert_eq!(score_recency("", today), 0.0);
    }

    #[test]
    fn frequency_no_access_data_is_zero() {
        let counts = HashMap::new();
        assert_eq!(score_frequency("e1", &counts), 0.0);
    }

    #[test]
    fn proximity_equal_paths_is_one() {
        assert_eq!(path_proximity("src/foo.rs", "src/foo.rs"), 1.0);
    }

    #[test]
    fn proximity_same_directory_is_point_eight() {
        assert_eq!(path_proximity("src/foo.rs", "src/bar.rs"), 0.8);
    }

    #[test]
    fn proximity_empty_context_is_zero() {
        assert_eq!(score_proximity(&["src/foo.rs".to_string()], &[]), 0.0);
    }

    #[test]
    fn scenario_one_basic_composite() {
        // Single Inscribed entry, today's date, single result.
        let today = NaiveDate::from_ymd_opt(2026, 7, 27).unwrap();
        let breakdown = ScoreBreakdown {
            relevance: score_relevance(-3.0, -3.0, -3.0),
            importance: score_importance("inscribed"),
            recency: score_recency("2026-07-27", today),
            proximity: 0.0,
            frequency: 0.0,
        };
        let composite = composite_score(&breakdown, &ScoringWeights::DEFAULT);
        assert!((composite - 0.7).abs() < 0.01);
    }

    #[test]
    fn evidence_paths_extracted_and_capped() {
        let content = (0..15)
            .map(|i| format!("see `src/mod{i}.rs` for details"))
            .collect::<Vec<_>>()
            .join(" ");
        let paths = extract_evidence_paths(&content, "");
        assert_eq!(paths.len(), MAX_EVIDENCE_PATHS);
    }
}
