use serde::{Deserialize, Serialize};

use super::entry::EchoEntry;

/// Per-factor breakdown behind a composite score, surfaced to callers for
/// transparency (`echo_search` responses carry this alongside the entry).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub relevance: f64,
    pub importance: f64,
    pub recency: f64,
    pub proximity: f64,
    pub frequency: f64,
}

/// An [`EchoEntry`] annotated with its composite score and provenance
/// flags set by later pipeline stages (group expansion, retry injection,
/// external rerank).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredEntry {
    #[serde(flatten)]
    pub entry: EchoEntry,
    pub content_preview: String,
    pub composite_score: f64,
    pub breakdown: ScoreBreakdown,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expansion_source: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retry_source: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
}

pub const RERANK_THRESHOLD: usize = 25;
pub const RERANK_MAX_CANDIDATES: usize = 40;
pub const GROUP_EXPANSION_DISCOUNT_DEFAULT: f64 = 0.7;
