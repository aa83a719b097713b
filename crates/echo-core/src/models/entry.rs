use serde::{Deserialize, Serialize};

/// One of the five memory tiers. Governs importance weighting and
/// promotion eligibility (only `Observations` entries are promotion
/// candidates, and only ever to `Inscribed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Etched,
    Inscribed,
    Traced,
    Notes,
    Observations,
}

impl Layer {
    /// Parse a layer name as it appears in an H2 header, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "Etched" => Some(Layer::Etched),
            "Inscribed" => Some(Layer::Inscribed),
            "Traced" => Some(Layer::Traced),
            "Notes" => Some(Layer::Notes),
            "Observations" => Some(Layer::Observations),
            _ => None,
        }
    }

    /// Lower-cased string form, as stored in `echo_entries.layer`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Etched => "etched",
            Layer::Inscribed => "inscribed",
            Layer::Traced => "traced",
            Layer::Notes => "notes",
            Layer::Observations => "observations",
        }
    }

    /// Inverse of [`Layer::as_str`]; unknown strings fall back to `Traced`
    /// importance bucket behavior via `importance()`, but parsing itself
    /// only succeeds for a recognized lower-case name.
    pub fn from_stored(s: &str) -> Option<Self> {
        match s {
            "etched" => Some(Layer::Etched),
            "inscribed" => Some(Layer::Inscribed),
            "traced" => Some(Layer::Traced),
            "notes" => Some(Layer::Notes),
            "observations" => Some(Layer::Observations),
            _ => None,
        }
    }

    /// Importance factor used by the composite scorer.
    pub fn importance(&self) -> f64 {
        match self {
            Layer::Etched => 1.0,
            Layer::Notes => 0.8,
            Layer::Inscribed => 0.6,
            Layer::Observations => 0.4,
            Layer::Traced => 0.3,
        }
    }
}

/// The atomic unit of memory: one H2 section inside a role's `MEMORY.md`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoEntry {
    /// 16 hex char id, deterministic over (role, line_number, file_path).
    pub id: String,
    pub role: String,
    pub layer: String,
    /// ISO `YYYY-MM-DD`, possibly empty.
    pub date: String,
    /// Free text, typically backtick-quoted in the source file; empty if absent.
    pub source: String,
    /// Title text after the layer/dash separator.
    pub tags: String,
    pub content: String,
    pub line_number: usize,
    pub file_path: String,
}

/// `echo_search_failures` row: a query fingerprint that failed to surface
/// a match, tracked for retry injection on a later, textually-different
/// but tokenically-equivalent query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedMatch {
    pub row_id: i64,
    pub entry_id: String,
    pub token_fingerprint: String,
    pub retry_count: i64,
    pub first_failed_at: String,
    pub last_retried_at: Option<String>,
}

pub const MAX_RETRY_COUNT: i64 = 3;
pub const FAILURE_MAX_AGE_DAYS: i64 = 30;
