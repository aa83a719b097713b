mod access_log;
mod entry;
mod group;
mod score;

pub use access_log::AccessLogRow;
pub use entry::{EchoEntry, FailedMatch, Layer};
pub use group::{SemanticGroup, MAX_GROUP_SIZE, SIMILARITY_THRESHOLD};
pub use score::{ScoreBreakdown, ScoredEntry, GROUP_EXPANSION_DISCOUNT_DEFAULT, RERANK_MAX_CANDIDATES, RERANK_THRESHOLD};
