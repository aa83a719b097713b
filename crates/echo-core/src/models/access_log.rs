use serde::{Deserialize, Serialize};

/// Append-only access event row. Capped store-wide at 100,000 rows; on
/// overflow the newest 90,000 (by `accessed_at` desc) survive a prune.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogRow {
    pub row_id: i64,
    pub entry_id: String,
    pub accessed_at: String,
    /// Truncated to 500 chars at write time.
    pub query: String,
}

pub const ACCESS_LOG_MAX_ROWS: i64 = 100_000;
pub const ACCESS_LOG_PRUNE_TO: i64 = 90_000;
pub const ACCESS_LOG_MAX_AGE_DAYS: i64 = 180;
pub const ACCESS_COUNT_BATCH_CAP: usize = 200;
