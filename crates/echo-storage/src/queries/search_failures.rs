use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use echo_core::models::{FailedMatch, FAILURE_MAX_AGE_DAYS, MAX_RETRY_COUNT};
use echo_core::EchoResult;

use crate::to_storage_err;

/// Record a no-match for `(entry_id, fingerprint)`. If the pair is new,
/// insert with `retry_count = 0`. If it already exists and is below the
/// retry cap, increment and bump `last_retried_at`. At the cap, no-op.
pub fn record_failure(conn: &Connection, entry_id: &str, fingerprint: &str) -> EchoResult<()> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT retry_count FROM echo_search_failures WHERE entry_id = ?1 AND token_fingerprint = ?2",
            params![entry_id, fingerprint],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| to_storage_err("lookup search failure", e))?;

    match existing {
        None => {
            conn.execute(
                "INSERT INTO echo_search_failures(entry_id, token_fingerprint, retry_count, first_failed_at)
                 VALUES (?1, ?2, 0, ?3)",
                params![entry_id, fingerprint, Utc::now().to_rfc3339()],
            )
            .map_err(|e| to_storage_err("insert search failure", e))?;
        }
        Some(count) if count < MAX_RETRY_COUNT => {
            conn.execute(
                "UPDATE echo_search_failures SET retry_count = retry_count + 1, last_retried_at = ?3
                 WHERE entry_id = ?1 AND token_fingerprint = ?2",
                params![entry_id, fingerprint, Utc::now().to_rfc3339()],
            )
            .map_err(|e| to_storage_err("update search failure", e))?;
        }
        Some(_) => {}
    }
    Ok(())
}

/// Retry candidates for `fingerprint`: `retry_count < 3`,
/// `first_failed_at` within the last 30 days, not already in
/// `already_matched`.
pub fn retry_entries(
    conn: &Connection,
    fingerprint: &str,
    already_matched: &[String],
) -> EchoResult<Vec<FailedMatch>> {
    let cutoff = (Utc::now() - chrono::Duration::days(FAILURE_MAX_AGE_DAYS)).to_rfc3339();

    let mut stmt = conn
        .prepare(
            "SELECT row_id, entry_id, token_fingerprint, retry_count, first_failed_at, last_retried_at
             FROM echo_search_failures
             WHERE token_fingerprint = ?1 AND retry_count < ?2 AND first_failed_at >= ?3",
        )
        .map_err(|e| to_storage_err("prepare retry_entries", e))?;

    let rows = stmt
        .query_map(params![fingerprint, MAX_RETRY_COUNT, cutoff], |row| {
            Ok(FailedMatch {
                row_id: row.get(0)?,
                entry_id: row.get(1)?,
                token_fingerprint: row.get(2)?,
                retry_count: row.get(3)?,
                first_failed_at: row.get(4)?,
                last_retried_at: row.get(5)?,
            })
        })
        .map_err(|e| to_storage_err("query retry_entries", e))?;

    let mut out = Vec::new();
    for row in rows {
        let fm = row.map_err(|e| to_storage_err("collect retry_entries", e))?;
        if !already_matched.contains(&fm.entry_id) {
            out.push(fm);
        }
    }
    Ok(out)
}

/// Delete the `(entry_id, fingerprint)` row on a confirmed match.
pub fn reset_failure(conn: &Connection, entry_id: &str, fingerprint: &str) -> EchoResult<()> {
    conn.execute(
        "DELETE FROM echo_search_failures WHERE entry_id = ?1 AND token_fingerprint = ?2",
        params![entry_id, fingerprint],
    )
    .map_err(|e| to_storage_err("delete search failure", e))?;
    Ok(())
}

/// Delete rows older than `FAILURE_MAX_AGE_DAYS`. Called unconditionally
/// during reindex (via `entries::rebuild`) and probabilistically (1%)
/// from the search path.
pub fn cleanup_aged_failures(conn: &Connection) -> EchoResult<()> {
    let cutoff = (Utc::now() - chrono::Duration::days(FAILURE_MAX_AGE_DAYS)).to_rfc3339();
    conn.execute(
        "DELETE FROM echo_search_failures WHERE first_failed_at < ?1",
        params![cutoff],
    )
    .map_err(|e| to_storage_err("cleanup aged failures", e))?;
    Ok(())
}
