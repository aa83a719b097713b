use std::path::Path;

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;

use echo_core::EchoResult;
use echo_index::{discover_and_parse, promote_observations, PromotionTarget};
use echo_storage::queries::{access_log, entries::rebuild};
use echo_storage::{open_connection, reopen_connection};

use crate::signal;

/// Entries at this layer with at least this many recorded accesses are
/// promoted to Inscribed before the next parse.
const PROMOTION_THRESHOLD: u64 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct ReindexResult {
    pub entries_indexed: usize,
    pub time_ms: u128,
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observations_promoted: Option<usize>,
}

/// Full reindex routine: promote → parse → rebuild → re-cluster semantic
/// groups. Opens its own connection and closes it before returning so a
/// caller that closed its own connection first can safely reopen
/// afterward.
pub fn do_reindex(echo_dir: &Path, db_path: &Path) -> EchoResult<ReindexResult> {
    let start = std::time::Instant::now();

    let (promoted_count, promoted_files) = {
        let conn = open_connection(db_path)?;
        let targets = select_promotion_targets(&conn)?;
        if targets.is_empty() {
            (0, Vec::new())
        } else {
            let count = targets.len();
            (count, promote_observations(echo_dir, &targets)?)
        }
    };
    if !promoted_files.is_empty() {
        signal::write_dirty(echo_dir);
    }

    let parsed = discover_and_parse(echo_dir);
    let mut roles: Vec<String> = parsed.iter().map(|e| e.role.clone()).collect();
    roles.sort();
    roles.dedup();

    let mut conn = open_connection(db_path)?;
    rebuild(&mut conn, &parsed)?;

    let threshold = echo_core::models::SIMILARITY_THRESHOLD;
    let groups = echo_retrieval::grouper::cluster(&parsed, threshold, &Utc::now().to_rfc3339());
    if !groups.is_empty() {
        echo_storage::queries::semantic_groups::upsert_groups(&mut conn, &groups)?;
    }
    drop(conn);

    let observations_promoted = if promoted_files.is_empty() { None } else { Some(promoted_count) };

    Ok(ReindexResult {
        entries_indexed: parsed.len(),
        time_ms: start.elapsed().as_millis(),
        roles,
        observations_promoted,
    })
}

/// Same routine, but assumes the caller already holds no open connection
/// to `db_path` (used by the tool server's auto-reindex path, which
/// closes its connection before reindexing, then reopens via
/// [`reopen_after_reindex`]).
pub fn reopen_after_reindex(db_path: &Path) -> EchoResult<Connection> {
    reopen_connection(db_path)
}

/// Find every `layer = 'observations'` entry whose access count meets
/// [`PROMOTION_THRESHOLD`], grouped into [`PromotionTarget`]s.
fn select_promotion_targets(conn: &Connection) -> EchoResult<Vec<PromotionTarget>> {
    let mut stmt = conn.prepare("SELECT id, file_path, line_number FROM echo_entries WHERE layer = 'observations'")?;
    let rows: Vec<(String, String, i64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    drop(stmt);

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<String> = rows.iter().map(|(id, _, _)| id.clone()).collect();
    let counts = access_log::batch_access_counts(conn, &ids)?;

    Ok(rows
        .into_iter()
        .filter(|(id, _, _)| counts.get(id).copied().unwrap_or(0) >= PROMOTION_THRESHOLD)
        .map(|(_, file_path, line_number)| PromotionTarget {
            file_path: file_path.into(),
            line_number: line_number as usize,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn reindex_empty_dir_yields_zero_entries() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("echo.db");
        let echo_dir = dir.path().join("echoes");
        fs::create_dir_all(&echo_dir).unwrap();

        let result = do_reindex(&echo_dir, &db).unwrap();
        assert_eq!(result.entries_indexed, 0);
        assert!(result.roles.is_empty());
        assert!(result.observations_promoted.is_none());
    }

    #[test]
    fn reindex_is_idempotent_on_entry_count() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("echo.db");
        let echo_dir = dir.path().join("echoes");
        let role_dir = echo_dir.join("reviewer");
        fs::create_dir_all(&role_dir).unwrap();
        fs::write(
            role_dir.join("MEMORY.md"),
            "## Inscribed — Prefer guard clauses (2026-07-27)\nGuard clauses read clearer.\n",
        )
        .unwrap();

        let first = do_reindex(&echo_dir, &db).unwrap();
        let second = do_reindex(&echo_dir, &db).unwrap();
        assert_eq!(first.entries_indexed, second.entries_indexed);
        assert_eq!(first.entries_indexed, 1);
        assert_eq!(first.roles, vec!["reviewer".to_string()]);
    }

    #[test]
    fn promotes_observations_with_enough_access() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("echo.db");
        let echo_dir = dir.path().join("echoes");
        let role_dir = echo_dir.join("observer");
        fs::create_dir_all(&role_dir).unwrap();
        fs::write(
            &role_dir.join("MEMORY.md"),
            "## Observations — Noticed a pattern (2026-07-01)\nSeen three times now.\n",
        )
        .unwrap();

        do_reindex(&echo_dir, &db).unwrap();

        {
            let conn = open_connection(&db).unwrap();
            let id: String = conn
                .query_row("SELECT id FROM echo_entries WHERE layer = 'observations'", [], |r| r.get(0))
                .unwrap();
            for _ in 0..3 {
                access_log::record_access(&conn, &id, "pattern").unwrap();
            }
        }

        let result = do_reindex(&echo_dir, &db).unwrap();
        assert_eq!(result.observations_promoted, Some(1));

        let text = fs::read_to_string(role_dir.join("MEMORY.md")).unwrap();
        assert!(text.contains("## Inscribed — Noticed a pattern (2026-07-01)"));
    }
}
