use std::collections::HashMap;

use chrono::Utc;
use rusqlite::{params, Connection};

use echo_core::models::{ACCESS_COUNT_BATCH_CAP, ACCESS_LOG_MAX_ROWS, ACCESS_LOG_PRUNE_TO};
use echo_core::EchoResult;

use crate::to_storage_err;

/// Append one access event and, if the table has grown past
/// `ACCESS_LOG_MAX_ROWS`, prune down to the newest `ACCESS_LOG_PRUNE_TO`
/// rows by `accessed_at`. Errors here are non-fatal to a search; callers
/// should log and swallow rather than fail the surrounding request.
pub fn record_access(conn: &Connection, entry_id: &str, query: &str) -> EchoResult<()> {
    let truncated_query: String = query.chars().take(500).collect();
    conn.execute(
        "INSERT INTO echo_access_log(entry_id, accessed_at, query) VALUES (?1, ?2, ?3)",
        params![entry_id, Utc::now().to_rfc3339(), truncated_query],
    )
    .map_err(|e| to_storage_err("insert access log row", e))?;

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM echo_access_log", [], |r| r.get(0))
        .map_err(|e| to_storage_err("count access log", e))?;

    if count > ACCESS_LOG_MAX_ROWS {
        conn.execute(
            "DELETE FROM echo_access_log WHERE row_id NOT IN (
                 SELECT row_id FROM echo_access_log ORDER BY accessed_at DESC LIMIT ?1
             )",
            params![ACCESS_LOG_PRUNE_TO],
        )
        .map_err(|e| to_storage_err("prune access log", e))?;
    }

    Ok(())
}

/// Batch-fetch access counts for up to `ACCESS_COUNT_BATCH_CAP` (200)
/// entry ids in a single `IN (...)` query. Ids beyond the cap are
/// silently not counted (documented sampling bound; see DESIGN.md Open
/// Question resolution — raising this requires a separate config knob).
pub fn batch_access_counts(conn: &Connection, entry_ids: &[String]) -> EchoResult<HashMap<String, u64>> {
    if entry_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let capped = &entry_ids[..entry_ids.len().min(ACCESS_COUNT_BATCH_CAP)];
    let placeholders = capped.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT entry_id, COUNT(*) FROM echo_access_log
         WHERE entry_id IN ({placeholders}) GROUP BY entry_id"
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| to_storage_err("prepare batch_access_counts", e))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(capped.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })
        .map_err(|e| to_storage_err("query batch_access_counts", e))?;

    let mut out = HashMap::new();
    for row in rows {
        let (id, count) = row.map_err(|e| to_storage_err("collect batch_access_counts", e))?;
        out.insert(id, count);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;
    use crate::queries::entries::rebuild;
    use echo_core::models::EchoEntry;

    fn db_with_one_entry() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        rebuild(
            &mut conn,
            &[EchoEntry {
                id: "e1".into(),
                role: "r".into(),
                layer: "notes".into(),
                date: String::new(),
                source: String::new(),
                tags: String::new(),
                content: "hello world".into(),
                line_number: 1,
                file_path: "/x/MEMORY.md".into(),
            }],
        )
        .unwrap();
        conn
    }

    #[test]
    fn records_and_counts_access() {
        let conn = db_with_one_entry();
        record_access(&conn, "e1", "hello").unwrap();
        record_access(&conn, "e1", "hello").unwrap();
        let counts = batch_access_counts(&conn, &["e1".to_string()]).unwrap();
        assert_eq!(counts.get("e1"), Some(&2));
    }

    #[test]
    fn prunes_when_over_cap() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO echo_entries(id, role, layer, date, source, tags, content, line_number, file_path)
             VALUES ('e1','r','notes','','','','c',1,'/x')",
        )
        .unwrap();
        // Simulate an access log already at the cap boundary by inserting
        // ACCESS_LOG_MAX_ROWS + 1 rows directly, then one more write.
        for i in 0..(ACCESS_LOG_MAX_ROWS) {
            conn.execute(
                "INSERT INTO echo_access_log(entry_id, accessed_at, query) VALUES ('e1', ?1, '')",
                params![format!("2020-01-01T00:00:{:02}Z", i % 60)],
            )
            .unwrap();
        }
        record_access(&conn, "e1", "q").unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM echo_access_log", [], |r| r.get(0))
            .unwrap();
        assert!(count <= ACCESS_LOG_PRUNE_TO);
    }
}
