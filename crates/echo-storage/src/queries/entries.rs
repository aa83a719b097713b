use chrono::Utc;
use rusqlite::{params, Connection};

use echo_core::models::EchoEntry;
use echo_core::EchoResult;

use crate::to_storage_err;

/// One row returned from an FTS5 match: the parsed entry, its BM25 score
/// (more negative = more relevant) and the 200-char content preview.
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub entry: EchoEntry,
    pub bm25: f64,
    pub content_preview: String,
}

/// Atomically replace the entire entry set: delete all rows (table and
/// FTS shadow), reinsert `entries`, rebuild the FTS index, then prune
/// orphaned/aged access-log and search-failure rows and stamp
/// `last_indexed`. Rolls back on any error.
pub fn rebuild(conn: &mut Connection, entries: &[EchoEntry]) -> EchoResult<()> {
    let tx = conn.transaction().map_err(rusqlite::Error::from)?;

    tx.execute("DELETE FROM echo_entries", [])
        .map_err(|e| to_storage_err("delete echo_entries", e))?;
    tx.execute(
        "INSERT INTO echo_entries_fts(echo_entries_fts) VALUES('delete-all')",
        [],
    )
    .map_err(|e| to_storage_err("fts delete-all", e))?;

    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO echo_entries
                 (id, role, layer, date, source, tags, content, line_number, file_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .map_err(|e| to_storage_err("prepare insert", e))?;
        for entry in entries {
            stmt.execute(params![
                entry.id,
                entry.role,
                entry.layer,
                entry.date,
                entry.source,
                entry.tags,
                entry.content,
                entry.line_number as i64,
                entry.file_path,
            ])
            .map_err(|e| to_storage_err("insert entry", e))?;
        }
    }

    tx.execute(
        "INSERT INTO echo_entries_fts(echo_entries_fts) VALUES('rebuild')",
        [],
    )
    .map_err(|e| to_storage_err("fts rebuild", e))?;

    prune_orphaned_and_aged(&tx)?;

    tx.execute(
        "INSERT INTO echo_meta(key, value) VALUES('last_indexed', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![Utc::now().to_rfc3339()],
    )
    .map_err(|e| to_storage_err("stamp last_indexed", e))?;

    tx.commit().map_err(rusqlite::Error::from)?;
    Ok(())
}

fn prune_orphaned_and_aged(tx: &rusqlite::Transaction<'_>) -> EchoResult<()> {
    tx.execute(
        "DELETE FROM echo_access_log
         WHERE entry_id NOT IN (SELECT id FROM echo_entries)",
        [],
    )
    .map_err(|e| to_storage_err("prune orphaned access log", e))?;

    tx.execute(
        "DELETE FROM echo_access_log
         WHERE accessed_at < ?1",
        params![(Utc::now() - chrono::Duration::days(180)).to_rfc3339()],
    )
    .map_err(|e| to_storage_err("prune aged access log", e))?;

    tx.execute(
        "DELETE FROM echo_search_failures
         WHERE entry_id NOT IN (SELECT id FROM echo_entries)",
        [],
    )
    .map_err(|e| to_storage_err("prune orphaned failures", e))?;

    tx.execute(
        "DELETE FROM echo_search_failures WHERE first_failed_at < ?1",
        params![(Utc::now() - chrono::Duration::days(30)).to_rfc3339()],
    )
    .map_err(|e| to_storage_err("prune aged failures", e))?;

    Ok(())
}

/// Fetch full entries by id, preserving no particular order (callers
/// that need original-request order re-sort client-side). Internally
/// capped at 100 ids regardless of caller-side limits (two-layer
/// defense; the tool layer additionally caps at 50).
pub fn get_by_ids(conn: &Connection, ids: &[String]) -> EchoResult<Vec<EchoEntry>> {
    const INTERNAL_CAP: usize = 100;
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let capped = &ids[..ids.len().min(INTERNAL_CAP)];
    let placeholders = capped.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT id, role, layer, date, source, tags, content, line_number, file_path
         FROM echo_entries WHERE id IN ({placeholders})"
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| to_storage_err("prepare get_by_ids", e))?;
    let params = rusqlite::params_from_iter(capped.iter());
    let rows = stmt
        .query_map(params, row_to_entry)
        .map_err(|e| to_storage_err("query get_by_ids", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| to_storage_err("collect get_by_ids", e))?;
    Ok(rows)
}

/// Run the sanitized FTS query (already ` OR `-joined tokens; never raw
/// user text) and return up to `limit` hits ordered by `bm25 ASC`
/// (most relevant first), optionally filtered by role/layer.
pub fn search_fts(
    conn: &Connection,
    fts_query: &str,
    limit: usize,
    role: Option<&str>,
    layer: Option<&str>,
) -> EchoResult<Vec<FtsHit>> {
    if fts_query.is_empty() {
        return Ok(Vec::new());
    }

    let mut sql = String::from(
        "SELECT e.id, e.role, e.layer, e.date, e.source, e.tags, e.content, e.line_number, e.file_path,
                substr(e.content, 1, 200) AS content_preview,
                bm25(echo_entries_fts) AS score
         FROM echo_entries_fts
         JOIN echo_entries e ON e.rowid = echo_entries_fts.rowid
         WHERE echo_entries_fts MATCH ?1",
    );
    if role.is_some() {
        sql.push_str(" AND e.role = ?2");
    }
    if layer.is_some() {
        sql.push_str(if role.is_some() { " AND e.layer = ?3" } else { " AND e.layer = ?2" });
    }
    sql.push_str(" ORDER BY score ASC LIMIT ?");
    let limit_idx = 1 + role.is_some() as usize + layer.is_some() as usize + 1;
    sql = sql.replacen("LIMIT ?", &format!("LIMIT ?{limit_idx}"), 1);

    let mut stmt = conn.prepare(&sql).map_err(|e| to_storage_err("prepare search_fts", e))?;

    let mut dyn_params: Vec<&dyn rusqlite::ToSql> = vec![&fts_query];
    if let Some(r) = &role {
        dyn_params.push(r);
    }
    if let Some(l) = &layer {
        dyn_params.push(l);
    }
    let limit_i64 = limit as i64;
    dyn_params.push(&limit_i64);

    let rows = stmt
        .query_map(dyn_params.as_slice(), |row| {
            let entry = row_to_entry(row)?;
            let content_preview: String = row.get("content_preview")?;
            let score: f64 = row.get("score")?;
            Ok(FtsHit {
                entry,
                bm25: score,
                content_preview,
            })
        })
        .map_err(|e| to_storage_err("query search_fts", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| to_storage_err("collect search_fts", e))?;

    Ok(rows)
}

pub(crate) fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<EchoEntry> {
    Ok(EchoEntry {
        id: row.get("id")?,
        role: row.get("role")?,
        layer: row.get("layer")?,
        date: row.get("date")?,
        source: row.get("source")?,
        tags: row.get("tags")?,
        content: row.get("content")?,
        line_number: row.get::<_, i64>("line_number")? as usize,
        file_path: row.get("file_path")?,
    })
}

/// Total entry count, by-layer and by-role breakdowns, for `echo_stats`.
pub fn stats(conn: &Connection) -> EchoResult<Stats> {
    let total: i64 = conn
        .query_row("SELECT COUNT(*) FROM echo_entries", [], |r| r.get(0))
        .map_err(|e| to_storage_err("count entries", e))?;

    let mut by_layer = Vec::new();
    {
        let mut stmt = conn
            .prepare("SELECT layer, COUNT(*) FROM echo_entries GROUP BY layer ORDER BY layer")
            .map_err(|e| to_storage_err("prepare by_layer", e))?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
            .map_err(|e| to_storage_err("query by_layer", e))?;
        for row in rows {
            by_layer.push(row.map_err(|e| to_storage_err("collect by_layer", e))?);
        }
    }

    let mut by_role = Vec::new();
    {
        let mut stmt = conn
            .prepare("SELECT role, COUNT(*) FROM echo_entries GROUP BY role ORDER BY role")
            .map_err(|e| to_storage_err("prepare by_role", e))?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
            .map_err(|e| to_storage_err("query by_role", e))?;
        for row in rows {
            by_role.push(row.map_err(|e| to_storage_err("collect by_role", e))?);
        }
    }

    let last_indexed: Option<String> = conn
        .query_row(
            "SELECT value FROM echo_meta WHERE key = 'last_indexed'",
            [],
            |r| r.get(0),
        )
        .ok();

    Ok(Stats {
        total,
        by_layer,
        by_role,
        last_indexed,
    })
}

#[derive(Debug, Clone)]
pub struct Stats {
    pub total: i64,
    pub by_layer: Vec<(String, i64)>,
    pub by_role: Vec<(String, i64)>,
    pub last_indexed: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;

    fn sample_entry() -> EchoEntry {
        EchoEntry {
            id: "abc123".into(),
            role: "reviewer".into(),
            layer: "inscribed".into(),
            date: "2026-07-27".into(),
            source: String::new(),
            tags: "auth review".into(),
            content: "always validate authentication tokens".into(),
            line_number: 3,
            file_path: "/echoes/reviewer/MEMORY.md".into(),
        }
    }

    #[test]
    fn rebuild_then_search_round_trips() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        rebuild(&mut conn, &[sample_entry()]).unwrap();

        let hits = search_fts(&conn, "authentication", 10, None, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.id, "abc123");
    }

    #[test]
    fn rebuild_is_idempotent_on_count() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        rebuild(&mut conn, &[sample_entry()]).unwrap();
        rebuild(&mut conn, &[sample_entry()]).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM echo_entries", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
