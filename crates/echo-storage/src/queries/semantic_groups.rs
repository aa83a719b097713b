use std::collections::{HashMap, HashSet};

use chrono::Utc;
use rusqlite::{params, Connection};

use echo_core::models::{EchoEntry, SemanticGroup};
use echo_core::EchoResult;

use crate::queries::entries::row_to_entry;
use crate::to_storage_err;

/// Atomically replace the membership rows for the groups the Grouper
/// just computed: `BEGIN`, `INSERT OR REPLACE` every row, `COMMIT`.
pub fn upsert_groups(conn: &mut Connection, groups: &[SemanticGroup]) -> EchoResult<()> {
    let tx = conn.transaction().map_err(rusqlite::Error::from)?;
    {
        let mut stmt = tx
            .prepare(
                "INSERT OR REPLACE INTO semantic_groups(group_id, entry_id, similarity, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(|e| to_storage_err("prepare upsert_groups", e))?;
        for g in groups {
            stmt.execute(params![g.group_id, g.entry_id, g.similarity, g.created_at])
                .map_err(|e| to_storage_err("upsert group row", e))?;
        }
    }
    tx.commit().map_err(rusqlite::Error::from)?;
    Ok(())
}

/// For each of `entry_ids`, the set of group ids it belongs to.
pub fn group_ids_for_entries(
    conn: &Connection,
    entry_ids: &[String],
) -> EchoResult<HashMap<String, Vec<String>>> {
    if entry_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders = entry_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!("SELECT entry_id, group_id FROM semantic_groups WHERE entry_id IN ({placeholders})");
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| to_storage_err("prepare group_ids_for_entries", e))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(entry_ids.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|e| to_storage_err("query group_ids_for_entries", e))?;

    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for row in rows {
        let (entry_id, group_id) = row.map_err(|e| to_storage_err("collect group_ids_for_entries", e))?;
        out.entry(entry_id).or_default().push(group_id);
    }
    Ok(out)
}

/// Other members of `group_ids`, excluding ids already present in
/// `exclude`, as full entries (joined against `echo_entries`) with their
/// membership similarity, one batched `IN` query over both sets.
pub fn group_members(
    conn: &Connection,
    group_ids: &[String],
    exclude: &HashSet<String>,
) -> EchoResult<Vec<(EchoEntry, f64)>> {
    if group_ids.is_empty() {
        return Ok(Vec::new());
    }
    let group_placeholders = group_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT e.id, e.role, e.layer, e.date, e.source, e.tags, e.content, e.line_number, e.file_path,
                sg.similarity
         FROM semantic_groups sg
         JOIN echo_entries e ON e.id = sg.entry_id
         WHERE sg.group_id IN ({group_placeholders})"
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| to_storage_err("prepare group_members", e))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(group_ids.iter()), |row| {
            let entry = row_to_entry(row)?;
            let similarity: f64 = row.get("similarity")?;
            Ok((entry, similarity))
        })
        .map_err(|e| to_storage_err("query group_members", e))?;

    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for row in rows {
        let (entry, similarity) = row.map_err(|e| to_storage_err("collect group_members", e))?;
        if exclude.contains(&entry.id) || !seen.insert(entry.id.clone()) {
            continue;
        }
        out.push((entry, similarity));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;
    use crate::queries::entries::rebuild;

    fn db_with_two_entries() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        rebuild(
            &mut conn,
            &[
                EchoEntry {
                    id: "x".into(),
                    role: "r".into(),
                    layer: "notes".into(),
                    date: String::new(),
                    source: String::new(),
                    tags: String::new(),
                    content: "content x".into(),
                    line_number: 1,
                    file_path: "/a".into(),
                },
                EchoEntry {
                    id: "y".into(),
                    role: "r".into(),
                    layer: "notes".into(),
                    date: String::new(),
                    source: String::new(),
                    tags: String::new(),
                    content: "content y".into(),
                    line_number: 2,
                    file_path: "/b".into(),
                },
            ],
        )
        .unwrap();
        conn
    }

    #[test]
    fn expansion_excludes_already_matched() {
        let mut conn = db_with_two_entries();
        upsert_groups(
            &mut conn,
            &[
                SemanticGroup {
                    group_id: "g1".into(),
                    entry_id: "x".into(),
                    similarity: 0.8,
                    created_at: Utc::now().to_rfc3339(),
                },
                SemanticGroup {
                    group_id: "g1".into(),
                    entry_id: "y".into(),
                    similarity: 0.8,
                    created_at: Utc::now().to_rfc3339(),
                },
            ],
        )
        .unwrap();

        let mut exclude = HashSet::new();
        exclude.insert("x".to_string());
        let members = group_members(&conn, &["g1".to_string()], &exclude).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].0.id, "y");
    }
}
