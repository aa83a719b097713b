use rusqlite::Connection;

use echo_core::EchoResult;

pub fn migrate(conn: &Connection) -> EchoResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE semantic_groups (
            group_id   TEXT NOT NULL,
            entry_id   TEXT NOT NULL,
            similarity REAL NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (group_id, entry_id),
            FOREIGN KEY (entry_id) REFERENCES echo_entries(id) ON DELETE CASCADE
        );
        CREATE INDEX idx_semantic_groups_entry_id ON semantic_groups(entry_id);

        CREATE TABLE echo_search_failures (
            row_id            INTEGER PRIMARY KEY AUTOINCREMENT,
            entry_id          TEXT NOT NULL,
            token_fingerprint TEXT NOT NULL,
            retry_count       INTEGER NOT NULL DEFAULT 0,
            first_failed_at   TEXT NOT NULL,
            last_retried_at   TEXT,
            UNIQUE (entry_id, token_fingerprint)
        );
        CREATE INDEX idx_search_failures_fingerprint ON echo_search_failures(token_fingerprint);
        ",
    )?;
    Ok(())
}
