use rusqlite::Connection;

use echo_core::EchoResult;

pub fn migrate(conn: &Connection) -> EchoResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE echo_entries (
            id          TEXT PRIMARY KEY,
            role        TEXT NOT NULL,
            layer       TEXT NOT NULL,
            date        TEXT NOT NULL DEFAULT '',
            source      TEXT NOT NULL DEFAULT '',
            tags        TEXT NOT NULL DEFAULT '',
            content     TEXT NOT NULL,
            line_number INTEGER NOT NULL,
            file_path   TEXT NOT NULL
        );

        CREATE TABLE echo_meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE echo_access_log (
            row_id      INTEGER PRIMARY KEY AUTOINCREMENT,
            entry_id    TEXT NOT NULL,
            accessed_at TEXT NOT NULL,
            query       TEXT NOT NULL DEFAULT ''
        );
        CREATE INDEX idx_access_log_entry_id ON echo_access_log(entry_id);
        CREATE INDEX idx_access_log_accessed_at ON echo_access_log(accessed_at);

        CREATE VIRTUAL TABLE echo_entries_fts USING fts5(
            content,
            tags,
            source,
            content = 'echo_entries',
            content_rowid = 'rowid',
            tokenize = 'porter unicode61'
        );
        ",
    )?;
    Ok(())
}
