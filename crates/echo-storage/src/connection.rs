use std::path::Path;

use rusqlite::Connection;

use echo_core::EchoResult;

use crate::migrations::run_migrations;

/// Open a connection to the echo database at `path`, apply the standard
/// pragmas (WAL journal, 5s busy timeout, foreign keys on) and run any
/// pending schema migrations.
pub fn open_connection(path: &Path) -> EchoResult<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

/// Same as [`open_connection`] but skips migrations, for callers that
/// need a short-lived connection purely to reopen after a reindex closed
/// the prior handle (migrations already ran on this file).
pub fn reopen_connection(path: &Path) -> EchoResult<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> EchoResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", 5_000)?;
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(())
}
