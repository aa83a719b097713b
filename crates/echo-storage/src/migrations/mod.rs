use rusqlite::Connection;
use tracing::{debug, info};

use echo_core::{EchoError, EchoResult};

mod v001_initial;
mod v002_groups_and_failures;

type MigrationFn = fn(&Connection) -> EchoResult<()>;

const MIGRATIONS: [(u32, &str, MigrationFn); 2] = [
    (1, "initial schema: entries, meta, access log, fts5", v001_initial::migrate),
    (
        2,
        "semantic groups + search failures",
        v002_groups_and_failures::migrate,
    ),
];

pub const LATEST_VERSION: u32 = 2;

/// Read `PRAGMA user_version`.
pub fn current_version(conn: &Connection) -> EchoResult<u32> {
    let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

/// Apply every migration whose version exceeds the database's current
/// `user_version`, in order, each inside its own `BEGIN IMMEDIATE` /
/// `COMMIT` transaction. Any failure rolls back that one migration and
/// propagates, leaving the database at the last successfully applied
/// version.
pub fn run_migrations(conn: &Connection) -> EchoResult<()> {
    let mut version = current_version(conn)?;
    debug!(version, "checking schema migrations");

    for (target, description, migrate) in MIGRATIONS {
        if target <= version {
            continue;
        }

        info!(target, description, "applying migration");
        conn.execute_batch("BEGIN IMMEDIATE")?;

        match migrate(conn) {
            Ok(()) => {
                conn.pragma_update(None, "user_version", target)?;
                conn.execute_batch("COMMIT")?;
                version = target;
            }
            Err(e) => {
                conn.execute_batch("ROLLBACK")?;
                return Err(EchoError::MigrationFailed {
                    version: target,
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrates_fresh_db_to_latest() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }
}
