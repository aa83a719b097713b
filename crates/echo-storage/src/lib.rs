//! # echo-storage
//!
//! SQLite persistence layer for the echo memory system: a single WAL
//! connection, schema migrations keyed by `PRAGMA user_version`, and the
//! query modules for entries, the access log, semantic groups and search
//! failures.

pub mod connection;
pub mod migrations;
pub mod queries;

pub use connection::{open_connection, reopen_connection};

/// Wrap a rusqlite error as an `EchoError::Storage` with additional
/// context.
pub fn to_storage_err(context: &str, err: rusqlite::Error) -> echo_core::EchoError {
    echo_core::EchoError::Storage(format!("{context}: {err}"))
}
