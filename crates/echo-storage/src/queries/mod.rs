//! Query modules: one per table family. Each function takes a borrowed
//! `rusqlite::Connection` (or `Transaction`) and returns `EchoResult`.

pub mod access_log;
pub mod entries;
pub mod search_failures;
pub mod semantic_groups;
