//! # echo-core
//!
//! Shared types for the echo memory system: the error taxonomy, the domain
//! models that flow between the storage, index and retrieval crates, and
//! layered configuration (env vars plus the mtime-cached `talisman.yml`
//! snapshot).

pub mod config;
pub mod errors;
pub mod models;

pub use errors::{EchoError, EchoResult};
