//! # echo-retrieval
//!
//! Token sanitization, the five-factor composite scorer, Jaccard-based
//! semantic grouping, the decomposer/reranker capability traits, and the
//! multi-stage [`pipeline::search`] orchestrator that composes all of the
//! above with `echo-storage`.

pub mod capability;
pub mod grouper;
pub mod pipeline;
pub mod scorer;
pub mod tokens;

pub use capability::{Decomposer, ExternalDecomposer, ExternalReranker, PassThrough, Reranker};
pub use pipeline::{search, PipelineContext, PipelineStages};
