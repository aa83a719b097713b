//! # echo-index
//!
//! Discovery and parsing of `MEMORY.md` files into [`echo_core::models::EchoEntry`]
//! values, plus the Observations→Inscribed promoter that rewrites those
//! files in place.

pub mod discovery;
pub mod id;
pub mod parser;
pub mod promoter;

pub use discovery::discover_and_parse;
pub use id::generate_id;
pub use parser::parse_memory_file;
pub use promoter::{promote_observations, PromotionTarget};
