mod env;
mod talisman;
mod weights;

pub use env::EnvConfig;
pub use talisman::{TalismanLoader, TalismanSnapshot};
pub use weights::ScoringWeights;
