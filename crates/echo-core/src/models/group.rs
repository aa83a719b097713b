use serde::{Deserialize, Serialize};

/// A row of the `semantic_groups` table: membership of `entry_id` in
/// `group_id` with the similarity score that earned it the slot. Primary
/// key is `(group_id, entry_id)`; an entry may belong to several groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticGroup {
    pub group_id: String,
    pub entry_id: String,
    pub similarity: f64,
    pub created_at: String,
}

pub const SIMILARITY_THRESHOLD: f64 = 0.3;
pub const MAX_GROUP_SIZE: usize = 20;
