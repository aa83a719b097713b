use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use echo_core::models::{EchoEntry, SemanticGroup, MAX_GROUP_SIZE, SIMILARITY_THRESHOLD};

use crate::tokens::{stopwords, token_re};

fn evidence_backtick_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`([^`]+\.[a-z]{1,6})`").unwrap())
}

fn lower_basename(path: &str) -> Option<String> {
    Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

/// Basenames (whole, lowercased strings — never split further) of every
/// evidence path referenced by the entry, unioned with its own
/// `file_path` basename: backtick-quoted path-shaped tokens in
/// `content`, whitespace-delimited path tokens with no `:` in `source`,
/// and the entry's own file.
fn evidence_basenames(entry: &EchoEntry) -> HashSet<String> {
    let mut out = HashSet::new();

    for caps in evidence_backtick_re().captures_iter(&entry.content) {
        let candidate = &caps[1];
        if candidate.contains('/') {
            if let Some(base) = lower_basename(candidate) {
                out.insert(base);
            }
        }
    }

    for token in entry.source.split_whitespace() {
        if token.contains('/') && !token.contains(':') {
            if let Some(base) = lower_basename(token) {
                out.insert(base);
            }
        }
    }

    if !entry.file_path.is_empty() {
        if let Some(base) = lower_basename(&entry.file_path) {
            out.insert(base);
        }
    }

    out
}

/// Lowercased, stopword-and-length-filtered tokens of `text` — the same
/// filter §4.3's FTS sanitization applies, minus its token cap and
/// empty-set stopword-filter fallback (clustering has no "must return
/// something" requirement the way a search query does).
fn tokenize_for_grouping(text: &str) -> HashSet<String> {
    token_re()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|t| t.len() >= 2 && !stopwords().contains(t.as_str()))
        .collect()
}

/// A bag-of-words feature set for one entry: evidence-path basenames
/// (plus the entry's own file basename) unioned with stopword-filtered
/// content+tags tokens. Jaccard similarity over this set is the
/// clustering signal — no embeddings, no external model calls.
fn feature_set(entry: &EchoEntry) -> HashSet<String> {
    let mut set = evidence_basenames(entry);
    let combined = format!("{} {}", entry.content, entry.tags);
    set.extend(tokenize_for_grouping(&combined));
    set
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

/// Cluster `entries` by pairwise Jaccard similarity over a bag-of-words
/// feature set (file basename + tags + content). Pairs at or above
/// `threshold` (spec default 0.3) are merged transitively via
/// union-find; clusters below 2 members are dropped. Clusters larger
/// than `MAX_GROUP_SIZE` are chunked, the highest-similarity members
/// kept together first, overflow starting a fresh group with a new id.
///
/// Returns the list of [`SemanticGroup`] rows ready for
/// `echo_storage::queries::semantic_groups::upsert_groups`, along with
/// the similarity recorded against the max pairwise similarity the
/// member had to any other member of its final group.
pub fn cluster(entries: &[EchoEntry], threshold: f64, created_at: &str) -> Vec<SemanticGroup> {
    let threshold = if threshold > 0.0 { threshold } else { SIMILARITY_THRESHOLD };
    if entries.len() < 2 {
        return Vec::new();
    }

    let features: Vec<HashSet<String>> = entries.iter().map(feature_set).collect();
    let mut uf = UnionFind::new(entries.len());
    let mut best_similarity: Vec<f64> = vec![0.0; entries.len()];

    for i in 0..entries.len() {
        for j in (i + 1)..entries.len() {
            let sim = jaccard(&features[i], &features[j]);
            if sim >= threshold {
                uf.union(i, j);
                best_similarity[i] = best_similarity[i].max(sim);
                best_similarity[j] = best_similarity[j].max(sim);
            }
        }
    }

    let mut clusters: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..entries.len() {
        let root = uf.find(i);
        clusters.entry(root).or_default().push(i);
    }

    let mut groups = Vec::new();

    for (_, mut members) in clusters {
        if members.len() < 2 {
            continue;
        }
        members.sort_by(|a, b| best_similarity[*b].partial_cmp(&best_similarity[*a]).unwrap());

        for chunk in members.chunks(MAX_GROUP_SIZE) {
            if chunk.len() < 2 {
                continue;
            }
            let group_id = group_id_for_members(chunk.iter().map(|&idx| entries[idx].id.as_str()));
            for &idx in chunk {
                groups.push(SemanticGroup {
                    group_id: group_id.clone(),
                    entry_id: entries[idx].id.clone(),
                    similarity: best_similarity[idx],
                    created_at: created_at.to_string(),
                });
            }
        }
    }

    groups
}

/// Deterministic 16-hex group id over the chunk's sorted member ids, the
/// same derivation style as `echo_index::id::generate_id`: stable across
/// repeated reindexes of an unchanged cluster instead of a counter that
/// would renumber on every rebuild.
fn group_id_for_members<'a>(ids: impl Iterator<Item = &'a str>) -> String {
    let mut sorted: Vec<&str> = ids.collect();
    sorted.sort_unstable();
    let digest = Sha256::digest(sorted.join(",").as_bytes());
    hex::encode(digest)[..16].to_string()
}
