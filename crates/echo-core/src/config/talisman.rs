use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use serde::Deserialize;

use crate::models::{GROUP_EXPANSION_DISCOUNT_DEFAULT, RERANK_MAX_CANDIDATES, RERANK_THRESHOLD};

/// Flattened, defaulted view of the `echoes:` section of `talisman.yml`.
/// Unknown or malformed YAML degrades to [`TalismanSnapshot::default`]
/// (every optional stage disabled) rather than failing startup.
#[derive(Debug, Clone, PartialEq)]
pub struct TalismanSnapshot {
    pub decomposition_enabled: bool,
    pub decomposer_command: Option<String>,
    pub reranking_enabled: bool,
    pub reranking_threshold: usize,
    pub reranking_max_candidates: usize,
    pub reranking_timeout_secs: f64,
    pub reranker_command: Option<String>,
    pub retry_enabled: bool,
    pub semantic_groups_expansion_enabled: bool,
    pub semantic_groups_discount: f64,
    pub semantic_groups_max_expansion: usize,
}

impl Default for TalismanSnapshot {
    fn default() -> Self {
        Self {
            decomposition_enabled: false,
            decomposer_command: None,
            reranking_enabled: false,
            reranking_threshold: RERANK_THRESHOLD,
            reranking_max_candidates: RERANK_MAX_CANDIDATES,
            reranking_timeout_secs: 4.0,
            reranker_command: None,
            retry_enabled: false,
            semantic_groups_expansion_enabled: false,
            semantic_groups_discount: GROUP_EXPANSION_DISCOUNT_DEFAULT,
            semantic_groups_max_expansion: 5,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawRoot {
    #[serde(default)]
    echoes: RawEchoes,
}

#[derive(Debug, Default, Deserialize)]
struct RawEchoes {
    decomposition: Option<RawDecomposition>,
    reranking: Option<RawReranking>,
    retry: Option<RawRetry>,
    semantic_groups: Option<RawSemanticGroups>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDecomposition {
    enabled: Option<bool>,
    command: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawReranking {
    enabled: Option<bool>,
    threshold: Option<usize>,
    max_candidates: Option<usize>,
    timeout: Option<f64>,
    command: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRetry {
    enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSemanticGroups {
    expansion_enabled: Option<bool>,
    discount: Option<f64>,
    max_expansion: Option<usize>,
}

impl TalismanSnapshot {
    fn from_raw(raw: RawRoot) -> Self {
        let defaults = Self::default();
        let (decomposition_enabled, decomposer_command) = match raw.echoes.decomposition {
            Some(d) => (d.enabled.unwrap_or(defaults.decomposition_enabled), d.command),
            None => (defaults.decomposition_enabled, None),
        };
        let (reranking_enabled, reranking_threshold, reranking_max_candidates, reranking_timeout_secs, reranker_command) =
            match raw.echoes.reranking {
                Some(r) => (
                    r.enabled.unwrap_or(defaults.reranking_enabled),
                    r.threshold.unwrap_or(defaults.reranking_threshold),
                    r.max_candidates.unwrap_or(defaults.reranking_max_candidates),
                    r.timeout.unwrap_or(defaults.reranking_timeout_secs),
                    r.command,
                ),
                None => (
                    defaults.reranking_enabled,
                    defaults.reranking_threshold,
                    defaults.reranking_max_candidates,
                    defaults.reranking_timeout_secs,
                    None,
                ),
            };
        let retry_enabled = raw
            .echoes
            .retry
            .and_then(|r| r.enabled)
            .unwrap_or(defaults.retry_enabled);
        let (semantic_groups_expansion_enabled, semantic_groups_discount, semantic_groups_max_expansion) =
            match raw.echoes.semantic_groups {
                Some(g) => (
                    g.expansion_enabled
                        .unwrap_or(defaults.semantic_groups_expansion_enabled),
                    g.discount
                        .map(|d| d.clamp(0.0, 1.0))
                        .unwrap_or(defaults.semantic_groups_discount),
                    g.max_expansion.unwrap_or(defaults.semantic_groups_max_expansion),
                ),
                None => (
                    defaults.semantic_groups_expansion_enabled,
                    defaults.semantic_groups_discount,
                    defaults.semantic_groups_max_expansion,
                ),
            };

        Self {
            decomposition_enabled,
            decomposer_command,
            reranking_enabled,
            reranking_threshold,
            reranking_max_candidates,
            reranking_timeout_secs,
            reranker_command,
            retry_enabled,
            semantic_groups_expansion_enabled,
            semantic_groups_discount,
            semantic_groups_max_expansion,
        }
    }

    fn parse(text: &str) -> Self {
        match serde_yaml::from_str::<RawRoot>(text) {
            Ok(raw) => Self::from_raw(raw),
            Err(e) => {
                tracing::warn!("malformed talisman.yml, disabling optional stages: {e}");
                Self::default()
            }
        }
    }
}

struct Cached {
    mtime: SystemTime,
    snapshot: Arc<TalismanSnapshot>,
}

/// mtime-cached loader: reloads `talisman.yml` only when its mtime
/// changes, otherwise returns the cached [`TalismanSnapshot`] behind an
/// `Arc`. The snapshot pointer is swapped atomically on reload; readers
/// never block a writer and vice versa beyond the `RwLock` critical
/// section itself (the "global-mutable substitution" of the design notes).
pub struct TalismanLoader {
    path: Option<PathBuf>,
    cache: RwLock<Option<Cached>>,
}

impl TalismanLoader {
    /// Search order: `<echo_dir>/../talisman.yml`, then
    /// `<config_dir>/talisman.yml`. The first path that exists wins; if
    /// neither exists the loader always returns the default snapshot.
    pub fn discover(echo_dir: Option<&Path>, config_dir: Option<&Path>) -> Self {
        let candidate_a = echo_dir.and_then(|d| d.parent()).map(|p| p.join("talisman.yml"));
        let candidate_b = config_dir.map(|d| d.join("talisman.yml"));

        let path = [candidate_a, candidate_b]
            .into_iter()
            .flatten()
            .find(|p| p.is_file());

        Self {
            path,
            cache: RwLock::new(None),
        }
    }

    /// Return the current snapshot, reloading from disk if the file's
    /// mtime has changed since the last load (or on first call).
    pub fn load(&self) -> Arc<TalismanSnapshot> {
        let Some(path) = &self.path else {
            return Arc::new(TalismanSnapshot::default());
        };

        let mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();

        if let (Some(mtime), Ok(guard)) = (mtime, self.cache.read()) {
            if let Some(cached) = guard.as_ref() {
                if cached.mtime == mtime {
                    return cached.snapshot.clone();
                }
            }
        }

        let snapshot = Arc::new(match std::fs::read_to_string(path) {
            Ok(text) => TalismanSnapshot::parse(&text),
            Err(e) => {
                tracing::warn!("could not read talisman.yml at {}: {e}", path.display());
                TalismanSnapshot::default()
            }
        });

        if let (Some(mtime), Ok(mut guard)) = (mtime, self.cache.write()) {
            *guard = Some(Cached {
                mtime,
                snapshot: snapshot.clone(),
            });
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_yaml_degrades_to_default() {
        let snap = TalismanSnapshot::parse("not: [valid, yaml: structure");
        assert_eq!(snap, TalismanSnapshot::default());
    }

    #[test]
    fn parses_known_sections() {
        let yaml = r#"
echoes:
  decomposition:
    enabled: true
  reranking:
    enabled: true
    threshold: 10
    max_candidates: 20
    timeout: 2.5
  retry:
    enabled: true
  semantic_groups:
    expansion_enabled: true
    discount: 0.5
    max_expansion: 5
"#;
        let snap = TalismanSnapshot::parse(yaml);
        assert!(snap.decomposition_enabled);
        assert!(snap.reranking_enabled);
        assert_eq!(snap.reranking_threshold, 10);
        assert_eq!(snap.semantic_groups_max_expansion, 5);
        assert!((snap.semantic_groups_discount - 0.5).abs() < 1e-9);
    }

    #[test]
    fn missing_file_yields_default() {
        let loader = TalismanLoader::discover(None, None);
        assert_eq!(*loader.load(), TalismanSnapshot::default());
    }
}
