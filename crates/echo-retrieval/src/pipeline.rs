use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rusqlite::Connection;

use echo_core::config::{ScoringWeights, TalismanSnapshot};
use echo_core::models::{EchoEntry, ScoreBreakdown, ScoredEntry};
use echo_storage::queries::{access_log, entries, search_failures, semantic_groups};

use crate::capability::{Decomposer, Reranker};
use crate::scorer;
use crate::tokens;

const MAX_OVERFETCH: usize = 150;
const OVERFETCH_FACTOR: usize = 3;
/// Synthetic BM25 stand-in for a retry-injected entry: `-1.0 * 1.2`. All
/// retry entries in a call share this value, so their own composite-score
/// batch has `min == max` and relevance normalizes to 1.0 uniformly.
const RETRY_SYNTHETIC_BM25: f64 = -1.2;

/// The capability seam the pipeline needs beyond the database: the
/// decomposer/reranker subprocess stages and the loaded config/weight
/// snapshots. Constructed once per tool-server process (or per test) and
/// reused across calls; `talisman` is re-fetched from its mtime-cached
/// loader by the caller on every call for hot-reload support (see
/// `TalismanLoader`), so this struct borrows it fresh per search.
pub struct PipelineContext {
    pub decomposer: Arc<dyn Decomposer>,
    pub reranker: Arc<dyn Reranker>,
    pub weights: ScoringWeights,
    pub talisman: Arc<TalismanSnapshot>,
    pub trace: bool,
}

/// Which optional stages actually ran on a given call, surfaced for
/// tests and for `RUNE_TRACE` diagnostics rather than to the RPC caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineStages {
    pub decomposed: bool,
    pub group_expansion: bool,
    pub retry_injection: bool,
    pub reranked: bool,
}

struct Candidate {
    entry: EchoEntry,
    bm25: f64,
    content_preview: String,
}

fn trace(ctx: &PipelineContext, stage: &str, start: Instant) {
    if ctx.trace {
        tracing::debug!(stage, ms = start.elapsed().as_millis() as u64, "[echo-search] stage timing");
    }
}

/// Run the full multi-pass retrieval pipeline for one query: decomposition
/// (optional) -> per-facet FTS -> merge -> composite scoring -> semantic
/// group expansion (optional) -> retry injection (optional) -> LLM rerank
/// (optional) -> truncate to `limit`. Stages execute strictly in this
/// order within one call. Does not write the access log; callers do that
/// synchronously after this returns.
pub async fn search(
    conn: &Connection,
    ctx: &PipelineContext,
    query: &str,
    limit: usize,
    layer: Option<&str>,
    role: Option<&str>,
    context_files: &[String],
) -> echo_core::EchoResult<(Vec<ScoredEntry>, PipelineStages)> {
    let pipeline_start = Instant::now();
    let mut stages = PipelineStages::default();
    let overfetch_limit = (limit.saturating_mul(OVERFETCH_FACTOR)).min(MAX_OVERFETCH).max(1);

    // Stage 1: decomposition.
    let t0 = Instant::now();
    let facets = if ctx.talisman.decomposition_enabled {
        let facets = ctx.decomposer.decompose(query).await;
        stages.decomposed = facets.len() > 1;
        if facets.is_empty() {
            vec![query.to_string()]
        } else {
            facets
        }
    } else {
        vec![query.to_string()]
    };
    trace(ctx, "decomposition", t0);

    // Stage 2: per-facet FTS.
    let t0 = Instant::now();
    let mut per_facet: Vec<Vec<Candidate>> = Vec::with_capacity(facets.len());
    for facet in &facets {
        let fts_query = tokens::build_fts_query(facet);
        let hits = entries::search_fts(conn, &fts_query, overfetch_limit, role, layer)?;
        per_facet.push(
            hits.into_iter()
                .map(|h| Candidate {
                    entry: h.entry,
                    bm25: h.bm25,
                    content_preview: h.content_preview,
                })
                .collect(),
        );
    }
    trace(ctx, &format!("bm25_search ({} facets)", facets.len()), t0);

    // Stage 3: merge. Single facet is a pass-through; otherwise keep the
    // most-negative (best) BM25 per id, other fields from first occurrence.
    let t0 = Instant::now();
    let candidates = merge_facets(per_facet);
    trace(ctx, "merge", t0);

    // Stage 4: composite scoring.
    let t0 = Instant::now();
    let today = Utc::now().date_naive();
    let candidate_ids: Vec<String> = candidates.iter().map(|c| c.entry.id.clone()).collect();
    let access_counts = access_log::batch_access_counts(conn, &candidate_ids)?;
    let mut scored = score_batch(&candidates, &ctx.weights, context_files, &access_counts, today);
    trace(ctx, "composite_scoring", t0);

    // Stage 5: semantic group expansion.
    if ctx.talisman.semantic_groups_expansion_enabled && !scored.is_empty() {
        let t0 = Instant::now();
        let discount = ctx.talisman.semantic_groups_discount.clamp(0.0, 1.0);
        let max_expansion = ctx.talisman.semantic_groups_max_expansion.max(1);
        let expanded = expand_groups(
            conn,
            &scored,
            &ctx.weights,
            context_files,
            &access_counts,
            today,
            discount,
            max_expansion,
        )?;
        if !expanded.is_empty() {
            stages.group_expansion = true;
            merge_by_id_keep_best(&mut scored, expanded);
        }
        trace(ctx, "group_expansion", t0);
    }

    // Stage 6: retry injection.
    if ctx.talisman.retry_enabled {
        let t0 = Instant::now();
        let fingerprint = tokens::fingerprint(query);
        if !fingerprint.is_empty() {
            let matched_ids: Vec<String> = scored.iter().map(|s| s.entry.id.clone()).collect();
            // Probabilistic aging cleanup on the search path (1%).
            if pseudo_random_under_one_percent() {
                let _ = search_failures::cleanup_aged_failures(conn);
            }
            let failed = search_failures::retry_entries(conn, &fingerprint, &matched_ids)?;
            if !failed.is_empty() {
                let retry_ids: Vec<String> = failed.iter().map(|f| f.entry_id.clone()).collect();
                let retry_entries_full = entries::get_by_ids(conn, &retry_ids)?;
                let retry_counts = access_log::batch_access_counts(conn, &retry_ids)?;
                let retry_scored: Vec<ScoredEntry> = retry_entries_full
                    .into_iter()
                    .map(|entry| {
                        let breakdown = scorer::score_entry(
                            &entry,
                            &entry.content.clone(),
                            RETRY_SYNTHETIC_BM25,
                            RETRY_SYNTHETIC_BM25,
                            RETRY_SYNTHETIC_BM25,
                            context_files,
                            &retry_counts,
                            today,
                        );
                        let composite = scorer::composite_score(&breakdown, &ctx.weights);
                        let preview: String = entry.content.chars().take(200).collect();
                        ScoredEntry {
                            content_preview: preview,
                            composite_score: composite,
                            breakdown,
                            expansion_source: None,
                            retry_source: true,
                            rerank_score: None,
                            entry,
                        }
                    })
                    .collect();
                if !retry_scored.is_empty() {
                    stages.retry_injection = true;
                    merge_by_id_keep_best(&mut scored, retry_scored);
                }
            }
        }
        trace(ctx, "retry_injection", t0);
    }

    scored.sort_by(|a, b| b.composite_score.partial_cmp(&a.composite_score).unwrap_or(std::cmp::Ordering::Equal));

    // Stage 7: external rerank.
    if ctx.talisman.reranking_enabled && scored.len() >= ctx.talisman.reranking_threshold {
        let t0 = Instant::now();
        let max_candidates = ctx.talisman.reranking_max_candidates.max(1);
        let (head, tail) = split_at(&scored, max_candidates.min(scored.len()));
        let pairs: Vec<(String, String)> = head
            .iter()
            .map(|s| (s.entry.id.clone(), s.content_preview.clone()))
            .collect();
        let rerank_scores = ctx.reranker.rerank(query, &pairs).await;
        if !rerank_scores.is_empty() {
            stages.reranked = true;
            let mut reranked: Vec<ScoredEntry> = head.to_vec();
            for entry in &mut reranked {
                entry.rerank_score = Some(rerank_scores.get(&entry.entry.id).copied().unwrap_or(0.0));
            }
            reranked.sort_by(|a, b| {
                b.rerank_score
                    .unwrap_or(0.0)
                    .partial_cmp(&a.rerank_score.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            reranked.extend(tail.to_vec());
            scored = reranked;
        }
        trace(ctx, "reranking", t0);
    }

    trace(ctx, "pipeline_total", pipeline_start);

    scored.truncate(limit);
    Ok((scored, stages))
}

fn split_at<T>(slice: &[T], n: usize) -> (&[T], &[T]) {
    slice.split_at(n.min(slice.len()))
}

/// Cheap, dependency-free approximation of a 1% probabilistic trigger for
/// aging cleanup — no RNG crate is otherwise needed by this workspace, so
/// this samples the low bits of a monotonic clock reading.
fn pseudo_random_under_one_percent() -> bool {
    let nanos = Instant::now().elapsed().subsec_nanos();
    nanos % 100 == 0
}

fn merge_facets(per_facet: Vec<Vec<Candidate>>) -> Vec<Candidate> {
    if per_facet.len() == 1 {
        return per_facet.into_iter().next().unwrap_or_default();
    }
    let mut best: HashMap<String, Candidate> = HashMap::new();
    for facet_hits in per_facet {
        for hit in facet_hits {
            match best.get(&hit.entry.id) {
                Some(existing) if existing.bm25 <= hit.bm25 => {}
                _ => {
                    best.insert(hit.entry.id.clone(), hit);
                }
            }
        }
    }
    best.into_values().collect()
}

fn score_batch(
    candidates: &[Candidate],
    weights: &ScoringWeights,
    context_files: &[String],
    access_counts: &HashMap<String, u64>,
    today: chrono::NaiveDate,
) -> Vec<ScoredEntry> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let min_bm25 = candidates.iter().map(|c| c.bm25).fold(f64::INFINITY, f64::min);
    let max_bm25 = candidates.iter().map(|c| c.bm25).fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let breakdown = scorer::score_entry(
                &c.entry,
                &c.entry.content,
                c.bm25,
                min_bm25,
                max_bm25,
                context_files,
                access_counts,
                today,
            );
            let composite = scorer::composite_score(&breakdown, weights);
            ScoredEntry {
                content_preview: c.content_preview.clone(),
                composite_score: composite,
                breakdown,
                expansion_source: None,
                retry_source: false,
                rerank_score: None,
                entry: c.entry.clone(),
            }
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn expand_groups(
    conn: &Connection,
    scored: &[ScoredEntry],
    weights: &ScoringWeights,
    context_files: &[String],
    access_counts: &HashMap<String, u64>,
    today: chrono::NaiveDate,
    discount: f64,
    max_expansion: usize,
) -> echo_core::EchoResult<Vec<ScoredEntry>> {
    let existing_ids: HashSet<String> = scored.iter().map(|s| s.entry.id.clone()).collect();
    if existing_ids.is_empty() {
        return Ok(Vec::new());
    }

    let id_list: Vec<String> = existing_ids.iter().cloned().collect();
    let group_map = semantic_groups::group_ids_for_entries(conn, &id_list)?;
    let group_ids: Vec<String> = group_map
        .values()
        .flatten()
        .cloned()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    if group_ids.is_empty() {
        return Ok(Vec::new());
    }

    let members = semantic_groups::group_members(conn, &group_ids, &existing_ids)?;
    if members.is_empty() {
        return Ok(Vec::new());
    }

    let cap = (max_expansion.saturating_mul(group_ids.len())).min(50);
    let mut seen = HashSet::new();
    let mut capped = Vec::new();
    for (entry, _similarity) in members {
        if seen.insert(entry.id.clone()) {
            capped.push(entry);
            if capped.len() >= cap {
                break;
            }
        }
    }

    let extra_counts = access_log::batch_access_counts(
        conn,
        &capped.iter().map(|e| e.id.clone()).collect::<Vec<_>>(),
    )?;
    let mut merged_counts = access_counts.clone();
    merged_counts.extend(extra_counts);

    // Expanded entries have no BM25 hit of their own; score them as their
    // own single-element batch so relevance falls out to 1.0 uniformly,
    // treating them as unscored until the discount is applied.
    let out = capped
        .into_iter()
        .map(|entry| {
            let breakdown = scorer::score_entry(
                &entry,
                &entry.content.clone(),
                0.0,
                0.0,
                0.0,
                context_files,
                &merged_counts,
                today,
            );
            let composite = (scorer::composite_score(&breakdown, weights) * discount * 10_000.0).round() / 10_000.0;
            let preview: String = entry.content.chars().take(200).collect();
            ScoredEntry {
                content_preview: preview,
                composite_score: composite,
                breakdown,
                expansion_source: Some("group_expansion".to_string()),
                retry_source: false,
                rerank_score: None,
                entry,
            }
        })
        .collect();

    Ok(out)
}

/// Merge `additions` into `base`, keeping whichever copy of each id has
/// the higher composite score (an addition with no existing counterpart
/// is simply appended).
fn merge_by_id_keep_best(base: &mut Vec<ScoredEntry>, additions: Vec<ScoredEntry>) {
    let mut by_id: HashMap<String, usize> = base
        .iter()
        .enumerate()
        .map(|(i, s)| (s.entry.id.clone(), i))
        .collect();

    for addition in additions {
        match by_id.get(&addition.entry.id) {
            Some(&idx) => {
                if addition.composite_score > base[idx].composite_score {
                    base[idx] = addition;
                }
            }
            None => {
                by_id.insert(addition.entry.id.clone(), base.len());
                base.push(addition);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echo_core::models::Layer;
    use echo_storage::migrations::run_migrations;
    use echo_storage::queries::entries::rebuild;
    use std::sync::Arc as StdArc;

    fn sample_entry(id: &str, layer: Layer, date: &str, content: &str) -> EchoEntry {
        EchoEntry {
            id: id.to_string(),
            role: "reviewer".to_string(),
            layer: layer.as_str().to_string(),
            date: date.to_string(),
            source: String::new(),
            tags: "tags".to_string(),
            content: content.to_string(),
            line_number: 1,
            file_path: "/echoes/reviewer/MEMORY.md".to_string(),
        }
    }

    fn ctx() -> PipelineContext {
        PipelineContext {
            decomposer: StdArc::new(crate::capability::PassThrough),
            reranker: StdArc::new(crate::capability::PassThrough),
            weights: ScoringWeights::DEFAULT,
            talisman: StdArc::new(TalismanSnapshot::default()),
            trace: false,
        }
    }

    #[tokio::test]
    async fn single_result_has_relevance_one() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let today = Utc::now().date_naive().to_string();
        rebuild(&mut conn, &[sample_entry("e1", Layer::Inscribed, &today, "authentication flow notes")]).unwrap();

        let (results, _stages) = search(&conn, &ctx(), "authentication", 10, None, None, &[]).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].breakdown.relevance, 1.0);
    }

    #[tokio::test]
    async fn recent_inscribed_outranks_old_traced() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let today = Utc::now().date_naive().to_string();
        let mut a = sample_entry("a", Layer::Inscribed, &today, "security validation checks pass");
        a.file_path = "/echoes/a/MEMORY.md".into();
        let mut b = sample_entry("b", Layer::Traced, "2020-01-01", "security validation checks pass");
        b.file_path = "/echoes/b/MEMORY.md".into();
        rebuild(&mut conn, &[a, b]).unwrap();

        let (results, _stages) = search(&conn, &ctx(), "security validation", 10, None, None, &[]).await.unwrap();
        assert_eq!(results[0].entry.id, "a");
    }

    #[tokio::test]
    async fn empty_query_yields_empty_results() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        rebuild(&mut conn, &[sample_entry("e1", Layer::Notes, "2026-01-01", "anything at all")]).unwrap();

        let (results, _stages) = search(&conn, &ctx(), "", 10, None, None, &[]).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn retry_injection_surfaces_prior_failure() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        rebuild(&mut conn, &[sample_entry("e1", Layer::Notes, "2026-01-01", "completely unrelated content")]).unwrap();

        let fp = tokens::fingerprint("obscure query");
        search_failures::record_failure(&conn, "e1", &fp).unwrap();

        let mut talisman = TalismanSnapshot::default();
        talisman.retry_enabled = true;
        let mut retry_ctx = ctx();
        retry_ctx.talisman = StdArc::new(talisman);

        let (results, stages) = search(&conn, &retry_ctx, "obscure query", 10, None, None, &[]).await.unwrap();
        assert!(stages.retry_injection);
        assert!(results.iter().any(|r| r.entry.id == "e1" && r.retry_source));
    }

    #[tokio::test]
    async fn group_expansion_applies_discount() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let mut x = sample_entry("x", Layer::Notes, "2026-01-01", "shared retry backoff token handling");
        x.file_path = "/echoes/a/MEMORY.md".into();
        let mut y = sample_entry("y", Layer::Notes, "2026-01-01", "totally unrelated to the query text");
        y.file_path = "/echoes/a/MEMORY.md".into();
        rebuild(&mut conn, &[x, y]).unwrap();

        semantic_groups::upsert_groups(
            &mut conn,
            &[
                echo_core::models::SemanticGroup {
                    group_id: "g1".into(),
                    entry_id: "x".into(),
                    similarity: 0.8,
                    created_at: Utc::now().to_rfc3339(),
                },
                echo_core::models::SemanticGroup {
                    group_id: "g1".into(),
                    entry_id: "y".into(),
                    similarity: 0.8,
                    created_at: Utc::now().to_rfc3339(),
                },
            ],
        )
        .unwrap();

        let mut talisman = TalismanSnapshot::default();
        talisman.semantic_groups_expansion_enabled = true;
        talisman.semantic_groups_discount = 0.7;
        let mut group_ctx = ctx();
        group_ctx.talisman = StdArc::new(talisman);

        let (results, stages) = search(&conn, &group_ctx, "shared retry backoff", 10, None, None, &[]).await.unwrap();
        assert!(stages.group_expansion);
        let y_result = results.iter().find(|r| r.entry.id == "y").unwrap();
        assert_eq!(y_result.expansion_source.as_deref(), Some("group_expansion"));
    }

    struct PartialReranker;

    #[async_trait::async_trait]
    impl crate::capability::Reranker for PartialReranker {
        async fn rerank(&self, _query: &str, candidates: &[(String, String)]) -> HashMap<String, f64> {
            candidates
                .iter()
                .take(1)
                .map(|(id, _)| (id.clone(), 9.0))
                .collect()
        }
    }

    #[tokio::test]
    async fn missing_rerank_scores_default_to_zero() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let today = Utc::now().date_naive().to_string();
        rebuild(
            &mut conn,
            &[
                sample_entry("e1", Layer::Inscribed, &today, "shared retry backoff handling"),
                sample_entry("e2", Layer::Inscribed, &today, "shared retry backoff logic"),
            ],
        )
        .unwrap();

        let mut talisman = TalismanSnapshot::default();
        talisman.reranking_enabled = true;
        talisman.reranking_threshold = 1;
        talisman.reranking_max_candidates = 10;
        let mut rerank_ctx = ctx();
        rerank_ctx.talisman = StdArc::new(talisman);
        rerank_ctx.reranker = StdArc::new(PartialReranker);

        let (results, stages) = search(&conn, &rerank_ctx, "shared retry backoff", 10, None, None, &[]).await.unwrap();
        assert!(stages.reranked);
        assert!(results.iter().all(|r| r.rerank_score.is_some()));
        let unmatched = results.iter().find(|r| r.rerank_score != Some(9.0)).unwrap();
        assert_eq!(unmatched.rerank_score, Some(0.0));
    }
}
