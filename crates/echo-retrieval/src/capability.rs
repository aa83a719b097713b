use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const DECOMPOSER_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_RERANKER_TIMEOUT: Duration = Duration::from_secs(4);
const MAX_FACETS: usize = 5;

/// Splits a query into facets for independent full-text search. The
/// external implementation shells out to a configured CLI; on any
/// failure the pipeline falls back to treating the whole query as a
/// single facet, so callers never see an error from this trait.
#[async_trait]
pub trait Decomposer: Send + Sync {
    async fn decompose(&self, query: &str) -> Vec<String>;
}

/// Reorders a batch of candidate ids by an externally computed
/// relevance score in `[0, 1]`. Failures fall back to the identity
/// order (empty map), never an error.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, candidates: &[(String, String)]) -> std::collections::HashMap<String, f64>;
}

/// Always returns the query unchanged / an empty score map. Used when
/// the corresponding `talisman.yml` section is disabled or no command
/// is configured.
pub struct PassThrough;

#[async_trait]
impl Decomposer for PassThrough {
    async fn decompose(&self, query: &str) -> Vec<String> {
        vec![query.to_string()]
    }
}

#[async_trait]
impl Reranker for PassThrough {
    async fn rerank(&self, _query: &str, _candidates: &[(String, String)]) -> std::collections::HashMap<String, f64> {
        std::collections::HashMap::new()
    }
}

/// Spawns `command` with the query piped on stdin and a `tokio::time::timeout`
/// wall-clock budget. The child is placed in its own process group so a
/// timed-out kill reaps any helper processes it spawned, not just the
/// direct child.
pub struct ExternalDecomposer {
    pub command: String,
}

#[async_trait]
impl Decomposer for ExternalDecomposer {
    async fn decompose(&self, query: &str) -> Vec<String> {
        match run_with_timeout(&self.command, query, DECOMPOSER_TIMEOUT).await {
            Some(stdout) => match parse_facets(&stdout) {
                Some(facets) if !facets.is_empty() => facets.into_iter().take(MAX_FACETS).collect(),
                _ => vec![query.to_string()],
            },
            None => vec![query.to_string()],
        }
    }
}

pub struct ExternalReranker {
    pub command: String,
    pub timeout: Duration,
}

impl ExternalReranker {
    pub fn new(command: String, timeout_secs: f64) -> Self {
        let timeout = if timeout_secs > 0.0 {
            Duration::from_secs_f64(timeout_secs)
        } else {
            DEFAULT_RERANKER_TIMEOUT
        };
        Self { command, timeout }
    }
}

#[async_trait]
impl Reranker for ExternalReranker {
    async fn rerank(&self, query: &str, candidates: &[(String, String)]) -> std::collections::HashMap<String, f64> {
        let prompt = build_rerank_prompt(query, candidates);
        match run_with_timeout(&self.command, &prompt, self.timeout).await {
            Some(stdout) => parse_rerank_scores(&stdout).unwrap_or_default(),
            None => std::collections::HashMap::new(),
        }
    }
}

fn build_rerank_prompt(query: &str, candidates: &[(String, String)]) -> String {
    let mut out = format!("query: {query}\ncandidates:\n");
    for (id, preview) in candidates {
        out.push_str(&format!("[{id}]: {preview}\n"));
    }
    out
}

/// Runs `command` via the shell's `PATH` lookup with `query` on stdin,
/// enforcing `budget` as a hard wall-clock timeout. Returns `None` on
/// spawn failure, non-zero exit, or timeout (in which case the process
/// group is killed so helper subprocesses don't orphan).
async fn run_with_timeout(command: &str, input: &str, budget: Duration) -> Option<String> {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .process_group(0);

    let mut child = cmd.spawn().ok()?;
    let mut stdin = child.stdin.take()?;
    let input = input.to_string();
    let write_fut = async move {
        let _ = stdin.write_all(input.as_bytes()).await;
        drop(stdin);
    };

    let wait_fut = async {
        write_fut.await;
        child.wait_with_output().await
    };

    match tokio::time::timeout(budget, wait_fut).await {
        Ok(Ok(output)) if output.status.success() => {
            String::from_utf8(output.stdout).ok()
        }
        Ok(_) => None,
        Err(_) => {
            tracing::debug!("subprocess '{command}' timed out after {budget:?}");
            None
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FacetEnvelope {
    Bare(Vec<String>),
    Wrapped { result: FacetResult },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FacetResult {
    List(Vec<String>),
    Single(String),
}

fn parse_facets(stdout: &str) -> Option<Vec<String>> {
    let parsed: FacetEnvelope = serde_json::from_str(stdout.trim()).ok()?;
    Some(match parsed {
        FacetEnvelope::Bare(list) => list,
        FacetEnvelope::Wrapped { result: FacetResult::List(list) } => list,
        FacetEnvelope::Wrapped { result: FacetResult::Single(s) } => vec![s],
    })
}

#[derive(Debug, Deserialize)]
struct RawScore {
    id: Option<String>,
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RerankEnvelope {
    Bare(Vec<serde_json::Value>),
    Wrapped { result: RerankResult },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RerankResult {
    List(Vec<serde_json::Value>),
    Text(String),
}

/// Parses `[{id, score}, ...]`, tolerating a bare array or the
/// `{"type":"result","result":...}` envelope. Non-object elements and
/// entries missing `id`/`score` are skipped; scores are clamped to
/// `[0, 1]`.
fn parse_rerank_scores(stdout: &str) -> Option<std::collections::HashMap<String, f64>> {
    let envelope: RerankEnvelope = serde_json::from_str(stdout.trim()).ok()?;
    let items = match envelope {
        RerankEnvelope::Bare(items) => items,
        RerankEnvelope::Wrapped { result: RerankResult::List(items) } => items,
        RerankEnvelope::Wrapped { result: RerankResult::Text(text) } => {
            serde_json::from_str(text.trim()).ok()?
        }
    };

    let mut out = std::collections::HashMap::new();
    for item in items {
        let Ok(raw) = serde_json::from_value::<RawScore>(item) else {
            continue;
        };
        if let (Some(id), Some(score)) = (raw.id, raw.score) {
            out.insert(id, score.clamp(0.0, 1.0));
        }
    }
    Some(out)
}
