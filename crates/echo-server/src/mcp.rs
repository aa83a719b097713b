use std::path::PathBuf;
use std::sync::Arc;

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::service::RequestContext;
use rmcp::{tool, tool_router, ErrorData as McpError, RoleServer, ServerHandler, ServiceExt};
use rusqlite::Connection;
use schemars::JsonSchema;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use echo_core::config::{ScoringWeights, TalismanLoader};
use echo_core::models::SemanticGroup;
use echo_core::EchoResult;
use echo_retrieval::capability::{Decomposer, ExternalDecomposer, ExternalReranker, PassThrough, Reranker};
use echo_retrieval::pipeline::{self, PipelineContext};
use echo_storage::queries::{access_log, entries, semantic_groups};
use echo_storage::open_connection;

use crate::{reindex, signal};

const MAX_IDS: usize = 50;
const MAX_CONTEXT_FILES: usize = 20;
const ERROR_MAX_CHARS: usize = 200;

fn truncate_error(msg: &str) -> String {
    msg.chars().take(ERROR_MAX_CHARS).collect()
}

fn error_result(msg: impl Into<String>) -> Result<CallToolResult, McpError> {
    let body = serde_json::json!({ "error": truncate_error(&msg.into()) });
    Ok(CallToolResult::error(vec![Content::text(body.to_string())]))
}

fn ok_result(value: serde_json::Value) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
    )]))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchParams {
    /// Search query (natural language or keywords).
    pub query: String,
    /// Max results to return (default 10, clamped to 1-50).
    #[serde(default)]
    pub limit: Option<i64>,
    /// Filter by echo layer (e.g., inscribed).
    pub layer: Option<String>,
    /// Filter by role (e.g., orchestrator, reviewer, planner).
    pub role: Option<String>,
    /// Currently open/edited file paths for proximity scoring, capped at 20.
    #[serde(default)]
    pub context_files: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DetailsParams {
    /// Entry IDs to fetch, capped at 50.
    pub ids: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RecordAccessParams {
    /// Entry IDs to record access for, capped at 50.
    pub entry_ids: Vec<String>,
    /// Optional context query that led to this access.
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpsertGroupParams {
    /// Entry IDs to include in the group, capped at 50.
    pub entry_ids: Vec<String>,
    /// Group identifier. Auto-generated if omitted.
    pub group_id: Option<String>,
    /// Optional similarity score per entry (default 0.0), padded/truncated to match entry_ids.
    pub similarities: Option<Vec<f64>>,
}

/// Process-wide configuration the tool handlers need beyond the database
/// connection itself: resolved env paths, the weight set loaded once at
/// startup, and the mtime-cached `talisman.yml` loader.
pub struct EchoServerConfig {
    pub db_path: PathBuf,
    pub echo_dir: Option<PathBuf>,
    pub weights: ScoringWeights,
    pub talisman: TalismanLoader,
    pub trace: bool,
}

#[derive(Clone)]
pub struct EchoSearchMcp {
    config: Arc<EchoServerConfig>,
    tool_router: ToolRouter<Self>,
}

impl EchoSearchMcp {
    pub fn new(config: EchoServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            tool_router: Self::tool_router(),
        }
    }

    fn open(&self) -> EchoResult<Connection> {
        open_connection(&self.config.db_path)
    }

    /// Check and clear the dirty signal, then reindex if the DB is empty or
    /// the signal was present. Takes ownership of `conn` so it can be
    /// closed before the reindex and reopened after.
    fn reindex_if_needed(&self, conn: Connection) -> EchoResult<Connection> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM echo_entries", [], |r| r.get(0))?;
        let is_dirty = signal::check_and_clear_dirty(self.config.echo_dir.as_deref());
        if let Some(echo_dir) = &self.config.echo_dir {
            if count == 0 || is_dirty {
                drop(conn);
                reindex::do_reindex(echo_dir, &self.config.db_path)?;
                return Ok(reindex::reopen_after_reindex(&self.config.db_path)?);
            }
        }
        Ok(conn)
    }

    fn build_pipeline_ctx(&self) -> PipelineContext {
        let talisman = self.config.talisman.load();
        let decomposer: Arc<dyn Decomposer> = match (&talisman.decomposer_command, talisman.decomposition_enabled) {
            (Some(cmd), true) => Arc::new(ExternalDecomposer { command: cmd.clone() }),
            _ => Arc::new(PassThrough),
        };
        let reranker: Arc<dyn Reranker> = match (&talisman.reranker_command, talisman.reranking_enabled) {
            (Some(cmd), true) => Arc::new(ExternalReranker::new(cmd.clone(), talisman.reranking_timeout_secs)),
            _ => Arc::new(PassThrough),
        };
        PipelineContext {
            decomposer,
            reranker,
            weights: self.config.weights,
            talisman,
            trace: self.config.trace,
        }
    }
}

#[tool_router]
impl EchoSearchMcp {
    #[tool(
        name = "echo_search",
        description = "Search the Rune echo system for learnings, patterns, and insights using BM25 full-text search."
    )]
    async fn echo_search(&self, params: Parameters<SearchParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;

        if p.query.is_empty() {
            return error_result("query must be a non-empty string");
        }
        let limit = p.limit.filter(|l| *l >= 1).unwrap_or(10).min(50) as usize;
        let context_files: Vec<String> = p
            .context_files
            .unwrap_or_default()
            .into_iter()
            .filter(|f| !f.is_empty())
            .take(MAX_CONTEXT_FILES)
            .collect();

        let conn = match self.open().and_then(|c| self.reindex_if_needed(c)) {
            Ok(c) => c,
            Err(e) => return error_result(e.truncated(ERROR_MAX_CHARS)),
        };

        let ctx = self.build_pipeline_ctx();
        let (results, _stages) = match pipeline::search(
            &conn,
            &ctx,
            &p.query,
            limit,
            p.layer.as_deref(),
            p.role.as_deref(),
            &context_files,
        )
        .await
        {
            Ok(r) => r,
            Err(e) => return error_result(e.truncated(ERROR_MAX_CHARS)),
        };

        for result in &results {
            let _ = access_log::record_access(&conn, &result.entry.id, &p.query);
        }

        ok_result(serde_json::json!({ "entries": results }))
    }

    #[tool(
        name = "echo_details",
        description = "Fetch full content for specific echo entries by their IDs."
    )]
    async fn echo_details(&self, params: Parameters<DetailsParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.ids.is_empty() {
            return error_result("ids is required");
        }
        let ids: Vec<String> = p.ids.into_iter().take(MAX_IDS).collect();

        let conn = match self.open().and_then(|c| self.reindex_if_needed(c)) {
            Ok(c) => c,
            Err(e) => return error_result(e.truncated(ERROR_MAX_CHARS)),
        };

        match entries::get_by_ids(&conn, &ids) {
            Ok(entries) => ok_result(serde_json::json!({ "entries": entries })),
            Err(e) => error_result(e.truncated(ERROR_MAX_CHARS)),
        }
    }

    #[tool(
        name = "echo_reindex",
        description = "Re-parse all MEMORY.md files and rebuild the search index."
    )]
    async fn echo_reindex(&self) -> Result<CallToolResult, McpError> {
        let Some(echo_dir) = &self.config.echo_dir else {
            return error_result("ECHO_DIR not set");
        };
        match reindex::do_reindex(echo_dir, &self.config.db_path) {
            Ok(result) => ok_result(serde_json::to_value(result).unwrap_or_default()),
            Err(e) => error_result(e.truncated(ERROR_MAX_CHARS)),
        }
    }

    #[tool(
        name = "echo_stats",
        description = "Get summary statistics about the echo search index."
    )]
    async fn echo_stats(&self) -> Result<CallToolResult, McpError> {
        let conn = match self.open() {
            Ok(c) => c,
            Err(e) => return error_result(e.truncated(ERROR_MAX_CHARS)),
        };
        match entries::stats(&conn) {
            Ok(stats) => {
                let by_layer: serde_json::Map<String, serde_json::Value> =
                    stats.by_layer.into_iter().map(|(k, v)| (k, serde_json::json!(v))).collect();
                let by_role: serde_json::Map<String, serde_json::Value> =
                    stats.by_role.into_iter().map(|(k, v)| (k, serde_json::json!(v))).collect();
                ok_result(serde_json::json!({
                    "total_entries": stats.total,
                    "by_layer": by_layer,
                    "by_role": by_role,
                    "last_indexed": stats.last_indexed.unwrap_or_default(),
                }))
            }
            Err(e) => error_result(e.truncated(ERROR_MAX_CHARS)),
        }
    }

    #[tool(
        name = "echo_record_access",
        description = "Manually record access events for specific echo entry IDs. Normally access is auto-recorded on search, but this tool allows explicit recording (e.g., when an entry is viewed)."
    )]
    async fn echo_record_access(&self, params: Parameters<RecordAccessParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.entry_ids.is_empty() {
            return error_result("entry_ids is required");
        }
        let entry_ids: Vec<String> = p.entry_ids.into_iter().take(MAX_IDS).collect();
        let query = p.query.unwrap_or_default();

        let conn = match self.open() {
            Ok(c) => c,
            Err(e) => return error_result(e.truncated(ERROR_MAX_CHARS)),
        };

        for id in &entry_ids {
            if let Err(e) = access_log::record_access(&conn, id, &query) {
                return error_result(e.truncated(ERROR_MAX_CHARS));
            }
        }

        ok_result(serde_json::json!({ "recorded": entry_ids.len(), "entry_ids": entry_ids }))
    }

    #[tool(
        name = "echo_upsert_group",
        description = "Create or update a semantic group of echo entries. Groups cluster related entries for expanded retrieval."
    )]
    async fn echo_upsert_group(&self, params: Parameters<UpsertGroupParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.entry_ids.is_empty() {
            return error_result("entry_ids is required");
        }
        let entry_ids: Vec<String> = p.entry_ids.into_iter().take(MAX_IDS).collect();

        let group_id = p.group_id.filter(|g| !g.is_empty()).unwrap_or_else(|| generate_group_id(&entry_ids));

        let mut similarities: Vec<f64> = p.similarities.unwrap_or_default();
        similarities.truncate(entry_ids.len());
        similarities.resize(entry_ids.len(), 0.0);

        let conn = match self.open() {
            Ok(c) => c,
            Err(e) => return error_result(e.truncated(ERROR_MAX_CHARS)),
        };

        let created_at = chrono::Utc::now().to_rfc3339();
        let groups: Vec<SemanticGroup> = entry_ids
            .iter()
            .zip(similarities.iter())
            .map(|(entry_id, similarity)| SemanticGroup {
                group_id: group_id.clone(),
                entry_id: entry_id.clone(),
                similarity: *similarity,
                created_at: created_at.clone(),
            })
            .collect();
        let count = groups.len();

        let mut conn = conn;
        if let Err(e) = semantic_groups::upsert_groups(&mut conn, &groups) {
            return error_result(e.truncated(ERROR_MAX_CHARS));
        }

        ok_result(serde_json::json!({ "group_id": group_id, "memberships": count, "entry_ids": entry_ids }))
    }
}

/// Fallback group id when the caller omits one: 16 hex chars of
/// SHA-256 over the sorted entry id list plus the current time, the
/// same derivation style as [`echo_index::id::generate_id`].
fn generate_group_id(entry_ids: &[String]) -> String {
    let mut sorted = entry_ids.to_vec();
    sorted.sort();
    let seed = format!("{}|{}", sorted.join(","), chrono::Utc::now().to_rfc3339());
    let digest = Sha256::digest(seed.as_bytes());
    hex::encode(digest)[..16].to_string()
}

impl ServerHandler for EchoSearchMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Full-text search over persistent echo memory (.claude/echoes/<role>/MEMORY.md files). \
                 Tools: echo_search, echo_details, echo_reindex, echo_stats, echo_record_access, \
                 echo_upsert_group."
                    .into(),
            ),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: None }),
                ..Default::default()
            },
            server_info: Implementation {
                name: "echo-search".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: Some("Echo Search".into()),
                description: Some("Persistent memory retrieval for Rune agent roles".into()),
                icons: None,
                website_url: None,
            },
            ..Default::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult {
            tools: self.tool_router.list_all(),
            next_cursor: None,
            meta: Default::default(),
        }))
    }

    fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        let tool_context = ToolCallContext::new(self, request, context);
        async move { self.tool_router.call(tool_context).await }
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.tool_router.get(name).cloned()
    }
}

/// Start the MCP server on stdio. Called from `main` with no flags.
pub async fn serve_stdio(config: EchoServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let server = EchoSearchMcp::new(config);
    let transport = rmcp::transport::io::stdio();
    let service = server.serve(transport).await.inspect_err(|e| {
        tracing::error!("MCP serve error: {e}");
    })?;
    service.waiting().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_id_is_sixteen_hex_chars() {
        let id = generate_group_id(&["a".to_string(), "b".to_string()]);
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn truncate_error_caps_at_200() {
        let long = "x".repeat(500);
        assert_eq!(truncate_error(&long).chars().count(), 200);
    }
}
