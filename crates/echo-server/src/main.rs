mod mcp;
mod reindex;
mod signal;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use echo_core::config::{EnvConfig, ScoringWeights, TalismanLoader};

/// `echo-search`: persistent memory retrieval for Rune agent roles.
///
/// With no flags, runs the stdio MCP tool server. `--reindex` performs a
/// single reindex pass and exits.
#[derive(Debug, Parser)]
#[command(name = "echo-search", version, about)]
struct Cli {
    /// Re-parse all MEMORY.md files and rebuild the index, then exit.
    #[arg(long)]
    reindex: bool,
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "echo_server=info,echo_retrieval=info,echo_index=info,echo_storage=warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// CLI-boundary entry point: argument parsing and startup I/O surface
/// through `anyhow::Result` here, one level above the `EchoError` domain
/// used by every crate underneath.
async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let env = EnvConfig::load().context("startup config error")?;

    if let Some(parent) = env.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create DB_PATH parent directory {}", parent.display()))?;
        }
    }

    if cli.reindex {
        return run_reindex_once(&env);
    }

    run_server(&env).await
}

fn run_reindex_once(env: &EnvConfig) -> anyhow::Result<ExitCode> {
    let echo_dir = env.require_echo_dir()?;
    let result = reindex::do_reindex(echo_dir, &env.db_path)?;
    println!(
        "Indexed {} entries in {}ms. Roles: {}",
        result.entries_indexed,
        result.time_ms,
        result.roles.join(", ")
    );
    Ok(ExitCode::SUCCESS)
}

async fn run_server(env: &EnvConfig) -> anyhow::Result<ExitCode> {
    let weights = ScoringWeights::load_from_env();
    let talisman = TalismanLoader::discover(env.echo_dir.as_deref(), env.claude_config_dir.as_deref());

    let config = mcp::EchoServerConfig {
        db_path: env.db_path.clone(),
        echo_dir: env.echo_dir.clone(),
        weights,
        talisman,
        trace: env.trace,
    };

    mcp::serve_stdio(config).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
    Ok(ExitCode::SUCCESS)
}
