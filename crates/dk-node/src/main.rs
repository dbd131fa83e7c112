//! Process controller (C11, spec.md §4.11): wires C1-C10 together, runs the
//! transport stream loop, router, and policy HTTP surface, and drains on
//! shutdown.
//!
//! `clap::Parser`/`Subcommand` shape follows `crates/cli/src/main.rs`.

mod config;
mod context;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::routing::get;
use axum::Router as AxumRouter;
use clap::{Parser, Subcommand};
use dk_policy::{db, usage, PolicyState};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::NodeConfig;
use context::RequestContext;

#[derive(Parser)]
#[command(name = "dk-node")]
#[command(about = "Federated knowledge-exchange node agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node: transport stream, router, policy server, and
    /// accounting workers.
    Run,
    /// Print the node's resolved configuration and exit.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = NodeConfig::from_env()?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Config => {
            info!(?config, "resolved node configuration");
            Ok(())
        }
    }
}

async fn run(config: NodeConfig) -> Result<()> {
    info!(user_id = %config.user_id, "starting node");

    let pool = db::create_pool(&config.database).await?;
    db::run_migrations(&pool).await?;
    let policy_state = Arc::new(PolicyState::new(pool));

    let ctx = RequestContext::build(config).await?;

    ctx.transport.clone().start().await?;
    let router_handle = ctx.router.clone().run();

    let summary_worker = usage::spawn_summary_refresh_worker(policy_state.clone());
    let policy_change_worker = usage::spawn_policy_change_worker(policy_state.clone());

    let policy_app = AxumRouter::new()
        .route("/healthz", get(health_check))
        .layer(axum::middleware::from_fn_with_state(
            policy_state.clone(),
            dk_policy::middleware::enforce_policy,
        ))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&ctx.config.policy_listen_addr).await?;
    info!(addr = %ctx.config.policy_listen_addr, "policy HTTP surface listening");
    let policy_server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, policy_app).await {
            warn!(error = ?err, "policy HTTP server exited");
        }
    });

    info!("node running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining outbound queue");

    ctx.transport.stop();
    tokio::time::sleep(Duration::from_secs(1)).await;

    router_handle.abort();
    policy_server.abort();
    summary_worker.abort();
    policy_change_worker.abort();

    info!("shutdown complete");
    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}
