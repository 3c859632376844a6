//! Snippet Runner Gateway
//!
//! HTTP gateway in front of the execution orchestrator.

use clap::Parser;
use snippet_runner::audit::open_ledger;
use snippet_runner::config::{self, Config};
use snippet_runner::gateway::{build_router, GatewayState};
use snippet_runner::VERSION;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "snippet-runner-gateway", version = VERSION, about = "Snippet Runner HTTP gateway")]
struct Args {
    /// Bind address (overrides gateway.bind)
    #[arg(long)]
    bind: Option<String>,

    /// Port (overrides gateway.port)
    #[arg(long, short)]
    port: Option<u16>,

    /// Configuration file
    #[arg(long, short, env = "SNIPPET_RUNNER_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,snippet_runner=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let mut config: Config = match &args.config {
        Some(path) => config::load_config_layered(path)?,
        None => config::load_config()?,
    };

    let validation = config::validate_config(&config);
    for issue in &validation.warnings {
        warn!("Config: {}", issue);
    }
    if !validation.valid {
        for issue in &validation.errors {
            tracing::error!("Config: {}", issue);
        }
        anyhow::bail!("Configuration is invalid ({} error(s))", validation.errors.len());
    }

    if config.audit.path.is_none() {
        config.audit.path = Some(config::audit_log_path());
    }
    let ledger = open_ledger(&config.audit).await?;
    let state = GatewayState::from_config(&config, ledger)?;
    info!(
        "Providers: [{}] with simulated fallback",
        state.orchestrator.provider_ids().join(", ")
    );

    let app = build_router(state);

    let bind = args.bind.unwrap_or(config.gateway.bind);
    let port = args.port.unwrap_or(config.gateway.port);
    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Gateway v{} listening on http://{}", VERSION, addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
