//! Faucet service binary

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use drip_common::utils::logging::init_logging;
use drip_faucet::clock::SystemClock;
use drip_faucet::keys::key_provider_from_config;
use drip_faucet::lock::{LeaseLock, SledLeaseStore};
use drip_faucet::metrics::FaucetMetrics;
use drip_faucet::rpc::BlockchainRpcClient;
use drip_faucet::{
    api, ClaimPolicy, FaucetConfig, FaucetDeps, FaucetHandle, FaucetService, SledLedger,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Faucet service CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path (TOML, YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address
    #[arg(long)]
    server_addr: Option<String>,

    /// Ledger authority RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Database path
    #[arg(long)]
    db_path: Option<String>,

    /// Chain to distribute on
    #[arg(long)]
    chain_id: Option<u64>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = FaucetConfig::load(args.config.as_deref())?;

    // Override with CLI arguments
    if let Some(addr) = args.server_addr {
        config.server_addr = addr;
    }
    if let Some(rpc_url) = args.rpc_url {
        config.rpc_url = rpc_url;
    }
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }
    if let Some(chain_id) = args.chain_id {
        config.chain_id = chain_id;
    }
    if args.debug {
        config.logging.level = "debug".to_string();
    }

    init_logging(&config.logging).map_err(|e| anyhow!(e))?;
    info!("Starting Drip Faucet Service v{}", env!("CARGO_PKG_VERSION"));

    config.validate()?;

    info!("Configuration:");
    info!("  Server address: {}", config.server_addr);
    info!("  RPC URL: {}", config.rpc_url);
    info!("  Chain id: {}", config.chain_id);
    info!("  Reward: {} (+{} fee)", config.reward_amount, config.network_fee);
    info!("  Claim cooldown: {}s", config.claim_cooldown_secs);

    // Resolve the faucet identity from its key
    let keys = key_provider_from_config(&config)?;
    let address = keys.signing_key().await?.address();
    if let Some(configured) = config.faucet_address()? {
        if configured != address {
            bail!(
                "faucet_address {} does not match key address {}",
                configured,
                address
            );
        }
    }
    info!("Faucet address: {}", address);

    // Initialize database. The lease tree lives in the same sled database,
    // which sled locks to this process, so the lock excludes in-process
    // engines only.
    let ledger = SledLedger::open(&config.db_path)
        .with_context(|| format!("opening database at {}", config.db_path))?;
    let lease_store = SledLeaseStore::new(ledger.db())?;
    let guard = LeaseLock::new(lease_store, config.lock_ttl(), config.lock_acquire_timeout());

    let rpc = Arc::new(BlockchainRpcClient::new(
        config.rpc_url.clone(),
        config.submit_method.clone(),
        config.rpc_timeout(),
    )?);

    let service = Arc::new(FaucetService::new(
        FaucetHandle {
            chain_id: config.chain_id,
            address,
        },
        ClaimPolicy::from_config(&config)?,
        FaucetDeps {
            ledger: Arc::new(ledger),
            oracle: rpc.clone(),
            submitter: rpc,
            keys,
            guard: Arc::new(guard),
            clock: Arc::new(SystemClock),
            metrics: Arc::new(FaucetMetrics::new()?),
        },
    ));

    let faucet = service.ensure_faucet_account().await?;
    info!("Previous statistics:");
    info!("  Total distributed: {}", faucet.total_distributed);
    info!("  Total transactions: {}", faucet.total_transactions);

    let stale = service.stale_intents().await?;
    if !stale.is_empty() {
        warn!(
            "{} claim intent(s) need reconciliation; see GET /api/intents",
            stale.len()
        );
    }

    // Build router
    let mut app = api::router(service.clone(), config.metrics_enabled);

    // Add CORS if enabled
    if config.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        app = app.layer(cors);
        info!("CORS enabled");
    }

    // Start server
    let addr: SocketAddr = config.server_addr.parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down gracefully");
    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
