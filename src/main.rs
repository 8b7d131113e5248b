//! pulse-arb - three-wallet DEX arbitrage keeper for PulseChain
//!
//! One process per wallet role. The buyer defends the reference token price by
//! buying discounted tokens, the minter converts them into the reference token and
//! the seller sells it into price spikes, recycling native currency back to the others.

use anyhow::{Context as _, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, info_span, warn, Instrument};

mod chain;
mod clock;
mod config;
mod engine;
mod error;
mod gas;
mod metrics;
mod registry;
mod retry;
mod swap;
mod tx;
mod units;

use chain::{ChainProvider, SharedClient};
use clock::{SharedClock, SystemClock};
use config::{Settings, WalletRole};
use engine::{build_role, Context, Scheduler};
use gas::GasOracle;
use metrics::MetricsServer;
use registry::{AbiStore, RouteTable, SignerSource, TokenRegistry};
use swap::{ConversionBatcher, SwapEstimator};
use tx::{FeeStrategy, TransactionBroadcaster, WalletActions};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let settings = Settings::load()?;
    init_logging(settings.bot.log_json);

    let role = settings.bot.role;
    info!("Starting pulse-arb v{} as {}", env!("CARGO_PKG_VERSION"), role);

    let span = info_span!("keeper", role = %role, wallet = ?settings.wallet_address(role));
    run(settings).instrument(span).await
}

async fn run(settings: Settings) -> Result<()> {
    let role = settings.bot.role;
    let clock: SharedClock = Arc::new(SystemClock);
    let http_timeout = Duration::from_secs(settings.network.http_timeout_secs);

    let provider = ChainProvider::new(settings.network.clone())?;
    if !provider.health_check().await {
        warn!("Primary RPC endpoint failed its health check");
    }
    let client: SharedClient = Arc::new(provider);
    info!("Chain connection initialized");

    let gas = Arc::new(GasOracle::from_config(
        &settings.gas,
        &settings.bot.data_dir,
        http_timeout,
        client.clone(),
        clock.clone(),
    )?);

    let signer = SignerSource::new(&settings.wallets)
        .signer(settings.wallet_address(role))
        .context("Failed to load wallet signer")?;
    let fees = FeeStrategy::new(client.clone(), &settings.gas, settings.tx.replacement_bump);
    let broadcaster = Arc::new(TransactionBroadcaster::new(
        client.clone(),
        clock.clone(),
        signer,
        fees,
        settings.tx.clone(),
        settings.bot.attempts,
    ));

    let tokens = Arc::new(TokenRegistry::new(
        client.clone(),
        &settings.bot.data_dir,
        settings.bot.attempts,
    ));
    let wallet = Arc::new(WalletActions::new(
        client.clone(),
        broadcaster,
        tokens,
        settings.network.wrapped_native,
    ));
    let swaps = Arc::new(SwapEstimator::new(
        client.clone(),
        clock.clone(),
        wallet.clone(),
        settings.routers.clone(),
        Duration::from_millis(settings.tx.quote_retry_delay_ms),
    ));

    let routes = if role == WalletRole::Minter {
        load_routes(&settings, http_timeout, clock.clone()).await?
    } else {
        RouteTable::default()
    };
    let rapid_limit = settings
        .minter
        .as_ref()
        .map_or(0.0, |minter| minter.rapid_fee_limit_gwei);
    let batcher = Arc::new(ConversionBatcher::new(
        wallet.clone(),
        gas.clone(),
        Arc::new(routes),
        rapid_limit,
    ));

    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let ctx = Arc::new(Context {
        settings,
        clock: clock.clone(),
        gas,
        wallet,
        swaps,
        batcher,
    });
    let mut scheduler = Scheduler::new(build_role(ctx)?, clock);
    let shutdown = scheduler.shutdown_handle();

    let result = tokio::select! {
        result = scheduler.run() => result,
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping...");
            *shutdown.write().await = true;
            Ok(())
        }
    };

    if let Some(handle) = metrics_handle {
        handle.abort();
    }

    info!("pulse-arb stopped");
    result.map_err(Into::into)
}

/// Load the conversion route table and check it against the contracts' ABIs.
/// A contract whose routes name bare functions cannot run without its ABI.
async fn load_routes(settings: &Settings, http_timeout: Duration, clock: SharedClock) -> Result<RouteTable> {
    let mut routes = RouteTable::load(&settings.routes.path)?;
    let abis = AbiStore::new(
        &settings.network.explorer_url,
        &settings.bot.data_dir,
        http_timeout,
        clock,
        settings.bot.attempts,
    )?;

    for contract in routes.contracts() {
        match abis.abi(contract).await {
            Ok(abi) => routes.verify_against_abi(contract, &abi)?,
            Err(e) if routes.needs_abi(contract) => return Err(e.into()),
            Err(e) => warn!("Skipping ABI check for {:?}: {}", contract, e),
        }
    }

    Ok(routes)
}

fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pulse_arb=debug,hyper=warn,reqwest=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
