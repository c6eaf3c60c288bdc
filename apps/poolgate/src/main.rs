use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use clap::Parser;
use tracing::info;

mod accounts_file;
mod cli;

use poolgate_core::{Core, ConnectorConfig, EngineConfig, StreamProxy, WreqConnector};
use poolgate_pool::{Account, AccountPool, CostModel, CredentialRef, Ledger, StickyRouter};
use poolgate_storage::{GatewayStore, SqlStorage, UsageBus, UsageBusConfig};

use crate::accounts_file::load_account_seeds;
use crate::cli::Cli;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("poolgate failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let config = cli.to_config();

    let storage = Arc::new(SqlStorage::connect(&config.dsn).await?);
    info!(dsn = %config.dsn, "db connected");
    storage.sync().await?;

    // The accounts file is the credential-provider boundary: labels plus
    // already-valid bearer tokens, upserted into storage by label.
    let seeds = load_account_seeds(Path::new(&cli.accounts_file))?;
    let pool = Arc::new(AccountPool::new(Duration::from_secs(
        config.quota_window_minutes * 60,
    )));

    let bus = UsageBus::spawn(storage.clone(), UsageBusConfig::default());
    let sink = Arc::new(bus.sink());
    let _bus = bus;

    let ledger = Arc::new(Ledger::new(
        pool.clone(),
        sink.clone(),
        CostModel {
            input_per_mtok: config.input_price_per_mtok,
            output_per_mtok: config.output_price_per_mtok,
        },
        cli.window_capacity_tokens,
    ));

    for seed in &seeds {
        storage
            .upsert_account(&seed.label, &seed.credential, seed.disabled)
            .await?;
    }
    let rows = storage.load_accounts().await?;
    info!(accounts = rows.len(), "accounts loaded");
    for row in rows {
        pool.insert(Account {
            id: row.id,
            label: row.label,
            credential: CredentialRef::new(row.credential),
        })
        .await;
        if row.disabled {
            pool.set_disabled(row.id, true).await;
        }
        ledger
            .hydrate(
                row.id,
                poolgate_pool::AccountTotals {
                    rows: row.totals.rows,
                    input_tokens: row.totals.input_tokens,
                    output_tokens: row.totals.output_tokens,
                    cost: row.totals.cost,
                },
            )
            .await;
    }

    let sticky = Arc::new(StickyRouter::new(
        pool.clone(),
        sink,
        Duration::from_secs(config.sticky_ttl_secs),
    ));
    let bindings = storage.load_bindings().await?;
    let now = time::OffsetDateTime::now_utc();
    for binding in bindings {
        let age = (now - binding.last_touched_at)
            .try_into()
            .unwrap_or(Duration::ZERO);
        sticky
            .hydrate(binding.session_key, binding.account_id, age)
            .await;
    }

    let connector = Arc::new(WreqConnector::new(ConnectorConfig {
        base_url: config.upstream_base.clone(),
        proxy: config.proxy.clone(),
        connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        stream_idle_timeout: Duration::from_secs(config.stream_idle_timeout_secs),
    })?);

    let engine = Arc::new(StreamProxy::new(
        pool,
        ledger.clone(),
        sticky,
        connector,
        EngineConfig {
            max_retries: config.max_retries,
            channel_capacity: 32,
        },
    ));

    let core = Core::new(engine, ledger);
    let app = core.router();

    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, started_at = ?SystemTime::now(), "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("poolgate=info,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
