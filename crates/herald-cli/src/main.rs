//! `herald`: runs the event queue as a service.
//!
//! Loads `herald.toml`, opens the event store, serves the HTTP API and runs
//! the worker pool until ctrl-c.

mod builtins;
mod config;
mod http;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use herald_core::app::{App, AppBuilder};
use herald_core::impls::{InMemoryAuditLog, InMemoryWebhookEndpointStore};
use herald_core::ports::{Clock, EventStore, SystemClock, UlidGenerator, WebhookEndpointStore};
use herald_core::producers::{FunctionCallAdapter, WebhookReceiver};
use herald_core::queue::InMemoryEventStore;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::builtins::{EchoFunction, LogHandler, NoopHandler};
use crate::config::{HeraldConfig, LogFormat, StorageBackend};

#[derive(Debug, Parser)]
#[command(name = "herald", version, about = "Durable event queue and retry scheduler")]
struct Args {
    /// Path to herald.toml; built-in defaults when omitted.
    #[arg(long, short, env = "HERALD_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `server.bind_address`.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => HeraldConfig::from_file(path)?,
        None => HeraldConfig::default(),
    }
    .with_env_overrides();

    init_tracing(config.server.log_format);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_store(&config, Arc::clone(&clock)).await?;

    let app = AppBuilder::new()
        .register("log", Arc::new(LogHandler))?
        .register("noop", Arc::new(NoopHandler))?
        .define_all(config.handler_definitions())
        .with_store(store)
        .with_clock(Arc::clone(&clock))
        .with_dispatcher_config(config.dispatcher.dispatcher_config())
        .build()
        .context("invalid handler configuration")?;
    info!(handlers = ?app.handlers.names(), "handlers registered");

    let state = http_state(&app, &config).await?;
    let pool = app.spawn_workers(
        config.dispatcher.pool_config(),
        config.reaper.reaper_config(),
    );

    let bind = args.bind.unwrap_or_else(|| config.server.bind_address.clone());
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(address = %bind, "herald listening");

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    pool.shutdown_and_join().await;
    info!("herald stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
}

async fn open_store(config: &HeraldConfig, clock: Arc<dyn Clock>) -> Result<Arc<dyn EventStore>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            info!("using in-memory event store");
            Ok(Arc::new(InMemoryEventStore::with_clock(
                config.retry.clone(),
                clock,
            )))
        }
        StorageBackend::Postgres => open_postgres(config).await,
    }
}

#[cfg(feature = "postgres")]
async fn open_postgres(config: &HeraldConfig) -> Result<Arc<dyn EventStore>> {
    use herald_core::queue::PostgresEventStore;

    let url = config.storage.database_url.as_deref().with_context(|| {
        format!(
            "storage.database_url (or {}) is required for the postgres backend",
            config::DATABASE_URL_ENV
        )
    })?;
    let store = PostgresEventStore::connect(
        url,
        config.storage.max_connections,
        config.retry.clone(),
    )
    .await?;
    store.migrate().await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(_config: &HeraldConfig) -> Result<Arc<dyn EventStore>> {
    anyhow::bail!("herald was built without the `postgres` feature")
}

async fn http_state(app: &App, config: &HeraldConfig) -> Result<http::AppState> {
    let ids = Arc::new(UlidGenerator::new(Arc::clone(&app.clock)));
    let audit = Arc::new(InMemoryAuditLog::new());

    let endpoints = Arc::new(InMemoryWebhookEndpointStore::new());
    for endpoint in &config.webhooks {
        endpoints.upsert(endpoint.clone()).await?;
    }

    let emitter = app.emitter();
    let mut functions = FunctionCallAdapter::new(
        emitter.clone(),
        audit.clone(),
        ids.clone(),
        Arc::clone(&app.clock),
    );
    functions.register_reply("echo", Arc::new(EchoFunction))?;
    for function in &config.functions {
        functions
            .register_enqueue(function.name.clone(), function.target.clone())
            .with_context(|| format!("duplicate function {}", function.name))?;
    }

    let webhooks = WebhookReceiver::new(
        endpoints,
        audit,
        Arc::clone(&app.store),
        ids,
        Arc::clone(&app.clock),
    );

    Ok(http::AppState {
        emitter,
        store: Arc::clone(&app.store),
        webhooks: Arc::new(webhooks),
        functions: Arc::new(functions),
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        return;
    }
    info!("shutdown requested");
}
