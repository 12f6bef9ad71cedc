//! pricewatch server entry point.
//!
//! Builds the store and broker, starts the services of the configured role
//! and serves the REST and live push endpoints until Ctrl-C or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use pricewatch::api;
use pricewatch::app_state::AppState;
use pricewatch::broker::{Broker, MemoryBroker, PgBroker, Topic};
use pricewatch::config::{Backend, LogFormat, PipelineConfig};
use pricewatch::fetch::{HttpFetchClient, RateLimiter};
use pricewatch::persistence::{MemoryStore, PostgresStore, Store};
use pricewatch::service::{AlertMatcher, ChannelRegistry, Notifier, ReconcileEngine, Scheduler};
use pricewatch::shutdown::{self, ShutdownTrigger};

/// How long background tasks get to finish after the server stops.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env().context("loading configuration")?;
    init_tracing(config.log_format);
    tracing::info!(
        addr = %config.listen_addr,
        role = config.role.as_str(),
        store = ?config.store_backend,
        broker = ?config.broker_backend,
        "starting pricewatch"
    );

    let (trigger, signal) = shutdown::channel();

    // Build store and broker
    let postgres = if config.store_backend == Backend::Postgres
        || config.broker_backend == Backend::Postgres
    {
        let store = PostgresStore::connect(&config.pool_settings())
            .await
            .context("connecting to PostgreSQL")?;
        Some(store)
    } else {
        None
    };

    let store: Arc<dyn Store> = match (config.store_backend, &postgres) {
        (Backend::Postgres, Some(pg)) => Arc::new(pg.clone()),
        _ => Arc::new(MemoryStore::new()),
    };
    let broker: Arc<dyn Broker> = match (config.broker_backend, &postgres) {
        (Backend::Postgres, Some(pg)) => Arc::new(PgBroker::new(pg.pool().clone())),
        _ => Arc::new(MemoryBroker::new(config.broker_capacity)),
    };

    // Start services; consumers subscribe before any producer starts
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let notifier = if config.role.runs_notifier() {
        let notifier = Arc::new(Notifier::new(
            Arc::clone(&store),
            ChannelRegistry::new(config.live_channel_capacity),
            config.notifier_settings(),
        ));
        let notifications = broker
            .subscribe(Topic::NotifyUser)
            .await
            .context("subscribing to notify_user")?;
        tasks.extend(notifier.spawn(notifications, &signal));
        Some(notifier)
    } else {
        None
    };

    let matcher = if config.role.runs_analyzer() {
        let matcher = Arc::new(AlertMatcher::new(
            Arc::clone(&store),
            Arc::clone(&broker),
            config.matcher_settings(),
        ));
        let report = matcher.load().await.context("loading alert rules")?;
        tracing::info!(?report, "alert rules loaded");
        let changes = broker
            .subscribe(Topic::ItemChanged)
            .await
            .context("subscribing to item_changed")?;
        tasks.extend(matcher.spawn(changes, &signal));
        Some(matcher)
    } else {
        None
    };

    let scheduler = if config.role.runs_crawler() {
        let fetcher = HttpFetchClient::new(
            &config.fetch_base_url,
            &config.fetch_user_agent,
            config.request_timeout(),
        )
        .context("building fetch client")?;
        let limiter = RateLimiter::new(config.request_delay());
        tracing::info!(spacing_ms = limiter.period().as_millis(), "upstream rate limiter ready");
        let engine = ReconcileEngine::new(Arc::clone(&store), Arc::clone(&broker));
        let scheduler = Arc::new(Scheduler::new(
            Arc::new(fetcher),
            Arc::new(limiter),
            engine,
            Arc::clone(&store),
            config.scheduler_settings(),
        ));
        let report = scheduler.load().await.context("loading priorities")?;
        tracing::info!(?report, "priority table loaded");
        let updates = broker
            .subscribe(Topic::PriorityUpdate)
            .await
            .context("subscribing to priority_update")?;
        tasks.extend(scheduler.spawn(updates, &signal));
        Some(scheduler)
    } else {
        None
    };

    // Build application state and router
    let state = AppState {
        role: config.role,
        store,
        scheduler,
        matcher,
        notifier,
        keepalive: config.keepalive(),
        shutdown: signal,
    };
    let app = api::app(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(trigger))
        .await
        .context("serving HTTP")?;

    drain(tasks).await;
    tracing::info!("pricewatch stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn wait_for_shutdown(trigger: ShutdownTrigger) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown requested");
    trigger.trigger();
}

async fn drain(tasks: Vec<JoinHandle<()>>) {
    let all = futures_util::future::join_all(tasks);
    if tokio::time::timeout(DRAIN_TIMEOUT, all).await.is_err() {
        tracing::warn!("background tasks did not stop in time");
    }
}
