use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{Subscriber, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use call_insights::api::{self, AppState};
use call_insights::cache::{self, Cache};
use call_insights::clients::{AddonRegistry, LlmCallAnalyzer, TwilioLookup};
use call_insights::config::ServiceConfig;
use call_insights::pipeline::{
    BackgroundTasks, EnrichmentOrchestrator, TriggerDispatcher, WebhookDispatcher,
};
use call_insights::store::{Database, LibSqlBackend};

const LOG_FILE_PREFIX: &str = "call-insights.log";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env().context("invalid configuration")?;

    // Keep the appender guard alive for the life of the process.
    let _log_guard = init_tracing(&config);

    info!(
        port = config.port,
        db = %config.db_path.display(),
        model = %config.llm.model,
        "Starting call-insights v{}",
        env!("CARGO_PKG_VERSION")
    );

    // ── Store ───────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );

    // ── Cache ───────────────────────────────────────────────────────────
    let cache = Arc::new(Cache::in_memory(config.cache.clone()));
    let _sweep_handle = cache::spawn_sweep_task(cache.clone());

    // ── Pipeline ────────────────────────────────────────────────────────
    let client = reqwest::Client::new();
    let tasks = BackgroundTasks::new();

    let triggers = Arc::new(TriggerDispatcher::new(
        db.clone(),
        client.clone(),
        config.trigger_body_limit,
    ));
    let enrichment = Arc::new(EnrichmentOrchestrator::new(
        db.clone(),
        cache.clone(),
        Arc::new(LlmCallAnalyzer::new(config.llm.clone())),
        Arc::new(AddonRegistry::with_builtins(client.clone())),
        triggers,
    ));
    let dispatcher = Arc::new(WebhookDispatcher::new(
        db.clone(),
        cache.clone(),
        Arc::new(TwilioLookup::new(client, config.twilio_lookup_url.clone())),
        enrichment,
        tasks.clone(),
    ));

    // ── HTTP ────────────────────────────────────────────────────────────
    let app = api::router(AppState {
        db,
        cache,
        dispatcher,
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received CTRL+C, shutting down");
        })
        .await
        .context("server error")?;

    let drained = tasks.shutdown(config.shutdown_grace).await;
    info!(drained, "Shutdown complete");
    Ok(())
}

/// Console logging always; a daily-rolling file as well when a log directory is set.
fn init_tracing(config: &ServiceConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (subscriber, guard) = build_subscriber(filter, config.log_dir.as_deref());
    subscriber.init();
    guard
}

fn build_subscriber(
    filter: EnvFilter,
    log_dir: Option<&Path>,
) -> (impl Subscriber + Send + Sync + 'static, Option<WorkerGuard>) {
    let (file_writer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };
    let file_layer = file_writer.map(|writer| {
        fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(writer)
    });

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer);
    (subscriber, guard)
}
