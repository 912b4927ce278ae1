use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use chain_proxy::{
    auth::AuthService,
    chain_client::HttpEventSource,
    config::{Config, SourceKind},
    database::Database,
    downstream::HttpConsumer,
    gateway::HttpWalletGateway,
    handlers::{self, AppState},
};
use dotenv::dotenv;
use std::sync::Arc;
use sync_core::source::scripted::ScriptedSource;
use sync_core::{EventSource, SyncMetrics, SyncPipeline, WorkerPool};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false);

    if std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    info!("Starting Chain Proxy on port {}", config.server.port);

    let db = Arc::new(
        Database::new(
            &config.database.url,
            config.database.max_connections,
            std::time::Duration::from_secs(config.database.acquire_timeout_secs),
        )
        .await
        .context("Failed to connect to database")?,
    );
    if config.database.run_migrations {
        db.migrate().await.context("Failed to run migrations")?;
    }

    let source: Arc<dyn EventSource> = match config.chain.source {
        SourceKind::Http => Arc::new(HttpEventSource::new(
            config.chain.rpc_url.clone(),
            config.chain.page_limit,
            config.chain.poll_interval(),
            config.chain.request_timeout(),
        )?),
        SourceKind::Mock => Arc::new(ScriptedSource::live(Vec::new())),
    };
    let consumer = Arc::new(HttpConsumer::new(
        config.downstream.url.clone(),
        config.downstream.request_timeout(),
    )?);
    let gateway = Arc::new(HttpWalletGateway::new(
        config.gateway.url.clone(),
        config.gateway.request_timeout(),
    )?);

    let metrics = Arc::new(SyncMetrics::new().context("Failed to create metrics")?);
    let pipeline = SyncPipeline::new(
        config.sync.clone(),
        db.clone(),
        source,
        consumer,
        metrics.clone(),
    )?;

    let shutdown = CancellationToken::new();
    let pool = WorkerPool::new(config.sync.worker_count, &shutdown);
    pool.start();
    pipeline.submit_to(&pool).await?;
    info!(
        contract = %config.sync.contract_name,
        topic = %config.sync.topic,
        workers = pool.size(),
        "Sync pipeline started"
    );

    let state = web::Data::new(AppState {
        auth: AuthService::new(
            db.clone(),
            gateway,
            config.sync.contract_name.clone(),
            config.chain.chain_id.clone(),
        ),
        logs: db,
        metrics,
    });

    // Runs until SIGINT/SIGTERM
    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .app_data(state.clone())
            .configure(handlers::configure_routes)
    })
    .workers(config.server.workers)
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    info!("Shutting down sync pipeline");
    shutdown.cancel();
    pool.stop().await;

    Ok(())
}
