use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

use tribunal_core::directory::HttpDirectoryClient;
use tribunal_core::evidence_store::HttpEvidenceStoreClient;
use tribunal_core::notify::{HttpNotifierClient, Notifier, TracingNotifier};

use tribunal_server::config::Config;
use tribunal_server::orchestrator::Orchestrator;
use tribunal_server::repository::SqliteRepository;
use tribunal_server::routes::router;
use tribunal_server::sweep::deadline_sweep_loop;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting adjudication service");

    let config =
        Config::from_env().expect("Failed to load configuration from environment variables");

    let db_path = config.db_path();
    info!("Using state database: {}", db_path.display());
    let repository =
        Arc::new(SqliteRepository::new(&db_path).expect("Failed to initialize SQLite database"));

    let directory = Arc::new(HttpDirectoryClient::new(&config.directory_base_url));
    let evidence_store = Arc::new(HttpEvidenceStoreClient::new(&config.evidence_store_base_url));
    let notifier: Arc<dyn Notifier> = match &config.notify_base_url {
        Some(base_url) => Arc::new(HttpNotifierClient::new(base_url)),
        None => {
            info!("NOTIFY_BASE_URL not set, notifications go to the log only");
            Arc::new(TracingNotifier)
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(
        repository,
        directory,
        evidence_store,
        notifier,
        config.engine_config(),
    ));

    let app = router(orchestrator.clone())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let sweep_orchestrator = orchestrator.clone();
    let sweep_interval = config.sweep_interval_secs;
    tokio::spawn(async move {
        deadline_sweep_loop(sweep_orchestrator, sweep_interval).await;
    });

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
