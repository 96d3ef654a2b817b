/// Server setup and initialization
///
/// Wires together all components: the version store, the bus connection, the
/// supervisor with its command consumers, and the HTTP routes.

use crate::{
    api::{create_workflow_routes, AppState},
    bus,
    config::Config,
    runtime::Supervisor,
    workflow::WorkflowStore,
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Create the Axum application with every background consumer running.
///
/// Dial failures against the database or the bus are fatal; the process is
/// expected to exit non-zero rather than limp along.
pub async fn create_app(config: &Config) -> Result<Router> {
    tracing::info!("🗄️ connecting to PostgreSQL");
    let store = WorkflowStore::connect(&config.database.postgres_uri).await?;

    tracing::info!("🔌 connecting to bus at {}", config.bus.nats_url);
    let client = bus::connect(&config.bus.nats_url).await?;

    let supervisor = Supervisor::new(
        config.bus.worker_name.clone(),
        client.clone(),
        store.clone(),
    )?;

    // Fleet command consumer: every worker sees every start/stop.
    let commands = Arc::clone(&supervisor);
    tokio::spawn(async move {
        if let Err(e) = commands.run_command_loop().await {
            tracing::error!("❌ workflow command loop terminated: {}", e);
        }
    });

    // Account-deletion fanout consumer.
    let deletions = Arc::clone(&supervisor);
    tokio::spawn(async move {
        if let Err(e) = deletions.run_account_delete_loop().await {
            tracing::error!("❌ account deletion loop terminated: {}", e);
        }
    });

    // Boot recovery: relaunch the workflows assigned to this worker.
    let recovery = Arc::clone(&supervisor);
    tokio::spawn(async move {
        if let Err(e) = recovery.recover_assigned().await {
            tracing::error!("❌ could not recover assigned workflows: {}", e);
        }
    });

    let state = AppState {
        store,
        bus: client,
        supervisor,
        worker_name: config.bus.worker_name.clone(),
    };

    let app = Router::new()
        .route("/", get(ping))
        .merge(create_workflow_routes().with_state(state));

    tracing::info!("✅ application initialized");
    Ok(app)
}

/// Start the HTTP server with the given configuration.
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    tracing::info!("🚀 starting flowmill worker '{}'", config.bus.worker_name);

    let app = create_app(&config).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("📡 server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Liveness ping handler
async fn ping() -> &'static str {
    "ok"
}
