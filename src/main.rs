//! Data Plane Signaling - service entry point
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌───────────┐    ┌──────────┐
//! │  Config  │───▶│  Store   │───▶│ Signaling │───▶│ HTTP API │
//! │  (YAML)  │    │ (PG/Mem) │    │  Service  │    │  (axum)  │
//! └──────────┘    └──────────┘    └─────┬─────┘    └──────────┘
//!                                       │
//!                                 RecoveryWorker
//! ```
//!
//! Usage: `dataplane_signaling [--env|-e <name>] [--port <port>]`

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use dataplane_signaling::config::AppConfig;
use dataplane_signaling::control_plane::{ControlPlaneClient, DataPlaneInstance};
use dataplane_signaling::data_flow::{DataFlowStore, InMemoryDataFlowStore, PgDataFlowStore};
use dataplane_signaling::db::Database;
use dataplane_signaling::gateway::{self, state::AppState};
use dataplane_signaling::signaling::{
    DataPlaneSdk, DefaultHooks, RecoveryWorker, SignalingService, WorkerConfig,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = dataplane_signaling::logging::init_logging(&app_config);

    info!("Starting data plane signaling in {} mode", env);

    let lease_duration = app_config.signaling.lease_duration();
    let (store, pg_db): (Arc<dyn DataFlowStore>, Option<Arc<Database>>) =
        match &app_config.postgres_url {
            Some(url) => {
                let db = Database::connect(url)
                    .await
                    .context("Failed to connect to PostgreSQL")?;
                db.init_schema()
                    .await
                    .context("Failed to initialize data flow schema")?;
                info!("PostgreSQL store ready");
                let store = PgDataFlowStore::with_lease_duration(db.pool().clone(), lease_duration);
                (Arc::new(store), Some(Arc::new(db)))
            }
            None => {
                warn!("No postgres_url configured, data flows are kept in memory only");
                (
                    Arc::new(InMemoryDataFlowStore::with_lease_duration(lease_duration)),
                    None,
                )
            }
        };

    let mut builder = DataPlaneSdk::builder()
        .store(store)
        .hooks(Arc::new(DefaultHooks))
        .allowed_transfer_types(app_config.signaling.allowed_transfer_types.iter().cloned());
    if let Some(runtime_id) = &app_config.signaling.runtime_id {
        builder = builder.runtime_id(runtime_id.clone());
    }
    let sdk = builder.build()?;
    info!(runtime_id = %sdk.runtime_id(), "Signaling SDK ready");

    let service = SignalingService::new(sdk);

    if app_config.worker.enabled {
        let worker = RecoveryWorker::new(service.clone(), WorkerConfig::from(&app_config.worker));
        tokio::spawn(async move {
            worker.run().await;
        });
    }

    let registration = match &app_config.control_plane {
        Some(cp) => {
            let client = ControlPlaneClient::new(&cp.url)?;
            let instance = DataPlaneInstance::from_config(
                cp,
                service.sdk().allowed_transfer_types(),
            );
            match client.register(&instance).await {
                Ok(id) => Some((client, id.id)),
                Err(e) => {
                    error!(error = %e, "Control plane registration failed");
                    None
                }
            }
        }
        None => None,
    };

    let port = get_port_override().unwrap_or(app_config.gateway.port);
    let state = Arc::new(AppState::new(service, pg_db));
    let served = gateway::run_server(&app_config.gateway.host, port, state, shutdown_signal()).await;

    if let Some((client, id)) = registration
        && let Err(e) = client.unregister(&id).await
    {
        warn!(error = %e, "Control plane unregistration failed");
    }

    served
}
