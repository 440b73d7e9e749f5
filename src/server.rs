//! gRPC server setup and lifecycle.
//!
//! Wires the metadata store, the leader election, the allocator manager and
//! the tonic service together, with graceful shutdown. On shutdown the
//! leader lease is resigned so another member can take over without waiting
//! for it to expire.

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::allocator::AllocatorSettings;
use crate::clock::SystemClock;
use crate::config::Config;
use crate::leadership::{LeadershipGuard, SqliteLeaseElection};
use crate::manager::AllocatorManager;
use crate::observability::http::{run_http_server, HttpState};
use crate::observability::metrics::init_metrics;
use crate::proto::meridian::v1::meridian_server::MeridianServer;
use crate::service::MeridianService;
use crate::storage::sqlite::SqliteBackend;
use crate::storage::SqliteCheckpointStore;

pub type ServerError = Box<dyn std::error::Error + Send + Sync>;

/// Server state shared across handlers.
pub struct ServerState {
    pub manager: Arc<AllocatorManager>,
}

/// Run the Meridian gRPC server on `config.listen_addr`.
///
/// Returns when the server has shut down.
pub async fn run_server(
    config: Config,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let listener = TcpListener::bind(config.listen_addr).await?;
    serve(config, listener, shutdown_rx).await
}

/// Run the server on an already bound listener.
pub async fn serve(
    config: Config,
    listener: TcpListener,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    config.validate()?;
    let addr = listener.local_addr()?;
    let member_id = config.member_name();

    let backend = SqliteBackend::open(&config.backend_endpoints, config.store_pool_size)?;
    let store = Arc::new(SqliteCheckpointStore::new(backend.clone()));
    let election = Arc::new(SqliteLeaseElection::new(backend));
    let guard = Arc::new(LeadershipGuard::new(
        member_id.clone(),
        election,
        config.leader_lease,
    ));
    let manager = AllocatorManager::new(
        guard.clone(),
        store,
        Arc::new(SystemClock),
        AllocatorSettings::from_config(&config),
        config.local_streams()?,
    );

    let cancel = CancellationToken::new();
    let guard_task = tokio::spawn(guard.clone().run(cancel.clone()));
    let manager_task = tokio::spawn(manager.clone().run(cancel.clone()));

    let http_task = match config.metrics_addr {
        Some(metrics_addr) => {
            let registry = init_metrics()?.registry().clone();
            let state = HttpState::new(registry, manager.clone());
            let shutdown = cancel.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = run_http_server(metrics_addr, state, shutdown).await {
                    tracing::error!(error = %e, "Metrics server failed");
                }
            }))
        }
        None => None,
    };

    let state = Arc::new(ServerState { manager });
    let service = MeridianService::new(state);

    tracing::info!(
        address = %addr,
        member_id = %member_id,
        backend = %config.backend_endpoints.display(),
        "Starting Meridian gRPC server"
    );

    let result = Server::builder()
        .add_service(MeridianServer::new(service))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            let _ = shutdown_rx.changed().await;
            tracing::info!("Shutdown signal received, stopping server");
        })
        .await;

    // Stop the election loop first: it resigns a held lease.
    cancel.cancel();
    let _ = guard_task.await;
    let _ = manager_task.await;
    if let Some(task) = http_task {
        let _ = task.await;
    }

    result?;
    tracing::info!("Server stopped");
    Ok(())
}
