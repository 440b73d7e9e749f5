//! Meridian: a timestamp oracle.
//!
//! # Usage
//!
//! ```bash
//! meridian --listen-addr 127.0.0.1:3379 --backend-endpoints ./data/meridian.db
//! ```
//!
//! Environment variables can also be used:
//! - `MERIDIAN_LISTEN_ADDR`: gRPC listen address
//! - `MERIDIAN_BACKEND_ENDPOINTS`: Shared SQLite metadata store
//! - `MERIDIAN_METRICS_ADDR`: Metrics and health endpoint
//! - `RUST_LOG`: Log filter (overrides `--log-level`)

use meridian::config::Config;
use meridian::observability::metrics::init_metrics;
use meridian::observability::tracing::init_tracing;
use meridian::server::{run_server, ServerError};
use tokio::sync::watch;

/// Print startup banner with version and configuration.
fn print_banner(config: &Config, member_id: &str) {
    let version = env!("CARGO_PKG_VERSION");
    let regions = if config.enable_local_tso {
        config.local_tso_regions.join(",")
    } else {
        "-".to_string()
    };
    eprintln!(
        r#"
  Meridian v{} - Timestamp Oracle

  Configuration:
    Member:        {}
    Address:       {}
    Backend:       {}
    Local regions: {}
    Tick:          {}
    Save interval: {}

  Press Ctrl+C to shutdown gracefully.
"#,
        version,
        member_id,
        config.listen_addr,
        config.backend_endpoints.display(),
        regions,
        humantime::format_duration(config.tso_update_physical_interval),
        humantime::format_duration(config.tso_save_interval),
    );
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    // Parse configuration from CLI arguments and environment
    let mut config = Config::parse_args();

    init_tracing(&config.log_level, config.log_format)?;
    init_metrics()?;

    // Fix the member name once so the banner and the election agree.
    let member_id = config.member_name();
    config.name = Some(member_id.clone());
    print_banner(&config, &member_id);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating shutdown...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.expect("failed to listen for ctrl+c");
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }

        let _ = shutdown_tx.send(true);
    });

    run_server(config, shutdown_rx).await?;

    tracing::info!("Meridian shutdown complete");
    Ok(())
}
