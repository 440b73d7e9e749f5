//! Test utilities and server harness for Meridian tests.
//!
//! Provides:
//! - In-process test server setup on an ephemeral port
//! - gRPC client helpers
//! - Test database fixtures

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use meridian::client::{ConnectConfig, MeridianClient};
use meridian::config::Config;
use meridian::observability::tracing::init_test_tracing;
use meridian::server::serve;

/// Test fixture that manages a temporary database directory.
///
/// The directory is automatically cleaned up when the fixture is dropped.
pub struct TestFixture {
    /// Temporary directory for test database
    pub temp_dir: TempDir,
    /// Path to the database file
    pub db_path: PathBuf,
}

impl TestFixture {
    /// Create a new test fixture with a temporary database directory.
    pub fn new() -> Self {
        init_test_tracing();
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let db_path = temp_dir.path().join("meridian.db");
        Self { temp_dir, db_path }
    }

    /// Server configuration pointing at this fixture's database.
    pub fn config(&self, name: &str) -> Config {
        Config {
            name: Some(name.to_string()),
            ..Config::test_config(self.db_path.clone())
        }
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// An in-process Meridian server.
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a server and wait until it serves the global stream.
    pub async fn start(config: Config) -> Self {
        let server = Self::spawn(config).await;
        let client = server.client().await;
        let ready = wait_for_async(Duration::from_secs(10), || {
            let mut client = client.clone();
            async move { is_serving(&mut client).await }
        })
        .await;
        assert!(ready, "server never became ready");
        server
    }

    /// Start a server without waiting for leadership.
    pub async fn spawn(config: Config) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind test listener");
        let addr = listener.local_addr().expect("no local addr");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            if let Err(e) = serve(config, listener, shutdown_rx).await {
                panic!("test server failed: {e}");
            }
        });

        Self {
            addr,
            shutdown_tx,
            handle,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn client(&self) -> MeridianClient {
        MeridianClient::connect(ConnectConfig::plaintext(self.endpoint()))
            .await
            .expect("failed to connect to test server")
    }

    /// Stop the server and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked");
    }
}

/// Whether the server behind `client` serves the global stream.
pub async fn is_serving(client: &mut MeridianClient) -> bool {
    match client.status().await {
        Ok(status) => status
            .streams
            .iter()
            .any(|s| s.stream == "global" && s.ready),
        Err(_) => false,
    }
}

/// Wait for a condition to become true with timeout.
///
/// Returns `true` if the condition was met, `false` if the timeout expired.
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Async variant of [`wait_for`].
pub async fn wait_for_async<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
