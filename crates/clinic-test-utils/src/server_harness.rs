//! Test server harness for E2E testing
//!
//! Provides `TestClinicServer` for spawning real clinic service instances in
//! tests. Notifications are captured by a `RecordingNotifier`.

use crate::fixtures::TestUser;
use clinic_service::config::Config;
use clinic_service::crypto::TokenSigner;
use clinic_service::routes::{self, AppState};
use clinic_service::services::notifier::RecordingNotifier;
use clinic_service::services::queue_broadcaster::QueueBroadcaster;
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::PgPool;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// 32 zero bytes, base64. Only ever used by tests.
pub const TEST_SIGNING_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

/// Base configuration for a test server.
///
/// Uses the lowest bcrypt cost so password and OTP hashing stay fast.
pub fn test_config_vars() -> HashMap<String, String> {
    HashMap::from([
        (
            "DATABASE_URL".to_string(),
            "postgresql://test/test".to_string(),
        ),
        ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        (
            "CLINIC_JWT_SIGNING_KEY".to_string(),
            TEST_SIGNING_KEY.to_string(),
        ),
        ("BCRYPT_COST".to_string(), "4".to_string()),
    ])
}

/// Build a test `Config`, with `overrides` applied on top of the defaults.
pub fn test_config(overrides: &[(&str, &str)]) -> Result<Config, anyhow::Error> {
    let mut vars = test_config_vars();
    for (key, value) in overrides {
        vars.insert((*key).to_string(), (*value).to_string());
    }
    Config::from_vars(&vars).map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))
}

/// Test harness for spawning the clinic service in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[sqlx::test(migrations = "../../migrations")]
/// async fn test_health_flow_e2e(pool: PgPool) -> Result<()> {
///     let server = TestClinicServer::spawn(pool).await?;
///
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestClinicServer {
    addr: SocketAddr,
    pool: PgPool,
    config: Config,
    signer: Arc<TokenSigner>,
    notifier: Arc<RecordingNotifier>,
    client: reqwest::Client,
    _handle: JoinHandle<()>,
}

impl TestClinicServer {
    /// Spawn a new test server instance with the default test configuration.
    pub async fn spawn(pool: PgPool) -> Result<Self, anyhow::Error> {
        Self::spawn_with(pool, test_config(&[])?, Arc::new(RecordingNotifier::new())).await
    }

    /// Spawn a test server with an explicit configuration and notifier.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    /// - Render metrics from a private recorder (nothing installed globally)
    pub async fn spawn_with(
        pool: PgPool,
        config: Config,
        notifier: Arc<RecordingNotifier>,
    ) -> Result<Self, anyhow::Error> {
        let signer = Arc::new(
            TokenSigner::from_seed(
                &config.jwt_signing_seed,
                config.access_token_ttl_seconds,
                config.jwt_clock_skew_seconds,
            )
            .map_err(|e| anyhow::anyhow!("Failed to create signer: {}", e))?,
        );

        let state = Arc::new(AppState {
            pool: pool.clone(),
            config: config.clone(),
            signer: signer.clone(),
            notifier: notifier.clone(),
            broadcaster: Arc::new(QueueBroadcaster::new()),
        });

        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();

        // Build routes using the service's real route builder
        let app = routes::build_routes(state, metrics_handle);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        // Spawn server in background
        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            pool,
            config,
            signer,
            notifier,
            client: reqwest::Client::new(),
            _handle: handle,
        })
    }

    /// Get reference to the database pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Absolute URL for an API path such as `/api/v1/me`.
    pub fn api(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared HTTP client.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Notifications the server has sent.
    pub fn notifier(&self) -> &RecordingNotifier {
        &self.notifier
    }

    /// Issue an access token for a seeded user with the server's key.
    pub fn token_for(&self, user: &TestUser) -> Result<String, anyhow::Error> {
        self.signer
            .issue(user.user_id, user.clinic_id, user.role)
            .map_err(|e| anyhow::anyhow!("Failed to issue token: {}", e))
    }
}

impl Drop for TestClinicServer {
    fn drop(&mut self) {
        // Abort the HTTP server task so the port is released when the test ends.
        self._handle.abort();
    }
}
