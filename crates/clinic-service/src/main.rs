//! Clinic Service
//!
//! Entry point for the clinic backend: REST API, live queue streams and the
//! reminder and cleanup background tasks.

use clinic_service::config::Config;
use clinic_service::crypto::TokenSigner;
use clinic_service::observability::metrics::init_metrics_recorder;
use clinic_service::routes::{self, AppState};
use clinic_service::services::accounts;
use clinic_service::services::notifier::{HttpNotifier, LogNotifier, Notifier};
use clinic_service::services::queue_broadcaster::QueueBroadcaster;
use clinic_service::tasks::{
    start_reminder_scheduler, start_session_cleanup, ReminderSchedulerConfig,
};
use common::config::{LogFormat, ObservabilityConfig, DEFAULT_LOG_FILTER};
use common::secret::SecretString;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Time background tasks get to finish their current iteration.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let observability = ObservabilityConfig::from_env();
    let filter = EnvFilter::try_new(&observability.log_filter)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    match observability.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    info!("Starting Clinic Service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        otp_ttl_seconds = config.otp_ttl_seconds,
        geofence_radius_meters = config.geofence_radius_meters,
        reminder_interval_seconds = config.reminder_interval_seconds,
        notifier = if config.notifier_url.is_some() { "http" } else { "log" },
        "Configuration loaded successfully"
    );

    // Install the Prometheus recorder before anything records metrics
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    // Initialize database connection pool with query timeout
    info!("Connecting to database...");
    let db_url_with_timeout = add_query_timeout(&config.database_url, 5);
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&db_url_with_timeout)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;

    info!("Database connection established");

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| {
            error!("Failed to run database migrations: {}", e);
            e
        })?;

    info!("Database migrations applied");

    let signer = Arc::new(TokenSigner::from_seed(
        &config.jwt_signing_seed,
        config.access_token_ttl_seconds,
        config.jwt_clock_skew_seconds,
    )?);
    info!(kid = %signer.key_id(), "Token signer initialized");

    if let (Some(email), Some(password)) = (&config.super_admin_email, &config.super_admin_password)
    {
        accounts::bootstrap_super_admin(
            &db_pool,
            email,
            &SecretString::from(password.clone()),
            config.bcrypt_cost,
        )
        .await?;
    }

    let notifier: Arc<dyn Notifier> = match &config.notifier_url {
        Some(url) => Arc::new(HttpNotifier::new(
            url.clone(),
            config.notifier_api_key.clone(),
        )?),
        None => {
            warn!("NOTIFIER_URL not set, notifications will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let bind_address = config.bind_address.clone();
    let drain_seconds = config.drain_seconds;
    let scheduler_config = ReminderSchedulerConfig::from_config(&config);

    // Create application state
    let state = Arc::new(AppState {
        pool: db_pool.clone(),
        config,
        signer,
        notifier: Arc::clone(&notifier),
        broadcaster: Arc::new(QueueBroadcaster::new()),
    });

    // Build application routes
    let app = routes::build_routes(state, metrics_handle);

    // Background tasks share one shutdown token
    let shutdown_token = CancellationToken::new();

    let reminder_task = tokio::spawn(start_reminder_scheduler(
        db_pool.clone(),
        notifier,
        scheduler_config,
        shutdown_token.child_token(),
    ));
    let cleanup_task = tokio::spawn(start_session_cleanup(
        db_pool,
        shutdown_token.child_token(),
    ));

    // Parse bind address
    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    // Bind listener before spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Clinic Service listening on {}", addr);

    let server_token = shutdown_token.child_token();
    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { server_token.cancelled().await })
        .await
    });

    shutdown_signal().await;
    shutdown_token.cancel();

    // Live queue streams never finish on their own; they are cut after the drain period
    warn!("Draining connections for {} seconds...", drain_seconds);
    match tokio::time::timeout(Duration::from_secs(drain_seconds), server).await {
        Ok(Ok(Ok(()))) => info!("Server stopped"),
        Ok(Ok(Err(e))) => error!(error = %e, "Server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "Server task failed"),
        Err(_) => warn!("Drain period elapsed, closing remaining connections"),
    }

    for (name, task) in [("reminder_scheduler", reminder_task), ("session_cleanup", cleanup_task)] {
        if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, task).await.is_err() {
            warn!(task = name, "Background task did not stop in time");
        }
    }

    info!("Clinic Service shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Adds statement_timeout to the database URL.
/// This ensures queries don't hang indefinitely.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}options=-c%20statement_timeout%3D{}s",
        url, separator, timeout_secs
    )
}
