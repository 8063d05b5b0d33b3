//! HTTP routes for the clinic service.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::crypto::TokenSigner;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_auth, AuthState};
use crate::services::notifier::Notifier;
use crate::services::queue_broadcaster::QueueBroadcaster;
use axum::{
    extract::Request,
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::Span;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: PgPool,

    /// Service configuration.
    pub config: Config,

    /// Issues and verifies access tokens.
    pub signer: Arc<TokenSigner>,

    /// SMS and email delivery.
    pub notifier: Arc<dyn Notifier>,

    /// Live queue fan-out to SSE and WebSocket viewers.
    pub broadcaster: Arc<QueueBroadcaster>,
}

/// Span for one HTTP request.
///
/// Records the path only. Stream clients carry their access token in the
/// query string, so the query never reaches the logs.
fn request_span(request: &Request) -> Span {
    tracing::debug_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        version = ?request.version(),
    )
}

/// Build the application routes.
///
/// Public:
/// - `/health`, `/ready`, `/metrics` - operational, unversioned
/// - `/api/v1/clinics/register`, `GET /api/v1/clinics[/:id]`, `/api/v1/doctors`
/// - `/api/v1/auth/*` - registration, OTP and password login
///
/// Everything else under `/api/v1` requires an access token.
///
/// Layers: HTTP metrics (outermost), TraceLayer, 30 second timeout. Streaming
/// responses are not cut by the timeout once their head has been sent.
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        signer: state.signer.clone(),
    });
    let auth_layer = middleware::from_fn_with_state(auth_state, require_auth);

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/api/v1/auth/register", post(handlers::register_account))
        .route("/api/v1/auth/otp/request", post(handlers::request_otp))
        .route("/api/v1/auth/otp/verify", post(handlers::verify_otp))
        .route("/api/v1/auth/login", post(handlers::login))
        .route("/api/v1/clinics/register", post(handlers::register_clinic))
        .route("/api/v1/clinics", get(handlers::list_clinics))
        // Public read, admin-only update on the same path
        .route(
            "/api/v1/clinics/:clinic_id",
            get(handlers::get_clinic)
                .merge(patch(handlers::update_clinic).route_layer(auth_layer.clone())),
        )
        .route("/api/v1/doctors", get(handlers::list_doctors))
        .with_state(state.clone());

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route("/api/v1/me", get(handlers::get_me))
        // Clinic administration
        .route(
            "/api/v1/clinics/:clinic_id/approve",
            post(handlers::approve_clinic),
        )
        .route(
            "/api/v1/clinics/:clinic_id/suspend",
            post(handlers::suspend_clinic),
        )
        // Users
        .route(
            "/api/v1/users",
            get(handlers::list_users).post(handlers::create_user),
        )
        .route("/api/v1/users/:user_id/approve", post(handlers::approve_user))
        .route("/api/v1/users/:user_id/reject", post(handlers::reject_user))
        // Appointments
        .route(
            "/api/v1/appointments",
            get(handlers::list_appointments).post(handlers::create_appointment),
        )
        .route(
            "/api/v1/appointments/:appointment_id",
            get(handlers::get_appointment),
        )
        .route(
            "/api/v1/appointments/:appointment_id/cancel",
            post(handlers::cancel_appointment),
        )
        // Queue
        .route("/api/v1/queue/walk-in", post(handlers::walk_in))
        .route(
            "/api/v1/queue/tokens/:token_id/check-in",
            post(handlers::check_in),
        )
        .route(
            "/api/v1/queue/tokens/:token_id/complete",
            post(handlers::complete_token),
        )
        .route(
            "/api/v1/queue/tokens/:token_id/skip",
            post(handlers::skip_token),
        )
        .route("/api/v1/queue/:doctor_id", get(handlers::get_queue))
        .route(
            "/api/v1/queue/:doctor_id/call-next",
            post(handlers::call_next),
        )
        .route("/api/v1/queue/:doctor_id/delay", post(handlers::report_delay))
        .route("/api/v1/queue/:doctor_id/events", get(handlers::queue_events))
        .route("/api/v1/queue/:doctor_id/ws", get(handlers::queue_ws))
        // Medicines
        .route(
            "/api/v1/medicines",
            get(handlers::list_medicines).post(handlers::create_medicine),
        )
        .route(
            "/api/v1/medicines/:medicine_id",
            get(handlers::get_medicine)
                .patch(handlers::update_medicine)
                .delete(handlers::delete_medicine),
        )
        .route(
            "/api/v1/medicines/:medicine_id/stock",
            post(handlers::adjust_stock),
        )
        // Prescriptions
        .route(
            "/api/v1/prescriptions",
            get(handlers::list_prescriptions).post(handlers::create_prescription),
        )
        .route(
            "/api/v1/prescriptions/:prescription_id",
            get(handlers::get_prescription),
        )
        // Reminders
        .route(
            "/api/v1/reminders",
            get(handlers::list_reminders).post(handlers::create_reminder),
        )
        .route(
            "/api/v1/reminders/:reminder_id",
            delete(handlers::delete_reminder),
        )
        // Emergencies
        .route(
            "/api/v1/emergencies",
            get(handlers::list_emergencies).post(handlers::create_emergency),
        )
        .route(
            "/api/v1/emergencies/:request_id",
            patch(handlers::update_emergency),
        )
        .route_layer(auth_layer)
        .with_state(state);

    // Merge routes and apply global middleware layers
    // Layer order (the last added runs first):
    // 1. TraceLayer - Log request details (innermost)
    // 2. TimeoutLayer - Timeout the request
    // 3. http_metrics_middleware - Record ALL responses (outermost)
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::services::notifier::LogNotifier;
    use axum::body::Body;
    use base64::{engine::general_purpose, Engine};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::collections::HashMap;
    use std::io;
    use std::sync::Mutex;
    use tower::ServiceExt;
    use tracing_subscriber::fmt::MakeWriter;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone + Send + Sync>() {}
        assert_clone::<AppState>();
    }

    /// Log sink shared between the subscriber and the test.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn test_router() -> Router {
        let vars = HashMap::from([
            (
                "DATABASE_URL".to_string(),
                "postgresql://test/test".to_string(),
            ),
            (
                "CLINIC_JWT_SIGNING_KEY".to_string(),
                general_purpose::STANDARD.encode([3u8; 32]),
            ),
        ]);
        let config = Config::from_vars(&vars).unwrap();
        let signer = TokenSigner::from_seed(
            &config.jwt_signing_seed,
            config.access_token_ttl_seconds,
            config.jwt_clock_skew_seconds,
        )
        .unwrap();
        // Never connects: the requests below are rejected before any query
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap();

        let state = Arc::new(AppState {
            pool,
            config,
            signer: Arc::new(signer),
            notifier: Arc::new(LogNotifier),
            broadcaster: Arc::new(QueueBroadcaster::new()),
        });
        build_routes(state, PrometheusBuilder::new().build_recorder().handle())
    }

    #[tokio::test]
    async fn test_query_access_token_stays_out_of_logs() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(logs.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/me?access_token=leaked-bearer-credential")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), 401);

        let output = logs.contents();
        assert!(output.contains("path=/api/v1/me"), "{output}");
        assert!(!output.contains("leaked-bearer-credential"), "{output}");
        assert!(!output.contains("access_token="), "{output}");
    }
}
