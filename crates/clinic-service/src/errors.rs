//! Clinic service error types.
//!
//! All errors map to appropriate HTTP status codes via the `IntoResponse` impl.
//! Database and internal failures are logged server-side and replaced with
//! generic messages before reaching the client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::jwt::JwtValidationError;
use serde::Serialize;
use thiserror::Error;

/// Clinic service error type.
///
/// Maps to HTTP status codes:
/// - Database, Internal: 500 Internal Server Error
/// - InvalidToken, InvalidCredentials: 401 Unauthorized
/// - NotFound: 404 Not Found
/// - Conflict: 409 Conflict
/// - Forbidden, Geofence: 403 Forbidden
/// - BadRequest: 400 Bad Request
/// - RateLimitExceeded: 429 Too Many Requests
/// - ServiceUnavailable: 503 Service Unavailable
#[derive(Debug, Error)]
pub enum ClinicError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Outside clinic geofence: {distance_meters:.0}m from clinic, limit {radius_meters:.0}m")]
    Geofence {
        distance_meters: f64,
        radius_meters: f64,
    },

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClinicError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ClinicError::Database(_) | ClinicError::Internal(_) => 500,
            ClinicError::InvalidToken(_) | ClinicError::InvalidCredentials => 401,
            ClinicError::NotFound(_) => 404,
            ClinicError::Conflict(_) => 409,
            ClinicError::Forbidden(_) | ClinicError::Geofence { .. } => 403,
            ClinicError::BadRequest(_) => 400,
            ClinicError::RateLimitExceeded => 429,
            ClinicError::ServiceUnavailable(_) => 503,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for ClinicError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ClinicError::Database(err) => {
                tracing::error!(target: "clinic.database", error = %err, "Database operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            ClinicError::InvalidToken(reason) => {
                (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", reason.clone())
            }
            ClinicError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                "Invalid credentials".to_string(),
            ),
            ClinicError::NotFound(resource) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", resource.clone())
            }
            ClinicError::Conflict(reason) => (StatusCode::CONFLICT, "CONFLICT", reason.clone()),
            ClinicError::Forbidden(reason) => {
                (StatusCode::FORBIDDEN, "FORBIDDEN", reason.clone())
            }
            ClinicError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            ClinicError::Geofence { .. } => (
                StatusCode::FORBIDDEN,
                "OUTSIDE_GEOFENCE",
                self.to_string(),
            ),
            ClinicError::RateLimitExceeded => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMIT_EXCEEDED",
                "Too many attempts. Please try again later.".to_string(),
            ),
            ClinicError::ServiceUnavailable(reason) => {
                tracing::warn!(target: "clinic.availability", reason = %reason, "Service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                )
            }
            ClinicError::Internal(err) => {
                tracing::error!(target: "clinic.internal", error = %err, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) =
                "Bearer realm=\"clinic-api\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

impl From<sqlx::Error> for ClinicError {
    fn from(err: sqlx::Error) -> Self {
        ClinicError::Database(err.to_string())
    }
}

impl From<JwtValidationError> for ClinicError {
    fn from(err: JwtValidationError) -> Self {
        ClinicError::InvalidToken(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            ClinicError::Database("connection failed".to_string()).to_string(),
            "Database error: connection failed"
        );
        assert_eq!(
            ClinicError::NotFound("Appointment not found".to_string()).to_string(),
            "Not found: Appointment not found"
        );
        assert_eq!(ClinicError::InvalidCredentials.to_string(), "Invalid credentials");
        assert_eq!(ClinicError::RateLimitExceeded.to_string(), "Rate limit exceeded");
        assert_eq!(
            ClinicError::Geofence {
                distance_meters: 1234.4,
                radius_meters: 200.0
            }
            .to_string(),
            "Outside clinic geofence: 1234m from clinic, limit 200m"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ClinicError::Database("x".to_string()).status_code(), 500);
        assert_eq!(ClinicError::InvalidToken("x".to_string()).status_code(), 401);
        assert_eq!(ClinicError::InvalidCredentials.status_code(), 401);
        assert_eq!(ClinicError::NotFound("x".to_string()).status_code(), 404);
        assert_eq!(ClinicError::Conflict("x".to_string()).status_code(), 409);
        assert_eq!(ClinicError::Forbidden("x".to_string()).status_code(), 403);
        assert_eq!(ClinicError::BadRequest("x".to_string()).status_code(), 400);
        assert_eq!(
            ClinicError::Geofence {
                distance_meters: 1.0,
                radius_meters: 0.5
            }
            .status_code(),
            403
        );
        assert_eq!(ClinicError::RateLimitExceeded.status_code(), 429);
        assert_eq!(
            ClinicError::ServiceUnavailable("x".to_string()).status_code(),
            503
        );
        assert_eq!(ClinicError::Internal("x".to_string()).status_code(), 500);
    }

    #[tokio::test]
    async fn test_into_response_hides_database_details() {
        let response =
            ClinicError::Database("relation \"users\" does not exist".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "DATABASE_ERROR");
        assert_eq!(body["error"]["message"], "An internal database error occurred");
    }

    #[tokio::test]
    async fn test_into_response_hides_internal_details() {
        let response = ClinicError::Internal("bcrypt exploded".to_string()).into_response();

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(body["error"]["message"], "An internal error occurred");
    }

    #[tokio::test]
    async fn test_into_response_unauthorized_sets_www_authenticate() {
        let response = ClinicError::InvalidToken("token expired".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let www_auth = response
            .headers()
            .get("WWW-Authenticate")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(www_auth.contains("Bearer realm=\"clinic-api\""));

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "INVALID_TOKEN");
        assert_eq!(body["error"]["message"], "token expired");
    }

    #[tokio::test]
    async fn test_into_response_invalid_credentials() {
        let response = ClinicError::InvalidCredentials.into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("WWW-Authenticate"));

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "INVALID_CREDENTIALS");
    }

    #[tokio::test]
    async fn test_into_response_geofence() {
        let response = ClinicError::Geofence {
            distance_meters: 850.0,
            radius_meters: 200.0,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "OUTSIDE_GEOFENCE");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("850m"));
    }

    #[tokio::test]
    async fn test_into_response_conflict_keeps_reason() {
        let response = ClinicError::Conflict("Slot already booked".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["message"], "Slot already booked");
    }

    #[tokio::test]
    async fn test_into_response_service_unavailable_is_generic() {
        let response =
            ClinicError::ServiceUnavailable("sms gateway 502".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["message"], "Service temporarily unavailable");
    }

    #[test]
    fn test_from_jwt_error() {
        let err: ClinicError = JwtValidationError::TokenTooLarge.into();
        assert!(matches!(err, ClinicError::InvalidToken(_)));
        assert_eq!(err.status_code(), 401);
    }
}
