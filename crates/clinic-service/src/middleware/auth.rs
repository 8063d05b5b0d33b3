//! Authentication middleware for protected routes.
//!
//! Reads the access token from the `Authorization: Bearer` header, or from
//! the `access_token` query parameter for EventSource and WebSocket clients
//! that cannot set headers. Verified claims and the parsed [`AuthUser`] are
//! stored in request extensions for handlers.

use crate::crypto::TokenSigner;
use crate::errors::ClinicError;
use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::IntoResponse,
};
use common::jwt::UserClaims;
use common::types::Role;
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub signer: Arc<TokenSigner>,
}

#[derive(Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

/// The caller, parsed from verified claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub clinic_id: Option<Uuid>,
    pub role: Role,
}

impl AuthUser {
    pub fn from_claims(claims: &UserClaims) -> Result<Self, ClinicError> {
        Ok(Self {
            user_id: claims.user_id()?.0,
            clinic_id: claims.clinic_id()?.map(|c| c.0),
            role: claims.role,
        })
    }

    /// Clinic the caller works in or is a patient of.
    ///
    /// Super-admins have none and get 403 on clinic-scoped routes.
    pub fn clinic(&self) -> Result<Uuid, ClinicError> {
        self.clinic_id
            .ok_or_else(|| ClinicError::Forbidden("Not a member of any clinic".to_string()))
    }

    pub fn is_patient(&self) -> bool {
        self.role == Role::Patient
    }

    /// Staff, clinic admin or doctor.
    pub fn is_clinic_member(&self) -> bool {
        self.role.is_clinic_member()
    }
}

/// Require one of `roles`.
pub fn require_role(user: &AuthUser, roles: &[Role]) -> Result<(), ClinicError> {
    if roles.contains(&user.role) {
        Ok(())
    } else {
        tracing::debug!(target: "clinic.middleware.auth", role = %user.role, "Role not permitted");
        Err(ClinicError::Forbidden(
            "Your role cannot perform this action".to_string(),
        ))
    }
}

/// Require the caller to belong to `clinic_id`. Super-admins pass.
pub fn ensure_same_clinic(user: &AuthUser, clinic_id: Uuid) -> Result<(), ClinicError> {
    if user.role == Role::SuperAdmin || user.clinic_id == Some(clinic_id) {
        Ok(())
    } else {
        Err(ClinicError::Forbidden(
            "Resource belongs to another clinic".to_string(),
        ))
    }
}

fn bearer_token(req: &Request) -> Result<Option<String>, ClinicError> {
    match req.headers().get("authorization") {
        Some(value) => {
            let value = value.to_str().map_err(|_| {
                ClinicError::InvalidToken("Invalid Authorization header format".to_string())
            })?;
            let token = value.strip_prefix("Bearer ").ok_or_else(|| {
                tracing::debug!(target: "clinic.middleware.auth", "Invalid Authorization header format");
                ClinicError::InvalidToken("Invalid Authorization header format".to_string())
            })?;
            Ok(Some(token.to_string()))
        }
        None => Ok(Query::<TokenQuery>::try_from_uri(req.uri())
            .ok()
            .and_then(|Query(q)| q.access_token)),
    }
}

/// Verify the access token and attach the caller to the request.
///
/// # Response
///
/// - 401 with `WWW-Authenticate` if the token is missing or invalid
/// - otherwise the wrapped handler's response
#[instrument(skip_all, name = "clinic.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, ClinicError> {
    let token = bearer_token(&req)?.ok_or_else(|| {
        tracing::debug!(target: "clinic.middleware.auth", "Missing access token");
        ClinicError::InvalidToken("Missing access token".to_string())
    })?;

    let claims = state.signer.verify(&token)?;
    let user = AuthUser::from_claims(&claims)?;

    req.extensions_mut().insert(claims);
    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use tower::ServiceExt;

    fn signer() -> Arc<TokenSigner> {
        Arc::new(TokenSigner::from_seed(&[3u8; 32], 600, 300).unwrap())
    }

    fn app(signer: Arc<TokenSigner>) -> Router {
        let state = Arc::new(AuthState { signer });
        Router::new()
            .route(
                "/whoami",
                get(|Extension(user): Extension<AuthUser>| async move { user.role.to_string() }),
            )
            .layer(middleware::from_fn_with_state(state, require_auth))
    }

    fn patient(clinic: Uuid) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            clinic_id: Some(clinic),
            role: Role::Patient,
        }
    }

    #[tokio::test]
    async fn test_accepts_bearer_header() {
        let signer = signer();
        let token = signer
            .issue(Uuid::new_v4(), Some(Uuid::new_v4()), Role::Doctor)
            .unwrap();

        let response = app(signer)
            .oneshot(
                HttpRequest::get("/whoami")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_accepts_query_token() {
        let signer = signer();
        let token = signer.issue(Uuid::new_v4(), Some(Uuid::new_v4()), Role::Patient).unwrap();

        let response = app(signer)
            .oneshot(
                HttpRequest::get(format!("/whoami?access_token={token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rejects_missing_and_malformed() {
        let response = app(signer())
            .oneshot(HttpRequest::get("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("WWW-Authenticate"));

        let response = app(signer())
            .oneshot(
                HttpRequest::get("/whoami")
                    .header("authorization", "Basic abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_rejects_token_from_other_key() {
        let other = TokenSigner::from_seed(&[4u8; 32], 600, 300).unwrap();
        let token = other.issue(Uuid::new_v4(), None, Role::SuperAdmin).unwrap();

        let response = app(signer())
            .oneshot(
                HttpRequest::get("/whoami")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_require_role() {
        let user = patient(Uuid::new_v4());
        assert!(require_role(&user, &[Role::Patient, Role::Staff]).is_ok());
        assert!(matches!(
            require_role(&user, &[Role::Doctor]),
            Err(ClinicError::Forbidden(_))
        ));
    }

    #[test]
    fn test_ensure_same_clinic() {
        let clinic = Uuid::new_v4();
        let user = patient(clinic);
        assert!(ensure_same_clinic(&user, clinic).is_ok());
        assert!(ensure_same_clinic(&user, Uuid::new_v4()).is_err());

        let operator = AuthUser {
            user_id: Uuid::new_v4(),
            clinic_id: None,
            role: Role::SuperAdmin,
        };
        assert!(ensure_same_clinic(&operator, clinic).is_ok());
        assert!(operator.clinic().is_err());
    }
}
