//! Live queue handlers.
//!
//! - `POST /api/v1/queue/walk-in` - register a walk-in (staff, clinic admin)
//! - `POST /api/v1/queue/tokens/:token_id/check-in` - patient arrives (geofenced)
//! - `POST /api/v1/queue/tokens/:token_id/complete` - finish a consultation
//! - `POST /api/v1/queue/tokens/:token_id/skip` - mark a no-show
//! - `GET /api/v1/queue/:doctor_id` - current snapshot
//! - `POST /api/v1/queue/:doctor_id/call-next` - serve current, call next arrived
//! - `POST /api/v1/queue/:doctor_id/delay` - doctor running late
//! - `GET /api/v1/queue/:doctor_id/events` - snapshots over SSE
//! - `GET /api/v1/queue/:doctor_id/ws` - snapshots over WebSocket
//!
//! Queue operations are open to the doctor who owns the queue and to staff
//! and clinic admins. Patients of the clinic may watch a queue; they see
//! aggregate numbers and their own entries only.

use crate::errors::ClinicError;
use crate::middleware::{require_role, AuthUser};
use crate::models::{
    CheckInRequest, DelayNotificationRow, DelayRequest, QueueQuery, QueueSnapshot,
    QueueTokenRow, QueueViewer, WalkInRequest,
};
use crate::repositories::ClinicsRepository;
use crate::routes::AppState;
use crate::services::queue_broadcaster::{QueueKey, QueueSubscription};
use crate::services::queue_service::QueueService;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Response,
    },
    Extension, Json,
};
use chrono::{NaiveDate, Utc};
use common::types::{ClinicId, Role, UserId};
use futures::stream::{self, Stream};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

/// SSE keep-alive comment interval.
const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Name of every SSE event carrying a snapshot.
const QUEUE_EVENT: &str = "queue";

/// The doctor who owns the queue, or front-desk roles.
fn ensure_queue_operator(user: &AuthUser, doctor_id: Uuid) -> Result<(), ClinicError> {
    match user.role {
        Role::Staff | Role::ClinicAdmin => Ok(()),
        Role::Doctor if user.user_id == doctor_id => Ok(()),
        _ => Err(ClinicError::Forbidden(
            "Only the doctor or clinic staff can manage this queue".to_string(),
        )),
    }
}

fn viewer_for(user: &AuthUser) -> QueueViewer {
    if user.is_patient() {
        QueueViewer::Patient(user.user_id)
    } else {
        QueueViewer::Staff
    }
}

/// Resolve the caller's clinic and check the doctor works there.
async fn watch_target(
    state: &AppState,
    user: &AuthUser,
    doctor_id: Uuid,
) -> Result<Uuid, ClinicError> {
    let clinic_id = user.clinic()?;
    QueueService::new(&state.pool, &state.broadcaster)
        .require_doctor(clinic_id, doctor_id)
        .await?;
    Ok(clinic_id)
}

fn queue_date(query: &QueueQuery) -> NaiveDate {
    query.date.unwrap_or_else(|| Utc::now().date_naive())
}

/// Handler for POST /api/v1/queue/walk-in
#[instrument(skip_all, name = "clinic.handlers.walk_in", fields(doctor_id = %request.doctor_id))]
pub async fn walk_in(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<WalkInRequest>,
) -> Result<(StatusCode, Json<QueueTokenRow>), ClinicError> {
    require_role(&user, &[Role::Staff, Role::ClinicAdmin])?;
    let clinic_id = user.clinic()?;

    let token = QueueService::new(&state.pool, &state.broadcaster)
        .walk_in(clinic_id, request.doctor_id, request.patient_id, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(token)))
}

/// Handler for POST /api/v1/queue/tokens/:token_id/check-in
///
/// # Response
///
/// - 200 OK: token now `checked_in`
/// - 400 Bad Request: coordinates out of range
/// - 403 Forbidden: not the token's patient, or outside the clinic radius
/// - 409 Conflict: token not waiting or not for today
#[instrument(skip_all, name = "clinic.handlers.check_in", fields(token_id = %token_id))]
pub async fn check_in(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(token_id): Path<Uuid>,
    Json(request): Json<CheckInRequest>,
) -> Result<Json<QueueTokenRow>, ClinicError> {
    require_role(&user, &[Role::Patient])?;
    let clinic = ClinicsRepository::get_active(&state.pool, user.clinic()?).await?;

    let token = QueueService::new(&state.pool, &state.broadcaster)
        .check_in(
            &clinic,
            user.user_id,
            token_id,
            (request.latitude, request.longitude),
            state.config.geofence_radius_meters,
            Utc::now(),
        )
        .await?;
    Ok(Json(token))
}

/// Handler for POST /api/v1/queue/tokens/:token_id/complete
#[instrument(skip_all, name = "clinic.handlers.complete_token", fields(token_id = %token_id))]
pub async fn complete_token(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(token_id): Path<Uuid>,
) -> Result<Json<QueueTokenRow>, ClinicError> {
    let queue = QueueService::new(&state.pool, &state.broadcaster);
    let token = queue.require_token(user.clinic()?, token_id).await?;
    ensure_queue_operator(&user, token.doctor_id)?;
    Ok(Json(queue.complete(&token, Utc::now()).await?))
}

/// Handler for POST /api/v1/queue/tokens/:token_id/skip
#[instrument(skip_all, name = "clinic.handlers.skip_token", fields(token_id = %token_id))]
pub async fn skip_token(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(token_id): Path<Uuid>,
) -> Result<Json<QueueTokenRow>, ClinicError> {
    let queue = QueueService::new(&state.pool, &state.broadcaster);
    let token = queue.require_token(user.clinic()?, token_id).await?;
    ensure_queue_operator(&user, token.doctor_id)?;
    Ok(Json(queue.skip(&token, Utc::now()).await?))
}

/// Handler for GET /api/v1/queue/:doctor_id?date=
#[instrument(skip_all, name = "clinic.handlers.get_queue", fields(doctor_id = %doctor_id))]
pub async fn get_queue(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<QueueQuery>,
) -> Result<Json<QueueSnapshot>, ClinicError> {
    let clinic_id = watch_target(&state, &user, doctor_id).await?;
    let snapshot = QueueService::new(&state.pool, &state.broadcaster)
        .snapshot(clinic_id, doctor_id, queue_date(&query), Utc::now())
        .await?;
    Ok(Json(snapshot.view_for(viewer_for(&user))))
}

/// Handler for POST /api/v1/queue/:doctor_id/call-next
///
/// Returns the token now in consultation, or `null` when nobody who has
/// checked in is waiting.
#[instrument(skip_all, name = "clinic.handlers.call_next", fields(doctor_id = %doctor_id))]
pub async fn call_next(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Option<QueueTokenRow>>, ClinicError> {
    ensure_queue_operator(&user, doctor_id)?;
    let clinic_id = watch_target(&state, &user, doctor_id).await?;
    let now = Utc::now();

    let current = QueueService::new(&state.pool, &state.broadcaster)
        .call_next(clinic_id, doctor_id, now.date_naive(), now)
        .await?;
    Ok(Json(current))
}

/// Handler for POST /api/v1/queue/:doctor_id/delay
#[instrument(skip_all, name = "clinic.handlers.report_delay", fields(doctor_id = %doctor_id))]
pub async fn report_delay(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(doctor_id): Path<Uuid>,
    Json(request): Json<DelayRequest>,
) -> Result<(StatusCode, Json<DelayNotificationRow>), ClinicError> {
    ensure_queue_operator(&user, doctor_id)?;
    let reason = request.validate()?;
    let clinic = ClinicsRepository::get_active(&state.pool, user.clinic()?).await?;
    let now = Utc::now();

    let delay = QueueService::new(&state.pool, &state.broadcaster)
        .report_delay(
            state.notifier.as_ref(),
            &clinic,
            doctor_id,
            now.date_naive(),
            request.minutes,
            reason.as_deref(),
            user.user_id,
            now,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(delay)))
}

/// Subscribe, then read the snapshot, so no update between the two is lost.
async fn open_subscription(
    state: &AppState,
    user: &AuthUser,
    doctor_id: Uuid,
    query: &QueueQuery,
    transport: &'static str,
) -> Result<(QueueSnapshot, QueueSubscription), ClinicError> {
    let clinic_id = watch_target(state, user, doctor_id).await?;
    let date = queue_date(query);
    let key = QueueKey::new(ClinicId(clinic_id), UserId(doctor_id), date);

    let subscription = state.broadcaster.subscribe(key, transport);
    let initial = QueueService::new(&state.pool, &state.broadcaster)
        .snapshot(clinic_id, doctor_id, date, Utc::now())
        .await?;
    Ok((initial, subscription))
}

/// Handler for GET /api/v1/queue/:doctor_id/events?date=
///
/// The first event is the current snapshot; every later one is pushed as the
/// queue changes. Slow clients skip intermediate snapshots.
#[instrument(skip_all, name = "clinic.handlers.queue_events", fields(doctor_id = %doctor_id))]
pub async fn queue_events(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<QueueQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ClinicError> {
    let (initial, subscription) =
        open_subscription(&state, &user, doctor_id, &query, "sse").await?;
    let viewer = viewer_for(&user);

    let events = stream::unfold(
        (Some(Arc::new(initial)), subscription),
        move |(pending, mut subscription)| async move {
            let snapshot = match pending {
                Some(snapshot) => snapshot,
                None => subscription.recv().await?,
            };
            let event = Event::default()
                .event(QUEUE_EVENT)
                .json_data(snapshot.view_for(viewer));
            Some((event, (None, subscription)))
        },
    );

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE)))
}

/// Handler for GET /api/v1/queue/:doctor_id/ws?date=
///
/// Same payloads as the SSE stream, as text frames.
#[instrument(skip_all, name = "clinic.handlers.queue_ws", fields(doctor_id = %doctor_id))]
pub async fn queue_ws(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<QueueQuery>,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ClinicError> {
    let (initial, subscription) =
        open_subscription(&state, &user, doctor_id, &query, "websocket").await?;
    let viewer = viewer_for(&user);

    Ok(upgrade.on_upgrade(move |socket| run_socket(socket, initial, subscription, viewer)))
}

async fn send_snapshot(
    socket: &mut WebSocket,
    snapshot: &QueueSnapshot,
    viewer: QueueViewer,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(&snapshot.view_for(viewer)).map_err(axum::Error::new)?;
    socket.send(Message::Text(text)).await
}

async fn run_socket(
    mut socket: WebSocket,
    initial: QueueSnapshot,
    mut subscription: QueueSubscription,
    viewer: QueueViewer,
) {
    if send_snapshot(&mut socket, &initial, viewer).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            published = subscription.recv() => {
                let Some(snapshot) = published else { break };
                if send_snapshot(&mut socket, &snapshot, viewer).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Ping(payload))) => {
                    if socket.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!(target: "clinic.queue.broadcast", "WebSocket session ended");
}
