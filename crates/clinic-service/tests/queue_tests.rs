//! Queue integration tests.
//!
//! Covers booking into a doctor's queue, walk-ins, geofenced check-in,
//! calling patients, delay reports and the live SSE stream:
//!
//! - `POST /api/v1/appointments`, `POST /api/v1/appointments/{id}/cancel`
//! - `POST /api/v1/queue/walk-in`
//! - `POST /api/v1/queue/tokens/{id}/check-in|complete|skip`
//! - `GET /api/v1/queue/{doctor_id}`, `POST .../call-next`, `POST .../delay`
//! - `GET /api/v1/queue/{doctor_id}/events`, `GET .../ws`

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clinic_service::services::notifier::RecordingNotifier;
use clinic_test_utils::{
    test_config, TestClinic, TestClinicServer, TestUser, CLINIC_LATITUDE, CLINIC_LONGITUDE,
    CONSULTATION_MINUTES,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sqlx::PgPool;
use tokio_tungstenite::tungstenite::{self, Message};
use uuid::Uuid;

// ============================================================================
// Test Helpers
// ============================================================================

/// Tomorrow at `hour:minute` UTC, always in the future and inside the
/// seeded clinic's hours.
fn tomorrow_at(hour: u32, minute: u32) -> DateTime<Utc> {
    let date = (Utc::now() + Duration::days(1)).date_naive();
    date.and_hms_opt(hour, minute, 0).unwrap().and_utc()
}

fn tomorrow() -> NaiveDate {
    (Utc::now() + Duration::days(1)).date_naive()
}

async fn book(
    server: &TestClinicServer,
    as_user: &TestUser,
    doctor_id: Uuid,
    patient_id: Option<Uuid>,
    scheduled_at: DateTime<Utc>,
) -> Result<reqwest::Response> {
    let mut body = json!({
        "doctor_id": doctor_id,
        "scheduled_at": scheduled_at,
        "reason": "Follow-up",
    });
    if let Some(patient_id) = patient_id {
        body["patient_id"] = json!(patient_id);
    }
    Ok(server
        .client()
        .post(server.api("/api/v1/appointments"))
        .bearer_auth(server.token_for(as_user)?)
        .json(&body)
        .send()
        .await?)
}

async fn walk_in(server: &TestClinicServer, clinic: &TestClinic, patient: &TestUser) -> Result<Value> {
    let response = server
        .client()
        .post(server.api("/api/v1/queue/walk-in"))
        .bearer_auth(server.token_for(&clinic.staff)?)
        .json(&json!({ "doctor_id": clinic.doctor.user_id, "patient_id": patient.user_id }))
        .send()
        .await?;
    assert_eq!(response.status(), 201);
    Ok(response.json().await?)
}

async fn check_in(
    server: &TestClinicServer,
    patient: &TestUser,
    token_id: &str,
    latitude: f64,
    longitude: f64,
) -> Result<reqwest::Response> {
    Ok(server
        .client()
        .post(server.api(&format!("/api/v1/queue/tokens/{token_id}/check-in")))
        .bearer_auth(server.token_for(patient)?)
        .json(&json!({ "latitude": latitude, "longitude": longitude }))
        .send()
        .await?)
}

async fn post_as(server: &TestClinicServer, user: &TestUser, path: &str) -> Result<reqwest::Response> {
    Ok(server
        .client()
        .post(server.api(path))
        .bearer_auth(server.token_for(user)?)
        .send()
        .await?)
}

async fn queue_as(
    server: &TestClinicServer,
    user: &TestUser,
    doctor_id: Uuid,
    date: Option<NaiveDate>,
) -> Result<Value> {
    let mut path = format!("/api/v1/queue/{doctor_id}");
    if let Some(date) = date {
        path.push_str(&format!("?date={date}"));
    }
    let response = server
        .client()
        .get(server.api(&path))
        .bearer_auth(server.token_for(user)?)
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    Ok(response.json().await?)
}

/// Reads SSE frames off a byte stream.
struct SseReader<S> {
    stream: S,
    buffer: String,
}

impl<S> SseReader<S>
where
    S: futures::Stream<Item = reqwest::Result<axum::body::Bytes>> + Unpin,
{
    fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: String::new(),
        }
    }

    /// Next `queue` event payload, skipping keep-alive comments.
    async fn next_queue_event(&mut self) -> Result<Value> {
        let read = async {
            loop {
                if let Some(end) = self.buffer.find("\n\n") {
                    let frame: String = self.buffer.drain(..end + 2).collect();
                    let is_queue = frame.lines().any(|l| l == "event: queue");
                    let data: String = frame
                        .lines()
                        .filter_map(|l| l.strip_prefix("data: ").or_else(|| l.strip_prefix("data:")))
                        .collect();
                    if is_queue && !data.is_empty() {
                        return Ok::<Value, anyhow::Error>(serde_json::from_str(&data)?);
                    }
                    continue;
                }
                let chunk = self
                    .stream
                    .next()
                    .await
                    .ok_or_else(|| anyhow::anyhow!("stream ended"))??;
                self.buffer.push_str(std::str::from_utf8(&chunk)?);
            }
        };
        tokio::time::timeout(std::time::Duration::from_secs(5), read)
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for queue event"))?
    }
}

/// Next text frame off a queue WebSocket, parsed as a snapshot.
async fn next_ws_snapshot<S>(socket: &mut S) -> Result<Value>
where
    S: futures::Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let read = async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok::<Value, anyhow::Error>(serde_json::from_str(&text)?)
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(anyhow::anyhow!("socket closed")),
            }
        }
    };
    tokio::time::timeout(std::time::Duration::from_secs(5), read)
        .await
        .map_err(|_| anyhow::anyhow!("timed out waiting for queue frame"))?
}

fn queue_ws_url(server: &TestClinicServer, doctor_id: Uuid, token: Option<&str>) -> String {
    let mut url = format!("ws://{}/api/v1/queue/{doctor_id}/ws", server.addr());
    if let Some(token) = token {
        url.push_str(&format!("?access_token={token}"));
    }
    url
}

// ============================================================================
// Booking
// ============================================================================

#[sqlx::test(migrations = "../../migrations")]
async fn test_patient_booking_issues_token(pool: PgPool) -> Result<()> {
    let server = TestClinicServer::spawn(pool).await?;
    let clinic = TestClinic::seed(server.pool()).await?;

    let response = book(&server, &clinic.patient, clinic.doctor.user_id, None, tomorrow_at(10, 0)).await?;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await?;
    assert_eq!(body["appointment"]["status"], "booked");
    assert_eq!(body["appointment"]["patient_id"], clinic.patient.user_id.to_string());
    assert_eq!(body["token"]["token_number"], 1);
    assert_eq!(body["token"]["status"], "waiting");

    // Confirmation goes to the patient's phone
    let phone = clinic.patient.phone.clone().unwrap();
    let sent = server.notifier().sent_to(&phone);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].body.contains("Your token is 1"));

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_earlier_booking_renumbers_queue(pool: PgPool) -> Result<()> {
    let server = TestClinicServer::spawn(pool).await?;
    let clinic = TestClinic::seed(server.pool()).await?;
    let second = clinic.add_patient(server.pool(), "Second Patient").await?;

    let late = book(&server, &clinic.patient, clinic.doctor.user_id, None, tomorrow_at(11, 0)).await?;
    assert_eq!(late.status(), 201);
    let early = book(&server, &second, clinic.doctor.user_id, None, tomorrow_at(9, 0)).await?;
    assert_eq!(early.status(), 201);

    let queue = queue_as(&server, &clinic.staff, clinic.doctor.user_id, Some(tomorrow())).await?;
    let entries = queue["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["patient_id"], second.user_id.to_string());
    assert_eq!(entries[0]["token_number"], 1);
    assert_eq!(entries[1]["patient_id"], clinic.patient.user_id.to_string());
    assert_eq!(entries[1]["token_number"], 2);
    assert_eq!(queue["queue_length"], 2);
    assert_eq!(queue["average_consultation_minutes"], CONSULTATION_MINUTES);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_booking_conflicts(pool: PgPool) -> Result<()> {
    let server = TestClinicServer::spawn(pool).await?;
    let clinic = TestClinic::seed(server.pool()).await?;
    let other = clinic.add_patient(server.pool(), "Other Patient").await?;
    let at = tomorrow_at(10, 0);

    assert_eq!(book(&server, &clinic.patient, clinic.doctor.user_id, None, at).await?.status(), 201);
    // Same slot for another patient
    assert_eq!(book(&server, &other, clinic.doctor.user_id, None, at).await?.status(), 409);
    // Same patient, same doctor, same day
    assert_eq!(
        book(&server, &clinic.patient, clinic.doctor.user_id, None, tomorrow_at(14, 0))
            .await?
            .status(),
        409
    );
    // In the past
    assert_eq!(
        book(&server, &other, clinic.doctor.user_id, None, Utc::now() - Duration::hours(1))
            .await?
            .status(),
        400
    );
    // Unknown doctor
    assert_eq!(
        book(&server, &other, Uuid::new_v4(), None, tomorrow_at(12, 0)).await?.status(),
        404
    );

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_staff_books_for_patient(pool: PgPool) -> Result<()> {
    let server = TestClinicServer::spawn(pool).await?;
    let clinic = TestClinic::seed(server.pool()).await?;

    let missing = book(&server, &clinic.staff, clinic.doctor.user_id, None, tomorrow_at(10, 0)).await?;
    assert_eq!(missing.status(), 400);

    let response = book(
        &server,
        &clinic.staff,
        clinic.doctor.user_id,
        Some(clinic.patient.user_id),
        tomorrow_at(10, 0),
    )
    .await?;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await?;
    assert_eq!(body["appointment"]["created_by"], clinic.staff.user_id.to_string());

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_cancel_closes_gap(pool: PgPool) -> Result<()> {
    let server = TestClinicServer::spawn(pool).await?;
    let clinic = TestClinic::seed(server.pool()).await?;
    let second = clinic.add_patient(server.pool(), "Second Patient").await?;

    let first: Value = book(&server, &clinic.patient, clinic.doctor.user_id, None, tomorrow_at(9, 0))
        .await?
        .json()
        .await?;
    book(&server, &second, clinic.doctor.user_id, None, tomorrow_at(10, 0)).await?;

    let appointment_id = first["appointment"]["appointment_id"].as_str().unwrap();
    let response = post_as(
        &server,
        &clinic.patient,
        &format!("/api/v1/appointments/{appointment_id}/cancel"),
    )
    .await?;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;
    assert_eq!(body["status"], "cancelled");

    let queue = queue_as(&server, &clinic.staff, clinic.doctor.user_id, Some(tomorrow())).await?;
    let entries = queue["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["patient_id"], second.user_id.to_string());
    assert_eq!(entries[0]["token_number"], 1);

    // Cancelling twice is a conflict
    let again = post_as(
        &server,
        &clinic.patient,
        &format!("/api/v1/appointments/{appointment_id}/cancel"),
    )
    .await?;
    assert_eq!(again.status(), 409);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_patients_only_see_their_own_appointments(pool: PgPool) -> Result<()> {
    let server = TestClinicServer::spawn(pool).await?;
    let clinic = TestClinic::seed(server.pool()).await?;
    let other = clinic.add_patient(server.pool(), "Other Patient").await?;

    let mine: Value = book(&server, &clinic.patient, clinic.doctor.user_id, None, tomorrow_at(9, 0))
        .await?
        .json()
        .await?;
    book(&server, &other, clinic.doctor.user_id, None, tomorrow_at(10, 0)).await?;

    let listed: Vec<Value> = server
        .client()
        .get(server.api("/api/v1/appointments"))
        .bearer_auth(server.token_for(&clinic.patient)?)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(listed.len(), 1);

    let appointment_id = mine["appointment"]["appointment_id"].as_str().unwrap();
    let response = server
        .client()
        .get(server.api(&format!("/api/v1/appointments/{appointment_id}")))
        .bearer_auth(server.token_for(&other)?)
        .send()
        .await?;
    assert_eq!(response.status(), 404);

    // The doctor sees both
    let listed: Vec<Value> = server
        .client()
        .get(server.api("/api/v1/appointments"))
        .bearer_auth(server.token_for(&clinic.doctor)?)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(listed.len(), 2);

    Ok(())
}

// ============================================================================
// Walk-in, check-in, calling
// ============================================================================

#[sqlx::test(migrations = "../../migrations")]
async fn test_check_in_is_geofenced(pool: PgPool) -> Result<()> {
    let server = TestClinicServer::spawn(pool).await?;
    let clinic = TestClinic::seed(server.pool()).await?;

    let token = walk_in(&server, &clinic, &clinic.patient).await?;
    let token_id = token["token_id"].as_str().unwrap();
    assert_eq!(token["status"], "waiting");

    // Roughly 11 km north of the clinic
    let far = check_in(&server, &clinic.patient, token_id, CLINIC_LATITUDE + 0.1, CLINIC_LONGITUDE).await?;
    assert_eq!(far.status(), 403);
    let body: Value = far.json().await?;
    assert_eq!(body["error"]["code"], "OUTSIDE_GEOFENCE");

    // Someone else's token
    let other = clinic.add_patient(server.pool(), "Other Patient").await?;
    let stolen = check_in(&server, &other, token_id, CLINIC_LATITUDE, CLINIC_LONGITUDE).await?;
    assert_eq!(stolen.status(), 403);

    let near = check_in(&server, &clinic.patient, token_id, CLINIC_LATITUDE + 0.0001, CLINIC_LONGITUDE).await?;
    assert_eq!(near.status(), 200);
    let body: Value = near.json().await?;
    assert_eq!(body["status"], "checked_in");
    assert!(body["checked_in_at"].is_string());

    // Only once
    let again = check_in(&server, &clinic.patient, token_id, CLINIC_LATITUDE, CLINIC_LONGITUDE).await?;
    assert_eq!(again.status(), 409);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_call_next_passes_over_absent_patients(pool: PgPool) -> Result<()> {
    let server = TestClinicServer::spawn(pool).await?;
    let clinic = TestClinic::seed(server.pool()).await?;
    let absent = clinic.add_patient(server.pool(), "Absent Patient").await?;
    let present = clinic.add_patient(server.pool(), "Present Patient").await?;
    let doctor_id = clinic.doctor.user_id;

    walk_in(&server, &clinic, &absent).await?;
    let token = walk_in(&server, &clinic, &present).await?;
    let token_id = token["token_id"].as_str().unwrap().to_string();

    // Nobody has arrived yet
    let response = post_as(&server, &clinic.doctor, &format!("/api/v1/queue/{doctor_id}/call-next")).await?;
    assert_eq!(response.status(), 200);
    assert!(response.json::<Value>().await?.is_null());

    check_in(&server, &present, &token_id, CLINIC_LATITUDE, CLINIC_LONGITUDE).await?;

    let response = post_as(&server, &clinic.doctor, &format!("/api/v1/queue/{doctor_id}/call-next")).await?;
    assert_eq!(response.status(), 200);
    let called: Value = response.json().await?;
    assert_eq!(called["token_id"], token_id.as_str());
    assert_eq!(called["status"], "in_consultation");

    let queue = queue_as(&server, &clinic.staff, doctor_id, None).await?;
    assert_eq!(queue["now_serving"], called["token_number"]);
    assert_eq!(queue["queue_length"], 1);

    // Absent patient keeps their place
    let entries = queue["entries"].as_array().unwrap();
    let absent_entry = entries
        .iter()
        .find(|e| e["patient_id"] == absent.user_id.to_string())
        .unwrap();
    assert_eq!(absent_entry["status"], "waiting");
    assert_eq!(absent_entry["token_number"], 1);

    let response = post_as(&server, &clinic.doctor, &format!("/api/v1/queue/tokens/{token_id}/complete")).await?;
    assert_eq!(response.status(), 200);
    let served: Value = response.json().await?;
    assert_eq!(served["status"], "served");

    let queue = queue_as(&server, &clinic.staff, doctor_id, None).await?;
    assert!(queue["now_serving"].is_null());

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_skip_removes_patient_from_waiting(pool: PgPool) -> Result<()> {
    let server = TestClinicServer::spawn(pool).await?;
    let clinic = TestClinic::seed(server.pool()).await?;

    let token = walk_in(&server, &clinic, &clinic.patient).await?;
    let token_id = token["token_id"].as_str().unwrap();

    let response = post_as(&server, &clinic.staff, &format!("/api/v1/queue/tokens/{token_id}/skip")).await?;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;
    assert_eq!(body["status"], "skipped");

    let queue = queue_as(&server, &clinic.staff, clinic.doctor.user_id, None).await?;
    assert_eq!(queue["queue_length"], 0);

    // A served or skipped token cannot be completed
    let response = post_as(&server, &clinic.staff, &format!("/api/v1/queue/tokens/{token_id}/complete")).await?;
    assert_eq!(response.status(), 409);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_queue_operators(pool: PgPool) -> Result<()> {
    let server = TestClinicServer::spawn(pool).await?;
    let clinic = TestClinic::seed(server.pool()).await?;
    let other_doctor = clinic.add_doctor(server.pool(), "Dr. Other").await?;
    let path = format!("/api/v1/queue/{}/call-next", clinic.doctor.user_id);

    assert_eq!(post_as(&server, &other_doctor, &path).await?.status(), 403);
    assert_eq!(post_as(&server, &clinic.patient, &path).await?.status(), 403);
    assert_eq!(post_as(&server, &clinic.staff, &path).await?.status(), 200);

    // Another clinic's staff cannot see this queue at all
    let elsewhere = TestClinic::seed(server.pool()).await?;
    let response = server
        .client()
        .get(server.api(&format!("/api/v1/queue/{}", clinic.doctor.user_id)))
        .bearer_auth(server.token_for(&elsewhere.staff)?)
        .send()
        .await?;
    assert_eq!(response.status(), 404);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_patient_view_hides_other_patients(pool: PgPool) -> Result<()> {
    let server = TestClinicServer::spawn(pool).await?;
    let clinic = TestClinic::seed(server.pool()).await?;
    let other = clinic.add_patient(server.pool(), "Other Patient").await?;

    walk_in(&server, &clinic, &other).await?;
    walk_in(&server, &clinic, &clinic.patient).await?;

    let queue = queue_as(&server, &clinic.patient, clinic.doctor.user_id, None).await?;
    let entries = queue["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["patient_id"], clinic.patient.user_id.to_string());
    assert_eq!(entries[0]["token_number"], 2);
    assert_eq!(queue["queue_length"], 2);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_delay_pushes_estimates_and_notifies(pool: PgPool) -> Result<()> {
    let server = TestClinicServer::spawn(pool).await?;
    let clinic = TestClinic::seed(server.pool()).await?;
    let doctor_id = clinic.doctor.user_id;

    let before = walk_in(&server, &clinic, &clinic.patient).await?;
    let wait_before = before["estimated_wait_minutes"].as_i64().unwrap();

    let response = server
        .client()
        .post(server.api(&format!("/api/v1/queue/{doctor_id}/delay")))
        .bearer_auth(server.token_for(&clinic.doctor)?)
        .json(&json!({ "minutes": 30, "reason": "Emergency surgery" }))
        .send()
        .await?;
    assert_eq!(response.status(), 201);
    let delay: Value = response.json().await?;
    assert_eq!(delay["delay_minutes"], 30);
    assert_eq!(delay["notified_count"], 1);

    let queue = queue_as(&server, &clinic.staff, doctor_id, None).await?;
    assert_eq!(queue["delay_minutes"], 30);
    let wait_after = queue["entries"][0]["estimated_wait_minutes"].as_i64().unwrap();
    assert!(wait_after >= wait_before + 30, "{wait_after} < {wait_before} + 30");

    let phone = clinic.patient.phone.clone().unwrap();
    let late = server
        .notifier()
        .sent_to(&phone)
        .into_iter()
        .find(|n| n.body.contains("running about 30 minutes late"));
    assert!(late.is_some());

    // Out of range
    let response = server
        .client()
        .post(server.api(&format!("/api/v1/queue/{doctor_id}/delay")))
        .bearer_auth(server.token_for(&clinic.doctor)?)
        .json(&json!({ "minutes": 0 }))
        .send()
        .await?;
    assert_eq!(response.status(), 400);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_delay_recorded_once_when_alerts_fail(pool: PgPool) -> Result<()> {
    let notifier = Arc::new(RecordingNotifier::failing());
    let server = TestClinicServer::spawn_with(pool, test_config(&[])?, notifier).await?;
    let clinic = TestClinic::seed(server.pool()).await?;
    let unreachable = clinic.add_unreachable_patient(server.pool()).await?;
    let doctor_id = clinic.doctor.user_id;

    walk_in(&server, &clinic, &clinic.patient).await?;
    walk_in(&server, &clinic, &unreachable).await?;

    let response = server
        .client()
        .post(server.api(&format!("/api/v1/queue/{doctor_id}/delay")))
        .bearer_auth(server.token_for(&clinic.doctor)?)
        .json(&json!({ "minutes": 20, "reason": "Ward round" }))
        .send()
        .await?;
    assert_eq!(response.status(), 201);
    let delay: Value = response.json().await?;
    assert_eq!(delay["delay_minutes"], 20);
    assert_eq!(delay["notified_count"], 0);

    let (rows, notified): (i64, Option<i64>) = sqlx::query_as(
        "SELECT COUNT(*), SUM(notified_count)::BIGINT FROM delay_notifications WHERE doctor_id = $1",
    )
    .bind(doctor_id)
    .fetch_one(server.pool())
    .await?;
    assert_eq!(rows, 1);
    assert_eq!(notified, Some(0));

    let queue = queue_as(&server, &clinic.staff, doctor_id, None).await?;
    assert_eq!(queue["delay_minutes"], 20);

    // Only the patient with contact details was attempted
    let attempts: Vec<_> = server
        .notifier()
        .sent()
        .into_iter()
        .filter(|n| n.body.contains("running about 20 minutes late"))
        .collect();
    assert_eq!(attempts.len(), 1);
    assert_eq!(Some(&attempts[0].recipient), clinic.patient.phone.as_ref());

    Ok(())
}

// ============================================================================
// Live stream
// ============================================================================

#[sqlx::test(migrations = "../../migrations")]
async fn test_sse_stream_pushes_queue_changes(pool: PgPool) -> Result<()> {
    let server = TestClinicServer::spawn(pool).await?;
    let clinic = TestClinic::seed(server.pool()).await?;
    let doctor_id = clinic.doctor.user_id;

    let response = server
        .client()
        .get(server.api(&format!("/api/v1/queue/{doctor_id}/events")))
        .bearer_auth(server.token_for(&clinic.staff)?)
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"), "{content_type}");

    let mut events = SseReader::new(Box::pin(response.bytes_stream()));

    let initial = events.next_queue_event().await?;
    assert_eq!(initial["doctor_id"], doctor_id.to_string());
    assert_eq!(initial["queue_length"], 0);

    walk_in(&server, &clinic, &clinic.patient).await?;

    let update = events.next_queue_event().await?;
    assert_eq!(update["queue_length"], 1);
    assert_eq!(update["entries"][0]["patient_id"], clinic.patient.user_id.to_string());

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_sse_stream_requires_membership(pool: PgPool) -> Result<()> {
    let server = TestClinicServer::spawn(pool).await?;
    let clinic = TestClinic::seed(server.pool()).await?;

    let response = server
        .client()
        .get(server.api(&format!("/api/v1/queue/{}/events", clinic.doctor.user_id)))
        .send()
        .await?;
    assert_eq!(response.status(), 401);

    let response = server
        .client()
        .get(server.api(&format!("/api/v1/queue/{}/events", Uuid::new_v4())))
        .bearer_auth(server.token_for(&clinic.staff)?)
        .send()
        .await?;
    assert_eq!(response.status(), 404);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_websocket_pushes_queue_changes(pool: PgPool) -> Result<()> {
    let server = TestClinicServer::spawn(pool).await?;
    let clinic = TestClinic::seed(server.pool()).await?;
    let doctor_id = clinic.doctor.user_id;

    let token = server.token_for(&clinic.staff)?;
    let (mut socket, response) =
        tokio_tungstenite::connect_async(queue_ws_url(&server, doctor_id, Some(&token))).await?;
    assert_eq!(response.status(), 101);

    let initial = next_ws_snapshot(&mut socket).await?;
    assert_eq!(initial["doctor_id"], doctor_id.to_string());
    assert_eq!(initial["queue_length"], 0);

    walk_in(&server, &clinic, &clinic.patient).await?;

    let update = next_ws_snapshot(&mut socket).await?;
    assert_eq!(update["queue_length"], 1);
    assert_eq!(update["entries"][0]["patient_id"], clinic.patient.user_id.to_string());

    // Ping is answered with the same payload
    socket.send(Message::Ping(b"still-there".to_vec())).await?;
    let pong = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Pong(payload))) => return Some(payload),
                Some(Ok(_)) => continue,
                _ => return None,
            }
        }
    })
    .await?;
    assert_eq!(pong.as_deref(), Some(&b"still-there"[..]));

    // Client close ends the session
    socket.send(Message::Close(None)).await?;
    let closed = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "socket stayed open after close");

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_websocket_requires_token(pool: PgPool) -> Result<()> {
    let server = TestClinicServer::spawn(pool).await?;
    let clinic = TestClinic::seed(server.pool()).await?;

    let result =
        tokio_tungstenite::connect_async(queue_ws_url(&server, clinic.doctor.user_id, None)).await;
    match result {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 401),
        other => panic!("expected HTTP 401, got {:?}", other.map(|(_, r)| r.status())),
    }

    Ok(())
}
