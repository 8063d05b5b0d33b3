//! Queue operations.
//!
//! Each mutation runs in one transaction: change the token, lock and
//! recalculate the whole queue, write back what moved, commit. The new
//! snapshot is published only after commit so viewers never see state that
//! was rolled back.

use crate::errors::ClinicError;
use crate::models::{
    AppointmentRow, AppointmentStatus, ClinicRow, DelayNotificationRow, QueueSnapshot,
    QueueTokenRow, TokenStatus, UserRow,
};
use crate::observability::metrics::record_queue_recalculation;
use crate::repositories::queue_tokens::NewQueueToken;
use crate::repositories::{
    AppointmentsRepository, ClinicsRepository, DelayNotificationsRepository,
    QueueTokensRepository, UsersRepository,
};
use crate::services::geofence;
use crate::services::notifier::{notify_best_effort, Notification, Notifier};
use crate::services::queue_broadcaster::{QueueBroadcaster, QueueKey};
use crate::services::queue_engine::{self, QueueState};
use chrono::{DateTime, NaiveDate, Utc};
use common::types::{ClinicId, Role, UserId};
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// What caused a recalculation. Used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecalcTrigger {
    Booking,
    Cancel,
    WalkIn,
    CheckIn,
    CallNext,
    Complete,
    Skip,
    Delay,
}

impl RecalcTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            RecalcTrigger::Booking => "booking",
            RecalcTrigger::Cancel => "cancel",
            RecalcTrigger::WalkIn => "walk_in",
            RecalcTrigger::CheckIn => "check_in",
            RecalcTrigger::CallNext => "call_next",
            RecalcTrigger::Complete => "complete",
            RecalcTrigger::Skip => "skip",
            RecalcTrigger::Delay => "delay",
        }
    }
}

/// Queue key for a token.
pub fn key_for(token: &QueueTokenRow) -> QueueKey {
    QueueKey::new(
        ClinicId(token.clinic_id),
        UserId(token.doctor_id),
        token.queue_date,
    )
}

/// Issue a provisional token for a new booking on the caller's transaction.
///
/// The number is corrected by the recalculation that follows.
pub async fn issue_token(
    conn: &mut PgConnection,
    appointment: &AppointmentRow,
) -> Result<QueueTokenRow, ClinicError> {
    let queue_date = appointment.scheduled_at.date_naive();
    let next_number =
        QueueTokensRepository::max_number(&mut *conn, appointment.doctor_id, queue_date).await? + 1;

    QueueTokensRepository::create(
        &mut *conn,
        &NewQueueToken {
            clinic_id: appointment.clinic_id,
            doctor_id: appointment.doctor_id,
            patient_id: appointment.patient_id,
            appointment_id: Some(appointment.appointment_id),
            queue_date,
            token_number: next_number,
            scheduled_at: appointment.scheduled_at,
        },
    )
    .await
}

/// Lock, recalculate and persist one queue on the caller's transaction.
pub async fn recalculate_locked(
    conn: &mut PgConnection,
    key: QueueKey,
    now: DateTime<Utc>,
) -> Result<QueueState, ClinicError> {
    let clinic = ClinicsRepository::find_by_id(&mut *conn, key.clinic_id.0)
        .await?
        .ok_or_else(|| ClinicError::NotFound("Clinic not found".to_string()))?;

    let tokens = QueueTokensRepository::lock_queue(&mut *conn, key.doctor_id.0, key.date).await?;
    let delay =
        DelayNotificationsRepository::total_minutes(&mut *conn, key.doctor_id.0, key.date).await?;

    let state = queue_engine::recalculate(tokens, clinic.avg_consultation_minutes, delay, now);
    for token in state.changed_tokens() {
        QueueTokensRepository::save_position(&mut *conn, token).await?;
    }

    Ok(state)
}

/// Queue operations bound to a pool and a broadcaster.
pub struct QueueService<'a> {
    pool: &'a PgPool,
    broadcaster: &'a QueueBroadcaster,
}

impl<'a> QueueService<'a> {
    pub fn new(pool: &'a PgPool, broadcaster: &'a QueueBroadcaster) -> Self {
        Self { pool, broadcaster }
    }

    /// Build and broadcast the snapshot of a committed recalculation.
    pub fn publish(
        &self,
        key: QueueKey,
        state: &QueueState,
        trigger: RecalcTrigger,
        now: DateTime<Utc>,
    ) -> QueueSnapshot {
        let snapshot =
            queue_engine::build_snapshot(key.clinic_id.0, key.doctor_id.0, key.date, state, now);
        record_queue_recalculation(trigger.as_str());
        let receivers = self.broadcaster.publish(key, snapshot.clone());
        tracing::debug!(
            target: "clinic.queue",
            trigger = trigger.as_str(),
            receivers,
            queue_length = snapshot.queue_length,
            "Queue snapshot published"
        );
        snapshot
    }

    /// Current snapshot, computed without writing anything.
    #[instrument(skip_all, name = "clinic.queue.snapshot", fields(doctor_id = %doctor_id, date = %date))]
    pub async fn snapshot(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<QueueSnapshot, ClinicError> {
        let clinic = ClinicsRepository::find_by_id(self.pool, clinic_id)
            .await?
            .ok_or_else(|| ClinicError::NotFound("Clinic not found".to_string()))?;
        let tokens = QueueTokensRepository::list_queue(self.pool, doctor_id, date).await?;
        let delay = DelayNotificationsRepository::total_minutes(self.pool, doctor_id, date).await?;

        let state = queue_engine::recalculate(tokens, clinic.avg_consultation_minutes, delay, now);
        Ok(queue_engine::build_snapshot(
            clinic_id, doctor_id, date, &state, now,
        ))
    }

    /// Approved doctor of the clinic, or `NotFound`.
    pub async fn require_doctor(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
    ) -> Result<UserRow, ClinicError> {
        find_approved(self.pool, clinic_id, doctor_id, Role::Doctor, "Doctor not found").await
    }

    /// Token of the clinic, or `NotFound`.
    pub async fn require_token(
        &self,
        clinic_id: Uuid,
        token_id: Uuid,
    ) -> Result<QueueTokenRow, ClinicError> {
        match QueueTokensRepository::find(self.pool, token_id).await? {
            Some(token) if token.clinic_id == clinic_id => Ok(token),
            _ => Err(ClinicError::NotFound("Queue token not found".to_string())),
        }
    }

    /// Register a walk-in patient at the front desk. The token is scheduled now.
    #[instrument(skip_all, name = "clinic.queue.walk_in")]
    pub async fn walk_in(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
        patient_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<QueueTokenRow, ClinicError> {
        self.require_doctor(clinic_id, doctor_id).await?;
        find_approved(self.pool, clinic_id, patient_id, Role::Patient, "Patient not found").await?;

        let queue_date = now.date_naive();
        let key = QueueKey::new(ClinicId(clinic_id), UserId(doctor_id), queue_date);

        let mut tx = self.pool.begin().await?;
        let next_number =
            QueueTokensRepository::max_number(&mut *tx, doctor_id, queue_date).await? + 1;
        let token = QueueTokensRepository::create(
            &mut *tx,
            &NewQueueToken {
                clinic_id,
                doctor_id,
                patient_id,
                appointment_id: None,
                queue_date,
                token_number: next_number,
                scheduled_at: now,
            },
        )
        .await?;
        let state = recalculate_locked(&mut tx, key, now).await?;
        tx.commit().await?;

        self.publish(key, &state, RecalcTrigger::WalkIn, now);
        info!(target: "clinic.queue", token_id = %token.token_id, "Walk-in registered");

        Ok(find_in_state(&state, token.token_id).unwrap_or(token))
    }

    /// Patient arrives at the clinic.
    #[instrument(skip_all, name = "clinic.queue.check_in", fields(token_id = %token_id))]
    pub async fn check_in(
        &self,
        clinic: &ClinicRow,
        patient_id: Uuid,
        token_id: Uuid,
        location: (f64, f64),
        radius_meters: f64,
        now: DateTime<Utc>,
    ) -> Result<QueueTokenRow, ClinicError> {
        let token = self.require_token(clinic.clinic_id, token_id).await?;
        if token.patient_id != patient_id {
            return Err(ClinicError::Forbidden(
                "Only the patient holding this token can check in".to_string(),
            ));
        }
        if token.status != TokenStatus::Waiting {
            return Err(ClinicError::Conflict(format!(
                "Token is {} and cannot be checked in",
                token.status
            )));
        }
        if token.queue_date != now.date_naive() {
            return Err(ClinicError::Conflict(
                "Check-in is only possible on the day of the visit".to_string(),
            ));
        }

        let distance = geofence::ensure_within(
            location,
            (clinic.latitude, clinic.longitude),
            radius_meters,
        )?;

        let key = key_for(&token);
        let mut tx = self.pool.begin().await?;
        QueueTokensRepository::transition(
            &mut *tx,
            token_id,
            &[TokenStatus::Waiting],
            TokenStatus::CheckedIn,
        )
        .await?
        .ok_or_else(|| ClinicError::Conflict("Token is no longer waiting".to_string()))?;
        let state = recalculate_locked(&mut tx, key, now).await?;
        tx.commit().await?;

        self.publish(key, &state, RecalcTrigger::CheckIn, now);
        info!(target: "clinic.queue", distance_meters = distance, "Patient checked in");

        find_in_state(&state, token_id)
            .ok_or_else(|| ClinicError::Internal("checked-in token missing from queue".to_string()))
    }

    /// Serve the current patient and call the next one who has arrived.
    ///
    /// Returns the new current token, if anyone was called.
    #[instrument(skip_all, name = "clinic.queue.call_next", fields(doctor_id = %doctor_id))]
    pub async fn call_next(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueTokenRow>, ClinicError> {
        let key = QueueKey::new(ClinicId(clinic_id), UserId(doctor_id), date);
        let mut tx = self.pool.begin().await?;

        let mut tokens = QueueTokensRepository::lock_queue(&mut *tx, doctor_id, date).await?;
        queue_engine::renumber(&mut tokens);

        if let Some(current) = tokens
            .iter()
            .find(|t| t.status == TokenStatus::InConsultation)
        {
            serve(&mut tx, current.token_id, current.appointment_id).await?;
        }

        let next_id = queue_engine::next_to_call(&tokens).map(|t| t.token_id);
        if let Some(next_id) = next_id {
            QueueTokensRepository::transition(
                &mut *tx,
                next_id,
                &[TokenStatus::CheckedIn],
                TokenStatus::InConsultation,
            )
            .await?;
        }

        let state = recalculate_locked(&mut tx, key, now).await?;
        tx.commit().await?;

        self.publish(key, &state, RecalcTrigger::CallNext, now);
        Ok(state.current().cloned())
    }

    /// Finish the consultation of one token.
    #[instrument(skip_all, name = "clinic.queue.complete", fields(token_id = %token.token_id))]
    pub async fn complete(
        &self,
        token: &QueueTokenRow,
        now: DateTime<Utc>,
    ) -> Result<QueueTokenRow, ClinicError> {
        if token.status != TokenStatus::InConsultation {
            return Err(ClinicError::Conflict(
                "Only the token in consultation can be completed".to_string(),
            ));
        }

        let key = key_for(token);
        let mut tx = self.pool.begin().await?;
        let served = serve(&mut tx, token.token_id, token.appointment_id).await?;
        let state = recalculate_locked(&mut tx, key, now).await?;
        tx.commit().await?;

        self.publish(key, &state, RecalcTrigger::Complete, now);
        Ok(find_in_state(&state, token.token_id).unwrap_or(served))
    }

    /// Mark a pending token as a no-show.
    #[instrument(skip_all, name = "clinic.queue.skip", fields(token_id = %token.token_id))]
    pub async fn skip(
        &self,
        token: &QueueTokenRow,
        now: DateTime<Utc>,
    ) -> Result<QueueTokenRow, ClinicError> {
        let key = key_for(token);
        let mut tx = self.pool.begin().await?;

        let skipped = QueueTokensRepository::transition(
            &mut *tx,
            token.token_id,
            &[TokenStatus::Waiting, TokenStatus::CheckedIn],
            TokenStatus::Skipped,
        )
        .await?
        .ok_or_else(|| ClinicError::Conflict("Only pending tokens can be skipped".to_string()))?;

        if let Some(appointment_id) = skipped.appointment_id {
            AppointmentsRepository::close_booked(
                &mut *tx,
                appointment_id,
                AppointmentStatus::NoShow,
            )
            .await?;
        }

        let state = recalculate_locked(&mut tx, key, now).await?;
        tx.commit().await?;

        self.publish(key, &state, RecalcTrigger::Skip, now);
        Ok(find_in_state(&state, token.token_id).unwrap_or(skipped))
    }

    /// Record a doctor delay, push the new estimates and alert waiting patients.
    #[instrument(skip_all, name = "clinic.queue.delay", fields(doctor_id = %doctor_id, minutes))]
    #[allow(clippy::too_many_arguments)]
    pub async fn report_delay(
        &self,
        notifier: &dyn Notifier,
        clinic: &ClinicRow,
        doctor_id: Uuid,
        date: NaiveDate,
        minutes: i32,
        reason: Option<&str>,
        reported_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<DelayNotificationRow, ClinicError> {
        let doctor = self.require_doctor(clinic.clinic_id, doctor_id).await?;
        let key = QueueKey::new(ClinicId(clinic.clinic_id), UserId(doctor_id), date);

        let mut tx = self.pool.begin().await?;
        let delay = DelayNotificationsRepository::create(
            &mut *tx,
            clinic.clinic_id,
            doctor_id,
            date,
            minutes,
            reason,
            reported_by,
        )
        .await?;
        let state = recalculate_locked(&mut tx, key, now).await?;

        // Contacts are read before commit; nothing after commit may fail the request
        let patient_ids: Vec<Uuid> = state.pending().map(|t| t.patient_id).collect();
        let contacts: HashMap<Uuid, UserRow> = UsersRepository::find_many(&mut *tx, &patient_ids)
            .await?
            .into_iter()
            .map(|user| (user.user_id, user))
            .collect();
        let alerts: Vec<Notification> = state
            .pending()
            .filter_map(|token| {
                let patient = contacts.get(&token.patient_id)?;
                let body = format!(
                    "{}: {} is running about {} minutes late. Token {}, estimated wait {} minutes.",
                    clinic.name,
                    doctor.full_name,
                    minutes,
                    token.token_number,
                    token.estimated_wait_minutes.unwrap_or(0)
                );
                Notification::to_contact(
                    patient.phone.as_deref(),
                    patient.email.as_deref(),
                    "Your doctor is running late",
                    body,
                )
            })
            .collect();
        tx.commit().await?;

        self.publish(key, &state, RecalcTrigger::Delay, now);

        let mut notified = 0;
        for alert in alerts {
            if notify_best_effort(notifier, "delay", alert).await {
                notified += 1;
            }
        }

        info!(target: "clinic.queue", minutes, notified, "Doctor delay reported");
        match DelayNotificationsRepository::set_notified_count(self.pool, delay.delay_id, notified)
            .await
        {
            Ok(updated) => Ok(updated),
            Err(e) => {
                warn!(
                    target: "clinic.queue",
                    delay_id = %delay.delay_id,
                    error = %e,
                    "Failed to record delay notification count"
                );
                Ok(DelayNotificationRow {
                    notified_count: notified,
                    ..delay
                })
            }
        }
    }
}

/// Served token; its appointment becomes completed.
async fn serve(
    conn: &mut PgConnection,
    token_id: Uuid,
    appointment_id: Option<Uuid>,
) -> Result<QueueTokenRow, ClinicError> {
    let served = QueueTokensRepository::transition(
        &mut *conn,
        token_id,
        &[TokenStatus::InConsultation],
        TokenStatus::Served,
    )
    .await?
    .ok_or_else(|| ClinicError::Conflict("Token is no longer in consultation".to_string()))?;

    if let Some(appointment_id) = appointment_id {
        AppointmentsRepository::close_booked(
            &mut *conn,
            appointment_id,
            AppointmentStatus::Completed,
        )
        .await?;
    }
    Ok(served)
}

async fn find_approved(
    pool: &PgPool,
    clinic_id: Uuid,
    user_id: Uuid,
    role: Role,
    not_found: &str,
) -> Result<UserRow, ClinicError> {
    match UsersRepository::find_in_clinic(pool, clinic_id, user_id, Some(role)).await? {
        Some(user) if user.status == crate::models::AccountStatus::Approved => Ok(user),
        _ => Err(ClinicError::NotFound(not_found.to_string())),
    }
}

fn find_in_state(state: &QueueState, token_id: Uuid) -> Option<QueueTokenRow> {
    state
        .tokens
        .iter()
        .find(|t| t.token_id == token_id)
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_labels_are_distinct() {
        let all = [
            RecalcTrigger::Booking,
            RecalcTrigger::Cancel,
            RecalcTrigger::WalkIn,
            RecalcTrigger::CheckIn,
            RecalcTrigger::CallNext,
            RecalcTrigger::Complete,
            RecalcTrigger::Skip,
            RecalcTrigger::Delay,
        ];
        let mut labels: Vec<&str> = all.iter().map(|t| t.as_str()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), all.len());
    }
}
