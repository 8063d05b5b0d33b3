//! Queue ordering and wait-time estimation.
//!
//! Pure functions over the tokens of one doctor's day. The queue service
//! loads the tokens, runs [`recalculate`], persists whatever changed and
//! hands the resulting [`QueueSnapshot`] to the broadcaster.
//!
//! # Ordering
//!
//! Non-cancelled tokens are ordered by `(scheduled_at, created_at, token_id)`
//! and numbered by 1-based rank. Numbers are re-derived on every pass, so a
//! cancellation closes the gap and an earlier booking pushes later tokens
//! back. Cancelled tokens keep their last number and drop out of the board.
//!
//! # Estimates
//!
//! For the pending token at 0-based position `p`:
//!
//! ```text
//! base     = delay + remaining_current + p * avg
//! call_at  = max(now + base, scheduled_at)
//! wait     = ceil((call_at - now) / 60s), never negative
//! ```
//!
//! `remaining_current` is what is left of the average for the token that is
//! with the doctor right now, or zero.

use crate::models::{QueueEntry, QueueSnapshot, QueueTokenRow, TokenStatus};
use chrono::{DateTime, Duration, NaiveDate, SubsecRound, Utc};
use uuid::Uuid;

/// Served tokens needed before the observed average replaces the configured one.
pub const MIN_SERVED_SAMPLES: usize = 3;

/// Bounds for the average consultation length, in minutes.
pub const MIN_AVERAGE_MINUTES: i32 = 1;
pub const MAX_AVERAGE_MINUTES: i32 = 120;

/// A recalculated queue.
#[derive(Debug, Clone)]
pub struct QueueState {
    /// Non-cancelled tokens in queue order, followed by cancelled tokens.
    pub tokens: Vec<QueueTokenRow>,
    pub average_minutes: i32,
    pub delay_minutes: i32,
    /// Tokens whose number or estimate differs from the input.
    pub changed: Vec<Uuid>,
}

impl QueueState {
    /// The token currently with the doctor.
    pub fn current(&self) -> Option<&QueueTokenRow> {
        self.tokens
            .iter()
            .find(|t| t.status == TokenStatus::InConsultation)
    }

    /// Tokens still waiting to be called, in order.
    pub fn pending(&self) -> impl Iterator<Item = &QueueTokenRow> {
        self.tokens.iter().filter(|t| t.status.is_pending())
    }

    /// Rows to write back after a recalculation.
    pub fn changed_tokens(&self) -> impl Iterator<Item = &QueueTokenRow> {
        self.tokens
            .iter()
            .filter(|t| self.changed.contains(&t.token_id))
    }
}

/// Order the tokens and assign 1-based numbers to the non-cancelled ones.
pub fn renumber(tokens: &mut Vec<QueueTokenRow>) {
    let (mut active, cancelled): (Vec<_>, Vec<_>) = tokens
        .drain(..)
        .partition(|t| t.status != TokenStatus::Cancelled);

    active.sort_by(|a, b| {
        (a.scheduled_at, a.created_at, a.token_id).cmp(&(b.scheduled_at, b.created_at, b.token_id))
    });

    for (rank, token) in active.iter_mut().enumerate() {
        token.token_number = i32::try_from(rank + 1).unwrap_or(i32::MAX);
    }

    tokens.extend(active);
    tokens.extend(cancelled);
}

/// Observed average consultation length, or `fallback` with too few samples.
pub fn average_consultation_minutes(tokens: &[QueueTokenRow], fallback: i32) -> i32 {
    let durations: Vec<i64> = tokens
        .iter()
        .filter(|t| t.status == TokenStatus::Served)
        .filter_map(|t| match (t.called_at, t.served_at) {
            (Some(called), Some(served)) if served >= called => {
                Some((served - called).num_seconds())
            }
            _ => None,
        })
        .collect();

    if durations.len() < MIN_SERVED_SAMPLES {
        return fallback.clamp(MIN_AVERAGE_MINUTES, MAX_AVERAGE_MINUTES);
    }

    let count = i64::try_from(durations.len()).unwrap_or(i64::MAX);
    let mean_seconds = durations.iter().sum::<i64>() / count;
    // Round to the nearest minute
    let minutes = (mean_seconds + 30) / 60;

    i32::try_from(minutes)
        .unwrap_or(MAX_AVERAGE_MINUTES)
        .clamp(MIN_AVERAGE_MINUTES, MAX_AVERAGE_MINUTES)
}

/// Fill in `estimated_wait_minutes` and `estimated_call_at`.
///
/// Expects `tokens` in queue order. Non-pending tokens are cleared.
pub fn estimate(
    tokens: &mut [QueueTokenRow],
    average_minutes: i32,
    delay_minutes: i32,
    now: DateTime<Utc>,
) {
    let now = now.trunc_subsecs(0);
    let average = Duration::minutes(i64::from(average_minutes));

    let remaining_current = tokens
        .iter()
        .find(|t| t.status == TokenStatus::InConsultation)
        .map_or(Duration::zero(), |current| {
            let elapsed = current.called_at.map_or(Duration::zero(), |c| now - c);
            (average - elapsed).max(Duration::zero())
        });

    let head = Duration::minutes(i64::from(delay_minutes.max(0))) + remaining_current;
    let mut position: i32 = 0;

    for token in tokens.iter_mut() {
        if !token.status.is_pending() {
            token.estimated_wait_minutes = None;
            token.estimated_call_at = None;
            continue;
        }

        let base = head + average * position;
        let call_at = (now + base).max(token.scheduled_at.trunc_subsecs(0));
        let wait_seconds = (call_at - now).num_seconds().max(0);

        token.estimated_call_at = Some(call_at);
        token.estimated_wait_minutes =
            Some(i32::try_from((wait_seconds + 59) / 60).unwrap_or(i32::MAX));
        position += 1;
    }
}

/// Re-order, re-number and re-estimate a queue.
pub fn recalculate(
    tokens: Vec<QueueTokenRow>,
    configured_average: i32,
    delay_minutes: i32,
    now: DateTime<Utc>,
) -> QueueState {
    let before: Vec<(Uuid, i32, Option<i32>, Option<DateTime<Utc>>)> = tokens
        .iter()
        .map(|t| {
            (
                t.token_id,
                t.token_number,
                t.estimated_wait_minutes,
                t.estimated_call_at,
            )
        })
        .collect();

    let average_minutes = average_consultation_minutes(&tokens, configured_average);

    let mut tokens = tokens;
    renumber(&mut tokens);
    estimate(&mut tokens, average_minutes, delay_minutes, now);

    let changed = tokens
        .iter()
        .filter(|t| {
            !before.iter().any(|(id, number, wait, call_at)| {
                *id == t.token_id
                    && *number == t.token_number
                    && *wait == t.estimated_wait_minutes
                    && *call_at == t.estimated_call_at
            })
        })
        .map(|t| t.token_id)
        .collect();

    QueueState {
        tokens,
        average_minutes,
        delay_minutes,
        changed,
    }
}

/// The next patient to call: the first checked-in pending token in order.
///
/// Waiting tokens whose patient has not arrived are passed over and keep
/// their position.
pub fn next_to_call(tokens: &[QueueTokenRow]) -> Option<&QueueTokenRow> {
    tokens
        .iter()
        .filter(|t| t.status.is_pending())
        .find(|t| t.status == TokenStatus::CheckedIn)
}

/// Board state for broadcasting.
pub fn build_snapshot(
    clinic_id: Uuid,
    doctor_id: Uuid,
    date: NaiveDate,
    state: &QueueState,
    now: DateTime<Utc>,
) -> QueueSnapshot {
    let entries: Vec<QueueEntry> = state
        .tokens
        .iter()
        .filter(|t| t.status != TokenStatus::Cancelled)
        .map(QueueEntry::from)
        .collect();

    QueueSnapshot {
        clinic_id,
        doctor_id,
        date,
        generated_at: now,
        now_serving: state.current().map(|t| t.token_number),
        queue_length: state.pending().count(),
        average_consultation_minutes: state.average_minutes,
        delay_minutes: state.delay_minutes,
        entries,
    }
}
