//! Medicine reminder fire-time math. Times of day are UTC.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};

/// First occurrence on or after `max(now, start_date 00:00)`.
///
/// Returns `None` when that falls after `end_date` or `times` is empty.
pub fn first_fire_at(
    times: &[NaiveTime],
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let start = start_date.and_time(NaiveTime::default()).and_utc();
    occurrence(times, now.max(start), true, end_date)
}

/// Next occurrence strictly after `fired_at`.
pub fn next_fire_after(
    times: &[NaiveTime],
    fired_at: DateTime<Utc>,
    end_date: Option<NaiveDate>,
) -> Option<DateTime<Utc>> {
    occurrence(times, fired_at, false, end_date)
}

fn occurrence(
    times: &[NaiveTime],
    from: DateTime<Utc>,
    inclusive: bool,
    end_date: Option<NaiveDate>,
) -> Option<DateTime<Utc>> {
    let mut sorted = times.to_vec();
    sorted.sort_unstable();

    let today = from.date_naive();
    // Every time of day repeats within two calendar days
    let candidates = [Some(today), today.checked_add_days(Days::new(1))];

    let next = candidates
        .into_iter()
        .flatten()
        .flat_map(|date| sorted.iter().map(move |t| date.and_time(*t).and_utc()))
        .find(|candidate| {
            if inclusive {
                *candidate >= from
            } else {
                *candidate > from
            }
        })?;

    match end_date {
        Some(end) if next.date_naive() > end => None,
        _ => Some(next),
    }
}
