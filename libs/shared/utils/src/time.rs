//! Minute arithmetic for `"HH:mm"` times of day.
//!
//! Every overlap decision in the scheduler (availability windows, booking
//! conflicts, reschedule checks) is made in integer minute space; comparing
//! the raw strings would get `"9:00"` vs `"09:00"` wrong.

use chrono::{Datelike, NaiveDate};

/// Granularity clients use to carve a free window into bookable start times.
pub const TIME_STEP_MINUTES: i32 = 15;

/// Longest single appointment clients may offer.
pub const MAX_APPOINTMENT_DURATION_MINUTES: i32 = 60;

/// Parse a strict 24-hour `"HH:mm"` string into minutes since midnight.
///
/// Malformed input yields `None` rather than an error: callers treat a record
/// with an unparseable time as "skip this record", not as a failure.
pub fn to_minutes(time: &str) -> Option<i32> {
    let (hours, minutes) = time.split_once(':')?;
    if hours.len() != 2 || minutes.len() != 2 {
        return None;
    }
    if !hours.chars().all(|c| c.is_ascii_digit())
        || !minutes.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }

    let h: i32 = hours.parse().ok()?;
    let m: i32 = minutes.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }

    Some(h * 60 + m)
}

/// Format minutes since midnight back to `"HH:mm"`.
pub fn to_time_string(minutes: i32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Half-open interval overlap: `[a_start, a_end)` vs `[b_start, b_end)`.
///
/// An appointment ending at 10:00 and one starting at 10:00 do NOT overlap,
/// so back-to-back scheduling is legal.
pub fn overlaps(a_start: i32, a_end: i32, b_start: i32, b_end: i32) -> bool {
    a_start < b_end && a_end > b_start
}

/// Day of week with Sunday = 0, matching the `availability_slots` encoding.
pub fn day_of_week(date: NaiveDate) -> i16 {
    date.weekday().num_days_from_sunday() as i16
}
