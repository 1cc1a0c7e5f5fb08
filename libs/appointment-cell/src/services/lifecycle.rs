use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, warn};

use shared_utils::time::to_minutes;

use crate::models::{AppointmentError, AppointmentStatus};

/// What a cancellation request should do given the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancel,
    /// Re-cancelling a cancelled appointment is not an error, but also not a
    /// state change worth writing.
    AlreadyCancelled,
}

/// The appointment status machine.
///
/// `pending -> {confirmed, rejected}`, `confirmed -> {completed, cancelled}`,
/// `pending -> cancelled` (patient withdraws before the doctor decides), and
/// reschedule jumps `{pending, confirmed}` back to `pending`. Completed,
/// cancelled and rejected are terminal.
pub struct AppointmentLifecycle;

impl AppointmentLifecycle {
    pub fn valid_transitions(status: AppointmentStatus) -> &'static [AppointmentStatus] {
        match status {
            AppointmentStatus::Pending => {
                &[AppointmentStatus::Confirmed, AppointmentStatus::Rejected, AppointmentStatus::Cancelled]
            }
            AppointmentStatus::Confirmed => {
                &[AppointmentStatus::Completed, AppointmentStatus::Cancelled]
            }
            AppointmentStatus::Completed
            | AppointmentStatus::Cancelled
            | AppointmentStatus::Rejected => &[],
        }
    }

    pub fn validate_transition(
        current: AppointmentStatus,
        next: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition {} -> {}", current, next);

        if !Self::valid_transitions(current).contains(&next) {
            warn!("Invalid status transition attempted: {} -> {}", current, next);
            return Err(AppointmentError::Precondition(format!(
                "Cannot transition appointment from {} to {}",
                current, next
            )));
        }

        Ok(())
    }

    /// Reschedule is not a forward transition: it jumps pending or confirmed
    /// back to pending, forcing the doctor to re-confirm the moved time.
    pub fn ensure_can_reschedule(current: AppointmentStatus) -> Result<(), AppointmentError> {
        match current {
            AppointmentStatus::Pending | AppointmentStatus::Confirmed => Ok(()),
            other => Err(AppointmentError::Precondition(format!(
                "Cannot reschedule a {} appointment",
                other
            ))),
        }
    }

    /// Completing requires a confirmed appointment whose scheduled start has
    /// already elapsed on the wall clock.
    pub fn ensure_can_complete(
        current: AppointmentStatus,
        date: NaiveDate,
        start_time: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        Self::validate_transition(current, AppointmentStatus::Completed)?;

        let minutes = to_minutes(start_time).ok_or_else(|| {
            AppointmentError::Validation(format!("Invalid start time: {}", start_time))
        })?;
        let scheduled_start = date
            .and_hms_opt((minutes / 60) as u32, (minutes % 60) as u32, 0)
            .ok_or_else(|| {
                AppointmentError::Validation(format!("Invalid start time: {}", start_time))
            })?
            .and_utc();

        if now < scheduled_start {
            return Err(AppointmentError::Precondition(
                "Appointment has not started yet".to_string(),
            ));
        }

        Ok(())
    }

    pub fn cancel_outcome(current: AppointmentStatus) -> Result<CancelOutcome, AppointmentError> {
        match current {
            AppointmentStatus::Cancelled => Ok(CancelOutcome::AlreadyCancelled),
            AppointmentStatus::Completed | AppointmentStatus::Rejected => {
                Err(AppointmentError::Precondition(format!(
                    "Cannot cancel a {} appointment",
                    current
                )))
            }
            AppointmentStatus::Pending | AppointmentStatus::Confirmed => Ok(CancelOutcome::Cancel),
        }
    }

    /// Doctor notes may be attached while the appointment is live or after it
    /// completed, but not once it was cancelled or rejected.
    pub fn ensure_notes_allowed(current: AppointmentStatus) -> Result<(), AppointmentError> {
        match current {
            AppointmentStatus::Pending
            | AppointmentStatus::Confirmed
            | AppointmentStatus::Completed => Ok(()),
            other => Err(AppointmentError::Precondition(format!(
                "Cannot add notes to a {} appointment",
                other
            ))),
        }
    }
}
