use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_database::DbError;
use shared_models::error::AppError;

// ==============================================================================
// AVAILABILITY MODELS
// ==============================================================================

/// A recurring weekly availability window owned by a doctor.
///
/// Times of day are `"HH:mm"` strings; all comparisons happen in minute space
/// (see `shared_utils::time`). `day_of_week` uses 0 = Sunday.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub day_of_week: i16,
    pub start_time: String,
    pub end_time: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Doctor row as stored; consumed read-only by the scheduling core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorProfile {
    pub id: Uuid,
    pub user_id: String,
    pub specialty_id: Uuid,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub bio: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAvailabilityRequest {
    pub day_of_week: i16,
    pub start_time: String,
    pub end_time: String,
}

/// Start/end only: the weekday of a window is immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub start_time: String,
    pub end_time: String,
}

// ==============================================================================
// SLOT RESOLUTION MODELS
// ==============================================================================

/// An availability window with no overlapping active appointment on the
/// requested date. The whole window is either free or excluded; carving it
/// into discrete start/end choices is the client's job, driven by the policy
/// constants echoed in the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreeWindow {
    pub slot_id: Uuid,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableSlotsResponse {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub day_of_week: i16,
    pub free_windows: Vec<FreeWindow>,
    pub time_step_minutes: i32,
    pub max_appointment_duration_minutes: i32,
}

/// The slice of an appointment row slot resolution cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct BookedInterval {
    pub start_time: String,
    pub end_time: String,
    pub status: String,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AvailabilityError {
    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Availability slot not found")]
    SlotNotFound,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<DbError> for AvailabilityError {
    fn from(err: DbError) -> Self {
        match err {
            // Unique index on (doctor_id, day_of_week, start_time): a write
            // that raced past the overlap scan still fails here.
            DbError::DuplicateKey(_) => {
                AvailabilityError::Conflict("Availability window already exists".to_string())
            }
            other => AvailabilityError::Database(other.to_string()),
        }
    }
}

impl From<AvailabilityError> for AppError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::DoctorNotFound | AvailabilityError::SlotNotFound => {
                AppError::NotFound(err.to_string())
            }
            AvailabilityError::Validation(msg) => AppError::Validation(msg),
            AvailabilityError::Conflict(msg) => AppError::Conflict(msg),
            AvailabilityError::Forbidden(msg) => AppError::Forbidden(msg),
            AvailabilityError::Database(msg) => AppError::Database(msg),
        }
    }
}
