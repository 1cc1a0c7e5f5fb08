use chrono::{NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::time::{
    day_of_week, overlaps, to_minutes, MAX_APPOINTMENT_DURATION_MINUTES, TIME_STEP_MINUTES,
};

use crate::models::{
    AvailabilityError, AvailabilitySlot, AvailableSlotsResponse, BookedInterval,
    CreateAvailabilityRequest, DoctorProfile, FreeWindow, UpdateAvailabilityRequest,
};

pub struct AvailabilityService {
    supabase: SupabaseClient,
}

impl AvailabilityService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// Resolve the doctor row owned by an authenticated user.
    pub async fn get_doctor_by_user(
        &self,
        user_id: &str,
        auth_token: Option<&str>,
    ) -> Result<DoctorProfile, AvailabilityError> {
        let path = format!("/rest/v1/doctors?user_id=eq.{}&limit=1", user_id);
        let result: Vec<DoctorProfile> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await?;

        result
            .into_iter()
            .next()
            .ok_or(AvailabilityError::DoctorNotFound)
    }

    pub async fn get_doctor(
        &self,
        doctor_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<DoctorProfile, AvailabilityError> {
        let path = format!("/rest/v1/doctors?id=eq.{}&limit=1", doctor_id);
        let result: Vec<DoctorProfile> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await?;

        result
            .into_iter()
            .next()
            .ok_or(AvailabilityError::DoctorNotFound)
    }

    /// All windows for a doctor, ordered by (day_of_week, start_time).
    pub async fn list_slots(
        &self,
        doctor_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<Vec<AvailabilitySlot>, AvailabilityError> {
        debug!("Fetching availability for doctor: {}", doctor_id);

        let path = format!(
            "/rest/v1/availability_slots?doctor_id=eq.{}&order=day_of_week.asc,start_time.asc",
            doctor_id
        );
        let slots: Vec<AvailabilitySlot> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await?;

        Ok(slots)
    }

    /// Add a recurring weekly window for the doctor owned by `user_id`.
    pub async fn create_slot(
        &self,
        user_id: &str,
        request: CreateAvailabilityRequest,
        auth_token: &str,
    ) -> Result<AvailabilitySlot, AvailabilityError> {
        let doctor = self.get_doctor_by_user(user_id, Some(auth_token)).await?;
        debug!("Creating availability for doctor: {}", doctor.id);

        if !(0..=6).contains(&request.day_of_week) {
            return Err(AvailabilityError::Validation(
                "Day of week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
            ));
        }

        let (start, end) = parse_window(&request.start_time, &request.end_time)?;

        self.check_window_conflicts(doctor.id, request.day_of_week, start, end, None, auth_token)
            .await?;

        let slot_data = json!({
            "doctor_id": doctor.id,
            "day_of_week": request.day_of_week,
            "start_time": request.start_time,
            "end_time": request.end_time,
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let result: Vec<AvailabilitySlot> = self
            .supabase
            .insert("/rest/v1/availability_slots", Some(auth_token), slot_data)
            .await?;

        result
            .into_iter()
            .next()
            .ok_or_else(|| AvailabilityError::Database("Failed to create availability".to_string()))
    }

    /// Move a window's start/end. The weekday is immutable; the window being
    /// updated is excluded from the conflict scan.
    pub async fn update_slot(
        &self,
        user_id: &str,
        slot_id: Uuid,
        request: UpdateAvailabilityRequest,
        auth_token: &str,
    ) -> Result<AvailabilitySlot, AvailabilityError> {
        let doctor = self.get_doctor_by_user(user_id, Some(auth_token)).await?;
        let current = self.get_slot(slot_id, auth_token).await?;

        if current.doctor_id != doctor.id {
            return Err(AvailabilityError::Forbidden(
                "Availability slot belongs to another doctor".to_string(),
            ));
        }

        let (start, end) = parse_window(&request.start_time, &request.end_time)?;

        self.check_window_conflicts(
            doctor.id,
            current.day_of_week,
            start,
            end,
            Some(slot_id),
            auth_token,
        )
        .await?;

        let path = format!("/rest/v1/availability_slots?id=eq.{}", slot_id);
        let update_data = json!({
            "start_time": request.start_time,
            "end_time": request.end_time,
            "updated_at": Utc::now().to_rfc3339()
        });

        let result: Vec<AvailabilitySlot> = self
            .supabase
            .update(&path, Some(auth_token), update_data)
            .await?;

        result
            .into_iter()
            .next()
            .ok_or(AvailabilityError::SlotNotFound)
    }

    /// Remove a window. Existing appointments are independent of availability
    /// once booked, so this has no cascading effect on them.
    pub async fn delete_slot(
        &self,
        user_id: &str,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<(), AvailabilityError> {
        let doctor = self.get_doctor_by_user(user_id, Some(auth_token)).await?;
        let current = self.get_slot(slot_id, auth_token).await?;

        if current.doctor_id != doctor.id {
            return Err(AvailabilityError::Forbidden(
                "Availability slot belongs to another doctor".to_string(),
            ));
        }

        let path = format!("/rest/v1/availability_slots?id=eq.{}", slot_id);
        let _: Vec<AvailabilitySlot> = self.supabase.delete(&path, Some(auth_token)).await?;

        Ok(())
    }

    /// Slot resolution for a calendar date: intersect that weekday's windows
    /// with the day's active appointments and keep the windows no booking
    /// touches.
    ///
    /// This is deliberately a coarse, window-level filter. The server never
    /// enumerates discrete start times; clients discretize a free window
    /// using the policy constants echoed in the response.
    pub async fn get_available_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: Option<&str>,
    ) -> Result<AvailableSlotsResponse, AvailabilityError> {
        debug!("Resolving available slots for doctor {} on {}", doctor_id, date);

        let doctor = self.get_doctor(doctor_id, auth_token).await?;
        let weekday = day_of_week(date);

        let path = format!(
            "/rest/v1/availability_slots?doctor_id=eq.{}&day_of_week=eq.{}&order=start_time.asc",
            doctor.id, weekday
        );
        let windows: Vec<AvailabilitySlot> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await?;

        // Pending, confirmed and completed all still occupy the slot; only
        // cancelled and rejected free it up.
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&date=eq.{}&status=not.in.(cancelled,rejected)&order=start_time.asc",
            doctor.id, date
        );
        let booked: Vec<BookedInterval> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await?;

        let booked_minutes: Vec<(i32, i32)> = booked
            .iter()
            .filter_map(|b| match (to_minutes(&b.start_time), to_minutes(&b.end_time)) {
                (Some(start), Some(end)) => Some((start, end)),
                _ => {
                    warn!("Skipping appointment with unparseable time: {:?}", b);
                    None
                }
            })
            .collect();

        let free_windows = windows
            .into_iter()
            .filter_map(|slot| {
                let start = to_minutes(&slot.start_time)?;
                let end = to_minutes(&slot.end_time)?;
                let taken = booked_minutes
                    .iter()
                    .any(|&(b_start, b_end)| overlaps(start, end, b_start, b_end));
                if taken {
                    None
                } else {
                    Some(FreeWindow {
                        slot_id: slot.id,
                        start_time: slot.start_time,
                        end_time: slot.end_time,
                    })
                }
            })
            .collect::<Vec<_>>();

        debug!("Found {} free windows", free_windows.len());

        Ok(AvailableSlotsResponse {
            doctor_id: doctor.id,
            date,
            day_of_week: weekday,
            free_windows,
            time_step_minutes: TIME_STEP_MINUTES,
            max_appointment_duration_minutes: MAX_APPOINTMENT_DURATION_MINUTES,
        })
    }

    // Private helpers

    async fn get_slot(
        &self,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<AvailabilitySlot, AvailabilityError> {
        let path = format!("/rest/v1/availability_slots?id=eq.{}", slot_id);
        let result: Vec<AvailabilitySlot> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        result.into_iter().next().ok_or(AvailabilityError::SlotNotFound)
    }

    /// Pairwise overlap scan against every other window on the same weekday.
    async fn check_window_conflicts(
        &self,
        doctor_id: Uuid,
        weekday: i16,
        start: i32,
        end: i32,
        exclude_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<(), AvailabilityError> {
        let mut path = format!(
            "/rest/v1/availability_slots?doctor_id=eq.{}&day_of_week=eq.{}",
            doctor_id, weekday
        );
        if let Some(id) = exclude_id {
            path.push_str(&format!("&id=neq.{}", id));
        }

        let existing: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        for row in existing {
            let existing_start = row["start_time"].as_str().and_then(to_minutes);
            let existing_end = row["end_time"].as_str().and_then(to_minutes);

            let (Some(existing_start), Some(existing_end)) = (existing_start, existing_end)
            else {
                warn!("Skipping availability row with unparseable time: {}", row);
                continue;
            };

            if overlaps(start, end, existing_start, existing_end) {
                return Err(AvailabilityError::Conflict(
                    "Availability overlaps an existing window".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn parse_window(start_time: &str, end_time: &str) -> Result<(i32, i32), AvailabilityError> {
    let start = to_minutes(start_time).ok_or_else(|| {
        AvailabilityError::Validation(format!("Invalid start time: {}", start_time))
    })?;
    let end = to_minutes(end_time)
        .ok_or_else(|| AvailabilityError::Validation(format!("Invalid end time: {}", end_time)))?;

    if end <= start {
        return Err(AvailabilityError::Validation(
            "End time must be after start time".to_string(),
        ));
    }

    Ok((start, end))
}
