use chrono::{NaiveDate, Utc};
use reqwest::Method;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::{Role, User};
use shared_utils::time::{overlaps, to_minutes, to_time_string};

use crate::models::{
    AddNotesRequest, Appointment, AppointmentError, AppointmentSearchQuery, AppointmentStatus,
    BookAppointmentRequest, DoctorRef, PatientProfile, RescheduleAppointmentRequest,
};
use crate::services::lifecycle::{AppointmentLifecycle, CancelOutcome};
use crate::services::notify::{NotificationPayload, NotificationService};

const MIN_REASON_CHARS: usize = 10;
const MAX_REASON_CHARS: usize = 500;
const MAX_NOTES_CHARS: usize = 1000;
const DEFAULT_PAGE_SIZE: i32 = 50;
const MAX_PAGE_SIZE: i32 = 200;

pub struct AppointmentService {
    supabase: SupabaseClient,
    notifier: NotificationService,
}

impl AppointmentService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            notifier: NotificationService::new(config),
        }
    }

    // ==========================================================================
    // BOOKING
    // ==========================================================================

    /// Book a new appointment for the patient owned by `patient_user_id`.
    ///
    /// The overlap scan is check-then-act; the storage unique index on
    /// (doctor_id, date, start_time) closes the identical-start-time race
    /// between the scan and the insert.
    pub async fn book_appointment(
        &self,
        patient_user_id: &str,
        request: BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!(
            "Booking appointment with doctor {} on {} {}-{}",
            request.doctor_id, request.date, request.start_time, request.end_time
        );

        // Past dates are rejected at creation only; reschedules of old
        // appointments are governed by the status machine instead.
        if request.date < Utc::now().date_naive() {
            return Err(AppointmentError::Validation(
                "Appointment date cannot be in the past".to_string(),
            ));
        }

        let (start, end) = parse_interval(&request.start_time, &request.end_time)?;
        validate_reason(&request.reason)?;

        let patient = self.get_patient_by_user(patient_user_id, auth_token).await?;
        let doctor = self.get_doctor(request.doctor_id, auth_token).await?;

        self.check_booking_conflicts(doctor.id, request.date, start, end, None, auth_token)
            .await?;

        let appointment_data = json!({
            "patient_id": patient.id,
            "doctor_id": doctor.id,
            "date": request.date,
            "start_time": request.start_time,
            "end_time": request.end_time,
            "status": AppointmentStatus::Pending,
            "reason": request.reason,
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let result: Vec<Appointment> = self
            .supabase
            .insert("/rest/v1/appointments", Some(auth_token), appointment_data)
            .await?;

        let appointment = result
            .into_iter()
            .next()
            .ok_or_else(|| AppointmentError::Database("Failed to create appointment".to_string()))?;

        // Best-effort: the booking is committed, a failed email stays a log line.
        self.notifier.notify_booked(NotificationPayload {
            to: patient.email.clone(),
            patient_name: patient.full_name.clone(),
            doctor_name: doctor.full_name.clone(),
            date: appointment.date,
            start_time: appointment.start_time.clone(),
            end_time: appointment.end_time.clone(),
        });

        Ok(appointment)
    }

    /// Move an appointment to a new date/time. Only the owning patient may do
    /// this, and only from pending or confirmed; success resets the status to
    /// pending so the doctor has to re-confirm.
    pub async fn reschedule_appointment(
        &self,
        user: &User,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.get_appointment(appointment_id, auth_token).await?;
        let patient = self.get_patient_by_user(&user.id, auth_token).await?;

        if appointment.patient_id != patient.id {
            return Err(AppointmentError::Forbidden(
                "Appointment belongs to another patient".to_string(),
            ));
        }

        AppointmentLifecycle::ensure_can_reschedule(appointment.status)?;

        let (start, end) = parse_interval(&request.start_time, &request.end_time)?;

        self.check_booking_conflicts(
            appointment.doctor_id,
            request.date,
            start,
            end,
            Some(appointment_id),
            auth_token,
        )
        .await?;

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let update_data = json!({
            "date": request.date,
            "start_time": request.start_time,
            "end_time": request.end_time,
            "status": AppointmentStatus::Pending,
            "updated_at": Utc::now().to_rfc3339()
        });

        let result: Vec<Appointment> = self
            .supabase
            .update(&path, Some(auth_token), update_data)
            .await?;

        let updated = result.into_iter().next().ok_or(AppointmentError::NotFound)?;

        let doctor = self.get_doctor(updated.doctor_id, auth_token).await?;
        self.notifier.notify_rescheduled(NotificationPayload {
            to: patient.email.clone(),
            patient_name: patient.full_name.clone(),
            doctor_name: doctor.full_name.clone(),
            date: updated.date,
            start_time: updated.start_time.clone(),
            end_time: updated.end_time.clone(),
        });

        Ok(updated)
    }

    // ==========================================================================
    // STATUS TRANSITIONS
    // ==========================================================================

    pub async fn approve_appointment(
        &self,
        user: &User,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        self.doctor_transition(user, appointment_id, AppointmentStatus::Confirmed, auth_token)
            .await
    }

    pub async fn reject_appointment(
        &self,
        user: &User,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        self.doctor_transition(user, appointment_id, AppointmentStatus::Rejected, auth_token)
            .await
    }

    /// Mark a confirmed appointment completed; only legal once the scheduled
    /// start time has elapsed.
    pub async fn complete_appointment(
        &self,
        user: &User,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let doctor = self.get_doctor_by_user(&user.id, auth_token).await?;
        let appointment = self.get_appointment(appointment_id, auth_token).await?;

        if appointment.doctor_id != doctor.id {
            return Err(AppointmentError::Forbidden(
                "Appointment belongs to another doctor".to_string(),
            ));
        }

        AppointmentLifecycle::ensure_can_complete(
            appointment.status,
            appointment.date,
            &appointment.start_time,
            Utc::now(),
        )?;

        self.update_status(appointment_id, AppointmentStatus::Completed, auth_token)
            .await
    }

    /// Cancel by the owning patient or the owning doctor. Cancelling an
    /// already-cancelled appointment is a no-op, not an error.
    pub async fn cancel_appointment(
        &self,
        user: &User,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.get_appointment(appointment_id, auth_token).await?;

        let owns = match user.role() {
            Some(Role::Patient) => {
                self.get_patient_by_user(&user.id, auth_token).await?.id
                    == appointment.patient_id
            }
            Some(Role::Doctor) => {
                self.get_doctor_by_user(&user.id, auth_token).await?.id == appointment.doctor_id
            }
            _ => false,
        };
        if !owns {
            return Err(AppointmentError::Forbidden(
                "Only the owning patient or doctor may cancel".to_string(),
            ));
        }

        match AppointmentLifecycle::cancel_outcome(appointment.status)? {
            CancelOutcome::AlreadyCancelled => Ok(appointment),
            CancelOutcome::Cancel => {
                self.update_status(appointment_id, AppointmentStatus::Cancelled, auth_token)
                    .await
            }
        }
    }

    pub async fn add_notes(
        &self,
        user: &User,
        appointment_id: Uuid,
        request: AddNotesRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        if request.notes.chars().count() > MAX_NOTES_CHARS {
            return Err(AppointmentError::Validation(format!(
                "Notes must be at most {} characters",
                MAX_NOTES_CHARS
            )));
        }

        let doctor = self.get_doctor_by_user(&user.id, auth_token).await?;
        let appointment = self.get_appointment(appointment_id, auth_token).await?;

        if appointment.doctor_id != doctor.id {
            return Err(AppointmentError::Forbidden(
                "Appointment belongs to another doctor".to_string(),
            ));
        }

        AppointmentLifecycle::ensure_notes_allowed(appointment.status)?;

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Appointment> = self
            .supabase
            .update(
                &path,
                Some(auth_token),
                json!({
                    "notes": request.notes,
                    "updated_at": Utc::now().to_rfc3339()
                }),
            )
            .await?;

        result.into_iter().next().ok_or(AppointmentError::NotFound)
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    pub async fn view_appointment(
        &self,
        user: &User,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.get_appointment(appointment_id, auth_token).await?;

        let allowed = match user.role() {
            Some(Role::Admin) => true,
            Some(Role::Patient) => {
                self.get_patient_by_user(&user.id, auth_token).await?.id
                    == appointment.patient_id
            }
            Some(Role::Doctor) => {
                self.get_doctor_by_user(&user.id, auth_token).await?.id == appointment.doctor_id
            }
            None => false,
        };
        if !allowed {
            return Err(AppointmentError::Forbidden(
                "Not a participant of this appointment".to_string(),
            ));
        }

        Ok(appointment)
    }

    /// Role-scoped listing: patients and doctors see their own appointments,
    /// admins see everything and may filter by doctor or patient.
    pub async fn list_appointments(
        &self,
        user: &User,
        query: AppointmentSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut parts: Vec<String> = Vec::new();

        match user.role() {
            Some(Role::Patient) => {
                let patient = self.get_patient_by_user(&user.id, auth_token).await?;
                parts.push(format!("patient_id=eq.{}", patient.id));
            }
            Some(Role::Doctor) => {
                let doctor = self.get_doctor_by_user(&user.id, auth_token).await?;
                parts.push(format!("doctor_id=eq.{}", doctor.id));
            }
            Some(Role::Admin) => {
                if let Some(doctor_id) = query.doctor_id {
                    parts.push(format!("doctor_id=eq.{}", doctor_id));
                }
                if let Some(patient_id) = query.patient_id {
                    parts.push(format!("patient_id=eq.{}", patient_id));
                }
            }
            None => {
                return Err(AppointmentError::Forbidden(
                    "Unknown role".to_string(),
                ))
            }
        }

        if let Some(status) = query.status {
            parts.push(format!("status=eq.{}", status));
        }
        if let Some(from) = query.from_date {
            parts.push(format!("date=gte.{}", from));
        }
        if let Some(to) = query.to_date {
            parts.push(format!("date=lte.{}", to));
        }

        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = query.offset.unwrap_or(0).max(0);
        parts.push("order=date.desc,start_time.asc".to_string());
        parts.push(format!("limit={}", limit));
        parts.push(format!("offset={}", offset));

        let path = format!("/rest/v1/appointments?{}", parts.join("&"));
        let appointments: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        Ok(appointments)
    }

    // ==========================================================================
    // PRIVATE HELPERS
    // ==========================================================================

    async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        result.into_iter().next().ok_or(AppointmentError::NotFound)
    }

    async fn get_patient_by_user(
        &self,
        user_id: &str,
        auth_token: &str,
    ) -> Result<PatientProfile, AppointmentError> {
        let path = format!("/rest/v1/patients?user_id=eq.{}&limit=1", user_id);
        let result: Vec<PatientProfile> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        result.into_iter().next().ok_or(AppointmentError::PatientNotFound)
    }

    async fn get_doctor_by_user(
        &self,
        user_id: &str,
        auth_token: &str,
    ) -> Result<DoctorRef, AppointmentError> {
        let path = format!("/rest/v1/doctors?user_id=eq.{}&limit=1", user_id);
        let result: Vec<DoctorRef> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        result.into_iter().next().ok_or(AppointmentError::DoctorNotFound)
    }

    async fn get_doctor(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<DoctorRef, AppointmentError> {
        let path = format!("/rest/v1/doctors?id=eq.{}&limit=1", doctor_id);
        let result: Vec<DoctorRef> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        result.into_iter().next().ok_or(AppointmentError::DoctorNotFound)
    }

    /// Scan the doctor's pending/confirmed appointments on `date` for a
    /// half-open overlap with the candidate interval.
    async fn check_booking_conflicts(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        start: i32,
        end: i32,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<(), AppointmentError> {
        let mut path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&date=eq.{}&status=in.(pending,confirmed)",
            doctor_id, date
        );
        if let Some(exclude_id) = exclude_appointment_id {
            path.push_str(&format!("&id=neq.{}", exclude_id));
        }

        let existing: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        for other in &existing {
            let (Some(other_start), Some(other_end)) =
                (to_minutes(&other.start_time), to_minutes(&other.end_time))
            else {
                warn!("Skipping appointment {} with unparseable time", other.id);
                continue;
            };

            if overlaps(start, end, other_start, other_end) {
                warn!(
                    "Booking conflict for doctor {} on {}: {}-{} overlaps appointment {}",
                    doctor_id,
                    date,
                    to_time_string(start),
                    to_time_string(end),
                    other.id
                );
                return Err(AppointmentError::Conflict(
                    "This slot is no longer available".to_string(),
                ));
            }
        }

        Ok(())
    }

    async fn update_status(
        &self,
        appointment_id: Uuid,
        next: AppointmentStatus,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Appointment> = self
            .supabase
            .update(
                &path,
                Some(auth_token),
                json!({
                    "status": next,
                    "updated_at": Utc::now().to_rfc3339()
                }),
            )
            .await?;

        result.into_iter().next().ok_or(AppointmentError::NotFound)
    }

    async fn doctor_transition(
        &self,
        user: &User,
        appointment_id: Uuid,
        next: AppointmentStatus,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let doctor = self.get_doctor_by_user(&user.id, auth_token).await?;
        let appointment = self.get_appointment(appointment_id, auth_token).await?;

        if appointment.doctor_id != doctor.id {
            return Err(AppointmentError::Forbidden(
                "Appointment belongs to another doctor".to_string(),
            ));
        }

        AppointmentLifecycle::validate_transition(appointment.status, next)?;

        self.update_status(appointment_id, next, auth_token).await
    }
}

fn parse_interval(start_time: &str, end_time: &str) -> Result<(i32, i32), AppointmentError> {
    let start = to_minutes(start_time).ok_or_else(|| {
        AppointmentError::Validation(format!("Invalid start time: {}", start_time))
    })?;
    let end = to_minutes(end_time)
        .ok_or_else(|| AppointmentError::Validation(format!("Invalid end time: {}", end_time)))?;

    if end <= start {
        return Err(AppointmentError::Validation(
            "End time must be after start time".to_string(),
        ));
    }

    Ok((start, end))
}

fn validate_reason(reason: &str) -> Result<(), AppointmentError> {
    let len = reason.chars().count();
    if len < MIN_REASON_CHARS || len > MAX_REASON_CHARS {
        return Err(AppointmentError::Validation(format!(
            "Reason must be between {} and {} characters",
            MIN_REASON_CHARS, MAX_REASON_CHARS
        )));
    }
    Ok(())
}
