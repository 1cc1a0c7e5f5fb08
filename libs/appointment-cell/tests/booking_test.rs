use assert_matches::assert_matches;
use chrono::{Days, NaiveDate, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::{
    AppointmentError, AppointmentSearchQuery, AppointmentStatus, BookAppointmentRequest,
    RescheduleAppointmentRequest,
};
use appointment_cell::services::booking::AppointmentService;
use shared_models::auth::User;
use shared_utils::test_utils::{MockStoreRows, TestConfig, TestUser};

struct TestSetup {
    server: MockServer,
    service: AppointmentService,
    patient_user: TestUser,
    doctor_user: TestUser,
    patient_id: String,
    doctor_id: String,
}

impl TestSetup {
    async fn new() -> Self {
        let server = MockServer::start().await;
        let config = TestConfig::with_store_url(&server.uri()).to_app_config();
        let service = AppointmentService::new(&config);

        Self {
            server,
            service,
            patient_user: TestUser::patient("pat@example.com"),
            doctor_user: TestUser::doctor("doc@example.com"),
            patient_id: Uuid::new_v4().to_string(),
            doctor_id: Uuid::new_v4().to_string(),
        }
    }

    fn patient(&self) -> User {
        self.patient_user.to_user()
    }

    fn doctor(&self) -> User {
        self.doctor_user.to_user()
    }

    async fn mock_patient_lookup(&self) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/patients"))
            .and(query_param("user_id", format!("eq.{}", self.patient_user.id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockStoreRows::patient_row(&self.patient_id, &self.patient_user.id)
            ])))
            .mount(&self.server)
            .await;
    }

    async fn mock_doctor_by_id(&self) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/doctors"))
            .and(query_param("id", format!("eq.{}", self.doctor_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockStoreRows::doctor_row(&self.doctor_id, &self.doctor_user.id)
            ])))
            .mount(&self.server)
            .await;
    }

    async fn mock_doctor_by_user(&self) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/doctors"))
            .and(query_param("user_id", format!("eq.{}", self.doctor_user.id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockStoreRows::doctor_row(&self.doctor_id, &self.doctor_user.id)
            ])))
            .mount(&self.server)
            .await;
    }

    /// Mock the pending/confirmed overlap scan for a date.
    async fn mock_conflict_scan(&self, rows: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .and(query_param("status", "in.(pending,confirmed)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rows))
            .mount(&self.server)
            .await;
    }

    /// Mock the single-appointment fetch by id.
    async fn mock_appointment_fetch(&self, appointment_id: &str, row: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .and(query_param("id", format!("eq.{}", appointment_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
            .mount(&self.server)
            .await;
    }

    fn appointment_row(
        &self,
        appointment_id: &str,
        date: &str,
        start: &str,
        end: &str,
        status: &str,
    ) -> serde_json::Value {
        MockStoreRows::appointment_row(
            appointment_id,
            &self.patient_id,
            &self.doctor_id,
            date,
            start,
            end,
            status,
        )
    }
}

fn future_date() -> NaiveDate {
    Utc::now().date_naive() + Days::new(7)
}

fn date_str(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn book_request(setup: &TestSetup, date: NaiveDate, start: &str, end: &str) -> BookAppointmentRequest {
    BookAppointmentRequest {
        doctor_id: setup.doctor_id.parse().unwrap(),
        date,
        start_time: start.to_string(),
        end_time: end.to_string(),
        reason: "Persistent lower back pain".to_string(),
    }
}

// ==============================================================================
// BOOKING
// ==============================================================================

#[tokio::test]
async fn books_a_clear_slot_as_pending() {
    let setup = TestSetup::new().await;
    setup.mock_patient_lookup().await;
    setup.mock_doctor_by_id().await;
    setup.mock_conflict_scan(json!([])).await;

    let date = future_date();
    let appointment_id = Uuid::new_v4().to_string();
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            setup.appointment_row(&appointment_id, &date_str(date), "09:00", "10:00", "pending")
        ])))
        .mount(&setup.server)
        .await;

    let appointment = setup
        .service
        .book_appointment(
            &setup.patient_user.id,
            book_request(&setup, date, "09:00", "10:00"),
            "token",
        )
        .await
        .expect("booking a clear slot should succeed");

    assert_eq!(appointment.status, AppointmentStatus::Pending);
    assert_eq!(appointment.start_time, "09:00");
}

#[tokio::test]
async fn overlapping_booking_is_rejected() {
    let setup = TestSetup::new().await;
    setup.mock_patient_lookup().await;
    setup.mock_doctor_by_id().await;

    // Existing confirmed 09:00-10:00; candidate 09:30-10:30 overlaps it.
    let date = future_date();
    let existing = Uuid::new_v4().to_string();
    setup
        .mock_conflict_scan(json!([
            setup.appointment_row(&existing, &date_str(date), "09:00", "10:00", "confirmed")
        ]))
        .await;

    // The insert must never be attempted.
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&setup.server)
        .await;

    let err = setup
        .service
        .book_appointment(
            &setup.patient_user.id,
            book_request(&setup, date, "09:30", "10:30"),
            "token",
        )
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::Conflict(_));
}

#[tokio::test]
async fn back_to_back_booking_succeeds() {
    let setup = TestSetup::new().await;
    setup.mock_patient_lookup().await;
    setup.mock_doctor_by_id().await;

    let date = future_date();
    let existing = Uuid::new_v4().to_string();
    setup
        .mock_conflict_scan(json!([
            setup.appointment_row(&existing, &date_str(date), "09:00", "10:00", "confirmed")
        ]))
        .await;

    let appointment_id = Uuid::new_v4().to_string();
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            setup.appointment_row(&appointment_id, &date_str(date), "10:00", "11:00", "pending")
        ])))
        .mount(&setup.server)
        .await;

    // Half-open intervals: starting exactly at the other booking's end is fine.
    let appointment = setup
        .service
        .book_appointment(
            &setup.patient_user.id,
            book_request(&setup, date, "10:00", "11:00"),
            "token",
        )
        .await
        .expect("back-to-back booking should succeed");

    assert_eq!(appointment.start_time, "10:00");
}

#[tokio::test]
async fn duplicate_key_race_surfaces_as_conflict() {
    let setup = TestSetup::new().await;
    setup.mock_patient_lookup().await;
    setup.mock_doctor_by_id().await;
    setup.mock_conflict_scan(json!([])).await;

    // A concurrent booking with the identical start time won the insert race;
    // the unique index on (doctor_id, date, start_time) rejects ours.
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint"
        })))
        .mount(&setup.server)
        .await;

    let err = setup
        .service
        .book_appointment(
            &setup.patient_user.id,
            book_request(&setup, future_date(), "09:00", "10:00"),
            "token",
        )
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::Conflict(_));
}

#[tokio::test]
async fn rejects_past_dates_at_creation() {
    let setup = TestSetup::new().await;

    let yesterday = Utc::now().date_naive().pred_opt().unwrap();
    let err = setup
        .service
        .book_appointment(
            &setup.patient_user.id,
            book_request(&setup, yesterday, "09:00", "10:00"),
            "token",
        )
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::Validation(msg) if msg.contains("past"));
}

#[tokio::test]
async fn rejects_bad_intervals_and_reasons() {
    let setup = TestSetup::new().await;
    let date = future_date();

    let err = setup
        .service
        .book_appointment(
            &setup.patient_user.id,
            book_request(&setup, date, "10:00", "09:00"),
            "token",
        )
        .await
        .unwrap_err();
    assert_matches!(err, AppointmentError::Validation(_));

    let err = setup
        .service
        .book_appointment(
            &setup.patient_user.id,
            book_request(&setup, date, "9:00", "10:00"),
            "token",
        )
        .await
        .unwrap_err();
    assert_matches!(err, AppointmentError::Validation(_));

    let mut request = book_request(&setup, date, "09:00", "10:00");
    request.reason = "too short".to_string();
    let err = setup
        .service
        .book_appointment(&setup.patient_user.id, request, "token")
        .await
        .unwrap_err();
    assert_matches!(err, AppointmentError::Validation(msg) if msg.contains("Reason"));
}

// ==============================================================================
// RESCHEDULE
// ==============================================================================

#[tokio::test]
async fn reschedule_resets_status_to_pending() {
    let setup = TestSetup::new().await;
    setup.mock_patient_lookup().await;
    setup.mock_doctor_by_id().await;

    let date = future_date();
    let new_date = date + Days::new(1);
    let appointment_id = Uuid::new_v4().to_string();
    setup
        .mock_appointment_fetch(
            &appointment_id,
            setup.appointment_row(&appointment_id, &date_str(date), "09:00", "10:00", "confirmed"),
        )
        .await;

    // The scan excludes the appointment being moved.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("neq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&setup.server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            setup.appointment_row(&appointment_id, &date_str(new_date), "11:00", "12:00", "pending")
        ])))
        .mount(&setup.server)
        .await;

    let updated = setup
        .service
        .reschedule_appointment(
            &setup.patient(),
            appointment_id.parse().unwrap(),
            RescheduleAppointmentRequest {
                date: new_date,
                start_time: "11:00".to_string(),
                end_time: "12:00".to_string(),
            },
            "token",
        )
        .await
        .expect("reschedule should succeed");

    // A confirmed appointment drops back to pending for re-approval.
    assert_eq!(updated.status, AppointmentStatus::Pending);
    assert_eq!(updated.start_time, "11:00");
}

#[tokio::test]
async fn failed_reschedule_leaves_the_original_untouched() {
    let setup = TestSetup::new().await;
    setup.mock_patient_lookup().await;

    let date = future_date();
    let appointment_id = Uuid::new_v4().to_string();
    setup
        .mock_appointment_fetch(
            &appointment_id,
            setup.appointment_row(&appointment_id, &date_str(date), "09:00", "10:00", "confirmed"),
        )
        .await;

    // The target time is taken by someone else's booking.
    let other = Uuid::new_v4().to_string();
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("neq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            setup.appointment_row(&other, &date_str(date), "14:00", "15:00", "pending")
        ])))
        .mount(&setup.server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&setup.server)
        .await;

    let err = setup
        .service
        .reschedule_appointment(
            &setup.patient(),
            appointment_id.parse().unwrap(),
            RescheduleAppointmentRequest {
                date,
                start_time: "14:30".to_string(),
                end_time: "15:30".to_string(),
            },
            "token",
        )
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::Conflict(_));
}

#[tokio::test]
async fn cannot_reschedule_a_completed_appointment() {
    let setup = TestSetup::new().await;
    setup.mock_patient_lookup().await;

    let appointment_id = Uuid::new_v4().to_string();
    setup
        .mock_appointment_fetch(
            &appointment_id,
            setup.appointment_row(&appointment_id, "2024-01-15", "09:00", "10:00", "completed"),
        )
        .await;

    let err = setup
        .service
        .reschedule_appointment(
            &setup.patient(),
            appointment_id.parse().unwrap(),
            RescheduleAppointmentRequest {
                date: future_date(),
                start_time: "11:00".to_string(),
                end_time: "12:00".to_string(),
            },
            "token",
        )
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::Precondition(_));
}

#[tokio::test]
async fn cannot_reschedule_another_patients_appointment() {
    let setup = TestSetup::new().await;

    let stranger = TestUser::patient("stranger@example.com");
    let stranger_patient_id = Uuid::new_v4().to_string();
    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .and(query_param("user_id", format!("eq.{}", stranger.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::patient_row(&stranger_patient_id, &stranger.id)
        ])))
        .mount(&setup.server)
        .await;

    let appointment_id = Uuid::new_v4().to_string();
    setup
        .mock_appointment_fetch(
            &appointment_id,
            setup.appointment_row(
                &appointment_id,
                &date_str(future_date()),
                "09:00",
                "10:00",
                "pending",
            ),
        )
        .await;

    let err = setup
        .service
        .reschedule_appointment(
            &stranger.to_user(),
            appointment_id.parse().unwrap(),
            RescheduleAppointmentRequest {
                date: future_date(),
                start_time: "11:00".to_string(),
                end_time: "12:00".to_string(),
            },
            "token",
        )
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::Forbidden(_));
}

// ==============================================================================
// STATUS TRANSITIONS
// ==============================================================================

#[tokio::test]
async fn doctor_approves_a_pending_appointment() {
    let setup = TestSetup::new().await;
    setup.mock_doctor_by_user().await;

    let date = future_date();
    let appointment_id = Uuid::new_v4().to_string();
    setup
        .mock_appointment_fetch(
            &appointment_id,
            setup.appointment_row(&appointment_id, &date_str(date), "09:00", "10:00", "pending"),
        )
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            setup.appointment_row(&appointment_id, &date_str(date), "09:00", "10:00", "confirmed")
        ])))
        .mount(&setup.server)
        .await;

    let appointment = setup
        .service
        .approve_appointment(&setup.doctor(), appointment_id.parse().unwrap(), "token")
        .await
        .expect("approve should succeed");

    assert_eq!(appointment.status, AppointmentStatus::Confirmed);
}

#[tokio::test]
async fn cannot_approve_twice() {
    let setup = TestSetup::new().await;
    setup.mock_doctor_by_user().await;

    let appointment_id = Uuid::new_v4().to_string();
    setup
        .mock_appointment_fetch(
            &appointment_id,
            setup.appointment_row(
                &appointment_id,
                &date_str(future_date()),
                "09:00",
                "10:00",
                "confirmed",
            ),
        )
        .await;

    let err = setup
        .service
        .approve_appointment(&setup.doctor(), appointment_id.parse().unwrap(), "token")
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::Precondition(_));
}

#[tokio::test]
async fn complete_before_the_start_time_is_refused() {
    let setup = TestSetup::new().await;
    setup.mock_doctor_by_user().await;

    let appointment_id = Uuid::new_v4().to_string();
    setup
        .mock_appointment_fetch(
            &appointment_id,
            setup.appointment_row(
                &appointment_id,
                &date_str(future_date()),
                "09:00",
                "10:00",
                "confirmed",
            ),
        )
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&setup.server)
        .await;

    let err = setup
        .service
        .complete_appointment(&setup.doctor(), appointment_id.parse().unwrap(), "token")
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::Precondition(msg) if msg.contains("not started"));
}

#[tokio::test]
async fn complete_after_the_start_time_succeeds() {
    let setup = TestSetup::new().await;
    setup.mock_doctor_by_user().await;

    let yesterday = Utc::now().date_naive().pred_opt().unwrap();
    let appointment_id = Uuid::new_v4().to_string();
    setup
        .mock_appointment_fetch(
            &appointment_id,
            setup.appointment_row(&appointment_id, &date_str(yesterday), "09:00", "10:00", "confirmed"),
        )
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            setup.appointment_row(&appointment_id, &date_str(yesterday), "09:00", "10:00", "completed")
        ])))
        .mount(&setup.server)
        .await;

    let appointment = setup
        .service
        .complete_appointment(&setup.doctor(), appointment_id.parse().unwrap(), "token")
        .await
        .expect("complete should succeed once the start time passed");

    assert_eq!(appointment.status, AppointmentStatus::Completed);
}

#[tokio::test]
async fn cancel_is_idempotent() {
    let setup = TestSetup::new().await;
    setup.mock_patient_lookup().await;

    let appointment_id = Uuid::new_v4().to_string();
    setup
        .mock_appointment_fetch(
            &appointment_id,
            setup.appointment_row(
                &appointment_id,
                &date_str(future_date()),
                "09:00",
                "10:00",
                "cancelled",
            ),
        )
        .await;

    // Already cancelled: no state change is written.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&setup.server)
        .await;

    let appointment = setup
        .service
        .cancel_appointment(&setup.patient(), appointment_id.parse().unwrap(), "token")
        .await
        .expect("re-cancelling should be a no-op");

    assert_eq!(appointment.status, AppointmentStatus::Cancelled);
}

#[tokio::test]
async fn patient_cancels_a_pending_appointment() {
    let setup = TestSetup::new().await;
    setup.mock_patient_lookup().await;

    let date = future_date();
    let appointment_id = Uuid::new_v4().to_string();
    setup
        .mock_appointment_fetch(
            &appointment_id,
            setup.appointment_row(&appointment_id, &date_str(date), "09:00", "10:00", "pending"),
        )
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            setup.appointment_row(&appointment_id, &date_str(date), "09:00", "10:00", "cancelled")
        ])))
        .mount(&setup.server)
        .await;

    let appointment = setup
        .service
        .cancel_appointment(&setup.patient(), appointment_id.parse().unwrap(), "token")
        .await
        .expect("patient cancel should succeed");

    assert_eq!(appointment.status, AppointmentStatus::Cancelled);
}

#[tokio::test]
async fn cannot_cancel_a_completed_appointment() {
    let setup = TestSetup::new().await;
    setup.mock_patient_lookup().await;

    let appointment_id = Uuid::new_v4().to_string();
    setup
        .mock_appointment_fetch(
            &appointment_id,
            setup.appointment_row(&appointment_id, "2024-01-15", "09:00", "10:00", "completed"),
        )
        .await;

    let err = setup
        .service
        .cancel_appointment(&setup.patient(), appointment_id.parse().unwrap(), "token")
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::Precondition(_));
}

// ==============================================================================
// READS
// ==============================================================================

#[tokio::test]
async fn patient_listing_is_scoped_to_their_own_appointments() {
    let setup = TestSetup::new().await;
    setup.mock_patient_lookup().await;

    let date = future_date();
    let appointment_id = Uuid::new_v4().to_string();
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("patient_id", format!("eq.{}", setup.patient_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            setup.appointment_row(&appointment_id, &date_str(date), "09:00", "10:00", "pending")
        ])))
        .mount(&setup.server)
        .await;

    let appointments = setup
        .service
        .list_appointments(&setup.patient(), AppointmentSearchQuery::default(), "token")
        .await
        .expect("patient listing should succeed");

    assert_eq!(appointments.len(), 1);
    assert_eq!(appointments[0].id.to_string(), appointment_id);
}

#[tokio::test]
async fn viewing_someone_elses_appointment_is_forbidden() {
    let setup = TestSetup::new().await;

    let stranger = TestUser::patient("stranger@example.com");
    let stranger_patient_id = Uuid::new_v4().to_string();
    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .and(query_param("user_id", format!("eq.{}", stranger.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::patient_row(&stranger_patient_id, &stranger.id)
        ])))
        .mount(&setup.server)
        .await;

    let appointment_id = Uuid::new_v4().to_string();
    setup
        .mock_appointment_fetch(
            &appointment_id,
            setup.appointment_row(
                &appointment_id,
                &date_str(future_date()),
                "09:00",
                "10:00",
                "pending",
            ),
        )
        .await;

    let err = setup
        .service
        .view_appointment(&stranger.to_user(), appointment_id.parse().unwrap(), "token")
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::Forbidden(_));
}

#[tokio::test]
async fn missing_appointment_is_not_found() {
    let setup = TestSetup::new().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&setup.server)
        .await;

    let err = setup
        .service
        .view_appointment(&setup.patient(), Uuid::new_v4(), "token")
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::NotFound);
}
