use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::NaiveDate;
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{CreateAvailabilityRequest, UpdateAvailabilityRequest};
use crate::services::availability::AvailabilityService;

#[derive(Debug, Deserialize)]
pub struct AvailableSlotsQuery {
    pub date: String,
}

fn require_approved_doctor(user: &User) -> Result<(), AppError> {
    if !user.is_doctor() {
        return Err(AppError::Forbidden(
            "Only doctors may manage availability".to_string(),
        ));
    }
    if !user.is_approved {
        return Err(AppError::Forbidden(
            "Doctor account is awaiting approval".to_string(),
        ));
    }
    Ok(())
}

// ==============================================================================
// PUBLIC HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_doctor_availability(
    State(state): State<Arc<AppConfig>>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::new(&state);

    let slots = service.list_slots(doctor_id, None).await?;
    let total = slots.len();

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "availability": slots,
        "total": total
    })))
}

#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<Arc<AppConfig>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<AvailableSlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let date = NaiveDate::parse_from_str(&query.date, "%Y-%m-%d")
        .map_err(|_| AppError::Validation(format!("Invalid date: {}", query.date)))?;

    let service = AvailabilityService::new(&state);
    let response = service.get_available_slots(doctor_id, date, None).await?;

    Ok(Json(json!(response)))
}

// ==============================================================================
// PROTECTED AVAILABILITY HANDLERS (DOCTOR ONLY)
// ==============================================================================

#[axum::debug_handler]
pub async fn create_availability(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    require_approved_doctor(&user)?;

    let service = AvailabilityService::new(&state);
    let slot = service
        .create_slot(&user.id, request, auth.token())
        .await?;

    Ok(Json(json!(slot)))
}

#[axum::debug_handler]
pub async fn update_availability(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(slot_id): Path<Uuid>,
    Json(request): Json<UpdateAvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    require_approved_doctor(&user)?;

    let service = AvailabilityService::new(&state);
    let slot = service
        .update_slot(&user.id, slot_id, request, auth.token())
        .await?;

    Ok(Json(json!(slot)))
}

#[axum::debug_handler]
pub async fn delete_availability(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_approved_doctor(&user)?;

    let service = AvailabilityService::new(&state);
    service.delete_slot(&user.id, slot_id, auth.token()).await?;

    Ok(Json(json!({
        "deleted": slot_id
    })))
}
