use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn doctor_routes(state: Arc<AppConfig>) -> Router {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/{doctor_id}/availability", get(handlers::list_doctor_availability))
        .route("/{doctor_id}/available-slots", get(handlers::get_available_slots));

    // Availability management, doctor only
    let protected_routes = Router::new()
        .route("/availability", post(handlers::create_availability))
        .route("/availability/{slot_id}", put(handlers::update_availability))
        .route("/availability/{slot_id}", delete(handlers::delete_availability))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
