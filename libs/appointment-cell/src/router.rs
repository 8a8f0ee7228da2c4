// libs/appointment-cell/src/router.rs
use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_utils::extractor::{auth_middleware, webhook_secret_middleware};

use crate::handlers;
use crate::state::AppointmentCellState;

pub fn appointment_webhook_routes(state: AppointmentCellState) -> Router {
    Router::new()
        .route("/appointment_created", post(handlers::appointment_created_webhook))
        .layer(middleware::from_fn_with_state(state.config.clone(), webhook_secret_middleware))
        .with_state(state)
}

pub fn appointment_routes(state: AppointmentCellState) -> Router {
    Router::new()
        .route("/appointments", post(handlers::create_appointment))
        .route("/appointments/{appointment_id}/reschedule", patch(handlers::reschedule_appointment))
        .route("/busy-blocks", post(handlers::create_busy_block))
        .route("/availability", get(handlers::get_availability))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}
