// libs/lead-cell/src/router.rs
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use shared_utils::extractor::{auth_middleware, webhook_secret_middleware};

use crate::handlers;
use crate::state::LeadCellState;

/// Machine-to-machine routes, authenticated by the shared webhook secret.
pub fn lead_webhook_routes(state: LeadCellState) -> Router {
    Router::new()
        .route("/lead_created", post(handlers::lead_created_webhook))
        .route("/call_started", post(handlers::call_started_webhook))
        .route("/call_ended", post(handlers::call_ended_webhook))
        .layer(middleware::from_fn_with_state(state.config.clone(), webhook_secret_middleware))
        .with_state(state)
}

pub fn lead_routes(state: LeadCellState) -> Router {
    Router::new()
        .route("/stages", get(handlers::get_stage_catalog))
        .route("/{lead_id}/stage", post(handlers::transition_lead_stage))
        .route("/{lead_id}/outcome", post(handlers::record_lead_outcome))
        .route("/{lead_id}/whatsapp-block", put(handlers::set_whatsapp_block))
        .route("/{lead_id}/history", get(handlers::get_lead_history))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}
