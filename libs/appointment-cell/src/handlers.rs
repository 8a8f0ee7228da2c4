// libs/appointment-cell/src/handlers.rs
use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::context::Actor;
use shared_models::error::AppError;
use shared_utils::extractor::{staff_clinic, webhook_clinic};

use crate::models::{
    AvailabilityQuery, CreateAppointmentRequest, CreateBusyBlockRequest, RescheduleAppointmentRequest,
    SourceChannel,
};
use crate::services::BookingOrigin;
use crate::state::AppointmentCellState;

// ==============================================================================
// WEBHOOK HANDLERS
// ==============================================================================

/// Booking made by an agent (voice or WhatsApp).
#[axum::debug_handler]
pub async fn appointment_created_webhook(
    State(state): State<AppointmentCellState>,
    Json(payload): Json<CreateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let ctx = webhook_clinic(payload.clinic_id, &state.config)?;
    let origin = BookingOrigin::agent(payload.source_channel.unwrap_or(SourceChannel::CallAi));
    let result = state.booking.create_appointment(&ctx, &payload, &origin).await?;

    Ok(Json(json!({
        "ok": true,
        "appointment": result.appointment,
        "transition": result.transition,
        "calendar_event_id": result.calendar_event_id,
    })))
}

// ==============================================================================
// STAFF HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let ctx = staff_clinic(&user, &state.config)?;
    let origin = BookingOrigin::staff(user.id.clone());
    let result = state.booking.create_appointment(&ctx, &request, &origin).await?;

    Ok(Json(json!({
        "ok": true,
        "appointment": result.appointment,
        "transition": result.transition,
        "calendar_event_id": result.calendar_event_id,
    })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let ctx = staff_clinic(&user, &state.config)?;
    let result = state
        .booking
        .reschedule_appointment(&ctx, appointment_id, &request, &Actor::staff(user.id.clone()))
        .await?;

    Ok(Json(json!({
        "ok": true,
        "appointment": result.appointment,
        "transition": result.transition,
        "calendar_event_id": result.calendar_event_id,
    })))
}

#[axum::debug_handler]
pub async fn create_busy_block(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateBusyBlockRequest>,
) -> Result<Json<Value>, AppError> {
    let ctx = staff_clinic(&user, &state.config)?;
    let block = state
        .booking
        .create_busy_block(&ctx, &request, Some(user.id.clone()))
        .await?;

    Ok(Json(json!({ "ok": true, "busy_block": block })))
}

#[axum::debug_handler]
pub async fn get_availability(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Value>, AppError> {
    let ctx = staff_clinic(&user, &state.config)?;
    let report = state.booking.check_availability(&ctx, &query).await?;

    Ok(Json(json!(report)))
}
