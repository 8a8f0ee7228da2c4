// libs/lead-cell/src/handlers.rs
use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::context::Actor;
use shared_models::error::AppError;
use shared_utils::extractor::{staff_clinic, webhook_clinic};

use crate::models::{
    CallEndedPayload, CallStartedPayload, LeadCreatedPayload, LeadOutcomeRequest,
    StageTransitionCommand, TransitionLeadStageRequest, WhatsappBlockRequest,
};
use crate::state::LeadCellState;

// ==============================================================================
// WEBHOOK HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn lead_created_webhook(
    State(state): State<LeadCellState>,
    Json(payload): Json<LeadCreatedPayload>,
) -> Result<Json<Value>, AppError> {
    let ctx = webhook_clinic(payload.clinic_id, &state.config)?;
    let lead = state.intake.handle_lead_created(&ctx, &payload).await?;

    Ok(Json(json!({ "ok": true, "lead": lead })))
}

#[axum::debug_handler]
pub async fn call_started_webhook(
    State(state): State<LeadCellState>,
    Json(payload): Json<CallStartedPayload>,
) -> Result<Json<Value>, AppError> {
    let ctx = webhook_clinic(payload.clinic_id, &state.config)?;
    let result = state.calls.handle_call_started(&ctx, &payload).await?;

    Ok(Json(json!({
        "ok": true,
        "call": result.call,
        "transition": result.transition,
    })))
}

#[axum::debug_handler]
pub async fn call_ended_webhook(
    State(state): State<LeadCellState>,
    Json(payload): Json<CallEndedPayload>,
) -> Result<Json<Value>, AppError> {
    let ctx = webhook_clinic(payload.clinic_id, &state.config)?;
    let result = state.calls.handle_call_ended(&ctx, &payload).await?;

    Ok(Json(json!({
        "ok": true,
        "call": result.call,
        "lead_id": result.lead_id,
        "transition": result.transition,
        "retry": result.retry,
    })))
}

// ==============================================================================
// STAFF HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn transition_lead_stage(
    State(state): State<LeadCellState>,
    Extension(user): Extension<User>,
    Path(lead_id): Path<Uuid>,
    Json(request): Json<TransitionLeadStageRequest>,
) -> Result<Json<Value>, AppError> {
    let ctx = staff_clinic(&user, &state.config)?;

    let to_stage_key = request.to_stage_key.trim();
    if to_stage_key.is_empty() {
        return Err(AppError::ValidationError("to_stage_key is required".to_string()));
    }

    let mut command = StageTransitionCommand::new(lead_id, to_stage_key, Actor::staff(user.id.clone()))
        .with_reason(request.reason.unwrap_or_else(|| "manual".to_string()));
    if let Some(meta) = request.meta {
        command = command.with_meta(meta);
    }

    let transition = state.stages.transition_lead_stage(&ctx, &command).await?;

    Ok(Json(json!({ "ok": true, "transition": transition })))
}

#[axum::debug_handler]
pub async fn record_lead_outcome(
    State(state): State<LeadCellState>,
    Extension(user): Extension<User>,
    Path(lead_id): Path<Uuid>,
    Json(request): Json<LeadOutcomeRequest>,
) -> Result<Json<Value>, AppError> {
    let ctx = staff_clinic(&user, &state.config)?;
    let result = state
        .stages
        .record_lead_outcome(&ctx, lead_id, &request, Actor::staff(user.id.clone()))
        .await?;

    Ok(Json(json!({
        "ok": true,
        "lead": result.lead,
        "transition": result.transition,
    })))
}

#[axum::debug_handler]
pub async fn set_whatsapp_block(
    State(state): State<LeadCellState>,
    Extension(user): Extension<User>,
    Path(lead_id): Path<Uuid>,
    Json(request): Json<WhatsappBlockRequest>,
) -> Result<Json<Value>, AppError> {
    let ctx = staff_clinic(&user, &state.config)?;
    let lead = state
        .intake
        .set_whatsapp_block(&ctx, lead_id, &request, Actor::staff(user.id.clone()))
        .await?;

    Ok(Json(json!({ "ok": true, "lead": lead })))
}

#[axum::debug_handler]
pub async fn get_lead_history(
    State(state): State<LeadCellState>,
    Extension(user): Extension<User>,
    Path(lead_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let ctx = staff_clinic(&user, &state.config)?;
    let history = state.intake.stage_history(&ctx, lead_id).await?;

    Ok(Json(json!({ "history": history })))
}

#[axum::debug_handler]
pub async fn get_stage_catalog(
    State(state): State<LeadCellState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    staff_clinic(&user, &state.config)?;
    let catalog = state.stages.stage_catalog().await;

    Ok(Json(json!({
        "stages": catalog.stages,
        "degraded": catalog.degraded,
    })))
}
