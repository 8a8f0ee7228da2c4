// libs/lead-cell/src/services/calls.rs
use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_models::context::{Actor, ClinicContext};
use shared_utils::phone::{normalize_phone, PhoneRules};

use crate::models::{
    AppliedTransition, Call, CallEnd, CallEndedPayload, CallOutcome, CallStart,
    CallStartedPayload, ContactUpdate, CurrentCall, LeadError, NextActionUpdate, PendingAction,
    StageTransitionCommand, RETRY_CALL_ACTION,
};
use crate::services::policy::{
    call_in_progress_stage, compute_retry_due_at, estimate_call_cost, map_call_outcome_to_stage,
    retry_idempotency_key, should_schedule_retry,
};
use crate::services::transition::LeadStageService;
use crate::stages::VISIT_SCHEDULED;
use crate::store::LeadStore;

#[derive(Debug, Clone, Serialize)]
pub struct CallStartedResult {
    pub call: Call,
    pub transition: Option<AppliedTransition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallEndedResult {
    pub call: Option<Call>,
    pub lead_id: Option<Uuid>,
    pub transition: Option<AppliedTransition>,
    pub retry: Option<PendingAction>,
}

/// Drives the call pipeline from the voice agent's webhooks.
pub struct CallEventService {
    store: Arc<dyn LeadStore>,
    stages: Arc<LeadStageService>,
    timezone: Tz,
    cost_per_minute: Option<f64>,
}

fn required_call_id(call_id: Option<&str>) -> Result<String, LeadError> {
    call_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| LeadError::Validation("call_id is required".to_string()))
}

impl CallEventService {
    pub fn new(
        store: Arc<dyn LeadStore>,
        stages: Arc<LeadStageService>,
        timezone: Tz,
        cost_per_minute: Option<f64>,
    ) -> Self {
        Self { store, stages, timezone, cost_per_minute }
    }

    async fn resolve_lead(
        &self,
        ctx: &ClinicContext,
        lead_id: Option<Uuid>,
        phone: Option<&str>,
    ) -> Result<Option<Uuid>, LeadError> {
        if lead_id.is_some() {
            return Ok(lead_id);
        }
        let Some(phone) = phone.and_then(|p| normalize_phone(p, PhoneRules::default())) else {
            return Ok(None);
        };
        Ok(self.store.find_lead_by_phone(ctx, &phone).await?.map(|lead| lead.id))
    }

    #[instrument(skip(self, payload), fields(call_id = ?payload.call_id))]
    pub async fn handle_call_started(
        &self,
        ctx: &ClinicContext,
        payload: &CallStartedPayload,
    ) -> Result<CallStartedResult, LeadError> {
        let call_id = required_call_id(payload.call_id.as_deref())?;
        let started_at = payload.started_at.unwrap_or_else(Utc::now);
        let lead_id = self.resolve_lead(ctx, payload.lead_id, payload.phone.as_deref()).await?;

        let attempt_no = match (payload.attempt_no, lead_id) {
            (Some(n), _) => n.max(1),
            (None, Some(lead_id)) => self.store.count_lead_calls(ctx, lead_id, &call_id).await? as i32 + 1,
            (None, None) => 1,
        };

        let call = self
            .store
            .upsert_call_started(
                ctx,
                &CallStart {
                    retell_call_id: call_id.clone(),
                    lead_id,
                    attempt_no,
                    started_at,
                },
            )
            .await?;

        self.store
            .set_current_call(
                ctx,
                Some(&CurrentCall {
                    call_id: call_id.clone(),
                    lead_id,
                    started_at,
                }),
            )
            .await?;

        let Some(lead_id) = lead_id else {
            debug!("Call {} started without a known lead", call_id);
            return Ok(CallStartedResult { call, transition: None });
        };

        let command = StageTransitionCommand::new(lead_id, call_in_progress_stage(attempt_no), Actor::retell_ai())
            .with_reason("call_started")
            .with_meta(json!({ "call_id": call_id, "attempt_no": attempt_no }));
        let transition = self.stages.transition_lead_stage(ctx, &command).await?;

        self.store
            .update_lead_contact(
                ctx,
                lead_id,
                &ContactUpdate {
                    last_contact_at: Some(started_at),
                    next_action: NextActionUpdate::Keep,
                },
            )
            .await?;

        info!("Call {} started for lead {} (attempt {})", call_id, lead_id, attempt_no);
        Ok(CallStartedResult { call, transition: Some(transition) })
    }

    #[instrument(skip(self, payload), fields(call_id = ?payload.call_id))]
    pub async fn handle_call_ended(
        &self,
        ctx: &ClinicContext,
        payload: &CallEndedPayload,
    ) -> Result<CallEndedResult, LeadError> {
        let call_id = required_call_id(payload.call_id.as_deref())?;
        let ended_at = payload.ended_at.unwrap_or_else(Utc::now);
        let duration_sec = payload.duration_sec.or(payload.duration);
        let call_cost_eur = payload.call_cost_eur.or_else(|| {
            duration_sec
                .zip(self.cost_per_minute)
                .map(|(secs, rate)| estimate_call_cost(secs, rate))
        });
        let outcome = payload.outcome.as_deref().and_then(CallOutcome::parse);
        if outcome.is_none() && payload.outcome.is_some() {
            debug!("Unrecognised call outcome {:?}, treating as none", payload.outcome);
        }

        let call = self
            .store
            .finalize_call(
                ctx,
                &CallEnd {
                    retell_call_id: call_id.clone(),
                    ended_at,
                    duration_sec,
                    outcome: payload.outcome.clone(),
                    transcript: payload.transcript.clone(),
                    summary: payload.summary.clone(),
                    extracted: payload.extracted_fields.clone(),
                    recording_url: payload.recording_url.clone(),
                    call_cost_eur,
                },
            )
            .await?;
        if call.is_none() {
            warn!("call_ended for unknown call {}", call_id);
        }

        self.store.set_current_call(ctx, None).await?;

        let lead_id = payload.lead_id.or(call.as_ref().and_then(|c| c.lead_id));
        let Some(lead_id) = lead_id else {
            return Ok(CallEndedResult { call, lead_id: None, transition: None, retry: None });
        };

        let attempt_no = payload
            .attempt_no
            .or(call.as_ref().and_then(|c| c.attempt_no))
            .unwrap_or(1)
            .max(1);
        let to_stage = map_call_outcome_to_stage(outcome, attempt_no);

        let command = StageTransitionCommand::new(lead_id, to_stage, Actor::retell_ai())
            .with_reason("call_ended")
            .with_meta(json!({
                "call_id": call_id,
                "outcome": outcome.map(|o| o.as_str()),
                "attempt_no": attempt_no,
            }));
        let transition = self.stages.transition_lead_stage(ctx, &command).await?;

        let mut retry = None;
        let next_action = if should_schedule_retry(outcome, attempt_no) {
            let action = PendingAction {
                clinic_id: ctx.clinic_id,
                lead_id,
                action_type: RETRY_CALL_ACTION.to_string(),
                due_at: compute_retry_due_at(ended_at, &self.timezone),
                status: "pending".to_string(),
                idempotency_key: retry_idempotency_key(lead_id, attempt_no),
                payload: json!({ "attempt_no": attempt_no + 1, "previous_call_id": call_id }),
            };
            if self.store.upsert_pending_action(ctx, &action).await? {
                info!("Scheduled call retry for lead {} at {}", lead_id, action.due_at);
            } else {
                debug!("Retry {} already scheduled", action.idempotency_key);
            }
            let due_at = action.due_at;
            retry = Some(action);
            NextActionUpdate::Set(due_at)
        } else if to_stage == VISIT_SCHEDULED || self.stages.stage_catalog().await.is_terminal(to_stage) {
            NextActionUpdate::Clear
        } else {
            NextActionUpdate::Keep
        };

        self.store
            .update_lead_contact(
                ctx,
                lead_id,
                &ContactUpdate {
                    last_contact_at: Some(ended_at),
                    next_action,
                },
            )
            .await?;

        Ok(CallEndedResult {
            call,
            lead_id: Some(lead_id),
            transition: Some(transition),
            retry,
        })
    }
}
