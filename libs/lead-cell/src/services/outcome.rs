// libs/lead-cell/src/services/outcome.rs
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use shared_models::context::{Actor, ClinicContext};

use crate::models::{
    AppliedTransition, AuditLogEntry, Lead, LeadConversion, LeadError, LeadOutcomeRequest,
    StageTransitionCommand,
};
use crate::services::transition::LeadStageService;
use crate::stages::{CLIENT_CLOSED, POST_VISIT_OUTCOME_STAGES};

pub const AUDIT_LEAD_CONVERTED: &str = "lead_converted_to_client";
pub const AUDIT_POST_VISIT_UPDATED: &str = "lead_post_visit_status_updated";

#[derive(Debug, Clone, Serialize)]
pub struct LeadOutcomeResult {
    pub lead: Lead,
    pub transition: AppliedTransition,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Checks the request before anything is written.
pub fn validate_outcome(request: &LeadOutcomeRequest) -> Result<LeadConversion, LeadError> {
    let stage = request.to_stage_key.as_str();

    if stage == CLIENT_CLOSED {
        let value_eur = request
            .converted_value_eur
            .filter(|v| v.is_finite() && *v >= 0.0)
            .ok_or_else(|| LeadError::Validation("converted_value_eur must be a non-negative number".to_string()))?;
        let service_name = non_empty(request.converted_service_name.as_deref())
            .ok_or_else(|| LeadError::Validation("converted_service_name is required".to_string()))?;

        return Ok(LeadConversion::Converted {
            value_eur,
            service_name,
            converted_at: Utc::now(),
        });
    }

    if POST_VISIT_OUTCOME_STAGES.contains(&stage) {
        let reason = non_empty(request.outcome_reason.as_deref())
            .ok_or_else(|| LeadError::Validation("outcome_reason is required".to_string()))?;
        return Ok(LeadConversion::PostVisit { reason });
    }

    Err(LeadError::Validation(format!("{} is not a post-visit outcome stage", stage)))
}

impl LeadStageService {
    /// Close out a visit: transition first, then write the conversion
    /// fields and an audit entry.
    #[instrument(skip(self, request, actor), fields(to = %request.to_stage_key))]
    pub async fn record_lead_outcome(
        &self,
        ctx: &ClinicContext,
        lead_id: Uuid,
        request: &LeadOutcomeRequest,
        actor: Actor,
    ) -> Result<LeadOutcomeResult, LeadError> {
        let conversion = validate_outcome(request)?;
        let source = request.source.clone().unwrap_or_else(|| "staff".to_string());

        let command = StageTransitionCommand::new(lead_id, &request.to_stage_key, actor.clone())
            .with_reason("lead_outcome")
            .with_meta(json!({
                "source": source,
                "converted_value_eur": request.converted_value_eur,
                "converted_service_name": request.converted_service_name,
                "outcome_reason": request.outcome_reason,
            }));

        // Conversion fields are only written on top of a recorded transition.
        let transition = self
            .apply_atomic(ctx, &command)
            .await
            .map_err(|e| LeadError::TransitionFailed(e.to_string()))?;

        let lead = self
            .store
            .update_lead_conversion(ctx, lead_id, &conversion)
            .await?
            .ok_or(LeadError::NotFound)?;

        let (action, meta) = match &conversion {
            LeadConversion::Converted { value_eur, service_name, .. } => (
                AUDIT_LEAD_CONVERTED,
                json!({
                    "to_stage_key": request.to_stage_key,
                    "converted_value_eur": value_eur,
                    "converted_service_name": service_name,
                    "source": source,
                }),
            ),
            LeadConversion::PostVisit { reason } => (
                AUDIT_POST_VISIT_UPDATED,
                json!({
                    "to_stage_key": request.to_stage_key,
                    "outcome_reason": reason,
                    "source": source,
                }),
            ),
        };

        let entry = AuditLogEntry {
            clinic_id: ctx.clinic_id,
            entity_type: "lead".to_string(),
            entity_id: lead_id,
            action: action.to_string(),
            actor_type: actor.actor_type,
            actor_id: actor.actor_id,
            meta,
        };
        if let Err(e) = self.store.insert_audit_log(ctx, &entry).await {
            warn!("Failed to write audit entry {} for lead {}: {}", action, lead_id, e);
        }

        info!("Recorded outcome {} for lead {}", request.to_stage_key, lead_id);
        Ok(LeadOutcomeResult { lead, transition })
    }
}
