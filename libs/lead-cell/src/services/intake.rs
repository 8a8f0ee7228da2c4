// libs/lead-cell/src/services/intake.rs
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use shared_models::context::{Actor, ClinicContext};
use shared_utils::phone::{normalize_phone, PhoneRules};

use crate::models::{
    AuditLogEntry, ContactUpdate, Lead, LeadCreatedPayload, LeadError, LeadStageHistory, NewLead,
    WhatsappBlockRequest, WhatsappBlockUpdate,
};
use crate::store::LeadStore;

pub const DEFAULT_LEAD_SOURCE: &str = "meta";

/// Lead creation, lookups and opt-out flags. Never touches the stage.
pub struct LeadIntakeService {
    store: Arc<dyn LeadStore>,
    phone_rules: PhoneRules,
}

impl LeadIntakeService {
    pub fn new(store: Arc<dyn LeadStore>) -> Self {
        Self {
            store,
            phone_rules: PhoneRules::default(),
        }
    }

    /// Canonical phone or a user-facing validation error.
    pub fn normalize_lead_phone(&self, raw: &str) -> Result<String, LeadError> {
        normalize_phone(raw, self.phone_rules).ok_or_else(|| {
            LeadError::Validation(format!(
                "Invalid phone number: expected {} digits after +{}",
                self.phone_rules.national_digits, self.phone_rules.country_code
            ))
        })
    }

    /// Inbound lead from an ad form or automation. An unparseable phone is
    /// stored as sent so the team can fix it by hand.
    pub async fn handle_lead_created(
        &self,
        ctx: &ClinicContext,
        payload: &LeadCreatedPayload,
    ) -> Result<Lead, LeadError> {
        let raw_phone = payload
            .phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| LeadError::Validation("phone is required".to_string()))?;

        let phone = normalize_phone(raw_phone, self.phone_rules).unwrap_or_else(|| {
            warn!("Lead phone '{}' could not be normalized, storing as received", raw_phone);
            raw_phone.to_string()
        });

        let lead = self
            .store
            .upsert_lead(
                ctx,
                &NewLead {
                    id: payload.lead_id,
                    full_name: payload.full_name.clone(),
                    phone,
                    treatment: payload.treatment.clone(),
                    source: payload
                        .source
                        .clone()
                        .unwrap_or_else(|| DEFAULT_LEAD_SOURCE.to_string()),
                },
            )
            .await?;

        info!("Lead {} received for clinic {}", lead.id, ctx.clinic_id);
        Ok(lead)
    }

    /// Upsert keyed on `(clinic_id, phone)`; the phone must normalize.
    pub async fn upsert_lead_by_phone(
        &self,
        ctx: &ClinicContext,
        full_name: Option<&str>,
        raw_phone: &str,
        source: &str,
    ) -> Result<Lead, LeadError> {
        let phone = self.normalize_lead_phone(raw_phone)?;
        self.store
            .upsert_lead(
                ctx,
                &NewLead {
                    id: None,
                    full_name: full_name.map(str::to_string),
                    phone,
                    treatment: None,
                    source: source.to_string(),
                },
            )
            .await
    }

    pub async fn get_lead(&self, ctx: &ClinicContext, lead_id: Uuid) -> Result<Lead, LeadError> {
        self.store
            .get_lead(ctx, lead_id)
            .await?
            .ok_or(LeadError::NotFound)
    }

    pub async fn update_contact(
        &self,
        ctx: &ClinicContext,
        lead_id: Uuid,
        update: &ContactUpdate,
    ) -> Result<(), LeadError> {
        self.store.update_lead_contact(ctx, lead_id, update).await
    }

    pub async fn set_whatsapp_block(
        &self,
        ctx: &ClinicContext,
        lead_id: Uuid,
        request: &WhatsappBlockRequest,
        actor: Actor,
    ) -> Result<Lead, LeadError> {
        let reason = request
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        let update = WhatsappBlockUpdate {
            blocked: request.blocked,
            reason: reason.clone(),
            actor_id: actor.actor_id.clone(),
            at: Utc::now(),
        };
        let lead = self
            .store
            .update_whatsapp_block(ctx, lead_id, &update)
            .await?
            .ok_or(LeadError::NotFound)?;

        let action = if request.blocked { "whatsapp_blocked" } else { "whatsapp_unblocked" };
        let entry = AuditLogEntry {
            clinic_id: ctx.clinic_id,
            entity_type: "lead".to_string(),
            entity_id: lead_id,
            action: action.to_string(),
            actor_type: actor.actor_type,
            actor_id: actor.actor_id,
            meta: json!({ "reason": reason }),
        };
        if let Err(e) = self.store.insert_audit_log(ctx, &entry).await {
            warn!("Failed to write audit entry {} for lead {}: {}", action, lead_id, e);
        }

        Ok(lead)
    }

    pub async fn stage_history(
        &self,
        ctx: &ClinicContext,
        lead_id: Uuid,
    ) -> Result<Vec<LeadStageHistory>, LeadError> {
        self.store.list_stage_history(ctx, lead_id).await
    }
}
