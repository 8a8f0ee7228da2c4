// libs/lead-cell/src/store/supabase.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::{
    api_error, ignore_duplicates_headers, representation_headers, SupabaseClient,
};
use shared_models::context::ClinicContext;

use crate::models::{
    AppliedTransition, AuditLogEntry, Call, CallEnd, CallStart, ContactUpdate, CurrentCall, Lead,
    LeadConversion, LeadError, LeadStageHistory, NewLead, NextActionUpdate, PendingAction,
    StageCatalogEntry, StageTransitionCommand, TransitionError, TransitionMode, WhatsappBlockUpdate,
};
use crate::stages::LeadStage;
use crate::store::{LeadStore, StageTransitioner};

pub const TRANSITION_RPC: &str = "rpc_transition_lead_stage";

pub struct SupabaseLeadStore {
    supabase: Arc<SupabaseClient>,
}

/// One row returned by the transition procedure.
#[derive(Debug, Deserialize)]
struct TransitionRpcRow {
    ok: bool,
    error: Option<String>,
    history: Option<LeadStageHistory>,
}

impl SupabaseLeadStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn lead_filter(ctx: &ClinicContext, lead_id: Uuid) -> String {
        format!("id=eq.{}&clinic_id=eq.{}", lead_id, ctx.clinic_id)
    }

    async fn patch_lead(&self, ctx: &ClinicContext, lead_id: Uuid, body: Value) -> Result<Option<Lead>, LeadError> {
        let path = format!("/rest/v1/leads?{}", Self::lead_filter(ctx, lead_id));
        let rows: Vec<Lead> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, None, Some(body), Some(representation_headers(false)))
            .await?;
        Ok(rows.into_iter().next())
    }
}

fn classify_rpc_error(err: anyhow::Error) -> TransitionError {
    match api_error(&err) {
        Some(api) if api.is_serialization_failure() => TransitionError::SerializationConflict,
        // PGRST202: function missing from the schema cache
        Some(api) if api.status == 404 || api.status >= 500 || api.code.as_deref() == Some("PGRST202") => {
            TransitionError::Unavailable(api.message.clone())
        }
        Some(api) => TransitionError::Rejected(api.message.clone()),
        None => TransitionError::Unavailable(err.to_string()),
    }
}

#[async_trait]
impl LeadStore for SupabaseLeadStore {
    async fn fetch_stage_catalog(&self) -> Result<Vec<StageCatalogEntry>, LeadError> {
        let path = "/rest/v1/lead_stage_catalog?is_active=eq.true&order=pipeline_order.asc,order_index.asc";
        let rows: Vec<StageCatalogEntry> = self.supabase.request(Method::GET, path, None, None).await?;
        Ok(rows)
    }

    async fn get_lead(&self, ctx: &ClinicContext, lead_id: Uuid) -> Result<Option<Lead>, LeadError> {
        let path = format!("/rest/v1/leads?{}&limit=1", Self::lead_filter(ctx, lead_id));
        let rows: Vec<Lead> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows.into_iter().next())
    }

    async fn find_lead_by_phone(&self, ctx: &ClinicContext, phone: &str) -> Result<Option<Lead>, LeadError> {
        let path = format!(
            "/rest/v1/leads?clinic_id=eq.{}&phone=eq.{}&limit=1",
            ctx.clinic_id,
            urlencoding::encode(phone)
        );
        let rows: Vec<Lead> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_lead(&self, ctx: &ClinicContext, lead: &NewLead) -> Result<Lead, LeadError> {
        let stage = LeadStage::initial();
        let mut insert = json!({
            "clinic_id": ctx.clinic_id,
            "full_name": lead.full_name,
            "phone": lead.phone,
            "treatment": lead.treatment,
            "source": lead.source,
            "stage_key": stage.stage_key(),
            "status": stage.status(),
        });
        if let Some(id) = lead.id {
            insert["id"] = json!(id);
        }

        let (conflict_target, existing_filter) = match lead.id {
            Some(id) => ("id", format!("id=eq.{}&clinic_id=eq.{}", id, ctx.clinic_id)),
            None => (
                "clinic_id,phone",
                format!("clinic_id=eq.{}&phone=eq.{}", ctx.clinic_id, urlencoding::encode(&lead.phone)),
            ),
        };

        let path = format!("/rest/v1/leads?on_conflict={}", conflict_target);
        let inserted: Vec<Lead> = self
            .supabase
            .request_with_headers(Method::POST, &path, None, Some(insert), Some(ignore_duplicates_headers()))
            .await?;
        if let Some(row) = inserted.into_iter().next() {
            debug!("Inserted lead {}", row.id);
            return Ok(row);
        }

        // Existing lead: refresh identity fields only, stage untouched.
        let mut update = Map::new();
        update.insert("phone".to_string(), json!(lead.phone));
        update.insert("updated_at".to_string(), json!(Utc::now()));
        if let Some(name) = &lead.full_name {
            update.insert("full_name".to_string(), json!(name));
        }
        if let Some(treatment) = &lead.treatment {
            update.insert("treatment".to_string(), json!(treatment));
        }

        let path = format!("/rest/v1/leads?{}", existing_filter);
        let rows: Vec<Lead> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, None, Some(Value::Object(update)), Some(representation_headers(false)))
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| LeadError::Database("lead upsert returned no rows".to_string()))
    }

    async fn write_stage_without_history(
        &self,
        ctx: &ClinicContext,
        lead_id: Uuid,
        stage: &LeadStage,
    ) -> Result<bool, LeadError> {
        let body = json!({
            "stage_key": stage.stage_key(),
            "status": stage.status(),
            "updated_at": Utc::now(),
        });
        Ok(self.patch_lead(ctx, lead_id, body).await?.is_some())
    }

    async fn update_lead_conversion(
        &self,
        ctx: &ClinicContext,
        lead_id: Uuid,
        conversion: &LeadConversion,
    ) -> Result<Option<Lead>, LeadError> {
        let body = match conversion {
            LeadConversion::Converted { value_eur, service_name, converted_at } => json!({
                "converted_to_client": true,
                "converted_value_eur": value_eur,
                "converted_service_name": service_name,
                "converted_at": converted_at,
                "post_visit_outcome_reason": null,
                "updated_at": Utc::now(),
            }),
            LeadConversion::PostVisit { reason } => json!({
                "converted_to_client": false,
                "converted_value_eur": null,
                "converted_service_name": null,
                "converted_at": null,
                "post_visit_outcome_reason": reason,
                "updated_at": Utc::now(),
            }),
        };
        self.patch_lead(ctx, lead_id, body).await
    }

    async fn update_lead_contact(
        &self,
        ctx: &ClinicContext,
        lead_id: Uuid,
        update: &ContactUpdate,
    ) -> Result<(), LeadError> {
        let mut body = Map::new();
        if let Some(at) = update.last_contact_at {
            body.insert("last_contact_at".to_string(), json!(at));
        }
        match update.next_action {
            NextActionUpdate::Keep => {}
            NextActionUpdate::Clear => {
                body.insert("next_action_at".to_string(), Value::Null);
            }
            NextActionUpdate::Set(at) => {
                body.insert("next_action_at".to_string(), json!(at));
            }
        }
        if body.is_empty() {
            return Ok(());
        }

        let path = format!("/rest/v1/leads?{}", Self::lead_filter(ctx, lead_id));
        self.supabase
            .execute(Method::PATCH, &path, Some(Value::Object(body)), None)
            .await?;
        Ok(())
    }

    async fn update_whatsapp_block(
        &self,
        ctx: &ClinicContext,
        lead_id: Uuid,
        update: &WhatsappBlockUpdate,
    ) -> Result<Option<Lead>, LeadError> {
        let body = if update.blocked {
            json!({
                "whatsapp_blocked": true,
                "whatsapp_blocked_reason": update.reason,
                "whatsapp_blocked_at": update.at,
                "whatsapp_blocked_by_user_id": update.actor_id,
                "updated_at": update.at,
            })
        } else {
            json!({
                "whatsapp_blocked": false,
                "whatsapp_blocked_reason": null,
                "whatsapp_blocked_at": null,
                "whatsapp_blocked_by_user_id": null,
                "updated_at": update.at,
            })
        };
        self.patch_lead(ctx, lead_id, body).await
    }

    async fn count_lead_calls(
        &self,
        ctx: &ClinicContext,
        lead_id: Uuid,
        exclude_call_id: &str,
    ) -> Result<i64, LeadError> {
        let path = format!(
            "/rest/v1/calls?select=id&clinic_id=eq.{}&lead_id=eq.{}&retell_call_id=neq.{}",
            ctx.clinic_id,
            lead_id,
            urlencoding::encode(exclude_call_id)
        );
        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows.len() as i64)
    }

    async fn upsert_call_started(&self, ctx: &ClinicContext, call: &CallStart) -> Result<Call, LeadError> {
        let body = json!({
            "clinic_id": ctx.clinic_id,
            "lead_id": call.lead_id,
            "retell_call_id": call.retell_call_id,
            "attempt_no": call.attempt_no,
            "status": "in_progress",
            "started_at": call.started_at,
        });
        self.supabase
            .execute(
                Method::POST,
                "/rest/v1/calls?on_conflict=retell_call_id",
                Some(body),
                Some(ignore_duplicates_headers()),
            )
            .await?;

        let path = format!(
            "/rest/v1/calls?clinic_id=eq.{}&retell_call_id=eq.{}&limit=1",
            ctx.clinic_id,
            urlencoding::encode(&call.retell_call_id)
        );
        let rows: Vec<Call> = self.supabase.request(Method::GET, &path, None, None).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| LeadError::Database(format!("call {} not readable after upsert", call.retell_call_id)))
    }

    async fn finalize_call(&self, ctx: &ClinicContext, call: &CallEnd) -> Result<Option<Call>, LeadError> {
        let mut body = Map::new();
        body.insert("status".to_string(), json!("ended"));
        body.insert("ended_at".to_string(), json!(call.ended_at));
        let optional = [
            ("duration_sec", call.duration_sec.map(|v| json!(v))),
            ("outcome", call.outcome.as_ref().map(|v| json!(v))),
            ("transcript", call.transcript.as_ref().map(|v| json!(v))),
            ("summary", call.summary.as_ref().map(|v| json!(v))),
            ("extracted", call.extracted.clone()),
            ("recording_url", call.recording_url.as_ref().map(|v| json!(v))),
            ("call_cost_eur", call.call_cost_eur.map(|v| json!(v))),
        ];
        for (column, value) in optional {
            if let Some(value) = value {
                body.insert(column.to_string(), value);
            }
        }

        let path = format!(
            "/rest/v1/calls?clinic_id=eq.{}&retell_call_id=eq.{}",
            ctx.clinic_id,
            urlencoding::encode(&call.retell_call_id)
        );
        let rows: Vec<Call> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, None, Some(Value::Object(body)), Some(representation_headers(false)))
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn set_current_call(&self, ctx: &ClinicContext, call: Option<&CurrentCall>) -> Result<(), LeadError> {
        let body = json!({
            "clinic_id": ctx.clinic_id,
            "current_call_retell_id": call.map(|c| c.call_id.clone()),
            "current_call_lead_id": call.and_then(|c| c.lead_id),
            "current_call_started_at": call.map(|c| c.started_at),
            "updated_at": Utc::now(),
        });
        self.supabase
            .execute(
                Method::POST,
                "/rest/v1/system_state?on_conflict=clinic_id",
                Some(body),
                Some(representation_headers(true)),
            )
            .await?;
        Ok(())
    }

    async fn upsert_pending_action(&self, _ctx: &ClinicContext, action: &PendingAction) -> Result<bool, LeadError> {
        let body = serde_json::to_value(action).map_err(|e| LeadError::Database(e.to_string()))?;
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/pending_actions?on_conflict=idempotency_key",
                None,
                Some(body),
                Some(ignore_duplicates_headers()),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn insert_audit_log(&self, _ctx: &ClinicContext, entry: &AuditLogEntry) -> Result<(), LeadError> {
        let body = serde_json::to_value(entry).map_err(|e| LeadError::Database(e.to_string()))?;
        self.supabase
            .execute(Method::POST, "/rest/v1/audit_log", Some(body), None)
            .await?;
        Ok(())
    }

    async fn list_stage_history(&self, ctx: &ClinicContext, lead_id: Uuid) -> Result<Vec<LeadStageHistory>, LeadError> {
        let path = format!(
            "/rest/v1/lead_stage_history?clinic_id=eq.{}&lead_id=eq.{}&order=created_at.asc",
            ctx.clinic_id, lead_id
        );
        let rows: Vec<LeadStageHistory> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows)
    }
}

#[async_trait]
impl StageTransitioner for SupabaseLeadStore {
    async fn apply_transition(
        &self,
        ctx: &ClinicContext,
        command: &StageTransitionCommand,
    ) -> Result<AppliedTransition, TransitionError> {
        let params = json!({
            "p_clinic_id": ctx.clinic_id,
            "p_lead_id": command.lead_id,
            "p_to_stage_key": command.to_stage_key,
            "p_reason": command.reason,
            "p_actor_type": command.actor.actor_type.as_str(),
            "p_actor_id": command.actor.actor_id,
            "p_meta": command.meta,
        });

        let rows: Vec<TransitionRpcRow> = self
            .supabase
            .rpc(TRANSITION_RPC, params)
            .await
            .map_err(classify_rpc_error)?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| TransitionError::Rejected("transition procedure returned no rows".to_string()))?;

        if !row.ok {
            let reason = row.error.unwrap_or_else(|| "unknown error".to_string());
            warn!("Stage transition for lead {} rejected: {}", command.lead_id, reason);
            return Err(TransitionError::Rejected(reason));
        }

        Ok(AppliedTransition {
            lead_id: command.lead_id,
            from_stage_key: row.history.as_ref().and_then(|h| h.from_stage_key.clone()),
            stage: LeadStage::from_key(&command.to_stage_key),
            mode: TransitionMode::Atomic,
            history: row.history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use shared_database::supabase::SupabaseApiError;

    fn api(status: u16, code: Option<&str>) -> anyhow::Error {
        anyhow!(SupabaseApiError {
            status,
            code: code.map(str::to_string),
            message: "boom".to_string(),
        })
    }

    #[test]
    fn rpc_errors_are_classified() {
        assert_eq!(classify_rpc_error(api(500, Some("40001"))), TransitionError::SerializationConflict);
        assert_eq!(classify_rpc_error(api(404, Some("PGRST202"))), TransitionError::Unavailable("boom".to_string()));
        assert_eq!(classify_rpc_error(api(400, Some("P0001"))), TransitionError::Rejected("boom".to_string()));
        assert!(matches!(classify_rpc_error(anyhow!("connection refused")), TransitionError::Unavailable(_)));
    }
}
