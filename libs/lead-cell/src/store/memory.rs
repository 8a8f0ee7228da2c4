// libs/lead-cell/src/store/memory.rs
//
// Process-local store used by tests and local runs without Supabase. A
// transition happens under one write guard, so history and the lead row
// always move together.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use shared_models::context::ClinicContext;

use crate::models::{
    AppliedTransition, AuditLogEntry, Call, CallEnd, CallStart, CallStatus, ContactUpdate,
    CurrentCall, Lead, LeadConversion, LeadError, LeadStageHistory, NewLead, NextActionUpdate,
    PendingAction, StageCatalogEntry, StageTransitionCommand, TransitionError, TransitionMode,
    WhatsappBlockUpdate,
};
use crate::services::catalog::builtin_catalog_entries;
use crate::stages::LeadStage;
use crate::store::{LeadStore, StageTransitioner};

#[derive(Default)]
struct Tables {
    leads: HashMap<Uuid, Lead>,
    history: Vec<LeadStageHistory>,
    calls: HashMap<String, Call>,
    pending_actions: HashMap<String, PendingAction>,
    audit_log: Vec<AuditLogEntry>,
    current_calls: HashMap<Uuid, CurrentCall>,
}

pub struct InMemoryLeadStore {
    catalog: Vec<StageCatalogEntry>,
    tables: RwLock<Tables>,
    catalog_available: AtomicBool,
    transitions_available: AtomicBool,
    serialization_conflicts: AtomicU32,
}

impl Default for InMemoryLeadStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self {
            catalog: builtin_catalog_entries(),
            tables: RwLock::new(Tables::default()),
            catalog_available: AtomicBool::new(true),
            transitions_available: AtomicBool::new(true),
            serialization_conflicts: AtomicU32::new(0),
        }
    }

    /// Simulate the catalog table being unreachable.
    pub fn set_catalog_available(&self, available: bool) {
        self.catalog_available.store(available, Ordering::SeqCst);
    }

    /// Simulate the atomic transition procedure being missing.
    pub fn set_transitions_available(&self, available: bool) {
        self.transitions_available.store(available, Ordering::SeqCst);
    }

    /// The next `count` transitions fail with a serialization conflict.
    pub fn inject_serialization_conflicts(&self, count: u32) {
        self.serialization_conflicts.store(count, Ordering::SeqCst);
    }

    pub async fn lead(&self, lead_id: Uuid) -> Option<Lead> {
        self.tables.read().await.leads.get(&lead_id).cloned()
    }

    pub async fn history_for(&self, lead_id: Uuid) -> Vec<LeadStageHistory> {
        self.tables
            .read()
            .await
            .history
            .iter()
            .filter(|h| h.lead_id == lead_id)
            .cloned()
            .collect()
    }

    pub async fn pending_actions(&self) -> Vec<PendingAction> {
        self.tables.read().await.pending_actions.values().cloned().collect()
    }

    pub async fn audit_log(&self) -> Vec<AuditLogEntry> {
        self.tables.read().await.audit_log.clone()
    }

    pub async fn call(&self, retell_call_id: &str) -> Option<Call> {
        self.tables.read().await.calls.get(retell_call_id).cloned()
    }

    pub async fn current_call(&self, clinic_id: Uuid) -> Option<CurrentCall> {
        self.tables.read().await.current_calls.get(&clinic_id).cloned()
    }

    fn is_cataloged(&self, stage_key: &str) -> bool {
        self.catalog.iter().any(|s| s.is_active && s.stage_key == stage_key)
    }

    fn take_serialization_conflict(&self) -> bool {
        self.serialization_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn lead_in_clinic<'a>(tables: &'a mut Tables, ctx: &ClinicContext, lead_id: Uuid) -> Option<&'a mut Lead> {
    tables
        .leads
        .get_mut(&lead_id)
        .filter(|lead| lead.clinic_id == ctx.clinic_id)
}

fn new_lead_row(ctx: &ClinicContext, lead: &NewLead) -> Lead {
    let now = Utc::now();
    let stage = LeadStage::initial();
    Lead {
        id: lead.id.unwrap_or_else(Uuid::new_v4),
        clinic_id: ctx.clinic_id,
        full_name: lead.full_name.clone(),
        phone: Some(lead.phone.clone()),
        treatment: lead.treatment.clone(),
        source: Some(lead.source.clone()),
        status: stage.status(),
        stage_key: Some(stage.stage_key().to_string()),
        converted_to_client: false,
        converted_value_eur: None,
        converted_service_name: None,
        converted_at: None,
        post_visit_outcome_reason: None,
        whatsapp_blocked: false,
        whatsapp_blocked_reason: None,
        whatsapp_blocked_at: None,
        whatsapp_blocked_by_user_id: None,
        last_contact_at: None,
        next_action_at: None,
        created_at: Some(now),
        updated_at: Some(now),
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn fetch_stage_catalog(&self) -> Result<Vec<StageCatalogEntry>, LeadError> {
        if !self.catalog_available.load(Ordering::SeqCst) {
            return Err(LeadError::Database("lead_stage_catalog unreachable".to_string()));
        }
        Ok(self.catalog.clone())
    }

    async fn get_lead(&self, ctx: &ClinicContext, lead_id: Uuid) -> Result<Option<Lead>, LeadError> {
        let tables = self.tables.read().await;
        Ok(tables
            .leads
            .get(&lead_id)
            .filter(|lead| lead.clinic_id == ctx.clinic_id)
            .cloned())
    }

    async fn find_lead_by_phone(&self, ctx: &ClinicContext, phone: &str) -> Result<Option<Lead>, LeadError> {
        let tables = self.tables.read().await;
        Ok(tables
            .leads
            .values()
            .find(|lead| lead.clinic_id == ctx.clinic_id && lead.phone.as_deref() == Some(phone))
            .cloned())
    }

    async fn upsert_lead(&self, ctx: &ClinicContext, lead: &NewLead) -> Result<Lead, LeadError> {
        let mut tables = self.tables.write().await;

        let existing_id = match lead.id {
            Some(id) => tables.leads.contains_key(&id).then_some(id),
            None => tables
                .leads
                .values()
                .find(|l| l.clinic_id == ctx.clinic_id && l.phone.as_deref() == Some(lead.phone.as_str()))
                .map(|l| l.id),
        };

        match existing_id {
            Some(id) => {
                let row = lead_in_clinic(&mut tables, ctx, id)
                    .ok_or_else(|| LeadError::Validation("Lead belongs to another clinic".to_string()))?;
                if lead.full_name.is_some() {
                    row.full_name = lead.full_name.clone();
                }
                if lead.treatment.is_some() {
                    row.treatment = lead.treatment.clone();
                }
                row.phone = Some(lead.phone.clone());
                row.updated_at = Some(Utc::now());
                Ok(row.clone())
            }
            None => {
                let row = new_lead_row(ctx, lead);
                tables.leads.insert(row.id, row.clone());
                Ok(row)
            }
        }
    }

    async fn write_stage_without_history(
        &self,
        ctx: &ClinicContext,
        lead_id: Uuid,
        stage: &LeadStage,
    ) -> Result<bool, LeadError> {
        let mut tables = self.tables.write().await;
        match lead_in_clinic(&mut tables, ctx, lead_id) {
            Some(lead) => {
                lead.stage_key = Some(stage.stage_key().to_string());
                lead.status = stage.status();
                lead.updated_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_lead_conversion(
        &self,
        ctx: &ClinicContext,
        lead_id: Uuid,
        conversion: &LeadConversion,
    ) -> Result<Option<Lead>, LeadError> {
        let mut tables = self.tables.write().await;
        let Some(lead) = lead_in_clinic(&mut tables, ctx, lead_id) else {
            return Ok(None);
        };

        match conversion {
            LeadConversion::Converted { value_eur, service_name, converted_at } => {
                lead.converted_to_client = true;
                lead.converted_value_eur = Some(*value_eur);
                lead.converted_service_name = Some(service_name.clone());
                lead.converted_at = Some(*converted_at);
                lead.post_visit_outcome_reason = None;
            }
            LeadConversion::PostVisit { reason } => {
                lead.converted_to_client = false;
                lead.converted_value_eur = None;
                lead.converted_service_name = None;
                lead.converted_at = None;
                lead.post_visit_outcome_reason = Some(reason.clone());
            }
        }
        lead.updated_at = Some(Utc::now());
        Ok(Some(lead.clone()))
    }

    async fn update_lead_contact(
        &self,
        ctx: &ClinicContext,
        lead_id: Uuid,
        update: &ContactUpdate,
    ) -> Result<(), LeadError> {
        let mut tables = self.tables.write().await;
        if let Some(lead) = lead_in_clinic(&mut tables, ctx, lead_id) {
            if let Some(at) = update.last_contact_at {
                lead.last_contact_at = Some(at);
            }
            match update.next_action {
                NextActionUpdate::Keep => {}
                NextActionUpdate::Clear => lead.next_action_at = None,
                NextActionUpdate::Set(at) => lead.next_action_at = Some(at),
            }
        }
        Ok(())
    }

    async fn update_whatsapp_block(
        &self,
        ctx: &ClinicContext,
        lead_id: Uuid,
        update: &WhatsappBlockUpdate,
    ) -> Result<Option<Lead>, LeadError> {
        let mut tables = self.tables.write().await;
        let Some(lead) = lead_in_clinic(&mut tables, ctx, lead_id) else {
            return Ok(None);
        };

        lead.whatsapp_blocked = update.blocked;
        if update.blocked {
            lead.whatsapp_blocked_reason = update.reason.clone();
            lead.whatsapp_blocked_at = Some(update.at);
            lead.whatsapp_blocked_by_user_id = update.actor_id.clone();
        } else {
            lead.whatsapp_blocked_reason = None;
            lead.whatsapp_blocked_at = None;
            lead.whatsapp_blocked_by_user_id = None;
        }
        lead.updated_at = Some(update.at);
        Ok(Some(lead.clone()))
    }

    async fn count_lead_calls(
        &self,
        ctx: &ClinicContext,
        lead_id: Uuid,
        exclude_call_id: &str,
    ) -> Result<i64, LeadError> {
        let tables = self.tables.read().await;
        let count = tables
            .calls
            .values()
            .filter(|c| c.clinic_id == ctx.clinic_id && c.lead_id == Some(lead_id))
            .filter(|c| c.retell_call_id != exclude_call_id)
            .count();
        Ok(count as i64)
    }

    async fn upsert_call_started(&self, ctx: &ClinicContext, call: &CallStart) -> Result<Call, LeadError> {
        let mut tables = self.tables.write().await;
        let row = tables
            .calls
            .entry(call.retell_call_id.clone())
            .or_insert_with(|| Call {
                id: Uuid::new_v4(),
                clinic_id: ctx.clinic_id,
                lead_id: call.lead_id,
                retell_call_id: call.retell_call_id.clone(),
                attempt_no: Some(call.attempt_no),
                status: CallStatus::InProgress,
                started_at: Some(call.started_at),
                ended_at: None,
                duration_sec: None,
                outcome: None,
                transcript: None,
                summary: None,
                extracted: None,
                recording_url: None,
                call_cost_eur: None,
                created_at: Some(Utc::now()),
            });
        Ok(row.clone())
    }

    async fn finalize_call(&self, ctx: &ClinicContext, call: &CallEnd) -> Result<Option<Call>, LeadError> {
        let mut tables = self.tables.write().await;
        let Some(row) = tables
            .calls
            .get_mut(&call.retell_call_id)
            .filter(|c| c.clinic_id == ctx.clinic_id)
        else {
            return Ok(None);
        };

        row.status = CallStatus::Ended;
        row.ended_at = Some(call.ended_at);
        row.duration_sec = call.duration_sec.or(row.duration_sec);
        row.outcome = call.outcome.clone().or(row.outcome.take());
        row.transcript = call.transcript.clone().or(row.transcript.take());
        row.summary = call.summary.clone().or(row.summary.take());
        row.extracted = call.extracted.clone().or(row.extracted.take());
        row.recording_url = call.recording_url.clone().or(row.recording_url.take());
        row.call_cost_eur = call.call_cost_eur.or(row.call_cost_eur);
        Ok(Some(row.clone()))
    }

    async fn set_current_call(&self, ctx: &ClinicContext, call: Option<&CurrentCall>) -> Result<(), LeadError> {
        let mut tables = self.tables.write().await;
        match call {
            Some(call) => {
                tables.current_calls.insert(ctx.clinic_id, call.clone());
            }
            None => {
                tables.current_calls.remove(&ctx.clinic_id);
            }
        }
        Ok(())
    }

    async fn upsert_pending_action(&self, _ctx: &ClinicContext, action: &PendingAction) -> Result<bool, LeadError> {
        let mut tables = self.tables.write().await;
        if tables.pending_actions.contains_key(&action.idempotency_key) {
            return Ok(false);
        }
        tables
            .pending_actions
            .insert(action.idempotency_key.clone(), action.clone());
        Ok(true)
    }

    async fn insert_audit_log(&self, _ctx: &ClinicContext, entry: &AuditLogEntry) -> Result<(), LeadError> {
        self.tables.write().await.audit_log.push(entry.clone());
        Ok(())
    }

    async fn list_stage_history(&self, ctx: &ClinicContext, lead_id: Uuid) -> Result<Vec<LeadStageHistory>, LeadError> {
        let tables = self.tables.read().await;
        Ok(tables
            .history
            .iter()
            .filter(|h| h.clinic_id == ctx.clinic_id && h.lead_id == lead_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StageTransitioner for InMemoryLeadStore {
    async fn apply_transition(
        &self,
        ctx: &ClinicContext,
        command: &StageTransitionCommand,
    ) -> Result<AppliedTransition, TransitionError> {
        if !self.transitions_available.load(Ordering::SeqCst) {
            return Err(TransitionError::Unavailable("rpc_transition_lead_stage not found".to_string()));
        }
        if self.take_serialization_conflict() {
            return Err(TransitionError::SerializationConflict);
        }
        if !self.is_cataloged(&command.to_stage_key) {
            return Err(TransitionError::Rejected(format!("unknown stage_key: {}", command.to_stage_key)));
        }

        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let stage = LeadStage::from_key(&command.to_stage_key);

        let lead = lead_in_clinic(&mut tables, ctx, command.lead_id)
            .ok_or_else(|| TransitionError::Rejected("lead not found".to_string()))?;
        let from_stage_key = lead.stage_key.clone();
        lead.stage_key = Some(stage.stage_key().to_string());
        lead.status = stage.status();
        lead.updated_at = Some(now);

        let history = LeadStageHistory {
            id: Uuid::new_v4(),
            clinic_id: ctx.clinic_id,
            lead_id: command.lead_id,
            from_stage_key: from_stage_key.clone(),
            to_stage_key: stage.stage_key().to_string(),
            reason: command.reason.clone(),
            actor_type: command.actor.actor_type.clone(),
            actor_id: command.actor.actor_id.clone(),
            meta: command.meta.clone(),
            created_at: now,
        };
        tables.history.push(history.clone());

        Ok(AppliedTransition {
            lead_id: command.lead_id,
            from_stage_key,
            stage,
            mode: TransitionMode::Atomic,
            history: Some(history),
        })
    }
}
