// libs/lead-cell/src/store/mod.rs
//
// Persistence ports for the lead engine. Every call is scoped by the
// clinic in `ClinicContext`.

use async_trait::async_trait;
use uuid::Uuid;

use shared_models::context::ClinicContext;

use crate::models::{
    AppliedTransition, AuditLogEntry, Call, CallEnd, CallStart, ContactUpdate, CurrentCall, Lead,
    LeadConversion, LeadError, LeadStageHistory, NewLead, PendingAction, StageCatalogEntry,
    StageTransitionCommand, TransitionError, WhatsappBlockUpdate,
};
use crate::stages::LeadStage;

pub mod memory;
pub mod supabase;

pub use memory::InMemoryLeadStore;
pub use supabase::SupabaseLeadStore;

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn fetch_stage_catalog(&self) -> Result<Vec<StageCatalogEntry>, LeadError>;

    async fn get_lead(&self, ctx: &ClinicContext, lead_id: Uuid) -> Result<Option<Lead>, LeadError>;

    async fn find_lead_by_phone(&self, ctx: &ClinicContext, phone: &str) -> Result<Option<Lead>, LeadError>;

    /// Insert keyed on `id` when given, else on `(clinic_id, phone)`. New rows
    /// start at the initial stage; existing rows only get identity fields
    /// refreshed and keep their stage.
    async fn upsert_lead(&self, ctx: &ClinicContext, lead: &NewLead) -> Result<Lead, LeadError>;

    /// Degraded path: writes `stage_key` and its derived `status` with no
    /// history row. Returns false when no lead matched.
    async fn write_stage_without_history(
        &self,
        ctx: &ClinicContext,
        lead_id: Uuid,
        stage: &LeadStage,
    ) -> Result<bool, LeadError>;

    async fn update_lead_conversion(
        &self,
        ctx: &ClinicContext,
        lead_id: Uuid,
        conversion: &LeadConversion,
    ) -> Result<Option<Lead>, LeadError>;

    async fn update_lead_contact(
        &self,
        ctx: &ClinicContext,
        lead_id: Uuid,
        update: &ContactUpdate,
    ) -> Result<(), LeadError>;

    async fn update_whatsapp_block(
        &self,
        ctx: &ClinicContext,
        lead_id: Uuid,
        update: &WhatsappBlockUpdate,
    ) -> Result<Option<Lead>, LeadError>;

    async fn count_lead_calls(
        &self,
        ctx: &ClinicContext,
        lead_id: Uuid,
        exclude_call_id: &str,
    ) -> Result<i64, LeadError>;

    /// Idempotent on the external call id: a duplicate start returns the
    /// row already stored.
    async fn upsert_call_started(&self, ctx: &ClinicContext, call: &CallStart) -> Result<Call, LeadError>;

    async fn finalize_call(&self, ctx: &ClinicContext, call: &CallEnd) -> Result<Option<Call>, LeadError>;

    async fn set_current_call(&self, ctx: &ClinicContext, call: Option<&CurrentCall>) -> Result<(), LeadError>;

    /// Returns false when a row with the same idempotency key already exists.
    async fn upsert_pending_action(&self, ctx: &ClinicContext, action: &PendingAction) -> Result<bool, LeadError>;

    async fn insert_audit_log(&self, ctx: &ClinicContext, entry: &AuditLogEntry) -> Result<(), LeadError>;

    async fn list_stage_history(&self, ctx: &ClinicContext, lead_id: Uuid) -> Result<Vec<LeadStageHistory>, LeadError>;
}

/// The single atomic write: read the current stage, append the history row
/// and update the lead, all or nothing.
#[async_trait]
pub trait StageTransitioner: Send + Sync {
    async fn apply_transition(
        &self,
        ctx: &ClinicContext,
        command: &StageTransitionCommand,
    ) -> Result<AppliedTransition, TransitionError>;
}
