// libs/lead-cell/src/stages.rs
//
// Stage keys, the built-in stage catalog and the stage -> legacy status table.

use serde::Serialize;

use crate::models::LeadStatus;

// ==============================================================================
// PIPELINES
// ==============================================================================

pub const PIPELINE_CALLS_AI: &str = "calls_ai";
pub const PIPELINE_WHATSAPP_AI: &str = "whatsapp_ai";
pub const PIPELINE_CLOSED: &str = "closed";

// ==============================================================================
// STAGE KEYS
// ==============================================================================

pub const NEW_LEAD: &str = "new_lead";
pub const FIRST_CALL_IN_PROGRESS: &str = "first_call_in_progress";
pub const NO_ANSWER_FIRST_CALL: &str = "no_answer_first_call";
pub const SECOND_CALL_SCHEDULED: &str = "second_call_scheduled";
pub const SECOND_CALL_IN_PROGRESS: &str = "second_call_in_progress";
pub const NO_ANSWER_SECOND_CALL: &str = "no_answer_second_call";
pub const CONTACTING_WHATSAPP: &str = "contacting_whatsapp";
pub const WHATSAPP_CONVERSATION_ACTIVE: &str = "whatsapp_conversation_active";
pub const WHATSAPP_FOLLOWUP_PENDING: &str = "whatsapp_followup_pending";
pub const WHATSAPP_FAILED_TEAM_REVIEW: &str = "whatsapp_failed_team_review";
pub const VISIT_SCHEDULED: &str = "visit_scheduled";
pub const POST_VISIT_PENDING_DECISION: &str = "post_visit_pending_decision";
pub const POST_VISIT_FOLLOW_UP: &str = "post_visit_follow_up";
pub const POST_VISIT_NOT_CLOSED: &str = "post_visit_not_closed";
pub const CLIENT_CLOSED: &str = "client_closed";
pub const NOT_INTERESTED: &str = "not_interested";
pub const DISCARDED: &str = "discarded";

/// Non-closed outcomes staff can record after a visit.
pub const POST_VISIT_OUTCOME_STAGES: [&str; 3] = [
    POST_VISIT_PENDING_DECISION,
    POST_VISIT_FOLLOW_UP,
    POST_VISIT_NOT_CLOSED,
];

/// Compile-time copy of the stage catalog. Only read when the catalog table
/// cannot be fetched (degraded mode).
#[derive(Debug, Clone, Copy)]
pub struct StageDefinition {
    pub stage_key: &'static str,
    pub pipeline_key: &'static str,
    pub label: &'static str,
    pub order_index: i32,
    pub is_terminal: bool,
    pub legacy_status: LeadStatus,
}

const fn stage(
    stage_key: &'static str,
    pipeline_key: &'static str,
    label: &'static str,
    order_index: i32,
    is_terminal: bool,
    legacy_status: LeadStatus,
) -> StageDefinition {
    StageDefinition { stage_key, pipeline_key, label, order_index, is_terminal, legacy_status }
}

pub const BUILTIN_STAGE_CATALOG: [StageDefinition; 17] = [
    stage(NEW_LEAD, PIPELINE_CALLS_AI, "New lead", 10, false, LeadStatus::New),
    stage(FIRST_CALL_IN_PROGRESS, PIPELINE_CALLS_AI, "First call in progress", 20, false, LeadStatus::CallDone),
    stage(NO_ANSWER_FIRST_CALL, PIPELINE_CALLS_AI, "No answer on first call", 30, false, LeadStatus::NoResponse),
    stage(SECOND_CALL_SCHEDULED, PIPELINE_CALLS_AI, "Second call scheduled", 40, false, LeadStatus::NoResponse),
    stage(SECOND_CALL_IN_PROGRESS, PIPELINE_CALLS_AI, "Second call in progress", 50, false, LeadStatus::NoResponse),
    stage(NO_ANSWER_SECOND_CALL, PIPELINE_CALLS_AI, "No answer on second call", 60, false, LeadStatus::NoResponse),
    stage(CONTACTING_WHATSAPP, PIPELINE_WHATSAPP_AI, "Contacting on WhatsApp", 10, false, LeadStatus::WhatsappSent),
    stage(WHATSAPP_CONVERSATION_ACTIVE, PIPELINE_WHATSAPP_AI, "WhatsApp conversation active", 20, false, LeadStatus::Contacted),
    stage(WHATSAPP_FOLLOWUP_PENDING, PIPELINE_WHATSAPP_AI, "WhatsApp follow-up pending", 30, false, LeadStatus::WhatsappSent),
    stage(WHATSAPP_FAILED_TEAM_REVIEW, PIPELINE_WHATSAPP_AI, "Team review", 40, false, LeadStatus::NoResponse),
    stage(VISIT_SCHEDULED, PIPELINE_CLOSED, "Visit scheduled", 10, false, LeadStatus::VisitScheduled),
    stage(POST_VISIT_PENDING_DECISION, PIPELINE_CLOSED, "Post-visit: pending decision", 20, false, LeadStatus::Contacted),
    stage(POST_VISIT_FOLLOW_UP, PIPELINE_CLOSED, "Post-visit: follow-up", 30, false, LeadStatus::Contacted),
    stage(POST_VISIT_NOT_CLOSED, PIPELINE_CLOSED, "Post-visit: not closed", 40, true, LeadStatus::NotInterested),
    stage(CLIENT_CLOSED, PIPELINE_CLOSED, "Client closed", 50, true, LeadStatus::VisitScheduled),
    stage(NOT_INTERESTED, PIPELINE_CLOSED, "Not interested", 60, true, LeadStatus::NotInterested),
    stage(DISCARDED, PIPELINE_CLOSED, "Discarded", 70, true, LeadStatus::NotInterested),
];

pub fn builtin_stage(stage_key: &str) -> Option<&'static StageDefinition> {
    BUILTIN_STAGE_CATALOG.iter().find(|s| s.stage_key == stage_key)
}

pub fn pipeline_order(pipeline_key: &str) -> i32 {
    match pipeline_key {
        PIPELINE_CALLS_AI => 1,
        PIPELINE_WHATSAPP_AI => 2,
        PIPELINE_CLOSED => 3,
        _ => 99,
    }
}

pub fn pipeline_label(pipeline_key: &str) -> &'static str {
    match pipeline_key {
        PIPELINE_CALLS_AI => "Call agents",
        PIPELINE_WHATSAPP_AI => "WhatsApp agents",
        PIPELINE_CLOSED => "Closed",
        _ => "Other",
    }
}

/// Legacy status for a cataloged stage key.
pub fn legacy_status_for_stage(stage_key: &str) -> Option<LeadStatus> {
    builtin_stage(stage_key).map(|s| s.legacy_status)
}

/// The `(stage_key, status)` pair written to a lead. The status is never
/// chosen independently: it is always derived from the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeadStage {
    stage_key: String,
    status: LeadStatus,
}

impl LeadStage {
    /// Unknown keys map to `call_done`, the same default the legacy
    /// status column used.
    pub fn from_key(stage_key: &str) -> Self {
        Self {
            stage_key: stage_key.to_string(),
            status: legacy_status_for_stage(stage_key).unwrap_or(LeadStatus::CallDone),
        }
    }

    pub fn initial() -> Self {
        Self::from_key(NEW_LEAD)
    }

    pub fn stage_key(&self) -> &str {
        &self.stage_key
    }

    pub fn status(&self) -> LeadStatus {
        self.status
    }
}
