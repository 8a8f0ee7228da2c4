// libs/lead-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use shared_models::context::{Actor, ActorType};
use shared_models::error::AppError;

use crate::stages::LeadStage;

// ==============================================================================
// LEAD MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub treatment: Option<String>,
    pub source: Option<String>,
    pub status: LeadStatus,
    pub stage_key: Option<String>,
    #[serde(default)]
    pub converted_to_client: bool,
    #[serde(default, deserialize_with = "numeric_or_string")]
    pub converted_value_eur: Option<f64>,
    pub converted_service_name: Option<String>,
    pub converted_at: Option<DateTime<Utc>>,
    pub post_visit_outcome_reason: Option<String>,
    #[serde(default)]
    pub whatsapp_blocked: bool,
    pub whatsapp_blocked_reason: Option<String>,
    pub whatsapp_blocked_at: Option<DateTime<Utc>>,
    pub whatsapp_blocked_by_user_id: Option<String>,
    pub last_contact_at: Option<DateTime<Utc>>,
    pub next_action_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

// Postgres numeric columns come back as strings through PostgREST.
fn numeric_or_string<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a number, got {}",
            other
        ))),
    }
}

/// Coarse status kept for older consumers. Always derived from the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    CallDone,
    NoResponse,
    WhatsappSent,
    Contacted,
    VisitScheduled,
    NotInterested,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::CallDone => "call_done",
            LeadStatus::NoResponse => "no_response",
            LeadStatus::WhatsappSent => "whatsapp_sent",
            LeadStatus::Contacted => "contacted",
            LeadStatus::VisitScheduled => "visit_scheduled",
            LeadStatus::NotInterested => "not_interested",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==============================================================================
// CALL MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Contacted,
    NoResponse,
    NotInterested,
    AppointmentProposed,
    AppointmentScheduled,
}

impl CallOutcome {
    /// Lenient parse of the voice agent's outcome label. Anything
    /// unrecognised is treated as "no outcome".
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "contacted" => Some(CallOutcome::Contacted),
            "no_response" => Some(CallOutcome::NoResponse),
            "not_interested" => Some(CallOutcome::NotInterested),
            "appointment_proposed" => Some(CallOutcome::AppointmentProposed),
            "appointment_scheduled" => Some(CallOutcome::AppointmentScheduled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Contacted => "contacted",
            CallOutcome::NoResponse => "no_response",
            CallOutcome::NotInterested => "not_interested",
            CallOutcome::AppointmentProposed => "appointment_proposed",
            CallOutcome::AppointmentScheduled => "appointment_scheduled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    InProgress,
    Ended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub retell_call_id: String,
    pub attempt_no: Option<i32>,
    pub status: CallStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_sec: Option<i64>,
    pub outcome: Option<String>,
    pub transcript: Option<String>,
    pub summary: Option<String>,
    pub extracted: Option<Value>,
    pub recording_url: Option<String>,
    #[serde(default, deserialize_with = "numeric_or_string")]
    pub call_cost_eur: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
}

/// The call the voice agent is on right now, mirrored in `system_state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentCall {
    pub call_id: String,
    pub lead_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
}

// ==============================================================================
// STAGE CATALOG & HISTORY
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCatalogEntry {
    pub stage_key: String,
    pub pipeline_key: String,
    #[serde(rename = "pipeline_label_es")]
    pub pipeline_label: String,
    #[serde(rename = "label_es")]
    pub label: String,
    #[serde(rename = "description_es", default)]
    pub description: Option<String>,
    pub pipeline_order: i32,
    pub order_index: i32,
    #[serde(default)]
    pub is_terminal: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadStageHistory {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub lead_id: Uuid,
    pub from_stage_key: Option<String>,
    pub to_stage_key: String,
    pub reason: Option<String>,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    #[serde(default)]
    pub meta: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StageTransitionCommand {
    pub lead_id: Uuid,
    pub to_stage_key: String,
    pub reason: Option<String>,
    pub actor: Actor,
    pub meta: Value,
}

impl StageTransitionCommand {
    pub fn new(lead_id: Uuid, to_stage_key: &str, actor: Actor) -> Self {
        Self {
            lead_id,
            to_stage_key: to_stage_key.to_string(),
            reason: None,
            actor,
            meta: Value::Object(Default::default()),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionMode {
    Atomic,
    /// Stage written straight to the lead row; no history recorded.
    LegacyFallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedTransition {
    pub lead_id: Uuid,
    pub from_stage_key: Option<String>,
    #[serde(flatten)]
    pub stage: LeadStage,
    pub mode: TransitionMode,
    pub history: Option<LeadStageHistory>,
}

// ==============================================================================
// SIDE TABLES
// ==============================================================================

pub const RETRY_CALL_ACTION: &str = "retry_call";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAction {
    pub clinic_id: Uuid,
    pub lead_id: Uuid,
    pub action_type: String,
    pub due_at: DateTime<Utc>,
    pub status: String,
    pub idempotency_key: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub clinic_id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub action: String,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    #[serde(default)]
    pub meta: Value,
}

// ==============================================================================
// STORE WRITE MODELS
// ==============================================================================

#[derive(Debug, Clone)]
pub struct NewLead {
    pub id: Option<Uuid>,
    pub full_name: Option<String>,
    pub phone: String,
    pub treatment: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeadConversion {
    Converted {
        value_eur: f64,
        service_name: String,
        converted_at: DateTime<Utc>,
    },
    PostVisit {
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum NextActionUpdate {
    #[default]
    Keep,
    Clear,
    Set(DateTime<Utc>),
}

#[derive(Debug, Clone, Default)]
pub struct ContactUpdate {
    pub last_contact_at: Option<DateTime<Utc>>,
    pub next_action: NextActionUpdate,
}

#[derive(Debug, Clone)]
pub struct WhatsappBlockUpdate {
    pub blocked: bool,
    pub reason: Option<String>,
    pub actor_id: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CallStart {
    pub retell_call_id: String,
    pub lead_id: Option<Uuid>,
    pub attempt_no: i32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CallEnd {
    pub retell_call_id: String,
    pub ended_at: DateTime<Utc>,
    pub duration_sec: Option<i64>,
    pub outcome: Option<String>,
    pub transcript: Option<String>,
    pub summary: Option<String>,
    pub extracted: Option<Value>,
    pub recording_url: Option<String>,
    pub call_cost_eur: Option<f64>,
}

// ==============================================================================
// REQUEST / WEBHOOK PAYLOADS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct TransitionLeadStageRequest {
    pub to_stage_key: String,
    pub reason: Option<String>,
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeadOutcomeRequest {
    pub to_stage_key: String,
    pub source: Option<String>,
    pub converted_value_eur: Option<f64>,
    pub converted_service_name: Option<String>,
    pub outcome_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhatsappBlockRequest {
    pub blocked: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeadCreatedPayload {
    pub clinic_id: Option<Uuid>,
    pub lead_id: Option<Uuid>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub treatment: Option<String>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallStartedPayload {
    pub clinic_id: Option<Uuid>,
    pub call_id: Option<String>,
    pub lead_id: Option<Uuid>,
    pub phone: Option<String>,
    pub attempt_no: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallEndedPayload {
    pub clinic_id: Option<Uuid>,
    pub call_id: Option<String>,
    pub lead_id: Option<Uuid>,
    pub outcome: Option<String>,
    pub duration: Option<i64>,
    pub duration_sec: Option<i64>,
    pub transcript: Option<String>,
    pub summary: Option<String>,
    pub extracted_fields: Option<Value>,
    pub recording_url: Option<String>,
    pub call_cost_eur: Option<f64>,
    pub attempt_no: Option<i32>,
    pub ended_at: Option<DateTime<Utc>>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Error, Debug)]
pub enum LeadError {
    #[error("Lead not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error("Stage transition failed: {0}")]
    TransitionFailed(String),

    #[error("Database error: {0}")]
    Database(String),
}

/// Failure reported by the atomic stage-transition port.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    #[error("transition rejected: {0}")]
    Rejected(String),

    #[error("serialization conflict")]
    SerializationConflict,

    #[error("transition procedure unavailable: {0}")]
    Unavailable(String),
}

impl From<anyhow::Error> for LeadError {
    fn from(err: anyhow::Error) -> Self {
        LeadError::Database(err.to_string())
    }
}

impl From<LeadError> for AppError {
    fn from(err: LeadError) -> Self {
        match err {
            LeadError::NotFound => AppError::NotFound("Lead not found".to_string()),
            LeadError::Validation(msg) => AppError::ValidationError(msg),
            LeadError::TransitionFailed(msg) => AppError::Internal(format!("Stage transition failed: {}", msg)),
            LeadError::Database(msg) => AppError::Database(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lead_reads_numeric_value_sent_as_string() {
        let mut row = json!({
            "id": Uuid::new_v4(),
            "clinic_id": Uuid::new_v4(),
            "full_name": "Lucia",
            "phone": "+34612345678",
            "treatment": null,
            "source": "meta",
            "status": "visit_scheduled",
            "stage_key": "client_closed",
            "converted_to_client": true,
            "converted_value_eur": "1250.50",
            "converted_service_name": "Implante",
            "converted_at": null,
            "post_visit_outcome_reason": null,
            "whatsapp_blocked_reason": null,
            "whatsapp_blocked_at": null,
            "whatsapp_blocked_by_user_id": null,
            "last_contact_at": null,
            "next_action_at": null,
            "created_at": null,
            "updated_at": null
        });

        let lead: Lead = serde_json::from_value(row.clone()).unwrap();
        assert_eq!(lead.converted_value_eur, Some(1250.5));
        assert!(!lead.whatsapp_blocked);

        row["converted_value_eur"] = json!(80);
        let lead: Lead = serde_json::from_value(row).unwrap();
        assert_eq!(lead.converted_value_eur, Some(80.0));
    }

    #[test]
    fn call_outcome_parse_is_lenient_about_case() {
        assert_eq!(CallOutcome::parse(" No_Response "), Some(CallOutcome::NoResponse));
        assert_eq!(CallOutcome::parse("voicemail"), None);
    }
}
