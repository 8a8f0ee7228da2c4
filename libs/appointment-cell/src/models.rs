// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use lead_cell::models::{AppliedTransition, LeadError};
use shared_models::error::AppError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub lead_name: Option<String>,
    pub lead_phone: Option<String>,
    pub title: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub gcal_event_id: Option<String>,
    pub source_channel: Option<SourceChannel>,
    pub created_by: Option<CreatedBy>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Canceled,
    Done,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Canceled => write!(f, "canceled"),
            AppointmentStatus::Done => write!(f, "done"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceChannel {
    CallAi,
    WhatsappAi,
    Staff,
}

impl SourceChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceChannel::CallAi => "call_ai",
            SourceChannel::WhatsappAi => "whatsapp_ai",
            SourceChannel::Staff => "staff",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CreatedBy {
    Agent,
    Staff,
}

impl From<SourceChannel> for CreatedBy {
    fn from(channel: SourceChannel) -> Self {
        match channel {
            SourceChannel::Staff => CreatedBy::Staff,
            SourceChannel::CallAi | SourceChannel::WhatsappAi => CreatedBy::Agent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusyBlock {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub created_by_user_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Mirror of an external calendar's busy windows. Read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: Option<String>,
    pub summary: Option<String>,
}

/// A validated half-open range `[start_at, end_at)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotRange {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

impl SlotRange {
    pub fn start_iso(&self) -> String {
        self.start_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn end_iso(&self) -> String {
        self.end_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

// ==============================================================================
// STORE WRITE MODELS
// ==============================================================================

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub lead_id: Option<Uuid>,
    pub lead_name: Option<String>,
    pub lead_phone: Option<String>,
    pub title: Option<String>,
    pub range: SlotRange,
    pub notes: Option<String>,
    pub source_channel: SourceChannel,
    pub created_by: CreatedBy,
}

#[derive(Debug, Clone)]
pub struct NewBusyBlock {
    pub range: SlotRange,
    pub reason: Option<String>,
    pub created_by_user_id: Option<String>,
}

// ==============================================================================
// REQUEST / RESPONSE MODELS
// ==============================================================================

/// Body of both the staff booking endpoint and the `appointment_created`
/// webhook.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateAppointmentRequest {
    pub clinic_id: Option<Uuid>,
    pub lead_id: Option<Uuid>,
    pub lead_name: Option<String>,
    pub lead_phone: Option<String>,
    pub start_at: Option<String>,
    pub end_at: Option<String>,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub source_channel: Option<SourceChannel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub start_at: String,
    pub end_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBusyBlockRequest {
    pub start_at: String,
    pub end_at: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityQuery {
    pub start_at: String,
    pub end_at: Option<String>,
    pub exclude_appointment_id: Option<Uuid>,
    pub exclude_busy_block_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingResult {
    pub appointment: Appointment,
    pub transition: Option<AppliedTransition>,
    pub calendar_event_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityReport {
    pub available: bool,
    pub start_at: String,
    pub end_at: String,
    pub conflict: Option<OccupancySource>,
    pub message: Option<String>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

/// Which occupancy source rejected a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OccupancySource {
    Appointment,
    BusyBlock,
    ExternalCalendar,
}

impl OccupancySource {
    pub fn message(&self) -> &'static str {
        match self {
            OccupancySource::Appointment => "That slot is already occupied by another appointment.",
            OccupancySource::BusyBlock => "That slot coincides with an internal block.",
            OccupancySource::ExternalCalendar => "That time is already busy on the external calendar.",
        }
    }
}

impl fmt::Display for OccupancySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRuleViolation {
    #[error("Invalid date. Use an ISO 8601 timestamp with offset.")]
    InvalidDate,

    #[error("Times must not include seconds.")]
    NonZeroSeconds,

    #[error("End time must be after start time.")]
    EndBeforeStart,

    #[error("Appointments must last exactly 30 minutes.")]
    InvalidDuration,

    #[error("Blocks must last a multiple of 30 minutes.")]
    InvalidBlockDuration,

    #[error("Start and end must fall on the same day.")]
    CrossesDay,

    #[error("Only Monday to Friday can be booked.")]
    Weekend,

    #[error("Times must start on the hour or half hour.")]
    OffGrid,

    #[error("Only times between 09:00 and 19:00 can be booked.")]
    OutsideBusinessHours,
}

#[derive(Error, Debug)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Slot(#[from] SlotRuleViolation),

    #[error("{0}")]
    Conflict(OccupancySource),

    #[error("Appointment cannot be modified in current status: {0}")]
    InvalidStatus(AppointmentStatus),

    #[error(transparent)]
    Lead(#[from] LeadError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("External service error: {0}")]
    ExternalService(String),
}

impl From<anyhow::Error> for AppointmentError {
    fn from(err: anyhow::Error) -> Self {
        AppointmentError::Database(err.to_string())
    }
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        match err {
            AppointmentError::NotFound => AppError::NotFound("Appointment not found".to_string()),
            AppointmentError::Validation(msg) => AppError::ValidationError(msg),
            AppointmentError::Slot(violation) => AppError::ValidationError(violation.to_string()),
            AppointmentError::Conflict(source) => AppError::Conflict(source.message().to_string()),
            AppointmentError::InvalidStatus(status) => AppError::ValidationError(format!(
                "Only scheduled appointments can be changed (current status: {})",
                status
            )),
            AppointmentError::Lead(e) => e.into(),
            AppointmentError::Database(msg) => AppError::Database(msg),
            AppointmentError::ExternalService(msg) => AppError::ExternalService(msg),
        }
    }
}
