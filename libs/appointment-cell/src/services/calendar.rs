// libs/appointment-cell/src/services/calendar.rs
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use shared_config::AppConfig;
use shared_models::context::ClinicContext;

use crate::models::{Appointment, AppointmentError};

/// Pushes appointments to the clinic's external calendar. Local state stays
/// authoritative; callers only log failures.
#[async_trait]
pub trait CalendarExporter: Send + Sync {
    /// Returns the external event id, or `None` when nothing was exported.
    async fn export_appointment(
        &self,
        ctx: &ClinicContext,
        appointment: &Appointment,
    ) -> Result<Option<String>, AppointmentError>;
}

pub struct DisabledCalendarExporter;

#[async_trait]
impl CalendarExporter for DisabledCalendarExporter {
    async fn export_appointment(
        &self,
        _ctx: &ClinicContext,
        _appointment: &Appointment,
    ) -> Result<Option<String>, AppointmentError> {
        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
struct ExportResponse {
    event_id: Option<String>,
}

/// Posts the appointment as JSON to the calendar sync service.
pub struct HttpCalendarExporter {
    client: Client,
    endpoint: String,
}

impl HttpCalendarExporter {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl CalendarExporter for HttpCalendarExporter {
    async fn export_appointment(
        &self,
        ctx: &ClinicContext,
        appointment: &Appointment,
    ) -> Result<Option<String>, AppointmentError> {
        let body = json!({
            "clinic_id": ctx.clinic_id,
            "appointment_id": appointment.id,
            "event_id": appointment.gcal_event_id,
            "title": appointment.title,
            "lead_name": appointment.lead_name,
            "lead_phone": appointment.lead_phone,
            "start_at": appointment.start_at,
            "end_at": appointment.end_at,
            "notes": appointment.notes,
        });

        debug!("Exporting appointment {} to {}", appointment.id, self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppointmentError::ExternalService(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppointmentError::ExternalService(format!(
                "calendar export failed ({}): {}",
                status, text
            )));
        }

        let parsed: ExportResponse = response
            .json()
            .await
            .map_err(|e| AppointmentError::ExternalService(e.to_string()))?;
        Ok(parsed.event_id.filter(|id| !id.is_empty()))
    }
}

/// HTTP exporter when `CALENDAR_EXPORT_URL` is set, otherwise disabled.
pub fn calendar_exporter_from_config(config: &AppConfig) -> Arc<dyn CalendarExporter> {
    match config.calendar_export_url.as_deref() {
        Some(url) if config.is_calendar_export_configured() => Arc::new(HttpCalendarExporter::new(url)),
        _ => Arc::new(DisabledCalendarExporter),
    }
}
