// libs/appointment-cell/src/store/supabase.rs
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::{api_error, representation_headers, SupabaseClient};
use shared_models::context::ClinicContext;

use crate::models::{
    Appointment, AppointmentError, BusyBlock, CalendarEvent, NewAppointment, NewBusyBlock,
    OccupancySource, SlotRange,
};
use crate::store::{SchedulingStore, CALENDAR_PROBE_LIMIT};

pub struct SupabaseSchedulingStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseSchedulingStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn overlap_filter(ctx: &ClinicContext, range: &SlotRange) -> String {
        format!(
            "clinic_id=eq.{}&start_at=lt.{}&end_at=gt.{}",
            ctx.clinic_id,
            urlencoding::encode(&range.end_iso()),
            urlencoding::encode(&range.start_iso())
        )
    }
}

/// Overlapping inserts are stopped by the `appointments` exclusion
/// constraint; surface that as an occupancy conflict.
fn map_write_error(err: anyhow::Error) -> AppointmentError {
    match api_error(&err) {
        Some(api) if api.is_constraint_conflict() => {
            warn!("Appointment write hit overlap constraint: {}", api.message);
            AppointmentError::Conflict(OccupancySource::Appointment)
        }
        _ => AppointmentError::Database(err.to_string()),
    }
}

#[async_trait]
impl SchedulingStore for SupabaseSchedulingStore {
    async fn find_overlapping_appointment(
        &self,
        ctx: &ClinicContext,
        range: &SlotRange,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let mut path = format!(
            "/rest/v1/appointments?status=eq.scheduled&{}&limit=1",
            Self::overlap_filter(ctx, range)
        );
        if let Some(id) = exclude_appointment_id {
            path.push_str(&format!("&id=neq.{}", id));
        }

        debug!("Probing appointments: {}", path);
        let rows: Vec<Appointment> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows.into_iter().next())
    }

    async fn find_overlapping_busy_block(
        &self,
        ctx: &ClinicContext,
        range: &SlotRange,
        exclude_busy_block_id: Option<Uuid>,
    ) -> Result<Option<BusyBlock>, AppointmentError> {
        let mut path = format!("/rest/v1/busy_blocks?{}&limit=1", Self::overlap_filter(ctx, range));
        if let Some(id) = exclude_busy_block_id {
            path.push_str(&format!("&id=neq.{}", id));
        }

        let rows: Vec<BusyBlock> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows.into_iter().next())
    }

    async fn list_overlapping_calendar_events(
        &self,
        ctx: &ClinicContext,
        range: &SlotRange,
    ) -> Result<Vec<CalendarEvent>, AppointmentError> {
        let path = format!(
            "/rest/v1/calendar_events?select=id,clinic_id,start_at,end_at,status,summary&{}&limit={}",
            Self::overlap_filter(ctx, range),
            CALENDAR_PROBE_LIMIT
        );
        let rows: Vec<CalendarEvent> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows)
    }

    async fn insert_appointment(
        &self,
        ctx: &ClinicContext,
        appointment: &NewAppointment,
    ) -> Result<Appointment, AppointmentError> {
        let body = json!({
            "clinic_id": ctx.clinic_id,
            "lead_id": appointment.lead_id,
            "lead_name": appointment.lead_name,
            "lead_phone": appointment.lead_phone,
            "title": appointment.title,
            "start_at": appointment.range.start_iso(),
            "end_at": appointment.range.end_iso(),
            "status": "scheduled",
            "notes": appointment.notes,
            "source_channel": appointment.source_channel,
            "created_by": appointment.created_by,
        });

        let rows: Vec<Appointment> = self
            .supabase
            .request_with_headers(Method::POST, "/rest/v1/appointments", None, Some(body), Some(representation_headers(false)))
            .await
            .map_err(map_write_error)?;

        rows.into_iter()
            .next()
            .ok_or_else(|| AppointmentError::Database("appointment insert returned no rows".to_string()))
    }

    async fn get_appointment(
        &self,
        ctx: &ClinicContext,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&clinic_id=eq.{}&limit=1",
            appointment_id, ctx.clinic_id
        );
        let rows: Vec<Appointment> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows.into_iter().next())
    }

    async fn reschedule_appointment(
        &self,
        ctx: &ClinicContext,
        appointment_id: Uuid,
        range: &SlotRange,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&clinic_id=eq.{}",
            appointment_id, ctx.clinic_id
        );
        let body = json!({
            "start_at": range.start_iso(),
            "end_at": range.end_iso(),
        });

        let rows: Vec<Appointment> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, None, Some(body), Some(representation_headers(false)))
            .await
            .map_err(map_write_error)?;
        Ok(rows.into_iter().next())
    }

    async fn set_calendar_event_id(
        &self,
        ctx: &ClinicContext,
        appointment_id: Uuid,
        event_id: &str,
    ) -> Result<(), AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&clinic_id=eq.{}",
            appointment_id, ctx.clinic_id
        );
        self.supabase
            .execute(Method::PATCH, &path, Some(json!({ "gcal_event_id": event_id })), None)
            .await?;
        Ok(())
    }

    async fn insert_busy_block(
        &self,
        ctx: &ClinicContext,
        block: &NewBusyBlock,
    ) -> Result<BusyBlock, AppointmentError> {
        let body = json!({
            "clinic_id": ctx.clinic_id,
            "start_at": block.range.start_iso(),
            "end_at": block.range.end_iso(),
            "reason": block.reason,
            "created_by_user_id": block.created_by_user_id,
        });

        let rows: Vec<BusyBlock> = self
            .supabase
            .request_with_headers(Method::POST, "/rest/v1/busy_blocks", None, Some(body), Some(representation_headers(false)))
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| AppointmentError::Database("busy block insert returned no rows".to_string()))
    }
}
