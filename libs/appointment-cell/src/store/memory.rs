// libs/appointment-cell/src/store/memory.rs
//
// Process-local scheduling store. Appointment writes and busy block inserts
// re-probe the other occupancy table under the write guard, so a range
// checked as free cannot be taken between the check and the insert.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use shared_models::context::ClinicContext;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, BusyBlock, CalendarEvent, NewAppointment,
    NewBusyBlock, OccupancySource, SlotRange,
};
use crate::services::availability::ranges_overlap;
use crate::store::{SchedulingStore, CALENDAR_PROBE_LIMIT};

#[derive(Default)]
struct Tables {
    appointments: HashMap<Uuid, Appointment>,
    busy_blocks: HashMap<Uuid, BusyBlock>,
    calendar_events: Vec<CalendarEvent>,
}

#[derive(Default)]
pub struct InMemorySchedulingStore {
    tables: RwLock<Tables>,
}

fn range_of(start_at: chrono::DateTime<Utc>, end_at: chrono::DateTime<Utc>) -> SlotRange {
    SlotRange { start_at, end_at }
}

fn clashing_appointment<'a>(
    tables: &'a Tables,
    clinic_id: Uuid,
    range: &SlotRange,
    exclude: Option<Uuid>,
) -> Option<&'a Appointment> {
    tables.appointments.values().find(|a| {
        a.clinic_id == clinic_id
            && a.status == AppointmentStatus::Scheduled
            && Some(a.id) != exclude
            && ranges_overlap(&range_of(a.start_at, a.end_at), range)
    })
}

fn clashing_busy_block(tables: &Tables, clinic_id: Uuid, range: &SlotRange) -> bool {
    tables
        .busy_blocks
        .values()
        .any(|b| b.clinic_id == clinic_id && ranges_overlap(&range_of(b.start_at, b.end_at), range))
}

impl InMemorySchedulingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stand-in for the external calendar sync writing its mirror.
    pub async fn seed_calendar_event(
        &self,
        clinic_id: Uuid,
        range: SlotRange,
        status: Option<&str>,
    ) -> CalendarEvent {
        let event = CalendarEvent {
            id: Uuid::new_v4(),
            clinic_id,
            start_at: range.start_at,
            end_at: range.end_at,
            status: status.map(str::to_string),
            summary: Some("External event".to_string()),
        };
        self.tables.write().await.calendar_events.push(event.clone());
        event
    }

    pub async fn appointment(&self, appointment_id: Uuid) -> Option<Appointment> {
        self.tables.read().await.appointments.get(&appointment_id).cloned()
    }

    pub async fn scheduled_appointments(&self, clinic_id: Uuid) -> Vec<Appointment> {
        let tables = self.tables.read().await;
        let mut rows: Vec<Appointment> = tables
            .appointments
            .values()
            .filter(|a| a.clinic_id == clinic_id && a.status == AppointmentStatus::Scheduled)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.start_at);
        rows
    }

    pub async fn set_appointment_status(&self, appointment_id: Uuid, status: AppointmentStatus) {
        if let Some(row) = self.tables.write().await.appointments.get_mut(&appointment_id) {
            row.status = status;
        }
    }
}

#[async_trait]
impl SchedulingStore for InMemorySchedulingStore {
    async fn find_overlapping_appointment(
        &self,
        ctx: &ClinicContext,
        range: &SlotRange,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let tables = self.tables.read().await;
        Ok(clashing_appointment(&tables, ctx.clinic_id, range, exclude_appointment_id).cloned())
    }

    async fn find_overlapping_busy_block(
        &self,
        ctx: &ClinicContext,
        range: &SlotRange,
        exclude_busy_block_id: Option<Uuid>,
    ) -> Result<Option<BusyBlock>, AppointmentError> {
        let tables = self.tables.read().await;
        Ok(tables
            .busy_blocks
            .values()
            .find(|b| {
                b.clinic_id == ctx.clinic_id
                    && Some(b.id) != exclude_busy_block_id
                    && ranges_overlap(&range_of(b.start_at, b.end_at), range)
            })
            .cloned())
    }

    async fn list_overlapping_calendar_events(
        &self,
        ctx: &ClinicContext,
        range: &SlotRange,
    ) -> Result<Vec<CalendarEvent>, AppointmentError> {
        let tables = self.tables.read().await;
        Ok(tables
            .calendar_events
            .iter()
            .filter(|e| e.clinic_id == ctx.clinic_id && ranges_overlap(&range_of(e.start_at, e.end_at), range))
            .take(CALENDAR_PROBE_LIMIT)
            .cloned()
            .collect())
    }

    async fn insert_appointment(
        &self,
        ctx: &ClinicContext,
        appointment: &NewAppointment,
    ) -> Result<Appointment, AppointmentError> {
        let mut tables = self.tables.write().await;
        if clashing_appointment(&tables, ctx.clinic_id, &appointment.range, None).is_some() {
            return Err(AppointmentError::Conflict(OccupancySource::Appointment));
        }
        if clashing_busy_block(&tables, ctx.clinic_id, &appointment.range) {
            return Err(AppointmentError::Conflict(OccupancySource::BusyBlock));
        }

        let row = Appointment {
            id: Uuid::new_v4(),
            clinic_id: ctx.clinic_id,
            lead_id: appointment.lead_id,
            lead_name: appointment.lead_name.clone(),
            lead_phone: appointment.lead_phone.clone(),
            title: appointment.title.clone(),
            start_at: appointment.range.start_at,
            end_at: appointment.range.end_at,
            status: AppointmentStatus::Scheduled,
            notes: appointment.notes.clone(),
            gcal_event_id: None,
            source_channel: Some(appointment.source_channel),
            created_by: Some(appointment.created_by),
            created_at: Some(Utc::now()),
        };
        tables.appointments.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_appointment(
        &self,
        ctx: &ClinicContext,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let tables = self.tables.read().await;
        Ok(tables
            .appointments
            .get(&appointment_id)
            .filter(|a| a.clinic_id == ctx.clinic_id)
            .cloned())
    }

    async fn reschedule_appointment(
        &self,
        ctx: &ClinicContext,
        appointment_id: Uuid,
        range: &SlotRange,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let mut tables = self.tables.write().await;
        if clashing_appointment(&tables, ctx.clinic_id, range, Some(appointment_id)).is_some() {
            return Err(AppointmentError::Conflict(OccupancySource::Appointment));
        }
        if clashing_busy_block(&tables, ctx.clinic_id, range) {
            return Err(AppointmentError::Conflict(OccupancySource::BusyBlock));
        }

        Ok(tables
            .appointments
            .get_mut(&appointment_id)
            .filter(|a| a.clinic_id == ctx.clinic_id)
            .map(|row| {
                row.start_at = range.start_at;
                row.end_at = range.end_at;
                row.clone()
            }))
    }

    async fn set_calendar_event_id(
        &self,
        ctx: &ClinicContext,
        appointment_id: Uuid,
        event_id: &str,
    ) -> Result<(), AppointmentError> {
        let mut tables = self.tables.write().await;
        if let Some(row) = tables
            .appointments
            .get_mut(&appointment_id)
            .filter(|a| a.clinic_id == ctx.clinic_id)
        {
            row.gcal_event_id = Some(event_id.to_string());
        }
        Ok(())
    }

    async fn insert_busy_block(
        &self,
        ctx: &ClinicContext,
        block: &NewBusyBlock,
    ) -> Result<BusyBlock, AppointmentError> {
        let mut tables = self.tables.write().await;
        if clashing_appointment(&tables, ctx.clinic_id, &block.range, None).is_some() {
            return Err(AppointmentError::Conflict(OccupancySource::Appointment));
        }

        let row = BusyBlock {
            id: Uuid::new_v4(),
            clinic_id: ctx.clinic_id,
            start_at: block.range.start_at,
            end_at: block.range.end_at,
            reason: block.reason.clone(),
            created_by_user_id: block.created_by_user_id.clone(),
            created_at: Some(Utc::now()),
        };
        tables.busy_blocks.insert(row.id, row.clone());
        Ok(row)
    }
}
