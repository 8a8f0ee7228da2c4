// libs/appointment-cell/src/store/mod.rs
//
// Persistence port for the scheduling engine. All probes use strict overlap:
// `existing.start < end && existing.end > start`.

use async_trait::async_trait;
use uuid::Uuid;

use shared_models::context::ClinicContext;

use crate::models::{
    Appointment, AppointmentError, BusyBlock, CalendarEvent, NewAppointment, NewBusyBlock, SlotRange,
};

pub mod memory;
pub mod supabase;

pub use memory::InMemorySchedulingStore;
pub use supabase::SupabaseSchedulingStore;

/// Upper bound on external events fetched per probe.
pub const CALENDAR_PROBE_LIMIT: usize = 20;

#[async_trait]
pub trait SchedulingStore: Send + Sync {
    /// First `scheduled` appointment overlapping `range`.
    async fn find_overlapping_appointment(
        &self,
        ctx: &ClinicContext,
        range: &SlotRange,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Option<Appointment>, AppointmentError>;

    async fn find_overlapping_busy_block(
        &self,
        ctx: &ClinicContext,
        range: &SlotRange,
        exclude_busy_block_id: Option<Uuid>,
    ) -> Result<Option<BusyBlock>, AppointmentError>;

    /// Mirrored external events overlapping `range`, whatever their status.
    async fn list_overlapping_calendar_events(
        &self,
        ctx: &ClinicContext,
        range: &SlotRange,
    ) -> Result<Vec<CalendarEvent>, AppointmentError>;

    /// Fails with `Conflict(Appointment)` when the store itself detects an
    /// overlapping scheduled appointment.
    async fn insert_appointment(
        &self,
        ctx: &ClinicContext,
        appointment: &NewAppointment,
    ) -> Result<Appointment, AppointmentError>;

    async fn get_appointment(
        &self,
        ctx: &ClinicContext,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, AppointmentError>;

    async fn reschedule_appointment(
        &self,
        ctx: &ClinicContext,
        appointment_id: Uuid,
        range: &SlotRange,
    ) -> Result<Option<Appointment>, AppointmentError>;

    async fn set_calendar_event_id(
        &self,
        ctx: &ClinicContext,
        appointment_id: Uuid,
        event_id: &str,
    ) -> Result<(), AppointmentError>;

    async fn insert_busy_block(
        &self,
        ctx: &ClinicContext,
        block: &NewBusyBlock,
    ) -> Result<BusyBlock, AppointmentError>;
}
