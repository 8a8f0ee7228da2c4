// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono_tz::Tz;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use lead_cell::models::{AppliedTransition, ContactUpdate, NextActionUpdate, StageTransitionCommand};
use lead_cell::services::{LeadIntakeService, LeadStageService};
use lead_cell::stages::VISIT_SCHEDULED;
use shared_models::context::{Actor, ClinicContext};

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, AvailabilityQuery, AvailabilityReport,
    BookingResult, BusyBlock, CreateAppointmentRequest, CreateBusyBlockRequest, CreatedBy,
    NewAppointment, NewBusyBlock, RescheduleAppointmentRequest, SourceChannel,
};
use crate::services::availability::AvailabilityService;
use crate::services::calendar::CalendarExporter;
use crate::services::slot_rules::{validate_busy_block_range, validate_slot_range};
use crate::store::SchedulingStore;

/// Who is booking: drives `source_channel`, `created_by` and the actor on
/// the resulting stage transition.
#[derive(Debug, Clone)]
pub struct BookingOrigin {
    pub source_channel: SourceChannel,
    pub actor: Actor,
}

impl BookingOrigin {
    pub fn staff(user_id: impl Into<String>) -> Self {
        Self {
            source_channel: SourceChannel::Staff,
            actor: Actor::staff(user_id),
        }
    }

    pub fn agent(channel: SourceChannel) -> Self {
        let actor = match channel {
            SourceChannel::CallAi => Actor::retell_ai(),
            SourceChannel::WhatsappAi => Actor::channel("whatsapp"),
            SourceChannel::Staff => Actor::system(),
        };
        Self { source_channel: channel, actor }
    }
}

enum LeadIdentity<'a> {
    Existing(Uuid),
    ByPhone { name: &'a str, phone: &'a str },
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub struct AppointmentBookingService {
    store: Arc<dyn SchedulingStore>,
    availability: AvailabilityService,
    leads: Arc<LeadIntakeService>,
    stages: Arc<LeadStageService>,
    calendar: Arc<dyn CalendarExporter>,
    timezone: Tz,
}

impl AppointmentBookingService {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        leads: Arc<LeadIntakeService>,
        stages: Arc<LeadStageService>,
        calendar: Arc<dyn CalendarExporter>,
        timezone: Tz,
    ) -> Self {
        Self {
            availability: AvailabilityService::new(store.clone()),
            store,
            leads,
            stages,
            calendar,
            timezone,
        }
    }

    pub fn timezone(&self) -> &Tz {
        &self.timezone
    }

    /// Validate, check every occupancy source, resolve the lead, insert, then
    /// move the lead to `visit_scheduled` and mirror to the external calendar.
    /// Nothing is written for a rejected request.
    #[instrument(skip(self, request, origin), fields(channel = origin.source_channel.as_str()))]
    pub async fn create_appointment(
        &self,
        ctx: &ClinicContext,
        request: &CreateAppointmentRequest,
        origin: &BookingOrigin,
    ) -> Result<BookingResult, AppointmentError> {
        let start_at = non_empty(request.start_at.as_deref())
            .ok_or_else(|| AppointmentError::Validation("start_at is required".to_string()))?;

        let lead_name = non_empty(request.lead_name.as_deref());
        let lead_phone = match non_empty(request.lead_phone.as_deref()) {
            Some(raw) => Some(self.leads.normalize_lead_phone(raw)?),
            None => None,
        };
        let identity = match (request.lead_id, lead_name, lead_phone.as_deref()) {
            (Some(lead_id), _, _) => LeadIdentity::Existing(lead_id),
            (None, Some(name), Some(phone)) => LeadIdentity::ByPhone { name, phone },
            _ => {
                return Err(AppointmentError::Validation(
                    "lead_id or lead_name and lead_phone are required".to_string(),
                ))
            }
        };

        let range = validate_slot_range(start_at, request.end_at.as_deref(), &self.timezone)?;
        self.availability
            .check_slot_availability(ctx, &range, None, None)
            .await?;

        let lead = match identity {
            LeadIdentity::Existing(lead_id) => self.leads.get_lead(ctx, lead_id).await?,
            LeadIdentity::ByPhone { name, phone } => {
                self.leads
                    .upsert_lead_by_phone(ctx, Some(name), phone, origin.source_channel.as_str())
                    .await?
            }
        };

        let new_appointment = NewAppointment {
            lead_id: Some(lead.id),
            lead_name: lead_name.map(str::to_string).or_else(|| lead.full_name.clone()),
            lead_phone: lead_phone.clone().or_else(|| lead.phone.clone()),
            title: non_empty(request.title.as_deref()).map(str::to_string),
            range,
            notes: request.notes.clone(),
            source_channel: origin.source_channel,
            created_by: CreatedBy::from(origin.source_channel),
        };

        let mut appointment = self.store.insert_appointment(ctx, &new_appointment).await?;
        info!(
            "Booked appointment {} for lead {} at {}",
            appointment.id,
            lead.id,
            range.start_iso()
        );

        let transition = self
            .mark_visit_scheduled(ctx, &appointment, "appointment_created", &origin.actor)
            .await;
        let calendar_event_id = self.mirror_to_calendar(ctx, &mut appointment).await;

        Ok(BookingResult {
            appointment,
            transition,
            calendar_event_id,
        })
    }

    /// Move a scheduled appointment. The appointment itself is excluded from
    /// the overlap check.
    #[instrument(skip(self, request, actor))]
    pub async fn reschedule_appointment(
        &self,
        ctx: &ClinicContext,
        appointment_id: Uuid,
        request: &RescheduleAppointmentRequest,
        actor: &Actor,
    ) -> Result<BookingResult, AppointmentError> {
        let current = self
            .store
            .get_appointment(ctx, appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)?;
        if current.status != AppointmentStatus::Scheduled {
            return Err(AppointmentError::InvalidStatus(current.status));
        }

        let range = validate_slot_range(&request.start_at, request.end_at.as_deref(), &self.timezone)?;
        self.availability
            .check_slot_availability(ctx, &range, Some(appointment_id), None)
            .await?;

        let mut appointment = self
            .store
            .reschedule_appointment(ctx, appointment_id, &range)
            .await?
            .ok_or(AppointmentError::NotFound)?;
        info!("Rescheduled appointment {} to {}", appointment_id, range.start_iso());

        let transition = self
            .mark_visit_scheduled(ctx, &appointment, "appointment_rescheduled", actor)
            .await;
        let calendar_event_id = self.mirror_to_calendar(ctx, &mut appointment).await;

        Ok(BookingResult {
            appointment,
            transition,
            calendar_event_id,
        })
    }

    #[instrument(skip(self, request))]
    pub async fn create_busy_block(
        &self,
        ctx: &ClinicContext,
        request: &CreateBusyBlockRequest,
        created_by_user_id: Option<String>,
    ) -> Result<BusyBlock, AppointmentError> {
        let range = validate_busy_block_range(&request.start_at, &request.end_at, &self.timezone)?;
        self.availability
            .check_slot_availability(ctx, &range, None, None)
            .await?;

        let block = self
            .store
            .insert_busy_block(
                ctx,
                &NewBusyBlock {
                    range,
                    reason: non_empty(request.reason.as_deref()).map(str::to_string),
                    created_by_user_id,
                },
            )
            .await?;

        info!("Busy block {} created {} - {}", block.id, range.start_iso(), range.end_iso());
        Ok(block)
    }

    /// Read-only probe. Rule violations are errors; occupancy is reported in
    /// the result.
    pub async fn check_availability(
        &self,
        ctx: &ClinicContext,
        query: &AvailabilityQuery,
    ) -> Result<AvailabilityReport, AppointmentError> {
        let range = match non_empty(query.end_at.as_deref()) {
            Some(end_at) => validate_busy_block_range(&query.start_at, end_at, &self.timezone)?,
            None => validate_slot_range(&query.start_at, None, &self.timezone)?,
        };

        let outcome = self
            .availability
            .check_slot_availability(ctx, &range, query.exclude_appointment_id, query.exclude_busy_block_id)
            .await;

        let conflict = match outcome {
            Ok(()) => None,
            Err(AppointmentError::Conflict(source)) => Some(source),
            Err(e) => return Err(e),
        };

        Ok(AvailabilityReport {
            available: conflict.is_none(),
            start_at: range.start_iso(),
            end_at: range.end_iso(),
            conflict,
            message: conflict.map(|c| c.message().to_string()),
        })
    }

    async fn mark_visit_scheduled(
        &self,
        ctx: &ClinicContext,
        appointment: &Appointment,
        reason: &str,
        actor: &Actor,
    ) -> Option<AppliedTransition> {
        let lead_id = appointment.lead_id?;

        let command = StageTransitionCommand::new(lead_id, VISIT_SCHEDULED, actor.clone())
            .with_reason(reason)
            .with_meta(json!({
                "appointment_id": appointment.id,
                "start_at": appointment.start_at,
                "source_channel": appointment.source_channel,
            }));

        let transition = match self.stages.transition_lead_stage(ctx, &command).await {
            Ok(applied) => Some(applied),
            Err(e) => {
                warn!(
                    "Appointment {} booked but lead {} could not move to {}: {}",
                    appointment.id, lead_id, VISIT_SCHEDULED, e
                );
                None
            }
        };

        let contact = ContactUpdate {
            last_contact_at: None,
            next_action: NextActionUpdate::Clear,
        };
        if let Err(e) = self.leads.update_contact(ctx, lead_id, &contact).await {
            warn!("Failed to clear next action for lead {}: {}", lead_id, e);
        }

        transition
    }

    async fn mirror_to_calendar(&self, ctx: &ClinicContext, appointment: &mut Appointment) -> Option<String> {
        match self.calendar.export_appointment(ctx, appointment).await {
            Ok(Some(event_id)) => {
                if appointment.gcal_event_id.as_deref() != Some(event_id.as_str()) {
                    if let Err(e) = self.store.set_calendar_event_id(ctx, appointment.id, &event_id).await {
                        warn!("Failed to store calendar event id for appointment {}: {}", appointment.id, e);
                    }
                    appointment.gcal_event_id = Some(event_id.clone());
                }
                Some(event_id)
            }
            Ok(None) => appointment.gcal_event_id.clone(),
            Err(e) => {
                warn!("Calendar export failed for appointment {}: {}", appointment.id, e);
                appointment.gcal_event_id.clone()
            }
        }
    }
}
