// libs/appointment-cell/src/services/availability.rs
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use shared_models::context::ClinicContext;

use crate::models::{AppointmentError, OccupancySource, SlotRange};
use crate::store::SchedulingStore;

/// Half-open overlap; ranges that only touch do not overlap.
pub fn ranges_overlap(a: &SlotRange, b: &SlotRange) -> bool {
    a.start_at < b.end_at && a.end_at > b.start_at
}

/// External events block time unless explicitly cancelled. A missing status
/// counts as confirmed.
pub fn is_external_event_busy(status: Option<&str>) -> bool {
    !matches!(status, Some(s) if s.trim().eq_ignore_ascii_case("cancelled"))
}

pub struct AvailabilityService {
    store: Arc<dyn SchedulingStore>,
}

impl AvailabilityService {
    pub fn new(store: Arc<dyn SchedulingStore>) -> Self {
        Self { store }
    }

    /// Probes appointments, busy blocks, then the external calendar mirror and
    /// stops at the first source that is occupied.
    pub async fn check_slot_availability(
        &self,
        ctx: &ClinicContext,
        range: &SlotRange,
        exclude_appointment_id: Option<Uuid>,
        exclude_busy_block_id: Option<Uuid>,
    ) -> Result<(), AppointmentError> {
        if let Some(existing) = self
            .store
            .find_overlapping_appointment(ctx, range, exclude_appointment_id)
            .await?
        {
            debug!("Range {} overlaps appointment {}", range.start_iso(), existing.id);
            return Err(AppointmentError::Conflict(OccupancySource::Appointment));
        }

        if let Some(block) = self
            .store
            .find_overlapping_busy_block(ctx, range, exclude_busy_block_id)
            .await?
        {
            debug!("Range {} overlaps busy block {}", range.start_iso(), block.id);
            return Err(AppointmentError::Conflict(OccupancySource::BusyBlock));
        }

        let events = self.store.list_overlapping_calendar_events(ctx, range).await?;
        if let Some(event) = events.iter().find(|e| is_external_event_busy(e.status.as_deref())) {
            debug!("Range {} overlaps external event {}", range.start_iso(), event.id);
            return Err(AppointmentError::Conflict(OccupancySource::ExternalCalendar));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn range(start_hour: u32, minutes: i64) -> SlotRange {
        let start = Utc.with_ymd_and_hms(2024, 6, 10, start_hour, 0, 0).unwrap();
        SlotRange { start_at: start, end_at: start + Duration::minutes(minutes) }
    }

    #[test]
    fn touching_ranges_do_not_overlap() {
        assert!(!ranges_overlap(&range(8, 60), &range(9, 30)));
        assert!(ranges_overlap(&range(8, 61), &range(9, 30)));
        assert!(ranges_overlap(&range(8, 180), &range(9, 30)));
    }

    #[test]
    fn only_cancelled_external_events_are_free() {
        assert!(is_external_event_busy(None));
        assert!(is_external_event_busy(Some("confirmed")));
        assert!(is_external_event_busy(Some("tentative")));
        assert!(!is_external_event_busy(Some("cancelled")));
        assert!(!is_external_event_busy(Some("CANCELLED")));
    }
}
