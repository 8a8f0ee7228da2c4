// libs/appointment-cell/src/state.rs
use std::sync::Arc;

use lead_cell::LeadCellState;
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::time::clinic_timezone;

use crate::services::calendar::{calendar_exporter_from_config, CalendarExporter};
use crate::services::AppointmentBookingService;
use crate::store::{SchedulingStore, SupabaseSchedulingStore};

#[derive(Clone)]
pub struct AppointmentCellState {
    pub config: Arc<AppConfig>,
    pub booking: Arc<AppointmentBookingService>,
}

impl AppointmentCellState {
    /// Shares the lead cell's services so bookings drive the same stage
    /// engine as calls and staff actions.
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn SchedulingStore>,
        leads: &LeadCellState,
        calendar: Arc<dyn CalendarExporter>,
    ) -> Self {
        let booking = Arc::new(AppointmentBookingService::new(
            store,
            leads.intake.clone(),
            leads.stages.clone(),
            calendar,
            clinic_timezone(&config.clinic_timezone),
        ));

        Self { config, booking }
    }

    pub fn with_supabase(config: Arc<AppConfig>, supabase: Arc<SupabaseClient>, leads: &LeadCellState) -> Self {
        let store = Arc::new(SupabaseSchedulingStore::new(supabase));
        let calendar = calendar_exporter_from_config(&config);
        Self::new(config, store, leads, calendar)
    }
}
