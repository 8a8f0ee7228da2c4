// libs/lead-cell/src/state.rs
use std::sync::Arc;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::time::clinic_timezone;

use crate::services::{CallEventService, LeadIntakeService, LeadStageService};
use crate::store::{LeadStore, StageTransitioner, SupabaseLeadStore};

#[derive(Clone)]
pub struct LeadCellState {
    pub config: Arc<AppConfig>,
    pub stages: Arc<LeadStageService>,
    pub calls: Arc<CallEventService>,
    pub intake: Arc<LeadIntakeService>,
}

impl LeadCellState {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn LeadStore>,
        transitioner: Arc<dyn StageTransitioner>,
    ) -> Self {
        let stages = Arc::new(LeadStageService::new(store.clone(), transitioner));
        let calls = Arc::new(CallEventService::new(
            store.clone(),
            stages.clone(),
            clinic_timezone(&config.clinic_timezone),
            config.call_cost_eur_per_minute,
        ));
        let intake = Arc::new(LeadIntakeService::new(store));

        Self { config, stages, calls, intake }
    }

    pub fn with_supabase(config: Arc<AppConfig>, supabase: Arc<SupabaseClient>) -> Self {
        let store = Arc::new(SupabaseLeadStore::new(supabase));
        Self::new(config, store.clone(), store)
    }
}
