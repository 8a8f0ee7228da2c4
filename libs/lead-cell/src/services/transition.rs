// libs/lead-cell/src/services/transition.rs
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use shared_models::context::ClinicContext;

use crate::models::{
    AppliedTransition, LeadError, StageTransitionCommand, TransitionError, TransitionMode,
};
use crate::services::catalog::StageCatalog;
use crate::stages::LeadStage;
use crate::store::{LeadStore, StageTransitioner};

pub const DEFAULT_MAX_SERIALIZATION_RETRIES: u32 = 3;

/// Applies stage changes to leads. Every write path for `stage_key` and
/// `status` goes through here.
pub struct LeadStageService {
    pub(crate) store: Arc<dyn LeadStore>,
    transitioner: Arc<dyn StageTransitioner>,
    max_serialization_retries: u32,
}

impl LeadStageService {
    pub fn new(store: Arc<dyn LeadStore>, transitioner: Arc<dyn StageTransitioner>) -> Self {
        Self {
            store,
            transitioner,
            max_serialization_retries: DEFAULT_MAX_SERIALIZATION_RETRIES,
        }
    }

    pub fn with_max_serialization_retries(mut self, retries: u32) -> Self {
        self.max_serialization_retries = retries;
        self
    }

    pub async fn stage_catalog(&self) -> StageCatalog {
        StageCatalog::load(self.store.as_ref()).await
    }

    /// Move a lead to `to_stage_key`. Uses the atomic procedure; when it
    /// rejects the change or cannot be reached, the stage and its derived
    /// status are written directly and no history row is recorded.
    #[instrument(skip(self, command), fields(lead_id = %command.lead_id, to = %command.to_stage_key))]
    pub async fn transition_lead_stage(
        &self,
        ctx: &ClinicContext,
        command: &StageTransitionCommand,
    ) -> Result<AppliedTransition, LeadError> {
        let catalog = self.stage_catalog().await;
        if !catalog.contains(&command.to_stage_key) {
            warn!(
                "Stage {} is not in the catalog (degraded: {})",
                command.to_stage_key, catalog.degraded
            );
        }

        match self.apply_atomic(ctx, command).await {
            Ok(applied) => {
                info!(
                    "Lead {} moved {:?} -> {}",
                    command.lead_id,
                    applied.from_stage_key,
                    applied.stage.stage_key()
                );
                Ok(applied)
            }
            Err(e) => {
                warn!(
                    "Atomic transition for lead {} failed ({}), writing stage without history",
                    command.lead_id, e
                );
                self.apply_legacy_fallback(ctx, command).await
            }
        }
    }

    /// Atomic procedure only, retried on serialization conflicts. Callers that
    /// need the history guarantee use this directly.
    pub async fn apply_atomic(
        &self,
        ctx: &ClinicContext,
        command: &StageTransitionCommand,
    ) -> Result<AppliedTransition, TransitionError> {
        let mut attempt = 0;
        loop {
            match self.transitioner.apply_transition(ctx, command).await {
                Err(TransitionError::SerializationConflict) if attempt < self.max_serialization_retries => {
                    attempt += 1;
                    debug!(
                        "Serialization conflict on lead {}, retry {}/{}",
                        command.lead_id, attempt, self.max_serialization_retries
                    );
                }
                result => return result,
            }
        }
    }

    async fn apply_legacy_fallback(
        &self,
        ctx: &ClinicContext,
        command: &StageTransitionCommand,
    ) -> Result<AppliedTransition, LeadError> {
        let lead = self
            .store
            .get_lead(ctx, command.lead_id)
            .await?
            .ok_or(LeadError::NotFound)?;

        let stage = LeadStage::from_key(&command.to_stage_key);
        if !self
            .store
            .write_stage_without_history(ctx, command.lead_id, &stage)
            .await?
        {
            return Err(LeadError::NotFound);
        }

        Ok(AppliedTransition {
            lead_id: command.lead_id,
            from_stage_key: lead.stage_key,
            stage,
            mode: TransitionMode::LegacyFallback,
            history: None,
        })
    }
}
