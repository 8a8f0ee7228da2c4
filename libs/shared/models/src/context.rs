use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Tenant scope carried through every core operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicContext {
    pub clinic_id: Uuid,
}

impl ClinicContext {
    pub fn new(clinic_id: Uuid) -> Self {
        Self { clinic_id }
    }

    /// Resolve the tenant from an explicit id, else the configured fallback.
    /// No tenant at all is fatal for the request.
    pub fn resolve(explicit: Option<Uuid>, fallback: Option<Uuid>) -> Result<Self, AppError> {
        explicit
            .or(fallback)
            .map(Self::new)
            .ok_or_else(|| AppError::Tenant("clinic_id is required and no default clinic is configured".to_string()))
    }
}

/// Who triggered a stage change or write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActorType {
    Staff,
    RetellAi,
    System,
    /// Messaging or other inbound channel, e.g. `whatsapp_ai`.
    Channel(String),
}

impl ActorType {
    pub fn as_str(&self) -> &str {
        match self {
            ActorType::Staff => "staff",
            ActorType::RetellAi => "retell_ai",
            ActorType::System => "system",
            ActorType::Channel(name) => name,
        }
    }
}

impl fmt::Display for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ActorType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "staff" => ActorType::Staff,
            "retell_ai" => ActorType::RetellAi,
            "system" => ActorType::System,
            _ => ActorType::Channel(value),
        }
    }
}

impl From<ActorType> for String {
    fn from(value: ActorType) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
}

impl Actor {
    pub fn staff(user_id: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::Staff,
            actor_id: Some(user_id.into()),
        }
    }

    pub fn retell_ai() -> Self {
        Self {
            actor_type: ActorType::RetellAi,
            actor_id: None,
        }
    }

    pub fn system() -> Self {
        Self {
            actor_type: ActorType::System,
            actor_id: None,
        }
    }

    pub fn channel(name: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::from(name.into()),
            actor_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_prefers_explicit_clinic() {
        let explicit = Uuid::new_v4();
        let fallback = Uuid::new_v4();

        let ctx = ClinicContext::resolve(Some(explicit), Some(fallback)).unwrap();
        assert_eq!(ctx.clinic_id, explicit);

        let ctx = ClinicContext::resolve(None, Some(fallback)).unwrap();
        assert_eq!(ctx.clinic_id, fallback);
    }

    #[test]
    fn resolve_without_any_clinic_is_a_tenant_error() {
        let err = ClinicContext::resolve(None, None).unwrap_err();
        assert!(matches!(err, AppError::Tenant(_)));
    }

    #[test]
    fn actor_type_round_trips_through_strings() {
        assert_eq!(ActorType::from("retell_ai".to_string()), ActorType::RetellAi);
        assert_eq!(
            ActorType::from("whatsapp_ai".to_string()),
            ActorType::Channel("whatsapp_ai".to_string())
        );
        assert_eq!(serde_json::to_value(ActorType::Staff).unwrap(), "staff");
    }
}
