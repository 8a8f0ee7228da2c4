use std::sync::Arc;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{Engine as _, engine::general_purpose};
use serde_json::json;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub const TEST_WEBHOOK_SECRET: &str = "test-webhook-secret";

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub webhook_secret: String,
    pub default_clinic_id: Option<Uuid>,
    pub clinic_timezone: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
            default_clinic_id: None,
            clinic_timezone: "Europe/Madrid".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn with_default_clinic(mut self, clinic_id: Uuid) -> Self {
        self.default_clinic_id = Some(clinic_id);
        self
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            webhook_secret: self.webhook_secret.clone(),
            default_clinic_id: self.default_clinic_id,
            clinic_timezone: self.clinic_timezone.clone(),
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
    pub clinic_id: Uuid,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "staff".to_string(),
            clinic_id: Uuid::new_v4(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            email: email.to_string(),
            role: role.to_string(),
            ..Self::default()
        }
    }

    pub fn staff(email: &str) -> Self {
        Self::new(email, "staff")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn in_clinic(mut self, clinic_id: Uuid) -> Self {
        self.clinic_id = clinic_id;
        self
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            clinic_id: Some(self.clinic_id),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "app_metadata": { "clinic_id": user.clinic_id },
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn lead_response(lead_id: Uuid, clinic_id: Uuid, stage_key: &str, status: &str) -> serde_json::Value {
        json!({
            "id": lead_id,
            "clinic_id": clinic_id,
            "full_name": "Lucia Perez",
            "phone": "+34612345678",
            "treatment": "Ortodoncia",
            "source": "meta",
            "status": status,
            "stage_key": stage_key,
            "converted_to_client": false,
            "converted_value_eur": null,
            "converted_service_name": null,
            "converted_at": null,
            "post_visit_outcome_reason": null,
            "whatsapp_blocked": false,
            "whatsapp_blocked_reason": null,
            "whatsapp_blocked_at": null,
            "whatsapp_blocked_by_user_id": null,
            "last_contact_at": null,
            "next_action_at": null,
            "created_at": "2024-06-01T08:00:00Z",
            "updated_at": "2024-06-01T08:00:00Z"
        })
    }

    pub fn transition_ok_response(lead_id: Uuid, clinic_id: Uuid, from: Option<&str>, to: &str) -> serde_json::Value {
        json!([{
            "ok": true,
            "error": null,
            "history": {
                "id": Uuid::new_v4(),
                "clinic_id": clinic_id,
                "lead_id": lead_id,
                "from_stage_key": from,
                "to_stage_key": to,
                "reason": "test",
                "actor_type": "system",
                "actor_id": null,
                "meta": {},
                "created_at": "2024-06-10T08:00:00Z"
            }
        }])
    }

    pub fn transition_rejected_response(error: &str) -> serde_json::Value {
        json!([{ "ok": false, "error": error, "history": null }])
    }

    pub fn appointment_response(appointment_id: Uuid, clinic_id: Uuid, start_at: &str, end_at: &str) -> serde_json::Value {
        json!({
            "id": appointment_id,
            "clinic_id": clinic_id,
            "lead_id": null,
            "lead_name": "Lucia Perez",
            "lead_phone": "+34612345678",
            "title": "Primera visita",
            "start_at": start_at,
            "end_at": end_at,
            "status": "scheduled",
            "notes": null,
            "gcal_event_id": null,
            "source_channel": "staff",
            "created_by": "staff",
            "created_at": "2024-06-01T08:00:00Z"
        })
    }

    pub fn error_response(message: &str, code: &str) -> serde_json::Value {
        json!({
            "code": code,
            "message": message,
            "details": null,
            "hint": null
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = TestConfig::default();
        let app_config = config.to_app_config();

        assert_eq!(app_config.supabase_url, "http://localhost:54321");
        assert_eq!(app_config.supabase_anon_key, "test-anon-key");
        assert_eq!(app_config.webhook_secret, TEST_WEBHOOK_SECRET);
        assert!(!app_config.supabase_jwt_secret.is_empty());
    }

    #[test]
    fn test_user_creation() {
        let user = TestUser::staff("desk@example.com");
        let user_model = user.to_user();
        assert_eq!(user_model.email, Some(user.email.clone()));
        assert_eq!(user_model.role.as_deref(), Some("staff"));
        assert_eq!(user_model.clinic_id, Some(user.clinic_id));
    }
}
