use std::env;
use tracing::warn;
use uuid::Uuid;

pub const DEFAULT_CLINIC_TIMEZONE: &str = "Europe/Madrid";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: String,
    pub supabase_jwt_secret: String,
    pub webhook_secret: String,
    /// Fallback tenant for single-clinic deployments.
    pub default_clinic_id: Option<Uuid>,
    pub clinic_timezone: String,
    pub calendar_export_url: Option<String>,
    pub call_cost_eur_per_minute: Option<f64>,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, requests will use the anon key");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            webhook_secret: env::var("WEBHOOK_SECRET")
                .unwrap_or_else(|_| {
                    warn!("WEBHOOK_SECRET not set, every webhook will be rejected");
                    String::new()
                }),
            default_clinic_id: env::var("DEFAULT_CLINIC_ID")
                .ok()
                .and_then(|raw| match Uuid::parse_str(raw.trim()) {
                    Ok(id) => Some(id),
                    Err(_) => {
                        warn!("DEFAULT_CLINIC_ID is not a valid UUID, ignoring it");
                        None
                    }
                }),
            clinic_timezone: env::var("CLINIC_TIMEZONE")
                .unwrap_or_else(|_| DEFAULT_CLINIC_TIMEZONE.to_string()),
            calendar_export_url: env::var("CALENDAR_EXPORT_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            call_cost_eur_per_minute: env::var("CALL_COST_EUR_PER_MINUTE")
                .ok()
                .and_then(|raw| match raw.parse::<f64>() {
                    Ok(rate) if rate >= 0.0 => Some(rate),
                    _ => {
                        warn!("CALL_COST_EUR_PER_MINUTE is not a non-negative number, ignoring it");
                        None
                    }
                }),
            port: env::var("PORT")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(3000),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
            && !self.webhook_secret.is_empty()
    }

    /// Key used for server-side table access; service role when present.
    pub fn supabase_api_key(&self) -> &str {
        if self.supabase_service_role_key.is_empty() {
            &self.supabase_anon_key
        } else {
            &self.supabase_service_role_key
        }
    }

    pub fn is_calendar_export_configured(&self) -> bool {
        self.calendar_export_url.is_some()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_service_role_key: String::new(),
            supabase_jwt_secret: String::new(),
            webhook_secret: String::new(),
            default_clinic_id: None,
            clinic_timezone: DEFAULT_CLINIC_TIMEZONE.to_string(),
            calendar_export_url: None,
            call_cost_eur_per_minute: None,
            port: 3000,
        }
    }
}
