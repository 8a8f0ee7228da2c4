use axum::{routing::get, Router};

use appointment_cell::router::{appointment_routes, appointment_webhook_routes};
use appointment_cell::AppointmentCellState;
use lead_cell::router::{lead_routes, lead_webhook_routes};
use lead_cell::LeadCellState;

pub fn create_router(leads: LeadCellState, appointments: AppointmentCellState) -> Router {
    let webhooks = lead_webhook_routes(leads.clone()).merge(appointment_webhook_routes(appointments.clone()));

    Router::new()
        .route("/", get(|| async { "Clinic API is running!" }))
        .nest("/api/webhooks", webhooks)
        .nest("/api/leads", lead_routes(leads))
        .nest("/api", appointment_routes(appointments))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use appointment_cell::services::DisabledCalendarExporter;
    use appointment_cell::store::InMemorySchedulingStore;
    use lead_cell::store::InMemoryLeadStore;
    use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser, TEST_WEBHOOK_SECRET};

    fn app(config: &TestConfig) -> Router {
        let config = config.to_arc();
        let lead_store = Arc::new(InMemoryLeadStore::new());
        let leads = LeadCellState::new(config.clone(), lead_store.clone(), lead_store);
        let appointments = AppointmentCellState::new(
            config,
            Arc::new(InMemorySchedulingStore::new()),
            &leads,
            Arc::new(DisabledCalendarExporter),
        );
        create_router(leads, appointments)
    }

    #[tokio::test]
    async fn root_reports_running() {
        let response = app(&TestConfig::default())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn webhooks_from_both_cells_share_one_prefix() {
        let config = TestConfig::default().with_default_clinic(Uuid::new_v4());
        let router = app(&config);

        let lead = json!({ "full_name": "Lucia Perez", "phone": "612345678" });
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/webhooks/lead_created")
                    .header("content-type", "application/json")
                    .header("x-webhook-secret", TEST_WEBHOOK_SECRET)
                    .body(Body::from(lead.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let booking = json!({
            "lead_name": "Lucia Perez",
            "lead_phone": "612345678",
            "start_at": "2024-06-10T10:00:00+02:00"
        });
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/webhooks/appointment_created")
                    .header("content-type", "application/json")
                    .header("x-webhook-secret", TEST_WEBHOOK_SECRET)
                    .body(Body::from(booking.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["transition"]["from_stage_key"], "new_lead");
    }

    #[tokio::test]
    async fn staff_routes_are_mounted_under_api() {
        let config = TestConfig::default();
        let user = TestUser::staff("desk@clinic.example");
        let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, Some(1));

        let response = app(&config)
            .oneshot(
                Request::builder()
                    .uri("/api/leads/stages")
                    .header("Authorization", format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
