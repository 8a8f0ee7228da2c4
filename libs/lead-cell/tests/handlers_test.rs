use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use lead_cell::models::{LeadCreatedPayload, LeadStatus};
use lead_cell::router::{lead_routes, lead_webhook_routes};
use lead_cell::store::InMemoryLeadStore;
use lead_cell::LeadCellState;
use shared_models::context::ClinicContext;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser, TEST_WEBHOOK_SECRET};

struct TestApp {
    config: TestConfig,
    store: Arc<InMemoryLeadStore>,
    state: LeadCellState,
}

fn test_app(config: TestConfig) -> TestApp {
    let store = Arc::new(InMemoryLeadStore::new());
    let state = LeadCellState::new(config.to_arc(), store.clone(), store.clone());
    TestApp { config, store, state }
}

fn webhooks(app: &TestApp) -> Router {
    lead_webhook_routes(app.state.clone())
}

fn staff(app: &TestApp) -> Router {
    lead_routes(app.state.clone())
}

fn json_request(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
}

async fn read_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn seed_lead(app: &TestApp, clinic_id: Uuid) -> Uuid {
    app.state
        .intake
        .handle_lead_created(
            &ClinicContext::new(clinic_id),
            &LeadCreatedPayload {
                clinic_id: None,
                lead_id: None,
                full_name: Some("Marta Gil".to_string()),
                phone: Some("699111222".to_string()),
                treatment: None,
                source: None,
            },
        )
        .await
        .unwrap()
        .id
}

// ==============================================================================
// WEBHOOKS
// ==============================================================================

#[tokio::test]
async fn webhook_without_secret_is_unauthorized() {
    let app = test_app(TestConfig::default());
    let body = json!({ "clinic_id": Uuid::new_v4(), "call_id": "call-1" });

    let response = webhooks(&app)
        .oneshot(
            json_request("POST", "/call_started")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = read_json(response).await;
    assert_eq!(json["error"], "Unauthorized");
}

#[tokio::test]
async fn webhook_with_wrong_secret_is_unauthorized() {
    let app = test_app(TestConfig::default());
    let body = json!({ "clinic_id": Uuid::new_v4(), "call_id": "call-1" });

    let response = webhooks(&app)
        .oneshot(
            json_request("POST", "/call_started")
                .header("x-webhook-secret", "not-the-secret")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn call_started_moves_lead_into_first_call() {
    let app = test_app(TestConfig::default());
    let clinic_id = Uuid::new_v4();
    let lead_id = seed_lead(&app, clinic_id).await;
    let body = json!({ "clinic_id": clinic_id, "call_id": "call-77", "lead_id": lead_id });

    let response = webhooks(&app)
        .oneshot(
            json_request("POST", "/call_started")
                .header("x-webhook-secret", TEST_WEBHOOK_SECRET)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["ok"], true);
    assert_eq!(json["transition"]["stage_key"], "first_call_in_progress");
    assert_eq!(json["transition"]["status"], "call_done");

    let lead = app.store.lead(lead_id).await.unwrap();
    assert_eq!(lead.status, LeadStatus::CallDone);
}

#[tokio::test]
async fn call_started_without_call_id_is_bad_request() {
    let app = test_app(TestConfig::default());
    let body = json!({ "clinic_id": Uuid::new_v4() });

    let response = webhooks(&app)
        .oneshot(
            json_request("POST", "/call_started")
                .header("x-webhook-secret", TEST_WEBHOOK_SECRET)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = read_json(response).await;
    assert_eq!(json["error"], "call_id is required");
}

#[tokio::test]
async fn webhook_without_resolvable_clinic_is_rejected() {
    let app = test_app(TestConfig::default());
    let body = json!({ "call_id": "call-1" });

    let response = webhooks(&app)
        .oneshot(
            json_request("POST", "/call_ended")
                .header("x-webhook-secret", TEST_WEBHOOK_SECRET)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn lead_created_uses_configured_default_clinic() {
    let default_clinic = Uuid::new_v4();
    let app = test_app(TestConfig::default().with_default_clinic(default_clinic));
    let body = json!({ "full_name": "Pablo Ruiz", "phone": "+34 655 444 333" });

    let response = webhooks(&app)
        .oneshot(
            json_request("POST", "/lead_created")
                .header("x-webhook-secret", TEST_WEBHOOK_SECRET)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["lead"]["clinic_id"], default_clinic.to_string());
    assert_eq!(json["lead"]["phone"], "+34655444333");
    assert_eq!(json["lead"]["stage_key"], "new_lead");
    assert_eq!(json["lead"]["status"], "new");
}

// ==============================================================================
// STAFF ROUTES
// ==============================================================================

#[tokio::test]
async fn staff_routes_require_bearer_token() {
    let app = test_app(TestConfig::default());
    let body = json!({ "to_stage_key": "discarded" });

    let response = staff(&app)
        .oneshot(
            json_request("POST", &format!("/{}/stage", Uuid::new_v4()))
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn staff_transition_uses_clinic_from_token() {
    let app = test_app(TestConfig::default());
    let user = TestUser::staff("desk@clinic.example");
    let lead_id = seed_lead(&app, user.clinic_id).await;
    let token = JwtTestUtils::create_test_token(&user, &app.config.jwt_secret, Some(1));
    let body = json!({ "to_stage_key": "whatsapp_conversation_active", "reason": "Replied on WhatsApp" });

    let response = staff(&app)
        .oneshot(
            json_request("POST", &format!("/{}/stage", lead_id))
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["transition"]["mode"], "atomic");
    assert_eq!(json["transition"]["status"], "contacted");

    let history = app.store.history_for(lead_id).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].actor_id.as_deref(), Some(user.id.as_str()));
    assert_eq!(history[0].reason.as_deref(), Some("Replied on WhatsApp"));
}

#[tokio::test]
async fn negative_outcome_value_is_a_validation_error() {
    let app = test_app(TestConfig::default());
    let user = TestUser::staff("desk@clinic.example");
    let lead_id = seed_lead(&app, user.clinic_id).await;
    let token = JwtTestUtils::create_test_token(&user, &app.config.jwt_secret, Some(1));
    let body = json!({
        "to_stage_key": "client_closed",
        "converted_value_eur": -5,
        "converted_service_name": "Implante"
    });

    let response = staff(&app)
        .oneshot(
            json_request("POST", &format!("/{}/outcome", lead_id))
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = read_json(response).await;
    assert_eq!(json["error"], "converted_value_eur must be a non-negative number");
}

#[tokio::test]
async fn history_lists_transitions_in_order() {
    let app = test_app(TestConfig::default());
    let user = TestUser::staff("desk@clinic.example");
    let lead_id = seed_lead(&app, user.clinic_id).await;
    let token = JwtTestUtils::create_test_token(&user, &app.config.jwt_secret, Some(1));

    for stage in ["contacting_whatsapp", "whatsapp_conversation_active"] {
        let body = json!({ "to_stage_key": stage });
        let response = staff(&app)
            .oneshot(
                json_request("POST", &format!("/{}/stage", lead_id))
                    .header("Authorization", format!("Bearer {}", token))
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = staff(&app)
        .oneshot(
            Request::builder()
                .uri(format!("/{}/history", lead_id))
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    let history = json["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["to_stage_key"], "contacting_whatsapp");
    assert_eq!(history[1]["from_stage_key"], "contacting_whatsapp");
}

#[tokio::test]
async fn stage_catalog_reports_degraded_mode() {
    let app = test_app(TestConfig::default());
    app.store.set_catalog_available(false);
    let user = TestUser::staff("desk@clinic.example");
    let token = JwtTestUtils::create_test_token(&user, &app.config.jwt_secret, Some(1));

    let response = staff(&app)
        .oneshot(
            Request::builder()
                .uri("/stages")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["degraded"], true);
    assert_eq!(json["stages"].as_array().unwrap().len(), 17);
    assert_eq!(json["stages"][0]["label_es"], "New lead");
}
