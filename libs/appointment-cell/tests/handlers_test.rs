use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use appointment_cell::router::{appointment_routes, appointment_webhook_routes};
use appointment_cell::services::DisabledCalendarExporter;
use appointment_cell::store::InMemorySchedulingStore;
use appointment_cell::AppointmentCellState;
use lead_cell::models::LeadStatus;
use lead_cell::store::InMemoryLeadStore;
use lead_cell::LeadCellState;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser, TEST_WEBHOOK_SECRET};

struct TestApp {
    config: TestConfig,
    lead_store: Arc<InMemoryLeadStore>,
    store: Arc<InMemorySchedulingStore>,
    state: AppointmentCellState,
}

fn test_app(config: TestConfig) -> TestApp {
    let app_config = config.to_arc();
    let lead_store = Arc::new(InMemoryLeadStore::new());
    let leads = LeadCellState::new(app_config.clone(), lead_store.clone(), lead_store.clone());
    let store = Arc::new(InMemorySchedulingStore::new());
    let state = AppointmentCellState::new(app_config, store.clone(), &leads, Arc::new(DisabledCalendarExporter));

    TestApp { config, lead_store, store, state }
}

fn webhooks(app: &TestApp) -> Router {
    appointment_webhook_routes(app.state.clone())
}

fn staff(app: &TestApp) -> Router {
    appointment_routes(app.state.clone())
}

fn post_webhook(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/appointment_created")
        .header("content-type", "application/json")
        .header("x-webhook-secret", TEST_WEBHOOK_SECRET)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

// ==============================================================================
// WEBHOOK
// ==============================================================================

#[tokio::test]
async fn appointment_created_books_and_schedules_visit() {
    let app = test_app(TestConfig::default());
    let clinic_id = Uuid::new_v4();
    let body = json!({
        "clinic_id": clinic_id,
        "lead_name": "Lucia Perez",
        "lead_phone": "612 345 678",
        "start_at": "2024-06-10T10:00:00+02:00",
        "source_channel": "whatsapp_ai"
    });

    let response = webhooks(&app).oneshot(post_webhook(&body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["ok"], true);
    assert_eq!(json["appointment"]["start_at"], "2024-06-10T08:00:00Z");
    assert_eq!(json["appointment"]["end_at"], "2024-06-10T08:30:00Z");
    assert_eq!(json["appointment"]["source_channel"], "whatsapp_ai");
    assert_eq!(json["appointment"]["created_by"], "agent");
    assert_eq!(json["transition"]["stage_key"], "visit_scheduled");
    assert_eq!(json["transition"]["status"], "visit_scheduled");

    let lead_id: Uuid = json["appointment"]["lead_id"].as_str().unwrap().parse().unwrap();
    let lead = app.lead_store.lead(lead_id).await.unwrap();
    assert_eq!(lead.status, LeadStatus::VisitScheduled);
    let history = app.lead_store.history_for(lead_id).await;
    assert_eq!(history[0].actor_type.as_str(), "whatsapp");
}

#[tokio::test]
async fn appointment_created_without_secret_is_unauthorized() {
    let app = test_app(TestConfig::default());
    let body = json!({ "clinic_id": Uuid::new_v4(), "start_at": "2024-06-10T10:00:00+02:00" });

    let response = webhooks(&app)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/appointment_created")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn saturday_slot_is_a_validation_error() {
    let app = test_app(TestConfig::default().with_default_clinic(Uuid::new_v4()));
    let body = json!({
        "lead_name": "Lucia Perez",
        "lead_phone": "612345678",
        "start_at": "2024-06-08T10:00:00+02:00"
    });

    let response = webhooks(&app).oneshot(post_webhook(&body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = read_json(response).await;
    assert_eq!(json["error"], "Only Monday to Friday can be booked.");
}

#[tokio::test]
async fn missing_lead_identity_is_a_validation_error() {
    let app = test_app(TestConfig::default().with_default_clinic(Uuid::new_v4()));
    let body = json!({ "lead_phone": "612345678", "start_at": "2024-06-10T10:00:00+02:00" });

    let response = webhooks(&app).oneshot(post_webhook(&body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn occupied_slot_is_a_conflict() {
    let clinic_id = Uuid::new_v4();
    let app = test_app(TestConfig::default().with_default_clinic(clinic_id));
    let first = json!({
        "lead_name": "Lucia Perez",
        "lead_phone": "612345678",
        "start_at": "2024-06-10T10:00:00+02:00"
    });
    let second = json!({
        "lead_name": "Pablo Ruiz",
        "lead_phone": "655444333",
        "start_at": "2024-06-10T10:00:00+02:00",
        "end_at": "2024-06-10T10:30:00+02:00"
    });

    let response = webhooks(&app).oneshot(post_webhook(&first)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = webhooks(&app).oneshot(post_webhook(&second)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = read_json(response).await;
    assert_eq!(json["error"], "That slot is already occupied by another appointment.");

    assert_eq!(app.store.scheduled_appointments(clinic_id).await.len(), 1);
}

// ==============================================================================
// STAFF ROUTES
// ==============================================================================

#[tokio::test]
async fn staff_booking_requires_token() {
    let app = test_app(TestConfig::default());
    let body = json!({ "lead_name": "Lucia Perez", "lead_phone": "612345678", "start_at": "2024-06-10T10:00:00+02:00" });

    let response = staff(&app)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/appointments")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn staff_booking_then_availability_reports_conflict() {
    let app = test_app(TestConfig::default());
    let user = TestUser::staff("desk@clinic.example");
    let token = JwtTestUtils::create_test_token(&user, &app.config.jwt_secret, Some(1));
    let body = json!({ "lead_name": "Lucia Perez", "lead_phone": "612345678", "start_at": "2024-06-10T10:00:00+02:00" });

    let response = staff(&app)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/appointments")
                .header("content-type", "application/json")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["appointment"]["clinic_id"], user.clinic_id.to_string());
    assert_eq!(json["appointment"]["created_by"], "staff");

    let response = staff(&app)
        .oneshot(
            Request::builder()
                .uri("/availability?start_at=2024-06-10T10%3A00%3A00%2B02%3A00")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["available"], false);
    assert_eq!(json["conflict"], "appointment");

    let response = staff(&app)
        .oneshot(
            Request::builder()
                .uri("/availability?start_at=2024-06-10T10%3A30%3A00%2B02%3A00")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = read_json(response).await;
    assert_eq!(json["available"], true);
    assert!(json["conflict"].is_null());
}

#[tokio::test]
async fn staff_busy_block_then_reschedule_into_it_conflicts() {
    let app = test_app(TestConfig::default());
    let user = TestUser::staff("desk@clinic.example");
    let token = JwtTestUtils::create_test_token(&user, &app.config.jwt_secret, Some(1));

    let block = json!({
        "start_at": "2024-06-11T09:00:00+02:00",
        "end_at": "2024-06-11T11:00:00+02:00",
        "reason": "Sterilisation"
    });
    let response = staff(&app)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/busy-blocks")
                .header("content-type", "application/json")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::from(block.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["busy_block"]["created_by_user_id"], user.id);

    let booking = json!({ "lead_name": "Lucia Perez", "lead_phone": "612345678", "start_at": "2024-06-11T12:00:00+02:00" });
    let response = staff(&app)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/appointments")
                .header("content-type", "application/json")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::from(booking.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let appointment_id = read_json(response).await["appointment"]["id"].as_str().unwrap().to_string();

    let reschedule = json!({ "start_at": "2024-06-11T10:30:00+02:00" });
    let response = staff(&app)
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(format!("/appointments/{}/reschedule", appointment_id))
                .header("content-type", "application/json")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::from(reschedule.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = read_json(response).await;
    assert_eq!(json["error"], "That slot coincides with an internal block.");
}
