//! Integration tests for the signup → onboarding REST surface.
//!
//! Each test spins up an Axum server on a random port over an in-memory
//! database and fake collaborators, then drives the real HTTP contract.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use signup_orchestrator::accounts::model::Tenant;
use signup_orchestrator::api::{AppState, router};
use signup_orchestrator::collaborators::{Collaborators, FakeHandles};
use signup_orchestrator::config::{OnboardingConfig, VerificationConfig};
use signup_orchestrator::store::{AccountStore, LibSqlBackend};
use signup_orchestrator::verification::ContactChannel;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

const EMAIL: &str = "dana@acme.example.com";

struct TestServer {
    base: String,
    client: reqwest::Client,
    fakes: FakeHandles,
}

impl TestServer {
    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let resp = self
            .client
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn put(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let resp = self
            .client
            .put(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let resp = self
            .client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    /// Start a signup and return the verification id plus the delivered code.
    async fn signup(&self) -> (String, String) {
        let (status, body) = self
            .post(
                "/signup",
                json!({
                    "tenant_id": "acme",
                    "name": "Dana Smith",
                    "company_name": "Acme Dental",
                    "contact": {"kind": "email", "value": EMAIL},
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let id = body["verification_id"].as_str().unwrap().to_string();
        let code = self
            .fakes
            .delivery
            .last_code_for(&ContactChannel::email(EMAIL))
            .expect("code was delivered");
        (id, code)
    }
}

/// Start an Axum server on a random port.
async fn start_server() -> TestServer {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    db.upsert_tenant(&Tenant::new("acme", "Acme Hub", "ACME"))
        .await
        .unwrap();
    let (collaborators, fakes) = Collaborators::fake();
    let app = router(AppState::build(
        db,
        &collaborators,
        VerificationConfig::default(),
        OnboardingConfig::default(),
        None,
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        base: format!("http://127.0.0.1:{port}"),
        client: reqwest::Client::new(),
        fakes,
    }
}

fn wrong_code(code: &str) -> String {
    if code == "000000" { "111111" } else { "000000" }.to_string()
}

fn brand() -> Value {
    json!({
        "legal_name": "Acme Dental LLC",
        "tax_id": "12-3456789",
        "vertical": "healthcare",
        "support_email": "support@acme.example.com",
        "country": "US",
    })
}

fn campaign() -> Value {
    json!({
        "use_case": "appointment_reminders",
        "description": "Reminders for booked visits",
        "sample_messages": [
            "Your visit is tomorrow at 9am. Reply C to confirm.",
            "Acme Dental: your cleaning is booked for Friday.",
        ],
        "opt_in_description": "Patients opt in when booking online",
    })
}

#[tokio::test]
async fn signup_through_activation() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let (verification_id, code) = server.signup().await;

        let (status, created) = server
            .post(
                "/verify",
                json!({"verification_id": verification_id, "code": code}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{created}");
        assert_eq!(created["account_number"], "ACME-000001");
        let submission_id = created["submission_id"].as_str().unwrap().to_string();
        let company_id = created["company_id"].as_str().unwrap().to_string();

        // Payment arrives via the processor webhook.
        let (status, account) = server
            .post(
                &format!("/onboarding/{submission_id}/payment/session"),
                json!({"session_id": "cs_test_1"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{account}");
        assert_eq!(account["payment_status"], "pending");

        let (status, outcome) = server
            .post(
                "/webhooks/payment",
                json!({"session_id": "cs_test_1", "status": "completed", "amount": "49.99"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["outcome"], "credited");

        let (status, submission) = server
            .get(&format!("/onboarding/{company_id}/acme"))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(submission["current_step"], "brand");
        assert_eq!(submission["payment_reference"], "cs_test_1");

        let (status, branded) = server
            .post(&format!("/onboarding/{submission_id}/brand"), brand())
            .await;
        assert_eq!(status, StatusCode::OK, "{branded}");
        assert_eq!(branded["brand_id"], "BRAND-0001");

        let (status, accepted) = server
            .put(
                &format!("/onboarding/{submission_id}/step"),
                json!({
                    "step": "privacy_terms",
                    "privacy_policy_accepted": true,
                    "terms_accepted": true,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{accepted}");
        assert_eq!(accepted["current_step"], "campaign");

        let (status, campaigned) = server
            .post(&format!("/onboarding/{submission_id}/campaign"), campaign())
            .await;
        assert_eq!(status, StatusCode::OK, "{campaigned}");
        assert_eq!(campaigned["campaign_id"], "BRAND-0001-CMP-0001");

        let (status, numbered) = server
            .post(&format!("/onboarding/{submission_id}/bandwidth"), json!({}))
            .await;
        assert_eq!(status, StatusCode::OK, "{numbered}");
        assert_eq!(numbered["phone_number"], "+14155550001");
        assert_eq!(numbered["current_step"], "activation");

        let (status, done) = server
            .post(&format!("/onboarding/{submission_id}/complete"), json!({}))
            .await;
        assert_eq!(status, StatusCode::OK, "{done}");
        assert_eq!(done["current_step"], "completed");

        // A replayed webhook changes nothing.
        let (_, replay) = server
            .post(
                "/webhooks/payment",
                json!({"session_id": "cs_test_1", "status": "completed", "amount": "49.99"}),
            )
            .await;
        assert_eq!(replay["outcome"], "already_paid");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn wrong_code_reports_remaining_attempts() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let (verification_id, code) = server.signup().await;

        let (status, body) = server
            .post(
                "/verify",
                json!({"verification_id": verification_id, "code": wrong_code(&code)}),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid_code");
        assert_eq!(body["remaining_attempts"], 4);

        // The right code still works afterwards.
        let (status, _) = server
            .post(
                "/verify",
                json!({"verification_id": verification_id, "code": code}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        // And the consumed verification cannot be replayed.
        let (status, _) = server
            .post(
                "/verify",
                json!({"verification_id": verification_id, "code": code}),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn malformed_signup_is_rejected() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let (status, body) = server
            .post(
                "/signup",
                json!({
                    "tenant_id": "acme",
                    "name": "Dana Smith",
                    "company_name": "Acme Dental",
                    "contact": {"kind": "phone", "value": "555-0100"},
                }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");
        assert!(server.fakes.delivery.sent().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn campaign_before_brand_is_a_conflict() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let (verification_id, code) = server.signup().await;
        let (_, created) = server
            .post(
                "/verify",
                json!({"verification_id": verification_id, "code": code}),
            )
            .await;
        let submission_id = created["submission_id"].as_str().unwrap();

        let (status, body) = server
            .post(&format!("/onboarding/{submission_id}/campaign"), campaign())
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "prerequisite_missing");
        assert_eq!(server.fakes.registrar.campaign_calls(), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn concurrent_wrong_codes_each_count_once() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let (verification_id, code) = server.signup().await;
        let wrong = wrong_code(&code);

        let checks = (0..3).map(|_| {
            server.post(
                "/verify",
                json!({"verification_id": verification_id, "code": wrong}),
            )
        });
        let results = futures::future::join_all(checks).await;

        let mut remaining: Vec<u64> = results
            .iter()
            .map(|(status, body)| {
                assert_eq!(*status, StatusCode::UNAUTHORIZED, "{body}");
                body["remaining_attempts"].as_u64().unwrap()
            })
            .collect();
        remaining.sort_unstable();
        assert_eq!(remaining, vec![2, 3, 4]);
    })
    .await
    .expect("test timed out");
}
