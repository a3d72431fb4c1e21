//! REST endpoints for the onboarding workflow and the payment webhook.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::model::{BrandDetails, CampaignDetails, StepData, Submission};
use crate::accounts::model::Account;
use crate::api::AppState;
use crate::collaborators::payment::PaymentEvent;
use crate::error::SignupError;

/// Header carrying the shared webhook secret.
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub processor_reference: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentSessionRequest {
    pub session_id: String,
}

type SubmissionResult = Result<Json<Submission>, SignupError>;

/// GET /onboarding/{company_id}/{tenant_id}
async fn get_submission(
    State(state): State<AppState>,
    Path((company_id, tenant_id)): Path<(Uuid, String)>,
) -> SubmissionResult {
    Ok(Json(state.orchestrator.get(company_id, &tenant_id).await?))
}

/// PUT /onboarding/{submission_id}/step
async fn save_step(
    State(state): State<AppState>,
    Path(submission_id): Path<Uuid>,
    Json(data): Json<StepData>,
) -> SubmissionResult {
    Ok(Json(state.orchestrator.save_step_data(submission_id, data).await?))
}

/// POST /onboarding/{submission_id}/payment
async fn record_payment(
    State(state): State<AppState>,
    Path(submission_id): Path<Uuid>,
    Json(req): Json<PaymentRequest>,
) -> SubmissionResult {
    Ok(Json(
        state
            .orchestrator
            .record_payment(submission_id, &req.processor_reference)
            .await?,
    ))
}

/// POST /onboarding/{submission_id}/payment/session
async fn attach_payment_session(
    State(state): State<AppState>,
    Path(submission_id): Path<Uuid>,
    Json(req): Json<PaymentSessionRequest>,
) -> Result<Json<Account>, SignupError> {
    Ok(Json(
        state
            .orchestrator
            .attach_payment_session(submission_id, &req.session_id)
            .await?,
    ))
}

/// POST /onboarding/{submission_id}/brand
async fn register_brand(
    State(state): State<AppState>,
    Path(submission_id): Path<Uuid>,
    Json(details): Json<BrandDetails>,
) -> SubmissionResult {
    Ok(Json(state.orchestrator.register_brand(submission_id, details).await?))
}

/// POST /onboarding/{submission_id}/campaign
async fn register_campaign(
    State(state): State<AppState>,
    Path(submission_id): Path<Uuid>,
    Json(details): Json<CampaignDetails>,
) -> SubmissionResult {
    Ok(Json(state.orchestrator.register_campaign(submission_id, details).await?))
}

/// POST /onboarding/{submission_id}/bandwidth
async fn assign_phone_number(
    State(state): State<AppState>,
    Path(submission_id): Path<Uuid>,
) -> SubmissionResult {
    Ok(Json(state.orchestrator.assign_phone_number(submission_id).await?))
}

/// POST /onboarding/{submission_id}/complete
async fn complete(
    State(state): State<AppState>,
    Path(submission_id): Path<Uuid>,
) -> SubmissionResult {
    Ok(Json(state.orchestrator.complete(submission_id).await?))
}

/// POST /webhooks/payment
async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(event): Json<PaymentEvent>,
) -> Response {
    if let Some(expected) = &state.webhook_secret {
        let presented = headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if !secret_matches(expected, presented) {
            tracing::warn!(session_id = %event.session_id, "Payment webhook with bad secret");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "unauthorized", "message": "invalid webhook secret"})),
            )
                .into_response();
        }
    }

    match state.orchestrator.handle_payment_event(&event).await {
        Ok(outcome) => Json(json!({"outcome": outcome})).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Compare the presented webhook secret without short-circuiting on the
/// first differing byte.
fn secret_matches(expected: &SecretString, presented: Option<&str>) -> bool {
    presented.is_some_and(|presented| {
        presented
            .as_bytes()
            .ct_eq(expected.expose_secret().as_bytes())
            .into()
    })
}

/// Build the onboarding REST routes.
pub fn onboarding_routes(state: AppState) -> Router {
    Router::new()
        .route("/onboarding/{id}/{tenant_id}", get(get_submission))
        .route("/onboarding/{id}/step", put(save_step))
        .route("/onboarding/{id}/payment", post(record_payment))
        .route(
            "/onboarding/{id}/payment/session",
            post(attach_payment_session),
        )
        .route("/onboarding/{id}/brand", post(register_brand))
        .route("/onboarding/{id}/campaign", post(register_campaign))
        .route("/onboarding/{id}/bandwidth", post(assign_phone_number))
        .route("/onboarding/{id}/complete", post(complete))
        .route("/webhooks/payment", post(payment_webhook))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_secret_must_match_exactly() {
        let expected = SecretString::from("s3cret");
        assert!(secret_matches(&expected, Some("s3cret")));
        assert!(!secret_matches(&expected, Some("s3cre")));
        assert!(!secret_matches(&expected, Some("s3cret!")));
        assert!(!secret_matches(&expected, Some("S3CRET")));
        assert!(!secret_matches(&expected, None));
    }
}
