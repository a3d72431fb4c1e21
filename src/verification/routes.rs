//! REST endpoints for signup and code verification.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::accounts::model::Account;
use crate::api::AppState;
use crate::error::SignupError;
use crate::verification::model::{Applicant, ContactChannel};

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub tenant_id: String,
    pub name: String,
    pub company_name: String,
    pub contact: ContactChannel,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignupResponse {
    pub verification_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub verification_id: Uuid,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteSignupRequest {
    pub verification_id: Uuid,
}

/// Returned once a signup becomes an account.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountCreated {
    pub account_id: Uuid,
    pub account_number: String,
    pub company_id: Uuid,
    pub submission_id: Uuid,
}

/// POST /signup
async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, SignupError> {
    let applicant = Applicant::new(req.name, req.company_name);
    let verification = state
        .engine
        .issue(&applicant, &req.contact, &req.tenant_id)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            verification_id: verification.id,
            expires_at: verification.expires_at,
        }),
    ))
}

/// POST /verify
async fn verify(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<AccountCreated>, SignupError> {
    let account = state.engine.check(req.verification_id, &req.code).await?;
    open_onboarding(&state, account).await
}

/// POST /complete-signup
///
/// Finishes a signup whose code was accepted but whose account creation
/// failed. Safe to repeat.
async fn complete_signup(
    State(state): State<AppState>,
    Json(req): Json<CompleteSignupRequest>,
) -> Result<Json<AccountCreated>, SignupError> {
    let account = state.engine.finalize(req.verification_id).await?;
    open_onboarding(&state, account).await
}

async fn open_onboarding(
    state: &AppState,
    account: Account,
) -> Result<Json<AccountCreated>, SignupError> {
    let submission = state.orchestrator.open(&account).await?;
    Ok(Json(AccountCreated {
        account_id: account.id,
        account_number: account.account_number,
        company_id: account.company_id,
        submission_id: submission.id,
    }))
}

/// Build the signup routes.
pub fn verification_routes(state: AppState) -> Router {
    Router::new()
        .route("/signup", post(signup))
        .route("/verify", post(verify))
        .route("/complete-signup", post(complete_signup))
        .with_state(state)
}
