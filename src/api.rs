//! HTTP surface — shared state, the combined router, and the error → status
//! mapping.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use secrecy::SecretString;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::collaborators::Collaborators;
use crate::config::{OnboardingConfig, VerificationConfig};
use crate::error::SignupError;
use crate::onboarding::orchestrator::OnboardingOrchestrator;
use crate::onboarding::routes::onboarding_routes;
use crate::store::Database;
use crate::verification::engine::VerificationEngine;
use crate::verification::routes::verification_routes;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<VerificationEngine>,
    pub orchestrator: Arc<OnboardingOrchestrator>,
    /// Expected `X-Webhook-Secret` on payment webhooks, when set.
    pub webhook_secret: Option<Arc<SecretString>>,
}

impl AppState {
    /// Wire the engine and orchestrator over one database and collaborator set.
    pub fn build<D: Database + 'static>(
        db: Arc<D>,
        collaborators: &Collaborators,
        verification: VerificationConfig,
        onboarding: OnboardingConfig,
        webhook_secret: Option<SecretString>,
    ) -> Self {
        let engine = VerificationEngine::new(
            db.clone(),
            db.clone(),
            Arc::clone(&collaborators.delivery),
            verification,
        );
        let orchestrator = OnboardingOrchestrator::new(
            db.clone(),
            db,
            Arc::clone(&collaborators.registrar),
            Arc::clone(&collaborators.provisioner),
            onboarding,
        );
        Self {
            engine: Arc::new(engine),
            orchestrator: Arc::new(orchestrator),
            webhook_secret: webhook_secret.map(Arc::new),
        }
    }
}

/// Build the full service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(verification_routes(state.clone()))
        .merge(onboarding_routes(state))
        .layer(CorsLayer::permissive())
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

impl SignupError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Expired { .. } => StatusCode::GONE,
            Self::AttemptsExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidCode { .. } => StatusCode::UNAUTHORIZED,
            Self::PrerequisiteMissing { .. } | Self::PersistenceConflict(_) => StatusCode::CONFLICT,
            Self::CollaboratorFailure(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SignupError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        // Store details stay in the log.
        let message = match &self {
            Self::Database(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        let mut body = json!({"error": self.code(), "message": message});
        if let Self::InvalidCode { remaining, .. } = &self {
            body["remaining_attempts"] = json!(remaining);
        }
        (status, Json(body)).into_response()
    }
}
