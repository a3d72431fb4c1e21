//! Shared JSON-over-HTTP client for the SMS gateway, registrar, and number
//! provisioner.

use secrecy::ExposeSecret;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::HttpEndpoint;
use crate::error::CollaboratorError;

/// A bearer-authenticated JSON API at a fixed base URL.
pub struct JsonApi {
    collaborator: &'static str,
    client: reqwest::Client,
    endpoint: HttpEndpoint,
}

impl JsonApi {
    pub fn new(collaborator: &'static str, endpoint: HttpEndpoint) -> Self {
        Self {
            collaborator,
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint.base_url, path.trim_start_matches('/'))
    }

    /// POST `body` as JSON and decode the JSON response.
    ///
    /// Non-2xx responses become [`CollaboratorError::Rejected`] carrying the
    /// response text.
    pub async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, CollaboratorError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let resp = self
            .client
            .post(self.url(path))
            .bearer_auth(self.endpoint.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| CollaboratorError::RequestFailed {
                collaborator: self.collaborator,
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let reason = resp.text().await.unwrap_or_default();
            tracing::warn!(
                collaborator = self.collaborator,
                status = status.as_u16(),
                "Collaborator rejected request"
            );
            return Err(CollaboratorError::Rejected {
                collaborator: self.collaborator,
                status: status.as_u16(),
                reason,
            });
        }

        resp.json::<R>()
            .await
            .map_err(|e| CollaboratorError::InvalidResponse {
                collaborator: self.collaborator,
                reason: e.to_string(),
            })
    }
}
