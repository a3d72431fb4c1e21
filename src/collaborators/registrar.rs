//! Brand and campaign registration over HTTP.

use async_trait::async_trait;
use serde::Deserialize;

use super::BrandRegistrar;
use super::http::JsonApi;
use crate::config::HttpEndpoint;
use crate::error::CollaboratorError;
use crate::onboarding::model::{BrandDetails, CampaignDetails};

#[derive(Deserialize)]
struct BrandCreated {
    brand_id: String,
}

#[derive(Deserialize)]
struct CampaignCreated {
    campaign_id: String,
}

pub struct HttpBrandRegistrar {
    api: JsonApi,
}

impl HttpBrandRegistrar {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self {
            api: JsonApi::new("registrar", endpoint),
        }
    }
}

fn non_empty(id: String, what: &str) -> Result<String, CollaboratorError> {
    if id.trim().is_empty() {
        return Err(CollaboratorError::InvalidResponse {
            collaborator: "registrar",
            reason: format!("empty {what}"),
        });
    }
    Ok(id)
}

#[async_trait]
impl BrandRegistrar for HttpBrandRegistrar {
    async fn register_brand(&self, details: &BrandDetails) -> Result<String, CollaboratorError> {
        let created: BrandCreated = self.api.post("brands", details).await?;
        non_empty(created.brand_id, "brand_id")
    }

    async fn register_campaign(
        &self,
        brand_id: &str,
        details: &CampaignDetails,
    ) -> Result<String, CollaboratorError> {
        let created: CampaignCreated = self
            .api
            .post(&format!("brands/{brand_id}/campaigns"), details)
            .await?;
        non_empty(created.campaign_id, "campaign_id")
    }
}
