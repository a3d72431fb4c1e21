//! Phone number provisioning over HTTP.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::NumberProvisioner;
use super::http::JsonApi;
use crate::config::HttpEndpoint;
use crate::error::CollaboratorError;

#[derive(Serialize)]
struct NumberRequest<'a> {
    campaign_id: &'a str,
}

#[derive(Deserialize)]
struct NumberAssigned {
    phone_number: String,
}

pub struct HttpNumberProvisioner {
    api: JsonApi,
}

impl HttpNumberProvisioner {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self {
            api: JsonApi::new("provisioner", endpoint),
        }
    }
}

#[async_trait]
impl NumberProvisioner for HttpNumberProvisioner {
    async fn assign_number(&self, campaign_id: &str) -> Result<String, CollaboratorError> {
        let assigned: NumberAssigned = self
            .api
            .post("numbers", &NumberRequest { campaign_id })
            .await?;
        if !assigned.phone_number.starts_with('+') {
            return Err(CollaboratorError::InvalidResponse {
                collaborator: "provisioner",
                reason: format!("'{}' is not E.164", assigned.phone_number),
            });
        }
        Ok(assigned.phone_number)
    }
}
