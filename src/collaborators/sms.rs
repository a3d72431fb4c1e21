//! SMS delivery through an HTTP gateway.

use async_trait::async_trait;
use serde::Serialize;

use super::CodeDelivery;
use super::http::JsonApi;
use crate::config::HttpEndpoint;
use crate::error::CollaboratorError;
use crate::verification::model::ContactChannel;

#[derive(Serialize)]
struct OutboundSms<'a> {
    to: &'a str,
    body: String,
}

/// Sends verification codes as text messages.
pub struct SmsGatewayDelivery {
    api: JsonApi,
}

impl SmsGatewayDelivery {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self {
            api: JsonApi::new("sms", endpoint),
        }
    }
}

#[async_trait]
impl CodeDelivery for SmsGatewayDelivery {
    async fn send(&self, contact: &ContactChannel, code: &str) -> Result<(), CollaboratorError> {
        let message = OutboundSms {
            to: &contact.value,
            body: format!("Your verification code is {code}"),
        };
        self.api
            .post::<_, serde_json::Value>("messages", &message)
            .await?;
        tracing::info!(to = %contact.value, "Verification SMS sent");
        Ok(())
    }
}
