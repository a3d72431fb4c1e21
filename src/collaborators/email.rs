//! Email delivery over SMTP via lettre.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use super::CodeDelivery;
use crate::config::SmtpConfig;
use crate::error::CollaboratorError;
use crate::verification::model::ContactChannel;

const COLLABORATOR: &str = "email";

/// Sends verification codes by email.
pub struct SmtpDelivery {
    config: SmtpConfig,
}

impl SmtpDelivery {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }
}

fn failed(reason: String) -> CollaboratorError {
    CollaboratorError::RequestFailed {
        collaborator: COLLABORATOR,
        reason,
    }
}

/// Build the message. Kept separate from the transport so it can be tested.
fn build_message(from: &str, to: &str, code: &str) -> Result<Message, CollaboratorError> {
    Message::builder()
        .from(
            from.parse()
                .map_err(|e| failed(format!("Invalid from address: {e}")))?,
        )
        .to(to
            .parse()
            .map_err(|e| failed(format!("Invalid to address: {e}")))?)
        .subject("Your verification code")
        .body(format!(
            "Your verification code is {code}.\n\nEnter it on the signup page to continue. \
             If you did not request this, you can ignore this email."
        ))
        .map_err(|e| failed(format!("Failed to build email: {e}")))
}

#[async_trait]
impl CodeDelivery for SmtpDelivery {
    async fn send(&self, contact: &ContactChannel, code: &str) -> Result<(), CollaboratorError> {
        let email = build_message(&self.config.from_address, &contact.value, code)?;
        let config = self.config.clone();
        let to = contact.value.clone();

        // lettre's SmtpTransport is blocking.
        tokio::task::spawn_blocking(move || {
            let creds = Credentials::new(
                config.username.clone(),
                config.password.expose_secret().to_string(),
            );
            let transport = SmtpTransport::relay(&config.host)
                .map_err(|e| failed(format!("SMTP relay error: {e}")))?
                .port(config.port)
                .credentials(creds)
                .build();

            transport
                .send(&email)
                .map_err(|e| failed(format!("SMTP send failed: {e}")))?;
            tracing::info!(to = %to, "Verification email sent");
            Ok::<(), CollaboratorError>(())
        })
        .await
        .map_err(|e| failed(format!("SMTP task panicked: {e}")))?
    }
}
