//! External collaborators — code delivery, brand/campaign registration, and
//! phone number provisioning.
//!
//! Each collaborator is a trait so the engine and orchestrator never see a
//! concrete transport. Live adapters talk SMTP or HTTP JSON; the fakes in
//! [`fake`] are selected with `COLLABORATOR_MODE=fake`.

pub mod email;
pub mod fake;
pub mod http;
pub mod payment;
pub mod provisioner;
pub mod registrar;
pub mod sms;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{CollaboratorMode, ServiceConfig};
use crate::error::{CollaboratorError, ConfigError};
use crate::onboarding::model::{BrandDetails, CampaignDetails};
use crate::verification::model::{ContactChannel, ContactKind};

pub use email::SmtpDelivery;
pub use fake::{FakeDelivery, FakeNumberProvisioner, FakeRegistrar};
pub use payment::{PaymentEvent, PaymentEventStatus};
pub use provisioner::HttpNumberProvisioner;
pub use registrar::HttpBrandRegistrar;
pub use sms::SmsGatewayDelivery;

/// Sends a verification code to a contact channel.
#[async_trait]
pub trait CodeDelivery: Send + Sync {
    /// Deliver `code` to `contact`.
    async fn send(&self, contact: &ContactChannel, code: &str) -> Result<(), CollaboratorError>;
}

/// Registers brands and campaigns with the messaging registry.
#[async_trait]
pub trait BrandRegistrar: Send + Sync {
    /// Returns the registrar's brand id.
    async fn register_brand(&self, details: &BrandDetails) -> Result<String, CollaboratorError>;

    /// Returns the registrar's campaign id.
    async fn register_campaign(
        &self,
        brand_id: &str,
        details: &CampaignDetails,
    ) -> Result<String, CollaboratorError>;
}

/// Assigns phone numbers to approved campaigns.
#[async_trait]
pub trait NumberProvisioner: Send + Sync {
    /// Returns the assigned number in E.164.
    async fn assign_number(&self, campaign_id: &str) -> Result<String, CollaboratorError>;
}

/// Run a collaborator call with an upper bound on its duration.
pub async fn with_timeout<T, F>(
    collaborator: &'static str,
    timeout: Duration,
    call: F,
) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout {
            collaborator,
            timeout,
        }),
    }
}

/// Routes codes to the email or SMS transport by contact kind.
pub struct RoutedDelivery {
    email: Arc<dyn CodeDelivery>,
    sms: Arc<dyn CodeDelivery>,
}

impl RoutedDelivery {
    pub fn new(email: Arc<dyn CodeDelivery>, sms: Arc<dyn CodeDelivery>) -> Self {
        Self { email, sms }
    }
}

#[async_trait]
impl CodeDelivery for RoutedDelivery {
    async fn send(&self, contact: &ContactChannel, code: &str) -> Result<(), CollaboratorError> {
        match contact.kind {
            ContactKind::Email => self.email.send(contact, code).await,
            ContactKind::Phone => self.sms.send(contact, code).await,
        }
    }
}

/// The wired set of collaborators the service runs with.
#[derive(Clone)]
pub struct Collaborators {
    pub delivery: Arc<dyn CodeDelivery>,
    pub registrar: Arc<dyn BrandRegistrar>,
    pub provisioner: Arc<dyn NumberProvisioner>,
}

impl Collaborators {
    /// Build live adapters or fakes according to `config.mode`.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ConfigError> {
        match config.mode {
            CollaboratorMode::Fake => Ok(Self::fake().0),
            CollaboratorMode::Live => {
                let smtp = config
                    .smtp
                    .clone()
                    .ok_or_else(|| ConfigError::MissingEnvVar("SMTP_HOST".into()))?;
                let sms = config
                    .sms
                    .clone()
                    .ok_or_else(|| ConfigError::MissingEnvVar("SMS_API_URL".into()))?;
                let registrar = config
                    .registrar
                    .clone()
                    .ok_or_else(|| ConfigError::MissingEnvVar("REGISTRAR_API_URL".into()))?;
                let provisioner = config
                    .provisioner
                    .clone()
                    .ok_or_else(|| ConfigError::MissingEnvVar("PROVISIONER_API_URL".into()))?;

                Ok(Self {
                    delivery: Arc::new(RoutedDelivery::new(
                        Arc::new(SmtpDelivery::new(smtp)),
                        Arc::new(SmsGatewayDelivery::new(sms)),
                    )),
                    registrar: Arc::new(HttpBrandRegistrar::new(registrar)),
                    provisioner: Arc::new(HttpNumberProvisioner::new(provisioner)),
                })
            }
        }
    }

    /// Fakes for every collaborator, plus handles to inspect and steer them.
    pub fn fake() -> (Self, FakeHandles) {
        let delivery = Arc::new(FakeDelivery::new());
        let registrar = Arc::new(FakeRegistrar::new());
        let provisioner = Arc::new(FakeNumberProvisioner::new());
        let collaborators = Self {
            delivery: delivery.clone(),
            registrar: registrar.clone(),
            provisioner: provisioner.clone(),
        };
        (
            collaborators,
            FakeHandles {
                delivery,
                registrar,
                provisioner,
            },
        )
    }
}

/// Concrete handles onto the fakes inside a [`Collaborators::fake`] set.
#[derive(Clone)]
pub struct FakeHandles {
    pub delivery: Arc<FakeDelivery>,
    pub registrar: Arc<FakeRegistrar>,
    pub provisioner: Arc<FakeNumberProvisioner>,
}
