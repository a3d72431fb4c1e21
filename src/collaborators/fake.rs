//! In-memory collaborators for development and tests.
//!
//! Each fake records its calls and can be told to fail or stall so callers
//! can exercise timeout and failure paths.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{BrandRegistrar, CodeDelivery, NumberProvisioner};
use crate::error::CollaboratorError;
use crate::onboarding::model::{BrandDetails, CampaignDetails};
use crate::verification::model::ContactChannel;

/// Failure and latency switches shared by the fakes.
#[derive(Default)]
struct Behaviour {
    failing: AtomicBool,
    delay_ms: AtomicU64,
}

impl Behaviour {
    async fn apply(&self, collaborator: &'static str) -> Result<(), CollaboratorError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::RequestFailed {
                collaborator,
                reason: "simulated failure".into(),
            });
        }
        Ok(())
    }
}

/// Records every code it is asked to deliver.
#[derive(Default)]
pub struct FakeDelivery {
    behaviour: Behaviour,
    sent: Mutex<Vec<(ContactChannel, String)>>,
}

impl FakeDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.behaviour.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.behaviour
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Every `(contact, code)` delivered so far.
    pub fn sent(&self) -> Vec<(ContactChannel, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// The most recent code sent to `contact`.
    pub fn last_code_for(&self, contact: &ContactChannel) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|(to, _)| to == contact)
            .map(|(_, code)| code)
    }
}

#[async_trait]
impl CodeDelivery for FakeDelivery {
    async fn send(&self, contact: &ContactChannel, code: &str) -> Result<(), CollaboratorError> {
        self.behaviour.apply("delivery").await?;
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((contact.clone(), code.to_string()));
        }
        tracing::debug!(to = %contact, "Fake delivery recorded code");
        Ok(())
    }
}

/// Hands out sequential brand and campaign ids.
#[derive(Default)]
pub struct FakeRegistrar {
    behaviour: Behaviour,
    brand_calls: AtomicU64,
    campaign_calls: AtomicU64,
}

impl FakeRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.behaviour.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.behaviour
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn brand_calls(&self) -> u64 {
        self.brand_calls.load(Ordering::SeqCst)
    }

    pub fn campaign_calls(&self) -> u64 {
        self.campaign_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrandRegistrar for FakeRegistrar {
    async fn register_brand(&self, _details: &BrandDetails) -> Result<String, CollaboratorError> {
        let n = self.brand_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.behaviour.apply("registrar").await?;
        Ok(format!("BRAND-{n:04}"))
    }

    async fn register_campaign(
        &self,
        brand_id: &str,
        _details: &CampaignDetails,
    ) -> Result<String, CollaboratorError> {
        let n = self.campaign_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.behaviour.apply("registrar").await?;
        Ok(format!("{brand_id}-CMP-{n:04}"))
    }
}

/// Assigns numbers from a fixed fake range.
#[derive(Default)]
pub struct FakeNumberProvisioner {
    behaviour: Behaviour,
    calls: AtomicU64,
}

impl FakeNumberProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.behaviour.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.behaviour
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NumberProvisioner for FakeNumberProvisioner {
    async fn assign_number(&self, _campaign_id: &str) -> Result<String, CollaboratorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.behaviour.apply("provisioner").await?;
        Ok(format!("+1415555{n:04}"))
    }
}
