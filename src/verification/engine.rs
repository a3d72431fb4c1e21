//! Verification engine — issues codes, checks guesses, and hands verified
//! applicants to the account provisioner.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::accounts::model::{Account, VerifiedApplicant};
use crate::accounts::provisioner::AccountProvisioner;
use crate::collaborators::{CodeDelivery, with_timeout};
use crate::config::{DEFAULT_CODE_TTL, VerificationConfig};
use crate::error::{Result, SignupError};
use crate::store::{AccountStore, VerificationStore};
use crate::verification::code::{CODE_LENGTH, generate_code, is_well_formed};
use crate::verification::model::{Applicant, ContactChannel, Verification};

pub struct VerificationEngine {
    verifications: Arc<dyn VerificationStore>,
    accounts: Arc<dyn AccountStore>,
    delivery: Arc<dyn CodeDelivery>,
    provisioner: AccountProvisioner,
    config: VerificationConfig,
    code_ttl: chrono::Duration,
}

impl VerificationEngine {
    pub fn new(
        verifications: Arc<dyn VerificationStore>,
        accounts: Arc<dyn AccountStore>,
        delivery: Arc<dyn CodeDelivery>,
        config: VerificationConfig,
    ) -> Self {
        let code_ttl = chrono::Duration::from_std(config.code_ttl).unwrap_or_else(|_| {
            warn!(ttl = ?config.code_ttl, "Code TTL out of range, using default");
            chrono::Duration::seconds(DEFAULT_CODE_TTL.as_secs() as i64)
        });
        Self {
            provisioner: AccountProvisioner::new(Arc::clone(&accounts)),
            verifications,
            accounts,
            delivery,
            config,
            code_ttl,
        }
    }

    /// Validate the signup, store a fresh verification, and deliver its code.
    ///
    /// A pending verification for the same contact is replaced. If delivery
    /// fails or times out the new verification is deleted again.
    pub async fn issue(
        &self,
        applicant: &Applicant,
        contact: &ContactChannel,
        tenant_id: &str,
    ) -> Result<Verification> {
        let applicant = applicant.normalized()?;
        let contact = contact.normalized()?;

        let tenant = self
            .accounts
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| SignupError::Validation(format!("unknown tenant '{tenant_id}'")))?;
        if self.accounts.contact_registered(&tenant.id, &contact).await? {
            return Err(SignupError::Validation(format!(
                "{} is already registered",
                contact.value
            )));
        }

        let verification = Verification::new(
            tenant.id.clone(),
            contact,
            applicant,
            generate_code(),
            self.config.max_attempts,
            self.code_ttl,
        );
        if !self.verifications.upsert_verification(&verification).await? {
            return Err(SignupError::PersistenceConflict(
                "a verified signup for this contact is awaiting completion".into(),
            ));
        }

        let sent = with_timeout(
            "delivery",
            self.config.delivery_timeout,
            self.delivery.send(&verification.contact, &verification.code),
        )
        .await;
        if let Err(e) = sent {
            warn!(verification_id = %verification.id, error = %e, "Code delivery failed");
            if let Err(cleanup) = self.verifications.delete_verification(verification.id).await {
                error!(
                    verification_id = %verification.id,
                    error = %cleanup,
                    "Failed to delete undelivered verification"
                );
            }
            return Err(e.into());
        }

        info!(
            verification_id = %verification.id,
            tenant = %verification.tenant_id,
            channel = %verification.contact.kind,
            "Verification issued"
        );
        Ok(verification)
    }

    /// Check a submitted code. On a match the account is provisioned and the
    /// verification consumed, so a second check reports `NotFound`.
    pub async fn check(&self, verification_id: Uuid, submitted_code: &str) -> Result<Account> {
        let code = submitted_code.trim();
        if !is_well_formed(code) {
            return Err(SignupError::Validation(format!(
                "code must be {CODE_LENGTH} digits"
            )));
        }

        let verification = self.load(verification_id).await?;
        let now = Utc::now();
        ensure_checkable(&verification, now)?;

        let Some(attempt) = self
            .verifications
            .record_attempt(verification_id, code, now)
            .await?
        else {
            // The guarded insert matched nothing: find out what changed.
            let current = self.load(verification_id).await?;
            ensure_checkable(&current, now)?;
            return Err(SignupError::PersistenceConflict(format!(
                "verification {verification_id} changed during the check"
            )));
        };

        if !attempt.success {
            let remaining = verification
                .max_attempts
                .saturating_sub(attempt.attempt_number);
            warn!(
                verification_id = %verification_id,
                attempt = attempt.attempt_number,
                remaining,
                "Invalid verification code"
            );
            return Err(SignupError::InvalidCode {
                id: verification_id,
                remaining,
            });
        }

        info!(
            verification_id = %verification_id,
            attempt = attempt.attempt_number,
            "Verification succeeded"
        );
        self.consume(&verification).await
    }

    /// Finish a signup whose code was accepted but whose account was not
    /// created. Returns the existing account if there already is one.
    pub async fn finalize(&self, verification_id: Uuid) -> Result<Account> {
        if let Some(account) = self
            .accounts
            .get_account_by_verification(verification_id)
            .await?
        {
            self.discard(verification_id).await;
            return Ok(account);
        }

        let verification = self.load(verification_id).await?;
        if !verification.verified {
            return Err(SignupError::Validation(format!(
                "verification {verification_id} has not been confirmed"
            )));
        }
        self.consume(&verification).await
    }

    /// Delete expired, unverified verifications. Returns how many went.
    pub async fn sweep_expired(&self) -> Result<usize> {
        Ok(self
            .verifications
            .delete_expired_verifications(Utc::now())
            .await?)
    }

    async fn load(&self, id: Uuid) -> Result<Verification> {
        self.verifications
            .get_verification(id)
            .await?
            .ok_or_else(|| SignupError::not_found("verification", id))
    }

    /// Provision the account and delete the verification.
    async fn consume(&self, verification: &Verification) -> Result<Account> {
        let verified = VerifiedApplicant {
            verification_id: verification.id,
            tenant_id: verification.tenant_id.clone(),
            contact: verification.contact.clone(),
            applicant: verification.applicant.clone(),
        };

        let account = match self.provisioner.provision(&verified).await {
            Ok(account) => account,
            Err(SignupError::PersistenceConflict(reason)) => {
                // A concurrent finalize may have won the race.
                match self
                    .accounts
                    .get_account_by_verification(verification.id)
                    .await?
                {
                    Some(account) => account,
                    None => return Err(SignupError::PersistenceConflict(reason)),
                }
            }
            Err(e) => return Err(e),
        };

        self.discard(verification.id).await;
        Ok(account)
    }

    async fn discard(&self, id: Uuid) {
        if let Err(e) = self.verifications.delete_verification(id).await {
            warn!(verification_id = %id, error = %e, "Failed to delete consumed verification");
        }
    }
}

/// Reject checks against verifications that can no longer accept a guess.
/// Expiry wins over exhaustion.
fn ensure_checkable(verification: &Verification, now: chrono::DateTime<Utc>) -> Result<()> {
    if verification.verified {
        return Err(SignupError::PersistenceConflict(format!(
            "verification {} is already confirmed",
            verification.id
        )));
    }
    if verification.is_expired_at(now) {
        return Err(SignupError::Expired {
            id: verification.id,
        });
    }
    if verification.is_exhausted() {
        return Err(SignupError::AttemptsExhausted {
            id: verification.id,
            max: verification.max_attempts,
        });
    }
    Ok(())
}

/// Shortest period the sweep task will tick at.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Spawn a background task that sweeps expired verifications on an interval.
pub fn spawn_expiry_sweep(
    engine: Arc<VerificationEngine>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(MIN_SWEEP_INTERVAL));
        loop {
            ticker.tick().await;
            match engine.sweep_expired().await {
                Ok(0) => {}
                Ok(count) => info!(count, "Expired verifications swept"),
                Err(e) => warn!(error = %e, "Verification sweep failed"),
            }
        }
    })
}
