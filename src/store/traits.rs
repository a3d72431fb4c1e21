//! Persistence traits — one async interface per owning component.
//!
//! Every cross-field invariant (attempt log vs. counter, step vs. correlator)
//! is enforced inside a single statement by the backend. Methods that can
//! lose a race return `bool` (or `Option`) instead of erroring so callers can
//! report the precise outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::accounts::model::{Account, Identity, Tenant};
use crate::error::DatabaseError;
use crate::onboarding::model::{CampaignNumber, StepCorrelator, StepDataMap, Submission};
use crate::onboarding::state::OnboardingStep;
use crate::verification::model::{
    ContactChannel, RecordedAttempt, Verification, VerificationAttempt,
};

/// Pending verifications and their attempt audit trail.
#[async_trait]
pub trait VerificationStore: Send + Sync {
    /// Insert a verification, replacing any unverified one for the same
    /// (tenant, contact). Returns `false` if a verified record for that pair
    /// is still waiting to be consumed.
    async fn upsert_verification(&self, verification: &Verification)
    -> Result<bool, DatabaseError>;

    /// Get a verification by ID.
    async fn get_verification(&self, id: Uuid) -> Result<Option<Verification>, DatabaseError>;

    /// Append an attempt and bump the counter in one atomic statement.
    ///
    /// Succeeds only while the verification is unverified, unexpired at `now`
    /// and below its attempt cap; returns `None` otherwise. A matching code
    /// marks the verification verified in the same statement.
    async fn record_attempt(
        &self,
        id: Uuid,
        submitted_code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RecordedAttempt>, DatabaseError>;

    /// List attempts for a verification, oldest first.
    async fn list_attempts(&self, id: Uuid) -> Result<Vec<VerificationAttempt>, DatabaseError>;

    /// Delete a verification and its attempts. Returns whether it existed.
    async fn delete_verification(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// Delete unverified verifications that expired before `now`.
    /// Returns the number deleted.
    async fn delete_expired_verifications(&self, now: DateTime<Utc>)
    -> Result<usize, DatabaseError>;
}

/// Tenants, identities, and profiles.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert or update a tenant.
    async fn upsert_tenant(&self, tenant: &Tenant) -> Result<(), DatabaseError>;

    /// Get a tenant by ID.
    async fn get_tenant(&self, id: &str) -> Result<Option<Tenant>, DatabaseError>;

    /// Whether an identity already owns this contact within the tenant.
    async fn contact_registered(
        &self,
        tenant_id: &str,
        contact: &ContactChannel,
    ) -> Result<bool, DatabaseError>;

    /// Atomically allocate the next account sequence value for a tenant.
    async fn next_account_number(&self, tenant_id: &str) -> Result<i64, DatabaseError>;

    async fn create_identity(&self, identity: &Identity) -> Result<(), DatabaseError>;

    async fn get_identity(&self, id: Uuid) -> Result<Option<Identity>, DatabaseError>;

    /// Delete an identity. Returns whether it existed.
    async fn delete_identity(&self, id: Uuid) -> Result<bool, DatabaseError>;

    async fn create_profile(&self, account: &Account) -> Result<(), DatabaseError>;

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, DatabaseError>;

    /// Find the account created from a verification.
    async fn get_account_by_verification(
        &self,
        verification_id: Uuid,
    ) -> Result<Option<Account>, DatabaseError>;

    /// Mirror the onboarding step onto the profile.
    async fn set_onboarding_step(
        &self,
        account_id: Uuid,
        step: OnboardingStep,
    ) -> Result<(), DatabaseError>;

    /// Attach a processor checkout session to an unpaid account.
    /// Returns `false` if the account is already paid.
    async fn attach_payment_session(
        &self,
        account_id: Uuid,
        session_id: &str,
    ) -> Result<bool, DatabaseError>;

    async fn find_account_by_payment_session(
        &self,
        session_id: &str,
    ) -> Result<Option<Account>, DatabaseError>;

    /// Mark an account paid if it is not already.
    /// Returns `true` only for the call that performed the transition.
    async fn mark_payment_paid(
        &self,
        account_id: Uuid,
        reference: &str,
        amount: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;
}

/// Onboarding submissions and their step payloads.
#[async_trait]
pub trait OnboardingStore: Send + Sync {
    /// Insert a submission unless one exists for the company; returns the
    /// stored row either way.
    async fn create_submission(&self, submission: &Submission) -> Result<Submission, DatabaseError>;

    async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>, DatabaseError>;

    async fn get_submission_by_company(
        &self,
        company_id: Uuid,
        tenant_id: &str,
    ) -> Result<Option<Submission>, DatabaseError>;

    /// Replace the step-data map, optionally advancing the step, if the row
    /// is still at `expected_version`.
    async fn save_step_data(
        &self,
        id: Uuid,
        expected_version: i64,
        step_data: &StepDataMap,
        advance_to: Option<OnboardingStep>,
    ) -> Result<bool, DatabaseError>;

    /// Take the in-flight claim for `step`. Succeeds only if the submission
    /// is at `step`, that step's correlator is unset, and no live claim exists.
    async fn claim_step(
        &self,
        id: Uuid,
        step: OnboardingStep,
        token: Uuid,
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Drop a claim held by `token`.
    async fn release_claim(&self, id: Uuid, token: Uuid) -> Result<(), DatabaseError>;

    /// Store a correlator and advance past its step in one conditional update.
    /// With `token`, the caller must still hold the claim; without it, no
    /// claim may be held. `step_data` replaces the stored map when given.
    async fn complete_step(
        &self,
        id: Uuid,
        token: Option<Uuid>,
        correlator: &StepCorrelator,
        step_data: Option<&StepDataMap>,
    ) -> Result<bool, DatabaseError>;

    /// Conditionally move a submission from `from` to `to`.
    async fn advance_step(
        &self,
        id: Uuid,
        from: OnboardingStep,
        to: OnboardingStep,
    ) -> Result<bool, DatabaseError>;

    /// Numbers linked to a campaign.
    async fn list_campaign_numbers(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<CampaignNumber>, DatabaseError>;
}

/// The full backend: all stores plus schema management.
#[async_trait]
pub trait Database: VerificationStore + AccountStore + OnboardingStore {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;
}
