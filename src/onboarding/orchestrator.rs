//! Onboarding orchestrator — drives a company's submission through payment,
//! brand and campaign registration, number assignment, and activation.
//!
//! Every external step is guarded by a lease claim on the submission row:
//! only the claim holder calls the collaborator, and the result is stored in
//! the same conditional update that advances the step. A repeated call after
//! the step completed returns the stored correlator instead of calling out
//! again.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{
    BrandDetails, CampaignDetails, StepCorrelator, StepData, Submission,
};
use super::state::OnboardingStep;
use crate::accounts::model::Account;
use crate::collaborators::payment::{PaymentEvent, PaymentEventStatus, PaymentOutcome};
use crate::collaborators::{BrandRegistrar, NumberProvisioner, with_timeout};
use crate::config::OnboardingConfig;
use crate::error::{CollaboratorError, Result, SignupError};
use crate::store::{AccountStore, OnboardingStore};

pub struct OnboardingOrchestrator {
    submissions: Arc<dyn OnboardingStore>,
    accounts: Arc<dyn AccountStore>,
    registrar: Arc<dyn BrandRegistrar>,
    numbers: Arc<dyn NumberProvisioner>,
    config: OnboardingConfig,
    claim_lease: chrono::Duration,
}

impl OnboardingOrchestrator {
    pub fn new(
        submissions: Arc<dyn OnboardingStore>,
        accounts: Arc<dyn AccountStore>,
        registrar: Arc<dyn BrandRegistrar>,
        numbers: Arc<dyn NumberProvisioner>,
        config: OnboardingConfig,
    ) -> Self {
        let claim_lease = chrono::Duration::from_std(config.claim_lease())
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        Self {
            submissions,
            accounts,
            registrar,
            numbers,
            config,
            claim_lease,
        }
    }

    /// Create the submission for an account's company, or return the
    /// existing one.
    pub async fn open(&self, account: &Account) -> Result<Submission> {
        let submission = self
            .submissions
            .create_submission(&Submission::new(
                account.company_id,
                account.tenant_id.clone(),
                account.id,
            ))
            .await?;
        debug!(
            submission_id = %submission.id,
            company_id = %account.company_id,
            "Onboarding submission opened"
        );
        Ok(submission)
    }

    pub async fn get(&self, company_id: Uuid, tenant_id: &str) -> Result<Submission> {
        self.submissions
            .get_submission_by_company(company_id, tenant_id)
            .await?
            .ok_or_else(|| SignupError::not_found("submission", company_id))
    }

    pub async fn get_by_id(&self, submission_id: Uuid) -> Result<Submission> {
        self.submissions
            .get_submission(submission_id)
            .await?
            .ok_or_else(|| SignupError::not_found("submission", submission_id))
    }

    /// Store the payload for the current step. Accepting both privacy
    /// documents finishes the privacy/terms step.
    pub async fn save_step_data(&self, submission_id: Uuid, data: StepData) -> Result<Submission> {
        data.validate()?;
        let submission = self.get_by_id(submission_id).await?;
        let step = data.step();
        if step != submission.current_step {
            return Err(SignupError::PrerequisiteMissing {
                step,
                missing: format!("submission to be at {step} (it is at {})", submission.current_step),
            });
        }

        let advance_to = if data.completes_step() {
            step.next()
        } else {
            None
        };
        let mut step_data = submission.step_data.clone();
        step_data.insert(step, data);

        if !self
            .submissions
            .save_step_data(submission_id, submission.version, &step_data, advance_to)
            .await?
        {
            return Err(SignupError::PersistenceConflict(format!(
                "submission {submission_id} changed while saving {step} data"
            )));
        }

        if let Some(next) = advance_to {
            info!(submission_id = %submission_id, from = %step, to = %next, "Onboarding step completed");
            self.mirror_step(submission.account_id, next).await;
        }
        self.get_by_id(submission_id).await
    }

    /// Record a settled payment and advance to brand registration.
    pub async fn record_payment(&self, submission_id: Uuid, reference: &str) -> Result<Submission> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(SignupError::Validation("processor reference is required".into()));
        }

        let submission = self.get_by_id(submission_id).await?;
        if submission.payment_reference.is_some() {
            return Ok(submission);
        }
        self.settle_payment(&submission, reference, None).await?;
        self.get_by_id(submission_id).await
    }

    /// Attach a processor checkout session so the webhook can find the
    /// account later.
    pub async fn attach_payment_session(
        &self,
        submission_id: Uuid,
        session_id: &str,
    ) -> Result<Account> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(SignupError::Validation("session id is required".into()));
        }

        let submission = self.get_by_id(submission_id).await?;
        if submission.payment_reference.is_some() {
            return Err(SignupError::PersistenceConflict(format!(
                "submission {submission_id} is already paid"
            )));
        }
        if !self
            .accounts
            .attach_payment_session(submission.account_id, session_id)
            .await?
        {
            return Err(SignupError::PersistenceConflict(format!(
                "account {} is already paid",
                submission.account_id
            )));
        }
        self.accounts
            .get_account(submission.account_id)
            .await?
            .ok_or_else(|| SignupError::not_found("account", submission.account_id))
    }

    /// Apply a processor webhook. Duplicate deliveries and races with
    /// [`record_payment`](Self::record_payment) never credit twice.
    pub async fn handle_payment_event(&self, event: &PaymentEvent) -> Result<PaymentOutcome> {
        if event.status != PaymentEventStatus::Completed {
            info!(session_id = %event.session_id, status = ?event.status, "Payment event ignored");
            return Ok(PaymentOutcome::Ignored);
        }

        let account = self
            .accounts
            .find_account_by_payment_session(&event.session_id)
            .await?
            .ok_or_else(|| SignupError::not_found("payment session", &event.session_id))?;
        let submission = self
            .submissions
            .get_submission_by_company(account.company_id, &account.tenant_id)
            .await?;

        let credited = match submission {
            Some(submission) => {
                self.settle_payment(&submission, event.reference(), Some(event.amount))
                    .await?
            }
            None => {
                self.accounts
                    .mark_payment_paid(account.id, event.reference(), Some(event.amount), Utc::now())
                    .await?
            }
        };

        let outcome = if credited {
            PaymentOutcome::Credited
        } else {
            PaymentOutcome::AlreadyPaid
        };
        info!(
            account_id = %account.id,
            session_id = %event.session_id,
            amount = %event.amount,
            outcome = ?outcome,
            "Payment event applied"
        );
        Ok(outcome)
    }

    /// Register the company's brand. Requires a recorded payment.
    pub async fn register_brand(
        &self,
        submission_id: Uuid,
        details: BrandDetails,
    ) -> Result<Submission> {
        details.validate()?;
        let submission = self.get_by_id(submission_id).await?;
        if submission.brand_id.is_some() {
            return Ok(submission);
        }
        if submission.payment_reference.is_none() {
            return Err(SignupError::PrerequisiteMissing {
                step: OnboardingStep::Brand,
                missing: "a recorded payment".into(),
            });
        }
        expect_step(&submission, OnboardingStep::Brand)?;

        let mut step_data = submission.step_data.clone();
        step_data.insert(OnboardingStep::Brand, StepData::Brand(details.clone()));

        self.run_claimed(&submission, OnboardingStep::Brand, "registrar", Some(step_data), || {
            self.registrar.register_brand(&details)
        })
        .await
    }

    /// Register a messaging campaign under the stored brand. Requires the
    /// privacy and terms step to be done.
    pub async fn register_campaign(
        &self,
        submission_id: Uuid,
        details: CampaignDetails,
    ) -> Result<Submission> {
        details.validate()?;
        let submission = self.get_by_id(submission_id).await?;
        if submission.campaign_id.is_some() {
            return Ok(submission);
        }
        let Some(brand_id) = submission.brand_id.clone() else {
            return Err(SignupError::PrerequisiteMissing {
                step: OnboardingStep::Campaign,
                missing: "a registered brand".into(),
            });
        };
        if submission.current_step < OnboardingStep::Campaign {
            return Err(SignupError::PrerequisiteMissing {
                step: OnboardingStep::Campaign,
                missing: "accepted privacy policy and terms".into(),
            });
        }
        expect_step(&submission, OnboardingStep::Campaign)?;

        let mut step_data = submission.step_data.clone();
        step_data.insert(OnboardingStep::Campaign, StepData::Campaign(details.clone()));

        self.run_claimed(&submission, OnboardingStep::Campaign, "registrar", Some(step_data), || {
            self.registrar.register_campaign(&brand_id, &details)
        })
        .await
    }

    /// Assign a phone number to the stored campaign. The number and the
    /// campaign linkage are written together.
    pub async fn assign_phone_number(&self, submission_id: Uuid) -> Result<Submission> {
        let submission = self.get_by_id(submission_id).await?;
        if submission.phone_number.is_some() {
            return Ok(submission);
        }
        let Some(campaign_id) = submission.campaign_id.clone() else {
            return Err(SignupError::PrerequisiteMissing {
                step: OnboardingStep::Bandwidth,
                missing: "a registered campaign".into(),
            });
        };
        expect_step(&submission, OnboardingStep::Bandwidth)?;

        self.run_claimed(&submission, OnboardingStep::Bandwidth, "provisioner", None, || {
            self.numbers.assign_number(&campaign_id)
        })
        .await
    }

    /// Mark onboarding complete and propagate it to the profile. Repeating
    /// the call re-propagates.
    pub async fn complete(&self, submission_id: Uuid) -> Result<Submission> {
        let submission = self.get_by_id(submission_id).await?;
        if submission.current_step != OnboardingStep::Completed {
            if submission.phone_number.is_none() {
                return Err(SignupError::PrerequisiteMissing {
                    step: OnboardingStep::Activation,
                    missing: "an assigned phone number".into(),
                });
            }
            expect_step(&submission, OnboardingStep::Activation)?;

            if !self
                .submissions
                .advance_step(submission_id, OnboardingStep::Activation, OnboardingStep::Completed)
                .await?
            {
                let current = self.get_by_id(submission_id).await?;
                if current.current_step != OnboardingStep::Completed {
                    return Err(SignupError::PersistenceConflict(format!(
                        "submission {submission_id} changed while completing"
                    )));
                }
            } else {
                info!(submission_id = %submission_id, "Onboarding completed");
            }
        }

        self.accounts
            .set_onboarding_step(submission.account_id, OnboardingStep::Completed)
            .await?;
        self.get_by_id(submission_id).await
    }

    /// Mark the account paid and store the reference on the submission.
    /// Returns whether this call performed the credit.
    async fn settle_payment(
        &self,
        submission: &Submission,
        reference: &str,
        amount: Option<rust_decimal::Decimal>,
    ) -> Result<bool> {
        let credited = self
            .accounts
            .mark_payment_paid(submission.account_id, reference, amount, Utc::now())
            .await?;

        // Whoever credited the profile decides the reference both rows carry.
        let reference = if credited {
            reference.to_string()
        } else {
            self.accounts
                .get_account(submission.account_id)
                .await?
                .and_then(|account| account.payment_reference)
                .unwrap_or_else(|| reference.to_string())
        };

        if submission.payment_reference.is_none() {
            let correlator = StepCorrelator::PaymentReference(reference);
            if self
                .submissions
                .complete_step(submission.id, None, &correlator, None)
                .await?
            {
                self.mirror_step(submission.account_id, OnboardingStep::Brand).await;
            } else {
                let current = self.get_by_id(submission.id).await?;
                if current.payment_reference.is_none() {
                    return Err(SignupError::PersistenceConflict(format!(
                        "submission {} changed while recording payment",
                        submission.id
                    )));
                }
            }
        }
        Ok(credited)
    }

    /// Claim `step`, run the collaborator call, and store its result.
    async fn run_claimed<F, Fut>(
        &self,
        submission: &Submission,
        step: OnboardingStep,
        collaborator: &'static str,
        step_data: Option<super::model::StepDataMap>,
        call: F,
    ) -> Result<Submission>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<String, CollaboratorError>>,
    {
        let token = Uuid::new_v4();
        let now = Utc::now();
        if !self
            .submissions
            .claim_step(submission.id, step, token, now + self.claim_lease, now)
            .await?
        {
            let current = self.get_by_id(submission.id).await?;
            if current.correlator(step).is_some() {
                return Ok(current);
            }
            return Err(SignupError::PersistenceConflict(format!(
                "{step} is already in progress for submission {}",
                submission.id
            )));
        }

        let value = match with_timeout(collaborator, self.config.collaborator_timeout, call()).await
        {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    submission_id = %submission.id,
                    step = %step,
                    error = %e,
                    "Collaborator call failed, releasing claim"
                );
                if let Err(release) = self.submissions.release_claim(submission.id, token).await {
                    warn!(submission_id = %submission.id, error = %release, "Failed to release claim");
                }
                return Err(e.into());
            }
        };

        let correlator = StepCorrelator::for_step(step, value).ok_or_else(|| {
            SignupError::Validation(format!("{step} does not produce an external id"))
        })?;
        if !self
            .submissions
            .complete_step(submission.id, Some(token), &correlator, step_data.as_ref())
            .await?
        {
            let current = self.get_by_id(submission.id).await?;
            if current.correlator(step).is_some() {
                warn!(
                    submission_id = %submission.id,
                    step = %step,
                    "Claim lapsed and another caller completed the step"
                );
                return Ok(current);
            }
            return Err(SignupError::PersistenceConflict(format!(
                "claim on {step} lapsed for submission {}",
                submission.id
            )));
        }

        if let Some(next) = step.next() {
            self.mirror_step(submission.account_id, next).await;
        }
        self.get_by_id(submission.id).await
    }

    /// Copy the current step onto the profile. Failures are logged only;
    /// the submission is the source of truth.
    async fn mirror_step(&self, account_id: Uuid, step: OnboardingStep) {
        if let Err(e) = self.accounts.set_onboarding_step(account_id, step).await {
            warn!(account_id = %account_id, step = %step, error = %e, "Failed to mirror step onto profile");
        }
    }
}

fn expect_step(submission: &Submission, step: OnboardingStep) -> Result<()> {
    if submission.current_step != step {
        return Err(SignupError::PrerequisiteMissing {
            step,
            missing: format!(
                "submission to be at {step} (it is at {})",
                submission.current_step
            ),
        });
    }
    Ok(())
}
