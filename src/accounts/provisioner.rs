//! Account provisioner — number allocation, identity, and profile creation
//! with compensation when a later step fails.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::accounts::model::{
    Account, AccountRole, Identity, PaymentStatus, VerifiedApplicant,
};
use crate::error::{DatabaseError, Result, SignupError};
use crate::onboarding::state::OnboardingStep;
use crate::store::AccountStore;

/// Creates accounts for verified applicants.
pub struct AccountProvisioner {
    store: Arc<dyn AccountStore>,
}

impl AccountProvisioner {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    /// Allocate an account number, then create the identity and profile.
    ///
    /// If the profile cannot be created the identity is deleted again and the
    /// original error is returned. A number allocated for a failed attempt is
    /// not reused.
    pub async fn provision(&self, verified: &VerifiedApplicant) -> Result<Account> {
        let tenant = self
            .store
            .get_tenant(&verified.tenant_id)
            .await?
            .ok_or_else(|| SignupError::not_found("tenant", &verified.tenant_id))?;

        let sequence = self.store.next_account_number(&tenant.id).await?;
        let account_number = tenant.account_number(sequence);
        let now = Utc::now();

        let identity = Identity {
            id: Uuid::new_v4(),
            tenant_id: tenant.id.clone(),
            contact: verified.contact.clone(),
            verification_id: verified.verification_id,
            created_at: now,
        };
        self.store.create_identity(&identity).await?;

        let account = Account {
            id: identity.id,
            tenant_id: tenant.id.clone(),
            account_number,
            company_id: Uuid::new_v4(),
            name: verified.applicant.name.clone(),
            company_name: verified.applicant.company_name.clone(),
            contact: verified.contact.clone(),
            role: AccountRole::Owner,
            onboarding_step: OnboardingStep::Payment,
            payment_status: PaymentStatus::Unpaid,
            payment_session_id: None,
            payment_reference: None,
            paid_amount: None,
            paid_at: None,
            verification_id: verified.verification_id,
            created_at: now,
        };

        if let Err(e) = self.store.create_profile(&account).await {
            warn!(
                identity_id = %identity.id,
                error = %e,
                "Profile creation failed, rolling back identity"
            );
            if let Err(rollback) = self.store.delete_identity(identity.id).await {
                error!(
                    identity_id = %identity.id,
                    error = %rollback,
                    "Identity rollback failed"
                );
                return Err(SignupError::Database(DatabaseError::Query(format!(
                    "{e}; identity rollback failed: {rollback}"
                ))));
            }
            return Err(e.into());
        }

        info!(
            account_id = %account.id,
            account_number = %account.account_number,
            tenant = %account.tenant_id,
            "Account provisioned"
        );
        Ok(account)
    }
}
