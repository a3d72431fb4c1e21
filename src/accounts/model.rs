//! Account data model — tenants, identities, and profiles.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::onboarding::state::OnboardingStep;
use crate::verification::model::{Applicant, ContactChannel};

/// An isolated customer organization ("hub").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    /// Prefix for account numbers, e.g. `ACME` in `ACME-000042`.
    pub account_prefix: String,
}

impl Tenant {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        account_prefix: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            account_prefix: account_prefix.into(),
        }
    }

    /// Render a sequence value as this tenant's account number.
    pub fn account_number(&self, sequence: i64) -> String {
        format!("{}-{sequence:06}", self.account_prefix)
    }
}

/// The durable auth identity for an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub tenant_id: String,
    pub contact: ContactChannel,
    pub verification_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    Owner,
    Member,
}

impl AccountRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Member => "member",
        }
    }
}

impl std::str::FromStr for AccountRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Self::Owner),
            "member" => Ok(Self::Member),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    /// A processor checkout session is attached but not settled.
    Pending,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Pending => "pending",
            Self::Paid => "paid",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(Self::Unpaid),
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// The profile record of an account. Its `id` is the identity id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub tenant_id: String,
    pub account_number: String,
    pub company_id: Uuid,
    pub name: String,
    pub company_name: String,
    pub contact: ContactChannel,
    pub role: AccountRole,
    pub onboarding_step: OnboardingStep,
    pub payment_status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
    pub verification_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Everything the provisioner needs from a verified signup.
#[derive(Debug, Clone)]
pub struct VerifiedApplicant {
    pub verification_id: Uuid,
    pub tenant_id: String,
    pub contact: ContactChannel,
    pub applicant: Applicant,
}
