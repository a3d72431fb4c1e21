//! Onboarding data model — submissions, typed step payloads, and the
//! external correlators each step produces.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::OnboardingStep;
use crate::error::SignupError;

/// Business details sent to the registrar for brand approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandDetails {
    pub legal_name: String,
    /// Tax id (EIN), nine digits with an optional dash.
    pub tax_id: String,
    pub vertical: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    pub support_email: String,
    /// ISO 3166-1 alpha-2.
    pub country: String,
}

impl BrandDetails {
    pub fn validate(&self) -> Result<(), SignupError> {
        require("legal_name", &self.legal_name)?;
        require("vertical", &self.vertical)?;
        require("support_email", &self.support_email)?;
        let digits: String = self.tax_id.chars().filter(|c| *c != '-').collect();
        if digits.len() != 9 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SignupError::Validation("tax_id must be 9 digits".into()));
        }
        if self.country.len() != 2 || !self.country.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(SignupError::Validation(
                "country must be a two-letter code".into(),
            ));
        }
        Ok(())
    }
}

/// Messaging campaign details sent to the registrar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignDetails {
    pub use_case: String,
    pub description: String,
    pub sample_messages: Vec<String>,
    pub opt_in_description: String,
}

impl CampaignDetails {
    pub fn validate(&self) -> Result<(), SignupError> {
        require("use_case", &self.use_case)?;
        require("description", &self.description)?;
        require("opt_in_description", &self.opt_in_description)?;
        if self.sample_messages.len() < 2 {
            return Err(SignupError::Validation(
                "at least two sample messages are required".into(),
            ));
        }
        if self.sample_messages.iter().any(|m| m.trim().is_empty()) {
            return Err(SignupError::Validation(
                "sample messages must not be blank".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStepData {
    pub plan: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyTermsData {
    pub privacy_policy_accepted: bool,
    pub terms_accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_policy_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthData {
    /// Preferred area code for the assigned number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Per-step payload, tagged by step name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepData {
    Payment(PaymentStepData),
    Brand(BrandDetails),
    PrivacyTerms(PrivacyTermsData),
    Campaign(CampaignDetails),
    Bandwidth(BandwidthData),
    Activation(ActivationData),
}

impl StepData {
    pub fn step(&self) -> OnboardingStep {
        match self {
            Self::Payment(_) => OnboardingStep::Payment,
            Self::Brand(_) => OnboardingStep::Brand,
            Self::PrivacyTerms(_) => OnboardingStep::PrivacyTerms,
            Self::Campaign(_) => OnboardingStep::Campaign,
            Self::Bandwidth(_) => OnboardingStep::Bandwidth,
            Self::Activation(_) => OnboardingStep::Activation,
        }
    }

    pub fn validate(&self) -> Result<(), SignupError> {
        match self {
            Self::Payment(data) => require("plan", &data.plan),
            Self::Brand(details) => details.validate(),
            Self::Campaign(details) => details.validate(),
            Self::Bandwidth(BandwidthData {
                area_code: Some(code),
            }) if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) => Err(
                SignupError::Validation("area_code must be three digits".into()),
            ),
            Self::PrivacyTerms(_) | Self::Bandwidth(_) | Self::Activation(_) => Ok(()),
        }
    }

    /// Whether saving this payload finishes its step. Only data-only steps
    /// (no external registration) complete this way.
    pub fn completes_step(&self) -> bool {
        matches!(
            self,
            Self::PrivacyTerms(PrivacyTermsData {
                privacy_policy_accepted: true,
                terms_accepted: true,
                ..
            })
        )
    }
}

/// Step payloads keyed by step.
pub type StepDataMap = BTreeMap<OnboardingStep, StepData>;

/// An external system's identifier, stored when its step completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepCorrelator {
    PaymentReference(String),
    BrandId(String),
    CampaignId(String),
    PhoneNumber(String),
}

impl StepCorrelator {
    /// Wrap `value` as the correlator produced by `step`, if that step has one.
    pub fn for_step(step: OnboardingStep, value: String) -> Option<Self> {
        match step {
            OnboardingStep::Payment => Some(Self::PaymentReference(value)),
            OnboardingStep::Brand => Some(Self::BrandId(value)),
            OnboardingStep::Campaign => Some(Self::CampaignId(value)),
            OnboardingStep::Bandwidth => Some(Self::PhoneNumber(value)),
            _ => None,
        }
    }

    /// The step this correlator completes.
    pub fn step(&self) -> OnboardingStep {
        match self {
            Self::PaymentReference(_) => OnboardingStep::Payment,
            Self::BrandId(_) => OnboardingStep::Brand,
            Self::CampaignId(_) => OnboardingStep::Campaign,
            Self::PhoneNumber(_) => OnboardingStep::Bandwidth,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::PaymentReference(v) | Self::BrandId(v) | Self::CampaignId(v) | Self::PhoneNumber(v) => v,
        }
    }
}

/// Column holding the correlator of `step`. Fixed names only, safe to
/// splice into SQL.
pub(crate) fn correlator_column(step: OnboardingStep) -> Option<&'static str> {
    match step {
        OnboardingStep::Payment => Some("payment_reference"),
        OnboardingStep::Brand => Some("brand_id"),
        OnboardingStep::Campaign => Some("campaign_id"),
        OnboardingStep::Bandwidth => Some("phone_number"),
        _ => None,
    }
}

/// A company's onboarding workflow state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub company_id: Uuid,
    pub tenant_id: String,
    pub account_id: Uuid,
    pub current_step: OnboardingStep,
    #[serde(default)]
    pub step_data: StepDataMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// Incremented on every transition.
    pub version: i64,
    #[serde(skip)]
    pub claim_token: Option<Uuid>,
    #[serde(skip)]
    pub claim_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    /// A new submission, starting at the payment step.
    pub fn new(company_id: Uuid, tenant_id: impl Into<String>, account_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            company_id,
            tenant_id: tenant_id.into(),
            account_id,
            current_step: OnboardingStep::Payment,
            step_data: StepDataMap::new(),
            payment_reference: None,
            brand_id: None,
            campaign_id: None,
            phone_number: None,
            version: 0,
            claim_token: None,
            claim_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The stored correlator for `step`, if it completed.
    pub fn correlator(&self, step: OnboardingStep) -> Option<&str> {
        match step {
            OnboardingStep::Payment => self.payment_reference.as_deref(),
            OnboardingStep::Brand => self.brand_id.as_deref(),
            OnboardingStep::Campaign => self.campaign_id.as_deref(),
            OnboardingStep::Bandwidth => self.phone_number.as_deref(),
            _ => None,
        }
    }
}

/// Linkage between a registered campaign and the number assigned to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignNumber {
    pub campaign_id: String,
    pub phone_number: String,
    pub submission_id: Uuid,
    pub created_at: DateTime<Utc>,
}

fn require(field: &str, value: &str) -> Result<(), SignupError> {
    if value.trim().is_empty() {
        return Err(SignupError::Validation(format!("{field} is required")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brand() -> BrandDetails {
        BrandDetails {
            legal_name: "Acme Dental LLC".into(),
            tax_id: "12-3456789".into(),
            vertical: "healthcare".into(),
            website: Some("https://acme.example.com".into()),
            support_email: "support@acme.example.com".into(),
            country: "US".into(),
        }
    }

    #[test]
    fn step_data_is_tagged_by_step() {
        let data = StepData::PrivacyTerms(PrivacyTermsData {
            privacy_policy_accepted: true,
            terms_accepted: true,
            privacy_policy_url: None,
        });
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["step"], "privacy_terms");
        assert_eq!(json["terms_accepted"], true);

        let parsed: StepData = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.step(), OnboardingStep::PrivacyTerms);
        assert!(parsed.completes_step());
    }

    #[test]
    fn privacy_terms_needs_both_acceptances() {
        let partial = StepData::PrivacyTerms(PrivacyTermsData {
            privacy_policy_accepted: true,
            terms_accepted: false,
            privacy_policy_url: None,
        });
        assert!(!partial.completes_step());
        assert!(!StepData::Brand(brand()).completes_step());
    }

    #[test]
    fn brand_validation() {
        assert!(brand().validate().is_ok());

        let mut bad = brand();
        bad.tax_id = "12345".into();
        assert!(matches!(bad.validate(), Err(SignupError::Validation(_))));

        let mut bad = brand();
        bad.country = "USA".into();
        assert!(bad.validate().is_err());

        let mut bad = brand();
        bad.legal_name = " ".into();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn campaign_needs_two_samples() {
        let details = CampaignDetails {
            use_case: "appointment_reminders".into(),
            description: "Reminders for booked visits".into(),
            sample_messages: vec!["Your visit is tomorrow at 9am".into()],
            opt_in_description: "Patients opt in at booking".into(),
        };
        assert!(details.validate().is_err());
    }

    #[test]
    fn step_map_roundtrips_with_step_keys() {
        let mut map = StepDataMap::new();
        map.insert(OnboardingStep::Brand, StepData::Brand(brand()));
        let json = serde_json::to_string(&map).unwrap();
        assert!(json.contains("\"brand\":"));
        let parsed: StepDataMap = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, map);
    }

    #[test]
    fn correlators_follow_steps() {
        let mut s = Submission::new(Uuid::new_v4(), "hub", Uuid::new_v4());
        assert_eq!(s.current_step, OnboardingStep::Payment);
        assert!(s.correlator(OnboardingStep::Brand).is_none());
        s.brand_id = Some("B123".into());
        assert_eq!(s.correlator(OnboardingStep::Brand), Some("B123"));

        let c = StepCorrelator::for_step(OnboardingStep::Bandwidth, "+14155550100".into()).unwrap();
        assert_eq!(c.step(), OnboardingStep::Bandwidth);
        assert_eq!(correlator_column(c.step()), Some("phone_number"));
        assert!(StepCorrelator::for_step(OnboardingStep::PrivacyTerms, "x".into()).is_none());
    }
}
