//! Onboarding state machine — the fixed step order a company walks through.

use serde::{Deserialize, Serialize};

/// The steps of company onboarding.
///
/// Progresses linearly: Authentication → Payment → Brand → PrivacyTerms →
/// Campaign → Bandwidth → Activation → Completed. The derived `Ord` follows
/// that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStep {
    Authentication,
    Payment,
    Brand,
    PrivacyTerms,
    Campaign,
    /// Phone number assignment.
    Bandwidth,
    Activation,
    Completed,
}

impl OnboardingStep {
    pub const ALL: [OnboardingStep; 8] = [
        Self::Authentication,
        Self::Payment,
        Self::Brand,
        Self::PrivacyTerms,
        Self::Campaign,
        Self::Bandwidth,
        Self::Activation,
        Self::Completed,
    ];

    /// Get the next step in the linear progression, if any.
    pub fn next(&self) -> Option<OnboardingStep> {
        use OnboardingStep::*;
        match self {
            Authentication => Some(Payment),
            Payment => Some(Brand),
            Brand => Some(PrivacyTerms),
            PrivacyTerms => Some(Campaign),
            Campaign => Some(Bandwidth),
            Bandwidth => Some(Activation),
            Activation => Some(Completed),
            Completed => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Payment => "payment",
            Self::Brand => "brand",
            Self::PrivacyTerms => "privacy_terms",
            Self::Campaign => "campaign",
            Self::Bandwidth => "bandwidth",
            Self::Activation => "activation",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for OnboardingStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OnboardingStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| format!("unknown onboarding step: {s}"))
    }
}
