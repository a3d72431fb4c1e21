//! Verification data model — contact channels, applicants, pending
//! verifications and their attempt audit trail.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SignupError;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?)+$")
        .expect("email regex is valid")
});

/// E.164: leading `+`, no leading zero, 8 to 15 digits in total.
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+[1-9][0-9]{7,14}$").expect("phone regex is valid"));

/// Which kind of address a code is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactKind {
    Email,
    Phone,
}

impl ContactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
        }
    }
}

impl std::fmt::Display for ContactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "phone" => Ok(Self::Phone),
            other => Err(format!("unknown contact kind: {other}")),
        }
    }
}

/// A contact address the applicant claims to control.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactChannel {
    pub kind: ContactKind,
    pub value: String,
}

impl ContactChannel {
    pub fn email(value: impl Into<String>) -> Self {
        Self {
            kind: ContactKind::Email,
            value: value.into(),
        }
    }

    pub fn phone(value: impl Into<String>) -> Self {
        Self {
            kind: ContactKind::Phone,
            value: value.into(),
        }
    }

    /// Validate and canonicalize the address.
    ///
    /// Emails are trimmed and lowercased. Phone numbers lose spaces, dashes,
    /// dots and parentheses and must then be E.164.
    pub fn normalized(&self) -> Result<Self, SignupError> {
        match self.kind {
            ContactKind::Email => {
                let value = self.value.trim().to_lowercase();
                if value.len() > 254 || !EMAIL_RE.is_match(&value) {
                    return Err(SignupError::Validation(format!(
                        "'{}' is not a valid email address",
                        self.value
                    )));
                }
                Ok(Self::email(value))
            }
            ContactKind::Phone => {
                let value: String = self
                    .value
                    .chars()
                    .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
                    .collect();
                if !PHONE_RE.is_match(&value) {
                    return Err(SignupError::Validation(format!(
                        "'{}' is not a valid E.164 phone number",
                        self.value
                    )));
                }
                Ok(Self::phone(value))
            }
        }
    }
}

impl std::fmt::Display for ContactChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Profile fields collected at signup and carried through to account creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Applicant {
    pub name: String,
    pub company_name: String,
}

impl Applicant {
    pub fn new(name: impl Into<String>, company_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            company_name: company_name.into(),
        }
    }

    /// Trim both fields and reject blanks.
    pub fn normalized(&self) -> Result<Self, SignupError> {
        let name = self.name.trim();
        let company_name = self.company_name.trim();
        if name.is_empty() {
            return Err(SignupError::Validation("name is required".into()));
        }
        if company_name.is_empty() {
            return Err(SignupError::Validation("company name is required".into()));
        }
        Ok(Self::new(name, company_name))
    }
}

/// A pending proof-of-contact record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub id: Uuid,
    pub tenant_id: String,
    pub contact: ContactChannel,
    pub applicant: Applicant,
    /// The issued code. Never serialized to clients.
    #[serde(skip_serializing, default)]
    pub code: String,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
}

impl Verification {
    /// Create a fresh, unverified record valid for `ttl` from now.
    pub fn new(
        tenant_id: impl Into<String>,
        contact: ContactChannel,
        applicant: Applicant,
        code: impl Into<String>,
        max_attempts: u32,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            contact,
            applicant,
            code: code.into(),
            attempt_count: 0,
            max_attempts,
            issued_at: now,
            expires_at: now + ttl,
            verified: false,
            verified_at: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }
}

/// One row of the append-only attempt audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationAttempt {
    pub verification_id: Uuid,
    pub attempt_number: u32,
    pub submitted_code: String,
    pub success: bool,
    pub attempted_at: DateTime<Utc>,
}

/// What the store reports back after atomically recording an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedAttempt {
    pub attempt_number: u32,
    pub success: bool,
}
