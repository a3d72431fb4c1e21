//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::accounts::model::Tenant;
use crate::error::ConfigError;

/// Default verification code lifetime.
pub const DEFAULT_CODE_TTL: Duration = Duration::from_secs(15 * 60);

/// Default number of guesses allowed per verification.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Verification engine settings.
#[derive(Debug, Clone)]
pub struct VerificationConfig {
    /// How long an issued code stays valid.
    pub code_ttl: Duration,
    /// Guesses allowed before the verification locks.
    pub max_attempts: u32,
    /// How often the expiry sweep runs.
    pub sweep_interval: Duration,
    /// Upper bound on a single delivery call.
    pub delivery_timeout: Duration,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            code_ttl: DEFAULT_CODE_TTL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            sweep_interval: Duration::from_secs(60),
            delivery_timeout: Duration::from_secs(10),
        }
    }
}

/// Onboarding orchestrator settings.
#[derive(Debug, Clone)]
pub struct OnboardingConfig {
    /// Upper bound on a registrar or provisioner call.
    pub collaborator_timeout: Duration,
    /// Extra time a step claim survives past the collaborator timeout before
    /// another caller may take it over.
    pub claim_grace: Duration,
}

impl OnboardingConfig {
    /// Total lease for an in-flight step claim.
    pub fn claim_lease(&self) -> Duration {
        self.collaborator_timeout + self.claim_grace
    }
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            collaborator_timeout: Duration::from_secs(10),
            claim_grace: Duration::from_secs(30),
        }
    }
}

/// Which collaborator implementations to wire up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollaboratorMode {
    /// Real SMTP / HTTP adapters.
    Live,
    /// In-memory fakes (development and tests).
    Fake,
}

/// SMTP settings for emailing codes.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

/// Base URL + API key for an HTTP collaborator.
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    pub base_url: String,
    pub api_key: SecretString,
}

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub log_dir: Option<PathBuf>,
    pub verification: VerificationConfig,
    pub onboarding: OnboardingConfig,
    pub mode: CollaboratorMode,
    pub smtp: Option<SmtpConfig>,
    pub sms: Option<HttpEndpoint>,
    pub registrar: Option<HttpEndpoint>,
    pub provisioner: Option<HttpEndpoint>,
    pub payment_webhook_secret: Option<SecretString>,
    /// Tenants upserted at startup.
    pub tenants: Vec<Tenant>,
}

impl ServiceConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup (the environment in
    /// production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("SIGNUP_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/signup.db"));
        let port: u16 = parse_or(&lookup, "SIGNUP_PORT", 8080)?;
        let log_dir = lookup("SIGNUP_LOG_DIR").map(PathBuf::from);

        let collaborator_timeout = positive_secs(&lookup, "SIGNUP_COLLABORATOR_TIMEOUT_SECS", 10)?;

        let max_attempts: u32 = parse_or(&lookup, "SIGNUP_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SIGNUP_MAX_ATTEMPTS".into(),
                message: "must be at least 1".into(),
            });
        }

        let verification = VerificationConfig {
            code_ttl: positive_secs(&lookup, "SIGNUP_CODE_TTL_SECS", DEFAULT_CODE_TTL.as_secs())?,
            max_attempts,
            sweep_interval: positive_secs(&lookup, "SIGNUP_SWEEP_INTERVAL_SECS", 60)?,
            delivery_timeout: collaborator_timeout,
        };

        let onboarding = OnboardingConfig {
            collaborator_timeout,
            ..OnboardingConfig::default()
        };

        let mode = match lookup("COLLABORATOR_MODE").as_deref() {
            None | Some("live") => CollaboratorMode::Live,
            Some("fake") => CollaboratorMode::Fake,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "COLLABORATOR_MODE".into(),
                    message: format!("expected 'live' or 'fake', got '{other}'"),
                });
            }
        };

        let smtp = match lookup("SMTP_HOST") {
            Some(host) => {
                let username = lookup("SMTP_USERNAME").unwrap_or_default();
                Some(SmtpConfig {
                    port: parse_or(&lookup, "SMTP_PORT", 587)?,
                    password: SecretString::from(lookup("SMTP_PASSWORD").unwrap_or_default()),
                    from_address: lookup("SMTP_FROM").unwrap_or_else(|| username.clone()),
                    username,
                    host,
                })
            }
            None => None,
        };

        let config = Self {
            db_path,
            port,
            log_dir,
            verification,
            onboarding,
            mode,
            smtp,
            sms: endpoint(&lookup, "SMS_API_URL", "SMS_API_KEY"),
            registrar: endpoint(&lookup, "REGISTRAR_API_URL", "REGISTRAR_API_KEY"),
            provisioner: endpoint(&lookup, "PROVISIONER_API_URL", "PROVISIONER_API_KEY"),
            payment_webhook_secret: lookup("PAYMENT_WEBHOOK_SECRET").map(SecretString::from),
            tenants: match lookup("SIGNUP_TENANTS") {
                Some(raw) => parse_tenants(&raw)?,
                None => Vec::new(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Live mode needs every collaborator configured; fake mode needs none.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.mode == CollaboratorMode::Fake {
            return Ok(());
        }
        if self.smtp.is_none() {
            return Err(ConfigError::MissingEnvVar("SMTP_HOST".into()));
        }
        if self.sms.is_none() {
            return Err(ConfigError::MissingEnvVar("SMS_API_URL".into()));
        }
        if self.registrar.is_none() {
            return Err(ConfigError::MissingEnvVar("REGISTRAR_API_URL".into()));
        }
        if self.provisioner.is_none() {
            return Err(ConfigError::MissingEnvVar("PROVISIONER_API_URL".into()));
        }
        Ok(())
    }
}

/// A whole number of seconds that must not be zero.
fn positive_secs<F>(lookup: &F, key: &str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_or(lookup, key, default)? {
        0 => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be at least 1 second".into(),
        }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Parse `id:PREFIX[:Display Name]` entries separated by commas.
fn parse_tenants(raw: &str) -> Result<Vec<Tenant>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let mut parts = entry.splitn(3, ':').map(str::trim);
            match (parts.next(), parts.next(), parts.next()) {
                (Some(id), Some(prefix), name) if !id.is_empty() && !prefix.is_empty() => {
                    Ok(Tenant::new(id, name.unwrap_or(id), prefix.to_uppercase()))
                }
                _ => Err(ConfigError::InvalidValue {
                    key: "SIGNUP_TENANTS".into(),
                    message: format!("expected 'id:PREFIX[:name]', got '{entry}'"),
                }),
            }
        })
        .collect()
}

fn endpoint<F>(lookup: &F, url_key: &str, key_key: &str) -> Option<HttpEndpoint>
where
    F: Fn(&str) -> Option<String>,
{
    let base_url = lookup(url_key)?;
    Some(HttpEndpoint {
        base_url: base_url.trim_end_matches('/').to_string(),
        api_key: SecretString::from(lookup(key_key).unwrap_or_default()),
    })
}
