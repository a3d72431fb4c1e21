//! libSQL backend — async store trait implementations.
//!
//! Supports local file and in-memory databases. Every guarded mutation is a
//! single statement (plus the triggers it fires), so invariants hold across
//! concurrent callers and processes without application-side locking.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::params::IntoParams;
use libsql::{Connection, Database as LibSqlDatabase, Row, params};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::accounts::model::{Account, AccountRole, Identity, PaymentStatus, Tenant};
use crate::error::DatabaseError;
use crate::onboarding::model::{
    CampaignNumber, StepCorrelator, StepDataMap, Submission, correlator_column,
};
use crate::onboarding::state::OnboardingStep;
use crate::store::migrations;
use crate::store::traits::{AccountStore, Database, OnboardingStore, VerificationStore};
use crate::verification::model::{
    Applicant, ContactChannel, ContactKind, RecordedAttempt, Verification, VerificationAttempt,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn execute(
        &self,
        op: &str,
        sql: &str,
        params: impl IntoParams,
    ) -> Result<u64, DatabaseError> {
        self.conn()
            .execute(sql, params)
            .await
            .map_err(|e| DatabaseError::from_libsql(op, e))
    }

    async fn fetch_optional<T>(
        &self,
        op: &str,
        sql: &str,
        params: impl IntoParams,
        map: impl Fn(&Row) -> Result<T, DatabaseError>,
    ) -> Result<Option<T>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::from_libsql(op, e))?;
        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::from_libsql(op, e))?
        {
            Some(row) => map(&row).map(Some),
            None => Ok(None),
        }
    }

    async fn fetch_all<T>(
        &self,
        op: &str,
        sql: &str,
        params: impl IntoParams,
        map: impl Fn(&Row) -> Result<T, DatabaseError>,
    ) -> Result<Vec<T>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::from_libsql(op, e))?;
        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::from_libsql(op, e))?
        {
            out.push(map(&row)?);
        }
        Ok(out)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp format. Fixed-width, so string comparison in SQL
/// matches chronological order.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Serialization(format!("bad timestamp '{s}': {e}")))
}

fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    s.as_deref().map(parse_datetime).transpose()
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("bad uuid '{s}': {e}")))
}

fn parse_enum<T: FromStr<Err = String>>(s: &str) -> Result<T, DatabaseError> {
    s.parse().map_err(DatabaseError::Serialization)
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn text_col(row: &Row, idx: i32) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::Serialization(format!("column {idx}: {e}")))
}

fn opt_text_col(row: &Row, idx: i32) -> Result<Option<String>, DatabaseError> {
    row.get::<Option<String>>(idx)
        .map_err(|e| DatabaseError::Serialization(format!("column {idx}: {e}")))
}

fn int_col(row: &Row, idx: i32) -> Result<i64, DatabaseError> {
    row.get::<i64>(idx)
        .map_err(|e| DatabaseError::Serialization(format!("column {idx}: {e}")))
}

const VERIFICATION_COLUMNS: &str = "id, tenant_id, contact_kind, contact_value, applicant_name, company_name, code, attempt_count, max_attempts, issued_at, expires_at, verified, verified_at";

fn row_to_verification(row: &Row) -> Result<Verification, DatabaseError> {
    let kind: ContactKind = parse_enum(&text_col(row, 2)?)?;
    Ok(Verification {
        id: parse_uuid(&text_col(row, 0)?)?,
        tenant_id: text_col(row, 1)?,
        contact: ContactChannel {
            kind,
            value: text_col(row, 3)?,
        },
        applicant: Applicant::new(text_col(row, 4)?, text_col(row, 5)?),
        code: text_col(row, 6)?,
        attempt_count: int_col(row, 7)? as u32,
        max_attempts: int_col(row, 8)? as u32,
        issued_at: parse_datetime(&text_col(row, 9)?)?,
        expires_at: parse_datetime(&text_col(row, 10)?)?,
        verified: int_col(row, 11)? != 0,
        verified_at: parse_optional_datetime(opt_text_col(row, 12)?)?,
    })
}

fn row_to_attempt(row: &Row) -> Result<VerificationAttempt, DatabaseError> {
    Ok(VerificationAttempt {
        verification_id: parse_uuid(&text_col(row, 0)?)?,
        attempt_number: int_col(row, 1)? as u32,
        submitted_code: text_col(row, 2)?,
        success: int_col(row, 3)? != 0,
        attempted_at: parse_datetime(&text_col(row, 4)?)?,
    })
}

fn row_to_identity(row: &Row) -> Result<Identity, DatabaseError> {
    Ok(Identity {
        id: parse_uuid(&text_col(row, 0)?)?,
        tenant_id: text_col(row, 1)?,
        contact: ContactChannel {
            kind: parse_enum(&text_col(row, 2)?)?,
            value: text_col(row, 3)?,
        },
        verification_id: parse_uuid(&text_col(row, 4)?)?,
        created_at: parse_datetime(&text_col(row, 5)?)?,
    })
}

const PROFILE_COLUMNS: &str = "id, tenant_id, account_number, company_id, name, company_name, contact_kind, contact_value, role, onboarding_step, payment_status, payment_session_id, payment_reference, paid_amount, paid_at, verification_id, created_at";

fn row_to_account(row: &Row) -> Result<Account, DatabaseError> {
    let paid_amount = opt_text_col(row, 13)?
        .map(|s| {
            Decimal::from_str(&s)
                .map_err(|e| DatabaseError::Serialization(format!("bad amount '{s}': {e}")))
        })
        .transpose()?;
    let role: AccountRole = parse_enum(&text_col(row, 8)?)?;
    let onboarding_step: OnboardingStep = parse_enum(&text_col(row, 9)?)?;
    let payment_status: PaymentStatus = parse_enum(&text_col(row, 10)?)?;

    Ok(Account {
        id: parse_uuid(&text_col(row, 0)?)?,
        tenant_id: text_col(row, 1)?,
        account_number: text_col(row, 2)?,
        company_id: parse_uuid(&text_col(row, 3)?)?,
        name: text_col(row, 4)?,
        company_name: text_col(row, 5)?,
        contact: ContactChannel {
            kind: parse_enum(&text_col(row, 6)?)?,
            value: text_col(row, 7)?,
        },
        role,
        onboarding_step,
        payment_status,
        payment_session_id: opt_text_col(row, 11)?,
        payment_reference: opt_text_col(row, 12)?,
        paid_amount,
        paid_at: parse_optional_datetime(opt_text_col(row, 14)?)?,
        verification_id: parse_uuid(&text_col(row, 15)?)?,
        created_at: parse_datetime(&text_col(row, 16)?)?,
    })
}

const SUBMISSION_COLUMNS: &str = "id, company_id, tenant_id, account_id, current_step, step_data, payment_reference, brand_id, campaign_id, phone_number, version, claim_token, claim_expires_at, created_at, updated_at";

fn row_to_submission(row: &Row) -> Result<Submission, DatabaseError> {
    let step_data_json: String = text_col(row, 5)?;
    let step_data: StepDataMap = serde_json::from_str(&step_data_json)
        .map_err(|e| DatabaseError::Serialization(format!("step_data: {e}")))?;
    let claim_token = opt_text_col(row, 11)?
        .as_deref()
        .map(parse_uuid)
        .transpose()?;

    Ok(Submission {
        id: parse_uuid(&text_col(row, 0)?)?,
        company_id: parse_uuid(&text_col(row, 1)?)?,
        tenant_id: text_col(row, 2)?,
        account_id: parse_uuid(&text_col(row, 3)?)?,
        current_step: parse_enum(&text_col(row, 4)?)?,
        step_data,
        payment_reference: opt_text_col(row, 6)?,
        brand_id: opt_text_col(row, 7)?,
        campaign_id: opt_text_col(row, 8)?,
        phone_number: opt_text_col(row, 9)?,
        version: int_col(row, 10)?,
        claim_token,
        claim_expires_at: parse_optional_datetime(opt_text_col(row, 12)?)?,
        created_at: parse_datetime(&text_col(row, 13)?)?,
        updated_at: parse_datetime(&text_col(row, 14)?)?,
    })
}

fn serialize_step_data(step_data: &StepDataMap) -> Result<String, DatabaseError> {
    serde_json::to_string(step_data)
        .map_err(|e| DatabaseError::Serialization(format!("step_data: {e}")))
}

// ── Trait implementations ───────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }
}

#[async_trait]
impl VerificationStore for LibSqlBackend {
    async fn upsert_verification(
        &self,
        verification: &Verification,
    ) -> Result<bool, DatabaseError> {
        let v = verification;
        let stored = self
            .fetch_optional(
                "upsert_verification",
                "INSERT INTO verifications (id, tenant_id, contact_kind, contact_value, applicant_name,
                    company_name, code, attempt_count, max_attempts, issued_at, expires_at, verified, verified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?10, 0, NULL)
                 ON CONFLICT (tenant_id, contact_kind, contact_value) DO UPDATE SET
                    id = excluded.id,
                    applicant_name = excluded.applicant_name,
                    company_name = excluded.company_name,
                    code = excluded.code,
                    attempt_count = 0,
                    max_attempts = excluded.max_attempts,
                    issued_at = excluded.issued_at,
                    expires_at = excluded.expires_at,
                    verified_at = NULL
                 WHERE verifications.verified = 0
                 RETURNING id",
                params![
                    v.id.to_string(),
                    v.tenant_id.as_str(),
                    v.contact.kind.as_str(),
                    v.contact.value.as_str(),
                    v.applicant.name.as_str(),
                    v.applicant.company_name.as_str(),
                    v.code.as_str(),
                    v.max_attempts as i64,
                    ts(v.issued_at),
                    ts(v.expires_at),
                ],
                |row| text_col(row, 0),
            )
            .await?;

        debug!(verification_id = %v.id, stored = stored.is_some(), "Verification upserted");
        Ok(stored.is_some())
    }

    async fn get_verification(&self, id: Uuid) -> Result<Option<Verification>, DatabaseError> {
        self.fetch_optional(
            "get_verification",
            &format!("SELECT {VERIFICATION_COLUMNS} FROM verifications WHERE id = ?1"),
            params![id.to_string()],
            row_to_verification,
        )
        .await
    }

    async fn record_attempt(
        &self,
        id: Uuid,
        submitted_code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RecordedAttempt>, DatabaseError> {
        let recorded = self
            .fetch_optional(
                "record_attempt",
                "INSERT INTO verification_attempts
                    (verification_id, attempt_number, submitted_code, success, attempted_at)
                 SELECT id, attempt_count + 1, ?2, CASE WHEN code = ?2 THEN 1 ELSE 0 END, ?3
                 FROM verifications
                 WHERE id = ?1 AND verified = 0 AND attempt_count < max_attempts AND expires_at >= ?3
                 RETURNING attempt_number, success",
                params![id.to_string(), submitted_code, ts(now)],
                |row| {
                    Ok(RecordedAttempt {
                        attempt_number: int_col(row, 0)? as u32,
                        success: int_col(row, 1)? != 0,
                    })
                },
            )
            .await?;

        if let Some(attempt) = recorded {
            debug!(
                verification_id = %id,
                attempt = attempt.attempt_number,
                success = attempt.success,
                "Verification attempt recorded"
            );
        }
        Ok(recorded)
    }

    async fn list_attempts(&self, id: Uuid) -> Result<Vec<VerificationAttempt>, DatabaseError> {
        self.fetch_all(
            "list_attempts",
            "SELECT verification_id, attempt_number, submitted_code, success, attempted_at
             FROM verification_attempts WHERE verification_id = ?1 ORDER BY attempt_number ASC",
            params![id.to_string()],
            row_to_attempt,
        )
        .await
    }

    async fn delete_verification(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let count = self
            .execute(
                "delete_verification",
                "DELETE FROM verifications WHERE id = ?1",
                params![id.to_string()],
            )
            .await?;
        debug!(verification_id = %id, deleted = count > 0, "Verification deleted");
        Ok(count > 0)
    }

    async fn delete_expired_verifications(
        &self,
        now: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        let count = self
            .execute(
                "delete_expired_verifications",
                "DELETE FROM verifications WHERE verified = 0 AND expires_at < ?1",
                params![ts(now)],
            )
            .await?;
        if count > 0 {
            info!(count, "Deleted expired verifications");
        }
        Ok(count as usize)
    }
}

#[async_trait]
impl AccountStore for LibSqlBackend {
    async fn upsert_tenant(&self, tenant: &Tenant) -> Result<(), DatabaseError> {
        self.execute(
            "upsert_tenant",
            "INSERT INTO tenants (id, name, account_prefix) VALUES (?1, ?2, ?3)
             ON CONFLICT (id) DO UPDATE SET name = excluded.name, account_prefix = excluded.account_prefix",
            params![
                tenant.id.as_str(),
                tenant.name.as_str(),
                tenant.account_prefix.as_str()
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_tenant(&self, id: &str) -> Result<Option<Tenant>, DatabaseError> {
        self.fetch_optional(
            "get_tenant",
            "SELECT id, name, account_prefix FROM tenants WHERE id = ?1",
            params![id],
            |row| Ok(Tenant::new(text_col(row, 0)?, text_col(row, 1)?, text_col(row, 2)?)),
        )
        .await
    }

    async fn contact_registered(
        &self,
        tenant_id: &str,
        contact: &ContactChannel,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .fetch_optional(
                "contact_registered",
                "SELECT COUNT(*) FROM identities
                 WHERE tenant_id = ?1 AND contact_kind = ?2 AND contact_value = ?3",
                params![tenant_id, contact.kind.as_str(), contact.value.as_str()],
                |row| int_col(row, 0),
            )
            .await?;
        Ok(count.unwrap_or(0) > 0)
    }

    async fn next_account_number(&self, tenant_id: &str) -> Result<i64, DatabaseError> {
        self.fetch_optional(
            "next_account_number",
            "INSERT INTO account_sequences (tenant_id, last_value) VALUES (?1, 1)
             ON CONFLICT (tenant_id) DO UPDATE SET last_value = last_value + 1
             RETURNING last_value",
            params![tenant_id],
            |row| int_col(row, 0),
        )
        .await?
        .ok_or_else(|| DatabaseError::Query("next_account_number: no value returned".into()))
    }

    async fn create_identity(&self, identity: &Identity) -> Result<(), DatabaseError> {
        self.execute(
            "create_identity",
            "INSERT INTO identities (id, tenant_id, contact_kind, contact_value, verification_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                identity.id.to_string(),
                identity.tenant_id.as_str(),
                identity.contact.kind.as_str(),
                identity.contact.value.as_str(),
                identity.verification_id.to_string(),
                ts(identity.created_at),
            ],
        )
        .await?;
        debug!(identity_id = %identity.id, "Identity created");
        Ok(())
    }

    async fn get_identity(&self, id: Uuid) -> Result<Option<Identity>, DatabaseError> {
        self.fetch_optional(
            "get_identity",
            "SELECT id, tenant_id, contact_kind, contact_value, verification_id, created_at
             FROM identities WHERE id = ?1",
            params![id.to_string()],
            row_to_identity,
        )
        .await
    }

    async fn delete_identity(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let count = self
            .execute(
                "delete_identity",
                "DELETE FROM identities WHERE id = ?1",
                params![id.to_string()],
            )
            .await?;
        Ok(count > 0)
    }

    async fn create_profile(&self, account: &Account) -> Result<(), DatabaseError> {
        let a = account;
        let now = ts(a.created_at);
        self.execute(
            "create_profile",
            "INSERT INTO profiles (id, tenant_id, account_number, company_id, name, company_name,
                contact_kind, contact_value, role, onboarding_step, payment_status, verification_id,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
            params![
                a.id.to_string(),
                a.tenant_id.as_str(),
                a.account_number.as_str(),
                a.company_id.to_string(),
                a.name.as_str(),
                a.company_name.as_str(),
                a.contact.kind.as_str(),
                a.contact.value.as_str(),
                a.role.as_str(),
                a.onboarding_step.as_str(),
                a.payment_status.as_str(),
                a.verification_id.to_string(),
                now,
            ],
        )
        .await?;
        debug!(account_id = %a.id, account_number = %a.account_number, "Profile created");
        Ok(())
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, DatabaseError> {
        self.fetch_optional(
            "get_account",
            &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1"),
            params![id.to_string()],
            row_to_account,
        )
        .await
    }

    async fn get_account_by_verification(
        &self,
        verification_id: Uuid,
    ) -> Result<Option<Account>, DatabaseError> {
        self.fetch_optional(
            "get_account_by_verification",
            &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE verification_id = ?1"),
            params![verification_id.to_string()],
            row_to_account,
        )
        .await
    }

    async fn set_onboarding_step(
        &self,
        account_id: Uuid,
        step: OnboardingStep,
    ) -> Result<(), DatabaseError> {
        let count = self
            .execute(
                "set_onboarding_step",
                "UPDATE profiles SET onboarding_step = ?2, updated_at = ?3 WHERE id = ?1",
                params![account_id.to_string(), step.as_str(), ts(Utc::now())],
            )
            .await?;
        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "account",
                id: account_id.to_string(),
            });
        }
        Ok(())
    }

    async fn attach_payment_session(
        &self,
        account_id: Uuid,
        session_id: &str,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .execute(
                "attach_payment_session",
                "UPDATE profiles SET payment_session_id = ?2, payment_status = 'pending', updated_at = ?3
                 WHERE id = ?1 AND payment_status != 'paid'",
                params![account_id.to_string(), session_id, ts(Utc::now())],
            )
            .await?;
        Ok(count > 0)
    }

    async fn find_account_by_payment_session(
        &self,
        session_id: &str,
    ) -> Result<Option<Account>, DatabaseError> {
        self.fetch_optional(
            "find_account_by_payment_session",
            &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE payment_session_id = ?1"),
            params![session_id],
            row_to_account,
        )
        .await
    }

    async fn mark_payment_paid(
        &self,
        account_id: Uuid,
        reference: &str,
        amount: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let amount = amount.map(|a| a.to_string());
        let count = self
            .execute(
                "mark_payment_paid",
                "UPDATE profiles
                 SET payment_status = 'paid', payment_reference = ?2,
                     paid_amount = COALESCE(?3, paid_amount), paid_at = ?4, updated_at = ?4
                 WHERE id = ?1 AND payment_status != 'paid'",
                params![
                    account_id.to_string(),
                    reference,
                    opt_text(amount.as_deref()),
                    ts(now)
                ],
            )
            .await?;
        Ok(count > 0)
    }
}

#[async_trait]
impl OnboardingStore for LibSqlBackend {
    async fn create_submission(&self, submission: &Submission) -> Result<Submission, DatabaseError> {
        let s = submission;
        self.execute(
            "create_submission",
            "INSERT INTO onboarding_submissions (id, company_id, tenant_id, account_id, current_step,
                step_data, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (company_id) DO NOTHING",
            params![
                s.id.to_string(),
                s.company_id.to_string(),
                s.tenant_id.as_str(),
                s.account_id.to_string(),
                s.current_step.as_str(),
                serialize_step_data(&s.step_data)?,
                s.version,
                ts(s.created_at),
                ts(s.updated_at),
            ],
        )
        .await?;

        self.fetch_optional(
            "create_submission",
            &format!("SELECT {SUBMISSION_COLUMNS} FROM onboarding_submissions WHERE company_id = ?1"),
            params![s.company_id.to_string()],
            row_to_submission,
        )
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "submission",
            id: s.company_id.to_string(),
        })
    }

    async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>, DatabaseError> {
        self.fetch_optional(
            "get_submission",
            &format!("SELECT {SUBMISSION_COLUMNS} FROM onboarding_submissions WHERE id = ?1"),
            params![id.to_string()],
            row_to_submission,
        )
        .await
    }

    async fn get_submission_by_company(
        &self,
        company_id: Uuid,
        tenant_id: &str,
    ) -> Result<Option<Submission>, DatabaseError> {
        self.fetch_optional(
            "get_submission_by_company",
            &format!(
                "SELECT {SUBMISSION_COLUMNS} FROM onboarding_submissions WHERE company_id = ?1 AND tenant_id = ?2"
            ),
            params![company_id.to_string(), tenant_id],
            row_to_submission,
        )
        .await
    }

    async fn save_step_data(
        &self,
        id: Uuid,
        expected_version: i64,
        step_data: &StepDataMap,
        advance_to: Option<OnboardingStep>,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .execute(
                "save_step_data",
                "UPDATE onboarding_submissions
                 SET step_data = ?2, current_step = COALESCE(?3, current_step),
                     version = version + 1, updated_at = ?4
                 WHERE id = ?1 AND version = ?5",
                params![
                    id.to_string(),
                    serialize_step_data(step_data)?,
                    opt_text(advance_to.as_ref().map(OnboardingStep::as_str)),
                    ts(Utc::now()),
                    expected_version,
                ],
            )
            .await?;
        Ok(count > 0)
    }

    async fn claim_step(
        &self,
        id: Uuid,
        step: OnboardingStep,
        token: Uuid,
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let column = correlator_column(step)
            .ok_or_else(|| DatabaseError::Query(format!("claim_step: step {step} has no correlator")))?;
        let count = self
            .execute(
                "claim_step",
                &format!(
                    "UPDATE onboarding_submissions
                     SET claim_token = ?3, claim_expires_at = ?4, updated_at = ?5
                     WHERE id = ?1 AND current_step = ?2 AND {column} IS NULL
                       AND (claim_token IS NULL OR claim_expires_at < ?5)"
                ),
                params![
                    id.to_string(),
                    step.as_str(),
                    token.to_string(),
                    ts(lease_until),
                    ts(now),
                ],
            )
            .await?;
        debug!(submission_id = %id, step = %step, claimed = count > 0, "Step claim attempted");
        Ok(count > 0)
    }

    async fn release_claim(&self, id: Uuid, token: Uuid) -> Result<(), DatabaseError> {
        self.execute(
            "release_claim",
            "UPDATE onboarding_submissions SET claim_token = NULL, claim_expires_at = NULL
             WHERE id = ?1 AND claim_token = ?2",
            params![id.to_string(), token.to_string()],
        )
        .await?;
        Ok(())
    }

    async fn complete_step(
        &self,
        id: Uuid,
        token: Option<Uuid>,
        correlator: &StepCorrelator,
        step_data: Option<&StepDataMap>,
    ) -> Result<bool, DatabaseError> {
        let step = correlator.step();
        let next = step
            .next()
            .ok_or_else(|| DatabaseError::Query(format!("complete_step: {step} is terminal")))?;
        let column = correlator_column(step)
            .ok_or_else(|| DatabaseError::Query(format!("complete_step: step {step} has no correlator")))?;
        let step_data = step_data.map(serialize_step_data).transpose()?;
        let token = token.map(|t| t.to_string());

        let count = self
            .execute(
                "complete_step",
                &format!(
                    "UPDATE onboarding_submissions
                     SET {column} = ?2, current_step = ?3, step_data = COALESCE(?4, step_data),
                         version = version + 1, claim_token = NULL, claim_expires_at = NULL,
                         updated_at = ?5
                     WHERE id = ?1 AND current_step = ?6 AND {column} IS NULL
                       AND ((?7 IS NULL AND claim_token IS NULL) OR claim_token = ?7)"
                ),
                params![
                    id.to_string(),
                    correlator.value(),
                    next.as_str(),
                    opt_text(step_data.as_deref()),
                    ts(Utc::now()),
                    step.as_str(),
                    opt_text(token.as_deref()),
                ],
            )
            .await?;

        if count > 0 {
            info!(submission_id = %id, from = %step, to = %next, "Onboarding step completed");
        }
        Ok(count > 0)
    }

    async fn advance_step(
        &self,
        id: Uuid,
        from: OnboardingStep,
        to: OnboardingStep,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .execute(
                "advance_step",
                "UPDATE onboarding_submissions
                 SET current_step = ?3, version = version + 1, updated_at = ?4
                 WHERE id = ?1 AND current_step = ?2",
                params![id.to_string(), from.as_str(), to.as_str(), ts(Utc::now())],
            )
            .await?;
        Ok(count > 0)
    }

    async fn list_campaign_numbers(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<CampaignNumber>, DatabaseError> {
        self.fetch_all(
            "list_campaign_numbers",
            "SELECT campaign_id, phone_number, submission_id, created_at
             FROM campaign_numbers WHERE campaign_id = ?1 ORDER BY created_at ASC",
            params![campaign_id],
            |row| {
                Ok(CampaignNumber {
                    campaign_id: text_col(row, 0)?,
                    phone_number: text_col(row, 1)?,
                    submission_id: parse_uuid(&text_col(row, 2)?)?,
                    created_at: parse_datetime(&text_col(row, 3)?)?,
                })
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    async fn test_db() -> LibSqlBackend {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.upsert_tenant(&Tenant::new("hub", "Hub One", "HUB"))
            .await
            .unwrap();
        db
    }

    fn make_verification(contact: &str, code: &str, max_attempts: u32) -> Verification {
        Verification::new(
            "hub",
            ContactChannel::email(contact),
            Applicant::new("Dana", "Acme Dental"),
            code,
            max_attempts,
            Duration::minutes(15),
        )
    }

    fn make_account(verification_id: Uuid, number: &str) -> Account {
        Account {
            id: Uuid::new_v4(),
            tenant_id: "hub".into(),
            account_number: number.into(),
            company_id: Uuid::new_v4(),
            name: "Dana".into(),
            company_name: "Acme Dental".into(),
            contact: ContactChannel::email("dana@acme.example.com"),
            role: AccountRole::Owner,
            onboarding_step: OnboardingStep::Payment,
            payment_status: PaymentStatus::Unpaid,
            payment_session_id: None,
            payment_reference: None,
            paid_amount: None,
            paid_at: None,
            verification_id,
            created_at: Utc::now(),
        }
    }

    // ── Verification tests ──────────────────────────────────────────

    #[tokio::test]
    async fn upsert_and_get_verification() {
        let db = test_db().await;
        let v = make_verification("dana@acme.example.com", "123456", 5);
        assert!(db.upsert_verification(&v).await.unwrap());

        let fetched = db.get_verification(v.id).await.unwrap().unwrap();
        assert_eq!(fetched.code, "123456");
        assert_eq!(fetched.attempt_count, 0);
        assert_eq!(fetched.contact, v.contact);
        assert!(!fetched.verified);
    }

    #[tokio::test]
    async fn reissue_replaces_pending_verification() {
        let db = test_db().await;
        let first = make_verification("dana@acme.example.com", "111111", 5);
        db.upsert_verification(&first).await.unwrap();
        db.record_attempt(first.id, "000000", Utc::now()).await.unwrap();

        let second = make_verification("dana@acme.example.com", "222222", 5);
        assert!(db.upsert_verification(&second).await.unwrap());

        assert!(db.get_verification(first.id).await.unwrap().is_none());
        assert!(db.list_attempts(first.id).await.unwrap().is_empty());
        let current = db.get_verification(second.id).await.unwrap().unwrap();
        assert_eq!(current.code, "222222");
        assert_eq!(current.attempt_count, 0);
    }

    #[tokio::test]
    async fn verified_record_blocks_reissue() {
        let db = test_db().await;
        let v = make_verification("dana@acme.example.com", "123456", 5);
        db.upsert_verification(&v).await.unwrap();
        db.record_attempt(v.id, "123456", Utc::now()).await.unwrap();

        let again = make_verification("dana@acme.example.com", "654321", 5);
        assert!(!db.upsert_verification(&again).await.unwrap());
        assert!(db.get_verification(v.id).await.unwrap().unwrap().verified);
    }

    #[tokio::test]
    async fn attempts_are_numbered_and_counted_together() {
        let db = test_db().await;
        let v = make_verification("dana@acme.example.com", "123456", 3);
        db.upsert_verification(&v).await.unwrap();

        let first = db.record_attempt(v.id, "000000", Utc::now()).await.unwrap().unwrap();
        let second = db.record_attempt(v.id, "111111", Utc::now()).await.unwrap().unwrap();
        assert_eq!((first.attempt_number, first.success), (1, false));
        assert_eq!((second.attempt_number, second.success), (2, false));

        let stored = db.get_verification(v.id).await.unwrap().unwrap();
        assert_eq!(stored.attempt_count, 2);
        let attempts = db.list_attempts(v.id).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1].submitted_code, "111111");
    }

    #[tokio::test]
    async fn attempt_cap_is_enforced_in_sql() {
        let db = test_db().await;
        let v = make_verification("dana@acme.example.com", "123456", 1);
        db.upsert_verification(&v).await.unwrap();

        assert!(db.record_attempt(v.id, "000000", Utc::now()).await.unwrap().is_some());
        assert!(db.record_attempt(v.id, "123456", Utc::now()).await.unwrap().is_none());

        let stored = db.get_verification(v.id).await.unwrap().unwrap();
        assert_eq!(stored.attempt_count, 1);
        assert!(!stored.verified);
        assert_eq!(db.list_attempts(v.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn success_marks_verified_and_stops_further_attempts() {
        let db = test_db().await;
        let v = make_verification("dana@acme.example.com", "123456", 5);
        db.upsert_verification(&v).await.unwrap();

        let hit = db.record_attempt(v.id, "123456", Utc::now()).await.unwrap().unwrap();
        assert!(hit.success);
        let stored = db.get_verification(v.id).await.unwrap().unwrap();
        assert!(stored.verified);
        assert!(stored.verified_at.is_some());

        assert!(db.record_attempt(v.id, "123456", Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_verification_rejects_attempts() {
        let db = test_db().await;
        let v = make_verification("dana@acme.example.com", "123456", 5);
        db.upsert_verification(&v).await.unwrap();

        let later = v.expires_at + Duration::seconds(1);
        assert!(db.record_attempt(v.id, "123456", later).await.unwrap().is_none());
        assert_eq!(db.get_verification(v.id).await.unwrap().unwrap().attempt_count, 0);
    }

    #[tokio::test]
    async fn delete_removes_attempts() {
        let db = test_db().await;
        let v = make_verification("dana@acme.example.com", "123456", 5);
        db.upsert_verification(&v).await.unwrap();
        db.record_attempt(v.id, "000000", Utc::now()).await.unwrap();

        assert!(db.delete_verification(v.id).await.unwrap());
        assert!(!db.delete_verification(v.id).await.unwrap());
        assert!(db.list_attempts(v.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_only_deletes_expired_unverified() {
        let db = test_db().await;
        let stale = make_verification("stale@acme.example.com", "111111", 5);
        let fresh = make_verification("fresh@acme.example.com", "222222", 5);
        let done = make_verification("done@acme.example.com", "333333", 5);
        for v in [&stale, &fresh, &done] {
            db.upsert_verification(v).await.unwrap();
        }
        db.record_attempt(done.id, "333333", Utc::now()).await.unwrap();

        let now = Utc::now() + Duration::minutes(16);
        let fresh_again = Verification {
            expires_at: now + Duration::minutes(15),
            ..make_verification("fresh@acme.example.com", "444444", 5)
        };
        db.upsert_verification(&fresh_again).await.unwrap();

        let deleted = db.delete_expired_verifications(now).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(db.get_verification(stale.id).await.unwrap().is_none());
        assert!(db.get_verification(fresh_again.id).await.unwrap().is_some());
        assert!(db.get_verification(done.id).await.unwrap().is_some());
    }

    // ── Account tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn account_numbers_are_sequential_per_tenant() {
        let db = test_db().await;
        db.upsert_tenant(&Tenant::new("other", "Other Hub", "OTH")).await.unwrap();

        assert_eq!(db.next_account_number("hub").await.unwrap(), 1);
        assert_eq!(db.next_account_number("hub").await.unwrap(), 2);
        assert_eq!(db.next_account_number("other").await.unwrap(), 1);
        assert_eq!(db.next_account_number("hub").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn identity_contact_is_unique_per_tenant() {
        let db = test_db().await;
        let identity = Identity {
            id: Uuid::new_v4(),
            tenant_id: "hub".into(),
            contact: ContactChannel::email("dana@acme.example.com"),
            verification_id: Uuid::new_v4(),
            created_at: Utc::now(),
        };
        db.create_identity(&identity).await.unwrap();
        assert!(db.contact_registered("hub", &identity.contact).await.unwrap());
        assert!(!db.contact_registered("other", &identity.contact).await.unwrap());

        let dup = Identity {
            id: Uuid::new_v4(),
            verification_id: Uuid::new_v4(),
            ..identity.clone()
        };
        let err = db.create_identity(&dup).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));

        assert!(db.delete_identity(identity.id).await.unwrap());
        assert!(db.get_identity(identity.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn profile_roundtrip_and_lookup_by_verification() {
        let db = test_db().await;
        let verification_id = Uuid::new_v4();
        let account = make_account(verification_id, "HUB-000001");
        db.create_profile(&account).await.unwrap();

        let fetched = db.get_account_by_verification(verification_id).await.unwrap().unwrap();
        assert_eq!(fetched.id, account.id);
        assert_eq!(fetched.account_number, "HUB-000001");
        assert_eq!(fetched.role, AccountRole::Owner);
        assert_eq!(fetched.onboarding_step, OnboardingStep::Payment);
        assert_eq!(fetched.payment_status, PaymentStatus::Unpaid);

        db.set_onboarding_step(account.id, OnboardingStep::Completed).await.unwrap();
        let updated = db.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(updated.onboarding_step, OnboardingStep::Completed);

        let missing = db.set_onboarding_step(Uuid::new_v4(), OnboardingStep::Brand).await;
        assert!(matches!(missing, Err(DatabaseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn payment_is_marked_paid_once() {
        let db = test_db().await;
        let account = make_account(Uuid::new_v4(), "HUB-000001");
        db.create_profile(&account).await.unwrap();

        assert!(db.attach_payment_session(account.id, "cs_test_1").await.unwrap());
        let found = db.find_account_by_payment_session("cs_test_1").await.unwrap().unwrap();
        assert_eq!(found.payment_status, PaymentStatus::Pending);

        let amount = Decimal::new(4999, 2);
        assert!(db.mark_payment_paid(account.id, "cs_test_1", Some(amount), Utc::now()).await.unwrap());
        assert!(!db.mark_payment_paid(account.id, "pi_other", None, Utc::now()).await.unwrap());

        let paid = db.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(paid.payment_status, PaymentStatus::Paid);
        assert_eq!(paid.payment_reference.as_deref(), Some("cs_test_1"));
        assert_eq!(paid.paid_amount, Some(amount));

        assert!(!db.attach_payment_session(account.id, "cs_test_2").await.unwrap());
    }

    // ── Onboarding tests ────────────────────────────────────────────

    #[tokio::test]
    async fn create_submission_is_idempotent_per_company() {
        let db = test_db().await;
        let company_id = Uuid::new_v4();
        let first = Submission::new(company_id, "hub", Uuid::new_v4());
        let stored = db.create_submission(&first).await.unwrap();
        assert_eq!(stored.id, first.id);

        let second = Submission::new(company_id, "hub", Uuid::new_v4());
        let stored_again = db.create_submission(&second).await.unwrap();
        assert_eq!(stored_again.id, first.id);

        assert!(db.get_submission_by_company(company_id, "hub").await.unwrap().is_some());
        assert!(db.get_submission_by_company(company_id, "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn complete_step_requires_expected_step_and_no_claim() {
        let db = test_db().await;
        let s = db
            .create_submission(&Submission::new(Uuid::new_v4(), "hub", Uuid::new_v4()))
            .await
            .unwrap();

        // Wrong step: brand cannot complete while at payment.
        let brand = StepCorrelator::BrandId("B1".into());
        assert!(!db.complete_step(s.id, None, &brand, None).await.unwrap());

        let payment = StepCorrelator::PaymentReference("pi_1".into());
        assert!(db.complete_step(s.id, None, &payment, None).await.unwrap());
        // Second completion is a no-op.
        assert!(!db.complete_step(s.id, None, &payment, None).await.unwrap());

        let stored = db.get_submission(s.id).await.unwrap().unwrap();
        assert_eq!(stored.current_step, OnboardingStep::Brand);
        assert_eq!(stored.payment_reference.as_deref(), Some("pi_1"));
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn claims_exclude_concurrent_callers_until_lease_expires() {
        let db = test_db().await;
        let s = db
            .create_submission(&Submission::new(Uuid::new_v4(), "hub", Uuid::new_v4()))
            .await
            .unwrap();
        db.complete_step(s.id, None, &StepCorrelator::PaymentReference("pi_1".into()), None)
            .await
            .unwrap();

        let now = Utc::now();
        let lease = now + Duration::seconds(30);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(db.claim_step(s.id, OnboardingStep::Brand, a, lease, now).await.unwrap());
        assert!(!db.claim_step(s.id, OnboardingStep::Brand, b, lease, now).await.unwrap());

        // Completing with the wrong token fails; the holder succeeds.
        let brand = StepCorrelator::BrandId("B1".into());
        assert!(!db.complete_step(s.id, Some(b), &brand, None).await.unwrap());
        assert!(!db.complete_step(s.id, None, &brand, None).await.unwrap());

        // After the lease lapses another caller may take over.
        let later = lease + Duration::seconds(1);
        assert!(db.claim_step(s.id, OnboardingStep::Brand, b, later + Duration::seconds(30), later).await.unwrap());
        assert!(!db.complete_step(s.id, Some(a), &brand, None).await.unwrap());
        assert!(db.complete_step(s.id, Some(b), &brand, None).await.unwrap());

        let stored = db.get_submission(s.id).await.unwrap().unwrap();
        assert_eq!(stored.brand_id.as_deref(), Some("B1"));
        assert!(stored.claim_token.is_none());
        assert_eq!(stored.current_step, OnboardingStep::PrivacyTerms);
    }

    #[tokio::test]
    async fn released_claim_can_be_retaken() {
        let db = test_db().await;
        let s = db
            .create_submission(&Submission::new(Uuid::new_v4(), "hub", Uuid::new_v4()))
            .await
            .unwrap();
        db.complete_step(s.id, None, &StepCorrelator::PaymentReference("pi_1".into()), None)
            .await
            .unwrap();

        let now = Utc::now();
        let lease = now + Duration::seconds(30);
        let a = Uuid::new_v4();
        assert!(db.claim_step(s.id, OnboardingStep::Brand, a, lease, now).await.unwrap());
        db.release_claim(s.id, a).await.unwrap();
        assert!(db.claim_step(s.id, OnboardingStep::Brand, Uuid::new_v4(), lease, now).await.unwrap());
    }

    #[tokio::test]
    async fn save_step_data_checks_version() {
        let db = test_db().await;
        let s = db
            .create_submission(&Submission::new(Uuid::new_v4(), "hub", Uuid::new_v4()))
            .await
            .unwrap();

        let mut map = StepDataMap::new();
        map.insert(
            OnboardingStep::Payment,
            crate::onboarding::model::StepData::Payment(crate::onboarding::model::PaymentStepData {
                plan: "starter".into(),
                billing_email: None,
            }),
        );
        assert!(db.save_step_data(s.id, 0, &map, None).await.unwrap());
        assert!(!db.save_step_data(s.id, 0, &map, None).await.unwrap());

        let stored = db.get_submission(s.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.step_data, map);
        assert_eq!(stored.current_step, OnboardingStep::Payment);
    }

    #[tokio::test]
    async fn phone_assignment_writes_campaign_linkage() {
        let db = test_db().await;
        let s = db
            .create_submission(&Submission::new(Uuid::new_v4(), "hub", Uuid::new_v4()))
            .await
            .unwrap();
        db.complete_step(s.id, None, &StepCorrelator::PaymentReference("pi_1".into()), None)
            .await
            .unwrap();
        db.complete_step(s.id, None, &StepCorrelator::BrandId("B1".into()), None)
            .await
            .unwrap();
        db.advance_step(s.id, OnboardingStep::PrivacyTerms, OnboardingStep::Campaign)
            .await
            .unwrap();
        db.complete_step(s.id, None, &StepCorrelator::CampaignId("C1".into()), None)
            .await
            .unwrap();
        db.complete_step(s.id, None, &StepCorrelator::PhoneNumber("+14155550100".into()), None)
            .await
            .unwrap();

        let links = db.list_campaign_numbers("C1").await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].phone_number, "+14155550100");
        assert_eq!(links[0].submission_id, s.id);

        let stored = db.get_submission(s.id).await.unwrap().unwrap();
        assert_eq!(stored.current_step, OnboardingStep::Activation);
    }

    #[tokio::test]
    async fn new_local_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("dir").join("signup.db");
        let db = LibSqlBackend::new_local(&db_path).await.unwrap();
        assert!(db_path.exists());
        db.upsert_tenant(&Tenant::new("hub", "Hub", "HUB")).await.unwrap();
        assert!(db.get_tenant("hub").await.unwrap().is_some());
    }
}
