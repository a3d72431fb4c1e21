//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "verifications",
        sql: r#"
            CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                account_prefix TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS verifications (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id),
                contact_kind TEXT NOT NULL,
                contact_value TEXT NOT NULL,
                applicant_name TEXT NOT NULL,
                company_name TEXT NOT NULL,
                code TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                issued_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                verified INTEGER NOT NULL DEFAULT 0,
                verified_at TEXT,
                CHECK (attempt_count >= 0 AND attempt_count <= max_attempts),
                UNIQUE (tenant_id, contact_kind, contact_value)
            );
            CREATE INDEX IF NOT EXISTS idx_verifications_expires ON verifications(expires_at);

            CREATE TABLE IF NOT EXISTS verification_attempts (
                verification_id TEXT NOT NULL,
                attempt_number INTEGER NOT NULL,
                submitted_code TEXT NOT NULL,
                success INTEGER NOT NULL,
                attempted_at TEXT NOT NULL,
                PRIMARY KEY (verification_id, attempt_number)
            );

            -- The attempt row and the counter move together: the insert fires
            -- this trigger inside the same statement.
            CREATE TRIGGER IF NOT EXISTS verification_attempt_recorded
            AFTER INSERT ON verification_attempts
            BEGIN
                UPDATE verifications
                SET attempt_count = attempt_count + 1,
                    verified = CASE WHEN NEW.success = 1 THEN 1 ELSE verified END,
                    verified_at = CASE WHEN NEW.success = 1 THEN NEW.attempted_at ELSE verified_at END
                WHERE id = NEW.verification_id;
            END;

            CREATE TRIGGER IF NOT EXISTS verification_deleted
            AFTER DELETE ON verifications
            BEGIN
                DELETE FROM verification_attempts WHERE verification_id = OLD.id;
            END;

            -- A resend replaces the pending row under a new id.
            CREATE TRIGGER IF NOT EXISTS verification_replaced
            AFTER UPDATE OF id ON verifications
            WHEN OLD.id != NEW.id
            BEGIN
                DELETE FROM verification_attempts WHERE verification_id = OLD.id;
            END;
        "#,
    },
    Migration {
        version: 2,
        name: "accounts",
        sql: r#"
            CREATE TABLE IF NOT EXISTS account_sequences (
                tenant_id TEXT PRIMARY KEY,
                last_value INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS identities (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                contact_kind TEXT NOT NULL,
                contact_value TEXT NOT NULL,
                verification_id TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                UNIQUE (tenant_id, contact_kind, contact_value)
            );

            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                account_number TEXT NOT NULL UNIQUE,
                company_id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                company_name TEXT NOT NULL,
                contact_kind TEXT NOT NULL,
                contact_value TEXT NOT NULL,
                role TEXT NOT NULL,
                onboarding_step TEXT NOT NULL,
                payment_status TEXT NOT NULL DEFAULT 'unpaid',
                payment_session_id TEXT UNIQUE,
                payment_reference TEXT,
                paid_amount TEXT,
                paid_at TEXT,
                verification_id TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_profiles_tenant ON profiles(tenant_id);
        "#,
    },
    Migration {
        version: 3,
        name: "onboarding",
        sql: r#"
            CREATE TABLE IF NOT EXISTS onboarding_submissions (
                id TEXT PRIMARY KEY,
                company_id TEXT NOT NULL UNIQUE,
                tenant_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                current_step TEXT NOT NULL,
                step_data TEXT NOT NULL DEFAULT '{}',
                payment_reference TEXT,
                brand_id TEXT,
                campaign_id TEXT,
                phone_number TEXT,
                version INTEGER NOT NULL DEFAULT 0,
                claim_token TEXT,
                claim_expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_submissions_tenant ON onboarding_submissions(tenant_id);

            CREATE TABLE IF NOT EXISTS campaign_numbers (
                campaign_id TEXT NOT NULL,
                phone_number TEXT NOT NULL,
                submission_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (campaign_id, phone_number)
            );

            -- Linkage is written by the same statement that stores the number.
            CREATE TRIGGER IF NOT EXISTS phone_number_assigned
            AFTER UPDATE OF phone_number ON onboarding_submissions
            WHEN OLD.phone_number IS NULL AND NEW.phone_number IS NOT NULL
            BEGIN
                INSERT INTO campaign_numbers (campaign_id, phone_number, submission_id, created_at)
                VALUES (NEW.campaign_id, NEW.phone_number, NEW.id, NEW.updated_at);
            END;
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::info!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    async fn count_objects(conn: &Connection, kind: &str, name: &str) -> i64 {
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = ?1 AND name = ?2",
                libsql::params![kind, name],
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        row.get(0).unwrap()
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in [
            "_migrations",
            "tenants",
            "verifications",
            "verification_attempts",
            "account_sequences",
            "identities",
            "profiles",
            "onboarding_submissions",
            "campaign_numbers",
        ] {
            assert_eq!(count_objects(&conn, "table", table).await, 1, "Table '{table}' should exist");
        }
        for trigger in [
            "verification_attempt_recorded",
            "verification_deleted",
            "verification_replaced",
            "phone_number_assigned",
        ] {
            assert_eq!(
                count_objects(&conn, "trigger", trigger).await,
                1,
                "Trigger '{trigger}' should exist"
            );
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        // Running again should not fail
        run_migrations(&conn).await.unwrap();

        let version = get_current_version(&conn).await.unwrap();
        assert_eq!(version, 3);
    }

    #[tokio::test]
    async fn migrations_run_on_a_spawned_task() {
        let conn = test_conn().await;
        let version = tokio::spawn(async move {
            run_migrations(&conn).await?;
            get_current_version(&conn).await
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(version, 3);
    }

    #[tokio::test]
    async fn version_tracking() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT version, name FROM _migrations ORDER BY version", ())
            .await
            .unwrap();
        let mut seen = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            let v: i64 = row.get(0).unwrap();
            let n: String = row.get(1).unwrap();
            seen.push((v, n));
        }
        assert_eq!(
            seen,
            vec![
                (1, "verifications".to_string()),
                (2, "accounts".to_string()),
                (3, "onboarding".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn attempt_counter_cannot_exceed_cap() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        conn.execute(
            "INSERT INTO tenants (id, name, account_prefix) VALUES ('hub', 'Hub', 'HUB')",
            (),
        )
        .await
        .unwrap();
        conn.execute(
            "INSERT INTO verifications (id, tenant_id, contact_kind, contact_value, applicant_name, company_name, code, attempt_count, max_attempts, issued_at, expires_at)
             VALUES ('v1', 'hub', 'email', 'a@example.com', 'Dana', 'Acme', '123456', 1, 1, '2026-01-01T00:00:00.000000Z', '2099-01-01T00:00:00.000000Z')",
            (),
        )
        .await
        .unwrap();

        let err = conn
            .execute("UPDATE verifications SET attempt_count = 2 WHERE id = 'v1'", ())
            .await;
        assert!(err.is_err(), "CHECK constraint should reject count > max");
    }
}
