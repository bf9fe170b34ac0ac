//! Schema migrations for the call store, tracked in `_migrations`.

use libsql::Connection;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Ordered by version; append only.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS webhooks (
                id TEXT PRIMARY KEY,
                webhook_id TEXT NOT NULL UNIQUE,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_webhooks_user ON webhooks(user_id);

            CREATE TABLE IF NOT EXISTS user_settings (
                user_id TEXT PRIMARY KEY,
                twilio_account_sid TEXT,
                twilio_auth_token TEXT,
                llm_api_key TEXT,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS webhook_logs (
                id TEXT PRIMARY KEY,
                webhook_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL,
                error_message TEXT,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_webhook_logs_webhook ON webhook_logs(webhook_id);

            CREATE TABLE IF NOT EXISTS calls (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                webhook_id TEXT NOT NULL,
                external_call_id TEXT,
                agent_phone_number TEXT,
                customer_phone_number TEXT,
                recording_url TEXT,
                ended_reason TEXT,
                summary TEXT,
                structured_data TEXT,
                raw_payload TEXT NOT NULL,
                caller_name TEXT,
                caller_type TEXT,
                carrier_name TEXT,
                line_type TEXT,
                duration_seconds INTEGER,
                intent TEXT,
                sentiment TEXT,
                outcome TEXT,
                customer_name TEXT,
                customer_email TEXT,
                appointment_date TEXT,
                appointment_time TEXT,
                appointment_datetime INTEGER,
                appointment_type TEXT,
                appointment_notes TEXT,
                analysis_completed INTEGER NOT NULL DEFAULT 0,
                analyzed_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_calls_user_created ON calls(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_calls_external ON calls(external_call_id);
        "#,
    },
    Migration {
        version: 2,
        name: "active_calls_and_keywords",
        sql: r#"
            CREATE TABLE IF NOT EXISTS active_calls (
                user_id TEXT NOT NULL,
                external_call_id TEXT NOT NULL,
                status TEXT NOT NULL,
                customer_number TEXT,
                agent_number TEXT,
                started_at TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, external_call_id)
            );

            CREATE TABLE IF NOT EXISTS keyword_aggregates (
                user_id TEXT NOT NULL,
                keyword TEXT NOT NULL,
                total_count INTEGER NOT NULL DEFAULT 0,
                positive_count INTEGER NOT NULL DEFAULT 0,
                neutral_count INTEGER NOT NULL DEFAULT 0,
                negative_count INTEGER NOT NULL DEFAULT 0,
                avg_sentiment REAL NOT NULL DEFAULT 0,
                last_detected_at TEXT NOT NULL,
                PRIMARY KEY (user_id, keyword)
            );
            CREATE INDEX IF NOT EXISTS idx_keywords_user_count
                ON keyword_aggregates(user_id, total_count);
        "#,
    },
    Migration {
        version: 3,
        name: "scheduling_triggers",
        sql: r#"
            CREATE TABLE IF NOT EXISTS scheduling_triggers (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                destination_url TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                send_enriched_data INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_triggers_user ON scheduling_triggers(user_id);

            CREATE TABLE IF NOT EXISTS trigger_delivery_logs (
                id TEXT PRIMARY KEY,
                trigger_id TEXT NOT NULL,
                call_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL,
                http_status INTEGER,
                response_body TEXT,
                error_message TEXT,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trigger_logs_call ON trigger_delivery_logs(call_id);
        "#,
    },
    Migration {
        version: 4,
        name: "addons",
        sql: r#"
            CREATE TABLE IF NOT EXISTS user_addons (
                user_id TEXT NOT NULL,
                addon_type TEXT NOT NULL,
                is_enabled INTEGER NOT NULL DEFAULT 0,
                config TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (user_id, addon_type)
            );

            CREATE TABLE IF NOT EXISTS call_addon_results (
                id TEXT PRIMARY KEY,
                call_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                addon_type TEXT NOT NULL,
                status TEXT NOT NULL,
                result TEXT,
                error_message TEXT,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_addon_results_call ON call_addon_results(call_id);
        "#,
    },
];

/// Bring the schema up to date. Each pending migration and its `_migrations`
/// row commit together, so a failed step leaves the previous version intact.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("create _migrations: {e}")))?;

    let applied = schema_version(conn).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > applied).collect();
    if pending.is_empty() {
        tracing::debug!(version = applied, "Schema up to date");
        return Ok(());
    }

    for migration in pending {
        apply(conn, migration).await?;
    }
    let version = schema_version(conn).await?;
    tracing::info!(version, "Schema migrated");
    Ok(())
}

async fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let fail = |stage: &str, e: libsql::Error| {
        DatabaseError::Migration(format!(
            "V{} {} {stage}: {e}",
            migration.version, migration.name
        ))
    };

    tracing::info!(version = migration.version, name = migration.name, "Applying migration");
    let tx = conn.transaction().await.map_err(|e| fail("begin", e))?;
    tx.execute_batch(migration.sql)
        .await
        .map_err(|e| fail("schema", e))?;
    tx.execute(
        "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![migration.version, migration.name],
    )
    .await
    .map_err(|e| fail("record", e))?;
    tx.commit().await.map_err(|e| fail("commit", e))
}

/// Highest applied version; 0 on a fresh database.
async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("read version: {e}")))?;
    match rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("read version: {e}")))?
    {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Migration(format!("parse version: {e}"))),
        None => Ok(0),
    }
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

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &[
            "_migrations",
            "webhooks",
            "user_settings",
            "webhook_logs",
            "calls",
            "active_calls",
            "keyword_aggregates",
            "scheduling_triggers",
            "trigger_delivery_logs",
            "user_addons",
            "call_addon_results",
        ] {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    libsql::params![*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            let count: i64 = row.get(0).unwrap();
            assert_eq!(count, 1, "Table '{}' should exist", table);
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = schema_version(&conn).await.unwrap();
        assert_eq!(version, 4);
    }

    #[tokio::test]
    async fn version_tracking() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT version, name FROM _migrations ORDER BY version", ())
            .await
            .unwrap();
        let mut names = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            let name: String = row.get(1).unwrap();
            names.push(name);
        }
        assert_eq!(
            names,
            vec![
                "initial_schema",
                "active_calls_and_keywords",
                "scheduling_triggers",
                "addons"
            ]
        );
    }
}
