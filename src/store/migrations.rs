//! Schema migrations for the libSQL store.
//!
//! The full history lives in [`MIGRATIONS`]; `run_migrations` compares it
//! against the `_migrations` bookkeeping table and applies whatever is
//! missing, in order. Safe to call on every startup.

use libsql::Connection;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// The schema history. Append-only; never edit a shipped entry.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'student',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);

            CREATE TABLE IF NOT EXISTS templates (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS phases (
                id TEXT PRIMARY KEY,
                template_id TEXT NOT NULL,
                name TEXT NOT NULL,
                sort_order INTEGER NOT NULL,
                target_start_day INTEGER NOT NULL DEFAULT 0,
                target_end_day INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_phases_template ON phases(template_id);

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                phase_id TEXT NOT NULL,
                title TEXT NOT NULL,
                sort_order INTEGER NOT NULL,
                required INTEGER NOT NULL DEFAULT 1,
                estimated_minutes INTEGER NOT NULL DEFAULT 0,
                task_type TEXT NOT NULL,
                gate_kind TEXT NOT NULL DEFAULT 'none',
                sign_off_role TEXT,
                applicable_types TEXT NOT NULL DEFAULT '[]'
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_phase ON tasks(phase_id);

            CREATE TABLE IF NOT EXISTS task_dependencies (
                task_id TEXT NOT NULL,
                depends_on_task_id TEXT NOT NULL,
                gate TEXT NOT NULL DEFAULT 'hard',
                PRIMARY KEY (task_id, depends_on_task_id)
            );

            CREATE TABLE IF NOT EXISTS assignments (
                id TEXT PRIMARY KEY,
                template_id TEXT NOT NULL,
                instructor_email TEXT NOT NULL,
                instructor_type TEXT NOT NULL,
                mentor_email TEXT,
                assigned_by TEXT NOT NULL,
                start_date TEXT NOT NULL,
                target_completion_date TEXT,
                actual_completion_date TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_assignments_instructor ON assignments(instructor_email);
            CREATE INDEX IF NOT EXISTS idx_assignments_status ON assignments(status);

            CREATE TABLE IF NOT EXISTS task_progress (
                id TEXT PRIMARY KEY,
                assignment_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                started_at TEXT,
                completed_at TEXT,
                signed_off_by TEXT,
                signed_off_at TEXT,
                time_spent_minutes INTEGER NOT NULL DEFAULT 0,
                notes TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (assignment_id, task_id)
            );
            CREATE INDEX IF NOT EXISTS idx_task_progress_assignment ON task_progress(assignment_id);
            CREATE INDEX IF NOT EXISTS idx_task_progress_status ON task_progress(status);

            CREATE TABLE IF NOT EXISTS evidence (
                id TEXT PRIMARY KEY,
                task_progress_id TEXT NOT NULL,
                uploaded_by TEXT NOT NULL,
                file_name TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                uploaded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_evidence_progress ON evidence(task_progress_id);

            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                assignment_id TEXT NOT NULL,
                task_progress_id TEXT,
                event_type TEXT NOT NULL,
                old_status TEXT,
                new_status TEXT,
                triggered_by TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_assignment ON events(assignment_id);
            CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type);
        "#,
    },
    Migration {
        version: 2,
        name: "director_endorsements",
        sql: r#"
            CREATE TABLE IF NOT EXISTS director_endorsements (
                user_id TEXT PRIMARY KEY,
                endorsement_type TEXT NOT NULL DEFAULT 'director',
                is_active INTEGER NOT NULL DEFAULT 1,
                granted_by TEXT NOT NULL,
                granted_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
        "#,
    },
];

fn migration_error(context: &str, e: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::Migration(format!("{context}: {e}"))
}

/// Bring the schema up to date, recording each applied version.
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
    .map_err(|e| migration_error("creating the _migrations bookkeeping table", e))?;

    let applied = applied_version(conn).await?;
    for step in MIGRATIONS.iter().filter(|m| m.version > applied) {
        tracing::info!(
            version = step.version,
            name = step.name,
            "Applying schema migration"
        );
        conn.execute_batch(step.sql).await.map_err(|e| {
            migration_error(&format!("migration V{} ({})", step.version, step.name), e)
        })?;
        mark_applied(conn, step).await?;
    }

    let version = applied_version(conn).await?;
    tracing::info!(version, "Schema is current");
    Ok(())
}

/// Highest version in `_migrations`, 0 when nothing has been applied.
async fn applied_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| migration_error("querying the applied schema version", e))?;
    let row = rows
        .next()
        .await
        .map_err(|e| migration_error("reading the applied schema version", e))?;
    match row {
        Some(row) => row
            .get(0)
            .map_err(|e| migration_error("decoding the applied schema version", e)),
        None => Ok(0),
    }
}

async fn mark_applied(conn: &Connection, step: &Migration) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![step.version, step.name],
    )
    .await
    .map_err(|e| migration_error(&format!("recording migration V{}", step.version), e))?;
    Ok(())
}
