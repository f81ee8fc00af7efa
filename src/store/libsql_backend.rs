//! libSQL backend — async `Store` trait implementation.
//!
//! Supports local file and in-memory databases. One connection serves all
//! operations; every trait method holds `op_lock` for its duration, so
//! statements from concurrent requests never interleave inside a
//! transaction. Multi-row writes and compare-and-set updates run inside
//! explicit `BEGIN IMMEDIATE` transactions on that connection.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::directory::User;
use crate::error::DatabaseError;
use crate::onboarding::model::{
    Assignment, AssignmentStatus, CompletionGate, Event, EventType, Evidence, GateType,
    InstructorType, Phase, ProgressStatus, Task, TaskDependency, TaskProgress, TaskType, Template,
    TemplateSummary,
};
use crate::store::migrations;
use crate::store::traits::Store;

/// libSQL store backend.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    /// Serializes all operations on the shared connection.
    op_lock: Mutex<()>,
}

impl LibSqlStore {
    /// Open (or create) a local database file.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        info!(path = %path.display(), "Database opened");
        Ok(Self {
            db: Arc::new(db),
            conn,
            op_lock: Mutex::new(()),
        })
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        Ok(Self {
            db: Arc::new(db),
            conn,
            op_lock: Mutex::new(()),
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    // Try RFC 3339 first (our canonical write format)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    // Try SQLite datetime() output with fractional seconds
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    // Try SQLite datetime() output without fractional seconds
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Parse a `%Y-%m-%d` program date.
fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap_or_default()
}

fn parse_optional_date(s: &Option<String>) -> Option<NaiveDate> {
    s.as_ref().map(|s| parse_date(s))
}

fn fmt_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn opt_datetime(dt: Option<DateTime<Utc>>) -> libsql::Value {
    opt_text_owned(dt.map(|dt| dt.to_rfc3339()))
}

fn opt_date(d: Option<NaiveDate>) -> libsql::Value {
    opt_text_owned(d.map(fmt_date))
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

fn json_or_default(s: &str) -> serde_json::Value {
    serde_json::from_str(s).unwrap_or(serde_json::Value::Null)
}

/// Map a libsql Row to a User. Column order matches USER_COLUMNS.
fn row_to_user(row: &libsql::Row) -> Result<User, libsql::Error> {
    let id_str: String = row.get(0)?;
    let role_str: String = row.get(3)?;
    let created_str: String = row.get(4)?;

    Ok(User {
        id: parse_uuid(&id_str),
        email: row.get(1)?,
        name: row.get(2)?,
        role: role_str.parse().unwrap_or_default(),
        created_at: parse_datetime(&created_str),
    })
}

/// Map a libsql Row to a Task. Column order matches TASK_COLUMNS_QUALIFIED.
fn row_to_task(row: &libsql::Row) -> Result<Task, libsql::Error> {
    let id_str: String = row.get(0)?;
    let phase_str: String = row.get(1)?;
    let task_type_str: String = row.get(6)?;
    let gate_kind: String = row.get(7)?;
    let sign_off_role: Option<String> = row.get(8).ok();
    let types_str: String = row.get::<String>(9).unwrap_or_else(|_| "[]".into());

    let gate = CompletionGate::from_parts(&gate_kind, sign_off_role.as_deref()).unwrap_or_else(
        || {
            tracing::warn!(
                task_id = %id_str,
                gate_kind = %gate_kind,
                "Unrepresentable completion gate, treating as none"
            );
            CompletionGate::None
        },
    );

    Ok(Task {
        id: parse_uuid(&id_str),
        phase_id: parse_uuid(&phase_str),
        title: row.get(2)?,
        sort_order: row.get::<i64>(3)? as i32,
        required: row.get::<i64>(4)? != 0,
        estimated_minutes: row.get::<i64>(5)? as u32,
        task_type: task_type_str.parse().unwrap_or(TaskType::Administrative),
        gate,
        applicable_types: serde_json::from_str(&types_str).unwrap_or_default(),
    })
}

/// Map a libsql Row to a Phase (without tasks). Column order matches PHASE_COLUMNS.
fn row_to_phase(row: &libsql::Row) -> Result<Phase, libsql::Error> {
    let id_str: String = row.get(0)?;
    let template_str: String = row.get(1)?;

    Ok(Phase {
        id: parse_uuid(&id_str),
        template_id: parse_uuid(&template_str),
        name: row.get(2)?,
        sort_order: row.get::<i64>(3)? as i32,
        target_start_day: row.get::<i64>(4)? as u32,
        target_end_day: row.get::<i64>(5)? as u32,
        tasks: Vec::new(),
    })
}

/// Map a libsql Row to an Assignment. Column order matches ASSIGNMENT_COLUMNS.
fn row_to_assignment(row: &libsql::Row) -> Result<Assignment, libsql::Error> {
    let id_str: String = row.get(0)?;
    let template_str: String = row.get(1)?;
    let type_str: String = row.get(3)?;
    let start_str: String = row.get(6)?;
    let target_str: Option<String> = row.get(7).ok();
    let actual_str: Option<String> = row.get(8).ok();
    let status_str: String = row.get(9)?;
    let created_str: String = row.get(10)?;
    let updated_str: String = row.get(11)?;

    Ok(Assignment {
        id: parse_uuid(&id_str),
        template_id: parse_uuid(&template_str),
        instructor_email: row.get(2)?,
        instructor_type: type_str.parse().unwrap_or(InstructorType::Adjunct),
        mentor_email: row.get(4).ok(),
        assigned_by: row.get(5)?,
        start_date: parse_date(&start_str),
        target_completion_date: parse_optional_date(&target_str),
        actual_completion_date: parse_optional_date(&actual_str),
        status: status_str.parse().unwrap_or(AssignmentStatus::Active),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a libsql Row to a TaskProgress. Column order matches PROGRESS_COLUMNS.
fn row_to_progress(row: &libsql::Row) -> Result<TaskProgress, libsql::Error> {
    let id_str: String = row.get(0)?;
    let assignment_str: String = row.get(1)?;
    let task_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let started_str: Option<String> = row.get(4).ok();
    let completed_str: Option<String> = row.get(5).ok();
    let signed_at_str: Option<String> = row.get(7).ok();
    let created_str: String = row.get(10)?;
    let updated_str: String = row.get(11)?;

    Ok(TaskProgress {
        id: parse_uuid(&id_str),
        assignment_id: parse_uuid(&assignment_str),
        task_id: parse_uuid(&task_str),
        status: status_str.parse().unwrap_or(ProgressStatus::Pending),
        started_at: parse_optional_datetime(&started_str),
        completed_at: parse_optional_datetime(&completed_str),
        signed_off_by: row.get(6).ok(),
        signed_off_at: parse_optional_datetime(&signed_at_str),
        time_spent_minutes: row.get::<i64>(8)? as u32,
        notes: row.get(9).ok(),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a libsql Row to an Evidence record. Column order matches EVIDENCE_COLUMNS.
fn row_to_evidence(row: &libsql::Row) -> Result<Evidence, libsql::Error> {
    let id_str: String = row.get(0)?;
    let progress_str: String = row.get(1)?;
    let metadata_str: String = row.get::<String>(4).unwrap_or_else(|_| "{}".into());
    let uploaded_str: String = row.get(5)?;

    Ok(Evidence {
        id: parse_uuid(&id_str),
        task_progress_id: parse_uuid(&progress_str),
        uploaded_by: row.get(2)?,
        file_name: row.get(3)?,
        metadata: json_or_default(&metadata_str),
        uploaded_at: parse_datetime(&uploaded_str),
    })
}

/// Map a libsql Row to an Event. Column order matches EVENT_COLUMNS.
fn row_to_event(row: &libsql::Row) -> Result<Event, libsql::Error> {
    let id_str: String = row.get(0)?;
    let assignment_str: String = row.get(1)?;
    let progress_str: Option<String> = row.get(2).ok();
    let type_str: String = row.get(3)?;
    let metadata_str: String = row.get::<String>(7).unwrap_or_else(|_| "null".into());
    let created_str: String = row.get(8)?;

    Ok(Event {
        id: parse_uuid(&id_str),
        assignment_id: parse_uuid(&assignment_str),
        task_progress_id: progress_str.as_deref().map(parse_uuid),
        event_type: type_str.parse().unwrap_or(EventType::TaskStatusChanged),
        old_status: row.get(4).ok(),
        new_status: row.get(5).ok(),
        triggered_by: row.get(6)?,
        metadata: json_or_default(&metadata_str),
        created_at: parse_datetime(&created_str),
    })
}

// ── Transactions ────────────────────────────────────────────────────

async fn begin(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute("BEGIN IMMEDIATE", ())
        .await
        .map_err(|e| DatabaseError::Query(format!("begin transaction: {e}")))?;
    Ok(())
}

async fn commit(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute("COMMIT", ())
        .await
        .map_err(|e| DatabaseError::Query(format!("commit transaction: {e}")))?;
    Ok(())
}

/// Best-effort rollback on an error path; the original error wins.
async fn rollback_quietly(conn: &Connection) {
    let _ = conn.execute("ROLLBACK", ()).await;
}

/// Insert an audit event. Must run inside the caller's transaction.
async fn insert_event(conn: &Connection, event: &Event) -> Result<(), DatabaseError> {
    let metadata = serde_json::to_string(&event.metadata)
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
    conn.execute(
        "INSERT INTO events (id, assignment_id, task_progress_id, event_type, old_status, new_status, triggered_by, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            event.id.to_string(),
            event.assignment_id.to_string(),
            opt_text_owned(event.task_progress_id.map(|id| id.to_string())),
            event.event_type.as_str(),
            opt_text(event.old_status.as_deref()),
            opt_text(event.new_status.as_deref()),
            event.triggered_by.clone(),
            metadata,
            event.created_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("insert_event: {e}")))?;
    Ok(())
}

async fn fetch_user_by_email(
    conn: &Connection,
    email: &str,
) -> Result<Option<User>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
            params![email],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("fetch_user_by_email: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => {
            let user = row_to_user(&row)
                .map_err(|e| DatabaseError::Query(format!("user row parse: {e}")))?;
            Ok(Some(user))
        }
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("fetch_user_by_email: {e}"))),
    }
}

/// Insert the template bundle. Must run inside the caller's transaction.
async fn insert_template_bundle(
    conn: &Connection,
    template: &Template,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO templates (id, name, active, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            template.id.to_string(),
            template.name.clone(),
            template.active as i64,
            template.created_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("insert_template: {e}")))?;

    for phase in &template.phases {
        conn.execute(
            "INSERT INTO phases (id, template_id, name, sort_order, target_start_day, target_end_day)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                phase.id.to_string(),
                template.id.to_string(),
                phase.name.clone(),
                phase.sort_order as i64,
                phase.target_start_day as i64,
                phase.target_end_day as i64,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_template phase: {e}")))?;

        for task in &phase.tasks {
            let types = serde_json::to_string(&task.applicable_types)
                .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
            conn.execute(
                "INSERT INTO tasks (id, phase_id, title, sort_order, required, estimated_minutes, task_type, gate_kind, sign_off_role, applicable_types)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    task.id.to_string(),
                    phase.id.to_string(),
                    task.title.clone(),
                    task.sort_order as i64,
                    task.required as i64,
                    task.estimated_minutes as i64,
                    task.task_type.as_str(),
                    task.gate.kind_str(),
                    opt_text(task.gate.sign_off_role().map(|r| r.as_str())),
                    types,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_template task: {e}")))?;
        }
    }

    for dep in &template.dependencies {
        conn.execute(
            "INSERT INTO task_dependencies (task_id, depends_on_task_id, gate) VALUES (?1, ?2, ?3)",
            params![
                dep.task_id.to_string(),
                dep.depends_on_task_id.to_string(),
                dep.gate.as_str(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_template dependency: {e}")))?;
    }

    Ok(())
}

// ── Column lists ────────────────────────────────────────────────────

const USER_COLUMNS: &str = "id, email, name, role, created_at";

const PHASE_COLUMNS: &str = "id, template_id, name, sort_order, target_start_day, target_end_day";

const ASSIGNMENT_COLUMNS: &str =
    "id, template_id, instructor_email, instructor_type, mentor_email, assigned_by, start_date, target_completion_date, actual_completion_date, status, created_at, updated_at";

const PROGRESS_COLUMNS: &str =
    "id, assignment_id, task_id, status, started_at, completed_at, signed_off_by, signed_off_at, time_spent_minutes, notes, created_at, updated_at";

const EVIDENCE_COLUMNS: &str =
    "id, task_progress_id, uploaded_by, file_name, metadata, uploaded_at";

const EVENT_COLUMNS: &str =
    "id, assignment_id, task_progress_id, event_type, old_status, new_status, triggered_by, metadata, created_at";

/// Task columns with the `t.` alias; every task read goes through a join.
const TASK_COLUMNS_QUALIFIED: &str =
    "t.id, t.phase_id, t.title, t.sort_order, t.required, t.estimated_minutes, t.task_type, t.gate_kind, t.sign_off_role, t.applicable_types";

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Store for LibSqlStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let _guard = self.op_lock.lock().await;
        migrations::run_migrations(self.conn()).await
    }

    // ── Users & endorsements ────────────────────────────────────────

    async fn upsert_user(&self, user: &User) -> Result<User, DatabaseError> {
        let _guard = self.op_lock.lock().await;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO users (id, email, name, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (email) DO UPDATE SET name = excluded.name, role = excluded.role",
            params![
                user.id.to_string(),
                user.email.clone(),
                user.name.clone(),
                user.role.as_str(),
                user.created_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_user: {e}")))?;

        let stored = fetch_user_by_email(conn, &user.email).await?.ok_or_else(|| {
            DatabaseError::Query("upsert_user: row missing after write".into())
        })?;
        debug!(user_id = %stored.id, email = %stored.email, "User upserted");
        Ok(stored)
    }

    async fn resolve_user(&self, email: &str) -> Result<Option<User>, DatabaseError> {
        let _guard = self.op_lock.lock().await;
        fetch_user_by_email(self.conn(), email).await
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, DatabaseError> {
        let _guard = self.op_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let user = row_to_user(&row)
                    .map_err(|e| DatabaseError::Query(format!("user row parse: {e}")))?;
                Ok(Some(user))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user: {e}"))),
        }
    }

    async fn set_director_endorsement(
        &self,
        user_id: Uuid,
        active: bool,
        granted_by: &str,
    ) -> Result<(), DatabaseError> {
        let _guard = self.op_lock.lock().await;
        self.conn()
            .execute(
                "INSERT INTO director_endorsements (user_id, is_active, granted_by) VALUES (?1, ?2, ?3)
                 ON CONFLICT (user_id) DO UPDATE SET
                     is_active = excluded.is_active,
                     granted_by = excluded.granted_by,
                     updated_at = datetime('now')",
                params![user_id.to_string(), active as i64, granted_by],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_director_endorsement: {e}")))?;
        Ok(())
    }

    async fn has_active_director_endorsement(
        &self,
        user_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let _guard = self.op_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM director_endorsements WHERE user_id = ?1 AND is_active = 1",
                params![user_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("has_active_director_endorsement: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row.get(0).unwrap_or(0);
                Ok(count > 0)
            }
            _ => Ok(false),
        }
    }

    // ── Template catalog ────────────────────────────────────────────

    async fn insert_template(&self, template: &Template) -> Result<(), DatabaseError> {
        let _guard = self.op_lock.lock().await;
        let conn = self.conn();

        begin(conn).await?;
        if let Err(e) = insert_template_bundle(conn, template).await {
            rollback_quietly(conn).await;
            return Err(e);
        }
        if let Err(e) = commit(conn).await {
            rollback_quietly(conn).await;
            return Err(e);
        }

        debug!(template_id = %template.id, name = %template.name, "Template inserted");
        Ok(())
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<Template>, DatabaseError> {
        let _guard = self.op_lock.lock().await;
        let conn = self.conn();

        let mut rows = conn
            .query(
                "SELECT id, name, active, created_at FROM templates WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_template: {e}")))?;

        let (name, active, created_at) = match rows.next().await {
            Ok(Some(row)) => {
                let name: String = row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("template row parse: {e}")))?;
                let active: i64 = row.get(2).unwrap_or(1);
                let created_str: String = row.get(3).unwrap_or_default();
                (name, active != 0, parse_datetime(&created_str))
            }
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("get_template: {e}"))),
        };

        // Phases in sort order.
        let mut phases = Vec::new();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {PHASE_COLUMNS} FROM phases WHERE template_id = ?1 ORDER BY sort_order ASC"
                ),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_template phases: {e}")))?;
        while let Ok(Some(row)) = rows.next().await {
            match row_to_phase(&row) {
                Ok(phase) => phases.push(phase),
                Err(e) => tracing::warn!("Skipping phase row: {e}"),
            }
        }

        // All tasks for the template, bucketed into their phases.
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS_QUALIFIED} FROM tasks t JOIN phases p ON p.id = t.phase_id
                     WHERE p.template_id = ?1 ORDER BY p.sort_order ASC, t.sort_order ASC"
                ),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_template tasks: {e}")))?;
        while let Ok(Some(row)) = rows.next().await {
            match row_to_task(&row) {
                Ok(task) => {
                    if let Some(phase) = phases.iter_mut().find(|p| p.id == task.phase_id) {
                        phase.tasks.push(task);
                    }
                }
                Err(e) => tracing::warn!("Skipping task row: {e}"),
            }
        }

        // Edges ordered by the prerequisite's phase/task sort position, the
        // order blockers are reported in.
        let mut dependencies = Vec::new();
        let mut rows = conn
            .query(
                "SELECT d.task_id, d.depends_on_task_id, d.gate
                 FROM task_dependencies d
                 JOIN tasks t ON t.id = d.depends_on_task_id
                 JOIN phases p ON p.id = t.phase_id
                 WHERE p.template_id = ?1
                 ORDER BY p.sort_order ASC, t.sort_order ASC",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_template dependencies: {e}")))?;
        while let Ok(Some(row)) = rows.next().await {
            let task_str: String = row.get(0).unwrap_or_default();
            let dep_str: String = row.get(1).unwrap_or_default();
            let gate_str: String = row.get::<String>(2).unwrap_or_else(|_| "hard".into());
            dependencies.push(TaskDependency {
                task_id: parse_uuid(&task_str),
                depends_on_task_id: parse_uuid(&dep_str),
                gate: gate_str.parse().unwrap_or(GateType::Hard),
            });
        }

        Ok(Some(Template {
            id,
            name,
            active,
            created_at,
            phases,
            dependencies,
        }))
    }

    async fn list_templates(&self) -> Result<Vec<TemplateSummary>, DatabaseError> {
        let _guard = self.op_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                "SELECT t.id, t.name, t.active, t.created_at,
                    (SELECT COUNT(*) FROM phases p WHERE p.template_id = t.id),
                    (SELECT COUNT(*) FROM tasks ta JOIN phases p2 ON ta.phase_id = p2.id
                     WHERE p2.template_id = t.id)
                 FROM templates t ORDER BY t.created_at ASC, t.rowid ASC",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_templates: {e}")))?;

        let mut templates = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id_str: String = row.get(0).unwrap_or_default();
            let created_str: String = row.get(3).unwrap_or_default();
            templates.push(TemplateSummary {
                id: parse_uuid(&id_str),
                name: row.get(1).unwrap_or_default(),
                active: row.get::<i64>(2).unwrap_or(1) != 0,
                created_at: parse_datetime(&created_str),
                phase_count: row.get::<i64>(4).unwrap_or(0) as u32,
                task_count: row.get::<i64>(5).unwrap_or(0) as u32,
            });
        }
        Ok(templates)
    }

    async fn earliest_active_template_id(&self) -> Result<Option<Uuid>, DatabaseError> {
        let _guard = self.op_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                "SELECT id FROM templates WHERE active = 1 ORDER BY created_at ASC, rowid ASC LIMIT 1",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("earliest_active_template_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let id_str: String = row.get(0).unwrap_or_default();
                Ok(Some(parse_uuid(&id_str)))
            }
            _ => Ok(None),
        }
    }

    async fn set_template_active(&self, id: Uuid, active: bool) -> Result<bool, DatabaseError> {
        let _guard = self.op_lock.lock().await;
        let count = self
            .conn()
            .execute(
                "UPDATE templates SET active = ?2 WHERE id = ?1",
                params![id.to_string(), active as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_template_active: {e}")))?;
        Ok(count > 0)
    }

    // ── Assignments ─────────────────────────────────────────────────

    async fn create_assignment(
        &self,
        assignment: &Assignment,
        progress: &[TaskProgress],
        event: &Event,
    ) -> Result<(), DatabaseError> {
        let _guard = self.op_lock.lock().await;
        let conn = self.conn();

        begin(conn).await?;
        let result = async {
            conn.execute(
                "INSERT INTO assignments (id, template_id, instructor_email, instructor_type, mentor_email, assigned_by, start_date, target_completion_date, actual_completion_date, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    assignment.id.to_string(),
                    assignment.template_id.to_string(),
                    assignment.instructor_email.clone(),
                    assignment.instructor_type.as_str(),
                    opt_text(assignment.mentor_email.as_deref()),
                    assignment.assigned_by.clone(),
                    fmt_date(assignment.start_date),
                    opt_date(assignment.target_completion_date),
                    opt_date(assignment.actual_completion_date),
                    assignment.status.as_str(),
                    assignment.created_at.to_rfc3339(),
                    assignment.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_assignment: {e}")))?;

            for p in progress {
                conn.execute(
                    "INSERT INTO task_progress (id, assignment_id, task_id, status, time_spent_minutes, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        p.id.to_string(),
                        p.assignment_id.to_string(),
                        p.task_id.to_string(),
                        p.status.as_str(),
                        p.time_spent_minutes as i64,
                        p.created_at.to_rfc3339(),
                        p.updated_at.to_rfc3339(),
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("create_assignment seed: {e}")))?;
            }

            insert_event(conn, event).await
        }
        .await;

        if let Err(e) = result {
            rollback_quietly(conn).await;
            return Err(e);
        }
        if let Err(e) = commit(conn).await {
            rollback_quietly(conn).await;
            return Err(e);
        }

        info!(
            assignment_id = %assignment.id,
            instructor = %assignment.instructor_email,
            seeded = progress.len(),
            "Assignment created"
        );
        Ok(())
    }

    async fn get_assignment(&self, id: Uuid) -> Result<Option<Assignment>, DatabaseError> {
        let _guard = self.op_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_assignment: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let assignment = row_to_assignment(&row)
                    .map_err(|e| DatabaseError::Query(format!("assignment row parse: {e}")))?;
                Ok(Some(assignment))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_assignment: {e}"))),
        }
    }

    async fn find_open_assignment(
        &self,
        instructor_email: &str,
    ) -> Result<Option<Assignment>, DatabaseError> {
        let _guard = self.op_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
                     WHERE instructor_email = ?1 AND status IN ('active', 'paused')
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![instructor_email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_open_assignment: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let assignment = row_to_assignment(&row)
                    .map_err(|e| DatabaseError::Query(format!("assignment row parse: {e}")))?;
                Ok(Some(assignment))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_open_assignment: {e}"))),
        }
    }

    async fn list_assignments(&self) -> Result<Vec<Assignment>, DatabaseError> {
        let _guard = self.op_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ASSIGNMENT_COLUMNS} FROM assignments ORDER BY created_at DESC, rowid DESC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_assignments: {e}")))?;

        let mut assignments = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_assignment(&row) {
                Ok(a) => assignments.push(a),
                Err(e) => tracing::warn!("Skipping assignment row: {e}"),
            }
        }
        Ok(assignments)
    }

    async fn update_assignment_status(
        &self,
        id: Uuid,
        expected: AssignmentStatus,
        new_status: AssignmentStatus,
        event: &Event,
    ) -> Result<bool, DatabaseError> {
        let _guard = self.op_lock.lock().await;
        let conn = self.conn();
        let now = Utc::now();
        // COALESCE keeps any existing completion date on non-completing moves.
        let completion_date = if new_status == AssignmentStatus::Completed {
            libsql::Value::Text(fmt_date(now.date_naive()))
        } else {
            libsql::Value::Null
        };

        begin(conn).await?;
        let count = match conn
            .execute(
                "UPDATE assignments
                 SET status = ?1,
                     actual_completion_date = COALESCE(?2, actual_completion_date),
                     updated_at = ?3
                 WHERE id = ?4 AND status = ?5",
                params![
                    new_status.as_str(),
                    completion_date,
                    now.to_rfc3339(),
                    id.to_string(),
                    expected.as_str(),
                ],
            )
            .await
        {
            Ok(count) => count,
            Err(e) => {
                rollback_quietly(conn).await;
                return Err(DatabaseError::Query(format!(
                    "update_assignment_status: {e}"
                )));
            }
        };

        if count == 0 {
            rollback_quietly(conn).await;
            return Ok(false);
        }

        if let Err(e) = insert_event(conn, event).await {
            rollback_quietly(conn).await;
            return Err(e);
        }
        if let Err(e) = commit(conn).await {
            rollback_quietly(conn).await;
            return Err(e);
        }

        debug!(assignment_id = %id, from = %expected, to = %new_status, "Assignment status updated");
        Ok(true)
    }

    async fn delete_assignment(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let _guard = self.op_lock.lock().await;
        let conn = self.conn();
        let id_str = id.to_string();

        begin(conn).await?;
        let result = async {
            conn.execute(
                "DELETE FROM events WHERE assignment_id = ?1",
                params![id_str.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_assignment events: {e}")))?;

            conn.execute(
                "DELETE FROM evidence WHERE task_progress_id IN
                     (SELECT id FROM task_progress WHERE assignment_id = ?1)",
                params![id_str.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_assignment evidence: {e}")))?;

            conn.execute(
                "DELETE FROM task_progress WHERE assignment_id = ?1",
                params![id_str.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_assignment progress: {e}")))?;

            conn.execute(
                "DELETE FROM assignments WHERE id = ?1",
                params![id_str.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_assignment: {e}")))
        }
        .await;

        let count = match result {
            Ok(count) => count,
            Err(e) => {
                rollback_quietly(conn).await;
                return Err(e);
            }
        };
        if let Err(e) = commit(conn).await {
            rollback_quietly(conn).await;
            return Err(e);
        }

        if count > 0 {
            info!(assignment_id = %id, "Assignment deleted");
        }
        Ok(count > 0)
    }

    // ── Task progress ───────────────────────────────────────────────

    async fn get_progress(&self, id: Uuid) -> Result<Option<TaskProgress>, DatabaseError> {
        let _guard = self.op_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PROGRESS_COLUMNS} FROM task_progress WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_progress: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let progress = row_to_progress(&row)
                    .map_err(|e| DatabaseError::Query(format!("progress row parse: {e}")))?;
                Ok(Some(progress))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_progress: {e}"))),
        }
    }

    async fn list_progress_for_assignment(
        &self,
        assignment_id: Uuid,
    ) -> Result<Vec<TaskProgress>, DatabaseError> {
        let _guard = self.op_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PROGRESS_COLUMNS} FROM task_progress WHERE assignment_id = ?1 ORDER BY rowid ASC"
                ),
                params![assignment_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_progress_for_assignment: {e}")))?;

        let mut progress = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_progress(&row) {
                Ok(p) => progress.push(p),
                Err(e) => tracing::warn!("Skipping progress row: {e}"),
            }
        }
        Ok(progress)
    }

    async fn update_progress(
        &self,
        progress: &TaskProgress,
        expected: ProgressStatus,
        event: &Event,
    ) -> Result<bool, DatabaseError> {
        let _guard = self.op_lock.lock().await;
        let conn = self.conn();

        begin(conn).await?;
        // The status predicate is the compare-and-set: zero rows changed
        // means another actor moved this row first.
        let count = match conn
            .execute(
                "UPDATE task_progress
                 SET status = ?1, started_at = ?2, completed_at = ?3, signed_off_by = ?4,
                     signed_off_at = ?5, time_spent_minutes = ?6, notes = ?7, updated_at = ?8
                 WHERE id = ?9 AND status = ?10",
                params![
                    progress.status.as_str(),
                    opt_datetime(progress.started_at),
                    opt_datetime(progress.completed_at),
                    opt_text(progress.signed_off_by.as_deref()),
                    opt_datetime(progress.signed_off_at),
                    progress.time_spent_minutes as i64,
                    opt_text(progress.notes.as_deref()),
                    progress.updated_at.to_rfc3339(),
                    progress.id.to_string(),
                    expected.as_str(),
                ],
            )
            .await
        {
            Ok(count) => count,
            Err(e) => {
                rollback_quietly(conn).await;
                return Err(DatabaseError::Query(format!("update_progress: {e}")));
            }
        };

        if count == 0 {
            rollback_quietly(conn).await;
            return Ok(false);
        }

        if let Err(e) = insert_event(conn, event).await {
            rollback_quietly(conn).await;
            return Err(e);
        }
        if let Err(e) = commit(conn).await {
            rollback_quietly(conn).await;
            return Err(e);
        }

        debug!(
            progress_id = %progress.id,
            from = %expected,
            to = %progress.status,
            "Task progress updated"
        );
        Ok(true)
    }

    // ── Evidence ────────────────────────────────────────────────────

    async fn add_evidence(&self, evidence: &Evidence) -> Result<(), DatabaseError> {
        let _guard = self.op_lock.lock().await;
        let metadata = serde_json::to_string(&evidence.metadata)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn()
            .execute(
                "INSERT INTO evidence (id, task_progress_id, uploaded_by, file_name, metadata, uploaded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    evidence.id.to_string(),
                    evidence.task_progress_id.to_string(),
                    evidence.uploaded_by.clone(),
                    evidence.file_name.clone(),
                    metadata,
                    evidence.uploaded_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add_evidence: {e}")))?;

        debug!(
            evidence_id = %evidence.id,
            progress_id = %evidence.task_progress_id,
            "Evidence recorded"
        );
        Ok(())
    }

    async fn count_evidence(&self, task_progress_id: Uuid) -> Result<u64, DatabaseError> {
        let _guard = self.op_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM evidence WHERE task_progress_id = ?1",
                params![task_progress_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_evidence: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row.get(0).unwrap_or(0);
                Ok(count.max(0) as u64)
            }
            _ => Ok(0),
        }
    }

    async fn list_evidence(
        &self,
        task_progress_id: Uuid,
    ) -> Result<Vec<Evidence>, DatabaseError> {
        let _guard = self.op_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EVIDENCE_COLUMNS} FROM evidence WHERE task_progress_id = ?1 ORDER BY rowid ASC"
                ),
                params![task_progress_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_evidence: {e}")))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_evidence(&row) {
                Ok(e) => records.push(e),
                Err(e) => tracing::warn!("Skipping evidence row: {e}"),
            }
        }
        Ok(records)
    }

    // ── Events ──────────────────────────────────────────────────────

    async fn list_events_for_assignment(
        &self,
        assignment_id: Uuid,
    ) -> Result<Vec<Event>, DatabaseError> {
        let _guard = self.op_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM events WHERE assignment_id = ?1 ORDER BY rowid ASC"
                ),
                params![assignment_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_events_for_assignment: {e}")))?;

        let mut events = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_event(&row) {
                Ok(e) => events.push(e),
                Err(e) => tracing::warn!("Skipping event row: {e}"),
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::{Role, SignOffRole};

    async fn test_store() -> LibSqlStore {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.run_migrations().await.unwrap();
        store
    }

    fn sample_template() -> Template {
        let template_id = Uuid::new_v4();
        let phase1 = Uuid::new_v4();
        let phase2 = Uuid::new_v4();
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        let t3 = Uuid::new_v4();

        Template {
            id: template_id,
            name: "Lead instructor pathway".into(),
            active: true,
            created_at: Utc::now(),
            phases: vec![
                Phase {
                    id: phase1,
                    template_id,
                    name: "Orientation".into(),
                    sort_order: 1,
                    target_start_day: 0,
                    target_end_day: 14,
                    tasks: vec![
                        Task {
                            id: t1,
                            phase_id: phase1,
                            title: "Campus orientation".into(),
                            sort_order: 1,
                            required: true,
                            estimated_minutes: 120,
                            task_type: TaskType::Orientation,
                            gate: CompletionGate::None,
                            applicable_types: Vec::new(),
                        },
                        Task {
                            id: t2,
                            phase_id: phase1,
                            title: "Protocol exam".into(),
                            sort_order: 2,
                            required: true,
                            estimated_minutes: 90,
                            task_type: TaskType::Credentialing,
                            gate: CompletionGate::SignOff {
                                role: SignOffRole::Mentor,
                            },
                            applicable_types: Vec::new(),
                        },
                    ],
                },
                Phase {
                    id: phase2,
                    template_id,
                    name: "Teaching".into(),
                    sort_order: 2,
                    target_start_day: 15,
                    target_end_day: 45,
                    tasks: vec![Task {
                        id: t3,
                        phase_id: phase2,
                        title: "First supervised lecture".into(),
                        sort_order: 1,
                        required: true,
                        estimated_minutes: 60,
                        task_type: TaskType::Teaching,
                        gate: CompletionGate::Evidence,
                        applicable_types: vec![InstructorType::Lead],
                    }],
                },
            ],
            dependencies: vec![
                TaskDependency {
                    task_id: t3,
                    depends_on_task_id: t1,
                    gate: GateType::Hard,
                },
                TaskDependency {
                    task_id: t3,
                    depends_on_task_id: t2,
                    gate: GateType::Soft,
                },
            ],
        }
    }

    fn seeded_assignment(template: &Template) -> (Assignment, Vec<TaskProgress>, Event) {
        let assignment = Assignment::new(
            template.id,
            "jordan@ems.academy",
            InstructorType::Lead,
            "admin@ems.academy",
        );
        let progress: Vec<TaskProgress> = template
            .tasks()
            .map(|t| TaskProgress::new(assignment.id, t.id))
            .collect();
        let event =
            Event::assignment_created(&assignment, "admin@ems.academy", serde_json::json!({}));
        (assignment, progress, event)
    }

    #[tokio::test]
    async fn template_roundtrip_preserves_structure() {
        let store = test_store().await;
        let template = sample_template();
        store.insert_template(&template).await.unwrap();

        let loaded = store.get_template(template.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Lead instructor pathway");
        assert!(loaded.active);
        assert_eq!(loaded.phases.len(), 2);
        assert_eq!(loaded.phases[0].name, "Orientation");
        assert_eq!(loaded.phases[0].tasks.len(), 2);
        assert_eq!(loaded.phases[1].tasks.len(), 1);

        // Gate columns round-trip through kind + role.
        assert_eq!(
            loaded.phases[0].tasks[1].gate,
            CompletionGate::SignOff {
                role: SignOffRole::Mentor
            }
        );
        assert_eq!(loaded.phases[1].tasks[0].gate, CompletionGate::Evidence);
        assert_eq!(
            loaded.phases[1].tasks[0].applicable_types,
            vec![InstructorType::Lead]
        );

        // Edges come back ordered by the prerequisite's sort position.
        assert_eq!(loaded.dependencies.len(), 2);
        assert_eq!(
            loaded.dependencies[0].depends_on_task_id,
            template.phases[0].tasks[0].id
        );
        assert_eq!(loaded.dependencies[1].gate, GateType::Soft);
    }

    #[tokio::test]
    async fn earliest_active_template_is_the_default() {
        let store = test_store().await;
        let mut first = sample_template();
        first.created_at = Utc::now() - chrono::Duration::days(2);
        let second = sample_template();
        store.insert_template(&first).await.unwrap();
        store.insert_template(&second).await.unwrap();

        assert_eq!(
            store.earliest_active_template_id().await.unwrap(),
            Some(first.id)
        );

        // Retiring the oldest moves the default to the next one.
        assert!(store.set_template_active(first.id, false).await.unwrap());
        assert_eq!(
            store.earliest_active_template_id().await.unwrap(),
            Some(second.id)
        );

        let summaries = store.list_templates().await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert!(!summaries[0].active);
        assert_eq!(summaries[0].phase_count, 2);
        assert_eq!(summaries[0].task_count, 3);
    }

    #[tokio::test]
    async fn assignment_creation_seeds_progress_and_event() {
        let store = test_store().await;
        let template = sample_template();
        store.insert_template(&template).await.unwrap();

        let (assignment, progress, event) = seeded_assignment(&template);
        store
            .create_assignment(&assignment, &progress, &event)
            .await
            .unwrap();

        let seeded = store
            .list_progress_for_assignment(assignment.id)
            .await
            .unwrap();
        assert_eq!(seeded.len(), 3);
        assert!(seeded.iter().all(|p| p.status == ProgressStatus::Pending));

        let events = store
            .list_events_for_assignment(assignment.id)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::AssignmentCreated);
        assert_eq!(events[0].new_status.as_deref(), Some("active"));

        let found = store
            .find_open_assignment("jordan@ems.academy")
            .await
            .unwrap();
        assert_eq!(found.map(|a| a.id), Some(assignment.id));
    }

    #[tokio::test]
    async fn stale_progress_cas_writes_nothing() {
        let store = test_store().await;
        let template = sample_template();
        store.insert_template(&template).await.unwrap();
        let (assignment, progress, event) = seeded_assignment(&template);
        store
            .create_assignment(&assignment, &progress, &event)
            .await
            .unwrap();

        let mut first = progress[0].clone();
        first.status = ProgressStatus::InProgress;
        first.started_at = Some(Utc::now());
        first.updated_at = Utc::now();
        let e1 = Event::task_status_changed(
            assignment.id,
            first.id,
            ProgressStatus::Pending,
            ProgressStatus::InProgress,
            "jordan@ems.academy",
            serde_json::Value::Null,
        );
        assert!(
            store
                .update_progress(&first, ProgressStatus::Pending, &e1)
                .await
                .unwrap()
        );

        // A second writer still holding the pending snapshot loses, and its
        // event never lands.
        let mut stale = progress[0].clone();
        stale.status = ProgressStatus::Completed;
        stale.completed_at = Some(Utc::now());
        let e2 = Event::task_status_changed(
            assignment.id,
            stale.id,
            ProgressStatus::Pending,
            ProgressStatus::Completed,
            "casey@ems.academy",
            serde_json::Value::Null,
        );
        assert!(
            !store
                .update_progress(&stale, ProgressStatus::Pending, &e2)
                .await
                .unwrap()
        );

        let current = store.get_progress(first.id).await.unwrap().unwrap();
        assert_eq!(current.status, ProgressStatus::InProgress);
        assert!(current.completed_at.is_none());

        let events = store
            .list_events_for_assignment(assignment.id)
            .await
            .unwrap();
        assert_eq!(events.len(), 2); // creation + the winning transition
        assert_eq!(events[1].new_status.as_deref(), Some("in_progress"));
    }

    #[tokio::test]
    async fn assignment_status_cas_stamps_completion_date() {
        let store = test_store().await;
        let template = sample_template();
        store.insert_template(&template).await.unwrap();
        let (assignment, progress, event) = seeded_assignment(&template);
        store
            .create_assignment(&assignment, &progress, &event)
            .await
            .unwrap();

        let complete = Event::assignment_status_changed(
            assignment.id,
            AssignmentStatus::Active,
            AssignmentStatus::Completed,
            "admin@ems.academy",
        );
        assert!(
            store
                .update_assignment_status(
                    assignment.id,
                    AssignmentStatus::Active,
                    AssignmentStatus::Completed,
                    &complete,
                )
                .await
                .unwrap()
        );

        let stored = store.get_assignment(assignment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AssignmentStatus::Completed);
        assert_eq!(stored.actual_completion_date, Some(Utc::now().date_naive()));

        // Completed assignments are no longer "open".
        assert!(
            store
                .find_open_assignment("jordan@ems.academy")
                .await
                .unwrap()
                .is_none()
        );

        // A stale CAS against the old status writes nothing.
        let pause = Event::assignment_status_changed(
            assignment.id,
            AssignmentStatus::Active,
            AssignmentStatus::Paused,
            "admin@ems.academy",
        );
        assert!(
            !store
                .update_assignment_status(
                    assignment.id,
                    AssignmentStatus::Active,
                    AssignmentStatus::Paused,
                    &pause,
                )
                .await
                .unwrap()
        );
        let events = store
            .list_events_for_assignment(assignment.id)
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn delete_assignment_cascades_children() {
        let store = test_store().await;
        let template = sample_template();
        store.insert_template(&template).await.unwrap();
        let (assignment, progress, event) = seeded_assignment(&template);
        store
            .create_assignment(&assignment, &progress, &event)
            .await
            .unwrap();

        let evidence = Evidence::new(
            progress[0].id,
            "jordan@ems.academy",
            "orientation-roster.pdf",
            serde_json::json!({"pages": 2}),
        );
        store.add_evidence(&evidence).await.unwrap();
        assert_eq!(store.count_evidence(progress[0].id).await.unwrap(), 1);

        assert!(store.delete_assignment(assignment.id).await.unwrap());

        assert!(store.get_assignment(assignment.id).await.unwrap().is_none());
        assert!(
            store
                .list_progress_for_assignment(assignment.id)
                .await
                .unwrap()
                .is_empty()
        );
        assert!(
            store
                .list_events_for_assignment(assignment.id)
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(store.count_evidence(progress[0].id).await.unwrap(), 0);

        // Deleting again reports nothing to delete.
        assert!(!store.delete_assignment(assignment.id).await.unwrap());
    }

    #[tokio::test]
    async fn upsert_user_keeps_id_on_conflict() {
        let store = test_store().await;
        let first = store
            .upsert_user(&User::new("dana@ems.academy", "Dana", Role::Instructor))
            .await
            .unwrap();
        let second = store
            .upsert_user(&User::new("dana@ems.academy", "Dana Q.", Role::Admin))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Dana Q.");
        assert_eq!(second.role, Role::Admin);

        let resolved = store
            .resolve_user("dana@ems.academy")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, first.id);
        assert_eq!(
            store.get_user(first.id).await.unwrap().unwrap().name,
            "Dana Q."
        );
    }

    #[tokio::test]
    async fn endorsement_toggle_roundtrip() {
        let store = test_store().await;
        let user = store
            .upsert_user(&User::new("lee@ems.academy", "Lee", Role::Instructor))
            .await
            .unwrap();

        assert!(
            !store
                .has_active_director_endorsement(user.id)
                .await
                .unwrap()
        );
        store
            .set_director_endorsement(user.id, true, "admin@ems.academy")
            .await
            .unwrap();
        assert!(
            store
                .has_active_director_endorsement(user.id)
                .await
                .unwrap()
        );
        store
            .set_director_endorsement(user.id, false, "admin@ems.academy")
            .await
            .unwrap();
        assert!(
            !store
                .has_active_director_endorsement(user.id)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn local_database_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data").join("medictrack.db");

        let template = sample_template();
        {
            let store = LibSqlStore::new_local(&path).await.unwrap();
            store.run_migrations().await.unwrap();
            store.insert_template(&template).await.unwrap();
        }

        // Reopen: schema is already current and the data is still there.
        let store = LibSqlStore::new_local(&path).await.unwrap();
        store.run_migrations().await.unwrap();
        let loaded = store.get_template(template.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Lead instructor pathway");
        assert_eq!(loaded.phases.len(), 2);
    }

    #[tokio::test]
    async fn store_is_usable_from_spawned_tasks() {
        let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let template = sample_template();
        let template_id = template.id;

        // Driving the trait object from a spawned task requires every
        // boxed future, run_migrations included, to be Send.
        let writer = tokio::spawn({
            let store = Arc::clone(&store);
            async move {
                store.run_migrations().await.unwrap();
                store.insert_template(&template).await.unwrap();
            }
        });
        writer.await.unwrap();

        let loaded = store.get_template(template_id).await.unwrap().unwrap();
        assert_eq!(loaded.phases.len(), 2);
    }
}
