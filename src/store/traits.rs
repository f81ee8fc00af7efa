//! Unified `Store` trait — single async interface for all persistence.
//!
//! Backends serialize access internally; callers treat every method as an
//! isolated operation. Multi-row writes (template bundles, assignment
//! seeding, compare-and-set plus audit event) are transactional inside the
//! backend so callers never observe partial state.

use async_trait::async_trait;
use uuid::Uuid;

use crate::directory::User;
use crate::error::DatabaseError;
use crate::onboarding::model::{
    Assignment, AssignmentStatus, Event, Evidence, ProgressStatus, TaskProgress, Template,
    TemplateSummary,
};

/// Backend-agnostic store covering the directory, template catalog,
/// assignments, task progress, evidence, and the audit event log.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Users & endorsements ────────────────────────────────────────

    /// Insert a user, or update name/role in place when the email already
    /// exists. The stored id is preserved across upserts; the returned row
    /// is the canonical one.
    async fn upsert_user(&self, user: &User) -> Result<User, DatabaseError>;

    /// Look up a user by (lowercased) email.
    async fn resolve_user(&self, email: &str) -> Result<Option<User>, DatabaseError>;

    /// Look up a user by id.
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, DatabaseError>;

    /// Grant or revoke the director endorsement for a user. One row per
    /// user; repeated grants toggle `is_active` in place.
    async fn set_director_endorsement(
        &self,
        user_id: Uuid,
        active: bool,
        granted_by: &str,
    ) -> Result<(), DatabaseError>;

    /// Whether the user currently holds an active director endorsement.
    async fn has_active_director_endorsement(&self, user_id: Uuid)
        -> Result<bool, DatabaseError>;

    // ── Template catalog ────────────────────────────────────────────

    /// Persist a template with its phases, tasks, and dependency edges in
    /// one transaction.
    async fn insert_template(&self, template: &Template) -> Result<(), DatabaseError>;

    /// Get a template hydrated with sorted phases, sorted tasks, and
    /// dependency edges ordered by the prerequisite's phase/task sort order.
    async fn get_template(&self, id: Uuid) -> Result<Option<Template>, DatabaseError>;

    /// Template summaries, oldest first.
    async fn list_templates(&self) -> Result<Vec<TemplateSummary>, DatabaseError>;

    /// The earliest-created active template, used as the default for new
    /// assignments.
    async fn earliest_active_template_id(&self) -> Result<Option<Uuid>, DatabaseError>;

    /// Activate or retire a template. Returns false when the id is unknown.
    async fn set_template_active(&self, id: Uuid, active: bool) -> Result<bool, DatabaseError>;

    // ── Assignments ─────────────────────────────────────────────────

    /// Insert an assignment, its seeded progress rows, and the creation
    /// event in one transaction.
    async fn create_assignment(
        &self,
        assignment: &Assignment,
        progress: &[TaskProgress],
        event: &Event,
    ) -> Result<(), DatabaseError>;

    /// Get an assignment by id.
    async fn get_assignment(&self, id: Uuid) -> Result<Option<Assignment>, DatabaseError>;

    /// The instructor's open (active or paused) assignment, if any.
    async fn find_open_assignment(
        &self,
        instructor_email: &str,
    ) -> Result<Option<Assignment>, DatabaseError>;

    /// All assignments, most recent first.
    async fn list_assignments(&self) -> Result<Vec<Assignment>, DatabaseError>;

    /// Compare-and-set the assignment status, writing the audit event in
    /// the same transaction. Stamps `actual_completion_date` on completion.
    /// Returns false (and writes nothing) when the current status no longer
    /// matches `expected`.
    async fn update_assignment_status(
        &self,
        id: Uuid,
        expected: AssignmentStatus,
        new_status: AssignmentStatus,
        event: &Event,
    ) -> Result<bool, DatabaseError>;

    /// Delete an assignment and everything hanging off it (events,
    /// evidence, task progress) in one transaction. Returns false when the
    /// id is unknown.
    async fn delete_assignment(&self, id: Uuid) -> Result<bool, DatabaseError>;

    // ── Task progress ───────────────────────────────────────────────

    /// Get a progress row by id.
    async fn get_progress(&self, id: Uuid) -> Result<Option<TaskProgress>, DatabaseError>;

    /// All progress rows for an assignment.
    async fn list_progress_for_assignment(
        &self,
        assignment_id: Uuid,
    ) -> Result<Vec<TaskProgress>, DatabaseError>;

    /// Compare-and-set write of a progress row, writing the audit event in
    /// the same transaction. The row is updated only while its stored
    /// status still equals `expected`; returns false (and writes nothing,
    /// including the event) on a lost race.
    async fn update_progress(
        &self,
        progress: &TaskProgress,
        expected: ProgressStatus,
        event: &Event,
    ) -> Result<bool, DatabaseError>;

    // ── Evidence ────────────────────────────────────────────────────

    /// Record evidence metadata for a progress row.
    async fn add_evidence(&self, evidence: &Evidence) -> Result<(), DatabaseError>;

    /// Number of evidence records attached to a progress row.
    async fn count_evidence(&self, task_progress_id: Uuid) -> Result<u64, DatabaseError>;

    /// Evidence records for a progress row, oldest first.
    async fn list_evidence(&self, task_progress_id: Uuid)
        -> Result<Vec<Evidence>, DatabaseError>;

    // ── Events ──────────────────────────────────────────────────────

    /// The assignment's audit feed in insertion order.
    async fn list_events_for_assignment(
        &self,
        assignment_id: Uuid,
    ) -> Result<Vec<Event>, DatabaseError>;
}
