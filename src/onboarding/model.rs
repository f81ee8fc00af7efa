//! Onboarding data model — templates, assignments, task progress, events.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::roles::SignOffRole;

// ── Catalog ─────────────────────────────────────────────────────────

/// Display taxonomy for tasks. Carries no engine semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Orientation,
    Credentialing,
    Shadowing,
    Teaching,
    Administrative,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Orientation => "orientation",
            TaskType::Credentialing => "credentialing",
            TaskType::Shadowing => "shadowing",
            TaskType::Teaching => "teaching",
            TaskType::Administrative => "administrative",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "orientation" => Ok(TaskType::Orientation),
            "credentialing" => Ok(TaskType::Credentialing),
            "shadowing" => Ok(TaskType::Shadowing),
            "teaching" => Ok(TaskType::Teaching),
            "administrative" => Ok(TaskType::Administrative),
            other => Err(format!("unknown task type: {other}")),
        }
    }
}

/// Instructor classification an assignment is created under. Tasks may be
/// scoped to a subset of types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructorType {
    Lead,
    Adjunct,
    LabInstructor,
    Preceptor,
}

impl InstructorType {
    pub fn as_str(self) -> &'static str {
        match self {
            InstructorType::Lead => "lead",
            InstructorType::Adjunct => "adjunct",
            InstructorType::LabInstructor => "lab_instructor",
            InstructorType::Preceptor => "preceptor",
        }
    }
}

impl fmt::Display for InstructorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstructorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lead" => Ok(InstructorType::Lead),
            "adjunct" => Ok(InstructorType::Adjunct),
            "lab_instructor" => Ok(InstructorType::LabInstructor),
            "preceptor" => Ok(InstructorType::Preceptor),
            other => Err(format!("unknown instructor type: {other}")),
        }
    }
}

/// Whether an unmet dependency blocks or merely warns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateType {
    /// Dependents cannot start or complete until this is satisfied.
    Hard,
    /// Advisory ordering; produces a warning, never a refusal.
    Soft,
}

impl GateType {
    pub fn as_str(self) -> &'static str {
        match self {
            GateType::Hard => "hard",
            GateType::Soft => "soft",
        }
    }
}

impl fmt::Display for GateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hard" => Ok(GateType::Hard),
            "soft" => Ok(GateType::Soft),
            other => Err(format!("unknown gate type: {other}")),
        }
    }
}

/// What a task demands before it may enter `completed`.
///
/// A tagged variant instead of independent boolean flags, so a sign-off
/// requirement without a role is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionGate {
    /// No extra requirement.
    #[default]
    None,
    /// At least one evidence file must be on record.
    Evidence,
    /// A qualifying principal must perform the completing transition.
    SignOff { role: SignOffRole },
    /// The completing principal must hold an active director endorsement.
    Director,
}

impl CompletionGate {
    pub fn kind_str(&self) -> &'static str {
        match self {
            CompletionGate::None => "none",
            CompletionGate::Evidence => "evidence",
            CompletionGate::SignOff { .. } => "sign_off",
            CompletionGate::Director => "director",
        }
    }

    /// The sign-off role, when this is a sign-off gate.
    pub fn sign_off_role(&self) -> Option<SignOffRole> {
        match self {
            CompletionGate::SignOff { role } => Some(*role),
            _ => None,
        }
    }

    /// Rebuild from the two DB columns. `None` (the Rust one) means the
    /// stored pair is unrepresentable; the backend logs those rows.
    pub fn from_parts(kind: &str, role: Option<&str>) -> Option<Self> {
        match kind {
            "none" => Some(CompletionGate::None),
            "evidence" => Some(CompletionGate::Evidence),
            "sign_off" => role
                .and_then(|r| r.parse::<SignOffRole>().ok())
                .map(|role| CompletionGate::SignOff { role }),
            "director" => Some(CompletionGate::Director),
            _ => None,
        }
    }
}

/// An onboarding template: ordered phases of tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    /// Inactive templates are kept for existing assignments but are not
    /// offered as defaults for new ones.
    pub active: bool,
    pub created_at: DateTime<Utc>,
    /// Phases in `sort_order`, each with its tasks in `sort_order`.
    pub phases: Vec<Phase>,
    /// Dependency edges between this template's tasks.
    pub dependencies: Vec<TaskDependency>,
}

impl Template {
    /// All tasks across phases, in phase/task sort order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.phases.iter().flat_map(|p| p.tasks.iter())
    }

    /// Tasks that apply to the given instructor type.
    pub fn applicable_tasks(&self, instructor_type: InstructorType) -> impl Iterator<Item = &Task> {
        self.tasks().filter(move |t| t.applies_to(instructor_type))
    }
}

/// A named stretch of the onboarding timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub id: Uuid,
    pub template_id: Uuid,
    pub name: String,
    pub sort_order: i32,
    /// Target window in days from the assignment start date.
    pub target_start_day: u32,
    pub target_end_day: u32,
    pub tasks: Vec<Task>,
}

/// A single onboarding task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub phase_id: Uuid,
    pub title: String,
    pub sort_order: i32,
    /// Required tasks count toward assignment completion; optional ones
    /// never hold it up.
    pub required: bool,
    pub estimated_minutes: u32,
    pub task_type: TaskType,
    /// Completion requirement, if any.
    #[serde(default)]
    pub gate: CompletionGate,
    /// Instructor types this task applies to. Empty = all types.
    #[serde(default)]
    pub applicable_types: Vec<InstructorType>,
}

impl Task {
    pub fn applies_to(&self, instructor_type: InstructorType) -> bool {
        self.applicable_types.is_empty() || self.applicable_types.contains(&instructor_type)
    }
}

/// An ordering edge between two tasks of the same template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDependency {
    /// The dependent task.
    pub task_id: Uuid,
    /// The prerequisite.
    pub depends_on_task_id: Uuid,
    pub gate: GateType,
}

/// Listing row for the template index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSummary {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub phase_count: u32,
    pub task_count: u32,
}

// ── Template authoring drafts ───────────────────────────────────────

/// Authoring input for a new template. Tasks are referenced by caller-chosen
/// string keys until IDs are materialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDraft {
    pub name: String,
    pub phases: Vec<PhaseDraft>,
    #[serde(default)]
    pub dependencies: Vec<DependencyDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseDraft {
    pub name: String,
    pub sort_order: i32,
    #[serde(default)]
    pub target_start_day: u32,
    #[serde(default)]
    pub target_end_day: u32,
    pub tasks: Vec<TaskDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDraft {
    /// Key unique across the whole draft, used by dependency edges.
    pub key: String,
    pub title: String,
    pub sort_order: i32,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub estimated_minutes: u32,
    pub task_type: TaskType,
    #[serde(default)]
    pub gate: CompletionGate,
    #[serde(default)]
    pub applicable_types: Vec<InstructorType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyDraft {
    /// Key of the dependent task.
    pub task: String,
    /// Key of the prerequisite task.
    pub depends_on: String,
    #[serde(default = "default_hard")]
    pub gate: GateType,
}

fn default_true() -> bool {
    true
}

fn default_hard() -> GateType {
    GateType::Hard
}

// ── Assignments ─────────────────────────────────────────────────────

/// Assignment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl AssignmentStatus {
    /// Terminal statuses accept no further changes.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AssignmentStatus::Completed | AssignmentStatus::Cancelled
        )
    }

    /// Legal lifecycle moves. Completion additionally requires every
    /// required task to be satisfied; that check lives in the manager.
    pub fn can_change_to(self, new: AssignmentStatus) -> bool {
        use AssignmentStatus::*;
        match (self, new) {
            (Active, Paused) | (Paused, Active) => true,
            (Active | Paused, Cancelled) => true,
            (Active | Paused, Completed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentStatus::Active => "active",
            AssignmentStatus::Paused => "paused",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AssignmentStatus::Active),
            "paused" => Ok(AssignmentStatus::Paused),
            "completed" => Ok(AssignmentStatus::Completed),
            "cancelled" => Ok(AssignmentStatus::Cancelled),
            other => Err(format!("unknown assignment status: {other}")),
        }
    }
}

/// One instructor's run through a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub template_id: Uuid,
    pub instructor_email: String,
    pub instructor_type: InstructorType,
    /// Mentor who can sign off mentor-gated tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mentor_email: Option<String>,
    /// Staff member who created the assignment.
    pub assigned_by: String,
    pub start_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_completion_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_completion_date: Option<NaiveDate>,
    pub status: AssignmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assignment {
    /// Create an active assignment starting today.
    pub fn new(
        template_id: Uuid,
        instructor_email: impl Into<String>,
        instructor_type: InstructorType,
        assigned_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            template_id,
            instructor_email: instructor_email.into(),
            instructor_type,
            mentor_email: None,
            assigned_by: assigned_by.into(),
            start_date: now.date_naive(),
            target_completion_date: None,
            actual_completion_date: None,
            status: AssignmentStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: set mentor.
    pub fn with_mentor(mut self, mentor_email: impl Into<String>) -> Self {
        self.mentor_email = Some(mentor_email.into());
        self
    }

    /// Builder: set start date.
    pub fn with_start_date(mut self, start: NaiveDate) -> Self {
        self.start_date = start;
        self
    }

    /// Builder: set target completion date.
    pub fn with_target_completion(mut self, target: NaiveDate) -> Self {
        self.target_completion_date = Some(target);
        self
    }
}

// ── Task progress ───────────────────────────────────────────────────

/// Per-task progression status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Pending,
    InProgress,
    Completed,
    Waived,
}

impl ProgressStatus {
    /// Whether this status satisfies gates on dependent tasks.
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, ProgressStatus::Completed | ProgressStatus::Waived)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProgressStatus::Pending => "pending",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Waived => "waived",
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgressStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProgressStatus::Pending),
            "in_progress" => Ok(ProgressStatus::InProgress),
            "completed" => Ok(ProgressStatus::Completed),
            "waived" => Ok(ProgressStatus::Waived),
            other => Err(format!("unknown progress status: {other}")),
        }
    }
}

/// One instructor's state on one task. Seeded `pending` at assignment
/// creation for every applicable task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub task_id: Uuid,
    pub status: ProgressStatus,
    /// First entry into `in_progress`; untouched by later revisits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set on entry to `completed`, cleared on any revert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Who performed the completing transition, for sign-off tasks only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_off_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_off_at: Option<DateTime<Utc>>,
    pub time_spent_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskProgress {
    pub fn new(assignment_id: Uuid, task_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            assignment_id,
            task_id,
            status: ProgressStatus::Pending,
            started_at: None,
            completed_at: None,
            signed_off_by: None,
            signed_off_at: None,
            time_spent_minutes: 0,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The first unmet hard dependency blocking a task, for errors and
/// dashboard rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blocker {
    pub task_id: Uuid,
    pub title: String,
    pub gate: GateType,
}

// ── Evidence ────────────────────────────────────────────────────────

/// Metadata record for an uploaded evidence file. Blob storage is
/// external; the engine only ever asks whether evidence exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: Uuid,
    pub task_progress_id: Uuid,
    pub uploaded_by: String,
    pub file_name: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub uploaded_at: DateTime<Utc>,
}

impl Evidence {
    pub fn new(
        task_progress_id: Uuid,
        uploaded_by: impl Into<String>,
        file_name: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_progress_id,
            uploaded_by: uploaded_by.into(),
            file_name: file_name.into(),
            metadata,
            uploaded_at: Utc::now(),
        }
    }
}

// ── Events ──────────────────────────────────────────────────────────

/// Kind of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AssignmentCreated,
    AssignmentStatusChanged,
    TaskStatusChanged,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::AssignmentCreated => "assignment_created",
            EventType::AssignmentStatusChanged => "assignment_status_changed",
            EventType::TaskStatusChanged => "task_status_changed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assignment_created" => Ok(EventType::AssignmentCreated),
            "assignment_status_changed" => Ok(EventType::AssignmentStatusChanged),
            "task_status_changed" => Ok(EventType::TaskStatusChanged),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// Append-only audit record. Statuses are stored as display strings since
/// one log spans both the assignment and task status domains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub assignment_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_progress_id: Option<Uuid>,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_status: Option<String>,
    pub triggered_by: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn assignment_created(
        assignment: &Assignment,
        triggered_by: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            assignment_id: assignment.id,
            task_progress_id: None,
            event_type: EventType::AssignmentCreated,
            old_status: None,
            new_status: Some(assignment.status.to_string()),
            triggered_by: triggered_by.into(),
            metadata,
            created_at: Utc::now(),
        }
    }

    pub fn assignment_status_changed(
        assignment_id: Uuid,
        old: AssignmentStatus,
        new: AssignmentStatus,
        triggered_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            assignment_id,
            task_progress_id: None,
            event_type: EventType::AssignmentStatusChanged,
            old_status: Some(old.to_string()),
            new_status: Some(new.to_string()),
            triggered_by: triggered_by.into(),
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn task_status_changed(
        assignment_id: Uuid,
        progress_id: Uuid,
        old: ProgressStatus,
        new: ProgressStatus,
        triggered_by: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            assignment_id,
            task_progress_id: Some(progress_id),
            event_type: EventType::TaskStatusChanged,
            old_status: Some(old.to_string()),
            new_status: Some(new.to_string()),
            triggered_by: triggered_by.into(),
            metadata,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_status_serde_snake_case() {
        let json = serde_json::to_string(&ProgressStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");

        let parsed: ProgressStatus = serde_json::from_str("\"waived\"").unwrap();
        assert_eq!(parsed, ProgressStatus::Waived);
    }

    #[test]
    fn status_display_matches_serde() {
        for status in [
            ProgressStatus::Pending,
            ProgressStatus::InProgress,
            ProgressStatus::Completed,
            ProgressStatus::Waived,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
            assert_eq!(status.as_str().parse::<ProgressStatus>().unwrap(), status);
        }

        for status in [
            AssignmentStatus::Active,
            AssignmentStatus::Paused,
            AssignmentStatus::Completed,
            AssignmentStatus::Cancelled,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
            assert_eq!(status.as_str().parse::<AssignmentStatus>().unwrap(), status);
        }
    }

    #[test]
    fn satisfies_dependents_matrix() {
        assert!(!ProgressStatus::Pending.satisfies_dependents());
        assert!(!ProgressStatus::InProgress.satisfies_dependents());
        assert!(ProgressStatus::Completed.satisfies_dependents());
        assert!(ProgressStatus::Waived.satisfies_dependents());
    }

    #[test]
    fn assignment_lifecycle_moves() {
        use AssignmentStatus::*;
        assert!(Active.can_change_to(Paused));
        assert!(Paused.can_change_to(Active));
        assert!(Active.can_change_to(Cancelled));
        assert!(Paused.can_change_to(Completed));
        assert!(!Active.can_change_to(Active));
        assert!(!Completed.can_change_to(Active));
        assert!(!Cancelled.can_change_to(Paused));

        assert!(Completed.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!Active.is_terminal());
        assert!(!Paused.is_terminal());
    }

    #[test]
    fn completion_gate_tagged_serde() {
        let gate = CompletionGate::SignOff {
            role: SignOffRole::Mentor,
        };
        let json = serde_json::to_string(&gate).unwrap();
        assert_eq!(json, "{\"kind\":\"sign_off\",\"role\":\"mentor\"}");

        let parsed: CompletionGate = serde_json::from_str("{\"kind\":\"evidence\"}").unwrap();
        assert_eq!(parsed, CompletionGate::Evidence);

        let parsed: CompletionGate = serde_json::from_str("{\"kind\":\"director\"}").unwrap();
        assert_eq!(parsed, CompletionGate::Director);
    }

    #[test]
    fn completion_gate_column_roundtrip() {
        for gate in [
            CompletionGate::None,
            CompletionGate::Evidence,
            CompletionGate::SignOff {
                role: SignOffRole::Mentor,
            },
            CompletionGate::SignOff {
                role: SignOffRole::ProgramDirector,
            },
            CompletionGate::Director,
        ] {
            let kind = gate.kind_str();
            let role = gate.sign_off_role().map(|r| r.as_str());
            assert_eq!(CompletionGate::from_parts(kind, role), Some(gate));
        }

        // sign_off without a role is not representable
        assert_eq!(CompletionGate::from_parts("sign_off", None), None);
        assert_eq!(CompletionGate::from_parts("mystery", None), None);
    }

    #[test]
    fn task_applicability_empty_means_all() {
        let mut task = Task {
            id: Uuid::new_v4(),
            phase_id: Uuid::new_v4(),
            title: "Lab safety walkthrough".into(),
            sort_order: 1,
            required: true,
            estimated_minutes: 30,
            task_type: TaskType::Orientation,
            gate: CompletionGate::None,
            applicable_types: Vec::new(),
        };
        assert!(task.applies_to(InstructorType::Lead));
        assert!(task.applies_to(InstructorType::Preceptor));

        task.applicable_types = vec![InstructorType::LabInstructor];
        assert!(task.applies_to(InstructorType::LabInstructor));
        assert!(!task.applies_to(InstructorType::Adjunct));
    }

    #[test]
    fn new_assignment_defaults() {
        let template_id = Uuid::new_v4();
        let a = Assignment::new(
            template_id,
            "jordan@ems.academy",
            InstructorType::Lead,
            "admin@ems.academy",
        );
        assert_eq!(a.status, AssignmentStatus::Active);
        assert_eq!(a.template_id, template_id);
        assert!(a.mentor_email.is_none());
        assert!(a.target_completion_date.is_none());
        assert!(a.actual_completion_date.is_none());

        let a = a.with_mentor("casey@ems.academy");
        assert_eq!(a.mentor_email.as_deref(), Some("casey@ems.academy"));
    }

    #[test]
    fn new_progress_defaults() {
        let p = TaskProgress::new(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(p.status, ProgressStatus::Pending);
        assert!(p.started_at.is_none());
        assert!(p.completed_at.is_none());
        assert!(p.signed_off_by.is_none());
        assert!(p.signed_off_at.is_none());
        assert_eq!(p.time_spent_minutes, 0);
    }

    #[test]
    fn task_draft_defaults() {
        let json = r#"{
            "key": "orientation",
            "title": "Campus orientation",
            "sort_order": 1,
            "task_type": "orientation"
        }"#;
        let draft: TaskDraft = serde_json::from_str(json).unwrap();
        assert!(draft.required);
        assert_eq!(draft.estimated_minutes, 0);
        assert_eq!(draft.gate, CompletionGate::None);
        assert!(draft.applicable_types.is_empty());
    }

    #[test]
    fn dependency_draft_defaults_to_hard() {
        let json = r#"{"task": "b", "depends_on": "a"}"#;
        let draft: DependencyDraft = serde_json::from_str(json).unwrap();
        assert_eq!(draft.gate, GateType::Hard);
    }

    #[test]
    fn event_constructors_stamp_statuses() {
        let assignment = Assignment::new(
            Uuid::new_v4(),
            "i@x.org",
            InstructorType::Adjunct,
            "a@x.org",
        );
        let e = Event::assignment_created(&assignment, "a@x.org", serde_json::json!({}));
        assert_eq!(e.event_type, EventType::AssignmentCreated);
        assert_eq!(e.new_status.as_deref(), Some("active"));
        assert!(e.old_status.is_none());
        assert!(e.task_progress_id.is_none());

        let progress_id = Uuid::new_v4();
        let e = Event::task_status_changed(
            assignment.id,
            progress_id,
            ProgressStatus::Pending,
            ProgressStatus::InProgress,
            "i@x.org",
            serde_json::Value::Null,
        );
        assert_eq!(e.old_status.as_deref(), Some("pending"));
        assert_eq!(e.new_status.as_deref(), Some("in_progress"));
        assert_eq!(e.task_progress_id, Some(progress_id));
    }

    #[test]
    fn event_type_serde_matches_display() {
        for et in [
            EventType::AssignmentCreated,
            EventType::AssignmentStatusChanged,
            EventType::TaskStatusChanged,
        ] {
            let json = serde_json::to_string(&et).unwrap();
            assert_eq!(json, format!("\"{et}\""));
            assert_eq!(et.as_str().parse::<EventType>().unwrap(), et);
        }
    }

    #[test]
    fn instructor_type_serde_matches_display() {
        for it in [
            InstructorType::Lead,
            InstructorType::Adjunct,
            InstructorType::LabInstructor,
            InstructorType::Preceptor,
        ] {
            let json = serde_json::to_string(&it).unwrap();
            assert_eq!(json, format!("\"{it}\""));
            assert_eq!(it.as_str().parse::<InstructorType>().unwrap(), it);
        }
    }

    #[test]
    fn task_type_serde_matches_display() {
        for tt in [
            TaskType::Orientation,
            TaskType::Credentialing,
            TaskType::Shadowing,
            TaskType::Teaching,
            TaskType::Administrative,
        ] {
            let json = serde_json::to_string(&tt).unwrap();
            assert_eq!(json, format!("\"{tt}\""));
            assert_eq!(tt.as_str().parse::<TaskType>().unwrap(), tt);
        }
    }
}
