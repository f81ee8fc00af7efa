//! ProgressionEngine — the task-transition pipeline.
//!
//! Every rule about who may move a task, when, and what that move drags
//! along (gates, warnings, audit events, assignment auto-completion) lives
//! here. The store below only persists; the routes above only translate.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::directory::{Directory, User};
use crate::error::OnboardingError;
use crate::notify::{send_detached, Notifier};
use crate::roles::SignOffRole;
use crate::store::Store;

use super::context::AssignmentContext;
use super::graph::DependencyGraph;
use super::model::{
    Assignment, AssignmentStatus, Blocker, CompletionGate, Event, Evidence, ProgressStatus, Task,
    TaskProgress,
};

/// Optional fields a caller may attach to a transition. Both replace the
/// stored value when present and leave it alone when absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransitionPayload {
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub time_spent_minutes: Option<u32>,
}

/// What a successful transition produced: the row as persisted, advisory
/// soft-gate warnings, and the audit events written (the transition itself,
/// plus the assignment completion when this move finished the pathway).
#[derive(Debug, Serialize)]
pub struct TransitionOutcome {
    pub progress: TaskProgress,
    pub warnings: Vec<String>,
    pub events: Vec<Event>,
}

pub struct ProgressionEngine {
    store: Arc<dyn Store>,
    directory: Arc<Directory>,
    notifier: Arc<dyn Notifier>,
    events_tx: broadcast::Sender<Event>,
}

impl ProgressionEngine {
    pub fn new(
        store: Arc<dyn Store>,
        directory: Arc<Directory>,
        notifier: Arc<dyn Notifier>,
        events_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            store,
            directory,
            notifier,
            events_tx,
        }
    }

    /// Move one task to a requested status.
    ///
    /// 1. Load the progress row and its assignment context.
    /// 2. Authorize: the assignment's instructor, its mentor, or admin
    ///    tier. Waiving additionally requires admin tier.
    /// 3. The assignment must be `active`; anything else is a conflict.
    /// 4. Requesting the current status is an idempotent no-op: success,
    ///    no event, no warnings.
    /// 5. Starting or completing a task with an unmet hard dependency is
    ///    refused, naming the first blocker in phase/task order.
    /// 6. Completion gates are enforced on entry to `completed`: evidence
    ///    on record, a qualifying sign-off principal, or an active
    ///    director endorsement for the actor.
    /// 7. The write is a compare-and-set on the status read in step 1,
    ///    with the audit event in the same transaction; a lost race is a
    ///    conflict and writes nothing.
    ///
    /// Afterwards: soft-gate warnings are collected (advisory, never
    /// blocking), and when the move satisfied the last required task the
    /// assignment itself is completed under its own compare-and-set.
    pub async fn request_transition(
        &self,
        progress_id: Uuid,
        requested: ProgressStatus,
        actor: &User,
        payload: TransitionPayload,
    ) -> Result<TransitionOutcome, OnboardingError> {
        let progress = self.get_progress(progress_id).await?;
        let mut ctx = AssignmentContext::load(self.store.as_ref(), progress.assignment_id).await?;
        let task = ctx
            .task(progress.task_id)
            .ok_or_else(|| OnboardingError::NotFound {
                entity: "task",
                id: progress.task_id.to_string(),
            })?
            .clone();

        if !is_participant(&ctx.assignment, actor) {
            return Err(OnboardingError::Forbidden {
                email: actor.email.clone(),
                reason: "not a participant in this assignment".into(),
            });
        }
        if requested == ProgressStatus::Waived && !actor.role.is_admin_tier() {
            return Err(OnboardingError::Forbidden {
                email: actor.email.clone(),
                reason: "only administrators may waive tasks".into(),
            });
        }

        if ctx.assignment.status != AssignmentStatus::Active {
            return Err(OnboardingError::AssignmentNotActive {
                assignment_id: ctx.assignment.id,
                status: ctx.assignment.status,
            });
        }

        let old_status = progress.status;
        if requested == old_status {
            return Ok(TransitionOutcome {
                progress,
                warnings: Vec::new(),
                events: Vec::new(),
            });
        }

        let statuses = ctx.status_by_task();
        let graph = DependencyGraph::for_template(&ctx.template);
        if matches!(
            requested,
            ProgressStatus::InProgress | ProgressStatus::Completed
        ) {
            if let Some(blocker) = graph.first_unmet_hard(task.id, &statuses) {
                return Err(OnboardingError::Blocked {
                    task_id: blocker.task_id,
                    title: blocker.title,
                    gate: blocker.gate,
                });
            }
        }

        if requested == ProgressStatus::Completed {
            self.enforce_gate(&ctx.assignment, &task, progress_id, actor)
                .await?;
        }

        let now = chrono::Utc::now();
        let mut updated = progress.clone();
        let mut changes = serde_json::Map::new();
        updated.status = requested;
        match requested {
            ProgressStatus::InProgress => {
                if updated.started_at.is_none() {
                    updated.started_at = Some(now);
                }
            }
            ProgressStatus::Completed => {
                updated.completed_at = Some(now);
                if matches!(task.gate, CompletionGate::SignOff { .. }) {
                    updated.signed_off_by = Some(actor.email.clone());
                    updated.signed_off_at = Some(now);
                    changes.insert("signed_off_by".into(), json!(actor.email));
                }
            }
            ProgressStatus::Pending | ProgressStatus::Waived => {}
        }
        if old_status == ProgressStatus::Completed {
            // Reverting out of completed retracts the completion record.
            updated.completed_at = None;
            updated.signed_off_by = None;
            updated.signed_off_at = None;
        }
        if let Some(notes) = &payload.notes {
            updated.notes = Some(notes.clone());
            changes.insert("notes".into(), json!(notes));
        }
        if let Some(minutes) = payload.time_spent_minutes {
            updated.time_spent_minutes = minutes;
            changes.insert("time_spent_minutes".into(), json!(minutes));
        }
        updated.updated_at = now;

        let metadata = if changes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::Value::Object(changes)
        };
        let event = Event::task_status_changed(
            ctx.assignment.id,
            progress_id,
            old_status,
            requested,
            &actor.email,
            metadata,
        );
        if !self.store.update_progress(&updated, old_status, &event).await? {
            return Err(OnboardingError::ConcurrentUpdate { id: progress_id });
        }
        info!(
            progress_id = %progress_id,
            task = %task.title,
            from = %old_status,
            to = %requested,
            by = %actor.email,
            "Task transition"
        );
        let mut events = vec![event.clone()];
        let _ = self.events_tx.send(event);

        let warnings = if matches!(
            requested,
            ProgressStatus::InProgress | ProgressStatus::Completed
        ) {
            graph
                .unmet_soft(task.id, &statuses)
                .into_iter()
                .map(|t| format!("Recommended: complete {} first.", t.title))
                .collect()
        } else {
            Vec::new()
        };

        if requested.satisfies_dependents() {
            // The rows loaded at entry predate this write and can miss a
            // sibling transition's commit. Decide completion on a fresh read.
            ctx.progress = self
                .store
                .list_progress_for_assignment(ctx.assignment.id)
                .await?;
            if ctx.remaining_required() == 0 {
                if let Some(completion) = self.complete_assignment(&ctx, actor).await? {
                    events.push(completion);
                }
            }
        }

        Ok(TransitionOutcome {
            progress: updated,
            warnings,
            events,
        })
    }

    /// The first unmet hard dependency for this task, or none. Recomputed
    /// from edges and sibling statuses on every call, never persisted.
    pub async fn compute_blocked(
        &self,
        progress_id: Uuid,
    ) -> Result<Option<Blocker>, OnboardingError> {
        let progress = self.get_progress(progress_id).await?;
        let ctx = AssignmentContext::load(self.store.as_ref(), progress.assignment_id).await?;
        let task = ctx
            .task(progress.task_id)
            .ok_or_else(|| OnboardingError::NotFound {
                entity: "task",
                id: progress.task_id.to_string(),
            })?;
        let graph = DependencyGraph::for_template(&ctx.template);
        Ok(graph.first_unmet_hard(task.id, &ctx.status_by_task()))
    }

    /// The first task worth doing: phases by sort order, tasks by sort
    /// order, first open progress row without an unmet hard dependency.
    pub async fn next_task(
        &self,
        assignment_id: Uuid,
    ) -> Result<Option<(Task, TaskProgress)>, OnboardingError> {
        let ctx = AssignmentContext::load(self.store.as_ref(), assignment_id).await?;
        let graph = DependencyGraph::for_template(&ctx.template);
        Ok(ctx
            .next_actionable(&graph)
            .map(|(task, progress)| (task.clone(), progress.clone())))
    }

    /// Attach an evidence file's metadata to a progress row. Same
    /// authorization as transitions; the engine itself only ever asks
    /// whether evidence exists.
    pub async fn record_evidence(
        &self,
        progress_id: Uuid,
        actor: &User,
        file_name: &str,
        metadata: serde_json::Value,
    ) -> Result<Evidence, OnboardingError> {
        let progress = self.get_progress(progress_id).await?;
        let ctx = AssignmentContext::load(self.store.as_ref(), progress.assignment_id).await?;
        if !is_participant(&ctx.assignment, actor) {
            return Err(OnboardingError::Forbidden {
                email: actor.email.clone(),
                reason: "not a participant in this assignment".into(),
            });
        }
        let evidence = Evidence::new(progress_id, &actor.email, file_name, metadata);
        self.store.add_evidence(&evidence).await?;
        Ok(evidence)
    }

    pub async fn list_evidence(&self, progress_id: Uuid) -> Result<Vec<Evidence>, OnboardingError> {
        self.get_progress(progress_id).await?;
        Ok(self.store.list_evidence(progress_id).await?)
    }

    async fn get_progress(&self, progress_id: Uuid) -> Result<TaskProgress, OnboardingError> {
        self.store
            .get_progress(progress_id)
            .await?
            .ok_or_else(|| OnboardingError::NotFound {
                entity: "task progress",
                id: progress_id.to_string(),
            })
    }

    /// Completion gates, enforced on entry to `completed` only.
    async fn enforce_gate(
        &self,
        assignment: &Assignment,
        task: &Task,
        progress_id: Uuid,
        actor: &User,
    ) -> Result<(), OnboardingError> {
        match task.gate {
            CompletionGate::None => Ok(()),
            CompletionGate::Evidence => {
                if self.store.count_evidence(progress_id).await? == 0 {
                    return Err(OnboardingError::EvidenceRequired {
                        title: task.title.clone(),
                    });
                }
                Ok(())
            }
            CompletionGate::SignOff { role } => {
                let qualifies = match role {
                    SignOffRole::Mentor => {
                        actor.role.is_admin_tier()
                            || assignment.mentor_email.as_deref() == Some(actor.email.as_str())
                    }
                    SignOffRole::ProgramDirector => actor.role.is_admin_tier(),
                };
                if !qualifies {
                    return Err(OnboardingError::SignOffRequired {
                        title: task.title.clone(),
                        role,
                    });
                }
                Ok(())
            }
            CompletionGate::Director => {
                // Endorsement is personal: required of the actor whatever
                // their role.
                if !self
                    .directory
                    .has_active_director_endorsement(actor.id)
                    .await?
                {
                    return Err(OnboardingError::DirectorEndorsementRequired {
                        title: task.title.clone(),
                    });
                }
                Ok(())
            }
        }
    }

    /// Complete the assignment after its last required task was satisfied.
    ///
    /// Deliberately not routed through the manager: this is a system
    /// action triggered by whoever finished the task, not an
    /// administrative move. Compare-and-set keeps concurrent completions
    /// from double-firing; losing the race just means someone else
    /// completed it first.
    async fn complete_assignment(
        &self,
        ctx: &AssignmentContext,
        actor: &User,
    ) -> Result<Option<Event>, OnboardingError> {
        let event = Event::assignment_status_changed(
            ctx.assignment.id,
            AssignmentStatus::Active,
            AssignmentStatus::Completed,
            &actor.email,
        );
        let changed = self
            .store
            .update_assignment_status(
                ctx.assignment.id,
                AssignmentStatus::Active,
                AssignmentStatus::Completed,
                &event,
            )
            .await?;
        if !changed {
            debug!(
                assignment_id = %ctx.assignment.id,
                "Assignment already left active, skipping auto-completion"
            );
            return Ok(None);
        }
        info!(
            assignment_id = %ctx.assignment.id,
            instructor = %ctx.assignment.instructor_email,
            "Assignment auto-completed"
        );
        let _ = self.events_tx.send(event.clone());
        send_detached(
            &self.notifier,
            &ctx.assignment.instructor_email,
            "Onboarding complete",
            &format!(
                "Congratulations, your onboarding pathway \"{}\" is complete.\n",
                ctx.template.name
            ),
        );
        Ok(Some(event))
    }
}

fn is_participant(assignment: &Assignment, actor: &User) -> bool {
    actor.role.is_admin_tier()
        || actor.email == assignment.instructor_email
        || assignment.mentor_email.as_deref() == Some(actor.email.as_str())
}
