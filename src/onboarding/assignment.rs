//! AssignmentManager — opening, steering, and closing onboarding assignments.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::directory::{Directory, User};
use crate::error::OnboardingError;
use crate::notify::{send_detached, Notifier};
use crate::store::Store;

use super::context::AssignmentContext;
use super::model::{Assignment, AssignmentStatus, Event, InstructorType, TaskProgress};

/// Input for [`AssignmentManager::create`].
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAssignmentRequest {
    pub instructor_email: String,
    pub instructor_type: InstructorType,
    /// Omitted = the earliest-created active template.
    #[serde(default)]
    pub template_id: Option<Uuid>,
    #[serde(default)]
    pub mentor_email: Option<String>,
    /// Omitted = today.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub target_completion_date: Option<NaiveDate>,
}

pub struct AssignmentManager {
    store: Arc<dyn Store>,
    directory: Arc<Directory>,
    notifier: Arc<dyn Notifier>,
    events_tx: broadcast::Sender<Event>,
}

impl AssignmentManager {
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

    /// Open an onboarding assignment for an instructor.
    ///
    /// 1. Admin tier only.
    /// 2. The instructor, and the mentor if given, must exist in the
    ///    directory.
    /// 3. One open assignment per instructor: an existing active or paused
    ///    one is a conflict.
    /// 4. Template: the requested id, or the earliest-created active
    ///    template when omitted.
    /// 5. The assignment row, one pending progress row per applicable task,
    ///    and the `assignment_created` event are written in one transaction.
    /// 6. The instructor is emailed fire-and-forget.
    pub async fn create(
        &self,
        actor: &User,
        request: CreateAssignmentRequest,
    ) -> Result<Assignment, OnboardingError> {
        if !actor.role.is_admin_tier() {
            return Err(OnboardingError::Forbidden {
                email: actor.email.clone(),
                reason: "only administrators may create assignments".into(),
            });
        }

        let instructor = self
            .directory
            .lookup(&request.instructor_email)
            .await?
            .ok_or_else(|| OnboardingError::NotFound {
                entity: "user",
                id: request.instructor_email.clone(),
            })?;

        let mentor = match &request.mentor_email {
            Some(email) => Some(self.directory.lookup(email).await?.ok_or_else(|| {
                OnboardingError::NotFound {
                    entity: "user",
                    id: email.clone(),
                }
            })?),
            None => None,
        };

        if let Some(open) = self.store.find_open_assignment(&instructor.email).await? {
            return Err(OnboardingError::DuplicateAssignment {
                instructor_email: instructor.email,
                assignment_id: open.id,
            });
        }

        let template = match request.template_id {
            Some(id) => {
                self.store
                    .get_template(id)
                    .await?
                    .ok_or_else(|| OnboardingError::NotFound {
                        entity: "template",
                        id: id.to_string(),
                    })?
            }
            None => {
                let id = self.store.earliest_active_template_id().await?.ok_or(
                    OnboardingError::NotFound {
                        entity: "template",
                        id: "default".into(),
                    },
                )?;
                self.store
                    .get_template(id)
                    .await?
                    .ok_or_else(|| OnboardingError::NotFound {
                        entity: "template",
                        id: id.to_string(),
                    })?
            }
        };

        let mut assignment = Assignment::new(
            template.id,
            &instructor.email,
            request.instructor_type,
            &actor.email,
        );
        if let Some(mentor) = &mentor {
            assignment = assignment.with_mentor(&mentor.email);
        }
        if let Some(start) = request.start_date {
            assignment = assignment.with_start_date(start);
        }
        if let Some(target) = request.target_completion_date {
            assignment = assignment.with_target_completion(target);
        }

        let seeded: Vec<TaskProgress> = template
            .applicable_tasks(request.instructor_type)
            .map(|task| TaskProgress::new(assignment.id, task.id))
            .collect();

        let event = Event::assignment_created(
            &assignment,
            &actor.email,
            json!({
                "template_id": template.id,
                "template_name": template.name,
                "task_count": seeded.len(),
            }),
        );

        self.store
            .create_assignment(&assignment, &seeded, &event)
            .await?;
        let _ = self.events_tx.send(event);

        send_detached(
            &self.notifier,
            &assignment.instructor_email,
            "Your onboarding assignment is ready",
            &format!(
                "Hi {},\n\nYour onboarding pathway \"{}\" starts on {}. \
                 {} task(s) are waiting for you.\n",
                instructor.name,
                template.name,
                assignment.start_date,
                seeded.len(),
            ),
        );

        Ok(assignment)
    }

    /// Move an assignment through its lifecycle: pause, resume, cancel, or
    /// complete. Admin tier only.
    ///
    /// Completion requires every required applicable task to be satisfied,
    /// and stamps `actual_completion_date`. The write is a compare-and-set
    /// against the status read here; losing that race is a conflict, never
    /// an overwrite.
    pub async fn update_status(
        &self,
        actor: &User,
        assignment_id: Uuid,
        new_status: AssignmentStatus,
    ) -> Result<Assignment, OnboardingError> {
        if !actor.role.is_admin_tier() {
            return Err(OnboardingError::Forbidden {
                email: actor.email.clone(),
                reason: "only administrators may change assignment status".into(),
            });
        }

        let ctx = AssignmentContext::load(self.store.as_ref(), assignment_id).await?;
        let old_status = ctx.assignment.status;
        if !old_status.can_change_to(new_status) {
            return Err(OnboardingError::InvalidStatusChange {
                from: old_status,
                to: new_status,
            });
        }
        if new_status == AssignmentStatus::Completed {
            let remaining = ctx.remaining_required();
            if remaining > 0 {
                return Err(OnboardingError::TasksOutstanding {
                    assignment_id,
                    remaining,
                });
            }
        }

        let event =
            Event::assignment_status_changed(assignment_id, old_status, new_status, &actor.email);
        let changed = self
            .store
            .update_assignment_status(assignment_id, old_status, new_status, &event)
            .await?;
        if !changed {
            return Err(OnboardingError::ConcurrentUpdate { id: assignment_id });
        }
        let _ = self.events_tx.send(event);
        info!(
            assignment_id = %assignment_id,
            from = %old_status,
            to = %new_status,
            by = %actor.email,
            "Assignment status changed"
        );

        match new_status {
            AssignmentStatus::Completed => send_detached(
                &self.notifier,
                &ctx.assignment.instructor_email,
                "Onboarding complete",
                &format!(
                    "Congratulations, your onboarding pathway \"{}\" is complete.\n",
                    ctx.template.name
                ),
            ),
            AssignmentStatus::Cancelled => send_detached(
                &self.notifier,
                &ctx.assignment.instructor_email,
                "Onboarding assignment cancelled",
                &format!(
                    "Your onboarding pathway \"{}\" was cancelled. \
                     Contact the program office with any questions.\n",
                    ctx.template.name
                ),
            ),
            _ => {}
        }

        self.store
            .get_assignment(assignment_id)
            .await?
            .ok_or_else(|| OnboardingError::NotFound {
                entity: "assignment",
                id: assignment_id.to_string(),
            })
    }

    /// Remove an assignment and everything hanging off it (events, evidence,
    /// progress rows) in one transaction. Admin tier only. No soft-delete.
    pub async fn delete(&self, actor: &User, assignment_id: Uuid) -> Result<(), OnboardingError> {
        if !actor.role.is_admin_tier() {
            return Err(OnboardingError::Forbidden {
                email: actor.email.clone(),
                reason: "only administrators may delete assignments".into(),
            });
        }
        let assignment = self
            .store
            .get_assignment(assignment_id)
            .await?
            .ok_or_else(|| OnboardingError::NotFound {
                entity: "assignment",
                id: assignment_id.to_string(),
            })?;
        if !self.store.delete_assignment(assignment_id).await? {
            return Err(OnboardingError::NotFound {
                entity: "assignment",
                id: assignment_id.to_string(),
            });
        }
        send_detached(
            &self.notifier,
            &assignment.instructor_email,
            "Onboarding assignment removed",
            "Your onboarding assignment was removed by the program office.\n",
        );
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Assignment>, OnboardingError> {
        Ok(self.store.list_assignments().await?)
    }

    /// Insertion-ordered audit feed for one assignment.
    pub async fn events(&self, assignment_id: Uuid) -> Result<Vec<Event>, OnboardingError> {
        if self.store.get_assignment(assignment_id).await?.is_none() {
            return Err(OnboardingError::NotFound {
                entity: "assignment",
                id: assignment_id.to_string(),
            });
        }
        Ok(self.store.list_events_for_assignment(assignment_id).await?)
    }
}
