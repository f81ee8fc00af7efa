//! AssignmentContext — one assignment's full working set, loaded once per
//! request and shared by the engine, manager, and dashboard.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::OnboardingError;
use crate::store::Store;

use super::graph::DependencyGraph;
use super::model::{Assignment, ProgressStatus, Task, TaskProgress, Template};

/// An assignment together with its hydrated template and progress rows.
#[derive(Debug, Clone)]
pub struct AssignmentContext {
    pub assignment: Assignment,
    pub template: Template,
    pub progress: Vec<TaskProgress>,
}

impl AssignmentContext {
    /// Load the assignment, its template, and all progress rows.
    pub async fn load(store: &dyn Store, assignment_id: Uuid) -> Result<Self, OnboardingError> {
        let assignment = store.get_assignment(assignment_id).await?.ok_or_else(|| {
            OnboardingError::NotFound {
                entity: "assignment",
                id: assignment_id.to_string(),
            }
        })?;

        let template = store
            .get_template(assignment.template_id)
            .await?
            .ok_or_else(|| OnboardingError::NotFound {
                entity: "template",
                id: assignment.template_id.to_string(),
            })?;

        let progress = store.list_progress_for_assignment(assignment_id).await?;

        Ok(Self {
            assignment,
            template,
            progress,
        })
    }

    /// Task definition by id, across all phases.
    pub fn task(&self, task_id: Uuid) -> Option<&Task> {
        self.template.tasks().find(|t| t.id == task_id)
    }

    /// Progress row for a task, if the task was seeded for this assignment.
    pub fn progress_for_task(&self, task_id: Uuid) -> Option<&TaskProgress> {
        self.progress.iter().find(|p| p.task_id == task_id)
    }

    /// Current status of every seeded task, for gate evaluation.
    pub fn status_by_task(&self) -> HashMap<Uuid, ProgressStatus> {
        self.progress.iter().map(|p| (p.task_id, p.status)).collect()
    }

    /// Required seeded tasks not yet in a satisfying status.
    pub fn remaining_required(&self) -> usize {
        self.progress
            .iter()
            .filter(|p| {
                let required = self.task(p.task_id).map(|t| t.required).unwrap_or(false);
                required && !p.status.satisfies_dependents()
            })
            .count()
    }

    /// The first open, unblocked task in phase/task sort order.
    pub fn next_actionable(&self, graph: &DependencyGraph<'_>) -> Option<(&Task, &TaskProgress)> {
        let statuses = self.status_by_task();
        for phase in &self.template.phases {
            for task in &phase.tasks {
                let Some(progress) = self.progress_for_task(task.id) else {
                    continue; // not applicable to this instructor type
                };
                if !matches!(
                    progress.status,
                    ProgressStatus::Pending | ProgressStatus::InProgress
                ) {
                    continue;
                }
                if graph.first_unmet_hard(task.id, &statuses).is_none() {
                    return Some((task, progress));
                }
            }
        }
        None
    }
}
