//! Dashboard assembly — the one read model the program office looks at.
//!
//! A pure function over a loaded [`AssignmentContext`]; blocked flags are
//! recomputed on every read and never stored.

use serde::Serialize;
use uuid::Uuid;

use super::context::AssignmentContext;
use super::graph::DependencyGraph;
use super::model::{Assignment, Blocker, ProgressStatus, Task, TaskProgress};

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub assignment: Assignment,
    pub phases: Vec<PhaseView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_task: Option<NextTaskView>,
    pub summary: Summary,
}

#[derive(Debug, Serialize)]
pub struct PhaseView {
    pub id: Uuid,
    pub name: String,
    pub sort_order: i32,
    pub target_start_day: u32,
    pub target_end_day: u32,
    pub tasks: Vec<TaskView>,
}

#[derive(Debug, Serialize)]
pub struct TaskView {
    pub task: Task,
    pub progress: TaskProgress,
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocker: Option<Blocker>,
}

/// The "up next" panel: the first open, unblocked task in pathway order.
#[derive(Debug, Serialize)]
pub struct NextTaskView {
    pub progress_id: Uuid,
    pub task_id: Uuid,
    pub title: String,
    pub phase: String,
}

#[derive(Debug, Default, Serialize)]
pub struct Summary {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub waived: usize,
    pub blocked: usize,
    pub required_remaining: usize,
    /// (completed + waived) / total, floored. 0 when nothing is seeded.
    pub percent_complete: u32,
}

pub fn assemble(ctx: &AssignmentContext) -> Dashboard {
    let graph = DependencyGraph::for_template(&ctx.template);
    let statuses = ctx.status_by_task();

    let mut summary = Summary::default();
    let mut phases = Vec::with_capacity(ctx.template.phases.len());
    for phase in &ctx.template.phases {
        let mut tasks = Vec::new();
        for task in &phase.tasks {
            // No seeded row means the task does not apply to this
            // assignment's instructor type; it is omitted entirely.
            let Some(progress) = ctx.progress_for_task(task.id) else {
                continue;
            };
            summary.total += 1;
            match progress.status {
                ProgressStatus::Pending => summary.pending += 1,
                ProgressStatus::InProgress => summary.in_progress += 1,
                ProgressStatus::Completed => summary.completed += 1,
                ProgressStatus::Waived => summary.waived += 1,
            }
            if task.required && !progress.status.satisfies_dependents() {
                summary.required_remaining += 1;
            }
            let blocker = match progress.status {
                ProgressStatus::Pending | ProgressStatus::InProgress => {
                    graph.first_unmet_hard(task.id, &statuses)
                }
                _ => None,
            };
            let blocked = blocker.is_some();
            if blocked {
                summary.blocked += 1;
            }
            tasks.push(TaskView {
                task: task.clone(),
                progress: progress.clone(),
                blocked,
                blocker,
            });
        }
        phases.push(PhaseView {
            id: phase.id,
            name: phase.name.clone(),
            sort_order: phase.sort_order,
            target_start_day: phase.target_start_day,
            target_end_day: phase.target_end_day,
            tasks,
        });
    }
    if summary.total > 0 {
        summary.percent_complete =
            (((summary.completed + summary.waived) * 100) / summary.total) as u32;
    }

    let next_task = ctx.next_actionable(&graph).map(|(task, progress)| {
        let phase = ctx
            .template
            .phases
            .iter()
            .find(|p| p.id == task.phase_id)
            .map(|p| p.name.clone())
            .unwrap_or_default();
        NextTaskView {
            progress_id: progress.id,
            task_id: task.id,
            title: task.title.clone(),
            phase,
        }
    });

    Dashboard {
        assignment: ctx.assignment.clone(),
        phases,
        next_task,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::model::{
        AssignmentStatus, CompletionGate, GateType, InstructorType, Phase, TaskDependency,
        TaskType, Template,
    };
    use chrono::Utc;

    fn task(phase_id: Uuid, title: &str, sort_order: i32, required: bool) -> Task {
        Task {
            id: Uuid::new_v4(),
            phase_id,
            title: title.into(),
            sort_order,
            required,
            estimated_minutes: 10,
            task_type: TaskType::Orientation,
            gate: CompletionGate::None,
            applicable_types: Vec::new(),
        }
    }

    fn progress(assignment_id: Uuid, task_id: Uuid, status: ProgressStatus) -> TaskProgress {
        let mut p = TaskProgress::new(assignment_id, task_id);
        p.status = status;
        p
    }

    /// Phase 1: intake, drills. Phase 2: capstone (hard-depends on drills).
    fn context(statuses: [Option<ProgressStatus>; 3]) -> AssignmentContext {
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        let intake = task(p1, "Intake paperwork", 1, true);
        let drills = task(p1, "Skills drills", 2, true);
        let capstone = task(p2, "Capstone session", 1, true);
        let edge = TaskDependency {
            task_id: capstone.id,
            depends_on_task_id: drills.id,
            gate: GateType::Hard,
        };
        let template = Template {
            id: Uuid::new_v4(),
            name: "Pathway".into(),
            active: true,
            created_at: Utc::now(),
            phases: vec![
                Phase {
                    id: p1,
                    template_id: Uuid::nil(),
                    name: "Foundations".into(),
                    sort_order: 1,
                    target_start_day: 0,
                    target_end_day: 14,
                    tasks: vec![intake.clone(), drills.clone()],
                },
                Phase {
                    id: p2,
                    template_id: Uuid::nil(),
                    name: "Practice".into(),
                    sort_order: 2,
                    target_start_day: 15,
                    target_end_day: 30,
                    tasks: vec![capstone.clone()],
                },
            ],
            dependencies: vec![edge],
        };
        let assignment = Assignment::new(
            template.id,
            "jordan@ems.academy",
            InstructorType::Lead,
            "admin@ems.academy",
        );
        let rows = [intake.id, drills.id, capstone.id]
            .into_iter()
            .zip(statuses)
            .filter_map(|(task_id, status)| status.map(|s| progress(assignment.id, task_id, s)))
            .collect();
        AssignmentContext {
            assignment,
            template,
            progress: rows,
        }
    }

    #[test]
    fn summary_counts_and_percent() {
        use ProgressStatus::*;
        let ctx = context([Some(Completed), Some(InProgress), Some(Pending)]);
        let dashboard = assemble(&ctx);

        assert_eq!(dashboard.summary.total, 3);
        assert_eq!(dashboard.summary.completed, 1);
        assert_eq!(dashboard.summary.in_progress, 1);
        assert_eq!(dashboard.summary.pending, 1);
        assert_eq!(dashboard.summary.required_remaining, 2);
        assert_eq!(dashboard.summary.percent_complete, 33);
    }

    #[test]
    fn waived_counts_toward_percent_like_completed() {
        use ProgressStatus::*;
        let ctx = context([Some(Completed), Some(Waived), Some(Pending)]);
        let dashboard = assemble(&ctx);
        assert_eq!(dashboard.summary.percent_complete, 66);
        assert_eq!(dashboard.summary.required_remaining, 1);
    }

    #[test]
    fn blocked_is_flagged_only_on_open_rows() {
        use ProgressStatus::*;
        let ctx = context([Some(Pending), Some(Pending), Some(Pending)]);
        let dashboard = assemble(&ctx);

        // Only the capstone has a hard dependency, and drills are unmet.
        assert_eq!(dashboard.summary.blocked, 1);
        let capstone = &dashboard.phases[1].tasks[0];
        assert!(capstone.blocked);
        assert_eq!(
            capstone.blocker.as_ref().map(|b| b.title.as_str()),
            Some("Skills drills")
        );

        // Waiving the prerequisite unblocks it.
        let ctx = context([Some(Pending), Some(Waived), Some(Pending)]);
        let dashboard = assemble(&ctx);
        assert_eq!(dashboard.summary.blocked, 0);
    }

    #[test]
    fn unseeded_tasks_are_omitted() {
        use ProgressStatus::*;
        // Skills drills never seeded: wrong instructor type.
        let ctx = context([Some(Pending), None, Some(Pending)]);
        let dashboard = assemble(&ctx);

        assert_eq!(dashboard.summary.total, 2);
        assert_eq!(dashboard.phases[0].tasks.len(), 1);
        assert_eq!(dashboard.phases[0].tasks[0].task.title, "Intake paperwork");
    }

    #[test]
    fn next_task_points_at_the_first_open_unblocked_row() {
        use ProgressStatus::*;
        let ctx = context([Some(Completed), Some(Pending), Some(Pending)]);
        let next = assemble(&ctx).next_task.expect("next task");
        assert_eq!(next.title, "Skills drills");
        assert_eq!(next.phase, "Foundations");

        // Everything satisfied: nothing up next.
        let ctx = context([Some(Completed), Some(Completed), Some(Waived)]);
        assert!(assemble(&ctx).next_task.is_none());
    }

    #[test]
    fn empty_context_yields_zero_percent() {
        let ctx = context([None, None, None]);
        let dashboard = assemble(&ctx);
        assert_eq!(dashboard.summary.total, 0);
        assert_eq!(dashboard.summary.percent_complete, 0);
    }
}
