//! Dependency graph queries over a template's task edges.
//!
//! The graph borrows from a hydrated [`Template`] and answers two questions:
//! which unmet hard prerequisite blocks a task, and which unmet soft
//! prerequisites warrant a warning. It also validates acyclicity at
//! authoring time so a template can never ship with a deadlocked edge set.

use std::collections::HashMap;

use uuid::Uuid;

use crate::onboarding::model::{
    Blocker, GateType, ProgressStatus, Task, TaskDependency, Template,
};

pub struct DependencyGraph<'a> {
    /// Tasks in phase/task sort order.
    tasks: Vec<&'a Task>,
    /// Task id → position in `tasks`.
    index: HashMap<Uuid, usize>,
    /// Prerequisite edges keyed by dependent task, preserving the
    /// template's edge order (prerequisite phase/task sort order).
    edges: HashMap<Uuid, Vec<&'a TaskDependency>>,
}

impl<'a> DependencyGraph<'a> {
    pub fn for_template(template: &'a Template) -> Self {
        let tasks: Vec<&Task> = template.tasks().collect();
        let index: HashMap<Uuid, usize> =
            tasks.iter().enumerate().map(|(i, t)| (t.id, i)).collect();

        let mut edges: HashMap<Uuid, Vec<&TaskDependency>> = HashMap::new();
        for dep in &template.dependencies {
            edges.entry(dep.task_id).or_default().push(dep);
        }

        Self {
            tasks,
            index,
            edges,
        }
    }

    fn prerequisites(&self, task_id: Uuid) -> &[&'a TaskDependency] {
        self.edges.get(&task_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether a prerequisite is satisfied for the given progress map.
    ///
    /// A prerequisite with no progress row was not seeded for this
    /// instructor type and is treated as satisfied.
    fn is_satisfied(dep_id: Uuid, statuses: &HashMap<Uuid, ProgressStatus>) -> bool {
        statuses
            .get(&dep_id)
            .is_none_or(|s| s.satisfies_dependents())
    }

    /// The first unmet hard prerequisite of `task_id`, in edge order.
    pub fn first_unmet_hard(
        &self,
        task_id: Uuid,
        statuses: &HashMap<Uuid, ProgressStatus>,
    ) -> Option<Blocker> {
        self.prerequisites(task_id)
            .iter()
            .filter(|dep| dep.gate == GateType::Hard)
            .find(|dep| !Self::is_satisfied(dep.depends_on_task_id, statuses))
            .and_then(|dep| {
                let task = self.task(dep.depends_on_task_id)?;
                Some(Blocker {
                    task_id: task.id,
                    title: task.title.clone(),
                    gate: GateType::Hard,
                })
            })
    }

    /// Unmet soft prerequisites of `task_id`, in edge order.
    pub fn unmet_soft(
        &self,
        task_id: Uuid,
        statuses: &HashMap<Uuid, ProgressStatus>,
    ) -> Vec<&'a Task> {
        self.prerequisites(task_id)
            .iter()
            .filter(|dep| dep.gate == GateType::Soft)
            .filter(|dep| !Self::is_satisfied(dep.depends_on_task_id, statuses))
            .filter_map(|dep| self.task(dep.depends_on_task_id))
            .collect()
    }

    fn task(&self, task_id: Uuid) -> Option<&'a Task> {
        self.index.get(&task_id).map(|&i| self.tasks[i])
    }

    /// Kahn's algorithm over every edge, hard and soft. Returns the tasks
    /// caught in a cycle, in phase/task sort order, or `Ok` for a DAG.
    ///
    /// Soft cycles are rejected too: a soft loop can never block anyone,
    /// but it makes the ordering advice permanently self-referential,
    /// which is an authoring mistake.
    pub fn validate_acyclic(&self) -> Result<(), Vec<&'a Task>> {
        let mut in_degree: HashMap<Uuid, usize> =
            self.tasks.iter().map(|t| (t.id, 0)).collect();
        for deps in self.edges.values() {
            for dep in deps {
                if let Some(d) = in_degree.get_mut(&dep.task_id) {
                    *d += 1;
                }
            }
        }

        // Dependents of each task, for decrementing as prerequisites clear.
        let mut dependents: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for deps in self.edges.values() {
            for dep in deps {
                dependents
                    .entry(dep.depends_on_task_id)
                    .or_default()
                    .push(dep.task_id);
            }
        }

        let mut queue: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|t| in_degree.get(&t.id) == Some(&0))
            .map(|t| t.id)
            .collect();
        let mut processed = 0usize;

        while let Some(id) = queue.pop() {
            processed += 1;
            if let Some(next) = dependents.get(&id) {
                for &dependent in next {
                    if let Some(d) = in_degree.get_mut(&dependent) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push(dependent);
                        }
                    }
                }
            }
        }

        if processed == self.tasks.len() {
            Ok(())
        } else {
            let mut cyclic: Vec<&Task> = self
                .tasks
                .iter()
                .copied()
                .filter(|t| in_degree.get(&t.id).is_some_and(|&d| d > 0))
                .collect();
            cyclic.sort_by_key(|t| self.index[&t.id]);
            Err(cyclic)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::model::{CompletionGate, Phase, TaskType};
    use chrono::Utc;

    fn task(phase_id: Uuid, title: &str, sort_order: i32) -> Task {
        Task {
            id: Uuid::new_v4(),
            phase_id,
            title: title.into(),
            sort_order,
            required: true,
            estimated_minutes: 30,
            task_type: TaskType::Orientation,
            gate: CompletionGate::None,
            applicable_types: Vec::new(),
        }
    }

    fn template(tasks: Vec<Task>, dependencies: Vec<TaskDependency>) -> Template {
        let template_id = Uuid::new_v4();
        let phase_id = tasks.first().map(|t| t.phase_id).unwrap_or_default();
        Template {
            id: template_id,
            name: "Test pathway".into(),
            active: true,
            created_at: Utc::now(),
            phases: vec![Phase {
                id: phase_id,
                template_id,
                name: "Phase 1".into(),
                sort_order: 1,
                target_start_day: 0,
                target_end_day: 14,
                tasks,
            }],
            dependencies,
        }
    }

    fn edge(task: &Task, depends_on: &Task, gate: GateType) -> TaskDependency {
        TaskDependency {
            task_id: task.id,
            depends_on_task_id: depends_on.id,
            gate,
        }
    }

    #[test]
    fn hard_blocker_found_and_cleared() {
        let phase_id = Uuid::new_v4();
        let a = task(phase_id, "Shadow a lab session", 1);
        let b = task(phase_id, "Lead a lab session", 2);
        let deps = vec![edge(&b, &a, GateType::Hard)];
        let (a_id, b_id) = (a.id, b.id);
        let tpl = template(vec![a, b], deps);
        let graph = DependencyGraph::for_template(&tpl);

        let mut statuses = HashMap::from([
            (a_id, ProgressStatus::Pending),
            (b_id, ProgressStatus::Pending),
        ]);
        let blocker = graph.first_unmet_hard(b_id, &statuses).unwrap();
        assert_eq!(blocker.task_id, a_id);
        assert_eq!(blocker.title, "Shadow a lab session");
        assert_eq!(blocker.gate, GateType::Hard);

        statuses.insert(a_id, ProgressStatus::Completed);
        assert!(graph.first_unmet_hard(b_id, &statuses).is_none());
    }

    #[test]
    fn waived_prerequisite_satisfies() {
        let phase_id = Uuid::new_v4();
        let a = task(phase_id, "CPR recertification", 1);
        let b = task(phase_id, "Teach CPR module", 2);
        let deps = vec![edge(&b, &a, GateType::Hard)];
        let (a_id, b_id) = (a.id, b.id);
        let tpl = template(vec![a, b], deps);
        let graph = DependencyGraph::for_template(&tpl);

        let statuses = HashMap::from([
            (a_id, ProgressStatus::Waived),
            (b_id, ProgressStatus::Pending),
        ]);
        assert!(graph.first_unmet_hard(b_id, &statuses).is_none());
    }

    #[test]
    fn missing_progress_row_counts_as_satisfied() {
        // A prerequisite scoped to another instructor type has no progress
        // row and must not block.
        let phase_id = Uuid::new_v4();
        let a = task(phase_id, "Preceptor field ride-along", 1);
        let b = task(phase_id, "Classroom handoff", 2);
        let deps = vec![edge(&b, &a, GateType::Hard)];
        let b_id = b.id;
        let tpl = template(vec![a, b], deps);
        let graph = DependencyGraph::for_template(&tpl);

        let statuses = HashMap::from([(b_id, ProgressStatus::Pending)]);
        assert!(graph.first_unmet_hard(b_id, &statuses).is_none());
    }

    #[test]
    fn soft_edges_warn_but_never_block() {
        let phase_id = Uuid::new_v4();
        let a = task(phase_id, "Review curriculum guide", 1);
        let b = task(phase_id, "Draft first lesson plan", 2);
        let deps = vec![edge(&b, &a, GateType::Soft)];
        let (a_id, b_id) = (a.id, b.id);
        let tpl = template(vec![a, b], deps);
        let graph = DependencyGraph::for_template(&tpl);

        let mut statuses = HashMap::from([
            (a_id, ProgressStatus::Pending),
            (b_id, ProgressStatus::Pending),
        ]);
        assert!(graph.first_unmet_hard(b_id, &statuses).is_none());
        let soft = graph.unmet_soft(b_id, &statuses);
        assert_eq!(soft.len(), 1);
        assert_eq!(soft[0].title, "Review curriculum guide");

        statuses.insert(a_id, ProgressStatus::Completed);
        assert!(graph.unmet_soft(b_id, &statuses).is_empty());
    }

    #[test]
    fn first_blocker_follows_edge_order() {
        let phase_id = Uuid::new_v4();
        let a = task(phase_id, "Orientation day", 1);
        let b = task(phase_id, "Skills lab sign-in", 2);
        let c = task(phase_id, "First solo lecture", 3);
        let deps = vec![edge(&c, &a, GateType::Hard), edge(&c, &b, GateType::Hard)];
        let (a_id, c_id) = (a.id, c.id);
        let b_id = b.id;
        let tpl = template(vec![a, b, c], deps);
        let graph = DependencyGraph::for_template(&tpl);

        let mut statuses = HashMap::from([
            (a_id, ProgressStatus::Pending),
            (b_id, ProgressStatus::Pending),
            (c_id, ProgressStatus::Pending),
        ]);
        let blocker = graph.first_unmet_hard(c_id, &statuses).unwrap();
        assert_eq!(blocker.task_id, a_id);

        statuses.insert(a_id, ProgressStatus::Completed);
        let blocker = graph.first_unmet_hard(c_id, &statuses).unwrap();
        assert_eq!(blocker.task_id, b_id);
    }

    #[test]
    fn dag_passes_acyclicity() {
        let phase_id = Uuid::new_v4();
        let a = task(phase_id, "A", 1);
        let b = task(phase_id, "B", 2);
        let c = task(phase_id, "C", 3);
        let deps = vec![
            edge(&b, &a, GateType::Hard),
            edge(&c, &b, GateType::Soft),
            edge(&c, &a, GateType::Hard),
        ];
        let tpl = template(vec![a, b, c], deps);
        let graph = DependencyGraph::for_template(&tpl);
        assert!(graph.validate_acyclic().is_ok());
    }

    #[test]
    fn cycle_is_rejected_with_participants() {
        let phase_id = Uuid::new_v4();
        let a = task(phase_id, "Observe a skills exam", 1);
        let b = task(phase_id, "Proctor a skills exam", 2);
        let c = task(phase_id, "Unrelated paperwork", 3);
        let deps = vec![edge(&b, &a, GateType::Hard), edge(&a, &b, GateType::Soft)];
        let (a_id, b_id) = (a.id, b.id);
        let tpl = template(vec![a, b, c], deps);
        let graph = DependencyGraph::for_template(&tpl);

        let cyclic = graph.validate_acyclic().unwrap_err();
        let ids: Vec<Uuid> = cyclic.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![a_id, b_id]);
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let phase_id = Uuid::new_v4();
        let a = task(phase_id, "Recursive reading", 1);
        let dep = TaskDependency {
            task_id: a.id,
            depends_on_task_id: a.id,
            gate: GateType::Hard,
        };
        let tpl = template(vec![a], vec![dep]);
        let graph = DependencyGraph::for_template(&tpl);
        assert!(graph.validate_acyclic().is_err());
    }
}
