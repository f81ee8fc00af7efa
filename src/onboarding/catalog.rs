//! TemplateCatalog — authoring and lookup of onboarding program templates.
//!
//! Templates are validated once, at authoring time, and never edited
//! structurally afterwards (assignments keep referencing them). The engine
//! can therefore assume every persisted dependency graph is acyclic.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::directory::User;
use crate::error::OnboardingError;
use crate::store::Store;

use super::graph::DependencyGraph;
use super::model::{Phase, Task, TaskDependency, Template, TemplateDraft, TemplateSummary};

pub struct TemplateCatalog {
    store: Arc<dyn Store>,
}

impl TemplateCatalog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Validate and persist a template draft. Admin tier only.
    ///
    /// Rejections (all `InvalidTemplate`): empty name, duplicate task keys,
    /// dependency edges naming unknown keys, self-edges, duplicate edges,
    /// and any dependency cycle. Template, phases, tasks, and edges are
    /// written in one transaction; returns the hydrated template.
    pub async fn create_template(
        &self,
        actor: &User,
        draft: TemplateDraft,
    ) -> Result<Template, OnboardingError> {
        if !actor.role.is_admin_tier() {
            return Err(OnboardingError::Forbidden {
                email: actor.email.clone(),
                reason: "only administrators may author templates".into(),
            });
        }

        let template = materialize(draft)?;

        let graph = DependencyGraph::for_template(&template);
        if let Err(cycle) = graph.validate_acyclic() {
            let titles: Vec<&str> = cycle.iter().map(|t| t.title.as_str()).collect();
            return Err(OnboardingError::InvalidTemplate {
                reason: format!("dependency cycle involving: {}", titles.join(", ")),
            });
        }

        self.store.insert_template(&template).await?;
        info!(
            template_id = %template.id,
            name = %template.name,
            phases = template.phases.len(),
            tasks = template.tasks().count(),
            "Template created"
        );
        Ok(template)
    }

    pub async fn get_template(&self, id: Uuid) -> Result<Template, OnboardingError> {
        self.store
            .get_template(id)
            .await?
            .ok_or_else(|| OnboardingError::NotFound {
                entity: "template",
                id: id.to_string(),
            })
    }

    pub async fn list_templates(&self) -> Result<Vec<TemplateSummary>, OnboardingError> {
        Ok(self.store.list_templates().await?)
    }

    /// Activate or retire a template. Admin tier only. Retired templates
    /// are no longer offered as the default for new assignments; existing
    /// assignments keep referencing them.
    pub async fn set_active(
        &self,
        actor: &User,
        id: Uuid,
        active: bool,
    ) -> Result<(), OnboardingError> {
        if !actor.role.is_admin_tier() {
            return Err(OnboardingError::Forbidden {
                email: actor.email.clone(),
                reason: "only administrators may retire templates".into(),
            });
        }
        if !self.store.set_template_active(id, active).await? {
            return Err(OnboardingError::NotFound {
                entity: "template",
                id: id.to_string(),
            });
        }
        info!(template_id = %id, active, "Template active flag updated");
        Ok(())
    }
}

/// Turn a draft into a persisted-shape template with fresh ids, normalized
/// to the same ordering reads produce.
fn materialize(draft: TemplateDraft) -> Result<Template, OnboardingError> {
    let name = draft.name.trim().to_string();
    if name.is_empty() {
        return Err(invalid("template name is empty".into()));
    }

    let template_id = Uuid::new_v4();
    let mut key_to_id: HashMap<String, Uuid> = HashMap::new();
    let mut phases = Vec::with_capacity(draft.phases.len());

    for phase_draft in draft.phases {
        let phase_id = Uuid::new_v4();
        let mut tasks = Vec::with_capacity(phase_draft.tasks.len());
        for task_draft in phase_draft.tasks {
            let task_id = Uuid::new_v4();
            if key_to_id.insert(task_draft.key.clone(), task_id).is_some() {
                return Err(invalid(format!("duplicate task key '{}'", task_draft.key)));
            }
            tasks.push(Task {
                id: task_id,
                phase_id,
                title: task_draft.title,
                sort_order: task_draft.sort_order,
                required: task_draft.required,
                estimated_minutes: task_draft.estimated_minutes,
                task_type: task_draft.task_type,
                gate: task_draft.gate,
                applicable_types: task_draft.applicable_types,
            });
        }
        tasks.sort_by_key(|t| t.sort_order);
        phases.push(Phase {
            id: phase_id,
            template_id,
            name: phase_draft.name,
            sort_order: phase_draft.sort_order,
            target_start_day: phase_draft.target_start_day,
            target_end_day: phase_draft.target_end_day,
            tasks,
        });
    }
    phases.sort_by_key(|p| p.sort_order);

    let mut seen_edges = HashSet::new();
    let mut dependencies = Vec::with_capacity(draft.dependencies.len());
    for dep in draft.dependencies {
        let task_id = *key_to_id.get(&dep.task).ok_or_else(|| {
            invalid(format!(
                "dependency references unknown task key '{}'",
                dep.task
            ))
        })?;
        let depends_on_task_id = *key_to_id.get(&dep.depends_on).ok_or_else(|| {
            invalid(format!(
                "dependency references unknown task key '{}'",
                dep.depends_on
            ))
        })?;
        if task_id == depends_on_task_id {
            return Err(invalid(format!("task '{}' depends on itself", dep.task)));
        }
        if !seen_edges.insert((task_id, depends_on_task_id)) {
            return Err(invalid(format!(
                "duplicate dependency '{}' -> '{}'",
                dep.task, dep.depends_on
            )));
        }
        dependencies.push(TaskDependency {
            task_id,
            depends_on_task_id,
            gate: dep.gate,
        });
    }

    // Edges sorted the way reads return them: by the prerequisite's
    // phase/task position, which fixes blocker reporting order.
    let position: HashMap<Uuid, (i32, i32)> = phases
        .iter()
        .flat_map(|p| p.tasks.iter().map(|t| (t.id, (p.sort_order, t.sort_order))))
        .collect();
    dependencies.sort_by_key(|d| position.get(&d.depends_on_task_id).copied());

    Ok(Template {
        id: template_id,
        name,
        active: true,
        created_at: Utc::now(),
        phases,
        dependencies,
    })
}

fn invalid(reason: String) -> OnboardingError {
    OnboardingError::InvalidTemplate { reason }
}
