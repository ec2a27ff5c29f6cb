//! Registry of validated workflow templates.

use std::collections::BTreeMap;
use std::sync::Arc;

use atelier_types::workflow::WorkflowTemplate;

use crate::service::registry::ServiceRegistry;

use super::dag::{ExecutionPlan, build_execution_plan};
use super::template::{WorkflowError, validate_services, validate_template};

/// A template together with its precomputed execution plan.
#[derive(Debug, Clone)]
pub struct RegisteredTemplate {
    pub template: WorkflowTemplate,
    pub plan: ExecutionPlan,
}

/// Name -> template store, filled at startup and read-only afterwards.
///
/// Registration validates the template structure, resolves its waves (so a
/// cycle fails startup rather than a request), and checks every step targets
/// a known service.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, Arc<RegisteredTemplate>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add `template`. Names must be unique.
    pub fn register(
        &mut self,
        template: WorkflowTemplate,
        services: &ServiceRegistry,
    ) -> Result<(), WorkflowError> {
        validate_template(&template)?;
        validate_services(&template, services)?;
        let plan = build_execution_plan(&template.steps)?;

        if self.templates.contains_key(&template.name) {
            return Err(WorkflowError::DuplicateTemplate(template.name));
        }

        tracing::debug!(
            template = %template.name,
            steps = template.steps.len(),
            waves = plan.waves.len(),
            "registered workflow template"
        );
        self.templates.insert(
            template.name.clone(),
            Arc::new(RegisteredTemplate { template, plan }),
        );
        Ok(())
    }

    /// Look up a template by name.
    pub fn get(&self, name: &str) -> Result<Arc<RegisteredTemplate>, WorkflowError> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| WorkflowError::TemplateNotFound(name.to_string()))
    }

    /// All templates in name order.
    pub fn list(&self) -> Vec<Arc<RegisteredTemplate>> {
        self.templates.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
