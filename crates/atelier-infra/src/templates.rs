//! Built-in workflow templates and template directory loading.
//!
//! The three platform workflows ship inside the binary. A configured
//! `templates_dir` adds more; a directory template with the same name as a
//! built-in replaces it.

use std::path::Path;

use atelier_core::service::registry::ServiceRegistry;
use atelier_core::workflow::registry::TemplateRegistry;
use atelier_core::workflow::template::{WorkflowError, discover_templates, parse_template_yaml};
use atelier_types::workflow::WorkflowTemplate;

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    (
        "complete_style_analysis.yaml",
        include_str!("../templates/complete_style_analysis.yaml"),
    ),
    (
        "outfit_recommendation.yaml",
        include_str!("../templates/outfit_recommendation.yaml"),
    ),
    (
        "feedback_processing.yaml",
        include_str!("../templates/feedback_processing.yaml"),
    ),
];

/// Parse the templates compiled into the binary.
pub fn builtin_templates() -> Result<Vec<WorkflowTemplate>, WorkflowError> {
    BUILTIN_TEMPLATES
        .iter()
        .map(|(file, yaml)| {
            parse_template_yaml(yaml)
                .map_err(|e| WorkflowError::ValidationError(format!("built-in {file}: {e}")))
        })
        .collect()
}

/// Build the startup registry: built-ins, then everything under `templates_dir`.
///
/// Every template is validated against `services`; the first invalid one
/// aborts startup.
pub fn build_template_registry(
    services: &ServiceRegistry,
    templates_dir: Option<&Path>,
) -> Result<TemplateRegistry, WorkflowError> {
    let mut templates = builtin_templates()?;

    if let Some(dir) = templates_dir {
        let mut from_dir: Vec<WorkflowTemplate> = Vec::new();
        for (path, template) in discover_templates(dir)? {
            if from_dir.iter().any(|t| t.name == template.name) {
                return Err(WorkflowError::DuplicateTemplate(template.name));
            }
            tracing::debug!(path = %path.display(), template = %template.name, "discovered template");
            from_dir.push(template);
        }

        for template in from_dir {
            match templates.iter_mut().find(|t| t.name == template.name) {
                Some(existing) => {
                    tracing::info!(template = %template.name, "template directory overrides built-in");
                    *existing = template;
                }
                None => templates.push(template),
            }
        }
    }

    let mut registry = TemplateRegistry::new();
    for template in templates {
        registry.register(template, services)?;
    }
    tracing::info!(count = registry.len(), "workflow templates registered");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_types::config::default_services;
    use atelier_types::service::ServiceConfig;
    use tempfile::TempDir;

    fn services() -> ServiceRegistry {
        ServiceRegistry::new(default_services())
    }

    #[test]
    fn builtins_register_against_default_services() {
        let registry = build_template_registry(&services(), None).unwrap();
        let names: Vec<String> = registry
            .list()
            .iter()
            .map(|t| t.template.name.clone())
            .collect();
        assert_eq!(
            names,
            vec![
                "complete_style_analysis",
                "feedback_processing",
                "outfit_recommendation"
            ]
        );
    }

    #[test]
    fn style_analysis_waves() {
        let registry = build_template_registry(&services(), None).unwrap();
        let analysis = registry.get("complete_style_analysis").unwrap();
        assert_eq!(
            analysis.plan.waves,
            vec![
                vec!["image".to_string(), "query".to_string()],
                vec!["profile".to_string()],
                vec!["combinations".to_string()],
                vec!["recommend".to_string()],
            ]
        );
        assert_eq!(analysis.template.timeout_secs, Some(120));
    }

    #[test]
    fn builtins_need_their_services() {
        let only_nlu = ServiceRegistry::new(vec![ServiceConfig::new("nlu", "http://localhost:8002")]);
        let err = build_template_registry(&only_nlu, None).unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownService { .. }));
    }

    #[test]
    fn directory_adds_and_overrides_templates() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("quick_profile.yaml"),
            "name: quick_profile\nsteps:\n  - {id: profile, service: style_profile}\n",
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("feedback.yml"),
            "name: feedback_processing\ndescription: custom\nsteps:\n  - {id: only, service: feedback_loop}\n",
        )
        .unwrap();

        let registry = build_template_registry(&services(), Some(tmp.path())).unwrap();
        assert_eq!(registry.len(), 4);
        assert!(registry.get("quick_profile").is_ok());
        let feedback = registry.get("feedback_processing").unwrap();
        assert_eq!(feedback.template.description.as_deref(), Some("custom"));
        assert_eq!(feedback.plan.step_count(), 1);
    }

    #[test]
    fn duplicate_names_in_directory_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let yaml = "name: twice\nsteps:\n  - {id: a, service: nlu}\n";
        std::fs::write(tmp.path().join("a.yaml"), yaml).unwrap();
        std::fs::write(tmp.path().join("b.yaml"), yaml).unwrap();

        let err = build_template_registry(&services(), Some(tmp.path())).unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateTemplate(name) if name == "twice"));
    }

    #[test]
    fn broken_directory_template_fails_startup() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("bad.yaml"), "name: [unclosed").unwrap();
        assert!(build_template_registry(&services(), Some(tmp.path())).is_err());
    }

    #[test]
    fn cyclic_directory_template_fails_startup() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("loop.yaml"),
            "name: loop\nsteps:\n  - {id: a, service: nlu, depends_on: [b]}\n  - {id: b, service: nlu, depends_on: [a]}\n",
        )
        .unwrap();
        let err = build_template_registry(&services(), Some(tmp.path())).unwrap_err();
        assert!(err.to_string().contains("cycle"), "got {err}");
    }

    #[test]
    fn missing_directory_keeps_builtins() {
        let tmp = TempDir::new().unwrap();
        let registry =
            build_template_registry(&services(), Some(&tmp.path().join("absent"))).unwrap();
        assert_eq!(registry.len(), 3);
    }
}
