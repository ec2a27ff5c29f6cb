//! Workflow template parsing, validation, and filesystem discovery.
//!
//! Converts YAML documents into `WorkflowTemplate`s, validates structural
//! constraints (name format, unique step IDs, known dependencies, sane retry
//! and timeout values, input references), and discovers template files on disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use atelier_types::workflow::{InputMapping, WorkflowTemplate};
use thiserror::Error;

use crate::service::registry::ServiceRegistry;

use super::context::referenced_steps;
use super::dag::get_step_dependencies;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while loading, validating, or looking up templates.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Dependency graph contains a cycle.
    #[error("cycle detected: {0}")]
    CycleDetected(String),

    /// A step references an unknown dependency.
    #[error("unknown dependency: {0}")]
    UnknownDependency(String),

    /// A step targets a service missing from the registry.
    #[error("step '{step}' targets unknown service '{service}'")]
    UnknownService { step: String, service: String },

    /// No template registered under this name.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// A template with this name is already registered.
    #[error("template '{0}' is already registered")]
    DuplicateTemplate(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowTemplate`.
pub fn parse_template_yaml(yaml: &str) -> Result<WorkflowTemplate, WorkflowError> {
    let template: WorkflowTemplate =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_template(&template)?;
    Ok(template)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowTemplate`.
///
/// Checks:
/// - Name is non-empty and contains only alphanumerics, hyphens and underscores
/// - Step IDs are non-empty and unique (a template may have no steps)
/// - All `depends_on` references point to existing step IDs
/// - `max_attempts >= 1` and timeouts > 0 where set
/// - Template input mappings only reference steps that run before this one
///
/// Cycles are detected separately by the resolver.
pub fn validate_template(template: &WorkflowTemplate) -> Result<(), WorkflowError> {
    if template.name.is_empty() {
        return Err(WorkflowError::ValidationError(
            "template name must not be empty".to_string(),
        ));
    }
    if !template
        .name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(WorkflowError::ValidationError(format!(
            "template name '{}' contains invalid characters (only alphanumerics, hyphens and underscores allowed)",
            template.name
        )));
    }

    let mut seen_ids = HashSet::new();
    for step in &template.steps {
        if step.id.is_empty() {
            return Err(WorkflowError::ValidationError(
                "step ID must not be empty".to_string(),
            ));
        }
        if !seen_ids.insert(step.id.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate step ID: '{}'",
                step.id
            )));
        }
    }

    for step in &template.steps {
        for dep in &step.depends_on {
            if !seen_ids.contains(dep.as_str()) {
                return Err(WorkflowError::UnknownDependency(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dep
                )));
            }
        }

        if let Some(retry) = &step.retry {
            if retry.max_attempts < 1 {
                return Err(WorkflowError::ValidationError(format!(
                    "step '{}': max_attempts must be >= 1",
                    step.id
                )));
            }
        }

        if step.timeout_secs == Some(0) {
            return Err(WorkflowError::ValidationError(format!(
                "step '{}': timeout must be > 0",
                step.id
            )));
        }

        if let InputMapping::Template { body } = &step.input {
            let upstream: HashSet<&str> = get_step_dependencies(&step.id, &template.steps)
                .into_iter()
                .collect();
            let referenced = referenced_steps(body).map_err(|e| {
                WorkflowError::ValidationError(format!("step '{}': {e}", step.id))
            })?;
            for referenced in referenced {
                if !upstream.contains(referenced.as_str()) {
                    return Err(WorkflowError::ValidationError(format!(
                        "step '{}' reads the output of '{}', which is not one of its dependencies",
                        step.id, referenced
                    )));
                }
            }
        }
    }

    if template.timeout_secs == Some(0) {
        return Err(WorkflowError::ValidationError(
            "timeout must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Check that every step targets a registered service.
pub fn validate_services(
    template: &WorkflowTemplate,
    services: &ServiceRegistry,
) -> Result<(), WorkflowError> {
    for step in &template.steps {
        if !services.contains(&step.service) {
            return Err(WorkflowError::UnknownService {
                step: step.id.clone(),
                service: step.service.clone(),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a template from a YAML file.
pub fn load_template_file(path: &Path) -> Result<WorkflowTemplate, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    parse_template_yaml(&content)
}

/// Discover all template YAML files under `base_dir`.
///
/// Scans for `.yaml` and `.yml` files recursively, in sorted path order.
/// Unlike a lenient loader, a file that fails to parse or validate is an
/// error: a broken template must stop startup rather than vanish silently.
pub fn discover_templates(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowTemplate)>, WorkflowError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        tracing::debug!(path = %base_dir.display(), "template directory does not exist");
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowTemplate)>,
) -> Result<(), WorkflowError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    paths.sort();

    for path in paths {
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if let Some(ext) = path.extension() {
            if ext == "yaml" || ext == "yml" {
                let template = load_template_file(&path).map_err(|e| {
                    WorkflowError::ValidationError(format!("{}: {e}", path.display()))
                })?;
                results.push((path, template));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
