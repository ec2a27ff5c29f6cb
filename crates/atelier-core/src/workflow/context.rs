//! Request body construction from the submitted context and step outputs.
//!
//! `WorkflowContext` holds the JSON context a client submitted plus the
//! outputs of steps that have succeeded so far. Each step's `InputMapping`
//! decides how its body is built:
//!
//! - `passthrough`: `{"context": <context>, "inputs": {<dep>: <output>, ...}}`
//! - `template`: any JSON whose string leaves may hold `{{ context.<path> }}`
//!   or `{{ steps.<id>.output[.<path>] }}` references.
//!
//! A string consisting of exactly one reference is replaced by the referenced
//! value with its JSON type intact (`null` when it does not resolve).
//! References embedded in longer strings are interpolated as text, with
//! unresolved ones rendering as the empty string.

use std::collections::HashMap;
use std::ops::Range;

use atelier_types::workflow::{InputMapping, StepDefinition};
use serde_json::{Map, Value, json};

use crate::service::StepError;

// ---------------------------------------------------------------------------
// WorkflowContext
// ---------------------------------------------------------------------------

/// Data visible to step input mappings during one workflow run.
#[derive(Debug, Clone, Default)]
pub struct WorkflowContext {
    /// The context submitted with the workflow request.
    pub context: Value,
    /// Outputs of succeeded steps keyed by step ID.
    pub step_outputs: HashMap<String, Value>,
}

impl WorkflowContext {
    pub fn new(context: Value) -> Self {
        Self {
            context,
            step_outputs: HashMap::new(),
        }
    }

    pub fn set_step_output(&mut self, step_id: &str, output: Value) {
        self.step_outputs.insert(step_id.to_string(), output);
    }

    pub fn get_step_output(&self, step_id: &str) -> Option<&Value> {
        self.step_outputs.get(step_id)
    }

    /// Build the request body for `step`.
    ///
    /// Fails with `StepError::InvalidInput` when the mapping holds a
    /// reference that is neither `context...` nor `steps.<id>.output...`.
    pub fn build_request_body(&self, step: &StepDefinition) -> Result<Value, StepError> {
        match &step.input {
            InputMapping::Passthrough => {
                let inputs: Map<String, Value> = step
                    .depends_on
                    .iter()
                    .map(|dep| {
                        let output = self.step_outputs.get(dep).cloned().unwrap_or(Value::Null);
                        (dep.clone(), output)
                    })
                    .collect();
                Ok(json!({
                    "context": self.context,
                    "inputs": inputs,
                }))
            }
            InputMapping::Template { body } => self
                .resolve_value(body)
                .map_err(|e| match e {
                    StepError::InvalidInput(msg) => {
                        StepError::InvalidInput(format!("step '{}': {msg}", step.id))
                    }
                    other => other,
                }),
        }
    }

    /// Resolve every reference inside `value`, recursing into arrays and objects.
    pub fn resolve_value(&self, value: &Value) -> Result<Value, StepError> {
        match value {
            Value::String(s) => self.resolve_string(s),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_value(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(fields) => fields
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.resolve_value(v)?)))
                .collect::<Result<Map<_, _>, StepError>>()
                .map(Value::Object),
            other => Ok(other.clone()),
        }
    }

    fn resolve_string(&self, s: &str) -> Result<Value, StepError> {
        let placeholders = find_placeholders(s);
        if placeholders.is_empty() {
            return Ok(Value::String(s.to_string()));
        }

        // Sole reference keeps its JSON type.
        if let [(range, expr)] = placeholders.as_slice() {
            if range.start == 0 && range.end == s.len() {
                let reference = Reference::parse(expr)?;
                return Ok(self.lookup(&reference).cloned().unwrap_or(Value::Null));
            }
        }

        let mut out = String::with_capacity(s.len());
        let mut cursor = 0;
        for (range, expr) in &placeholders {
            let reference = Reference::parse(expr)?;
            out.push_str(&s[cursor..range.start]);
            if let Some(value) = self.lookup(&reference) {
                out.push_str(&value_to_string(value));
            }
            cursor = range.end;
        }
        out.push_str(&s[cursor..]);
        Ok(Value::String(out))
    }

    fn lookup(&self, reference: &Reference<'_>) -> Option<&Value> {
        match reference {
            Reference::Context(path) => walk(&self.context, path),
            Reference::StepOutput { step, path } => {
                walk(self.step_outputs.get(*step)?, path)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Reference parsing
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Reference<'a> {
    Context(Vec<&'a str>),
    StepOutput { step: &'a str, path: Vec<&'a str> },
}

impl<'a> Reference<'a> {
    fn parse(expr: &'a str) -> Result<Self, StepError> {
        let mut segments = expr.split('.');
        match segments.next() {
            Some("context") => Ok(Reference::Context(segments.collect())),
            Some("steps") => match (segments.next(), segments.next()) {
                (Some(step), Some("output")) if !step.is_empty() => Ok(Reference::StepOutput {
                    step,
                    path: segments.collect(),
                }),
                _ => Err(unsupported(expr)),
            },
            _ => Err(unsupported(expr)),
        }
    }
}

fn unsupported(expr: &str) -> StepError {
    StepError::InvalidInput(format!("unsupported reference '{{{{ {expr} }}}}'"))
}

/// Byte ranges and trimmed inner expressions of every `{{ ... }}` in `s`.
fn find_placeholders(s: &str) -> Vec<(Range<usize>, &str)> {
    let mut found = Vec::new();
    let mut offset = 0;
    while let Some(open) = s[offset..].find("{{") {
        let start = offset + open;
        let Some(len) = s[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + len + 2;
        found.push((start..end, s[start + 2..end - 2].trim()));
        offset = end;
    }
    found
}

fn walk<'v>(mut value: &'v Value, path: &[&str]) -> Option<&'v Value> {
    for segment in path {
        value = match value {
            Value::Object(fields) => fields.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(value)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Step IDs referenced by `steps.<id>.output` expressions in `body`, in order
/// of first appearance. Fails on the first unsupported reference.
pub fn referenced_steps(body: &Value) -> Result<Vec<String>, StepError> {
    fn collect(value: &Value, out: &mut Vec<String>) -> Result<(), StepError> {
        match value {
            Value::String(s) => {
                for (_, expr) in find_placeholders(s) {
                    if let Reference::StepOutput { step, .. } = Reference::parse(expr)? {
                        if !out.iter().any(|seen| seen == step) {
                            out.push(step.to_string());
                        }
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    collect(item, out)?;
                }
            }
            Value::Object(fields) => {
                for v in fields.values() {
                    collect(v, out)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    let mut out = Vec::new();
    collect(body, &mut out)?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
