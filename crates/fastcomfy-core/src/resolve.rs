//! Variable resolution: turns a job template plus request variables into a
//! fresh graph ready for submission.
//!
//! Steps, in order:
//! 1. substitute each declared variable (request value, else default)
//! 2. suffix every `filename_prefix` string input with `_<32 hex>`
//! 3. replace every numeric `seed` input with a random 63-bit value
//!
//! The template is never mutated, so concurrent requests cannot share a seed
//! or an output name.

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::ResolutionError;
use crate::job::{JobDefinition, JobGraph};

/// A job graph with every variable applied. Produced per submission.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResolvedJob(JobGraph);

impl ResolvedJob {
    /// The resolved graph.
    pub fn graph(&self) -> &JobGraph {
        &self.0
    }

    /// Consume and return the resolved graph.
    pub fn into_graph(self) -> JobGraph {
        self.0
    }

    /// Value at `<node>.inputs.<key>`, if present.
    pub fn input(&self, node: &str, key: &str) -> Option<&Value> {
        self.0.get(node).and_then(|n| n.inputs.get(key))
    }
}

/// Resolve `job` against the request variables `vars`.
pub fn resolve(job: &JobDefinition, vars: &Map<String, Value>) -> Result<ResolvedJob, ResolutionError> {
    let mut graph = job.graph.clone();

    for (name, spec) in &job.variables {
        let (node, input) = split_path(name, &spec.path)?;
        let slot = graph
            .get_mut(node)
            .ok_or_else(|| ResolutionError::UnknownNode {
                variable: name.clone(),
                node: node.to_owned(),
            })?
            .inputs
            .get_mut(input)
            .ok_or_else(|| ResolutionError::UnknownInput {
                variable: name.clone(),
                node: node.to_owned(),
                input: input.to_owned(),
            })?;

        let value = match vars.get(name) {
            Some(v) => v,
            // A null default leaves the template value in place.
            None if spec.default.is_null() => continue,
            None => &spec.default,
        };
        if !spec.kind.accepts(value) {
            return Err(ResolutionError::TypeMismatch {
                variable: name.clone(),
                expected: spec.kind.to_string(),
                actual: json_type(value),
            });
        }
        *slot = value.clone();
    }

    for node in graph.values_mut() {
        for (key, value) in &mut node.inputs {
            if !key.to_ascii_lowercase().contains("filename_prefix") {
                continue;
            }
            if let Value::String(prefix) = value {
                *value = Value::String(unique_name(prefix));
            }
        }
    }

    for node in graph.values_mut() {
        for (key, value) in &mut node.inputs {
            if key.to_ascii_lowercase().contains("seed") && value.is_number() {
                *value = Value::from(random_seed());
            }
        }
    }

    Ok(ResolvedJob(graph))
}

/// Split `<nodeId>.inputs.<key>` into node id and key.
fn split_path<'a>(variable: &str, path: &'a str) -> Result<(&'a str, &'a str), ResolutionError> {
    if path.is_empty() {
        return Err(ResolutionError::MissingPath {
            variable: variable.to_owned(),
        });
    }
    let mut parts = path.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(node), Some("inputs"), Some(key), None) if !node.is_empty() && !key.is_empty() => {
            Ok((node, key))
        }
        _ => Err(ResolutionError::MalformedPath {
            variable: variable.to_owned(),
            path: path.to_owned(),
        }),
    }
}

fn unique_name(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Non-negative 63-bit seed.
fn random_seed() -> u64 {
    rand::random::<u64>() >> 1
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
