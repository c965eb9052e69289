//! Job definitions, one per tenant job file.
//!
//! ```json
//! {
//!   "name": "portrait",
//!   "description": "...",
//!   "token": "tenant-token",
//!   "comfyui_nodes": ["http://10.0.0.2:8188"],
//!   "prompt": { "3": { "inputs": {...}, "class_type": "KSampler", "_meta": {"title": "KSampler"} } },
//!   "variables": { "text": { "path": "6.inputs.text", "type": "string", "default": "a cat" } }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::JobFileError;
use crate::ids::TenantToken;

/// The job graph: node id to node.
pub type JobGraph = BTreeMap<String, JobNode>;

/// One compute node of the job graph.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JobNode {
    /// Input parameters keyed by name.
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Node-type tag understood by the backend.
    #[serde(default)]
    pub class_type: String,
    /// Display metadata.
    #[serde(rename = "_meta", default)]
    pub meta: NodeMeta,
}

/// Display metadata of a job node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    /// Human-readable title.
    #[serde(default)]
    pub title: String,
}

/// Declared type of a substitutable variable.
///
/// Unknown type names are kept verbatim and are not enforced.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VariableType {
    /// JSON string.
    String,
    /// Any JSON number (`number` or `float`).
    Number,
    /// JSON boolean (`bool` or `boolean`).
    Bool,
    /// JSON object.
    Object,
    /// JSON array.
    Array,
    /// No declared type, or one this gateway does not check.
    #[default]
    Unchecked,
    /// Declared but unrecognized type name.
    Other(String),
}

impl VariableType {
    /// Whether `value` satisfies this declared type. `null` always passes.
    pub fn accepts(&self, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Unchecked | Self::Other(_) => true,
        }
    }
}

impl From<String> for VariableType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "" => Self::Unchecked,
            "string" => Self::String,
            "number" | "float" => Self::Number,
            "bool" | "boolean" => Self::Bool,
            "object" => Self::Object,
            "array" => Self::Array,
            _ => Self::Other(name),
        }
    }
}

impl From<VariableType> for String {
    fn from(kind: VariableType) -> Self {
        match kind {
            VariableType::Other(name) => name,
            other => other.to_string(),
        }
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Number => f.write_str("number"),
            Self::Bool => f.write_str("bool"),
            Self::Object => f.write_str("object"),
            Self::Array => f.write_str("array"),
            Self::Unchecked => f.write_str(""),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// A substitutable variable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    /// Target location, `<nodeId>.inputs.<key>`.
    #[serde(default)]
    pub path: String,
    /// Declared type.
    #[serde(rename = "type", default)]
    pub kind: VariableType,
    /// Value used when the caller supplies none.
    #[serde(default)]
    pub default: Value,
}

/// A tenant's job definition. Immutable once parsed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Tenant display name.
    #[serde(default)]
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Tenant identity.
    pub token: TenantToken,
    /// Backend node addresses, in configuration order.
    #[serde(rename = "comfyui_nodes", default)]
    pub nodes: Vec<String>,
    /// The job graph template.
    #[serde(rename = "prompt", default)]
    pub graph: JobGraph,
    /// Variable name to variable definition.
    #[serde(default)]
    pub variables: BTreeMap<String, VariableSpec>,
}

impl JobDefinition {
    /// Parse a job definition from JSON bytes.
    ///
    /// `origin` is only used for error messages.
    pub fn from_slice(bytes: &[u8], origin: &Path) -> Result<Self, JobFileError> {
        let job: Self = serde_json::from_slice(bytes).map_err(|source| JobFileError::Json {
            path: origin.to_path_buf(),
            source,
        })?;
        if job.token.is_empty() {
            return Err(JobFileError::MissingToken {
                path: origin.to_path_buf(),
            });
        }
        Ok(job)
    }

    /// Read and parse a job file.
    pub fn from_path(path: &Path) -> Result<Self, JobFileError> {
        let bytes = std::fs::read(path).map_err(|source| JobFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_slice(&bytes, path)
    }

    /// Names of all declared variables.
    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }
}
