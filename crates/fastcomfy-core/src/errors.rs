//! Error hierarchy for the gateway.
//!
//! - [`ResolutionError`]: a variable could not be applied to the job graph
//! - [`JobFileError`]: a job file could not be read or parsed
//! - [`DispatchError`]: everything a dispatch caller can observe
//!
//! Every [`DispatchError`] variant carries a stable machine-readable
//! [`DispatchError::code`] next to its human-readable `Display`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::ids::{PromptId, TenantToken};

// ─────────────────────────────────────────────────────────────────────────────
// ResolutionError
// ─────────────────────────────────────────────────────────────────────────────

/// A variable could not be applied to the job graph.
///
/// Raised before any network call and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// The variable declares no target path.
    #[error("variable '{variable}' has no path")]
    MissingPath {
        /// Variable name.
        variable: String,
    },

    /// The path is not of the form `<nodeId>.inputs.<key>`.
    #[error("variable '{variable}' has malformed path '{path}'")]
    MalformedPath {
        /// Variable name.
        variable: String,
        /// Offending path.
        path: String,
    },

    /// The path names a node that is not in the graph.
    #[error("variable '{variable}' targets unknown node '{node}'")]
    UnknownNode {
        /// Variable name.
        variable: String,
        /// Node id from the path.
        node: String,
    },

    /// The path names an input the node does not have.
    #[error("variable '{variable}' targets unknown input '{node}.inputs.{input}'")]
    UnknownInput {
        /// Variable name.
        variable: String,
        /// Node id from the path.
        node: String,
        /// Input key from the path.
        input: String,
    },

    /// The supplied value does not match the declared type.
    #[error("variable '{variable}' expects {expected}, got {actual}")]
    TypeMismatch {
        /// Variable name.
        variable: String,
        /// Declared type.
        expected: String,
        /// JSON type of the supplied value.
        actual: &'static str,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// JobFileError
// ─────────────────────────────────────────────────────────────────────────────

/// A job file could not be turned into a job definition.
#[derive(Debug, Error)]
pub enum JobFileError {
    /// The file could not be read.
    #[error("failed to read job file {}: {source}", path.display())]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid job definition.
    #[error("invalid job file {}: {source}", path.display())]
    Json {
        /// File path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The job definition has an empty token.
    #[error("job file {} has an empty token", path.display())]
    MissingToken {
        /// File path.
        path: PathBuf,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// DispatchError
// ─────────────────────────────────────────────────────────────────────────────

/// Failure of a dispatch request, as seen by the caller.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No tenant is registered under the token.
    #[error("unknown tenant '{token}'")]
    UnknownTenant {
        /// Requested token.
        token: TenantToken,
    },

    /// The request variables could not be applied.
    #[error("{0}")]
    Resolution(#[from] ResolutionError),

    /// No node is configured, live, or answering queue queries.
    #[error("no available node")]
    NoAvailableNode,

    /// The backend rejected the submission or could not be reached.
    #[error("submission to {node} failed: {message}")]
    Submission {
        /// Selected node address.
        node: String,
        /// Correlation id, when the backend returned one before failing.
        prompt_id: Option<PromptId>,
        /// Failure detail.
        message: String,
    },

    /// No completion was observed within the wait window.
    #[error("prompt {prompt_id} did not complete within {}s", timeout.as_secs())]
    CompletionTimeout {
        /// Correlation id of the abandoned wait.
        prompt_id: PromptId,
        /// Wait window.
        timeout: Duration,
    },

    /// Finished artifacts could not be persisted.
    #[error("storing outputs of {prompt_id} failed: {message}")]
    Storage {
        /// Correlation id of the job.
        prompt_id: PromptId,
        /// Failure detail.
        message: String,
    },
}

impl DispatchError {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownTenant { .. } => "unknown_tenant",
            Self::Resolution(_) => "resolution_error",
            Self::NoAvailableNode => "no_available_node",
            Self::Submission { .. } => "submission_error",
            Self::CompletionTimeout { .. } => "completion_timeout",
            Self::Storage { .. } => "storage_error",
        }
    }

    /// Correlation id attached to this failure, if any.
    #[must_use]
    pub fn prompt_id(&self) -> Option<&PromptId> {
        match self {
            Self::Submission { prompt_id, .. } => prompt_id.as_ref(),
            Self::CompletionTimeout { prompt_id, .. } | Self::Storage { prompt_id, .. } => {
                Some(prompt_id)
            }
            Self::UnknownTenant { .. } | Self::Resolution(_) | Self::NoAvailableNode => None,
        }
    }

    /// Whether the caller may reasonably retry the same request.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoAvailableNode | Self::Submission { .. } | Self::CompletionTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            DispatchError::UnknownTenant {
                token: "t".into()
            }
            .code(),
            "unknown_tenant"
        );
        assert_eq!(DispatchError::NoAvailableNode.code(), "no_available_node");
        let err: DispatchError = ResolutionError::MissingPath {
            variable: "v".into(),
        }
        .into();
        assert_eq!(err.code(), "resolution_error");
    }

    #[test]
    fn submission_keeps_prompt_id_for_diagnostics() {
        let err = DispatchError::Submission {
            node: "http://a:8188".into(),
            prompt_id: Some(PromptId::new("p-9")),
            message: "HTTP 500".into(),
        };
        assert_eq!(err.prompt_id().map(PromptId::as_str), Some("p-9"));
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "submission to http://a:8188 failed: HTTP 500");
    }

    #[test]
    fn timeout_display_names_prompt_and_window() {
        let err = DispatchError::CompletionTimeout {
            prompt_id: PromptId::new("p-1"),
            timeout: Duration::from_secs(60),
        };
        assert_eq!(err.to_string(), "prompt p-1 did not complete within 60s");
    }

    #[test]
    fn resolution_errors_are_not_retryable() {
        let err = DispatchError::from(ResolutionError::TypeMismatch {
            variable: "steps".into(),
            expected: "number".into(),
            actual: "string",
        });
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "variable 'steps' expects number, got string");
    }
}
