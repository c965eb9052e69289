//! Backend error types.

use fastcomfy_core::PromptId;
use thiserror::Error;

/// Errors raised while talking to a backend node.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The configured node address cannot be turned into a URL.
    #[error("invalid node address '{address}': {reason}")]
    InvalidAddress {
        /// Address as configured.
        address: String,
        /// Parse failure detail.
        reason: String,
    },

    /// Transport-level HTTP failure (connect, timeout, body read).
    #[error("request to {url} failed: {source}")]
    Http {
        /// Request URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The backend answered with a non-success status.
    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        /// Request URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
        /// Correlation id the backend reported despite failing, if any.
        prompt_id: Option<PromptId>,
    },

    /// The backend answered with a body we cannot interpret.
    #[error("malformed response from {url}: {reason}")]
    MalformedResponse {
        /// Request URL.
        url: String,
        /// What was wrong with the body.
        reason: String,
    },

    /// The backend accepted the job but reported node validation errors.
    #[error("backend rejected prompt {prompt_id}: {errors}")]
    NodeErrors {
        /// Correlation id assigned to the rejected job.
        prompt_id: PromptId,
        /// Serialized `node_errors` payload.
        errors: String,
    },

    /// The event stream could not be opened.
    #[error("event stream {url} unavailable: {message}")]
    Connect {
        /// Stream URL.
        url: String,
        /// Failure detail.
        message: String,
    },

    /// Local file I/O during download.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Local path involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl BackendError {
    /// Correlation id carried by a failed submission, if the backend sent one.
    pub fn prompt_id(&self) -> Option<&PromptId> {
        match self {
            Self::Status { prompt_id, .. } => prompt_id.as_ref(),
            Self::NodeErrors { prompt_id, .. } => Some(prompt_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_id_is_exposed_for_rejections() {
        let err = BackendError::NodeErrors {
            prompt_id: PromptId::new("p-1"),
            errors: "{}".into(),
        };
        assert_eq!(err.prompt_id().map(PromptId::as_str), Some("p-1"));

        let err = BackendError::Connect {
            url: "ws://a/ws".into(),
            message: "refused".into(),
        };
        assert!(err.prompt_id().is_none());
        assert_eq!(err.to_string(), "event stream ws://a/ws unavailable: refused");
    }
}
