//! Response envelope shared by every `/api` route.
//!
//! ```json
//! {"code": 0, "msg": "success", "data": ...}
//! {"code": -1, "msg": "no available node", "kind": "no_available_node"}
//! ```

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fastcomfy_core::DispatchError;
use fastcomfy_runtime::RegistryError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `code` of a successful response.
pub const CODE_OK: i32 = 0;
/// `code` of a failed response.
pub const CODE_FAIL: i32 = -1;

/// Wire body of every API response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// `0` on success, `-1` on failure.
    pub code: i32,
    /// `"success"`, or the failure message.
    pub msg: String,
    /// Payload of a successful call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Machine-readable failure kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Correlation id, when the backend assigned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
}

/// An envelope plus its HTTP status.
#[derive(Debug)]
pub struct ApiResponse {
    status: StatusCode,
    body: Envelope,
}

impl ApiResponse {
    /// `200` with `data`.
    pub fn ok(data: impl Serialize) -> Self {
        Self {
            status: StatusCode::OK,
            body: Envelope {
                code: CODE_OK,
                msg: "success".into(),
                data: Some(serde_json::to_value(data).unwrap_or_default()),
                kind: None,
                prompt_id: None,
            },
        }
    }

    /// Failure with an explicit status and kind.
    pub fn fail(status: StatusCode, kind: &str, msg: impl Into<String>) -> Self {
        Self {
            status,
            body: Envelope {
                code: CODE_FAIL,
                msg: msg.into(),
                data: None,
                kind: Some(kind.to_owned()),
                prompt_id: None,
            },
        }
    }

    /// Attach a correlation id.
    #[must_use]
    pub fn with_prompt_id(mut self, prompt_id: Option<&str>) -> Self {
        self.body.prompt_id = prompt_id.map(str::to_owned);
        self
    }

    /// HTTP status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Wire body.
    pub fn body(&self) -> &Envelope {
        &self.body
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// HTTP status for a dispatch failure.
pub fn dispatch_status(err: &DispatchError) -> StatusCode {
    match err {
        DispatchError::UnknownTenant { .. } => StatusCode::NOT_FOUND,
        DispatchError::Resolution(_) => StatusCode::BAD_REQUEST,
        DispatchError::NoAvailableNode => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::Submission { .. } => StatusCode::BAD_GATEWAY,
        DispatchError::CompletionTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        DispatchError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// HTTP status for a registry failure.
pub fn registry_status(err: &RegistryError) -> StatusCode {
    match err {
        RegistryError::UnknownTenant { .. } => StatusCode::NOT_FOUND,
        RegistryError::Job(_) => StatusCode::BAD_REQUEST,
        RegistryError::DuplicateToken { .. } => StatusCode::CONFLICT,
        RegistryError::Start { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RegistryError::Directory { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<DispatchError> for ApiResponse {
    fn from(err: DispatchError) -> Self {
        let prompt_id = err.prompt_id().map(|id| id.as_str().to_owned());
        Self::fail(dispatch_status(&err), err.code(), err.to_string())
            .with_prompt_id(prompt_id.as_deref())
    }
}

impl From<RegistryError> for ApiResponse {
    fn from(err: RegistryError) -> Self {
        Self::fail(registry_status(&err), err.code(), err.to_string())
    }
}
