//! Registry errors.

use std::path::PathBuf;

use fastcomfy_backend::BackendError;
use fastcomfy_core::{JobFileError, TenantToken};
use thiserror::Error;

/// Failure of a registry operation.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The watched directory could not be listed.
    #[error("cannot read tenant directory {}: {source}", path.display())]
    Directory {
        /// Watched directory.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A job file could not be read or parsed.
    #[error(transparent)]
    Job(#[from] JobFileError),

    /// Another tenant already serves the file's token.
    #[error("token '{token}' from {} is already served", path.display())]
    DuplicateToken {
        /// Colliding token.
        token: TenantToken,
        /// File that declared it.
        path: PathBuf,
    },

    /// No tenant is registered under the token.
    #[error("unknown tenant '{token}'")]
    UnknownTenant {
        /// Requested token.
        token: TenantToken,
    },

    /// A tenant failed to connect to its nodes.
    #[error("tenant '{token}' failed to start: {source}")]
    Start {
        /// Tenant token.
        token: TenantToken,
        /// First node failure.
        #[source]
        source: BackendError,
    },
}

impl RegistryError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Directory { .. } => "directory_error",
            Self::Job(_) => "job_file_error",
            Self::DuplicateToken { .. } => "duplicate_token",
            Self::UnknownTenant { .. } => "unknown_tenant",
            Self::Start { .. } => "start_failed",
        }
    }
}
