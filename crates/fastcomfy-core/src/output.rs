//! Output descriptors reported by a finished job.

use serde::{Deserialize, Serialize};

/// One artifact produced by a job, relative to the backend's output folder.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputDescriptor {
    /// File name inside `subfolder`.
    pub filename: String,
    /// Subfolder, empty for the output root.
    #[serde(default)]
    pub subfolder: String,
}

impl OutputDescriptor {
    /// Create a descriptor.
    pub fn new(filename: impl Into<String>, subfolder: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            subfolder: subfolder.into(),
        }
    }
}
