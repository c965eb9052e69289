use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Artifact persistence.
///
/// When disabled, dispatch returns the backend's own view URLs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Whether finished artifacts are downloaded and re-published.
    pub enabled: bool,
    /// Root directory of the local artifact store.
    pub root_dir: PathBuf,
    /// Base URL under which `root_dir` is served.
    pub public_base_url: String,
    /// Key prefix placed before each correlation id.
    pub output_prefix: String,
    /// Scratch directory for downloads, the system temp dir when unset.
    pub download_dir: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            root_dir: PathBuf::from("./data/artifacts"),
            public_base_url: "http://127.0.0.1:8000/artifacts".to_string(),
            output_prefix: "comfyui_output".to_string(),
            download_dir: None,
        }
    }
}
