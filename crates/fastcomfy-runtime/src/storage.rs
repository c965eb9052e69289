//! Artifact storage.
//!
//! Finished outputs are downloaded from the backend and handed to an
//! [`ArtifactStore`], which answers with a public URL. The shipped store keeps
//! files in a local directory tree served by the gateway itself.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fastcomfy_settings::StorageSettings;
use thiserror::Error;
use tracing::debug;

/// Failure while persisting an artifact.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The local path has no usable file name.
    #[error("no file name in {}", path.display())]
    InvalidName {
        /// Offending path.
        path: PathBuf,
    },
}

/// Durable home for finished artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist `local_path` under `id`, returning its public URL.
    async fn upload(&self, id: &str, local_path: &Path) -> Result<String, StorageError>;
}

/// Store that copies artifacts into `<root>/<prefix>/<id>/`.
#[derive(Clone, Debug)]
pub struct LocalArtifactStore {
    root: PathBuf,
    public_base_url: String,
    prefix: String,
}

impl LocalArtifactStore {
    /// Create a store rooted at `root`, publishing under `public_base_url`.
    pub fn new(
        root: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_owned(),
            prefix: prefix.into().trim_matches('/').to_owned(),
        }
    }

    /// Build the store described by `settings`.
    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self::new(
            settings.root_dir.clone(),
            settings.public_base_url.clone(),
            settings.output_prefix.clone(),
        )
    }

    /// Directory artifacts for `id` are written to.
    pub fn dir_for(&self, id: &str) -> PathBuf {
        self.root.join(&self.prefix).join(id)
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn upload(&self, id: &str, local_path: &Path) -> Result<String, StorageError> {
        let name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::InvalidName {
                path: local_path.to_path_buf(),
            })?;

        let dir = self.dir_for(id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StorageError::Io {
                path: dir.clone(),
                source,
            })?;
        let target = dir.join(name);
        let _ = tokio::fs::copy(local_path, &target)
            .await
            .map_err(|source| StorageError::Io {
                path: local_path.to_path_buf(),
                source,
            })?;

        let url = format!("{}/{}/{id}/{name}", self.public_base_url, self.prefix);
        debug!(id, path = %target.display(), url = %url, "artifact stored");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn upload_copies_and_returns_public_url() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let local = scratch.path().join("out.png");
        std::fs::write(&local, b"png").unwrap();

        let store = LocalArtifactStore::new(root.path(), "http://gw:8000/artifacts/", "/outputs/");
        let url = store.upload("p-1", &local).await.unwrap();

        assert_eq!(url, "http://gw:8000/artifacts/outputs/p-1/out.png");
        let stored = root.path().join("outputs").join("p-1").join("out.png");
        assert_eq!(std::fs::read(stored).unwrap(), b"png");
    }

    #[tokio::test]
    async fn missing_source_is_io_error() {
        let root = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(root.path(), "http://gw", "o");
        let err = store
            .upload("p-1", &root.path().join("absent.png"))
            .await
            .unwrap_err();
        assert_matches!(err, StorageError::Io { .. });
    }

    #[tokio::test]
    async fn path_without_name_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(root.path(), "http://gw", "o");
        let err = store.upload("p-1", Path::new("/")).await.unwrap_err();
        assert_matches!(err, StorageError::InvalidName { .. });
    }

    #[test]
    fn from_settings_uses_configured_layout() {
        let settings = StorageSettings {
            root_dir: PathBuf::from("/data"),
            output_prefix: "comfy".into(),
            ..StorageSettings::default()
        };
        let store = LocalArtifactStore::from_settings(&settings);
        assert_eq!(store.dir_for("x"), PathBuf::from("/data/comfy/x"));
    }
}
