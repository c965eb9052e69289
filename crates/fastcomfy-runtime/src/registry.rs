//! Tenant registry: token to runtime, kept in sync with a directory of job
//! files.
//!
//! All bookkeeping (the tracked-file table and every add, remove, or swap of a
//! runtime) is serialized under one async lock, so reload ticks and operator
//! actions cannot interleave. Dispatch never takes that lock; it only reads
//! the token map.
//!
//! A modified file is applied stop-then-start: the old runtime leaves the map
//! and is stopped before the replacement is inserted, so a token is never
//! served by two runtimes at once. Requests landing in that window see an
//! unknown tenant.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use fastcomfy_core::{Alerter, DispatchError, JobDefinition, TenantToken};
use fastcomfy_settings::GatewaySettings;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::RuntimeContext;
use crate::errors::RegistryError;
use crate::storage::{ArtifactStore, LocalArtifactStore};
use crate::tenant::{Generation, TenantRuntime, TenantSnapshot};

/// What a reload pass changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    /// Tenants created from new files.
    pub added: Vec<TenantToken>,
    /// Tenants dropped with their files.
    pub removed: Vec<TenantToken>,
    /// Tenants rebuilt from modified files.
    pub reloaded: Vec<TenantToken>,
}

impl ReloadSummary {
    /// Whether the pass changed nothing.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.reloaded.is_empty()
    }
}

/// A job file the registry has seen.
struct TrackedFile {
    modified: SystemTime,
    /// `None` when the file failed to parse or its token collided.
    token: Option<TenantToken>,
}

#[derive(Default)]
struct Tracking {
    files: HashMap<PathBuf, TrackedFile>,
}

struct Artifacts {
    store: Arc<dyn ArtifactStore>,
    download_dir: Option<PathBuf>,
}

struct HotReload {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns every tenant runtime.
pub struct TenantRegistry {
    dir: PathBuf,
    ctx: RuntimeContext,
    artifacts: Option<Artifacts>,
    tenants: RwLock<HashMap<TenantToken, Arc<TenantRuntime>>>,
    tracking: tokio::sync::Mutex<Tracking>,
    hot_reload: Mutex<Option<HotReload>>,
}

impl TenantRegistry {
    /// Create an empty registry watching `dir`. Call [`load`](Self::load) to
    /// populate it.
    pub fn new(dir: impl Into<PathBuf>, ctx: RuntimeContext) -> Self {
        Self {
            dir: dir.into(),
            ctx,
            artifacts: None,
            tenants: RwLock::new(HashMap::new()),
            tracking: tokio::sync::Mutex::new(Tracking::default()),
            hot_reload: Mutex::new(None),
        }
    }

    /// Persist outputs through `store` before answering dispatches.
    ///
    /// Downloads go to a per-request temporary directory under
    /// `download_dir`, or the system temp dir.
    #[must_use]
    pub fn with_artifact_store(
        mut self,
        store: Arc<dyn ArtifactStore>,
        download_dir: Option<PathBuf>,
    ) -> Self {
        self.artifacts = Some(Artifacts {
            store,
            download_dir,
        });
        self
    }

    /// Build the registry described by `settings`.
    pub fn from_settings(settings: &GatewaySettings, alerter: Arc<dyn Alerter>) -> Self {
        let registry = Self::new(
            settings.apis_dir.0.clone(),
            RuntimeContext::from_settings(settings, alerter),
        );
        if settings.storage.enabled {
            registry.with_artifact_store(
                Arc::new(LocalArtifactStore::from_settings(&settings.storage)),
                settings.storage.download_dir.clone(),
            )
        } else {
            registry
        }
    }

    /// Watched directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Runtime serving `token`.
    pub fn get(&self, token: &str) -> Option<Arc<TenantRuntime>> {
        self.tenants.read().get(token).cloned()
    }

    /// Number of registered tenants.
    pub fn len(&self) -> usize {
        self.tenants.read().len()
    }

    /// Whether no tenant is registered.
    pub fn is_empty(&self) -> bool {
        self.tenants.read().is_empty()
    }

    // ─── Loading ────────────────────────────────────────────────────────────

    /// Register and start a tenant for every job file in the directory.
    ///
    /// A file that fails to parse, or whose token is already served, is
    /// logged and skipped. Returns the number of registered tenants.
    pub async fn load(&self) -> Result<usize, RegistryError> {
        let mut tracking = self.tracking.lock().await;
        let files = scan(&self.dir).await?;
        let mut started = Vec::new();
        for (path, modified) in files {
            if let Some(runtime) = self.admit_logged(&mut tracking, path, modified) {
                started.push(runtime);
            }
        }
        start_all(&started).await;
        let count = self.len();
        info!(dir = %self.dir.display(), tenants = count, "tenants loaded");
        Ok(count)
    }

    /// One hot-reload pass: apply added, removed and modified job files.
    pub async fn reload_tick(&self) -> Result<ReloadSummary, RegistryError> {
        let mut tracking = self.tracking.lock().await;
        let current = scan(&self.dir).await?;
        let mut summary = ReloadSummary::default();

        let gone: Vec<PathBuf> = tracking
            .files
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect();
        for path in gone {
            let Some(tracked) = tracking.files.remove(&path) else {
                continue;
            };
            info!(path = %path.display(), "job file removed");
            if let Some(token) = tracked.token {
                self.retire(&token).await;
                summary.removed.push(token);
            }
        }

        let mut started = Vec::new();
        for (path, modified) in current {
            let (changed, previous) = match tracking.files.get(&path) {
                None => (false, None),
                Some(tracked) if modified > tracked.modified => (true, tracked.token.clone()),
                Some(_) => continue,
            };
            if changed {
                info!(path = %path.display(), "job file modified");
                if let Some(token) = &previous {
                    self.retire(token).await;
                }
                let _ = tracking.files.remove(&path);
            } else {
                info!(path = %path.display(), "job file added");
            }

            if let Some(runtime) = self.admit_logged(&mut tracking, path, modified) {
                let token = runtime.token().clone();
                if changed && previous.as_ref() == Some(&token) {
                    summary.reloaded.push(token);
                } else {
                    if let Some(old) = previous {
                        summary.removed.push(old);
                    }
                    summary.added.push(token);
                }
                started.push(runtime);
            } else if let Some(old) = previous {
                summary.removed.push(old);
            }
        }
        start_all(&started).await;

        if !summary.is_empty() {
            info!(
                added = summary.added.len(),
                removed = summary.removed.len(),
                reloaded = summary.reloaded.len(),
                "hot reload applied"
            );
        }
        Ok(summary)
    }

    /// Run [`reload_tick`](Self::reload_tick) every `interval` until
    /// [`shutdown`](Self::shutdown). Replaces a loop already running.
    pub fn spawn_hot_reload(self: &Arc<Self>, interval: Duration) {
        let cancel = CancellationToken::new();
        let registry = Arc::downgrade(self);
        let task = tokio::spawn(hot_reload_loop(registry, interval, cancel.clone()));
        let previous = self.hot_reload.lock().replace(HotReload { cancel, task });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        info!(interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX), "hot reload started");
    }

    // ─── Operator actions ───────────────────────────────────────────────────

    /// Register the tenant defined by `path` and start it.
    ///
    /// Fails if the file does not parse or its token is already served. A
    /// tenant whose nodes fail to connect is still registered, in `exception`.
    pub async fn add(&self, path: &Path) -> Result<TenantToken, RegistryError> {
        let mut tracking = self.tracking.lock().await;
        let modified = tokio::fs::metadata(path)
            .await
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let runtime = self.admit(&mut tracking, path.to_path_buf(), modified)?;
        start_all(std::slice::from_ref(&runtime)).await;
        Ok(runtime.token().clone())
    }

    /// Stop and unregister `token`. Its file stays tracked and is picked up
    /// again only once modified.
    pub async fn remove(&self, token: &str) -> Result<(), RegistryError> {
        let mut tracking = self.tracking.lock().await;
        if self.get(token).is_none() {
            return Err(RegistryError::UnknownTenant {
                token: TenantToken::new(token),
            });
        }
        for tracked in tracking.files.values_mut() {
            if tracked.token.as_deref() == Some(token) {
                tracked.token = None;
            }
        }
        self.retire(&TenantToken::new(token)).await;
        Ok(())
    }

    /// Full rebuild: stop every tenant, forget every file, load again.
    pub async fn reload_all(&self) -> Result<usize, RegistryError> {
        {
            let mut tracking = self.tracking.lock().await;
            self.stop_all().await;
            tracking.files.clear();
        }
        self.load().await
    }

    /// (Re)start the tenant serving `token`. Any sessions it still holds are
    /// closed first, so this also revives a tenant in `exception`.
    pub async fn start_tenant(&self, token: &str) -> Result<(), RegistryError> {
        let runtime = self.require(token)?;
        runtime.restart().await.map_err(|source| RegistryError::Start {
            token: runtime.token().clone(),
            source,
        })
    }

    /// Stop the tenant serving `token`. It stays registered, `offline`.
    pub async fn stop_tenant(&self, token: &str) -> Result<(), RegistryError> {
        self.require(token)?.stop().await;
        Ok(())
    }

    /// Snapshot of every tenant, in no particular order.
    pub fn list_status(&self) -> Vec<TenantSnapshot> {
        self.tenants.read().values().map(|t| t.snapshot()).collect()
    }

    /// Stop hot reload and every tenant.
    pub async fn shutdown(&self) {
        let hot_reload = self.hot_reload.lock().take();
        if let Some(HotReload { cancel, task }) = hot_reload {
            cancel.cancel();
            if let Err(e) = task.await {
                warn!(error = %e, "hot reload task panicked");
            }
        }
        let _tracking = self.tracking.lock().await;
        self.stop_all().await;
        info!("tenant registry drained");
    }

    // ─── Dispatch ───────────────────────────────────────────────────────────

    /// Run `token`'s job with `vars`.
    ///
    /// With an artifact store configured, outputs are downloaded and
    /// re-published and the public URLs are returned instead of the backend
    /// view URLs.
    pub async fn dispatch(
        &self,
        token: &str,
        vars: &Map<String, Value>,
    ) -> Result<Generation, DispatchError> {
        let runtime = self.get(token).ok_or_else(|| DispatchError::UnknownTenant {
            token: TenantToken::new(token),
        })?;
        let generation = runtime.generate(vars).await?;
        match &self.artifacts {
            None => Ok(generation),
            Some(artifacts) => self.persist(artifacts, generation).await,
        }
    }

    async fn persist(
        &self,
        artifacts: &Artifacts,
        generation: Generation,
    ) -> Result<Generation, DispatchError> {
        let prompt_id = generation.prompt_id;
        let storage_error = |message: String| {
            error!(prompt_id = %prompt_id, error = %message, "artifact pipeline failed");
            DispatchError::Storage {
                prompt_id: prompt_id.clone(),
                message,
            }
        };

        // removed on drop, including every early return below
        let scratch = scratch_dir(artifacts.download_dir.as_deref())
            .map_err(|e| storage_error(format!("cannot create download directory: {e}")))?;

        let mut published = Vec::with_capacity(generation.outputs.len());
        let mut names = HashSet::new();
        for (index, url) in generation.outputs.iter().enumerate() {
            // each output gets its own slot so equal names never overwrite
            let slot = scratch.path().join(index.to_string());
            let downloaded = self
                .ctx
                .client
                .download(url, &slot)
                .await
                .map_err(|e| storage_error(e.to_string()))?;
            let local = unique_local(downloaded, index, &mut names)
                .await
                .map_err(|e| storage_error(format!("cannot rename download: {e}")))?;
            let public = artifacts
                .store
                .upload(prompt_id.as_str(), &local)
                .await
                .map_err(|e| storage_error(e.to_string()))?;
            debug!(prompt_id = %prompt_id, from = %url, to = %public, "artifact published");
            published.push(public);
        }

        Ok(Generation {
            prompt_id,
            outputs: published,
        })
    }

    // ─── Internals ──────────────────────────────────────────────────────────

    fn require(&self, token: &str) -> Result<Arc<TenantRuntime>, RegistryError> {
        self.get(token).ok_or_else(|| RegistryError::UnknownTenant {
            token: TenantToken::new(token),
        })
    }

    /// Parse `path` and register a stopped runtime for it. The file is
    /// tracked either way.
    fn admit(
        &self,
        tracking: &mut Tracking,
        path: PathBuf,
        modified: SystemTime,
    ) -> Result<Arc<TenantRuntime>, RegistryError> {
        let parsed = JobDefinition::from_path(&path);
        let job = match parsed {
            Ok(job) => job,
            Err(e) => {
                let _ = tracking
                    .files
                    .entry(path)
                    .or_insert(TrackedFile { modified, token: None });
                return Err(e.into());
            }
        };

        let token = job.token.clone();
        let mut tenants = self.tenants.write();
        if tenants.contains_key(&token) {
            drop(tenants);
            // never untrack the file that already serves this token
            let _ = tracking
                .files
                .entry(path.clone())
                .or_insert(TrackedFile { modified, token: None });
            return Err(RegistryError::DuplicateToken { token, path });
        }
        let runtime = Arc::new(TenantRuntime::new(job, self.ctx.clone()));
        let _ = tenants.insert(token.clone(), Arc::clone(&runtime));
        drop(tenants);

        info!(tenant = %token, name = %runtime.job().name, path = %path.display(), "tenant registered");
        let _ = tracking.files.insert(
            path,
            TrackedFile {
                modified,
                token: Some(token),
            },
        );
        Ok(runtime)
    }

    fn admit_logged(
        &self,
        tracking: &mut Tracking,
        path: PathBuf,
        modified: SystemTime,
    ) -> Option<Arc<TenantRuntime>> {
        let shown = path.display().to_string();
        match self.admit(tracking, path, modified) {
            Ok(runtime) => Some(runtime),
            Err(e) => {
                warn!(path = %shown, code = e.code(), error = %e, "job file skipped");
                None
            }
        }
    }

    /// Unregister and stop `token`.
    async fn retire(&self, token: &TenantToken) {
        let removed = self.tenants.write().remove(token);
        if let Some(runtime) = removed {
            runtime.stop().await;
            info!(tenant = %token, "tenant unregistered");
        }
    }

    async fn stop_all(&self) {
        let drained: Vec<Arc<TenantRuntime>> =
            self.tenants.write().drain().map(|(_, t)| t).collect();
        let _ = join_all(drained.iter().map(|t| t.stop())).await;
    }
}

/// Start runtimes concurrently. Failures leave the tenant in `exception`.
async fn start_all(runtimes: &[Arc<TenantRuntime>]) {
    let results = join_all(runtimes.iter().map(|t| t.start())).await;
    for (runtime, result) in runtimes.iter().zip(results) {
        if let Err(e) = result {
            warn!(tenant = %runtime.token(), error = %e, "tenant registered but not online");
        }
    }
}

/// Job files in `dir` with their modification times.
async fn scan(dir: &Path) -> Result<BTreeMap<PathBuf, SystemTime>, RegistryError> {
    let dir_error = |source| RegistryError::Directory {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(dir_error)?;
    let mut files = BTreeMap::new();
    while let Some(entry) = entries.next_entry().await.map_err(dir_error)? {
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        let meta = match entry.metadata().await {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot stat job file");
                continue;
            }
        };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let _ = files.insert(path, modified);
    }
    Ok(files)
}

/// Give `path` a file name not yet in `taken`, prefixing the output index
/// on a clash, and record it.
async fn unique_local(
    path: PathBuf,
    index: usize,
    taken: &mut HashSet<String>,
) -> std::io::Result<PathBuf> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if taken.insert(name.clone()) {
        return Ok(path);
    }
    let renamed_name = format!("{index}_{name}");
    let renamed = path.with_file_name(&renamed_name);
    tokio::fs::rename(&path, &renamed).await?;
    let _ = taken.insert(renamed_name);
    Ok(renamed)
}

fn scratch_dir(base: Option<&Path>) -> std::io::Result<tempfile::TempDir> {
    match base {
        Some(base) => {
            std::fs::create_dir_all(base)?;
            tempfile::Builder::new().prefix("fastcomfy-").tempdir_in(base)
        }
        None => tempfile::Builder::new().prefix("fastcomfy-").tempdir(),
    }
}

async fn hot_reload_loop(registry: Weak<TenantRegistry>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick fires immediately
    let _ = ticker.tick().await;
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(registry) = registry.upgrade() else {
            break;
        };
        if let Err(e) = registry.reload_tick().await {
            warn!(error = %e, "hot reload pass failed");
        }
    }
    debug!("hot reload stopped");
}
