//! Model lifecycle: load from disk, hot reload from remote storage, and the
//! single serving slot shared by every request.

use crate::config::ModelConfig;
use crate::error::ServiceError;
use crate::models::backend::Backend;
use crate::models::convert::convert;
use crate::models::ensemble::ObliviousForest;
use crate::models::graph::GraphLoader;
use crate::models::signature::SignatureResolver;
use crate::remote::ArtifactStore;
use crate::types::signature::ModelStatus;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};
use tracing::{error, info, warn};

/// Downloads land here and are checked before anything in the model
/// directory is replaced
const STAGING_DIR: &str = ".incoming";

/// Owns the serving backend.
///
/// Readers take a cheap `Arc` snapshot through [`ModelManager::current`];
/// writers replace the whole slot through [`ModelManager::publish`]. A failed
/// reload never touches the slot.
pub struct ModelManager {
    config: ModelConfig,
    signatures: Arc<SignatureResolver>,
    store: Arc<dyn ArtifactStore>,
    slot: RwLock<Option<Arc<Backend>>>,
    /// Created on first portable load; `None` if the runtime is unavailable
    graph_loader: OnceLock<Option<GraphLoader>>,
    /// Serializes reloads so two downloads never interleave on disk
    reload_lock: tokio::sync::Mutex<()>,
}

impl ModelManager {
    pub fn new(config: ModelConfig, store: Arc<dyn ArtifactStore>) -> Self {
        let signatures = Arc::new(SignatureResolver::new(
            config.metadata_path(),
            config.descriptions_path(),
        ));
        Self {
            config,
            signatures,
            store,
            slot: RwLock::new(None),
            graph_loader: OnceLock::new(),
            reload_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Signature cache shared with the decision engine
    pub fn signatures(&self) -> Arc<SignatureResolver> {
        Arc::clone(&self.signatures)
    }

    /// Snapshot of the serving backend
    pub fn current(&self) -> Option<Arc<Backend>> {
        match self.slot.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Atomically replace the serving backend and drop cached metadata
    pub fn publish(&self, backend: Arc<Backend>) {
        let kind = backend.kind();
        match self.slot.write() {
            Ok(mut slot) => *slot = Some(backend),
            Err(poisoned) => *poisoned.into_inner() = Some(backend),
        }
        self.signatures.invalidate();
        info!(backend = %kind, "Model published");
    }

    /// Load a backend from the model directory.
    ///
    /// The portable graph is preferred when present; if it fails to load the
    /// native ensemble is tried. `None` means nothing could be loaded.
    pub fn load(&self) -> Option<Arc<Backend>> {
        let portable = self.config.portable_path();
        if portable.exists() {
            match self.load_portable(&portable) {
                Ok(backend) => return Some(Arc::new(backend)),
                Err(e) => warn!(
                    path = %portable.display(),
                    error = %format!("{:#}", e),
                    "Portable model failed to load, falling back to native"
                ),
            }
        }

        let native = self.config.native_path();
        if !native.exists() {
            warn!(
                native = %native.display(),
                portable = %portable.display(),
                "No model artifact found"
            );
            return None;
        }

        match ObliviousForest::from_json_file(&native) {
            Ok(forest) => Some(Arc::new(Backend::NativeEnsemble(forest))),
            Err(e) => {
                error!(path = %native.display(), error = %format!("{:#}", e), "Native model failed to load");
                None
            }
        }
    }

    fn load_portable(&self, path: &Path) -> Result<Backend> {
        let loader = self
            .graph_loader
            .get_or_init(|| match GraphLoader::with_threads(self.config.onnx_threads) {
                Ok(loader) => Some(loader),
                Err(e) => {
                    error!(error = %e, "ONNX Runtime unavailable");
                    None
                }
            })
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("ONNX Runtime is not available"))?;
        Ok(Backend::PortableGraph(loader.load(path)?))
    }

    /// Fetch a fresh artifact and load it.
    ///
    /// The caller publishes the returned backend. On error the serving slot
    /// and the artifacts on disk are left as they were.
    pub async fn reload(
        self: &Arc<Self>,
        repo_id: &str,
        filename: &str,
        token: Option<&str>,
    ) -> Result<Arc<Backend>, ServiceError> {
        let _guard = self.reload_lock.lock().await;
        self.fetch_and_load(repo_id, filename, token).await
    }

    /// Fetch, load and publish without releasing the reload lock, so the
    /// serving backend always matches the last artifact installed on disk.
    pub async fn reload_and_publish(
        self: &Arc<Self>,
        repo_id: &str,
        filename: &str,
        token: Option<&str>,
    ) -> Result<Arc<Backend>, ServiceError> {
        let _guard = self.reload_lock.lock().await;
        let backend = self.fetch_and_load(repo_id, filename, token).await?;
        self.publish(Arc::clone(&backend));
        Ok(backend)
    }

    async fn fetch_and_load(
        self: &Arc<Self>,
        repo_id: &str,
        filename: &str,
        token: Option<&str>,
    ) -> Result<Arc<Backend>, ServiceError> {
        info!(repo_id = %repo_id, filename = %filename, "Model reload requested");
        let staging = self.config.model_dir.join(STAGING_DIR);
        let staged = self.store.fetch(repo_id, filename, token, &staging).await?;

        let manager = Arc::clone(self);
        let backend = tokio::task::spawn_blocking(move || {
            if let Err(e) = manager.install(&staged) {
                let _ = std::fs::remove_file(&staged);
                return Err(e);
            }
            manager.load().ok_or_else(|| {
                ServiceError::Load("Failed to load the downloaded model into memory".to_string())
            })
        })
        .await
        .map_err(|e| ServiceError::Load(format!("reload task failed: {}", e)))??;

        info!(backend = %backend.kind(), "Model reloaded");
        Ok(backend)
    }

    /// Check a staged download and move it where `load` looks for it.
    ///
    /// Nothing in the model directory changes unless the download parses.
    /// A new native artifact also replaces the portable graph, or removes it
    /// when conversion fails so it cannot shadow the native one.
    fn install(&self, staged: &Path) -> Result<(), ServiceError> {
        let portable = self.config.portable_path();
        if staged.file_name() == portable.file_name() {
            self.load_portable(staged).map_err(|e| {
                ServiceError::Load(format!("downloaded graph is unusable: {:#}", e))
            })?;
            return replace(staged, &portable);
        }

        ObliviousForest::from_json_file(staged)
            .map_err(|e| ServiceError::Load(format!("downloaded model is unusable: {:#}", e)))?;

        let staged_graph = staged.with_file_name(&self.config.portable_filename);
        let converted = convert(staged, &staged_graph);

        replace(staged, &self.config.native_path())?;
        if converted {
            replace(&staged_graph, &portable)?;
        } else if portable.exists() {
            warn!(path = %portable.display(), "Removing portable model that no longer matches the native one");
            std::fs::remove_file(&portable)
                .map_err(|e| ServiceError::Load(format!("{}: {}", portable.display(), e)))?;
        }
        Ok(())
    }

    /// On-disk status of `filename` in the model directory
    pub fn status(&self, filename: &str) -> ModelStatus {
        let path: PathBuf = self.config.model_dir.join(filename);
        let metadata = std::fs::metadata(&path).ok().filter(|m| m.is_file());

        ModelStatus {
            model_name: filename.to_string(),
            exists: metadata.is_some(),
            path: path.display().to_string(),
            size_kb: metadata
                .as_ref()
                .map(|m| (m.len() as f64 / 1024.0 * 100.0).round() / 100.0),
            last_modified: metadata
                .and_then(|m| m.modified().ok())
                .map(|t| {
                    chrono::DateTime::<chrono::Local>::from(t)
                        .format("%a %b %e %H:%M:%S %Y")
                        .to_string()
                }),
        }
    }
}

fn replace(from: &Path, to: &Path) -> Result<(), ServiceError> {
    std::fs::rename(from, to).map_err(|e| {
        ServiceError::Load(format!("cannot move {} into place: {}", from.display(), e))
    })
}
