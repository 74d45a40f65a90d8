//! Remote artifact storage

use crate::config::RemoteConfig;
use crate::error::ServiceError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Source of fresh model artifacts
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Download `filename` from `repo_id` into `dest_dir`, overwriting any
    /// existing file of the same name, and return the local path.
    async fn fetch(
        &self,
        repo_id: &str,
        filename: &str,
        token: Option<&str>,
        dest_dir: &Path,
    ) -> Result<PathBuf, ServiceError>;
}

/// Client for a Hugging Face style hub (`{endpoint}/{repo}/resolve/main/{file}`)
pub struct HubClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HubClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        Self::new(&config.endpoint)
    }

    pub fn file_url(&self, repo_id: &str, filename: &str) -> String {
        format!(
            "{}/{}/resolve/main/{}",
            self.endpoint,
            repo_id.trim_matches('/'),
            filename.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ArtifactStore for HubClient {
    async fn fetch(
        &self,
        repo_id: &str,
        filename: &str,
        token: Option<&str>,
        dest_dir: &Path,
    ) -> Result<PathBuf, ServiceError> {
        let url = self.file_url(repo_id, filename);
        info!(repo_id = %repo_id, filename = %filename, dest = %dest_dir.display(), "Downloading model artifact");

        let mut request = self.client.get(&url);
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| ServiceError::Download(format!("{}: {}", url, e)))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Download(format!(
                "{} returned {}: {}",
                url,
                status,
                text.trim()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ServiceError::Download(format!("{}: {}", url, e)))?;

        let target = write_artifact(dest_dir, filename, &bytes).await?;
        info!(path = %target.display(), bytes = bytes.len(), "Model artifact downloaded");
        Ok(target)
    }
}

/// Write through a temporary file so a partial download never replaces the
/// current artifact.
pub async fn write_artifact(
    dest_dir: &Path,
    filename: &str,
    bytes: &[u8],
) -> Result<PathBuf, ServiceError> {
    let name = Path::new(filename)
        .file_name()
        .ok_or_else(|| ServiceError::Download(format!("invalid artifact name '{}'", filename)))?;

    tokio::fs::create_dir_all(dest_dir)
        .await
        .map_err(|e| ServiceError::Download(format!("{}: {}", dest_dir.display(), e)))?;

    let target = dest_dir.join(name);
    let partial = dest_dir.join(format!(".{}.part", uuid::Uuid::new_v4()));

    tokio::fs::write(&partial, bytes)
        .await
        .map_err(|e| ServiceError::Download(format!("{}: {}", partial.display(), e)))?;

    if let Err(e) = tokio::fs::rename(&partial, &target).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(ServiceError::Download(format!("{}: {}", target.display(), e)));
    }

    debug!(path = %target.display(), "Artifact written");
    Ok(target)
}
