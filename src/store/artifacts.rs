//! Report artifact repository.
//!
//! Full reports are committed into a local git repository that is published
//! elsewhere; the returned URLs point at the published copy.

use crate::config::ArtifactsConfig;
use crate::error::UpstreamError;
use crate::models::ArtifactLocation;
use crate::upstream::ArtifactStore;
use async_trait::async_trait;
use git2::{Commit, Repository, Signature};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Git-backed artifact store.
#[derive(Debug, Clone)]
pub struct GitArtifactStore {
    repo_path: PathBuf,
    download_base_url: String,
    view_base_url: String,
    author_name: String,
    author_email: String,
}

impl From<&ArtifactsConfig> for GitArtifactStore {
    fn from(config: &ArtifactsConfig) -> Self {
        Self {
            repo_path: PathBuf::from(&config.repo_path),
            download_base_url: config.download_base_url.clone(),
            view_base_url: config.view_base_url.clone(),
            author_name: config.author_name.clone(),
            author_email: config.author_email.clone(),
        }
    }
}

impl GitArtifactStore {
    fn open_or_init(&self) -> Result<Repository, UpstreamError> {
        match Repository::open(&self.repo_path) {
            Ok(repo) => Ok(repo),
            Err(_) => {
                info!("Initializing artifact repository at {}", self.repo_path.display());
                std::fs::create_dir_all(&self.repo_path)
                    .map_err(|e| UpstreamError::Artifact(e.to_string()))?;
                Ok(Repository::init(&self.repo_path)?)
            }
        }
    }

    fn commit_file(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<git2::Oid, UpstreamError> {
        let relative = Path::new(path);
        let is_safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !is_safe {
            return Err(UpstreamError::Artifact(format!(
                "artifact path must be relative: {}",
                path
            )));
        }

        let repo = self.open_or_init()?;
        let full_path = self.repo_path.join(relative);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| UpstreamError::Artifact(e.to_string()))?;
        }
        std::fs::write(&full_path, content).map_err(|e| UpstreamError::Artifact(e.to_string()))?;

        let mut index = repo.index()?;
        index.add_path(relative)?;
        index.write()?;
        let tree = repo.find_tree(index.write_tree()?)?;

        let signature = Signature::now(&self.author_name, &self.author_email)?;
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&Commit<'_>> = parent.iter().collect();

        let oid = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
        debug!("Committed {} as {}", path, oid);
        Ok(oid)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[async_trait]
impl ArtifactStore for GitArtifactStore {
    async fn upload(
        &self,
        path: &str,
        content: &[u8],
        commit_message: &str,
    ) -> Result<ArtifactLocation, UpstreamError> {
        let store = self.clone();
        let path_owned = path.to_string();
        let content = content.to_vec();
        let message = commit_message.to_string();

        tokio::task::spawn_blocking(move || store.commit_file(&path_owned, &content, &message))
            .await
            .map_err(|e| UpstreamError::Artifact(e.to_string()))??;

        Ok(ArtifactLocation {
            download_url: join_url(&self.download_base_url, path),
            view_url: join_url(&self.view_base_url, path),
        })
    }
}
