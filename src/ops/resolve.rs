//! Repository resolver and manifest tree parser
//!
//! Repositories are third-party, inconsistent, and rate-limited, so the
//! resolver walks the configured list in order and stops at the first one
//! that yields actual data. A failed attempt abandons that repository for
//! this app, and partial results are never merged across repositories, since
//! the same depot id may map to incompatible content per source.

use std::path::Path;

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use thiserror::Error;

use crate::core::keyfile;
use crate::core::types::{AppId, ManifestIndex, Resolution};
use crate::io::cache;
use crate::io::http::{FetchError, RateLimitClient};

/// Concurrent manifest downloads within one tree
const MANIFEST_CONCURRENCY: usize = 10;

#[derive(Debug, Deserialize)]
struct BranchInfo {
    commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct TreeListing {
    #[serde(default)]
    tree: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
}

/// Why one repository attempt did not produce a resolution. Recoverable by
/// falling through to the next repository.
#[derive(Error, Debug)]
pub enum AttemptError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("repository yielded no manifests or keys")]
    Empty,
}

/// Every candidate repository was tried and none resolved the app.
#[derive(Error, Debug)]
#[error("all {tried} repositories failed for app {app_id}")]
pub struct ResolveError {
    pub app_id: AppId,
    pub tried: usize,
}

/// Sequential-fallback resolver over an ordered repository list.
pub struct Resolver<'a> {
    client: &'a RateLimitClient,
    cache_dir: &'a Path,
    api_base: String,
}

impl<'a> Resolver<'a> {
    pub fn new(client: &'a RateLimitClient, cache_dir: &'a Path) -> Self {
        Self::with_api_base(client, cache_dir, "https://api.github.com")
    }

    /// Point API lookups at a different host (tests use a local mock).
    pub fn with_api_base(client: &'a RateLimitClient, cache_dir: &'a Path, api_base: &str) -> Self {
        Self {
            client,
            cache_dir,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Resolve one app against the repository list.
    ///
    /// Attempts are independent: a failure (HTTP error, missing branch,
    /// empty tree) is logged and the next repository is tried. The first
    /// attempt yielding a non-empty [`Resolution`] wins.
    pub async fn resolve(
        &self,
        app_id: AppId,
        repositories: &[String],
    ) -> Result<Resolution, ResolveError> {
        for repo in repositories {
            tracing::debug!("trying repository {repo} for app {app_id}");
            match self.attempt(repo, app_id).await {
                Ok(resolution) => {
                    tracing::debug!(
                        "resolved app {app_id} via {repo}: {} depot keys, {} depots with manifests",
                        resolution.depots.len(),
                        resolution.manifests.len()
                    );
                    return Ok(resolution);
                }
                Err(err) => {
                    tracing::warn!("repository {repo} failed for app {app_id}: {err}");
                }
            }
        }
        Err(ResolveError {
            app_id,
            tried: repositories.len(),
        })
    }

    /// One full attempt against one repository: branch lookup by app id,
    /// recursive tree listing, then the tree parse.
    async fn attempt(&self, repo: &str, app_id: AppId) -> Result<Resolution, AttemptError> {
        let branch: BranchInfo = self
            .client
            .get_json(&format!("{}/repos/{repo}/branches/{app_id}", self.api_base))
            .await?;
        let revision = branch.commit.sha;

        let listing: TreeListing = self
            .client
            .get_json(&format!(
                "{}/repos/{repo}/git/trees/{revision}?recursive=1",
                self.api_base
            ))
            .await?;

        let resolution = self.parse_tree(repo, &revision, &listing.tree).await?;
        if resolution.is_empty() {
            return Err(AttemptError::Empty);
        }
        Ok(resolution)
    }

    /// Walk the tree entries of a resolved revision.
    ///
    /// Manifest entries are recorded in the index and downloaded into the
    /// cache when not already present (warm cache entries are recorded but
    /// never re-fetched). Key-description entries are downloaded and parsed;
    /// an unparseable key file contributes zero records without failing the
    /// attempt. Malformed manifest filenames are skipped with a warning.
    async fn parse_tree(
        &self,
        repo: &str,
        revision: &str,
        entries: &[TreeEntry],
    ) -> Result<Resolution, AttemptError> {
        cache::ensure_dir(self.cache_dir).await?;

        let mut manifests = ManifestIndex::new();
        let mut missing = Vec::new();
        let mut key_paths = Vec::new();

        for entry in entries {
            let name = entry.path.rsplit('/').next().unwrap_or(&entry.path);
            if name.ends_with(".manifest") {
                match crate::core::types::parse_manifest_filename(name) {
                    Some((depot_id, manifest_id)) => {
                        let dest = cache::manifest_path(self.cache_dir, depot_id, manifest_id);
                        if !dest.exists() {
                            missing.push((entry.path.clone(), dest));
                        }
                        manifests.record(depot_id, manifest_id);
                    }
                    None => tracing::warn!("ignoring malformed manifest name: {name}"),
                }
            } else if entry.path.to_lowercase().contains("key.vdf") {
                key_paths.push(entry.path.clone());
            }
        }

        // Independent reads into distinct files; a bounded fan-out keeps the
        // quota burn predictable. Any failed download abandons the attempt.
        let mut downloads = stream::iter(
            missing
                .into_iter()
                .map(|(path, dest)| self.download_manifest(repo, revision, path, dest)),
        )
        .buffer_unordered(MANIFEST_CONCURRENCY);
        while let Some(result) = downloads.next().await {
            result?;
        }

        let mut depots = Vec::new();
        for path in &key_paths {
            tracing::debug!("processing key file {path}");
            let content = self.client.fetch_manifest(repo, revision, path).await?;
            match keyfile::parse_depot_keys(&content) {
                Ok(records) => depots.extend(records),
                Err(err) => tracing::warn!("skipping unparseable key file {path}: {err}"),
            }
        }

        let dlc_count = depots.len();
        manifests.sort();
        Ok(Resolution {
            depots,
            manifests,
            dlc_count,
        })
    }

    async fn download_manifest(
        &self,
        repo: &str,
        revision: &str,
        path: String,
        dest: std::path::PathBuf,
    ) -> Result<(), AttemptError> {
        tracing::debug!("downloading manifest {path}");
        let content = self.client.fetch_manifest(repo, revision, &path).await?;
        cache::write_atomic(&dest, &content).await?;
        Ok(())
    }
}
