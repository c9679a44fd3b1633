//! Script correction pipeline
//!
//! Reconciles previously decoded unlock scripts against freshly downloaded
//! authoritative manifests. Per identifier the pipeline runs
//! `DISCOVER -> DOWNLOAD_AUTHORITATIVE_MANIFESTS -> CORRECT -> EXPORT ->
//! CLEANUP`; a failure is logged for that identifier and the batch moves on.
//! Legacy `.st` containers found in the folder are converted to scripts
//! first, then consumed at cleanup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::script;
use crate::core::types::AppId;
use crate::io::cache;
use crate::io::http::RateLimitClient;
use crate::ops::decode::decode_container;
use crate::ops::resolve::Resolver;

/// Result of correcting one identifier's script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixOutcome {
    pub app_id: AppId,
    /// Stale pin directives rewritten.
    pub rewritten: usize,
    /// Duplicate depot registrations dropped.
    pub deduped: usize,
}

impl FixOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.rewritten == 0 && self.deduped == 0
    }
}

/// What one whole run did.
#[derive(Debug, Default)]
pub struct FixReport {
    /// Containers converted to scripts (and consumed at cleanup).
    pub converted: Vec<PathBuf>,
    pub outcomes: Vec<FixOutcome>,
    /// Per-identifier failures, batch continued past each.
    pub failures: Vec<(AppId, String)>,
}

/// Batch corrector for a directory of unlock scripts.
pub struct Fixer<'a> {
    client: &'a RateLimitClient,
    repositories: &'a [String],
    folder: &'a Path,
    cache_dir: &'a Path,
    api_base: String,
}

impl<'a> Fixer<'a> {
    pub fn new(
        client: &'a RateLimitClient,
        repositories: &'a [String],
        folder: &'a Path,
        cache_dir: &'a Path,
    ) -> Self {
        Self::with_api_base(client, repositories, folder, cache_dir, "https://api.github.com")
    }

    pub fn with_api_base(
        client: &'a RateLimitClient,
        repositories: &'a [String],
        folder: &'a Path,
        cache_dir: &'a Path,
        api_base: &str,
    ) -> Self {
        Self {
            client,
            repositories,
            folder,
            cache_dir,
            api_base: api_base.to_string(),
        }
    }

    pub async fn run(&self) -> Result<FixReport> {
        let mut report = FixReport::default();
        report.converted = self.convert_containers().await?;

        for app_id in self.discover().await? {
            match self.process(app_id).await {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(err) => {
                    tracing::warn!("correction failed for app {app_id}: {err:#}");
                    report.failures.push((app_id, format!("{err:#}")));
                }
            }
        }

        // Cleanup: converted containers are consumed
        for path in &report.converted {
            if let Err(err) = tokio::fs::remove_file(path).await {
                tracing::warn!("could not remove {}: {err}", path.display());
            }
        }
        Ok(report)
    }

    /// Convert every `.st` container in the folder to a `.lua` script.
    ///
    /// A container that fails to decode is left in place and skipped.
    async fn convert_containers(&self) -> Result<Vec<PathBuf>> {
        let mut converted = Vec::new();
        let mut entries = tokio::fs::read_dir(self.folder)
            .await
            .with_context(|| format!("Failed to list {}", self.folder.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "st") {
                continue;
            }
            let content = match tokio::fs::read(&path).await {
                Ok(content) => content,
                Err(err) => {
                    tracing::warn!("could not read {}: {err}", path.display());
                    continue;
                }
            };
            match decode_container(&content) {
                Ok(text) => {
                    cache::write_atomic(&path.with_extension("lua"), text.as_bytes()).await?;
                    tracing::debug!("converted {}", path.display());
                    converted.push(path);
                }
                Err(err) => tracing::warn!("could not decode {}: {err}", path.display()),
            }
        }
        converted.sort();
        Ok(converted)
    }

    /// Identifiers with a `<appid>.lua` script present in the folder.
    async fn discover(&self) -> Result<Vec<AppId>> {
        let mut app_ids = Vec::new();
        let mut entries = tokio::fs::read_dir(self.folder).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "lua") {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse().ok()) {
                Some(app_id) => app_ids.push(app_id),
                None => tracing::warn!("skipping non-numeric script name: {}", path.display()),
            }
        }
        app_ids.sort_unstable();
        app_ids.dedup();
        Ok(app_ids)
    }

    /// Run one identifier through staging, correction, export, and cleanup.
    ///
    /// Export and cleanup run even when correction fails, so the script
    /// always ends up back in the folder.
    async fn process(&self, app_id: AppId) -> Result<FixOutcome> {
        let script_name = format!("{app_id}.lua");
        let stage = self.folder.join(format!("temp_{app_id}"));
        cache::ensure_dir(&stage).await?;

        let staged_script = stage.join(&script_name);
        move_file(&self.folder.join(&script_name), &staged_script).await?;

        let result = self.correct_staged(app_id, &stage, &staged_script).await;

        let export = self.export(&stage).await;
        if let Err(err) = tokio::fs::remove_dir_all(&stage).await {
            tracing::warn!("could not remove staging dir {}: {err}", stage.display());
        }
        export?;
        result
    }

    /// Download the authoritative manifests for this identifier into the
    /// staging dir and rewrite the script against them.
    async fn correct_staged(
        &self,
        app_id: AppId,
        stage: &Path,
        staged_script: &Path,
    ) -> Result<FixOutcome> {
        let resolver = Resolver::with_api_base(self.client, stage, &self.api_base);
        let resolution = resolver.resolve(app_id, self.repositories).await?;

        // Newest revision per depot is the single correct one
        let authoritative: BTreeMap<_, _> = resolution
            .manifests
            .iter()
            .filter_map(|(depot_id, revs)| revs.first().map(|&newest| (depot_id, newest)))
            .collect();

        let content = tokio::fs::read_to_string(staged_script)
            .await
            .with_context(|| format!("Failed to read {}", staged_script.display()))?;
        let correction = script::correct(&content, &authoritative);

        let outcome = FixOutcome {
            app_id,
            rewritten: correction.rewritten.len(),
            deduped: correction.deduped.len(),
        };
        if !outcome.is_unchanged() {
            for (depot_id, stale, correct_id) in &correction.rewritten {
                tracing::debug!("app {app_id}: depot {depot_id} repinned {stale} -> {correct_id}");
            }
            cache::write_atomic(staged_script, correction.content.as_bytes()).await?;
        }
        Ok(outcome)
    }

    /// Move staged manifests into the cache and scripts back into the folder.
    async fn export(&self, stage: &Path) -> Result<()> {
        cache::ensure_dir(self.cache_dir).await?;
        let mut entries = tokio::fs::read_dir(stage).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(".manifest") {
                move_file(&path, &self.cache_dir.join(name)).await?;
            } else if name.ends_with(".lua") {
                move_file(&path, &self.folder.join(name)).await?;
            }
        }
        Ok(())
    }
}

/// Rename, falling back to copy-and-delete across filesystems.
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to)
        .await
        .with_context(|| format!("Failed to move {} to {}", from.display(), to.display()))?;
    tokio::fs::remove_file(from).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    /// Stand up branch/tree/raw mocks resolving `app` to one depot 7 with
    /// newest manifest 300. The returned handles keep the mocks alive.
    async fn mock_authoritative(server: &mut mockito::Server, app: u64) -> Vec<mockito::Mock> {
        let mut mocks = Vec::new();
        mocks.push(
            server
                .mock("GET", format!("/repos/o/hub/branches/{app}").as_str())
                .with_body(r#"{"commit": {"sha": "fixsha"}}"#)
                .create_async()
                .await,
        );
        mocks.push(
            server
                .mock("GET", "/repos/o/hub/git/trees/fixsha")
                .match_query(Matcher::UrlEncoded("recursive".into(), "1".into()))
                .with_body(
                    r#"{"tree": [{"path": "7_300.manifest"}, {"path": "7_100.manifest"}]}"#,
                )
                .create_async()
                .await,
        );
        for name in ["7_300", "7_100"] {
            mocks.push(
                server
                    .mock("GET", format!("/o/hub/fixsha/{name}.manifest").as_str())
                    .with_body("manifest-data")
                    .create_async()
                    .await,
            );
        }
        mocks
    }

    fn fixture() -> (tempfile::TempDir, tempfile::TempDir) {
        (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap())
    }

    #[tokio::test]
    async fn test_stale_pin_is_corrected_and_manifests_exported() {
        let mut server = mockito::Server::new_async().await;
        let _mocks = mock_authoritative(&mut server, 42).await;
        let (folder, cache_dir) = fixture();

        let script = folder.path().join("42.lua");
        std::fs::write(&script, "addappid(42, 1, \"None\")\nsetManifestid(7, \"100\")\n").unwrap();

        let client = RateLimitClient::with_raw_base(&server.url()).unwrap();
        let repos = vec!["o/hub".to_string()];
        let fixer = Fixer::with_api_base(
            &client,
            &repos,
            folder.path(),
            cache_dir.path(),
            &server.url(),
        );
        let report = fixer.run().await.unwrap();

        assert_eq!(report.failures.len(), 0);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].rewritten, 1);

        // Script corrected and back in the folder, staging gone
        assert_eq!(
            std::fs::read_to_string(&script).unwrap(),
            "addappid(42, 1, \"None\")\nsetManifestid(7, \"300\")\n"
        );
        assert!(!folder.path().join("temp_42").exists());
        // Authoritative manifests exported into the cache
        assert!(cache_dir.path().join("7_300.manifest").exists());
        assert!(cache_dir.path().join("7_100.manifest").exists());
    }

    #[tokio::test]
    async fn test_current_script_is_left_untouched() {
        let mut server = mockito::Server::new_async().await;
        let _mocks = mock_authoritative(&mut server, 42).await;
        let (folder, cache_dir) = fixture();

        let content = "addappid(42, 1, \"None\")\nsetManifestid(7,   \"300\")\n";
        std::fs::write(folder.path().join("42.lua"), content).unwrap();

        let client = RateLimitClient::with_raw_base(&server.url()).unwrap();
        let repos = vec!["o/hub".to_string()];
        let fixer = Fixer::with_api_base(
            &client,
            &repos,
            folder.path(),
            cache_dir.path(),
            &server.url(),
        );
        let report = fixer.run().await.unwrap();

        assert!(report.outcomes[0].is_unchanged());
        assert_eq!(
            std::fs::read_to_string(folder.path().join("42.lua")).unwrap(),
            content
        );
    }

    #[tokio::test]
    async fn test_unresolvable_app_is_recorded_and_script_preserved() {
        let mut server = mockito::Server::new_async().await;
        let _branch = server
            .mock("GET", "/repos/o/hub/branches/99")
            .with_status(404)
            .create_async()
            .await;
        let (folder, cache_dir) = fixture();

        let content = "setManifestid(7, \"100\")\n";
        std::fs::write(folder.path().join("99.lua"), content).unwrap();

        let client = RateLimitClient::with_raw_base(&server.url()).unwrap();
        let repos = vec!["o/hub".to_string()];
        let fixer = Fixer::with_api_base(
            &client,
            &repos,
            folder.path(),
            cache_dir.path(),
            &server.url(),
        );
        let report = fixer.run().await.unwrap();

        assert_eq!(report.outcomes.len(), 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, 99);
        // Export still ran: the script is back, uncorrected
        assert_eq!(
            std::fs::read_to_string(folder.path().join("99.lua")).unwrap(),
            content
        );
        assert!(!folder.path().join("temp_99").exists());
    }

    #[tokio::test]
    async fn test_containers_are_converted_and_consumed() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut server = mockito::Server::new_async().await;
        let _mocks = mock_authoritative(&mut server, 55).await;
        let (folder, cache_dir) = fixture();

        // Container holding a stale script for app 55
        let mut plain = vec![0u8; 512];
        plain.extend_from_slice(b"addappid(55, 1, \"None\")\nsetManifestid(7, \"100\")\n");
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&plain).unwrap();
        let mut payload = encoder.finish().unwrap();
        let seed: u32 = 5;
        let key = ((seed ^ 0xFFFE_A4C8) & 0xFF) as u8;
        let size = payload.len() as u32;
        for byte in &mut payload {
            *byte ^= key;
        }
        let mut container = Vec::new();
        container.extend_from_slice(&seed.to_le_bytes());
        container.extend_from_slice(&size.to_le_bytes());
        container.extend_from_slice(&[0u8; 4]);
        container.extend_from_slice(&payload);
        std::fs::write(folder.path().join("55.st"), &container).unwrap();

        let client = RateLimitClient::with_raw_base(&server.url()).unwrap();
        let repos = vec!["o/hub".to_string()];
        let fixer = Fixer::with_api_base(
            &client,
            &repos,
            folder.path(),
            cache_dir.path(),
            &server.url(),
        );
        let report = fixer.run().await.unwrap();

        assert_eq!(report.converted.len(), 1);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].rewritten, 1);
        // Container consumed, corrected script in its place
        assert!(!folder.path().join("55.st").exists());
        assert_eq!(
            std::fs::read_to_string(folder.path().join("55.lua")).unwrap(),
            "addappid(55, 1, \"None\")\nsetManifestid(7, \"300\")\n"
        );
    }
}
