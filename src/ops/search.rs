//! App lookup against the store endpoints
//!
//! Lets callers hand in either a bare app id or a human query. Ids are
//! validated (and named) via the store details endpoint; free-text queries go
//! through the community search endpoint and the first hit wins.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::core::types::AppId;
use crate::io::http::{FetchError, RateLimitClient};

/// A query resolved to a concrete app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppMatch {
    pub app_id: AppId,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    appid: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct AppDetails {
    success: bool,
    data: Option<AppData>,
}

#[derive(Debug, Deserialize)]
struct AppData {
    name: String,
}

/// Store/community lookup client.
pub struct AppLookup<'a> {
    client: &'a RateLimitClient,
    store_base: String,
    community_base: String,
}

impl<'a> AppLookup<'a> {
    pub fn new(client: &'a RateLimitClient) -> Self {
        Self::with_bases(
            client,
            "https://store.steampowered.com",
            "https://steamcommunity.com",
        )
    }

    /// Point both endpoints at a different host (tests use a local mock).
    pub fn with_bases(client: &'a RateLimitClient, store_base: &str, community_base: &str) -> Self {
        Self {
            client,
            store_base: store_base.trim_end_matches('/').to_string(),
            community_base: community_base.trim_end_matches('/').to_string(),
        }
    }

    /// Resolve a query to an app: digits are treated as an app id to
    /// validate, anything else as a search term.
    pub async fn lookup(&self, query: &str) -> Result<AppMatch> {
        if !query.is_empty() && query.bytes().all(|b| b.is_ascii_digit()) {
            let app_id: AppId = query.parse().context("App id out of range")?;
            let name = self
                .app_name(app_id)
                .await?
                .ok_or_else(|| anyhow!("Unknown app id {app_id}"))?;
            return Ok(AppMatch { app_id, name });
        }

        let mut url = reqwest::Url::parse(&self.community_base)?;
        url.path_segments_mut()
            .map_err(|()| anyhow!("Invalid community base URL"))?
            .extend(["actions", "SearchApps", query]);

        let hits: Vec<SearchHit> = self
            .client
            .get_json(url.as_str())
            .await
            .map_err(friendly)
            .context("Search failed")?;

        let first = hits
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No apps found matching '{query}'"))?;
        let app_id = first
            .appid
            .parse()
            .with_context(|| format!("Search returned a non-numeric app id: {}", first.appid))?;
        Ok(AppMatch {
            app_id,
            name: first.name,
        })
    }

    /// The display name for an app id, or None when the store does not know
    /// it (or does not expose it).
    async fn app_name(&self, app_id: AppId) -> Result<Option<String>> {
        let url = format!("{}/api/appdetails?appids={app_id}", self.store_base);
        let mut details: HashMap<String, AppDetails> = self
            .client
            .get_json(&url)
            .await
            .map_err(friendly)
            .context("Failed to fetch app details")?;

        Ok(details
            .remove(&app_id.to_string())
            .filter(|d| d.success)
            .and_then(|d| d.data)
            .map(|d| d.name))
    }
}

/// Map a denied request to a message worth showing, everything else through.
fn friendly(err: FetchError) -> anyhow::Error {
    if err.is_forbidden() {
        anyhow!("Access denied by the store; try again later ({err})")
    } else {
        anyhow!(err)
    }
}
