//! Search command

use anyhow::{Context, Result};

use hublock::ops::search::AppLookup;
use hublock::RateLimitClient;

/// Look up an app by id or free-text query and print the best match.
pub async fn search(query: &str) -> Result<()> {
    let client = RateLimitClient::new().context("Failed to build HTTP client")?;
    let found = AppLookup::new(&client).lookup(query).await?;
    println!("  {:<10} {}", found.app_id, found.name);
    Ok(())
}
