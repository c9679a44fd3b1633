//! Resolve command

use anyhow::{bail, Context, Result};

use hublock::io::cache;
use hublock::ops::search::{AppLookup, AppMatch};
use hublock::ops::Resolver;
use hublock::script;
use hublock::{Config, RateLimitClient};

/// Resolve each query to an app, pull its depot data, and write the unlock
/// script. Identifiers are processed strictly one after another so quota
/// consumption stays predictable; a failure is reported and the batch moves
/// on.
pub async fn resolve(queries: &[String], pin: Option<bool>, dry_run: bool) -> Result<()> {
    let config = Config::load(&hublock::config_path())?;
    let pin_versions = pin.unwrap_or(config.pin_versions);

    let client = RateLimitClient::new().context("Failed to build HTTP client")?;
    client.set_observer(|info| println!("  API quota: {info}"));

    let mut failed = 0usize;
    for query in queries {
        match resolve_one(&client, &config, query, pin_versions, dry_run).await {
            Ok((app, dlc_count)) => {
                println!(
                    "✓ Configured {} ({}) with {dlc_count} DLC(s)",
                    app.name, app.app_id
                );
            }
            Err(err) => {
                println!("✗ {query}: {err:#}");
                failed += 1;
            }
        }
    }

    if failed == queries.len() {
        bail!("No identifiers could be resolved");
    }
    Ok(())
}

async fn resolve_one(
    client: &RateLimitClient,
    config: &Config,
    query: &str,
    pin_versions: bool,
    dry_run: bool,
) -> Result<(AppMatch, usize)> {
    let app = AppLookup::new(client).lookup(query).await?;
    println!(">>> Resolving {} ({})", app.name, app.app_id);

    let resolver = Resolver::new(client, &config.cache_dir);
    let resolution = resolver.resolve(app.app_id, &config.repositories).await?;

    let script = script::synthesize(
        app.app_id,
        &resolution.depots,
        &resolution.manifests,
        pin_versions,
    );
    let path = config.scripts_dir.join(format!("{}.lua", app.app_id));

    if dry_run {
        // Manifests already landed in the cache; only the script write is held back
        println!("Would write {}", path.display());
    } else {
        cache::ensure_dir(&config.scripts_dir).await?;
        cache::write_atomic(&path, script.as_bytes()).await?;
        println!("✓ Script written -> {}", path.display());
    }
    Ok((app, resolution.dlc_count))
}
