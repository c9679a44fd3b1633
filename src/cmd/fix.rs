//! Fix command

use std::path::Path;

use anyhow::{bail, Context, Result};

use hublock::ops::fix::Fixer;
use hublock::{Config, RateLimitClient};

/// Run the correction pipeline over a directory of unlock scripts.
pub async fn fix(folder: &Path, dry_run: bool) -> Result<()> {
    if !folder.is_dir() {
        bail!("{} is not a directory", folder.display());
    }

    let config = Config::load(&hublock::config_path())?;

    if dry_run {
        let (containers, scripts) = survey(folder)?;
        println!(
            "Would convert {containers} container(s) and check {scripts} script(s) in {}",
            folder.display()
        );
        return Ok(());
    }

    let client = RateLimitClient::new().context("Failed to build HTTP client")?;
    client.set_observer(|info| println!("  API quota: {info}"));

    let fixer = Fixer::new(&client, &config.repositories, folder, &config.cache_dir);
    let report = fixer.run().await?;

    if !report.converted.is_empty() {
        println!("✓ Converted {} container(s)", report.converted.len());
    }
    for outcome in &report.outcomes {
        if outcome.is_unchanged() {
            println!("✓ {} already up to date", outcome.app_id);
        } else {
            println!(
                "✓ {} fixed: {} pin(s) rewritten, {} duplicate(s) dropped",
                outcome.app_id, outcome.rewritten, outcome.deduped
            );
        }
    }
    for (app_id, reason) in &report.failures {
        println!("✗ {app_id}: {reason}");
    }

    if report.outcomes.is_empty() && report.converted.is_empty() && report.failures.is_empty() {
        println!("No scripts or containers found in {}", folder.display());
    }
    Ok(())
}

fn survey(folder: &Path) -> Result<(usize, usize)> {
    let mut containers = 0;
    let mut scripts = 0;
    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();
        match path.extension().and_then(|e| e.to_str()) {
            Some("st") => containers += 1,
            Some("lua") => scripts += 1,
            _ => {}
        }
    }
    Ok((containers, scripts))
}
