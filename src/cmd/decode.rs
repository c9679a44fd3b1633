//! Decode command

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use hublock::io::cache;
use hublock::ops::decode::decode_container;

/// Decode `.st` containers into `.lua` scripts next to them. Directory
/// arguments are scanned for containers; each file is independent and a
/// failed decode does not stop the rest.
pub async fn decode(paths: &[PathBuf], dry_run: bool) -> Result<()> {
    let files = collect_containers(paths)?;
    if files.is_empty() {
        bail!("No .st containers found");
    }

    let mut failed = 0usize;
    for file in &files {
        match decode_one(file, dry_run).await {
            Ok(dest) => {
                if dry_run {
                    println!("Would decode {} -> {}", file.display(), dest.display());
                } else {
                    println!("✓ Decoded {} -> {}", file.display(), dest.display());
                }
            }
            Err(err) => {
                println!("✗ {}: {err:#}", file.display());
                failed += 1;
            }
        }
    }

    if failed == files.len() {
        bail!("No containers could be decoded");
    }
    Ok(())
}

async fn decode_one(file: &Path, dry_run: bool) -> Result<PathBuf> {
    let dest = file.with_extension("lua");
    if dry_run {
        return Ok(dest);
    }
    let content = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let text = decode_container(&content)?;
    cache::write_atomic(&dest, text.as_bytes()).await?;
    Ok(dest)
}

fn collect_containers(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in std::fs::read_dir(path)
                .with_context(|| format!("Failed to list {}", path.display()))?
            {
                let entry = entry?;
                let candidate = entry.path();
                if candidate.extension().map_or(false, |ext| ext == "st") {
                    files.push(candidate);
                }
            }
        } else {
            files.push(path.clone());
        }
    }
    files.sort();
    Ok(files)
}
