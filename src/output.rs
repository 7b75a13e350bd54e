use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::feed::parser::Article;

/// Conditional-request state cached for one feed across runs.
///
/// The entry carries its own article list (not a reference into the shared
/// aggregate list) so a 304 on the next run can reuse it self-contained.
/// An entry only exists for feeds whose most recent fetch succeeded — an
/// erroring feed forfeits its entry and refetches from scratch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub articles: Vec<Article>,
}

/// The aggregate document written at the end of each run. Fully replaces any
/// previous output; the only state carried between runs is `feed_cache`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateOutput {
    pub last_updated: DateTime<Utc>,
    pub articles: Vec<Article>,
    pub errors: BTreeMap<String, String>,
    pub feed_cache: BTreeMap<String, CacheEntry>,
}

/// The slice of a prior run's output we care about on startup. Everything
/// else in the document is rebuilt from scratch anyway.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriorOutput {
    #[serde(default)]
    feed_cache: BTreeMap<String, CacheEntry>,
}

/// Reads the cache map out of a previous run's output document.
///
/// A missing file, unreadable file, or undecodable document is a cold start,
/// not an error — the run proceeds with an empty cache and fetches everything
/// unconditionally.
pub fn load_prior_cache(path: &Path) -> BTreeMap<String, CacheEntry> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No previous output, starting cold");
            return BTreeMap::new();
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to read previous output, starting cold"
            );
            return BTreeMap::new();
        }
    };

    match serde_json::from_str::<PriorOutput>(&raw) {
        Ok(prior) => prior.feed_cache,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Previous output is not valid JSON, starting cold"
            );
            BTreeMap::new()
        }
    }
}

/// Writes the output document atomically: temp file in the destination
/// directory, sync to disk, then rename over the old document. The
/// destination is never left in a partial state.
pub fn write(output: &AggregateOutput, path: &Path) -> Result<()> {
    let json =
        serde_json::to_string_pretty(output).context("Failed to serialize output document")?;

    // Randomized temp filename so a concurrent writer can't collide with us
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .with_context(|| {
            format!(
                "Failed to create temporary file '{}': check directory permissions",
                temp_path.display()
            )
        })?;

    file.write_all(json.as_bytes()).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!(
            "Failed to write to temporary file '{}': disk may be full",
            temp_path.display()
        )
    })?;

    file.sync_all().with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!(
            "Failed to sync temporary file '{}' to disk",
            temp_path.display()
        )
    })?;

    drop(file);

    std::fs::rename(&temp_path, path).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!(
            "Failed to rename '{}' to '{}'",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}
