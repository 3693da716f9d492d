use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::models::{BatchId, Story};

/// File-backed store of fetched stories, keyed by (category key, batch id).
///
/// One JSON file per key pair, named `{category}_{batch}.json`. Anything
/// that cannot be read back cleanly behaves as a miss, never an error.
///
/// The directory is assumed to be owned by a single process. Two processes
/// sharing it can interleave a prune with the other's in-flight write and
/// lose an entry; that is out of contract.
#[derive(Debug, Clone)]
pub struct StoryCache {
    dir: PathBuf,
}

/// One persisted (category, batch) record.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub category_id: String,
    pub batch_id: BatchId,
    pub stories: Vec<Story>,
    pub written_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct CacheFileOut<'a> {
    batch_id: &'a str,
    category_id: &'a str,
    written_at: DateTime<Utc>,
    stories: &'a [Story],
}

// Stories are held as raw values so one bad record can be skipped without
// rejecting the rest of the entry.
#[derive(Deserialize)]
struct CacheFileIn {
    batch_id: String,
    category_id: String,
    #[serde(default)]
    written_at: Option<DateTime<Utc>>,
    stories: Vec<Value>,
}

impl StoryCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Default cache location under the system temp directory.
    pub fn default_dir() -> PathBuf {
        std::env::temp_dir().join("kgnews_cache")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, category_key: &str, batch_id: &BatchId) -> PathBuf {
        self.dir.join(format!("{category_key}_{batch_id}.json"))
    }

    /// Look up the entry for one (category, batch) pair.
    ///
    /// Returns `None` for a missing file, unreadable JSON, a shape without a
    /// `stories` array, or an entry whose recorded key contradicts its file
    /// name. Individual story records failing validation are skipped; the
    /// remainder still hits.
    pub async fn lookup(&self, category_key: &str, batch_id: &BatchId) -> Option<CacheEntry> {
        let path = self.entry_path(category_key, batch_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(_) => {
                debug!(category = category_key, batch = %batch_id, "no cache entry");
                return None;
            }
        };

        let file: CacheFileIn = match serde_json::from_slice(&bytes) {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "unreadable cache entry, treating as miss");
                return None;
            }
        };

        if file.batch_id != batch_id.as_str() || file.category_id != category_key {
            warn!(path = %path.display(), "cache entry contradicts its file name, treating as miss");
            return None;
        }

        let mut stories = Vec::with_capacity(file.stories.len());
        for record in file.stories {
            match serde_json::from_value::<Story>(record) {
                Ok(story) => match story.validate() {
                    Ok(()) => stories.push(story),
                    Err(err) => warn!(error = %err, "skipping invalid cached story"),
                },
                Err(err) => warn!(error = %err, "skipping unreadable cached story"),
            }
        }

        debug!(category = category_key, batch = %batch_id, count = stories.len(), "cache hit");
        Some(CacheEntry {
            category_id: file.category_id,
            batch_id: batch_id.clone(),
            stories,
            written_at: file.written_at,
        })
    }

    /// Persist stories for one (category, batch) pair, replacing any
    /// previous entry for that exact key.
    ///
    /// Persistence is best-effort: failures are logged and swallowed so the
    /// in-memory refresh result is unaffected.
    pub async fn store(&self, category_key: &str, batch_id: &BatchId, stories: &[Story]) {
        let out = CacheFileOut {
            batch_id: batch_id.as_str(),
            category_id: category_key,
            written_at: Utc::now(),
            stories,
        };
        let bytes = match serde_json::to_vec_pretty(&out) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to serialize cache entry");
                return;
            }
        };

        if let Err(err) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(error = %err, dir = %self.dir.display(), "failed to create cache dir");
            return;
        }

        let path = self.entry_path(category_key, batch_id);
        let tmp = path.with_extension("json.tmp");
        if let Err(err) = tokio::fs::write(&tmp, &bytes).await {
            warn!(error = %err, path = %tmp.display(), "failed to write cache entry");
            return;
        }
        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            warn!(error = %err, path = %path.display(), "failed to persist cache entry");
            return;
        }
        info!(category = category_key, batch = %batch_id, count = stories.len(), "cached stories");
    }

    /// Delete every entry not tagged with `current`, returning the number
    /// removed.
    ///
    /// Idempotent. Entries for `current` are never touched, so a prune can
    /// run alongside write-backs for the same batch without racing them.
    pub async fn prune_except(&self, current: &BatchId) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let keep_suffix = format!("_{current}");
        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, dir = %self.dir.display(), "failed to scan cache dir");
                    break;
                }
            };
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let stem = match path.file_stem().and_then(|stem| stem.to_str()) {
                Some(stem) => stem,
                None => continue,
            };
            if stem.ends_with(&keep_suffix) {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "failed to remove stale cache entry")
                }
            }
        }

        if removed > 0 {
            info!(count = removed, batch = %current, "pruned stale cache entries");
        }
        removed
    }
}
