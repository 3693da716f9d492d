use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use kgnews_core::{
    BatchId, Category, NewsSource, RefreshCoordinator, RefreshError, RefreshPhase, SourceError,
    Story, StoryCache,
};

fn temp_dir(prefix: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "kgnews_{}_{}",
        prefix,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    dir
}

fn story(id: &str, title: &str) -> Story {
    Story::new(
        id,
        title,
        format!("https://example.com/{id}"),
        "example.com",
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap(),
        None,
    )
    .unwrap()
}

fn category(key: &str) -> Category {
    Category {
        remote_id: format!("remote-{key}"),
        key: key.to_owned(),
        display_name: key.to_uppercase(),
    }
}

async fn snapshot_files(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return files,
    };
    while let Some(entry) = entries.next_entry().await.unwrap() {
        let bytes = tokio::fs::read(entry.path()).await.unwrap();
        files.insert(entry.file_name().to_string_lossy().into_owned(), bytes);
    }
    files
}

/// Scripted in-memory source for exercising the coordinator.
struct ScriptedSource {
    batch: Mutex<String>,
    categories: Vec<Category>,
    stories: HashMap<String, Vec<Story>>,
    failing: HashSet<String>,
    slow: HashSet<String>,
    reported_batch: Option<String>,
    fetch_calls: AtomicUsize,
}

impl ScriptedSource {
    fn new(batch: &str) -> Self {
        Self {
            batch: Mutex::new(batch.to_owned()),
            categories: Vec::new(),
            stories: HashMap::new(),
            failing: HashSet::new(),
            slow: HashSet::new(),
            reported_batch: None,
            fetch_calls: AtomicUsize::new(0),
        }
    }

    fn with_category(mut self, category: Category, stories: Vec<Story>) -> Self {
        self.stories.insert(category.remote_id.clone(), stories);
        self.categories.push(category);
        self
    }

    fn failing_for(mut self, remote_id: &str) -> Self {
        self.failing.insert(remote_id.to_owned());
        self
    }

    fn slow_for(mut self, remote_id: &str) -> Self {
        self.slow.insert(remote_id.to_owned());
        self
    }

    /// Make fetch responses claim this batch id instead of the current one.
    fn reporting_batch(mut self, batch: &str) -> Self {
        self.reported_batch = Some(batch.to_owned());
        self
    }

    fn set_batch(&self, batch: &str) {
        *self.batch.lock().unwrap() = batch.to_owned();
    }

    fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NewsSource for ScriptedSource {
    async fn resolve_latest_batch(&self) -> Result<BatchId, SourceError> {
        Ok(BatchId::from(self.batch.lock().unwrap().clone()))
    }

    async fn list_categories(&self) -> Result<Vec<Category>, SourceError> {
        Ok(self.categories.clone())
    }

    async fn fetch_stories(
        &self,
        remote_id: &str,
        _limit: usize,
    ) -> Result<(Vec<Story>, BatchId), SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.slow.contains(remote_id) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if self.failing.contains(remote_id) {
            return Err(SourceError::Protocol(format!(
                "scripted failure for {remote_id}"
            )));
        }
        let stories = self.stories.get(remote_id).cloned().unwrap_or_default();
        let batch = self
            .reported_batch
            .clone()
            .unwrap_or_else(|| self.batch.lock().unwrap().clone());
        Ok((stories, BatchId::from(batch)))
    }
}

/// Source whose batch endpoint is unreachable.
struct DownSource;

#[async_trait]
impl NewsSource for DownSource {
    async fn resolve_latest_batch(&self) -> Result<BatchId, SourceError> {
        Err(SourceError::Protocol("batch endpoint unreachable".into()))
    }

    async fn list_categories(&self) -> Result<Vec<Category>, SourceError> {
        Err(SourceError::Protocol("batch endpoint unreachable".into()))
    }

    async fn fetch_stories(
        &self,
        _remote_id: &str,
        _limit: usize,
    ) -> Result<(Vec<Story>, BatchId), SourceError> {
        unreachable!("fetch must not be attempted when batch resolution fails")
    }
}

#[tokio::test]
async fn second_refresh_with_unchanged_batch_performs_no_fetches() {
    let dir = temp_dir("refresh_no_refetch");
    let tech = category("tech");
    let science = category("science");
    let source = Arc::new(
        ScriptedSource::new("b1")
            .with_category(tech.clone(), vec![story("1", "One")])
            .with_category(science.clone(), vec![story("2", "Two")]),
    );
    let coordinator = RefreshCoordinator::new(source.clone(), StoryCache::new(&dir));
    let selected = vec![tech, science];

    let first = coordinator.refresh(&selected).await.unwrap();
    assert_eq!(source.fetch_count(), 2);
    assert!(first.failures().is_empty());

    let before = snapshot_files(&dir).await;

    let second = coordinator.refresh(&selected).await.unwrap();
    assert_eq!(
        source.fetch_count(),
        2,
        "second refresh must be served from cache"
    );
    assert!(second.categories.iter().all(|entry| entry.result.is_hit()));
    assert_eq!(
        snapshot_files(&dir).await,
        before,
        "cache contents must be byte-for-byte unchanged"
    );

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn failed_category_does_not_affect_siblings() {
    let dir = temp_dir("refresh_partial");
    let a = category("alpha");
    let b = category("beta");
    let c = category("gamma");
    let source = Arc::new(
        ScriptedSource::new("b1")
            .with_category(a.clone(), vec![story("1", "A story")])
            .with_category(b.clone(), vec![story("2", "B story")])
            .with_category(c.clone(), vec![story("3", "C story")])
            .failing_for("remote-beta"),
    );
    let coordinator = RefreshCoordinator::new(source, StoryCache::new(&dir));

    let outcome = coordinator.refresh(&[a, b, c]).await.unwrap();

    assert_eq!(outcome.stories_for("alpha").unwrap().len(), 1);
    assert_eq!(outcome.stories_for("alpha").unwrap()[0].title, "A story");
    assert_eq!(outcome.stories_for("gamma").unwrap().len(), 1);
    assert_eq!(outcome.stories_for("gamma").unwrap()[0].title, "C story");

    assert!(outcome.stories_for("beta").unwrap().is_empty());
    let failures = outcome.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "beta");

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn batch_rollover_refetches_and_prunes() {
    let dir = temp_dir("refresh_rollover");
    let tech = category("tech");
    let science = category("science");
    let source = Arc::new(
        ScriptedSource::new("b1")
            .with_category(tech.clone(), vec![story("1", "One")])
            .with_category(science.clone(), vec![story("2", "Two")]),
    );
    let cache = StoryCache::new(&dir);
    let coordinator = RefreshCoordinator::new(source.clone(), cache.clone());
    let selected = vec![tech, science];

    coordinator.refresh(&selected).await.unwrap();
    assert_eq!(source.fetch_count(), 2);

    source.set_batch("b2");
    let outcome = coordinator.refresh(&selected).await.unwrap();
    assert_eq!(outcome.batch_id, BatchId::from("b2"));
    assert_eq!(
        source.fetch_count(),
        4,
        "both categories are stale under the new batch"
    );

    let files: Vec<String> = snapshot_files(&dir).await.into_keys().collect();
    assert_eq!(files, vec!["science_b2.json", "tech_b2.json"]);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn caller_order_is_preserved_despite_fetch_latency() {
    let dir = temp_dir("refresh_order");
    let tech = category("tech");
    let science = category("science");
    let source = Arc::new(
        ScriptedSource::new("b2")
            .with_category(tech.clone(), vec![story("1", "Cached")])
            .with_category(science.clone(), vec![story("2", "Fetched")])
            .slow_for("remote-science"),
    );
    let cache = StoryCache::new(&dir);
    cache
        .store("tech", &BatchId::from("b2"), &[story("1", "Cached")])
        .await;

    let coordinator = RefreshCoordinator::new(source.clone(), cache);
    let outcome = coordinator.refresh(&[tech, science]).await.unwrap();

    assert_eq!(source.fetch_count(), 1, "only science was stale");
    let keys: Vec<&str> = outcome
        .stories_by_category()
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    assert_eq!(keys, vec!["tech", "science"]);
    assert!(outcome.categories[0].result.is_hit());
    assert!(!outcome.categories[1].result.is_hit());

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn write_back_uses_the_resolved_batch_id_not_the_reported_one() {
    let dir = temp_dir("refresh_batch_race");
    let tech = category("tech");
    let source = Arc::new(
        ScriptedSource::new("b2")
            .with_category(tech.clone(), vec![story("1", "One")])
            .reporting_batch("b1"),
    );
    let cache = StoryCache::new(&dir);
    let coordinator = RefreshCoordinator::new(source, cache.clone());

    coordinator.refresh(&[tech]).await.unwrap();

    assert!(
        cache.lookup("tech", &BatchId::from("b2")).await.is_some(),
        "entry must be keyed by the coordinator's batch"
    );
    assert!(cache.lookup("tech", &BatchId::from("b1")).await.is_none());

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn empty_selection_yields_an_empty_outcome() {
    let dir = temp_dir("refresh_empty");
    let source = Arc::new(ScriptedSource::new("b1"));
    let coordinator = RefreshCoordinator::new(source.clone(), StoryCache::new(&dir));

    let outcome = coordinator.refresh(&[]).await.unwrap();
    assert!(outcome.is_empty());
    assert_eq!(source.fetch_count(), 0);
}

#[tokio::test]
async fn batch_resolution_failure_fails_the_whole_cycle() {
    let dir = temp_dir("refresh_down");
    let coordinator = RefreshCoordinator::new(Arc::new(DownSource), StoryCache::new(&dir));

    let err = coordinator
        .refresh(&[category("tech")])
        .await
        .expect_err("refresh must fail");
    assert!(matches!(err, RefreshError::BatchResolution(_)));
}

#[tokio::test]
async fn refresh_selected_matches_configured_keys_in_order() {
    let dir = temp_dir("refresh_selected");
    let science = category("science");
    let tech = category("tech");
    // Source advertises [science, tech]; the user configured [tech, science]
    // plus a key the batch no longer offers.
    let source = Arc::new(
        ScriptedSource::new("b1")
            .with_category(science, vec![story("1", "S")])
            .with_category(tech, vec![story("2", "T")]),
    );
    let coordinator = RefreshCoordinator::new(source, StoryCache::new(&dir));

    let keys = vec![
        "tech".to_owned(),
        "science".to_owned(),
        "vanished".to_owned(),
    ];
    let outcome = coordinator.refresh_selected(&keys).await.unwrap();

    let ordered: Vec<&str> = outcome
        .stories_by_category()
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    assert_eq!(ordered, vec!["tech", "science"]);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn phase_observer_sees_the_full_cycle() {
    let dir = temp_dir("refresh_phases");
    let tech = category("tech");
    let source = Arc::new(ScriptedSource::new("b1").with_category(tech.clone(), Vec::new()));
    let phases = Arc::new(Mutex::new(Vec::new()));
    let seen = phases.clone();
    let coordinator = RefreshCoordinator::new(source, StoryCache::new(&dir))
        .with_phase_observer(move |phase| seen.lock().unwrap().push(phase));

    coordinator.refresh(&[tech]).await.unwrap();

    assert_eq!(
        *phases.lock().unwrap(),
        vec![
            RefreshPhase::ResolvingBatch,
            RefreshPhase::ClassifyingCategories,
            RefreshPhase::FetchingMisses,
            RefreshPhase::Merging,
            RefreshPhase::Pruning,
            RefreshPhase::Done,
        ]
    );

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn empty_fetch_results_are_cached_and_not_refetched() {
    let dir = temp_dir("refresh_empty_category");
    let tech = category("tech");
    let source = Arc::new(ScriptedSource::new("b1").with_category(tech.clone(), Vec::new()));
    let coordinator = RefreshCoordinator::new(source.clone(), StoryCache::new(&dir));
    let selected = vec![tech];

    let first = coordinator.refresh(&selected).await.unwrap();
    assert!(first.failures().is_empty());
    assert!(first.stories_for("tech").unwrap().is_empty());
    assert_eq!(source.fetch_count(), 1);

    let second = coordinator.refresh(&selected).await.unwrap();
    assert!(second.categories[0].result.is_hit());
    assert_eq!(source.fetch_count(), 1);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}
