use std::fmt;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::cache::StoryCache;
use crate::error::{RefreshError, SourceError};
use crate::models::{BatchId, Category, Story};
use crate::source::{NewsSource, DEFAULT_STORY_LIMIT};

/// Progress of one refresh cycle, in order of transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    ResolvingBatch,
    ClassifyingCategories,
    FetchingMisses,
    Merging,
    Pruning,
    Done,
    Failed,
}

impl fmt::Display for RefreshPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RefreshPhase::Idle => "idle",
            RefreshPhase::ResolvingBatch => "resolving batch",
            RefreshPhase::ClassifyingCategories => "classifying categories",
            RefreshPhase::FetchingMisses => "fetching misses",
            RefreshPhase::Merging => "merging",
            RefreshPhase::Pruning => "pruning",
            RefreshPhase::Done => "done",
            RefreshPhase::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Per-category outcome of a refresh.
#[derive(Debug)]
pub enum RefreshResult {
    /// Served from the cache for the current batch.
    Hit(Vec<Story>),
    /// Fetched from the remote source this cycle.
    Fetched(Vec<Story>),
    /// The fetch for this category failed; siblings are unaffected.
    Failed(SourceError),
}

impl RefreshResult {
    /// Stories to show for the category; empty for a failed one.
    pub fn stories(&self) -> &[Story] {
        match self {
            RefreshResult::Hit(stories) | RefreshResult::Fetched(stories) => stories,
            RefreshResult::Failed(_) => &[],
        }
    }

    pub fn failure(&self) -> Option<&SourceError> {
        match self {
            RefreshResult::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, RefreshResult::Hit(_))
    }
}

/// One selected category paired with its outcome, in caller order.
#[derive(Debug)]
pub struct CategoryRefresh {
    pub category: Category,
    pub result: RefreshResult,
}

/// Final result of a refresh cycle.
#[derive(Debug)]
pub struct RefreshOutcome {
    pub batch_id: BatchId,
    pub categories: Vec<CategoryRefresh>,
}

impl RefreshOutcome {
    /// Ordered (category key, stories) view; failed categories are empty.
    pub fn stories_by_category(&self) -> Vec<(&str, &[Story])> {
        self.categories
            .iter()
            .map(|entry| (entry.category.key.as_str(), entry.result.stories()))
            .collect()
    }

    pub fn stories_for(&self, key: &str) -> Option<&[Story]> {
        self.categories
            .iter()
            .find(|entry| entry.category.key == key)
            .map(|entry| entry.result.stories())
    }

    /// Categories whose fetch failed this cycle, with the retained reason.
    pub fn failures(&self) -> Vec<(&str, &SourceError)> {
        self.categories
            .iter()
            .filter_map(|entry| {
                entry
                    .result
                    .failure()
                    .map(|err| (entry.category.key.as_str(), err))
            })
            .collect()
    }

    /// True when nothing was selected ("nothing configured yet").
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

type PhaseObserver = Box<dyn Fn(RefreshPhase) + Send + Sync>;

/// Orchestrates one refresh cycle: resolve the latest batch, classify each
/// selected category against the cache, fan out fetches for the misses,
/// write back, prune superseded entries.
///
/// Both collaborators are injected; the coordinator holds no process-wide
/// state.
pub struct RefreshCoordinator {
    source: Arc<dyn NewsSource>,
    cache: StoryCache,
    story_limit: usize,
    on_phase: Option<PhaseObserver>,
}

impl RefreshCoordinator {
    pub fn new(source: Arc<dyn NewsSource>, cache: StoryCache) -> Self {
        Self {
            source,
            cache,
            story_limit: DEFAULT_STORY_LIMIT,
            on_phase: None,
        }
    }

    /// Number of stories requested per fetched category.
    pub fn with_story_limit(mut self, limit: usize) -> Self {
        self.story_limit = limit;
        self
    }

    /// Observe phase transitions, e.g. to drive a loading indicator.
    pub fn with_phase_observer(
        mut self,
        observer: impl Fn(RefreshPhase) + Send + Sync + 'static,
    ) -> Self {
        self.on_phase = Some(Box::new(observer));
        self
    }

    fn enter(&self, phase: RefreshPhase) {
        debug!(%phase, "refresh phase");
        if let Some(observer) = &self.on_phase {
            observer(phase);
        }
    }

    /// Run one refresh cycle over `selected`, preserving the caller's order
    /// in the outcome.
    ///
    /// Only batch resolution can fail the whole cycle; every other problem
    /// degrades to a per-category result.
    pub async fn refresh(&self, selected: &[Category]) -> Result<RefreshOutcome, RefreshError> {
        self.enter(RefreshPhase::ResolvingBatch);
        let batch_id = match self.source.resolve_latest_batch().await {
            Ok(batch_id) => batch_id,
            Err(err) => {
                self.enter(RefreshPhase::Failed);
                return Err(RefreshError::BatchResolution(err));
            }
        };
        info!(batch = %batch_id, categories = selected.len(), "starting refresh");

        self.enter(RefreshPhase::ClassifyingCategories);
        let mut slots: Vec<Option<RefreshResult>> = Vec::with_capacity(selected.len());
        let mut misses: Vec<(usize, &Category)> = Vec::new();
        for (index, category) in selected.iter().enumerate() {
            match self.cache.lookup(&category.key, &batch_id).await {
                Some(entry) => slots.push(Some(RefreshResult::Hit(entry.stories))),
                None => {
                    slots.push(None);
                    misses.push((index, category));
                }
            }
        }

        self.enter(RefreshPhase::FetchingMisses);
        let fetches = misses.into_iter().map(|(index, category)| async move {
            let outcome = self
                .source
                .fetch_stories(&category.remote_id, self.story_limit)
                .await;
            (index, category, outcome)
        });
        let settled = join_all(fetches).await;

        self.enter(RefreshPhase::Merging);
        for (index, category, outcome) in settled {
            let result = match outcome {
                Ok((stories, reported_batch)) => {
                    if reported_batch != batch_id {
                        warn!(
                            category = %category.key,
                            resolved = %batch_id,
                            reported = %reported_batch,
                            "fetch reported a different batch id"
                        );
                    }
                    // Key the write-back on the batch resolved at the start
                    // of this cycle, not on whatever the fetch reported.
                    self.cache.store(&category.key, &batch_id, &stories).await;
                    RefreshResult::Fetched(stories)
                }
                Err(err) => {
                    warn!(category = %category.key, error = %err, "category fetch failed");
                    RefreshResult::Failed(err)
                }
            };
            slots[index] = Some(result);
        }

        self.enter(RefreshPhase::Pruning);
        self.cache.prune_except(&batch_id).await;

        let categories = selected
            .iter()
            .zip(slots)
            .map(|(category, slot)| CategoryRefresh {
                category: category.clone(),
                result: slot.expect("every selected category has a result"),
            })
            .collect();

        self.enter(RefreshPhase::Done);
        info!(batch = %batch_id, "refresh complete");
        Ok(RefreshOutcome {
            batch_id,
            categories,
        })
    }

    /// Resolve the caller's configured category keys against the current
    /// batch's category list, then refresh them in the configured order.
    ///
    /// Keys the batch no longer offers are skipped with a warning.
    pub async fn refresh_selected(
        &self,
        selected_keys: &[String],
    ) -> Result<RefreshOutcome, RefreshError> {
        let available = match self.source.list_categories().await {
            Ok(available) => available,
            Err(err) => {
                self.enter(RefreshPhase::Failed);
                return Err(RefreshError::CategoryListing(err));
            }
        };

        let mut selected = Vec::with_capacity(selected_keys.len());
        for key in selected_keys {
            match available.iter().find(|category| &category.key == key) {
                Some(category) => selected.push(category.clone()),
                None => {
                    warn!(category = %key, "configured category not present in the current batch")
                }
            }
        }
        self.refresh(&selected).await
    }
}
