pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod refresh;
pub mod source;

pub use cache::{CacheEntry, StoryCache};
pub use config::AppConfig;
pub use error::{ConfigError, ModelError, RefreshError, SourceError};
pub use models::{BatchId, Category, Story};
pub use refresh::{CategoryRefresh, RefreshCoordinator, RefreshOutcome, RefreshPhase, RefreshResult};
pub use source::{HttpSource, NewsSource, DEFAULT_STORY_LIMIT};
