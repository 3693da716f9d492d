use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use crate::error::{ModelError, SourceError};
use crate::models::{epoch_timestamp, parse_timestamp, BatchId, Category, Story};

/// Default public endpoint of the batch service.
pub const DEFAULT_BASE_URL: &str = "https://news.kagi.com";

/// Stories requested per category when the caller does not say otherwise.
pub const DEFAULT_STORY_LIMIT: usize = 12;

/// Hard bounds the service enforces on the per-category story limit.
pub const MIN_STORY_LIMIT: usize = 1;
pub const MAX_STORY_LIMIT: usize = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote source of batches, categories and stories.
///
/// The refresh coordinator only talks to this seam, so tests can substitute
/// a scripted source.
#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Resolve the id of the currently published batch.
    async fn resolve_latest_batch(&self) -> Result<BatchId, SourceError>;

    /// List the categories offered by the current batch.
    ///
    /// Records missing the stable key or remote id are dropped, not fatal.
    async fn list_categories(&self) -> Result<Vec<Category>, SourceError>;

    /// Fetch up to `limit` stories for one category of the current batch.
    ///
    /// `limit` is clamped to [1, 100]. Returns the batch id the server
    /// attributes to the stories; callers must cross-check it against the
    /// batch they resolved instead of trusting it.
    async fn fetch_stories(
        &self,
        remote_id: &str,
        limit: usize,
    ) -> Result<(Vec<Story>, BatchId), SourceError>;
}

/// HTTP client for the upstream batch service.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpSource {
    pub fn new() -> Self {
        let base_url = Url::parse(DEFAULT_BASE_URL).expect("default base url is valid");
        Self::with_base_url(base_url)
    }

    pub fn with_base_url(base_url: Url) -> Self {
        Self {
            client: Client::new(),
            base_url,
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, SourceError> {
        self.base_url
            .join(path)
            .map_err(|err| SourceError::Protocol(format!("invalid endpoint {path}: {err}")))
    }

    async fn get_json(&self, url: Url) -> Result<Value, SourceError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|err| SourceError::Protocol(format!("{url}: {err}")))
    }
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NewsSource for HttpSource {
    async fn resolve_latest_batch(&self) -> Result<BatchId, SourceError> {
        let url = self.endpoint("/api/batches/latest")?;
        let body = self.get_json(url).await?;
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SourceError::Protocol("latest batch response is missing `id`".into()))?;
        info!(batch = %id, "resolved latest batch");
        Ok(BatchId::new(id))
    }

    async fn list_categories(&self) -> Result<Vec<Category>, SourceError> {
        let url = self.endpoint("/api/batches/latest/categories")?;
        let body = self.get_json(url).await?;
        let records = body
            .get("categories")
            .and_then(Value::as_array)
            .ok_or_else(|| SourceError::Protocol("`categories` is missing or not a list".into()))?;

        let mut categories = Vec::with_capacity(records.len());
        for record in records {
            match parse_category_record(record) {
                Ok(category) => categories.push(category),
                Err(err) => warn!(error = %err, "dropping malformed category record"),
            }
        }
        info!(count = categories.len(), "fetched categories");
        Ok(categories)
    }

    async fn fetch_stories(
        &self,
        remote_id: &str,
        limit: usize,
    ) -> Result<(Vec<Story>, BatchId), SourceError> {
        let limit = limit.clamp(MIN_STORY_LIMIT, MAX_STORY_LIMIT);
        let mut url =
            self.endpoint(&format!("/api/batches/latest/categories/{remote_id}/stories"))?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        let body = self.get_json(url).await?;

        let batch_id = body
            .get("batchId")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let records = body
            .get("stories")
            .and_then(Value::as_array)
            .ok_or_else(|| SourceError::Protocol("`stories` is missing or not a list".into()))?;

        let mut stories = Vec::with_capacity(records.len());
        for record in records {
            match parse_story_record(record) {
                Ok(story) => stories.push(story),
                Err(err) => warn!(error = %err, "dropping malformed story record"),
            }
        }
        info!(
            count = stories.len(),
            category = remote_id,
            batch = batch_id,
            "fetched stories"
        );
        Ok((stories, BatchId::new(batch_id)))
    }
}

fn non_empty_str<'a>(record: &'a Value, field: &'static str) -> Result<&'a str, ModelError> {
    record
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or(ModelError::MissingField(field))
}

fn parse_category_record(record: &Value) -> Result<Category, ModelError> {
    let remote_id = non_empty_str(record, "id")?;
    let key = non_empty_str(record, "categoryId")?;
    let display_name = record
        .get("categoryName")
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(key);
    Ok(Category {
        remote_id: remote_id.to_owned(),
        key: key.to_owned(),
        display_name: display_name.to_owned(),
    })
}

/// Collapse one story cluster to its lead article.
fn parse_story_record(record: &Value) -> Result<Story, ModelError> {
    let articles = record
        .get("articles")
        .and_then(Value::as_array)
        .filter(|articles| !articles.is_empty())
        .ok_or(ModelError::NoArticles)?;
    let lead = &articles[0];

    let id = match record.get("id") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => match record.get("cluster_number") {
            Some(Value::Number(number)) => number.to_string(),
            Some(Value::String(number)) if !number.is_empty() => number.clone(),
            _ => "unknown".to_owned(),
        },
    };

    let title = non_empty_str(record, "title")?;
    let link = non_empty_str(lead, "link")?;
    let domain = non_empty_str(lead, "domain")?;

    let published_at = match lead.get("date") {
        Some(Value::String(date)) => {
            parse_timestamp(date).ok_or_else(|| ModelError::InvalidTimestamp(date.clone()))?
        }
        Some(Value::Number(date)) => date
            .as_f64()
            .and_then(epoch_timestamp)
            .ok_or_else(|| ModelError::InvalidTimestamp(date.to_string()))?,
        _ => return Err(ModelError::MissingField("date")),
    };

    let excerpt = record
        .get("short_summary")
        .and_then(Value::as_str)
        .filter(|summary| !summary.is_empty())
        .map(ToOwned::to_owned);

    Story::new(id, title, link, domain, published_at, excerpt)
}
