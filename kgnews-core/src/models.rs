use std::fmt;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Opaque identifier of one upstream publication cycle.
///
/// Only equality is meaningful; batch ids carry no ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BatchId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for BatchId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One news category as published in the current batch.
///
/// `key` is the stable identifier (e.g. "tech") used for caching and
/// selection. `remote_id` only addresses the category inside the current
/// batch and must never be used as a cache key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Category {
    pub remote_id: String,
    pub key: String,
    pub display_name: String,
}

/// A single story cluster collapsed to its lead article.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Story {
    pub id: String,
    pub title: String,
    pub url: String,
    pub source: String,
    pub published_at: DateTime<Utc>,
    pub excerpt: Option<String>,
}

impl Story {
    /// Build a validated story. Fails if any required field is empty.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        source: impl Into<String>,
        published_at: DateTime<Utc>,
        excerpt: Option<String>,
    ) -> Result<Self, ModelError> {
        let story = Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
            source: source.into(),
            published_at,
            excerpt,
        };
        story.validate()?;
        Ok(story)
    }

    /// Re-check the construction invariants, e.g. on a record read back
    /// from disk.
    pub fn validate(&self) -> Result<(), ModelError> {
        let required = [
            ("id", &self.id),
            ("title", &self.title),
            ("url", &self.url),
            ("source", &self.source),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ModelError::EmptyField(field));
            }
        }
        Ok(())
    }

    /// One-line list row: "title | source | age".
    pub fn format_display(&self) -> String {
        const MAX_TITLE: usize = 80;
        let title = if self.title.chars().count() > MAX_TITLE {
            let truncated: String = self.title.chars().take(MAX_TITLE - 3).collect();
            format!("{truncated}...")
        } else {
            self.title.clone()
        };
        format!(
            "{} | {} | {}",
            title,
            self.source,
            relative_age(self.published_at, Utc::now())
        )
    }
}

fn relative_age(published: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now.signed_duration_since(published);
    if diff < Duration::zero() {
        return published.format("%Y-%m-%d").to_string();
    }
    match diff.num_days() {
        0 => match (diff.num_hours(), diff.num_minutes()) {
            (0, 0) => "just now".to_string(),
            (0, minutes) => format!("{minutes}m ago"),
            (hours, _) => format!("{hours}h ago"),
        },
        1 => "yesterday".to_string(),
        days if days < 7 => format!("{days}d ago"),
        _ => published.format("%Y-%m-%d").to_string(),
    }
}

/// Parse an upstream timestamp: RFC 3339, with a bare-epoch fallback seen
/// in older records.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    raw.trim().parse::<f64>().ok().and_then(epoch_timestamp)
}

pub(crate) fn epoch_timestamp(secs: f64) -> Option<DateTime<Utc>> {
    let nanos = (secs.fract().abs() * 1e9) as u32;
    Utc.timestamp_opt(secs.trunc() as i64, nanos).single()
}
