//! Canonical video metadata shared by the pipeline, the exporters and the API.
//!
//! Providers hand us whatever JSON their upstream produces; the normalizer turns
//! each entry into a [`VideoRecord`]. Once built, a record is never edited again:
//! the filters and the ranker only pick and reorder existing records, which keeps
//! a pipeline run easy to reason about and trivially reproducible.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One unmodified entry returned by a video provider. Its shape depends on the
/// provider (and on the provider's version), so the pipeline treats it as
/// read-only JSON and never relies on a fixed schema.
pub type RawProviderRecord = serde_json::Value;

/// Format used for `date` in every export.
pub const DISPLAY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Normalized short-video entry.
///
/// The JSON field names match what API consumers already expect (`date`,
/// `timestamp`), while the Rust names say what the values mean.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub likes: u64,
    /// Publish time in epoch seconds, `0` when the provider did not say.
    #[serde(rename = "timestamp", default)]
    pub published_at: i64,
    /// Human readable form of `published_at`, empty when unknown.
    #[serde(rename = "date", default)]
    pub published_display: String,
    /// `#tag` tokens from the description in first-occurrence order.
    #[serde(default)]
    pub hashtags: Vec<String>,
    pub author: String,
}

impl VideoRecord {
    /// Whether the provider reported a publish time at all.
    pub fn has_publish_time(&self) -> bool {
        self.published_at != 0
    }

    /// Hashtags as a single cell, the way the CSV exports carry them.
    pub fn hashtags_joined(&self) -> String {
        self.hashtags.join(", ")
    }
}

/// Renders epoch seconds for display, or an empty string for the "unknown"
/// marker and for values chrono cannot represent.
pub fn display_date(epoch_seconds: i64) -> String {
    if epoch_seconds == 0 {
        return String::new();
    }
    DateTime::<Utc>::from_timestamp(epoch_seconds, 0)
        .map(|datetime| datetime.format(DISPLAY_DATE_FORMAT).to_string())
        .unwrap_or_default()
}
