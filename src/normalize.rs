//! Turns raw provider entries into [`VideoRecord`]s.
//!
//! Providers disagree on field names (`id` vs `video_id`, `stats` vs
//! `statistics`, `playCount` vs `play_count`, ...) and on units (epoch seconds
//! vs milliseconds). Each canonical field is resolved through a fixed list of
//! candidate names tried in order; the first candidate holding a usable value
//! wins. Anything that cannot be coerced makes the whole entry unusable, which
//! callers treat as "skip this entry" rather than as a failure.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::metadata::{RawProviderRecord, VideoRecord, display_date};

/// Epoch values above this are milliseconds, not seconds.
pub const MILLISECOND_EPOCH_THRESHOLD: u64 = 10_000_000_000;
pub const VIDEO_URL_BASE: &str = "https://www.tiktok.com";
pub const UNKNOWN_AUTHOR: &str = "unknown";

const ID_FIELDS: &[&str] = &["id", "video_id"];
const STATS_FIELDS: &[&str] = &["stats", "statistics"];
const AUTHOR_FIELDS: &[&str] = &["author", "user"];
const HANDLE_FIELDS: &[&str] = &["uniqueId", "unique_id", "username"];
const DESCRIPTION_FIELDS: &[&str] = &["desc", "description", "text"];
const VIEW_FIELDS: &[&str] = &["playCount", "play_count", "view_count", "views"];
const LIKE_FIELDS: &[&str] = &["diggCount", "digg_count", "like_count", "likes"];
const PUBLISHED_FIELDS: &[&str] = &["createTime", "create_time", "timestamp"];

static HASHTAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\w+").expect("hashtag pattern compiles"));

/// Why a raw entry was dropped. Only ever logged, never returned to callers
/// of [`normalize`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnusableRecord {
    #[error("entry is not a JSON object")]
    NotAnObject,
    #[error("entry has no usable id")]
    MissingId,
    #[error("`{0}` is not a non-negative number")]
    BadNumber(&'static str),
}

/// Normalizes one provider entry, returning `None` when it cannot be used.
pub fn normalize(raw: &RawProviderRecord) -> Option<VideoRecord> {
    match try_normalize(raw) {
        Ok(record) => Some(record),
        Err(reason) => {
            debug!(%reason, "skipping unusable provider entry");
            None
        }
    }
}

/// Same as [`normalize`] but keeps the reason an entry was rejected.
pub fn try_normalize(raw: &RawProviderRecord) -> Result<VideoRecord, UnusableRecord> {
    let entry = raw.as_object().ok_or(UnusableRecord::NotAnObject)?;

    let id = first_text(entry, ID_FIELDS)
        .map(|id| id.trim().to_owned())
        .ok_or(UnusableRecord::MissingId)?;

    // Missing or oddly shaped sub-structures behave like empty ones.
    let empty = Map::new();
    let stats = first_object(entry, STATS_FIELDS).unwrap_or(&empty);
    let author_info = first_object(entry, AUTHOR_FIELDS).unwrap_or(&empty);

    let author = first_text(author_info, HANDLE_FIELDS)
        .map(|handle| handle.trim().to_owned())
        .unwrap_or_else(|| UNKNOWN_AUTHOR.to_owned());
    let description = first_text(entry, DESCRIPTION_FIELDS).unwrap_or_default();

    let views = count_field(stats, VIEW_FIELDS)?;
    let likes = count_field(stats, LIKE_FIELDS)?;
    let published_at = match first_present(entry, PUBLISHED_FIELDS) {
        Some((field, value)) => epoch_seconds(coerce_count(field, value)?, field)?,
        None => 0,
    };

    Ok(VideoRecord {
        url: video_url(&author, &id),
        hashtags: extract_hashtags(&description),
        published_display: display_date(published_at),
        id,
        description,
        views,
        likes,
        published_at,
        author,
    })
}

/// Finds `#word` tokens in first-occurrence order. Repeats are kept and
/// trailing punctuation is not part of a tag.
pub fn extract_hashtags(text: &str) -> Vec<String> {
    HASHTAG_PATTERN
        .find_iter(text)
        .map(|found| found.as_str().to_owned())
        .collect()
}

pub fn video_url(author: &str, id: &str) -> String {
    format!("{VIDEO_URL_BASE}/@{author}/video/{id}")
}

/// First candidate field with a value worth looking at: nulls and blank
/// strings fall through to the next candidate.
fn first_present<'a>(
    object: &'a Map<String, Value>,
    candidates: &[&'static str],
) -> Option<(&'static str, &'a Value)> {
    candidates.iter().find_map(|&name| match object.get(name) {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) if text.trim().is_empty() => None,
        Some(value) => Some((name, value)),
    })
}

/// First candidate that renders as non-blank text, untrimmed. Objects, arrays
/// and bools are skipped like missing fields.
fn first_text(object: &Map<String, Value>, candidates: &[&'static str]) -> Option<String> {
    candidates.iter().find_map(|&name| {
        object
            .get(name)
            .and_then(scalar_to_string)
            .filter(|text| !text.trim().is_empty())
    })
}

fn first_object<'a>(
    object: &'a Map<String, Value>,
    candidates: &[&'static str],
) -> Option<&'a Map<String, Value>> {
    candidates
        .iter()
        .find_map(|&name| object.get(name).and_then(Value::as_object))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn count_field(
    object: &Map<String, Value>,
    candidates: &[&'static str],
) -> Result<u64, UnusableRecord> {
    match first_present(object, candidates) {
        Some((field, value)) => coerce_count(field, value),
        None => Ok(0),
    }
}

/// Accepts integers, integral-looking floats and numeric strings.
fn coerce_count(field: &'static str, value: &Value) -> Result<u64, UnusableRecord> {
    let bad = || UnusableRecord::BadNumber(field);
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().and_then(float_to_count))
            .ok_or_else(bad),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<u64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().and_then(float_to_count))
                .ok_or_else(bad)
        }
        _ => Err(bad()),
    }
}

fn float_to_count(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0 && value < u64::MAX as f64).then(|| value.trunc() as u64)
}

fn epoch_seconds(raw: u64, field: &'static str) -> Result<i64, UnusableRecord> {
    let seconds = if raw > MILLISECOND_EPOCH_THRESHOLD {
        raw / 1000
    } else {
        raw
    };
    i64::try_from(seconds).map_err(|_| UnusableRecord::BadNumber(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_camel_case_shape() {
        let raw = json!({
            "id": "7301",
            "desc": "Check #MakeUp now #tip!",
            "createTime": 1_700_000_000,
            "stats": { "playCount": 5400, "diggCount": 310 },
            "author": { "uniqueId": "lashlab" }
        });

        let record = normalize(&raw).unwrap();
        assert_eq!(record.id, "7301");
        assert_eq!(record.url, "https://www.tiktok.com/@lashlab/video/7301");
        assert_eq!(record.views, 5400);
        assert_eq!(record.likes, 310);
        assert_eq!(record.published_at, 1_700_000_000);
        assert_eq!(record.published_display, "2023-11-14 22:13:20");
        assert_eq!(record.hashtags, vec!["#MakeUp", "#tip"]);
        assert_eq!(record.author, "lashlab");
    }

    #[test]
    fn normalizes_snake_case_shape() {
        let raw = json!({
            "video_id": 99,
            "description": "plain text",
            "create_time": "1700000000",
            "statistics": { "play_count": "12", "like_count": 3.0 },
            "user": { "username": "someone" }
        });

        let record = normalize(&raw).unwrap();
        assert_eq!(record.id, "99");
        assert_eq!(record.views, 12);
        assert_eq!(record.likes, 3);
        assert_eq!(record.published_at, 1_700_000_000);
        assert!(record.hashtags.is_empty());
        assert_eq!(record.author, "someone");
    }

    #[test]
    fn millisecond_timestamps_become_seconds() {
        let raw = json!({ "id": "a", "timestamp": 1_700_000_000_000u64 });
        assert_eq!(normalize(&raw).unwrap().published_at, 1_700_000_000);

        let at_threshold = json!({ "id": "a", "timestamp": MILLISECOND_EPOCH_THRESHOLD });
        assert_eq!(
            normalize(&at_threshold).unwrap().published_at,
            MILLISECOND_EPOCH_THRESHOLD as i64
        );
    }

    #[test]
    fn missing_id_is_unusable() {
        assert_eq!(
            try_normalize(&json!({ "desc": "no id" })),
            Err(UnusableRecord::MissingId)
        );
        assert_eq!(
            try_normalize(&json!({ "id": "  ", "video_id": "" })),
            Err(UnusableRecord::MissingId)
        );
        assert_eq!(try_normalize(&json!(["id"])), Err(UnusableRecord::NotAnObject));
    }

    #[test]
    fn later_id_candidate_used_when_first_is_blank() {
        let raw = json!({ "id": "", "video_id": "v-2" });
        assert_eq!(normalize(&raw).unwrap().id, "v-2");
    }

    #[test]
    fn non_scalar_candidates_do_not_hide_later_ones() {
        let record = try_normalize(&json!({
            "id": { "inner": 1 },
            "video_id": "v-2",
            "author": { "uniqueId": {}, "unique_id": "lashlab" }
        }))
        .unwrap();
        assert_eq!(record.id, "v-2");
        assert_eq!(record.author, "lashlab");

        assert_eq!(
            try_normalize(&json!({ "id": [1], "video_id": true })),
            Err(UnusableRecord::MissingId)
        );
    }

    #[test]
    fn numeric_description_is_kept_as_text() {
        let record = normalize(&json!({ "id": "x", "desc": 2024 })).unwrap();
        assert_eq!(record.description, "2024");

        let raw = json!({ "id": "x", "desc": [], "text": " spaced #tag " });
        let record = normalize(&raw).unwrap();
        assert_eq!(record.description, " spaced #tag ");
        assert_eq!(record.hashtags, vec!["#tag"]);
    }

    #[test]
    fn odd_substructures_fall_back_to_defaults() {
        let raw = json!({ "id": "x", "stats": "n/a", "author": 42 });
        let record = normalize(&raw).unwrap();
        assert_eq!(record.views, 0);
        assert_eq!(record.likes, 0);
        assert_eq!(record.author, UNKNOWN_AUTHOR);
        assert_eq!(record.url, "https://www.tiktok.com/@unknown/video/x");
        assert_eq!(record.published_at, 0);
        assert_eq!(record.published_display, "");
    }

    #[test]
    fn non_numeric_stats_make_entry_unusable() {
        let raw = json!({ "id": "x", "stats": { "playCount": "1.2M" } });
        assert_eq!(try_normalize(&raw), Err(UnusableRecord::BadNumber("playCount")));

        let negative = json!({ "id": "x", "stats": { "diggCount": -4 } });
        assert_eq!(
            try_normalize(&negative),
            Err(UnusableRecord::BadNumber("diggCount"))
        );
        assert!(normalize(&negative).is_none());
    }

    #[test]
    fn null_stats_default_to_zero() {
        let raw = json!({ "id": "x", "stats": { "playCount": null, "views": 7 } });
        assert_eq!(normalize(&raw).unwrap().views, 7);
    }

    #[test]
    fn hashtags_keep_order_and_repeats() {
        assert_eq!(
            extract_hashtags("#тушь и #ресницы, снова #тушь. # alone #a_1-b"),
            vec!["#тушь", "#ресницы", "#тушь", "#a_1"]
        );
        assert!(extract_hashtags("").is_empty());
    }
}
