//! Selection and ordering steps applied after normalization.
//!
//! None of these functions edit a record; they only keep, drop or reorder.

use std::collections::HashMap;

use crate::metadata::VideoRecord;

pub const SECONDS_PER_DAY: i64 = 86_400;
pub const DEFAULT_WINDOW_DAYS: u32 = 7;

/// Whether `record` was published within the trailing `window_days` ending at
/// `now` (both in epoch seconds). The boundary itself counts as fresh; records
/// without a publish time never do.
pub fn is_fresh(record: &VideoRecord, window_days: u32, now: i64) -> bool {
    if !record.has_publish_time() {
        return false;
    }
    now.saturating_sub(record.published_at) <= i64::from(window_days) * SECONDS_PER_DAY
}

pub fn retain_fresh(records: Vec<VideoRecord>, window_days: u32, now: i64) -> Vec<VideoRecord> {
    records
        .into_iter()
        .filter(|record| is_fresh(record, window_days, now))
        .collect()
}

/// Keeps one record per id. When ids collide the later record replaces the
/// earlier one in place, so the result lists ids in order of first appearance
/// with the values of their last appearance.
pub fn dedupe(records: Vec<VideoRecord>) -> Vec<VideoRecord> {
    let mut slots: Vec<VideoRecord> = Vec::with_capacity(records.len());
    let mut index_by_id: HashMap<String, usize> = HashMap::with_capacity(records.len());

    for record in records {
        match index_by_id.get(&record.id) {
            Some(&slot) => slots[slot] = record,
            None => {
                index_by_id.insert(record.id.clone(), slots.len());
                slots.push(record);
            }
        }
    }

    slots
}

/// Orders by views, highest first. `sort_by` is stable, so equal view counts
/// keep their incoming relative order.
pub fn rank(mut records: Vec<VideoRecord>) -> Vec<VideoRecord> {
    records.sort_by(|a, b| b.views.cmp(&a.views));
    records
}
