//! The collection pipeline: query a provider, normalize what comes back, keep
//! fresh records, collapse duplicates and rank by views.
//!
//! A [`Pipeline`] only holds the provider handle and immutable settings, so any
//! number of collections can run side by side and any of them can be dropped
//! midway without affecting the others.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use rand_core::{OsRng, RngCore};
use tracing::{debug, info, instrument, warn};

use crate::{
    filters::{DEFAULT_WINDOW_DAYS, dedupe, rank, retain_fresh},
    metadata::{RawProviderRecord, VideoRecord},
    normalize::normalize,
    provider::{DEFAULT_PROVIDER_TIMEOUT, ProviderError, VideoProvider},
};

pub const DEFAULT_MAX_RESULTS: usize = 30;
pub const DEFAULT_QUERY_DELAY: DelayRange = DelayRange {
    min: Duration::from_millis(2000),
    max: Duration::from_millis(4000),
};

/// Longest pause `parse_millis` accepts, in milliseconds (ten minutes).
pub const MAX_QUERY_DELAY_MS: u64 = 600_000;

/// Bounds of the randomized pause between consecutive provider queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub const NONE: DelayRange = DelayRange {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    /// Parses `"<min>-<max>"` or a single `"<ms>"`, both in milliseconds and
    /// at most [`MAX_QUERY_DELAY_MS`].
    pub fn parse_millis(text: &str) -> Option<Self> {
        let (min, max) = match text.split_once('-') {
            Some((min, max)) => (min.trim().parse().ok()?, max.trim().parse().ok()?),
            None => {
                let fixed: u64 = text.trim().parse().ok()?;
                (fixed, fixed)
            }
        };
        (min <= max && max <= MAX_QUERY_DELAY_MS).then(|| Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        })
    }

    /// Picks a uniformly distributed delay, at millisecond granularity.
    pub fn sample(&self) -> Duration {
        let span = self.max.saturating_sub(self.min).as_millis();
        let span = u64::try_from(span).unwrap_or(u64::MAX);
        if span == 0 {
            return self.min;
        }
        let offset = match span.checked_add(1) {
            Some(buckets) => OsRng.next_u64() % buckets,
            None => OsRng.next_u64(),
        };
        self.min.saturating_add(Duration::from_millis(offset))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub window_days: u32,
    pub max_results: usize,
    pub provider_timeout: Duration,
    pub query_delay: DelayRange,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            max_results: DEFAULT_MAX_RESULTS,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            query_delay: DEFAULT_QUERY_DELAY,
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    provider: Arc<dyn VideoProvider>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(provider: Arc<dyn VideoProvider>, settings: PipelineSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Collects fresh, unique records for `query`, most viewed first. Never
    /// fails: provider trouble yields an empty list and a warning.
    pub async fn collect(&self, query: &str) -> Vec<VideoRecord> {
        self.collect_at(query, Utc::now().timestamp()).await
    }

    /// [`Pipeline::collect`] with an explicit clock, in epoch seconds.
    #[instrument(name = "collect", skip(self, now), fields(provider = self.provider.name()))]
    pub async fn collect_at(&self, query: &str, now: i64) -> Vec<VideoRecord> {
        let raw = self.query_provider(query).await;
        let records = normalize_batch(query, &raw);
        let ranked = refine(records, self.settings.window_days, now);
        debug!(returned = ranked.len(), "collection finished");
        ranked
    }

    /// Runs every term against the provider, pausing between queries, and
    /// ranks the union as one result set.
    pub async fn collect_many<S: AsRef<str>>(&self, terms: &[S]) -> Vec<VideoRecord> {
        self.collect_many_at(terms, Utc::now().timestamp()).await
    }

    #[instrument(name = "collect_many", skip_all, fields(terms = terms.len()))]
    pub async fn collect_many_at<S: AsRef<str>>(
        &self,
        terms: &[S],
        now: i64,
    ) -> Vec<VideoRecord> {
        let mut records = Vec::new();
        for (index, term) in terms.iter().enumerate() {
            let term = term.as_ref();
            if index > 0 {
                let pause = self.settings.query_delay.sample();
                if !pause.is_zero() {
                    debug!(?pause, "pausing before next query");
                    tokio::time::sleep(pause).await;
                }
            }

            let raw = self.query_provider(term).await;
            let normalized = normalize_batch(term, &raw);
            info!(query = term, collected = normalized.len(), "query finished");
            records.extend(normalized);
        }

        refine(records, self.settings.window_days, now)
    }

    /// One provider attempt, bounded by the configured timeout. Failures are
    /// logged and turned into zero results.
    async fn query_provider(&self, query: &str) -> Vec<RawProviderRecord> {
        let limit = self.settings.max_results;
        let timeout = self.settings.provider_timeout;
        let outcome = match tokio::time::timeout(timeout, self.provider.search(query, limit)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        };

        match outcome {
            Ok(mut raw) => {
                raw.truncate(limit);
                raw
            }
            Err(err) => {
                warn!(
                    query,
                    stage = "query",
                    provider = self.provider.name(),
                    error = %err,
                    "provider failed, continuing with zero results"
                );
                Vec::new()
            }
        }
    }
}

/// Filtering, deduplication and ranking, in that order.
pub fn refine(records: Vec<VideoRecord>, window_days: u32, now: i64) -> Vec<VideoRecord> {
    rank(dedupe(retain_fresh(records, window_days, now)))
}

fn normalize_batch(query: &str, raw: &[RawProviderRecord]) -> Vec<VideoRecord> {
    let records: Vec<VideoRecord> = raw.iter().filter_map(normalize).collect();
    let dropped = raw.len() - records.len();
    if dropped > 0 {
        debug!(query, stage = "normalize", dropped, "dropped unusable entries");
    }
    records
}
