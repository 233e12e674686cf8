#![forbid(unsafe_code)]

//! Short-video metadata collection.
//!
//! A provider answers a search query with raw entries; the pipeline normalizes
//! them into [`metadata::VideoRecord`]s, keeps the recent ones, drops duplicate
//! ids and ranks by views. The `backend` binary exposes this over HTTP and the
//! `collect` binary runs it in batch over a list of search terms.

pub mod config;
pub mod export;
pub mod filters;
pub mod logging;
pub mod metadata;
pub mod normalize;
pub mod pipeline;
pub mod provider;
