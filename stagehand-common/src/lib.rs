//! # Stagehand Common Library
//!
//! Shared code for the Stagehand reconciliation engine:
//! - Error and result types
//! - Configuration loading and engine tunables
//! - Engine event types and the EventBus
//! - Debounce/throttle rate limiting
//! - TTL cache with in-flight request deduplication
//! - Persistent staging store (memory and SQLite backends)
//! - Page classification

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod page;
pub mod params;
pub mod ratelimit;
pub mod staging;
pub mod time;

pub use error::{Error, Result};
pub use page::{classify, PageType};
