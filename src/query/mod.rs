//! Keyed, TTL-based query cache with stale-while-revalidate semantics.
//!
//! This module provides the `QueryCache` engine that sits between
//! consumers and their fetch functions. Cached entries expire lazily
//! after `cache_time`; entries older than `stale_time` are still served
//! immediately but trigger a background refresh. Concurrent requests
//! for the same key are collapsed into a single fetch.
//!
//! A `QueryCache` is an explicit instance owned by the composition
//! root, not a process-wide singleton - tests get a fresh cache each.

pub mod engine;

pub use engine::{FetchState, KeyPattern, QueryCache, QueryOptions, QueryState};
