//! Resilient data-access layer for crypto-token analytics
//!
//! A tiered cache (memory -> sqlite -> file) fronted by a multi-provider API
//! gateway that rate-limits, retries with backoff, falls back across
//! providers with schema transformation, and supports tag-based group
//! invalidation. Optimizes availability over strict consistency: duplicate
//! concurrent fetches and last-write-wins cache stores are accepted
//! trade-offs, and durability is best-effort.

pub mod cache;
pub mod compression;
pub mod errors;
pub mod fallback;
pub mod gateway;
pub mod prelude;
pub mod ratelimit;
pub mod retry;
pub mod storage;
pub mod transform;
