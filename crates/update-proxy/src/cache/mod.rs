//! Single-entry, TTL-scoped cache.
//!
//! Every logical key owns one [`CacheStore`]. The [`CacheClient`] reaches a
//! store through a [`StoreNamespace`] using a small HTTP-shaped wire
//! contract: `PUT` with `x-ttl`/`x-headers`, `GET` answering with the payload
//! plus `x-headers`/`x-expires`, or 404 when absent.

mod client;
mod entry;
mod store;

pub use client::CacheClient;
pub use entry::CacheEntry;
pub use store::{
    CacheStore, MemoryNamespace, StoreNamespace, StoreStub, DEFAULT_MAX_STORES,
    DEFAULT_STALE_RETENTION, DEFAULT_TTL_SECS, HEADER_EXPIRES, HEADER_HEADERS, HEADER_STALE,
    HEADER_TTL, STALE_ALLOW,
};
