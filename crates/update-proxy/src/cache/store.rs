use super::entry::{decode_headers, encode_headers, CacheEntry};
use crate::clock::Clock;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderValue, Method, Request, Response, StatusCode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;

/// Request header carrying the entry lifetime in seconds.
pub const HEADER_TTL: &str = "x-ttl";
/// Request/response header carrying the JSON header list.
pub const HEADER_HEADERS: &str = "x-headers";
/// Response header carrying the absolute expiry in epoch milliseconds.
pub const HEADER_EXPIRES: &str = "x-expires";
/// Request header that asks `GET` to return the entry even if it has expired.
pub const HEADER_STALE: &str = "x-stale";
/// Value of [`HEADER_STALE`] that enables the stale read.
pub const STALE_ALLOW: &str = "allow";

/// Lifetime used when a `PUT` carries no usable `x-ttl`.
pub const DEFAULT_TTL_SECS: i64 = 3600;

/// Addressable handle to a single store instance.
#[async_trait]
pub trait StoreStub: Send + Sync {
    /// Send one wire request to the store.
    async fn fetch(&self, request: Request<Bytes>) -> Result<Response<Bytes>>;
}

/// Derives the store instance that owns a key.
///
/// The same key must always resolve to the same instance.
pub trait StoreNamespace: Send + Sync {
    fn stub(&self, key: &str) -> Arc<dyn StoreStub>;
}

/// Single-entry store with expiry semantics.
///
/// Operations on one instance are serialized by its slot lock; a racing
/// delete-on-expiry and `put` resolve as last write wins.
pub struct CacheStore {
    slot: Mutex<Option<CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    /// Empty store reading expiry against `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            slot: Mutex::new(None),
            clock,
        }
    }

    /// Return the entry if it has not expired. An expired entry is deleted.
    pub async fn get_fresh(&self) -> Option<CacheEntry> {
        let mut slot = self.slot.lock().await;
        let now = self.clock.now_millis();
        match slot.as_ref() {
            Some(entry) if entry.is_fresh(now) => Some(entry.clone()),
            Some(entry) => {
                tracing::debug!(expires = entry.expires, now, "evicting expired cache entry");
                *slot = None;
                None
            }
            None => None,
        }
    }

    /// Return the entry whatever its expiry. Never mutates the store.
    pub async fn get_raw(&self) -> Option<CacheEntry> {
        self.slot.lock().await.clone()
    }

    /// Replace the stored entry.
    pub async fn put(&self, entry: CacheEntry) {
        *self.slot.lock().await = Some(entry);
    }

    /// Expiry of the held entry, without waiting for the slot.
    ///
    /// `None` while another operation holds the slot, `Some(None)` when empty.
    fn peek_expiry(&self) -> Option<Option<u64>> {
        self.slot
            .try_lock()
            .ok()
            .map(|slot| slot.as_ref().map(|entry| entry.expires))
    }

    async fn handle_get(&self, request: &Request<Bytes>) -> Response<Bytes> {
        let allow_stale = request
            .headers()
            .get(HEADER_STALE)
            .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(STALE_ALLOW.as_bytes()));

        let entry = if allow_stale {
            self.get_raw().await
        } else {
            self.get_fresh().await
        };

        let Some(entry) = entry else {
            return plain(StatusCode::NOT_FOUND, "not found");
        };

        let headers = match encode_headers(&entry.headers) {
            Ok(headers) => headers,
            Err(err) => {
                tracing::warn!(error = %err, "stored header list cannot be sent");
                return plain(StatusCode::INTERNAL_SERVER_ERROR, "unencodable headers");
            }
        };

        let mut response = Response::new(entry.data);
        response.headers_mut().insert(HEADER_HEADERS, headers);
        response
            .headers_mut()
            .insert(HEADER_EXPIRES, HeaderValue::from(entry.expires));
        response
    }

    async fn handle_put(&self, request: Request<Bytes>) -> Response<Bytes> {
        let ttl = request
            .headers()
            .get(HEADER_TTL)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(DEFAULT_TTL_SECS);

        let headers = match decode_headers(request.headers().get(HEADER_HEADERS)) {
            Ok(headers) => headers,
            Err(err) => {
                tracing::warn!(error = %err, "rejecting cache put with malformed header list");
                return plain(StatusCode::BAD_REQUEST, "malformed x-headers");
            }
        };

        let now = self.clock.now_millis() as i64;
        let expires = now.saturating_add(ttl.saturating_mul(1000)).max(0) as u64;
        let data = request.into_body();
        self.put(CacheEntry::new(data, headers, expires)).await;
        plain(StatusCode::OK, "ok")
    }
}

#[async_trait]
impl StoreStub for CacheStore {
    async fn fetch(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let response = match *request.method() {
            Method::GET => self.handle_get(&request).await,
            Method::PUT => self.handle_put(request).await,
            _ => plain(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"),
        };
        Ok(response)
    }
}

fn plain(status: StatusCode, body: &'static str) -> Response<Bytes> {
    let mut response = Response::new(Bytes::from_static(body.as_bytes()));
    *response.status_mut() = status;
    response
}

/// How long an expired entry stays available for stale fallback before a
/// sweep may release it.
pub const DEFAULT_STALE_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Number of keys a [`MemoryNamespace`] holds before it starts evicting.
pub const DEFAULT_MAX_STORES: usize = 1024;

/// In-process namespace: one [`CacheStore`] per key, created on first use.
///
/// Stores are released by [`MemoryNamespace::sweep`] once their entry has
/// been expired for longer than the stale retention, and evicted early when
/// the namespace is full. A store that a caller still holds is never released.
pub struct MemoryNamespace {
    stores: StdMutex<HashMap<String, Arc<CacheStore>>>,
    clock: Arc<dyn Clock>,
    stale_retention: Duration,
    max_stores: usize,
}

impl MemoryNamespace {
    /// Namespace with the default retention and capacity.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_limits(clock, DEFAULT_STALE_RETENTION, DEFAULT_MAX_STORES)
    }

    /// Namespace keeping expired entries for `stale_retention` and at most
    /// `max_stores` keys.
    pub fn with_limits(clock: Arc<dyn Clock>, stale_retention: Duration, max_stores: usize) -> Self {
        Self {
            stores: StdMutex::new(HashMap::new()),
            clock,
            stale_retention,
            max_stores: max_stores.max(1),
        }
    }

    /// Store instance for `key`, created if it does not exist yet.
    pub fn store(&self, key: &str) -> Arc<CacheStore> {
        let mut stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(store) = stores.get(key) {
            return store.clone();
        }

        if stores.len() >= self.max_stores {
            self.make_room(&mut stores);
        }
        let store = Arc::new(CacheStore::new(self.clock.clone()));
        stores.insert(key.to_string(), store.clone());
        store
    }

    /// Release stores that are empty or expired beyond the stale retention.
    /// Returns how many were released.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let mut stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
        let released = release_where(&mut stores, |expires| {
            expires.saturating_add(self.stale_retention.as_millis() as u64) <= now
        });
        if released > 0 {
            tracing::debug!(released, remaining = stores.len(), "swept cache namespace");
        }
        released
    }

    /// Run [`MemoryNamespace::sweep`] every `every` until the task is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let namespace = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(namespace) = namespace.upgrade() else {
                    break;
                };
                namespace.sweep();
            }
        })
    }

    // Full: drop everything already expired, then the idle store closest to expiry.
    fn make_room(&self, stores: &mut HashMap<String, Arc<CacheStore>>) {
        let now = self.clock.now_millis();
        if release_where(stores, |expires| expires <= now) > 0 {
            return;
        }

        let victim = stores
            .iter()
            .filter(|(_, store)| Arc::strong_count(store) == 1)
            .filter_map(|(key, store)| Some((key, store.peek_expiry()??)))
            .min_by_key(|(_, expires)| *expires)
            .map(|(key, _)| key.clone());
        match victim {
            Some(key) => {
                tracing::debug!(key = %key, "evicting cache entry to make room");
                stores.remove(&key);
            }
            None => tracing::debug!(len = stores.len(), "cache namespace full, every store busy"),
        }
    }

    /// Number of store instances currently held.
    pub fn len(&self) -> usize {
        self.stores.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether no store is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Remove idle stores that are empty or whose expiry satisfies `released`.
fn release_where(
    stores: &mut HashMap<String, Arc<CacheStore>>,
    released: impl Fn(u64) -> bool,
) -> usize {
    let before = stores.len();
    stores.retain(|_, store| {
        if Arc::strong_count(store) > 1 {
            return true;
        }
        match store.peek_expiry() {
            Some(Some(expires)) => !released(expires),
            Some(None) => false,
            None => true,
        }
    });
    before - stores.len()
}

impl StoreNamespace for MemoryNamespace {
    fn stub(&self, key: &str) -> Arc<dyn StoreStub> {
        self.store(key)
    }
}
