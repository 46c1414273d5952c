//! Session caches that can be emptied while connections keep using them.
//!
//! Both caches wrap rustls' in-memory stores behind an [`ArcSwap`]. Clearing
//! swaps in a fresh store, so rustls keeps the same `Arc` to the cache itself
//! and never observes a half-cleared map.

use crate::context::TlsContext;
use crate::prelude::{debug, warn};
use arc_swap::ArcSwap;
use rustls::client::{
    ClientSessionMemoryCache, ClientSessionStore, Tls12ClientSessionValue, Tls13ClientSessionValue,
};
use rustls::pki_types::ServerName;
use rustls::server::{ServerSessionMemoryCache, StoresServerSessions};
use rustls::NamedGroup;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default number of sessions held by each cache.
pub const DEFAULT_SESSION_CACHE_SIZE: usize = 256;

/// Client-side session store with an atomic [`clear`](Self::clear).
pub struct ClientSessionCache {
    inner: ArcSwap<ClientSessionMemoryCache>,
    size: usize,
    generation: AtomicU64,
}

impl ClientSessionCache {
    /// A cache holding up to `size` servers' sessions.
    pub fn new(size: usize) -> Self {
        Self {
            inner: ArcSwap::from_pointee(ClientSessionMemoryCache::new(size)),
            size,
            generation: AtomicU64::new(0),
        }
    }

    /// Drops every cached session, TLS 1.2 and TLS 1.3 alike.
    pub fn clear(&self) {
        self.inner
            .store(Arc::new(ClientSessionMemoryCache::new(self.size)));
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of times the cache was cleared.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ClientSessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSessionCache")
            .field("size", &self.size)
            .field("generation", &self.generation())
            .finish()
    }
}

impl ClientSessionStore for ClientSessionCache {
    fn set_kx_hint(&self, server_name: ServerName<'static>, group: NamedGroup) {
        self.inner.load().set_kx_hint(server_name, group);
    }

    fn kx_hint(&self, server_name: &ServerName<'_>) -> Option<NamedGroup> {
        self.inner.load().kx_hint(server_name)
    }

    fn set_tls12_session(&self, server_name: ServerName<'static>, value: Tls12ClientSessionValue) {
        self.inner.load().set_tls12_session(server_name, value);
    }

    fn tls12_session(&self, server_name: &ServerName<'_>) -> Option<Tls12ClientSessionValue> {
        self.inner.load().tls12_session(server_name)
    }

    fn remove_tls12_session(&self, server_name: &ServerName<'static>) {
        self.inner.load().remove_tls12_session(server_name);
    }

    fn insert_tls13_ticket(&self, server_name: ServerName<'static>, value: Tls13ClientSessionValue) {
        self.inner.load().insert_tls13_ticket(server_name, value);
    }

    fn take_tls13_ticket(&self, server_name: &ServerName<'static>) -> Option<Tls13ClientSessionValue> {
        self.inner.load().take_tls13_ticket(server_name)
    }
}

/// Server-side session storage with an atomic [`clear`](Self::clear).
///
/// Holds TLS 1.2 session IDs and, unless a stateless ticketer is configured,
/// TLS 1.3 resumption tickets.
pub struct ServerSessionCache {
    inner: ArcSwap<ServerSessionMemoryCache>,
    size: usize,
    generation: AtomicU64,
}

impl ServerSessionCache {
    /// A cache holding up to `size` sessions.
    pub fn new(size: usize) -> Self {
        Self {
            inner: ArcSwap::new(ServerSessionMemoryCache::new(size)),
            size,
            generation: AtomicU64::new(0),
        }
    }

    /// Drops every stored session.
    pub fn clear(&self) {
        self.inner.store(ServerSessionMemoryCache::new(self.size));
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of times the cache was cleared.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ServerSessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSessionCache")
            .field("size", &self.size)
            .field("generation", &self.generation())
            .finish()
    }
}

impl StoresServerSessions for ServerSessionCache {
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> bool {
        self.inner.load().put(key, value)
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.load().get(key)
    }

    fn take(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.load().take(key)
    }

    fn can_cache(&self) -> bool {
        self.inner.load().can_cache()
    }
}

/// Forces fresh handshakes on a context's next connections.
///
/// Clears the client and server session caches. Stateless tickets issued by
/// an application ticketer live only at the peer and cannot be revoked here;
/// that case is logged as a warning and the rest still completes.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionCacheInvalidator;

impl SessionCacheInvalidator {
    /// Creates an invalidator.
    pub fn new() -> Self {
        Self
    }

    /// Clears every session cached for `context`.
    pub fn invalidate(&self, context: &TlsContext) {
        context.client_sessions().clear();
        context.server_sessions().clear();

        if context.has_session_ticketer() {
            warn!(
                "stateless session tickets from the configured ticketer cannot be revoked; \
                 they remain valid until they expire"
            );
        }
        debug!("invalidated TLS session caches");
    }
}
