//! Atomically replaceable delegates.

use crate::certificate::{Certificate, CertificateChain};
use crate::error::TrustError;
use crate::identity::{IdentitySelector, SelectionRequest};
use crate::prelude::debug;
use crate::trust::{TrustEvaluator, TrustRequest};
use arc_swap::ArcSwap;
use rustls::sign::CertifiedKey;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Holds exactly one live delegate and lets it be replaced without blocking readers.
///
/// Every forwarded [`TrustEvaluator`] or [`IdentitySelector`] call resolves the
/// delegate at call time. A handshake that started before [`replace`](Self::replace)
/// keeps whatever `Arc` it already loaded; the old delegate is dropped only once
/// the last such holder lets go.
pub struct HotSwappable<T: ?Sized> {
    // Double Arc so unsized delegates (`dyn TrustEvaluator`) fit in ArcSwap.
    current: ArcSwap<Arc<T>>,
    generation: AtomicU64,
}

impl<T: ?Sized> HotSwappable<T> {
    /// Wraps `initial` as the live delegate.
    pub fn new(initial: Arc<T>) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            generation: AtomicU64::new(0),
        }
    }

    /// The current delegate. Lock-free.
    pub fn get(&self) -> Arc<T> {
        let guard = self.current.load();
        let current: &Arc<T> = &guard;
        Arc::clone(current)
    }

    /// Publishes `next` as the live delegate and returns the previous one.
    ///
    /// Any `get` that starts after this returns observes `next`.
    pub fn replace(&self, next: Arc<T>) -> Arc<T> {
        let previous = self.current.swap(Arc::new(next));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("swapped delegate; generation {generation}");
        let previous: &Arc<T> = &previous;
        Arc::clone(previous)
    }

    /// Number of completed replacements.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl<T: ?Sized> fmt::Debug for HotSwappable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotSwappable")
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl<T> TrustEvaluator for HotSwappable<T>
where
    T: TrustEvaluator + ?Sized,
{
    fn evaluate(&self, chain: &CertificateChain, request: &TrustRequest) -> Result<(), TrustError> {
        self.get().evaluate(chain, request)
    }

    fn accepted_issuers(&self) -> Vec<Certificate> {
        self.get().accepted_issuers()
    }
}

impl<T> IdentitySelector for HotSwappable<T>
where
    T: IdentitySelector + ?Sized,
{
    fn aliases(&self) -> Vec<String> {
        self.get().aliases()
    }

    fn certified_key(&self, alias: &str) -> Option<Arc<CertifiedKey>> {
        self.get().certified_key(alias)
    }

    fn certificate_chain(&self, alias: &str) -> Option<CertificateChain> {
        self.get().certificate_chain(alias)
    }

    fn client_candidates(&self, request: &SelectionRequest<'_>) -> Vec<String> {
        self.get().client_candidates(request)
    }

    fn server_candidates(&self, request: &SelectionRequest<'_>) -> Vec<String> {
        self.get().server_candidates(request)
    }

    fn choose_client_alias(&self, request: &SelectionRequest<'_>) -> Option<String> {
        self.get().choose_client_alias(request)
    }

    fn choose_server_alias(&self, request: &SelectionRequest<'_>) -> Option<String> {
        self.get().choose_server_alias(request)
    }

    // One snapshot for choose + key lookup, so a concurrent replace can't
    // split them across two delegates.
    fn select_client(&self, request: &SelectionRequest<'_>) -> Option<(String, Arc<CertifiedKey>)> {
        self.get().select_client(request)
    }

    fn select_server(&self, request: &SelectionRequest<'_>) -> Option<(String, Arc<CertifiedKey>)> {
        self.get().select_server(request)
    }
}
