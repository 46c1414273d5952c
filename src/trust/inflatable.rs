//! Trust on first use.
//!
//! [`InflatableTrustEvaluator`] starts out trusting nothing (or whatever a key
//! store already approved) and grows when an application predicate approves a
//! chain it has not seen. Concurrent handshakes presenting the same unknown
//! chain share a single predicate call: the first caller decides, the others
//! wait on a per-chain cell. A waiter whose chain was approved still runs its
//! own evaluation, so its server name and validity time are checked. Different
//! chains never wait on each other.

use super::{
    RejectAllTrustEvaluator, TrustEvaluator, TrustManagerParameters, TrustPredicate, TrustRequest,
    WebPkiTrustEvaluator,
};
use crate::certificate::{Certificate, CertificateChain};
use crate::error::{Error, KeystoreError, Result, TrustError};
use crate::keystore::{KeyStore, KeystoreAdapter, KeystorePassword};
use crate::prelude::{debug, error, info};
use crate::swap::HotSwappable;
use crate::sync::{condvar_wait, lock_mutex, Condvar, Mutex};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::CertificateDer;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

/// Whether an [`InflatableTrustEvaluator`] trusts anything yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InflationState {
    /// No certificates accepted; every chain is rejected unless approved.
    Empty,
    /// At least one certificate accepted.
    Populated,
}

/// Where accepted certificates are mirrored.
struct KeystoreBinding {
    adapter: Arc<dyn KeystoreAdapter>,
    location: PathBuf,
    password: KeystorePassword,
    store_type: String,
}

impl fmt::Debug for KeystoreBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeystoreBinding")
            .field("adapter", &self.adapter)
            .field("location", &self.location)
            .field("store_type", &self.store_type)
            .finish_non_exhaustive()
    }
}

/// Pending decisions are keyed on the exact DER of every certificate.
type ChainKey = Vec<CertificateDer<'static>>;

fn chain_key(chain: &CertificateChain) -> ChainKey {
    chain.iter().map(|cert| cert.der().clone()).collect()
}

enum DecisionState {
    Deciding,
    Decided(std::result::Result<(), TrustError>),
}

/// Single-flight cell for one pending chain.
struct DecisionCell {
    state: Mutex<DecisionState>,
    cv: Condvar,
}

impl DecisionCell {
    fn new() -> Self {
        Self {
            state: Mutex::new(DecisionState::Deciding),
            cv: Condvar::new(),
        }
    }

    fn wait(&self) -> std::result::Result<(), TrustError> {
        let poisoned = || TrustError::Internal("trust decision mutex poisoned".into());
        let mut guard = lock_mutex(&self.state).map_err(|()| poisoned())?;
        loop {
            match &*guard {
                DecisionState::Decided(outcome) => return outcome.clone(),
                DecisionState::Deciding => {
                    guard = condvar_wait(&self.cv, guard).map_err(|()| poisoned())?;
                }
            }
        }
    }

    fn publish(&self, outcome: std::result::Result<(), TrustError>) {
        if let Ok(mut guard) = lock_mutex(&self.state) {
            *guard = DecisionState::Decided(outcome);
        }
        self.cv.notify_all();
    }
}

/// Releases waiters and clears the pending entry even if the deciding thread unwinds.
struct Leader<'a> {
    pending: &'a Mutex<HashMap<ChainKey, Arc<DecisionCell>>>,
    key: ChainKey,
    cell: Arc<DecisionCell>,
    published: bool,
}

impl Leader<'_> {
    fn finish(mut self, outcome: std::result::Result<(), TrustError>) -> std::result::Result<(), TrustError> {
        self.cell.publish(outcome.clone());
        self.published = true;
        outcome
    }
}

impl Drop for Leader<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.cell.publish(Err(TrustError::Internal(
                "trust decision abandoned".into(),
            )));
        }
        if let Ok(mut pending) = lock_mutex(self.pending) {
            if pending
                .get(&self.key)
                .is_some_and(|cell| Arc::ptr_eq(cell, &self.cell))
            {
                pending.remove(&self.key);
            }
        }
    }
}

/// A trust evaluator that grows its trusted set at runtime.
///
/// The accepted set only grows. Reads ([`TrustEvaluator::accepted_issuers`],
/// evaluation) go through a hot-swapped delegate and never observe a
/// half-applied addition.
pub struct InflatableTrustEvaluator {
    current: HotSwappable<dyn TrustEvaluator>,
    keystore: Mutex<KeyStore>,
    binding: Option<KeystoreBinding>,
    predicate: Option<Arc<dyn TrustPredicate>>,
    pending: Mutex<HashMap<ChainKey, Arc<DecisionCell>>>,
    provider: Arc<CryptoProvider>,
}

impl fmt::Debug for InflatableTrustEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InflatableTrustEvaluator")
            .field("current", &self.current.get())
            .field("binding", &self.binding)
            .field("predicate", &self.predicate.is_some())
            .finish_non_exhaustive()
    }
}

impl InflatableTrustEvaluator {
    /// Starts a builder.
    pub fn builder() -> InflatableTrustEvaluatorBuilder {
        InflatableTrustEvaluatorBuilder::default()
    }

    /// [`InflationState::Populated`] once any certificate has been accepted.
    pub fn state(&self) -> InflationState {
        if self.current.get().accepted_issuers().is_empty() {
            InflationState::Empty
        } else {
            InflationState::Populated
        }
    }

    /// A snapshot of the in-memory key store.
    pub fn keystore(&self) -> Result<KeyStore> {
        lock_mutex(&self.keystore)
            .map(|ks| ks.clone())
            .map_err(|()| Error::Internal("inflatable key store mutex poisoned".into()))
    }

    /// Trusts `certs` from now on.
    ///
    /// Empty input and already-accepted certificates are ignored. If the
    /// enlarged anchor set cannot be built, nothing changes and an error is
    /// logged. A configured key store is updated afterwards; if that fails the
    /// error is logged and the in-memory acceptance stands. Each added
    /// certificate is logged once the addition is complete, which includes
    /// the key store write when one is configured.
    pub fn add_certificates<I>(&self, certs: I)
    where
        I: IntoIterator<Item = Certificate>,
    {
        let certs: Vec<Certificate> = certs.into_iter().collect();
        if certs.is_empty() {
            return;
        }

        let Ok(mut keystore) = lock_mutex(&self.keystore) else {
            error!("Cannot add certificate(s): inflatable key store mutex poisoned");
            return;
        };

        let mut candidate = keystore.clone();
        let mut added: Vec<Certificate> = Vec::new();
        for cert in certs {
            if candidate.contains_certificate(&cert) {
                continue;
            }
            let alias = candidate.free_alias_for(&cert);
            candidate.set_certificate_entry(alias, cert.clone());
            added.push(cert);
        }
        if added.is_empty() {
            return;
        }

        let evaluator = match WebPkiTrustEvaluator::with_provider(
            candidate.trusted_certificates(),
            Arc::clone(&self.provider),
        ) {
            Ok(evaluator) => evaluator,
            Err(e) => {
                error!("Cannot add certificate(s) for {}: {e}", subjects(&added));
                return;
            }
        };

        *keystore = candidate;
        self.current.replace(Arc::new(evaluator));

        if let Some(binding) = &self.binding {
            if let Err(e) = binding.adapter.store(
                &keystore,
                &binding.location,
                &binding.password,
                &binding.store_type,
            ) {
                error!(
                    "Cannot add certificate(s) to key store at {}: {e}",
                    binding.location.display()
                );
                return;
            }
        }
        for cert in &added {
            info!("Added certificate for [{}]", cert.subject());
        }
    }

    fn decide(
        &self,
        chain: &CertificateChain,
        request: &TrustRequest,
        predicate: &dyn TrustPredicate,
        rejection: TrustError,
    ) -> std::result::Result<(), TrustError> {
        // Another decider may have added this chain since our first attempt.
        if self.current.get().evaluate(chain, request).is_ok() {
            return Ok(());
        }

        let parameters = TrustManagerParameters::new(chain.clone(), request);
        let approved = catch_unwind(AssertUnwindSafe(|| predicate.approve(&parameters)))
            .map_err(|_| TrustError::PredicateFailed)?;
        if !approved {
            debug!(
                "trust predicate declined [{}]",
                chain.leaf().subject()
            );
            return Err(rejection);
        }

        self.add_certificates(chain.certificates().iter().cloned());
        self.current.get().evaluate(chain, request)
    }
}

impl TrustEvaluator for InflatableTrustEvaluator {
    fn evaluate(
        &self,
        chain: &CertificateChain,
        request: &TrustRequest,
    ) -> std::result::Result<(), TrustError> {
        let rejection = match self.current.get().evaluate(chain, request) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        let Some(predicate) = &self.predicate else {
            return Err(rejection);
        };

        let key = chain_key(chain);
        let (cell, leading) = {
            let mut pending = lock_mutex(&self.pending)
                .map_err(|()| TrustError::Internal("pending decisions mutex poisoned".into()))?;
            match pending.entry(key.clone()) {
                Entry::Occupied(e) => (Arc::clone(e.get()), false),
                Entry::Vacant(v) => {
                    let cell = Arc::new(DecisionCell::new());
                    v.insert(Arc::clone(&cell));
                    (cell, true)
                }
            }
        };

        if !leading {
            cell.wait()?;
            return self.current.get().evaluate(chain, request);
        }

        let leader = Leader {
            pending: &self.pending,
            key,
            cell,
            published: false,
        };
        let outcome = self.decide(chain, request, predicate.as_ref(), rejection);
        leader.finish(outcome)
    }

    fn accepted_issuers(&self) -> Vec<Certificate> {
        self.current.get().accepted_issuers()
    }
}

fn subjects(certs: &[Certificate]) -> String {
    let subjects: Vec<String> = certs.iter().map(|c| format!("[{}]", c.subject())).collect();
    subjects.join(", ")
}

/// Builder for [`InflatableTrustEvaluator`].
#[derive(Default)]
pub struct InflatableTrustEvaluatorBuilder {
    binding: Option<KeystoreBinding>,
    predicate: Option<Arc<dyn TrustPredicate>>,
    provider: Option<Arc<CryptoProvider>>,
}

impl fmt::Debug for InflatableTrustEvaluatorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InflatableTrustEvaluatorBuilder")
            .field("binding", &self.binding)
            .field("predicate", &self.predicate.is_some())
            .finish_non_exhaustive()
    }
}

impl InflatableTrustEvaluatorBuilder {
    /// Loads prior approvals from, and mirrors new ones to, a key store.
    ///
    /// A missing key store is treated as empty and created on first addition.
    #[must_use]
    pub fn with_keystore(
        mut self,
        adapter: Arc<dyn KeystoreAdapter>,
        location: impl Into<PathBuf>,
        password: KeystorePassword,
        store_type: impl Into<String>,
    ) -> Self {
        self.binding = Some(KeystoreBinding {
            adapter,
            location: location.into(),
            password,
            store_type: store_type.into(),
        });
        self
    }

    /// Consults `predicate` for chains the current anchors reject.
    ///
    /// Without a predicate the evaluator only grows through
    /// [`InflatableTrustEvaluator::add_certificates`].
    #[must_use]
    pub fn with_predicate<P: TrustPredicate>(mut self, predicate: P) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Uses `provider` instead of the process default.
    #[must_use]
    pub fn with_crypto_provider(mut self, provider: Arc<CryptoProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Builds the evaluator, loading the key store if one was configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the key store exists but cannot be loaded, or if
    /// its certificates cannot be used as trust anchors.
    pub fn build(self) -> Result<InflatableTrustEvaluator> {
        let provider = self.provider.unwrap_or_else(crate::crypto::default_provider);

        let keystore = match &self.binding {
            None => KeyStore::new(crate::keystore::PEM_STORE_TYPE),
            Some(b) => match b.adapter.load(&b.location, &b.password, &b.store_type) {
                Ok(ks) => ks,
                Err(KeystoreError::NotFound(_)) => b.adapter.create_empty(&b.store_type)?,
                Err(e) => return Err(e.into()),
            },
        };

        let trusted = keystore.trusted_certificates();
        let initial: Arc<dyn TrustEvaluator> = if trusted.is_empty() {
            Arc::new(RejectAllTrustEvaluator)
        } else {
            Arc::new(WebPkiTrustEvaluator::with_provider(
                trusted,
                Arc::clone(&provider),
            )?)
        };

        debug!(
            "inflatable trust evaluator starts with {} certificate(s)",
            initial.accepted_issuers().len()
        );

        Ok(InflatableTrustEvaluator {
            current: HotSwappable::new(initial),
            keystore: Mutex::new(keystore),
            binding: self.binding,
            predicate: self.predicate,
            pending: Mutex::new(HashMap::new()),
            provider,
        })
    }
}
