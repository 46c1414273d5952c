//! Identity selection: which local certificate and key a handshake presents.

use crate::certificate::CertificateChain;
use rustls::sign::CertifiedKey;
use rustls::SignatureScheme;
use std::fmt;
use std::sync::Arc;

mod composite;
mod keystore;
mod route;

pub use composite::CompositeIdentitySelector;
pub use keystore::KeyStoreIdentitySelector;
pub use route::{Destination, IdentityRoute, IdentityRouter};

/// What the handshake knows when an identity is chosen.
#[derive(Clone, Copy, Debug, Default)]
pub struct SelectionRequest<'a> {
    peer: Option<&'a Destination>,
    issuer_hints: &'a [&'a [u8]],
    sigschemes: &'a [SignatureScheme],
}

impl<'a> SelectionRequest<'a> {
    /// A request constrained only by the peer's signature schemes.
    ///
    /// An empty scheme list accepts every key.
    pub fn new(sigschemes: &'a [SignatureScheme]) -> Self {
        Self {
            peer: None,
            issuer_hints: &[],
            sigschemes,
        }
    }

    /// Sets the remote endpoint being dialled (or named via SNI).
    #[must_use]
    pub fn with_peer(mut self, peer: &'a Destination) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Sets the DER-encoded issuer names the peer will accept.
    #[must_use]
    pub fn with_issuer_hints(mut self, issuer_hints: &'a [&'a [u8]]) -> Self {
        self.issuer_hints = issuer_hints;
        self
    }

    /// Remote endpoint, if known.
    pub fn peer(&self) -> Option<&'a Destination> {
        self.peer
    }

    /// Issuer names the peer asked for; empty when it sent none.
    pub fn issuer_hints(&self) -> &'a [&'a [u8]] {
        self.issuer_hints
    }

    /// Signature schemes the peer supports.
    pub fn sigschemes(&self) -> &'a [SignatureScheme] {
        self.sigschemes
    }
}

/// Chooses which local identity to present.
///
/// Candidate lists are in preference order. The `choose_*` and `select_*`
/// methods have defaults built on the candidate lists; wrappers that hold a
/// delegate forward them so the delegate's own choice survives wrapping.
pub trait IdentitySelector: fmt::Debug + Send + Sync {
    /// Every alias this selector can present.
    fn aliases(&self) -> Vec<String>;

    /// Signing key and chain for `alias`.
    fn certified_key(&self, alias: &str) -> Option<Arc<CertifiedKey>>;

    /// Parsed chain for `alias`.
    fn certificate_chain(&self, alias: &str) -> Option<CertificateChain> {
        let key = self.certified_key(alias)?;
        CertificateChain::from_der_chain(key.cert.iter().cloned()).ok()
    }

    /// Aliases usable for an outbound connection, preferred first.
    fn client_candidates(&self, request: &SelectionRequest<'_>) -> Vec<String>;

    /// Aliases usable for an inbound connection, preferred first.
    fn server_candidates(&self, request: &SelectionRequest<'_>) -> Vec<String>;

    /// Alias to present as a client.
    fn choose_client_alias(&self, request: &SelectionRequest<'_>) -> Option<String> {
        self.client_candidates(request).into_iter().next()
    }

    /// Alias to present as a server.
    fn choose_server_alias(&self, request: &SelectionRequest<'_>) -> Option<String> {
        self.server_candidates(request).into_iter().next()
    }

    /// Chosen client alias together with its key.
    fn select_client(&self, request: &SelectionRequest<'_>) -> Option<(String, Arc<CertifiedKey>)> {
        let alias = self.choose_client_alias(request)?;
        let key = self.certified_key(&alias)?;
        Some((alias, key))
    }

    /// Chosen server alias together with its key.
    fn select_server(&self, request: &SelectionRequest<'_>) -> Option<(String, Arc<CertifiedKey>)> {
        let alias = self.choose_server_alias(request)?;
        let key = self.certified_key(&alias)?;
        Some((alias, key))
    }
}

impl<T: IdentitySelector + ?Sized> IdentitySelector for Arc<T> {
    fn aliases(&self) -> Vec<String> {
        (**self).aliases()
    }

    fn certified_key(&self, alias: &str) -> Option<Arc<CertifiedKey>> {
        (**self).certified_key(alias)
    }

    fn certificate_chain(&self, alias: &str) -> Option<CertificateChain> {
        (**self).certificate_chain(alias)
    }

    fn client_candidates(&self, request: &SelectionRequest<'_>) -> Vec<String> {
        (**self).client_candidates(request)
    }

    fn server_candidates(&self, request: &SelectionRequest<'_>) -> Vec<String> {
        (**self).server_candidates(request)
    }

    fn choose_client_alias(&self, request: &SelectionRequest<'_>) -> Option<String> {
        (**self).choose_client_alias(request)
    }

    fn choose_server_alias(&self, request: &SelectionRequest<'_>) -> Option<String> {
        (**self).choose_server_alias(request)
    }

    fn select_client(&self, request: &SelectionRequest<'_>) -> Option<(String, Arc<CertifiedKey>)> {
        (**self).select_client(request)
    }

    fn select_server(&self, request: &SelectionRequest<'_>) -> Option<(String, Arc<CertifiedKey>)> {
        (**self).select_server(request)
    }
}

/// `true` when `key` can sign with one of `sigschemes`, or no schemes were given.
pub(crate) fn supports_schemes(key: &CertifiedKey, sigschemes: &[SignatureScheme]) -> bool {
    sigschemes.is_empty() || key.key.choose_scheme(sigschemes).is_some()
}

/// `true` when some certificate in `chain` was issued under one of `hints`.
///
/// Peers may send either full DER names or just their contents; both match.
pub(crate) fn matches_issuer_hints(chain: &CertificateChain, hints: &[&[u8]]) -> bool {
    hints.is_empty()
        || chain.iter().any(|cert| {
            let issuer = cert.issuer_raw();
            hints
                .iter()
                .any(|hint| !hint.is_empty() && (issuer == *hint || issuer.ends_with(hint)))
        })
}
