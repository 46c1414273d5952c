//! Trust evaluation: deciding whether a peer's certificate chain is accepted.

use crate::certificate::{Certificate, CertificateChain};
use crate::error::TrustError;
use rustls::pki_types::{ServerName, UnixTime};
use std::fmt;
use std::sync::Arc;

mod composite;
mod inflatable;
mod webpki;

pub use composite::CompositeTrustEvaluator;
pub use inflatable::{InflatableTrustEvaluator, InflatableTrustEvaluatorBuilder, InflationState};
pub use webpki::{RejectAllTrustEvaluator, WebPkiTrustEvaluator};

/// Which side of the handshake the chain being evaluated belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerRole {
    /// A server chain, checked by a client that dialled `ServerName`.
    Server(ServerName<'static>),
    /// A client chain, checked by a server.
    Client,
}

/// Per-handshake inputs to a trust decision besides the chain itself.
#[derive(Clone, Debug)]
pub struct TrustRequest {
    role: PeerRole,
    ocsp_response: Vec<u8>,
    now: UnixTime,
}

impl TrustRequest {
    /// Request to evaluate a server chain for `server_name`.
    pub fn server(server_name: ServerName<'static>, now: UnixTime) -> Self {
        Self {
            role: PeerRole::Server(server_name),
            ocsp_response: Vec::new(),
            now,
        }
    }

    /// Request to evaluate a client chain.
    pub fn client(now: UnixTime) -> Self {
        Self {
            role: PeerRole::Client,
            ocsp_response: Vec::new(),
            now,
        }
    }

    /// Attaches a stapled OCSP response.
    #[must_use]
    pub fn with_ocsp_response(mut self, ocsp_response: impl Into<Vec<u8>>) -> Self {
        self.ocsp_response = ocsp_response.into();
        self
    }

    /// The peer's role.
    pub fn role(&self) -> &PeerRole {
        &self.role
    }

    /// Stapled OCSP response, empty if none.
    pub fn ocsp_response(&self) -> &[u8] {
        &self.ocsp_response
    }

    /// Verification time.
    pub fn now(&self) -> UnixTime {
        self.now
    }
}

/// Accepts or rejects peer certificate chains.
///
/// Implementations are called from handshake threads concurrently and must be
/// thread-safe. `evaluate` should return promptly.
pub trait TrustEvaluator: fmt::Debug + Send + Sync {
    /// Accepts the chain or explains why not.
    ///
    /// # Errors
    ///
    /// Returns a [`TrustError`] when the chain is not trusted.
    fn evaluate(&self, chain: &CertificateChain, request: &TrustRequest) -> Result<(), TrustError>;

    /// Certificates this evaluator currently trusts as issuers.
    fn accepted_issuers(&self) -> Vec<Certificate>;
}

impl<T: TrustEvaluator + ?Sized> TrustEvaluator for Arc<T> {
    fn evaluate(&self, chain: &CertificateChain, request: &TrustRequest) -> Result<(), TrustError> {
        (**self).evaluate(chain, request)
    }

    fn accepted_issuers(&self) -> Vec<Certificate> {
        (**self).accepted_issuers()
    }
}

/// Immutable snapshot of a trust attempt handed to a [`TrustPredicate`].
#[derive(Clone, Debug)]
pub struct TrustManagerParameters {
    chain: CertificateChain,
    role: PeerRole,
    evaluated_at: UnixTime,
}

impl TrustManagerParameters {
    pub(crate) fn new(chain: CertificateChain, request: &TrustRequest) -> Self {
        Self {
            chain,
            role: request.role.clone(),
            evaluated_at: request.now,
        }
    }

    /// The rejected chain, leaf first.
    pub fn chain(&self) -> &CertificateChain {
        &self.chain
    }

    /// Whether a server or a client presented the chain.
    pub fn role(&self) -> &PeerRole {
        &self.role
    }

    /// Server name the client dialled, when a server chain is evaluated.
    pub fn server_name(&self) -> Option<&ServerName<'static>> {
        match &self.role {
            PeerRole::Server(name) => Some(name),
            PeerRole::Client => None,
        }
    }

    /// Time of the attempt.
    pub fn evaluated_at(&self) -> UnixTime {
        self.evaluated_at
    }
}

/// Application decision on whether to trust a chain on first use.
///
/// Implementations must be thread-safe and should be fast: callers evaluating
/// the same chain wait for the decision.
pub trait TrustPredicate: Send + Sync + 'static {
    /// Returns `true` to add the chain's certificates to the trusted set.
    fn approve(&self, parameters: &TrustManagerParameters) -> bool;
}

impl<F> TrustPredicate for F
where
    F: Fn(&TrustManagerParameters) -> bool + Send + Sync + 'static,
{
    fn approve(&self, parameters: &TrustManagerParameters) -> bool {
        self(parameters)
    }
}
