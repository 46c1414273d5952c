#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # rustls-hotswap
//!
//! Composable, reloadable trust and identity material for [`rustls`].
//!
//! A [`TlsContext`] produces `rustls` client and server configurations whose
//! certificate verifiers and certificate resolvers read the context's material
//! on every handshake. That material can be:
//!
//! * combined from several trust stores or key stores
//!   ([`CompositeTrustEvaluator`], [`CompositeIdentitySelector`]),
//! * grown at runtime by trusting certificates on first use, under an
//!   application predicate ([`InflatableTrustEvaluator`]),
//! * replaced while connections are running ([`HotSwappable`],
//!   [`ReloadCoordinator`]),
//! * routed, presenting a specific client identity to a specific peer
//!   ([`IdentityRouter`]).
//!
//! ```no_run
//! use rustls_hotswap::{Certificate, Destination, ReloadCoordinator, TlsContext};
//!
//! # fn run(ca: Certificate, next_ca: Certificate) -> rustls_hotswap::Result<()> {
//! let context = TlsContext::builder()
//!     .with_trust_material([ca])
//!     .with_swappable_trust()
//!     .build()?;
//! let client_config = context.client_config(&Destination::with_port("example.com", 443))?;
//!
//! // Later: rotate trust without rebuilding `client_config`.
//! let fresh = TlsContext::builder().with_trust_material([next_ca]).build()?;
//! ReloadCoordinator::new().reload(&context, &fresh)?;
//! # drop(client_config);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! Exactly **one** `rustls` crypto provider must be enabled:
//!
//! * `ring` (default)
//! * `aws-lc-rs`
//!
//! Enabling more than one provider results in a compile-time error.
//!
//! Logging goes through `log` (`logging`, default) or `tracing` (`tracing`).
//! `parking-lot` switches internal locks to `parking_lot`.

#[cfg(all(feature = "ring", feature = "aws-lc-rs"))]
compile_error!("Enable only one crypto provider feature: `ring` or `aws-lc-rs`.");

#[cfg(not(any(feature = "ring", feature = "aws-lc-rs")))]
compile_error!("Enable one crypto provider feature: `ring` (default) or `aws-lc-rs`.");

pub mod certificate;
pub mod context;
pub mod error;
pub mod identity;
pub mod keystore;
pub mod reload;
pub mod session;
pub mod swap;
pub mod trust;
pub mod verifier;

mod crypto;
mod material;
mod observability;
mod prelude;
mod resolve;
mod sync;

#[cfg(test)]
mod test_support;

// Public re-exports
pub use certificate::{Certificate, CertificateChain, PrivateKey};
pub use context::{
    ClientAuth, IdentityMaterial, TlsContext, TlsContextBuilder, TlsParameters, TrustMaterial,
};
pub use error::{
    CertificateError, ConfigurationError, Error, KeystoreError, Result, Suppressed, TrustError,
};
pub use identity::{
    CompositeIdentitySelector, Destination, IdentityRoute, IdentityRouter, IdentitySelector,
    KeyStoreIdentitySelector, SelectionRequest,
};
pub use keystore::{
    KeyStore, KeyStoreEntry, KeystoreAdapter, KeystorePassword, PemKeystoreAdapter, PEM_STORE_TYPE,
};
pub use reload::ReloadCoordinator;
pub use session::{ClientSessionCache, ServerSessionCache, SessionCacheInvalidator};
pub use swap::HotSwappable;
pub use trust::{
    CompositeTrustEvaluator, InflatableTrustEvaluator, InflatableTrustEvaluatorBuilder,
    InflationState, PeerRole, RejectAllTrustEvaluator, TrustEvaluator, TrustManagerParameters,
    TrustPredicate, TrustRequest, WebPkiTrustEvaluator,
};
pub use verifier::TrustVerifier;
