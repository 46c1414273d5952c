use crate::certificate::{Certificate, CertificateChain, PrivateKey};
use crate::error::{ConfigurationError, Error, Result};
use crate::prelude::debug;
use rustls::crypto::CryptoProvider;
use rustls::sign::CertifiedKey;
use rustls::RootCertStore;
use std::sync::Arc;

/// Build a `RootCertStore` from trust anchors.
///
/// ## Errors
///
/// Returns [`ConfigurationError::NoTrustAnchors`] if `anchors` is empty and
/// [`ConfigurationError::InvalidTrustAnchor`] for the first certificate
/// webpki refuses as an anchor.
pub(crate) fn roots_from_certs(
    anchors: &[Certificate],
) -> std::result::Result<Arc<RootCertStore>, ConfigurationError> {
    if anchors.is_empty() {
        return Err(ConfigurationError::NoTrustAnchors);
    }

    let mut store = RootCertStore::empty();
    for anchor in anchors {
        store
            .add(anchor.der().clone())
            .map_err(|source| ConfigurationError::InvalidTrustAnchor {
                subject: anchor.subject().to_string(),
                source,
            })?;
    }

    debug!("loaded {} trust anchor(s)", store.len());

    Ok(Arc::new(store))
}

/// Build a rustls `CertifiedKey` from a chain and its PKCS#8 private key.
///
/// ## Errors
///
/// Returns [`Error::CertifiedKey`] if the provider can't load the key.
pub(crate) fn certified_key_from_chain_and_key(
    chain: &CertificateChain,
    key: &PrivateKey,
    provider: &CryptoProvider,
) -> Result<Arc<CertifiedKey>> {
    let signing_key = provider
        .key_provider
        .load_private_key(key.to_rustls())
        .map_err(|e| Error::CertifiedKey(format!("{}: {e}", chain.leaf().subject())))?;

    Ok(Arc::new(CertifiedKey::new(chain.to_der(), signing_key)))
}
