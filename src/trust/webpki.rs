use super::{PeerRole, TrustEvaluator, TrustRequest};
use crate::certificate::{Certificate, CertificateChain};
use crate::error::{ConfigurationError, TrustError};
use crate::material::roots_from_certs;
use rustls::client::danger::ServerCertVerifier;
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::server::danger::ClientCertVerifier;
use rustls::server::WebPkiClientVerifier;
use rustls::server::VerifierBuilderError;
use std::fmt;
use std::sync::Arc;

/// Platform (webpki) path validation over a fixed, non-empty set of trust anchors.
#[derive(Clone)]
pub struct WebPkiTrustEvaluator {
    anchors: Vec<Certificate>,
    server: Arc<WebPkiServerVerifier>,
    client: Arc<dyn ClientCertVerifier>,
}

impl WebPkiTrustEvaluator {
    /// Builds an evaluator with the process default crypto provider.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::NoTrustAnchors`] if `anchors` is empty, or
    /// another [`ConfigurationError`] if webpki refuses an anchor.
    pub fn new(anchors: Vec<Certificate>) -> Result<Self, ConfigurationError> {
        Self::with_provider(anchors, crate::crypto::default_provider())
    }

    /// Builds an evaluator that verifies with `provider`'s algorithms.
    ///
    /// # Errors
    ///
    /// Same as [`WebPkiTrustEvaluator::new`].
    pub fn with_provider(
        anchors: Vec<Certificate>,
        provider: Arc<CryptoProvider>,
    ) -> Result<Self, ConfigurationError> {
        let mut unique: Vec<Certificate> = Vec::with_capacity(anchors.len());
        for anchor in anchors {
            if !unique.contains(&anchor) {
                unique.push(anchor);
            }
        }

        let roots = roots_from_certs(&unique)?;

        let server = WebPkiServerVerifier::builder_with_provider(Arc::clone(&roots), Arc::clone(&provider))
            .build()
            .map_err(builder_error)?;
        let client = WebPkiClientVerifier::builder_with_provider(roots, provider)
            .build()
            .map_err(builder_error)?;

        Ok(Self {
            anchors: unique,
            server,
            client,
        })
    }
}

fn builder_error(e: VerifierBuilderError) -> ConfigurationError {
    match e {
        VerifierBuilderError::NoRootAnchors => ConfigurationError::NoTrustAnchors,
        other => ConfigurationError::VerifierBuilder(other.to_string()),
    }
}

impl fmt::Debug for WebPkiTrustEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebPkiTrustEvaluator")
            .field(
                "anchors",
                &self.anchors.iter().map(Certificate::subject).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl TrustEvaluator for WebPkiTrustEvaluator {
    fn evaluate(&self, chain: &CertificateChain, request: &TrustRequest) -> Result<(), TrustError> {
        let leaf = chain.leaf().der();
        let intermediates: Vec<_> = chain.intermediates().iter().map(|c| c.der().clone()).collect();

        match request.role() {
            PeerRole::Server(server_name) => self
                .server
                .verify_server_cert(
                    leaf,
                    &intermediates,
                    server_name,
                    request.ocsp_response(),
                    request.now(),
                )
                .map(|_| ()),
            PeerRole::Client => self
                .client
                .verify_client_cert(leaf, &intermediates, request.now())
                .map(|_| ()),
        }
        .map_err(TrustError::Rejected)
    }

    fn accepted_issuers(&self) -> Vec<Certificate> {
        self.anchors.clone()
    }
}

/// Trusts nothing. Every chain fails with `UnknownIssuer`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RejectAllTrustEvaluator;

impl TrustEvaluator for RejectAllTrustEvaluator {
    fn evaluate(&self, _chain: &CertificateChain, _request: &TrustRequest) -> Result<(), TrustError> {
        Err(TrustError::Rejected(rustls::Error::InvalidCertificate(
            rustls::CertificateError::UnknownIssuer,
        )))
    }

    fn accepted_issuers(&self) -> Vec<Certificate> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self_signed, TestPki};
    use rustls::pki_types::{ServerName, UnixTime};

    fn localhost() -> TrustRequest {
        TrustRequest::server(ServerName::try_from("localhost").unwrap(), UnixTime::now())
    }

    #[test]
    fn empty_anchors_fail_loudly() {
        assert!(matches!(
            WebPkiTrustEvaluator::new(Vec::new()),
            Err(ConfigurationError::NoTrustAnchors)
        ));
    }

    #[test]
    fn accepts_chain_issued_by_anchor() {
        let pki = TestPki::new();
        let leaf = pki.leaf("server");
        let evaluator = WebPkiTrustEvaluator::new(vec![pki.ca.clone()]).unwrap();

        evaluator.evaluate(&leaf.chain(), &localhost()).unwrap();
        evaluator
            .evaluate(&leaf.chain(), &TrustRequest::client(UnixTime::now()))
            .unwrap();
    }

    #[test]
    fn accepts_self_signed_anchor_as_leaf() {
        let ident = self_signed("pinned");
        let evaluator = WebPkiTrustEvaluator::new(vec![ident.cert.clone()]).unwrap();
        evaluator.evaluate(&ident.chain(), &localhost()).unwrap();
    }

    #[test]
    fn rejects_unknown_issuer_with_platform_error() {
        let trusted = TestPki::new();
        let other = TestPki::new();
        let evaluator = WebPkiTrustEvaluator::new(vec![trusted.ca.clone()]).unwrap();

        let err = evaluator
            .evaluate(&other.leaf("stranger").chain(), &localhost())
            .unwrap_err();
        assert!(matches!(
            err,
            TrustError::Rejected(rustls::Error::InvalidCertificate(
                rustls::CertificateError::UnknownIssuer
            ))
        ));
    }

    #[test]
    fn duplicate_anchors_are_collapsed() {
        let ident = self_signed("dup");
        let evaluator =
            WebPkiTrustEvaluator::new(vec![ident.cert.clone(), ident.cert.clone()]).unwrap();
        assert_eq!(evaluator.accepted_issuers(), vec![ident.cert]);
    }

    #[test]
    fn reject_all_has_no_issuers() {
        let ident = self_signed("nobody");
        assert!(RejectAllTrustEvaluator
            .evaluate(&ident.chain(), &localhost())
            .is_err());
        assert!(RejectAllTrustEvaluator.accepted_issuers().is_empty());
    }
}
