//! rustls certificate verifier over a [`TrustEvaluator`](crate::TrustEvaluator).

use crate::certificate::CertificateChain;
use crate::context::ClientAuth;
use crate::error::TrustError;
use crate::prelude::debug;
use crate::trust::{TrustEvaluator, TrustRequest};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, SignatureScheme};
use std::fmt;
use std::sync::Arc;

/// Plugs any [`TrustEvaluator`] into rustls as a server or client certificate verifier.
///
/// Chain decisions go to the evaluator on every handshake, so a hot-swapped
/// evaluator takes effect without rebuilding the verifier. Handshake
/// signatures are checked with the crypto provider's algorithms.
///
/// Rejections from the platform verifier reach rustls unchanged so the peer
/// gets a precise alert. Other failures are wrapped in
/// [`rustls::Error::Other`] with the full [`TrustError`] as the cause.
#[derive(Clone)]
pub struct TrustVerifier {
    evaluator: Arc<dyn TrustEvaluator>,
    provider: Arc<CryptoProvider>,
    client_auth: ClientAuth,
    root_hints: Vec<DistinguishedName>,
}

impl TrustVerifier {
    /// A verifier using the process default crypto provider.
    pub fn new(evaluator: Arc<dyn TrustEvaluator>) -> Self {
        Self::with_provider(evaluator, crate::crypto::default_provider())
    }

    /// A verifier checking signatures with `provider`.
    pub fn with_provider(evaluator: Arc<dyn TrustEvaluator>, provider: Arc<CryptoProvider>) -> Self {
        Self {
            evaluator,
            provider,
            client_auth: ClientAuth::Required,
            root_hints: Vec::new(),
        }
    }

    /// Sets how client certificates are requested when verifying clients.
    ///
    /// The CA names sent to clients are taken from the evaluator's accepted
    /// issuers at this point.
    #[must_use]
    pub fn with_client_auth(mut self, client_auth: ClientAuth) -> Self {
        self.client_auth = client_auth;
        self.root_hints = self
            .evaluator
            .accepted_issuers()
            .iter()
            .map(|issuer| DistinguishedName::from(issuer.subject_raw().to_vec()))
            .collect();
        self
    }

    /// The evaluator decisions are delegated to.
    pub fn evaluator(&self) -> &Arc<dyn TrustEvaluator> {
        &self.evaluator
    }

    fn evaluate(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        request: &TrustRequest,
    ) -> Result<(), rustls::Error> {
        let chain = CertificateChain::from_rustls(end_entity, intermediates).map_err(|e| {
            debug!("peer chain does not parse: {e}");
            rustls::Error::InvalidCertificate(rustls::CertificateError::BadEncoding)
        })?;

        self.evaluator.evaluate(&chain, request).map_err(|e| {
            debug!("peer [{}] rejected: {e}", chain.leaf().subject());
            into_rustls(e)
        })
    }
}

fn into_rustls(e: TrustError) -> rustls::Error {
    match e {
        TrustError::Rejected(platform) => platform,
        other => other_err(other),
    }
}

fn other_err<E>(e: E) -> rustls::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rustls::Error::Other(rustls::OtherError(Arc::new(e)))
}

impl fmt::Debug for TrustVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustVerifier")
            .field("evaluator", &self.evaluator)
            .field("client_auth", &self.client_auth)
            .field("root_hints", &self.root_hints.len())
            .finish_non_exhaustive()
    }
}

impl ServerCertVerifier for TrustVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let request =
            TrustRequest::server(server_name.to_owned(), now).with_ocsp_response(ocsp_response);
        self.evaluate(end_entity, intermediates, &request)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

impl ClientCertVerifier for TrustVerifier {
    fn offer_client_auth(&self) -> bool {
        self.client_auth != ClientAuth::None
    }

    fn client_auth_mandatory(&self) -> bool {
        self.client_auth == ClientAuth::Required
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &self.root_hints
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        self.evaluate(end_entity, intermediates, &TrustRequest::client(now))?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
