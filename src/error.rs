//! Error types for trust decisions, configuration and key store access.

use std::fmt;
use std::path::PathBuf;

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error returned by builders, contexts and the reload entry point.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A trust decision failed.
    #[error(transparent)]
    Trust(#[from] TrustError),

    /// The requested operation needs a capability the configuration lacks.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Loading or storing key material failed.
    #[error(transparent)]
    Keystore(#[from] KeystoreError),

    /// A certificate could not be parsed.
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// Failed to create a `rustls::sign::CertifiedKey` from key store material.
    #[error("failed building rustls certified key: {0}")]
    CertifiedKey(String),

    /// A rustls error occurred.
    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),

    /// Internal error.
    #[error("internal: {0}")]
    Internal(String),
}

/// A primary error together with the secondary failures collected alongside it.
///
/// [`std::error::Error::source`] yields the primary cause; the secondary
/// causes are available through [`Suppressed::suppressed`] in the order they
/// were observed.
#[derive(Debug, Clone)]
pub struct Suppressed<E> {
    primary: Box<E>,
    suppressed: Vec<E>,
}

impl<E> Suppressed<E> {
    /// Creates an aggregate with `primary` as the main cause.
    pub fn new(primary: E, suppressed: Vec<E>) -> Self {
        Self {
            primary: Box::new(primary),
            suppressed,
        }
    }

    /// Splits a non-empty list into the first error and the rest.
    ///
    /// Returns `None` when `errors` is empty.
    pub fn from_errors(errors: Vec<E>) -> Option<Self> {
        let mut iter = errors.into_iter();
        let primary = iter.next()?;
        Some(Self::new(primary, iter.collect()))
    }

    /// The first failure.
    pub fn primary(&self) -> &E {
        &self.primary
    }

    /// Consumes the aggregate, keeping only the first failure.
    pub fn into_primary(self) -> E {
        *self.primary
    }

    /// Every other failure, in observation order.
    pub fn suppressed(&self) -> &[E] {
        &self.suppressed
    }

    /// Total number of failures carried.
    pub fn len(&self) -> usize {
        1 + self.suppressed.len()
    }

    /// Always `false`; an aggregate holds at least its primary cause.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl<E: fmt::Display> fmt::Display for Suppressed<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary)?;
        for e in &self.suppressed {
            write!(f, "; suppressed: {e}")?;
        }
        Ok(())
    }
}

impl<E> std::error::Error for Suppressed<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.primary.as_ref())
    }
}

/// A peer certificate chain was not accepted.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum TrustError {
    /// The platform verifier rejected the chain.
    #[error("certificate chain rejected: {0}")]
    Rejected(rustls::Error),

    /// Every member of a composite evaluator rejected the chain.
    #[error("certificate chain rejected by {} trust evaluators: {}", .0.len(), .0)]
    AllRejected(#[source] Suppressed<TrustError>),

    /// The peer presented a certificate that could not be parsed.
    #[error("peer certificate is malformed: {0}")]
    MalformedCertificate(String),

    /// The trust decision predicate panicked.
    #[error("trust decision predicate panicked")]
    PredicateFailed,

    /// Internal error.
    #[error("internal: {0}")]
    Internal(String),
}

impl TrustError {
    /// The platform error behind this rejection, if it came from one.
    pub fn as_rustls(&self) -> Option<&rustls::Error> {
        match self {
            Self::Rejected(e) => Some(e),
            Self::AllRejected(all) => all.primary().as_rustls(),
            _ => None,
        }
    }
}

/// A component was configured in a way that cannot work.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// A trust evaluator was built over zero trust anchors.
    #[error("trust anchors must be non-empty")]
    NoTrustAnchors,

    /// A trust anchor was refused by the platform verifier.
    #[error("trust anchor {subject} is not usable: {source}")]
    InvalidTrustAnchor {
        /// Canonical subject of the refused certificate.
        subject: String,
        /// Platform error.
        #[source]
        source: rustls::Error,
    },

    /// The platform verifier builder failed.
    #[error("failed building platform verifier: {0}")]
    VerifierBuilder(String),

    /// A composite evaluator or selector was given no members.
    #[error("a composite {0} needs at least one member")]
    EmptyComposite(&'static str),

    /// Several composite members failed to build.
    #[error("{} composite members failed to build: {}", .0.len(), .0)]
    Members(#[source] Suppressed<ConfigurationError>),

    /// A context without trust material was asked for a client configuration.
    #[error("no trust material configured")]
    MissingTrustMaterial,

    /// A context without identity material was asked for a server configuration.
    #[error("no identity material configured")]
    MissingIdentityMaterial,

    /// Reload targeted material that was not built swappable.
    #[error("{0} material of the target context is not swappable")]
    NotSwappable(&'static str),

    /// An identity route names an alias the identity material does not hold.
    #[error("identity route alias {0:?} is not present in the identity material")]
    UnknownRouteAlias(String),

    /// An identity route destination could not be parsed.
    #[error("invalid identity route destination {destination:?}: {reason}")]
    InvalidRoute {
        /// The rejected destination text.
        destination: String,
        /// Parser message.
        reason: String,
    },

    /// A destination host is not a valid TLS server name.
    #[error("{0:?} is not a valid server name")]
    InvalidServerName(String),

    /// None of the requested cipher suites are offered by the crypto provider.
    #[error("unsupported cipher suite(s): {0}")]
    UnsupportedCipherSuites(String),

    /// No protocol versions were requested.
    #[error("at least one protocol version must be enabled")]
    NoProtocolVersions,
}

/// Errors raised by a [`crate::KeystoreAdapter`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum KeystoreError {
    /// Nothing exists at the requested location.
    #[error("key store not found at {0}")]
    NotFound(PathBuf),

    /// The adapter does not handle this store type.
    #[error("unsupported key store type {0:?}")]
    UnsupportedStoreType(String),

    /// The key store content is malformed.
    #[error("malformed key store at {path}: {reason}")]
    Malformed {
        /// Key store location.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// The private key is not PKCS#8.
    #[error("private key for alias {0:?} is not a PKCS#8 key")]
    UnsupportedKey(String),

    /// The underlying file operation failed.
    #[error("key store I/O error at {path}: {source}")]
    Io {
        /// Key store location.
        path: PathBuf,
        /// I/O failure.
        #[source]
        source: std::io::Error,
    },
}

/// An error that may arise parsing X.509 certificates and PKCS#8 keys.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CertificateError {
    /// Error returned by the X.509 parsing library.
    #[error("failed parsing X.509 certificate: {0}")]
    ParseX509Certificate(String),

    /// A certificate chain must hold at least the leaf.
    #[error("certificate chain is empty")]
    EmptyChain,

    /// Error returned by the PKCS#8 decoding library.
    #[error("failed decoding PKCS#8 private key: {0}")]
    DecodePkcs8(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    fn rejected(e: rustls::CertificateError) -> TrustError {
        TrustError::Rejected(rustls::Error::InvalidCertificate(e))
    }

    #[test]
    fn suppressed_source_is_primary() {
        let agg = Suppressed::new(
            rejected(rustls::CertificateError::UnknownIssuer),
            vec![rejected(rustls::CertificateError::Expired)],
        );
        let source = agg.source().expect("primary cause");
        let primary = source
            .downcast_ref::<TrustError>()
            .expect("source is a TrustError");
        assert!(matches!(
            primary.as_rustls(),
            Some(rustls::Error::InvalidCertificate(
                rustls::CertificateError::UnknownIssuer
            ))
        ));
        assert_eq!(agg.len(), 2);
        assert_eq!(agg.suppressed().len(), 1);
    }

    #[test]
    fn from_errors_on_empty_is_none() {
        assert!(Suppressed::<TrustError>::from_errors(Vec::new()).is_none());
    }

    #[test]
    fn all_rejected_message_counts_members() {
        let err = TrustError::AllRejected(Suppressed::new(
            rejected(rustls::CertificateError::UnknownIssuer),
            vec![
                rejected(rustls::CertificateError::Expired),
                rejected(rustls::CertificateError::NotValidYet),
            ],
        ));
        let msg = err.to_string();
        assert!(msg.starts_with("certificate chain rejected by 3 trust evaluators"), "{msg}");
        assert!(msg.contains("suppressed"), "{msg}");
    }

    #[test]
    fn members_message_counts_failures() {
        let err = ConfigurationError::Members(Suppressed::new(
            ConfigurationError::NoTrustAnchors,
            vec![ConfigurationError::EmptyComposite("trust evaluator")],
        ));
        let msg = err.to_string();
        assert!(msg.starts_with("2 composite members failed to build: "), "{msg}");
        assert!(msg.contains("trust anchors must be non-empty"), "{msg}");
    }
}
