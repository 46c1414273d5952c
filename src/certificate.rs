//! `Certificate`, `CertificateChain` and `PrivateKey` types.
//!
//! Certificates are validated as parseable DER-encoded X.509 at construction
//! time, and the naming fields the rest of the crate needs are extracted once.

use crate::error::CertificateError;
use pkcs8::PrivateKeyInfo;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::fmt;
use std::hash::{Hash, Hasher};
use x509_parser::oid_registry::{
    Oid, OID_X509_COMMON_NAME, OID_X509_COUNTRY_NAME, OID_X509_LOCALITY_NAME,
    OID_X509_ORGANIZATIONAL_UNIT, OID_X509_ORGANIZATION_NAME, OID_X509_STATE_OR_PROVINCE_NAME,
};
use x509_parser::prelude::{FromDer, X509Certificate, X509Name};
use zeroize::Zeroize;

/// A single DER-encoded X.509 certificate.
///
/// Identity is subject + issuer + serial number: two certificates with the
/// same triple compare equal even if their encodings differ.
#[derive(Clone)]
pub struct Certificate {
    der: CertificateDer<'static>,
    subject: String,
    issuer: String,
    serial: String,
    subject_raw: Vec<u8>,
    issuer_raw: Vec<u8>,
}

impl Certificate {
    /// Parses and validates a DER-encoded certificate.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::ParseX509Certificate`] if the bytes are not
    /// a single well-formed X.509 certificate.
    pub fn from_der(der: CertificateDer<'_>) -> Result<Self, CertificateError> {
        let der = der.into_owned();
        let (subject, issuer, serial, subject_raw, issuer_raw) = {
            let (rest, x509) = X509Certificate::from_der(der.as_ref())
                .map_err(|e| CertificateError::ParseX509Certificate(e.to_string()))?;
            if !rest.is_empty() {
                return Err(CertificateError::ParseX509Certificate(format!(
                    "{} trailing bytes after certificate",
                    rest.len()
                )));
            }
            (
                canonical_name(x509.subject()),
                canonical_name(x509.issuer()),
                hex(x509.raw_serial()),
                x509.subject().as_raw().to_vec(),
                x509.issuer().as_raw().to_vec(),
            )
        };

        Ok(Self {
            der,
            subject,
            issuer,
            serial,
            subject_raw,
            issuer_raw,
        })
    }

    /// Returns the certificate bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.der.as_ref()
    }

    /// Returns the certificate in the form rustls consumes.
    pub fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }

    /// Subject in canonical lower-cased field form, most significant field first
    /// (`cn=...,o=...,c=...`).
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Issuer in the same canonical form as [`Certificate::subject`].
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Serial number as lower-case hex.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// DER encoding of the subject `Name`, as carried in TLS CA hints.
    pub fn subject_raw(&self) -> &[u8] {
        &self.subject_raw
    }

    /// DER encoding of the issuer `Name`.
    pub fn issuer_raw(&self) -> &[u8] {
        &self.issuer_raw
    }

    /// Key store alias derived from the subject, e.g. `cn=examplecom_o=acme-corp`.
    pub fn alias(&self) -> String {
        self.subject
            .chars()
            .filter(|c| *c != '.')
            .map(|c| match c {
                ' ' => '-',
                ',' => '_',
                other => other,
            })
            .collect()
    }

    /// `true` when subject and issuer are the same name.
    pub fn is_self_issued(&self) -> bool {
        self.subject_raw == self.issuer_raw
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.subject == other.subject && self.issuer == other.issuer && self.serial == other.serial
    }
}

impl Eq for Certificate {}

impl Hash for Certificate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.subject.hash(state);
        self.issuer.hash(state);
        self.serial.hash(state);
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

impl AsRef<[u8]> for Certificate {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl TryFrom<&[u8]> for Certificate {
    type Error = CertificateError;

    fn try_from(der_bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::from_der(CertificateDer::from(der_bytes))
    }
}

impl TryFrom<Vec<u8>> for Certificate {
    type Error = CertificateError;

    fn try_from(der_bytes: Vec<u8>) -> Result<Self, Self::Error> {
        Self::from_der(CertificateDer::from(der_bytes))
    }
}

impl TryFrom<CertificateDer<'_>> for Certificate {
    type Error = CertificateError;

    fn try_from(der: CertificateDer<'_>) -> Result<Self, Self::Error> {
        Self::from_der(der)
    }
}

/// An ordered, non-empty certificate chain, leaf first.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CertificateChain(Vec<Certificate>);

impl CertificateChain {
    /// Creates a chain from certificates ordered leaf first.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::EmptyChain`] if `certificates` is empty.
    pub fn new(certificates: Vec<Certificate>) -> Result<Self, CertificateError> {
        if certificates.is_empty() {
            return Err(CertificateError::EmptyChain);
        }
        Ok(Self(certificates))
    }

    /// Builds a chain from the arguments rustls hands to a certificate verifier.
    ///
    /// # Errors
    ///
    /// Returns an error if any certificate fails to parse.
    pub fn from_rustls(
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
    ) -> Result<Self, CertificateError> {
        std::iter::once(end_entity)
            .chain(intermediates)
            .map(|der| Certificate::from_der(der.clone()))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// Parses a DER chain ordered leaf first.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain is empty or a certificate fails to parse.
    pub fn from_der_chain<I>(ders: I) -> Result<Self, CertificateError>
    where
        I: IntoIterator<Item = CertificateDer<'static>>,
    {
        let certs = ders
            .into_iter()
            .map(Certificate::from_der)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(certs)
    }

    /// The end-entity certificate.
    pub fn leaf(&self) -> &Certificate {
        &self.0[0]
    }

    /// Certificates after the leaf.
    pub fn intermediates(&self) -> &[Certificate] {
        &self.0[1..]
    }

    /// All certificates, leaf first.
    pub fn certificates(&self) -> &[Certificate] {
        &self.0
    }

    /// Number of certificates, at least one.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterates leaf first.
    pub fn iter(&self) -> std::slice::Iter<'_, Certificate> {
        self.0.iter()
    }

    /// The chain as rustls DER values.
    pub fn to_der(&self) -> Vec<CertificateDer<'static>> {
        self.0.iter().map(|c| c.der.clone()).collect()
    }
}

impl<'a> IntoIterator for &'a CertificateChain {
    type Item = &'a Certificate;
    type IntoIter = std::slice::Iter<'a, Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A DER-encoded private key in PKCS#8 format.
///
/// Invariant: instances are always validated as parseable PKCS#8.
///
/// This type is zeroized on drop.
#[derive(Clone, Eq, PartialEq, Zeroize)]
#[zeroize(drop)]
pub struct PrivateKey(Vec<u8>);

impl PrivateKey {
    /// Returns the private key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// A copy of the key in the form rustls key providers load.
    pub fn to_rustls(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.0.clone()))
    }
}

impl TryFrom<&[u8]> for PrivateKey {
    type Error = CertificateError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::try_from(bytes.to_vec())
    }
}

impl TryFrom<Vec<u8>> for PrivateKey {
    type Error = CertificateError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        PrivateKeyInfo::try_from(bytes.as_slice())
            .map_err(|e| CertificateError::DecodePkcs8(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("len", &self.0.len())
            .finish()
    }
}

/// RFC 2253 order (last RDN first), lower-cased.
fn canonical_name(name: &X509Name<'_>) -> String {
    let rdns: Vec<String> = name
        .iter()
        .map(|rdn| {
            rdn.iter()
                .map(|attr| {
                    let value = attr.as_str().map_or_else(
                        |_| format!("#{}", hex(attr.attr_value().as_bytes())),
                        |s| s.trim().to_lowercase(),
                    );
                    format!("{}={}", attribute_keyword(attr.attr_type()), value)
                })
                .collect::<Vec<_>>()
                .join("+")
        })
        .collect();

    rdns.into_iter().rev().collect::<Vec<_>>().join(",")
}

fn attribute_keyword(oid: &Oid<'_>) -> String {
    let known = [
        (&OID_X509_COMMON_NAME, "cn"),
        (&OID_X509_ORGANIZATION_NAME, "o"),
        (&OID_X509_ORGANIZATIONAL_UNIT, "ou"),
        (&OID_X509_COUNTRY_NAME, "c"),
        (&OID_X509_LOCALITY_NAME, "l"),
        (&OID_X509_STATE_OR_PROVINCE_NAME, "st"),
    ];
    known
        .iter()
        .find(|(candidate, _)| *candidate == oid)
        .map_or_else(|| oid.to_id_string(), |(_, keyword)| (*keyword).to_string())
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
