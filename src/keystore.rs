//! Key store model and the adapter seam used to load and persist it.
//!
//! The core only needs an alias-keyed collection of trusted certificates and
//! key entries, plus an adapter that can read, write and create one. The
//! bundled [`PemKeystoreAdapter`] stores everything as PEM blocks in a single
//! file.

use crate::certificate::{Certificate, CertificateChain, PrivateKey};
use crate::error::KeystoreError;
use crate::prelude::debug;
use base64::Engine as _;
use rustls_pemfile::Item;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{BufReader, Write as _};
use std::path::Path;
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

/// Key store password. Wiped from memory on drop.
pub type KeystorePassword = Zeroizing<Vec<u8>>;

/// A single key store entry.
#[derive(Clone, Debug)]
pub enum KeyStoreEntry {
    /// A certificate trusted as an anchor.
    TrustedCertificate(Certificate),
    /// A private key and the chain presented with it.
    PrivateKey {
        /// Chain, leaf first.
        chain: CertificateChain,
        /// PKCS#8 key for the leaf.
        key: PrivateKey,
    },
}

/// Alias-keyed collection of trusted certificates and key entries.
#[derive(Clone, Debug)]
pub struct KeyStore {
    store_type: String,
    entries: BTreeMap<String, KeyStoreEntry>,
}

impl KeyStore {
    /// Creates an empty key store of the given type.
    pub fn new(store_type: impl Into<String>) -> Self {
        Self {
            store_type: store_type.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Store type tag, e.g. `"PEM"`.
    pub fn store_type(&self) -> &str {
        &self.store_type
    }

    /// Inserts or replaces a trusted certificate entry.
    pub fn set_certificate_entry(&mut self, alias: impl Into<String>, cert: Certificate) {
        self.entries
            .insert(alias.into(), KeyStoreEntry::TrustedCertificate(cert));
    }

    /// Inserts or replaces a key entry.
    pub fn set_key_entry(
        &mut self,
        alias: impl Into<String>,
        chain: CertificateChain,
        key: PrivateKey,
    ) {
        self.entries
            .insert(alias.into(), KeyStoreEntry::PrivateKey { chain, key });
    }

    /// Looks up an entry.
    pub fn entry(&self, alias: &str) -> Option<&KeyStoreEntry> {
        self.entries.get(alias)
    }

    /// All aliases in sorted order.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Trusted certificates in alias order.
    pub fn trusted_certificates(&self) -> Vec<Certificate> {
        self.entries
            .values()
            .filter_map(|e| match e {
                KeyStoreEntry::TrustedCertificate(c) => Some(c.clone()),
                KeyStoreEntry::PrivateKey { .. } => None,
            })
            .collect()
    }

    /// Key entries in alias order.
    pub fn key_entries(&self) -> impl Iterator<Item = (&str, &CertificateChain, &PrivateKey)> {
        self.entries.iter().filter_map(|(alias, e)| match e {
            KeyStoreEntry::PrivateKey { chain, key } => Some((alias.as_str(), chain, key)),
            KeyStoreEntry::TrustedCertificate(_) => None,
        })
    }

    /// `true` if `cert` is held as a trusted certificate under any alias.
    pub fn contains_certificate(&self, cert: &Certificate) -> bool {
        self.entries
            .values()
            .any(|e| matches!(e, KeyStoreEntry::TrustedCertificate(c) if c == cert))
    }

    /// Alias for `cert` that does not clash with a different certificate.
    pub(crate) fn free_alias_for(&self, cert: &Certificate) -> String {
        let alias = cert.alias();
        match self.entries.get(&alias) {
            Some(KeyStoreEntry::TrustedCertificate(existing)) if existing == cert => alias,
            None => alias,
            Some(_) => format!("{alias}_{}", cert.serial()),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Loads, stores and creates key stores.
///
/// Implementations own the file format and password handling.
pub trait KeystoreAdapter: fmt::Debug + Send + Sync {
    /// Loads the key store at `location`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoreError::NotFound`] when nothing exists at `location`;
    /// callers treat that as an empty store.
    fn load(
        &self,
        location: &Path,
        password: &KeystorePassword,
        store_type: &str,
    ) -> Result<KeyStore, KeystoreError>;

    /// Writes `keystore` to `location`, replacing what is there.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be encoded or written.
    fn store(
        &self,
        keystore: &KeyStore,
        location: &Path,
        password: &KeystorePassword,
        store_type: &str,
    ) -> Result<(), KeystoreError>;

    /// Creates a new empty key store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store type is not supported.
    fn create_empty(&self, store_type: &str) -> Result<KeyStore, KeystoreError>;
}

/// Store type handled by [`PemKeystoreAdapter`].
pub const PEM_STORE_TYPE: &str = "PEM";

/// Unencrypted PEM key store.
///
/// Key entries are written first as the chain followed by a `PRIVATE KEY`
/// block; trusted certificates follow as bare `CERTIFICATE` blocks. Aliases are
/// derived from certificate subjects on load. The password is accepted for
/// interface compatibility and not used.
#[derive(Clone, Copy, Debug, Default)]
pub struct PemKeystoreAdapter;

impl PemKeystoreAdapter {
    fn check_type(store_type: &str) -> Result<(), KeystoreError> {
        if store_type.eq_ignore_ascii_case(PEM_STORE_TYPE) {
            Ok(())
        } else {
            Err(KeystoreError::UnsupportedStoreType(store_type.to_string()))
        }
    }
}

impl KeystoreAdapter for PemKeystoreAdapter {
    fn load(
        &self,
        location: &Path,
        _password: &KeystorePassword,
        store_type: &str,
    ) -> Result<KeyStore, KeystoreError> {
        Self::check_type(store_type)?;

        let file = std::fs::File::open(location).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => KeystoreError::NotFound(location.to_path_buf()),
            _ => KeystoreError::Io {
                path: location.to_path_buf(),
                source: e,
            },
        })?;

        let malformed = |reason: String| KeystoreError::Malformed {
            path: location.to_path_buf(),
            reason,
        };

        let mut keystore = KeyStore::new(PEM_STORE_TYPE);
        let mut pending: Vec<Certificate> = Vec::new();

        for item in rustls_pemfile::read_all(&mut BufReader::new(file)) {
            let item = item.map_err(|e| malformed(e.to_string()))?;
            match item {
                Item::X509Certificate(der) => {
                    pending.push(Certificate::from_der(der).map_err(|e| malformed(e.to_string()))?);
                }
                Item::Pkcs8Key(key) => {
                    let chain = CertificateChain::new(std::mem::take(&mut pending))
                        .map_err(|_| malformed("private key without certificate chain".into()))?;
                    let alias = chain.leaf().alias();
                    let key = PrivateKey::try_from(key.secret_pkcs8_der())
                        .map_err(|_| KeystoreError::UnsupportedKey(alias.clone()))?;
                    keystore.set_key_entry(alias, chain, key);
                }
                Item::Pkcs1Key(_) | Item::Sec1Key(_) => {
                    let alias = pending.first().map(Certificate::alias).unwrap_or_default();
                    return Err(KeystoreError::UnsupportedKey(alias));
                }
                // CRLs and CSRs carry nothing this store models.
                _ => {}
            }
        }

        for cert in pending {
            let alias = keystore.free_alias_for(&cert);
            keystore.set_certificate_entry(alias, cert);
        }

        debug!(
            "loaded {} key store entries from {}",
            keystore.len(),
            location.display()
        );
        Ok(keystore)
    }

    fn store(
        &self,
        keystore: &KeyStore,
        location: &Path,
        _password: &KeystorePassword,
        store_type: &str,
    ) -> Result<(), KeystoreError> {
        Self::check_type(store_type)?;

        let io_err = |source: std::io::Error| KeystoreError::Io {
            path: location.to_path_buf(),
            source,
        };

        let dir = match location.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                std::fs::create_dir_all(parent).map_err(io_err)?;
                parent
            }
            None => Path::new("."),
        };

        let mut out = String::new();
        for (_, chain, key) in keystore.key_entries() {
            for cert in chain {
                push_pem(&mut out, "CERTIFICATE", cert.as_bytes());
            }
            push_pem(&mut out, "PRIVATE KEY", key.as_bytes());
        }
        for cert in keystore.trusted_certificates() {
            push_pem(&mut out, "CERTIFICATE", cert.as_bytes());
        }

        let out = Zeroizing::new(out);

        // Readers see the old store or the new one, never a partial write.
        let mut staged = NamedTempFile::new_in(dir).map_err(io_err)?;
        staged.write_all(out.as_bytes()).map_err(io_err)?;
        staged.as_file().sync_all().map_err(io_err)?;
        staged.persist(location).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    fn create_empty(&self, store_type: &str) -> Result<KeyStore, KeystoreError> {
        Self::check_type(store_type)?;
        Ok(KeyStore::new(PEM_STORE_TYPE))
    }
}

fn push_pem(out: &mut String, label: &str, der: &[u8]) {
    let encoded = Zeroizing::new(base64::engine::general_purpose::STANDARD.encode(der));
    out.push_str("-----BEGIN ");
    out.push_str(label);
    out.push_str("-----\n");
    for line in encoded.as_bytes().chunks(64) {
        // base64 output is ASCII.
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.push_str("-----END ");
    out.push_str(label);
    out.push_str("-----\n");
}
