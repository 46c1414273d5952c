use super::{matches_issuer_hints, supports_schemes, IdentitySelector, SelectionRequest};
use crate::certificate::{CertificateChain, PrivateKey};
use crate::error::{ConfigurationError, Result};
use crate::keystore::KeyStore;
use crate::material::certified_key_from_chain_and_key;
use rustls::crypto::CryptoProvider;
use rustls::sign::CertifiedKey;
use std::fmt;
use std::sync::Arc;

struct IdentityEntry {
    alias: String,
    chain: CertificateChain,
    key: Arc<CertifiedKey>,
}

/// Presents the key entries of a [`KeyStore`].
///
/// An alias is a candidate when its key can sign with one of the peer's
/// schemes and, if the peer sent issuer hints, its chain carries one of those
/// issuers. Candidates keep alias order.
pub struct KeyStoreIdentitySelector {
    entries: Vec<IdentityEntry>,
}

impl KeyStoreIdentitySelector {
    /// Loads every key entry of `keystore` with the process default provider.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MissingIdentityMaterial`] if the store
    /// has no key entries, or [`crate::Error::CertifiedKey`] if a key cannot be
    /// loaded.
    pub fn from_keystore(keystore: &KeyStore) -> Result<Self> {
        Self::from_keystore_with_provider(keystore, &crate::crypto::default_provider())
    }

    /// Same as [`from_keystore`](Self::from_keystore) with an explicit provider.
    ///
    /// # Errors
    ///
    /// See [`from_keystore`](Self::from_keystore).
    pub fn from_keystore_with_provider(
        keystore: &KeyStore,
        provider: &CryptoProvider,
    ) -> Result<Self> {
        Self::with_provider(
            keystore
                .key_entries()
                .map(|(alias, chain, key)| (alias.to_string(), chain.clone(), key.clone())),
            provider,
        )
    }

    /// Builds a selector from explicit `(alias, chain, key)` entries.
    ///
    /// # Errors
    ///
    /// See [`from_keystore`](Self::from_keystore).
    pub fn new<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, CertificateChain, PrivateKey)>,
    {
        Self::with_provider(entries, &crate::crypto::default_provider())
    }

    /// Same as [`new`](Self::new) with an explicit provider.
    ///
    /// # Errors
    ///
    /// See [`from_keystore`](Self::from_keystore).
    pub fn with_provider<I>(entries: I, provider: &CryptoProvider) -> Result<Self>
    where
        I: IntoIterator<Item = (String, CertificateChain, PrivateKey)>,
    {
        let entries = entries
            .into_iter()
            .map(|(alias, chain, key)| {
                let certified = certified_key_from_chain_and_key(&chain, &key, provider)?;
                Ok(IdentityEntry {
                    alias,
                    chain,
                    key: certified,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if entries.is_empty() {
            return Err(ConfigurationError::MissingIdentityMaterial.into());
        }
        Ok(Self { entries })
    }

    fn entry(&self, alias: &str) -> Option<&IdentityEntry> {
        self.entries.iter().find(|e| e.alias == alias)
    }

    fn candidates(&self, request: &SelectionRequest<'_>) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| supports_schemes(&e.key, request.sigschemes()))
            .filter(|e| matches_issuer_hints(&e.chain, request.issuer_hints()))
            .map(|e| e.alias.clone())
            .collect()
    }
}

impl fmt::Debug for KeyStoreIdentitySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStoreIdentitySelector")
            .field(
                "aliases",
                &self.entries.iter().map(|e| e.alias.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl IdentitySelector for KeyStoreIdentitySelector {
    fn aliases(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.alias.clone()).collect()
    }

    fn certified_key(&self, alias: &str) -> Option<Arc<CertifiedKey>> {
        self.entry(alias).map(|e| Arc::clone(&e.key))
    }

    fn certificate_chain(&self, alias: &str) -> Option<CertificateChain> {
        self.entry(alias).map(|e| e.chain.clone())
    }

    fn client_candidates(&self, request: &SelectionRequest<'_>) -> Vec<String> {
        self.candidates(request)
    }

    fn server_candidates(&self, request: &SelectionRequest<'_>) -> Vec<String> {
        self.candidates(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::keystore::PEM_STORE_TYPE;
    use crate::test_support::{ensure_provider, self_signed, TestPki};
    use rustls::SignatureScheme;

    #[test]
    fn exposes_key_entries_in_alias_order() {
        ensure_provider();
        let mut ks = KeyStore::new(PEM_STORE_TYPE);
        let b = self_signed("b");
        let a = self_signed("a");
        ks.set_key_entry("bravo", b.chain(), b.key.clone());
        ks.set_key_entry("alpha", a.chain(), a.key.clone());
        ks.set_certificate_entry("trusted-only", self_signed("t").cert);

        let selector = KeyStoreIdentitySelector::from_keystore(&ks).unwrap();
        assert_eq!(selector.aliases(), vec!["alpha", "bravo"]);
        assert_eq!(selector.certificate_chain("alpha"), Some(a.chain()));
        assert!(selector.certified_key("trusted-only").is_none());
    }

    #[test]
    fn empty_keystore_is_missing_identity() {
        ensure_provider();
        let err = KeyStoreIdentitySelector::from_keystore(&KeyStore::new(PEM_STORE_TYPE))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::MissingIdentityMaterial)
        ));
    }

    #[test]
    fn issuer_hints_pick_the_matching_identity() {
        ensure_provider();
        let first = TestPki::new();
        let second = TestPki::new();
        let one = first.leaf("one");
        let two = second.leaf("two");
        let selector = KeyStoreIdentitySelector::new([
            ("one".to_string(), one.chain(), one.key.clone()),
            ("two".to_string(), two.chain(), two.key.clone()),
        ])
        .unwrap();

        let hint = second.ca.subject_raw();
        let hints = [hint];
        let request = SelectionRequest::new(&[]).with_issuer_hints(&hints);
        assert_eq!(selector.client_candidates(&request), vec!["two"]);

        let (alias, key) = selector.select_client(&request).unwrap();
        assert_eq!(alias, "two");
        assert_eq!(key.end_entity_cert().unwrap(), two.cert.der());

        let unhinted = SelectionRequest::new(&[]);
        assert_eq!(selector.choose_server_alias(&unhinted).as_deref(), Some("one"));
    }

    #[test]
    fn unsupported_schemes_yield_no_candidate() {
        ensure_provider();
        let ident = self_signed("only-ecdsa");
        let selector =
            KeyStoreIdentitySelector::new([("only".to_string(), ident.chain(), ident.key.clone())])
                .unwrap();
        let request = SelectionRequest::new(&[SignatureScheme::RSA_PKCS1_SHA256]);
        assert!(selector.select_server(&request).is_none());
    }
}
