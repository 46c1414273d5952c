//! A TLS context whose trust and identity are read at connection time.
//!
//! [`TlsContext`] hands out rustls configurations. Verifiers, resolvers and
//! session stores inside those configurations are shared `Arc`s owned by the
//! context, and they consult the context's (possibly hot-swapped) trust and
//! identity material on every handshake. Swapping material therefore affects
//! configurations that were already handed out.

use crate::certificate::{Certificate, CertificateChain, PrivateKey};
use crate::error::{ConfigurationError, Error, Result};
use crate::identity::{
    CompositeIdentitySelector, Destination, IdentityRoute, IdentityRouter, IdentitySelector,
    KeyStoreIdentitySelector,
};
use crate::keystore::KeyStore;
use crate::prelude::debug;
use crate::resolve::{ClientIdentityResolver, ServerIdentityResolver};
use crate::session::{ClientSessionCache, ServerSessionCache, DEFAULT_SESSION_CACHE_SIZE};
use crate::swap::HotSwappable;
use crate::sync::{lock_mutex, Mutex};
use crate::trust::{
    CompositeTrustEvaluator, InflatableTrustEvaluator, TrustEvaluator, WebPkiTrustEvaluator,
};
use crate::verifier::TrustVerifier;
use arc_swap::ArcSwap;
use rustls::client::{ClientSessionStore, Resumption};
use rustls::crypto::CryptoProvider;
use rustls::server::{ProducesTickets, StoresServerSessions};
use rustls::{CipherSuite, ClientConfig, ProtocolVersion, ServerConfig, SupportedProtocolVersion};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Upper bound on the per-destination client resolvers a context keeps.
const MAX_CLIENT_RESOLVERS: usize = 1024;

/// Whether a server asks connecting clients for a certificate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientAuth {
    /// Clients are not asked for a certificate.
    #[default]
    None,
    /// Clients may present a certificate; if they do, it must be trusted.
    Optional,
    /// Clients must present a trusted certificate.
    Required,
}

/// How a context holds its trust evaluator.
#[derive(Clone, Debug)]
pub enum TrustMaterial {
    /// Fixed for the context's lifetime.
    Fixed(Arc<dyn TrustEvaluator>),
    /// Replaceable through a [`crate::ReloadCoordinator`].
    Swappable(Arc<HotSwappable<dyn TrustEvaluator>>),
}

impl TrustMaterial {
    /// An evaluator that always reads the current material.
    pub fn evaluator(&self) -> Arc<dyn TrustEvaluator> {
        match self {
            Self::Fixed(evaluator) => Arc::clone(evaluator),
            Self::Swappable(swappable) => Arc::clone(swappable) as Arc<dyn TrustEvaluator>,
        }
    }

    /// The evaluator in effect right now.
    pub fn current(&self) -> Arc<dyn TrustEvaluator> {
        match self {
            Self::Fixed(evaluator) => Arc::clone(evaluator),
            Self::Swappable(swappable) => swappable.get(),
        }
    }

    /// `true` for [`TrustMaterial::Swappable`].
    pub fn is_swappable(&self) -> bool {
        matches!(self, Self::Swappable(_))
    }
}

/// How a context holds its identity selector.
#[derive(Clone, Debug)]
pub enum IdentityMaterial {
    /// Fixed for the context's lifetime.
    Fixed(Arc<dyn IdentitySelector>),
    /// Replaceable through a [`crate::ReloadCoordinator`].
    Swappable(Arc<HotSwappable<dyn IdentitySelector>>),
}

impl IdentityMaterial {
    /// A selector that always reads the current material.
    pub fn selector(&self) -> Arc<dyn IdentitySelector> {
        match self {
            Self::Fixed(selector) => Arc::clone(selector),
            Self::Swappable(swappable) => Arc::clone(swappable) as Arc<dyn IdentitySelector>,
        }
    }

    /// The selector in effect right now.
    pub fn current(&self) -> Arc<dyn IdentitySelector> {
        match self {
            Self::Fixed(selector) => Arc::clone(selector),
            Self::Swappable(swappable) => swappable.get(),
        }
    }

    /// `true` for [`IdentityMaterial::Swappable`].
    pub fn is_swappable(&self) -> bool {
        matches!(self, Self::Swappable(_))
    }
}

/// Protocol settings read whenever a configuration is produced.
#[derive(Clone, Debug)]
pub struct TlsParameters {
    protocol_versions: Vec<&'static SupportedProtocolVersion>,
    cipher_suites: Option<Vec<CipherSuite>>,
    alpn_protocols: Vec<Vec<u8>>,
}

impl Default for TlsParameters {
    fn default() -> Self {
        Self {
            protocol_versions: rustls::DEFAULT_VERSIONS.to_vec(),
            cipher_suites: None,
            alpn_protocols: Vec::new(),
        }
    }
}

impl TlsParameters {
    /// Enabled protocol versions, preferred first.
    pub fn protocol_versions(&self) -> Vec<ProtocolVersion> {
        self.protocol_versions.iter().map(|v| v.version).collect()
    }

    /// Cipher-suite allow-list; `None` means everything the provider offers.
    pub fn cipher_suites(&self) -> Option<&[CipherSuite]> {
        self.cipher_suites.as_deref()
    }

    /// ALPN protocols, preferred first.
    pub fn alpn_protocols(&self) -> &[Vec<u8>] {
        &self.alpn_protocols
    }

    /// `base` restricted to the allowed cipher suites.
    pub(crate) fn provider_for(
        &self,
        base: &Arc<CryptoProvider>,
    ) -> std::result::Result<Arc<CryptoProvider>, ConfigurationError> {
        if self.protocol_versions.is_empty() {
            return Err(ConfigurationError::NoProtocolVersions);
        }
        let Some(allowed) = &self.cipher_suites else {
            return Ok(Arc::clone(base));
        };

        let mut provider = CryptoProvider::clone(base);
        provider
            .cipher_suites
            .retain(|suite| allowed.contains(&suite.suite()));
        if provider.cipher_suites.is_empty() {
            return Err(ConfigurationError::UnsupportedCipherSuites(format!(
                "{allowed:?}"
            )));
        }
        Ok(Arc::new(provider))
    }
}

/// Cheaply cloneable handle to a TLS context.
///
/// Built with [`TlsContext::builder`]. Clones share material, session caches
/// and resolvers.
#[derive(Clone, Debug)]
pub struct TlsContext {
    inner: Arc<Inner>,
}

struct Inner {
    trust: Option<TrustMaterial>,
    identity: Option<IdentityMaterial>,
    parameters: ArcSwap<TlsParameters>,
    client_auth: ClientAuth,
    provider: Arc<CryptoProvider>,
    client_verifier: Option<Arc<TrustVerifier>>,
    client_resolvers: Mutex<HashMap<Destination, Arc<ClientIdentityResolver>>>,
    server_resolver: Option<Arc<ServerIdentityResolver>>,
    client_sessions: Arc<ClientSessionCache>,
    server_sessions: Arc<ServerSessionCache>,
    ticketer: Option<Arc<dyn ProducesTickets>>,
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("trust", &self.trust)
            .field("identity", &self.identity)
            .field("parameters", &self.parameters.load_full())
            .field("client_auth", &self.client_auth)
            .field("client_sessions", &self.client_sessions)
            .field("server_sessions", &self.server_sessions)
            .field("ticketer", &self.ticketer.is_some())
            .finish_non_exhaustive()
    }
}

impl TlsContext {
    /// Starts a builder.
    pub fn builder() -> TlsContextBuilder {
        TlsContextBuilder::default()
    }

    /// Client configuration for connecting to `destination`.
    ///
    /// Every call returns a new `ClientConfig` with the current parameters,
    /// but the verifier, the resolver for `destination` and the session store
    /// are the same across calls, so sessions resume across calls and reloads.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MissingTrustMaterial`] if the context has
    /// no trust material, or an error if the current parameters are unusable.
    pub fn client_config(&self, destination: &Destination) -> Result<Arc<ClientConfig>> {
        let verifier = self
            .inner
            .client_verifier
            .as_ref()
            .ok_or(ConfigurationError::MissingTrustMaterial)?;
        let parameters = self.inner.parameters.load_full();
        let provider = parameters.provider_for(&self.inner.provider)?;
        let resolver = self.client_resolver(destination)?;

        let mut config = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&parameters.protocol_versions)?
            .dangerous()
            .with_custom_certificate_verifier(Arc::clone(verifier) as _)
            .with_client_cert_resolver(resolver);

        config.alpn_protocols.clone_from(&parameters.alpn_protocols);
        config.resumption = Resumption::store(
            Arc::clone(&self.inner.client_sessions) as Arc<dyn ClientSessionStore>
        );
        Ok(Arc::new(config))
    }

    /// Server configuration for the next accepted connection.
    ///
    /// Build one per connection (or per reload) so the CA names offered to
    /// clients follow the current trust material. The certificate resolver
    /// and session storage are shared by every configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MissingIdentityMaterial`] if the context
    /// has no identity material, or an error if the current parameters are
    /// unusable.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>> {
        let resolver = self
            .inner
            .server_resolver
            .as_ref()
            .ok_or(ConfigurationError::MissingIdentityMaterial)?;
        let parameters = self.inner.parameters.load_full();
        let provider = parameters.provider_for(&self.inner.provider)?;

        let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(&parameters.protocol_versions)?;
        let builder = match (self.inner.client_auth, &self.inner.trust) {
            (ClientAuth::None, _) => builder.with_no_client_auth(),
            (client_auth, Some(trust)) => builder.with_client_cert_verifier(Arc::new(
                TrustVerifier::with_provider(trust.evaluator(), provider)
                    .with_client_auth(client_auth),
            )),
            (_, None) => return Err(ConfigurationError::MissingTrustMaterial.into()),
        };

        let mut config = builder.with_cert_resolver(Arc::clone(resolver) as _);
        config.alpn_protocols.clone_from(&parameters.alpn_protocols);
        config.session_storage =
            Arc::clone(&self.inner.server_sessions) as Arc<dyn StoresServerSessions>;
        if let Some(ticketer) = &self.inner.ticketer {
            config.ticketer = Arc::clone(ticketer);
        }
        Ok(Arc::new(config))
    }

    fn client_resolver(&self, destination: &Destination) -> Result<Arc<ClientIdentityResolver>> {
        let mut resolvers = lock_mutex(&self.inner.client_resolvers)
            .map_err(|()| Error::Internal("client resolver mutex poisoned".into()))?;
        // Starting over costs dropped destinations one full handshake each.
        if resolvers.len() >= MAX_CLIENT_RESOLVERS && !resolvers.contains_key(destination) {
            debug!("client resolver cache full ({MAX_CLIENT_RESOLVERS}); clearing");
            resolvers.clear();
        }
        let resolver = resolvers.entry(destination.clone()).or_insert_with(|| {
            Arc::new(ClientIdentityResolver::new(
                self.inner.identity.as_ref().map(IdentityMaterial::selector),
                destination.clone(),
            ))
        });
        Ok(Arc::clone(resolver))
    }

    /// Trust material, if any.
    pub fn trust_material(&self) -> Option<&TrustMaterial> {
        self.inner.trust.as_ref()
    }

    /// Identity material, if any.
    pub fn identity_material(&self) -> Option<&IdentityMaterial> {
        self.inner.identity.as_ref()
    }

    /// Live view of the trust evaluator.
    pub fn trust_evaluator(&self) -> Option<Arc<dyn TrustEvaluator>> {
        self.inner.trust.as_ref().map(TrustMaterial::evaluator)
    }

    /// Live view of the identity selector.
    pub fn identity_selector(&self) -> Option<Arc<dyn IdentitySelector>> {
        self.inner.identity.as_ref().map(IdentityMaterial::selector)
    }

    /// Current protocol settings.
    pub fn parameters(&self) -> Arc<TlsParameters> {
        self.inner.parameters.load_full()
    }

    pub(crate) fn set_parameters(&self, parameters: Arc<TlsParameters>) {
        self.inner.parameters.store(parameters);
    }

    /// Crypto provider configurations are built from.
    pub fn crypto_provider(&self) -> &Arc<CryptoProvider> {
        &self.inner.provider
    }

    /// Client certificate policy of server configurations.
    pub fn client_auth(&self) -> ClientAuth {
        self.inner.client_auth
    }

    /// `true` if trust material can be replaced by a reload.
    pub fn is_trust_swappable(&self) -> bool {
        self.inner.trust.as_ref().is_some_and(TrustMaterial::is_swappable)
    }

    /// `true` if identity material can be replaced by a reload.
    pub fn is_identity_swappable(&self) -> bool {
        self.inner
            .identity
            .as_ref()
            .is_some_and(IdentityMaterial::is_swappable)
    }

    /// Session store shared by every client configuration.
    pub fn client_sessions(&self) -> &Arc<ClientSessionCache> {
        &self.inner.client_sessions
    }

    /// Session storage shared by every server configuration.
    pub fn server_sessions(&self) -> &Arc<ServerSessionCache> {
        &self.inner.server_sessions
    }

    pub(crate) fn has_session_ticketer(&self) -> bool {
        self.inner.ticketer.is_some()
    }
}

enum TrustSource {
    Anchors(Vec<Certificate>),
    Evaluator(Arc<dyn TrustEvaluator>),
}

enum IdentitySource {
    KeyStore(KeyStore),
    Entry(String, CertificateChain, PrivateKey),
    Selector(Arc<dyn IdentitySelector>),
}

/// Assembles a [`TlsContext`].
///
/// Trust and identity sources can be given several times; they are combined
/// into composites in the order given.
pub struct TlsContextBuilder {
    trust: Vec<TrustSource>,
    identity: Vec<IdentitySource>,
    routes: IdentityRoute,
    deferred: Vec<ConfigurationError>,
    swappable_trust: bool,
    swappable_identity: bool,
    parameters: TlsParameters,
    client_auth: ClientAuth,
    session_cache_size: usize,
    ticketer: Option<Arc<dyn ProducesTickets>>,
    provider: Option<Arc<CryptoProvider>>,
}

impl Default for TlsContextBuilder {
    fn default() -> Self {
        Self {
            trust: Vec::new(),
            identity: Vec::new(),
            routes: IdentityRoute::new(),
            deferred: Vec::new(),
            swappable_trust: false,
            swappable_identity: false,
            parameters: TlsParameters::default(),
            client_auth: ClientAuth::None,
            session_cache_size: DEFAULT_SESSION_CACHE_SIZE,
            ticketer: None,
            provider: None,
        }
    }
}

impl fmt::Debug for TlsContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContextBuilder")
            .field("trust_sources", &self.trust.len())
            .field("identity_sources", &self.identity.len())
            .field("routes", &self.routes)
            .field("swappable_trust", &self.swappable_trust)
            .field("swappable_identity", &self.swappable_identity)
            .field("parameters", &self.parameters)
            .field("client_auth", &self.client_auth)
            .field("session_cache_size", &self.session_cache_size)
            .finish_non_exhaustive()
    }
}

impl TlsContextBuilder {
    /// Trusts chains issued by `anchors`.
    ///
    /// An empty list fails [`build`](Self::build) with
    /// [`ConfigurationError::NoTrustAnchors`].
    #[must_use]
    pub fn with_trust_material<I>(mut self, anchors: I) -> Self
    where
        I: IntoIterator<Item = Certificate>,
    {
        self.trust
            .push(TrustSource::Anchors(anchors.into_iter().collect()));
        self
    }

    /// Adds an arbitrary trust evaluator.
    #[must_use]
    pub fn with_trust_evaluator(mut self, evaluator: Arc<dyn TrustEvaluator>) -> Self {
        self.trust.push(TrustSource::Evaluator(evaluator));
        self
    }

    /// Adds a trust-on-first-use evaluator; keep the `Arc` to add certificates later.
    #[must_use]
    pub fn with_inflatable_trust(self, evaluator: Arc<InflatableTrustEvaluator>) -> Self {
        self.with_trust_evaluator(evaluator)
    }

    /// Presents the key entries of `keystore`.
    #[must_use]
    pub fn with_identity_material(mut self, keystore: KeyStore) -> Self {
        self.identity.push(IdentitySource::KeyStore(keystore));
        self
    }

    /// Presents one identity under `alias`.
    #[must_use]
    pub fn with_identity(
        mut self,
        alias: impl Into<String>,
        chain: CertificateChain,
        key: PrivateKey,
    ) -> Self {
        self.identity
            .push(IdentitySource::Entry(alias.into(), chain, key));
        self
    }

    /// Adds an arbitrary identity selector.
    #[must_use]
    pub fn with_identity_selector(mut self, selector: Arc<dyn IdentitySelector>) -> Self {
        self.identity.push(IdentitySource::Selector(selector));
        self
    }

    /// Presents `alias` only to `destinations` (`host`, `host:port` or URLs).
    #[must_use]
    pub fn with_identity_route<I, S>(mut self, alias: impl Into<String>, destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if let Err(e) = self.routes.insert(alias, destinations) {
            self.deferred.push(e);
        }
        self
    }

    /// Makes trust material replaceable by a reload.
    #[must_use]
    pub fn with_swappable_trust(mut self) -> Self {
        self.swappable_trust = true;
        self
    }

    /// Makes identity material replaceable by a reload.
    #[must_use]
    pub fn with_swappable_identity(mut self) -> Self {
        self.swappable_identity = true;
        self
    }

    /// Restricts protocol versions, e.g. `&[&rustls::version::TLS13]`.
    #[must_use]
    pub fn with_protocol_versions(mut self, versions: &[&'static SupportedProtocolVersion]) -> Self {
        self.parameters.protocol_versions = versions.to_vec();
        self
    }

    /// Restricts cipher suites to those listed that the provider implements.
    #[must_use]
    pub fn with_cipher_suites<I>(mut self, suites: I) -> Self
    where
        I: IntoIterator<Item = CipherSuite>,
    {
        self.parameters.cipher_suites = Some(suites.into_iter().collect());
        self
    }

    /// Sets the ALPN protocols, preferred first.
    #[must_use]
    pub fn with_alpn_protocols<I, P>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        self.parameters.alpn_protocols = protocols.into_iter().map(|p| p.as_ref().to_vec()).collect();
        self
    }

    /// Sets whether server configurations request client certificates.
    #[must_use]
    pub fn with_client_authentication(mut self, client_auth: ClientAuth) -> Self {
        self.client_auth = client_auth;
        self
    }

    /// Sets how many sessions each session cache holds.
    #[must_use]
    pub fn with_session_cache_size(mut self, size: usize) -> Self {
        self.session_cache_size = size;
        self
    }

    /// Issues stateless session tickets with `ticketer` on the server side.
    ///
    /// Such tickets survive [`crate::SessionCacheInvalidator::invalidate`].
    #[must_use]
    pub fn with_session_ticketer(mut self, ticketer: Arc<dyn ProducesTickets>) -> Self {
        self.ticketer = Some(ticketer);
        self
    }

    /// Uses `provider` instead of the process default.
    #[must_use]
    pub fn with_crypto_provider(mut self, provider: Arc<CryptoProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Builds the context.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] for empty trust anchors, routes naming
    /// aliases the identity material lacks, unusable protocol or cipher-suite
    /// settings, or client authentication without trust material. Key
    /// material that fails to load is reported as well.
    pub fn build(self) -> Result<TlsContext> {
        let provider = self.provider.unwrap_or_else(crate::crypto::default_provider);
        if let Some(e) = self.deferred.into_iter().next() {
            return Err(e.into());
        }
        self.parameters.provider_for(&provider)?;

        let trust = build_trust(self.trust, &provider)?.map(|evaluator| {
            if self.swappable_trust {
                TrustMaterial::Swappable(Arc::new(HotSwappable::new(evaluator)))
            } else {
                TrustMaterial::Fixed(evaluator)
            }
        });

        let identity = match (build_identity(self.identity, &provider)?, self.routes.is_empty()) {
            (identity, true) => identity,
            (Some(selector), false) => {
                Some(Arc::new(IdentityRouter::new(selector, self.routes)?) as Arc<dyn IdentitySelector>)
            }
            (None, false) => {
                let alias = self.routes.aliases().next().unwrap_or_default().to_string();
                return Err(ConfigurationError::UnknownRouteAlias(alias).into());
            }
        };
        let identity = identity.map(|selector| {
            if self.swappable_identity {
                IdentityMaterial::Swappable(Arc::new(HotSwappable::new(selector)))
            } else {
                IdentityMaterial::Fixed(selector)
            }
        });

        if self.client_auth != ClientAuth::None && trust.is_none() {
            return Err(ConfigurationError::MissingTrustMaterial.into());
        }

        let client_verifier = trust.as_ref().map(|t| {
            Arc::new(TrustVerifier::with_provider(t.evaluator(), Arc::clone(&provider)))
        });
        let server_resolver = identity
            .as_ref()
            .map(|i| Arc::new(ServerIdentityResolver::new(i.selector())));

        debug!(
            "built TLS context (trust: {}, identity: {}, client auth: {:?})",
            trust.as_ref().map_or("none", |t| if t.is_swappable() { "swappable" } else { "fixed" }),
            identity.as_ref().map_or("none", |i| if i.is_swappable() { "swappable" } else { "fixed" }),
            self.client_auth,
        );

        Ok(TlsContext {
            inner: Arc::new(Inner {
                trust,
                identity,
                parameters: ArcSwap::from_pointee(self.parameters),
                client_auth: self.client_auth,
                provider,
                client_verifier,
                client_resolvers: Mutex::new(HashMap::new()),
                server_resolver,
                client_sessions: Arc::new(ClientSessionCache::new(self.session_cache_size)),
                server_sessions: Arc::new(ServerSessionCache::new(self.session_cache_size)),
                ticketer: self.ticketer,
            }),
        })
    }
}

fn build_trust(
    sources: Vec<TrustSource>,
    provider: &Arc<CryptoProvider>,
) -> std::result::Result<Option<Arc<dyn TrustEvaluator>>, ConfigurationError> {
    let mut members: Vec<std::result::Result<Arc<dyn TrustEvaluator>, ConfigurationError>> = sources
        .into_iter()
        .map(|source| match source {
            TrustSource::Anchors(anchors) => {
                WebPkiTrustEvaluator::with_provider(anchors, Arc::clone(provider))
                    .map(|e| Arc::new(e) as Arc<dyn TrustEvaluator>)
            }
            TrustSource::Evaluator(evaluator) => Ok(evaluator),
        })
        .collect();

    if members.len() <= 1 {
        return members.pop().transpose();
    }
    CompositeTrustEvaluator::try_from_members(members)
        .map(|composite| Some(Arc::new(composite) as Arc<dyn TrustEvaluator>))
}

fn build_identity(
    sources: Vec<IdentitySource>,
    provider: &Arc<CryptoProvider>,
) -> Result<Option<Arc<dyn IdentitySelector>>> {
    let mut members = sources
        .into_iter()
        .map(|source| -> Result<Arc<dyn IdentitySelector>> {
            let selector = match source {
                IdentitySource::KeyStore(keystore) => {
                    KeyStoreIdentitySelector::from_keystore_with_provider(&keystore, provider)?
                }
                IdentitySource::Entry(alias, chain, key) => {
                    KeyStoreIdentitySelector::with_provider([(alias, chain, key)], provider)?
                }
                IdentitySource::Selector(selector) => return Ok(selector),
            };
            Ok(Arc::new(selector))
        })
        .collect::<Result<Vec<_>>>()?;

    if members.len() <= 1 {
        return Ok(members.pop());
    }
    let composite: Arc<dyn IdentitySelector> = Arc::new(CompositeIdentitySelector::new(members)?);
    Ok(Some(composite))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ensure_provider, TestPki};

    #[test]
    fn empty_trust_material_fails_loudly() {
        ensure_provider();
        let err = TlsContext::builder()
            .with_trust_material(Vec::new())
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::NoTrustAnchors)
        ));
    }

    #[test]
    fn several_trust_sources_become_a_composite() {
        ensure_provider();
        let a = TestPki::new();
        let b = TestPki::new();
        let ctx = TlsContext::builder()
            .with_trust_material([a.ca.clone()])
            .with_trust_material([b.ca.clone()])
            .build()
            .unwrap();
        let issuers = ctx.trust_evaluator().unwrap().accepted_issuers();
        assert_eq!(issuers, vec![a.ca, b.ca]);
        assert!(!ctx.is_trust_swappable());
    }

    #[test]
    fn route_to_unknown_alias_is_rejected() {
        ensure_provider();
        let pki = TestPki::new();
        let leaf = pki.leaf("known");
        let err = TlsContext::builder()
            .with_identity("known", leaf.chain(), leaf.key.clone())
            .with_identity_route("unknown", ["localhost"])
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::UnknownRouteAlias(a)) if a == "unknown"
        ));
    }

    #[test]
    fn invalid_route_destination_is_reported() {
        ensure_provider();
        let pki = TestPki::new();
        let leaf = pki.leaf("known");
        let err = TlsContext::builder()
            .with_identity("known", leaf.chain(), leaf.key.clone())
            .with_identity_route("known", ["host:99999"])
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::InvalidRoute { .. })
        ));
    }

    #[test]
    fn unsupported_cipher_suites_are_rejected() {
        ensure_provider();
        let err = TlsContext::builder()
            .with_trust_material([TestPki::new().ca])
            .with_cipher_suites([CipherSuite::TLS_NULL_WITH_NULL_NULL])
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::UnsupportedCipherSuites(_))
        ));
    }

    #[test]
    fn empty_protocol_versions_are_rejected() {
        ensure_provider();
        let err = TlsContext::builder()
            .with_trust_material([TestPki::new().ca])
            .with_protocol_versions(&[])
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::NoProtocolVersions)
        ));
    }

    #[test]
    fn client_auth_needs_trust() {
        ensure_provider();
        let leaf = TestPki::new().leaf("server");
        let err = TlsContext::builder()
            .with_identity("server", leaf.chain(), leaf.key.clone())
            .with_client_authentication(ClientAuth::Required)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::MissingTrustMaterial)
        ));
    }

    #[test]
    fn configs_need_the_matching_material() {
        ensure_provider();
        let trust_only = TlsContext::builder()
            .with_trust_material([TestPki::new().ca])
            .build()
            .unwrap();
        assert!(matches!(
            trust_only.server_config(),
            Err(Error::Configuration(ConfigurationError::MissingIdentityMaterial))
        ));

        let leaf = TestPki::new().leaf("server");
        let identity_only = TlsContext::builder()
            .with_identity("server", leaf.chain(), leaf.key.clone())
            .build()
            .unwrap();
        assert!(matches!(
            identity_only.client_config(&Destination::new("localhost")),
            Err(Error::Configuration(ConfigurationError::MissingTrustMaterial))
        ));
    }

    #[test]
    fn client_resolver_cache_is_bounded() {
        ensure_provider();
        let ctx = TlsContext::builder()
            .with_trust_material([TestPki::new().ca])
            .build()
            .unwrap();
        let first = ctx.client_resolver(&Destination::with_port("host-0", 443)).unwrap();
        for port in 1..=u16::try_from(MAX_CLIENT_RESOLVERS).unwrap() {
            ctx.client_resolver(&Destination::with_port("host-0", port.wrapping_add(443)))
                .unwrap();
        }
        let cached = lock_mutex(&ctx.inner.client_resolvers).unwrap().len();
        assert!(cached <= MAX_CLIENT_RESOLVERS, "{cached}");
        let again = ctx.client_resolver(&Destination::with_port("host-0", 443)).unwrap();
        assert!(!Arc::ptr_eq(&first, &again));
    }

    #[test]
    fn client_configs_share_verifier_resolver_and_store() {
        ensure_provider();
        let pki = TestPki::new();
        let leaf = pki.leaf("client");
        let ctx = TlsContext::builder()
            .with_trust_material([pki.ca.clone()])
            .with_identity("client", leaf.chain(), leaf.key.clone())
            .with_swappable_trust()
            .with_alpn_protocols([b"h2"])
            .build()
            .unwrap();

        let dest = Destination::with_port("localhost", 443);
        let first = ctx.client_config(&dest).unwrap();
        let second = ctx.client_config(&dest).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(
            &first.client_auth_cert_resolver,
            &second.client_auth_cert_resolver
        ));
        assert_eq!(first.alpn_protocols, vec![b"h2".to_vec()]);

        let other = ctx.client_config(&Destination::new("elsewhere")).unwrap();
        assert!(!Arc::ptr_eq(
            &first.client_auth_cert_resolver,
            &other.client_auth_cert_resolver
        ));
    }

    #[test]
    fn server_configs_are_fresh_but_share_session_storage() {
        ensure_provider();
        let pki = TestPki::new();
        let leaf = pki.leaf("server");
        let ctx = TlsContext::builder()
            .with_trust_material([pki.ca.clone()])
            .with_identity("server", leaf.chain(), leaf.key.clone())
            .with_client_authentication(ClientAuth::Optional)
            .with_alpn_protocols(["http/1.1"])
            .build()
            .unwrap();

        let first = ctx.server_config().unwrap();
        let second = ctx.server_config().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first.session_storage, &second.session_storage));
        assert!(Arc::ptr_eq(&first.cert_resolver, &second.cert_resolver));
        assert_eq!(first.alpn_protocols, vec![b"http/1.1".to_vec()]);
        assert_eq!(ctx.client_auth(), ClientAuth::Optional);
    }
}
