//! Live replacement of a running context's material.

use crate::context::{IdentityMaterial, TlsContext, TrustMaterial};
use crate::error::{ConfigurationError, Result};
use crate::prelude::debug;
use crate::session::SessionCacheInvalidator;

/// Copies trust, identity and protocol settings from one context into another.
///
/// The target must have been built with
/// [`with_swappable_trust`](crate::TlsContextBuilder::with_swappable_trust)
/// and/or
/// [`with_swappable_identity`](crate::TlsContextBuilder::with_swappable_identity).
/// Configurations already handed out by the target pick up the new material
/// on their next handshake.
///
/// ```no_run
/// # fn run(live: &rustls_hotswap::TlsContext, fresh: &rustls_hotswap::TlsContext) -> rustls_hotswap::Result<()> {
/// use rustls_hotswap::ReloadCoordinator;
///
/// ReloadCoordinator::new().reload(live, fresh)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Copy, Debug)]
pub struct ReloadCoordinator {
    invalidate_sessions_immediately: bool,
    invalidator: SessionCacheInvalidator,
}

impl Default for ReloadCoordinator {
    fn default() -> Self {
        Self {
            invalidate_sessions_immediately: true,
            invalidator: SessionCacheInvalidator::new(),
        }
    }
}

impl ReloadCoordinator {
    /// A coordinator that invalidates cached sessions on every reload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether [`reload`](Self::reload) clears the target's session caches.
    ///
    /// When disabled, resumed connections keep the material they negotiated
    /// until their sessions expire or are invalidated separately.
    #[must_use]
    pub fn with_session_invalidation(mut self, invalidate_sessions_immediately: bool) -> Self {
        self.invalidate_sessions_immediately = invalidate_sessions_immediately;
        self
    }

    /// Reloads `target` from `source` using the configured invalidation policy.
    ///
    /// # Errors
    ///
    /// See [`reload_with`](Self::reload_with).
    pub fn reload(&self, target: &TlsContext, source: &TlsContext) -> Result<()> {
        self.reload_with(target, source, self.invalidate_sessions_immediately)
    }

    /// Reloads `target` from `source`.
    ///
    /// Material `source` lacks is left untouched in `target`. Trust is
    /// published before identity. Nothing is replaced unless every part can be.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::NotSwappable`] if `target` has no
    /// swappable material, or if `source` carries material of a kind the
    /// target cannot swap. Returns the parameter error if `source`'s protocol
    /// settings are unusable with the target's crypto provider.
    pub fn reload_with(
        &self,
        target: &TlsContext,
        source: &TlsContext,
        invalidate_sessions_immediately: bool,
    ) -> Result<()> {
        if !target.is_trust_swappable() && !target.is_identity_swappable() {
            return Err(ConfigurationError::NotSwappable("trust and identity").into());
        }

        let trust = match (target.trust_material(), source.trust_material()) {
            (_, None) => None,
            (Some(TrustMaterial::Swappable(slot)), Some(next)) => Some((slot, next.current())),
            (_, Some(_)) => return Err(ConfigurationError::NotSwappable("trust").into()),
        };
        let identity = match (target.identity_material(), source.identity_material()) {
            (_, None) => None,
            (Some(IdentityMaterial::Swappable(slot)), Some(next)) => {
                Some((slot, next.current()))
            }
            (_, Some(_)) => return Err(ConfigurationError::NotSwappable("identity").into()),
        };
        let parameters = source.parameters();
        parameters.provider_for(target.crypto_provider())?;

        if let Some((slot, next)) = trust {
            slot.replace(next);
        }
        if let Some((slot, next)) = identity {
            slot.replace(next);
        }
        target.set_parameters(parameters);

        if invalidate_sessions_immediately {
            self.invalidator.invalidate(target);
        }
        debug!(
            "reloaded TLS context (trust: {}, identity: {}, sessions invalidated: {invalidate_sessions_immediately})",
            source.trust_material().is_some(),
            source.identity_material().is_some(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::test_support::{ensure_provider, TestPki};
    use rustls::server::StoresServerSessions;
    use std::sync::Arc;

    fn swappable(pki: &TestPki, alias: &str) -> TlsContext {
        let leaf = pki.leaf(alias);
        TlsContext::builder()
            .with_trust_material([pki.ca.clone()])
            .with_identity(alias, leaf.chain(), leaf.key.clone())
            .with_swappable_trust()
            .with_swappable_identity()
            .build()
            .unwrap()
    }

    #[test]
    fn replaces_trust_and_identity() {
        ensure_provider();
        let a = TestPki::new();
        let b = TestPki::new();
        let target = swappable(&a, "alpha");
        let source = swappable(&b, "beta");
        let live_trust = target.trust_evaluator().unwrap();
        let live_identity = target.identity_selector().unwrap();

        ReloadCoordinator::new().reload(&target, &source).unwrap();

        assert_eq!(live_trust.accepted_issuers(), vec![b.ca.clone()]);
        assert_eq!(live_identity.aliases(), vec!["beta".to_string()]);
    }

    #[test]
    fn copies_protocol_settings() {
        ensure_provider();
        let a = TestPki::new();
        let target = swappable(&a, "alpha");
        let source = TlsContext::builder()
            .with_trust_material([a.ca.clone()])
            .with_protocol_versions(&[&rustls::version::TLS13])
            .with_alpn_protocols(["h2"])
            .build()
            .unwrap();

        ReloadCoordinator::new().reload(&target, &source).unwrap();

        let parameters = target.parameters();
        assert_eq!(parameters.protocol_versions(), vec![rustls::ProtocolVersion::TLSv1_3]);
        assert_eq!(parameters.alpn_protocols(), &[b"h2".to_vec()]);
        assert_eq!(target.identity_selector().unwrap().aliases(), vec!["alpha".to_string()]);
    }

    #[test]
    fn fixed_target_fails_fast() {
        ensure_provider();
        let a = TestPki::new();
        let fixed = TlsContext::builder()
            .with_trust_material([a.ca.clone()])
            .build()
            .unwrap();
        let source = swappable(&TestPki::new(), "beta");
        let before = fixed.trust_evaluator().unwrap().accepted_issuers();

        let err = ReloadCoordinator::new().reload(&fixed, &source).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::NotSwappable(_))
        ));
        assert_eq!(fixed.trust_evaluator().unwrap().accepted_issuers(), before);
    }

    #[test]
    fn partially_swappable_target_is_left_untouched_on_failure() {
        ensure_provider();
        let a = TestPki::new();
        let leaf = a.leaf("alpha");
        let target = TlsContext::builder()
            .with_trust_material([a.ca.clone()])
            .with_identity("alpha", leaf.chain(), leaf.key.clone())
            .with_swappable_trust()
            .build()
            .unwrap();
        let b = TestPki::new();
        let source = swappable(&b, "beta");

        let err = ReloadCoordinator::new().reload(&target, &source).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::NotSwappable("identity"))
        ));
        assert_eq!(
            target.trust_evaluator().unwrap().accepted_issuers(),
            vec![a.ca.clone()]
        );
    }

    #[test]
    fn session_invalidation_follows_the_flag() {
        ensure_provider();
        let a = TestPki::new();
        let target = swappable(&a, "alpha");
        let source = swappable(&TestPki::new(), "beta");
        let sessions: Arc<_> = Arc::clone(target.server_sessions());
        sessions.put(b"session".to_vec(), b"state".to_vec());

        ReloadCoordinator::new()
            .with_session_invalidation(false)
            .reload(&target, &source)
            .unwrap();
        assert!(sessions.get(b"session").is_some());

        ReloadCoordinator::new().reload(&target, &source).unwrap();
        assert!(sessions.get(b"session").is_none());
        assert_eq!(sessions.generation(), 1);
    }
}
