//! rustls certificate resolvers backed by an [`IdentitySelector`].
//!
//! One client resolver exists per context and destination, and it must stay
//! the same `Arc` for the context's lifetime: rustls only resumes a session
//! with the resolver that created it. The selector behind it may be
//! hot-swapped freely.

use crate::identity::{Destination, IdentitySelector, SelectionRequest};
use crate::prelude::debug;
use rustls::client::ResolvesClientCert;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::SignatureScheme;
use std::sync::Arc;

#[derive(Debug)]
pub(crate) struct ClientIdentityResolver {
    identity: Option<Arc<dyn IdentitySelector>>,
    destination: Destination,
}

impl ClientIdentityResolver {
    pub(crate) fn new(identity: Option<Arc<dyn IdentitySelector>>, destination: Destination) -> Self {
        Self {
            identity,
            destination,
        }
    }
}

impl ResolvesClientCert for ClientIdentityResolver {
    fn resolve(
        &self,
        root_hint_subjects: &[&[u8]],
        sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        let identity = self.identity.as_ref()?;
        let request = SelectionRequest::new(sigschemes)
            .with_peer(&self.destination)
            .with_issuer_hints(root_hint_subjects);

        match identity.select_client(&request) {
            Some((alias, key)) => {
                debug!("presenting client identity {alias} to {}", self.destination);
                Some(key)
            }
            None => {
                debug!("no client identity for {}", self.destination);
                None
            }
        }
    }

    fn has_certs(&self) -> bool {
        self.identity
            .as_ref()
            .is_some_and(|identity| !identity.aliases().is_empty())
    }
}

#[derive(Debug)]
pub(crate) struct ServerIdentityResolver {
    identity: Arc<dyn IdentitySelector>,
}

impl ServerIdentityResolver {
    pub(crate) fn new(identity: Arc<dyn IdentitySelector>) -> Self {
        Self { identity }
    }
}

impl ResolvesServerCert for ServerIdentityResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let sni = client_hello.server_name().map(Destination::new);
        let mut request = SelectionRequest::new(client_hello.signature_schemes());
        if let Some(sni) = &sni {
            request = request.with_peer(sni);
        }

        let selected = self.identity.select_server(&request);
        if selected.is_none() {
            debug!("no server identity matches client hello (sni {sni:?})");
        }
        selected.map(|(_, key)| key)
    }
}
