//! Destination-based identity routing.

use super::{IdentitySelector, SelectionRequest};
use crate::certificate::CertificateChain;
use crate::error::ConfigurationError;
use crate::prelude::debug;
use rustls::pki_types::ServerName;
use rustls::sign::CertifiedKey;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use url::{Host, Url};

/// A remote endpoint as seen by an outbound connection.
///
/// Hosts are lower-cased and IPv6 literals are kept without brackets.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Destination {
    host: String,
    port: Option<u16>,
}

impl Destination {
    /// A destination known only by host.
    pub fn new(host: impl AsRef<str>) -> Self {
        Self {
            host: normalize_host(host.as_ref()),
            port: None,
        }
    }

    /// A destination with an explicit port.
    pub fn with_port(host: impl AsRef<str>, port: u16) -> Self {
        Self {
            host: normalize_host(host.as_ref()),
            port: Some(port),
        }
    }

    /// Parses a URL such as `https://localhost:8443/api`.
    ///
    /// The port falls back to the scheme's default when the URL omits it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidRoute`] if `url` does not parse or
    /// has no host.
    pub fn parse_url(url: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidRoute {
            destination: url.to_string(),
            reason,
        };
        let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
        let host = match parsed.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(invalid("URL has no host".into())),
        };
        Ok(Self {
            host: normalize_host(&host),
            port: parsed.port_or_known_default(),
        })
    }

    /// Host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port, if known.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// The name to send as SNI and verify the server certificate against.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidServerName`] if the host is
    /// neither a DNS name nor an IP address.
    pub fn server_name(&self) -> Result<ServerName<'static>, ConfigurationError> {
        ServerName::try_from(self.host.clone())
            .map_err(|_| ConfigurationError::InvalidServerName(self.host.clone()))
    }

    /// Route patterns this destination matches, most specific first.
    pub fn route_keys(&self) -> Vec<String> {
        match self.port {
            Some(_) => vec![self.to_string(), self.host.clone()],
            None => vec![self.host.clone()],
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.port, self.host.contains(':')) {
            (Some(port), true) => write!(f, "[{}]:{port}", self.host),
            (Some(port), false) => write!(f, "{}:{port}", self.host),
            (None, _) => f.write_str(&self.host),
        }
    }
}

/// Accepts `host`, `host:port`, `[v6]:port` or a URL.
impl FromStr for Destination {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |reason: &str| ConfigurationError::InvalidRoute {
            destination: s.to_string(),
            reason: reason.to_string(),
        };

        if s.contains("://") {
            return Self::parse_url(s);
        }
        if s.is_empty() {
            return Err(invalid("empty destination"));
        }

        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
            return match tail.strip_prefix(':') {
                Some(port) => Ok(Self::with_port(host, parse_port(port).ok_or_else(|| invalid("invalid port"))?)),
                None if tail.is_empty() => Ok(Self::new(host)),
                None => Err(invalid("unexpected text after IPv6 literal")),
            };
        }

        match s.split_once(':') {
            // A second colon means a bare IPv6 literal.
            Some((host, port)) if !port.contains(':') => {
                if host.is_empty() {
                    return Err(invalid("empty host"));
                }
                let port = parse_port(port).ok_or_else(|| invalid("invalid port"))?;
                Ok(Self::with_port(host, port))
            }
            _ => Ok(Self::new(s)),
        }
    }
}

fn parse_port(port: &str) -> Option<u16> {
    port.parse().ok()
}

fn normalize_host(host: &str) -> String {
    host.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

/// Which local identity alias is presented to which destinations.
///
/// Patterns are stored normalized: `host` or `host:port`, lower-cased. URL
/// entries reduce to `host:port`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentityRoute {
    routes: BTreeMap<String, BTreeSet<String>>,
}

impl IdentityRoute {
    /// An empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `destinations` to `alias`'s route.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidRoute`] for a destination that
    /// does not parse; the route is left unchanged.
    pub fn insert<I, S>(&mut self, alias: impl Into<String>, destinations: I) -> Result<(), ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = destinations
            .into_iter()
            .map(|d| d.as_ref().parse::<Destination>().map(|d| d.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        self.routes.entry(alias.into()).or_default().extend(patterns);
        Ok(())
    }

    /// Builder form of [`insert`](Self::insert).
    ///
    /// # Errors
    ///
    /// Same as [`insert`](Self::insert).
    pub fn with_route<I, S>(mut self, alias: impl Into<String>, destinations: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.insert(alias, destinations)?;
        Ok(self)
    }

    /// Routed aliases in sorted order.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Normalized patterns for `alias`.
    pub fn destinations(&self, alias: &str) -> Option<&BTreeSet<String>> {
        self.routes.get(alias)
    }

    /// `true` if `alias` has a route.
    pub fn is_routed(&self, alias: &str) -> bool {
        self.routes.contains_key(alias)
    }

    /// `true` if `alias` is routed to the pattern `key`.
    pub fn routes_to(&self, alias: &str, key: &str) -> bool {
        self.routes.get(alias).is_some_and(|p| p.contains(key))
    }

    /// `true` if there are no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Narrows outbound identity choice by destination.
///
/// For a client handshake, the candidates routed to the destination's most
/// specific route key win (`host:port` before `host`). If none is routed
/// there, the wrapped selector's candidates without a route are used; when
/// every candidate is routed elsewhere, no certificate is presented. Inbound
/// selection is passed through unchanged.
///
/// The fallback never includes an alias that is routed to some other
/// destination, even when the wrapped selector would pick it by default.
#[derive(Clone, Debug)]
pub struct IdentityRouter {
    selector: Arc<dyn IdentitySelector>,
    routes: IdentityRoute,
}

impl IdentityRouter {
    /// Wraps `selector` with `routes`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownRouteAlias`] for the first routed
    /// alias `selector` does not hold.
    pub fn new(selector: Arc<dyn IdentitySelector>, routes: IdentityRoute) -> Result<Self, ConfigurationError> {
        let known = selector.aliases();
        if let Some(unknown) = routes.aliases().find(|a| !known.iter().any(|k| k == a)) {
            return Err(ConfigurationError::UnknownRouteAlias(unknown.to_string()));
        }
        Ok(Self { selector, routes })
    }

    /// The routing table.
    pub fn routes(&self) -> &IdentityRoute {
        &self.routes
    }
}

impl IdentitySelector for IdentityRouter {
    fn aliases(&self) -> Vec<String> {
        self.selector.aliases()
    }

    fn certified_key(&self, alias: &str) -> Option<Arc<CertifiedKey>> {
        self.selector.certified_key(alias)
    }

    fn certificate_chain(&self, alias: &str) -> Option<CertificateChain> {
        self.selector.certificate_chain(alias)
    }

    fn client_candidates(&self, request: &SelectionRequest<'_>) -> Vec<String> {
        let candidates = self.selector.client_candidates(request);

        if let Some(peer) = request.peer() {
            for key in peer.route_keys() {
                let routed: Vec<String> = candidates
                    .iter()
                    .filter(|alias| self.routes.routes_to(alias, &key))
                    .cloned()
                    .collect();
                if !routed.is_empty() {
                    debug!("identity route {key} selects {routed:?}");
                    return routed;
                }
            }
        }

        candidates
            .into_iter()
            .filter(|alias| !self.routes.is_routed(alias))
            .collect()
    }

    fn server_candidates(&self, request: &SelectionRequest<'_>) -> Vec<String> {
        self.selector.server_candidates(request)
    }

    fn choose_server_alias(&self, request: &SelectionRequest<'_>) -> Option<String> {
        self.selector.choose_server_alias(request)
    }

    fn select_server(&self, request: &SelectionRequest<'_>) -> Option<(String, Arc<CertifiedKey>)> {
        self.selector.select_server(request)
    }
}
