use super::{IdentitySelector, SelectionRequest};
use crate::certificate::CertificateChain;
use crate::error::ConfigurationError;
use rustls::sign::CertifiedKey;
use std::sync::Arc;

/// Offers the identities of several selectors as one.
///
/// Aliases are expected to be disjoint across members. When they are not, the
/// first member holding an alias answers for it.
#[derive(Clone, Debug)]
pub struct CompositeIdentitySelector {
    members: Vec<Arc<dyn IdentitySelector>>,
}

impl CompositeIdentitySelector {
    /// Creates a composite over an ordered, non-empty member list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::EmptyComposite`] if `members` is empty.
    pub fn new(members: Vec<Arc<dyn IdentitySelector>>) -> Result<Self, ConfigurationError> {
        if members.is_empty() {
            return Err(ConfigurationError::EmptyComposite("identity selector"));
        }
        Ok(Self { members })
    }

    /// The members in lookup order.
    pub fn members(&self) -> &[Arc<dyn IdentitySelector>] {
        &self.members
    }

    fn owner(&self, alias: &str) -> Option<&Arc<dyn IdentitySelector>> {
        self.members
            .iter()
            .find(|m| m.aliases().iter().any(|a| a == alias))
    }

    fn merge<F>(&self, candidates: F) -> Vec<String>
    where
        F: Fn(&dyn IdentitySelector) -> Vec<String>,
    {
        let mut merged: Vec<String> = Vec::new();
        for member in &self.members {
            for alias in candidates(member.as_ref()) {
                if !merged.contains(&alias) {
                    merged.push(alias);
                }
            }
        }
        merged
    }
}

impl IdentitySelector for CompositeIdentitySelector {
    fn aliases(&self) -> Vec<String> {
        self.merge(|m| m.aliases())
    }

    fn certified_key(&self, alias: &str) -> Option<Arc<CertifiedKey>> {
        self.owner(alias)?.certified_key(alias)
    }

    fn certificate_chain(&self, alias: &str) -> Option<CertificateChain> {
        self.owner(alias)?.certificate_chain(alias)
    }

    fn client_candidates(&self, request: &SelectionRequest<'_>) -> Vec<String> {
        self.merge(|m| m.client_candidates(request))
    }

    fn server_candidates(&self, request: &SelectionRequest<'_>) -> Vec<String> {
        self.merge(|m| m.server_candidates(request))
    }
}
