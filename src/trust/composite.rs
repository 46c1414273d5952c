use super::{TrustEvaluator, TrustRequest};
use crate::certificate::{Certificate, CertificateChain};
use crate::error::{ConfigurationError, Suppressed, TrustError};
use std::sync::Arc;

/// Accepts a chain when any member accepts it.
///
/// Members are tried in order and the first acceptance wins. When every member
/// rejects, the error carries the first member's failure as its primary cause
/// and every other failure as suppressed causes.
#[derive(Clone, Debug)]
pub struct CompositeTrustEvaluator {
    members: Vec<Arc<dyn TrustEvaluator>>,
}

impl CompositeTrustEvaluator {
    /// Creates a composite over an ordered, non-empty member list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::EmptyComposite`] if `members` is empty.
    pub fn new(members: Vec<Arc<dyn TrustEvaluator>>) -> Result<Self, ConfigurationError> {
        if members.is_empty() {
            return Err(ConfigurationError::EmptyComposite("trust evaluator"));
        }
        Ok(Self { members })
    }

    /// Creates a composite from member build results, surfacing every failure.
    ///
    /// A single failed member propagates its error unchanged. With several
    /// members, all failures are returned together as
    /// [`ConfigurationError::Members`].
    ///
    /// # Errors
    ///
    /// Returns the failure(s) described above, or
    /// [`ConfigurationError::EmptyComposite`] if `results` is empty.
    pub fn try_from_members<I>(results: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = Result<Arc<dyn TrustEvaluator>, ConfigurationError>>,
    {
        let results: Vec<_> = results.into_iter().collect();
        let single = results.len() == 1;

        let mut members = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(member) => members.push(member),
                Err(e) => failures.push(e),
            }
        }

        match Suppressed::from_errors(failures) {
            None => Self::new(members),
            Some(all) if single => Err(all.into_primary()),
            Some(all) => Err(ConfigurationError::Members(all)),
        }
    }

    /// The members in evaluation order.
    pub fn members(&self) -> &[Arc<dyn TrustEvaluator>] {
        &self.members
    }
}

impl TrustEvaluator for CompositeTrustEvaluator {
    fn evaluate(&self, chain: &CertificateChain, request: &TrustRequest) -> Result<(), TrustError> {
        if let [only] = self.members.as_slice() {
            return only.evaluate(chain, request);
        }

        let mut failures = Vec::with_capacity(self.members.len());
        for member in &self.members {
            match member.evaluate(chain, request) {
                Ok(()) => return Ok(()),
                Err(e) => failures.push(e),
            }
        }

        match Suppressed::from_errors(failures) {
            Some(all) => Err(TrustError::AllRejected(all)),
            None => Err(TrustError::Internal("composite has no members".into())),
        }
    }

    fn accepted_issuers(&self) -> Vec<Certificate> {
        let mut union: Vec<Certificate> = Vec::new();
        for member in &self.members {
            for issuer in member.accepted_issuers() {
                if !union.contains(&issuer) {
                    union.push(issuer);
                }
            }
        }
        union
    }
}
