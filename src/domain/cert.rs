use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::errors::DomainError;
use super::identity::normalize_principals;
use super::policy::PolicyDecision;
use super::ttl::TtlPolicy;

/// Fixed backdating of `valid_after` to tolerate small clock drift between
/// the CA and the hosts verifying the certificate.
pub const DEFAULT_SKEW: Duration = Duration::from_secs(30);

/// The request-to-sign: everything the signer needs to produce a
/// certificate, resolved from identity and policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertSpec {
    /// The client's SSH public key as an authorized-keys line.
    pub public_key_authorized: String,
    /// Stable audit identifier, `"<serial>|<subject>|<username>"`.
    pub key_id: String,
    /// Login names approved by policy, normalized.
    pub principals: Vec<String>,
    pub valid_after: DateTime<Utc>,
    pub valid_before: DateTime<Utc>,
    pub critical_options: BTreeMap<String, String>,
    pub extensions: BTreeMap<String, String>,
}

impl CertSpec {
    /// Domain-level well-formedness checks. Principal charset and length
    /// were already normalized earlier.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.public_key_authorized.is_empty() {
            return Err(DomainError::MissingPublicKey);
        }
        if self.principals.is_empty() {
            return Err(DomainError::NoPrincipals);
        }
        if self.valid_before <= self.valid_after {
            return Err(DomainError::InvalidValidity);
        }
        Ok(())
    }
}

/// Composes a [`CertSpec`] from a policy decision using the TTL clamp rules:
/// `valid_after = now - DEFAULT_SKEW`, `valid_before = valid_after +
/// ttl.clamp(decision.ttl)`. The caller attaches the public key afterwards;
/// `now` is the single wall-clock sample taken at request start.
pub fn build_cert_spec(
    decision: &PolicyDecision,
    ttl: TtlPolicy,
    now: DateTime<Utc>,
    key_id: String,
) -> CertSpec {
    let valid_after = now - chrono::Duration::seconds(DEFAULT_SKEW.as_secs() as i64);
    let lifetime =
        chrono::Duration::from_std(ttl.clamp(decision.ttl)).unwrap_or(chrono::Duration::MAX);
    CertSpec {
        public_key_authorized: String::new(),
        key_id,
        principals: normalize_principals(&decision.principals),
        valid_after,
        valid_before: valid_after + lifetime,
        critical_options: decision.critical_options.clone(),
        extensions: decision.extensions.clone(),
    }
}
