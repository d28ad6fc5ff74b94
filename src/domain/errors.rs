use thiserror::Error;

/// Stable domain failures. The audit classifier matches on these variants,
/// so their set and messages are part of the external contract.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainError {
    #[error("missing public key")]
    MissingPublicKey,
    #[error("no principals")]
    NoPrincipals,
    #[error("invalid validity window")]
    InvalidValidity,
    #[error("policy denied issuance")]
    PolicyDenied,
}
