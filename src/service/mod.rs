//! # Services and ports
//!
//! The issuance flow composes behavior through capability contracts. Each
//! port is a small object-safe trait; adapters implement them and the
//! services hold `Arc<dyn ...>` references. There is no other coupling
//! between the core and the outside world.

use anyhow::Result;
use async_trait::async_trait;
use ssh_key::PrivateKey;

use crate::domain::{AuditEvent, CertSpec, Identity, PolicyDecision, SignContext};

pub mod ca_public_key;
pub mod sign_user;

pub use crate::domain::{Clock, SystemClock};

/// Verifies client credentials (an OIDC bearer token) and yields a
/// normalized [`Identity`].
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, bearer: &str) -> Result<Identity>;
}

/// Maps an identity plus request context to a policy decision. Denials are
/// returned as a [`crate::domain::PolicyDeny`] error.
pub trait Authorizer: Send + Sync {
    fn decide(&self, id: &Identity, ctx: &SignContext) -> Result<PolicyDecision>;
}

/// Provides monotonically increasing certificate serial numbers. The first
/// allocation returns 1; 0 is never returned.
#[async_trait]
pub trait SerialStore: Send + Sync {
    async fn next(&self) -> Result<u64>;
}

/// Produces a signed certificate. Returns the raw OpenSSH certificate wire
/// bytes and the `SHA256:` fingerprint of the CA public key.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, spec: &CertSpec, serial: u64) -> Result<(Vec<u8>, String)>;
}

/// Loads the CA private key material. Implementations own the key bytes;
/// callers borrow the returned key per signing operation.
#[async_trait]
pub trait CaKeySource: Send + Sync {
    async fn load(&self) -> Result<PrivateKey>;
}

/// Persists or emits audit events (stdout, database, log aggregator).
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, event: &AuditEvent) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured key/value logging port. The core never talks to a logging
/// backend directly; adapters render the fields however they like.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, fields: &[(String, String)]);

    /// Returns a logger that attributes records to the named group.
    fn with_group(&self, name: &str) -> Box<dyn Logger>;

    fn debug(&self, message: &str, fields: &[(String, String)]) {
        self.log(LogLevel::Debug, message, fields);
    }
    fn info(&self, message: &str, fields: &[(String, String)]) {
        self.log(LogLevel::Info, message, fields);
    }
    fn warn(&self, message: &str, fields: &[(String, String)]) {
        self.log(LogLevel::Warn, message, fields);
    }
    fn error(&self, message: &str, fields: &[(String, String)]) {
        self.log(LogLevel::Error, message, fields);
    }
}
