use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::identity::Identity;

/// Per-request environment details the policy might care about. Pure data,
/// no IO; the wall-clock is sampled once at request start.
#[derive(Debug, Clone)]
pub struct SignContext {
    /// Client-requested lifetime; zero means "use the policy default".
    pub requested_ttl: Duration,
    /// Optional principal hints from the client, non-authoritative.
    pub requested_hints: Vec<String>,
    pub source_ip: String,
    pub now: DateTime<Utc>,
    pub trace_id: String,
}

/// The authoritative result of authorization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyDecision {
    pub principals: Vec<String>,
    /// Requested/decided lifetime, clamped later during spec construction.
    pub ttl: Duration,
    /// Sorted so certificate encoding stays deterministic.
    pub critical_options: BTreeMap<String, String>,
    pub extensions: BTreeMap<String, String>,
}

/// Composes the certificate key id deterministically for audit and search:
/// `"<serial>|<subject>|<username>"`. No PII beyond what's useful.
pub fn compose_key_id(id: &Identity, serial: u64) -> String {
    format!("{}|{}|{}", serial, id.subject, id.username)
}

/// Stable, non-PII reason for a policy denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyCode {
    PrincipalNotAllowed,
    TtlTooLarge,
    TtlTooSmall,
    IpNotAllowed,
    RoleMissing,
    QuotaExceeded,
    DefaultDeny,
}

impl DenyCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyCode::PrincipalNotAllowed => "PRINCIPAL_NOT_ALLOWED",
            DenyCode::TtlTooLarge => "TTL_TOO_LARGE",
            DenyCode::TtlTooSmall => "TTL_TOO_SMALL",
            DenyCode::IpNotAllowed => "IP_NOT_ALLOWED",
            DenyCode::RoleMissing => "ROLE_MISSING",
            DenyCode::QuotaExceeded => "QUOTA_EXCEEDED",
            DenyCode::DefaultDeny => "DEFAULT_DENY",
        }
    }
}

impl fmt::Display for DenyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured policy denial. Carries enough for audit without leaking
/// claims; the message must stay short and free of PII and secrets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDeny {
    pub code: DenyCode,
    pub message: String,
}

impl PolicyDeny {
    /// Canonical audit attributes for this denial.
    pub fn attrs(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("deny_code".to_string(), self.code.as_str().to_string())])
    }
}

impl fmt::Display for PolicyDeny {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(self.code.as_str())
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for PolicyDeny {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn key_id_format() {
        let id = Identity {
            subject: "sub".into(),
            username: "alice".into(),
            ..Identity::default()
        };
        assert_eq!(compose_key_id(&id, 42), "42|sub|alice");
    }

    #[test]
    fn deny_display_with_and_without_message() {
        let bare = PolicyDeny {
            code: DenyCode::DefaultDeny,
            message: String::new(),
        };
        assert_eq!(bare.to_string(), "DEFAULT_DENY");

        let with_msg = PolicyDeny {
            code: DenyCode::RoleMissing,
            message: "access denied".into(),
        };
        assert_eq!(with_msg.to_string(), "ROLE_MISSING: access denied");
    }

    #[test]
    fn deny_attrs_carry_code() {
        let deny = PolicyDeny {
            code: DenyCode::QuotaExceeded,
            message: String::new(),
        };
        assert_eq!(deny.attrs().get("deny_code").unwrap(), "QUOTA_EXCEEDED");
    }
}
