use std::collections::BTreeMap;
use std::fmt;

use anyhow::bail;
use chrono::{DateTime, Utc};

use super::errors::DomainError;
use super::identity::Identity;
use super::policy::{PolicyDeny, SignContext};

/// High-level action being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// Attempting or issuing a user certificate.
    IssueUserCert,
    /// A request denied by policy or authorization.
    Deny,
    /// An unexpected or unhandled error.
    Error,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::IssueUserCert => "ISSUE_USER_CERT",
            AuditAction::Deny => "DENY",
            AuditAction::Error => "ERROR",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where in the issuance flow an event occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditStage {
    #[default]
    Unknown,
    Authn,
    Authz,
    Policy,
    Sign,
    /// Request validation/normalization.
    Input,
}

impl AuditStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStage::Unknown => "UNKNOWN",
            AuditStage::Authn => "AUTHN",
            AuditStage::Authz => "AUTHZ",
            AuditStage::Policy => "POLICY",
            AuditStage::Sign => "SIGN",
            AuditStage::Input => "INPUT",
        }
    }
}

impl fmt::Display for AuditStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable, non-PII code describing an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    MissingPublicKey,
    NoPrincipals,
    InvalidValidity,
    PolicyDenied,
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingPublicKey => "MISSING_PUBLIC_KEY",
            ErrorCode::NoPrincipals => "NO_PRINCIPALS",
            ErrorCode::InvalidValidity => "INVALID_VALIDITY",
            ErrorCode::PolicyDenied => "POLICY_DENIED",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An audit event is a pure fact: sinks serialize and ship it, services
/// emit it. It covers both success and failure; the two shapes are
/// mutually exclusive and [`AuditEvent::validate`] enforces that.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub time: DateTime<Utc>,
    pub action: AuditAction,
    pub stage: AuditStage,
    /// Correlation id for joining with request logs.
    pub trace_id: String,
    pub subject: String,
    pub principals: Vec<String>,
    pub serial: Option<u64>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    pub key_fp: String,
    /// Certificate key id, for operator search.
    pub key_id: String,
    pub source_ip: String,
    pub error_code: Option<ErrorCode>,
    /// Short, safe-to-log message. No secrets.
    pub error_message: String,
    /// Misc attributes (deny codes, fingerprints, correlation ids).
    pub attrs: BTreeMap<String, String>,
}

impl AuditEvent {
    /// Whether this event records a successful outcome.
    pub fn is_success(&self) -> bool {
        self.error_code.is_none()
    }

    /// Enforces the success/failure shape invariants.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.is_success() {
            if self.serial.is_none() || self.not_before.is_none() || self.not_after.is_none() {
                bail!("success event requires serial and validity window");
            }
            if !self.error_message.is_empty() {
                bail!("success event must not contain error fields");
            }
            return Ok(());
        }
        if self.serial.is_some()
            || self.not_before.is_some()
            || self.not_after.is_some()
            || !self.key_fp.is_empty()
            || !self.key_id.is_empty()
        {
            bail!("failure event must not contain success-only fields");
        }
        Ok(())
    }

    /// Creates a failure event, classifying `err` into a stable code and a
    /// public message. Policy denials contribute their `deny_code` attr.
    pub fn failure(
        action: AuditAction,
        stage: AuditStage,
        id: &Identity,
        principals: &[String],
        ctx: &SignContext,
        err: &anyhow::Error,
        attrs: BTreeMap<String, String>,
    ) -> Self {
        let (code, message) = classify_error(err);
        let mut attrs = attrs;
        if let Some(deny) = err.downcast_ref::<PolicyDeny>() {
            attrs.extend(deny.attrs());
        }
        AuditEvent {
            time: ctx.now,
            action,
            stage,
            trace_id: ctx.trace_id.clone(),
            subject: id.subject.clone(),
            principals: principals.to_vec(),
            serial: None,
            not_before: None,
            not_after: None,
            key_fp: String::new(),
            key_id: String::new(),
            source_ip: ctx.source_ip.clone(),
            error_code: Some(code),
            error_message: message,
            attrs,
        }
    }

    /// Creates a success event with serial and validity window filled in.
    #[allow(clippy::too_many_arguments)]
    pub fn success(
        action: AuditAction,
        id: &Identity,
        principals: &[String],
        serial: u64,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
        ctx: &SignContext,
        attrs: BTreeMap<String, String>,
    ) -> Self {
        AuditEvent {
            time: ctx.now,
            action,
            stage: AuditStage::Sign,
            trace_id: ctx.trace_id.clone(),
            subject: id.subject.clone(),
            principals: principals.to_vec(),
            serial: Some(serial),
            not_before: Some(not_before),
            not_after: Some(not_after),
            key_fp: String::new(),
            key_id: String::new(),
            source_ip: ctx.source_ip.clone(),
            error_code: None,
            error_message: String::new(),
            attrs,
        }
    }
}

/// Maps known domain errors to stable codes and fixed public messages.
/// Unknown errors map to `UNKNOWN_ERROR` with a fixed message; the
/// underlying error text is never surfaced through audit.
pub fn classify_error(err: &anyhow::Error) -> (ErrorCode, String) {
    if let Some(deny) = err.downcast_ref::<PolicyDeny>() {
        let message = if deny.message.is_empty() {
            "policy denied".to_string()
        } else {
            deny.message.clone()
        };
        return (ErrorCode::PolicyDenied, message);
    }
    if let Some(de) = err.downcast_ref::<DomainError>() {
        return match de {
            DomainError::MissingPublicKey => {
                (ErrorCode::MissingPublicKey, "missing public key".to_string())
            }
            DomainError::NoPrincipals => (ErrorCode::NoPrincipals, "no principals".to_string()),
            DomainError::InvalidValidity => {
                (ErrorCode::InvalidValidity, "invalid validity window".to_string())
            }
            DomainError::PolicyDenied => {
                (ErrorCode::PolicyDenied, "policy denied issuance".to_string())
            }
        };
    }
    (ErrorCode::UnknownError, "unexpected error".to_string())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::domain::policy::DenyCode;
    use anyhow::anyhow;
    use chrono::TimeZone;
    use std::time::Duration;

    fn ctx() -> SignContext {
        SignContext {
            requested_ttl: Duration::ZERO,
            requested_hints: Vec::new(),
            source_ip: "1.2.3.4".into(),
            now: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            trace_id: "trace".into(),
        }
    }

    fn identity() -> Identity {
        Identity {
            subject: "sub".into(),
            username: "alice".into(),
            ..Identity::default()
        }
    }

    #[test]
    fn classify_policy_deny() {
        let err = anyhow::Error::new(PolicyDeny {
            code: DenyCode::DefaultDeny,
            message: String::new(),
        });
        let (code, msg) = classify_error(&err);
        assert_eq!(code, ErrorCode::PolicyDenied);
        assert_eq!(msg, "policy denied");

        let err = anyhow::Error::new(PolicyDeny {
            code: DenyCode::RoleMissing,
            message: "role required".into(),
        });
        let (code, msg) = classify_error(&err);
        assert_eq!(code, ErrorCode::PolicyDenied);
        assert_eq!(msg, "role required");
    }

    #[test]
    fn classify_domain_errors() {
        let cases = [
            (DomainError::MissingPublicKey, ErrorCode::MissingPublicKey, "missing public key"),
            (DomainError::NoPrincipals, ErrorCode::NoPrincipals, "no principals"),
            (DomainError::InvalidValidity, ErrorCode::InvalidValidity, "invalid validity window"),
            (DomainError::PolicyDenied, ErrorCode::PolicyDenied, "policy denied issuance"),
        ];
        for (err, want_code, want_msg) in cases {
            let (code, msg) = classify_error(&anyhow::Error::new(err));
            assert_eq!(code, want_code);
            assert_eq!(msg, want_msg);
        }
    }

    #[test]
    fn classify_unknown_hides_details() {
        let (code, msg) = classify_error(&anyhow!("database exploded at 10.0.0.5"));
        assert_eq!(code, ErrorCode::UnknownError);
        assert_eq!(msg, "unexpected error");
    }

    #[test]
    fn failure_event_validates() {
        let err = anyhow!("boom");
        let ev = AuditEvent::failure(
            AuditAction::IssueUserCert,
            AuditStage::Authn,
            &identity(),
            &[],
            &ctx(),
            &err,
            BTreeMap::new(),
        );
        assert!(!ev.is_success());
        assert!(ev.validate().is_ok());
        assert_eq!(ev.error_code, Some(ErrorCode::UnknownError));
    }

    #[test]
    fn deny_failure_carries_deny_code_attr() {
        let err = anyhow::Error::new(PolicyDeny {
            code: DenyCode::DefaultDeny,
            message: String::new(),
        });
        let ev = AuditEvent::failure(
            AuditAction::IssueUserCert,
            AuditStage::Authz,
            &identity(),
            &[],
            &ctx(),
            &err,
            BTreeMap::new(),
        );
        assert_eq!(ev.attrs.get("deny_code").unwrap(), "DEFAULT_DENY");
    }

    #[test]
    fn success_event_validates() {
        let c = ctx();
        let ev = AuditEvent::success(
            AuditAction::IssueUserCert,
            &identity(),
            &["alice".to_string()],
            1,
            c.now,
            c.now + chrono::Duration::hours(1),
            &c,
            BTreeMap::new(),
        );
        assert!(ev.is_success());
        assert_eq!(ev.stage, AuditStage::Sign);
        assert!(ev.validate().is_ok());
    }

    #[test]
    fn success_shape_requires_window() {
        let c = ctx();
        let mut ev = AuditEvent::success(
            AuditAction::IssueUserCert,
            &identity(),
            &[],
            1,
            c.now,
            c.now,
            &c,
            BTreeMap::new(),
        );
        ev.not_after = None;
        assert!(ev.validate().is_err());
    }

    #[test]
    fn failure_shape_rejects_success_fields() {
        let err = anyhow!("boom");
        let mut ev = AuditEvent::failure(
            AuditAction::IssueUserCert,
            AuditStage::Sign,
            &identity(),
            &[],
            &ctx(),
            &err,
            BTreeMap::new(),
        );
        ev.serial = Some(7);
        assert!(ev.validate().is_err());

        let mut ev2 = AuditEvent::failure(
            AuditAction::IssueUserCert,
            AuditStage::Sign,
            &identity(),
            &[],
            &ctx(),
            &err,
            BTreeMap::new(),
        );
        ev2.key_id = "1|sub|alice".into();
        assert!(ev2.validate().is_err());
    }
}
