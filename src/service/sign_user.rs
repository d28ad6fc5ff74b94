//! # User certificate issuance
//!
//! The orchestrator at the heart of the service. It sequences
//! AUTHN -> AUTHZ -> SERIAL -> SPEC -> SIGN -> AUDIT, classifies failures
//! by the stage that first failed, and guarantees exactly one audit event
//! per request.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use crate::domain::{
    build_cert_spec, compose_key_id, AuditAction, AuditEvent, AuditStage, Clock, DomainError,
    Identity, SignContext, TtlPolicy,
};
use crate::service::{AuditSink, Authenticator, Authorizer, Logger, SerialStore, Signer};

/// Normalized inputs for issuing a user certificate.
#[derive(Debug, Clone, Default)]
pub struct SignUserInput {
    pub bearer: String,
    /// The client's SSH public key as an authorized-keys line.
    pub public_key_authorized: String,
    /// Zero means "use the policy default".
    pub requested_ttl: Duration,
    pub source_ip: String,
    pub trace_id: String,
}

/// The result of a successful issuance.
#[derive(Debug, Clone)]
pub struct SignUserOutput {
    pub serial: u64,
    /// Raw OpenSSH certificate wire bytes.
    pub certificate: Vec<u8>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub principals: Vec<String>,
    pub key_id: String,
    pub ca_fingerprint: String,
}

/// Orchestrates the issuance pipeline. Holds one reference per port; all
/// request state is local to [`SignUserService::execute`].
pub struct SignUserService {
    pub log: Arc<dyn Logger>,
    pub auth: Arc<dyn Authenticator>,
    pub authz: Arc<dyn Authorizer>,
    pub serials: Arc<dyn SerialStore>,
    pub signer: Arc<dyn Signer>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,
    /// Policy TTL bounds (default, max), applied during spec construction.
    pub ttl: TtlPolicy,
}

impl SignUserService {
    /// Performs the end-to-end flow to issue a user certificate.
    ///
    /// The wall-clock is sampled exactly once; the same instant anchors the
    /// request context and the certificate validity window. Every return
    /// path emits exactly one audit event, and audit write failures never
    /// shadow the issuance error.
    pub async fn execute(&self, input: SignUserInput) -> Result<SignUserOutput> {
        let now = self.clock.now();
        let ctx = SignContext {
            requested_ttl: input.requested_ttl,
            requested_hints: Vec::new(),
            source_ip: input.source_ip.clone(),
            now,
            trace_id: input.trace_id.clone(),
        };

        // Basic input validation.
        if input.bearer.is_empty() {
            let err = anyhow!("missing bearer");
            self.audit_failure(AuditStage::Authn, &Identity::default(), &[], &ctx, &err)
                .await;
            return Err(err);
        }
        if input.public_key_authorized.is_empty() {
            let err = anyhow::Error::new(DomainError::MissingPublicKey);
            self.audit_failure(AuditStage::Input, &Identity::default(), &[], &ctx, &err)
                .await;
            return Err(err);
        }

        // 1) Authenticate.
        let id = match self.auth.authenticate(&input.bearer).await {
            Ok(id) => id,
            Err(err) => {
                self.audit_failure(AuditStage::Authn, &Identity::default(), &[], &ctx, &err)
                    .await;
                return Err(err);
            }
        };

        // 2) Authorize.
        let decision = match self.authz.decide(&id, &ctx) {
            Ok(decision) => decision,
            Err(err) => {
                self.audit_failure(AuditStage::Authz, &id, &[], &ctx, &err).await;
                return Err(err);
            }
        };

        // 3) Serial, before spec construction so the key id can embed it.
        let serial = match self.serials.next().await {
            Ok(serial) => serial,
            Err(err) => {
                self.audit_failure(AuditStage::Policy, &id, &decision.principals, &ctx, &err)
                    .await;
                return Err(err);
            }
        };

        // 4) Build the cert spec with the TTL clamp and key id.
        let key_id = compose_key_id(&id, serial);
        let mut spec = build_cert_spec(&decision, self.ttl, now, key_id.clone());
        spec.public_key_authorized = input.public_key_authorized.clone();
        if let Err(err) = spec.validate() {
            let err = anyhow::Error::new(err);
            self.audit_failure(AuditStage::Policy, &id, &decision.principals, &ctx, &err)
                .await;
            return Err(err);
        }

        // 5) Sign.
        let (certificate, ca_fingerprint) = match self.signer.sign(&spec, serial).await {
            Ok(signed) => signed,
            Err(err) => {
                self.audit_failure(AuditStage::Sign, &id, &decision.principals, &ctx, &err)
                    .await;
                return Err(err);
            }
        };

        // 6) Audit success.
        let attrs = BTreeMap::from([
            ("ca_fp".to_string(), ca_fingerprint.clone()),
            ("key_id".to_string(), key_id.clone()),
        ]);
        let event = AuditEvent::success(
            AuditAction::IssueUserCert,
            &id,
            &spec.principals,
            serial,
            spec.valid_after,
            spec.valid_before,
            &ctx,
            attrs,
        );
        self.write_audit(&event).await;

        self.log.info(
            "issued user cert",
            &[
                ("serial".to_string(), serial.to_string()),
                ("principals".to_string(), spec.principals.join(",")),
                ("not_before".to_string(), spec.valid_after.to_rfc3339()),
                ("not_after".to_string(), spec.valid_before.to_rfc3339()),
            ],
        );

        Ok(SignUserOutput {
            serial,
            certificate,
            not_before: spec.valid_after,
            not_after: spec.valid_before,
            principals: spec.principals,
            key_id,
            ca_fingerprint,
        })
    }

    async fn audit_failure(
        &self,
        stage: AuditStage,
        id: &Identity,
        principals: &[String],
        ctx: &SignContext,
        err: &anyhow::Error,
    ) {
        let event = AuditEvent::failure(
            AuditAction::IssueUserCert,
            stage,
            id,
            principals,
            ctx,
            err,
            BTreeMap::new(),
        );
        self.write_audit(&event).await;
    }

    async fn write_audit(&self, event: &AuditEvent) {
        if let Err(err) = self.audit.write(event).await {
            self.log.warn(
                "audit write failed",
                &[("error".to_string(), err.to_string())],
            );
        }
    }
}
