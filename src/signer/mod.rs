//! # OpenSSH signer
//!
//! Issues OpenSSH user certificates from a [`CertSpec`]. The CA private
//! key is borrowed per signing operation through the
//! [`CaKeySource`](crate::service::CaKeySource) port and never cached
//! here.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;
use ssh_key::certificate::{Builder as CertBuilder, CertType};
use ssh_key::rand_core::OsRng;
use ssh_key::{HashAlg, PublicKey};

use crate::domain::{CertSpec, DomainError};
use crate::service::{CaKeySource, Logger, Signer};

pub struct OpenSshSigner {
    keys: Arc<dyn CaKeySource>,
    log: Arc<dyn Logger>,
}

impl OpenSshSigner {
    pub fn new(keys: Arc<dyn CaKeySource>, log: Arc<dyn Logger>) -> Self {
        OpenSshSigner { keys, log }
    }
}

#[async_trait]
impl Signer for OpenSshSigner {
    /// Issues a user certificate for the given spec and serial. Returns
    /// the raw marshaled certificate bytes and the SHA-256 fingerprint of
    /// the CA public key.
    async fn sign(&self, spec: &CertSpec, serial: u64) -> Result<(Vec<u8>, String)> {
        if spec.public_key_authorized.is_empty() {
            return Err(DomainError::MissingPublicKey.into());
        }
        let public_key = PublicKey::from_openssh(&spec.public_key_authorized)
            .context("parse subject public key")?;

        let ca_key = self.keys.load().await?;

        // Negative timestamps cannot be represented in the certificate;
        // clamp to the epoch.
        let valid_after = spec.valid_after.timestamp().max(0) as u64;
        let valid_before = spec.valid_before.timestamp().max(0) as u64;

        let mut builder =
            CertBuilder::new_with_random_nonce(&mut OsRng, &public_key, valid_after, valid_before)?;
        builder.serial(serial)?;
        builder.key_id(&spec.key_id)?;
        builder.cert_type(CertType::User)?;
        for principal in &spec.principals {
            builder.valid_principal(principal)?;
        }
        for (name, value) in &spec.critical_options {
            builder.critical_option(name.clone(), value.clone())?;
        }
        for (name, value) in &spec.extensions {
            builder.extension(name.clone(), value.clone())?;
        }

        let cert = match builder.sign(&ca_key) {
            Ok(cert) => cert,
            Err(err) => {
                self.log.error(
                    "certificate signing failed",
                    &[("error".to_string(), err.to_string())],
                );
                return Err(err.into());
            }
        };

        let raw = cert.to_bytes().context("marshal certificate")?;
        let fingerprint = ca_key.public_key().fingerprint(HashAlg::Sha256).to_string();

        self.log.debug(
            "signed user cert",
            &[
                ("serial".to_string(), serial.to_string()),
                ("principals".to_string(), spec.principals.join(",")),
                (
                    "valid_after".to_string(),
                    spec.valid_after.to_rfc3339_opts(SecondsFormat::Secs, true),
                ),
                (
                    "valid_before".to_string(),
                    spec.valid_before.to_rfc3339_opts(SecondsFormat::Secs, true),
                ),
            ],
        );

        Ok((raw, fingerprint))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::logging::NopLogger;
    use chrono::{TimeZone, Utc};
    use ssh_key::{Algorithm, Certificate, Fingerprint, PrivateKey};
    use std::collections::BTreeMap;

    struct StaticKeys(PrivateKey);
    #[async_trait]
    impl CaKeySource for StaticKeys {
        async fn load(&self) -> Result<PrivateKey> {
            Ok(self.0.clone())
        }
    }

    fn signer_with_ca() -> (OpenSshSigner, PrivateKey) {
        let ca_key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let signer = OpenSshSigner::new(
            Arc::new(StaticKeys(ca_key.clone())),
            Arc::new(NopLogger),
        );
        (signer, ca_key)
    }

    fn subject_key_line() -> String {
        let subject = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        subject.public_key().to_openssh().unwrap()
    }

    fn spec() -> CertSpec {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        CertSpec {
            public_key_authorized: subject_key_line(),
            key_id: "1|sub|alice".into(),
            principals: vec!["alice".into(), "admin".into()],
            valid_after: now - chrono::Duration::seconds(30),
            valid_before: now + chrono::Duration::hours(1),
            critical_options: BTreeMap::from([(
                "source-address".to_string(),
                "10.0.0.0/8".to_string(),
            )]),
            extensions: BTreeMap::from([("permit-pty".to_string(), String::new())]),
        }
    }

    #[tokio::test]
    async fn produces_verifiable_user_certificate() {
        let (signer, ca_key) = signer_with_ca();
        let spec = spec();
        let (raw, fingerprint) = signer.sign(&spec, 7).await.unwrap();

        let cert = Certificate::from_bytes(&raw).unwrap();
        assert_eq!(cert.cert_type(), CertType::User);
        assert_eq!(cert.serial(), 7);
        assert_eq!(cert.key_id(), "1|sub|alice");
        assert_eq!(cert.valid_principals().to_vec(), ["alice", "admin"]);
        assert_eq!(cert.valid_after(), 1_700_000_000 - 30);
        assert_eq!(cert.valid_before(), 1_700_000_000 + 3600);
        assert_eq!(
            cert.critical_options().get("source-address").unwrap(),
            "10.0.0.0/8"
        );
        assert!(cert.extensions().contains_key("permit-pty"));

        // An SSH daemon trusting the CA fingerprint accepts the signature.
        let ca_fp = ca_key.public_key().fingerprint(HashAlg::Sha256);
        cert.validate_at(1_700_000_000, [&ca_fp]).unwrap();

        assert_eq!(fingerprint, ca_fp.to_string());
        assert!(fingerprint.starts_with("SHA256:"));
        let parsed: Fingerprint = fingerprint.parse().unwrap();
        assert_eq!(parsed, ca_fp);
    }

    #[tokio::test]
    async fn rejects_empty_public_key() {
        let (signer, _) = signer_with_ca();
        let mut spec = spec();
        spec.public_key_authorized.clear();
        let err = signer.sign(&spec, 1).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<DomainError>(),
            Some(&DomainError::MissingPublicKey)
        );
    }

    #[tokio::test]
    async fn rejects_unparseable_public_key() {
        let (signer, _) = signer_with_ca();
        let mut spec = spec();
        spec.public_key_authorized = "not an authorized-keys line".into();
        assert!(signer.sign(&spec, 1).await.is_err());
    }

    #[tokio::test]
    async fn negative_validity_clamps_to_epoch() {
        let (signer, _) = signer_with_ca();
        let mut spec = spec();
        spec.valid_after = Utc.timestamp_opt(-100, 0).unwrap();
        let (raw, _) = signer.sign(&spec, 1).await.unwrap();
        let cert = Certificate::from_bytes(&raw).unwrap();
        assert_eq!(cert.valid_after(), 0);
    }
}
