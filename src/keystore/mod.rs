//! # CA key store
//!
//! Loads CA private key material from disk. Accepted formats are
//! unencrypted PEM PKCS#8 and unencrypted OpenSSH private keys, both
//! restricted to Ed25519. The file permission gate runs before any byte
//! of the key is read.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use ed25519_dalek::pkcs8::DecodePrivateKey;
use ed25519_dalek::SigningKey;
use ssh_key::private::{Ed25519Keypair, Ed25519PrivateKey, KeypairData};
use ssh_key::public::Ed25519PublicKey;
use ssh_key::PrivateKey;

use crate::service::{CaKeySource, Logger};

/// Disk-backed CA key source.
pub struct DiskKeyStore {
    path: PathBuf,
    log: Arc<dyn Logger>,
}

impl DiskKeyStore {
    pub fn new(path: impl Into<PathBuf>, log: Arc<dyn Logger>) -> Self {
        DiskKeyStore {
            path: path.into(),
            log,
        }
    }
}

#[async_trait]
impl CaKeySource for DiskKeyStore {
    async fn load(&self) -> Result<PrivateKey> {
        enforce_strict_key_perms(&self.path)?;
        let data = fs::read(&self.path)
            .with_context(|| format!("read ca key {}", self.path.display()))?;
        let text = String::from_utf8_lossy(&data);

        if text.contains("OPENSSH PRIVATE KEY") {
            let key = PrivateKey::from_openssh(&data).context("parse openssh key")?;
            if key.is_encrypted() {
                bail!("encrypted ca keys are not supported");
            }
            if key.key_data().ed25519().is_none() {
                bail!("unsupported openssh key type: want ed25519");
            }
            self.log.info(
                "loaded ca key",
                &[
                    ("path".to_string(), self.path.display().to_string()),
                    ("format".to_string(), "openssh".to_string()),
                ],
            );
            return Ok(key);
        }

        if text.contains("BEGIN ENCRYPTED PRIVATE KEY") {
            bail!("encrypted ca keys are not supported");
        }
        if text.contains("-----BEGIN") {
            let signing = SigningKey::from_pkcs8_pem(&text)
                .map_err(|err| anyhow::anyhow!("parse pkcs8 ed25519 key: {}", err))?;
            let keypair = Ed25519Keypair {
                public: Ed25519PublicKey(signing.verifying_key().to_bytes()),
                private: Ed25519PrivateKey::from_bytes(&signing.to_bytes()),
            };
            let key = PrivateKey::new(KeypairData::Ed25519(keypair), "")
                .context("assemble ca key")?;
            self.log.info(
                "loaded ca key",
                &[
                    ("path".to_string(), self.path.display().to_string()),
                    ("format".to_string(), "pem".to_string()),
                ],
            );
            return Ok(key);
        }

        bail!("unrecognized ca key format (want PEM PKCS#8 or OpenSSH ed25519)")
    }
}

/// Rejects key files readable or writable by group/other. Allowed modes
/// are 0400 and 0600.
fn enforce_strict_key_perms(path: &Path) -> Result<()> {
    let meta = fs::metadata(path)
        .with_context(|| format!("stat ca key {}", path.display()))?;
    let mode = meta.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        bail!(
            "insecure permissions on {}: {:o} (require 0600 or 0400)",
            path.display(),
            mode
        );
    }
    Ok(())
}
